//! Task sequence orchestration module

pub mod abort;
pub mod loader;
pub mod persistence;
pub mod poller;
pub mod runner;
pub mod sequence;
pub mod template;
pub mod validator;

pub use abort::*;
pub use loader::*;
pub use persistence::*;
pub use poller::*;
pub use runner::*;
pub use sequence::*;
pub use template::*;
pub use validator::*;
