//! Data models for taskseq

pub mod configuration;
pub mod context;
pub mod definition;
pub mod run_state;
pub mod task;

pub use configuration::*;
pub use context::*;
pub use definition::*;
pub use run_state::*;
pub use task::*;
