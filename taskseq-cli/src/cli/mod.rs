//! CLI command implementations

pub mod handlers;
pub mod reporter;
