//! # taskseq core library
//!
//! Ordered command sequences against a cluster-management backend: dispatch, status
//! polling, retry/skip/abort and resumable persisted progress.

pub mod client;
pub mod error;
pub mod models;
pub mod services;
pub mod workflow;

pub use error::{SequenceError, TaskError};
