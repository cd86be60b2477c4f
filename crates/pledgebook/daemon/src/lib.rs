//! Pledgebook daemon library
//!
//! Configuration loading, repository selection and the periodic lifecycle
//! sweep used by the `pledgebookd` binary.

pub mod config;
pub mod error;
pub mod scheduler;
pub mod storage;

pub use config::DaemonConfig;
pub use error::{DaemonError, DaemonResult};
pub use scheduler::SweepScheduler;
pub use storage::open_repository;
