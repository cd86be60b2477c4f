//! Pledgebook storage abstractions.
//!
//! This crate defines the repository contract consumed by the ledger core:
//! - directory records (organizations, committees, members, projects)
//! - organization and committee memberships for authorization
//! - pledges and their append-only payments
//! - committee cashbook records (offerings and expenses)
//!
//! Design stance:
//! - The store is the only shared mutable resource. Every pledge write is a
//!   compare-and-swap on the pledge `version`.
//! - A payment insert and the matching `collected_amount` update happen in one
//!   atomic unit ([`PledgeStore::commit_payment`]); readers never observe one
//!   without the other.
//! - Idempotent reads may be retried through [`ReadRetry`] when the backend is
//!   briefly unreachable.

#![deny(unsafe_code)]
#![cfg_attr(feature = "strict-docs", warn(missing_docs))]
#![cfg_attr(not(feature = "strict-docs"), allow(missing_docs))]
#![warn(rust_2018_idioms)]

mod error;
#[cfg(any(test, feature = "test-util"))]
pub mod flaky;
pub mod memory;
#[cfg(feature = "postgres")]
pub mod postgres;
mod model;
mod retry;
mod traits;

pub use error::{StorageError, StorageResult};
pub use model::{DeleteOutcome, PledgeFilter, QueryWindow};
pub use retry::ReadRetry;
pub use traits::{CashbookStore, DirectoryStore, MembershipStore, PledgeStore, Repository};
