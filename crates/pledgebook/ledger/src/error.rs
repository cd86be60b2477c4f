use pledgebook_authz::AuthzError;
use pledgebook_storage::StorageError;
use pledgebook_types::{PledgeId, PledgeState};
use rust_decimal::Decimal;
use thiserror::Error;

pub type LedgerResult<T> = Result<T, LedgerError>;

/// Ledger-related errors.
///
/// Only `ConcurrencyConflict` and `StoreUnavailable` are transient; the ledger
/// retries them itself and surfaces `ConcurrencyTimeout` / `StoreUnavailable`
/// once its retry budget is spent.
#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("validation failed: {0}")]
    Validation(String),

    /// Same error whether the target is forbidden or absent.
    #[error("not authorized")]
    AuthorizationDenied,

    #[error("amount {requested} exceeds the pending amount {pending}")]
    AmountExceedsPending { requested: Decimal, pending: Decimal },

    #[error("concurrent update: {0}")]
    ConcurrencyConflict(String),

    #[error("gave up after {attempts} attempts on a contended record")]
    ConcurrencyTimeout { attempts: u32 },

    #[error("not found: {0}")]
    NotFound(String),

    #[error("pledge {pledge_id} has {payments} payment(s) and cannot be deleted")]
    HasDependentPayments { pledge_id: PledgeId, payments: usize },

    #[error("pledge {pledge_id} is {state}")]
    InvalidState { pledge_id: PledgeId, state: PledgeState },

    #[error("store unavailable: {0}")]
    StoreUnavailable(String),

    /// The store refused a write that the ledger considered valid.
    #[error("integrity violation: {0}")]
    Integrity(String),

    #[error("storage error: {0}")]
    Storage(String),
}

impl LedgerError {
    /// Whether the caller should offer "try again" rather than "fix your input".
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            LedgerError::ConcurrencyConflict(_)
                | LedgerError::ConcurrencyTimeout { .. }
                | LedgerError::StoreUnavailable(_)
        )
    }

    pub(crate) fn is_transient(&self) -> bool {
        matches!(
            self,
            LedgerError::ConcurrencyConflict(_) | LedgerError::StoreUnavailable(_)
        )
    }
}

impl From<AuthzError> for LedgerError {
    fn from(value: AuthzError) -> Self {
        match value {
            AuthzError::StoreUnavailable(msg) => Self::StoreUnavailable(msg),
            AuthzError::Lookup(msg) => Self::Storage(msg),
        }
    }
}

impl From<StorageError> for LedgerError {
    fn from(value: StorageError) -> Self {
        match value {
            StorageError::NotFound(msg) => Self::NotFound(msg),
            StorageError::Conflict(msg) => Self::ConcurrencyConflict(msg),
            StorageError::InvariantViolation(msg) => Self::Integrity(msg),
            StorageError::InvalidInput(msg) => Self::Validation(msg),
            StorageError::Unavailable(msg) => Self::StoreUnavailable(msg),
            StorageError::Serialization(msg) | StorageError::Backend(msg) => Self::Storage(msg),
        }
    }
}
