use pledgebook_ledger::LedgerError;
use pledgebook_storage::StorageError;
use thiserror::Error;

pub type DaemonResult<T> = Result<T, DaemonError>;

#[derive(Debug, Error)]
pub enum DaemonError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("sweep failed: {0}")]
    Sweep(#[from] LedgerError),
}
