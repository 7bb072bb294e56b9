use thiserror::Error;

use super::OperationStatus;

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("Fjall error: {0}")]
    Fjall(#[from] fjall::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Operation not found: {0}")]
    OperationNotFound(String),

    #[error("Operation {id} is already {status}")]
    TerminalState { id: String, status: OperationStatus },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Ledger service error: {0}")]
    Remote(String),
}

impl LedgerError {
    /// The update can never apply, no matter how often it is retried
    pub fn is_permanent(&self) -> bool {
        matches!(
            self,
            LedgerError::OperationNotFound(_) | LedgerError::TerminalState { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, LedgerError>;
