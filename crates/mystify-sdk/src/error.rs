use thiserror::Error;

use crate::validator::ValidationError;

pub type Result<T> = std::result::Result<T, SdkError>;

#[derive(Error, Debug)]
pub enum SdkError {
    #[error("Invalid note: {0}")]
    InvalidNote(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Indexer error: {0}")]
    Indexer(String),

    #[error("Relayer error: {0}")]
    Relayer(String),

    #[error("Transaction error: {0}")]
    Transaction(String),

    #[error("Insufficient balance: {0}")]
    InsufficientBalance(String),

    #[error("Withdrawal amount {amount} lamports outside of [{min}, {max}]")]
    AmountOutOfBounds { amount: u64, min: u64, max: u64 },

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Transaction rejected: {0}")]
    Validation(#[from] ValidationError),
}
