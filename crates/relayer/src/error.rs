use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use mystify_sdk::{SdkError, ValidationError};
use serde_json::json;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, RelayerError>;

#[derive(Error, Debug)]
pub enum RelayerError {
    #[error("Proxy wallet configuration missing")]
    ConfigurationMissing,

    #[error("Invalid proxy wallet private key format")]
    InvalidKeyFormat,

    #[error("Transaction validation failed: {0}")]
    ValidationFailed(#[from] ValidationError),

    #[error("Failed to build transaction: {0}")]
    TransactionBuildError(String),

    #[error("RPC failure: {0}")]
    RpcFailure(String),

    #[error("Insufficient balance: {0}")]
    InsufficientBalance(String),

    #[error("Withdrawal amount {amount} lamports outside of [{min}, {max}]")]
    AmountOutOfBounds { amount: u64, min: u64, max: u64 },

    #[error("Invalid recipient address format")]
    InvalidRecipientAddress,

    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}

impl RelayerError {
    /// Short, stable description; the full message goes into `details`.
    pub fn summary(&self) -> &'static str {
        match self {
            RelayerError::ConfigurationMissing => "Proxy wallet configuration missing",
            RelayerError::InvalidKeyFormat => "Invalid proxy wallet private key format",
            RelayerError::ValidationFailed(_) => "Transaction validation failed",
            RelayerError::TransactionBuildError(_) => "Failed to build transaction",
            RelayerError::RpcFailure(_) => "RPC failure",
            RelayerError::InsufficientBalance(_) => "Insufficient balance",
            RelayerError::AmountOutOfBounds { .. } => "Withdrawal amount out of bounds",
            RelayerError::InvalidRecipientAddress => "Invalid recipient address format",
            RelayerError::InvalidRequest(_) => "Invalid request",
        }
    }
}

impl From<SdkError> for RelayerError {
    fn from(err: SdkError) -> Self {
        match err {
            SdkError::Validation(e) => RelayerError::ValidationFailed(e),
            SdkError::Indexer(msg) => RelayerError::RpcFailure(msg),
            SdkError::InsufficientBalance(msg) => RelayerError::InsufficientBalance(msg),
            SdkError::AmountOutOfBounds { amount, min, max } => {
                RelayerError::AmountOutOfBounds { amount, min, max }
            }
            SdkError::InvalidNote(msg) | SdkError::InvalidInput(msg) => {
                RelayerError::InvalidRequest(msg)
            }
            SdkError::Serialization(msg)
            | SdkError::Transaction(msg)
            | SdkError::Relayer(msg) => RelayerError::TransactionBuildError(msg),
        }
    }
}

impl From<solana_client::client_error::ClientError> for RelayerError {
    fn from(err: solana_client::client_error::ClientError) -> Self {
        RelayerError::RpcFailure(err.to_string())
    }
}

// Every failure is reported as a server error; clients only read the body.
impl IntoResponse for RelayerError {
    fn into_response(self) -> Response {
        let body = Json(json!({
            "error": self.summary(),
            "details": self.to_string(),
        }));

        (StatusCode::INTERNAL_SERVER_ERROR, body).into_response()
    }
}

/// Error shape of the gasless route: `{error}` only.
#[derive(Debug)]
pub struct GaslessError(pub RelayerError);

impl From<RelayerError> for GaslessError {
    fn from(err: RelayerError) -> Self {
        GaslessError(err)
    }
}

impl IntoResponse for GaslessError {
    fn into_response(self) -> Response {
        let body = Json(json!({ "error": self.0.to_string() }));
        (StatusCode::INTERNAL_SERVER_ERROR, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use solana_sdk::pubkey::Pubkey;

    #[test]
    fn test_sdk_errors_map_to_relayer_kinds() {
        let err: RelayerError = SdkError::AmountOutOfBounds {
            amount: 1,
            min: 2,
            max: 3,
        }
        .into();
        assert!(matches!(err, RelayerError::AmountOutOfBounds { amount: 1, .. }));

        let err: RelayerError = SdkError::Indexer("timeout".into()).into();
        assert!(matches!(err, RelayerError::RpcFailure(_)));

        let err: RelayerError = SdkError::Validation(ValidationError::UnauthorizedProgram {
            index: 0,
            program_id: Pubkey::new_unique(),
        })
        .into();
        assert_eq!(err.summary(), "Transaction validation failed");
    }

    #[test]
    fn test_status_is_always_500() {
        let response = RelayerError::InvalidRecipientAddress.into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let response = GaslessError(RelayerError::ConfigurationMissing).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
