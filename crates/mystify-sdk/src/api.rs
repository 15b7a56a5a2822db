/// Request and response bodies of the relayer's HTTP routes.
use serde::{Deserialize, Serialize};

use crate::instruction::SerializedInstruction;

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WithdrawRequest {
    #[serde(default)]
    pub instructions: Vec<SerializedInstruction>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub blockhash: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note_public_key: Option<String>,
    /// Only return the fee payer's address
    #[serde(default)]
    pub get_proxy_wallet_only: bool,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WithdrawResponse {
    pub success: bool,
    /// Base-58 bincode transaction signed by the fee payer
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transaction: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proxy_wallet_public_key: Option<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GaslessWithdrawRequest {
    /// Base64 of the note's 64-byte secret key
    pub note_private_key: String,
    pub recipient_address: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GaslessWithdrawResponse {
    pub success: bool,
    pub signature: String,
    /// SOL, four decimals
    pub withdrawn_amount: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_short_circuit_request_needs_no_instructions() {
        let request: WithdrawRequest =
            serde_json::from_str(r#"{"getProxyWalletOnly": true}"#).unwrap();
        assert!(request.get_proxy_wallet_only);
        assert!(request.instructions.is_empty());
        assert!(request.blockhash.is_none());
    }

    #[test]
    fn test_response_omits_absent_fields() {
        let response = WithdrawResponse {
            success: true,
            transaction: None,
            proxy_wallet_public_key: Some("key".into()),
        };
        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(json["proxyWalletPublicKey"], "key");
        assert!(json.get("transaction").is_none());
    }
}
