/// HTTP client for the relayer's withdrawal routes.
use reqwest::{Client, Response};
use serde::{de::DeserializeOwned, Serialize};
use solana_sdk::{
    hash::Hash, instruction::Instruction, pubkey::Pubkey, transaction::VersionedTransaction,
};
use std::str::FromStr;
use std::time::Duration;
use tracing::debug;

use crate::api::{
    ErrorResponse, GaslessWithdrawRequest, GaslessWithdrawResponse, HealthResponse,
    WithdrawRequest, WithdrawResponse,
};
use crate::error::{Result, SdkError};
use crate::instruction::serialize_instructions;
use crate::note::Note;
use crate::transaction::decode_transaction;

const REQUEST_TIMEOUT_SECS: u64 = 60;

pub struct RelayerClient {
    client: Client,
    base_url: String,
}

impl RelayerClient {
    pub fn new(base_url: impl Into<String>) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .map_err(|e| SdkError::Relayer(format!("Failed to build client: {}", e)))?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub async fn health(&self) -> Result<HealthResponse> {
        let response = self
            .client
            .get(format!("{}/health", self.base_url))
            .send()
            .await
            .map_err(|e| SdkError::Relayer(format!("GET /health failed: {}", e)))?;
        read_json(response).await
    }

    /// Asks the relayer which key will pay network fees.
    pub async fn fee_payer(&self) -> Result<Pubkey> {
        let request = WithdrawRequest {
            get_proxy_wallet_only: true,
            ..Default::default()
        };
        let response: WithdrawResponse = self.post("/withdraw", &request).await?;
        let key = response
            .proxy_wallet_public_key
            .ok_or_else(|| SdkError::Relayer("response has no fee payer key".into()))?;
        Pubkey::from_str(&key).map_err(|e| SdkError::Relayer(format!("bad fee payer key: {}", e)))
    }

    /// Returns the transaction signed by the fee payer only; the caller adds
    /// the note signature before sending.
    pub async fn request_fee_payer_signature(
        &self,
        instructions: &[Instruction],
        blockhash: &Hash,
        note_public_key: &Pubkey,
    ) -> Result<VersionedTransaction> {
        let request = WithdrawRequest {
            instructions: serialize_instructions(instructions),
            blockhash: Some(blockhash.to_string()),
            note_public_key: Some(note_public_key.to_string()),
            get_proxy_wallet_only: false,
        };
        let response: WithdrawResponse = self.post("/withdraw", &request).await?;
        let encoded = response
            .transaction
            .ok_or_else(|| SdkError::Relayer("response has no transaction".into()))?;
        decode_transaction(&encoded)
    }

    /// Hands the note's secret key to the relayer, which submits the
    /// withdrawal itself.
    pub async fn gasless_withdraw(
        &self,
        note: &Note,
        recipient: &Pubkey,
    ) -> Result<GaslessWithdrawResponse> {
        let request = GaslessWithdrawRequest {
            note_private_key: note.secret_key_base64(),
            recipient_address: recipient.to_string(),
        };
        self.post("/withdraw/gasless", &request).await
    }

    async fn post<B: Serialize, R: DeserializeOwned>(&self, path: &str, body: &B) -> Result<R> {
        let url = format!("{}{}", self.base_url, path);
        debug!("POST {}", url);
        let response = self
            .client
            .post(&url)
            .json(body)
            .send()
            .await
            .map_err(|e| SdkError::Relayer(format!("POST {} failed: {}", path, e)))?;
        read_json(response).await
    }
}

async fn read_json<R: DeserializeOwned>(response: Response) -> Result<R> {
    let status = response.status();
    let text = response
        .text()
        .await
        .map_err(|e| SdkError::Relayer(format!("Failed to read response: {}", e)))?;

    if !status.is_success() {
        return Err(relayer_error(status.as_u16(), &text));
    }
    serde_json::from_str(&text)
        .map_err(|e| SdkError::Relayer(format!("JSON parse failed: {}", e)))
}

fn relayer_error(status: u16, body: &str) -> SdkError {
    match serde_json::from_str::<ErrorResponse>(body) {
        Ok(ErrorResponse {
            error,
            details: Some(details),
        }) => SdkError::Relayer(format!("{} ({})", error, details)),
        Ok(ErrorResponse { error, .. }) => SdkError::Relayer(error),
        Err(_) => SdkError::Relayer(format!("HTTP {}: {}", status, body)),
    }
}
