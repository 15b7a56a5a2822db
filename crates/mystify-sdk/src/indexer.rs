//! Minimal Photon indexer client: compressed accounts, balances and validity
//! proofs over JSON-RPC 2.0.
use base64::{engine::general_purpose::STANDARD, Engine as _};
use reqwest::Client;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::json;
use solana_sdk::pubkey::Pubkey;
use std::str::FromStr;
use std::time::Duration;
use tracing::debug;

use crate::compression::{
    CompressedAccount, CompressedAccountData, CompressedAccountWithContext, CompressedProof,
    StateTreeInfo, ValidityProof,
};
use crate::error::{Result, SdkError};

const REQUEST_TIMEOUT_SECS: u64 = 30;

#[derive(Serialize)]
struct RpcRequest<'a, P: Serialize> {
    jsonrpc: &'static str,
    id: &'static str,
    method: &'a str,
    params: P,
}

#[derive(Deserialize)]
struct RpcResponse<R> {
    result: Option<R>,
    error: Option<RpcError>,
}

#[derive(Deserialize, Debug)]
struct RpcError {
    code: i64,
    message: String,
}

#[derive(Deserialize)]
struct WithContext<T> {
    value: T,
}

#[derive(Deserialize)]
struct AccountList {
    items: Vec<IndexedAccount>,
    cursor: Option<String>,
}

#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub(crate) struct IndexedAccount {
    hash: String,
    owner: String,
    lamports: u64,
    tree: String,
    /// Newer indexers report the queue next to the tree
    #[serde(default)]
    queue: Option<String>,
    leaf_index: u32,
    #[serde(default)]
    address: Option<String>,
    #[serde(default)]
    data: Option<IndexedAccountData>,
}

#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub(crate) struct IndexedAccountData {
    discriminator: u64,
    /// base64
    data: String,
    /// base58
    data_hash: String,
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub(crate) struct IndexedProof {
    compressed_proof: IndexedCompressedProof,
    root_indices: Vec<u64>,
}

#[derive(Deserialize, Debug)]
pub(crate) struct IndexedCompressedProof {
    a: Vec<u8>,
    b: Vec<u8>,
    c: Vec<u8>,
}

pub struct PhotonIndexer {
    client: Client,
    url: String,
    default_tree: StateTreeInfo,
}

impl PhotonIndexer {
    pub fn new(url: impl Into<String>) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .map_err(|e| SdkError::Indexer(format!("Failed to build client: {}", e)))?;

        Ok(Self {
            client,
            url: url.into(),
            default_tree: StateTreeInfo::default(),
        })
    }

    /// Tree pair used when the indexer omits an account's nullifier queue.
    pub fn with_default_tree(mut self, tree: StateTreeInfo) -> Self {
        self.default_tree = tree;
        self
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn default_tree(&self) -> StateTreeInfo {
        self.default_tree
    }

    /// Every compressed account owned by `owner`, following pagination.
    pub async fn get_compressed_accounts_by_owner(
        &self,
        owner: &Pubkey,
    ) -> Result<Vec<CompressedAccountWithContext>> {
        let mut accounts = Vec::new();
        let mut cursor: Option<String> = None;

        loop {
            let mut params = json!({ "owner": owner.to_string() });
            if let Some(c) = &cursor {
                params["cursor"] = json!(c);
            }
            let page: WithContext<AccountList> =
                self.call("getCompressedAccountsByOwner", params).await?;

            for item in &page.value.items {
                accounts.push(convert_account(item, &self.default_tree)?);
            }
            match page.value.cursor {
                Some(next) if !page.value.items.is_empty() => cursor = Some(next),
                _ => break,
            }
        }

        debug!("Indexer returned {} compressed accounts for {}", accounts.len(), owner);
        Ok(accounts)
    }

    pub async fn get_compressed_balance_by_owner(&self, owner: &Pubkey) -> Result<u64> {
        let balance: WithContext<u64> = self
            .call(
                "getCompressedBalanceByOwner",
                json!({ "owner": owner.to_string() }),
            )
            .await?;
        Ok(balance.value)
    }

    pub async fn get_validity_proof(&self, hashes: &[[u8; 32]]) -> Result<ValidityProof> {
        let encoded: Vec<String> = hashes
            .iter()
            .map(|h| bs58::encode(h).into_string())
            .collect();
        let proof: WithContext<IndexedProof> = self
            .call("getValidityProof", json!({ "hashes": encoded }))
            .await?;
        convert_proof(proof.value, hashes.len())
    }

    async fn call<R: DeserializeOwned>(&self, method: &str, params: serde_json::Value) -> Result<R> {
        debug!("Indexer call {}", method);
        let request = RpcRequest {
            jsonrpc: "2.0",
            id: "mystify",
            method,
            params,
        };

        let response = self
            .client
            .post(&self.url)
            .json(&request)
            .send()
            .await
            .map_err(|e| SdkError::Indexer(format!("{} request failed: {}", method, e)))?;

        let body: RpcResponse<R> = response
            .json()
            .await
            .map_err(|e| SdkError::Indexer(format!("{} response parse failed: {}", method, e)))?;

        if let Some(err) = body.error {
            return Err(SdkError::Indexer(format!(
                "{} failed ({}): {}",
                method, err.code, err.message
            )));
        }
        body.result
            .ok_or_else(|| SdkError::Indexer(format!("{} returned no result", method)))
    }
}

pub(crate) fn convert_account(
    item: &IndexedAccount,
    default_tree: &StateTreeInfo,
) -> Result<CompressedAccountWithContext> {
    let tree = decode_pubkey(&item.tree)?;
    let tree_info = match &item.queue {
        Some(queue) => StateTreeInfo {
            tree,
            queue: decode_pubkey(queue)?,
        },
        None if tree == default_tree.tree => *default_tree,
        None => StateTreeInfo::for_tree(&tree)
            .ok_or_else(|| SdkError::Indexer(format!("unknown state tree {}", tree)))?,
    };

    let data = item
        .data
        .as_ref()
        .map(|d| -> Result<CompressedAccountData> {
            Ok(CompressedAccountData {
                discriminator: d.discriminator.to_le_bytes(),
                data: STANDARD
                    .decode(&d.data)
                    .map_err(|e| SdkError::Indexer(format!("account data is not base64: {}", e)))?,
                data_hash: decode_base58_32(&d.data_hash)?,
            })
        })
        .transpose()?;

    let address = item.address.as_deref().map(decode_base58_32).transpose()?;

    Ok(CompressedAccountWithContext {
        hash: decode_base58_32(&item.hash)?,
        account: CompressedAccount {
            owner: decode_pubkey(&item.owner)?.to_bytes(),
            lamports: item.lamports,
            address,
            data,
        },
        tree: tree_info,
        leaf_index: item.leaf_index,
    })
}

pub(crate) fn convert_proof(proof: IndexedProof, expected_inputs: usize) -> Result<ValidityProof> {
    let compressed = proof.compressed_proof;
    let compressed_proof = CompressedProof {
        a: fixed_bytes(&compressed.a, "proof.a")?,
        b: fixed_bytes(&compressed.b, "proof.b")?,
        c: fixed_bytes(&compressed.c, "proof.c")?,
    };

    if proof.root_indices.len() != expected_inputs {
        return Err(SdkError::Indexer(format!(
            "proof has {} root indices for {} hashes",
            proof.root_indices.len(),
            expected_inputs
        )));
    }
    let root_indices = proof
        .root_indices
        .iter()
        .map(|i| {
            u16::try_from(*i).map_err(|_| SdkError::Indexer(format!("root index {} out of range", i)))
        })
        .collect::<Result<Vec<_>>>()?;

    Ok(ValidityProof {
        compressed_proof,
        root_indices,
    })
}

fn decode_pubkey(value: &str) -> Result<Pubkey> {
    Pubkey::from_str(value).map_err(|e| SdkError::Indexer(format!("invalid pubkey {}: {}", value, e)))
}

fn decode_base58_32(value: &str) -> Result<[u8; 32]> {
    let bytes = bs58::decode(value)
        .into_vec()
        .map_err(|e| SdkError::Indexer(format!("invalid base58 {}: {}", value, e)))?;
    fixed_bytes(&bytes, value)
}

fn fixed_bytes<const N: usize>(bytes: &[u8], what: &str) -> Result<[u8; N]> {
    bytes.try_into().map_err(|_| {
        SdkError::Indexer(format!("{}: expected {} bytes, got {}", what, N, bytes.len()))
    })
}
