use solana_sdk::signature::Keypair;
use tracing::debug;

use crate::error::{RelayerError, Result};

/// Decodes the configured fee-payer secret: base58 first, then a JSON byte
/// array as written by `solana-keygen`.
pub fn load_fee_payer(secret: Option<&str>) -> Result<Keypair> {
    let secret = secret
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .ok_or(RelayerError::ConfigurationMissing)?;

    if let Some(keypair) = from_base58(secret) {
        return Ok(keypair);
    }
    debug!("Fee payer secret is not base58, trying JSON byte array");

    from_json(secret).ok_or(RelayerError::InvalidKeyFormat)
}

fn from_base58(secret: &str) -> Option<Keypair> {
    let bytes = bs58::decode(secret).into_vec().ok()?;
    Keypair::try_from(&bytes[..]).ok()
}

fn from_json(secret: &str) -> Option<Keypair> {
    let bytes: Vec<u8> = serde_json::from_str(secret).ok()?;
    Keypair::try_from(&bytes[..]).ok()
}
