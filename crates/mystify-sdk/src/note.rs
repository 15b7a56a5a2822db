/// Deposit notes: the only secret a depositor keeps.
/// `mystify-0.2.0-<base64 secret key>-<base64 deposit signature>`
use base64::{engine::general_purpose::STANDARD, Engine as _};
use solana_sdk::{
    pubkey::Pubkey,
    signature::{Keypair, Signature},
    signer::Signer,
};
use std::fmt;
use std::str::FromStr;

use crate::error::{Result, SdkError};

pub const NOTE_VERSION: &str = "0.2.0";
pub const NOTE_PREFIX: &str = "mystify-0.2.0-";

pub struct Note {
    keypair: Keypair,
    /// Signature of the deposit transaction, kept as the user saw it
    deposit_signature: String,
}

impl Note {
    pub fn new(keypair: Keypair, deposit_signature: &Signature) -> Self {
        Self {
            keypair,
            deposit_signature: deposit_signature.to_string(),
        }
    }

    pub fn parse(note: &str) -> Result<Self> {
        let (key_part, sig_part) = split_note(note)?;
        let keypair = keypair_from_base64(key_part)?;
        let deposit_signature = decode_signature_part(sig_part)?;
        Ok(Self {
            keypair,
            deposit_signature,
        })
    }

    pub fn encode(&self) -> String {
        format!(
            "{}{}-{}",
            NOTE_PREFIX,
            STANDARD.encode(self.keypair.to_bytes()),
            STANDARD.encode(self.deposit_signature.as_bytes())
        )
    }

    pub fn keypair(&self) -> &Keypair {
        &self.keypair
    }

    pub fn public_key(&self) -> Pubkey {
        self.keypair.pubkey()
    }

    pub fn deposit_signature(&self) -> &str {
        &self.deposit_signature
    }

    /// Base64 of the raw secret key, the form the gasless route accepts.
    pub fn secret_key_base64(&self) -> String {
        STANDARD.encode(self.keypair.to_bytes())
    }
}

impl FromStr for Note {
    type Err = SdkError;

    fn from_str(s: &str) -> Result<Self> {
        Note::parse(s)
    }
}

impl fmt::Debug for Note {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Note")
            .field("public_key", &self.public_key())
            .field("deposit_signature", &self.deposit_signature)
            .finish()
    }
}

/// Reads the deposit signature without touching the key material.
pub fn extract_deposit_signature(note: &str) -> Result<String> {
    let (_, sig_part) = split_note(note)?;
    decode_signature_part(sig_part)
}

pub fn keypair_from_base64(encoded: &str) -> Result<Keypair> {
    let bytes = STANDARD
        .decode(encoded.trim())
        .map_err(|e| SdkError::InvalidNote(format!("private key is not base64: {}", e)))?;
    keypair_from_bytes(&bytes)
}

pub fn keypair_from_bytes(bytes: &[u8]) -> Result<Keypair> {
    if bytes.len() != 64 {
        return Err(SdkError::InvalidNote(format!(
            "private key must be 64 bytes, got {}",
            bytes.len()
        )));
    }
    Keypair::try_from(bytes)
        .map_err(|e| SdkError::InvalidNote(format!("invalid private key: {}", e)))
}

fn split_note(note: &str) -> Result<(&str, &str)> {
    let content = note
        .trim()
        .strip_prefix(NOTE_PREFIX)
        .ok_or_else(|| SdkError::InvalidNote(format!("expected prefix {}", NOTE_PREFIX)))?;

    // Standard base64 never contains '-', so the separator is unambiguous
    let parts: Vec<&str> = content.split('-').collect();
    match parts.as_slice() {
        [key, sig] if !key.is_empty() && !sig.is_empty() => Ok((key, sig)),
        _ => Err(SdkError::InvalidNote(
            "missing transaction hash or malformed body".into(),
        )),
    }
}

fn decode_signature_part(part: &str) -> Result<String> {
    let bytes = STANDARD
        .decode(part)
        .map_err(|e| SdkError::InvalidNote(format!("transaction hash is not base64: {}", e)))?;
    String::from_utf8(bytes)
        .map_err(|_| SdkError::InvalidNote("transaction hash is not utf-8".into()))
}
