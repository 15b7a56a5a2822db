use solana_sdk::{
    hash::Hash,
    instruction::Instruction,
    message::{v0, VersionedMessage},
    pubkey::Pubkey,
    signature::{Keypair, Signature},
    signer::Signer,
    transaction::VersionedTransaction,
};

use crate::error::{Result, SdkError};

/// Compiles a v0 message with every signature slot left at its default.
pub fn compile_v0(
    payer: &Pubkey,
    instructions: &[Instruction],
    blockhash: Hash,
) -> Result<VersionedTransaction> {
    let message = v0::Message::try_compile(payer, instructions, &[], blockhash)
        .map_err(|e| SdkError::Transaction(format!("Failed to compile message: {}", e)))?;
    let message = VersionedMessage::V0(message);
    let required = message.header().num_required_signatures as usize;

    Ok(VersionedTransaction {
        signatures: vec![Signature::default(); required],
        message,
    })
}

/// Fills in the signature slot belonging to `keypair`, leaving the others
/// untouched.
pub fn partially_sign(tx: &mut VersionedTransaction, keypair: &Keypair) -> Result<()> {
    let pubkey = keypair.pubkey();
    let required = tx.message.header().num_required_signatures as usize;
    let position = tx
        .message
        .static_account_keys()
        .iter()
        .take(required)
        .position(|key| *key == pubkey)
        .ok_or_else(|| {
            SdkError::Transaction(format!("{} is not a required signer", pubkey))
        })?;

    if tx.signatures.len() != required {
        tx.signatures.resize(required, Signature::default());
    }
    tx.signatures[position] = keypair.sign_message(&tx.message.serialize());
    Ok(())
}

pub fn is_fully_signed(tx: &VersionedTransaction) -> bool {
    tx.signatures.iter().all(|s| *s != Signature::default())
        && tx.verify_with_results().into_iter().all(|ok| ok)
}

/// Base-58 of the bincode wire form.
pub fn encode_transaction(tx: &VersionedTransaction) -> Result<String> {
    let bytes = bincode::serialize(tx)
        .map_err(|e| SdkError::Serialization(format!("transaction: {}", e)))?;
    Ok(bs58::encode(bytes).into_string())
}

pub fn decode_transaction(encoded: &str) -> Result<VersionedTransaction> {
    let bytes = bs58::decode(encoded.trim())
        .into_vec()
        .map_err(|e| SdkError::Serialization(format!("transaction is not base58: {}", e)))?;
    bincode::deserialize(&bytes)
        .map_err(|e| SdkError::Serialization(format!("transaction: {}", e)))
}
