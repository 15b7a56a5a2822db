//! Gasless withdrawal: the relayer receives the note secret, unshields the
//! whole balance straight to the recipient and submits the transaction itself.
use mystify_sdk::{
    api::{GaslessWithdrawRequest, GaslessWithdrawResponse},
    compression::{self, CompressedAccountWithContext, DecompressParams, StateTreeInfo, ValidityProof},
    note::keypair_from_base64,
    programs::{compute_unit_limit, DEFAULT_COMPUTE_UNIT_LIMIT},
    transaction::{compile_v0, partially_sign},
    withdrawal::format_sol,
    InstructionValidator, WithdrawalBounds,
};
use solana_sdk::{instruction::Instruction, pubkey::Pubkey, signer::Signer};
use std::str::FromStr;
use tracing::info;

use crate::error::{RelayerError, Result};
use crate::keys::load_fee_payer;
use crate::server::RelayerState;

pub async fn withdraw(
    state: &RelayerState,
    request: &GaslessWithdrawRequest,
) -> Result<GaslessWithdrawResponse> {
    let config = &state.config;
    let fee_payer = load_fee_payer(config.fee_payer_secret.as_deref())?;
    let note = keypair_from_base64(&request.note_private_key)
        .map_err(|e| RelayerError::InvalidRequest(e.to_string()))?;
    let recipient = Pubkey::from_str(request.recipient_address.trim())
        .map_err(|_| RelayerError::InvalidRecipientAddress)?;

    let accounts = state
        .indexer
        .get_compressed_accounts_by_owner(&note.pubkey())
        .await?;
    let total = withdrawable_lamports(&accounts, &config.bounds)?;

    let hashes: Vec<[u8; 32]> = accounts.iter().map(|a| a.hash).collect();
    let proof = state.indexer.get_validity_proof(&hashes).await?;

    let instructions = build_instructions(
        &fee_payer.pubkey(),
        &note.pubkey(),
        &recipient,
        total,
        &accounts,
        &proof,
        config.state_tree,
    )?;

    // Relayer-built instructions: the fee payer may fund the invoke
    let validator = InstructionValidator::new(
        config
            .validator_config(fee_payer.pubkey())
            .with_sponsored_invokes(),
    );
    validator.validate(&instructions, Some(&note.pubkey()))?;

    let blockhash = state.rpc_client.get_latest_blockhash().await?;
    let mut tx = compile_v0(&fee_payer.pubkey(), &instructions, blockhash)?;
    partially_sign(&mut tx, &fee_payer)?;
    partially_sign(&mut tx, &note)?;

    let signature = state.rpc_client.send_and_confirm_transaction(&tx).await?;
    info!(
        "Gasless withdrawal of {} SOL to {} confirmed: {}",
        format_sol(total),
        recipient,
        signature
    );

    Ok(GaslessWithdrawResponse {
        success: true,
        signature: signature.to_string(),
        withdrawn_amount: format_sol(total),
    })
}

/// Total balance of `accounts`, provided it is non-zero and within bounds.
pub fn withdrawable_lamports(
    accounts: &[CompressedAccountWithContext],
    bounds: &WithdrawalBounds,
) -> Result<u64> {
    if accounts.is_empty() {
        return Err(RelayerError::InsufficientBalance(
            "No compressed accounts found for this note".into(),
        ));
    }
    let total = accounts
        .iter()
        .try_fold(0u64, |sum, a| sum.checked_add(a.lamports()))
        .ok_or_else(|| RelayerError::InvalidRequest("balance overflow".into()))?;
    if total == 0 {
        return Err(RelayerError::InsufficientBalance(
            "No balance available to withdraw".into(),
        ));
    }
    bounds.check(total)?;
    Ok(total)
}

pub fn build_instructions(
    fee_payer: &Pubkey,
    note: &Pubkey,
    recipient: &Pubkey,
    lamports: u64,
    accounts: &[CompressedAccountWithContext],
    proof: &ValidityProof,
    output_tree: StateTreeInfo,
) -> Result<Vec<Instruction>> {
    let decompress = compression::decompress(DecompressParams {
        fee_payer: *fee_payer,
        authority: *note,
        recipient: *recipient,
        lamports,
        inputs: accounts,
        proof,
        output_tree,
    })?;
    Ok(vec![compute_unit_limit(DEFAULT_COMPUTE_UNIT_LIMIT), decompress])
}
