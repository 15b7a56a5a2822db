use solana_sdk::{
    instruction::Instruction, native_token::LAMPORTS_PER_SOL, pubkey::Pubkey, system_instruction,
};

use crate::compression::{
    self, CompressedAccountWithContext, DecompressParams, StateTreeInfo, ValidityProof,
};
use crate::error::{Result, SdkError};
use crate::programs::{compute_unit_limit, DEFAULT_COMPUTE_UNIT_LIMIT};

pub const DEFAULT_FEE_BPS: u16 = 50; // 0.5%
pub const MIN_FEE_LAMPORTS: u64 = 10_000;
/// Base fee per transaction signature.
pub const SIGNATURE_FEE_LAMPORTS: u64 = 5_000;
/// Relayed withdrawals are signed by the fee payer and the note.
pub const RELAYED_SIGNATURES: u64 = 2;
/// Network fee Light takes from the invoke's fee payer when compressed
/// accounts are spent. Left in the note so the final transfer is covered.
pub const LIGHT_NETWORK_FEE_LAMPORTS: u64 = 5_000;

pub const MIN_WITHDRAWAL_LAMPORTS: u64 = 1_000_000; // 0.001 SOL
pub const MAX_WITHDRAWAL_LAMPORTS: u64 = 100 * LAMPORTS_PER_SOL;

/// Deposit denominations offered by the CLI, in SOL.
pub const DEPOSIT_AMOUNTS_SOL: [f64; 4] = [0.1, 1.0, 10.0, 100.0];

pub fn protocol_fee(total_lamports: u64, fee_bps: u16) -> u64 {
    let fee = (total_lamports as u128 * fee_bps as u128 / 10_000) as u64;
    fee.max(MIN_FEE_LAMPORTS)
}

pub fn signature_fees(num_signatures: u64) -> u64 {
    num_signatures * SIGNATURE_FEE_LAMPORTS
}

pub fn format_sol(lamports: u64) -> String {
    format!("{:.4}", lamports as f64 / LAMPORTS_PER_SOL as f64)
}

pub fn sol_to_lamports(sol: f64) -> Result<u64> {
    if !sol.is_finite() || sol <= 0.0 {
        return Err(SdkError::InvalidInput(format!("invalid SOL amount {}", sol)));
    }
    Ok((sol * LAMPORTS_PER_SOL as f64).round() as u64)
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct WithdrawalBounds {
    pub min: u64,
    pub max: u64,
}

impl Default for WithdrawalBounds {
    fn default() -> Self {
        Self {
            min: MIN_WITHDRAWAL_LAMPORTS,
            max: MAX_WITHDRAWAL_LAMPORTS,
        }
    }
}

impl WithdrawalBounds {
    pub fn check(&self, amount: u64) -> Result<()> {
        if amount < self.min || amount > self.max {
            return Err(SdkError::AmountOutOfBounds {
                amount,
                min: self.min,
                max: self.max,
            });
        }
        Ok(())
    }
}

/// Two-step withdrawal: unshield everything into the note account, then pay
/// the relayer and forward the rest to the recipient. The note keeps exactly
/// the Light network fee, which the invoke charges it after decompression.
#[derive(Clone, Debug)]
pub struct WithdrawalPlan {
    pub note: Pubkey,
    pub fee_payer: Pubkey,
    pub recipient: Pubkey,
    pub inputs: Vec<CompressedAccountWithContext>,
    pub proof: ValidityProof,
    pub output_tree: StateTreeInfo,
    pub fee_bps: u16,
}

impl WithdrawalPlan {
    pub fn total_lamports(&self) -> u64 {
        self.inputs.iter().map(|a| a.lamports()).sum()
    }

    /// Lamports moved to the fee payer, signature reimbursement included.
    pub fn fee_lamports(&self) -> u64 {
        protocol_fee(self.total_lamports(), self.fee_bps) + signature_fees(RELAYED_SIGNATURES)
    }

    pub fn network_fee_lamports(&self) -> u64 {
        LIGHT_NETWORK_FEE_LAMPORTS
    }

    pub fn recipient_lamports(&self) -> Result<u64> {
        let total = self.total_lamports();
        let costs = self.fee_lamports() + self.network_fee_lamports();
        match total.checked_sub(costs) {
            Some(remainder) if remainder > 0 => Ok(remainder),
            _ => Err(SdkError::InsufficientBalance(format!(
                "{} SOL does not cover the {} SOL in fees",
                format_sol(total),
                format_sol(costs)
            ))),
        }
    }

    pub fn instructions(&self) -> Result<Vec<Instruction>> {
        let remainder = self.recipient_lamports()?;

        let decompress = compression::decompress(DecompressParams {
            fee_payer: self.note,
            authority: self.note,
            recipient: self.note,
            lamports: self.total_lamports(),
            inputs: &self.inputs,
            proof: &self.proof,
            output_tree: self.output_tree,
        })?;

        Ok(vec![
            compute_unit_limit(DEFAULT_COMPUTE_UNIT_LIMIT),
            decompress,
            system_instruction::transfer(&self.note, &self.fee_payer, self.fee_lamports()),
            system_instruction::transfer(&self.note, &self.recipient, remainder),
        ])
    }
}
