//! Rebuilds client-submitted withdrawal instructions into a v0 transaction
//! signed by the fee payer alone.
use mystify_sdk::{
    api::WithdrawRequest,
    instruction::deserialize_instructions,
    programs::{parse_instruction, ComputeBudgetOp, ParsedInstruction},
    transaction::{compile_v0, encode_transaction, partially_sign},
    withdrawal::signature_fees,
    InstructionValidator,
};
use solana_sdk::{hash::Hash, instruction::Instruction, pubkey::Pubkey, signer::Signer};
use std::str::FromStr;
use tracing::info;

use crate::config::RelayerConfig;
use crate::error::{RelayerError, Result};
use crate::keys::load_fee_payer;

/// Runtime default when no compute unit limit is requested.
const MAX_COMPUTE_UNIT_LIMIT: u32 = 1_400_000;

#[derive(Debug, PartialEq, Eq)]
pub enum Assembled {
    /// The caller only asked who pays fees
    FeePayer(Pubkey),
    /// Base-58 bincode transaction, fee payer signature filled in
    Transaction(String),
}

pub fn assemble(config: &RelayerConfig, request: &WithdrawRequest) -> Result<Assembled> {
    let fee_payer = load_fee_payer(config.fee_payer_secret.as_deref())?;
    if request.get_proxy_wallet_only {
        return Ok(Assembled::FeePayer(fee_payer.pubkey()));
    }

    let note_public_key = request
        .note_public_key
        .as_deref()
        .map(|key| {
            Pubkey::from_str(key.trim())
                .map_err(|e| RelayerError::InvalidRequest(format!("invalid note public key: {}", e)))
        })
        .transpose()?;

    let instructions = deserialize_instructions(&request.instructions)
        .map_err(|e| RelayerError::TransactionBuildError(e.to_string()))?;
    if instructions.is_empty() {
        return Err(RelayerError::InvalidRequest("no instructions".into()));
    }

    let validator = InstructionValidator::new(config.validator_config(fee_payer.pubkey()));
    validator.validate(&instructions, note_public_key.as_ref())?;

    let blockhash = request
        .blockhash
        .as_deref()
        .ok_or_else(|| RelayerError::TransactionBuildError("missing blockhash".into()))
        .and_then(|b| {
            Hash::from_str(b.trim())
                .map_err(|e| RelayerError::TransactionBuildError(format!("invalid blockhash: {}", e)))
        })?;

    let mut tx = compile_v0(&fee_payer.pubkey(), &instructions, blockhash)?;
    let cost = signature_fees(tx.message.header().num_required_signatures as u64)
        + priority_fee(&instructions);
    let reimbursed = reimbursement(&instructions, &fee_payer.pubkey());
    if reimbursed < cost {
        return Err(RelayerError::InvalidRequest(format!(
            "transaction pays the fee payer {} lamports but costs it {}",
            reimbursed, cost
        )));
    }

    partially_sign(&mut tx, &fee_payer)?;
    let encoded = encode_transaction(&tx)?;

    info!(
        "Signed withdrawal with {} instructions as fee payer {}",
        instructions.len(),
        fee_payer.pubkey()
    );
    Ok(Assembled::Transaction(encoded))
}

/// Lamports system transfers send to the fee payer.
fn reimbursement(instructions: &[Instruction], fee_payer: &Pubkey) -> u64 {
    instructions
        .iter()
        .filter_map(|ix| match parse_instruction(ix) {
            Ok(ParsedInstruction::SystemTransfer(t)) if t.destination == *fee_payer => {
                Some(t.amount)
            }
            _ => None,
        })
        .fold(0, u64::saturating_add)
}

/// Priority fee in lamports, rounded up as the runtime does.
fn priority_fee(instructions: &[Instruction]) -> u64 {
    let mut price = 0u64;
    let mut limit = MAX_COMPUTE_UNIT_LIMIT;
    for ix in instructions {
        match parse_instruction(ix) {
            Ok(ParsedInstruction::ComputeBudget(ComputeBudgetOp::SetComputeUnitPrice(p))) => {
                price = p
            }
            Ok(ParsedInstruction::ComputeBudget(ComputeBudgetOp::SetComputeUnitLimit(l))) => {
                limit = l.min(MAX_COMPUTE_UNIT_LIMIT)
            }
            _ => {}
        }
    }
    let micro_lamports = price as u128 * limit as u128;
    u64::try_from(micro_lamports.div_ceil(1_000_000)).unwrap_or(u64::MAX)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use mystify_sdk::{
        compression::{
            self, CompressParams, CompressedAccount, CompressedAccountWithContext,
            CompressedProof, StateTreeInfo, ValidityProof,
        },
        instruction::serialize_instructions,
        programs::compute_unit_limit,
        transaction::{decode_transaction, is_fully_signed},
        withdrawal::{DEFAULT_FEE_BPS, RELAYED_SIGNATURES},
        ValidationError, WithdrawalPlan,
    };
    use solana_sdk::{
        compute_budget::ComputeBudgetInstruction,
        signature::{Keypair, Signature},
        system_instruction,
    };

    pub(crate) fn config_with(fee_payer: &Keypair) -> RelayerConfig {
        let mut config = RelayerConfig::from_lookup(|_| None).unwrap();
        config.fee_payer_secret = Some(fee_payer.to_base58_string());
        config
    }

    /// What a two-signer relayed transaction owes the fee payer.
    pub(crate) fn reimburse(note: &Pubkey, fee_payer: &Pubkey) -> Instruction {
        system_instruction::transfer(note, fee_payer, signature_fees(RELAYED_SIGNATURES))
    }

    pub(crate) fn request(instructions: &[Instruction], note: &Pubkey) -> WithdrawRequest {
        WithdrawRequest {
            instructions: serialize_instructions(instructions),
            blockhash: Some(Hash::new_unique().to_string()),
            note_public_key: Some(note.to_string()),
            get_proxy_wallet_only: false,
        }
    }

    #[test]
    fn test_short_circuit_returns_fee_payer() {
        let fee_payer = Keypair::new();
        let request = WithdrawRequest {
            get_proxy_wallet_only: true,
            ..Default::default()
        };
        assert_eq!(
            assemble(&config_with(&fee_payer), &request).unwrap(),
            Assembled::FeePayer(fee_payer.pubkey())
        );
    }

    #[test]
    fn test_missing_secret() {
        let config = RelayerConfig::from_lookup(|_| None).unwrap();
        let request = WithdrawRequest {
            get_proxy_wallet_only: true,
            ..Default::default()
        };
        assert!(matches!(
            assemble(&config, &request),
            Err(RelayerError::ConfigurationMissing)
        ));
    }

    #[test]
    fn test_signs_note_withdrawal_as_fee_payer_only() {
        let fee_payer = Keypair::new();
        let note = Keypair::new();
        let recipient = Pubkey::new_unique();
        let ixs = vec![
            compute_unit_limit(1_000_000),
            reimburse(&note.pubkey(), &fee_payer.pubkey()),
            system_instruction::transfer(&note.pubkey(), &recipient, 1_000_000),
        ];

        let assembled = assemble(&config_with(&fee_payer), &request(&ixs, &note.pubkey())).unwrap();
        let Assembled::Transaction(encoded) = assembled else {
            panic!("expected a transaction");
        };

        let mut tx = decode_transaction(&encoded).unwrap();
        let keys = tx.message.static_account_keys().to_vec();
        assert_eq!(keys[0], fee_payer.pubkey());
        assert_eq!(keys[1], note.pubkey());
        assert_ne!(tx.signatures[0], Signature::default());
        assert_eq!(tx.signatures[1], Signature::default());
        assert!(tx.verify_with_results()[0]);

        partially_sign(&mut tx, &note).unwrap();
        assert!(is_fully_signed(&tx));
    }

    #[test]
    fn test_rejects_fee_payer_drain_before_signing() {
        let fee_payer = Keypair::new();
        let ixs = vec![
            compute_unit_limit(1_000_000),
            system_instruction::transfer(&fee_payer.pubkey(), &Pubkey::new_unique(), 1),
        ];
        let result = assemble(
            &config_with(&fee_payer),
            &request(&ixs, &Pubkey::new_unique()),
        );
        assert!(matches!(
            result,
            Err(RelayerError::ValidationFailed(ValidationError::FeePayerMisuse { index: 1, .. }))
        ));
    }

    #[test]
    fn test_rejects_bad_note_key() {
        let fee_payer = Keypair::new();
        let mut request = request(&[compute_unit_limit(1)], &Pubkey::new_unique());
        request.note_public_key = Some("bogus".into());
        assert!(matches!(
            assemble(&config_with(&fee_payer), &request),
            Err(RelayerError::InvalidRequest(_))
        ));
    }

    #[test]
    fn test_rejects_bad_blockhash() {
        let fee_payer = Keypair::new();
        let mut request = request(&[compute_unit_limit(1)], &Pubkey::new_unique());
        request.blockhash = Some("not-a-hash".into());
        assert!(matches!(
            assemble(&config_with(&fee_payer), &request),
            Err(RelayerError::TransactionBuildError(_))
        ));
    }

    #[test]
    fn test_rejects_compress_from_fee_payer_slot() {
        let fee_payer = Keypair::new();
        let attacker = Pubkey::new_unique();
        let drain = compression::compress(CompressParams {
            fee_payer: fee_payer.pubkey(),
            authority: attacker,
            owner: attacker,
            lamports: 50_000_000_000,
            output_tree: StateTreeInfo::default(),
        })
        .unwrap();
        let ixs = vec![
            compute_unit_limit(1_000_000),
            drain,
            reimburse(&attacker, &fee_payer.pubkey()),
        ];
        assert!(matches!(
            assemble(&config_with(&fee_payer), &request(&ixs, &attacker)),
            Err(RelayerError::ValidationFailed(ValidationError::FeePayerMisuse { index: 1, .. }))
        ));
    }

    #[test]
    fn test_rejects_unpaid_signature() {
        let fee_payer = Keypair::new();
        let note = Pubkey::new_unique();
        let ixs = vec![compute_unit_limit(1_000_000)];
        assert!(matches!(
            assemble(&config_with(&fee_payer), &request(&ixs, &note)),
            Err(RelayerError::InvalidRequest(_))
        ));
    }

    #[test]
    fn test_priority_fee_must_be_reimbursed() {
        let fee_payer = Keypair::new();
        let note = Pubkey::new_unique();
        // 1_000_000 units at 10_000 micro-lamports = 10_000 lamports
        let mut ixs = vec![
            compute_unit_limit(1_000_000),
            ComputeBudgetInstruction::set_compute_unit_price(10_000),
            reimburse(&note, &fee_payer.pubkey()),
        ];
        assert_eq!(priority_fee(&ixs), 10_000);
        assert!(matches!(
            assemble(&config_with(&fee_payer), &request(&ixs, &note)),
            Err(RelayerError::InvalidRequest(_))
        ));

        ixs.push(system_instruction::transfer(&note, &fee_payer.pubkey(), 10_000));
        assert!(assemble(&config_with(&fee_payer), &request(&ixs, &note)).is_ok());
    }

    #[test]
    fn test_priority_fee_defaults_to_max_limit() {
        let ixs = vec![ComputeBudgetInstruction::set_compute_unit_price(1)];
        // 1_400_000 micro-lamports round up to 2 lamports
        assert_eq!(priority_fee(&ixs), 2);
        assert_eq!(priority_fee(&[]), 0);
    }

    #[test]
    fn test_signs_planned_withdrawal() {
        let fee_payer = Keypair::new();
        let note = Keypair::new();
        let plan = WithdrawalPlan {
            note: note.pubkey(),
            fee_payer: fee_payer.pubkey(),
            recipient: Pubkey::new_unique(),
            inputs: vec![CompressedAccountWithContext {
                hash: [1; 32],
                account: CompressedAccount {
                    owner: note.pubkey().to_bytes(),
                    lamports: 1_000_000_000,
                    address: None,
                    data: None,
                },
                tree: StateTreeInfo::default(),
                leaf_index: 0,
            }],
            proof: ValidityProof {
                compressed_proof: CompressedProof::default(),
                root_indices: vec![0],
            },
            output_tree: StateTreeInfo::default(),
            fee_bps: DEFAULT_FEE_BPS,
        };
        let ixs = plan.instructions().unwrap();
        let assembled = assemble(&config_with(&fee_payer), &request(&ixs, &note.pubkey())).unwrap();
        assert!(matches!(assembled, Assembled::Transaction(_)));
    }
}
