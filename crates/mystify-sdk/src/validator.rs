//! Allow-list validation of withdrawal instructions before the relayer's fee
//! payer signs them.
//!
//! The Solana runtime grants signer status per message, not per instruction.
//! Once the fee payer signs, every instruction that names its address can act
//! on its behalf, so the rules below treat any reference to the fee payer
//! outside a few known-safe positions as an attempt to spend its funds.
use solana_sdk::{instruction::Instruction, pubkey::Pubkey};
use std::collections::BTreeSet;
use thiserror::Error;
use tracing::{debug, warn};

use crate::compression::{is_fee_payer_slot, ParsedInvoke};
use crate::programs::{
    parse_instruction, AssetTransfer, ComputeBudgetOp, ParsedInstruction, DEFAULT_ALLOWED_PROGRAMS,
};

/// Priority fee ceiling in micro-lamports per compute unit.
pub const DEFAULT_MAX_COMPUTE_UNIT_PRICE: u64 = 10_000;

/// Output accounts an invoke may create while the fee payer funds it. Light
/// charges rollover fees per output to the invoke's fee-payer slot.
pub const MAX_SPONSORED_OUTPUTS: usize = 1;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("instruction {index}: unauthorized program {program_id}")]
    UnauthorizedProgram { index: usize, program_id: Pubkey },

    #[error("instruction {index}: unauthorized source {account}, expected note account {expected}")]
    UnauthorizedSource {
        index: usize,
        account: Pubkey,
        expected: Pubkey,
    },

    #[error("instruction {index}: fee payer misuse: {reason}")]
    FeePayerMisuse { index: usize, reason: String },

    #[error("instruction {index}: malformed instruction: {reason}")]
    MalformedInstruction { index: usize, reason: String },
}

impl ValidationError {
    pub fn index(&self) -> usize {
        match self {
            ValidationError::UnauthorizedProgram { index, .. }
            | ValidationError::UnauthorizedSource { index, .. }
            | ValidationError::FeePayerMisuse { index, .. }
            | ValidationError::MalformedInstruction { index, .. } => *index,
        }
    }
}

#[derive(Clone, Debug)]
pub struct ValidatorConfig {
    fee_payer: Pubkey,
    extra_programs: BTreeSet<Pubkey>,
    max_compute_unit_price: u64,
    sponsored_invokes: bool,
}

impl ValidatorConfig {
    pub fn new(fee_payer: Pubkey) -> Self {
        Self {
            fee_payer,
            extra_programs: BTreeSet::new(),
            max_compute_unit_price: DEFAULT_MAX_COMPUTE_UNIT_PRICE,
            sponsored_invokes: false,
        }
    }

    /// Adds programs on top of the defaults. The defaults cannot be removed.
    pub fn with_extra_programs(mut self, programs: impl IntoIterator<Item = Pubkey>) -> Self {
        self.extra_programs.extend(
            programs
                .into_iter()
                .filter(|p| !DEFAULT_ALLOWED_PROGRAMS.contains(p)),
        );
        self
    }

    pub fn with_max_compute_unit_price(mut self, micro_lamports: u64) -> Self {
        self.max_compute_unit_price = micro_lamports;
        self
    }

    /// Lets the fee payer occupy the invoke fee-payer slot of a plain
    /// decompression. Only for transactions the relayer builds itself.
    pub fn with_sponsored_invokes(mut self) -> Self {
        self.sponsored_invokes = true;
        self
    }

    pub fn sponsored_invokes(&self) -> bool {
        self.sponsored_invokes
    }

    pub fn fee_payer(&self) -> Pubkey {
        self.fee_payer
    }

    pub fn max_compute_unit_price(&self) -> u64 {
        self.max_compute_unit_price
    }

    pub fn is_allowed(&self, program_id: &Pubkey) -> bool {
        DEFAULT_ALLOWED_PROGRAMS.contains(program_id) || self.extra_programs.contains(program_id)
    }

    pub fn allowed_programs(&self) -> Vec<Pubkey> {
        DEFAULT_ALLOWED_PROGRAMS
            .iter()
            .chain(self.extra_programs.iter())
            .copied()
            .collect()
    }
}

#[derive(Clone, Debug)]
pub struct InstructionValidator {
    config: ValidatorConfig,
}

impl InstructionValidator {
    pub fn new(config: ValidatorConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ValidatorConfig {
        &self.config
    }

    /// Checks every instruction in order and stops at the first violation.
    ///
    /// For each instruction the program allow-list is checked first, then the
    /// fee-payer rules, then (when `note_public_key` is known) that funds only
    /// leave the note account.
    pub fn validate(
        &self,
        instructions: &[Instruction],
        note_public_key: Option<&Pubkey>,
    ) -> Result<(), ValidationError> {
        for (index, ix) in instructions.iter().enumerate() {
            if let Err(e) = self.validate_one(index, ix, note_public_key) {
                warn!("Rejected withdrawal transaction: {}", e);
                return Err(e);
            }
        }
        debug!("Validated {} instructions", instructions.len());
        Ok(())
    }

    fn validate_one(
        &self,
        index: usize,
        ix: &Instruction,
        note_public_key: Option<&Pubkey>,
    ) -> Result<(), ValidationError> {
        if !self.config.is_allowed(&ix.program_id) {
            return Err(ValidationError::UnauthorizedProgram {
                index,
                program_id: ix.program_id,
            });
        }

        let parsed = parse_instruction(ix).map_err(|e| ValidationError::MalformedInstruction {
            index,
            reason: e.0,
        })?;

        self.check_fee_payer(index, ix, &parsed)?;

        if let Some(note) = note_public_key {
            check_note_source(index, &parsed, note)?;
        }
        Ok(())
    }

    fn check_fee_payer(
        &self,
        index: usize,
        ix: &Instruction,
        parsed: &ParsedInstruction,
    ) -> Result<(), ValidationError> {
        let fee_payer = self.config.fee_payer;
        let misuse = |reason: String| Err(ValidationError::FeePayerMisuse { index, reason });

        match parsed {
            ParsedInstruction::ComputeBudget(ComputeBudgetOp::SetComputeUnitPrice(price))
                if *price > self.config.max_compute_unit_price =>
            {
                misuse(format!(
                    "compute unit price {} exceeds {} micro-lamports",
                    price, self.config.max_compute_unit_price
                ))
            }
            ParsedInstruction::ComputeBudget(_) => Ok(()),
            ParsedInstruction::SystemTransfer(transfer)
            | ParsedInstruction::TokenTransfer(transfer) => {
                check_transfer(transfer, ix, &fee_payer).or_else(misuse)
            }
            ParsedInstruction::System { accounts }
            | ParsedInstruction::Token { accounts }
            | ParsedInstruction::Opaque { accounts, .. } => {
                if accounts.contains(&fee_payer) {
                    misuse(format!("fee payer referenced by {}", ix.program_id))
                } else {
                    Ok(())
                }
            }
            ParsedInstruction::CompressedInvoke(invoke) => {
                check_invoke(invoke, ix, &fee_payer, self.config.sponsored_invokes).or_else(misuse)
            }
        }
    }
}

fn check_transfer(
    transfer: &AssetTransfer,
    ix: &Instruction,
    fee_payer: &Pubkey,
) -> Result<(), String> {
    if transfer.source == *fee_payer {
        return Err("fee payer is the transfer source".into());
    }
    if transfer.authorities.contains(fee_payer) {
        return Err("fee payer authorizes the transfer".into());
    }
    // Receiving funds is the only role left for it
    if transfer.destination != *fee_payer && ix.accounts.iter().any(|m| m.pubkey == *fee_payer) {
        return Err("fee payer referenced by transfer".into());
    }
    Ok(())
}

fn check_invoke(
    invoke: &ParsedInvoke,
    ix: &Instruction,
    fee_payer: &Pubkey,
    sponsored: bool,
) -> Result<(), String> {
    if invoke.authority == *fee_payer {
        return Err("fee payer owns the spent compressed accounts".into());
    }
    if invoke.fee_payer == *fee_payer {
        check_sponsored_invoke(invoke, sponsored)?;
    }
    let stray = ix
        .accounts
        .iter()
        .enumerate()
        .find(|(position, meta)| meta.pubkey == *fee_payer && !is_fee_payer_slot(*position));
    match stray {
        Some((position, _)) => Err(format!("fee payer in invoke account slot {}", position)),
        None => Ok(()),
    }
}

/// Light debits compression, network, address and rollover fees from the
/// invoke's fee-payer slot.
fn check_sponsored_invoke(invoke: &ParsedInvoke, sponsored: bool) -> Result<(), String> {
    let data = &invoke.data;
    if !sponsored {
        return Err("fee payer in the invoke fee-payer slot".into());
    }
    if data.is_compress {
        return Err("fee payer would fund a compression".into());
    }
    if !data.new_address_params.is_empty() {
        return Err("fee payer would pay for new addresses".into());
    }
    if data.output_compressed_accounts.len() > MAX_SPONSORED_OUTPUTS {
        return Err(format!(
            "fee payer would fund {} output accounts",
            data.output_compressed_accounts.len()
        ));
    }
    if data.relay_fee.is_some() {
        return Err("relay fee charged to the fee payer".into());
    }
    Ok(())
}

fn check_note_source(
    index: usize,
    parsed: &ParsedInstruction,
    note: &Pubkey,
) -> Result<(), ValidationError> {
    let account = match parsed {
        ParsedInstruction::SystemTransfer(transfer) => transfer.source,
        ParsedInstruction::CompressedInvoke(invoke) => invoke.authority,
        _ => return Ok(()),
    };
    if account != *note {
        return Err(ValidationError::UnauthorizedSource {
            index,
            account,
            expected: *note,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compression::{
        self, encode_invoke_data, parse_invoke,
        tests::{proof_for, sol_account},
        CompressParams, DecompressParams, InstructionDataInvoke, NewAddressParamsPacked,
        OutputCompressedAccountWithPackedContext, StateTreeInfo,
    };
    use crate::programs::{compute_unit_limit, SPL_TOKEN_PROGRAM_ID};
    use solana_sdk::{
        compute_budget::ComputeBudgetInstruction, instruction::AccountMeta, system_instruction,
    };

    struct Fixture {
        fee_payer: Pubkey,
        note: Pubkey,
        recipient: Pubkey,
        validator: InstructionValidator,
    }

    fn sponsored(f: &Fixture) -> InstructionValidator {
        InstructionValidator::new(ValidatorConfig::new(f.fee_payer).with_sponsored_invokes())
    }

    fn rewrite_invoke(ix: &mut Instruction, edit: impl FnOnce(&mut InstructionDataInvoke)) {
        let mut data = parse_invoke(ix).unwrap().data;
        edit(&mut data);
        ix.data = encode_invoke_data(&data).unwrap();
    }

    fn fixture() -> Fixture {
        let fee_payer = Pubkey::new_unique();
        Fixture {
            fee_payer,
            note: Pubkey::new_unique(),
            recipient: Pubkey::new_unique(),
            validator: InstructionValidator::new(ValidatorConfig::new(fee_payer)),
        }
    }

    /// Decompression paid for by the note itself, as relayed withdrawals do.
    fn decompress_ix(f: &Fixture, authority: Pubkey, recipient: Pubkey) -> Instruction {
        decompress_paid_by(f.note, authority, recipient)
    }

    fn decompress_paid_by(payer: Pubkey, authority: Pubkey, recipient: Pubkey) -> Instruction {
        let inputs = vec![sol_account(&authority, 1_000_000_000, 0)];
        let proof = proof_for(1);
        compression::decompress(DecompressParams {
            fee_payer: payer,
            authority,
            recipient,
            lamports: 1_000_000_000,
            inputs: &inputs,
            proof: &proof,
            output_tree: StateTreeInfo::default(),
        })
        .unwrap()
    }

    #[test]
    fn test_rejects_unlisted_program() {
        let f = fixture();
        let rogue = Instruction {
            program_id: Pubkey::new_unique(),
            accounts: vec![],
            data: vec![],
        };
        let err = f
            .validator
            .validate(&[compute_unit_limit(1_000_000), rogue.clone()], None)
            .unwrap_err();
        assert_eq!(
            err,
            ValidationError::UnauthorizedProgram {
                index: 1,
                program_id: rogue.program_id
            }
        );
    }

    #[test]
    fn test_allow_list_runs_before_fee_payer_check() {
        let f = fixture();
        let rogue = Instruction {
            program_id: Pubkey::new_unique(),
            accounts: vec![AccountMeta::new(f.fee_payer, true)],
            data: vec![],
        };
        let err = f.validator.validate(&[rogue], Some(&f.note)).unwrap_err();
        assert!(matches!(err, ValidationError::UnauthorizedProgram { .. }));
    }

    #[test]
    fn test_fee_payer_source_rejected_without_note() {
        let f = fixture();
        let drain = system_instruction::transfer(&f.fee_payer, &f.recipient, 1);
        let err = f
            .validator
            .validate(&[compute_unit_limit(1_000_000), drain], None)
            .unwrap_err();
        assert!(matches!(err, ValidationError::FeePayerMisuse { index: 1, .. }));
    }

    #[test]
    fn test_fee_payer_check_precedes_note_check() {
        let f = fixture();
        let drain = system_instruction::transfer(&f.fee_payer, &f.recipient, 1);
        let err = f.validator.validate(&[drain], Some(&f.note)).unwrap_err();
        assert!(matches!(err, ValidationError::FeePayerMisuse { .. }));
    }

    #[test]
    fn test_note_to_recipient_accepted() {
        let f = fixture();
        let ixs = vec![
            compute_unit_limit(1_000_000),
            system_instruction::transfer(&f.note, &f.recipient, 1_000),
        ];
        assert!(f.validator.validate(&ixs, Some(&f.note)).is_ok());
    }

    #[test]
    fn test_fee_payer_may_receive() {
        let f = fixture();
        let fee = system_instruction::transfer(&f.note, &f.fee_payer, 15_000);
        assert!(f.validator.validate(&[fee], Some(&f.note)).is_ok());
    }

    #[test]
    fn test_foreign_source_rejected_with_note() {
        let f = fixture();
        let stranger = Pubkey::new_unique();
        let ix = system_instruction::transfer(&stranger, &f.recipient, 1);
        assert_eq!(
            f.validator.validate(&[ix], Some(&f.note)).unwrap_err(),
            ValidationError::UnauthorizedSource {
                index: 0,
                account: stranger,
                expected: f.note
            }
        );
    }

    #[test]
    fn test_foreign_source_allowed_without_note() {
        let f = fixture();
        let ix = system_instruction::transfer(&Pubkey::new_unique(), &f.recipient, 1);
        assert!(f.validator.validate(&[ix], None).is_ok());
    }

    #[test]
    fn test_fee_payer_in_other_system_instruction() {
        let f = fixture();
        let assign = system_instruction::assign(&f.fee_payer, &Pubkey::new_unique());
        assert!(matches!(
            f.validator.validate(&[assign], None),
            Err(ValidationError::FeePayerMisuse { .. })
        ));
    }

    #[test]
    fn test_fee_payer_as_seed_base() {
        let f = fixture();
        let derived = Pubkey::new_unique();
        let ix = system_instruction::transfer_with_seed(
            &derived,
            &f.fee_payer,
            "drain".into(),
            &solana_sdk::system_program::id(),
            &f.recipient,
            1,
        );
        assert!(matches!(
            f.validator.validate(&[ix], None),
            Err(ValidationError::FeePayerMisuse { .. })
        ));
    }

    #[test]
    fn test_priority_fee_ceiling() {
        let f = fixture();
        let ok = ComputeBudgetInstruction::set_compute_unit_price(DEFAULT_MAX_COMPUTE_UNIT_PRICE);
        assert!(f.validator.validate(&[ok], None).is_ok());

        let greedy =
            ComputeBudgetInstruction::set_compute_unit_price(DEFAULT_MAX_COMPUTE_UNIT_PRICE + 1);
        assert!(matches!(
            f.validator.validate(&[greedy], None),
            Err(ValidationError::FeePayerMisuse { .. })
        ));
    }

    #[test]
    fn test_malformed_system_data() {
        let f = fixture();
        let ix = Instruction {
            program_id: solana_sdk::system_program::id(),
            accounts: vec![],
            data: vec![0xde, 0xad],
        };
        assert!(matches!(
            f.validator.validate(&[ix], None),
            Err(ValidationError::MalformedInstruction { index: 0, .. })
        ));
    }

    #[test]
    fn test_decompress_to_note_accepted() {
        let f = fixture();
        let ixs = vec![
            compute_unit_limit(1_000_000),
            decompress_ix(&f, f.note, f.note),
        ];
        assert!(f.validator.validate(&ixs, Some(&f.note)).is_ok());
    }

    #[test]
    fn test_decompress_to_fee_payer_accepted() {
        let f = fixture();
        let ix = decompress_ix(&f, f.note, f.fee_payer);
        assert!(f.validator.validate(&[ix], Some(&f.note)).is_ok());
    }

    #[test]
    fn test_decompress_by_fee_payer_rejected() {
        let f = fixture();
        let ix = decompress_ix(&f, f.fee_payer, f.recipient);
        assert!(matches!(
            f.validator.validate(&[ix], None),
            Err(ValidationError::FeePayerMisuse { .. })
        ));
    }

    #[test]
    fn test_decompress_of_other_owner_rejected_with_note() {
        let f = fixture();
        let stranger = Pubkey::new_unique();
        let ix = decompress_ix(&f, stranger, f.recipient);
        assert!(matches!(
            f.validator.validate(&[ix], Some(&f.note)),
            Err(ValidationError::UnauthorizedSource { .. })
        ));
    }

    #[test]
    fn test_fee_payer_smuggled_into_tree_accounts() {
        let f = fixture();
        let mut ix = decompress_ix(&f, f.note, f.recipient);
        ix.accounts.push(AccountMeta::new(f.fee_payer, false));
        assert!(matches!(
            f.validator.validate(&[ix], Some(&f.note)),
            Err(ValidationError::FeePayerMisuse { .. })
        ));
    }

    #[test]
    fn test_token_program_needs_operator_opt_in() {
        let f = fixture();
        let mut data = vec![3u8];
        data.extend_from_slice(&5u64.to_le_bytes());
        let ix = Instruction {
            program_id: SPL_TOKEN_PROGRAM_ID,
            accounts: vec![
                AccountMeta::new(Pubkey::new_unique(), false),
                AccountMeta::new(f.recipient, false),
                AccountMeta::new_readonly(f.fee_payer, true),
            ],
            data,
        };
        assert!(matches!(
            f.validator.validate(&[ix.clone()], None),
            Err(ValidationError::UnauthorizedProgram { .. })
        ));

        let permissive = InstructionValidator::new(
            ValidatorConfig::new(f.fee_payer).with_extra_programs([SPL_TOKEN_PROGRAM_ID]),
        );
        assert!(matches!(
            permissive.validate(&[ix], None),
            Err(ValidationError::FeePayerMisuse { .. })
        ));
    }

    #[test]
    fn test_extra_programs_never_shrink_defaults() {
        let config = ValidatorConfig::new(Pubkey::new_unique())
            .with_extra_programs([DEFAULT_ALLOWED_PROGRAMS[0], SPL_TOKEN_PROGRAM_ID]);
        let allowed = config.allowed_programs();
        assert_eq!(allowed.len(), DEFAULT_ALLOWED_PROGRAMS.len() + 1);
        assert!(DEFAULT_ALLOWED_PROGRAMS.iter().all(|p| config.is_allowed(p)));
    }

    #[test]
    fn test_compress_from_fee_payer_slot_rejected() {
        let f = fixture();
        let attacker = Pubkey::new_unique();
        let drain = compression::compress(CompressParams {
            fee_payer: f.fee_payer,
            authority: attacker,
            owner: attacker,
            lamports: 50_000_000_000,
            output_tree: StateTreeInfo::default(),
        })
        .unwrap();

        for validator in [&f.validator, &sponsored(&f)] {
            let err = validator
                .validate(&[compute_unit_limit(1_000_000), drain.clone()], Some(&attacker))
                .unwrap_err();
            assert!(matches!(err, ValidationError::FeePayerMisuse { index: 1, .. }));
        }
    }

    #[test]
    fn test_fee_payer_cannot_pay_for_client_invoke() {
        let f = fixture();
        let ix = decompress_paid_by(f.fee_payer, f.note, f.recipient);
        assert!(matches!(
            f.validator.validate(&[ix], Some(&f.note)),
            Err(ValidationError::FeePayerMisuse { index: 0, .. })
        ));
    }

    #[test]
    fn test_sponsored_decompress_accepted() {
        let f = fixture();
        let ix = decompress_paid_by(f.fee_payer, f.note, f.recipient);
        assert!(sponsored(&f).validate(&[ix], Some(&f.note)).is_ok());
    }

    #[test]
    fn test_sponsored_invoke_with_new_addresses_rejected() {
        let f = fixture();
        let mut ix = decompress_paid_by(f.fee_payer, f.note, f.recipient);
        rewrite_invoke(&mut ix, |data| {
            data.new_address_params.push(NewAddressParamsPacked {
                seed: [7; 32],
                address_queue_account_index: 0,
                address_merkle_tree_account_index: 0,
                address_merkle_tree_root_index: 0,
            })
        });
        assert!(matches!(
            sponsored(&f).validate(&[ix], Some(&f.note)),
            Err(ValidationError::FeePayerMisuse { .. })
        ));
    }

    #[test]
    fn test_sponsored_invoke_output_count_bounded() {
        let f = fixture();
        let mut ix = decompress_paid_by(f.fee_payer, f.note, f.recipient);
        rewrite_invoke(&mut ix, |data| {
            let extra: Vec<OutputCompressedAccountWithPackedContext> =
                std::iter::repeat(data.output_compressed_accounts[0].clone())
                    .take(MAX_SPONSORED_OUTPUTS)
                    .collect();
            data.output_compressed_accounts.extend(extra);
        });
        assert!(matches!(
            sponsored(&f).validate(&[ix], Some(&f.note)),
            Err(ValidationError::FeePayerMisuse { .. })
        ));
    }

    #[test]
    fn test_sponsored_invoke_relay_fee_rejected() {
        let f = fixture();
        let mut ix = decompress_paid_by(f.fee_payer, f.note, f.recipient);
        rewrite_invoke(&mut ix, |data| data.relay_fee = Some(1));
        assert!(matches!(
            sponsored(&f).validate(&[ix], Some(&f.note)),
            Err(ValidationError::FeePayerMisuse { .. })
        ));
    }
}
