//! Light system program `invoke` instructions for compressing SOL into a note
//! account and decompressing it back out.
//!
//! The wire types below mirror the borsh layout of the Light system program's
//! `InstructionDataInvoke`. Pubkeys are carried as raw `[u8; 32]` so the
//! layout does not depend on the borsh version solana-sdk was built with.
use borsh::{BorshDeserialize, BorshSerialize};
use sha2::{Digest, Sha256};
use solana_sdk::{
    instruction::{AccountMeta, Instruction},
    pubkey,
    pubkey::Pubkey,
    system_program,
};
use std::collections::HashMap;

use crate::error::{Result, SdkError};
use crate::programs::{ACCOUNT_COMPRESSION_PROGRAM_ID, LIGHT_SYSTEM_PROGRAM_ID, NOOP_PROGRAM_ID};

pub const REGISTERED_PROGRAM_PDA: Pubkey = pubkey!("35hkDgaAKwMCaxRz2ocSZ6NaUrtKkyNqU6c4RV3tYJRh");
pub const SOL_POOL_PDA_SEED: &[u8] = b"sol_pool_pda";
pub const CPI_AUTHORITY_PDA_SEED: &[u8] = b"cpi_authority";

/// Number of fixed accounts in front of the packed tree accounts.
pub const INVOKE_FIXED_ACCOUNTS: usize = 9;
const FEE_PAYER_SLOT: usize = 0;
const AUTHORITY_SLOT: usize = 1;
const DECOMPRESSION_RECIPIENT_SLOT: usize = 7;

/// Legacy V1 state trees and their nullifier queues.
pub const STATE_TREES: [(Pubkey, Pubkey); 5] = [
    (
        pubkey!("smt1NamzXdq4AMqS2fS2F1i5KTYPZRhoHgWx38d8WsT"),
        pubkey!("nfq1NvQDJ2GEgnS8zt9prAe8rjjpAW1zFkrvZoBR148"),
    ),
    (
        pubkey!("smt2rJAFdyJJupwMKAqTNAJwvjhmiZ4JYGZmbVRw1Ho"),
        pubkey!("nfq2hgS7NYemXsFaFUCe3EMXSDSfnZnAe27jC6aPP1X"),
    ),
    (
        pubkey!("smt3AFtReRGVcrP11D6bSLEaKdUmrGfaTNowMVccJeu"),
        pubkey!("nfq3de4qt9d3wHxXWy1wcge3EXhid25mCr12bNWFdtV"),
    ),
    (
        pubkey!("smt4vjXvdjDFzvRMUxwTWnSy4c7cKkMaHuPrGsdDH7V"),
        pubkey!("nfq4Ncp1vk3mFnCQ9cvwidp9k2L6fxEyCo2nerYD25A"),
    ),
    (
        pubkey!("smt5uPaQT9n6b1qAkgyonmzRxtuazA53Rddwntqistc"),
        pubkey!("nfq5b5xEguPtdD6uPetZduyrB5EUqad7gcUE46rALau"),
    ),
];

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StateTreeInfo {
    pub tree: Pubkey,
    pub queue: Pubkey,
}

impl Default for StateTreeInfo {
    fn default() -> Self {
        let (tree, queue) = STATE_TREES[0];
        Self { tree, queue }
    }
}

impl StateTreeInfo {
    /// Looks up the nullifier queue paired with a known state tree.
    pub fn for_tree(tree: &Pubkey) -> Option<Self> {
        STATE_TREES
            .iter()
            .find(|(t, _)| t == tree)
            .map(|(tree, queue)| Self {
                tree: *tree,
                queue: *queue,
            })
    }
}

#[derive(BorshSerialize, BorshDeserialize, Clone, Copy, Debug, PartialEq, Eq)]
pub struct CompressedProof {
    pub a: [u8; 32],
    pub b: [u8; 64],
    pub c: [u8; 32],
}

impl Default for CompressedProof {
    fn default() -> Self {
        Self {
            a: [0; 32],
            b: [0; 64],
            c: [0; 32],
        }
    }
}

#[derive(BorshSerialize, BorshDeserialize, Clone, Debug, PartialEq, Eq, Default)]
pub struct CompressedAccountData {
    pub discriminator: [u8; 8],
    pub data: Vec<u8>,
    pub data_hash: [u8; 32],
}

#[derive(BorshSerialize, BorshDeserialize, Clone, Debug, PartialEq, Eq, Default)]
pub struct CompressedAccount {
    pub owner: [u8; 32],
    pub lamports: u64,
    pub address: Option<[u8; 32]>,
    pub data: Option<CompressedAccountData>,
}

#[derive(BorshSerialize, BorshDeserialize, Clone, Copy, Debug, PartialEq, Eq, Default)]
pub struct PackedMerkleContext {
    pub merkle_tree_pubkey_index: u8,
    pub nullifier_queue_pubkey_index: u8,
    pub leaf_index: u32,
    pub prove_by_index: bool,
}

#[derive(BorshSerialize, BorshDeserialize, Clone, Debug, PartialEq, Eq, Default)]
pub struct PackedCompressedAccountWithMerkleContext {
    pub compressed_account: CompressedAccount,
    pub merkle_context: PackedMerkleContext,
    /// Index of root used in inclusion validity proof.
    pub root_index: u16,
    pub read_only: bool,
}

#[derive(BorshSerialize, BorshDeserialize, Clone, Debug, PartialEq, Eq, Default)]
pub struct OutputCompressedAccountWithPackedContext {
    pub compressed_account: CompressedAccount,
    pub merkle_tree_index: u8,
}

#[derive(BorshSerialize, BorshDeserialize, Clone, Copy, Debug, PartialEq, Eq, Default)]
pub struct NewAddressParamsPacked {
    pub seed: [u8; 32],
    pub address_queue_account_index: u8,
    pub address_merkle_tree_account_index: u8,
    pub address_merkle_tree_root_index: u16,
}

#[derive(BorshSerialize, BorshDeserialize, Clone, Debug, PartialEq, Eq, Default)]
pub struct InstructionDataInvoke {
    pub proof: Option<CompressedProof>,
    pub input_compressed_accounts_with_merkle_context:
        Vec<PackedCompressedAccountWithMerkleContext>,
    pub output_compressed_accounts: Vec<OutputCompressedAccountWithPackedContext>,
    pub relay_fee: Option<u64>,
    pub new_address_params: Vec<NewAddressParamsPacked>,
    pub compress_or_decompress_lamports: Option<u64>,
    pub is_compress: bool,
}

/// A compressed account as reported by the indexer, with where it lives.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CompressedAccountWithContext {
    pub hash: [u8; 32],
    pub account: CompressedAccount,
    pub tree: StateTreeInfo,
    pub leaf_index: u32,
}

impl CompressedAccountWithContext {
    pub fn lamports(&self) -> u64 {
        self.account.lamports
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ValidityProof {
    pub compressed_proof: CompressedProof,
    /// One root index per proven input, in request order
    pub root_indices: Vec<u16>,
}

pub struct DecompressParams<'a> {
    /// Pays rollover fees inside the Light system program
    pub fee_payer: Pubkey,
    /// Owner of the compressed accounts being spent
    pub authority: Pubkey,
    pub recipient: Pubkey,
    pub lamports: u64,
    pub inputs: &'a [CompressedAccountWithContext],
    pub proof: &'a ValidityProof,
    /// Tree receiving the change output
    pub output_tree: StateTreeInfo,
}

pub struct CompressParams {
    pub fee_payer: Pubkey,
    pub authority: Pubkey,
    /// Owner of the new compressed account
    pub owner: Pubkey,
    pub lamports: u64,
    pub output_tree: StateTreeInfo,
}

/// Decoded view of an `invoke` instruction.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ParsedInvoke {
    pub fee_payer: Pubkey,
    pub authority: Pubkey,
    pub decompression_recipient: Option<Pubkey>,
    pub data: InstructionDataInvoke,
}

impl ParsedInvoke {
    pub fn decompressed_lamports(&self) -> Option<u64> {
        if self.data.is_compress {
            None
        } else {
            self.data.compress_or_decompress_lamports
        }
    }
}

pub fn anchor_discriminator(name: &str) -> [u8; 8] {
    let preimage = format!("global:{}", name);
    let hash = Sha256::digest(preimage.as_bytes());
    let mut discriminator = [0u8; 8];
    discriminator.copy_from_slice(&hash[..8]);
    discriminator
}

pub fn invoke_discriminator() -> [u8; 8] {
    anchor_discriminator("invoke")
}

pub fn sol_pool_pda() -> Pubkey {
    Pubkey::find_program_address(&[SOL_POOL_PDA_SEED], &LIGHT_SYSTEM_PROGRAM_ID).0
}

pub fn account_compression_authority() -> Pubkey {
    Pubkey::find_program_address(&[CPI_AUTHORITY_PDA_SEED], &LIGHT_SYSTEM_PROGRAM_ID).0
}

/// Spends every input and sends `lamports` to `recipient`; whatever is left
/// goes back to the authority as a compressed change output.
pub fn decompress(params: DecompressParams<'_>) -> Result<Instruction> {
    if params.inputs.is_empty() {
        return Err(SdkError::InsufficientBalance(
            "no compressed accounts to spend".into(),
        ));
    }
    if params.proof.root_indices.len() != params.inputs.len() {
        return Err(SdkError::InvalidInput(format!(
            "validity proof covers {} accounts, expected {}",
            params.proof.root_indices.len(),
            params.inputs.len()
        )));
    }

    let total = params
        .inputs
        .iter()
        .try_fold(0u64, |acc, input| acc.checked_add(input.lamports()))
        .ok_or_else(|| SdkError::InvalidInput("input lamports overflow".into()))?;
    let change = total.checked_sub(params.lamports).ok_or_else(|| {
        SdkError::InsufficientBalance(format!(
            "cannot decompress {} lamports from {} available",
            params.lamports, total
        ))
    })?;

    let mut packed = PackedAccounts::default();
    let inputs = params
        .inputs
        .iter()
        .zip(&params.proof.root_indices)
        .map(|(input, root_index)| {
            Ok(PackedCompressedAccountWithMerkleContext {
                compressed_account: input.account.clone(),
                merkle_context: PackedMerkleContext {
                    merkle_tree_pubkey_index: packed.insert(input.tree.tree)?,
                    nullifier_queue_pubkey_index: packed.insert(input.tree.queue)?,
                    leaf_index: input.leaf_index,
                    prove_by_index: false,
                },
                root_index: *root_index,
                read_only: false,
            })
        })
        .collect::<Result<Vec<_>>>()?;

    let outputs = vec![OutputCompressedAccountWithPackedContext {
        compressed_account: CompressedAccount {
            owner: params.authority.to_bytes(),
            lamports: change,
            address: None,
            data: None,
        },
        merkle_tree_index: packed.insert(params.output_tree.tree)?,
    }];

    let data = InstructionDataInvoke {
        proof: Some(params.proof.compressed_proof),
        input_compressed_accounts_with_merkle_context: inputs,
        output_compressed_accounts: outputs,
        relay_fee: None,
        new_address_params: vec![],
        compress_or_decompress_lamports: Some(params.lamports),
        is_compress: false,
    };

    build_invoke(
        params.fee_payer,
        params.authority,
        Some(params.recipient),
        &data,
        packed,
    )
}

/// Moves `lamports` from the authority's wallet into a fresh compressed
/// account owned by `owner`.
pub fn compress(params: CompressParams) -> Result<Instruction> {
    if params.lamports == 0 {
        return Err(SdkError::InvalidInput("cannot compress zero lamports".into()));
    }

    let mut packed = PackedAccounts::default();
    let outputs = vec![OutputCompressedAccountWithPackedContext {
        compressed_account: CompressedAccount {
            owner: params.owner.to_bytes(),
            lamports: params.lamports,
            address: None,
            data: None,
        },
        merkle_tree_index: packed.insert(params.output_tree.tree)?,
    }];

    let data = InstructionDataInvoke {
        proof: None,
        input_compressed_accounts_with_merkle_context: vec![],
        output_compressed_accounts: outputs,
        relay_fee: None,
        new_address_params: vec![],
        compress_or_decompress_lamports: Some(params.lamports),
        is_compress: true,
    };

    build_invoke(params.fee_payer, params.authority, None, &data, packed)
}

pub fn is_invoke(ix: &Instruction) -> bool {
    ix.program_id == LIGHT_SYSTEM_PROGRAM_ID && ix.data.starts_with(&invoke_discriminator())
}

pub fn parse_invoke(ix: &Instruction) -> Result<ParsedInvoke> {
    if !is_invoke(ix) {
        return Err(SdkError::InvalidInput("not a Light system invoke".into()));
    }
    if ix.accounts.len() < INVOKE_FIXED_ACCOUNTS {
        return Err(SdkError::InvalidInput(format!(
            "invoke needs at least {} accounts, got {}",
            INVOKE_FIXED_ACCOUNTS,
            ix.accounts.len()
        )));
    }

    let inputs: Vec<u8> = borsh::from_slice(&ix.data[8..])
        .map_err(|e| SdkError::Serialization(format!("invoke argument: {}", e)))?;
    let data: InstructionDataInvoke = borsh::from_slice(&inputs)
        .map_err(|e| SdkError::Serialization(format!("invoke payload: {}", e)))?;

    // Anchor encodes an absent optional account as the program id itself
    let recipient = ix.accounts[DECOMPRESSION_RECIPIENT_SLOT].pubkey;
    let decompression_recipient = (recipient != LIGHT_SYSTEM_PROGRAM_ID).then_some(recipient);

    Ok(ParsedInvoke {
        fee_payer: ix.accounts[FEE_PAYER_SLOT].pubkey,
        authority: ix.accounts[AUTHORITY_SLOT].pubkey,
        decompression_recipient,
        data,
    })
}

/// Slots in which the relayer's fee payer may legitimately appear.
pub fn is_fee_payer_slot(position: usize) -> bool {
    position == FEE_PAYER_SLOT || position == DECOMPRESSION_RECIPIENT_SLOT
}

#[derive(Default)]
struct PackedAccounts {
    keys: Vec<Pubkey>,
    index: HashMap<Pubkey, u8>,
}

impl PackedAccounts {
    /// Index of `key` among the packed accounts, adding it if new.
    fn insert(&mut self, key: Pubkey) -> Result<u8> {
        if let Some(i) = self.index.get(&key) {
            return Ok(*i);
        }
        let i = u8::try_from(self.keys.len()).map_err(|_| {
            SdkError::InvalidInput(format!(
                "invoke references more than {} tree accounts",
                u8::MAX as usize + 1
            ))
        })?;
        self.keys.push(key);
        self.index.insert(key, i);
        Ok(i)
    }

    fn into_metas(self) -> Vec<AccountMeta> {
        self.keys
            .into_iter()
            .map(|key| AccountMeta::new(key, false))
            .collect()
    }
}

/// Instruction data for `invoke`: discriminator, then the borsh payload
/// wrapped as a borsh `Vec<u8>`.
pub fn encode_invoke_data(data: &InstructionDataInvoke) -> Result<Vec<u8>> {
    let inputs = borsh::to_vec(data).map_err(|e| SdkError::Serialization(e.to_string()))?;
    let argument = borsh::to_vec(&inputs).map_err(|e| SdkError::Serialization(e.to_string()))?;

    let mut ix_data = invoke_discriminator().to_vec();
    ix_data.extend_from_slice(&argument);
    Ok(ix_data)
}

fn build_invoke(
    fee_payer: Pubkey,
    authority: Pubkey,
    decompression_recipient: Option<Pubkey>,
    data: &InstructionDataInvoke,
    packed: PackedAccounts,
) -> Result<Instruction> {
    let ix_data = encode_invoke_data(data)?;

    let recipient_meta = match decompression_recipient {
        Some(recipient) => AccountMeta::new(recipient, false),
        None => AccountMeta::new_readonly(LIGHT_SYSTEM_PROGRAM_ID, false),
    };

    let mut accounts = vec![
        AccountMeta::new(fee_payer, true),
        AccountMeta::new_readonly(authority, true),
        AccountMeta::new_readonly(REGISTERED_PROGRAM_PDA, false),
        AccountMeta::new_readonly(NOOP_PROGRAM_ID, false),
        AccountMeta::new_readonly(account_compression_authority(), false),
        AccountMeta::new_readonly(ACCOUNT_COMPRESSION_PROGRAM_ID, false),
        AccountMeta::new(sol_pool_pda(), false),
        recipient_meta,
        AccountMeta::new_readonly(system_program::id(), false),
    ];
    accounts.extend(packed.into_metas());

    Ok(Instruction {
        program_id: LIGHT_SYSTEM_PROGRAM_ID,
        accounts,
        data: ix_data,
    })
}
