//! Programs a withdrawal transaction may touch and a typed view of the
//! instructions sent to them.
use solana_sdk::{
    compute_budget, instruction::Instruction, pubkey, pubkey::Pubkey, system_instruction::SystemInstruction,
    system_program,
};

use crate::compression::{self, ParsedInvoke};

pub const LEGACY_COMPRESSED_PROGRAM_ID: Pubkey = pubkey!("CmtHVz7C4mRhk3UKNs2BjPZVKPMbB6x86wwghHKzeKZy");
pub const LIGHT_SYSTEM_PROGRAM_ID: Pubkey = pubkey!("SySTEM1eSU2p4BGQfQpimFEWWSC1XDFeun3Nqzz3rT7");
pub const ACCOUNT_COMPRESSION_PROGRAM_ID: Pubkey = pubkey!("compr6CUsB5m2jS4Y3831ztGSTnDpnKJTKS95d64XVq");
pub const NOOP_PROGRAM_ID: Pubkey = pubkey!("noopb9bkMVfRPU8AsbpTUg8AQkHtKwMYZiFUjNRtMmV");
pub const COMPUTE_BUDGET_PROGRAM_ID: Pubkey = pubkey!("ComputeBudget111111111111111111111111111111");
pub const SPL_TOKEN_PROGRAM_ID: Pubkey = pubkey!("TokenkegQfeZyiNwAJbNbGKPFXCWuBvf9Ss623VQ5DA");
pub const SPL_TOKEN_2022_PROGRAM_ID: Pubkey = pubkey!("TokenzQdBNbLqP5VEhdkAS6EPFLC1PHnBqCXEpPxuEb");

/// The only programs a withdrawal may invoke unless an operator adds more.
pub const DEFAULT_ALLOWED_PROGRAMS: [Pubkey; 6] = [
    LEGACY_COMPRESSED_PROGRAM_ID,
    LIGHT_SYSTEM_PROGRAM_ID,
    system_program::ID,
    ACCOUNT_COMPRESSION_PROGRAM_ID,
    NOOP_PROGRAM_ID,
    COMPUTE_BUDGET_PROGRAM_ID,
];

pub const DEFAULT_COMPUTE_UNIT_LIMIT: u32 = 1_000_000;

const TOKEN_TRANSFER_TAG: u8 = 3;
const TOKEN_TRANSFER_CHECKED_TAG: u8 = 12;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ComputeBudgetOp {
    RequestHeapFrame(u32),
    SetComputeUnitLimit(u32),
    /// Micro-lamports per compute unit
    SetComputeUnitPrice(u64),
    SetLoadedAccountsDataSizeLimit(u32),
    Unknown(u8),
}

/// Funds leaving `source`, authorized by `authorities`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AssetTransfer {
    pub source: Pubkey,
    pub destination: Pubkey,
    /// Accounts whose signature authorizes the move (besides `source`)
    pub authorities: Vec<Pubkey>,
    pub amount: u64,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ParsedInstruction {
    ComputeBudget(ComputeBudgetOp),
    SystemTransfer(AssetTransfer),
    /// Any other system program instruction
    System { accounts: Vec<Pubkey> },
    TokenTransfer(AssetTransfer),
    Token { accounts: Vec<Pubkey> },
    CompressedInvoke(ParsedInvoke),
    /// Allowed program whose payload we do not interpret
    Opaque { program_id: Pubkey, accounts: Vec<Pubkey> },
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MalformedInstruction(pub String);

pub fn compute_unit_limit(units: u32) -> Instruction {
    compute_budget::ComputeBudgetInstruction::set_compute_unit_limit(units)
}

pub fn parse_instruction(ix: &Instruction) -> Result<ParsedInstruction, MalformedInstruction> {
    let program_id = ix.program_id;
    if program_id == COMPUTE_BUDGET_PROGRAM_ID {
        parse_compute_budget(&ix.data).map(ParsedInstruction::ComputeBudget)
    } else if program_id == system_program::ID {
        parse_system(ix)
    } else if program_id == SPL_TOKEN_PROGRAM_ID || program_id == SPL_TOKEN_2022_PROGRAM_ID {
        parse_token(ix)
    } else if compression::is_invoke(ix) {
        compression::parse_invoke(ix)
            .map(ParsedInstruction::CompressedInvoke)
            .map_err(|e| MalformedInstruction(e.to_string()))
    } else {
        Ok(ParsedInstruction::Opaque {
            program_id,
            accounts: account_keys(ix),
        })
    }
}

fn parse_compute_budget(data: &[u8]) -> Result<ComputeBudgetOp, MalformedInstruction> {
    let (tag, rest) = data
        .split_first()
        .ok_or_else(|| MalformedInstruction("empty compute budget instruction".into()))?;
    let op = match tag {
        1 => ComputeBudgetOp::RequestHeapFrame(read_u32(rest)?),
        2 => ComputeBudgetOp::SetComputeUnitLimit(read_u32(rest)?),
        3 => ComputeBudgetOp::SetComputeUnitPrice(read_u64(rest)?),
        4 => ComputeBudgetOp::SetLoadedAccountsDataSizeLimit(read_u32(rest)?),
        other => ComputeBudgetOp::Unknown(*other),
    };
    Ok(op)
}

fn parse_system(ix: &Instruction) -> Result<ParsedInstruction, MalformedInstruction> {
    let instruction: SystemInstruction = bincode::deserialize(&ix.data)
        .map_err(|e| MalformedInstruction(format!("system instruction: {}", e)))?;

    let transfer = |source: usize,
                    destination: usize,
                    authorities: &[usize],
                    amount: u64|
     -> Result<ParsedInstruction, MalformedInstruction> {
        let authorities = authorities
            .iter()
            .map(|i| account_at(ix, *i))
            .collect::<Result<Vec<_>, MalformedInstruction>>()?;
        Ok(ParsedInstruction::SystemTransfer(AssetTransfer {
            source: account_at(ix, source)?,
            destination: account_at(ix, destination)?,
            authorities,
            amount,
        }))
    };

    match instruction {
        SystemInstruction::Transfer { lamports } => transfer(0, 1, &[], lamports),
        SystemInstruction::CreateAccount { lamports, .. } => transfer(0, 1, &[], lamports),
        SystemInstruction::CreateAccountWithSeed { lamports, .. } => {
            transfer(0, 1, &[], lamports)
        }
        // from is a derived address; the base key signs for it
        SystemInstruction::TransferWithSeed { lamports, .. } => transfer(0, 2, &[1], lamports),
        SystemInstruction::WithdrawNonceAccount(lamports) => transfer(0, 1, &[4], lamports),
        _ => Ok(ParsedInstruction::System {
            accounts: account_keys(ix),
        }),
    }
}

fn parse_token(ix: &Instruction) -> Result<ParsedInstruction, MalformedInstruction> {
    let (tag, rest) = ix
        .data
        .split_first()
        .ok_or_else(|| MalformedInstruction("empty token instruction".into()))?;

    // Multisig co-signers trail the authority
    let (source, destination, authority) = match *tag {
        TOKEN_TRANSFER_TAG => (0, 1, 2),
        TOKEN_TRANSFER_CHECKED_TAG => (0, 2, 3),
        _ => {
            return Ok(ParsedInstruction::Token {
                accounts: account_keys(ix),
            })
        }
    };

    let authorities = ix
        .accounts
        .iter()
        .skip(authority)
        .map(|meta| meta.pubkey)
        .collect::<Vec<_>>();
    if authorities.is_empty() {
        return Err(MalformedInstruction("token transfer without authority".into()));
    }

    Ok(ParsedInstruction::TokenTransfer(AssetTransfer {
        source: account_at(ix, source)?,
        destination: account_at(ix, destination)?,
        authorities,
        amount: read_u64(rest)?,
    }))
}

fn account_keys(ix: &Instruction) -> Vec<Pubkey> {
    ix.accounts.iter().map(|meta| meta.pubkey).collect()
}

fn account_at(ix: &Instruction, index: usize) -> Result<Pubkey, MalformedInstruction> {
    ix.accounts
        .get(index)
        .map(|meta| meta.pubkey)
        .ok_or_else(|| {
            MalformedInstruction(format!(
                "expected account #{} on {}, got {} accounts",
                index,
                ix.program_id,
                ix.accounts.len()
            ))
        })
}

fn read_u32(bytes: &[u8]) -> Result<u32, MalformedInstruction> {
    bytes
        .get(..4)
        .and_then(|b| b.try_into().ok())
        .map(u32::from_le_bytes)
        .ok_or_else(|| MalformedInstruction("truncated u32 argument".into()))
}

fn read_u64(bytes: &[u8]) -> Result<u64, MalformedInstruction> {
    bytes
        .get(..8)
        .and_then(|b| b.try_into().ok())
        .map(u64::from_le_bytes)
        .ok_or_else(|| MalformedInstruction("truncated u64 argument".into()))
}
