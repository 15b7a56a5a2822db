/// JSON wire form of an instruction, as clients post it to the relayer.
use serde::{Deserialize, Serialize};
use solana_sdk::{
    instruction::{AccountMeta, Instruction},
    pubkey::Pubkey,
};
use std::str::FromStr;

use crate::error::{Result, SdkError};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SerializedAccountMeta {
    /// Base58 address
    pub pubkey: String,
    pub is_signer: bool,
    pub is_writable: bool,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SerializedInstruction {
    /// Base58 program id
    pub program_id: String,
    pub keys: Vec<SerializedAccountMeta>,
    /// Raw instruction data, sent as an array of byte values
    #[serde(default)]
    pub data: Vec<u8>,
}

impl SerializedInstruction {
    pub fn to_instruction(&self) -> Result<Instruction> {
        let program_id = parse_pubkey(&self.program_id, "program id")?;
        let accounts = self
            .keys
            .iter()
            .map(|key| {
                let pubkey = parse_pubkey(&key.pubkey, "account")?;
                Ok(AccountMeta {
                    pubkey,
                    is_signer: key.is_signer,
                    is_writable: key.is_writable,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Instruction {
            program_id,
            accounts,
            data: self.data.clone(),
        })
    }
}

impl From<&Instruction> for SerializedInstruction {
    fn from(ix: &Instruction) -> Self {
        Self {
            program_id: ix.program_id.to_string(),
            keys: ix
                .accounts
                .iter()
                .map(|meta| SerializedAccountMeta {
                    pubkey: meta.pubkey.to_string(),
                    is_signer: meta.is_signer,
                    is_writable: meta.is_writable,
                })
                .collect(),
            data: ix.data.clone(),
        }
    }
}

pub fn serialize_instructions(instructions: &[Instruction]) -> Vec<SerializedInstruction> {
    instructions.iter().map(SerializedInstruction::from).collect()
}

pub fn deserialize_instructions(instructions: &[SerializedInstruction]) -> Result<Vec<Instruction>> {
    instructions
        .iter()
        .map(SerializedInstruction::to_instruction)
        .collect()
}

fn parse_pubkey(value: &str, what: &str) -> Result<Pubkey> {
    Pubkey::from_str(value)
        .map_err(|e| SdkError::InvalidInput(format!("invalid {} {:?}: {}", what, value, e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use solana_sdk::system_instruction;

    #[test]
    fn test_wire_field_names() {
        let json = serde_json::json!({
            "programId": "11111111111111111111111111111111",
            "keys": [{
                "pubkey": "ComputeBudget111111111111111111111111111111",
                "isSigner": true,
                "isWritable": false
            }],
            "data": [2, 0, 0, 0]
        });
        let ix: SerializedInstruction = serde_json::from_value(json).unwrap();
        assert_eq!(ix.keys.len(), 1);
        assert!(ix.keys[0].is_signer);
        assert_eq!(ix.data, vec![2, 0, 0, 0]);

        let native = ix.to_instruction().unwrap();
        assert_eq!(native.program_id, solana_sdk::system_program::id());
    }

    #[test]
    fn test_native_conversion_preserves_metas() {
        let from = Pubkey::new_unique();
        let to = Pubkey::new_unique();
        let ix = system_instruction::transfer(&from, &to, 42);

        let restored = SerializedInstruction::from(&ix).to_instruction().unwrap();
        assert_eq!(restored, ix);
    }

    #[test]
    fn test_rejects_bad_pubkey() {
        let ix = SerializedInstruction {
            program_id: "not-a-key".into(),
            keys: vec![],
            data: vec![],
        };
        assert!(matches!(
            ix.to_instruction(),
            Err(SdkError::InvalidInput(_))
        ));
    }
}
