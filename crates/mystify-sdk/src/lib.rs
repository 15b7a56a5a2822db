pub mod api;
pub mod client;
pub mod compression;
pub mod error;
pub mod indexer;
pub mod instruction;
pub mod note;
pub mod programs;
pub mod transaction;
pub mod validator;
pub mod withdrawal;

pub use client::RelayerClient;
pub use error::{Result, SdkError};
pub use indexer::PhotonIndexer;
pub use instruction::SerializedInstruction;
pub use note::Note;
pub use validator::{InstructionValidator, ValidationError, ValidatorConfig};
pub use withdrawal::{WithdrawalBounds, WithdrawalPlan};
