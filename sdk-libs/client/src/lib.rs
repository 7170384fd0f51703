pub mod accounts;
pub mod errors;
pub mod instructions;
pub mod operations;
pub mod orchestrator;
pub mod rpc;
pub mod signer;
pub mod store;

pub use accounts::AccountDeriver;
pub use errors::{FailedOperation, OrchestratorError};
pub use operations::{Creator, LeafArgs, MetadataArgs, Operation, OperationKind};
pub use orchestrator::{OperationReceipt, OrchestratorConfig, TxOrchestrator};
pub use rpc::{ConfirmationStatus, LedgerRpc, RemoteTreeState, SimulationResult};
pub use signer::{KeypairSigner, TransactionSigner};
pub use store::{FileTreeStorage, TreeStore, TreeStorage};

use solana_program::pubkey::Pubkey;

/// The compressed-NFT program all instructions are addressed to.
pub const CNFT_PROGRAM_ID: Pubkey =
    solana_program::pubkey!("BGUMAp9Gq7iTEuizy4pqaxsTyUCBK68MDfK752saRPUY");

/// State-compression program owning the on-chain Merkle tree accounts.
pub const ACCOUNT_COMPRESSION_PROGRAM_ID: Pubkey =
    solana_program::pubkey!("cmtDvXumGCrqC1Age74AVPhSRVXJMd8PJS91L8KbNCK");

/// Wrapper program the compression program logs changelog events through.
pub const NOOP_PROGRAM_ID: Pubkey =
    solana_program::pubkey!("noopb9bkMVfRPU8AsbpTUg8AQkHtKwMYZiFUjNRtMmV");
