pub mod errors;
pub mod rate_limiter;
pub mod solana_rpc;

use std::fmt::Debug;

use async_trait::async_trait;
use borsh::{BorshDeserialize, BorshSerialize};
use cnft_concurrent_merkle_tree::ChangelogEntry;
use solana_sdk::{hash::Hash, pubkey::Pubkey, signature::Signature, transaction::Transaction};

pub use crate::rpc::{errors::RpcError, rate_limiter::RateLimiter, solana_rpc::SolanaLedgerRpc};

/// Remote failure reported by a transaction dry run.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SimulationFailure {
    /// Custom program error code, when the failure carries one.
    pub code: Option<u32>,
    pub message: String,
}

impl SimulationFailure {
    /// Whether the failure means the proof was checked against a root the
    /// tree no longer recognizes. This is the one simulation failure the
    /// orchestrator recovers from by reconciling and retrying; everything
    /// else is surfaced as a rejection.
    pub fn is_stale_root(&self) -> bool {
        const STALE_MARKERS: [&str; 3] = ["invalid root", "root mismatch", "leaf index out of bounds"];
        let message = self.message.to_lowercase();
        STALE_MARKERS.iter().any(|marker| message.contains(marker))
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SimulationResult {
    pub err: Option<SimulationFailure>,
    pub logs: Vec<String>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ConfirmationStatus {
    Pending,
    Confirmed,
    Failed(String),
}

/// Head of a tree as the remote ledger sees it; fetched only for
/// reconciliation after a staleness failure.
#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct RemoteTreeState {
    pub root: [u8; 32],
    pub sequence_number: u64,
    pub rightmost_index: u64,
    /// Most recent changelog entries, oldest first.
    pub changelog_tail: Vec<ChangelogEntry>,
}

/// Boundary to the remote ledger transport. The orchestrator only ever
/// talks to the chain through this trait, which keeps the state machine
/// testable against a programmable mock.
#[async_trait]
pub trait LedgerRpc: Send + Sync + Debug {
    /// Fresh validity anchor for a transaction about to be built.
    async fn latest_blockhash(&self) -> Result<Hash, RpcError>;

    /// Dry-runs the transaction without committing it.
    async fn simulate(&self, transaction: &Transaction) -> Result<SimulationResult, RpcError>;

    async fn submit(&self, transaction: &Transaction) -> Result<Signature, RpcError>;

    async fn confirmation(&self, signature: &Signature) -> Result<ConfirmationStatus, RpcError>;

    async fn remote_tree_state(&self, tree_id: &Pubkey) -> Result<RemoteTreeState, RpcError>;
}
