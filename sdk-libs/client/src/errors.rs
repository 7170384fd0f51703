use cnft_concurrent_merkle_tree::ConcurrentMerkleTreeError;
use solana_sdk::pubkey::Pubkey;
use thiserror::Error;

use crate::{
    accounts::DerivationError, operations::OperationKind, rpc::errors::RpcError,
    store::StoreError,
};

/// Failure taxonomy of a single orchestrated operation.
///
/// `StaleRoot`, `Expired` and transient `Network` failures are retried
/// internally under a bounded budget; everything else is terminal and
/// surfaced immediately. Local failures (`InvalidInput`, `Tree`) are
/// detected before any network call and never consume a retry attempt.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Capacity violations (`TreeFull`, `IndexOutOfRange`) and other local
    /// tree failures.
    #[error("Tree error: {0}")]
    Tree(#[from] ConcurrentMerkleTreeError),

    #[error("Unknown tree {0}")]
    TreeNotFound(Pubkey),

    #[error("Proof was built against a root outside the tolerated window")]
    StaleRoot,

    #[error("Transaction validity window elapsed before confirmation")]
    Expired,

    #[error("Transaction rejected by the ledger: {message}")]
    Rejected { code: Option<u32>, message: String },

    #[error("Network error: {0}")]
    Network(#[from] RpcError),

    #[error("Retry budget exhausted after {attempts} attempts: {last}")]
    RetryExhausted {
        attempts: u32,
        last: Box<OrchestratorError>,
    },

    #[error("Account derivation failed: {0}")]
    Derivation(#[from] DerivationError),

    #[error("Signing failed: {0}")]
    Signer(String),

    #[error("Timed out waiting for the orchestration to finish")]
    Timeout,

    #[error("Storage error: {0}")]
    Storage(String),
}

impl From<StoreError> for OrchestratorError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::TreeNotFound(tree_id) => OrchestratorError::TreeNotFound(tree_id),
            StoreError::AlreadyExists(tree_id) => {
                OrchestratorError::InvalidInput(format!("Tree {tree_id} already exists"))
            }
            StoreError::Tree(err) => OrchestratorError::Tree(err),
            StoreError::Storage(err) => OrchestratorError::Storage(err.to_string()),
        }
    }
}

/// Terminal error surfaced to the caller, carrying enough context for
/// caller-side logging without re-deriving it.
#[derive(Debug, Error)]
#[error("{kind} on tree {tree_id} failed: {source}")]
pub struct FailedOperation {
    pub kind: OperationKind,
    pub tree_id: Pubkey,
    pub leaf_index: Option<u32>,
    #[source]
    pub source: OrchestratorError,
}
