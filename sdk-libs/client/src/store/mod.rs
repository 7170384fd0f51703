pub mod storage;

use std::sync::Arc;

use cnft_concurrent_merkle_tree::{ConcurrentMerkleTree, ConcurrentMerkleTreeError};
use cnft_hasher::Keccak;
use dashmap::DashMap;
use solana_sdk::pubkey::Pubkey;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::rpc::RemoteTreeState;

pub use storage::{FileTreeStorage, PersistedTree, StorageError, TreeStorage};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Unknown tree {0}")]
    TreeNotFound(Pubkey),

    #[error("Tree {0} already exists")]
    AlreadyExists(Pubkey),

    #[error("Tree error: {0}")]
    Tree(#[from] ConcurrentMerkleTreeError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
}

type SharedTree = Arc<Mutex<ConcurrentMerkleTree<Keccak>>>;

/// Registry of local tree mirrors keyed by tree id. Every mutation runs
/// under that tree's own lock and is persisted before the lock is
/// released, so a restart always resumes from the last committed write.
/// Trees absent from memory are loaded from storage on first touch.
#[derive(Debug)]
pub struct TreeStore {
    trees: DashMap<Pubkey, SharedTree>,
    storage: Arc<dyn TreeStorage>,
}

impl TreeStore {
    pub fn new(storage: Arc<dyn TreeStorage>) -> Self {
        Self {
            trees: DashMap::new(),
            storage,
        }
    }

    /// Registers an empty tree mirror and persists its initial record.
    pub async fn create(
        &self,
        tree_id: Pubkey,
        max_depth: usize,
        max_buffer_size: usize,
        canopy_depth: usize,
    ) -> Result<(), StoreError> {
        if self.trees.contains_key(&tree_id) || self.storage.load(&tree_id).await?.is_some() {
            return Err(StoreError::AlreadyExists(tree_id));
        }
        let tree = ConcurrentMerkleTree::<Keccak>::new(max_depth, max_buffer_size, canopy_depth)?;
        self.storage
            .save(&tree_id, &PersistedTree::from_tree(&tree))
            .await?;
        self.trees.insert(tree_id, Arc::new(Mutex::new(tree)));
        info!(%tree_id, max_depth, max_buffer_size, canopy_depth, "registered tree");
        Ok(())
    }

    async fn entry(&self, tree_id: &Pubkey) -> Result<SharedTree, StoreError> {
        if let Some(tree) = self.trees.get(tree_id) {
            return Ok(tree.clone());
        }
        let persisted = self
            .storage
            .load(tree_id)
            .await?
            .ok_or(StoreError::TreeNotFound(*tree_id))?;
        let loaded = Arc::new(Mutex::new(persisted.into_tree()?));
        debug!(%tree_id, "loaded tree from storage");
        // Another task may have loaded the same tree concurrently; keep
        // whichever entry landed first so both see one shared lock.
        let entry = self
            .trees
            .entry(*tree_id)
            .or_insert(loaded)
            .value()
            .clone();
        Ok(entry)
    }

    /// Point-in-time copy of the tree, for proof generation without
    /// holding the write lock across the whole orchestration attempt.
    pub async fn snapshot(
        &self,
        tree_id: &Pubkey,
    ) -> Result<ConcurrentMerkleTree<Keccak>, StoreError> {
        let tree = self.entry(tree_id).await?;
        let guard = tree.lock().await;
        Ok(guard.clone())
    }

    /// Runs `apply` with exclusive access to the tree. On success the
    /// mutated tree is persisted before the lock is released; on failure
    /// nothing is written and the in-memory state is whatever `apply`
    /// left behind, which for the tree's atomic operations is unchanged.
    /// Generic over the closure's error so callers can compose their own
    /// fallible work (derivations, hashing) under the same lock.
    pub async fn with_exclusive<T, E, F>(&self, tree_id: &Pubkey, apply: F) -> Result<T, E>
    where
        F: FnOnce(&mut ConcurrentMerkleTree<Keccak>) -> Result<T, E>,
        E: From<StoreError>,
    {
        let tree = self.entry(tree_id).await.map_err(E::from)?;
        let mut guard = tree.lock().await;
        let value = apply(&mut guard)?;
        self.storage
            .save(tree_id, &PersistedTree::from_tree(&guard))
            .await
            .map_err(|e| E::from(StoreError::from(e)))?;
        Ok(value)
    }

    /// Folds the remote head into the local mirror. Returns `true` when
    /// the mirror actually moved; an already-current mirror is a no-op.
    pub async fn reconcile(
        &self,
        tree_id: &Pubkey,
        remote: &RemoteTreeState,
    ) -> Result<bool, StoreError> {
        let changed = self
            .with_exclusive(tree_id, |tree| {
                tree.adopt_remote(
                    remote.root,
                    remote.sequence_number,
                    remote.rightmost_index as usize,
                    &remote.changelog_tail,
                )
                .map_err(StoreError::from)
            })
            .await?;
        if changed {
            info!(%tree_id, sequence_number = remote.sequence_number, "reconciled tree with remote head");
        }
        Ok(changed)
    }

    /// Drops the tree from the active set and moves its record aside.
    pub async fn archive(&self, tree_id: &Pubkey) -> Result<(), StoreError> {
        self.trees.remove(tree_id);
        self.storage.archive(tree_id).await?;
        Ok(())
    }
}
