use std::{
    io,
    path::{Path, PathBuf},
};

use async_trait::async_trait;
use borsh::{BorshDeserialize, BorshSerialize};
use cnft_concurrent_merkle_tree::{ChangelogEntry, ConcurrentMerkleTree};
use cnft_hasher::Keccak;
use solana_sdk::pubkey::Pubkey;
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Storage I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Corrupt tree record: {0}")]
    Corrupt(String),
}

/// Serialized form of a tree. The hasher is fixed at the schema level, so
/// only the structural fields travel to disk.
#[derive(Debug, BorshSerialize, BorshDeserialize)]
pub struct PersistedTree {
    pub max_depth: u32,
    pub max_buffer_size: u32,
    pub canopy_depth: u32,
    pub sequence_number: u64,
    pub root: [u8; 32],
    pub leaves: Vec<[u8; 32]>,
    pub changelog: Vec<ChangelogEntry>,
}

impl PersistedTree {
    pub fn from_tree(tree: &ConcurrentMerkleTree<Keccak>) -> Self {
        Self {
            max_depth: tree.max_depth() as u32,
            max_buffer_size: tree.max_buffer_size() as u32,
            canopy_depth: tree.canopy_depth() as u32,
            sequence_number: tree.sequence_number(),
            root: tree.root(),
            leaves: tree.leaves().to_vec(),
            changelog: tree.changelog().to_vec(),
        }
    }

    pub fn into_tree(self) -> Result<ConcurrentMerkleTree<Keccak>, StorageError> {
        ConcurrentMerkleTree::from_parts(
            self.max_depth as usize,
            self.max_buffer_size as usize,
            self.canopy_depth as usize,
            self.root,
            self.leaves,
            self.changelog,
            self.sequence_number,
        )
        .map_err(|e| StorageError::Corrupt(e.to_string()))
    }
}

/// Durable backend behind the tree store. Implementations must make `save`
/// atomic with respect to crashes: a reader observes either the previous
/// record or the new one, never a torn write.
#[async_trait]
pub trait TreeStorage: Send + Sync + std::fmt::Debug {
    async fn load(&self, tree_id: &Pubkey) -> Result<Option<PersistedTree>, StorageError>;

    async fn save(&self, tree_id: &Pubkey, tree: &PersistedTree) -> Result<(), StorageError>;

    /// Moves the record out of the active set while keeping its bytes
    /// recoverable.
    async fn archive(&self, tree_id: &Pubkey) -> Result<(), StorageError>;
}

/// One Borsh file per tree under a root directory, named by the base58
/// tree id. Writes go to a temporary sibling first and are renamed into
/// place, which on the same filesystem replaces the old record atomically.
#[derive(Debug)]
pub struct FileTreeStorage {
    root: PathBuf,
}

impl FileTreeStorage {
    pub fn new(root: impl Into<PathBuf>) -> Result<Self, StorageError> {
        let root = root.into();
        std::fs::create_dir_all(&root)?;
        std::fs::create_dir_all(root.join("archive"))?;
        Ok(Self { root })
    }

    fn tree_path(&self, tree_id: &Pubkey) -> PathBuf {
        self.root.join(format!("{}.tree", tree_id))
    }

    fn archive_path(&self, tree_id: &Pubkey) -> PathBuf {
        self.root
            .join("archive")
            .join(format!("{}.tree", tree_id))
    }

    fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), StorageError> {
        let tmp = path.with_extension("tree.tmp");
        std::fs::write(&tmp, bytes)?;
        std::fs::rename(&tmp, path)?;
        Ok(())
    }
}

#[async_trait]
impl TreeStorage for FileTreeStorage {
    async fn load(&self, tree_id: &Pubkey) -> Result<Option<PersistedTree>, StorageError> {
        let path = self.tree_path(tree_id);
        let bytes = match std::fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let tree = PersistedTree::try_from_slice(&bytes)
            .map_err(|e| StorageError::Corrupt(format!("{}: {e}", path.display())))?;
        Ok(Some(tree))
    }

    async fn save(&self, tree_id: &Pubkey, tree: &PersistedTree) -> Result<(), StorageError> {
        let bytes = tree
            .try_to_vec()
            .map_err(|e| StorageError::Corrupt(e.to_string()))?;
        Self::write_atomic(&self.tree_path(tree_id), &bytes)?;
        debug!(%tree_id, sequence_number = tree.sequence_number, "persisted tree");
        Ok(())
    }

    async fn archive(&self, tree_id: &Pubkey) -> Result<(), StorageError> {
        let active = self.tree_path(tree_id);
        match std::fs::rename(&active, self.archive_path(tree_id)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
