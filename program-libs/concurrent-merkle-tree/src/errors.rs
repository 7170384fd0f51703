use cnft_hasher::HasherError;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConcurrentMerkleTreeError {
    #[error("Invalid height, it has to be greater than 0")]
    HeightZero,
    #[error("Invalid height, it cannot exceed the maximum allowed height")]
    HeightHigherThanMax,
    #[error("Invalid buffer size, it has to be greater than 0")]
    BufferSizeZero,
    #[error("Canopy depth has to be lower than the tree height")]
    CanopyTooDeep,
    #[error("Merkle tree is full, cannot append more leaves")]
    TreeFull,
    #[error("Leaf index {0} exceeds the tree capacity")]
    IndexOutOfRange(usize),
    #[error("Leaf under index {0} was never populated")]
    LeafNotFound(usize),
    #[error("Changelog does not connect the requested root to the current state")]
    ChangelogGap,
    #[error("Hasher error: {0}")]
    Hasher(#[from] HasherError),
}
