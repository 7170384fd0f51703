pub mod changelog;
pub mod concurrent_merkle_tree;
pub mod errors;
pub mod hash;

pub use changelog::ChangelogEntry;
pub use concurrent_merkle_tree::{ConcurrentMerkleTree, MerkleProof, EMPTY_LEAF};
pub use errors::ConcurrentMerkleTreeError;
pub use hash::{compute_parent_node, compute_root, verify};
