use borsh::{BorshDeserialize, BorshSerialize};

use crate::errors::ConcurrentMerkleTreeError;

/// Record of a single accepted leaf mutation. `path` holds the updated node
/// per level, leaf first, so `path[0]` is the new leaf hash itself.
#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct ChangelogEntry {
    pub root: [u8; 32],
    pub path: Vec<[u8; 32]>,
    /// Index of the affected leaf.
    pub index: u64,
}

impl ChangelogEntry {
    pub fn new(root: [u8; 32], path: Vec<[u8; 32]>, index: usize) -> Self {
        let index = index as u64;
        Self { root, path, index }
    }

    pub fn index(&self) -> usize {
        self.index as usize
    }

    /// Returns the index of the node in this entry which intersects the
    /// Merkle path of `leaf_index`.
    ///
    /// Taking a XOR of the two leaf indexes gives the lowest level on which
    /// the paths diverge; every level above it is shared. For a tree of
    /// height 4, an update of leaf 2 against a changelog affecting leaf 4:
    ///
    /// 2 ^ 4 = 0b_0010 ^ 0b_0100 = 0b_0110, highest set bit on level 2
    fn intersection_index(&self, leaf_index: usize, height: usize) -> usize {
        let padding = 64 - height;
        let common_path_len = ((leaf_index ^ self.index()) << padding).leading_zeros() as usize;
        (height - 1) - common_path_len
    }

    /// Patches `proof` (derived against the state preceding this entry) so
    /// it stays valid against the state following it.
    pub fn update_proof(
        &self,
        leaf_index: usize,
        height: usize,
        proof: &mut [[u8; 32]],
    ) -> Result<(), ConcurrentMerkleTreeError> {
        if leaf_index != self.index() {
            let intersection_index = self.intersection_index(leaf_index, height);
            if intersection_index < proof.len() {
                if let Some(node) = self.path.get(intersection_index) {
                    proof[intersection_index] = *node;
                }
            }
        } else {
            // The leaf we are trying to prove was itself rewritten by a newer
            // mutation. The caller has to resync the mirror before retrying.
            return Err(ConcurrentMerkleTreeError::ChangelogGap);
        }

        Ok(())
    }
}
