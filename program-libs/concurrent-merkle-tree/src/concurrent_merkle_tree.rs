use std::marker::PhantomData;

use cnft_hasher::{zero_bytes::MAX_HEIGHT, Hasher, HasherError};

use crate::{
    changelog::ChangelogEntry, errors::ConcurrentMerkleTreeError, hash::compute_parent_node,
};

/// Hash of an unpopulated leaf slot.
pub const EMPTY_LEAF: [u8; 32] = [0u8; 32];

/// Sibling hashes from leaf to root. Full length is the tree height;
/// trees with a canopy omit the topmost `canopy_depth` siblings, which the
/// verifier serves from its canopy cache instead.
pub type MerkleProof = Vec<[u8; 32]>;

/// Client-side mirror of one on-chain concurrent Merkle tree.
///
/// Leaves are stored as the populated prefix; everything beyond
/// `rightmost_index` is implicitly [`EMPTY_LEAF`]. The changelog keeps the
/// last `max_buffer_size` mutations so that proofs derived against a
/// slightly older root remain checkable ([`Self::is_root_valid`]).
#[derive(Clone, Debug)]
pub struct ConcurrentMerkleTree<H>
where
    H: Hasher,
{
    max_depth: usize,
    max_buffer_size: usize,
    canopy_depth: usize,
    root: [u8; 32],
    leaves: Vec<[u8; 32]>,
    changelog: Vec<ChangelogEntry>,
    sequence_number: u64,

    _hasher: PhantomData<H>,
}

impl<H> ConcurrentMerkleTree<H>
where
    H: Hasher,
{
    pub fn new(
        max_depth: usize,
        max_buffer_size: usize,
        canopy_depth: usize,
    ) -> Result<Self, ConcurrentMerkleTreeError> {
        if max_depth == 0 {
            return Err(ConcurrentMerkleTreeError::HeightZero);
        }
        if max_depth > MAX_HEIGHT {
            return Err(ConcurrentMerkleTreeError::HeightHigherThanMax);
        }
        if max_buffer_size == 0 {
            return Err(ConcurrentMerkleTreeError::BufferSizeZero);
        }
        if canopy_depth >= max_depth {
            return Err(ConcurrentMerkleTreeError::CanopyTooDeep);
        }
        Ok(Self {
            max_depth,
            max_buffer_size,
            canopy_depth,
            root: H::zero_bytes()[max_depth],
            leaves: Vec::new(),
            changelog: Vec::new(),
            sequence_number: 0,
            _hasher: PhantomData,
        })
    }

    /// Rebuilds a mirror from its persisted parts. Performs the same bound
    /// checks as [`Self::new`] but trusts the stored root.
    #[allow(clippy::too_many_arguments)]
    pub fn from_parts(
        max_depth: usize,
        max_buffer_size: usize,
        canopy_depth: usize,
        root: [u8; 32],
        leaves: Vec<[u8; 32]>,
        changelog: Vec<ChangelogEntry>,
        sequence_number: u64,
    ) -> Result<Self, ConcurrentMerkleTreeError> {
        let mut tree = Self::new(max_depth, max_buffer_size, canopy_depth)?;
        if leaves.len() > tree.capacity() {
            return Err(ConcurrentMerkleTreeError::IndexOutOfRange(leaves.len()));
        }
        tree.root = root;
        tree.leaves = leaves;
        tree.changelog = changelog;
        tree.changelog
            .truncate(tree.changelog.len().min(max_buffer_size));
        tree.sequence_number = sequence_number;
        Ok(tree)
    }

    pub fn max_depth(&self) -> usize {
        self.max_depth
    }

    pub fn max_buffer_size(&self) -> usize {
        self.max_buffer_size
    }

    pub fn canopy_depth(&self) -> usize {
        self.canopy_depth
    }

    pub fn capacity(&self) -> usize {
        1 << self.max_depth
    }

    pub fn root(&self) -> [u8; 32] {
        self.root
    }

    pub fn sequence_number(&self) -> u64 {
        self.sequence_number
    }

    /// Index the next append lands on.
    pub fn rightmost_index(&self) -> usize {
        self.leaves.len()
    }

    pub fn leaves(&self) -> &[[u8; 32]] {
        &self.leaves
    }

    pub fn changelog(&self) -> &[ChangelogEntry] {
        &self.changelog
    }

    pub fn leaf(&self, leaf_index: usize) -> Result<[u8; 32], ConcurrentMerkleTreeError> {
        if leaf_index >= self.capacity() {
            return Err(ConcurrentMerkleTreeError::IndexOutOfRange(leaf_index));
        }
        Ok(self
            .leaves
            .get(leaf_index)
            .copied()
            .unwrap_or(EMPTY_LEAF))
    }

    /// Computes the node under `index` on the given `level` (0 = leaves).
    /// Subtrees entirely right of the populated prefix short-circuit to the
    /// empty-subtree hash of their height.
    fn node(&self, level: usize, index: usize) -> Result<[u8; 32], HasherError> {
        if (index << level) >= self.leaves.len() {
            return Ok(H::zero_bytes()[level]);
        }
        if level == 0 {
            return Ok(self.leaves[index]);
        }
        let left = self.node(level - 1, index * 2)?;
        let right = self.node(level - 1, index * 2 + 1)?;
        H::hashv(&[&left, &right])
    }

    /// Merkle proof for the leaf under `leaf_index`, shortened by the canopy
    /// depth. Fails with [`ConcurrentMerkleTreeError::LeafNotFound`] for
    /// slots which were never populated.
    pub fn proof(&self, leaf_index: usize) -> Result<MerkleProof, ConcurrentMerkleTreeError> {
        self.proof_with_len(leaf_index, self.max_depth - self.canopy_depth)
    }

    /// Untruncated proof, used for local verification regardless of the
    /// canopy configuration.
    pub fn full_proof(&self, leaf_index: usize) -> Result<MerkleProof, ConcurrentMerkleTreeError> {
        self.proof_with_len(leaf_index, self.max_depth)
    }

    fn proof_with_len(
        &self,
        leaf_index: usize,
        len: usize,
    ) -> Result<MerkleProof, ConcurrentMerkleTreeError> {
        if leaf_index >= self.capacity() {
            return Err(ConcurrentMerkleTreeError::IndexOutOfRange(leaf_index));
        }
        if leaf_index >= self.leaves.len() {
            return Err(ConcurrentMerkleTreeError::LeafNotFound(leaf_index));
        }
        let mut proof = Vec::with_capacity(len);
        for level in 0..len {
            let sibling_index = (leaf_index >> level) ^ 1;
            proof.push(self.node(level, sibling_index)?);
        }
        Ok(proof)
    }

    /// Cached upper-tree nodes, level-order from just below the root
    /// downwards. Empty when the tree has no canopy.
    pub fn canopy(&self) -> Result<Vec<[u8; 32]>, ConcurrentMerkleTreeError> {
        let mut nodes = Vec::new();
        for depth in 1..=self.canopy_depth {
            let level = self.max_depth - depth;
            for index in 0..(1usize << depth) {
                nodes.push(self.node(level, index)?);
            }
        }
        Ok(nodes)
    }

    /// Computes the updated path and root which setting `leaf_index` to
    /// `new_leaf` would produce. Does not mutate the tree; sibling nodes
    /// never contain `leaf_index`, so reading them from the current state is
    /// sound for both appends and replacements.
    fn updated_path(
        &self,
        leaf_index: usize,
        new_leaf: [u8; 32],
    ) -> Result<(Vec<[u8; 32]>, [u8; 32]), ConcurrentMerkleTreeError> {
        let mut path = Vec::with_capacity(self.max_depth);
        let mut node = new_leaf;
        for level in 0..self.max_depth {
            path.push(node);
            let sibling_index = (leaf_index >> level) ^ 1;
            let sibling = self.node(level, sibling_index)?;
            node = compute_parent_node::<H>(&node, &sibling, leaf_index, level)?;
        }
        Ok((path, node))
    }

    /// Commits an already computed mutation. All fallible work happens
    /// before this point, so `leaves`, `changelog` and `sequence_number`
    /// move together or not at all.
    fn commit(&mut self, leaf_index: usize, new_leaf: [u8; 32], path: Vec<[u8; 32]>, root: [u8; 32]) {
        if leaf_index == self.leaves.len() {
            self.leaves.push(new_leaf);
        } else {
            self.leaves[leaf_index] = new_leaf;
        }
        if self.changelog.len() == self.max_buffer_size {
            self.changelog.remove(0);
        }
        self.changelog.push(ChangelogEntry::new(root, path, leaf_index));
        self.root = root;
        self.sequence_number += 1;
    }

    /// Appends a new leaf, returning its index.
    pub fn append(&mut self, leaf: [u8; 32]) -> Result<u64, ConcurrentMerkleTreeError> {
        let leaf_index = self.leaves.len();
        if leaf_index >= self.capacity() {
            return Err(ConcurrentMerkleTreeError::TreeFull);
        }
        let (path, root) = self.updated_path(leaf_index, leaf)?;
        self.commit(leaf_index, leaf, path, root);
        Ok(leaf_index as u64)
    }

    /// Replaces the leaf under `leaf_index` with `new_leaf`.
    pub fn set_leaf(
        &mut self,
        leaf_index: usize,
        new_leaf: [u8; 32],
    ) -> Result<(), ConcurrentMerkleTreeError> {
        if leaf_index >= self.capacity() {
            return Err(ConcurrentMerkleTreeError::IndexOutOfRange(leaf_index));
        }
        if leaf_index >= self.leaves.len() {
            return Err(ConcurrentMerkleTreeError::LeafNotFound(leaf_index));
        }
        let (path, root) = self.updated_path(leaf_index, new_leaf)?;
        self.commit(leaf_index, new_leaf, path, root);
        Ok(())
    }

    /// Whether `candidate` is the current root or one of the buffered
    /// historical roots. Proofs built against any such root are still within
    /// the tolerated concurrent-modification window.
    pub fn is_root_valid(&self, candidate: &[u8; 32]) -> bool {
        self.root == *candidate || self.changelog.iter().any(|entry| entry.root == *candidate)
    }

    /// Patches a proof derived against `base_root` (an older, still buffered
    /// root) so it verifies against the current root. Fails with
    /// [`ConcurrentMerkleTreeError::ChangelogGap`] when `base_root` has been
    /// evicted or a newer mutation rewrote the leaf itself.
    pub fn update_proof_from_changelog(
        &self,
        base_root: &[u8; 32],
        leaf_index: usize,
        proof: &mut [[u8; 32]],
    ) -> Result<(), ConcurrentMerkleTreeError> {
        if *base_root == self.root {
            return Ok(());
        }
        let base = self
            .changelog
            .iter()
            .position(|entry| entry.root == *base_root)
            .ok_or(ConcurrentMerkleTreeError::ChangelogGap)?;
        for entry in &self.changelog[base + 1..] {
            entry.update_proof(leaf_index, self.max_depth, proof)?;
        }
        Ok(())
    }

    /// Replaces the head of this mirror with the remote view. Returns
    /// `false` without touching anything when the remote state matches the
    /// local one (idempotent reconciliation).
    ///
    /// The remote changelog tail carries the leaf hash per mutation
    /// (`path[0]`), which is enough to replay the missed writes as long as
    /// the tail connects to the local sequence number. When the remote is
    /// ahead by more mutations than the tail carries, the missed leaves
    /// cannot be reconstructed and adopting the root would leave the
    /// mirror producing proofs that no longer verify; that case fails with
    /// [`ConcurrentMerkleTreeError::ChangelogGap`] and changes nothing.
    pub fn adopt_remote(
        &mut self,
        remote_root: [u8; 32],
        remote_sequence_number: u64,
        remote_rightmost_index: usize,
        changelog_tail: &[ChangelogEntry],
    ) -> Result<bool, ConcurrentMerkleTreeError> {
        if remote_sequence_number == self.sequence_number && remote_root == self.root {
            return Ok(false);
        }
        if remote_rightmost_index > self.capacity() {
            return Err(ConcurrentMerkleTreeError::IndexOutOfRange(
                remote_rightmost_index,
            ));
        }

        let missed = remote_sequence_number.saturating_sub(self.sequence_number) as usize;
        if missed > changelog_tail.len() {
            return Err(ConcurrentMerkleTreeError::ChangelogGap);
        }
        let replay_from = changelog_tail.len() - missed;
        for entry in &changelog_tail[replay_from..] {
            let leaf_index = entry.index();
            if leaf_index >= self.capacity() {
                return Err(ConcurrentMerkleTreeError::IndexOutOfRange(leaf_index));
            }
            // A tail entry without a path carries no leaf to replay.
            let new_leaf = *entry
                .path
                .first()
                .ok_or(ConcurrentMerkleTreeError::ChangelogGap)?;
            if leaf_index >= self.leaves.len() {
                self.leaves.resize(leaf_index + 1, EMPTY_LEAF);
            }
            self.leaves[leaf_index] = new_leaf;
            if self.changelog.len() == self.max_buffer_size {
                self.changelog.remove(0);
            }
            self.changelog.push(entry.clone());
        }

        if remote_rightmost_index > self.leaves.len() {
            self.leaves.resize(remote_rightmost_index, EMPTY_LEAF);
        }
        self.root = remote_root;
        self.sequence_number = remote_sequence_number;
        Ok(true)
    }
}
