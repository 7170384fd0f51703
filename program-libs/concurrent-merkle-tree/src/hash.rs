use cnft_hasher::{errors::HasherError, Hasher};

/// Returns the hash of the parent node based on the provided `node` (under
/// `node_index`) and its sibling at the given `level`. The bit of
/// `node_index` at `level` decides which side `node` is hashed on.
pub fn compute_parent_node<H>(
    node: &[u8; 32],
    sibling: &[u8; 32],
    node_index: usize,
    level: usize,
) -> Result<[u8; 32], HasherError>
where
    H: Hasher,
{
    let is_left = (node_index >> level) & 1 == 0;
    if is_left {
        H::hashv(&[node, sibling])
    } else {
        H::hashv(&[sibling, node])
    }
}

/// Computes the root for the given `leaf` (under `leaf_index`) and `proof`.
/// It doesn't perform any validation of the provided `proof`.
pub fn compute_root<H>(
    leaf: &[u8; 32],
    leaf_index: usize,
    proof: &[[u8; 32]],
) -> Result<[u8; 32], HasherError>
where
    H: Hasher,
{
    let mut node = *leaf;
    for (j, sibling) in proof.iter().enumerate() {
        node = compute_parent_node::<H>(&node, sibling, leaf_index, j)?;
    }
    Ok(node)
}

/// Checks whether the Merkle `proof` for the given `leaf` (under
/// `leaf_index`) produces the given `root`. Pure, no side effects; mirrors
/// the check the on-chain program performs.
pub fn verify<H>(root: &[u8; 32], leaf: &[u8; 32], proof: &[[u8; 32]], leaf_index: usize) -> bool
where
    H: Hasher,
{
    match compute_root::<H>(leaf, leaf_index, proof) {
        Ok(computed_root) => computed_root == *root,
        Err(_) => false,
    }
}
