use std::sync::OnceLock;

use crate::{
    errors::HasherError,
    zero_bytes::{compute_zero_bytes, ZeroBytes},
    Hash, Hasher,
};

static ZERO_BYTES: OnceLock<ZeroBytes> = OnceLock::new();

/// Keccak-256, the hash the on-chain compression program applies to leaves
/// and inner nodes.
#[derive(Clone, Copy, Debug)]
pub struct Keccak;

impl Hasher for Keccak {
    fn hash(val: &[u8]) -> Result<Hash, HasherError> {
        Self::hashv(&[val])
    }

    fn hashv(vals: &[&[u8]]) -> Result<Hash, HasherError> {
        Ok(solana_program::keccak::hashv(vals).to_bytes())
    }

    fn zero_bytes() -> ZeroBytes {
        *ZERO_BYTES.get_or_init(compute_zero_bytes::<Keccak>)
    }
}
