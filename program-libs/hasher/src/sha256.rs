use std::sync::OnceLock;

use crate::{
    errors::HasherError,
    zero_bytes::{compute_zero_bytes, ZeroBytes},
    Hash, Hasher,
};

static ZERO_BYTES: OnceLock<ZeroBytes> = OnceLock::new();

#[derive(Clone, Copy, Debug)]
pub struct Sha256;

impl Hasher for Sha256 {
    fn hash(val: &[u8]) -> Result<Hash, HasherError> {
        Self::hashv(&[val])
    }

    fn hashv(vals: &[&[u8]]) -> Result<Hash, HasherError> {
        use sha2::{Digest, Sha256};

        let mut hasher = Sha256::default();
        for val in vals {
            hasher.update(val);
        }
        Ok(hasher.finalize().into())
    }

    fn zero_bytes() -> ZeroBytes {
        *ZERO_BYTES.get_or_init(compute_zero_bytes::<Sha256>)
    }
}
