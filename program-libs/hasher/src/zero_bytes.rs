//! Hashes of empty subtrees, one per level.
//!
//! `zero_bytes()[i]` is the root of a fully empty subtree of height `i`:
//! level 0 is the all-zero empty leaf, every level above hashes two copies
//! of the level below.

use crate::{Hash, Hasher};

/// Maximum tree height supported by the target compression program.
pub const MAX_HEIGHT: usize = 30;

pub type ZeroBytes = [Hash; MAX_HEIGHT + 1];

/// Computes the zero-bytes table for a hasher. Called once per hasher type,
/// the result is cached behind a `OnceLock` in each implementation.
pub fn compute_zero_bytes<H: Hasher>() -> ZeroBytes {
    let mut zero_bytes = [[0u8; 32]; MAX_HEIGHT + 1];
    for i in 1..=MAX_HEIGHT {
        let below = zero_bytes[i - 1];
        // Hashing two constants cannot fail for either supported hasher.
        zero_bytes[i] = H::hashv(&[&below, &below]).unwrap();
    }
    zero_bytes
}
