use dashmap::DashMap;
use solana_sdk::pubkey::Pubkey;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DerivationError {
    #[error("Exhausted the bump space without finding an off-curve address")]
    DerivationFailed,
}

/// Searches bump values from 255 downward until the derived address falls
/// off the curve. Deterministic: identical inputs always yield the same
/// `(address, bump)`. The exhaustion case is astronomically unlikely but a
/// defined terminal error rather than a loop.
pub fn derive_address(
    seeds: &[&[u8]],
    program_id: &Pubkey,
) -> Result<(Pubkey, u8), DerivationError> {
    for bump in (0..=255u8).rev() {
        let bump_seed = [bump];
        let mut seeds_with_bump = seeds.to_vec();
        seeds_with_bump.push(&bump_seed);
        if let Ok(address) = Pubkey::create_program_address(&seeds_with_bump, program_id) {
            return Ok((address, bump));
        }
    }
    Err(DerivationError::DerivationFailed)
}

/// Derives program-controlled addresses and memoizes the results. The bump
/// search is pure but not cheap, and the same handful of addresses is
/// needed on every orchestration attempt.
#[derive(Debug, Default)]
pub struct AccountDeriver {
    cache: DashMap<(Vec<Vec<u8>>, Pubkey), (Pubkey, u8)>,
}

impl AccountDeriver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn derive(
        &self,
        seeds: &[&[u8]],
        program_id: &Pubkey,
    ) -> Result<(Pubkey, u8), DerivationError> {
        let key = (
            seeds.iter().map(|seed| seed.to_vec()).collect::<Vec<_>>(),
            *program_id,
        );
        if let Some(cached) = self.cache.get(&key) {
            return Ok(*cached);
        }
        let derived = derive_address(seeds, program_id)?;
        self.cache.insert(key, derived);
        Ok(derived)
    }

    /// Authority account of a tree, derived from the tree address itself.
    pub fn tree_authority(
        &self,
        merkle_tree: &Pubkey,
        program_id: &Pubkey,
    ) -> Result<(Pubkey, u8), DerivationError> {
        self.derive(&[merkle_tree.as_ref()], program_id)
    }

    /// Escrow account a redeemed leaf parks in until decompression or
    /// cancellation.
    pub fn voucher(
        &self,
        merkle_tree: &Pubkey,
        nonce: u64,
        program_id: &Pubkey,
    ) -> Result<(Pubkey, u8), DerivationError> {
        self.derive(
            &[b"voucher", merkle_tree.as_ref(), &nonce.to_le_bytes()],
            program_id,
        )
    }

    /// Canonical asset identity of the leaf minted under `nonce`.
    pub fn asset_id(
        &self,
        merkle_tree: &Pubkey,
        nonce: u64,
        program_id: &Pubkey,
    ) -> Result<(Pubkey, u8), DerivationError> {
        self.derive(
            &[b"asset", merkle_tree.as_ref(), &nonce.to_le_bytes()],
            program_id,
        )
    }
}
