use std::fmt::{Display, Formatter};
use std::str::FromStr;

use borsh::{BorshDeserialize, BorshSerialize};
use cnft_hasher::{zero_bytes::MAX_HEIGHT, Hasher, Keccak};
use solana_sdk::pubkey::Pubkey;

use crate::errors::OrchestratorError;

/// Leaf schema version the program hashes into every leaf.
const LEAF_SCHEMA_VERSION: u8 = 1;

/// Decodes a base58 pubkey at the building boundary. Everything past this
/// point works with typed addresses only.
pub fn parse_pubkey(value: &str) -> Result<Pubkey, OrchestratorError> {
    Pubkey::from_str(value)
        .map_err(|e| OrchestratorError::InvalidInput(format!("Invalid pubkey `{value}`: {e}")))
}

/// Decodes a base58 32-byte hash at the building boundary.
pub fn parse_hash(value: &str) -> Result<[u8; 32], OrchestratorError> {
    let bytes = bs58::decode(value)
        .into_vec()
        .map_err(|e| OrchestratorError::InvalidInput(format!("Invalid hash `{value}`: {e}")))?;
    bytes.try_into().map_err(|_| {
        OrchestratorError::InvalidInput(format!("Invalid hash `{value}`: expected 32 bytes"))
    })
}

/// Tuple identifying one leaf for the proof-carrying operations.
#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct LeafArgs {
    pub root: [u8; 32],
    pub data_hash: [u8; 32],
    pub creator_hash: [u8; 32],
    pub nonce: u64,
    pub index: u32,
}

impl LeafArgs {
    /// Builds the tuple from form-style string inputs, converting once at
    /// the boundary instead of leaking parse ambiguity downstream.
    pub fn parse(
        root: &str,
        data_hash: &str,
        creator_hash: &str,
        nonce: u64,
        index: u32,
    ) -> Result<Self, OrchestratorError> {
        Ok(Self {
            root: parse_hash(root)?,
            data_hash: parse_hash(data_hash)?,
            creator_hash: parse_hash(creator_hash)?,
            nonce,
            index,
        })
    }
}

#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct Creator {
    pub address: Pubkey,
    pub verified: bool,
    pub share: u8,
}

#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct MetadataArgs {
    pub name: String,
    pub symbol: String,
    pub uri: String,
    pub seller_fee_basis_points: u16,
    pub primary_sale_happened: bool,
    pub is_mutable: bool,
    pub collection: Option<Pubkey>,
    pub creators: Vec<Creator>,
}

impl MetadataArgs {
    /// Hash the program commits into the leaf for this metadata. The
    /// metadata hash is salted with the royalty so marketplaces can prove
    /// the fee without the full metadata.
    pub fn data_hash(&self) -> Result<[u8; 32], OrchestratorError> {
        let serialized = self
            .try_to_vec()
            .map_err(|e| OrchestratorError::InvalidInput(format!("Unencodable metadata: {e}")))?;
        let metadata_hash = Keccak::hash(&serialized).map_err(hash_error)?;
        Keccak::hashv(&[
            &metadata_hash,
            &self.seller_fee_basis_points.to_le_bytes(),
        ])
        .map_err(hash_error)
    }

    pub fn creator_hash(&self) -> Result<[u8; 32], OrchestratorError> {
        let mut bytes = Vec::with_capacity(self.creators.len() * 34);
        for creator in &self.creators {
            bytes.extend_from_slice(creator.address.as_ref());
            bytes.push(creator.verified as u8);
            bytes.push(creator.share);
        }
        Keccak::hash(&bytes).map_err(hash_error)
    }

    fn validate(&self) -> Result<(), OrchestratorError> {
        if self.name.is_empty() || self.name.len() > 32 {
            return Err(OrchestratorError::InvalidInput(
                "Metadata name must be 1..=32 bytes".into(),
            ));
        }
        if self.uri.is_empty() {
            return Err(OrchestratorError::InvalidInput(
                "Metadata uri must not be empty".into(),
            ));
        }
        if !self.creators.is_empty() {
            let share_sum: u32 = self.creators.iter().map(|c| c.share as u32).sum();
            if share_sum != 100 {
                return Err(OrchestratorError::InvalidInput(format!(
                    "Creator shares must sum to 100, got {share_sum}"
                )));
            }
        }
        Ok(())
    }
}

/// Hash of one populated leaf: asset identity, ownership and the metadata
/// commitments, under the leaf schema version byte.
pub fn leaf_hash(
    asset_id: &Pubkey,
    owner: &Pubkey,
    delegate: &Pubkey,
    nonce: u64,
    data_hash: &[u8; 32],
    creator_hash: &[u8; 32],
) -> Result<[u8; 32], OrchestratorError> {
    Keccak::hashv(&[
        &[LEAF_SCHEMA_VERSION],
        asset_id.as_ref(),
        owner.as_ref(),
        delegate.as_ref(),
        &nonce.to_le_bytes(),
        data_hash,
        creator_hash,
    ])
    .map_err(hash_error)
}

fn hash_error(e: cnft_hasher::HasherError) -> OrchestratorError {
    OrchestratorError::InvalidInput(format!("Hashing failed: {e}"))
}

/// The eight state-changing operations, with every field already typed.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Operation {
    CreateTree {
        max_depth: u32,
        max_buffer_size: u32,
        canopy_depth: u32,
    },
    Mint {
        owner: Pubkey,
        delegate: Pubkey,
        metadata: MetadataArgs,
    },
    Transfer {
        owner: Pubkey,
        delegate: Pubkey,
        new_owner: Pubkey,
        leaf: LeafArgs,
    },
    Delegate {
        owner: Pubkey,
        previous_delegate: Pubkey,
        new_delegate: Pubkey,
        leaf: LeafArgs,
    },
    Redeem {
        owner: Pubkey,
        delegate: Pubkey,
        leaf: LeafArgs,
    },
    CancelRedeem {
        owner: Pubkey,
        leaf: LeafArgs,
    },
    Compress {
        owner: Pubkey,
        delegate: Pubkey,
        token_account: Pubkey,
        mint: Pubkey,
    },
    Decompress {
        owner: Pubkey,
        delegate: Pubkey,
        mint: Pubkey,
        leaf: LeafArgs,
    },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OperationKind {
    CreateTree,
    Mint,
    Transfer,
    Delegate,
    Redeem,
    CancelRedeem,
    Compress,
    Decompress,
}

impl Display for OperationKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            OperationKind::CreateTree => "create_tree",
            OperationKind::Mint => "mint",
            OperationKind::Transfer => "transfer",
            OperationKind::Delegate => "delegate",
            OperationKind::Redeem => "redeem",
            OperationKind::CancelRedeem => "cancel_redeem",
            OperationKind::Compress => "compress",
            OperationKind::Decompress => "decompress",
        };
        write!(f, "{name}")
    }
}

impl Operation {
    pub fn kind(&self) -> OperationKind {
        match self {
            Operation::CreateTree { .. } => OperationKind::CreateTree,
            Operation::Mint { .. } => OperationKind::Mint,
            Operation::Transfer { .. } => OperationKind::Transfer,
            Operation::Delegate { .. } => OperationKind::Delegate,
            Operation::Redeem { .. } => OperationKind::Redeem,
            Operation::CancelRedeem { .. } => OperationKind::CancelRedeem,
            Operation::Compress { .. } => OperationKind::Compress,
            Operation::Decompress { .. } => OperationKind::Decompress,
        }
    }

    pub fn leaf(&self) -> Option<&LeafArgs> {
        match self {
            Operation::Transfer { leaf, .. }
            | Operation::Delegate { leaf, .. }
            | Operation::Redeem { leaf, .. }
            | Operation::CancelRedeem { leaf, .. }
            | Operation::Decompress { leaf, .. } => Some(leaf),
            _ => None,
        }
    }

    pub fn leaf_mut(&mut self) -> Option<&mut LeafArgs> {
        match self {
            Operation::Transfer { leaf, .. }
            | Operation::Delegate { leaf, .. }
            | Operation::Redeem { leaf, .. }
            | Operation::CancelRedeem { leaf, .. }
            | Operation::Decompress { leaf, .. } => Some(leaf),
            _ => None,
        }
    }

    pub fn leaf_index(&self) -> Option<u32> {
        self.leaf().map(|leaf| leaf.index)
    }

    /// The owner whose signature the instruction demands, for the
    /// operations acting on an existing leaf or token. CreateTree and
    /// Mint are authorized by the payer alone.
    pub fn required_signer(&self) -> Option<&Pubkey> {
        match self {
            Operation::Transfer { owner, .. }
            | Operation::Delegate { owner, .. }
            | Operation::Redeem { owner, .. }
            | Operation::CancelRedeem { owner, .. }
            | Operation::Compress { owner, .. }
            | Operation::Decompress { owner, .. } => Some(owner),
            Operation::CreateTree { .. } | Operation::Mint { .. } => None,
        }
    }

    /// Whether the instruction carries a Merkle proof as remaining
    /// accounts. Decompress proves against the voucher instead.
    pub fn requires_proof(&self) -> bool {
        matches!(
            self,
            Operation::Transfer { .. }
                | Operation::Delegate { .. }
                | Operation::Redeem { .. }
                | Operation::CancelRedeem { .. }
        )
    }

    /// Local validation, performed before any network call.
    pub fn validate(&self) -> Result<(), OrchestratorError> {
        match self {
            Operation::CreateTree {
                max_depth,
                max_buffer_size,
                canopy_depth,
            } => {
                if *max_depth == 0 || *max_depth as usize > MAX_HEIGHT {
                    return Err(OrchestratorError::InvalidInput(format!(
                        "Tree depth must be 1..={MAX_HEIGHT}, got {max_depth}"
                    )));
                }
                if *max_buffer_size == 0 || !max_buffer_size.is_power_of_two() {
                    return Err(OrchestratorError::InvalidInput(format!(
                        "Buffer size must be a power of two, got {max_buffer_size}"
                    )));
                }
                if canopy_depth >= max_depth {
                    return Err(OrchestratorError::InvalidInput(format!(
                        "Canopy depth {canopy_depth} must be lower than the tree depth"
                    )));
                }
                Ok(())
            }
            Operation::Mint { metadata, .. } => metadata.validate(),
            _ => {
                if let Some(leaf) = self.leaf() {
                    if leaf.index as usize >= (1usize << MAX_HEIGHT) {
                        return Err(OrchestratorError::InvalidInput(format!(
                            "Leaf index {} exceeds the maximum tree capacity",
                            leaf.index
                        )));
                    }
                }
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn metadata() -> MetadataArgs {
        MetadataArgs {
            name: "Compressed".into(),
            symbol: "CMP".into(),
            uri: "https://example.com/0.json".into(),
            seller_fee_basis_points: 500,
            primary_sale_happened: false,
            is_mutable: true,
            collection: None,
            creators: vec![Creator {
                address: Pubkey::new_unique(),
                verified: false,
                share: 100,
            }],
        }
    }

    #[test]
    fn test_parse_rejects_malformed_input() {
        assert!(matches!(
            parse_pubkey("not-a-pubkey"),
            Err(OrchestratorError::InvalidInput(_))
        ));
        assert!(matches!(
            parse_hash("abc"),
            Err(OrchestratorError::InvalidInput(_))
        ));
        // A pubkey-length base58 string is a valid 32-byte hash.
        let key = Pubkey::new_unique();
        assert_eq!(parse_hash(&key.to_string()).unwrap(), key.to_bytes());
    }

    #[test]
    fn test_leaf_args_parse_round_trip() {
        let root = Pubkey::new_unique();
        let data = Pubkey::new_unique();
        let creators = Pubkey::new_unique();
        let leaf = LeafArgs::parse(
            &root.to_string(),
            &data.to_string(),
            &creators.to_string(),
            3,
            3,
        )
        .unwrap();
        assert_eq!(leaf.root, root.to_bytes());
        assert_eq!(leaf.nonce, 3);
    }

    #[test]
    fn test_validate_rejects_bad_creator_shares() {
        let mut bad = metadata();
        bad.creators[0].share = 60;
        let op = Operation::Mint {
            owner: Pubkey::new_unique(),
            delegate: Pubkey::new_unique(),
            metadata: bad,
        };
        assert!(matches!(
            op.validate(),
            Err(OrchestratorError::InvalidInput(_))
        ));
    }

    #[test]
    fn test_validate_create_tree_bounds() {
        let bad_depth = Operation::CreateTree {
            max_depth: 31,
            max_buffer_size: 8,
            canopy_depth: 0,
        };
        assert!(bad_depth.validate().is_err());

        let bad_buffer = Operation::CreateTree {
            max_depth: 14,
            max_buffer_size: 6,
            canopy_depth: 0,
        };
        assert!(bad_buffer.validate().is_err());

        let ok = Operation::CreateTree {
            max_depth: 14,
            max_buffer_size: 64,
            canopy_depth: 5,
        };
        assert!(ok.validate().is_ok());
    }

    #[test]
    fn test_metadata_hashes_are_stable_and_distinct() {
        let m = metadata();
        assert_eq!(m.data_hash().unwrap(), m.data_hash().unwrap());
        assert_eq!(m.creator_hash().unwrap(), m.creator_hash().unwrap());

        let mut other = metadata();
        other.seller_fee_basis_points = 0;
        assert_ne!(m.data_hash().unwrap(), other.data_hash().unwrap());
    }

    #[test]
    fn test_leaf_hash_depends_on_owner() {
        let asset = Pubkey::new_unique();
        let owner = Pubkey::new_unique();
        let new_owner = Pubkey::new_unique();
        let delegate = Pubkey::new_unique();
        let data = [3u8; 32];
        let creators = [4u8; 32];

        let before = leaf_hash(&asset, &owner, &delegate, 0, &data, &creators).unwrap();
        let after = leaf_hash(&asset, &new_owner, &delegate, 0, &data, &creators).unwrap();
        assert_ne!(before, after);
    }
}
