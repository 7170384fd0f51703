use borsh::BorshSerialize;
use sha2::{Digest, Sha256};
use solana_sdk::{
    instruction::{AccountMeta, Instruction},
    pubkey::Pubkey,
    system_program,
};

use crate::{
    accounts::AccountDeriver,
    errors::OrchestratorError,
    operations::{LeafArgs, MetadataArgs, Operation},
    ACCOUNT_COMPRESSION_PROGRAM_ID, NOOP_PROGRAM_ID,
};

/// First eight bytes of `sha256("global:<name>")`, the dispatch tag the
/// program matches instruction data against.
pub fn discriminator(name: &str) -> [u8; 8] {
    let digest = Sha256::digest(format!("global:{name}").as_bytes());
    let mut tag = [0u8; 8];
    tag.copy_from_slice(&digest[..8]);
    tag
}

#[derive(BorshSerialize)]
struct CreateTreeArgs {
    max_depth: u32,
    max_buffer_size: u32,
}

#[derive(BorshSerialize)]
struct MintArgs {
    message: MetadataArgs,
}

#[derive(BorshSerialize)]
struct LeafOpArgs {
    root: [u8; 32],
    data_hash: [u8; 32],
    creator_hash: [u8; 32],
    nonce: u64,
    index: u32,
}

impl From<&LeafArgs> for LeafOpArgs {
    fn from(leaf: &LeafArgs) -> Self {
        Self {
            root: leaf.root,
            data_hash: leaf.data_hash,
            creator_hash: leaf.creator_hash,
            nonce: leaf.nonce,
            index: leaf.index,
        }
    }
}

#[derive(BorshSerialize)]
struct CancelRedeemArgs {
    root: [u8; 32],
}

#[derive(BorshSerialize)]
struct CompressArgs {}

fn encode(name: &str, args: impl BorshSerialize) -> Result<Vec<u8>, OrchestratorError> {
    let mut data = discriminator(name).to_vec();
    args.serialize(&mut data)
        .map_err(|e| OrchestratorError::InvalidInput(format!("Unencodable arguments: {e}")))?;
    Ok(data)
}

/// Assembles the on-chain instruction for one operation. Stateless apart
/// from the derivation cache; the proof is whatever the caller generated
/// from its tree snapshot, already truncated for the canopy.
pub struct InstructionBuilder<'a> {
    deriver: &'a AccountDeriver,
    program_id: Pubkey,
    payer: Pubkey,
}

impl<'a> InstructionBuilder<'a> {
    pub fn new(deriver: &'a AccountDeriver, program_id: Pubkey, payer: Pubkey) -> Self {
        Self {
            deriver,
            program_id,
            payer,
        }
    }

    pub fn build(
        &self,
        tree_id: &Pubkey,
        operation: &Operation,
        proof: &[[u8; 32]],
    ) -> Result<Instruction, OrchestratorError> {
        let (tree_authority, _) = self.deriver.tree_authority(tree_id, &self.program_id)?;

        let (data, mut accounts) = match operation {
            Operation::CreateTree {
                max_depth,
                max_buffer_size,
                ..
            } => (
                encode(
                    "create_tree",
                    CreateTreeArgs {
                        max_depth: *max_depth,
                        max_buffer_size: *max_buffer_size,
                    },
                )?,
                vec![
                    AccountMeta::new(tree_authority, false),
                    AccountMeta::new(*tree_id, false),
                    AccountMeta::new(self.payer, true),
                ],
            ),
            Operation::Mint {
                owner,
                delegate,
                metadata,
            } => (
                encode(
                    "mint_v1",
                    MintArgs {
                        message: metadata.clone(),
                    },
                )?,
                vec![
                    AccountMeta::new(tree_authority, false),
                    AccountMeta::new_readonly(*owner, false),
                    AccountMeta::new_readonly(*delegate, false),
                    AccountMeta::new(*tree_id, false),
                    AccountMeta::new(self.payer, true),
                ],
            ),
            Operation::Transfer {
                owner,
                delegate,
                new_owner,
                leaf,
            } => (
                encode("transfer", LeafOpArgs::from(leaf))?,
                vec![
                    AccountMeta::new_readonly(tree_authority, false),
                    AccountMeta::new_readonly(*owner, true),
                    AccountMeta::new_readonly(*delegate, false),
                    AccountMeta::new_readonly(*new_owner, false),
                    AccountMeta::new(*tree_id, false),
                ],
            ),
            Operation::Delegate {
                owner,
                previous_delegate,
                new_delegate,
                leaf,
            } => (
                encode("delegate", LeafOpArgs::from(leaf))?,
                vec![
                    AccountMeta::new_readonly(tree_authority, false),
                    AccountMeta::new_readonly(*owner, true),
                    AccountMeta::new_readonly(*previous_delegate, false),
                    AccountMeta::new_readonly(*new_delegate, false),
                    AccountMeta::new(*tree_id, false),
                ],
            ),
            Operation::Redeem {
                owner,
                delegate,
                leaf,
            } => {
                let (voucher, _) = self.deriver.voucher(tree_id, leaf.nonce, &self.program_id)?;
                (
                    encode("redeem", LeafOpArgs::from(leaf))?,
                    vec![
                        AccountMeta::new_readonly(tree_authority, false),
                        AccountMeta::new(*owner, true),
                        AccountMeta::new_readonly(*delegate, false),
                        AccountMeta::new(*tree_id, false),
                        AccountMeta::new(voucher, false),
                    ],
                )
            }
            Operation::CancelRedeem { owner, leaf } => {
                let (voucher, _) = self.deriver.voucher(tree_id, leaf.nonce, &self.program_id)?;
                (
                    encode("cancel_redeem", CancelRedeemArgs { root: leaf.root })?,
                    vec![
                        AccountMeta::new_readonly(tree_authority, false),
                        AccountMeta::new(*owner, true),
                        AccountMeta::new(*tree_id, false),
                        AccountMeta::new(voucher, false),
                    ],
                )
            }
            Operation::Compress {
                owner,
                delegate,
                token_account,
                mint,
            } => (
                encode("compress", CompressArgs {})?,
                vec![
                    AccountMeta::new_readonly(tree_authority, false),
                    AccountMeta::new_readonly(*owner, true),
                    AccountMeta::new_readonly(*delegate, false),
                    AccountMeta::new(*tree_id, false),
                    AccountMeta::new(*token_account, false),
                    AccountMeta::new(*mint, false),
                    AccountMeta::new(self.payer, true),
                ],
            ),
            Operation::Decompress {
                owner,
                delegate,
                mint,
                leaf,
            } => {
                let (voucher, _) = self.deriver.voucher(tree_id, leaf.nonce, &self.program_id)?;
                (
                    encode("decompress_v1", LeafOpArgs::from(leaf))?,
                    vec![
                        AccountMeta::new(voucher, false),
                        AccountMeta::new(*owner, true),
                        AccountMeta::new_readonly(*delegate, false),
                        AccountMeta::new(*mint, false),
                    ],
                )
            }
        };

        accounts.push(AccountMeta::new_readonly(NOOP_PROGRAM_ID, false));
        accounts.push(AccountMeta::new_readonly(ACCOUNT_COMPRESSION_PROGRAM_ID, false));
        accounts.push(AccountMeta::new_readonly(system_program::id(), false));

        // Proof nodes travel as trailing readonly accounts so the program
        // can walk them without copying into instruction data.
        for node in proof {
            accounts.push(AccountMeta::new_readonly(
                Pubkey::new_from_array(*node),
                false,
            ));
        }

        Ok(Instruction {
            program_id: self.program_id,
            accounts,
            data,
        })
    }
}
