use solana_sdk::{
    hash::Hash,
    pubkey::Pubkey,
    signature::Keypair,
    signer::{Signer, SignerError},
    transaction::Transaction,
};

/// Signing capability handed to the orchestrator. Raw key material stays
/// behind this trait; the orchestrator only ever asks for a signature.
pub trait TransactionSigner: Send + Sync {
    fn pubkey(&self) -> Pubkey;

    fn sign(&self, transaction: &mut Transaction, blockhash: Hash) -> Result<(), SignerError>;
}

pub struct KeypairSigner {
    keypair: Keypair,
}

impl KeypairSigner {
    pub fn new(keypair: Keypair) -> Self {
        Self { keypair }
    }
}

impl TransactionSigner for KeypairSigner {
    fn pubkey(&self) -> Pubkey {
        self.keypair.pubkey()
    }

    fn sign(&self, transaction: &mut Transaction, blockhash: Hash) -> Result<(), SignerError> {
        transaction.try_sign(&[&self.keypair], blockhash)
    }
}
