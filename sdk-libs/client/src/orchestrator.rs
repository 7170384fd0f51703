use std::{sync::Arc, time::Duration};

use cnft_concurrent_merkle_tree::EMPTY_LEAF;
use solana_sdk::{pubkey::Pubkey, signature::Signature, transaction::Transaction};
use tokio::time::{sleep, timeout, Instant};
use tracing::{debug, info, warn};

use crate::{
    accounts::AccountDeriver,
    errors::{FailedOperation, OrchestratorError},
    instructions::InstructionBuilder,
    operations::{leaf_hash, Operation},
    rpc::{ConfirmationStatus, LedgerRpc, SimulationFailure},
    signer::TransactionSigner,
    store::TreeStore,
    CNFT_PROGRAM_ID,
};

#[derive(Clone, Debug)]
pub struct OrchestratorConfig {
    pub program_id: Pubkey,
    /// Additional attempts after the first, spent only on staleness,
    /// expiry and transient transport failures.
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub confirmation_poll_interval: Duration,
    pub confirmation_timeout: Duration,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            program_id: CNFT_PROGRAM_ID,
            max_retries: 5,
            base_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(10),
            confirmation_poll_interval: Duration::from_millis(500),
            confirmation_timeout: Duration::from_secs(60),
        }
    }
}

/// Proof that an operation reached its terminal confirmed state.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OperationReceipt {
    pub signature: Signature,
    pub tree_id: Pubkey,
    /// Local mirror sequence number after the operation's write, or the
    /// current one for operations that leave the tree untouched.
    pub sequence_number: u64,
    pub leaf_index: Option<u32>,
}

/// Drives one operation through build, simulate, submit and confirm, and
/// folds the confirmed write into the local tree mirror. Staleness is
/// recovered by reconciling against the remote head and rebuilding the
/// proof; expiry by rebuilding under a fresh blockhash. Everything else
/// fails fast.
pub struct TxOrchestrator<L: LedgerRpc> {
    rpc: Arc<L>,
    store: Arc<TreeStore>,
    signer: Arc<dyn TransactionSigner>,
    deriver: AccountDeriver,
    config: OrchestratorConfig,
}

impl<L: LedgerRpc> TxOrchestrator<L> {
    pub fn new(
        rpc: Arc<L>,
        store: Arc<TreeStore>,
        signer: Arc<dyn TransactionSigner>,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            rpc,
            store,
            signer,
            deriver: AccountDeriver::new(),
            config,
        }
    }

    pub fn store(&self) -> &Arc<TreeStore> {
        &self.store
    }

    /// Runs the operation to a terminal state. Retryable failures consume
    /// the bounded budget; terminal ones surface immediately with the
    /// operation context attached.
    pub async fn execute(
        &self,
        tree_id: Pubkey,
        operation: Operation,
    ) -> Result<OperationReceipt, FailedOperation> {
        let kind = operation.kind();
        let leaf_index = operation.leaf_index();
        self.execute_inner(tree_id, operation)
            .await
            .map_err(|source| FailedOperation {
                kind,
                tree_id,
                leaf_index,
                source,
            })
    }

    /// [`execute`](Self::execute) under a caller-imposed wall-clock bound.
    pub async fn execute_with_timeout(
        &self,
        tree_id: Pubkey,
        operation: Operation,
        deadline: Duration,
    ) -> Result<OperationReceipt, FailedOperation> {
        let kind = operation.kind();
        let leaf_index = operation.leaf_index();
        match timeout(deadline, self.execute(tree_id, operation)).await {
            Ok(result) => result,
            Err(_) => Err(FailedOperation {
                kind,
                tree_id,
                leaf_index,
                source: OrchestratorError::Timeout,
            }),
        }
    }

    async fn execute_inner(
        &self,
        tree_id: Pubkey,
        operation: Operation,
    ) -> Result<OperationReceipt, OrchestratorError> {
        // Local validation never consumes a retry attempt.
        operation.validate()?;
        // The orchestrator holds a single signing key; operations whose
        // instruction requires the owner's signature can only be executed
        // for leaves this key owns.
        if let Some(owner) = operation.required_signer() {
            let signer = self.signer.pubkey();
            if *owner != signer {
                return Err(OrchestratorError::InvalidInput(format!(
                    "Owner {owner} does not match the signing key {signer}"
                )));
            }
        }

        let mut attempts = 0u32;
        loop {
            match self.attempt(&tree_id, &operation).await {
                Ok(receipt) => {
                    info!(
                        kind = %operation.kind(),
                        %tree_id,
                        signature = %receipt.signature,
                        sequence_number = receipt.sequence_number,
                        "operation confirmed"
                    );
                    return Ok(receipt);
                }
                Err(err) if Self::is_retryable(&err) => {
                    attempts += 1;
                    if attempts > self.config.max_retries {
                        return Err(OrchestratorError::RetryExhausted {
                            attempts,
                            last: Box::new(err),
                        });
                    }
                    if matches!(err, OrchestratorError::StaleRoot) {
                        self.reconcile(&tree_id).await?;
                    }
                    let delay = self.backoff_delay(attempts - 1);
                    warn!(
                        kind = %operation.kind(),
                        %tree_id,
                        attempt = attempts,
                        max_retries = self.config.max_retries,
                        ?delay,
                        "retrying after {err}"
                    );
                    sleep(delay).await;
                }
                Err(err) => return Err(err),
            }
        }
    }

    fn is_retryable(err: &OrchestratorError) -> bool {
        match err {
            OrchestratorError::StaleRoot | OrchestratorError::Expired => true,
            OrchestratorError::Network(rpc_err) => rpc_err.is_transient(),
            _ => false,
        }
    }

    fn backoff_delay(&self, attempt: u32) -> Duration {
        let factor = 1u32 << attempt.min(16);
        self.config
            .base_delay
            .saturating_mul(factor)
            .min(self.config.max_delay)
    }

    async fn reconcile(&self, tree_id: &Pubkey) -> Result<(), OrchestratorError> {
        let remote = self.rpc.remote_tree_state(tree_id).await?;
        let changed = self.store.reconcile(tree_id, &remote).await?;
        debug!(%tree_id, changed, "reconciled before retry");
        Ok(())
    }

    async fn attempt(
        &self,
        tree_id: &Pubkey,
        operation: &Operation,
    ) -> Result<OperationReceipt, OrchestratorError> {
        // The proof and the root the instruction claims both come from one
        // snapshot, so they cannot disagree with each other.
        let mut operation = operation.clone();
        let mut proof = Vec::new();
        if !matches!(operation, Operation::CreateTree { .. }) {
            let snapshot = self.store.snapshot(tree_id).await?;
            if let Some(leaf) = operation.leaf_mut() {
                leaf.root = snapshot.root();
            }
            if operation.requires_proof() {
                let index = operation
                    .leaf_index()
                    .ok_or_else(|| {
                        OrchestratorError::InvalidInput("Operation names no leaf".into())
                    })?;
                proof = snapshot.proof(index as usize)?;
            }
        }

        let payer = self.signer.pubkey();
        let builder = InstructionBuilder::new(&self.deriver, self.config.program_id, payer);
        let instruction = builder.build(tree_id, &operation, &proof)?;

        let blockhash = self.rpc.latest_blockhash().await?;
        let mut transaction = Transaction::new_with_payer(&[instruction], Some(&payer));
        self.signer
            .sign(&mut transaction, blockhash)
            .map_err(|e| OrchestratorError::Signer(e.to_string()))?;

        let simulation = self.rpc.simulate(&transaction).await?;
        if let Some(failure) = simulation.err {
            if failure.is_stale_root() {
                return Err(OrchestratorError::StaleRoot);
            }
            return Err(OrchestratorError::Rejected {
                code: failure.code,
                message: failure.message,
            });
        }

        let signature = self.rpc.submit(&transaction).await.map_err(|e| {
            if e.is_blockhash_expired() {
                OrchestratorError::Expired
            } else {
                OrchestratorError::Network(e)
            }
        })?;
        debug!(%tree_id, %signature, "submitted");

        self.await_confirmation(&signature).await?;
        self.apply_confirmed(tree_id, &operation, signature).await
    }

    async fn await_confirmation(&self, signature: &Signature) -> Result<(), OrchestratorError> {
        let deadline = Instant::now() + self.config.confirmation_timeout;
        loop {
            match self.rpc.confirmation(signature).await? {
                ConfirmationStatus::Confirmed => return Ok(()),
                ConfirmationStatus::Failed(message) => {
                    // A write that landed between simulation and execution
                    // can invalidate the proof on chain.
                    let failure = SimulationFailure {
                        code: None,
                        message,
                    };
                    if failure.is_stale_root() {
                        return Err(OrchestratorError::StaleRoot);
                    }
                    return Err(OrchestratorError::Rejected {
                        code: None,
                        message: failure.message,
                    });
                }
                ConfirmationStatus::Pending => {
                    if Instant::now() >= deadline {
                        // The blockhash window has lapsed by now; rebuild
                        // and resubmit rather than poll a dead signature.
                        return Err(OrchestratorError::Expired);
                    }
                    sleep(self.config.confirmation_poll_interval).await;
                }
            }
        }
    }

    /// Folds the confirmed write into the local mirror and persists it.
    /// Runs under the tree's exclusive lock.
    async fn apply_confirmed(
        &self,
        tree_id: &Pubkey,
        operation: &Operation,
        signature: Signature,
    ) -> Result<OperationReceipt, OrchestratorError> {
        let program_id = self.config.program_id;
        match operation {
            Operation::CreateTree {
                max_depth,
                max_buffer_size,
                canopy_depth,
            } => {
                self.store
                    .create(
                        *tree_id,
                        *max_depth as usize,
                        *max_buffer_size as usize,
                        *canopy_depth as usize,
                    )
                    .await?;
                Ok(OperationReceipt {
                    signature,
                    tree_id: *tree_id,
                    sequence_number: 0,
                    leaf_index: None,
                })
            }
            Operation::Mint {
                owner,
                delegate,
                metadata,
            } => {
                let data_hash = metadata.data_hash()?;
                let creator_hash = metadata.creator_hash()?;
                // The nonce is the index the append lands on, so the asset
                // id must be derived under the same lock; a snapshot taken
                // earlier can race another mint on the same tree.
                let deriver = &self.deriver;
                let (index, sequence_number) = self
                    .store
                    .with_exclusive(tree_id, |tree| {
                        let nonce = tree.rightmost_index() as u64;
                        let (asset_id, _) = deriver.asset_id(tree_id, nonce, &program_id)?;
                        let leaf = leaf_hash(
                            &asset_id, owner, delegate, nonce, &data_hash, &creator_hash,
                        )?;
                        let index = tree.append(leaf).map_err(OrchestratorError::Tree)?;
                        Ok::<_, OrchestratorError>((index, tree.sequence_number()))
                    })
                    .await?;
                Ok(OperationReceipt {
                    signature,
                    tree_id: *tree_id,
                    sequence_number,
                    leaf_index: Some(index as u32),
                })
            }
            Operation::Transfer {
                new_owner, leaf, ..
            } => {
                let (asset_id, _) = self.deriver.asset_id(tree_id, leaf.nonce, &program_id)?;
                // Transfer resets the delegate to the new owner.
                let new_leaf = leaf_hash(
                    &asset_id,
                    new_owner,
                    new_owner,
                    leaf.nonce,
                    &leaf.data_hash,
                    &leaf.creator_hash,
                )?;
                self.replace_leaf(tree_id, leaf.index, new_leaf, signature)
                    .await
            }
            Operation::Delegate {
                owner,
                new_delegate,
                leaf,
                ..
            } => {
                let (asset_id, _) = self.deriver.asset_id(tree_id, leaf.nonce, &program_id)?;
                let new_leaf = leaf_hash(
                    &asset_id,
                    owner,
                    new_delegate,
                    leaf.nonce,
                    &leaf.data_hash,
                    &leaf.creator_hash,
                )?;
                self.replace_leaf(tree_id, leaf.index, new_leaf, signature)
                    .await
            }
            Operation::Redeem { leaf, .. } => {
                // The leaf parks in the voucher; the tree slot zeroes out.
                self.replace_leaf(tree_id, leaf.index, EMPTY_LEAF, signature)
                    .await
            }
            Operation::CancelRedeem { owner, leaf } => {
                let (asset_id, _) = self.deriver.asset_id(tree_id, leaf.nonce, &program_id)?;
                let restored = leaf_hash(
                    &asset_id,
                    owner,
                    owner,
                    leaf.nonce,
                    &leaf.data_hash,
                    &leaf.creator_hash,
                )?;
                self.replace_leaf(tree_id, leaf.index, restored, signature)
                    .await
            }
            // Neither touches the tree: compress burns the token into a
            // fresh mint, decompress consumes the voucher left by redeem.
            Operation::Compress { .. } | Operation::Decompress { .. } => {
                let snapshot = self.store.snapshot(tree_id).await?;
                Ok(OperationReceipt {
                    signature,
                    tree_id: *tree_id,
                    sequence_number: snapshot.sequence_number(),
                    leaf_index: operation.leaf_index(),
                })
            }
        }
    }

    async fn replace_leaf(
        &self,
        tree_id: &Pubkey,
        index: u32,
        new_leaf: [u8; 32],
        signature: Signature,
    ) -> Result<OperationReceipt, OrchestratorError> {
        let sequence_number = self
            .store
            .with_exclusive(tree_id, |tree| {
                tree.set_leaf(index as usize, new_leaf)
                    .map_err(OrchestratorError::Tree)?;
                Ok::<_, OrchestratorError>(tree.sequence_number())
            })
            .await?;
        Ok(OperationReceipt {
            signature,
            tree_id: *tree_id,
            sequence_number,
            leaf_index: Some(index),
        })
    }
}
