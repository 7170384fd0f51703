use std::{
    collections::VecDeque,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};

use async_trait::async_trait;
use cnft_client::{
    accounts::derive_address,
    errors::OrchestratorError,
    operations::leaf_hash,
    rpc::{
        errors::RpcError, ConfirmationStatus, LedgerRpc, RemoteTreeState, SimulationFailure,
        SimulationResult,
    },
    store::{FileTreeStorage, TreeStore},
    Creator, KeypairSigner, LeafArgs, MetadataArgs, Operation, OrchestratorConfig, TxOrchestrator,
    CNFT_PROGRAM_ID,
};
use solana_sdk::{
    hash::Hash, pubkey::Pubkey, signature::Keypair, signature::Signature, signer::Signer,
    transaction::Transaction,
};
use tempfile::TempDir;

const DEPTH: u32 = 6;
const BUFFER: u32 = 8;

/// Ledger double with scriptable failure queues. Every queue is consumed
/// one entry per call; an empty queue means success.
#[derive(Debug, Default)]
struct MockLedger {
    simulate_failures: Mutex<VecDeque<SimulationFailure>>,
    submit_errors: Mutex<VecDeque<RpcError>>,
    confirmations: Mutex<VecDeque<ConfirmationStatus>>,
    remote: Mutex<Option<RemoteTreeState>>,
    blockhash_calls: AtomicUsize,
    simulate_calls: AtomicUsize,
    submit_calls: AtomicUsize,
    remote_calls: AtomicUsize,
}

impl MockLedger {
    fn push_simulation_failure(&self, failure: SimulationFailure) {
        self.simulate_failures.lock().unwrap().push_back(failure);
    }

    fn push_submit_error(&self, error: RpcError) {
        self.submit_errors.lock().unwrap().push_back(error);
    }

    fn push_confirmation(&self, status: ConfirmationStatus) {
        self.confirmations.lock().unwrap().push_back(status);
    }

    fn set_remote(&self, remote: RemoteTreeState) {
        *self.remote.lock().unwrap() = Some(remote);
    }

    fn stale_failure() -> SimulationFailure {
        SimulationFailure {
            code: Some(6004),
            message: "Invalid root recomputed from proof".into(),
        }
    }
}

#[async_trait]
impl LedgerRpc for MockLedger {
    async fn latest_blockhash(&self) -> Result<Hash, RpcError> {
        self.blockhash_calls.fetch_add(1, Ordering::SeqCst);
        Ok(Hash::new_unique())
    }

    async fn simulate(&self, _transaction: &Transaction) -> Result<SimulationResult, RpcError> {
        self.simulate_calls.fetch_add(1, Ordering::SeqCst);
        let err = self.simulate_failures.lock().unwrap().pop_front();
        Ok(SimulationResult {
            err,
            logs: Vec::new(),
        })
    }

    async fn submit(&self, _transaction: &Transaction) -> Result<Signature, RpcError> {
        self.submit_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(error) = self.submit_errors.lock().unwrap().pop_front() {
            return Err(error);
        }
        Ok(Signature::new_unique())
    }

    async fn confirmation(&self, _signature: &Signature) -> Result<ConfirmationStatus, RpcError> {
        Ok(self
            .confirmations
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(ConfirmationStatus::Confirmed))
    }

    async fn remote_tree_state(&self, tree_id: &Pubkey) -> Result<RemoteTreeState, RpcError> {
        self.remote_calls.fetch_add(1, Ordering::SeqCst);
        self.remote
            .lock()
            .unwrap()
            .clone()
            .ok_or_else(|| RpcError::CustomError(format!("Tree account {tree_id} does not exist")))
    }
}

struct Fixture {
    ledger: Arc<MockLedger>,
    store: Arc<TreeStore>,
    orchestrator: TxOrchestrator<MockLedger>,
    tree_id: Pubkey,
    /// Pubkey of the fixture's signing keypair. Owner-authorized
    /// operations must name this key as the owner.
    owner: Pubkey,
    _dir: TempDir,
}

fn fast_config() -> OrchestratorConfig {
    OrchestratorConfig {
        base_delay: Duration::from_millis(1),
        max_delay: Duration::from_millis(5),
        confirmation_poll_interval: Duration::from_millis(1),
        confirmation_timeout: Duration::from_millis(250),
        ..OrchestratorConfig::default()
    }
}

async fn setup_with_config(config: OrchestratorConfig) -> Fixture {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
    let dir = TempDir::new().unwrap();
    let ledger = Arc::new(MockLedger::default());
    let storage = FileTreeStorage::new(dir.path()).unwrap();
    let store = Arc::new(TreeStore::new(Arc::new(storage)));
    let keypair = Keypair::new();
    let owner = keypair.pubkey();
    let signer = Arc::new(KeypairSigner::new(keypair));
    let orchestrator = TxOrchestrator::new(ledger.clone(), store.clone(), signer, config);
    let tree_id = Pubkey::new_unique();

    orchestrator
        .execute(
            tree_id,
            Operation::CreateTree {
                max_depth: DEPTH,
                max_buffer_size: BUFFER,
                canopy_depth: 0,
            },
        )
        .await
        .unwrap();

    Fixture {
        ledger,
        store,
        orchestrator,
        tree_id,
        owner,
        _dir: dir,
    }
}

async fn setup() -> Fixture {
    setup_with_config(fast_config()).await
}

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
            // Fixed so repeated metadata() calls hash identically.
            address: Pubkey::new_from_array([7u8; 32]),
            verified: false,
            share: 100,
        }],
    }
}

fn mint_op(owner: Pubkey) -> Operation {
    Operation::Mint {
        owner,
        delegate: owner,
        metadata: metadata(),
    }
}

fn leaf_args(index: u32) -> LeafArgs {
    let m = metadata();
    LeafArgs {
        // Overwritten from the tree snapshot at build time.
        root: [0u8; 32],
        data_hash: m.data_hash().unwrap(),
        creator_hash: m.creator_hash().unwrap(),
        nonce: index as u64,
        index,
    }
}

async fn remote_head(fixture: &Fixture) -> RemoteTreeState {
    let snapshot = fixture.store.snapshot(&fixture.tree_id).await.unwrap();
    RemoteTreeState {
        root: snapshot.root(),
        sequence_number: snapshot.sequence_number(),
        rightmost_index: snapshot.rightmost_index() as u64,
        changelog_tail: snapshot.changelog().to_vec(),
    }
}

#[tokio::test]
async fn test_create_then_mint_updates_mirror() {
    let fixture = setup().await;
    let owner = Pubkey::new_unique();

    let receipt = fixture
        .orchestrator
        .execute(fixture.tree_id, mint_op(owner))
        .await
        .unwrap();
    assert_eq!(receipt.tree_id, fixture.tree_id);
    assert_eq!(receipt.leaf_index, Some(0));
    assert_eq!(receipt.sequence_number, 1);

    let snapshot = fixture.store.snapshot(&fixture.tree_id).await.unwrap();
    assert_eq!(snapshot.rightmost_index(), 1);

    // The mirrored leaf is the schema hash over the derived asset id.
    let m = metadata();
    let (asset_id, _) =
        derive_address(&[b"asset", fixture.tree_id.as_ref(), &0u64.to_le_bytes()], &CNFT_PROGRAM_ID)
            .unwrap();
    let expected = leaf_hash(
        &asset_id,
        &owner,
        &owner,
        0,
        &m.data_hash().unwrap(),
        &m.creator_hash().unwrap(),
    )
    .unwrap();
    assert_eq!(snapshot.leaf(0).unwrap(), expected);
}

#[tokio::test]
async fn test_transfer_replaces_mirror_leaf() {
    let fixture = setup().await;
    let owner = fixture.owner;
    let new_owner = Pubkey::new_unique();
    fixture
        .orchestrator
        .execute(fixture.tree_id, mint_op(owner))
        .await
        .unwrap();
    let before = fixture
        .store
        .snapshot(&fixture.tree_id)
        .await
        .unwrap()
        .leaf(0)
        .unwrap();

    let leaf = leaf_args(0);
    let receipt = fixture
        .orchestrator
        .execute(
            fixture.tree_id,
            Operation::Transfer {
                owner,
                delegate: owner,
                new_owner,
                leaf: leaf.clone(),
            },
        )
        .await
        .unwrap();
    assert_eq!(receipt.sequence_number, 2);

    let snapshot = fixture.store.snapshot(&fixture.tree_id).await.unwrap();
    let (asset_id, _) =
        derive_address(&[b"asset", fixture.tree_id.as_ref(), &0u64.to_le_bytes()], &CNFT_PROGRAM_ID)
            .unwrap();
    let expected = leaf_hash(
        &asset_id,
        &new_owner,
        &new_owner,
        0,
        &leaf.data_hash,
        &leaf.creator_hash,
    )
    .unwrap();
    assert_eq!(snapshot.leaf(0).unwrap(), expected);
    assert_ne!(snapshot.leaf(0).unwrap(), before);
}

#[tokio::test]
async fn test_rejected_simulation_is_terminal() {
    let fixture = setup().await;
    fixture.ledger.push_simulation_failure(SimulationFailure {
        code: Some(6001),
        message: "custom program error: 0x1771".into(),
    });
    let simulations_before = fixture.ledger.simulate_calls.load(Ordering::SeqCst);
    let submits_before = fixture.ledger.submit_calls.load(Ordering::SeqCst);

    let failed = fixture
        .orchestrator
        .execute(fixture.tree_id, mint_op(Pubkey::new_unique()))
        .await
        .unwrap_err();
    assert!(matches!(
        failed.source,
        OrchestratorError::Rejected {
            code: Some(6001),
            ..
        }
    ));

    // One simulation, no retry, nothing submitted.
    assert_eq!(
        fixture.ledger.simulate_calls.load(Ordering::SeqCst),
        simulations_before + 1
    );
    assert_eq!(
        fixture.ledger.submit_calls.load(Ordering::SeqCst),
        submits_before
    );
}

#[tokio::test]
async fn test_stale_root_reconciles_and_retries() {
    let fixture = setup().await;
    let owner = fixture.owner;
    fixture
        .orchestrator
        .execute(fixture.tree_id, mint_op(owner))
        .await
        .unwrap();

    fixture.ledger.set_remote(remote_head(&fixture).await);
    fixture
        .ledger
        .push_simulation_failure(MockLedger::stale_failure());
    let simulations_before = fixture.ledger.simulate_calls.load(Ordering::SeqCst);

    let receipt = fixture
        .orchestrator
        .execute(
            fixture.tree_id,
            Operation::Transfer {
                owner,
                delegate: owner,
                new_owner: Pubkey::new_unique(),
                leaf: leaf_args(0),
            },
        )
        .await
        .unwrap();
    assert_eq!(receipt.sequence_number, 2);

    assert_eq!(
        fixture.ledger.simulate_calls.load(Ordering::SeqCst),
        simulations_before + 2
    );
    assert_eq!(fixture.ledger.remote_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_retry_budget_exhausts_on_persistent_staleness() {
    let mut config = fast_config();
    config.max_retries = 2;
    let fixture = setup_with_config(config).await;
    let owner = fixture.owner;
    fixture
        .orchestrator
        .execute(fixture.tree_id, mint_op(owner))
        .await
        .unwrap();

    fixture.ledger.set_remote(remote_head(&fixture).await);
    for _ in 0..4 {
        fixture
            .ledger
            .push_simulation_failure(MockLedger::stale_failure());
    }

    let failed = fixture
        .orchestrator
        .execute(
            fixture.tree_id,
            Operation::Transfer {
                owner,
                delegate: owner,
                new_owner: Pubkey::new_unique(),
                leaf: leaf_args(0),
            },
        )
        .await
        .unwrap_err();
    match failed.source {
        OrchestratorError::RetryExhausted { attempts, last } => {
            assert_eq!(attempts, 3);
            assert!(matches!(*last, OrchestratorError::StaleRoot));
        }
        other => panic!("expected RetryExhausted, got {other}"),
    }
}

#[tokio::test]
async fn test_expired_submission_rebuilds_with_fresh_blockhash() {
    let fixture = setup().await;
    fixture
        .ledger
        .push_submit_error(RpcError::CustomError("Blockhash not found".into()));
    let blockhashes_before = fixture.ledger.blockhash_calls.load(Ordering::SeqCst);
    let submits_before = fixture.ledger.submit_calls.load(Ordering::SeqCst);

    fixture
        .orchestrator
        .execute(fixture.tree_id, mint_op(Pubkey::new_unique()))
        .await
        .unwrap();

    // The second attempt fetched its own blockhash rather than reusing
    // the expired one.
    assert_eq!(
        fixture.ledger.blockhash_calls.load(Ordering::SeqCst),
        blockhashes_before + 2
    );
    assert_eq!(
        fixture.ledger.submit_calls.load(Ordering::SeqCst),
        submits_before + 2
    );
}

#[tokio::test]
async fn test_invalid_input_never_reaches_network() {
    let fixture = setup().await;
    let mut bad_metadata = metadata();
    bad_metadata.creators[0].share = 60;
    let blockhashes_before = fixture.ledger.blockhash_calls.load(Ordering::SeqCst);

    let failed = fixture
        .orchestrator
        .execute(
            fixture.tree_id,
            Operation::Mint {
                owner: Pubkey::new_unique(),
                delegate: Pubkey::new_unique(),
                metadata: bad_metadata,
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(failed.source, OrchestratorError::InvalidInput(_)));
    assert_eq!(
        fixture.ledger.blockhash_calls.load(Ordering::SeqCst),
        blockhashes_before
    );
}

#[tokio::test]
async fn test_failed_confirmation_with_stale_marker_retries() {
    let fixture = setup().await;
    let owner = fixture.owner;
    fixture
        .orchestrator
        .execute(fixture.tree_id, mint_op(owner))
        .await
        .unwrap();

    fixture.ledger.set_remote(remote_head(&fixture).await);
    fixture
        .ledger
        .push_confirmation(ConfirmationStatus::Failed("Invalid root for leaf".into()));

    let receipt = fixture
        .orchestrator
        .execute(
            fixture.tree_id,
            Operation::Transfer {
                owner,
                delegate: owner,
                new_owner: Pubkey::new_unique(),
                leaf: leaf_args(0),
            },
        )
        .await
        .unwrap();
    assert_eq!(receipt.sequence_number, 2);
    assert_eq!(fixture.ledger.remote_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_pending_confirmation_polls_until_confirmed() {
    let fixture = setup().await;
    fixture.ledger.push_confirmation(ConfirmationStatus::Pending);
    fixture.ledger.push_confirmation(ConfirmationStatus::Pending);

    let receipt = fixture
        .orchestrator
        .execute(fixture.tree_id, mint_op(Pubkey::new_unique()))
        .await
        .unwrap();
    assert_eq!(receipt.leaf_index, Some(0));
}

#[tokio::test]
async fn test_execute_with_timeout_reports_timeout() {
    let fixture = setup().await;
    for _ in 0..10_000 {
        fixture.ledger.push_confirmation(ConfirmationStatus::Pending);
    }

    let failed = fixture
        .orchestrator
        .execute_with_timeout(
            fixture.tree_id,
            mint_op(Pubkey::new_unique()),
            Duration::from_millis(20),
        )
        .await
        .unwrap_err();
    assert!(matches!(failed.source, OrchestratorError::Timeout));
}

#[tokio::test]
async fn test_redeem_then_cancel_restores_leaf() {
    let fixture = setup().await;
    let owner = fixture.owner;
    fixture
        .orchestrator
        .execute(fixture.tree_id, mint_op(owner))
        .await
        .unwrap();

    let leaf = leaf_args(0);
    fixture
        .orchestrator
        .execute(
            fixture.tree_id,
            Operation::Redeem {
                owner,
                delegate: owner,
                leaf: leaf.clone(),
            },
        )
        .await
        .unwrap();
    let snapshot = fixture.store.snapshot(&fixture.tree_id).await.unwrap();
    assert_eq!(snapshot.leaf(0).unwrap(), [0u8; 32]);

    fixture
        .orchestrator
        .execute(
            fixture.tree_id,
            Operation::CancelRedeem {
                owner,
                leaf: leaf.clone(),
            },
        )
        .await
        .unwrap();
    let snapshot = fixture.store.snapshot(&fixture.tree_id).await.unwrap();
    let (asset_id, _) =
        derive_address(&[b"asset", fixture.tree_id.as_ref(), &0u64.to_le_bytes()], &CNFT_PROGRAM_ID)
            .unwrap();
    let expected = leaf_hash(
        &asset_id,
        &owner,
        &owner,
        0,
        &leaf.data_hash,
        &leaf.creator_hash,
    )
    .unwrap();
    assert_eq!(snapshot.leaf(0).unwrap(), expected);
}

#[tokio::test]
async fn test_foreign_owner_is_rejected_before_network() {
    let fixture = setup().await;
    fixture
        .orchestrator
        .execute(fixture.tree_id, mint_op(fixture.owner))
        .await
        .unwrap();
    let blockhashes_before = fixture.ledger.blockhash_calls.load(Ordering::SeqCst);

    // The orchestrator signs with a single keypair; an operation naming
    // any other owner could never carry a valid owner signature.
    let failed = fixture
        .orchestrator
        .execute(
            fixture.tree_id,
            Operation::Transfer {
                owner: Pubkey::new_unique(),
                delegate: fixture.owner,
                new_owner: Pubkey::new_unique(),
                leaf: leaf_args(0),
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(failed.source, OrchestratorError::InvalidInput(_)));

    // Rejected at validation, without fetching a blockhash or retrying.
    assert_eq!(
        fixture.ledger.blockhash_calls.load(Ordering::SeqCst),
        blockhashes_before
    );

    // The same operation naming the signing key goes through.
    fixture
        .orchestrator
        .execute(
            fixture.tree_id,
            Operation::Transfer {
                owner: fixture.owner,
                delegate: fixture.owner,
                new_owner: Pubkey::new_unique(),
                leaf: leaf_args(0),
            },
        )
        .await
        .unwrap();
}

#[tokio::test]
async fn test_concurrent_mints_take_distinct_nonces() {
    let fixture = setup().await;
    let owner = fixture.owner;

    let (first, second) = tokio::join!(
        fixture.orchestrator.execute(fixture.tree_id, mint_op(owner)),
        fixture.orchestrator.execute(fixture.tree_id, mint_op(owner)),
    );
    let mut indexes = vec![
        first.unwrap().leaf_index.unwrap(),
        second.unwrap().leaf_index.unwrap(),
    ];
    indexes.sort_unstable();
    assert_eq!(indexes, vec![0, 1]);

    // Each leaf hashes over the asset id derived from its own index, so
    // neither mint reused the other's nonce.
    let m = metadata();
    let snapshot = fixture.store.snapshot(&fixture.tree_id).await.unwrap();
    for index in 0..2u64 {
        let (asset_id, _) = derive_address(
            &[b"asset", fixture.tree_id.as_ref(), &index.to_le_bytes()],
            &CNFT_PROGRAM_ID,
        )
        .unwrap();
        let expected = leaf_hash(
            &asset_id,
            &owner,
            &owner,
            index,
            &m.data_hash().unwrap(),
            &m.creator_hash().unwrap(),
        )
        .unwrap();
        assert_eq!(snapshot.leaf(index as usize).unwrap(), expected);
    }
}
