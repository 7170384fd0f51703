use std::sync::Arc;

use cnft_client::{
    rpc::RemoteTreeState,
    store::{FileTreeStorage, StoreError, TreeStore},
};
use cnft_concurrent_merkle_tree::{ConcurrentMerkleTree, ConcurrentMerkleTreeError};
use cnft_hasher::Keccak;
use solana_sdk::pubkey::Pubkey;
use tempfile::TempDir;

const DEPTH: usize = 6;
const BUFFER: usize = 8;

fn store_at(dir: &TempDir) -> TreeStore {
    let storage = FileTreeStorage::new(dir.path()).unwrap();
    TreeStore::new(Arc::new(storage))
}

fn leaf(value: u8) -> [u8; 32] {
    [value; 32]
}

#[tokio::test]
async fn test_create_rejects_duplicate_tree() {
    let dir = TempDir::new().unwrap();
    let store = store_at(&dir);
    let tree_id = Pubkey::new_unique();

    store.create(tree_id, DEPTH, BUFFER, 0).await.unwrap();
    let err = store.create(tree_id, DEPTH, BUFFER, 0).await.unwrap_err();
    assert!(matches!(err, StoreError::AlreadyExists(id) if id == tree_id));
}

#[tokio::test]
async fn test_snapshot_of_unknown_tree_fails() {
    let dir = TempDir::new().unwrap();
    let store = store_at(&dir);
    let tree_id = Pubkey::new_unique();

    let err = store.snapshot(&tree_id).await.unwrap_err();
    assert!(matches!(err, StoreError::TreeNotFound(id) if id == tree_id));
}

#[tokio::test]
async fn test_writes_survive_restart() {
    let dir = TempDir::new().unwrap();
    let tree_id = Pubkey::new_unique();

    let (root, sequence_number) = {
        let store = store_at(&dir);
        store.create(tree_id, DEPTH, BUFFER, 0).await.unwrap();
        for value in 1..=3u8 {
            store
                .with_exclusive(&tree_id, |tree| tree.append(leaf(value)).map_err(StoreError::from))
                .await
                .unwrap();
        }
        let snapshot = store.snapshot(&tree_id).await.unwrap();
        (snapshot.root(), snapshot.sequence_number())
    };

    // A fresh store over the same directory must resume from the last
    // committed write.
    let reopened = store_at(&dir);
    let snapshot = reopened.snapshot(&tree_id).await.unwrap();
    assert_eq!(snapshot.root(), root);
    assert_eq!(snapshot.sequence_number(), sequence_number);
    assert_eq!(snapshot.rightmost_index(), 3);
    assert_eq!(snapshot.leaf(1).unwrap(), leaf(2));
}

#[tokio::test]
async fn test_failed_mutation_is_not_persisted() {
    let dir = TempDir::new().unwrap();
    let store = store_at(&dir);
    let tree_id = Pubkey::new_unique();
    store.create(tree_id, DEPTH, BUFFER, 0).await.unwrap();
    store
        .with_exclusive(&tree_id, |tree| tree.append(leaf(1)).map_err(StoreError::from))
        .await
        .unwrap();

    let err = store
        .with_exclusive(&tree_id, |tree| tree.set_leaf(100, leaf(9)).map_err(StoreError::from))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        StoreError::Tree(ConcurrentMerkleTreeError::IndexOutOfRange(100))
    ));

    // Neither the in-memory mirror nor the durable record moved.
    let snapshot = store.snapshot(&tree_id).await.unwrap();
    assert_eq!(snapshot.sequence_number(), 1);
    let reopened = store_at(&dir);
    let reloaded = reopened.snapshot(&tree_id).await.unwrap();
    assert_eq!(reloaded.sequence_number(), 1);
}

#[tokio::test]
async fn test_reconcile_is_idempotent_when_current() {
    let dir = TempDir::new().unwrap();
    let store = store_at(&dir);
    let tree_id = Pubkey::new_unique();
    store.create(tree_id, DEPTH, BUFFER, 0).await.unwrap();
    store
        .with_exclusive(&tree_id, |tree| tree.append(leaf(1)).map_err(StoreError::from))
        .await
        .unwrap();

    let snapshot = store.snapshot(&tree_id).await.unwrap();
    let remote = RemoteTreeState {
        root: snapshot.root(),
        sequence_number: snapshot.sequence_number(),
        rightmost_index: snapshot.rightmost_index() as u64,
        changelog_tail: snapshot.changelog().to_vec(),
    };

    assert!(!store.reconcile(&tree_id, &remote).await.unwrap());
    let after = store.snapshot(&tree_id).await.unwrap();
    assert_eq!(after.sequence_number(), snapshot.sequence_number());
    assert_eq!(after.root(), snapshot.root());
}

#[tokio::test]
async fn test_reconcile_applies_missed_writes() {
    let dir = TempDir::new().unwrap();
    let store = store_at(&dir);
    let tree_id = Pubkey::new_unique();
    store.create(tree_id, DEPTH, BUFFER, 0).await.unwrap();
    store
        .with_exclusive(&tree_id, |tree| tree.append(leaf(1)).map_err(StoreError::from))
        .await
        .unwrap();

    // Another writer advanced the same tree by two appends.
    let mut remote_tree = ConcurrentMerkleTree::<Keccak>::new(DEPTH, BUFFER, 0).unwrap();
    remote_tree.append(leaf(1)).unwrap();
    remote_tree.append(leaf(2)).unwrap();
    remote_tree.append(leaf(3)).unwrap();
    let remote = RemoteTreeState {
        root: remote_tree.root(),
        sequence_number: remote_tree.sequence_number(),
        rightmost_index: remote_tree.rightmost_index() as u64,
        changelog_tail: remote_tree.changelog().to_vec(),
    };

    assert!(store.reconcile(&tree_id, &remote).await.unwrap());
    let snapshot = store.snapshot(&tree_id).await.unwrap();
    assert_eq!(snapshot.root(), remote_tree.root());
    assert_eq!(snapshot.sequence_number(), 3);
    assert_eq!(snapshot.rightmost_index(), 3);

    // And the reconciled state is durable.
    let reopened = store_at(&dir);
    assert_eq!(
        reopened.snapshot(&tree_id).await.unwrap().root(),
        remote_tree.root()
    );
}

#[tokio::test]
async fn test_independent_trees_mutate_concurrently() {
    let dir = TempDir::new().unwrap();
    let store = Arc::new(store_at(&dir));
    let tree_a = Pubkey::new_unique();
    let tree_b = Pubkey::new_unique();
    store.create(tree_a, DEPTH, BUFFER, 0).await.unwrap();
    store.create(tree_b, DEPTH, BUFFER, 0).await.unwrap();

    let mut handles = Vec::new();
    for value in 0..8u8 {
        let store = store.clone();
        let target = if value % 2 == 0 { tree_a } else { tree_b };
        handles.push(tokio::spawn(async move {
            store
                .with_exclusive(&target, |tree| tree.append(leaf(value)).map_err(StoreError::from))
                .await
                .unwrap();
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    let a = store.snapshot(&tree_a).await.unwrap();
    let b = store.snapshot(&tree_b).await.unwrap();
    assert_eq!(a.rightmost_index(), 4);
    assert_eq!(b.rightmost_index(), 4);
    assert_eq!(a.sequence_number(), 4);
    assert_eq!(b.sequence_number(), 4);
}

#[tokio::test]
async fn test_archive_removes_tree_from_active_set() {
    let dir = TempDir::new().unwrap();
    let store = store_at(&dir);
    let tree_id = Pubkey::new_unique();
    store.create(tree_id, DEPTH, BUFFER, 0).await.unwrap();

    store.archive(&tree_id).await.unwrap();
    let err = store.snapshot(&tree_id).await.unwrap_err();
    assert!(matches!(err, StoreError::TreeNotFound(_)));

    // The record moved aside instead of being destroyed.
    let archived = dir.path().join("archive").join(format!("{tree_id}.tree"));
    assert!(archived.exists());
}
