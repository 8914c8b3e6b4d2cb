//! Batch operations, writes and transactions through the generic engine

mod common;

use std::sync::Arc;

use blobkit::storage::dictionary::DictionaryAdapter;
use blobkit::storage::local::LocalAdapter;
use blobkit::storage::memory::InMemoryAdapter;
use blobkit::{AppendSupport, Blob, BlobStorage, ErrorKind, ListOptions, TransactionState};
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

use common::{paths, recording_storage, seed, RecordingAdapter};

fn memory_storage() -> BlobStorage {
    BlobStorage::new(Arc::new(InMemoryAdapter::new()))
}

#[tokio::test]
async fn test_batch_results_follow_input_order() {
    let storage = memory_storage();
    let cancel = CancellationToken::new();
    seed(&storage, &[("/a/x.txt", 10), ("/a/b/y.txt", 20)]).await;

    let input = ["/a/x.txt", "/missing", "a/x.txt", "/a/b"];
    let exists = storage.exists(input, &cancel).await.unwrap();
    assert_eq!(exists, vec![true, false, true, true]);

    let blobs = storage.get_blobs(input, &cancel).await.unwrap();
    assert_eq!(blobs.len(), input.len());
    assert_eq!(blobs[0].as_ref().unwrap().size, Some(10));
    assert!(blobs[1].is_none());
    assert_eq!(blobs[2], blobs[0]);
    assert!(blobs[3].as_ref().unwrap().is_folder());

    assert!(storage.exists(Vec::<String>::new(), &cancel).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_batch_rejects_invalid_path_before_dispatch() {
    let storage = memory_storage();
    let cancel = CancellationToken::new();

    let err = storage.exists(["/a", "/"], &cancel).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::BadRequest);

    let err = storage.delete(["  "], &cancel).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::BadRequest);
}

#[tokio::test]
async fn test_delete_is_idempotent_and_cascades() {
    let storage = memory_storage();
    let cancel = CancellationToken::new();
    seed(&storage, &[("/a/x.txt", 1), ("/a/b/y.txt", 1), ("/keep.txt", 1)]).await;

    storage.delete(["/a/x.txt"], &cancel).await.unwrap();
    storage.delete(["/a/x.txt"], &cancel).await.unwrap();

    assert_eq!(storage.exists(["/never/was"], &cancel).await.unwrap(), vec![false]);
    storage.delete(["/never/was"], &cancel).await.unwrap();
    assert_eq!(storage.exists(["/never/was"], &cancel).await.unwrap(), vec![false]);

    storage.delete(["/a"], &cancel).await.unwrap();
    assert_eq!(
        storage.exists(["/a", "/a/b/y.txt", "/keep.txt"], &cancel).await.unwrap(),
        vec![false, false, true]
    );

    let all = storage
        .list(ListOptions::new().recurse(true), &cancel)
        .await
        .unwrap();
    assert_eq!(paths(&all), vec!["/keep.txt"]);
}

#[tokio::test]
async fn test_batch_runs_every_item_and_reports_first_failure() {
    let (storage, adapter) = recording_storage(
        RecordingAdapter::new()
            .with_failing("/bad1")
            .with_failing("/bad2"),
    );
    let cancel = CancellationToken::new();
    seed(&storage, &[("/a.txt", 1), ("/d.txt", 1)]).await;

    let input = ["/a.txt", "/bad1", "/d.txt", "/bad2"];
    let err = storage.delete(input, &cancel).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Unknown);
    assert!(err.to_string().contains("/bad1"));
    assert!(!err.to_string().contains("/bad2"));
    assert_eq!(adapter.touched(), vec!["/a.txt", "/bad1", "/bad2", "/d.txt"]);

    adapter.reset();
    let err = storage.exists(input, &cancel).await.unwrap_err();
    assert!(err.to_string().contains("/bad1"));
    assert!(!err.to_string().contains("/bad2"));
    assert_eq!(adapter.touched(), vec!["/a.txt", "/bad1", "/bad2", "/d.txt"]);

    assert_eq!(
        storage.exists(["/a.txt", "/d.txt"], &cancel).await.unwrap(),
        vec![false, false]
    );
}

#[tokio::test]
async fn test_folder_rename_keeps_empty_folders() {
    let temp_dir = TempDir::new().unwrap();
    let local = BlobStorage::new(Arc::new(LocalAdapter::new(temp_dir.path()).unwrap()));
    let cancel = CancellationToken::new();

    for storage in [memory_storage(), local] {
        seed(&storage, &[("/a/x.txt", 1)]).await;
        storage.create_folder("/a/empty", &cancel).await.unwrap();
        storage.rename("/a", "/c", &cancel).await.unwrap();
        assert_eq!(
            storage.exists(["/a", "/c/x.txt", "/c/empty"], &cancel).await.unwrap(),
            vec![false, true, true]
        );

        storage.create_folder("/only/empty", &cancel).await.unwrap();
        storage.rename("/only", "/moved", &cancel).await.unwrap();
        assert_eq!(
            storage.exists(["/only", "/moved/empty"], &cancel).await.unwrap(),
            vec![false, true]
        );
    }
}

#[tokio::test]
async fn test_derived_folders_rename_without_folder_support() {
    let storage = BlobStorage::new(Arc::new(DictionaryAdapter::new()));
    let cancel = CancellationToken::new();
    seed(&storage, &[("/a/b/y.txt", 2)]).await;

    let err = storage.create_folder("/empty", &cancel).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotSupported);

    storage.rename("/a", "/c", &cancel).await.unwrap();
    let all = storage
        .list(ListOptions::new().recurse(true), &cancel)
        .await
        .unwrap();
    assert_eq!(paths(&all), vec!["/c", "/c/b", "/c/b/y.txt"]);
}

#[tokio::test]
async fn test_emulated_append_rewrites_whole_file() {
    let (storage, adapter) =
        recording_storage(RecordingAdapter::new().with_append(AppendSupport::Emulated));
    let cancel = CancellationToken::new();

    storage.write_bytes("/log.txt", "one", true, &cancel).await.unwrap();
    storage.write_bytes("/log.txt", ",two", true, &cancel).await.unwrap();

    let data = storage.read_bytes("/log.txt", &cancel).await.unwrap().unwrap();
    assert_eq!(&data[..], b"one,two");
    assert!(adapter.writes().iter().all(|(_, append)| !append));
}

#[tokio::test]
async fn test_native_append_is_delegated() {
    let (storage, adapter) = recording_storage(RecordingAdapter::new());
    let cancel = CancellationToken::new();

    storage.write_bytes("/log.txt", "a", true, &cancel).await.unwrap();
    assert_eq!(adapter.writes(), vec![("/log.txt".to_string(), true)]);
}

#[tokio::test]
async fn test_unsupported_append_fails() {
    let (storage, adapter) =
        recording_storage(RecordingAdapter::new().with_append(AppendSupport::Unsupported));
    let cancel = CancellationToken::new();

    let err = storage
        .write_bytes("/log.txt", "a", true, &cancel)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotSupported);

    let err = storage.open_write("/log.txt", true, &cancel).await.err().unwrap();
    assert_eq!(err.kind(), ErrorKind::NotSupported);
    assert!(adapter.writes().is_empty());

    storage.write_bytes("/log.txt", "a", false, &cancel).await.unwrap();
}

#[tokio::test]
async fn test_set_blobs_updates_metadata() {
    let storage = memory_storage();
    let cancel = CancellationToken::new();
    seed(&storage, &[("/a.txt", 1), ("/b.txt", 1)]).await;

    let updates = vec![
        Blob::file("/a.txt").unwrap().with_metadata("owner", "alice"),
        Blob::file("/b.txt").unwrap().with_metadata("owner", "bob"),
    ];
    storage.set_blobs(&updates, &cancel).await.unwrap();

    let blobs = storage.get_blobs(["/a.txt", "/b.txt"], &cancel).await.unwrap();
    let owners: Vec<_> = blobs
        .iter()
        .map(|b| b.as_ref().unwrap().metadata.get("owner").cloned())
        .collect();
    assert_eq!(owners, vec![Some("alice".to_string()), Some("bob".to_string())]);
}

#[tokio::test]
async fn test_cancelled_batch_makes_no_calls() {
    let (storage, adapter) = recording_storage(RecordingAdapter::new());
    let cancel = CancellationToken::new();
    cancel.cancel();

    let err = storage
        .list(ListOptions::new().recurse(true), &cancel)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Cancelled);

    let err = storage
        .write_bytes("/a.txt", "a", false, &cancel)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Cancelled);

    assert_eq!(adapter.list_calls(), 0);
    assert!(adapter.writes().is_empty());
}

#[tokio::test]
async fn test_transaction_stages_writes_until_commit() {
    let storage = BlobStorage::new(Arc::new(DictionaryAdapter::new()));
    let cancel = CancellationToken::new();

    let transaction = storage.open_transaction().await.unwrap();
    storage.write_text("/a.txt", "a", &cancel).await.unwrap();
    assert!(storage.read_text("/a.txt", &cancel).await.unwrap().is_none());

    let err = storage.open_transaction().await.err().unwrap();
    assert_eq!(err.kind(), ErrorKind::InvalidState);

    transaction.commit().await.unwrap();
    assert_eq!(transaction.state(), TransactionState::Committed);
    assert_eq!(
        storage.read_text("/a.txt", &cancel).await.unwrap().as_deref(),
        Some("a")
    );

    let err = transaction.commit().await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidState);
    let err = transaction.rollback().await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidState);

    let next = storage.open_transaction().await.unwrap();
    storage.delete(["/a.txt"], &cancel).await.unwrap();
    next.rollback().await.unwrap();
    assert_eq!(storage.exists(["/a.txt"], &cancel).await.unwrap(), vec![true]);
}

#[tokio::test]
async fn test_non_transactional_adapter_shares_empty_transaction() {
    let storage = memory_storage();
    let cancel = CancellationToken::new();

    let first = storage.open_transaction().await.unwrap();
    let second = storage.open_transaction().await.unwrap();
    assert!(Arc::ptr_eq(&first, &second));

    storage.write_text("/a.txt", "a", &cancel).await.unwrap();
    assert!(storage.read_text("/a.txt", &cancel).await.unwrap().is_some());

    first.commit().await.unwrap();
    first.commit().await.unwrap();
    second.rollback().await.unwrap();
}
