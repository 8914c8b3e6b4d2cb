//! Shared fixtures for the integration tests

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use bytes::Bytes;
use tokio_util::sync::CancellationToken;

use blobkit::storage::memory::InMemoryAdapter;
use blobkit::storage::BlobReader;
use blobkit::{AppendSupport, Blob, BlobAdapter, BlobStorage, Error, ListOptions, Result};

/// Memory adapter wrapper that records calls, can simulate a folder that
/// vanishes between being discovered and being listed, and can fail chosen
/// paths on delete and exists.
pub struct RecordingAdapter {
    inner: InMemoryAdapter,
    append: AppendSupport,
    vanished: Option<String>,
    failing: Vec<String>,
    list_calls: AtomicUsize,
    blob_calls: AtomicUsize,
    listed: Mutex<Vec<String>>,
    writes: Mutex<Vec<(String, bool)>>,
    touched: Mutex<Vec<String>>,
}

impl RecordingAdapter {
    pub fn new() -> Self {
        Self {
            inner: InMemoryAdapter::new(),
            append: AppendSupport::Native,
            vanished: None,
            failing: Vec::new(),
            list_calls: AtomicUsize::new(0),
            blob_calls: AtomicUsize::new(0),
            listed: Mutex::new(Vec::new()),
            writes: Mutex::new(Vec::new()),
            touched: Mutex::new(Vec::new()),
        }
    }

    pub fn with_append(mut self, append: AppendSupport) -> Self {
        self.append = append;
        self
    }

    pub fn with_vanished(mut self, folder: &str) -> Self {
        self.vanished = Some(folder.to_string());
        self
    }

    pub fn with_failing(mut self, full_path: &str) -> Self {
        self.failing.push(full_path.to_string());
        self
    }

    pub fn list_calls(&self) -> usize {
        self.list_calls.load(Ordering::SeqCst)
    }

    pub fn blob_calls(&self) -> usize {
        self.blob_calls.load(Ordering::SeqCst)
    }

    pub fn listed(&self) -> Vec<String> {
        self.listed.lock().unwrap().clone()
    }

    pub fn writes(&self) -> Vec<(String, bool)> {
        self.writes.lock().unwrap().clone()
    }

    /// Paths handed to `delete_single` or `exists_single`, sorted.
    pub fn touched(&self) -> Vec<String> {
        let mut touched = self.touched.lock().unwrap().clone();
        touched.sort();
        touched
    }

    fn touch(&self, full_path: &str) -> Result<()> {
        self.touched.lock().unwrap().push(full_path.to_string());
        if self.failing.iter().any(|p| p == full_path) {
            return Err(Error::storage(format!("simulated failure at {}", full_path)));
        }
        Ok(())
    }

    pub fn reset(&self) {
        self.list_calls.store(0, Ordering::SeqCst);
        self.blob_calls.store(0, Ordering::SeqCst);
        self.listed.lock().unwrap().clear();
        self.writes.lock().unwrap().clear();
        self.touched.lock().unwrap().clear();
    }
}

#[async_trait]
impl BlobAdapter for RecordingAdapter {
    fn name(&self) -> &str {
        "recording"
    }

    fn append_support(&self) -> AppendSupport {
        self.append
    }

    async fn list_at(&self, folder_path: &str, options: &ListOptions) -> Result<Vec<Blob>> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        self.listed.lock().unwrap().push(folder_path.to_string());
        if self.vanished.as_deref() == Some(folder_path) {
            return Err(Error::not_found(folder_path.to_string()));
        }
        self.inner.list_at(folder_path, options).await
    }

    async fn open_read(&self, full_path: &str) -> Result<Option<BlobReader>> {
        self.inner.open_read(full_path).await
    }

    async fn write(&self, full_path: &str, data: Bytes, append: bool) -> Result<()> {
        self.writes
            .lock()
            .unwrap()
            .push((full_path.to_string(), append));
        self.inner.write(full_path, data, append).await
    }

    async fn delete_single(&self, full_path: &str) -> Result<()> {
        self.touch(full_path)?;
        self.inner.delete_single(full_path).await
    }

    async fn exists_single(&self, full_path: &str) -> Result<bool> {
        self.touch(full_path)?;
        self.inner.exists_single(full_path).await
    }

    async fn get_blob(&self, full_path: &str) -> Result<Option<Blob>> {
        self.blob_calls.fetch_add(1, Ordering::SeqCst);
        self.inner.get_blob(full_path).await
    }

    async fn set_blob(&self, blob: &Blob) -> Result<()> {
        self.inner.set_blob(blob).await
    }

    async fn create_folder(&self, folder_path: &str) -> Result<()> {
        self.inner.create_folder(folder_path).await
    }
}

/// Engine over a fresh recording adapter, plus a handle on the adapter.
pub fn recording_storage(adapter: RecordingAdapter) -> (BlobStorage, Arc<RecordingAdapter>) {
    let adapter = Arc::new(adapter);
    (BlobStorage::new(adapter.clone()), adapter)
}

/// Write `size` bytes to every path.
pub async fn seed(storage: &BlobStorage, files: &[(&str, usize)]) {
    let cancel = CancellationToken::new();
    for (path, size) in files {
        storage
            .write_bytes(path, vec![b'x'; *size], false, &cancel)
            .await
            .unwrap();
    }
}

/// Full paths of a listing, sorted.
pub fn paths(blobs: &[Blob]) -> Vec<String> {
    let mut paths: Vec<String> = blobs.iter().map(Blob::full_path).collect();
    paths.sort();
    paths
}
