//! Generic blob storage engine
//!
//! [`BlobStorage`] turns an adapter that can only list one folder level into
//! full recursive, filtered and capped listing, and expresses the batch
//! operations as concurrent fan-out over the single-path primitives.
//!
//! Every operation takes a [`CancellationToken`]. It is checked before each
//! adapter call is dispatched, fan-out items included. Calls that are already
//! in flight run to completion.

use std::collections::{HashSet, VecDeque};
use std::future::Future;
use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use bytes::Bytes;
use futures::future::join_all;
use tokio::io::{AsyncReadExt, AsyncWrite};
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};

use super::{AppendSupport, BlobAdapter, BlobReader};
use crate::blob::Blob;
use crate::list::ListOptions;
use crate::path;
use crate::transaction::Transaction;
use crate::{Error, Result};

/// Number of files whose attributes are fetched concurrently when a listing
/// asks for them.
pub const DEFAULT_ATTRIBUTE_BATCH_SIZE: usize = 10;

/// Uniform blob storage over any [`BlobAdapter`].
///
/// Cheap to clone and safe to share between tasks.
#[derive(Clone)]
pub struct BlobStorage {
    adapter: Arc<dyn BlobAdapter>,
    attribute_batch_size: usize,
}

impl BlobStorage {
    pub fn new(adapter: Arc<dyn BlobAdapter>) -> Self {
        Self {
            adapter,
            attribute_batch_size: DEFAULT_ATTRIBUTE_BATCH_SIZE,
        }
    }

    pub fn with_attribute_batch_size(mut self, size: usize) -> Self {
        self.attribute_batch_size = size.max(1);
        self
    }

    pub fn adapter(&self) -> &Arc<dyn BlobAdapter> {
        &self.adapter
    }

    /// List blobs.
    ///
    /// Without a cap, recursion lists every discovered folder of a depth
    /// concurrently before moving one level down. With `max_results` set,
    /// folders are listed one at a time and listing stops as soon as the cap
    /// is reached, so no folder is listed that the result does not need.
    ///
    /// A missing start folder is reported as [`Error::NotFound`] unless it is
    /// the root. A sub-folder that disappears while recursing counts as empty.
    #[instrument(skip(self, options, cancel), fields(adapter = self.adapter.name(), folder = %options.folder_path))]
    pub async fn list(&self, options: ListOptions, cancel: &CancellationToken) -> Result<Vec<Blob>> {
        let mut options = options;
        options.folder_path = path::normalize(&options.folder_path);

        if options.max_results == Some(0) {
            return Ok(Vec::new());
        }

        let start = options.folder_path.clone();
        ensure_active(cancel)?;
        let first = match self.adapter.list_at(&start, &options).await {
            Ok(level) => level,
            Err(err) if err.is_not_found() && path::is_root(&start) => Vec::new(),
            Err(err) => return Err(err),
        };

        let mut listing = Listing::new(&options);
        let mut pending: VecDeque<String> = listing.accept(&start, first).into();

        if options.recurse {
            if options.max_results.is_some() {
                while !listing.is_full() {
                    let Some(folder) = pending.pop_front() else {
                        break;
                    };
                    let level = self.list_subfolder(&folder, &options, cancel).await?;
                    pending.extend(listing.accept(&folder, level));
                }
                if listing.is_full() {
                    debug!(skipped = pending.len(), "listing cap reached");
                }
            } else {
                while !pending.is_empty() {
                    let wave: Vec<String> = pending.drain(..).collect();
                    debug!(folders = wave.len(), "listing folder wave");

                    let levels = join_all(
                        wave.iter()
                            .map(|folder| self.list_subfolder(folder, &options, cancel)),
                    )
                    .await;

                    for (folder, level) in wave.iter().zip(levels) {
                        pending.extend(listing.accept(folder, level?));
                    }
                }
            }
        }

        let mut results = listing.into_results();
        if options.include_attributes {
            self.fetch_attributes(&mut results, cancel).await?;
        }

        debug!(count = results.len(), "listing complete");
        Ok(results)
    }

    async fn list_subfolder(
        &self,
        folder: &str,
        options: &ListOptions,
        cancel: &CancellationToken,
    ) -> Result<Vec<Blob>> {
        ensure_active(cancel)?;
        match self.adapter.list_at(folder, options).await {
            Err(err) if err.is_not_found() => {
                warn!(folder, "folder disappeared during recursive listing");
                Ok(Vec::new())
            }
            other => other,
        }
    }

    async fn fetch_attributes(&self, results: &mut [Blob], cancel: &CancellationToken) -> Result<()> {
        let files: Vec<usize> = results
            .iter()
            .enumerate()
            .filter(|(_, blob)| blob.is_file())
            .map(|(i, _)| i)
            .collect();

        for chunk in files.chunks(self.attribute_batch_size) {
            let paths: Vec<String> = chunk.iter().map(|&i| results[i].full_path()).collect();
            let fetched = join_all(
                paths
                    .iter()
                    .map(|p| guarded(cancel, self.adapter.get_blob(p))),
            )
            .await;

            for (&i, blob) in chunk.iter().zip(fetched) {
                if let Some(blob) = blob? {
                    results[i].merge_attributes(&blob);
                }
            }
        }

        Ok(())
    }

    /// Delete files or folders. Folders are deleted with everything below
    /// them, missing paths are ignored.
    #[instrument(skip_all, fields(adapter = self.adapter.name()))]
    pub async fn delete<I, S>(&self, full_paths: I, cancel: &CancellationToken) -> Result<()>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let paths = validate_all(full_paths)?;
        let outcomes = join_all(
            paths
                .iter()
                .map(|p| guarded(cancel, self.adapter.delete_single(p))),
        )
        .await;

        outcomes.into_iter().collect::<Result<Vec<()>>>()?;
        debug!(count = paths.len(), "deleted");
        Ok(())
    }

    /// Existence of each path, in input order.
    pub async fn exists<I, S>(&self, full_paths: I, cancel: &CancellationToken) -> Result<Vec<bool>>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let paths = validate_all(full_paths)?;
        join_all(
            paths
                .iter()
                .map(|p| guarded(cancel, self.adapter.exists_single(p))),
        )
        .await
        .into_iter()
        .collect()
    }

    /// Blob attributes for each path, in input order, `None` where missing.
    pub async fn get_blobs<I, S>(
        &self,
        full_paths: I,
        cancel: &CancellationToken,
    ) -> Result<Vec<Option<Blob>>>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let paths = validate_all(full_paths)?;
        join_all(
            paths
                .iter()
                .map(|p| guarded(cancel, self.adapter.get_blob(p))),
        )
        .await
        .into_iter()
        .collect()
    }

    pub async fn get_blob(&self, full_path: &str, cancel: &CancellationToken) -> Result<Option<Blob>> {
        let full_path = path::validate_full_path(full_path)?;
        guarded(cancel, self.adapter.get_blob(&full_path)).await
    }

    /// Apply metadata changes to existing blobs. Content is not touched.
    pub async fn set_blobs(&self, blobs: &[Blob], cancel: &CancellationToken) -> Result<()> {
        for blob in blobs {
            path::validate_full_path(&blob.full_path())?;
        }
        join_all(
            blobs
                .iter()
                .map(|blob| guarded(cancel, self.adapter.set_blob(blob))),
        )
        .await
        .into_iter()
        .collect::<Result<Vec<()>>>()?;
        Ok(())
    }

    /// Open a file for reading, `None` when it does not exist.
    pub async fn open_read(
        &self,
        full_path: &str,
        cancel: &CancellationToken,
    ) -> Result<Option<BlobReader>> {
        let full_path = path::validate_full_path(full_path)?;
        guarded(cancel, self.adapter.open_read(&full_path)).await
    }

    /// Open a buffered writer. Nothing reaches the back-end until
    /// [`BlobWriter::commit`].
    pub async fn open_write(
        &self,
        full_path: &str,
        append: bool,
        cancel: &CancellationToken,
    ) -> Result<BlobWriter> {
        let full_path = path::validate_file_path(full_path)?;
        if append && self.adapter.append_support() == AppendSupport::Unsupported {
            return Err(self.append_unsupported(&full_path));
        }
        ensure_active(cancel)?;

        Ok(BlobWriter {
            storage: self.clone(),
            full_path,
            append,
            cancel: cancel.clone(),
            buffer: Vec::new(),
        })
    }

    pub async fn write_bytes(
        &self,
        full_path: &str,
        data: impl Into<Bytes>,
        append: bool,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let full_path = path::validate_file_path(full_path)?;
        ensure_active(cancel)?;
        self.write_validated(&full_path, data.into(), append).await
    }

    pub async fn read_bytes(&self, full_path: &str, cancel: &CancellationToken) -> Result<Option<Bytes>> {
        match self.open_read(full_path, cancel).await? {
            Some(reader) => Ok(Some(read_all(reader).await?)),
            None => Ok(None),
        }
    }

    pub async fn write_text(
        &self,
        full_path: &str,
        text: &str,
        cancel: &CancellationToken,
    ) -> Result<()> {
        self.write_bytes(full_path, Bytes::copy_from_slice(text.as_bytes()), false, cancel)
            .await
    }

    pub async fn read_text(&self, full_path: &str, cancel: &CancellationToken) -> Result<Option<String>> {
        match self.read_bytes(full_path, cancel).await? {
            Some(bytes) => String::from_utf8(bytes.to_vec())
                .map(Some)
                .map_err(|e| Error::bad_request(format!("'{}' is not UTF-8: {}", full_path, e))),
            None => Ok(None),
        }
    }

    /// Move a file or a whole folder by copying then deleting the source.
    #[instrument(skip(self, cancel), fields(adapter = self.adapter.name()))]
    pub async fn rename(&self, old_path: &str, new_path: &str, cancel: &CancellationToken) -> Result<()> {
        let old_path = path::validate_full_path(old_path)?;
        let new_path = path::validate_full_path(new_path)?;

        if old_path == new_path {
            return Ok(());
        }
        if path::is_within(&new_path, &old_path) {
            return Err(Error::bad_request(format!(
                "cannot move '{}' into itself ('{}')",
                old_path, new_path
            )));
        }

        ensure_active(cancel)?;
        let source = self
            .adapter
            .get_blob(&old_path)
            .await?
            .ok_or_else(|| Error::not_found(old_path.clone()))?;

        if source.is_file() {
            self.copy_file(&old_path, &new_path, cancel).await?;
        } else {
            let entries = self
                .list(ListOptions::new().folder(old_path.clone()).recurse(true), cancel)
                .await?;

            let depth = path::split(&old_path).len();
            let relocate = |from: &str| {
                let relative = path::split(from).split_off(depth);
                path::combine(path::split(&new_path).into_iter().chain(relative))
            };

            let copies = entries.iter().filter(|entry| entry.is_file()).map(|file| {
                let from = file.full_path();
                let to = relocate(from.as_str());
                async move { self.copy_file(&from, &to, cancel).await }
            });
            join_all(copies)
                .await
                .into_iter()
                .collect::<Result<Vec<()>>>()?;

            // folders with nothing below them would vanish with the source
            let mut empty_folders = entries
                .iter()
                .filter(|entry| entry.is_folder())
                .map(Blob::full_path)
                .filter(|folder| {
                    !entries
                        .iter()
                        .any(|entry| path::is_within(&entry.full_path(), folder))
                })
                .map(|folder| relocate(folder.as_str()))
                .collect::<Vec<_>>();
            if entries.is_empty() {
                empty_folders.push(new_path.clone());
            }
            for folder in &empty_folders {
                guarded(cancel, self.adapter.create_folder(folder)).await?;
            }
            debug!(empty_folders = empty_folders.len(), "folder copied");
        }

        guarded(cancel, self.adapter.delete_single(&old_path)).await
    }

    /// Create an empty folder and any missing ancestors.
    #[instrument(skip(self, cancel), fields(adapter = self.adapter.name()))]
    pub async fn create_folder(&self, folder_path: &str, cancel: &CancellationToken) -> Result<()> {
        let folder_path = path::validate_full_path(folder_path)?;
        guarded(cancel, self.adapter.create_folder(&folder_path)).await
    }

    async fn copy_file(&self, from: &str, to: &str, cancel: &CancellationToken) -> Result<()> {
        let reader = guarded(cancel, self.adapter.open_read(from))
            .await?
            .ok_or_else(|| Error::not_found(from.to_string()))?;
        let data = read_all(reader).await?;
        guarded(cancel, self.adapter.write(to, data, false)).await
    }

    /// Open a transaction on the underlying adapter.
    pub async fn open_transaction(&self) -> Result<Arc<dyn Transaction>> {
        self.adapter.open_transaction().await
    }

    async fn write_validated(&self, full_path: &str, data: Bytes, append: bool) -> Result<()> {
        if !append {
            return self.adapter.write(full_path, data, false).await;
        }

        match self.adapter.append_support() {
            AppendSupport::Native => self.adapter.write(full_path, data, true).await,
            AppendSupport::Emulated => {
                let mut combined = match self.adapter.open_read(full_path).await? {
                    Some(reader) => read_all(reader).await?.to_vec(),
                    None => Vec::new(),
                };
                combined.extend_from_slice(&data);
                self.adapter
                    .write(full_path, Bytes::from(combined), false)
                    .await
            }
            AppendSupport::Unsupported => Err(self.append_unsupported(full_path)),
        }
    }

    fn append_unsupported(&self, full_path: &str) -> Error {
        Error::not_supported(format!(
            "{} cannot append to '{}'",
            self.adapter.name(),
            full_path
        ))
    }
}

/// Buffered writer returned by [`BlobStorage::open_write`].
pub struct BlobWriter {
    storage: BlobStorage,
    full_path: String,
    append: bool,
    cancel: CancellationToken,
    buffer: Vec<u8>,
}

impl BlobWriter {
    pub fn full_path(&self) -> &str {
        &self.full_path
    }

    /// Bytes buffered so far.
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Upload the buffered content.
    pub async fn commit(self) -> Result<()> {
        ensure_active(&self.cancel)?;
        self.storage
            .write_validated(&self.full_path, Bytes::from(self.buffer), self.append)
            .await
    }
}

impl AsyncWrite for BlobWriter {
    fn poll_write(self: Pin<&mut Self>, _cx: &mut Context<'_>, buf: &[u8]) -> Poll<io::Result<usize>> {
        self.get_mut().buffer.extend_from_slice(buf);
        Poll::Ready(Ok(buf.len()))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }
}

/// Accumulates listing levels: de-duplicates, filters and enforces the cap.
struct Listing<'a> {
    options: &'a ListOptions,
    seen: HashSet<Blob>,
    results: Vec<Blob>,
}

impl<'a> Listing<'a> {
    fn new(options: &'a ListOptions) -> Self {
        Self {
            options,
            seen: HashSet::new(),
            results: Vec::new(),
        }
    }

    /// Take one level of `folder`, returning the sub-folders to descend into.
    fn accept(&mut self, folder: &str, level: Vec<Blob>) -> Vec<String> {
        let mut folders = Vec::new();

        for blob in level {
            let full_path = blob.full_path();
            // guards against adapters echoing the folder itself
            if !path::is_within(&full_path, folder) {
                continue;
            }
            if !self.seen.insert(blob.clone()) {
                continue;
            }
            if self.options.recurse && blob.is_folder() {
                folders.push(full_path);
            }
            if !self.is_full() && self.options.matches(&blob) {
                self.results.push(blob);
            }
        }

        folders
    }

    fn is_full(&self) -> bool {
        self.options.is_satisfied_by(self.results.len())
    }

    fn into_results(self) -> Vec<Blob> {
        let mut results = self.results;
        if let Some(max) = self.options.max_results {
            results.truncate(max);
        }
        results
    }
}

fn ensure_active(cancel: &CancellationToken) -> Result<()> {
    if cancel.is_cancelled() {
        return Err(Error::Cancelled);
    }
    Ok(())
}

/// Check cancellation right before the adapter future starts running.
async fn guarded<T, F>(cancel: &CancellationToken, operation: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    ensure_active(cancel)?;
    operation.await
}

fn validate_all<I, S>(full_paths: I) -> Result<Vec<String>>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    full_paths
        .into_iter()
        .map(|p| path::validate_full_path(p.as_ref()))
        .collect()
}

async fn read_all(mut reader: BlobReader) -> Result<Bytes> {
    let mut buffer = Vec::new();
    reader.read_to_end(&mut buffer).await?;
    Ok(Bytes::from(buffer))
}
