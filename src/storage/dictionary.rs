//! Transactional dictionary storage backend
//!
//! A flat map from full path to content. Folders are not stored, they are
//! derived from key prefixes, so a folder that holds no key does not exist
//! and lists as empty.
//!
//! At most one transaction is open at a time. While it is open, every
//! mutation made through the adapter is staged on it and becomes visible on
//! commit; reads keep seeing the committed state. Dropping an open
//! transaction discards its staged work and frees the slot.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::io::Cursor;
use std::mem;
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use tracing::{debug, instrument};
use uuid::Uuid;

use super::{crc32_hex, AppendSupport, BlobAdapter, BlobReader};
use crate::blob::{Blob, BlobKind};
use crate::list::ListOptions;
use crate::path;
use crate::transaction::{Transaction, TransactionState, TransactionStatus};
use crate::{Error, Result};

#[derive(Debug, Clone)]
struct DictionaryEntry {
    data: Bytes,
    last_modified: DateTime<Utc>,
    metadata: HashMap<String, String>,
}

impl DictionaryEntry {
    fn to_blob(&self, full_path: &str) -> Result<Blob> {
        let mut blob = Blob::file(full_path)?
            .with_size(self.data.len() as u64)
            .with_last_modified(self.last_modified)
            .with_content_hash(crc32_hex(&self.data));
        blob.metadata = self.metadata.clone();
        Ok(blob)
    }
}

#[derive(Debug, Clone)]
enum StagedOp {
    Put {
        full_path: String,
        data: Bytes,
        append: bool,
    },
    Remove {
        full_path: String,
    },
    SetMetadata {
        full_path: String,
        metadata: HashMap<String, String>,
    },
}

type Entries = BTreeMap<String, DictionaryEntry>;

fn apply(entries: &mut Entries, op: StagedOp, now: DateTime<Utc>) {
    match op {
        StagedOp::Put {
            full_path,
            data,
            append,
        } => match entries.get_mut(&full_path) {
            Some(entry) => {
                entry.data = if append {
                    let mut combined = BytesMut::from(&entry.data[..]);
                    combined.extend_from_slice(&data);
                    combined.freeze()
                } else {
                    data
                };
                entry.last_modified = now;
            }
            None => {
                entries.insert(
                    full_path,
                    DictionaryEntry {
                        data,
                        last_modified: now,
                        metadata: HashMap::new(),
                    },
                );
            }
        },
        StagedOp::Remove { full_path } => {
            entries.remove(&full_path);
            entries.retain(|key, _| !path::is_within(key, &full_path));
        }
        // metadata of a key removed in the meantime is dropped
        StagedOp::SetMetadata {
            full_path,
            metadata,
        } => {
            if let Some(entry) = entries.get_mut(&full_path) {
                entry.metadata = metadata;
            }
        }
    }
}

#[derive(Default)]
struct DictionaryState {
    entries: RwLock<Entries>,
}

/// Flat key-value storage with real transactions
#[derive(Default)]
pub struct DictionaryAdapter {
    state: Arc<DictionaryState>,
    current: Mutex<Weak<DictionaryTransaction>>,
}

impl DictionaryAdapter {
    pub fn new() -> Self {
        Self::default()
    }

    fn current(&self) -> MutexGuard<'_, Weak<DictionaryTransaction>> {
        self.current
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Open a transaction. Fails with [`Error::InvalidState`] while another
    /// one is open.
    pub fn begin(&self) -> Result<Arc<DictionaryTransaction>> {
        let mut current = self.current();
        if let Some(open) = current.upgrade().filter(|tx| tx.status.is_open()) {
            return Err(Error::invalid_state(format!(
                "transaction {} is still open",
                open.id
            )));
        }

        let transaction = Arc::new(DictionaryTransaction {
            id: Uuid::new_v4(),
            status: TransactionStatus::default(),
            staged: Mutex::new(Vec::new()),
            state: self.state.clone(),
        });
        *current = Arc::downgrade(&transaction);

        debug!(id = %transaction.id, "transaction opened");
        Ok(transaction)
    }

    /// The open transaction, if any.
    pub fn active(&self) -> Option<Arc<DictionaryTransaction>> {
        self.current().upgrade().filter(|tx| tx.status.is_open())
    }

    /// Stage `op` on the open transaction or apply it right away.
    async fn mutate(&self, op: StagedOp) {
        let op = match self.active() {
            Some(transaction) => match transaction.try_stage(op) {
                None => return,
                // closed between lookup and staging
                Some(op) => op,
            },
            None => op,
        };

        let mut entries = self.state.entries.write().await;
        apply(&mut entries, op, Utc::now());
    }
}

#[async_trait]
impl BlobAdapter for DictionaryAdapter {
    fn name(&self) -> &str {
        "dictionary"
    }

    fn append_support(&self) -> AppendSupport {
        AppendSupport::Native
    }

    async fn list_at(&self, folder_path: &str, _options: &ListOptions) -> Result<Vec<Blob>> {
        let entries = self.state.entries.read().await;
        let depth = path::split(folder_path).len();

        let mut folders = BTreeSet::new();
        let mut level = Vec::new();

        for (full_path, entry) in entries.iter() {
            if !path::is_within(full_path, folder_path) {
                continue;
            }
            let segments = path::split(full_path);
            if segments.len() == depth + 1 {
                level.push(entry.to_blob(full_path)?);
            } else {
                folders.insert(path::combine(&segments[..=depth]));
            }
        }

        let mut result = folders
            .iter()
            .map(|folder| Blob::folder(folder))
            .collect::<Result<Vec<_>>>()?;
        result.append(&mut level);
        Ok(result)
    }

    async fn open_read(&self, full_path: &str) -> Result<Option<BlobReader>> {
        let entries = self.state.entries.read().await;
        Ok(entries.get(full_path).map(|entry| {
            let reader: BlobReader = Box::new(Cursor::new(entry.data.clone()));
            reader
        }))
    }

    async fn write(&self, full_path: &str, data: Bytes, append: bool) -> Result<()> {
        self.mutate(StagedOp::Put {
            full_path: full_path.to_string(),
            data,
            append,
        })
        .await;
        Ok(())
    }

    async fn delete_single(&self, full_path: &str) -> Result<()> {
        self.mutate(StagedOp::Remove {
            full_path: full_path.to_string(),
        })
        .await;
        Ok(())
    }

    async fn exists_single(&self, full_path: &str) -> Result<bool> {
        let entries = self.state.entries.read().await;
        Ok(entries.contains_key(full_path)
            || entries.keys().any(|key| path::is_within(key, full_path)))
    }

    async fn get_blob(&self, full_path: &str) -> Result<Option<Blob>> {
        let entries = self.state.entries.read().await;
        if let Some(entry) = entries.get(full_path) {
            return entry.to_blob(full_path).map(Some);
        }
        if entries.keys().any(|key| path::is_within(key, full_path)) {
            return Blob::new(full_path, BlobKind::Folder).map(Some);
        }
        Ok(None)
    }

    async fn set_blob(&self, blob: &Blob) -> Result<()> {
        let full_path = blob.full_path();
        if !blob.is_file() || !self.state.entries.read().await.contains_key(&full_path) {
            return Err(Error::not_found(format!("file '{}'", full_path)));
        }

        self.mutate(StagedOp::SetMetadata {
            full_path,
            metadata: blob.metadata.clone(),
        })
        .await;
        Ok(())
    }

    async fn open_transaction(&self) -> Result<Arc<dyn Transaction>> {
        let transaction: Arc<dyn Transaction> = self.begin()?;
        Ok(transaction)
    }
}

/// Unit of work on a [`DictionaryAdapter`].
pub struct DictionaryTransaction {
    id: Uuid,
    status: TransactionStatus,
    staged: Mutex<Vec<StagedOp>>,
    state: Arc<DictionaryState>,
}

impl DictionaryTransaction {
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Number of operations waiting for commit.
    pub fn staged_len(&self) -> usize {
        self.staged().len()
    }

    /// Stage a whole-file write.
    pub fn put(&self, full_path: &str, data: impl Into<Bytes>) -> Result<()> {
        let full_path = path::validate_file_path(full_path)?;
        self.stage(StagedOp::Put {
            full_path,
            data: data.into(),
            append: false,
        })
    }

    /// Stage the removal of a key and everything below it.
    pub fn remove(&self, full_path: &str) -> Result<()> {
        let full_path = path::validate_full_path(full_path)?;
        self.stage(StagedOp::Remove { full_path })
    }

    fn staged(&self) -> MutexGuard<'_, Vec<StagedOp>> {
        self.staged
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn stage(&self, op: StagedOp) -> Result<()> {
        let mut staged = self.staged();
        self.status.ensure_open()?;
        staged.push(op);
        Ok(())
    }

    /// Hands `op` back when the transaction is no longer open.
    fn try_stage(&self, op: StagedOp) -> Option<StagedOp> {
        let mut staged = self.staged();
        if !self.status.is_open() {
            return Some(op);
        }
        staged.push(op);
        None
    }
}

#[async_trait]
impl Transaction for DictionaryTransaction {
    fn state(&self) -> TransactionState {
        self.status.get()
    }

    #[instrument(skip(self), fields(id = %self.id))]
    async fn commit(&self) -> Result<()> {
        let mut entries = self.state.entries.write().await;
        let ops = {
            let mut staged = self.staged();
            self.status.close(TransactionState::Committed)?;
            mem::take(&mut *staged)
        };

        debug!(ops = ops.len(), "committing");
        let now = Utc::now();
        for op in ops {
            apply(&mut entries, op, now);
        }
        Ok(())
    }

    #[instrument(skip(self), fields(id = %self.id))]
    async fn rollback(&self) -> Result<()> {
        let mut staged = self.staged();
        self.status.close(TransactionState::RolledBack)?;
        debug!(ops = staged.len(), "rolling back");
        staged.clear();
        Ok(())
    }
}
