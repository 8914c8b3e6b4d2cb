//! Storage abstraction layer
//!
//! Back-ends implement the small [`BlobAdapter`] primitive set and
//! [`BlobStorage`] builds recursive listing, batching and the convenience
//! operations on top of it, so the same calling code works against memory,
//! local disk, S3 or a transactional dictionary.

use std::fmt::{Debug, Formatter, Result as FmtResult};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::io::AsyncRead;

use crate::blob::Blob;
use crate::list::ListOptions;
use crate::transaction::{EmptyTransaction, Transaction};
use crate::{Error, Result};

pub mod dictionary;
pub mod generic;
pub mod local;
pub mod memory;
pub mod s3;

pub use generic::{BlobStorage, BlobWriter, DEFAULT_ATTRIBUTE_BATCH_SIZE};

/// Readable blob content returned by [`BlobAdapter::open_read`].
pub type BlobReader = Box<dyn AsyncRead + Send + Unpin>;

/// How an adapter handles `append = true` writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppendSupport {
    /// The adapter appends itself.
    Native,
    /// The engine reads the current content and rewrites it.
    Emulated,
    /// Appending fails with [`Error::NotSupported`].
    Unsupported,
}

/// Minimal primitive set every back-end implements.
///
/// Paths handed to an adapter by [`BlobStorage`] are already normalized and
/// validated.
#[async_trait]
pub trait BlobAdapter: Send + Sync {
    /// Short back-end name used in logs and error messages.
    fn name(&self) -> &str;

    fn append_support(&self) -> AppendSupport {
        AppendSupport::Emulated
    }

    /// List the immediate children of `folder_path`. Must not recurse.
    ///
    /// An empty folder yields an empty vector. Whether a folder that does not
    /// exist yields an empty vector or [`Error::NotFound`] is up to the
    /// adapter and documented on it.
    async fn list_at(&self, folder_path: &str, options: &ListOptions) -> Result<Vec<Blob>>;

    /// Open a file for reading, `None` when it does not exist.
    async fn open_read(&self, full_path: &str) -> Result<Option<BlobReader>>;

    /// Write a whole file, creating parent containers when needed.
    async fn write(&self, full_path: &str, data: Bytes, append: bool) -> Result<()>;

    /// Delete a file, or a folder with everything below it. Missing paths are
    /// not an error.
    async fn delete_single(&self, full_path: &str) -> Result<()>;

    async fn exists_single(&self, full_path: &str) -> Result<bool>;

    async fn get_blob(&self, full_path: &str) -> Result<Option<Blob>>;

    /// Replace the metadata of an existing blob.
    async fn set_blob(&self, blob: &Blob) -> Result<()> {
        Err(Error::not_supported(format!(
            "{} has no metadata model (blob '{}')",
            self.name(),
            blob.full_path()
        )))
    }

    /// Create an empty folder and its ancestors. Back-ends whose folders
    /// only exist through the files below them report [`Error::NotSupported`].
    async fn create_folder(&self, folder_path: &str) -> Result<()> {
        Err(Error::not_supported(format!(
            "{} cannot hold empty folders (folder '{}')",
            self.name(),
            folder_path
        )))
    }

    async fn open_transaction(&self) -> Result<Arc<dyn Transaction>> {
        Ok(EmptyTransaction::shared())
    }
}

impl Debug for dyn BlobAdapter {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        write!(f, "BlobAdapter({})", self.name())
    }
}

/// Storage configuration
#[derive(Debug, Clone)]
pub enum StorageConfig {
    Memory,
    Dictionary,
    Local {
        root_path: String,
    },
    S3 {
        bucket: String,
        region: String,
        endpoint: Option<String>,
    },
}

/// Create storage adapter from config
pub async fn create_storage(config: StorageConfig) -> Result<Arc<dyn BlobAdapter>> {
    match config {
        StorageConfig::Memory => Ok(Arc::new(memory::InMemoryAdapter::new())),
        StorageConfig::Dictionary => Ok(Arc::new(dictionary::DictionaryAdapter::new())),
        StorageConfig::Local { root_path } => {
            let adapter = local::LocalAdapter::new(root_path)?;
            Ok(Arc::new(adapter))
        }
        StorageConfig::S3 {
            bucket,
            region,
            endpoint,
        } => {
            let adapter = s3::S3Adapter::new(bucket, region, endpoint).await?;
            Ok(Arc::new(adapter))
        }
    }
}

/// CRC32 of a payload as fixed-width hex.
pub(crate) fn crc32_hex(data: &[u8]) -> String {
    format!("{:08x}", crc32fast::hash(data))
}
