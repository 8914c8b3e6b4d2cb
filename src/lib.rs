//! blobkit - uniform blob storage over interchangeable back-ends
//!
//! blobkit provides:
//! - A path model and a [`Blob`] entity shared by every back-end
//! - Recursive, filtered and capped listing built on one-level adapters
//! - Concurrent batch operations and cooperative cancellation
//! - Memory, local disk, S3 and transactional dictionary adapters
//! - A small in-memory message queue abstraction

pub mod blob;
pub mod config;
pub mod error;
pub mod list;
pub mod messaging;
pub mod path;
pub mod storage;
pub mod transaction;

pub use blob::{Blob, BlobKind};
pub use error::{Error, ErrorKind, Result};
pub use list::{BrowseFilter, ListOptions};
pub use storage::{create_storage, AppendSupport, BlobAdapter, BlobStorage, StorageConfig};
pub use transaction::{EmptyTransaction, Transaction, TransactionState};
