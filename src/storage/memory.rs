//! In-memory storage backend
//!
//! A hierarchical tree with explicit folders. Writing a file creates its
//! parent folders, and deleting the last file of a folder leaves the folder in
//! place, so listing it yields an empty result. Listing a folder that was
//! never created fails with [`Error::NotFound`].

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::io::Cursor;

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use super::{crc32_hex, AppendSupport, BlobAdapter, BlobReader};
use crate::blob::{Blob, BlobKind};
use crate::list::ListOptions;
use crate::path;
use crate::{Error, Result};

struct MemoryFile {
    data: Bytes,
    created: DateTime<Utc>,
    last_modified: DateTime<Utc>,
    metadata: HashMap<String, String>,
}

impl MemoryFile {
    fn to_blob(&self, full_path: &str) -> Result<Blob> {
        let mut blob = Blob::file(full_path)?
            .with_size(self.data.len() as u64)
            .with_created(self.created)
            .with_last_modified(self.last_modified)
            .with_content_hash(crc32_hex(&self.data));
        blob.metadata = self.metadata.clone();
        Ok(blob)
    }
}

#[derive(Default)]
struct MemoryTree {
    folders: BTreeSet<String>,
    files: BTreeMap<String, MemoryFile>,
}

impl MemoryTree {
    /// Create `folder` and all of its ancestors.
    fn ensure_folders(&mut self, folder: &str) -> Result<()> {
        let mut current = path::normalize(folder);
        while !path::is_root(&current) {
            if self.files.contains_key(&current) {
                return Err(Error::conflict(format!("'{}' is a file", current)));
            }
            self.folders.insert(current.clone());
            current = path::parent(&current);
        }
        Ok(())
    }

    fn remove_tree(&mut self, full_path: &str) {
        self.files.remove(full_path);
        self.folders.remove(full_path);
        self.files.retain(|p, _| !path::is_within(p, full_path));
        self.folders.retain(|p| !path::is_within(p, full_path));
    }
}

/// Hierarchical storage held in process memory
#[derive(Default)]
pub struct InMemoryAdapter {
    tree: RwLock<MemoryTree>,
}

impl InMemoryAdapter {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl BlobAdapter for InMemoryAdapter {
    fn name(&self) -> &str {
        "memory"
    }

    fn append_support(&self) -> AppendSupport {
        AppendSupport::Native
    }

    async fn list_at(&self, folder_path: &str, _options: &ListOptions) -> Result<Vec<Blob>> {
        let tree = self.tree.read().await;

        if !path::is_root(folder_path) && !tree.folders.contains(folder_path) {
            return Err(Error::not_found(format!("folder '{}'", folder_path)));
        }

        let mut level = Vec::new();
        for folder in tree.folders.iter().filter(|f| path::parent(f) == folder_path) {
            level.push(Blob::folder(folder)?);
        }
        for (full_path, file) in tree.files.iter() {
            if path::parent(full_path) == folder_path {
                level.push(file.to_blob(full_path)?);
            }
        }

        Ok(level)
    }

    async fn open_read(&self, full_path: &str) -> Result<Option<BlobReader>> {
        let tree = self.tree.read().await;
        Ok(tree.files.get(full_path).map(|file| {
            let reader: BlobReader = Box::new(Cursor::new(file.data.clone()));
            reader
        }))
    }

    async fn write(&self, full_path: &str, data: Bytes, append: bool) -> Result<()> {
        let mut tree = self.tree.write().await;

        if tree.folders.contains(full_path) {
            return Err(Error::conflict(format!("'{}' is a folder", full_path)));
        }
        tree.ensure_folders(&path::parent(full_path))?;

        let now = Utc::now();
        match tree.files.get_mut(full_path) {
            Some(file) => {
                file.data = if append {
                    let mut combined = BytesMut::from(&file.data[..]);
                    combined.extend_from_slice(&data);
                    combined.freeze()
                } else {
                    data
                };
                file.last_modified = now;
            }
            None => {
                tree.files.insert(
                    full_path.to_string(),
                    MemoryFile {
                        data,
                        created: now,
                        last_modified: now,
                        metadata: HashMap::new(),
                    },
                );
            }
        }

        Ok(())
    }

    async fn delete_single(&self, full_path: &str) -> Result<()> {
        self.tree.write().await.remove_tree(full_path);
        Ok(())
    }

    async fn exists_single(&self, full_path: &str) -> Result<bool> {
        let tree = self.tree.read().await;
        Ok(tree.files.contains_key(full_path) || tree.folders.contains(full_path))
    }

    async fn get_blob(&self, full_path: &str) -> Result<Option<Blob>> {
        let tree = self.tree.read().await;
        if let Some(file) = tree.files.get(full_path) {
            return file.to_blob(full_path).map(Some);
        }
        if tree.folders.contains(full_path) {
            return Blob::new(full_path, BlobKind::Folder).map(Some);
        }
        Ok(None)
    }

    async fn set_blob(&self, blob: &Blob) -> Result<()> {
        let full_path = blob.full_path();
        let mut tree = self.tree.write().await;
        match tree.files.get_mut(&full_path) {
            Some(file) if blob.is_file() => {
                file.metadata = blob.metadata.clone();
                Ok(())
            }
            _ => Err(Error::not_found(format!("file '{}'", full_path))),
        }
    }

    async fn create_folder(&self, folder_path: &str) -> Result<()> {
        let folder_path = path::validate_full_path(folder_path)?;
        self.tree.write().await.ensure_folders(&folder_path)
    }
}
