//! Local filesystem storage backend
//!
//! Maps logical paths onto a directory tree below `root_path`. Listing a
//! directory that does not exist fails with [`Error::NotFound`]; the root is
//! created on construction and always lists. There is no metadata model, so
//! [`BlobAdapter::set_blob`] reports [`Error::NotSupported`].

use std::io::ErrorKind as IoErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use tokio::fs;
use tokio::io::AsyncWriteExt;

use super::{AppendSupport, BlobAdapter, BlobReader};
use crate::blob::{Blob, BlobKind};
use crate::list::ListOptions;
use crate::path;
use crate::{Error, Result};

/// Local filesystem storage
pub struct LocalAdapter {
    root_path: PathBuf,
}

impl LocalAdapter {
    pub fn new(root_path: impl Into<PathBuf>) -> Result<Self> {
        let root_path = root_path.into();
        std::fs::create_dir_all(&root_path)?;
        Ok(Self { root_path })
    }

    pub fn root_path(&self) -> &PathBuf {
        &self.root_path
    }

    fn resolve_path(&self, full_path: &str) -> Result<PathBuf> {
        let mut resolved = self.root_path.clone();
        for segment in path::split(full_path) {
            if segment == "." || segment == ".." {
                return Err(Error::bad_request(format!(
                    "relative segment in '{}'",
                    full_path
                )));
            }
            resolved.push(segment);
        }
        Ok(resolved)
    }

    /// `create_dir_all`, reporting a file in the way as [`Error::Conflict`].
    async fn create_dirs(&self, dir: &Path) -> Result<()> {
        let Err(e) = fs::create_dir_all(dir).await else {
            return Ok(());
        };

        for ancestor in dir.ancestors().take_while(|a| a.starts_with(&self.root_path)) {
            if fs::metadata(ancestor).await.is_ok_and(|m| m.is_file()) {
                return Err(Error::conflict(format!(
                    "'{}' is a file",
                    ancestor.display()
                )));
            }
        }
        Err(e.into())
    }

    fn to_blob(full_path: &str, metadata: &std::fs::Metadata) -> Result<Blob> {
        if metadata.is_dir() {
            return Blob::new(full_path, BlobKind::Folder);
        }

        let mut blob = Blob::file(full_path)?.with_size(metadata.len());
        if let Ok(modified) = metadata.modified() {
            blob = blob.with_last_modified(DateTime::<Utc>::from(modified));
        }
        if let Ok(created) = metadata.created() {
            blob = blob.with_created(DateTime::<Utc>::from(created));
        }
        Ok(blob)
    }
}

#[async_trait]
impl BlobAdapter for LocalAdapter {
    fn name(&self) -> &str {
        "local"
    }

    fn append_support(&self) -> AppendSupport {
        AppendSupport::Native
    }

    async fn list_at(&self, folder_path: &str, _options: &ListOptions) -> Result<Vec<Blob>> {
        let dir = self.resolve_path(folder_path)?;

        match fs::metadata(&dir).await {
            Ok(metadata) if metadata.is_dir() => {}
            Ok(_) => return Err(Error::not_found(format!("'{}' is not a folder", folder_path))),
            Err(e) if e.kind() == IoErrorKind::NotFound => {
                return Err(Error::not_found(format!("folder '{}'", folder_path)));
            }
            Err(e) => return Err(e.into()),
        }

        let mut entries = match fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == IoErrorKind::NotFound => {
                return Err(Error::not_found(format!("folder '{}'", folder_path)));
            }
            Err(e) => return Err(e.into()),
        };

        let mut level = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let metadata = entry.metadata().await?;
            let name = entry.file_name().to_string_lossy().to_string();
            let full_path = path::combine([folder_path, name.as_str()]);
            level.push(Self::to_blob(&full_path, &metadata)?);
        }

        level.sort_by(|a, b| a.name().cmp(b.name()));
        Ok(level)
    }

    async fn open_read(&self, full_path: &str) -> Result<Option<BlobReader>> {
        let file_path = self.resolve_path(full_path)?;

        match fs::metadata(&file_path).await {
            Ok(metadata) if metadata.is_file() => {}
            Ok(_) => return Ok(None),
            Err(e) if e.kind() == IoErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        }

        let file = fs::File::open(&file_path).await?;
        let reader: BlobReader = Box::new(file);
        Ok(Some(reader))
    }

    async fn write(&self, full_path: &str, data: Bytes, append: bool) -> Result<()> {
        let file_path = self.resolve_path(full_path)?;
        if fs::metadata(&file_path).await.is_ok_and(|m| m.is_dir()) {
            return Err(Error::conflict(format!("'{}' is a folder", full_path)));
        }
        if let Some(parent) = file_path.parent() {
            self.create_dirs(parent).await?;
        }

        if append {
            let mut file = fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(&file_path)
                .await?;
            file.write_all(&data).await?;
            file.flush().await?;
        } else {
            fs::write(&file_path, &data).await?;
        }
        Ok(())
    }

    async fn delete_single(&self, full_path: &str) -> Result<()> {
        let file_path = self.resolve_path(full_path)?;

        match fs::metadata(&file_path).await {
            Ok(metadata) if metadata.is_dir() => fs::remove_dir_all(&file_path).await?,
            Ok(_) => fs::remove_file(&file_path).await?,
            Err(e) if e.kind() == IoErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        Ok(())
    }

    async fn exists_single(&self, full_path: &str) -> Result<bool> {
        let file_path = self.resolve_path(full_path)?;
        Ok(fs::try_exists(&file_path).await?)
    }

    async fn get_blob(&self, full_path: &str) -> Result<Option<Blob>> {
        let file_path = self.resolve_path(full_path)?;

        match fs::metadata(&file_path).await {
            Ok(metadata) => Self::to_blob(full_path, &metadata).map(Some),
            Err(e) if e.kind() == IoErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn create_folder(&self, folder_path: &str) -> Result<()> {
        let dir = self.resolve_path(folder_path)?;
        if fs::metadata(&dir).await.is_ok_and(|m| m.is_file()) {
            return Err(Error::conflict(format!("'{}' is a file", folder_path)));
        }
        self.create_dirs(&dir).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;
    use tokio::io::AsyncReadExt;

    #[tokio::test]
    async fn test_local_storage() {
        let temp_dir = TempDir::new().unwrap();
        let storage = LocalAdapter::new(temp_dir.path()).unwrap();

        let key = "/test/file.txt";
        let data = Bytes::from("hello world");

        storage.write(key, data.clone(), false).await.unwrap();
        assert!(storage.exists_single(key).await.unwrap());

        let mut reader = storage.open_read(key).await.unwrap().unwrap();
        let mut retrieved = Vec::new();
        reader.read_to_end(&mut retrieved).await.unwrap();
        assert_eq!(retrieved, data);

        storage.delete_single(key).await.unwrap();
        assert!(!storage.exists_single(key).await.unwrap());
        storage.delete_single(key).await.unwrap();
    }

    #[tokio::test]
    async fn test_list_levels() {
        let temp_dir = TempDir::new().unwrap();
        let storage = LocalAdapter::new(temp_dir.path()).unwrap();

        storage.write("/a/x.txt", Bytes::from("0123456789"), false).await.unwrap();
        storage.write("/a/b/y.txt", Bytes::from("y"), false).await.unwrap();

        let level = storage.list_at("/a", &ListOptions::new()).await.unwrap();
        assert_eq!(
            level,
            vec![Blob::folder("/a/b").unwrap(), Blob::file("/a/x.txt").unwrap()]
        );
        assert_eq!(level[1].size, Some(10));

        let err = storage.list_at("/missing", &ListOptions::new()).await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_append_and_folder_delete() {
        let temp_dir = TempDir::new().unwrap();
        let storage = LocalAdapter::new(temp_dir.path()).unwrap();

        storage.write("/logs/app.log", Bytes::from("a"), true).await.unwrap();
        storage.write("/logs/app.log", Bytes::from("b"), true).await.unwrap();
        let blob = storage.get_blob("/logs/app.log").await.unwrap().unwrap();
        assert_eq!(blob.size, Some(2));

        assert!(storage.open_read("/logs").await.unwrap().is_none());

        storage.delete_single("/logs").await.unwrap();
        assert!(!storage.exists_single("/logs").await.unwrap());
    }

    #[tokio::test]
    async fn test_rejects_traversal() {
        let temp_dir = TempDir::new().unwrap();
        let storage = LocalAdapter::new(temp_dir.path()).unwrap();

        let err = storage.exists_single("/../etc/passwd").await.unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::BadRequest);
    }

    #[tokio::test]
    async fn test_file_folder_conflicts() {
        let temp_dir = TempDir::new().unwrap();
        let storage = LocalAdapter::new(temp_dir.path()).unwrap();
        storage.write("/a/x.txt", Bytes::from("x"), false).await.unwrap();

        let err = storage.list_at("/a/x.txt", &ListOptions::new()).await.unwrap_err();
        assert!(err.is_not_found());

        let err = storage.write("/a", Bytes::from("no"), false).await.unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::Conflict);

        let err = storage
            .write("/a/x.txt/inner", Bytes::from("no"), false)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::Conflict);

        let err = storage.create_folder("/a/x.txt").await.unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::Conflict);
    }

    #[tokio::test]
    async fn test_create_empty_folder() {
        let temp_dir = TempDir::new().unwrap();
        let storage = LocalAdapter::new(temp_dir.path()).unwrap();

        storage.create_folder("/empty/inner").await.unwrap();
        let level = storage.list_at("/empty", &ListOptions::new()).await.unwrap();
        assert_eq!(level, vec![Blob::folder("/empty/inner").unwrap()]);
        assert!(storage.list_at("/empty/inner", &ListOptions::new()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_metadata_not_supported() {
        let temp_dir = TempDir::new().unwrap();
        let storage = LocalAdapter::new(temp_dir.path()).unwrap();
        storage.write("/a.txt", Bytes::from("a"), false).await.unwrap();

        let blob = storage.get_blob("/a.txt").await.unwrap().unwrap();
        let err = storage.set_blob(&blob).await.unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::NotSupported);
    }
}
