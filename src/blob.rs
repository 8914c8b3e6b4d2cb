//! Blob entity

use std::collections::HashMap;
use std::fmt;
use std::hash::{Hash, Hasher};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::path;
use crate::{Error, Result};

/// Property key holding the MIME type of a file.
pub const CONTENT_TYPE_PROPERTY: &str = "ContentType";

/// Whether a blob is a file or a folder
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BlobKind {
    File,
    Folder,
}

/// One logical file or folder in a storage namespace.
///
/// Identity is the normalized full path plus the kind. Size, timestamps,
/// properties and metadata are descriptive only and do not take part in
/// equality or hashing, so blobs can be de-duplicated in sets.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Blob {
    folder_path: String,
    name: String,
    kind: BlobKind,

    /// Size in bytes. Folders make no promise about this value.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_modified: Option<DateTime<Utc>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub created: Option<DateTime<Utc>>,

    /// Back-end specific content hash (MD5, ETag, CRC32...)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content_hash: Option<String>,

    /// Back-end specific extras such as an ETag
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub properties: HashMap<String, String>,

    /// User supplied key/value tags
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, String>,
}

impl Blob {
    /// Create a blob from its full path.
    pub fn new(full_path: &str, kind: BlobKind) -> Result<Self> {
        let mut segments = path::split(full_path);
        let name = match segments.pop() {
            Some(name) => name,
            None if kind == BlobKind::Folder => String::new(),
            None => {
                return Err(Error::bad_request(format!(
                    "file blob requires a name, got '{}'",
                    full_path
                )))
            }
        };

        Ok(Self::from_parts(path::combine(segments), name, kind))
    }

    pub fn file(full_path: &str) -> Result<Self> {
        Self::new(full_path, BlobKind::File)
    }

    pub fn folder(full_path: &str) -> Result<Self> {
        Self::new(full_path, BlobKind::Folder)
    }

    /// Create a blob from a folder path and a leaf name.
    pub fn in_folder(folder_path: &str, name: &str, kind: BlobKind) -> Result<Self> {
        let mut segments = path::split(folder_path);
        segments.push(name.to_string());
        Self::new(&path::combine(segments), kind)
    }

    fn from_parts(folder_path: String, name: String, kind: BlobKind) -> Self {
        Self {
            folder_path,
            name,
            kind,
            size: None,
            last_modified: None,
            created: None,
            content_hash: None,
            properties: HashMap::new(),
            metadata: HashMap::new(),
        }
    }

    pub fn folder_path(&self) -> &str {
        &self.folder_path
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> BlobKind {
        self.kind
    }

    pub fn is_file(&self) -> bool {
        self.kind == BlobKind::File
    }

    pub fn is_folder(&self) -> bool {
        self.kind == BlobKind::Folder
    }

    pub fn full_path(&self) -> String {
        if self.name.is_empty() {
            return self.folder_path.clone();
        }
        path::combine([self.folder_path.as_str(), self.name.as_str()])
    }

    pub fn content_type(&self) -> Option<&str> {
        self.properties.get(CONTENT_TYPE_PROPERTY).map(String::as_str)
    }

    pub fn with_size(mut self, size: u64) -> Self {
        self.size = Some(size);
        self
    }

    pub fn with_last_modified(mut self, at: DateTime<Utc>) -> Self {
        self.last_modified = Some(at);
        self
    }

    pub fn with_created(mut self, at: DateTime<Utc>) -> Self {
        self.created = Some(at);
        self
    }

    pub fn with_content_hash(mut self, hash: impl Into<String>) -> Self {
        self.content_hash = Some(hash.into());
        self
    }

    pub fn with_content_type(self, content_type: impl Into<String>) -> Self {
        self.with_property(CONTENT_TYPE_PROPERTY, content_type)
    }

    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Copy descriptive attributes from a freshly fetched copy of the same blob.
    pub fn merge_attributes(&mut self, other: &Blob) {
        if other.size.is_some() {
            self.size = other.size;
        }
        if other.last_modified.is_some() {
            self.last_modified = other.last_modified;
        }
        if other.created.is_some() {
            self.created = other.created;
        }
        if other.content_hash.is_some() {
            self.content_hash = other.content_hash.clone();
        }
        self.properties
            .extend(other.properties.iter().map(|(k, v)| (k.clone(), v.clone())));
        self.metadata
            .extend(other.metadata.iter().map(|(k, v)| (k.clone(), v.clone())));
    }
}

impl PartialEq for Blob {
    fn eq(&self, other: &Self) -> bool {
        self.kind == other.kind && self.full_path() == other.full_path()
    }
}

impl Eq for Blob {}

impl Hash for Blob {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.full_path().hash(state);
        self.kind.hash(state);
    }
}

impl fmt::Display for Blob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            BlobKind::File => write!(f, "{}", self.full_path()),
            BlobKind::Folder if self.name.is_empty() => write!(f, "{}", self.folder_path),
            BlobKind::Folder => write!(f, "{}{}", self.full_path(), path::PATH_SEPARATOR),
        }
    }
}
