//! Listing request descriptor

use std::fmt;
use std::sync::Arc;

use crate::blob::Blob;
use crate::path;

/// Caller supplied predicate deciding whether a blob is returned.
pub type BrowseFilter = Arc<dyn Fn(&Blob) -> bool + Send + Sync>;

/// Options for [`BlobStorage::list`](crate::BlobStorage::list)
#[derive(Clone)]
pub struct ListOptions {
    /// Folder to list, root by default
    pub folder_path: String,

    /// Descend into sub-folders
    pub recurse: bool,

    /// Case-sensitive prefix the leaf name must start with
    pub file_prefix: Option<String>,

    /// Cap on the total number of results across all levels
    pub max_results: Option<usize>,

    /// Applied after the prefix filter and before truncation
    pub browse_filter: Option<BrowseFilter>,

    /// Fetch full attributes for every returned file
    pub include_attributes: bool,
}

impl Default for ListOptions {
    fn default() -> Self {
        Self {
            folder_path: path::ROOT_FOLDER_PATH.to_string(),
            recurse: false,
            file_prefix: None,
            max_results: None,
            browse_filter: None,
            include_attributes: false,
        }
    }
}

impl ListOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn folder(mut self, folder_path: impl Into<String>) -> Self {
        self.folder_path = folder_path.into();
        self
    }

    pub fn recurse(mut self, recurse: bool) -> Self {
        self.recurse = recurse;
        self
    }

    pub fn prefix(mut self, prefix: impl Into<String>) -> Self {
        self.file_prefix = Some(prefix.into());
        self
    }

    pub fn max_results(mut self, max: usize) -> Self {
        self.max_results = Some(max);
        self
    }

    pub fn filter<F>(mut self, filter: F) -> Self
    where
        F: Fn(&Blob) -> bool + Send + Sync + 'static,
    {
        self.browse_filter = Some(Arc::new(filter));
        self
    }

    pub fn include_attributes(mut self, include: bool) -> Self {
        self.include_attributes = include;
        self
    }

    /// Whether a blob passes the prefix filter and then the browse filter.
    pub fn matches(&self, blob: &Blob) -> bool {
        if let Some(prefix) = &self.file_prefix {
            if !blob.name().starts_with(prefix.as_str()) {
                return false;
            }
        }
        self.browse_filter.as_ref().map_or(true, |filter| filter(blob))
    }

    /// Whether `count` results already satisfy the cap.
    pub fn is_satisfied_by(&self, count: usize) -> bool {
        self.max_results.is_some_and(|max| count >= max)
    }
}

impl fmt::Debug for ListOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ListOptions")
            .field("folder_path", &self.folder_path)
            .field("recurse", &self.recurse)
            .field("file_prefix", &self.file_prefix)
            .field("max_results", &self.max_results)
            .field("browse_filter", &self.browse_filter.is_some())
            .field("include_attributes", &self.include_attributes)
            .finish()
    }
}
