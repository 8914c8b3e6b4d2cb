//! S3 storage backend
//!
//! S3 is a flat key store. Folders are key prefixes ending in `/` and are
//! discovered through the `/` delimiter, so a folder that never existed
//! cannot be told apart from an empty one: listing it returns an empty
//! result. Appends are emulated by the engine.

use std::collections::HashMap;
use std::io::Cursor;

use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_s3::config::Region;
use aws_sdk_s3::operation::head_object::HeadObjectOutput;
use aws_sdk_s3::primitives::{ByteStream, DateTime as S3DateTime};
use aws_sdk_s3::types::MetadataDirective;
use aws_sdk_s3::Client;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::future::join_all;
use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use tracing::{debug, instrument};

use super::{AppendSupport, BlobAdapter, BlobReader};
use crate::blob::{Blob, BlobKind};
use crate::list::ListOptions;
use crate::path;
use crate::{Error, Result};

/// S3 storage backend
pub struct S3Adapter {
    client: Client,
    bucket: String,
}

impl S3Adapter {
    pub async fn new(bucket: String, region: String, endpoint: Option<String>) -> Result<Self> {
        let config = aws_config::defaults(BehaviorVersion::latest())
            .region(Region::new(region))
            .load()
            .await;

        let mut s3_config_builder = aws_sdk_s3::config::Builder::from(&config);

        if let Some(endpoint_url) = endpoint {
            s3_config_builder = s3_config_builder
                .endpoint_url(endpoint_url)
                .force_path_style(true);
        }

        let s3_config = s3_config_builder.build();
        let client = Client::from_conf(s3_config);

        Ok(Self::from_client(client, bucket))
    }

    pub fn from_client(client: Client, bucket: impl Into<String>) -> Self {
        Self {
            client,
            bucket: bucket.into(),
        }
    }

    fn key(full_path: &str) -> String {
        path::normalize_with(full_path, true)
    }

    fn folder_prefix(folder_path: &str) -> String {
        let key = Self::key(folder_path);
        if key.is_empty() {
            key
        } else {
            format!("{}{}", key, path::PATH_SEPARATOR)
        }
    }

    /// Every key below `prefix`, across all pages.
    async fn keys_under(&self, prefix: &str) -> Result<Vec<String>> {
        let mut keys = Vec::new();
        let mut token: Option<String> = None;

        loop {
            let response = self
                .client
                .list_objects_v2()
                .bucket(&self.bucket)
                .prefix(prefix)
                .set_continuation_token(token.take())
                .send()
                .await
                .map_err(|e| Error::storage(format!("S3 list failed: {}", e)))?;

            keys.extend(
                response
                    .contents()
                    .iter()
                    .filter_map(|obj| obj.key().map(|k| k.to_string())),
            );

            match response.next_continuation_token() {
                Some(next) if response.is_truncated().unwrap_or(false) => {
                    token = Some(next.to_string())
                }
                _ => break,
            }
        }

        Ok(keys)
    }

    async fn has_keys_under(&self, prefix: &str) -> Result<bool> {
        let response = self
            .client
            .list_objects_v2()
            .bucket(&self.bucket)
            .prefix(prefix)
            .max_keys(1)
            .send()
            .await
            .map_err(|e| Error::storage(format!("S3 list failed: {}", e)))?;

        Ok(!response.contents().is_empty())
    }

    /// Head the object, `None` when the key does not exist.
    async fn head(&self, key: &str) -> Result<Option<HeadObjectOutput>> {
        match self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
        {
            Ok(output) => Ok(Some(output)),
            Err(err) => {
                let err = err.into_service_error();
                if err.is_not_found() {
                    Ok(None)
                } else {
                    Err(Error::storage(format!("S3 head failed: {}", err)))
                }
            }
        }
    }
}

/// Characters left as-is in a key segment of `x-amz-copy-source`.
const KEY_SEGMENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');

/// `bucket/key` with every key segment percent-encoded.
fn copy_source(bucket: &str, key: &str) -> String {
    let encoded = key
        .split(path::PATH_SEPARATOR)
        .map(|segment| utf8_percent_encode(segment, KEY_SEGMENT).to_string())
        .collect::<Vec<_>>()
        .join(path::PATH_SEPARATOR_STR);
    format!("{}/{}", bucket, encoded)
}

fn to_chrono(at: &S3DateTime) -> Option<DateTime<Utc>> {
    DateTime::from_timestamp(at.secs(), at.subsec_nanos())
}

fn object_blob(
    full_path: &str,
    size: Option<i64>,
    last_modified: Option<&S3DateTime>,
    e_tag: Option<&str>,
) -> Result<Blob> {
    let mut blob = Blob::file(full_path)?;
    if let Some(size) = size {
        blob = blob.with_size(size.max(0) as u64);
    }
    if let Some(at) = last_modified.and_then(to_chrono) {
        blob = blob.with_last_modified(at);
    }
    if let Some(e_tag) = e_tag {
        let e_tag = e_tag.trim_matches('"');
        blob = blob.with_content_hash(e_tag).with_property("ETag", e_tag);
    }
    Ok(blob)
}

#[async_trait]
impl BlobAdapter for S3Adapter {
    fn name(&self) -> &str {
        "s3"
    }

    fn append_support(&self) -> AppendSupport {
        AppendSupport::Emulated
    }

    #[instrument(skip(self, options), fields(bucket = %self.bucket))]
    async fn list_at(&self, folder_path: &str, options: &ListOptions) -> Result<Vec<Blob>> {
        // the leaf-name prefix can only be pushed down when no sub-folder has
        // to be visited for recursion
        let mut request_prefix = Self::folder_prefix(folder_path);
        if !options.recurse {
            if let Some(file_prefix) = &options.file_prefix {
                request_prefix.push_str(file_prefix);
            }
        }
        let can_stop_early = !options.recurse && options.browse_filter.is_none();

        let mut level = Vec::new();
        let mut token: Option<String> = None;

        loop {
            let response = self
                .client
                .list_objects_v2()
                .bucket(&self.bucket)
                .prefix(&request_prefix)
                .delimiter(path::PATH_SEPARATOR_STR)
                .set_continuation_token(token.take())
                .send()
                .await
                .map_err(|e| Error::storage(format!("S3 list failed: {}", e)))?;

            for common in response.common_prefixes() {
                if let Some(folder) = common.prefix() {
                    level.push(Blob::new(folder, BlobKind::Folder)?);
                }
            }

            for obj in response.contents() {
                let Some(key) = obj.key() else {
                    continue;
                };
                // zero-byte folder markers
                if key.ends_with(path::PATH_SEPARATOR) {
                    continue;
                }
                level.push(object_blob(key, obj.size(), obj.last_modified(), obj.e_tag())?);
            }

            if can_stop_early && options.is_satisfied_by(level.len()) {
                debug!(count = level.len(), "enough entries, not fetching further pages");
                break;
            }

            match response.next_continuation_token() {
                Some(next) if response.is_truncated().unwrap_or(false) => {
                    token = Some(next.to_string())
                }
                _ => break,
            }
        }

        Ok(level)
    }

    #[instrument(skip(self), fields(bucket = %self.bucket))]
    async fn open_read(&self, full_path: &str) -> Result<Option<BlobReader>> {
        let response = match self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(Self::key(full_path))
            .send()
            .await
        {
            Ok(response) => response,
            Err(err) => {
                let err = err.into_service_error();
                if err.is_no_such_key() {
                    return Ok(None);
                }
                return Err(Error::storage(format!("S3 get failed: {}", err)));
            }
        };

        let data = response
            .body
            .collect()
            .await
            .map_err(|e| Error::storage(format!("S3 body read failed: {}", e)))?;

        let reader: BlobReader = Box::new(Cursor::new(data.into_bytes()));
        Ok(Some(reader))
    }

    #[instrument(skip(self, data), fields(bucket = %self.bucket, len = data.len()))]
    async fn write(&self, full_path: &str, data: Bytes, append: bool) -> Result<()> {
        if append {
            return Err(Error::not_supported("S3 objects cannot be appended in place"));
        }

        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(Self::key(full_path))
            .body(ByteStream::from(data))
            .send()
            .await
            .map_err(|e| Error::storage(format!("S3 put failed: {}", e)))?;

        Ok(())
    }

    #[instrument(skip(self), fields(bucket = %self.bucket))]
    async fn delete_single(&self, full_path: &str) -> Result<()> {
        let key = Self::key(full_path);

        // S3 treats deleting a missing key as success
        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(&key)
            .send()
            .await
            .map_err(|e| Error::storage(format!("S3 delete failed: {}", e)))?;

        let children = self.keys_under(&Self::folder_prefix(full_path)).await?;
        if children.is_empty() {
            return Ok(());
        }

        debug!(count = children.len(), "deleting folder contents");
        let outcomes = join_all(children.iter().map(|child| {
            self.client
                .delete_object()
                .bucket(&self.bucket)
                .key(child)
                .send()
        }))
        .await;

        for outcome in outcomes {
            outcome.map_err(|e| Error::storage(format!("S3 delete failed: {}", e)))?;
        }
        Ok(())
    }

    async fn exists_single(&self, full_path: &str) -> Result<bool> {
        if self.head(&Self::key(full_path)).await?.is_some() {
            return Ok(true);
        }
        self.has_keys_under(&Self::folder_prefix(full_path)).await
    }

    #[instrument(skip(self), fields(bucket = %self.bucket))]
    async fn get_blob(&self, full_path: &str) -> Result<Option<Blob>> {
        let Some(head) = self.head(&Self::key(full_path)).await? else {
            if self.has_keys_under(&Self::folder_prefix(full_path)).await? {
                return Blob::new(full_path, BlobKind::Folder).map(Some);
            }
            return Ok(None);
        };

        let mut blob = object_blob(
            full_path,
            head.content_length(),
            head.last_modified(),
            head.e_tag(),
        )?;
        if let Some(content_type) = head.content_type() {
            blob = blob.with_content_type(content_type);
        }
        if let Some(metadata) = head.metadata() {
            blob.metadata = metadata.clone();
        }
        Ok(Some(blob))
    }

    /// Writes the zero-byte `folder/` marker that listings skip.
    #[instrument(skip(self), fields(bucket = %self.bucket))]
    async fn create_folder(&self, folder_path: &str) -> Result<()> {
        let marker = Self::folder_prefix(folder_path);
        if marker.is_empty() {
            return Ok(());
        }

        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(marker)
            .body(ByteStream::from(Bytes::new()))
            .send()
            .await
            .map_err(|e| Error::storage(format!("S3 put failed: {}", e)))?;

        Ok(())
    }

    /// Rewrites the object onto itself with replaced user metadata.
    #[instrument(skip(self, blob), fields(bucket = %self.bucket, path = %blob.full_path()))]
    async fn set_blob(&self, blob: &Blob) -> Result<()> {
        let key = Self::key(&blob.full_path());
        let Some(head) = self.head(&key).await? else {
            return Err(Error::not_found(blob.full_path()));
        };

        let metadata: HashMap<String, String> = blob.metadata.clone();
        let content_type = blob
            .content_type()
            .or(head.content_type())
            .map(str::to_string);

        self.client
            .copy_object()
            .bucket(&self.bucket)
            .key(&key)
            .copy_source(copy_source(&self.bucket, &key))
            .metadata_directive(MetadataDirective::Replace)
            .set_metadata(Some(metadata))
            .set_content_type(content_type)
            .send()
            .await
            .map_err(|e| Error::storage(format!("S3 copy failed: {}", e)))?;

        Ok(())
    }
}
