//! Storage abstraction for shard, sidecar and BigFile objects.
//!
//! The retriever is written against this trait so the read path can be
//! exercised end-to-end against the in-memory implementation; production
//! wiring uses the S3 implementation.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::StoreResult;

pub mod memory;
pub mod s3;

pub use memory::MemoryBlobStore;
pub use s3::S3BlobStore;

#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Whether an object exists at `key`.
    async fn head(&self, key: &str) -> StoreResult<bool>;

    /// Fetch a whole object. Missing keys are `StoreError::NotFound`.
    async fn get(&self, key: &str) -> StoreResult<Vec<u8>>;

    /// Fetch `length` bytes starting at `start`.
    async fn get_range(&self, key: &str, start: u64, length: u64) -> StoreResult<Vec<u8>>;

    /// Fetch the final `length` bytes, returning `(bytes, total_size)`.
    async fn get_tail(&self, key: &str, length: u64) -> StoreResult<(Vec<u8>, u64)>;

    /// List keys under `prefix`, sorted ascending.
    async fn list_prefix(&self, prefix: &str) -> StoreResult<Vec<String>>;

    async fn put(&self, key: &str, bytes: Vec<u8>, content_type: Option<&str>) -> StoreResult<()>;

    /// Store an object under GOVERNANCE object lock until `retain_until`.
    async fn put_with_retention(
        &self,
        key: &str,
        bytes: Vec<u8>,
        retain_until: DateTime<Utc>,
    ) -> StoreResult<()>;

    /// Extend the object-lock retention of an existing object.
    async fn set_retention(&self, key: &str, retain_until: DateTime<Utc>) -> StoreResult<()>;

    async fn delete(&self, key: &str) -> StoreResult<()>;
}

/// Ensure a key prefix is either empty or ends with `/`.
pub fn normalize_prefix(prefix: &str) -> String {
    if prefix.is_empty() {
        String::new()
    } else if prefix.ends_with('/') {
        prefix.to_string()
    } else {
        format!("{prefix}/")
    }
}
