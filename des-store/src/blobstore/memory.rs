//! In-memory [`BlobStore`] used by tests and local smoke runs.
//!
//! Tracks how many payload-bearing calls each category has seen so the
//! range-GET budget of the read path can be asserted.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::blobstore::BlobStore;
use crate::error::{StoreError, StoreResult};

#[derive(Default)]
pub struct MemoryBlobStore {
    objects: Mutex<BTreeMap<String, StoredObject>>,
    get_calls: AtomicUsize,
    head_calls: AtomicUsize,
    list_calls: AtomicUsize,
}

struct StoredObject {
    bytes: Vec<u8>,
    retain_until: Option<DateTime<Utc>>,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        MemoryBlobStore::default()
    }

    /// Number of GET-class calls (whole object, range, tail) so far.
    pub fn get_calls(&self) -> usize {
        self.get_calls.load(Ordering::SeqCst)
    }

    pub fn head_calls(&self) -> usize {
        self.head_calls.load(Ordering::SeqCst)
    }

    pub fn list_calls(&self) -> usize {
        self.list_calls.load(Ordering::SeqCst)
    }

    pub fn reset_counters(&self) {
        self.get_calls.store(0, Ordering::SeqCst);
        self.head_calls.store(0, Ordering::SeqCst);
        self.list_calls.store(0, Ordering::SeqCst);
    }

    pub fn contains(&self, key: &str) -> bool {
        self.objects.lock().expect("store lock").contains_key(key)
    }

    pub fn keys(&self) -> Vec<String> {
        self.objects.lock().expect("store lock").keys().cloned().collect()
    }

    pub fn retention_of(&self, key: &str) -> Option<DateTime<Utc>> {
        self.objects
            .lock()
            .expect("store lock")
            .get(key)
            .and_then(|o| o.retain_until)
    }

    fn read(&self, key: &str) -> StoreResult<Vec<u8>> {
        self.objects
            .lock()
            .expect("store lock")
            .get(key)
            .map(|o| o.bytes.clone())
            .ok_or_else(|| StoreError::NotFound(key.to_string()))
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn head(&self, key: &str) -> StoreResult<bool> {
        self.head_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.contains(key))
    }

    async fn get(&self, key: &str) -> StoreResult<Vec<u8>> {
        self.get_calls.fetch_add(1, Ordering::SeqCst);
        self.read(key)
    }

    async fn get_range(&self, key: &str, start: u64, length: u64) -> StoreResult<Vec<u8>> {
        self.get_calls.fetch_add(1, Ordering::SeqCst);
        let bytes = self.read(key)?;
        let start = start as usize;
        let end = (start + length as usize).min(bytes.len());
        if start > bytes.len() {
            return Err(StoreError::InvalidArgument(format!(
                "range start {start} beyond object of {} bytes",
                bytes.len()
            )));
        }
        Ok(bytes[start..end].to_vec())
    }

    async fn get_tail(&self, key: &str, length: u64) -> StoreResult<(Vec<u8>, u64)> {
        self.get_calls.fetch_add(1, Ordering::SeqCst);
        let bytes = self.read(key)?;
        let total = bytes.len() as u64;
        let start = bytes.len().saturating_sub(length as usize);
        Ok((bytes[start..].to_vec(), total))
    }

    async fn list_prefix(&self, prefix: &str) -> StoreResult<Vec<String>> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        let objects = self.objects.lock().expect("store lock");
        Ok(objects
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect())
    }

    async fn put(&self, key: &str, bytes: Vec<u8>, _content_type: Option<&str>) -> StoreResult<()> {
        self.objects
            .lock()
            .expect("store lock")
            .insert(key.to_string(), StoredObject { bytes, retain_until: None });
        Ok(())
    }

    async fn put_with_retention(
        &self,
        key: &str,
        bytes: Vec<u8>,
        retain_until: DateTime<Utc>,
    ) -> StoreResult<()> {
        self.objects.lock().expect("store lock").insert(
            key.to_string(),
            StoredObject { bytes, retain_until: Some(retain_until) },
        );
        Ok(())
    }

    async fn set_retention(&self, key: &str, retain_until: DateTime<Utc>) -> StoreResult<()> {
        let mut objects = self.objects.lock().expect("store lock");
        match objects.get_mut(key) {
            Some(object) => {
                object.retain_until = Some(retain_until);
                Ok(())
            }
            None => Err(StoreError::NotFound(key.to_string())),
        }
    }

    async fn delete(&self, key: &str) -> StoreResult<()> {
        self.objects.lock().expect("store lock").remove(key);
        Ok(())
    }
}
