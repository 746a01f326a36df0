//! Sidecar manager: loads, rebuilds and mutates `.meta` documents.
//!
//! Sidecars are rewritten in place (tombstones, rebuilds); shards never
//! are. Concurrent tombstone writes on one shard serialize on a per-shard
//! mutex; the parsed-sidecar cache is shared with the retriever.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use des_common::time::{format_utc_iso_z, parse_iso_utc};
use des_shard::cache::SharedLruCache;
use des_shard::compression::decompress_payload;
use des_shard::config::ContainerConfig;
use des_shard::bigfiles::build_bigfile_key;
use des_shard::metadata::{MetaEntry, ShardMetadata, Tombstone};
use des_shard::reader::ShardReader;
use des_shard::index::ShardEntry;
use sha2::{Digest, Sha256};
use tokio::sync::Mutex;

use crate::blobstore::BlobStore;
use crate::error::{StoreError, StoreResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChecksumStatus {
    Verified,
    /// The sidecar predates checksums; nothing to compare against.
    Missing,
    Mismatch,
}

/// Derive the sidecar key for a shard object key.
pub fn meta_key(shard_key: &str) -> String {
    match shard_key.strip_suffix(".des") {
        Some(stem) => format!("{stem}.meta"),
        None => format!("{shard_key}.meta"),
    }
}

pub struct MetadataManager {
    store: Arc<dyn BlobStore>,
    container: ContainerConfig,
    cache: SharedLruCache<String, Arc<ShardMetadata>>,
    shard_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl MetadataManager {
    pub fn new(store: Arc<dyn BlobStore>, container: ContainerConfig, cache_capacity: usize) -> Self {
        MetadataManager {
            store,
            container,
            cache: SharedLruCache::new(cache_capacity),
            shard_locks: Mutex::new(HashMap::new()),
        }
    }

    async fn lock_for(&self, shard_key: &str) -> Arc<Mutex<()>> {
        let mut locks = self.shard_locks.lock().await;
        locks
            .entry(shard_key.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Load the sidecar for `shard_key`, preferring the cache.
    ///
    /// With `rebuild_on_missing`, a missing or unparseable sidecar is
    /// reconstructed from the shard itself; otherwise those conditions
    /// surface to the caller.
    pub async fn get_metadata(
        &self,
        shard_key: &str,
        rebuild_on_missing: bool,
    ) -> StoreResult<Arc<ShardMetadata>> {
        if let Some(cached) = self.cache.get(&shard_key.to_string()) {
            tracing::debug!(shard_key, "sidecar cache hit");
            return Ok(cached);
        }

        let loaded = match self.store.get(&meta_key(shard_key)).await {
            Ok(raw) => {
                let text = String::from_utf8(raw).map_err(|_| {
                    StoreError::Shard(des_shard::ShardError::CorruptMetadata(
                        "sidecar is not UTF-8".to_string(),
                    ))
                })?;
                match ShardMetadata::from_json(&text) {
                    Ok(meta) => Ok(meta),
                    Err(err) if rebuild_on_missing => {
                        tracing::warn!(shard_key, %err, "invalid sidecar, rebuilding");
                        Err(err.into())
                    }
                    Err(err) => return Err(err.into()),
                }
            }
            Err(StoreError::NotFound(_)) if rebuild_on_missing => {
                tracing::warn!(shard_key, "sidecar missing, rebuilding");
                Err(StoreError::NotFound(shard_key.to_string()))
            }
            Err(err) => return Err(err),
        };

        let meta = match loaded {
            Ok(meta) => meta,
            Err(_) => self.rebuild_metadata(shard_key).await?,
        };

        let meta = Arc::new(meta);
        self.cache.put(shard_key.to_string(), meta.clone());
        Ok(meta)
    }

    async fn fetch_entry_payload(&self, shard_key: &str, body: &[u8], entry: &ShardEntry) -> StoreResult<Vec<u8>> {
        if entry.is_bigfile {
            let hash = entry.bigfile_hash.as_deref().ok_or_else(|| {
                StoreError::Shard(des_shard::ShardError::CorruptShard(
                    "bigfile entry missing hash".to_string(),
                ))
            })?;
            let key = build_bigfile_key(shard_key, &self.container.bigfiles_prefix, hash);
            return self.store.get(&key).await;
        }

        let (offset, length) = match (entry.offset, entry.length) {
            (Some(o), Some(l)) => (o as usize, l as usize),
            _ => {
                return Err(StoreError::Shard(des_shard::ShardError::CorruptShard(
                    format!("inline entry missing offsets for UID {:?}", entry.uid),
                )))
            }
        };
        let end = offset.checked_add(length).filter(|e| *e <= body.len()).ok_or_else(|| {
            StoreError::Shard(des_shard::ShardError::CorruptShard(format!(
                "entry extent out of bounds for UID {:?}",
                entry.uid
            )))
        })?;
        let payload = &body[offset..end];
        let codec = entry.codec.ok_or_else(|| {
            StoreError::Shard(des_shard::ShardError::CorruptShard(format!(
                "inline entry missing codec for UID {:?}",
                entry.uid
            )))
        })?;
        Ok(decompress_payload(codec, payload, entry.uncompressed_size)?)
    }

    /// Rebuild a sidecar from the shard's own index and payloads.
    ///
    /// Entry keys come out as `{uid}:{iso}` when the index entry carries a
    /// `created_at` property, bare UID otherwise; checksums are recomputed
    /// over the uncompressed payloads.
    async fn rebuild_metadata(&self, shard_key: &str) -> StoreResult<ShardMetadata> {
        let body = self.store.get(shard_key).await?;
        let shard_size = body.len() as u64;
        let reader = ShardReader::from_bytes(body.clone(), self.container.clone(), None)?;

        let now = Utc::now();
        let mut meta = ShardMetadata::new(
            shard_key.rsplit('/').next().unwrap_or(shard_key).to_string(),
            shard_size,
            &now,
            &now,
        );

        for entry in reader.index.entries() {
            let key = match entry_created_at(entry) {
                Some(created_at) => ShardMetadata::build_key(&entry.uid, &created_at),
                None => entry.uid.clone(),
            };
            let payload = self.fetch_entry_payload(shard_key, &body, entry).await?;
            let checksum = hex::encode(Sha256::digest(&payload));
            meta.insert_entry(key, MetaEntry::with_sha256(entry.clone(), checksum))?;
        }
        meta.recompute_stats();

        self.save_metadata(shard_key, &meta).await?;
        tracing::info!(shard_key, entries = meta.stats.entries, "sidecar rebuilt");
        Ok(meta)
    }

    /// Compare `data` against the stored checksum for `(uid, created_at)`.
    pub async fn verify_entry_checksum(
        &self,
        shard_key: &str,
        uid: &str,
        created_at: &DateTime<Utc>,
        data: &[u8],
    ) -> StoreResult<ChecksumStatus> {
        let meta = self.get_metadata(shard_key, true).await?;
        let entry = meta
            .get_entry(uid, created_at)
            .ok_or_else(|| StoreError::NotFound(format!("{uid} not in sidecar for {shard_key}")))?;
        Ok(compare_checksum(&entry, uid, data))
    }

    /// Record a tombstone for `(uid, created_at)` and persist the sidecar.
    pub async fn add_tombstone(
        &self,
        shard_key: &str,
        uid: &str,
        created_at: &DateTime<Utc>,
        deleted_by: &str,
        reason: &str,
        ticket_id: Option<&str>,
    ) -> StoreResult<()> {
        let lock = self.lock_for(shard_key).await;
        let _guard = lock.lock().await;

        let meta = self.get_metadata(shard_key, true).await?;
        if meta.is_tombstoned(uid, created_at) {
            return Err(StoreError::AlreadyDeleted(format!("{uid} in {shard_key}")));
        }
        if meta.get_entry(uid, created_at).is_none() {
            return Err(StoreError::NotFound(format!("{uid} not in shard {shard_key}")));
        }

        let now = Utc::now();
        let mut updated = (*meta).clone();
        updated.insert_tombstone(
            Tombstone {
                uid: uid.to_string(),
                created_at: format_utc_iso_z(created_at),
                deleted_at: format_utc_iso_z(&now),
                deleted_by: deleted_by.to_string(),
                reason: reason.to_string(),
                ticket_id: ticket_id.map(|t| t.to_string()),
            },
            created_at,
        )?;
        updated.last_updated = format_utc_iso_z(&now);
        updated.recompute_stats();

        self.save_metadata(shard_key, &updated).await?;
        tracing::info!(shard_key, uid, reason, "tombstone recorded");
        Ok(())
    }

    /// Persist a sidecar and refresh the cache.
    pub async fn save_metadata(&self, shard_key: &str, meta: &ShardMetadata) -> StoreResult<()> {
        let payload = meta.to_json()?.into_bytes();
        self.store
            .put(&meta_key(shard_key), payload, Some("application/json"))
            .await?;
        self.cache.put(shard_key.to_string(), Arc::new(meta.clone()));
        Ok(())
    }
}

/// Pull the `created_at` property an ingesting packer stamps on entries.
pub fn entry_created_at(entry: &ShardEntry) -> Option<DateTime<Utc>> {
    entry
        .properties
        .get("created_at")
        .and_then(|v| v.as_str())
        .and_then(|s| parse_iso_utc(s).ok())
}

fn compare_checksum(entry: &MetaEntry, uid: &str, data: &[u8]) -> ChecksumStatus {
    let stored = match entry.checksum.as_deref() {
        Some(stored) => stored,
        None => {
            tracing::warn!(uid, "no stored checksum (old sidecar format)");
            return ChecksumStatus::Missing;
        }
    };
    match entry.checksum_algo.as_deref() {
        Some("sha256") | None => {}
        Some(other) => {
            tracing::warn!(uid, algo = other, "unknown checksum algorithm");
            return ChecksumStatus::Mismatch;
        }
    }
    let computed = hex::encode(Sha256::digest(data));
    if computed == stored {
        ChecksumStatus::Verified
    } else {
        tracing::error!(uid, expected = stored, computed = %computed, "checksum mismatch");
        ChecksumStatus::Mismatch
    }
}
