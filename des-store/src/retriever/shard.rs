//! Blob-store retriever with a bounded range-GET plan.
//!
//! A cold read that has to fall back to the in-shard index costs at most
//! four payload calls: header (8 B), footer tail (12 B), index section,
//! payload. Warm reads reuse the cached index and pay one.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use des_shard::bigfiles::build_bigfile_key;
use des_shard::cache::SharedLruCache;
use des_shard::compression::decompress_payload;
use des_shard::config::ContainerConfig;
use des_shard::format::{parse_footer, parse_header, FOOTER_SIZE, HEADER_SIZE};
use des_shard::index::{parse_index, ShardEntry, ShardIndex};
use des_shard::metadata::MetaEntry;
use des_shard::routing::{locate_shard, normalize_uid};
use sha2::{Digest, Sha256};

use crate::blobstore::{normalize_prefix, BlobStore};
use crate::error::{StoreError, StoreResult};
use crate::metadata::{ChecksumStatus, MetadataManager};
use crate::retriever::{build_ext_retention_key, ReadOutcome};

/// Parsed in-shard index plus the container version it was read from.
type CachedIndex = Arc<(u8, ShardIndex)>;

/// A shard object that may hold the UID, plus whether its sidecar was
/// present in the same listing.
struct Candidate {
    key: String,
    has_sidecar: bool,
}

pub struct ShardRetriever {
    store: Arc<dyn BlobStore>,
    metadata: Arc<MetadataManager>,
    container: ContainerConfig,
    index_cache: SharedLruCache<String, CachedIndex>,
    n_bits: u8,
    prefix: String,
    ext_retention_prefix: Option<String>,
    enforce_checksum: bool,
}

impl ShardRetriever {
    pub fn new(
        store: Arc<dyn BlobStore>,
        metadata: Arc<MetadataManager>,
        container: ContainerConfig,
        n_bits: u8,
        prefix: &str,
        ext_retention_prefix: Option<String>,
        enforce_checksum: bool,
    ) -> Self {
        ShardRetriever {
            store,
            metadata,
            container,
            index_cache: SharedLruCache::default(),
            n_bits,
            prefix: normalize_prefix(prefix),
            ext_retention_prefix,
            enforce_checksum,
        }
    }

    /// Whether a live (non-tombstoned) copy of the file exists.
    pub async fn has_file(&self, uid: &str, created_at: &DateTime<Utc>) -> StoreResult<bool> {
        Ok(self.get_file(uid, created_at).await?.is_found())
    }

    /// Point read of `(uid, created_at)`.
    pub async fn get_file(&self, uid: &str, created_at: &DateTime<Utc>) -> StoreResult<ReadOutcome> {
        let uid = normalize_uid(uid);

        if let Some(bytes) = self.get_from_ext_retention(&uid, created_at).await? {
            return Ok(ReadOutcome::Bytes(bytes));
        }

        for candidate in self.candidate_keys(&uid, created_at).await? {
            match self.read_from_candidate(&candidate, &uid, created_at).await? {
                ReadOutcome::NotFound => continue,
                outcome => return Ok(outcome),
            }
        }
        Ok(ReadOutcome::NotFound)
    }

    /// Tombstone the file, locating the shard that holds it.
    pub async fn delete_file(
        &self,
        uid: &str,
        created_at: &DateTime<Utc>,
        deleted_by: &str,
        reason: &str,
        ticket_id: Option<&str>,
    ) -> StoreResult<()> {
        let uid = normalize_uid(uid);
        for candidate in self.candidate_keys(&uid, created_at).await? {
            let key = &candidate.key;
            let meta = self.metadata.get_metadata(key, true).await?;
            if meta.is_tombstoned(&uid, created_at) {
                return Err(StoreError::AlreadyDeleted(format!("{uid} in {key}")));
            }
            if meta.get_entry(&uid, created_at).is_some() {
                return self
                    .metadata
                    .add_tombstone(key, &uid, created_at, deleted_by, reason, ticket_id)
                    .await;
            }
        }
        Err(StoreError::NotFound(format!("{uid} not found for {created_at}")))
    }

    /// Candidate shard objects for the routed coordinates, sorted.
    ///
    /// The single LIST also reveals which candidates have a sidecar, so a
    /// missing `.meta` never costs a doomed GET on the read path.
    async fn candidate_keys(&self, uid: &str, created_at: &DateTime<Utc>) -> StoreResult<Vec<Candidate>> {
        let location = locate_shard(uid, created_at, self.n_bits)?;
        let list_prefix = format!("{}{}_{}", self.prefix, location.date_dir, location.shard_hex);
        let keys = self.store.list_prefix(&list_prefix).await?;
        Ok(keys
            .iter()
            .filter(|k| k.ends_with(".des"))
            .map(|k| Candidate {
                key: k.clone(),
                has_sidecar: keys.contains(&crate::metadata::meta_key(k)),
            })
            .collect())
    }

    async fn get_from_ext_retention(
        &self,
        uid: &str,
        created_at: &DateTime<Utc>,
    ) -> StoreResult<Option<Vec<u8>>> {
        let prefix = match self.ext_retention_prefix.as_deref() {
            Some(prefix) if !prefix.is_empty() => prefix,
            _ => return Ok(None),
        };
        let key = build_ext_retention_key(prefix, uid, created_at);
        if !self.store.head(&key).await? {
            return Ok(None);
        }
        Ok(Some(self.store.get(&key).await?))
    }

    /// Resolve one candidate shard: sidecar first, in-shard index second.
    async fn read_from_candidate(
        &self,
        candidate: &Candidate,
        uid: &str,
        created_at: &DateTime<Utc>,
    ) -> StoreResult<ReadOutcome> {
        let key = candidate.key.as_str();

        // Sidecar path. A missing or unreadable sidecar is not fatal to
        // the read; the shard itself still knows where its payloads are.
        if candidate.has_sidecar {
            match self.metadata.get_metadata(key, false).await {
                Ok(meta) => {
                    if meta.is_tombstoned(uid, created_at) {
                        return Ok(ReadOutcome::Tombstoned);
                    }
                    if let Some(meta_entry) = meta.get_entry(uid, created_at) {
                        let bytes = self.read_entry_payload(key, &meta_entry.entry).await?;
                        self.apply_checksum_policy(uid, &meta_entry, &bytes)?;
                        return Ok(ReadOutcome::Bytes(bytes));
                    }
                }
                Err(err) => {
                    tracing::debug!(key, %err, "sidecar unavailable, using in-shard index");
                }
            }
        }

        let cached = self.get_index(key).await?;
        match cached.1.get(uid) {
            Some(entry) => {
                let bytes = self.read_entry_payload(key, entry).await?;
                Ok(ReadOutcome::Bytes(bytes))
            }
            None => Ok(ReadOutcome::NotFound),
        }
    }

    /// Fetch and cache the in-shard index with three bounded range GETs.
    async fn get_index(&self, key: &str) -> StoreResult<CachedIndex> {
        if let Some(cached) = self.index_cache.get(&key.to_string()) {
            return Ok(cached);
        }

        let header_bytes = self.store.get_range(key, 0, HEADER_SIZE as u64).await?;
        let header = parse_header(&header_bytes)?;
        let (footer_bytes, total_size) = self.store.get_tail(key, FOOTER_SIZE as u64).await?;
        let footer = parse_footer(&footer_bytes, total_size)?;
        let index_bytes = self
            .store
            .get_range(key, footer.index_offset, footer.index_size)
            .await?;
        let index = parse_index(&index_bytes, footer.index_offset, header.version)?;

        let cached: CachedIndex = Arc::new((header.version, index));
        self.index_cache.put(key.to_string(), cached.clone());
        Ok(cached)
    }

    async fn read_entry_payload(&self, shard_key: &str, entry: &ShardEntry) -> StoreResult<Vec<u8>> {
        if entry.is_bigfile {
            let hash = entry.bigfile_hash.as_deref().ok_or_else(|| {
                StoreError::Shard(des_shard::ShardError::CorruptShard(
                    "bigfile entry missing hash".to_string(),
                ))
            })?;
            let key = build_bigfile_key(shard_key, &self.container.bigfiles_prefix, hash);
            let data = self.store.get(&key).await?;
            if let Some(expected) = entry.bigfile_size {
                if data.len() as u64 != expected {
                    return Err(StoreError::Shard(des_shard::ShardError::CorruptShard(
                        format!("bigfile size mismatch for UID {:?}", entry.uid),
                    )));
                }
            }
            return Ok(data);
        }

        let (offset, length) = match (entry.offset, entry.compressed_size.or(entry.length)) {
            (Some(o), Some(l)) => (o, l),
            _ => {
                return Err(StoreError::Shard(des_shard::ShardError::CorruptShard(
                    format!("inline entry missing offsets for UID {:?}", entry.uid),
                )))
            }
        };
        let payload = self.store.get_range(shard_key, offset, length).await?;
        let codec = entry.codec.ok_or_else(|| {
            StoreError::Shard(des_shard::ShardError::CorruptShard(format!(
                "inline entry missing codec for UID {:?}",
                entry.uid
            )))
        })?;
        Ok(decompress_payload(codec, &payload, entry.uncompressed_size)?)
    }

    fn apply_checksum_policy(&self, uid: &str, entry: &MetaEntry, bytes: &[u8]) -> StoreResult<()> {
        let status = match entry.checksum.as_deref() {
            None => ChecksumStatus::Missing,
            Some(stored) => {
                let computed = hex::encode(Sha256::digest(bytes));
                if computed == stored {
                    ChecksumStatus::Verified
                } else {
                    ChecksumStatus::Mismatch
                }
            }
        };
        match status {
            ChecksumStatus::Verified => Ok(()),
            ChecksumStatus::Missing => {
                tracing::debug!(uid, "no stored checksum to verify");
                Ok(())
            }
            ChecksumStatus::Mismatch if self.enforce_checksum => Err(StoreError::ChecksumMismatch(
                format!("payload checksum mismatch for {uid}"),
            )),
            ChecksumStatus::Mismatch => {
                tracing::error!(uid, "checksum mismatch, returning bytes as-is");
                Ok(())
            }
        }
    }
}
