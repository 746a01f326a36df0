//! Metadata sidecar document model.
//!
//! Each shard has a JSON `.meta` object next to it carrying an enriched
//! index (entries plus payload checksums), tombstones, and stats. Sidecar
//! keys are `{uid}:{iso8601_utc_Z}`; lookups degrade gracefully for older
//! sidecars keyed by bare UID.

use chrono::{DateTime, Utc};
use des_common::time::format_utc_iso_z;
use serde::{Deserialize, Serialize};
use serde_json::Map as JsonMap;

use crate::error::{ShardError, ShardResult};
use crate::index::ShardEntry;

pub const SIDECAR_VERSION: u32 = 1;
pub const CHECKSUM_ALGO_SHA256: &str = "sha256";

/// An index entry enriched with its payload checksum.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetaEntry {
    #[serde(flatten)]
    pub entry: ShardEntry,
    pub checksum: Option<String>,
    pub checksum_algo: Option<String>,
}

impl MetaEntry {
    pub fn with_sha256(entry: ShardEntry, checksum: String) -> Self {
        MetaEntry {
            entry,
            checksum: Some(checksum),
            checksum_algo: Some(CHECKSUM_ALGO_SHA256.to_string()),
        }
    }
}

/// Durable deletion marker; its presence supersedes a live index entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tombstone {
    pub uid: String,
    pub created_at: String,
    pub deleted_at: String,
    pub deleted_by: String,
    pub reason: String,
    pub ticket_id: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct ShardStats {
    pub entries: u64,
    pub deleted_files: u64,
    pub deletion_ratio: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShardMetadata {
    pub version: u32,
    pub shard_file: String,
    pub shard_size: u64,
    pub created_at: String,
    pub last_updated: String,
    pub index: JsonMap<String, serde_json::Value>,
    pub tombstones: JsonMap<String, serde_json::Value>,
    #[serde(default)]
    pub stats: ShardStats,
}

impl ShardMetadata {
    pub fn new(shard_file: String, shard_size: u64, created_at: &DateTime<Utc>, now: &DateTime<Utc>) -> Self {
        ShardMetadata {
            version: SIDECAR_VERSION,
            shard_file,
            shard_size,
            created_at: format_utc_iso_z(created_at),
            last_updated: format_utc_iso_z(now),
            index: JsonMap::new(),
            tombstones: JsonMap::new(),
            stats: ShardStats::default(),
        }
    }

    /// Canonical sidecar key for a UID and creation timestamp.
    pub fn build_key(uid: &str, created_at: &DateTime<Utc>) -> String {
        format!("{uid}:{}", format_utc_iso_z(created_at))
    }

    pub fn to_json(&self) -> ShardResult<String> {
        serde_json::to_string_pretty(self)
            .map_err(|e| ShardError::CorruptMetadata(format!("unencodable sidecar: {e}")))
    }

    pub fn from_json(data: &str) -> ShardResult<Self> {
        serde_json::from_str(data)
            .map_err(|e| ShardError::CorruptMetadata(format!("invalid sidecar JSON: {e}")))
    }

    pub fn insert_entry(&mut self, key: String, entry: MetaEntry) -> ShardResult<()> {
        let value = serde_json::to_value(entry)
            .map_err(|e| ShardError::CorruptMetadata(format!("unencodable sidecar entry: {e}")))?;
        self.index.insert(key, value);
        Ok(())
    }

    /// Look up the index entry for `(uid, created_at)`.
    ///
    /// Tries the exact `{uid}:{iso}` key, then a bare-UID key, then a
    /// unique `{uid}:`-prefixed key, so sidecars written before timestamps
    /// entered the key stay readable.
    pub fn get_entry(&self, uid: &str, created_at: &DateTime<Utc>) -> Option<MetaEntry> {
        let key = Self::build_key(uid, created_at);
        if let Some(value) = self.index.get(&key) {
            return serde_json::from_value(value.clone()).ok();
        }
        if let Some(value) = self.index.get(uid) {
            return serde_json::from_value(value.clone()).ok();
        }
        let prefix = format!("{uid}:");
        let mut matches = self.index.iter().filter(|(k, _)| k.starts_with(&prefix));
        match (matches.next(), matches.next()) {
            (Some((_, value)), None) => serde_json::from_value(value.clone()).ok(),
            _ => None,
        }
    }

    pub fn is_tombstoned(&self, uid: &str, created_at: &DateTime<Utc>) -> bool {
        self.tombstones.contains_key(&Self::build_key(uid, created_at))
    }

    pub fn insert_tombstone(&mut self, tombstone: Tombstone, created_at: &DateTime<Utc>) -> ShardResult<()> {
        let key = Self::build_key(&tombstone.uid, created_at);
        let value = serde_json::to_value(tombstone)
            .map_err(|e| ShardError::CorruptMetadata(format!("unencodable tombstone: {e}")))?;
        self.tombstones.insert(key, value);
        Ok(())
    }

    /// Refresh `stats` from the current index and tombstone maps.
    pub fn recompute_stats(&mut self) {
        let entries = self.index.len() as u64;
        let deleted_files = self.tombstones.len() as u64;
        self.stats = ShardStats {
            entries,
            deleted_files,
            deletion_ratio: if entries > 0 {
                deleted_files as f64 / entries as f64
            } else {
                0.0
            },
        };
    }
}
