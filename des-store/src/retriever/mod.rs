//! Read path: locate candidate shards and serve payloads back.

use chrono::{DateTime, Utc};
use des_common::time::{format_date_dir, format_utc_iso_z};

pub mod local;
pub mod multi_zone;
pub mod shard;

pub use local::LocalShardRetriever;
pub use multi_zone::MultiZoneRetriever;
pub use shard::ShardRetriever;

/// Outcome of a point read. Tombstones and misses are ordinary results
/// here; the HTTP layer maps them onto status codes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadOutcome {
    Bytes(Vec<u8>),
    Tombstoned,
    NotFound,
}

impl ReadOutcome {
    pub fn is_found(&self) -> bool {
        matches!(self, ReadOutcome::Bytes(_))
    }
}

/// Object key for an extended-retention copy of a single file.
pub fn build_ext_retention_key(prefix: &str, uid: &str, created_at: &DateTime<Utc>) -> String {
    let prefix = prefix.trim_matches('/');
    format!(
        "{prefix}/{}/{uid}_{}.dat",
        format_date_dir(created_at),
        format_utc_iso_z(created_at)
    )
}
