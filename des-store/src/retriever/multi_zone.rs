//! Multi-zone read fan-out: shard-index ranges map to separate buckets.

use chrono::{DateTime, Utc};
use des_shard::routing::locate_shard;

use crate::config::ZoneRange;
use crate::error::{StoreError, StoreResult};
use crate::retriever::{ReadOutcome, ShardRetriever};

pub struct RetrieverZone {
    pub name: String,
    pub range: ZoneRange,
    pub retriever: ShardRetriever,
}

pub struct MultiZoneRetriever {
    zones: Vec<RetrieverZone>,
    n_bits: u8,
}

impl MultiZoneRetriever {
    /// Build from validated zones; ranges must jointly cover `2^n_bits`
    /// shard indexes with no overlap.
    pub fn new(zones: Vec<RetrieverZone>, n_bits: u8) -> StoreResult<Self> {
        if zones.is_empty() {
            return Err(StoreError::InvalidArgument(
                "at least one zone must be configured".to_string(),
            ));
        }
        ZoneRange::validate_cover(
            &zones.iter().map(|z| z.range).collect::<Vec<_>>(),
            n_bits,
        )?;
        Ok(MultiZoneRetriever { zones, n_bits })
    }

    fn zone_for(&self, shard_index: u32) -> StoreResult<&RetrieverZone> {
        self.zones
            .iter()
            .find(|z| z.range.contains(shard_index))
            .ok_or_else(|| {
                StoreError::InvalidArgument(format!("no zone configured for shard index {shard_index}"))
            })
    }

    pub async fn has_file(&self, uid: &str, created_at: &DateTime<Utc>) -> StoreResult<bool> {
        let location = locate_shard(uid, created_at, self.n_bits)?;
        self.zone_for(location.shard_index)?
            .retriever
            .has_file(uid, created_at)
            .await
    }

    pub async fn get_file(&self, uid: &str, created_at: &DateTime<Utc>) -> StoreResult<ReadOutcome> {
        let location = locate_shard(uid, created_at, self.n_bits)?;
        self.zone_for(location.shard_index)?
            .retriever
            .get_file(uid, created_at)
            .await
    }

    pub async fn delete_file(
        &self,
        uid: &str,
        created_at: &DateTime<Utc>,
        deleted_by: &str,
        reason: &str,
        ticket_id: Option<&str>,
    ) -> StoreResult<()> {
        let location = locate_shard(uid, created_at, self.n_bits)?;
        self.zone_for(location.shard_index)?
            .retriever
            .delete_file(uid, created_at, deleted_by, reason, ticket_id)
            .await
    }
}
