//! Extended retention: object-lock protected copies of individual files.
//!
//! Reads consult this area before any shard; see the retriever. This
//! manager handles the write side: placing or extending a retention copy.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use des_common::time::format_utc_iso_z;
use serde::Serialize;

use crate::blobstore::BlobStore;
use crate::error::{StoreError, StoreResult};
use crate::retriever::{build_ext_retention_key, ReadOutcome, ShardRetriever};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RetentionAction {
    /// File was copied into the retention area.
    Moved,
    /// An existing retention copy had its lock extended.
    Updated,
}

#[derive(Debug, Clone, Serialize)]
pub struct RetentionOutcome {
    pub uid: String,
    pub key: String,
    pub location: String,
    pub retention_until: String,
    pub action: RetentionAction,
}

pub struct ExtendedRetentionManager {
    store: Arc<dyn BlobStore>,
    prefix: String,
}

impl ExtendedRetentionManager {
    pub fn new(store: Arc<dyn BlobStore>, prefix: &str) -> Self {
        ExtendedRetentionManager { store, prefix: prefix.trim_matches('/').to_string() }
    }

    /// Place `(uid, created_at)` under extended retention until `due_date`.
    ///
    /// An existing retention copy gets its lock extended; otherwise the
    /// bytes are pulled from primary storage and stored with GOVERNANCE
    /// object lock.
    pub async fn set_retention_policy(
        &self,
        uid: &str,
        created_at: &DateTime<Utc>,
        due_date: &DateTime<Utc>,
        retriever: &ShardRetriever,
    ) -> StoreResult<RetentionOutcome> {
        let now = Utc::now();
        if *due_date <= now {
            return Err(StoreError::InvalidArgument("due_date must be in the future".to_string()));
        }

        let key = build_ext_retention_key(&self.prefix, uid, created_at);
        if self.store.head(&key).await? {
            self.store.set_retention(&key, *due_date).await?;
            tracing::info!(key, until = %due_date, "retention extended");
            return Ok(RetentionOutcome {
                uid: uid.to_string(),
                key,
                location: "extended_retention".to_string(),
                retention_until: format_utc_iso_z(due_date),
                action: RetentionAction::Updated,
            });
        }

        let data = match retriever.get_file(uid, created_at).await? {
            ReadOutcome::Bytes(data) => data,
            ReadOutcome::Tombstoned => {
                return Err(StoreError::Tombstoned(format!("{uid} at {created_at}")))
            }
            ReadOutcome::NotFound => {
                return Err(StoreError::NotFound(format!(
                    "file {uid} not found for {}",
                    format_utc_iso_z(created_at)
                )))
            }
        };

        self.store.put_with_retention(&key, data, *due_date).await?;
        tracing::info!(key, until = %due_date, "file moved to extended retention");
        Ok(RetentionOutcome {
            uid: uid.to_string(),
            key,
            location: "extended_retention".to_string(),
            retention_until: format_utc_iso_z(due_date),
            action: RetentionAction::Moved,
        })
    }
}
