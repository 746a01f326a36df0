//! The archive watermark: a singleton row that carries all ingest state.
//!
//! The source table is never written; each successful cycle moves
//! `archived_until` forward at most once, and never backward.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use des_common::time::floor_to_midnight;
use diesel::pg::PgConnection;
use diesel::prelude::*;
use diesel::sql_query;
use diesel::sql_types::{Int4, Timestamptz};
use tokio::sync::Mutex;

use crate::error::StoreResult;

/// The half-open archive window `(window_start, window_end]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArchiveWindow {
    pub window_start: DateTime<Utc>,
    pub window_end: DateTime<Utc>,
    pub lag_days: i32,
}

impl ArchiveWindow {
    pub fn is_empty(&self) -> bool {
        self.window_end <= self.window_start
    }
}

/// Target cutoff for `now`: midnight UTC, `lag_days` days back.
pub fn target_cutoff(now: &DateTime<Utc>, lag_days: i32) -> DateTime<Utc> {
    floor_to_midnight(&(*now - Duration::days(lag_days as i64)))
}

#[async_trait]
pub trait WatermarkStore: Send + Sync {
    /// Create the table and seed the singleton row when absent.
    async fn ensure_initialized(
        &self,
        default_archived_until: DateTime<Utc>,
        default_lag_days: i32,
    ) -> StoreResult<()>;

    /// Current `(archived_until, lag_days)`.
    async fn get_config(&self) -> StoreResult<(DateTime<Utc>, i32)>;

    /// Advance `archived_until` to the target cutoff when it moved forward.
    async fn advance_cutoff(&self, now: DateTime<Utc>) -> StoreResult<ArchiveWindow>;

    /// Compute the current window without persisting anything.
    async fn compute_window(&self, now: DateTime<Utc>) -> StoreResult<ArchiveWindow> {
        let (archived_until, lag_days) = self.get_config().await?;
        Ok(ArchiveWindow {
            window_start: archived_until,
            window_end: target_cutoff(&now, lag_days),
            lag_days,
        })
    }
}

/// Postgres-backed watermark repository over `des_archive_config`.
pub struct WatermarkRepository {
    conn: Arc<Mutex<PgConnection>>,
}

impl WatermarkRepository {
    pub fn new(conn: Arc<Mutex<PgConnection>>) -> Self {
        WatermarkRepository { conn }
    }
}

#[async_trait]
impl WatermarkStore for WatermarkRepository {
    async fn ensure_initialized(
        &self,
        default_archived_until: DateTime<Utc>,
        default_lag_days: i32,
    ) -> StoreResult<()> {
        let mut conn = self.conn.lock().await;
        sql_query(
            "CREATE TABLE IF NOT EXISTS des_archive_config (
                id INTEGER PRIMARY KEY,
                archived_until TIMESTAMPTZ NOT NULL,
                lag_days INTEGER NOT NULL
            )",
        )
        .execute(&mut *conn)?;
        sql_query(
            "INSERT INTO des_archive_config (id, archived_until, lag_days)
             VALUES (1, $1, $2)
             ON CONFLICT (id) DO NOTHING",
        )
        .bind::<Timestamptz, _>(default_archived_until)
        .bind::<Int4, _>(default_lag_days)
        .execute(&mut *conn)?;
        Ok(())
    }

    async fn get_config(&self) -> StoreResult<(DateTime<Utc>, i32)> {
        use crate::db::schema::des_archive_config::dsl::*;
        let mut conn = self.conn.lock().await;
        let row = des_archive_config
            .find(1)
            .select((archived_until, lag_days))
            .first::<(DateTime<Utc>, i32)>(&mut *conn)?;
        Ok(row)
    }

    async fn advance_cutoff(&self, now: DateTime<Utc>) -> StoreResult<ArchiveWindow> {
        let (current, lag) = self.get_config().await?;
        let target = target_cutoff(&now, lag);
        if target <= current {
            return Ok(ArchiveWindow { window_start: current, window_end: current, lag_days: lag });
        }

        use crate::db::schema::des_archive_config::dsl::*;
        let mut conn = self.conn.lock().await;
        // The guard in the predicate keeps the watermark monotone even if
        // another process advanced it between the read and this update.
        diesel::update(des_archive_config.filter(id.eq(1)).filter(archived_until.lt(target)))
            .set(archived_until.eq(target))
            .execute(&mut *conn)?;
        Ok(ArchiveWindow { window_start: current, window_end: target, lag_days: lag })
    }
}

/// In-memory watermark used by tests and dry runs.
#[derive(Default)]
pub struct MemoryWatermarkStore {
    state: std::sync::Mutex<Option<(DateTime<Utc>, i32)>>,
}

impl MemoryWatermarkStore {
    pub fn new() -> Self {
        MemoryWatermarkStore::default()
    }
}

#[async_trait]
impl WatermarkStore for MemoryWatermarkStore {
    async fn ensure_initialized(
        &self,
        default_archived_until: DateTime<Utc>,
        default_lag_days: i32,
    ) -> StoreResult<()> {
        let mut state = self.state.lock().expect("watermark lock");
        if state.is_none() {
            *state = Some((default_archived_until, default_lag_days));
        }
        Ok(())
    }

    async fn get_config(&self) -> StoreResult<(DateTime<Utc>, i32)> {
        let state = self.state.lock().expect("watermark lock");
        (*state).ok_or_else(|| {
            crate::error::StoreError::InvalidArgument(
                "watermark not initialized; call ensure_initialized first".to_string(),
            )
        })
    }

    async fn advance_cutoff(&self, now: DateTime<Utc>) -> StoreResult<ArchiveWindow> {
        let (current, lag) = self.get_config().await?;
        let target = target_cutoff(&now, lag);
        if target <= current {
            return Ok(ArchiveWindow { window_start: current, window_end: current, lag_days: lag });
        }
        let mut state = self.state.lock().expect("watermark lock");
        *state = Some((target, lag));
        Ok(ArchiveWindow { window_start: current, window_end: target, lag_days: lag })
    }
}
