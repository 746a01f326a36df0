//! Watermark-driven migration: one cycle drains the current archive
//! window from the source table into shards, then moves the watermark.
//!
//! The source table is never written. Per-file failures are tallied into
//! the cycle report; only infrastructure faults (database, blob store
//! after retries) abort a cycle, and an aborted cycle leaves the
//! watermark where it was so the next run re-reads the same window.

use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};

use crate::config::SourceTableConfig;
use crate::db::source::{PageSource, SourceRow, WindowScan};
use crate::db::watermark::{ArchiveWindow, WatermarkStore};
use crate::error::StoreResult;
use crate::packer::{PackedFile, ShardPacker};
use crate::packer::planner::FileToPack;
use crate::source_reader::{is_s3_uri, SourceFileReader};

/// Aggregate result of a single migration cycle.
#[derive(Debug, Clone, PartialEq)]
pub struct MigrationReport {
    pub files_processed: u64,
    pub files_migrated: u64,
    pub files_failed: u64,
    pub shards_created: u64,
    pub total_size_bytes: u64,
    pub duration_seconds: f64,
    pub window_start: DateTime<Utc>,
    pub window_end: DateTime<Utc>,
    pub errors: Vec<String>,
}

impl MigrationReport {
    fn empty(window: &ArchiveWindow, started: Instant) -> Self {
        MigrationReport {
            files_processed: 0,
            files_migrated: 0,
            files_failed: 0,
            shards_created: 0,
            total_size_bytes: 0,
            duration_seconds: started.elapsed().as_secs_f64(),
            window_start: window.window_start,
            window_end: window.window_end,
            errors: Vec::new(),
        }
    }
}

pub struct MigrationOrchestrator {
    watermark: Arc<dyn WatermarkStore>,
    pages: Arc<dyn PageSource>,
    source_cfg: SourceTableConfig,
    reader: SourceFileReader,
    packer: ShardPacker,
    delete_source_files: bool,
}

impl MigrationOrchestrator {
    pub fn new(
        watermark: Arc<dyn WatermarkStore>,
        pages: Arc<dyn PageSource>,
        source_cfg: SourceTableConfig,
        reader: SourceFileReader,
        packer: ShardPacker,
        delete_source_files: bool,
    ) -> Self {
        MigrationOrchestrator {
            watermark,
            pages,
            source_cfg,
            reader,
            packer,
            delete_source_files,
        }
    }

    /// Run one full cycle at `now`.
    pub async fn run_cycle(&self, now: DateTime<Utc>) -> StoreResult<MigrationReport> {
        let started = Instant::now();
        let window = self.watermark.compute_window(now).await?;

        if window.is_empty() {
            tracing::info!("archive window empty, watermark already at target");
            return Ok(MigrationReport::empty(&window, started));
        }
        tracing::info!(
            window_start = %window.window_start,
            window_end = %window.window_end,
            lag_days = window.lag_days,
            "starting migration cycle"
        );

        let mut report = MigrationReport::empty(&window, started);
        let mut scan = WindowScan::new(self.pages.clone(), self.source_cfg.clone(), window);
        let mut pending: Vec<SourceRow> = Vec::new();

        while let Some(rows) = scan.next_batch().await? {
            for row in rows {
                pending.push(row);
                if pending.len() as i64 >= self.source_cfg.page_size {
                    self.process_batch(std::mem::take(&mut pending), &mut report).await?;
                }
            }
        }
        if !pending.is_empty() {
            self.process_batch(pending, &mut report).await?;
        }

        // One watermark write per cycle, to the computed window end, and
        // only when something actually landed.
        if report.files_migrated > 0 {
            self.watermark.advance_cutoff(now).await?;
            tracing::info!(archived_until = %window.window_end, "watermark advanced");
        }

        report.duration_seconds = started.elapsed().as_secs_f64();
        tracing::info!(
            processed = report.files_processed,
            migrated = report.files_migrated,
            failed = report.files_failed,
            shards = report.shards_created,
            "migration cycle finished"
        );
        Ok(report)
    }

    async fn process_batch(
        &self,
        rows: Vec<SourceRow>,
        report: &mut MigrationReport,
    ) -> StoreResult<()> {
        let mut staged: Vec<PackedFile> = Vec::new();
        let mut cleanup: Vec<String> = Vec::new();

        for row in rows {
            report.files_processed += 1;
            match self.reader.read(&row.file_location).await {
                Ok(data) => {
                    cleanup.push(row.file_location.clone());
                    staged.push(PackedFile {
                        file: FileToPack {
                            uid: row.uid,
                            created_at: row.created_at,
                            size_bytes: data.len() as u64,
                            source_path: row.file_location,
                        },
                        data,
                    });
                }
                Err(err) => {
                    report.files_failed += 1;
                    let msg = format!("validation failed for {}: {err}", row.uid);
                    tracing::warn!("{msg}");
                    report.errors.push(msg);
                }
            }
        }

        if staged.is_empty() {
            return Ok(());
        }

        let staged_count = staged.len() as u64;
        let staged_bytes: u64 = staged.iter().map(|f| f.data.len() as u64).sum();
        let outcome = self.packer.pack_and_upload(staged).await?;

        report.files_migrated += staged_count;
        report.total_size_bytes += staged_bytes;
        report.shards_created += outcome.uploaded.len() as u64;

        if self.delete_source_files {
            self.cleanup_sources(&cleanup, &mut report.errors).await;
        }
        Ok(())
    }

    async fn cleanup_sources(&self, locations: &[String], errors: &mut Vec<String>) {
        for location in locations {
            if is_s3_uri(location) {
                tracing::debug!(location, "skipping source deletion for S3 location");
                continue;
            }
            match tokio::fs::remove_file(location).await {
                Ok(()) => tracing::debug!(location, "source file deleted"),
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
                Err(err) => {
                    let msg = format!("failed to delete {location}: {err}");
                    tracing::warn!("{msg}");
                    errors.push(msg);
                }
            }
        }
    }
}
