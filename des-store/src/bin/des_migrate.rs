//! One-shot migration runner: executes a single watermark cycle.
//!
//! Intended to run from cron or a job scheduler; horizontal scale-out
//! uses `DES_SHARDS_TOTAL`/`DES_SHARD_ID` with one process per split.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{Duration as ChronoDuration, Utc};
use des_common::env::{env_int, env_str};
use des_common::time::parse_iso_utc;
use des_store::blobstore::S3BlobStore;
use des_store::config::env_to_cfg;
use des_store::db::source::DbPageSource;
use des_store::db::watermark::{WatermarkRepository, WatermarkStore};
use des_store::db::establish_connection;
use des_store::migrator::MigrationOrchestrator;
use des_store::packer::{PlannerConfig, ShardPacker};
use des_store::source_reader::{
    SourceFileReader, DEFAULT_SOURCE_MAX_RETRIES, DEFAULT_SOURCE_RETRY_DELAY_MS,
};
use dotenvy::dotenv;
use tokio::sync::Mutex;

#[tokio::main]
async fn main() -> Result<()> {
    dotenv().ok();
    tracing_subscriber::fmt::init();

    let cfg = env_to_cfg().context("invalid DES configuration")?;
    let bucket = cfg
        .s3_bucket
        .clone()
        .context("DES_S3_BUCKET must be set for migration")?;

    let mut loader = aws_config::from_env();
    if let Some(endpoint) = &cfg.s3_endpoint {
        loader = loader.endpoint_url(endpoint);
    }
    let sdk = loader.load().await;

    let conn = Arc::new(Mutex::new(establish_connection()?));
    let watermark = Arc::new(WatermarkRepository::new(conn.clone()));

    // Seed the watermark on first run; default to a 30 day backlog.
    let default_archived_until = match env_str("DES_DEFAULT_ARCHIVED_UNTIL") {
        Some(raw) => parse_iso_utc(&raw).context("invalid DES_DEFAULT_ARCHIVED_UNTIL")?,
        None => Utc::now() - ChronoDuration::days(30),
    };
    watermark
        .ensure_initialized(default_archived_until, cfg.lag_days)
        .await?;

    let pages = Arc::new(DbPageSource::new(conn, cfg.source.clone())?);
    let store = Arc::new(S3BlobStore::new(bucket, &sdk));
    let packer = ShardPacker::new(
        store,
        &cfg.s3_prefix,
        PlannerConfig {
            max_shard_size_bytes: cfg.max_shard_size_bytes,
            n_bits: cfg.n_bits,
        },
        cfg.compression.clone(),
        cfg.container.clone(),
    );

    let reader = SourceFileReader::with_s3(
        &sdk,
        env_int("DES_SOURCE_MAX_RETRIES").unwrap_or(DEFAULT_SOURCE_MAX_RETRIES as usize) as u32,
        Duration::from_millis(DEFAULT_SOURCE_RETRY_DELAY_MS),
    );

    let orchestrator = MigrationOrchestrator::new(
        watermark,
        pages,
        cfg.source.clone(),
        reader,
        packer,
        cfg.delete_source_files,
    );

    let report = orchestrator.run_cycle(Utc::now()).await?;
    tracing::info!(
        processed = report.files_processed,
        migrated = report.files_migrated,
        failed = report.files_failed,
        shards = report.shards_created,
        bytes = report.total_size_bytes,
        window_start = %report.window_start,
        window_end = %report.window_end,
        "cycle complete"
    );
    for error in &report.errors {
        tracing::warn!("{error}");
    }
    Ok(())
}
