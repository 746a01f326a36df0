//! Service configuration assembled from `DES_*` environment variables.

use std::path::{Path, PathBuf};

use des_common::env::{env_bool, env_int, env_str, env_u64};
use des_shard::compression::CompressionConfig;
use des_shard::config::ContainerConfig;
use des_shard::routing::{MAX_SHARD_BITS, MIN_SHARD_BITS};
use serde::Deserialize;

use crate::error::{StoreError, StoreResult};

pub const DEFAULT_N_BITS: u8 = 8;
pub const DEFAULT_PAGE_SIZE: i64 = 1000;
pub const DEFAULT_LAG_DAYS: i32 = 7;
pub const DEFAULT_MAX_SHARD_SIZE_BYTES: u64 = 1_000_000_000;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetrieverBackendKind {
    Local { base_dir: PathBuf },
    S3,
    MultiZone { zones_path: PathBuf },
}

#[derive(Debug, Clone, PartialEq)]
pub struct StoreConfig {
    pub backend: RetrieverBackendKind,
    pub s3_bucket: Option<String>,
    pub s3_prefix: String,
    pub s3_endpoint: Option<String>,
    pub n_bits: u8,
    pub container: ContainerConfig,
    pub compression: CompressionConfig,
    pub max_shard_size_bytes: u64,
    pub ext_retention_prefix: Option<String>,
    pub enforce_checksum: bool,
    pub sidecar_cache_size: usize,
    pub source: SourceTableConfig,
    pub lag_days: i32,
    pub delete_source_files: bool,
    pub port: usize,
}

/// External source table description; DES only ever SELECTs from it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceTableConfig {
    pub table_name: String,
    pub uid_column: String,
    pub created_at_column: String,
    pub location_column: String,
    pub page_size: i64,
    pub shards_total: u32,
    pub shard_id: u32,
}

impl Default for SourceTableConfig {
    fn default() -> Self {
        SourceTableConfig {
            table_name: "files".to_string(),
            uid_column: "uid".to_string(),
            created_at_column: "created_at".to_string(),
            location_column: "file_location".to_string(),
            page_size: DEFAULT_PAGE_SIZE,
            shards_total: 1,
            shard_id: 0,
        }
    }
}

impl SourceTableConfig {
    /// SQL identifiers are interpolated, not bound; keep them boring.
    pub fn validate(&self) -> StoreResult<()> {
        for ident in [
            &self.table_name,
            &self.uid_column,
            &self.created_at_column,
            &self.location_column,
        ] {
            let ok = !ident.is_empty()
                && ident
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '.');
            if !ok {
                return Err(StoreError::InvalidArgument(format!(
                    "unsafe SQL identifier: {ident:?}"
                )));
            }
        }
        if self.page_size <= 0 {
            return Err(StoreError::InvalidArgument("page_size must be positive".to_string()));
        }
        if self.shards_total == 0 || self.shard_id >= self.shards_total {
            return Err(StoreError::InvalidArgument(format!(
                "shard_id {} outside shards_total {}",
                self.shard_id, self.shards_total
            )));
        }
        Ok(())
    }
}

fn compression_from_env() -> CompressionConfig {
    match env_str("DES_COMPRESSION_PROFILE").as_deref() {
        Some("aggressive") => CompressionConfig::aggressive_zstd(),
        Some("speed") => CompressionConfig::speed_lz4(),
        Some("none") => CompressionConfig::none(),
        _ => CompressionConfig::balanced_zstd(),
    }
}

pub fn env_to_cfg() -> StoreResult<StoreConfig> {
    let n_bits = env_int("DES_N_BITS").unwrap_or(DEFAULT_N_BITS as usize) as u8;
    if !(MIN_SHARD_BITS..=MAX_SHARD_BITS).contains(&n_bits) {
        return Err(StoreError::InvalidArgument(format!("DES_N_BITS out of range: {n_bits}")));
    }

    let backend = match env_str("DES_BACKEND").as_deref() {
        Some("multi_s3") => {
            let path = env_str("DES_ZONES_CONFIG").ok_or_else(|| {
                StoreError::InvalidArgument(
                    "DES_ZONES_CONFIG must be set when DES_BACKEND=multi_s3".to_string(),
                )
            })?;
            RetrieverBackendKind::MultiZone { zones_path: PathBuf::from(path) }
        }
        Some("s3") => RetrieverBackendKind::S3,
        Some("local") => RetrieverBackendKind::Local {
            base_dir: PathBuf::from(env_str("DES_BASE_DIR").unwrap_or("./data/des".to_string())),
        },
        // Unset backend: the presence of a bucket picks S3.
        None if env_str("DES_S3_BUCKET").is_some() => RetrieverBackendKind::S3,
        None => RetrieverBackendKind::Local {
            base_dir: PathBuf::from(env_str("DES_BASE_DIR").unwrap_or("./data/des".to_string())),
        },
        Some(other) => {
            return Err(StoreError::InvalidArgument(format!("unsupported DES_BACKEND: {other}")))
        }
    };

    let source = SourceTableConfig {
        table_name: env_str("DES_SOURCE_TABLE").unwrap_or("files".to_string()),
        uid_column: env_str("DES_SOURCE_UID_COLUMN").unwrap_or("uid".to_string()),
        created_at_column: env_str("DES_SOURCE_CREATED_AT_COLUMN").unwrap_or("created_at".to_string()),
        location_column: env_str("DES_SOURCE_LOCATION_COLUMN").unwrap_or("file_location".to_string()),
        page_size: env_int("DES_PAGE_SIZE").unwrap_or(DEFAULT_PAGE_SIZE as usize) as i64,
        shards_total: env_int("DES_SHARDS_TOTAL").unwrap_or(1) as u32,
        shard_id: env_int("DES_SHARD_ID").unwrap_or(0) as u32,
    };
    source.validate()?;

    Ok(StoreConfig {
        backend,
        s3_bucket: env_str("DES_S3_BUCKET"),
        s3_prefix: env_str("DES_S3_PREFIX").unwrap_or_default(),
        s3_endpoint: env_str("DES_S3_ENDPOINT_URL"),
        n_bits,
        container: ContainerConfig::from_env(),
        compression: compression_from_env(),
        max_shard_size_bytes: env_u64("DES_MAX_SHARD_SIZE_BYTES")
            .unwrap_or(DEFAULT_MAX_SHARD_SIZE_BYTES),
        ext_retention_prefix: Some(
            env_str("DES_EXT_RETENTION_PREFIX").unwrap_or("_ext_retention".to_string()),
        ),
        enforce_checksum: env_bool("DES_ENFORCE_CHECKSUM").unwrap_or(false),
        sidecar_cache_size: env_int("DES_SIDECAR_CACHE_SIZE").unwrap_or(1000),
        source,
        lag_days: env_int("DES_LAG_DAYS").unwrap_or(DEFAULT_LAG_DAYS as usize) as i32,
        delete_source_files: env_bool("DES_DELETE_SOURCE_FILES").unwrap_or(false),
        port: env_int("DES_PORT").unwrap_or(8300),
    })
}

/// Half-open shard-index range `[start, end)` served by one zone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct ZoneRange {
    pub start: u32,
    pub end: u32,
}

impl ZoneRange {
    pub fn contains(&self, index: u32) -> bool {
        self.start <= index && index < self.end
    }

    /// Validate that `ranges` partition `[0, 2^n_bits)` exactly.
    pub fn validate_cover(ranges: &[ZoneRange], n_bits: u8) -> StoreResult<()> {
        let space = 1u32 << n_bits;
        let mut sorted = ranges.to_vec();
        sorted.sort_by_key(|r| r.start);

        let mut expected_start = 0u32;
        for range in &sorted {
            if range.start >= range.end {
                return Err(StoreError::InvalidArgument(format!(
                    "empty zone range {}..{}",
                    range.start, range.end
                )));
            }
            if range.end > space {
                return Err(StoreError::InvalidArgument(format!(
                    "zone range {}..{} exceeds shard space of {space}",
                    range.start, range.end
                )));
            }
            if range.start < expected_start {
                return Err(StoreError::InvalidArgument(format!(
                    "overlapping zone ranges at index {}",
                    range.start
                )));
            }
            if range.start > expected_start {
                return Err(StoreError::InvalidArgument(format!(
                    "uncovered shard indexes {}..{}",
                    expected_start, range.start
                )));
            }
            expected_start = range.end;
        }
        if expected_start != space {
            return Err(StoreError::InvalidArgument(format!(
                "uncovered shard indexes {expected_start}..{space}"
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ZoneS3Config {
    pub bucket: String,
    #[serde(default)]
    pub prefix: String,
    #[serde(default)]
    pub region_name: Option<String>,
    #[serde(default)]
    pub endpoint_url: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ZoneEntry {
    pub name: String,
    pub range: ZoneRange,
    pub s3: ZoneS3Config,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ZoneMap {
    #[serde(default = "default_zone_bits")]
    pub n_bits: u8,
    pub zones: Vec<ZoneEntry>,
}

fn default_zone_bits() -> u8 {
    DEFAULT_N_BITS
}

/// Load and validate a JSON zone map.
pub fn load_zone_map(path: &Path) -> StoreResult<ZoneMap> {
    let raw = std::fs::read_to_string(path)?;
    let map: ZoneMap = serde_json::from_str(&raw)
        .map_err(|e| StoreError::InvalidArgument(format!("invalid zone map {path:?}: {e}")))?;
    if map.zones.is_empty() {
        return Err(StoreError::InvalidArgument("zone map has no zones".to_string()));
    }
    ZoneRange::validate_cover(&map.zones.iter().map(|z| z.range).collect::<Vec<_>>(), map.n_bits)?;
    Ok(map)
}
