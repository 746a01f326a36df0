//! Pure shard planning: no filesystem or network access.
//!
//! Files are grouped by routed shard key in input order; a shard splits
//! when its accumulated size would pass the soft limit, producing the
//! monotone `_NNNN` suffixes downstream.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use des_shard::routing::locate_shard;

use crate::error::{StoreError, StoreResult};

/// Descriptor of a file awaiting packing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileToPack {
    pub uid: String,
    pub created_at: DateTime<Utc>,
    pub size_bytes: u64,
    pub source_path: String,
}

/// Shard grouping key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ShardKey {
    pub date_dir: String,
    pub shard_hex: String,
}

impl std::fmt::Display for ShardKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.date_dir, self.shard_hex)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlannerConfig {
    pub max_shard_size_bytes: u64,
    pub n_bits: u8,
}

impl Default for PlannerConfig {
    fn default() -> Self {
        PlannerConfig { max_shard_size_bytes: 1_000_000_000, n_bits: 8 }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedShard {
    pub key: ShardKey,
    pub total_size_bytes: u64,
    pub files: Vec<FileToPack>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PackPlan {
    pub shards: Vec<PlannedShard>,
}

fn validate_config(config: &PlannerConfig) -> StoreResult<()> {
    if config.max_shard_size_bytes == 0 {
        return Err(StoreError::InvalidArgument(
            "max_shard_size_bytes must be positive".to_string(),
        ));
    }
    Ok(())
}

fn group_by_shard_key(
    files: &[FileToPack],
    config: &PlannerConfig,
) -> StoreResult<Vec<(ShardKey, Vec<FileToPack>)>> {
    let mut order: Vec<ShardKey> = Vec::new();
    let mut grouped: HashMap<ShardKey, Vec<FileToPack>> = HashMap::new();

    for file in files {
        let location = locate_shard(&file.uid, &file.created_at, config.n_bits)?;
        let key = ShardKey { date_dir: location.date_dir, shard_hex: location.shard_hex };
        if !grouped.contains_key(&key) {
            order.push(key.clone());
        }
        grouped.entry(key).or_default().push(file.clone());
    }

    Ok(order
        .into_iter()
        .map(|key| {
            let files = grouped.remove(&key).unwrap_or_default();
            (key, files)
        })
        .collect())
}

/// Estimate how many physical shards each key will produce.
pub fn estimate_shard_counts(
    files: &[FileToPack],
    config: &PlannerConfig,
) -> StoreResult<HashMap<ShardKey, u64>> {
    validate_config(config)?;
    let mut counts = HashMap::new();
    for (key, key_files) in group_by_shard_key(files, config)? {
        let total: u64 = key_files.iter().map(|f| f.size_bytes).sum();
        let shards = total / config.max_shard_size_bytes
            + u64::from(total % config.max_shard_size_bytes != 0);
        counts.insert(key, shards.max(1));
    }
    Ok(counts)
}

/// Plan how files group into shards. Deterministic for identical input.
pub fn build_pack_plan(files: &[FileToPack], config: &PlannerConfig) -> StoreResult<PackPlan> {
    validate_config(config)?;
    let mut planned = Vec::new();

    for (key, key_files) in group_by_shard_key(files, config)? {
        let mut current: Vec<FileToPack> = Vec::new();
        let mut current_size = 0u64;

        for file in key_files {
            if !current.is_empty() && current_size + file.size_bytes > config.max_shard_size_bytes {
                planned.push(PlannedShard {
                    key: key.clone(),
                    total_size_bytes: current_size,
                    files: std::mem::take(&mut current),
                });
                current_size = 0;
            }
            current_size += file.size_bytes;
            current.push(file);
        }

        if !current.is_empty() {
            planned.push(PlannedShard { key, total_size_bytes: current_size, files: current });
        }
    }

    Ok(PackPlan { shards: planned })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn file(uid: &str, size: u64) -> FileToPack {
        FileToPack {
            uid: uid.to_string(),
            created_at: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
            size_bytes: size,
            source_path: format!("/data/{uid}.bin"),
        }
    }

    #[test]
    fn uids_sharing_an_index_group_together() {
        // 100 and 612 are both 100 mod 256; 356 is 100 too. All collide.
        let plan = build_pack_plan(
            &[file("100", 1), file("356", 1), file("612", 1)],
            &PlannerConfig { max_shard_size_bytes: 1_000, n_bits: 8 },
        )
        .unwrap();
        assert_eq!(plan.shards.len(), 1);
        assert_eq!(plan.shards[0].key.shard_hex, "64");
        assert_eq!(plan.shards[0].files.len(), 3);
    }

    #[test]
    fn soft_limit_splits_into_numbered_shards() {
        let plan = build_pack_plan(
            &[file("100", 4), file("356", 4), file("612", 4)],
            &PlannerConfig { max_shard_size_bytes: 8, n_bits: 8 },
        )
        .unwrap();
        assert_eq!(plan.shards.len(), 2);
        assert_eq!(plan.shards[0].files.len(), 2);
        assert_eq!(plan.shards[1].files.len(), 1);
        assert_eq!(plan.shards[1].files[0].uid, "612");
    }

    #[test]
    fn single_oversized_file_still_gets_a_shard() {
        let plan = build_pack_plan(
            &[file("100", 100)],
            &PlannerConfig { max_shard_size_bytes: 8, n_bits: 8 },
        )
        .unwrap();
        assert_eq!(plan.shards.len(), 1);
    }

    #[test]
    fn estimate_matches_totals() {
        let counts = estimate_shard_counts(
            &[file("100", 60), file("356", 60)],
            &PlannerConfig { max_shard_size_bytes: 100, n_bits: 8 },
        )
        .unwrap();
        assert_eq!(counts.len(), 1);
        assert_eq!(*counts.values().next().unwrap(), 2);
    }

    #[test]
    fn distinct_keys_stay_separated() {
        let mut late = file("12345", 9);
        late.created_at = Utc.with_ymd_and_hms(2024, 1, 4, 0, 0, 0).unwrap();
        let plan = build_pack_plan(
            &[file("12345", 5), file("abc123", 7), late],
            &PlannerConfig { max_shard_size_bytes: 50, n_bits: 8 },
        )
        .unwrap();
        let keys: Vec<String> = plan.shards.iter().map(|s| s.key.to_string()).collect();
        assert!(keys.contains(&"20240101/39".to_string()));
        assert!(keys.contains(&"20240101/5C".to_string()));
        assert!(keys.contains(&"20240104/39".to_string()));
    }

    #[test]
    fn zero_size_limit_is_rejected() {
        assert!(build_pack_plan(&[], &PlannerConfig { max_shard_size_bytes: 0, n_bits: 8 }).is_err());
    }

    #[test]
    fn plan_is_deterministic() {
        let files = [file("a1", 3), file("b2", 4), file("100", 5)];
        let cfg = PlannerConfig { max_shard_size_bytes: 100, n_bits: 8 };
        assert_eq!(build_pack_plan(&files, &cfg).unwrap(), build_pack_plan(&files, &cfg).unwrap());
    }
}
