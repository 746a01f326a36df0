//! Local packer: plan shards and write `.des` files into a directory.

use std::path::{Path, PathBuf};

use des_shard::compression::CompressionConfig;
use des_shard::config::ContainerConfig;
use des_shard::writer::ShardWriter;
use serde_json::{json, Map as JsonMap};
use std::collections::{HashMap, HashSet};

use des_common::time::format_utc_iso_z;

use crate::error::StoreResult;
use crate::packer::planner::{build_pack_plan, FileToPack, PlannerConfig, ShardKey};

#[derive(Debug, Clone)]
pub struct ShardWriteResult {
    pub shard_key: ShardKey,
    pub path: PathBuf,
    pub file_count: usize,
    pub total_size_bytes: u64,
    pub bigfile_hashes: HashSet<String>,
}

#[derive(Debug, Clone, Default)]
pub struct PackerResult {
    pub shards: Vec<ShardWriteResult>,
}

/// Shard object / file name with its monotone suffix.
pub fn shard_file_name(key: &ShardKey, ordinal: u32) -> String {
    format!("{}_{}_{:04}.des", key.date_dir, key.shard_hex, ordinal)
}

/// Plan and write shard files under `output_dir`, reading payloads from
/// each file's local `source_path`.
pub fn pack_files_to_directory(
    files: &[FileToPack],
    output_dir: &Path,
    planner: &PlannerConfig,
    compression: &CompressionConfig,
    container: &ContainerConfig,
) -> StoreResult<PackerResult> {
    std::fs::create_dir_all(output_dir)?;

    let plan = build_pack_plan(files, planner)?;
    let mut counters: HashMap<ShardKey, u32> = HashMap::new();
    let mut results = Vec::new();

    for planned in plan.shards {
        let ordinal = counters.entry(planned.key.clone()).or_insert(0);
        let shard_path = output_dir.join(shard_file_name(&planned.key, *ordinal));
        *ordinal += 1;

        let mut total_size = 0u64;
        let mut bigfile_hashes = HashSet::new();
        let mut writer = ShardWriter::create(&shard_path, compression.clone(), container.clone())?;
        for file in &planned.files {
            let data = std::fs::read(&file.source_path)?;
            let mut props = JsonMap::new();
            props.insert("created_at".to_string(), json!(format_utc_iso_z(&file.created_at)));
            let entry = writer.add_file(&file.uid, &data, Some(props))?;
            if let Some(hash) = entry.bigfile_hash {
                bigfile_hashes.insert(hash);
            }
            total_size += file.size_bytes;
        }
        writer.finish()?;

        results.push(ShardWriteResult {
            shard_key: planned.key,
            path: shard_path,
            file_count: planned.files.len(),
            total_size_bytes: total_size,
            bigfile_hashes,
        });
    }

    Ok(PackerResult { shards: results })
}
