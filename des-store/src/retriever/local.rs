//! Filesystem retriever over shard files produced by the local packer.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use des_shard::config::ContainerConfig;
use des_shard::reader::ShardReader;
use des_shard::routing::{locate_shard, normalize_uid};

use crate::error::{StoreError, StoreResult};
use crate::retriever::ReadOutcome;

pub struct LocalShardRetriever {
    base_dir: PathBuf,
    n_bits: u8,
    container: ContainerConfig,
}

impl LocalShardRetriever {
    pub fn new(base_dir: PathBuf, n_bits: u8, container: ContainerConfig) -> StoreResult<Self> {
        if !base_dir.is_dir() {
            return Err(StoreError::InvalidArgument(format!(
                "base directory does not exist: {}",
                base_dir.display()
            )));
        }
        Ok(LocalShardRetriever { base_dir, n_bits, container })
    }

    pub async fn has_file(&self, uid: &str, created_at: &DateTime<Utc>) -> StoreResult<bool> {
        let uid = normalize_uid(uid);
        for path in self.candidate_paths(&uid, created_at)? {
            let reader = ShardReader::from_path(&path, self.container.clone())?;
            if reader.has_uid(&uid) {
                return Ok(true);
            }
        }
        Ok(false)
    }

    pub async fn get_file(&self, uid: &str, created_at: &DateTime<Utc>) -> StoreResult<ReadOutcome> {
        let uid = normalize_uid(uid);
        for path in self.candidate_paths(&uid, created_at)? {
            let mut reader = ShardReader::from_path(&path, self.container.clone())?;
            if reader.has_uid(&uid) {
                return Ok(ReadOutcome::Bytes(reader.read_file(&uid)?));
            }
        }
        Ok(ReadOutcome::NotFound)
    }

    fn candidate_paths(&self, uid: &str, created_at: &DateTime<Utc>) -> StoreResult<Vec<PathBuf>> {
        let location = locate_shard(uid, created_at, self.n_bits)?;
        let prefix = format!("{}_{}_", location.date_dir, location.shard_hex);

        let mut paths = Vec::new();
        for dir_entry in std::fs::read_dir(&self.base_dir)? {
            let path = dir_entry?.path();
            let name = match path.file_name().and_then(|n| n.to_str()) {
                Some(name) => name,
                None => continue,
            };
            if name.starts_with(&prefix) && name.ends_with(".des") {
                paths.push(path);
            }
        }
        paths.sort();
        Ok(paths)
    }
}
