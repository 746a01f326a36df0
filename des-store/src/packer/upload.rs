//! Upload packer: write planned shards to a staging directory, push the
//! shard objects, new BigFiles and sidecars to the blob store.
//!
//! Shard suffix counters and the BigFile dedup set live for the packer's
//! lifetime, i.e. one migration cycle.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use des_common::time::format_utc_iso_z;
use des_shard::compression::CompressionConfig;
use des_shard::config::ContainerConfig;
use des_shard::bigfiles::build_bigfile_key;
use des_shard::metadata::{MetaEntry, ShardMetadata};
use des_shard::writer::ShardWriter;
use serde_json::{json, Map as JsonMap};
use sha2::{Digest, Sha256};
use tokio::sync::Mutex;

use crate::blobstore::{normalize_prefix, BlobStore};
use crate::error::StoreResult;
use crate::metadata::meta_key;
use crate::packer::local::shard_file_name;
use crate::packer::planner::{build_pack_plan, FileToPack, PlannerConfig, ShardKey};

/// A source file with its payload already in hand.
#[derive(Debug, Clone)]
pub struct PackedFile {
    pub file: FileToPack,
    pub data: Vec<u8>,
}

#[derive(Debug, Clone)]
pub struct UploadedShard {
    pub key: String,
    pub file_count: usize,
    pub total_size_bytes: u64,
}

#[derive(Debug, Clone, Default)]
pub struct PackOutcome {
    pub uploaded: Vec<UploadedShard>,
    pub bigfiles_uploaded: usize,
}

pub struct ShardPacker {
    store: Arc<dyn BlobStore>,
    prefix: String,
    planner: PlannerConfig,
    compression: CompressionConfig,
    container: ContainerConfig,
    counters: Mutex<HashMap<ShardKey, u32>>,
    uploaded_bigfiles: Mutex<HashSet<String>>,
}

impl ShardPacker {
    pub fn new(
        store: Arc<dyn BlobStore>,
        prefix: &str,
        planner: PlannerConfig,
        compression: CompressionConfig,
        container: ContainerConfig,
    ) -> Self {
        ShardPacker {
            store,
            prefix: normalize_prefix(prefix),
            planner,
            compression,
            container,
            counters: Mutex::new(HashMap::new()),
            uploaded_bigfiles: Mutex::new(HashSet::new()),
        }
    }

    /// Pack a batch into shards and publish shard + BigFile + sidecar
    /// objects. Returns per-shard upload summaries.
    pub async fn pack_and_upload(&self, batch: Vec<PackedFile>) -> StoreResult<PackOutcome> {
        if batch.is_empty() {
            return Ok(PackOutcome::default());
        }

        let mut payloads: HashMap<(String, DateTime<Utc>), Vec<u8>> = HashMap::new();
        let mut files = Vec::with_capacity(batch.len());
        for packed in batch {
            payloads.insert((packed.file.uid.clone(), packed.file.created_at), packed.data);
            files.push(packed.file);
        }

        let plan = build_pack_plan(&files, &self.planner)?;
        let staging = tempfile::tempdir()?;
        let mut outcome = PackOutcome::default();

        for planned in plan.shards {
            let ordinal = {
                let mut counters = self.counters.lock().await;
                let slot = counters.entry(planned.key.clone()).or_insert(0);
                let current = *slot;
                *slot += 1;
                current
            };
            let file_name = shard_file_name(&planned.key, ordinal);
            let object_key = format!("{}{}", self.prefix, file_name);
            let shard_path = staging.path().join(&file_name);

            let mut writer =
                ShardWriter::create(&shard_path, self.compression.clone(), self.container.clone())?;
            let mut checksums: Vec<(String, MetaEntry)> = Vec::new();
            let mut total_size = 0u64;

            for file in &planned.files {
                let data = payloads
                    .get(&(file.uid.clone(), file.created_at))
                    .ok_or_else(|| {
                        crate::error::StoreError::InvalidArgument(format!(
                            "no payload staged for UID {:?}",
                            file.uid
                        ))
                    })?;
                let mut props = JsonMap::new();
                props.insert("created_at".to_string(), json!(format_utc_iso_z(&file.created_at)));
                let entry = writer.add_file(&file.uid, data, Some(props))?;
                total_size += data.len() as u64;

                let checksum = hex::encode(Sha256::digest(data));
                checksums.push((
                    ShardMetadata::build_key(&file.uid, &file.created_at),
                    MetaEntry::with_sha256(entry, checksum),
                ));
            }
            writer.finish()?;

            let shard_bytes = std::fs::read(&shard_path)?;
            let shard_size = shard_bytes.len() as u64;
            self.store.put(&object_key, shard_bytes, None).await?;
            tracing::info!(key = %object_key, files = planned.files.len(), "shard uploaded");

            outcome.bigfiles_uploaded += self
                .upload_new_bigfiles(staging.path(), &object_key)
                .await?;
            self.write_sidecar(&object_key, shard_size, checksums).await?;

            outcome.uploaded.push(UploadedShard {
                key: object_key,
                file_count: planned.files.len(),
                total_size_bytes: total_size,
            });
        }

        Ok(outcome)
    }

    /// Upload BigFiles staged next to the shards, skipping hashes already
    /// published during this cycle.
    async fn upload_new_bigfiles(
        &self,
        staging_dir: &std::path::Path,
        shard_object_key: &str,
    ) -> StoreResult<usize> {
        let bigfiles_dir = staging_dir.join(&self.container.bigfiles_prefix);
        if !bigfiles_dir.is_dir() {
            return Ok(0);
        }

        let mut uploaded = 0;
        for dir_entry in std::fs::read_dir(&bigfiles_dir)? {
            let path = dir_entry?.path();
            let hash = match path.file_name().and_then(|n| n.to_str()) {
                Some(name) => name.to_string(),
                None => continue,
            };
            {
                let mut seen = self.uploaded_bigfiles.lock().await;
                if !seen.insert(hash.clone()) {
                    continue;
                }
            }
            let key = build_bigfile_key(shard_object_key, &self.container.bigfiles_prefix, &hash);
            let data = std::fs::read(&path)?;
            self.store.put(&key, data, None).await?;
            tracing::debug!(key, "bigfile uploaded");
            uploaded += 1;
        }
        Ok(uploaded)
    }

    async fn write_sidecar(
        &self,
        shard_object_key: &str,
        shard_size: u64,
        entries: Vec<(String, MetaEntry)>,
    ) -> StoreResult<()> {
        let now = Utc::now();
        let file_name = shard_object_key
            .rsplit('/')
            .next()
            .unwrap_or(shard_object_key)
            .to_string();
        let mut meta = ShardMetadata::new(file_name, shard_size, &now, &now);
        for (key, entry) in entries {
            meta.insert_entry(key, entry)?;
        }
        meta.recompute_stats();
        self.store
            .put(
                &meta_key(shard_object_key),
                meta.to_json()?.into_bytes(),
                Some("application/json"),
            )
            .await?;
        Ok(())
    }
}
