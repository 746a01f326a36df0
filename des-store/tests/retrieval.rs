//! End-to-end read-path coverage over the in-memory blob store:
//! ingest with the upload packer, retrieve with the shard retriever.

use std::sync::Arc;

use chrono::{DateTime, TimeZone, Utc};
use des_shard::compression::CompressionConfig;
use des_shard::config::ContainerConfig;
use des_shard::metadata::ShardMetadata;
use des_store::blobstore::{BlobStore, MemoryBlobStore};
use des_store::error::StoreError;
use des_store::metadata::{meta_key, MetadataManager};
use des_store::packer::{FileToPack, PackedFile, PlannerConfig, ShardPacker};
use des_store::retriever::{build_ext_retention_key, ReadOutcome, ShardRetriever};

const EXT_PREFIX: &str = "_ext_retention";

fn ts(y: i32, m: u32, d: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(y, m, d, 0, 0, 0).unwrap()
}

fn container(threshold: u64) -> ContainerConfig {
    ContainerConfig { big_file_threshold_bytes: threshold, ..ContainerConfig::default() }
}

struct Harness {
    store: Arc<MemoryBlobStore>,
    metadata: Arc<MetadataManager>,
    retriever: ShardRetriever,
}

async fn ingest(
    files: Vec<(&str, DateTime<Utc>, Vec<u8>)>,
    max_shard_size_bytes: u64,
    threshold: u64,
) -> Harness {
    let store = Arc::new(MemoryBlobStore::new());
    let packer = ShardPacker::new(
        store.clone(),
        "",
        PlannerConfig { max_shard_size_bytes, n_bits: 8 },
        CompressionConfig::none(),
        container(threshold),
    );
    let batch = files
        .into_iter()
        .map(|(uid, created_at, data)| PackedFile {
            file: FileToPack {
                uid: uid.to_string(),
                created_at,
                size_bytes: data.len() as u64,
                source_path: format!("/src/{uid}.bin"),
            },
            data,
        })
        .collect();
    packer.pack_and_upload(batch).await.unwrap();

    let metadata = Arc::new(MetadataManager::new(store.clone(), container(threshold), 100));
    let retriever = ShardRetriever::new(
        store.clone(),
        metadata.clone(),
        container(threshold),
        8,
        "",
        Some(EXT_PREFIX.to_string()),
        false,
    );
    Harness { store, metadata, retriever }
}

async fn expect_bytes(h: &Harness, uid: &str, created_at: &DateTime<Utc>) -> Vec<u8> {
    match h.retriever.get_file(uid, created_at).await.unwrap() {
        ReadOutcome::Bytes(bytes) => bytes,
        other => panic!("expected bytes for {uid}, got {other:?}"),
    }
}

#[tokio::test]
async fn colliding_uids_split_across_two_shards() {
    let when = ts(2024, 1, 1);
    let h = ingest(
        vec![
            ("100", when, vec![b'a'; 4]),
            ("356", when, vec![b'b'; 4]),
            ("612", when, vec![b'c'; 4]),
        ],
        8,
        1 << 20,
    )
    .await;

    let shard_keys: Vec<String> = h
        .store
        .keys()
        .into_iter()
        .filter(|k| k.ends_with(".des"))
        .collect();
    assert_eq!(shard_keys, vec!["20240101_64_0000.des", "20240101_64_0001.des"]);

    assert_eq!(expect_bytes(&h, "100", &when).await, vec![b'a'; 4]);
    assert_eq!(expect_bytes(&h, "356", &when).await, vec![b'b'; 4]);
    assert_eq!(expect_bytes(&h, "612", &when).await, vec![b'c'; 4]);
}

#[tokio::test]
async fn bigfile_dedup_within_a_shard() {
    let when = ts(2024, 1, 1);
    let payload = vec![b'X'; 64];
    // 100 and 356 collide on one shard index, so both entries land in the
    // same shard and reference the same content-addressed object.
    let h = ingest(
        vec![("100", when, payload.clone()), ("356", when, payload.clone())],
        1 << 20,
        8,
    )
    .await;

    let bigfile_keys: Vec<String> = h
        .store
        .keys()
        .into_iter()
        .filter(|k| k.contains("_bigFiles/"))
        .collect();
    assert_eq!(bigfile_keys.len(), 1, "one content-addressed object for identical payloads");

    assert_eq!(expect_bytes(&h, "100", &when).await, payload);
    assert_eq!(expect_bytes(&h, "356", &when).await, payload);
}

#[tokio::test]
async fn tombstone_then_already_deleted() {
    let when = ts(2024, 1, 1);
    let h = ingest(vec![("u", when, b"payload".to_vec())], 1 << 20, 1 << 20).await;

    assert_eq!(expect_bytes(&h, "u", &when).await, b"payload");

    h.retriever
        .delete_file("u", &when, "op", "GDPR", None)
        .await
        .unwrap();

    // Payload bytes are still in the shard; the read must fail anyway.
    assert_eq!(
        h.retriever.get_file("u", &when).await.unwrap(),
        ReadOutcome::Tombstoned
    );

    let err = h
        .retriever
        .delete_file("u", &when, "op", "GDPR", None)
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::AlreadyDeleted(_)));
}

#[tokio::test]
async fn missing_sidecar_falls_back_to_in_shard_index() {
    let when = ts(2024, 1, 1);
    let h = ingest(vec![("u", when, b"resilient".to_vec())], 1 << 20, 1 << 20).await;

    let meta_keys: Vec<String> = h
        .store
        .keys()
        .into_iter()
        .filter(|k| k.ends_with(".meta"))
        .collect();
    assert_eq!(meta_keys.len(), 1);
    h.store.delete(&meta_keys[0]).await.unwrap();

    assert_eq!(expect_bytes(&h, "u", &when).await, b"resilient");
}

#[tokio::test]
async fn extended_retention_wins_over_shard_entry() {
    let when = ts(2024, 1, 1);
    let h = ingest(vec![("u", when, b"from-shard".to_vec())], 1 << 20, 1 << 20).await;

    let ext_key = build_ext_retention_key(EXT_PREFIX, "u", &when);
    assert_eq!(ext_key, "_ext_retention/20240101/u_2024-01-01T00:00:00Z.dat");
    h.store.put(&ext_key, b"from-ext".to_vec(), None).await.unwrap();

    assert_eq!(expect_bytes(&h, "u", &when).await, b"from-ext");
}

#[tokio::test]
async fn not_found_for_unknown_uid() {
    let when = ts(2024, 1, 1);
    let h = ingest(vec![("u", when, b"x".to_vec())], 1 << 20, 1 << 20).await;
    assert_eq!(
        h.retriever.get_file("missing", &when).await.unwrap(),
        ReadOutcome::NotFound
    );
    assert!(!h.retriever.has_file("missing", &when).await.unwrap());
    assert!(h.retriever.has_file("u", &when).await.unwrap());
}

#[tokio::test]
async fn range_get_budget_cold_and_warm() {
    let when = ts(2024, 1, 1);
    let h = ingest(vec![("u", when, b"budgeted-payload".to_vec())], 1 << 20, 1 << 20).await;

    // Remove the sidecar to force the in-shard plan, the worst case.
    let meta_keys: Vec<String> = h
        .store
        .keys()
        .into_iter()
        .filter(|k| k.ends_with(".meta"))
        .collect();
    h.store.delete(&meta_keys[0]).await.unwrap();

    h.store.reset_counters();
    assert_eq!(expect_bytes(&h, "u", &when).await, b"budgeted-payload");
    // header + footer + index + payload
    assert!(h.store.get_calls() <= 4, "cold read used {} GETs", h.store.get_calls());

    h.store.reset_counters();
    assert_eq!(expect_bytes(&h, "u", &when).await, b"budgeted-payload");
    assert_eq!(h.store.get_calls(), 1, "warm read should only fetch the payload");
}

#[tokio::test]
async fn sidecar_read_path_costs_two_gets_cold() {
    let when = ts(2024, 1, 1);
    let h = ingest(vec![("u", when, b"cheap".to_vec())], 1 << 20, 1 << 20).await;

    h.store.reset_counters();
    assert_eq!(expect_bytes(&h, "u", &when).await, b"cheap");
    // sidecar + payload
    assert_eq!(h.store.get_calls(), 2);
}

#[tokio::test]
async fn sidecar_rebuild_reproduces_index_and_checksums() {
    let when = ts(2024, 1, 1);
    let h = ingest(
        vec![("u", when, b"alpha".to_vec()), ("356", when, b"beta".to_vec())],
        1 << 20,
        1 << 20,
    )
    .await;

    let meta_keys: Vec<String> = h
        .store
        .keys()
        .into_iter()
        .filter(|k| k.ends_with(".meta"))
        .collect();
    let mut originals = Vec::new();
    for key in &meta_keys {
        let raw = h.store.get(key).await.unwrap();
        originals.push(ShardMetadata::from_json(&String::from_utf8(raw).unwrap()).unwrap());
        h.store.delete(key).await.unwrap();
    }

    // A fresh manager (cold cache) rebuilding from the shard alone must
    // reproduce the same keys and verify against the same payloads.
    let manager = MetadataManager::new(h.store.clone(), container(1 << 20), 100);
    for (key, original) in meta_keys.iter().zip(&originals) {
        let shard_key = key.replace(".meta", ".des");
        let rebuilt = manager.get_metadata(&shard_key, true).await.unwrap();
        let mut original_keys: Vec<&String> = original.index.keys().collect();
        let mut rebuilt_keys: Vec<&String> = rebuilt.index.keys().collect();
        original_keys.sort();
        rebuilt_keys.sort();
        assert_eq!(original_keys, rebuilt_keys);
        assert!(h.store.contains(key), "rebuild persisted the sidecar");
    }

    use des_store::metadata::ChecksumStatus;
    let status = manager
        .verify_entry_checksum(
            &meta_keys[0].replace(".meta", ".des"),
            "u",
            &when,
            b"alpha",
        )
        .await;
    // "u" may live in either shard; find the right one.
    let verified = match status {
        Ok(s) => s == ChecksumStatus::Verified,
        Err(_) => {
            let other = meta_keys[1].replace(".meta", ".des");
            manager.verify_entry_checksum(&other, "u", &when, b"alpha").await.unwrap()
                == ChecksumStatus::Verified
        }
    };
    assert!(verified);
}

#[tokio::test]
async fn checksum_enforcement_rejects_corrupted_sidecar_entry() {
    let when = ts(2024, 1, 1);
    let store = Arc::new(MemoryBlobStore::new());
    let packer = ShardPacker::new(
        store.clone(),
        "",
        PlannerConfig { max_shard_size_bytes: 1 << 20, n_bits: 8 },
        CompressionConfig::none(),
        container(1 << 20),
    );
    packer
        .pack_and_upload(vec![PackedFile {
            file: FileToPack {
                uid: "u".to_string(),
                created_at: when,
                size_bytes: 4,
                source_path: "/src/u.bin".to_string(),
            },
            data: b"good".to_vec(),
        }])
        .await
        .unwrap();

    // Corrupt the stored checksum.
    let shard_key = store
        .keys()
        .into_iter()
        .find(|k| k.ends_with(".des"))
        .unwrap();
    let raw = store.get(&meta_key(&shard_key)).await.unwrap();
    let mut meta = ShardMetadata::from_json(&String::from_utf8(raw).unwrap()).unwrap();
    let entry_key = ShardMetadata::build_key("u", &when);
    let mut entry = meta.index.get(&entry_key).unwrap().clone();
    entry["checksum"] = serde_json::json!("00".repeat(32));
    meta.index.insert(entry_key, entry);
    store
        .put(&meta_key(&shard_key), meta.to_json().unwrap().into_bytes(), None)
        .await
        .unwrap();

    let metadata = Arc::new(MetadataManager::new(store.clone(), container(1 << 20), 100));
    let enforcing = ShardRetriever::new(
        store.clone(),
        metadata.clone(),
        container(1 << 20),
        8,
        "",
        None,
        true,
    );
    assert!(matches!(
        enforcing.get_file("u", &when).await,
        Err(StoreError::ChecksumMismatch(_))
    ));

    let lenient = ShardRetriever::new(store, metadata, container(1 << 20), 8, "", None, false);
    assert_eq!(
        lenient.get_file("u", &when).await.unwrap(),
        ReadOutcome::Bytes(b"good".to_vec())
    );
}

#[tokio::test]
async fn uses_metadata_handle() {
    // The harness exposes the manager for sidecar-level assertions; keep
    // it exercised against a live shard.
    let when = ts(2024, 1, 1);
    let h = ingest(vec![("u", when, b"x".to_vec())], 1 << 20, 1 << 20).await;
    let shard_key = h
        .store
        .keys()
        .into_iter()
        .find(|k| k.ends_with(".des"))
        .unwrap();
    let meta = h.metadata.get_metadata(&shard_key, false).await.unwrap();
    assert!(meta.get_entry("u", &when).is_some());
    assert_eq!(meta.stats.entries, 1);
}
