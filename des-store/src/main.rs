#[macro_use]
extern crate rocket;

use std::sync::Arc;

use des_store::apis::{self, AppState, RetrieverBackend};
use des_store::blobstore::S3BlobStore;
use des_store::config::{env_to_cfg, load_zone_map, RetrieverBackendKind, StoreConfig, ZoneS3Config};
use des_store::ext_retention::ExtendedRetentionManager;
use des_store::metadata::MetadataManager;
use des_store::retriever::multi_zone::RetrieverZone;
use des_store::retriever::{LocalShardRetriever, MultiZoneRetriever, ShardRetriever};
use dotenvy::dotenv;

async fn sdk_config_for(endpoint: Option<&str>, region: Option<&str>) -> aws_config::SdkConfig {
    let mut loader = aws_config::from_env();
    if let Some(endpoint) = endpoint {
        loader = loader.endpoint_url(endpoint);
    }
    if let Some(region) = region {
        loader = loader.region(aws_config::Region::new(region.to_string()));
    }
    loader.load().await
}

fn blob_retriever(cfg: &StoreConfig, store: Arc<S3BlobStore>) -> ShardRetriever {
    let metadata = Arc::new(MetadataManager::new(
        store.clone(),
        cfg.container.clone(),
        cfg.sidecar_cache_size,
    ));
    ShardRetriever::new(
        store,
        metadata,
        cfg.container.clone(),
        cfg.n_bits,
        &cfg.s3_prefix,
        cfg.ext_retention_prefix.clone(),
        cfg.enforce_checksum,
    )
}

async fn zone_retriever(cfg: &StoreConfig, zone_s3: &ZoneS3Config) -> ShardRetriever {
    let sdk = sdk_config_for(zone_s3.endpoint_url.as_deref(), zone_s3.region_name.as_deref()).await;
    let store = Arc::new(S3BlobStore::new(zone_s3.bucket.clone(), &sdk));
    let metadata = Arc::new(MetadataManager::new(
        store.clone(),
        cfg.container.clone(),
        cfg.sidecar_cache_size,
    ));
    ShardRetriever::new(
        store,
        metadata,
        cfg.container.clone(),
        cfg.n_bits,
        &zone_s3.prefix,
        cfg.ext_retention_prefix.clone(),
        cfg.enforce_checksum,
    )
}

#[launch]
async fn rocket() -> _ {
    dotenv().ok();
    tracing_subscriber::fmt::init();

    let cfg = env_to_cfg().expect("invalid DES configuration");
    tracing::info!(backend = ?cfg.backend, "starting DES read service");

    let (retriever, ext_retention) = match &cfg.backend {
        RetrieverBackendKind::Local { base_dir } => {
            let local = LocalShardRetriever::new(base_dir.clone(), cfg.n_bits, cfg.container.clone())
                .expect("DES_BASE_DIR must exist for the local backend");
            (RetrieverBackend::Local(local), None)
        }
        RetrieverBackendKind::S3 => {
            let bucket = cfg
                .s3_bucket
                .clone()
                .expect("DES_S3_BUCKET must be set for the s3 backend");
            let sdk = sdk_config_for(cfg.s3_endpoint.as_deref(), None).await;
            let store = Arc::new(S3BlobStore::new(bucket, &sdk));
            let ext = cfg
                .ext_retention_prefix
                .as_deref()
                .map(|prefix| ExtendedRetentionManager::new(store.clone(), prefix));
            (RetrieverBackend::Blob(blob_retriever(&cfg, store)), ext)
        }
        RetrieverBackendKind::MultiZone { zones_path } => {
            let map = load_zone_map(zones_path).expect("invalid DES_ZONES_CONFIG");
            let mut zones = Vec::new();
            for zone in &map.zones {
                zones.push(RetrieverZone {
                    name: zone.name.clone(),
                    range: zone.range,
                    retriever: zone_retriever(&cfg, &zone.s3).await,
                });
            }
            let multi = MultiZoneRetriever::new(zones, map.n_bits).expect("invalid zone map");
            (RetrieverBackend::MultiZone(multi), None)
        }
    };

    let figment = rocket::Config::figment().merge(("port", cfg.port));

    rocket::custom(figment)
        .manage(AppState { retriever, ext_retention })
        .mount(
            "/",
            routes![
                apis::health,
                apis::get_file,
                apis::delete_file,
                apis::set_retention_policy
            ],
        )
}
