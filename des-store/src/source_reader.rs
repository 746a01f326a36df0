//! Readers for source file locations during migration.
//!
//! A `file_location` is either a local path or an `s3://bucket/key` URI;
//! S3 reads retry transient faults with exponential backoff.

use std::future::Future;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use aws_config::SdkConfig;
use aws_sdk_s3 as s3;
use aws_sdk_s3::error::SdkError;
use url::Url;

use crate::error::{StoreError, StoreResult};

pub const DEFAULT_SOURCE_MAX_RETRIES: u32 = 3;
pub const DEFAULT_SOURCE_RETRY_DELAY_MS: u64 = 2000;

pub fn is_s3_uri(location: &str) -> bool {
    location.starts_with("s3://")
}

/// Split an `s3://bucket/key` URI into `(bucket, key)`.
pub fn parse_s3_uri(uri: &str) -> StoreResult<(String, String)> {
    let parsed = Url::parse(uri)
        .map_err(|e| StoreError::InvalidArgument(format!("invalid S3 URI {uri:?}: {e}")))?;
    if parsed.scheme() != "s3" {
        return Err(StoreError::InvalidArgument(format!("invalid S3 URI {uri:?}")));
    }
    let bucket = parsed
        .host_str()
        .filter(|h| !h.is_empty())
        .ok_or_else(|| StoreError::InvalidArgument(format!("invalid S3 URI {uri:?}")))?;
    let key = parsed.path().trim_start_matches('/');
    if key.is_empty() {
        return Err(StoreError::InvalidArgument(format!("S3 URI missing key: {uri:?}")));
    }
    if parsed.query().is_some() || parsed.fragment().is_some() {
        return Err(StoreError::InvalidArgument(format!(
            "unexpected query/fragment in S3 URI: {uri:?}"
        )));
    }
    Ok((bucket.to_string(), key.to_string()))
}

/// Run `op`, retrying transient failures with doubling delays.
pub async fn with_retries<T, F, Fut>(
    max_retries: u32,
    initial_delay: Duration,
    mut op: F,
) -> StoreResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = StoreResult<T>>,
{
    let mut attempt = 0;
    let mut delay = initial_delay;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) if err.is_transient() && attempt < max_retries => {
                attempt += 1;
                tracing::warn!(attempt, %err, "transient failure, backing off");
                tokio::time::sleep(delay).await;
                delay *= 2;
            }
            Err(err) => return Err(err),
        }
    }
}

/// Reads migration source files from local disk or S3.
pub struct SourceFileReader {
    s3: Option<Arc<s3::Client>>,
    max_retries: u32,
    retry_delay: Duration,
}

impl SourceFileReader {
    /// Local-only reader; any `s3://` location fails with `InvalidArgument`.
    pub fn local_only() -> Self {
        SourceFileReader {
            s3: None,
            max_retries: DEFAULT_SOURCE_MAX_RETRIES,
            retry_delay: Duration::from_millis(DEFAULT_SOURCE_RETRY_DELAY_MS),
        }
    }

    pub fn with_s3(cfg: &SdkConfig, max_retries: u32, retry_delay: Duration) -> Self {
        SourceFileReader {
            s3: Some(Arc::new(s3::Client::new(cfg))),
            max_retries,
            retry_delay,
        }
    }

    /// Read the full contents behind a file location.
    pub async fn read(&self, location: &str) -> StoreResult<Vec<u8>> {
        if is_s3_uri(location) {
            return self.read_s3(location).await;
        }
        let path = Path::new(location);
        tokio::fs::read(path)
            .await
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::NotFound => {
                    StoreError::NotFound(format!("source file missing: {location}"))
                }
                _ => StoreError::Io(e),
            })
    }

    async fn read_s3(&self, uri: &str) -> StoreResult<Vec<u8>> {
        let client = self
            .s3
            .clone()
            .ok_or_else(|| {
                StoreError::InvalidArgument(format!(
                    "S3 source {uri:?} encountered but no S3 source client is configured"
                ))
            })?;
        let (bucket, key) = parse_s3_uri(uri)?;

        with_retries(self.max_retries, self.retry_delay, || {
            let client = client.clone();
            let bucket = bucket.clone();
            let key = key.clone();
            async move {
                let res = client.get_object().bucket(&bucket).key(&key).send().await;
                match res {
                    Ok(out) => {
                        let bytes = out
                            .body
                            .collect()
                            .await
                            .map_err(|e| StoreError::Transient(e.to_string()))?;
                        Ok(bytes.to_vec())
                    }
                    Err(SdkError::ServiceError(service)) => {
                        let inner = service.into_err();
                        if inner.is_no_such_key() {
                            Err(StoreError::NotFound(format!("s3://{bucket}/{key}")))
                        } else {
                            Err(StoreError::Transient(inner.to_string()))
                        }
                    }
                    Err(other) => Err(StoreError::Transient(other.to_string())),
                }
            }
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn parses_well_formed_uris() {
        assert_eq!(
            parse_s3_uri("s3://bucket/a/b/c.bin").unwrap(),
            ("bucket".to_string(), "a/b/c.bin".to_string())
        );
    }

    #[test]
    fn rejects_malformed_uris() {
        assert!(parse_s3_uri("http://bucket/key").is_err());
        assert!(parse_s3_uri("s3://bucket").is_err());
        assert!(parse_s3_uri("s3://bucket/key?version=3").is_err());
    }

    #[test]
    fn detects_s3_locations() {
        assert!(is_s3_uri("s3://b/k"));
        assert!(!is_s3_uri("/var/data/file.bin"));
    }

    #[tokio::test]
    async fn retries_transient_errors_until_success() {
        let attempts = AtomicU32::new(0);
        let result = with_retries(5, Duration::from_millis(1), || {
            let n = attempts.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(StoreError::Transient("flaky".into()))
                } else {
                    Ok(42)
                }
            }
        })
        .await;
        assert_eq!(result.unwrap(), 42);
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn does_not_retry_terminal_errors() {
        let attempts = AtomicU32::new(0);
        let result: StoreResult<()> = with_retries(5, Duration::from_millis(1), || {
            attempts.fetch_add(1, Ordering::SeqCst);
            async { Err(StoreError::NotFound("gone".into())) }
        })
        .await;
        assert!(matches!(result, Err(StoreError::NotFound(_))));
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn retry_budget_is_bounded() {
        let attempts = AtomicU32::new(0);
        let result: StoreResult<()> = with_retries(2, Duration::from_millis(1), || {
            attempts.fetch_add(1, Ordering::SeqCst);
            async { Err(StoreError::Transient("down".into())) }
        })
        .await;
        assert!(matches!(result, Err(StoreError::Transient(_))));
        assert_eq!(attempts.load(Ordering::SeqCst), 3); // initial + 2 retries
    }

    #[tokio::test]
    async fn local_reader_rejects_s3_locations() {
        let reader = SourceFileReader::local_only();
        assert!(matches!(
            reader.read("s3://bucket/key").await,
            Err(StoreError::InvalidArgument(_))
        ));
    }

    #[tokio::test]
    async fn local_reader_reads_files() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("f.bin");
        std::fs::write(&path, b"content").unwrap();
        let reader = SourceFileReader::local_only();
        assert_eq!(reader.read(path.to_str().unwrap()).await.unwrap(), b"content");
        assert!(matches!(
            reader.read(dir.path().join("missing").to_str().unwrap()).await,
            Err(StoreError::NotFound(_))
        ));
    }
}
