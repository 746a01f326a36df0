//! S3-compatible implementation of [`BlobStore`].
//!
//! Works against AWS S3 or any compatible endpoint (MinIO, Spaces); the
//! endpoint is part of the `SdkConfig` handed in by the binary.

use async_trait::async_trait;
use aws_config::SdkConfig;
use aws_sdk_s3 as s3;
use aws_sdk_s3::error::SdkError;
use aws_sdk_s3::primitives::{ByteStream, DateTime as S3DateTime};
use aws_sdk_s3::types::{ObjectLockMode, ObjectLockRetention, ObjectLockRetentionMode};
use chrono::{DateTime, Utc};

use crate::blobstore::BlobStore;
use crate::error::{StoreError, StoreResult};

#[derive(Debug, Clone)]
pub struct S3BlobStore {
    client: s3::Client,
    pub bucket: String,
}

impl S3BlobStore {
    pub fn new(bucket: String, cfg: &SdkConfig) -> Self {
        let client = s3::Client::new(cfg);
        S3BlobStore { client, bucket }
    }

    fn retain_until(value: &DateTime<Utc>) -> S3DateTime {
        S3DateTime::from_secs(value.timestamp())
    }
}

fn from_get_error(err: SdkError<s3::operation::get_object::GetObjectError>, key: &str) -> StoreError {
    match err {
        SdkError::ServiceError(service) => {
            let inner = service.into_err();
            if inner.is_no_such_key() {
                StoreError::NotFound(key.to_string())
            } else {
                StoreError::Transient(inner.to_string())
            }
        }
        other => StoreError::Transient(other.to_string()),
    }
}

/// Parse the total size out of a `Content-Range: bytes start-end/total`.
fn total_from_content_range(value: &str) -> Option<u64> {
    value.rsplit('/').next()?.parse().ok()
}

#[async_trait]
impl BlobStore for S3BlobStore {
    async fn head(&self, key: &str) -> StoreResult<bool> {
        let res = self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await;
        match res {
            Ok(_) => Ok(true),
            Err(SdkError::ServiceError(service)) if service.err().is_not_found() => Ok(false),
            Err(err) => Err(StoreError::Transient(err.to_string())),
        }
    }

    async fn get(&self, key: &str) -> StoreResult<Vec<u8>> {
        let res = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| from_get_error(e, key))?;
        let bytes = res
            .body
            .collect()
            .await
            .map_err(|e| StoreError::Transient(e.to_string()))?;
        Ok(bytes.to_vec())
    }

    async fn get_range(&self, key: &str, start: u64, length: u64) -> StoreResult<Vec<u8>> {
        let end = start + length.saturating_sub(1);
        let res = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .range(format!("bytes={start}-{end}"))
            .send()
            .await
            .map_err(|e| from_get_error(e, key))?;
        let bytes = res
            .body
            .collect()
            .await
            .map_err(|e| StoreError::Transient(e.to_string()))?;
        Ok(bytes.to_vec())
    }

    async fn get_tail(&self, key: &str, length: u64) -> StoreResult<(Vec<u8>, u64)> {
        let res = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .range(format!("bytes=-{length}"))
            .send()
            .await
            .map_err(|e| from_get_error(e, key))?;
        let total = res
            .content_range()
            .and_then(total_from_content_range)
            .or_else(|| res.content_length().map(|l| l as u64))
            .ok_or_else(|| {
                StoreError::Transient(format!("no usable size in tail response for {key}"))
            })?;
        let bytes = res
            .body
            .collect()
            .await
            .map_err(|e| StoreError::Transient(e.to_string()))?;
        Ok((bytes.to_vec(), total))
    }

    async fn list_prefix(&self, prefix: &str) -> StoreResult<Vec<String>> {
        let mut keys = Vec::new();
        let mut continuation: Option<String> = None;
        loop {
            let res = self
                .client
                .list_objects_v2()
                .bucket(&self.bucket)
                .prefix(prefix)
                .set_continuation_token(continuation.clone())
                .send()
                .await
                .map_err(|e| StoreError::Transient(e.to_string()))?;
            for object in res.contents() {
                if let Some(key) = object.key() {
                    keys.push(key.to_string());
                }
            }
            match res.next_continuation_token() {
                Some(token) => continuation = Some(token.to_string()),
                None => break,
            }
        }
        keys.sort();
        Ok(keys)
    }

    async fn put(&self, key: &str, bytes: Vec<u8>, content_type: Option<&str>) -> StoreResult<()> {
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .set_content_type(content_type.map(|c| c.to_string()))
            .body(ByteStream::from(bytes))
            .send()
            .await
            .map_err(|e| StoreError::Transient(e.to_string()))?;
        Ok(())
    }

    async fn put_with_retention(
        &self,
        key: &str,
        bytes: Vec<u8>,
        retain_until: DateTime<Utc>,
    ) -> StoreResult<()> {
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .body(ByteStream::from(bytes))
            .object_lock_mode(ObjectLockMode::Governance)
            .object_lock_retain_until_date(Self::retain_until(&retain_until))
            .send()
            .await
            .map_err(|e| StoreError::Transient(e.to_string()))?;
        Ok(())
    }

    async fn set_retention(&self, key: &str, retain_until: DateTime<Utc>) -> StoreResult<()> {
        let retention = ObjectLockRetention::builder()
            .mode(ObjectLockRetentionMode::Governance)
            .retain_until_date(Self::retain_until(&retain_until))
            .build();
        self.client
            .put_object_retention()
            .bucket(&self.bucket)
            .key(key)
            .retention(retention)
            .send()
            .await
            .map_err(|e| StoreError::Transient(e.to_string()))?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> StoreResult<()> {
        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| StoreError::Transient(e.to_string()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn content_range_total_parses() {
        assert_eq!(total_from_content_range("bytes 0-11/1234"), Some(1234));
        assert_eq!(total_from_content_range("bytes 988-999/1000"), Some(1000));
        assert_eq!(total_from_content_range("garbage"), None);
    }
}
