//! HTTP read surface.
//!
//! `GET /files/<uid>?created_at=…` returns payload bytes; tombstones are
//! `410`, misses `404`, bad timestamps `400`. `DELETE` records a
//! tombstone; `PUT /files/<uid>/retention-policy` manages extended
//! retention.

use chrono::{DateTime, Utc};
use des_common::time::parse_iso_utc;
use rocket::http::{ContentType, Header, Status};
use rocket::request::Request;
use rocket::response;
use rocket::serde::json::Json;
use rocket::{Responder, State};
use serde::{Deserialize, Serialize};

use crate::error::StoreError;
use crate::ext_retention::{ExtendedRetentionManager, RetentionOutcome};
use crate::retriever::{LocalShardRetriever, MultiZoneRetriever, ReadOutcome, ShardRetriever};

#[derive(Clone, Debug)]
pub enum ApiError {
    RuntimeError,
    NotFound,
    Tombstoned,
    AlreadyDeleted,
    InvalidTimestamp,
    InvalidRequest(String),
    NotConfigured(String),
}

impl std::fmt::Display for ApiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let (error, message) = self.parts();
        write!(f, "{error}: {message}")
    }
}

impl ApiError {
    fn parts(&self) -> (String, String) {
        match self {
            ApiError::RuntimeError => (
                "InternalServerError".to_string(),
                "Something went wrong".to_string(),
            ),
            ApiError::NotFound => ("NotFound".to_string(), "File not found".to_string()),
            ApiError::Tombstoned => ("Tombstoned".to_string(), "File has been deleted".to_string()),
            ApiError::AlreadyDeleted => (
                "AlreadyDeleted".to_string(),
                "File is already deleted".to_string(),
            ),
            ApiError::InvalidTimestamp => (
                "InvalidTimestamp".to_string(),
                "created_at must be an ISO-8601 timestamp".to_string(),
            ),
            ApiError::InvalidRequest(message) => ("InvalidRequest".to_string(), message.clone()),
            ApiError::NotConfigured(message) => ("NotConfigured".to_string(), message.clone()),
        }
    }

    fn status(&self) -> Status {
        match self {
            ApiError::RuntimeError => Status { code: 500u16 },
            ApiError::NotFound => Status { code: 404u16 },
            ApiError::Tombstoned | ApiError::AlreadyDeleted => Status { code: 410u16 },
            ApiError::InvalidTimestamp | ApiError::InvalidRequest(_) => Status { code: 400u16 },
            ApiError::NotConfigured(_) => Status { code: 503u16 },
        }
    }
}

#[derive(Serialize)]
pub struct ErrorBody {
    error: String,
    message: String,
}

impl<'r, 'o: 'r> response::Responder<'r, 'o> for ApiError {
    fn respond_to(self, req: &'r Request<'_>) -> response::Result<'o> {
        let (error, message) = self.parts();
        let body = Json(ErrorBody { error, message });
        let mut res = <Json<ErrorBody> as response::Responder>::respond_to(body, req)?;
        res.set_header(ContentType::JSON);
        res.set_status(self.status());
        Ok(res)
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(_) => ApiError::NotFound,
            StoreError::Tombstoned(_) => ApiError::Tombstoned,
            StoreError::AlreadyDeleted(_) => ApiError::AlreadyDeleted,
            StoreError::InvalidArgument(message) => ApiError::InvalidRequest(message),
            other => {
                tracing::error!("request failed: {other}");
                ApiError::RuntimeError
            }
        }
    }
}

/// Retriever backend the service was configured with.
pub enum RetrieverBackend {
    Local(LocalShardRetriever),
    Blob(ShardRetriever),
    MultiZone(MultiZoneRetriever),
}

impl RetrieverBackend {
    pub async fn get_file(
        &self,
        uid: &str,
        created_at: &DateTime<Utc>,
    ) -> Result<ReadOutcome, StoreError> {
        match self {
            RetrieverBackend::Local(r) => r.get_file(uid, created_at).await,
            RetrieverBackend::Blob(r) => r.get_file(uid, created_at).await,
            RetrieverBackend::MultiZone(r) => r.get_file(uid, created_at).await,
        }
    }

    pub async fn delete_file(
        &self,
        uid: &str,
        created_at: &DateTime<Utc>,
        deleted_by: &str,
        reason: &str,
        ticket_id: Option<&str>,
    ) -> Result<(), StoreError> {
        match self {
            RetrieverBackend::Local(_) => Err(StoreError::InvalidArgument(
                "deletes are not supported on the local backend".to_string(),
            )),
            RetrieverBackend::Blob(r) => {
                r.delete_file(uid, created_at, deleted_by, reason, ticket_id).await
            }
            RetrieverBackend::MultiZone(r) => {
                r.delete_file(uid, created_at, deleted_by, reason, ticket_id).await
            }
        }
    }

    /// The single-store retriever, used by retention moves.
    pub fn primary(&self) -> Option<&ShardRetriever> {
        match self {
            RetrieverBackend::Blob(r) => Some(r),
            _ => None,
        }
    }
}

pub struct AppState {
    pub retriever: RetrieverBackend,
    pub ext_retention: Option<ExtendedRetentionManager>,
}

fn parse_created_at(value: &str) -> Result<DateTime<Utc>, ApiError> {
    parse_iso_utc(value).map_err(|_| ApiError::InvalidTimestamp)
}

#[derive(Responder)]
#[response(status = 200)]
pub struct FileResponder(Vec<u8>, Header<'static>, Header<'static>);

#[rocket::get("/health")]
pub async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({"status": "ok"}))
}

/// Return raw file bytes for a UID and creation timestamp.
#[tracing::instrument(skip(state))]
#[rocket::get("/files/<uid>?<created_at>")]
pub async fn get_file(
    uid: &str,
    created_at: &str,
    state: &State<AppState>,
) -> Result<FileResponder, ApiError> {
    let ts = parse_created_at(created_at)?;
    match state.retriever.get_file(uid, &ts).await? {
        ReadOutcome::Bytes(bytes) => {
            let length = bytes.len();
            Ok(FileResponder(
                bytes,
                Header::new("content-length", length.to_string()),
                Header::new("content-type", "application/octet-stream"),
            ))
        }
        ReadOutcome::Tombstoned => Err(ApiError::Tombstoned),
        ReadOutcome::NotFound => Err(ApiError::NotFound),
    }
}

#[derive(Serialize)]
pub struct DeleteResponse {
    pub status: String,
    pub uid: String,
}

/// Tombstone a file. The payload bytes remain in the shard; reads fail
/// with `410` from now on.
#[tracing::instrument(skip(state))]
#[rocket::delete("/files/<uid>?<created_at>&<deleted_by>&<reason>&<ticket_id>")]
pub async fn delete_file(
    uid: &str,
    created_at: &str,
    deleted_by: &str,
    reason: &str,
    ticket_id: Option<&str>,
    state: &State<AppState>,
) -> Result<Json<DeleteResponse>, ApiError> {
    let ts = parse_created_at(created_at)?;
    state
        .retriever
        .delete_file(uid, &ts, deleted_by, reason, ticket_id)
        .await?;
    Ok(Json(DeleteResponse { status: "tombstoned".to_string(), uid: uid.to_string() }))
}

#[derive(Debug, Deserialize)]
pub struct RetentionPolicyRequest {
    pub created_at: String,
    pub due_date: String,
}

/// Set or extend retention for a file, copying it to the object-locked
/// area when it only lives in shards.
#[tracing::instrument(skip(state, request))]
#[rocket::put("/files/<uid>/retention-policy", format = "json", data = "<request>")]
pub async fn set_retention_policy(
    uid: &str,
    request: Json<RetentionPolicyRequest>,
    state: &State<AppState>,
) -> Result<Json<RetentionOutcome>, ApiError> {
    let manager = state.ext_retention.as_ref().ok_or_else(|| {
        ApiError::NotConfigured("extended retention is not configured".to_string())
    })?;
    let retriever = state.retriever.primary().ok_or_else(|| {
        ApiError::NotConfigured("extended retention requires the s3 backend".to_string())
    })?;

    let created_at = parse_created_at(&request.created_at)?;
    let due_date = parse_created_at(&request.due_date)?;
    let outcome = manager
        .set_retention_policy(uid, &created_at, &due_date, retriever)
        .await?;
    Ok(Json(outcome))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_errors_map_to_api_errors() {
        assert!(matches!(ApiError::from(StoreError::NotFound("x".into())), ApiError::NotFound));
        assert!(matches!(
            ApiError::from(StoreError::Tombstoned("x".into())),
            ApiError::Tombstoned
        ));
        assert!(matches!(
            ApiError::from(StoreError::AlreadyDeleted("x".into())),
            ApiError::AlreadyDeleted
        ));
        assert!(matches!(
            ApiError::from(StoreError::Transient("x".into())),
            ApiError::RuntimeError
        ));
    }

    #[test]
    fn statuses_follow_the_contract() {
        assert_eq!(ApiError::NotFound.status().code, 404);
        assert_eq!(ApiError::Tombstoned.status().code, 410);
        assert_eq!(ApiError::AlreadyDeleted.status().code, 410);
        assert_eq!(ApiError::InvalidTimestamp.status().code, 400);
        assert_eq!(ApiError::NotConfigured("".into()).status().code, 503);
        assert_eq!(ApiError::RuntimeError.status().code, 500);
    }
}
