//! Postgres plumbing: watermark repository and source-table provider.

use des_common::env::env_str;
use diesel::pg::PgConnection;
use diesel::prelude::*;
use dotenvy::dotenv;

use crate::error::{StoreError, StoreResult};

pub mod schema;
pub mod source;
pub mod watermark;

/// Open the connection a migration run drives its watermark updates and
/// source-table pages over.
///
/// A missing `DATABASE_URL` is a configuration error, reported before
/// any connection attempt rather than as an opaque connect failure.
pub fn establish_connection() -> StoreResult<PgConnection> {
    dotenv().ok();
    let database_url = env_str("DATABASE_URL").ok_or_else(|| {
        StoreError::InvalidArgument(
            "DATABASE_URL must be set to run a migration cycle".to_string(),
        )
    })?;
    tracing::debug!("connecting to the watermark database");
    Ok(PgConnection::establish(&database_url)?)
}
