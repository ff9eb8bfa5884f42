//! Media-type dictionary lookups.
//!
//! Media-type strings written to any row must already exist in the
//! `media_types` dictionary; writes with an unknown string fail with
//! [`Error::UnknownMediaType`] before touching the target table.

use crate::{Error, Result};
use tokio_postgres::GenericClient;

/// Resolve a media-type string to its dictionary id.
pub(crate) async fn resolve(db: &impl GenericClient, media_type: &str) -> Result<i32> {
    let row = db
        .query_opt(
            "SELECT id FROM media_types WHERE media_type = $1",
            &[&media_type],
        )
        .await?;
    match row {
        Some(row) => Ok(row.try_get("id")?),
        None => Err(Error::UnknownMediaType(media_type.to_string())),
    }
}

/// Resolve an optional media-type string, passing `None` through.
pub(crate) async fn resolve_opt(
    db: &impl GenericClient,
    media_type: Option<&str>,
) -> Result<Option<i32>> {
    match media_type {
        Some(mt) => Ok(Some(resolve(db, mt).await?)),
        None => Ok(None),
    }
}
