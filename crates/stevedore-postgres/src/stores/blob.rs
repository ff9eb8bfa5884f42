//! Store for content-addressed blobs.
//!
//! Blob rows are globally unique by digest. Membership in a repository is a
//! separate `repository_blobs` link maintained through
//! [`crate::RepositoryStore`].

use crate::stores::media;
use crate::{Error, Result};
use stevedore::{Blob, Digest};
use tokio_postgres::{GenericClient, Row};

const COLUMNS: &str = "b.digest, mt.media_type, b.size, b.created_at";
const FROM: &str = "blobs b JOIN media_types mt ON mt.id = b.media_type_id";

pub(crate) fn from_row(row: &Row) -> Result<Blob> {
    let digest: String = row.try_get("digest")?;
    Ok(Blob {
        digest: digest.parse()?,
        media_type: row.try_get("media_type")?,
        size: row.try_get("size")?,
        created_at: row.try_get("created_at")?,
    })
}

/// Store for [`Blob`] rows.
#[derive(Debug, Clone, Copy, Default)]
pub struct BlobStore;

impl BlobStore {
    pub fn new() -> Self {
        BlobStore
    }

    pub async fn find_by_digest(
        &self,
        db: &impl GenericClient,
        digest: &Digest,
    ) -> Result<Option<Blob>> {
        let row = db
            .query_opt(
                &format!("SELECT {COLUMNS} FROM {FROM} WHERE b.digest = $1"),
                &[&digest.to_string()],
            )
            .await?;
        row.as_ref().map(from_row).transpose()
    }

    pub async fn find_all(&self, db: &impl GenericClient) -> Result<Vec<Blob>> {
        let rows = db
            .query(
                &format!("SELECT {COLUMNS} FROM {FROM} ORDER BY b.digest"),
                &[],
            )
            .await?;
        rows.iter().map(from_row).collect()
    }

    pub async fn count(&self, db: &impl GenericClient) -> Result<i64> {
        let row = db.query_one("SELECT COUNT(*) FROM blobs", &[]).await?;
        Ok(row.try_get(0)?)
    }

    /// Insert a blob row. The media type must already be registered in the
    /// dictionary; conflicts on the digest surface as
    /// [`Error::UniqueViolation`].
    pub async fn create(
        &self,
        db: &impl GenericClient,
        digest: &Digest,
        media_type: &str,
        size: i64,
    ) -> Result<Blob> {
        let media_type_id = media::resolve(db, media_type).await?;
        let row = db
            .query_one(
                "INSERT INTO blobs (digest, media_type_id, size) VALUES ($1, $2, $3) \
                 RETURNING created_at",
                &[&digest.to_string(), &media_type_id, &size],
            )
            .await
            .map_err(Error::from_insert)?;
        Ok(Blob {
            digest: digest.clone(),
            media_type: media_type.to_string(),
            size,
            created_at: row.try_get("created_at")?,
        })
    }

    /// Idempotent insert by digest. An existing row wins regardless of the
    /// media type and size passed in.
    pub async fn create_or_find(
        &self,
        db: &impl GenericClient,
        digest: &Digest,
        media_type: &str,
        size: i64,
    ) -> Result<Blob> {
        if let Some(existing) = self.find_by_digest(db, digest).await? {
            return Ok(existing);
        }
        let media_type_id = media::resolve(db, media_type).await?;
        let row = db
            .query_opt(
                "INSERT INTO blobs (digest, media_type_id, size) VALUES ($1, $2, $3) \
                 ON CONFLICT (digest) DO NOTHING RETURNING created_at",
                &[&digest.to_string(), &media_type_id, &size],
            )
            .await?;
        match row {
            Some(row) => Ok(Blob {
                digest: digest.clone(),
                media_type: media_type.to_string(),
                size,
                created_at: row.try_get("created_at")?,
            }),
            None => match self.find_by_digest(db, digest).await? {
                Some(existing) => Ok(existing),
                None => Err(Error::UniqueViolation),
            },
        }
    }

    /// Delete a blob row. Link rows in `repository_blobs`,
    /// `gc_blobs_configurations`, and `gc_blobs_layers` cascade away; the GC
    /// worker only calls this once the blob verified as dangling.
    pub async fn delete(&self, db: &impl GenericClient, digest: &Digest) -> Result<bool> {
        let n = db
            .execute(
                "DELETE FROM blobs WHERE digest = $1",
                &[&digest.to_string()],
            )
            .await?;
        Ok(n > 0)
    }
}
