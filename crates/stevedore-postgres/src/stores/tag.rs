//! Store for tags.
//!
//! Tag pagination lives on [`crate::RepositoryStore`], next to the other
//! repository-scoped queries.

use crate::Result;
use stevedore::Tag;
use tokio_postgres::{GenericClient, Row};

pub(crate) const COLUMNS: &str = "top_level_namespace_id, repository_id, id, name, manifest_id, \
                                  created_at, updated_at";

pub(crate) fn from_row(row: &Row) -> Result<Tag> {
    Ok(Tag {
        namespace_id: row.try_get("top_level_namespace_id")?,
        repository_id: row.try_get("repository_id")?,
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        manifest_id: row.try_get("manifest_id")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

/// Store for [`Tag`] rows.
#[derive(Debug, Clone, Copy, Default)]
pub struct TagStore;

impl TagStore {
    pub fn new() -> Self {
        TagStore
    }

    pub async fn find_by_name(
        &self,
        db: &impl GenericClient,
        namespace_id: i64,
        repository_id: i64,
        name: &str,
    ) -> Result<Option<Tag>> {
        let row = db
            .query_opt(
                &format!(
                    "SELECT {COLUMNS} FROM tags \
                     WHERE top_level_namespace_id = $1 AND repository_id = $2 AND name = $3"
                ),
                &[&namespace_id, &repository_id, &name],
            )
            .await?;
        row.as_ref().map(from_row).transpose()
    }

    /// All tags of one repository by name.
    pub async fn find_all(
        &self,
        db: &impl GenericClient,
        namespace_id: i64,
        repository_id: i64,
    ) -> Result<Vec<Tag>> {
        let rows = db
            .query(
                &format!(
                    "SELECT {COLUMNS} FROM tags \
                     WHERE top_level_namespace_id = $1 AND repository_id = $2 \
                     ORDER BY name"
                ),
                &[&namespace_id, &repository_id],
            )
            .await?;
        rows.iter().map(from_row).collect()
    }

    pub async fn count(&self, db: &impl GenericClient) -> Result<i64> {
        let row = db.query_one("SELECT COUNT(*) FROM tags", &[]).await?;
        Ok(row.try_get(0)?)
    }

    /// Point a tag name at a manifest, creating or repointing it.
    ///
    /// The update only fires when the target actually changes, so repeated
    /// pushes of the same image do not churn `updated_at` or the tag-switch
    /// trigger.
    pub async fn create_or_update(
        &self,
        db: &impl GenericClient,
        namespace_id: i64,
        repository_id: i64,
        name: &str,
        manifest_id: i64,
    ) -> Result<Tag> {
        let row = db
            .query_opt(
                &format!(
                    "INSERT INTO tags (top_level_namespace_id, repository_id, name, manifest_id) \
                     VALUES ($1, $2, $3, $4) \
                     ON CONFLICT (top_level_namespace_id, repository_id, name) \
                         DO UPDATE SET \
                             manifest_id = EXCLUDED.manifest_id, \
                             updated_at = now() \
                         WHERE tags.manifest_id <> EXCLUDED.manifest_id \
                     RETURNING {COLUMNS}"
                ),
                &[&namespace_id, &repository_id, &name, &manifest_id],
            )
            .await?;
        match row {
            Some(row) => from_row(&row),
            // tag already points at the manifest; nothing changed
            None => match self
                .find_by_name(db, namespace_id, repository_id, name)
                .await?
            {
                Some(tag) => Ok(tag),
                None => Err(crate::Error::UniqueViolation),
            },
        }
    }

    pub async fn delete(
        &self,
        db: &impl GenericClient,
        namespace_id: i64,
        repository_id: i64,
        name: &str,
    ) -> Result<bool> {
        let n = db
            .execute(
                "DELETE FROM tags \
                 WHERE top_level_namespace_id = $1 AND repository_id = $2 AND name = $3",
                &[&namespace_id, &repository_id, &name],
            )
            .await?;
        Ok(n > 0)
    }
}
