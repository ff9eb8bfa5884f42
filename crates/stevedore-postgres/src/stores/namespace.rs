//! Store for top-level namespaces.

use crate::{Error, Result};
use stevedore::Namespace;
use tokio_postgres::{GenericClient, Row};

const COLUMNS: &str = "id, name, created_at, updated_at";

fn from_row(row: &Row) -> Result<Namespace> {
    Ok(Namespace {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

/// Store for [`Namespace`] rows.
#[derive(Debug, Clone, Copy, Default)]
pub struct NamespaceStore;

impl NamespaceStore {
    pub fn new() -> Self {
        NamespaceStore
    }

    pub async fn find_by_id(&self, db: &impl GenericClient, id: i64) -> Result<Option<Namespace>> {
        let row = db
            .query_opt(
                &format!("SELECT {COLUMNS} FROM namespaces WHERE id = $1"),
                &[&id],
            )
            .await?;
        row.as_ref().map(from_row).transpose()
    }

    pub async fn find_by_name(
        &self,
        db: &impl GenericClient,
        name: &str,
    ) -> Result<Option<Namespace>> {
        let row = db
            .query_opt(
                &format!("SELECT {COLUMNS} FROM namespaces WHERE name = $1"),
                &[&name],
            )
            .await?;
        row.as_ref().map(from_row).transpose()
    }

    pub async fn find_all(&self, db: &impl GenericClient) -> Result<Vec<Namespace>> {
        let rows = db
            .query(
                &format!("SELECT {COLUMNS} FROM namespaces ORDER BY name"),
                &[],
            )
            .await?;
        rows.iter().map(from_row).collect()
    }

    pub async fn count(&self, db: &impl GenericClient) -> Result<i64> {
        let row = db.query_one("SELECT COUNT(*) FROM namespaces", &[]).await?;
        Ok(row.try_get(0)?)
    }

    /// Insert a namespace. Conflicts surface as [`Error::UniqueViolation`].
    pub async fn create(&self, db: &impl GenericClient, name: &str) -> Result<Namespace> {
        let row = db
            .query_one(
                &format!("INSERT INTO namespaces (name) VALUES ($1) RETURNING {COLUMNS}"),
                &[&name],
            )
            .await
            .map_err(Error::from_insert)?;
        from_row(&row)
    }

    /// Idempotent insert: looks the name up first so conflicts do not burn
    /// sequence values, then races the insert with `ON CONFLICT`.
    pub async fn create_or_find(&self, db: &impl GenericClient, name: &str) -> Result<Namespace> {
        if let Some(existing) = self.find_by_name(db, name).await? {
            return Ok(existing);
        }
        let row = db
            .query_opt(
                &format!(
                    "INSERT INTO namespaces (name) VALUES ($1) \
                     ON CONFLICT (name) DO NOTHING RETURNING {COLUMNS}"
                ),
                &[&name],
            )
            .await?;
        match row {
            Some(row) => from_row(&row),
            // lost the race to a concurrent insert
            None => match self.find_by_name(db, name).await? {
                Some(existing) => Ok(existing),
                None => Err(Error::UniqueViolation),
            },
        }
    }
}
