//! Stores for the GC review queues and reachability links.
//!
//! Queue rows are written by database triggers; these stores only dequeue,
//! re-verify, postpone, and delete. Dequeueing takes an exclusive row lock
//! with skip-locked semantics so that concurrent workers never process the
//! same task and never block each other on a contested row.

use crate::{Error, Result};
use std::time::Duration;
use stevedore::{Digest, GCBlobTask, GCConfigLink, GCLayerLink, GCManifestTask, GCReviewAfterDefault};
use tokio_postgres::{GenericClient, Row};

const BLOB_TASK_COLUMNS: &str = "digest, review_after, review_count, event, created_at";

fn blob_task_from_row(row: &Row) -> Result<GCBlobTask> {
    let digest: String = row.try_get("digest")?;
    Ok(GCBlobTask {
        digest: digest.parse()?,
        review_after: row.try_get("review_after")?,
        review_count: row.try_get("review_count")?,
        event: row.try_get("event")?,
        created_at: row.try_get("created_at")?,
    })
}

/// Store for [`GCBlobTask`] rows in `gc_blob_review_queue`.
#[derive(Debug, Clone, Copy, Default)]
pub struct GCBlobTaskStore;

impl GCBlobTaskStore {
    pub fn new() -> Self {
        GCBlobTaskStore
    }

    /// Dequeue the next due task, locking its row for the caller's
    /// transaction. Other transactions skip the locked row.
    pub async fn next(&self, db: &impl GenericClient) -> Result<Option<GCBlobTask>> {
        let row = db
            .query_opt(
                &format!(
                    "SELECT {BLOB_TASK_COLUMNS} FROM gc_blob_review_queue \
                     WHERE review_after < now() \
                     ORDER BY review_after, digest \
                     LIMIT 1 \
                     FOR UPDATE SKIP LOCKED"
                ),
                &[],
            )
            .await?;
        row.as_ref().map(blob_task_from_row).transpose()
    }

    /// Re-lock a specific task row, e.g. from the fresh transaction of a
    /// postpone path.
    pub async fn find_and_lock(
        &self,
        db: &impl GenericClient,
        digest: &Digest,
    ) -> Result<Option<GCBlobTask>> {
        let row = db
            .query_opt(
                &format!(
                    "SELECT {BLOB_TASK_COLUMNS} FROM gc_blob_review_queue \
                     WHERE digest = $1 FOR UPDATE"
                ),
                &[&digest.to_string()],
            )
            .await?;
        row.as_ref().map(blob_task_from_row).transpose()
    }

    /// Push the task's review forward by `delay` and bump its review count.
    pub async fn postpone(
        &self,
        db: &impl GenericClient,
        task: &mut GCBlobTask,
        delay: Duration,
    ) -> Result<()> {
        let secs = delay.as_secs_f64();
        let row = db
            .query_one(
                "UPDATE gc_blob_review_queue \
                 SET review_after = now() + make_interval(secs => $2), \
                     review_count = review_count + 1 \
                 WHERE digest = $1 \
                 RETURNING review_after, review_count",
                &[&task.digest.to_string(), &secs],
            )
            .await?;
        task.review_after = row.try_get("review_after")?;
        task.review_count = row.try_get("review_count")?;
        Ok(())
    }

    pub async fn delete(&self, db: &impl GenericClient, task: &GCBlobTask) -> Result<()> {
        db.execute(
            "DELETE FROM gc_blob_review_queue WHERE digest = $1",
            &[&task.digest.to_string()],
        )
        .await?;
        Ok(())
    }

    /// Whether the digest is unreachable: linked to no repository and to no
    /// manifest configuration or layer.
    pub async fn is_dangling(&self, db: &impl GenericClient, digest: &Digest) -> Result<bool> {
        let row = db
            .query_one(
                "SELECT NOT EXISTS (SELECT 1 FROM repository_blobs WHERE blob_digest = $1) \
                    AND NOT EXISTS (SELECT 1 FROM gc_blobs_configurations WHERE digest = $1) \
                    AND NOT EXISTS (SELECT 1 FROM gc_blobs_layers WHERE digest = $1)",
                &[&digest.to_string()],
            )
            .await?;
        Ok(row.try_get(0)?)
    }

    pub async fn find_all(&self, db: &impl GenericClient) -> Result<Vec<GCBlobTask>> {
        let rows = db
            .query(
                &format!(
                    "SELECT {BLOB_TASK_COLUMNS} FROM gc_blob_review_queue \
                     ORDER BY review_after, digest"
                ),
                &[],
            )
            .await?;
        rows.iter().map(blob_task_from_row).collect()
    }

    pub async fn count(&self, db: &impl GenericClient) -> Result<i64> {
        let row = db
            .query_one("SELECT COUNT(*) FROM gc_blob_review_queue", &[])
            .await?;
        Ok(row.try_get(0)?)
    }
}

const MANIFEST_TASK_COLUMNS: &str = "top_level_namespace_id, repository_id, manifest_id, \
                                     review_after, review_count, event, created_at";

fn manifest_task_from_row(row: &Row) -> Result<GCManifestTask> {
    Ok(GCManifestTask {
        namespace_id: row.try_get("top_level_namespace_id")?,
        repository_id: row.try_get("repository_id")?,
        manifest_id: row.try_get("manifest_id")?,
        review_after: row.try_get("review_after")?,
        review_count: row.try_get("review_count")?,
        event: row.try_get("event")?,
        created_at: row.try_get("created_at")?,
    })
}

/// Store for [`GCManifestTask`] rows in `gc_manifest_review_queue`.
#[derive(Debug, Clone, Copy, Default)]
pub struct GCManifestTaskStore;

impl GCManifestTaskStore {
    pub fn new() -> Self {
        GCManifestTaskStore
    }

    pub async fn next(&self, db: &impl GenericClient) -> Result<Option<GCManifestTask>> {
        let row = db
            .query_opt(
                &format!(
                    "SELECT {MANIFEST_TASK_COLUMNS} FROM gc_manifest_review_queue \
                     WHERE review_after < now() \
                     ORDER BY review_after, top_level_namespace_id, repository_id, manifest_id \
                     LIMIT 1 \
                     FOR UPDATE SKIP LOCKED"
                ),
                &[],
            )
            .await?;
        row.as_ref().map(manifest_task_from_row).transpose()
    }

    pub async fn find_and_lock(
        &self,
        db: &impl GenericClient,
        namespace_id: i64,
        repository_id: i64,
        manifest_id: i64,
    ) -> Result<Option<GCManifestTask>> {
        let row = db
            .query_opt(
                &format!(
                    "SELECT {MANIFEST_TASK_COLUMNS} FROM gc_manifest_review_queue \
                     WHERE top_level_namespace_id = $1 AND repository_id = $2 AND manifest_id = $3 \
                     FOR UPDATE"
                ),
                &[&namespace_id, &repository_id, &manifest_id],
            )
            .await?;
        row.as_ref().map(manifest_task_from_row).transpose()
    }

    pub async fn postpone(
        &self,
        db: &impl GenericClient,
        task: &mut GCManifestTask,
        delay: Duration,
    ) -> Result<()> {
        let secs = delay.as_secs_f64();
        let row = db
            .query_one(
                "UPDATE gc_manifest_review_queue \
                 SET review_after = now() + make_interval(secs => $4), \
                     review_count = review_count + 1 \
                 WHERE top_level_namespace_id = $1 AND repository_id = $2 AND manifest_id = $3 \
                 RETURNING review_after, review_count",
                &[
                    &task.namespace_id,
                    &task.repository_id,
                    &task.manifest_id,
                    &secs,
                ],
            )
            .await?;
        task.review_after = row.try_get("review_after")?;
        task.review_count = row.try_get("review_count")?;
        Ok(())
    }

    pub async fn delete(&self, db: &impl GenericClient, task: &GCManifestTask) -> Result<()> {
        db.execute(
            "DELETE FROM gc_manifest_review_queue \
             WHERE top_level_namespace_id = $1 AND repository_id = $2 AND manifest_id = $3",
            &[&task.namespace_id, &task.repository_id, &task.manifest_id],
        )
        .await?;
        Ok(())
    }

    /// Whether the manifest is unreachable: pointed to by no tag and
    /// referenced as a child by no manifest list.
    pub async fn is_dangling(
        &self,
        db: &impl GenericClient,
        namespace_id: i64,
        repository_id: i64,
        manifest_id: i64,
    ) -> Result<bool> {
        let row = db
            .query_one(
                "SELECT NOT EXISTS ( \
                     SELECT 1 FROM tags \
                     WHERE top_level_namespace_id = $1 AND repository_id = $2 AND manifest_id = $3) \
                    AND NOT EXISTS ( \
                     SELECT 1 FROM manifest_references \
                     WHERE top_level_namespace_id = $1 AND repository_id = $2 AND child_id = $3)",
                &[&namespace_id, &repository_id, &manifest_id],
            )
            .await?;
        Ok(row.try_get(0)?)
    }

    pub async fn find_all(&self, db: &impl GenericClient) -> Result<Vec<GCManifestTask>> {
        let rows = db
            .query(
                &format!(
                    "SELECT {MANIFEST_TASK_COLUMNS} FROM gc_manifest_review_queue \
                     ORDER BY review_after, top_level_namespace_id, repository_id, manifest_id"
                ),
                &[],
            )
            .await?;
        rows.iter().map(manifest_task_from_row).collect()
    }

    pub async fn count(&self, db: &impl GenericClient) -> Result<i64> {
        let row = db
            .query_one("SELECT COUNT(*) FROM gc_manifest_review_queue", &[])
            .await?;
        Ok(row.try_get(0)?)
    }
}

/// Store for [`GCConfigLink`] rows in `gc_blobs_configurations`.
///
/// Rows are written by triggers; this store only reads them.
#[derive(Debug, Clone, Copy, Default)]
pub struct GCConfigLinkStore;

impl GCConfigLinkStore {
    pub fn new() -> Self {
        GCConfigLinkStore
    }

    pub async fn find_all(&self, db: &impl GenericClient) -> Result<Vec<GCConfigLink>> {
        let rows = db
            .query(
                "SELECT id, top_level_namespace_id, repository_id, manifest_id, digest \
                 FROM gc_blobs_configurations ORDER BY id",
                &[],
            )
            .await?;
        rows.iter()
            .map(|row| {
                let digest: String = row.try_get("digest")?;
                Ok(GCConfigLink {
                    id: row.try_get("id")?,
                    namespace_id: row.try_get("top_level_namespace_id")?,
                    repository_id: row.try_get("repository_id")?,
                    manifest_id: row.try_get("manifest_id")?,
                    digest: digest.parse()?,
                })
            })
            .collect()
    }

    pub async fn count(&self, db: &impl GenericClient) -> Result<i64> {
        let row = db
            .query_one("SELECT COUNT(*) FROM gc_blobs_configurations", &[])
            .await?;
        Ok(row.try_get(0)?)
    }
}

/// Store for [`GCLayerLink`] rows in `gc_blobs_layers`.
///
/// Rows are written by triggers; this store only reads them.
#[derive(Debug, Clone, Copy, Default)]
pub struct GCLayerLinkStore;

impl GCLayerLinkStore {
    pub fn new() -> Self {
        GCLayerLinkStore
    }

    pub async fn find_all(&self, db: &impl GenericClient) -> Result<Vec<GCLayerLink>> {
        let rows = db
            .query(
                "SELECT id, top_level_namespace_id, repository_id, layer_id, digest \
                 FROM gc_blobs_layers ORDER BY id",
                &[],
            )
            .await?;
        rows.iter()
            .map(|row| {
                let digest: String = row.try_get("digest")?;
                Ok(GCLayerLink {
                    id: row.try_get("id")?,
                    namespace_id: row.try_get("top_level_namespace_id")?,
                    repository_id: row.try_get("repository_id")?,
                    layer_id: row.try_get("layer_id")?,
                    digest: digest.parse()?,
                })
            })
            .collect()
    }

    pub async fn count(&self, db: &impl GenericClient) -> Result<i64> {
        let row = db
            .query_one("SELECT COUNT(*) FROM gc_blobs_layers", &[])
            .await?;
        Ok(row.try_get(0)?)
    }
}

/// Store for [`GCReviewAfterDefault`] rows.
#[derive(Debug, Clone, Copy, Default)]
pub struct GCReviewAfterDefaultStore;

impl GCReviewAfterDefaultStore {
    pub fn new() -> Self {
        GCReviewAfterDefaultStore
    }

    pub async fn find_all(&self, db: &impl GenericClient) -> Result<Vec<GCReviewAfterDefault>> {
        let rows = db
            .query(
                "SELECT event, EXTRACT(EPOCH FROM value)::bigint AS value_seconds \
                 FROM gc_review_after_defaults ORDER BY event",
                &[],
            )
            .await?;
        rows.iter()
            .map(|row| {
                Ok(GCReviewAfterDefault {
                    event: row.try_get("event")?,
                    value_seconds: row.try_get("value_seconds")?,
                })
            })
            .collect()
    }

    /// Change the default delay for one event. Tests shrink delays through
    /// this to make queued tasks due immediately.
    pub async fn set(
        &self,
        db: &impl GenericClient,
        event: &str,
        value: chrono::Duration,
    ) -> Result<u64> {
        let secs = value.num_seconds() as f64;
        let n = db
            .execute(
                "UPDATE gc_review_after_defaults \
                 SET value = make_interval(secs => $2) WHERE event = $1",
                &[&event, &secs],
            )
            .await
            .map_err(Error::Postgres)?;
        Ok(n)
    }
}
