//! Store for repositories and the repository-scoped queries: blob links,
//! tag pagination, tree traversal, and the size aggregations.

use crate::stores::{blob, namespace::NamespaceStore, tag};
use crate::{error, Error, Result};
use stevedore::{Blob, Digest, MigrationStatus, Repository, RepositoryPath, Tag};
use stevedore_redis_cache::RepositoryCache;
use tokio_postgres::types::ToSql;
use tokio_postgres::{GenericClient, Row};

const COLUMNS: &str = "id, top_level_namespace_id, name, path, parent_id, migration_status, \
                       migration_error, created_at, updated_at, deleted_at";

fn from_row(row: &Row) -> Result<Repository> {
    let status: String = row.try_get("migration_status")?;
    Ok(Repository {
        id: row.try_get("id")?,
        namespace_id: row.try_get("top_level_namespace_id")?,
        name: row.try_get("name")?,
        path: row.try_get("path")?,
        parent_id: row.try_get("parent_id")?,
        migration_status: status.parse()?,
        migration_error: row.try_get("migration_error")?,
        // sizes live in the external cache, never on the row
        size: None,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
        deleted_at: row.try_get("deleted_at")?,
    })
}

fn leaf_name(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

/// Escape `_` and `%` in a partial-match filter and wrap it for LIKE.
pub(crate) fn sql_partial_match(s: &str) -> String {
    let escaped = s.replace('_', "\\_").replace('%', "\\%");
    format!("%{escaped}%")
}

/// Sort direction for tag pagination.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortOrder {
    #[default]
    Asc,
    Desc,
}

/// Cursor options for [`RepositoryStore::tags_paginated`].
///
/// Six modes: ascending/descending crossed with first-page, after-marker
/// (`last`), and before-marker (`before`). `before` wins when both markers
/// are set. `name` is a partial-match filter with LIKE metacharacters
/// escaped.
#[derive(Debug, Clone)]
pub struct TagPagination {
    pub limit: i64,
    pub sort: SortOrder,
    pub last: Option<String>,
    pub before: Option<String>,
    pub name: Option<String>,
}

impl Default for TagPagination {
    fn default() -> Self {
        TagPagination {
            limit: 100,
            sort: SortOrder::Asc,
            last: None,
            before: None,
            name: None,
        }
    }
}

/// Store for [`Repository`] rows.
///
/// Soft-deleted rows (`deleted_at IS NOT NULL`) are treated as absent by
/// every read; only [`RepositoryStore::create_or_find_by_path`] sees them,
/// to resurrect.
#[derive(Clone, Default)]
pub struct RepositoryStore {
    cache: Option<RepositoryCache>,
}

impl RepositoryStore {
    pub fn new() -> Self {
        RepositoryStore { cache: None }
    }

    /// A store that consults and maintains the external repository cache.
    pub fn with_cache(cache: RepositoryCache) -> Self {
        RepositoryStore { cache: Some(cache) }
    }

    pub async fn find_by_id(&self, db: &impl GenericClient, id: i64) -> Result<Option<Repository>> {
        let row = db
            .query_opt(
                &format!(
                    "SELECT {COLUMNS} FROM repositories WHERE id = $1 AND deleted_at IS NULL"
                ),
                &[&id],
            )
            .await?;
        row.as_ref().map(from_row).transpose()
    }

    /// Find by path, consulting the cache first. Hits are validated against
    /// the path; misses and cache failures fall through to the database.
    pub async fn find_by_path(
        &self,
        db: &impl GenericClient,
        path: &str,
    ) -> Result<Option<Repository>> {
        if let Some(cache) = &self.cache {
            if let Some(repo) = cache.get(path).await {
                return Ok(Some(repo));
            }
        }
        let repo = self.find_by_path_uncached(db, path).await?;
        if let (Some(cache), Some(repo)) = (&self.cache, &repo) {
            cache.set(repo).await;
        }
        Ok(repo)
    }

    async fn find_by_path_uncached(
        &self,
        db: &impl GenericClient,
        path: &str,
    ) -> Result<Option<Repository>> {
        let row = db
            .query_opt(
                &format!(
                    "SELECT {COLUMNS} FROM repositories WHERE path = $1 AND deleted_at IS NULL"
                ),
                &[&path],
            )
            .await?;
        row.as_ref().map(from_row).transpose()
    }

    pub async fn find_all(&self, db: &impl GenericClient) -> Result<Vec<Repository>> {
        let rows = db
            .query(
                &format!(
                    "SELECT {COLUMNS} FROM repositories WHERE deleted_at IS NULL ORDER BY path"
                ),
                &[],
            )
            .await?;
        rows.iter().map(from_row).collect()
    }

    pub async fn count(&self, db: &impl GenericClient) -> Result<i64> {
        let row = db
            .query_one(
                "SELECT COUNT(*) FROM repositories WHERE deleted_at IS NULL",
                &[],
            )
            .await?;
        Ok(row.try_get(0)?)
    }

    /// Insert a repository row. Conflicts on the path surface as
    /// [`Error::UniqueViolation`].
    pub async fn create(
        &self,
        db: &impl GenericClient,
        namespace_id: i64,
        name: &str,
        path: &str,
        parent_id: Option<i64>,
    ) -> Result<Repository> {
        let row = db
            .query_one(
                &format!(
                    "INSERT INTO repositories (top_level_namespace_id, name, path, parent_id) \
                     VALUES ($1, $2, $3, $4) RETURNING {COLUMNS}"
                ),
                &[&namespace_id, &name, &path, &parent_id],
            )
            .await
            .map_err(Error::from_insert)?;
        from_row(&row)
    }

    async fn create_or_find_segment(
        &self,
        db: &impl GenericClient,
        namespace_id: i64,
        name: &str,
        path: &str,
        parent_id: Option<i64>,
    ) -> Result<Repository> {
        // lookup first so conflicts do not burn sequence values; soft-deleted
        // rows are visible here and resurrected
        let row = db
            .query_opt(
                &format!("SELECT {COLUMNS} FROM repositories WHERE path = $1"),
                &[&path],
            )
            .await?;
        if let Some(row) = row {
            let repo = from_row(&row)?;
            if repo.deleted_at.is_none() {
                return Ok(repo);
            }
            let row = db
                .query_one(
                    &format!(
                        "UPDATE repositories SET deleted_at = NULL, updated_at = now() \
                         WHERE id = $1 RETURNING {COLUMNS}"
                    ),
                    &[&repo.id],
                )
                .await?;
            return from_row(&row);
        }
        let row = db
            .query_one(
                &format!(
                    "INSERT INTO repositories (top_level_namespace_id, name, path, parent_id) \
                     VALUES ($1, $2, $3, $4) \
                     ON CONFLICT (path) DO UPDATE SET deleted_at = NULL \
                     RETURNING {COLUMNS}"
                ),
                &[&namespace_id, &name, &path, &parent_id],
            )
            .await?;
        from_row(&row)
    }

    /// Find or create the repository at `path`, together with its namespace
    /// and every intermediate parent repository, linked through `parent_id`.
    pub async fn create_or_find_by_path(
        &self,
        db: &impl GenericClient,
        path: &RepositoryPath,
    ) -> Result<Repository> {
        let ns = NamespaceStore::new()
            .create_or_find(db, path.top_level())
            .await?;
        let mut segments = path.ancestors().chain([path.as_str()]);
        // a validated path always yields at least its own segment
        let first = segments.next().unwrap_or(path.as_str());
        let mut repo = self
            .create_or_find_segment(db, ns.id, leaf_name(first), first, None)
            .await?;
        for segment in segments {
            let parent_id = Some(repo.id);
            repo = self
                .create_or_find_segment(db, ns.id, leaf_name(segment), segment, parent_id)
                .await?;
        }
        Ok(repo)
    }

    /// Move a repository's migration lifecycle, recording the error message
    /// for failed states.
    pub async fn update_migration_status(
        &self,
        db: &impl GenericClient,
        repo: &Repository,
        status: MigrationStatus,
        migration_error: Option<&str>,
    ) -> Result<Repository> {
        let row = db
            .query_one(
                &format!(
                    "UPDATE repositories \
                     SET migration_status = $3, migration_error = $4, updated_at = now() \
                     WHERE top_level_namespace_id = $1 AND id = $2 RETURNING {COLUMNS}"
                ),
                &[&repo.namespace_id, &repo.id, &status.as_str(), &migration_error],
            )
            .await?;
        let updated = from_row(&row)?;
        if let Some(cache) = &self.cache {
            cache.set(&updated).await;
        }
        Ok(updated)
    }

    /// All repositories below `repo` in the parent tree.
    pub async fn descendants(
        &self,
        db: &impl GenericClient,
        repo: &Repository,
    ) -> Result<Vec<Repository>> {
        let rows = db
            .query(
                &format!(
                    "WITH RECURSIVE descendants AS ( \
                         SELECT {COLUMNS} FROM repositories \
                         WHERE top_level_namespace_id = $1 AND parent_id = $2 \
                         UNION ALL \
                         SELECT r.id, r.top_level_namespace_id, r.name, r.path, r.parent_id, \
                                r.migration_status, r.migration_error, r.created_at, \
                                r.updated_at, r.deleted_at \
                         FROM repositories r \
                         JOIN descendants d ON r.parent_id = d.id \
                     ) \
                     SELECT {COLUMNS} FROM descendants \
                     WHERE deleted_at IS NULL ORDER BY path"
                ),
                &[&repo.namespace_id, &repo.id],
            )
            .await?;
        rows.iter().map(from_row).collect()
    }

    /// All repositories above `repo` in the parent tree, outermost first.
    pub async fn ancestors(
        &self,
        db: &impl GenericClient,
        repo: &Repository,
    ) -> Result<Vec<Repository>> {
        let rows = db
            .query(
                &format!(
                    "WITH RECURSIVE ancestors AS ( \
                         SELECT {COLUMNS} FROM repositories \
                         WHERE top_level_namespace_id = $1 AND id = $2 \
                         UNION ALL \
                         SELECT r.id, r.top_level_namespace_id, r.name, r.path, r.parent_id, \
                                r.migration_status, r.migration_error, r.created_at, \
                                r.updated_at, r.deleted_at \
                         FROM repositories r \
                         JOIN ancestors a ON r.id = a.parent_id \
                     ) \
                     SELECT {COLUMNS} FROM ancestors \
                     WHERE id <> $2 AND deleted_at IS NULL ORDER BY path"
                ),
                &[&repo.namespace_id, &repo.id],
            )
            .await?;
        rows.iter().map(from_row).collect()
    }

    /// Repositories sharing `repo`'s parent, excluding `repo` itself.
    pub async fn siblings(
        &self,
        db: &impl GenericClient,
        repo: &Repository,
    ) -> Result<Vec<Repository>> {
        let rows = db
            .query(
                &format!(
                    "SELECT {COLUMNS} FROM repositories \
                     WHERE top_level_namespace_id = $1 \
                         AND parent_id IS NOT DISTINCT FROM $2 \
                         AND id <> $3 AND deleted_at IS NULL \
                     ORDER BY path"
                ),
                &[&repo.namespace_id, &repo.parent_id, &repo.id],
            )
            .await?;
        rows.iter().map(from_row).collect()
    }

    /// Up to `limit` non-empty repositories whose path sorts after
    /// `last_path`, in lexicographic path order. Repositories without a
    /// manifest are skipped.
    pub async fn find_all_paginated(
        &self,
        db: &impl GenericClient,
        limit: i64,
        last_path: &str,
    ) -> Result<Vec<Repository>> {
        let rows = db
            .query(
                &format!(
                    "SELECT {COLUMNS} FROM repositories r \
                     WHERE r.path > $1 AND r.deleted_at IS NULL \
                         AND EXISTS ( \
                             SELECT 1 FROM manifests m \
                             WHERE m.top_level_namespace_id = r.top_level_namespace_id \
                                 AND m.repository_id = r.id) \
                     ORDER BY r.path LIMIT $2"
                ),
                &[&last_path, &limit],
            )
            .await?;
        rows.iter().map(from_row).collect()
    }

    /// Count of non-empty repositories whose path sorts after `last_path`.
    pub async fn count_after_path(&self, db: &impl GenericClient, last_path: &str) -> Result<i64> {
        let row = db
            .query_one(
                "SELECT COUNT(*) FROM repositories r \
                 WHERE r.path > $1 AND r.deleted_at IS NULL \
                     AND EXISTS ( \
                         SELECT 1 FROM manifests m \
                         WHERE m.top_level_namespace_id = r.top_level_namespace_id \
                             AND m.repository_id = r.id)",
                &[&last_path],
            )
            .await?;
        Ok(row.try_get(0)?)
    }

    /// Paginated tags of a repository; see [`TagPagination`].
    pub async fn tags_paginated(
        &self,
        db: &impl GenericClient,
        repo: &Repository,
        p: &TagPagination,
    ) -> Result<Vec<Tag>> {
        let mut sql = format!(
            "SELECT {} FROM tags \
             WHERE top_level_namespace_id = $1 AND repository_id = $2",
            tag::COLUMNS
        );
        let mut params: Vec<&(dyn ToSql + Sync)> = vec![&repo.namespace_id, &repo.id];

        let pattern = p.name.as_deref().map(sql_partial_match);
        if let Some(pattern) = &pattern {
            params.push(pattern);
            sql.push_str(&format!(" AND name LIKE ${}", params.len()));
        }

        // before-marker pages select in inverted order and flip afterwards
        let mut inverted = false;
        match (&p.before, &p.last, p.sort) {
            (Some(before), _, SortOrder::Asc) => {
                params.push(before);
                sql.push_str(&format!(" AND name < ${} ORDER BY name DESC", params.len()));
                inverted = true;
            }
            (Some(before), _, SortOrder::Desc) => {
                params.push(before);
                sql.push_str(&format!(" AND name > ${} ORDER BY name ASC", params.len()));
                inverted = true;
            }
            (None, Some(last), SortOrder::Asc) => {
                params.push(last);
                sql.push_str(&format!(" AND name > ${} ORDER BY name ASC", params.len()));
            }
            (None, Some(last), SortOrder::Desc) => {
                params.push(last);
                sql.push_str(&format!(" AND name < ${} ORDER BY name DESC", params.len()));
            }
            (None, None, SortOrder::Asc) => sql.push_str(" ORDER BY name ASC"),
            (None, None, SortOrder::Desc) => sql.push_str(" ORDER BY name DESC"),
        }

        params.push(&p.limit);
        sql.push_str(&format!(" LIMIT ${}", params.len()));

        let rows = db.query(&sql, &params).await?;
        let mut tags = rows
            .iter()
            .map(tag::from_row)
            .collect::<Result<Vec<Tag>>>()?;
        if inverted {
            tags.reverse();
        }
        Ok(tags)
    }

    /// Count of a repository's tags, under the same partial-match filter as
    /// [`RepositoryStore::tags_paginated`].
    pub async fn tags_count(
        &self,
        db: &impl GenericClient,
        repo: &Repository,
        name: Option<&str>,
    ) -> Result<i64> {
        let pattern = name.map(sql_partial_match);
        let row = match &pattern {
            Some(pattern) => {
                db.query_one(
                    "SELECT COUNT(*) FROM tags \
                     WHERE top_level_namespace_id = $1 AND repository_id = $2 \
                         AND name LIKE $3",
                    &[&repo.namespace_id, &repo.id, pattern],
                )
                .await?
            }
            None => {
                db.query_one(
                    "SELECT COUNT(*) FROM tags \
                     WHERE top_level_namespace_id = $1 AND repository_id = $2",
                    &[&repo.namespace_id, &repo.id],
                )
                .await?
            }
        };
        Ok(row.try_get(0)?)
    }

    /// Link a blob into the repository. Idempotent.
    pub async fn link_blob(
        &self,
        db: &impl GenericClient,
        repo: &Repository,
        digest: &Digest,
    ) -> Result<()> {
        db.execute(
            "INSERT INTO repository_blobs (top_level_namespace_id, repository_id, blob_digest) \
             VALUES ($1, $2, $3) \
             ON CONFLICT (top_level_namespace_id, repository_id, blob_digest) DO NOTHING",
            &[&repo.namespace_id, &repo.id, &digest.to_string()],
        )
        .await?;
        Ok(())
    }

    pub async fn unlink_blob(
        &self,
        db: &impl GenericClient,
        repo: &Repository,
        digest: &Digest,
    ) -> Result<bool> {
        let n = db
            .execute(
                "DELETE FROM repository_blobs \
                 WHERE top_level_namespace_id = $1 AND repository_id = $2 AND blob_digest = $3",
                &[&repo.namespace_id, &repo.id, &digest.to_string()],
            )
            .await?;
        Ok(n > 0)
    }

    /// The blob row, if it is linked into the repository.
    pub async fn find_blob(
        &self,
        db: &impl GenericClient,
        repo: &Repository,
        digest: &Digest,
    ) -> Result<Option<Blob>> {
        let row = db
            .query_opt(
                "SELECT b.digest, mt.media_type, b.size, b.created_at \
                 FROM repository_blobs rb \
                 JOIN blobs b ON b.digest = rb.blob_digest \
                 JOIN media_types mt ON mt.id = b.media_type_id \
                 WHERE rb.top_level_namespace_id = $1 AND rb.repository_id = $2 \
                     AND rb.blob_digest = $3",
                &[&repo.namespace_id, &repo.id, &digest.to_string()],
            )
            .await?;
        row.as_ref().map(blob::from_row).transpose()
    }

    /// Deduplicated bytes of the unique layers referenced by the
    /// repository's tagged manifests, directly or through manifest lists.
    ///
    /// The result is stored on the cached repository row when a cache is
    /// configured.
    pub async fn size(&self, db: &impl GenericClient, repo: &Repository) -> Result<i64> {
        let row = db
            .query_one(
                "SELECT COALESCE(SUM(q.size), 0)::bigint AS size \
                 FROM ( \
                     SELECT DISTINCT l.digest, l.size \
                     FROM layers l \
                     WHERE l.top_level_namespace_id = $1 AND l.repository_id = $2 \
                         AND l.manifest_id IN ( \
                             SELECT manifest_id FROM tags \
                             WHERE top_level_namespace_id = $1 AND repository_id = $2 \
                             UNION \
                             SELECT mr.child_id FROM manifest_references mr \
                             JOIN tags t ON t.top_level_namespace_id = mr.top_level_namespace_id \
                                 AND t.repository_id = mr.repository_id \
                                 AND t.manifest_id = mr.parent_id \
                             WHERE mr.top_level_namespace_id = $1 AND mr.repository_id = $2) \
                 ) q",
                &[&repo.namespace_id, &repo.id],
            )
            .await?;
        let size: i64 = row.try_get("size")?;
        if let Some(cache) = &self.cache {
            let mut cached = repo.clone();
            cached.size = Some(size);
            cache.set(&cached).await;
        }
        Ok(size)
    }

    /// Like [`RepositoryStore::size`], over `repo` and every repository
    /// whose path is `repo.path` or starts with `repo.path/`.
    ///
    /// When the query times out at the database, a 24-hour marker is written
    /// to the cache and subsequent calls short-circuit with
    /// [`Error::SizeHasTimedOut`] until it lapses.
    pub async fn size_with_descendants(
        &self,
        db: &impl GenericClient,
        repo: &Repository,
    ) -> Result<i64> {
        if let Some(cache) = &self.cache {
            if cache.size_timed_out(&repo.path).await {
                return Err(Error::SizeHasTimedOut);
            }
        }
        let result = if repo.is_top_level() {
            self.size_with_descendants_top_level(db, repo).await
        } else {
            self.size_with_descendants_nested(db, repo).await
        };
        match result {
            Ok(size) => Ok(size),
            Err(e) => {
                if error::is_statement_canceled(&e) {
                    if let Some(cache) = &self.cache {
                        cache.set_size_timed_out(&repo.path).await;
                    }
                }
                Err(Error::Postgres(e))
            }
        }
    }

    // Top-level plan: the repository set is the whole namespace, so no
    // intermediate repository materialization is needed.
    async fn size_with_descendants_top_level(
        &self,
        db: &impl GenericClient,
        repo: &Repository,
    ) -> std::result::Result<i64, tokio_postgres::Error> {
        let row = db
            .query_one(
                "SELECT COALESCE(SUM(q.size), 0)::bigint AS size \
                 FROM ( \
                     SELECT DISTINCT l.digest, l.size \
                     FROM layers l \
                     JOIN ( \
                         SELECT repository_id, manifest_id FROM tags \
                         WHERE top_level_namespace_id = $1 \
                         UNION \
                         SELECT mr.repository_id, mr.child_id FROM manifest_references mr \
                         JOIN tags t ON t.top_level_namespace_id = mr.top_level_namespace_id \
                             AND t.repository_id = mr.repository_id \
                             AND t.manifest_id = mr.parent_id \
                         WHERE mr.top_level_namespace_id = $1 \
                     ) tagged ON tagged.repository_id = l.repository_id \
                         AND tagged.manifest_id = l.manifest_id \
                     WHERE l.top_level_namespace_id = $1 \
                 ) q",
                &[&repo.namespace_id],
            )
            .await?;
        row.try_get("size")
    }

    async fn size_with_descendants_nested(
        &self,
        db: &impl GenericClient,
        repo: &Repository,
    ) -> std::result::Result<i64, tokio_postgres::Error> {
        let row = db
            .query_one(
                "WITH repos AS ( \
                     SELECT id FROM repositories \
                     WHERE top_level_namespace_id = $1 \
                         AND (path = $2 OR path LIKE $2 || '/%') \
                         AND deleted_at IS NULL \
                 ) \
                 SELECT COALESCE(SUM(q.size), 0)::bigint AS size \
                 FROM ( \
                     SELECT DISTINCT l.digest, l.size \
                     FROM layers l \
                     JOIN ( \
                         SELECT repository_id, manifest_id FROM tags \
                         WHERE top_level_namespace_id = $1 \
                             AND repository_id IN (SELECT id FROM repos) \
                         UNION \
                         SELECT mr.repository_id, mr.child_id FROM manifest_references mr \
                         JOIN tags t ON t.top_level_namespace_id = mr.top_level_namespace_id \
                             AND t.repository_id = mr.repository_id \
                             AND t.manifest_id = mr.parent_id \
                         WHERE mr.top_level_namespace_id = $1 \
                             AND mr.repository_id IN (SELECT id FROM repos) \
                     ) tagged ON tagged.repository_id = l.repository_id \
                         AND tagged.manifest_id = l.manifest_id \
                     WHERE l.top_level_namespace_id = $1 \
                         AND l.repository_id IN (SELECT id FROM repos) \
                 ) q",
                &[&repo.namespace_id, &repo.path],
            )
            .await?;
        row.try_get("size")
    }

    /// Upper-bound estimate: the deduplicated bytes of every layer in the
    /// namespace, tagged or not. Defined for top-level repositories only.
    pub async fn estimated_size_with_descendants(
        &self,
        db: &impl GenericClient,
        repo: &Repository,
    ) -> Result<i64> {
        if !repo.is_top_level() {
            return Err(Error::OnlyRootEstimates);
        }
        let row = db
            .query_one(
                "SELECT COALESCE(SUM(q.size), 0)::bigint AS size \
                 FROM ( \
                     SELECT DISTINCT digest, size FROM layers \
                     WHERE top_level_namespace_id = $1 \
                 ) q",
                &[&repo.namespace_id],
            )
            .await?;
        Ok(row.try_get("size")?)
    }

    /// Rewrite the repository's path and name. The caller pairs this with
    /// [`RepositoryStore::rename_path_for_sub_repositories`] to move a whole
    /// subtree.
    pub async fn rename(
        &self,
        db: &impl GenericClient,
        repo: &Repository,
        new_path: &str,
        new_name: &str,
    ) -> Result<Repository> {
        let row = db
            .query_one(
                &format!(
                    "UPDATE repositories SET name = $3, path = $4, updated_at = now() \
                     WHERE top_level_namespace_id = $1 AND id = $2 RETURNING {COLUMNS}"
                ),
                &[&repo.namespace_id, &repo.id, &new_name, &new_path],
            )
            .await
            .map_err(Error::from_insert)?;
        if let Some(cache) = &self.cache {
            cache.delete(&repo.path).await;
        }
        from_row(&row)
    }

    /// Rewrite the path prefix of every repository under `old_path`,
    /// returning how many rows changed.
    pub async fn rename_path_for_sub_repositories(
        &self,
        db: &impl GenericClient,
        namespace_id: i64,
        old_path: &str,
        new_path: &str,
    ) -> Result<u64> {
        let n = db
            .execute(
                "UPDATE repositories \
                 SET path = $3 || substring(path FROM char_length($2) + 1), \
                     updated_at = now() \
                 WHERE top_level_namespace_id = $1 AND path LIKE $2 || '/%'",
                &[&namespace_id, &old_path, &new_path],
            )
            .await?;
        Ok(n)
    }
}
