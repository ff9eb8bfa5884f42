//! Store for manifests, layer links, and manifest-list references.

use crate::stores::media;
use crate::{error, Error, Result};
use bytes::Bytes;
use stevedore::{Configuration, Digest, Layer, Manifest};
use tokio_postgres::{GenericClient, Row};

const COLUMNS: &str = "m.top_level_namespace_id, m.repository_id, m.id, m.schema_version, \
                       mt.media_type, m.digest, m.payload, m.non_conformant, \
                       m.non_distributable_layers, m.total_size, m.created_at, \
                       cmt.media_type AS configuration_media_type, \
                       m.configuration_blob_digest, m.configuration_payload";
const FROM: &str = "manifests m \
                    JOIN media_types mt ON mt.id = m.media_type_id \
                    LEFT JOIN media_types cmt ON cmt.id = m.configuration_media_type_id";

fn from_row(row: &Row) -> Result<Manifest> {
    let digest: String = row.try_get("digest")?;
    let configuration_digest: Option<String> = row.try_get("configuration_blob_digest")?;
    let configuration = match configuration_digest {
        Some(config_digest) => {
            let media_type: Option<String> = row.try_get("configuration_media_type")?;
            let payload: Option<Vec<u8>> = row.try_get("configuration_payload")?;
            Some(Configuration {
                media_type: media_type.unwrap_or_default(),
                digest: config_digest.parse()?,
                payload: payload.map(Bytes::from),
            })
        }
        None => None,
    };
    let payload: Vec<u8> = row.try_get("payload")?;
    Ok(Manifest {
        namespace_id: row.try_get("top_level_namespace_id")?,
        repository_id: row.try_get("repository_id")?,
        id: row.try_get("id")?,
        schema_version: row.try_get("schema_version")?,
        media_type: row.try_get("media_type")?,
        digest: digest.parse()?,
        payload: Bytes::from(payload),
        configuration,
        non_conformant: row.try_get("non_conformant")?,
        non_distributable_layers: row.try_get("non_distributable_layers")?,
        total_size: row.try_get("total_size")?,
        created_at: row.try_get("created_at")?,
    })
}

const LAYER_COLUMNS: &str = "l.top_level_namespace_id, l.repository_id, l.manifest_id, l.id, \
                             l.digest, l.size, mt.media_type, l.created_at";
const LAYER_FROM: &str = "layers l JOIN media_types mt ON mt.id = l.media_type_id";

fn layer_from_row(row: &Row) -> Result<Layer> {
    let digest: String = row.try_get("digest")?;
    Ok(Layer {
        namespace_id: row.try_get("top_level_namespace_id")?,
        repository_id: row.try_get("repository_id")?,
        manifest_id: row.try_get("manifest_id")?,
        id: row.try_get("id")?,
        digest: digest.parse()?,
        size: row.try_get("size")?,
        media_type: row.try_get("media_type")?,
        created_at: row.try_get("created_at")?,
    })
}

/// Input for [`ManifestStore::create`] and
/// [`ManifestStore::create_or_find`]. Surrogate id and timestamp come back
/// from the insert.
#[derive(Debug, Clone)]
pub struct NewManifest {
    pub namespace_id: i64,
    pub repository_id: i64,
    pub schema_version: i32,
    pub media_type: String,
    pub digest: Digest,
    pub payload: Bytes,
    pub configuration: Option<Configuration>,
    pub non_conformant: bool,
    pub non_distributable_layers: bool,
    pub total_size: i64,
}

/// Store for [`Manifest`] rows and their relations.
#[derive(Debug, Clone, Copy, Default)]
pub struct ManifestStore;

impl ManifestStore {
    pub fn new() -> Self {
        ManifestStore
    }

    pub async fn find_by_id(
        &self,
        db: &impl GenericClient,
        namespace_id: i64,
        repository_id: i64,
        id: i64,
    ) -> Result<Option<Manifest>> {
        let row = db
            .query_opt(
                &format!(
                    "SELECT {COLUMNS} FROM {FROM} \
                     WHERE m.top_level_namespace_id = $1 AND m.repository_id = $2 AND m.id = $3"
                ),
                &[&namespace_id, &repository_id, &id],
            )
            .await?;
        row.as_ref().map(from_row).transpose()
    }

    pub async fn find_by_digest(
        &self,
        db: &impl GenericClient,
        namespace_id: i64,
        repository_id: i64,
        digest: &Digest,
    ) -> Result<Option<Manifest>> {
        let row = db
            .query_opt(
                &format!(
                    "SELECT {COLUMNS} FROM {FROM} \
                     WHERE m.top_level_namespace_id = $1 AND m.repository_id = $2 AND m.digest = $3"
                ),
                &[&namespace_id, &repository_id, &digest.to_string()],
            )
            .await?;
        row.as_ref().map(from_row).transpose()
    }

    /// All manifests of one repository, in creation order.
    pub async fn find_all(
        &self,
        db: &impl GenericClient,
        namespace_id: i64,
        repository_id: i64,
    ) -> Result<Vec<Manifest>> {
        let rows = db
            .query(
                &format!(
                    "SELECT {COLUMNS} FROM {FROM} \
                     WHERE m.top_level_namespace_id = $1 AND m.repository_id = $2 \
                     ORDER BY m.id"
                ),
                &[&namespace_id, &repository_id],
            )
            .await?;
        rows.iter().map(from_row).collect()
    }

    pub async fn count(&self, db: &impl GenericClient) -> Result<i64> {
        let row = db.query_one("SELECT COUNT(*) FROM manifests", &[]).await?;
        Ok(row.try_get(0)?)
    }

    pub async fn create(&self, db: &impl GenericClient, new: &NewManifest) -> Result<Manifest> {
        let media_type_id = media::resolve(db, &new.media_type).await?;
        let configuration_media_type_id = media::resolve_opt(
            db,
            new.configuration.as_ref().map(|c| c.media_type.as_str()),
        )
        .await?;
        let configuration_digest = new.configuration.as_ref().map(|c| c.digest.to_string());
        let configuration_payload = new
            .configuration
            .as_ref()
            .and_then(|c| c.payload.as_ref())
            .map(|p| p.to_vec());

        let row = db
            .query_one(
                "INSERT INTO manifests (top_level_namespace_id, repository_id, schema_version, \
                     media_type_id, digest, payload, configuration_media_type_id, \
                     configuration_blob_digest, configuration_payload, non_conformant, \
                     non_distributable_layers, total_size) \
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12) \
                 RETURNING id, created_at",
                &[
                    &new.namespace_id,
                    &new.repository_id,
                    &new.schema_version,
                    &media_type_id,
                    &new.digest.to_string(),
                    &new.payload.to_vec(),
                    &configuration_media_type_id,
                    &configuration_digest,
                    &configuration_payload,
                    &new.non_conformant,
                    &new.non_distributable_layers,
                    &new.total_size,
                ],
            )
            .await
            .map_err(Error::from_insert)?;

        Ok(Manifest {
            namespace_id: new.namespace_id,
            repository_id: new.repository_id,
            id: row.try_get("id")?,
            schema_version: new.schema_version,
            media_type: new.media_type.clone(),
            digest: new.digest.clone(),
            payload: new.payload.clone(),
            configuration: new.configuration.clone(),
            non_conformant: new.non_conformant,
            non_distributable_layers: new.non_distributable_layers,
            total_size: new.total_size,
            created_at: row.try_get("created_at")?,
        })
    }

    /// Idempotent insert by (namespace, repository, digest).
    pub async fn create_or_find(
        &self,
        db: &impl GenericClient,
        new: &NewManifest,
    ) -> Result<Manifest> {
        if let Some(existing) = self
            .find_by_digest(db, new.namespace_id, new.repository_id, &new.digest)
            .await?
        {
            return Ok(existing);
        }
        match self.create(db, new).await {
            Ok(manifest) => Ok(manifest),
            Err(Error::UniqueViolation) => {
                match self
                    .find_by_digest(db, new.namespace_id, new.repository_id, &new.digest)
                    .await?
                {
                    Some(existing) => Ok(existing),
                    None => Err(Error::UniqueViolation),
                }
            }
            Err(e) => Err(e),
        }
    }

    /// Delete a manifest, returning its digest, or `Ok(None)` when absent.
    ///
    /// Tags, layers, config links, parent references, and the GC task row
    /// cascade away, firing their triggers. A manifest still referenced as a
    /// child of a manifest list cannot be deleted:
    /// [`Error::ManifestReferencedInList`].
    pub async fn delete(
        &self,
        db: &impl GenericClient,
        namespace_id: i64,
        repository_id: i64,
        id: i64,
    ) -> Result<Option<Digest>> {
        let row = db
            .query_opt(
                "DELETE FROM manifests \
                 WHERE top_level_namespace_id = $1 AND repository_id = $2 AND id = $3 \
                 RETURNING digest",
                &[&namespace_id, &repository_id, &id],
            )
            .await
            .map_err(|e| {
                if error::fk_violation_table(&e) == Some("manifest_references") {
                    Error::ManifestReferencedInList
                } else {
                    Error::Postgres(e)
                }
            })?;
        match row {
            Some(row) => {
                let digest: String = row.try_get("digest")?;
                Ok(Some(digest.parse()?))
            }
            None => Ok(None),
        }
    }

    /// Record a layer of the manifest. Idempotent on
    /// (namespace, repository, manifest, digest).
    pub async fn associate_layer_blob(
        &self,
        db: &impl GenericClient,
        manifest: &Manifest,
        digest: &Digest,
        size: i64,
        media_type: &str,
    ) -> Result<Layer> {
        let media_type_id = media::resolve(db, media_type).await?;
        let row = db
            .query_opt(
                "INSERT INTO layers (top_level_namespace_id, repository_id, manifest_id, \
                     digest, size, media_type_id) \
                 VALUES ($1, $2, $3, $4, $5, $6) \
                 ON CONFLICT (top_level_namespace_id, repository_id, manifest_id, digest) \
                     DO NOTHING \
                 RETURNING id, created_at",
                &[
                    &manifest.namespace_id,
                    &manifest.repository_id,
                    &manifest.id,
                    &digest.to_string(),
                    &size,
                    &media_type_id,
                ],
            )
            .await?;
        if let Some(row) = row {
            return Ok(Layer {
                namespace_id: manifest.namespace_id,
                repository_id: manifest.repository_id,
                manifest_id: manifest.id,
                id: row.try_get("id")?,
                digest: digest.clone(),
                size,
                media_type: media_type.to_string(),
                created_at: row.try_get("created_at")?,
            });
        }
        let row = db
            .query_one(
                &format!(
                    "SELECT {LAYER_COLUMNS} FROM {LAYER_FROM} \
                     WHERE l.top_level_namespace_id = $1 AND l.repository_id = $2 \
                         AND l.manifest_id = $3 AND l.digest = $4"
                ),
                &[
                    &manifest.namespace_id,
                    &manifest.repository_id,
                    &manifest.id,
                    &digest.to_string(),
                ],
            )
            .await?;
        layer_from_row(&row)
    }

    pub async fn dissociate_layer_blob(
        &self,
        db: &impl GenericClient,
        manifest: &Manifest,
        digest: &Digest,
    ) -> Result<bool> {
        let n = db
            .execute(
                "DELETE FROM layers \
                 WHERE top_level_namespace_id = $1 AND repository_id = $2 \
                     AND manifest_id = $3 AND digest = $4",
                &[
                    &manifest.namespace_id,
                    &manifest.repository_id,
                    &manifest.id,
                    &digest.to_string(),
                ],
            )
            .await?;
        Ok(n > 0)
    }

    /// Layers of a manifest, in insertion order.
    pub async fn layer_blobs(
        &self,
        db: &impl GenericClient,
        manifest: &Manifest,
    ) -> Result<Vec<Layer>> {
        let rows = db
            .query(
                &format!(
                    "SELECT {LAYER_COLUMNS} FROM {LAYER_FROM} \
                     WHERE l.top_level_namespace_id = $1 AND l.repository_id = $2 \
                         AND l.manifest_id = $3 \
                     ORDER BY l.id"
                ),
                &[
                    &manifest.namespace_id,
                    &manifest.repository_id,
                    &manifest.id,
                ],
            )
            .await?;
        rows.iter().map(layer_from_row).collect()
    }

    /// Record a parent (manifest list) → child edge.
    ///
    /// Self references are rejected; a missing child surfaces as
    /// [`Error::RefManifestNotFound`].
    pub async fn associate_manifest(
        &self,
        db: &impl GenericClient,
        namespace_id: i64,
        repository_id: i64,
        parent_id: i64,
        child_id: i64,
    ) -> Result<()> {
        if parent_id == child_id {
            return Err(Error::SelfReferencedManifest);
        }
        db.execute(
            "INSERT INTO manifest_references \
                 (top_level_namespace_id, repository_id, parent_id, child_id) \
             VALUES ($1, $2, $3, $4) \
             ON CONFLICT (top_level_namespace_id, repository_id, parent_id, child_id) \
                 DO NOTHING",
            &[&namespace_id, &repository_id, &parent_id, &child_id],
        )
        .await
        .map_err(|e| {
            let child_fk = e
                .as_db_error()
                .and_then(|db_err| db_err.constraint())
                .is_some_and(|c| c == "fk_manifest_references_child_id_manifests");
            if child_fk {
                Error::RefManifestNotFound
            } else {
                Error::Postgres(e)
            }
        })?;
        Ok(())
    }

    pub async fn dissociate_manifest(
        &self,
        db: &impl GenericClient,
        namespace_id: i64,
        repository_id: i64,
        parent_id: i64,
        child_id: i64,
    ) -> Result<bool> {
        let n = db
            .execute(
                "DELETE FROM manifest_references \
                 WHERE top_level_namespace_id = $1 AND repository_id = $2 \
                     AND parent_id = $3 AND child_id = $4",
                &[&namespace_id, &repository_id, &parent_id, &child_id],
            )
            .await?;
        Ok(n > 0)
    }

    /// Children of a manifest list, in reference order.
    pub async fn references(
        &self,
        db: &impl GenericClient,
        namespace_id: i64,
        repository_id: i64,
        parent_id: i64,
    ) -> Result<Vec<Manifest>> {
        let rows = db
            .query(
                &format!(
                    "SELECT {COLUMNS} FROM manifest_references mr \
                     JOIN manifests m ON m.top_level_namespace_id = mr.top_level_namespace_id \
                         AND m.repository_id = mr.repository_id AND m.id = mr.child_id \
                     JOIN media_types mt ON mt.id = m.media_type_id \
                     LEFT JOIN media_types cmt ON cmt.id = m.configuration_media_type_id \
                     WHERE mr.top_level_namespace_id = $1 AND mr.repository_id = $2 \
                         AND mr.parent_id = $3 \
                     ORDER BY mr.child_id"
                ),
                &[&namespace_id, &repository_id, &parent_id],
            )
            .await?;
        rows.iter().map(from_row).collect()
    }
}
