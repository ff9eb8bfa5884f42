//! Relational schema, GC trigger contracts, and dictionary seeds.
//!
//! The online garbage collector is driven from inside the database: every
//! mutation that can change the reachability of a blob or a manifest fires a
//! trigger that upserts a row into the matching review queue with a delayed
//! `review_after`. The upsert keeps the existing `review_count`, replaces the
//! event label with the newest one, and never pulls `review_after` earlier
//! (`GREATEST` of the existing and the new value).
//!
//! Delays are `gc_review_after_defaults.value` for the event (24 hours unless
//! reconfigured) plus uniform jitter in `[5s, 60s]`, both computed in SQL so
//! that every write site gets identical semantics under contention.

use crate::{Error, Result};
use tokio_postgres::GenericClient;

/// Tables and indexes. Every child table leads with
/// `top_level_namespace_id`: it is the physical shard key, and every store
/// query filters on it.
const TABLES: &str = r#"
CREATE TABLE IF NOT EXISTS namespaces (
    id BIGINT GENERATED BY DEFAULT AS IDENTITY,
    name TEXT NOT NULL,
    created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
    updated_at TIMESTAMPTZ,
    CONSTRAINT pk_namespaces PRIMARY KEY (id),
    CONSTRAINT unique_namespaces_name UNIQUE (name)
);

CREATE TABLE IF NOT EXISTS repositories (
    id BIGINT GENERATED BY DEFAULT AS IDENTITY,
    top_level_namespace_id BIGINT NOT NULL,
    name TEXT NOT NULL,
    path TEXT NOT NULL,
    parent_id BIGINT,
    created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
    updated_at TIMESTAMPTZ,
    deleted_at TIMESTAMPTZ,
    migration_status TEXT NOT NULL DEFAULT 'native',
    migration_error TEXT,
    CONSTRAINT pk_repositories PRIMARY KEY (id),
    CONSTRAINT unique_repositories_path UNIQUE (path),
    CONSTRAINT fk_repositories_tlns_id_namespaces
        FOREIGN KEY (top_level_namespace_id) REFERENCES namespaces (id) ON DELETE CASCADE,
    CONSTRAINT fk_repositories_parent_id_repositories
        FOREIGN KEY (parent_id) REFERENCES repositories (id) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS index_repositories_on_tlns_id
    ON repositories (top_level_namespace_id);
CREATE INDEX IF NOT EXISTS index_repositories_on_parent_id
    ON repositories (parent_id);

CREATE TABLE IF NOT EXISTS media_types (
    id INT GENERATED BY DEFAULT AS IDENTITY,
    media_type TEXT NOT NULL,
    CONSTRAINT pk_media_types PRIMARY KEY (id),
    CONSTRAINT unique_media_types_type UNIQUE (media_type)
);

CREATE TABLE IF NOT EXISTS blobs (
    digest TEXT NOT NULL,
    media_type_id INT NOT NULL,
    size BIGINT NOT NULL,
    created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
    CONSTRAINT pk_blobs PRIMARY KEY (digest),
    CONSTRAINT fk_blobs_media_type_id_media_types
        FOREIGN KEY (media_type_id) REFERENCES media_types (id)
);

CREATE TABLE IF NOT EXISTS repository_blobs (
    top_level_namespace_id BIGINT NOT NULL,
    repository_id BIGINT NOT NULL,
    blob_digest TEXT NOT NULL,
    CONSTRAINT pk_repository_blobs
        PRIMARY KEY (top_level_namespace_id, repository_id, blob_digest),
    CONSTRAINT fk_repository_blobs_repository_id_repositories
        FOREIGN KEY (repository_id) REFERENCES repositories (id) ON DELETE CASCADE,
    CONSTRAINT fk_repository_blobs_blob_digest_blobs
        FOREIGN KEY (blob_digest) REFERENCES blobs (digest) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS index_repository_blobs_on_blob_digest
    ON repository_blobs (blob_digest);

CREATE TABLE IF NOT EXISTS manifests (
    top_level_namespace_id BIGINT NOT NULL,
    repository_id BIGINT NOT NULL,
    id BIGINT GENERATED BY DEFAULT AS IDENTITY,
    total_size BIGINT NOT NULL,
    schema_version INT NOT NULL,
    media_type_id INT NOT NULL,
    digest TEXT NOT NULL,
    payload BYTEA NOT NULL,
    configuration_media_type_id INT,
    configuration_blob_digest TEXT,
    configuration_payload BYTEA,
    non_conformant BOOLEAN NOT NULL DEFAULT false,
    non_distributable_layers BOOLEAN NOT NULL DEFAULT false,
    created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
    CONSTRAINT pk_manifests PRIMARY KEY (top_level_namespace_id, repository_id, id),
    CONSTRAINT unique_manifests_digest
        UNIQUE (top_level_namespace_id, repository_id, digest),
    CONSTRAINT fk_manifests_repository_id_repositories
        FOREIGN KEY (repository_id) REFERENCES repositories (id) ON DELETE CASCADE,
    CONSTRAINT fk_manifests_media_type_id_media_types
        FOREIGN KEY (media_type_id) REFERENCES media_types (id),
    CONSTRAINT fk_manifests_conf_media_type_id_media_types
        FOREIGN KEY (configuration_media_type_id) REFERENCES media_types (id),
    CONSTRAINT fk_manifests_conf_blob_digest_blobs
        FOREIGN KEY (configuration_blob_digest) REFERENCES blobs (digest)
);

CREATE TABLE IF NOT EXISTS manifest_references (
    top_level_namespace_id BIGINT NOT NULL,
    repository_id BIGINT NOT NULL,
    parent_id BIGINT NOT NULL,
    child_id BIGINT NOT NULL,
    CONSTRAINT pk_manifest_references
        PRIMARY KEY (top_level_namespace_id, repository_id, parent_id, child_id),
    CONSTRAINT fk_manifest_references_parent_id_manifests
        FOREIGN KEY (top_level_namespace_id, repository_id, parent_id)
        REFERENCES manifests (top_level_namespace_id, repository_id, id) ON DELETE CASCADE,
    CONSTRAINT fk_manifest_references_child_id_manifests
        FOREIGN KEY (top_level_namespace_id, repository_id, child_id)
        REFERENCES manifests (top_level_namespace_id, repository_id, id),
    CONSTRAINT check_manifest_references_parent_child_ids CHECK (parent_id <> child_id)
);

CREATE INDEX IF NOT EXISTS index_manifest_references_on_child_id
    ON manifest_references (top_level_namespace_id, repository_id, child_id);

CREATE TABLE IF NOT EXISTS layers (
    top_level_namespace_id BIGINT NOT NULL,
    repository_id BIGINT NOT NULL,
    manifest_id BIGINT NOT NULL,
    id BIGINT GENERATED BY DEFAULT AS IDENTITY,
    digest TEXT NOT NULL,
    size BIGINT NOT NULL,
    media_type_id INT NOT NULL,
    created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
    CONSTRAINT pk_layers PRIMARY KEY (top_level_namespace_id, repository_id, id),
    CONSTRAINT unique_layers_manifest_id_digest
        UNIQUE (top_level_namespace_id, repository_id, manifest_id, digest),
    CONSTRAINT fk_layers_manifest_id_manifests
        FOREIGN KEY (top_level_namespace_id, repository_id, manifest_id)
        REFERENCES manifests (top_level_namespace_id, repository_id, id) ON DELETE CASCADE,
    CONSTRAINT fk_layers_digest_blobs FOREIGN KEY (digest) REFERENCES blobs (digest),
    CONSTRAINT fk_layers_media_type_id_media_types
        FOREIGN KEY (media_type_id) REFERENCES media_types (id)
);

CREATE INDEX IF NOT EXISTS index_layers_on_digest ON layers (digest);

CREATE TABLE IF NOT EXISTS tags (
    top_level_namespace_id BIGINT NOT NULL,
    repository_id BIGINT NOT NULL,
    id BIGINT GENERATED BY DEFAULT AS IDENTITY,
    name TEXT NOT NULL,
    manifest_id BIGINT NOT NULL,
    created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
    updated_at TIMESTAMPTZ,
    CONSTRAINT pk_tags PRIMARY KEY (top_level_namespace_id, repository_id, id),
    CONSTRAINT unique_tags_name UNIQUE (top_level_namespace_id, repository_id, name),
    CONSTRAINT fk_tags_manifest_id_manifests
        FOREIGN KEY (top_level_namespace_id, repository_id, manifest_id)
        REFERENCES manifests (top_level_namespace_id, repository_id, id) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS index_tags_on_manifest_id
    ON tags (top_level_namespace_id, repository_id, manifest_id);

CREATE TABLE IF NOT EXISTS gc_blob_review_queue (
    digest TEXT NOT NULL,
    review_after TIMESTAMPTZ NOT NULL DEFAULT now() + interval '1 day',
    review_count INT NOT NULL DEFAULT 0,
    event TEXT NOT NULL,
    created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
    CONSTRAINT pk_gc_blob_review_queue PRIMARY KEY (digest)
);

CREATE INDEX IF NOT EXISTS index_gc_blob_review_queue_on_review_after
    ON gc_blob_review_queue (review_after);

CREATE TABLE IF NOT EXISTS gc_manifest_review_queue (
    top_level_namespace_id BIGINT NOT NULL,
    repository_id BIGINT NOT NULL,
    manifest_id BIGINT NOT NULL,
    review_after TIMESTAMPTZ NOT NULL DEFAULT now() + interval '1 day',
    review_count INT NOT NULL DEFAULT 0,
    event TEXT NOT NULL,
    created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
    CONSTRAINT pk_gc_manifest_review_queue
        PRIMARY KEY (top_level_namespace_id, repository_id, manifest_id),
    CONSTRAINT fk_gc_manifest_review_queue_manifest_id_manifests
        FOREIGN KEY (top_level_namespace_id, repository_id, manifest_id)
        REFERENCES manifests (top_level_namespace_id, repository_id, id) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS index_gc_manifest_review_queue_on_review_after
    ON gc_manifest_review_queue (review_after);

CREATE TABLE IF NOT EXISTS gc_blobs_configurations (
    id BIGINT GENERATED BY DEFAULT AS IDENTITY,
    top_level_namespace_id BIGINT NOT NULL,
    repository_id BIGINT NOT NULL,
    manifest_id BIGINT NOT NULL,
    digest TEXT NOT NULL,
    CONSTRAINT pk_gc_blobs_configurations PRIMARY KEY (id),
    CONSTRAINT unique_gc_blobs_configurations
        UNIQUE (top_level_namespace_id, repository_id, manifest_id, digest),
    CONSTRAINT fk_gc_blobs_configurations_manifest_id_manifests
        FOREIGN KEY (top_level_namespace_id, repository_id, manifest_id)
        REFERENCES manifests (top_level_namespace_id, repository_id, id) ON DELETE CASCADE,
    CONSTRAINT fk_gc_blobs_configurations_digest_blobs
        FOREIGN KEY (digest) REFERENCES blobs (digest) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS index_gc_blobs_configurations_on_digest
    ON gc_blobs_configurations (digest);

CREATE TABLE IF NOT EXISTS gc_blobs_layers (
    id BIGINT GENERATED BY DEFAULT AS IDENTITY,
    top_level_namespace_id BIGINT NOT NULL,
    repository_id BIGINT NOT NULL,
    layer_id BIGINT NOT NULL,
    digest TEXT NOT NULL,
    CONSTRAINT pk_gc_blobs_layers PRIMARY KEY (id),
    CONSTRAINT unique_gc_blobs_layers
        UNIQUE (top_level_namespace_id, repository_id, layer_id, digest),
    CONSTRAINT fk_gc_blobs_layers_layer_id_layers
        FOREIGN KEY (top_level_namespace_id, repository_id, layer_id)
        REFERENCES layers (top_level_namespace_id, repository_id, id) ON DELETE CASCADE,
    CONSTRAINT fk_gc_blobs_layers_digest_blobs
        FOREIGN KEY (digest) REFERENCES blobs (digest) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS index_gc_blobs_layers_on_digest
    ON gc_blobs_layers (digest);

CREATE TABLE IF NOT EXISTS gc_review_after_defaults (
    event TEXT NOT NULL,
    value INTERVAL NOT NULL,
    CONSTRAINT pk_gc_review_after_defaults PRIMARY KEY (event)
);
"#;

/// Trigger functions. `gc_review_after` is the single source of the
/// delay-plus-jitter arithmetic.
const FUNCTIONS: &str = r#"
CREATE OR REPLACE FUNCTION gc_review_after (e text)
    RETURNS timestamp with time zone
    AS $$
BEGIN
    RETURN now()
        + COALESCE((SELECT value FROM gc_review_after_defaults WHERE event = e), interval '1 day')
        + make_interval(secs => 5 + random() * 55);
END;
$$
LANGUAGE plpgsql;

CREATE OR REPLACE FUNCTION gc_track_blob_uploads ()
    RETURNS TRIGGER
    AS $$
BEGIN
    INSERT INTO gc_blob_review_queue (digest, review_after, event)
        VALUES (NEW.digest, gc_review_after('blob_upload'), 'blob_upload')
    ON CONFLICT (digest)
        DO UPDATE SET
            review_after = GREATEST(gc_blob_review_queue.review_after, EXCLUDED.review_after),
            event = EXCLUDED.event;
    RETURN NULL;
END;
$$
LANGUAGE plpgsql;

CREATE OR REPLACE FUNCTION gc_track_configuration_blobs ()
    RETURNS TRIGGER
    AS $$
BEGIN
    INSERT INTO gc_blobs_configurations (top_level_namespace_id, repository_id, manifest_id, digest)
        VALUES (NEW.top_level_namespace_id, NEW.repository_id, NEW.id, NEW.configuration_blob_digest)
    ON CONFLICT (top_level_namespace_id, repository_id, manifest_id, digest)
        DO NOTHING;
    RETURN NULL;
END;
$$
LANGUAGE plpgsql;

CREATE OR REPLACE FUNCTION gc_track_layer_blobs ()
    RETURNS TRIGGER
    AS $$
BEGIN
    INSERT INTO gc_blobs_layers (top_level_namespace_id, repository_id, layer_id, digest)
        VALUES (NEW.top_level_namespace_id, NEW.repository_id, NEW.id, NEW.digest)
    ON CONFLICT (top_level_namespace_id, repository_id, layer_id, digest)
        DO NOTHING;
    RETURN NULL;
END;
$$
LANGUAGE plpgsql;

CREATE OR REPLACE FUNCTION gc_track_manifest_uploads ()
    RETURNS TRIGGER
    AS $$
BEGIN
    INSERT INTO gc_manifest_review_queue (top_level_namespace_id, repository_id, manifest_id, review_after, event)
        VALUES (NEW.top_level_namespace_id, NEW.repository_id, NEW.id, gc_review_after('manifest_upload'), 'manifest_upload')
    ON CONFLICT (top_level_namespace_id, repository_id, manifest_id)
        DO UPDATE SET
            review_after = GREATEST(gc_manifest_review_queue.review_after, EXCLUDED.review_after),
            event = EXCLUDED.event;
    RETURN NULL;
END;
$$
LANGUAGE plpgsql;

CREATE OR REPLACE FUNCTION gc_track_deleted_manifests ()
    RETURNS TRIGGER
    AS $$
BEGIN
    INSERT INTO gc_blob_review_queue (digest, review_after, event)
        VALUES (OLD.configuration_blob_digest, gc_review_after('manifest_delete'), 'manifest_delete')
    ON CONFLICT (digest)
        DO UPDATE SET
            review_after = GREATEST(gc_blob_review_queue.review_after, EXCLUDED.review_after),
            event = EXCLUDED.event;
    RETURN NULL;
END;
$$
LANGUAGE plpgsql;

CREATE OR REPLACE FUNCTION gc_track_deleted_layers ()
    RETURNS TRIGGER
    AS $$
BEGIN
    INSERT INTO gc_blob_review_queue (digest, review_after, event)
        VALUES (OLD.digest, gc_review_after('layer_delete'), 'layer_delete')
    ON CONFLICT (digest)
        DO UPDATE SET
            review_after = GREATEST(gc_blob_review_queue.review_after, EXCLUDED.review_after),
            event = EXCLUDED.event;
    RETURN NULL;
END;
$$
LANGUAGE plpgsql;

CREATE OR REPLACE FUNCTION gc_track_deleted_manifest_lists ()
    RETURNS TRIGGER
    AS $$
BEGIN
    INSERT INTO gc_manifest_review_queue (top_level_namespace_id, repository_id, manifest_id, review_after, event)
        VALUES (OLD.top_level_namespace_id, OLD.repository_id, OLD.child_id, gc_review_after('manifest_list_delete'), 'manifest_list_delete')
    ON CONFLICT (top_level_namespace_id, repository_id, manifest_id)
        DO UPDATE SET
            review_after = GREATEST(gc_manifest_review_queue.review_after, EXCLUDED.review_after),
            event = EXCLUDED.event;
    RETURN NULL;
END;
$$
LANGUAGE plpgsql;

CREATE OR REPLACE FUNCTION gc_track_switched_tags ()
    RETURNS TRIGGER
    AS $$
BEGIN
    INSERT INTO gc_manifest_review_queue (top_level_namespace_id, repository_id, manifest_id, review_after, event)
        VALUES (OLD.top_level_namespace_id, OLD.repository_id, OLD.manifest_id, gc_review_after('tag_switch'), 'tag_switch')
    ON CONFLICT (top_level_namespace_id, repository_id, manifest_id)
        DO UPDATE SET
            review_after = GREATEST(gc_manifest_review_queue.review_after, EXCLUDED.review_after),
            event = EXCLUDED.event;
    RETURN NULL;
END;
$$
LANGUAGE plpgsql;

CREATE OR REPLACE FUNCTION gc_track_deleted_tags ()
    RETURNS TRIGGER
    AS $$
BEGIN
    -- no enqueue when the tag fell to a cascade from the manifest delete
    IF EXISTS (
        SELECT 1
        FROM manifests
        WHERE top_level_namespace_id = OLD.top_level_namespace_id
            AND repository_id = OLD.repository_id
            AND id = OLD.manifest_id) THEN
        INSERT INTO gc_manifest_review_queue (top_level_namespace_id, repository_id, manifest_id, review_after, event)
            VALUES (OLD.top_level_namespace_id, OLD.repository_id, OLD.manifest_id, gc_review_after('tag_delete'), 'tag_delete')
        ON CONFLICT (top_level_namespace_id, repository_id, manifest_id)
            DO UPDATE SET
                review_after = GREATEST(gc_manifest_review_queue.review_after, EXCLUDED.review_after),
                event = EXCLUDED.event;
    END IF;
    RETURN NULL;
END;
$$
LANGUAGE plpgsql;
"#;

const TRIGGERS: &str = r#"
DROP TRIGGER IF EXISTS gc_track_blob_uploads ON blobs;
CREATE TRIGGER gc_track_blob_uploads
    AFTER INSERT ON blobs
    FOR EACH ROW
    EXECUTE FUNCTION gc_track_blob_uploads ();

DROP TRIGGER IF EXISTS gc_track_configuration_blobs ON manifests;
CREATE TRIGGER gc_track_configuration_blobs
    AFTER INSERT ON manifests
    FOR EACH ROW
    WHEN (NEW.configuration_blob_digest IS NOT NULL)
    EXECUTE FUNCTION gc_track_configuration_blobs ();

DROP TRIGGER IF EXISTS gc_track_layer_blobs ON layers;
CREATE TRIGGER gc_track_layer_blobs
    AFTER INSERT ON layers
    FOR EACH ROW
    EXECUTE FUNCTION gc_track_layer_blobs ();

DROP TRIGGER IF EXISTS gc_track_manifest_uploads ON manifests;
CREATE TRIGGER gc_track_manifest_uploads
    AFTER INSERT ON manifests
    FOR EACH ROW
    EXECUTE FUNCTION gc_track_manifest_uploads ();

DROP TRIGGER IF EXISTS gc_track_deleted_manifests ON manifests;
CREATE TRIGGER gc_track_deleted_manifests
    AFTER DELETE ON manifests
    FOR EACH ROW
    WHEN (OLD.configuration_blob_digest IS NOT NULL)
    EXECUTE FUNCTION gc_track_deleted_manifests ();

DROP TRIGGER IF EXISTS gc_track_deleted_layers ON layers;
CREATE TRIGGER gc_track_deleted_layers
    AFTER DELETE ON layers
    FOR EACH ROW
    EXECUTE FUNCTION gc_track_deleted_layers ();

DROP TRIGGER IF EXISTS gc_track_deleted_manifest_lists ON manifest_references;
CREATE TRIGGER gc_track_deleted_manifest_lists
    AFTER DELETE ON manifest_references
    FOR EACH ROW
    EXECUTE FUNCTION gc_track_deleted_manifest_lists ();

DROP TRIGGER IF EXISTS gc_track_switched_tags ON tags;
CREATE TRIGGER gc_track_switched_tags
    AFTER UPDATE ON tags
    FOR EACH ROW
    WHEN (OLD.manifest_id <> NEW.manifest_id)
    EXECUTE FUNCTION gc_track_switched_tags ();

DROP TRIGGER IF EXISTS gc_track_deleted_tags ON tags;
CREATE TRIGGER gc_track_deleted_tags
    AFTER DELETE ON tags
    FOR EACH ROW
    EXECUTE FUNCTION gc_track_deleted_tags ();
"#;

/// Review delay defaults and the media-type dictionary.
const SEED: &str = r#"
INSERT INTO gc_review_after_defaults (event, value)
    VALUES
        ('blob_upload', interval '1 day'),
        ('manifest_upload', interval '1 day'),
        ('manifest_delete', interval '1 day'),
        ('layer_delete', interval '1 day'),
        ('manifest_list_delete', interval '1 day'),
        ('tag_switch', interval '1 day'),
        ('tag_delete', interval '1 day')
ON CONFLICT (event)
    DO NOTHING;

INSERT INTO media_types (media_type)
    VALUES
        ('application/vnd.docker.distribution.manifest.v1+json'),
        ('application/vnd.docker.distribution.manifest.v1+prettyjws'),
        ('application/vnd.docker.distribution.manifest.v2+json'),
        ('application/vnd.docker.distribution.manifest.list.v2+json'),
        ('application/vnd.docker.container.image.v1+json'),
        ('application/vnd.docker.image.rootfs.diff.tar.gzip'),
        ('application/vnd.docker.image.rootfs.foreign.diff.tar.gzip'),
        ('application/vnd.oci.image.manifest.v1+json'),
        ('application/vnd.oci.image.index.v1+json'),
        ('application/vnd.oci.image.config.v1+json'),
        ('application/vnd.oci.image.layer.v1.tar'),
        ('application/vnd.oci.image.layer.v1.tar+gzip'),
        ('application/vnd.oci.image.layer.v1.tar+zstd'),
        ('application/vnd.oci.image.layer.nondistributable.v1.tar'),
        ('application/vnd.oci.image.layer.nondistributable.v1.tar+gzip'),
        ('application/vnd.oci.image.layer.nondistributable.v1.tar+zstd'),
        ('application/vnd.buildkit.cacheconfig.v0'),
        ('application/octet-stream')
ON CONFLICT (media_type)
    DO NOTHING;
"#;

/// Create tables, functions, triggers, and seed rows. Idempotent.
pub async fn apply_schema(db: &impl GenericClient) -> Result<()> {
    db.batch_execute(TABLES).await?;
    db.batch_execute(FUNCTIONS).await?;
    db.batch_execute(TRIGGERS).await?;
    db.batch_execute(SEED).await?;
    Ok(())
}

/// The nine GC maintenance triggers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GCTrigger {
    BlobUploads,
    ConfigurationBlobs,
    LayerBlobs,
    ManifestUploads,
    DeletedManifests,
    DeletedLayers,
    DeletedManifestLists,
    SwitchedTags,
    DeletedTags,
}

impl GCTrigger {
    pub fn all() -> [GCTrigger; 9] {
        [
            GCTrigger::BlobUploads,
            GCTrigger::ConfigurationBlobs,
            GCTrigger::LayerBlobs,
            GCTrigger::ManifestUploads,
            GCTrigger::DeletedManifests,
            GCTrigger::DeletedLayers,
            GCTrigger::DeletedManifestLists,
            GCTrigger::SwitchedTags,
            GCTrigger::DeletedTags,
        ]
    }

    pub fn name(&self) -> &'static str {
        match self {
            GCTrigger::BlobUploads => "gc_track_blob_uploads",
            GCTrigger::ConfigurationBlobs => "gc_track_configuration_blobs",
            GCTrigger::LayerBlobs => "gc_track_layer_blobs",
            GCTrigger::ManifestUploads => "gc_track_manifest_uploads",
            GCTrigger::DeletedManifests => "gc_track_deleted_manifests",
            GCTrigger::DeletedLayers => "gc_track_deleted_layers",
            GCTrigger::DeletedManifestLists => "gc_track_deleted_manifest_lists",
            GCTrigger::SwitchedTags => "gc_track_switched_tags",
            GCTrigger::DeletedTags => "gc_track_deleted_tags",
        }
    }

    /// The table the trigger is attached to.
    pub fn table(&self) -> &'static str {
        match self {
            GCTrigger::BlobUploads => "blobs",
            GCTrigger::ConfigurationBlobs | GCTrigger::ManifestUploads | GCTrigger::DeletedManifests => {
                "manifests"
            }
            GCTrigger::LayerBlobs | GCTrigger::DeletedLayers => "layers",
            GCTrigger::DeletedManifestLists => "manifest_references",
            GCTrigger::SwitchedTags | GCTrigger::DeletedTags => "tags",
        }
    }
}

/// Disable one GC trigger. The data mutation still happens; only the queue
/// maintenance is suppressed. Reversible with [`enable_trigger`].
pub async fn disable_trigger(db: &impl GenericClient, trigger: GCTrigger) -> Result<()> {
    db.batch_execute(&format!(
        "ALTER TABLE {} DISABLE TRIGGER {}",
        trigger.table(),
        trigger.name()
    ))
    .await
    .map_err(Error::Postgres)
}

/// Re-enable one GC trigger.
pub async fn enable_trigger(db: &impl GenericClient, trigger: GCTrigger) -> Result<()> {
    db.batch_execute(&format!(
        "ALTER TABLE {} ENABLE TRIGGER {}",
        trigger.table(),
        trigger.name()
    ))
    .await
    .map_err(Error::Postgres)
}
