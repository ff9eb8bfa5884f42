//! One-shot filesystem-to-database metadata importer.
//!
//! Reconstructs the relational metadata graph from a legacy filesystem-layout
//! registry: repositories, manifests (including manifest lists and buildkit
//! cache indexes), layers, configurations, blob links, and tags. The importer
//! drives the same stores as the online write path, so every insert also
//! feeds the GC review queues through the database triggers.
//!
//! Three entry points share the per-repository routine:
//! - [`Importer::import_all`] walks every repository on the filesystem.
//! - [`Importer::import`] imports one repository in one transaction.
//! - [`Importer::pre_import`] does the same but skips tag creation, so the
//!   heavy work can happen while pushes remain permitted.
//!
//! Broken tag links, corrupted digests, and schema-1 signed manifests are
//! logged and skipped; real failures abort the repository. A repository whose
//! migration status flips to canceled while the importer is working is
//! abandoned without committing.
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use stevedore_importer::{FilesystemStorage, Importer};
//! use stevedore_postgres::Database;
//!
//! async fn example() -> Result<(), stevedore_importer::ImporterError> {
//!     let storage = Arc::new(FilesystemStorage::new("/var/lib/registry"));
//!     let importer = Importer::new(storage)
//!         .with_dangling_manifests()
//!         .with_tag_concurrency(4);
//!     let mut db = Database::connect("host=localhost user=postgres dbname=registry").await?;
//!     importer.import_all(&mut db).await
//! }
//! ```

mod metrics;
mod storage;

pub use storage::{
    BlobEnumerator, BlobStatter, BlobTransferService, FilesystemStorage, RegistryStorage,
    StorageError, TransferError,
};

use bytes::Bytes;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};
use stevedore::manifest::{self, mediatype, ImageManifest, ManifestList, ManifestVariant};
use stevedore::{
    Configuration, Digest, Manifest, MigrationStatus, PayloadError, Repository, RepositoryPath,
    MAX_CACHED_CONFIG_SIZE,
};
use stevedore_postgres::{
    BlobStore, Database, ManifestStore, NewManifest, RepositoryStore, TagStore,
};
use thiserror::Error;
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

/// Default bound on one repository's import transaction.
pub const DEFAULT_TX_TIMEOUT: Duration = Duration::from_secs(10 * 60);

/// Errors surfaced by the importer.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ImporterError {
    /// The repository path does not parse as a reference.
    #[error("invalid repository reference: {0}")]
    BadReference(#[from] stevedore::ReferenceError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Store(#[from] stevedore_postgres::Error),

    #[error(transparent)]
    Transfer(#[from] TransferError),

    /// `RequireEmptyDatabase` found existing rows.
    #[error("non-empty database")]
    NonEmptyDatabase,

    /// The repository's migration status flipped to `import_canceled`
    /// before commit; the transaction was abandoned.
    #[error("import canceled")]
    ImportCanceled,

    /// The repository's migration status flipped to `pre_import_canceled`
    /// before commit; the transaction was abandoned.
    #[error("pre import canceled")]
    PreImportCanceled,

    /// `TestSlowImport` was asked to sleep for a negative duration.
    #[error("negative testing delay: {0}")]
    NegativeTestingDelay(chrono::Duration),

    /// Signed schema-1 manifests are recognized only to be skipped.
    #[error("signed schema 1 manifests are not supported: {digest}")]
    SchemaV1Unsupported { digest: Digest },

    /// No manifest revision for the digest exists in the repository.
    #[error("unknown manifest revision {digest} in repository {repository}")]
    UnknownManifestRevision {
        repository: String,
        digest: Digest,
    },

    /// The manifest payload is empty.
    #[error("empty manifest payload {digest} in repository {repository}")]
    EmptyManifest {
        repository: String,
        digest: Digest,
    },

    /// A layer link file of the manifest is corrupt; the whole manifest is
    /// skipped.
    #[error("broken layer link {digest} in repository {repository}")]
    BrokenLayerLink {
        repository: String,
        digest: Digest,
    },

    /// The manifest payload is not a recognizable manifest document.
    #[error("malformed manifest payload {digest}: {source}")]
    Payload {
        digest: Digest,
        #[source]
        source: PayloadError,
    },

    /// A tag-resolution task failed to run.
    #[error("tag resolution task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

// Conditions every caller up the tagged path treats as skip-and-continue.
fn skippable(e: &ImporterError) -> bool {
    matches!(
        e,
        ImporterError::SchemaV1Unsupported { .. }
            | ImporterError::UnknownManifestRevision { .. }
            | ImporterError::EmptyManifest { .. }
            | ImporterError::BrokenLayerLink { .. }
            | ImporterError::Storage(StorageError::InvalidDigestLink { .. })
    )
}

/// The importer. Options are applied builder-style; see the module docs.
pub struct Importer<S> {
    storage: Arc<S>,
    blob_transfer: Option<Arc<dyn BlobTransferService>>,
    dangling_manifests: bool,
    dangling_blobs: bool,
    require_empty_database: bool,
    dry_run: bool,
    row_count: bool,
    tag_concurrency: usize,
    test_slow_import: Option<Duration>,
    tx_timeout: Duration,
}

impl<S> Importer<S>
where
    S: RegistryStorage + BlobEnumerator + BlobStatter + Send + Sync + 'static,
{
    pub fn new(storage: Arc<S>) -> Self {
        Importer {
            storage,
            blob_transfer: None,
            dangling_manifests: false,
            dangling_blobs: false,
            require_empty_database: false,
            dry_run: false,
            row_count: false,
            tag_concurrency: 1,
            test_slow_import: None,
            tx_timeout: DEFAULT_TX_TIMEOUT,
        }
    }

    /// Also import manifest revisions that no tag points at.
    #[must_use]
    pub fn with_dangling_manifests(mut self) -> Self {
        self.dangling_manifests = true;
        self
    }

    /// During [`Importer::import_all`], also create rows for content-store
    /// blobs the database does not know, with media type
    /// `application/octet-stream`.
    #[must_use]
    pub fn with_dangling_blobs(mut self) -> Self {
        self.dangling_blobs = true;
        self
    }

    /// Refuse to run unless repositories, manifests, blobs, and tags all
    /// count zero.
    #[must_use]
    pub fn with_require_empty_database(mut self) -> Self {
        self.require_empty_database = true;
        self
    }

    /// Run everything inside one transaction and roll it back at the end.
    #[must_use]
    pub fn with_dry_run(mut self) -> Self {
        self.dry_run = true;
        self
    }

    /// Re-query and log the main row counts after the run.
    #[must_use]
    pub fn with_row_count(mut self) -> Self {
        self.row_count = true;
        self
    }

    /// Copy every created-or-found blob to the destination store.
    #[must_use]
    pub fn with_blob_transfer_service(mut self, bts: Arc<dyn BlobTransferService>) -> Self {
        self.blob_transfer = Some(bts);
        self
    }

    /// Bound on concurrent tag-link resolutions. Zero is clamped to one.
    #[must_use]
    pub fn with_tag_concurrency(mut self, n: usize) -> Self {
        self.tag_concurrency = n.max(1);
        self
    }

    /// Sleep before each manifest import, widening cancellation windows in
    /// tests.
    ///
    /// # Errors
    /// [`ImporterError::NegativeTestingDelay`] for a negative duration.
    pub fn with_test_slow_import(mut self, delay: chrono::Duration) -> Result<Self, ImporterError> {
        let std_delay = delay
            .to_std()
            .map_err(|_| ImporterError::NegativeTestingDelay(delay))?;
        self.test_slow_import = Some(std_delay);
        Ok(self)
    }

    #[must_use]
    pub fn with_tx_timeout(mut self, tx_timeout: Duration) -> Self {
        self.tx_timeout = tx_timeout;
        self
    }

    /// Import every repository on the filesystem, each in its own
    /// transaction, or all inside one rolled-back transaction for a dry
    /// run. Per-repository `PathNotFound` / `RepositoryUnknown` errors are
    /// tolerated; anything else aborts the traversal.
    pub async fn import_all(&self, db: &mut Database) -> Result<(), ImporterError> {
        let started = Instant::now();
        if self.require_empty_database {
            self.check_empty_database(db.client()).await?;
        }
        let repositories = self.storage.repositories().await?;
        info!(count = repositories.len(), "importing all repositories");

        if self.dry_run {
            let tx = db.begin(Some(self.tx_timeout)).await?;
            let result = self.import_all_on(tx.client(), &repositories).await;
            tx.rollback().await?;
            result?;
        } else {
            for repo_path in &repositories {
                let path: RepositoryPath = match repo_path.parse() {
                    Ok(path) => path,
                    Err(e) => {
                        warn!(repository = %repo_path, "skipping unparseable repository: {}", e);
                        continue;
                    }
                };
                match self.run_repository(db, &path, true).await {
                    Ok(()) => {}
                    Err(e) if tolerated_in_import_all(&e) => {
                        warn!(repository = %repo_path, "skipping repository: {}", e);
                    }
                    Err(e) => return Err(e),
                }
            }
            if self.dangling_blobs {
                let tx = db.begin(Some(self.tx_timeout)).await?;
                self.import_dangling_blobs(tx.client()).await?;
                tx.commit().await?;
            }
        }

        if self.row_count {
            self.log_row_counts(db.client()).await?;
        }
        info!(
            duration_s = started.elapsed().as_secs_f64(),
            "full import complete"
        );
        Ok(())
    }

    // Dry-run body: everything on the caller's transaction.
    async fn import_all_on(
        &self,
        client: &impl tokio_postgres::GenericClient,
        repositories: &[String],
    ) -> Result<(), ImporterError> {
        for repo_path in repositories {
            let path: RepositoryPath = match repo_path.parse() {
                Ok(path) => path,
                Err(e) => {
                    warn!(repository = %repo_path, "skipping unparseable repository: {}", e);
                    continue;
                }
            };
            match self.import_repository(client, &path, true).await {
                Ok(_) => {}
                Err(e) if tolerated_in_import_all(&e) => {
                    warn!(repository = %repo_path, "skipping repository: {}", e);
                }
                Err(e) => return Err(e),
            }
        }
        if self.dangling_blobs {
            self.import_dangling_blobs(client).await?;
        }
        Ok(())
    }

    /// Import one repository in one transaction.
    ///
    /// When an external writer flips the repository's migration status to
    /// `import_canceled` before the work commits, the transaction is
    /// abandoned and [`ImporterError::ImportCanceled`] is returned.
    pub async fn import(&self, db: &mut Database, repo_path: &str) -> Result<(), ImporterError> {
        self.import_one(db, repo_path, true).await
    }

    /// Like [`Importer::import`], skipping tag creation. Cancellation
    /// surfaces as [`ImporterError::PreImportCanceled`].
    pub async fn pre_import(&self, db: &mut Database, repo_path: &str) -> Result<(), ImporterError> {
        self.import_one(db, repo_path, false).await
    }

    async fn import_one(
        &self,
        db: &mut Database,
        repo_path: &str,
        include_tags: bool,
    ) -> Result<(), ImporterError> {
        let path: RepositoryPath = repo_path.parse()?;
        // refused before any repository work, so nothing gets marked failed
        if self.require_empty_database {
            self.check_empty_database(db.client()).await?;
        }
        let started = Instant::now();
        let outcome = self.run_repository(db, &path, include_tags).await;
        match &outcome {
            Ok(()) => {
                info!(
                    repository = %path,
                    duration_s = started.elapsed().as_secs_f64(),
                    "repository import complete"
                );
                if self.row_count {
                    self.log_row_counts(db.client()).await?;
                }
            }
            // cancellation is not a failure: the status stays canceled
            Err(ImporterError::ImportCanceled | ImporterError::PreImportCanceled) => {}
            Err(e) => {
                let failed = if include_tags {
                    MigrationStatus::ImportFailed
                } else {
                    MigrationStatus::PreImportFailed
                };
                self.record_failure(db, &path, failed, e).await;
            }
        }
        outcome
    }

    // One repository: settle the row, run the transaction, settle the status.
    async fn run_repository(
        &self,
        db: &mut Database,
        path: &RepositoryPath,
        include_tags: bool,
    ) -> Result<(), ImporterError> {
        let store = RepositoryStore::new();
        if !self.dry_run {
            // the in-progress status must be visible (and writable) to the
            // concurrent control-plane path, so it commits before the heavy
            // transaction starts
            let repo = store.create_or_find_by_path(db.client(), path).await?;
            let in_progress = if include_tags {
                MigrationStatus::ImportInProgress
            } else {
                MigrationStatus::PreImportInProgress
            };
            store
                .update_migration_status(db.client(), &repo, in_progress, None)
                .await?;
        }

        let tx = db.begin(Some(self.tx_timeout)).await?;
        let repo = self.import_repository(tx.client(), path, include_tags).await?;

        // race-free cancellation: re-read the status before commit; it is
        // only writable by the concurrent control-plane path
        let current = RepositoryStore::new()
            .find_by_id(tx.client(), repo.id)
            .await?;
        if current.is_some_and(|r| r.migration_status.canceled()) {
            drop(tx);
            return Err(if include_tags {
                ImporterError::ImportCanceled
            } else {
                ImporterError::PreImportCanceled
            });
        }
        let done = if include_tags {
            MigrationStatus::ImportComplete
        } else {
            MigrationStatus::PreImportComplete
        };
        RepositoryStore::new()
            .update_migration_status(tx.client(), &repo, done, None)
            .await?;
        if self.dry_run {
            tx.rollback().await?;
        } else {
            tx.commit().await?;
        }
        Ok(())
    }

    // Best-effort failure marker, written outside the aborted transaction.
    async fn record_failure(
        &self,
        db: &Database,
        path: &RepositoryPath,
        status: MigrationStatus,
        e: &ImporterError,
    ) {
        if self.dry_run {
            return;
        }
        let store = RepositoryStore::new();
        if let Ok(Some(repo)) = store.find_by_path(db.client(), path.as_str()).await {
            if let Err(update_err) = store
                .update_migration_status(db.client(), &repo, status, Some(&e.to_string()))
                .await
            {
                warn!(
                    repository = %path,
                    "failed to record import failure: {}",
                    update_err
                );
            }
        }
    }

    /// The common per-repository routine. Returns the repository row so
    /// callers can settle its migration status.
    async fn import_repository(
        &self,
        client: &impl tokio_postgres::GenericClient,
        path: &RepositoryPath,
        include_tags: bool,
    ) -> Result<Repository, ImporterError> {
        let repo = RepositoryStore::new()
            .create_or_find_by_path(client, path)
            .await?;
        if self.dangling_manifests {
            self.import_all_revisions(client, &repo).await?;
        }
        self.import_tagged_manifests(client, &repo, include_tags)
            .await?;
        Ok(repo)
    }

    // Dangling-manifest mode: every revision, not just tag targets.
    async fn import_all_revisions(
        &self,
        client: &impl tokio_postgres::GenericClient,
        repo: &Repository,
    ) -> Result<(), ImporterError> {
        let revisions = self.storage.manifest_revisions(&repo.path).await?;
        debug!(
            repository = %repo.path,
            count = revisions.len(),
            "importing manifest revisions"
        );
        for digest in revisions {
            match self.import_manifest(client, repo, &digest).await {
                Ok(_) => {}
                Err(e) if skippable(&e) => {
                    warn!(repository = %repo.path, digest = %digest, "skipping manifest: {}", e);
                }
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    // Tag fan-out: a bounded pool of filesystem lookups feeding one serial
    // database writer, consumed in tag order.
    async fn import_tagged_manifests(
        &self,
        client: &impl tokio_postgres::GenericClient,
        repo: &Repository,
        create_tags: bool,
    ) -> Result<(), ImporterError> {
        let tags = self.storage.tags(&repo.path).await?;
        metrics::METRICS
            .tags_per_repository
            .observe(tags.len() as f64);
        debug!(repository = %repo.path, count = tags.len(), "importing tags");
        if tags.is_empty() {
            return Ok(());
        }

        let semaphore = Arc::new(Semaphore::new(self.tag_concurrency));
        let mut lookups = VecDeque::with_capacity(tags.len());
        for tag in tags {
            let storage = Arc::clone(&self.storage);
            let semaphore = Arc::clone(&semaphore);
            let repo_path = repo.path.clone();
            lookups.push_back(tokio::spawn(async move {
                let _permit = semaphore.acquire_owned().await.ok();
                let link = storage.tag_link(&repo_path, &tag).await;
                (tag, link)
            }));
        }

        while let Some(lookup) = lookups.pop_front() {
            let (tag, link) = match lookup.await {
                Ok(resolved) => resolved,
                Err(e) => {
                    abort_all(lookups);
                    return Err(ImporterError::Join(e));
                }
            };
            if let Err(e) = self
                .consume_tag(client, repo, &tag, link, create_tags)
                .await
            {
                abort_all(lookups);
                return Err(e);
            }
        }
        Ok(())
    }

    async fn consume_tag(
        &self,
        client: &impl tokio_postgres::GenericClient,
        repo: &Repository,
        tag: &str,
        link: Result<Digest, StorageError>,
        create_tags: bool,
    ) -> Result<(), ImporterError> {
        let digest = match link {
            Ok(digest) => digest,
            Err(StorageError::PathNotFound(path)) => {
                warn!(repository = %repo.path, tag, path, "tag link not found, skipping");
                return Ok(());
            }
            Err(StorageError::InvalidDigestLink { path, source }) => {
                warn!(
                    repository = %repo.path,
                    tag,
                    path,
                    "broken tag link digest, skipping: {}",
                    source
                );
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        };

        let manifest = match self.import_manifest(client, repo, &digest).await {
            Ok(manifest) => manifest,
            Err(e) if skippable(&e) => {
                warn!(repository = %repo.path, tag, digest = %digest, "skipping manifest: {}", e);
                return Ok(());
            }
            Err(e) => return Err(e),
        };

        if create_tags {
            TagStore::new()
                .create_or_update(client, repo.namespace_id, repo.id, tag, manifest.id)
                .await?;
            debug!(repository = %repo.path, tag, digest = %digest, "tag imported");
        }
        Ok(())
    }

    /// Import one manifest revision, dispatching on its payload kind.
    async fn import_manifest(
        &self,
        client: &impl tokio_postgres::GenericClient,
        repo: &Repository,
        digest: &Digest,
    ) -> Result<Manifest, ImporterError> {
        // idempotence: the digest may already be imported, possibly as a
        // child of an earlier manifest list
        if let Some(existing) = ManifestStore::new()
            .find_by_digest(client, repo.namespace_id, repo.id, digest)
            .await?
        {
            return Ok(existing);
        }

        if let Some(delay) = self.test_slow_import {
            tokio::time::sleep(delay).await;
        }

        let payload = match self.storage.manifest_payload(&repo.path, digest).await {
            Ok(payload) => payload,
            Err(StorageError::PathNotFound(_)) => {
                return Err(ImporterError::UnknownManifestRevision {
                    repository: repo.path.clone(),
                    digest: digest.clone(),
                })
            }
            Err(e) => return Err(e.into()),
        };

        match manifest::parse(&payload) {
            Ok(ManifestVariant::SchemaV1) => Err(ImporterError::SchemaV1Unsupported {
                digest: digest.clone(),
            }),
            Ok(ManifestVariant::Image(image)) => {
                self.import_image(client, repo, digest, payload, &image, false)
                    .await
            }
            Ok(ManifestVariant::BuildkitCache(image)) => {
                // best-effort conversion, always flagged non-conformant
                self.import_image(client, repo, digest, payload, &image, true)
                    .await
            }
            Ok(ManifestVariant::List(list)) => {
                self.import_list(client, repo, digest, payload, &list).await
            }
            Err(PayloadError::Empty) => Err(ImporterError::EmptyManifest {
                repository: repo.path.clone(),
                digest: digest.clone(),
            }),
            Err(e) => Err(ImporterError::Payload {
                digest: digest.clone(),
                source: e,
            }),
        }
    }

    async fn import_image(
        &self,
        client: &impl tokio_postgres::GenericClient,
        repo: &Repository,
        digest: &Digest,
        payload: Bytes,
        image: &ImageManifest,
        non_conformant: bool,
    ) -> Result<Manifest, ImporterError> {
        let blob_store = BlobStore::new();
        let repo_store = RepositoryStore::new();

        // configuration blob first: payload, row, link, transfer
        let config_media_type = image.config.media_type_or(mediatype::OCTET_STREAM);
        let config_payload = self.storage.blob_payload(&image.config.digest).await?;
        blob_store
            .create_or_find(client, &image.config.digest, config_media_type, image.config.size)
            .await?;
        repo_store
            .link_blob(client, repo, &image.config.digest)
            .await?;
        self.transfer_blob(&image.config.digest, image.config.size)
            .await?;

        // layers: verify reachability, then row, link, transfer
        let mut layers = Vec::with_capacity(image.layers.len());
        for layer in &image.layers {
            match self.storage.layer_linked(&repo.path, &layer.digest).await {
                Ok(true) => {}
                Ok(false) => {
                    warn!(
                        repository = %repo.path,
                        digest = %layer.digest,
                        "layer blob not linked to repository, skipping layer"
                    );
                    continue;
                }
                Err(StorageError::InvalidDigestLink { .. }) => {
                    return Err(ImporterError::BrokenLayerLink {
                        repository: repo.path.clone(),
                        digest: layer.digest.clone(),
                    })
                }
                Err(e) => return Err(e.into()),
            }
            let layer_media_type = layer.media_type_or(mediatype::DOCKER_LAYER);
            blob_store
                .create_or_find(client, &layer.digest, layer_media_type, layer.size)
                .await?;
            repo_store.link_blob(client, repo, &layer.digest).await?;
            self.transfer_blob(&layer.digest, layer.size).await?;
            layers.push(layer);
        }
        metrics::METRICS
            .layers_per_manifest
            .observe(image.layers.len() as f64);

        let configuration = Configuration {
            media_type: config_media_type.to_string(),
            digest: image.config.digest.clone(),
            payload: (config_payload.len() <= MAX_CACHED_CONFIG_SIZE)
                .then(|| config_payload.clone()),
        };
        let manifest = ManifestStore::new()
            .create_or_find(
                client,
                &NewManifest {
                    namespace_id: repo.namespace_id,
                    repository_id: repo.id,
                    schema_version: image.schema_version,
                    media_type: image.media_type.clone(),
                    digest: digest.clone(),
                    payload,
                    configuration: Some(configuration),
                    non_conformant,
                    non_distributable_layers: image.has_non_distributable_layers(),
                    total_size: image.total_size(),
                },
            )
            .await?;

        for layer in layers {
            ManifestStore::new()
                .associate_layer_blob(
                    client,
                    &manifest,
                    &layer.digest,
                    layer.size,
                    layer.media_type_or(mediatype::DOCKER_LAYER),
                )
                .await?;
        }
        Ok(manifest)
    }

    async fn import_list(
        &self,
        client: &impl tokio_postgres::GenericClient,
        repo: &Repository,
        digest: &Digest,
        payload: Bytes,
        list: &ManifestList,
    ) -> Result<Manifest, ImporterError> {
        let mut children = Vec::with_capacity(list.manifests.len());
        for child in &list.manifests {
            // a dangling child reference fails the whole list deterministically
            match Box::pin(self.import_manifest(client, repo, &child.digest)).await {
                Ok(imported) => children.push(imported.id),
                Err(e @ ImporterError::SchemaV1Unsupported { .. }) => {
                    warn!(
                        repository = %repo.path,
                        digest = %child.digest,
                        "skipping manifest list reference: {}",
                        e
                    );
                }
                Err(e) => return Err(e),
            }
        }

        let total_size = payload.len() as i64;
        let manifest = ManifestStore::new()
            .create_or_find(
                client,
                &NewManifest {
                    namespace_id: repo.namespace_id,
                    repository_id: repo.id,
                    schema_version: list.schema_version,
                    media_type: list.media_type.clone(),
                    digest: digest.clone(),
                    payload,
                    configuration: None,
                    non_conformant: false,
                    non_distributable_layers: false,
                    total_size,
                },
            )
            .await?;

        for child_id in children {
            ManifestStore::new()
                .associate_manifest(client, repo.namespace_id, repo.id, manifest.id, child_id)
                .await?;
        }
        Ok(manifest)
    }

    async fn transfer_blob(&self, digest: &Digest, size: i64) -> Result<(), ImporterError> {
        let Some(bts) = &self.blob_transfer else {
            return Ok(());
        };
        if self.dry_run {
            return Ok(());
        }
        let started = Instant::now();
        match bts.transfer(digest).await {
            Ok(()) => {
                metrics::METRICS
                    .blob_transfer_duration_seconds
                    .observe(started.elapsed().as_secs_f64());
                metrics::METRICS
                    .blob_transfer_size_bytes
                    .observe(size as f64);
                debug!(digest = %digest, size, "blob transferred");
                Ok(())
            }
            // already present in the destination store
            Err(TransferError::BlobExists) => Ok(()),
            Err(e) => Err(ImporterError::Transfer(e)),
        }
    }

    async fn import_dangling_blobs(
        &self,
        client: &impl tokio_postgres::GenericClient,
    ) -> Result<(), ImporterError> {
        let digests = self.storage.blobs().await?;
        let blob_store = BlobStore::new();
        let total = digests.len();
        let mut count = 0usize;
        for digest in digests {
            if blob_store.find_by_digest(client, &digest).await?.is_some() {
                continue;
            }
            let size = self.storage.stat(&digest).await?;
            blob_store
                .create_or_find(client, &digest, mediatype::OCTET_STREAM, size)
                .await?;
            self.transfer_blob(&digest, size).await?;
            count += 1;
        }
        info!(count, total, "imported dangling blobs");
        Ok(())
    }

    async fn check_empty_database(
        &self,
        client: &impl tokio_postgres::GenericClient,
    ) -> Result<(), ImporterError> {
        let repositories = RepositoryStore::new().count(client).await?;
        let manifests = ManifestStore::new().count(client).await?;
        let blobs = BlobStore::new().count(client).await?;
        let tags = TagStore::new().count(client).await?;
        if repositories + manifests + blobs + tags > 0 {
            return Err(ImporterError::NonEmptyDatabase);
        }
        Ok(())
    }

    async fn log_row_counts(
        &self,
        client: &impl tokio_postgres::GenericClient,
    ) -> Result<(), ImporterError> {
        let repositories = RepositoryStore::new().count(client).await?;
        let manifests = ManifestStore::new().count(client).await?;
        let blobs = BlobStore::new().count(client).await?;
        let tags = TagStore::new().count(client).await?;
        info!(repositories, manifests, blobs, tags, "row counts");
        Ok(())
    }
}

fn tolerated_in_import_all(e: &ImporterError) -> bool {
    matches!(
        e,
        ImporterError::Storage(StorageError::PathNotFound(_))
            | ImporterError::Storage(StorageError::RepositoryUnknown(_))
    )
}

fn abort_all<T>(lookups: VecDeque<tokio::task::JoinHandle<T>>) {
    for lookup in lookups {
        lookup.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NullStorage;

    #[async_trait::async_trait]
    impl RegistryStorage for NullStorage {
        async fn repositories(&self) -> Result<Vec<String>, StorageError> {
            Ok(Vec::new())
        }
        async fn tags(&self, _repo_path: &str) -> Result<Vec<String>, StorageError> {
            Ok(Vec::new())
        }
        async fn tag_link(&self, repo_path: &str, _tag: &str) -> Result<Digest, StorageError> {
            Err(StorageError::PathNotFound(repo_path.to_string()))
        }
        async fn manifest_revisions(&self, _repo_path: &str) -> Result<Vec<Digest>, StorageError> {
            Ok(Vec::new())
        }
        async fn manifest_payload(
            &self,
            repo_path: &str,
            _digest: &Digest,
        ) -> Result<Bytes, StorageError> {
            Err(StorageError::PathNotFound(repo_path.to_string()))
        }
        async fn layer_linked(
            &self,
            _repo_path: &str,
            _digest: &Digest,
        ) -> Result<bool, StorageError> {
            Ok(false)
        }
        async fn blob_payload(&self, _digest: &Digest) -> Result<Bytes, StorageError> {
            Err(StorageError::PathNotFound("blob".to_string()))
        }
    }

    #[async_trait::async_trait]
    impl BlobEnumerator for NullStorage {
        async fn blobs(&self) -> Result<Vec<Digest>, StorageError> {
            Ok(Vec::new())
        }
    }

    #[async_trait::async_trait]
    impl BlobStatter for NullStorage {
        async fn stat(&self, _digest: &Digest) -> Result<i64, StorageError> {
            Err(StorageError::PathNotFound("blob".to_string()))
        }
    }

    #[test]
    fn test_tag_concurrency_clamps_to_one() {
        let importer = Importer::new(Arc::new(NullStorage)).with_tag_concurrency(0);
        assert_eq!(importer.tag_concurrency, 1);
        let importer = Importer::new(Arc::new(NullStorage)).with_tag_concurrency(8);
        assert_eq!(importer.tag_concurrency, 8);
    }

    #[test]
    fn test_negative_testing_delay_rejected() {
        let result = Importer::new(Arc::new(NullStorage))
            .with_test_slow_import(chrono::Duration::seconds(-1));
        assert!(matches!(
            result,
            Err(ImporterError::NegativeTestingDelay(_))
        ));
    }

    #[test]
    fn test_zero_testing_delay_accepted() {
        let importer = Importer::new(Arc::new(NullStorage))
            .with_test_slow_import(chrono::Duration::zero())
            .unwrap();
        assert_eq!(importer.test_slow_import, Some(Duration::ZERO));
    }

    #[test]
    fn test_skippable_covers_the_swallow_conditions() {
        let digest = Digest::sha256(b"x");
        assert!(skippable(&ImporterError::SchemaV1Unsupported {
            digest: digest.clone()
        }));
        assert!(skippable(&ImporterError::UnknownManifestRevision {
            repository: "a/b".to_string(),
            digest: digest.clone()
        }));
        assert!(skippable(&ImporterError::EmptyManifest {
            repository: "a/b".to_string(),
            digest: digest.clone()
        }));
        assert!(skippable(&ImporterError::BrokenLayerLink {
            repository: "a/b".to_string(),
            digest
        }));
        assert!(!skippable(&ImporterError::NonEmptyDatabase));
        assert!(!skippable(&ImporterError::ImportCanceled));
    }

    #[test]
    fn test_tolerated_import_all_errors() {
        assert!(tolerated_in_import_all(&ImporterError::Storage(
            StorageError::PathNotFound("a/b".to_string())
        )));
        assert!(tolerated_in_import_all(&ImporterError::Storage(
            StorageError::RepositoryUnknown("a/b".to_string())
        )));
        assert!(!tolerated_in_import_all(&ImporterError::NonEmptyDatabase));
    }
}
