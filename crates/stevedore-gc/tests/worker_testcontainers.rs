//! Integration tests for the GC workers, using testcontainers.
//!
//! Run them with a local Docker daemon:
//! ```bash
//! cargo test -p stevedore-gc --test worker_testcontainers -- --ignored
//! ```

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use bytes::Bytes;
use chrono::{Duration, Utc};
use stevedore::{mediatype, Configuration, Digest, Manifest, Repository};
use stevedore_gc::{BlobWorker, ManifestWorker, WorkerError};
use stevedore_postgres::{
    schema, BlobStore, Database, GCBlobTaskStore, GCManifestTaskStore, ManifestStore, NewManifest,
    RepositoryStore, TagStore,
};
use testcontainers::runners::AsyncRunner;
use testcontainers::{ContainerAsync, ImageExt};
use testcontainers_modules::postgres::Postgres;

async fn start() -> (ContainerAsync<Postgres>, Database, Database) {
    let container = Postgres::default()
        .with_tag("16-alpine")
        .start()
        .await
        .expect("failed to start postgres container");
    let host = container.get_host().await.unwrap();
    let port = container.get_host_port_ipv4(5432).await.unwrap();
    let connection_string =
        format!("host={host} port={port} user=postgres password=postgres dbname=postgres");

    let db = Database::connect(&connection_string).await.unwrap();
    schema::apply_schema(db.client()).await.unwrap();
    let worker_db = Database::connect(&connection_string).await.unwrap();
    (container, db, worker_db)
}

async fn create_repository(db: &Database, path: &str) -> Repository {
    RepositoryStore::new()
        .create_or_find_by_path(db.client(), &path.parse().unwrap())
        .await
        .unwrap()
}

async fn create_blob(db: &Database, content: &str) -> Digest {
    let digest = Digest::sha256(content.as_bytes());
    BlobStore::new()
        .create_or_find(db.client(), &digest, mediatype::DOCKER_LAYER, 42)
        .await
        .unwrap();
    digest
}

async fn create_manifest(
    db: &Database,
    repo: &Repository,
    payload: &str,
    config: Option<&Digest>,
) -> Manifest {
    let payload = Bytes::from(payload.as_bytes().to_vec());
    let digest = Digest::sha256(&payload);
    ManifestStore::new()
        .create_or_find(
            db.client(),
            &NewManifest {
                namespace_id: repo.namespace_id,
                repository_id: repo.id,
                schema_version: 2,
                media_type: mediatype::DOCKER_MANIFEST_V2.to_string(),
                digest,
                payload,
                configuration: config.map(|d| Configuration {
                    media_type: mediatype::DOCKER_CONFIG.to_string(),
                    digest: d.clone(),
                    payload: None,
                }),
                non_conformant: false,
                non_distributable_layers: false,
                total_size: 0,
            },
        )
        .await
        .unwrap()
}

async fn make_all_tasks_due(db: &Database) {
    db.client()
        .execute(
            "UPDATE gc_blob_review_queue SET review_after = now() - interval '1 second'",
            &[],
        )
        .await
        .unwrap();
    db.client()
        .execute(
            "UPDATE gc_manifest_review_queue SET review_after = now() - interval '1 second'",
            &[],
        )
        .await
        .unwrap();
}

#[tokio::test]
#[ignore = "requires a local docker daemon"]
async fn test_worker_reports_not_found_on_empty_queue() {
    let (_container, _db, worker_db) = start().await;
    let mut worker = BlobWorker::new(worker_db);

    let outcome = worker.run().await.unwrap();
    assert!(!outcome.found);
    assert!(!outcome.dangling);
    assert!(outcome.event.is_none());
}

#[tokio::test]
#[ignore = "requires a local docker daemon"]
async fn test_blob_worker_deletes_dangling_blob() {
    let (_container, db, worker_db) = start().await;
    let digest = create_blob(&db, "unreferenced").await;
    make_all_tasks_due(&db).await;

    let mut worker = BlobWorker::new(worker_db);
    let outcome = worker.run().await.unwrap();
    assert!(outcome.found);
    assert!(outcome.dangling);
    assert_eq!(outcome.event.as_deref(), Some("blob_upload"));

    assert!(BlobStore::new()
        .find_by_digest(db.client(), &digest)
        .await
        .unwrap()
        .is_none());
    assert_eq!(GCBlobTaskStore::new().count(db.client()).await.unwrap(), 0);
}

#[tokio::test]
#[ignore = "requires a local docker daemon"]
async fn test_blob_worker_keeps_linked_blob() {
    let (_container, db, worker_db) = start().await;
    let repo = create_repository(&db, "g/p").await;
    let digest = create_blob(&db, "linked").await;
    RepositoryStore::new()
        .link_blob(db.client(), &repo, &digest)
        .await
        .unwrap();
    make_all_tasks_due(&db).await;

    let mut worker = BlobWorker::new(worker_db);
    let outcome = worker.run().await.unwrap();
    assert!(outcome.found);
    assert!(!outcome.dangling);

    // the blob survives, the task is gone
    assert!(BlobStore::new()
        .find_by_digest(db.client(), &digest)
        .await
        .unwrap()
        .is_some());
    assert_eq!(GCBlobTaskStore::new().count(db.client()).await.unwrap(), 0);
}

// Scenario: a dangling manifest is deleted, its task row with it.
#[tokio::test]
#[ignore = "requires a local docker daemon"]
async fn test_manifest_worker_deletes_dangling_manifest() {
    let (_container, db, worker_db) = start().await;
    let repo = create_repository(&db, "g/p").await;
    let manifest = create_manifest(&db, &repo, "untagged", None).await;
    make_all_tasks_due(&db).await;

    let mut worker = ManifestWorker::new(worker_db);
    let outcome = worker.run().await.unwrap();
    assert!(outcome.found);
    assert!(outcome.dangling);
    assert_eq!(outcome.event.as_deref(), Some("manifest_upload"));

    assert!(ManifestStore::new()
        .find_by_id(db.client(), repo.namespace_id, repo.id, manifest.id)
        .await
        .unwrap()
        .is_none());
    assert_eq!(
        GCManifestTaskStore::new().count(db.client()).await.unwrap(),
        0
    );
}

#[tokio::test]
#[ignore = "requires a local docker daemon"]
async fn test_manifest_worker_keeps_tagged_manifest() {
    let (_container, db, worker_db) = start().await;
    let repo = create_repository(&db, "g/p").await;
    let manifest = create_manifest(&db, &repo, "tagged", None).await;
    TagStore::new()
        .create_or_update(db.client(), repo.namespace_id, repo.id, "latest", manifest.id)
        .await
        .unwrap();
    make_all_tasks_due(&db).await;

    let mut worker = ManifestWorker::new(worker_db);
    let outcome = worker.run().await.unwrap();
    assert!(outcome.found);
    assert!(!outcome.dangling);

    assert!(ManifestStore::new()
        .find_by_id(db.client(), repo.namespace_id, repo.id, manifest.id)
        .await
        .unwrap()
        .is_some());
}

// Scenario: a transient failure inside the cycle postpones the task by five
// minutes and bumps its review count. The failure is induced by breaking the
// invariant the deletion relies on: the blob still backs a manifest
// configuration, but its reachability link row was removed, so the dangling
// check passes and the delete trips the foreign key.
#[tokio::test]
#[ignore = "requires a local docker daemon"]
async fn test_blob_worker_postpones_task_on_failure() {
    let (_container, db, worker_db) = start().await;
    let repo = create_repository(&db, "g/p").await;
    let config_digest = create_blob(&db, "config").await;
    create_manifest(&db, &repo, "with-config", Some(&config_digest)).await;
    db.client()
        .execute("DELETE FROM gc_blobs_configurations", &[])
        .await
        .unwrap();
    make_all_tasks_due(&db).await;

    let mut worker = BlobWorker::new(worker_db);
    let err = worker.run().await.unwrap_err();
    assert!(matches!(err, WorkerError::Store(_)));

    let tasks = GCBlobTaskStore::new().find_all(db.client()).await.unwrap();
    let task = tasks
        .iter()
        .find(|t| t.digest == config_digest)
        .expect("postponed task");
    assert_eq!(task.review_count, 1);
    let now = Utc::now();
    assert!(task.review_after > now + Duration::minutes(4));
    assert!(task.review_after < now + Duration::minutes(6));
}
