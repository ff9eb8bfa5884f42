//! Shared fixtures for the PostgreSQL integration tests.

#![allow(clippy::unwrap_used, clippy::expect_used, dead_code)]

use bytes::Bytes;
use stevedore::{mediatype, Configuration, Digest, Manifest, Repository};
use stevedore_postgres::{schema, Database, ManifestStore, NewManifest, RepositoryStore};
use testcontainers::runners::AsyncRunner;
use testcontainers::{ContainerAsync, ImageExt};
use testcontainers_modules::postgres::Postgres;

/// Start PostgreSQL in Docker and connect with the schema applied.
///
/// The container handle must be kept alive for the duration of the test.
pub async fn start_database() -> (ContainerAsync<Postgres>, Database) {
    let container = Postgres::default()
        .with_tag("16-alpine")
        .start()
        .await
        .expect("failed to start postgres container");
    let host = container.get_host().await.unwrap();
    let port = container.get_host_port_ipv4(5432).await.unwrap();
    let connection_string =
        format!("host={host} port={port} user=postgres password=postgres dbname=postgres");

    let db = Database::connect(&connection_string)
        .await
        .expect("failed to connect");
    schema::apply_schema(db.client())
        .await
        .expect("failed to apply schema");
    (container, db)
}

/// A second connection to the same container, for concurrency tests.
pub async fn connect_again(container: &ContainerAsync<Postgres>) -> Database {
    let host = container.get_host().await.unwrap();
    let port = container.get_host_port_ipv4(5432).await.unwrap();
    let connection_string =
        format!("host={host} port={port} user=postgres password=postgres dbname=postgres");
    Database::connect(&connection_string)
        .await
        .expect("failed to connect")
}

pub async fn create_repository(db: &Database, path: &str) -> Repository {
    RepositoryStore::new()
        .create_or_find_by_path(db.client(), &path.parse().unwrap())
        .await
        .expect("failed to create repository")
}

/// Deterministic digest for test content.
pub fn digest_of(content: &str) -> Digest {
    Digest::sha256(content.as_bytes())
}

/// Create a blob row (and its dictionary-backed media type).
pub async fn create_blob(db: &Database, content: &str, size: i64) -> Digest {
    let digest = digest_of(content);
    stevedore_postgres::BlobStore::new()
        .create_or_find(db.client(), &digest, mediatype::DOCKER_LAYER, size)
        .await
        .expect("failed to create blob");
    digest
}

/// Create a minimal image manifest row in the repository, optionally with a
/// configuration blob.
pub async fn create_manifest(
    db: &Database,
    repo: &Repository,
    payload: &str,
    config: Option<&Digest>,
) -> Manifest {
    let payload = Bytes::from(payload.as_bytes().to_vec());
    let digest = Digest::sha256(&payload);
    let configuration = config.map(|config_digest| Configuration {
        media_type: mediatype::DOCKER_CONFIG.to_string(),
        digest: config_digest.clone(),
        payload: None,
    });
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
                configuration,
                non_conformant: false,
                non_distributable_layers: false,
                total_size: 0,
            },
        )
        .await
        .expect("failed to create manifest")
}
