//! Tests for the filesystem-layout storage driver, over scratch directories.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

mod common;

use common::RegistryFixture;
use stevedore::Digest;
use stevedore_importer::{
    BlobEnumerator, BlobStatter, FilesystemStorage, RegistryStorage, StorageError,
};

fn storage(fixture: &RegistryFixture) -> FilesystemStorage {
    FilesystemStorage::new(fixture.root())
}

#[tokio::test]
async fn test_repositories_are_discovered_recursively_and_sorted() {
    let fixture = RegistryFixture::new();
    fixture.create_repository("gitlab-org/build/foo");
    fixture.create_repository("gitlab-org/bar");
    fixture.create_repository("zz");
    fixture.create_repository("alpha");

    let repos = storage(&fixture).repositories().await.unwrap();
    assert_eq!(
        repos,
        vec!["alpha", "gitlab-org/bar", "gitlab-org/build/foo", "zz"]
    );
}

#[tokio::test]
async fn test_repositories_empty_tree() {
    let fixture = RegistryFixture::new();
    let repos = storage(&fixture).repositories().await.unwrap();
    assert!(repos.is_empty());
}

#[tokio::test]
async fn test_missing_tags_directory_is_zero_tags() {
    let fixture = RegistryFixture::new();
    fixture.create_repository("a/b");

    let tags = storage(&fixture).tags("a/b").await.unwrap();
    assert!(tags.is_empty());
}

#[tokio::test]
async fn test_missing_repository_is_repository_unknown() {
    let fixture = RegistryFixture::new();
    let err = storage(&fixture).tags("no/such").await.unwrap_err();
    assert!(matches!(err, StorageError::RepositoryUnknown(p) if p == "no/such"));
}

#[tokio::test]
async fn test_tag_link_resolves_digest() {
    let fixture = RegistryFixture::new();
    let digest = fixture.add_image("a/b", "latest", b"config", &[b"layer-1"]);

    let tags = storage(&fixture).tags("a/b").await.unwrap();
    assert_eq!(tags, vec!["latest"]);
    let resolved = storage(&fixture).tag_link("a/b", "latest").await.unwrap();
    assert_eq!(resolved, digest);
}

#[tokio::test]
async fn test_missing_tag_link_is_path_not_found() {
    let fixture = RegistryFixture::new();
    fixture.create_repository("a/b");
    let err = storage(&fixture).tag_link("a/b", "latest").await.unwrap_err();
    assert!(matches!(err, StorageError::PathNotFound(_)));
}

#[tokio::test]
async fn test_corrupt_tag_link_is_invalid_digest() {
    let fixture = RegistryFixture::new();
    fixture.create_repository("a/b");
    fixture.write_tag_link("a/b", "latest", "sha256:not-hex");
    let err = storage(&fixture).tag_link("a/b", "latest").await.unwrap_err();
    assert!(matches!(err, StorageError::InvalidDigestLink { .. }));
}

#[tokio::test]
async fn test_manifest_revisions_lists_all() {
    let fixture = RegistryFixture::new();
    let tagged = fixture.add_image("a/b", "latest", b"config", &[]);
    let untagged = fixture.add_untagged_image("a/b", b"other-config", &[]);

    let mut revisions = storage(&fixture).manifest_revisions("a/b").await.unwrap();
    revisions.sort_by_key(ToString::to_string);
    let mut expected = vec![tagged, untagged];
    expected.sort_by_key(ToString::to_string);
    assert_eq!(revisions, expected);
}

#[tokio::test]
async fn test_manifest_payload_requires_revision_link() {
    let fixture = RegistryFixture::new();
    fixture.create_repository("a/b");
    // blob exists but no revision link in this repository
    let digest = fixture.write_blob(b"{\"schemaVersion\": 2}");

    let err = storage(&fixture)
        .manifest_payload("a/b", &digest)
        .await
        .unwrap_err();
    assert!(matches!(err, StorageError::PathNotFound(_)));

    fixture.link_revision("a/b", &digest);
    let payload = storage(&fixture)
        .manifest_payload("a/b", &digest)
        .await
        .unwrap();
    assert_eq!(&payload[..], b"{\"schemaVersion\": 2}");
}

#[tokio::test]
async fn test_layer_linked_states() {
    let fixture = RegistryFixture::new();
    fixture.create_repository("a/b");
    let linked = fixture.write_blob(b"linked-layer");
    fixture.link_layer("a/b", &linked);
    let unlinked = Digest::sha256(b"unlinked-layer");
    let corrupt = fixture.write_blob(b"corrupt-layer");
    fixture.write_layer_link("a/b", &corrupt, "not a digest");

    let storage = storage(&fixture);
    assert!(storage.layer_linked("a/b", &linked).await.unwrap());
    assert!(!storage.layer_linked("a/b", &unlinked).await.unwrap());
    let err = storage.layer_linked("a/b", &corrupt).await.unwrap_err();
    assert!(matches!(err, StorageError::InvalidDigestLink { .. }));
}

#[tokio::test]
async fn test_blob_enumeration_and_stat() {
    let fixture = RegistryFixture::new();
    let one = fixture.write_blob(b"one");
    let two = fixture.write_blob(b"two-bytes");

    let storage = storage(&fixture);
    let mut blobs = storage.blobs().await.unwrap();
    blobs.sort_by_key(ToString::to_string);
    let mut expected = vec![one.clone(), two.clone()];
    expected.sort_by_key(ToString::to_string);
    assert_eq!(blobs, expected);

    assert_eq!(storage.stat(&one).await.unwrap(), 3);
    assert_eq!(storage.stat(&two).await.unwrap(), 9);
    let missing = Digest::sha256(b"missing");
    assert!(matches!(
        storage.stat(&missing).await.unwrap_err(),
        StorageError::PathNotFound(_)
    ));
}

#[tokio::test]
async fn test_blob_payload_roundtrip() {
    let fixture = RegistryFixture::new();
    let digest = fixture.write_blob(b"payload-bytes");

    let payload = storage(&fixture).blob_payload(&digest).await.unwrap();
    assert_eq!(&payload[..], b"payload-bytes");
    assert!(digest.verify(&payload));
}
