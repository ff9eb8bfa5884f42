//! Fixture builder for the legacy filesystem registry layout.

#![allow(clippy::unwrap_used, clippy::expect_used, dead_code)]

use serde_json::json;
use std::fs;
use std::path::{Path, PathBuf};
use stevedore::{mediatype, Digest};
use tempfile::TempDir;

/// A scratch registry tree in the classic `docker/registry/v2` layout.
pub struct RegistryFixture {
    dir: TempDir,
}

impl RegistryFixture {
    pub fn new() -> Self {
        RegistryFixture {
            dir: TempDir::new().expect("failed to create fixture dir"),
        }
    }

    pub fn root(&self) -> &Path {
        self.dir.path()
    }

    fn v2(&self) -> PathBuf {
        self.dir.path().join("docker/registry/v2")
    }

    fn repo_dir(&self, repo: &str) -> PathBuf {
        self.v2().join("repositories").join(repo)
    }

    /// Write a blob into the content store, returning its digest.
    pub fn write_blob(&self, content: &[u8]) -> Digest {
        let digest = Digest::sha256(content);
        let dir = self
            .v2()
            .join("blobs")
            .join(digest.algorithm().as_str())
            .join(&digest.hex()[..2])
            .join(digest.hex());
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join("data"), content).unwrap();
        digest
    }

    /// Create the repository directory skeleton without any tag.
    pub fn create_repository(&self, repo: &str) {
        fs::create_dir_all(self.repo_dir(repo).join("_manifests")).unwrap();
    }

    pub fn link_tag(&self, repo: &str, tag: &str, digest: &Digest) {
        self.write_tag_link(repo, tag, &digest.to_string());
    }

    /// Write raw tag-link content; used to plant corrupt links.
    pub fn write_tag_link(&self, repo: &str, tag: &str, content: &str) {
        let dir = self
            .repo_dir(repo)
            .join("_manifests/tags")
            .join(tag)
            .join("current");
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join("link"), content).unwrap();
    }

    pub fn link_revision(&self, repo: &str, digest: &Digest) {
        let dir = self
            .repo_dir(repo)
            .join("_manifests/revisions")
            .join(digest.algorithm().as_str())
            .join(digest.hex());
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join("link"), digest.to_string()).unwrap();
    }

    pub fn link_layer(&self, repo: &str, digest: &Digest) {
        self.write_layer_link(repo, digest, &digest.to_string());
    }

    /// Write raw layer-link content; used to plant corrupt links.
    pub fn write_layer_link(&self, repo: &str, digest: &Digest, content: &str) {
        let dir = self
            .repo_dir(repo)
            .join("_layers")
            .join(digest.algorithm().as_str())
            .join(digest.hex());
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join("link"), content).unwrap();
    }

    /// Store a manifest payload as a revision of the repository.
    pub fn write_manifest(&self, repo: &str, payload: &[u8]) -> Digest {
        self.create_repository(repo);
        let digest = self.write_blob(payload);
        self.link_revision(repo, &digest);
        digest
    }

    /// Build a complete tagged image: config blob, layer blobs with links,
    /// and a schema-2 manifest revision pointed at by `tag`.
    pub fn add_image(&self, repo: &str, tag: &str, config: &[u8], layers: &[&[u8]]) -> Digest {
        let digest = self.add_untagged_image(repo, config, layers);
        self.link_tag(repo, tag, &digest);
        digest
    }

    /// Same as [`RegistryFixture::add_image`] without the tag link.
    pub fn add_untagged_image(&self, repo: &str, config: &[u8], layers: &[&[u8]]) -> Digest {
        let config_digest = self.write_blob(config);
        let mut layer_entries = Vec::new();
        for layer in layers {
            let layer_digest = self.write_blob(layer);
            self.link_layer(repo, &layer_digest);
            layer_entries.push(json!({
                "mediaType": mediatype::DOCKER_LAYER,
                "size": layer.len(),
                "digest": layer_digest.to_string(),
            }));
        }
        let manifest = json!({
            "schemaVersion": 2,
            "mediaType": mediatype::DOCKER_MANIFEST_V2,
            "config": {
                "mediaType": mediatype::DOCKER_CONFIG,
                "size": config.len(),
                "digest": config_digest.to_string(),
            },
            "layers": layer_entries,
        });
        self.write_manifest(repo, manifest.to_string().as_bytes())
    }

    /// Build a manifest list revision over existing child digests.
    ///
    /// Children are recorded with fixed placeholder sizes; the importer only
    /// follows the digests.
    pub fn add_manifest_list(&self, repo: &str, tag: &str, children: &[&Digest]) -> Digest {
        let entries: Vec<_> = children
            .iter()
            .map(|child| {
                json!({
                    "mediaType": mediatype::DOCKER_MANIFEST_V2,
                    "size": 528,
                    "digest": child.to_string(),
                })
            })
            .collect();
        let list = json!({
            "schemaVersion": 2,
            "mediaType": mediatype::DOCKER_MANIFEST_LIST,
            "manifests": entries,
        });
        let digest = self.write_manifest(repo, list.to_string().as_bytes());
        self.link_tag(repo, tag, &digest);
        digest
    }

    /// Build a schema-1 signed manifest revision pointed at by `tag`.
    pub fn add_schema1(&self, repo: &str, tag: &str) -> Digest {
        let manifest = json!({
            "schemaVersion": 1,
            "name": repo,
            "tag": tag,
            "fsLayers": [],
            "history": [],
            "signatures": [],
        });
        let digest = self.write_manifest(repo, manifest.to_string().as_bytes());
        self.link_tag(repo, tag, &digest);
        digest
    }
}
