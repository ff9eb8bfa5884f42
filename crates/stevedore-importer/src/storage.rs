//! Seams to the legacy registry storage.
//!
//! The importer reads the filesystem-layout metadata through
//! [`RegistryStorage`] and the content store through [`BlobEnumerator`] /
//! [`BlobStatter`]; copies to the destination store go through
//! [`BlobTransferService`]. [`FilesystemStorage`] implements the read side
//! over the classic on-disk layout:
//!
//! ```text
//! <root>/docker/registry/v2/repositories/<path>/_manifests/tags/<tag>/current/link
//! <root>/docker/registry/v2/repositories/<path>/_manifests/revisions/<alg>/<hex>/link
//! <root>/docker/registry/v2/repositories/<path>/_layers/<alg>/<hex>/link
//! <root>/docker/registry/v2/blobs/<alg>/<hex[0..2]>/<hex>/data
//! ```

use async_trait::async_trait;
use bytes::Bytes;
use std::path::{Path, PathBuf};
use stevedore::{Digest, DigestError};
use thiserror::Error;
use tokio::fs;

/// Errors raised by the storage seams.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum StorageError {
    /// A file or directory required for the operation does not exist.
    #[error("path not found: {0}")]
    PathNotFound(String),

    /// The repository directory itself does not exist.
    #[error("repository not found: {0}")]
    RepositoryUnknown(String),

    /// A link file exists but does not hold a valid digest.
    #[error("invalid digest in link file {path}: {source}")]
    InvalidDigestLink {
        path: String,
        #[source]
        source: DigestError,
    },

    #[error("storage io error at {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

impl StorageError {
    fn io(path: &Path, source: std::io::Error) -> StorageError {
        let path = path.to_string_lossy().into_owned();
        if source.kind() == std::io::ErrorKind::NotFound {
            StorageError::PathNotFound(path)
        } else {
            StorageError::Io { path, source }
        }
    }
}

/// Errors raised while copying a blob to the destination store.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum TransferError {
    /// The destination already holds the blob. Callers treat this as a
    /// successful no-op.
    #[error("blob already exists in the destination store")]
    BlobExists,

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("blob transfer failed: {0}")]
    Failed(String),
}

/// Read access to the legacy metadata layout.
#[async_trait]
pub trait RegistryStorage: Send + Sync {
    /// Every repository path on the filesystem, sorted.
    async fn repositories(&self) -> Result<Vec<String>, StorageError>;

    /// Tag names of one repository. A missing tags directory is zero tags,
    /// not an error; a missing repository is [`StorageError::RepositoryUnknown`].
    async fn tags(&self, repo_path: &str) -> Result<Vec<String>, StorageError>;

    /// The manifest digest a tag points at.
    async fn tag_link(&self, repo_path: &str, tag: &str) -> Result<Digest, StorageError>;

    /// Every manifest revision recorded for the repository, tagged or not.
    async fn manifest_revisions(&self, repo_path: &str) -> Result<Vec<Digest>, StorageError>;

    /// The payload of a manifest revision. The revision link must exist;
    /// otherwise [`StorageError::PathNotFound`].
    async fn manifest_payload(
        &self,
        repo_path: &str,
        digest: &Digest,
    ) -> Result<Bytes, StorageError>;

    /// Whether the repository holds a layer link for the digest. A corrupt
    /// link file is an error, a missing one is `Ok(false)`.
    async fn layer_linked(&self, repo_path: &str, digest: &Digest) -> Result<bool, StorageError>;

    /// Raw content of a blob in the content store.
    async fn blob_payload(&self, digest: &Digest) -> Result<Bytes, StorageError>;
}

/// Enumeration of every blob in the content store.
#[async_trait]
pub trait BlobEnumerator: Send + Sync {
    async fn blobs(&self) -> Result<Vec<Digest>, StorageError>;
}

/// Size lookup for one blob in the content store.
#[async_trait]
pub trait BlobStatter: Send + Sync {
    async fn stat(&self, digest: &Digest) -> Result<i64, StorageError>;
}

/// Copy of one blob into the destination store.
#[async_trait]
pub trait BlobTransferService: Send + Sync {
    async fn transfer(&self, digest: &Digest) -> Result<(), TransferError>;
}

/// [`RegistryStorage`] over the classic `docker/registry/v2` directory tree.
#[derive(Debug, Clone)]
pub struct FilesystemStorage {
    root: PathBuf,
}

impl FilesystemStorage {
    /// `root` is the directory containing `docker/registry/v2`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        FilesystemStorage { root: root.into() }
    }

    fn repositories_root(&self) -> PathBuf {
        self.root.join("docker/registry/v2/repositories")
    }

    fn repository_dir(&self, repo_path: &str) -> PathBuf {
        self.repositories_root().join(repo_path)
    }

    fn tag_link_path(&self, repo_path: &str, tag: &str) -> PathBuf {
        self.repository_dir(repo_path)
            .join("_manifests/tags")
            .join(tag)
            .join("current/link")
    }

    fn revision_link_path(&self, repo_path: &str, digest: &Digest) -> PathBuf {
        self.repository_dir(repo_path)
            .join("_manifests/revisions")
            .join(digest.algorithm().as_str())
            .join(digest.hex())
            .join("link")
    }

    fn layer_link_path(&self, repo_path: &str, digest: &Digest) -> PathBuf {
        self.repository_dir(repo_path)
            .join("_layers")
            .join(digest.algorithm().as_str())
            .join(digest.hex())
            .join("link")
    }

    fn blob_data_path(&self, digest: &Digest) -> PathBuf {
        self.root
            .join("docker/registry/v2/blobs")
            .join(digest.algorithm().as_str())
            .join(&digest.hex()[..2])
            .join(digest.hex())
            .join("data")
    }

    async fn read_link(&self, path: &Path) -> Result<Digest, StorageError> {
        let raw = fs::read_to_string(path)
            .await
            .map_err(|e| StorageError::io(path, e))?;
        raw.trim()
            .parse()
            .map_err(|e| StorageError::InvalidDigestLink {
                path: path.to_string_lossy().into_owned(),
                source: e,
            })
    }

    async fn require_repository(&self, repo_path: &str) -> Result<PathBuf, StorageError> {
        let dir = self.repository_dir(repo_path);
        match fs::metadata(&dir).await {
            Ok(meta) if meta.is_dir() => Ok(dir),
            Ok(_) => Err(StorageError::RepositoryUnknown(repo_path.to_string())),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(StorageError::RepositoryUnknown(repo_path.to_string()))
            }
            Err(e) => Err(StorageError::io(&dir, e)),
        }
    }

    async fn dir_names(&self, dir: &Path) -> Result<Vec<String>, StorageError> {
        let mut names = Vec::new();
        let mut entries = match fs::read_dir(dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(names),
            Err(e) => return Err(StorageError::io(dir, e)),
        };
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| StorageError::io(dir, e))?
        {
            names.push(entry.file_name().to_string_lossy().into_owned());
        }
        names.sort();
        Ok(names)
    }
}

#[async_trait]
impl RegistryStorage for FilesystemStorage {
    async fn repositories(&self) -> Result<Vec<String>, StorageError> {
        let root = self.repositories_root();
        let mut found = Vec::new();
        let mut pending = vec![root.clone()];
        while let Some(dir) = pending.pop() {
            let mut subdirs = Vec::new();
            let mut is_repository = false;
            let mut entries = match fs::read_dir(&dir).await {
                Ok(entries) => entries,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => return Err(StorageError::io(&dir, e)),
            };
            while let Some(entry) = entries
                .next_entry()
                .await
                .map_err(|e| StorageError::io(&dir, e))?
            {
                let name = entry.file_name().to_string_lossy().into_owned();
                let file_type = entry
                    .file_type()
                    .await
                    .map_err(|e| StorageError::io(&dir, e))?;
                if !file_type.is_dir() {
                    continue;
                }
                if name == "_manifests" {
                    is_repository = true;
                } else if !name.starts_with('_') {
                    subdirs.push(entry.path());
                }
            }
            if is_repository {
                if let Ok(rel) = dir.strip_prefix(&root) {
                    found.push(rel.to_string_lossy().into_owned());
                }
            }
            pending.extend(subdirs);
        }
        found.sort();
        Ok(found)
    }

    async fn tags(&self, repo_path: &str) -> Result<Vec<String>, StorageError> {
        let dir = self.require_repository(repo_path).await?;
        self.dir_names(&dir.join("_manifests/tags")).await
    }

    async fn tag_link(&self, repo_path: &str, tag: &str) -> Result<Digest, StorageError> {
        self.read_link(&self.tag_link_path(repo_path, tag)).await
    }

    async fn manifest_revisions(&self, repo_path: &str) -> Result<Vec<Digest>, StorageError> {
        let dir = self.require_repository(repo_path).await?;
        let revisions_dir = dir.join("_manifests/revisions");
        let mut digests = Vec::new();
        for algorithm in self.dir_names(&revisions_dir).await? {
            for hex in self.dir_names(&revisions_dir.join(&algorithm)).await? {
                // stray directories that do not name a digest are ignored
                if let Ok(digest) = format!("{algorithm}:{hex}").parse() {
                    digests.push(digest);
                }
            }
        }
        Ok(digests)
    }

    async fn manifest_payload(
        &self,
        repo_path: &str,
        digest: &Digest,
    ) -> Result<Bytes, StorageError> {
        let revision = self
            .read_link(&self.revision_link_path(repo_path, digest))
            .await?;
        let data = self.blob_data_path(&revision);
        let payload = fs::read(&data)
            .await
            .map_err(|e| StorageError::io(&data, e))?;
        Ok(Bytes::from(payload))
    }

    async fn layer_linked(&self, repo_path: &str, digest: &Digest) -> Result<bool, StorageError> {
        match self.read_link(&self.layer_link_path(repo_path, digest)).await {
            Ok(_) => Ok(true),
            Err(StorageError::PathNotFound(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    async fn blob_payload(&self, digest: &Digest) -> Result<Bytes, StorageError> {
        let data = self.blob_data_path(digest);
        let payload = fs::read(&data)
            .await
            .map_err(|e| StorageError::io(&data, e))?;
        Ok(Bytes::from(payload))
    }
}

#[async_trait]
impl BlobEnumerator for FilesystemStorage {
    async fn blobs(&self) -> Result<Vec<Digest>, StorageError> {
        let blobs_root = self.root.join("docker/registry/v2/blobs");
        let mut digests = Vec::new();
        for algorithm in self.dir_names(&blobs_root).await? {
            let algorithm_dir = blobs_root.join(&algorithm);
            for prefix in self.dir_names(&algorithm_dir).await? {
                for hex in self.dir_names(&algorithm_dir.join(&prefix)).await? {
                    if let Ok(digest) = format!("{algorithm}:{hex}").parse::<Digest>() {
                        digests.push(digest);
                    }
                }
            }
        }
        digests.sort_by_key(ToString::to_string);
        Ok(digests)
    }
}

#[async_trait]
impl BlobStatter for FilesystemStorage {
    async fn stat(&self, digest: &Digest) -> Result<i64, StorageError> {
        let data = self.blob_data_path(digest);
        let meta = fs::metadata(&data)
            .await
            .map_err(|e| StorageError::io(&data, e))?;
        Ok(meta.len() as i64)
    }
}
