//! Entity records mirroring the relational schema.
//!
//! These are plain rows. All relational behavior (creation, lookup,
//! cascades, GC queue maintenance) lives in the store layer and in database
//! triggers; nothing here talks to the database.

use crate::digest::Digest;
use crate::migration::MigrationStatus;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Top-level path segment, e.g. `gitlab-org` in `gitlab-org/build/foo`.
///
/// The namespace id is the leading column of every child table's key and the
/// physical partition key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Namespace {
    pub id: i64,
    pub name: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
}

/// A named location holding manifests and tags.
///
/// Serializable because repository rows are cached in Redis by path.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Repository {
    pub id: i64,
    pub namespace_id: i64,
    pub name: String,
    pub path: String,
    pub parent_id: Option<i64>,
    pub migration_status: MigrationStatus,
    pub migration_error: Option<String>,
    /// Deduplicated size of all tagged layers, when a cache refresh has
    /// computed it.
    pub size: Option<i64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl Repository {
    /// Leading path segment; always equals the owning namespace's name.
    pub fn top_level(&self) -> &str {
        self.path.split('/').next().unwrap_or(&self.path)
    }

    /// Whether the path has no `/`, i.e. the repository sits directly at the
    /// namespace root.
    pub fn is_top_level(&self) -> bool {
        !self.path.contains('/')
    }
}

/// A content-addressed payload stored in the external blob store.
///
/// Globally unique by digest; membership in a repository is a separate
/// `repository_blobs` link row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Blob {
    pub digest: Digest,
    pub media_type: String,
    pub size: i64,
    pub created_at: DateTime<Utc>,
}

/// The configuration blob embedded in an image manifest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Configuration {
    pub media_type: String,
    pub digest: Digest,
    /// Raw configuration payload, cached on the manifest row only when the
    /// blob is at most [`MAX_CACHED_CONFIG_SIZE`] bytes.
    pub payload: Option<Bytes>,
}

/// Configuration payloads above this size are not cached on the manifest row.
pub const MAX_CACHED_CONFIG_SIZE: usize = 256 * 1024;

/// An image manifest or image index row.
#[derive(Debug, Clone, PartialEq)]
pub struct Manifest {
    pub namespace_id: i64,
    pub repository_id: i64,
    pub id: i64,
    pub schema_version: i32,
    pub media_type: String,
    pub digest: Digest,
    pub payload: Bytes,
    pub configuration: Option<Configuration>,
    pub non_conformant: bool,
    pub non_distributable_layers: bool,
    pub total_size: i64,
    pub created_at: DateTime<Utc>,
}

/// One layer blob referenced by a manifest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Layer {
    pub namespace_id: i64,
    pub repository_id: i64,
    pub manifest_id: i64,
    pub id: i64,
    pub digest: Digest,
    pub size: i64,
    pub media_type: String,
    pub created_at: DateTime<Utc>,
}

/// Mutable pointer from a name to a manifest within a repository.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tag {
    pub namespace_id: i64,
    pub repository_id: i64,
    pub id: i64,
    pub name: String,
    pub manifest_id: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
}

/// Queued review of a blob digest, maintained by triggers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GCBlobTask {
    pub digest: Digest,
    pub review_after: DateTime<Utc>,
    pub review_count: i32,
    pub event: String,
    pub created_at: DateTime<Utc>,
}

/// Queued review of a manifest, maintained by triggers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GCManifestTask {
    pub namespace_id: i64,
    pub repository_id: i64,
    pub manifest_id: i64,
    pub review_after: DateTime<Utc>,
    pub review_count: i32,
    pub event: String,
    pub created_at: DateTime<Utc>,
}

/// Link from a manifest to its configuration blob, used by the blob
/// reachability predicate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GCConfigLink {
    pub id: i64,
    pub namespace_id: i64,
    pub repository_id: i64,
    pub manifest_id: i64,
    pub digest: Digest,
}

/// Link from a layer row to its blob, used by the blob reachability
/// predicate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GCLayerLink {
    pub id: i64,
    pub namespace_id: i64,
    pub repository_id: i64,
    pub layer_id: i64,
    pub digest: Digest,
}

/// Per-event default review delay applied by the enqueueing triggers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GCReviewAfterDefault {
    pub event: String,
    /// Delay in seconds; the column is a Postgres interval.
    pub value_seconds: i64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn repository(path: &str) -> Repository {
        Repository {
            id: 1,
            namespace_id: 1,
            name: path.rsplit('/').next().unwrap_or(path).to_string(),
            path: path.to_string(),
            parent_id: None,
            migration_status: MigrationStatus::Native,
            migration_error: None,
            size: None,
            created_at: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
            updated_at: None,
            deleted_at: None,
        }
    }

    #[test]
    fn test_repository_top_level() {
        assert_eq!(repository("gitlab-org/build/foo").top_level(), "gitlab-org");
        assert_eq!(repository("solo").top_level(), "solo");
    }

    #[test]
    fn test_repository_is_top_level() {
        assert!(repository("solo").is_top_level());
        assert!(!repository("a/b").is_top_level());
    }

    #[test]
    fn test_repository_cache_roundtrip() {
        let repo = repository("gitlab-org/build/foo");
        let json = serde_json::to_string(&repo).unwrap();
        let back: Repository = serde_json::from_str(&json).unwrap();
        assert_eq!(back, repo);
    }
}
