//! Manifest payload parsing.
//!
//! A manifest payload is an opaque JSON byte string whose digest addresses
//! it. Parsing classifies the payload into one of four variants: the legacy
//! schema-1 signed manifest (recognized only to be rejected), a schema-2 /
//! OCI image manifest, a manifest list / image index, or a buildkit cache
//! index (a nonconformant index that converts into an image manifest).

use serde::Deserialize;
use thiserror::Error;

/// Media types the registry knows about.
pub mod mediatype {
    pub const DOCKER_MANIFEST_V1: &str = "application/vnd.docker.distribution.manifest.v1+json";
    pub const DOCKER_MANIFEST_V1_SIGNED: &str =
        "application/vnd.docker.distribution.manifest.v1+prettyjws";
    pub const DOCKER_MANIFEST_V2: &str = "application/vnd.docker.distribution.manifest.v2+json";
    pub const DOCKER_MANIFEST_LIST: &str =
        "application/vnd.docker.distribution.manifest.list.v2+json";
    pub const DOCKER_CONFIG: &str = "application/vnd.docker.container.image.v1+json";
    pub const DOCKER_LAYER: &str = "application/vnd.docker.image.rootfs.diff.tar.gzip";
    pub const DOCKER_FOREIGN_LAYER: &str =
        "application/vnd.docker.image.rootfs.foreign.diff.tar.gzip";

    pub const OCI_MANIFEST: &str = "application/vnd.oci.image.manifest.v1+json";
    pub const OCI_INDEX: &str = "application/vnd.oci.image.index.v1+json";
    pub const OCI_CONFIG: &str = "application/vnd.oci.image.config.v1+json";
    pub const OCI_LAYER: &str = "application/vnd.oci.image.layer.v1.tar+gzip";
    pub const OCI_LAYER_NONDISTRIBUTABLE: &str =
        "application/vnd.oci.image.layer.nondistributable.v1.tar";
    pub const OCI_LAYER_NONDISTRIBUTABLE_GZIP: &str =
        "application/vnd.oci.image.layer.nondistributable.v1.tar+gzip";
    pub const OCI_LAYER_NONDISTRIBUTABLE_ZSTD: &str =
        "application/vnd.oci.image.layer.nondistributable.v1.tar+zstd";

    pub const BUILDKIT_CACHE_CONFIG: &str = "application/vnd.buildkit.cacheconfig.v0";
    pub const OCTET_STREAM: &str = "application/octet-stream";
}

/// Errors raised while classifying a manifest payload.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum PayloadError {
    /// Zero-length (or whitespace-only) payload.
    #[error("empty manifest payload")]
    Empty,

    /// Payload is not valid JSON or carries invalid fields.
    #[error("malformed manifest payload: {0}")]
    Json(#[from] serde_json::Error),

    /// Valid JSON that matches none of the known manifest shapes.
    #[error("unrecognized manifest payload format")]
    UnknownFormat,
}

/// A content descriptor: a typed, sized pointer to another blob or manifest.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Descriptor {
    #[serde(default)]
    pub media_type: Option<String>,
    pub digest: crate::Digest,
    pub size: i64,
}

impl Descriptor {
    /// The descriptor's media type, or the given fallback when absent.
    pub fn media_type_or<'a>(&'a self, fallback: &'a str) -> &'a str {
        self.media_type.as_deref().unwrap_or(fallback)
    }
}

/// A schema-2 / OCI image manifest: one configuration and an ordered set of
/// layers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageManifest {
    pub schema_version: i32,
    pub media_type: String,
    pub config: Descriptor,
    pub layers: Vec<Descriptor>,
}

const NON_DISTRIBUTABLE_LAYER_TYPES: &[&str] = &[
    mediatype::DOCKER_FOREIGN_LAYER,
    mediatype::OCI_LAYER_NONDISTRIBUTABLE,
    mediatype::OCI_LAYER_NONDISTRIBUTABLE_GZIP,
    mediatype::OCI_LAYER_NONDISTRIBUTABLE_ZSTD,
];

impl ImageManifest {
    /// Configuration size plus the sum of all layer sizes.
    pub fn total_size(&self) -> i64 {
        self.config.size + self.layers.iter().map(|l| l.size).sum::<i64>()
    }

    /// Whether any layer carries a foreign / non-distributable media type.
    pub fn has_non_distributable_layers(&self) -> bool {
        self.layers.iter().any(|l| {
            l.media_type
                .as_deref()
                .is_some_and(|mt| NON_DISTRIBUTABLE_LAYER_TYPES.contains(&mt))
        })
    }
}

/// A manifest list / image index: references to per-platform manifests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestList {
    pub schema_version: i32,
    pub media_type: String,
    pub manifests: Vec<Descriptor>,
}

/// The classified manifest payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ManifestVariant {
    /// Legacy signed manifest. Never stored; callers skip it.
    SchemaV1,
    Image(ImageManifest),
    List(ManifestList),
    /// A buildkit cache index, already converted to the image manifest it
    /// encodes. Rows created from it must be flagged non-conformant.
    BuildkitCache(ImageManifest),
}

// Loose shape probed before committing to a variant. Unknown fields are
// ignored so platform/annotation noise never fails classification.
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct Probe {
    #[serde(default)]
    schema_version: Option<i32>,
    #[serde(default)]
    media_type: Option<String>,
    #[serde(default)]
    fs_layers: Option<serde_json::Value>,
    #[serde(default)]
    signatures: Option<serde_json::Value>,
    #[serde(default)]
    manifests: Option<Vec<Descriptor>>,
    #[serde(default)]
    config: Option<Descriptor>,
    #[serde(default)]
    layers: Option<Vec<Descriptor>>,
}

impl Probe {
    fn is_schema1(&self) -> bool {
        matches!(
            self.media_type.as_deref(),
            Some(mediatype::DOCKER_MANIFEST_V1) | Some(mediatype::DOCKER_MANIFEST_V1_SIGNED)
        ) || self.schema_version == Some(1)
            || self.fs_layers.is_some()
            || self.signatures.is_some()
    }

    fn is_list(&self) -> bool {
        matches!(
            self.media_type.as_deref(),
            Some(mediatype::DOCKER_MANIFEST_LIST) | Some(mediatype::OCI_INDEX)
        ) || self.manifests.is_some()
    }

    // Buildx exports cache manifests as an OCI index with a nonstandard
    // `config` descriptor and layer entries under `manifests`. Best-effort
    // recognition; converted manifests are always flagged non-conformant.
    fn is_buildkit_cache(&self) -> bool {
        self.config
            .as_ref()
            .and_then(|c| c.media_type.as_deref())
            .is_some_and(|mt| mt == mediatype::BUILDKIT_CACHE_CONFIG)
    }
}

/// Classify a raw manifest payload.
pub fn parse(payload: &[u8]) -> Result<ManifestVariant, PayloadError> {
    if payload.iter().all(|b| b.is_ascii_whitespace()) {
        return Err(PayloadError::Empty);
    }
    let probe: Probe = serde_json::from_slice(payload)?;

    if probe.is_schema1() {
        return Ok(ManifestVariant::SchemaV1);
    }

    let schema_version = probe.schema_version.unwrap_or(2);

    if probe.is_list() {
        if probe.is_buildkit_cache() {
            let config = probe.config.ok_or(PayloadError::UnknownFormat)?;
            return Ok(ManifestVariant::BuildkitCache(ImageManifest {
                schema_version,
                media_type: mediatype::OCI_MANIFEST.to_string(),
                config,
                layers: probe.manifests.unwrap_or_default(),
            }));
        }
        return Ok(ManifestVariant::List(ManifestList {
            schema_version,
            // indexes produced without a mediaType normalize to OCI
            media_type: probe
                .media_type
                .unwrap_or_else(|| mediatype::OCI_INDEX.to_string()),
            manifests: probe.manifests.unwrap_or_default(),
        }));
    }

    if let Some(config) = probe.config {
        return Ok(ManifestVariant::Image(ImageManifest {
            schema_version,
            media_type: probe
                .media_type
                .unwrap_or_else(|| mediatype::OCI_MANIFEST.to_string()),
            config,
            layers: probe.layers.unwrap_or_default(),
        }));
    }

    Err(PayloadError::UnknownFormat)
}
