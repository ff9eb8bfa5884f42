//! Core domain types for the stevedore registry metadata store.
//!
//! This crate carries everything the database, garbage-collection, cache, and
//! importer crates agree on: content-address digests, the entity records that
//! mirror the relational schema, the sum-typed manifest payload parser, the
//! repository reference (path) rules, and the per-repository migration
//! lifecycle.
//!
//! # See Also
//!
//! - [`stevedore-postgres`](https://docs.rs/stevedore-postgres) - Stores and schema
//! - [`stevedore-gc`](https://docs.rs/stevedore-gc) - Online garbage collection workers
//! - [`stevedore-importer`](https://docs.rs/stevedore-importer) - Filesystem-to-database importer

pub mod digest;
pub mod manifest;
pub mod migration;
pub mod models;
pub mod reference;

pub use digest::{Algorithm, Digest, DigestError};
pub use manifest::{
    mediatype, Descriptor, ImageManifest, ManifestList, ManifestVariant, PayloadError,
};
pub use migration::{MigrationPath, MigrationStatus, MIGRATION_PATH_HEADER};
pub use models::{
    Blob, Configuration, GCBlobTask, GCConfigLink, GCLayerLink, GCManifestTask,
    GCReviewAfterDefault, Layer, Manifest, Namespace, Repository, Tag, MAX_CACHED_CONFIG_SIZE,
};
pub use reference::{ReferenceError, RepositoryPath, MAX_PATH_LENGTH};
