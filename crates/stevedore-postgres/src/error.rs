//! Error types for the store layer.

use thiserror::Error;
use tokio_postgres::error::SqlState;

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced by the store layer.
///
/// Callers match on the variant, never on the message. Row absence is not an
/// error: reads return `Ok(None)`.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// Driver or server error that carries no dedicated variant.
    #[error("database error: {0}")]
    Postgres(#[from] tokio_postgres::Error),

    /// Insert conflicted with a unique constraint.
    #[error("row violates a unique constraint")]
    UniqueViolation,

    /// Tried to associate a manifest list with a child that does not exist.
    #[error("referenced manifest not found")]
    RefManifestNotFound,

    /// Tried to delete a manifest that a manifest list still references.
    #[error("manifest referenced by a manifest list")]
    ManifestReferencedInList,

    /// Tried to associate a manifest with itself.
    #[error("cannot associate a manifest with itself")]
    SelfReferencedManifest,

    /// Media type not present in the `media_types` dictionary.
    #[error("unknown media type: {0}")]
    UnknownMediaType(String),

    /// The size-with-descendants query timed out within the last 24 hours;
    /// the database was not queried.
    #[error("size with descendants query timed out recently, skipping")]
    SizeHasTimedOut,

    /// Estimated sizes are defined for top-level repositories only.
    #[error("size estimates are only available for top-level repositories")]
    OnlyRootEstimates,

    /// A digest column failed to parse. Indicates row corruption.
    #[error("invalid digest in database: {0}")]
    Digest(#[from] stevedore::DigestError),

    /// A migration status column holds an unknown value.
    #[error(transparent)]
    MigrationStatus(#[from] stevedore::migration::UnknownMigrationStatus),
}

impl Error {
    /// Map an insert failure, folding unique-constraint conflicts into
    /// [`Error::UniqueViolation`].
    pub(crate) fn from_insert(e: tokio_postgres::Error) -> Error {
        if is_unique_violation(&e) {
            Error::UniqueViolation
        } else {
            Error::Postgres(e)
        }
    }
}

/// Whether the error is a unique-constraint violation (SQLSTATE 23505).
pub fn is_unique_violation(e: &tokio_postgres::Error) -> bool {
    e.code() == Some(&SqlState::UNIQUE_VIOLATION)
}

/// For foreign-key violations (SQLSTATE 23503), the table holding the
/// violated constraint.
pub fn fk_violation_table(e: &tokio_postgres::Error) -> Option<&str> {
    if e.code() != Some(&SqlState::FOREIGN_KEY_VIOLATION) {
        return None;
    }
    e.as_db_error().and_then(|db| db.table())
}

/// Whether the server canceled the statement, typically because
/// `statement_timeout` elapsed (SQLSTATE 57014).
pub fn is_statement_canceled(e: &tokio_postgres::Error) -> bool {
    e.code() == Some(&SqlState::QUERY_CANCELED)
}
