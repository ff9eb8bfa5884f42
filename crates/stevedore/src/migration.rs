//! Per-repository migration lifecycle.
//!
//! Repositories bootstrapped from a legacy filesystem registry move through
//! these states while the importer works on them. Online request handlers use
//! the state to route a request to the legacy or the database-backed code
//! path.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Request header carrying the routing decision for a repository.
pub const MIGRATION_PATH_HEADER: &str = "Gitlab-Migration-Path";

#[derive(Debug, Error)]
#[error("unknown migration status: {0:?}")]
pub struct UnknownMigrationStatus(String);

/// Lifecycle states of a repository with respect to the metadata import.
///
/// `Native` and `ImportComplete` are the two terminal "on database" states;
/// everything else gates the legacy/new code path router.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MigrationStatus {
    Native,
    PreImportInProgress,
    PreImportComplete,
    PreImportFailed,
    PreImportCanceled,
    ImportInProgress,
    ImportComplete,
    ImportFailed,
    ImportCanceled,
}

impl MigrationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            MigrationStatus::Native => "native",
            MigrationStatus::PreImportInProgress => "pre_import_in_progress",
            MigrationStatus::PreImportComplete => "pre_import_complete",
            MigrationStatus::PreImportFailed => "pre_import_failed",
            MigrationStatus::PreImportCanceled => "pre_import_canceled",
            MigrationStatus::ImportInProgress => "import_in_progress",
            MigrationStatus::ImportComplete => "import_complete",
            MigrationStatus::ImportFailed => "import_failed",
            MigrationStatus::ImportCanceled => "import_canceled",
        }
    }

    /// Whether reads and writes for the repository are served from the
    /// database.
    pub fn on_database(&self) -> bool {
        matches!(
            self,
            MigrationStatus::Native | MigrationStatus::ImportComplete
        )
    }

    /// Whether a concurrent control-plane actor canceled the (pre-)import.
    pub fn canceled(&self) -> bool {
        matches!(
            self,
            MigrationStatus::ImportCanceled | MigrationStatus::PreImportCanceled
        )
    }

    /// The routing value a handler should attach to requests for a
    /// repository in this state.
    pub fn path(&self) -> MigrationPath {
        if self.on_database() {
            MigrationPath::New
        } else {
            MigrationPath::Old
        }
    }
}

impl FromStr for MigrationStatus {
    type Err = UnknownMigrationStatus;

    fn from_str(s: &str) -> Result<Self, UnknownMigrationStatus> {
        match s {
            "native" => Ok(MigrationStatus::Native),
            "pre_import_in_progress" => Ok(MigrationStatus::PreImportInProgress),
            "pre_import_complete" => Ok(MigrationStatus::PreImportComplete),
            "pre_import_failed" => Ok(MigrationStatus::PreImportFailed),
            "pre_import_canceled" => Ok(MigrationStatus::PreImportCanceled),
            "import_in_progress" => Ok(MigrationStatus::ImportInProgress),
            "import_complete" => Ok(MigrationStatus::ImportComplete),
            "import_failed" => Ok(MigrationStatus::ImportFailed),
            "import_canceled" => Ok(MigrationStatus::ImportCanceled),
            other => Err(UnknownMigrationStatus(other.to_string())),
        }
    }
}

impl fmt::Display for MigrationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Value of the [`MIGRATION_PATH_HEADER`] request header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MigrationPath {
    /// Serve from the legacy filesystem code path.
    Old,
    /// Serve from the database-backed code path.
    New,
}

impl MigrationPath {
    pub fn as_str(&self) -> &'static str {
        match self {
            MigrationPath::Old => "old",
            MigrationPath::New => "new",
        }
    }
}

impl fmt::Display for MigrationPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
