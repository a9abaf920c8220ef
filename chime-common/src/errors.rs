//! Error types for settings and install operations.
//!
//! Every error carries a stable code for log searches and user reports.
//!
//! | Code      | Meaning                                             |
//! |-----------|-----------------------------------------------------|
//! | E001      | Settings document is corrupted (JSON or schema)     |
//! | E002      | Settings document could not be read or written      |
//! | E003      | Lock could not be acquired                          |
//! | E004      | Settings document changed by another writer         |
//! | E005      | Config or script artifact could not be written      |

use crate::lock::LockError;
use std::fmt;
use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Files the installer writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Artifact {
    Config,
    Script,
}

impl fmt::Display for Artifact {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Artifact::Config => write!(f, "config"),
            Artifact::Script => write!(f, "hook script"),
        }
    }
}

/// Errors from [`SettingsRepository`](crate::settings::SettingsRepository).
#[derive(Debug, Error)]
pub enum SettingsError {
    /// The document is not valid JSON, has duplicate keys, or violates the
    /// hooks schema. Nothing was written.
    #[error("Settings document {path:?} is corrupted: {reason}")]
    Corrupted { path: PathBuf, reason: String },

    #[error("Failed to {action} settings document {path:?}: {source}")]
    Io {
        path: PathBuf,
        action: &'static str,
        #[source]
        source: io::Error,
    },

    #[error(transparent)]
    Lock(#[from] LockError),
}

impl SettingsError {
    pub fn code(&self) -> &'static str {
        match self {
            SettingsError::Corrupted { .. } => "CHIME-E001",
            SettingsError::Io { .. } => "CHIME-E002",
            SettingsError::Lock(_) => "CHIME-E003",
        }
    }

    pub fn is_corrupted(&self) -> bool {
        matches!(self, SettingsError::Corrupted { .. })
    }
}

/// Errors from [`Installer`](crate::installer::Installer).
#[derive(Debug, Error)]
pub enum InstallError {
    #[error(transparent)]
    Lock(#[from] LockError),

    /// Another process modified the settings document mid-install. Files
    /// written by this attempt have been removed; retrying is safe.
    #[error("Settings document {path:?} was modified by another process during install")]
    ExternalConflict { path: PathBuf },

    #[error("Failed to write {artifact} {path:?}: {source}")]
    Write {
        artifact: Artifact,
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error(transparent)]
    Settings(#[from] SettingsError),
}

impl InstallError {
    pub fn code(&self) -> &'static str {
        match self {
            InstallError::Lock(_) => "CHIME-E003",
            InstallError::ExternalConflict { .. } => "CHIME-E004",
            InstallError::Write { .. } => "CHIME-E005",
            InstallError::Settings(e) => e.code(),
        }
    }

    /// Whether running the same operation again may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            InstallError::ExternalConflict { .. }
                | InstallError::Lock(LockError::Contended { .. })
                | InstallError::Settings(SettingsError::Lock(LockError::Contended { .. }))
        )
    }
}
