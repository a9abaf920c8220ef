//! Shared core for chime.
//!
//! chime installs sound-notification hooks into an agent CLI's
//! `settings.json`. That file is shared with the user and with other tools,
//! so every change goes through a validating read-merge-write cycle, and the
//! three files an install touches are written in a fixed order under a
//! cooperative lock.
//!
//! - [`fs`]: file access port (atomic writes, idempotent deletes)
//! - [`lock`]: lock files with retry, backoff and stale-lock reclamation
//! - [`settings`]: the settings document repository
//! - [`installer`]: install/uninstall orchestration
//! - [`config`]: `CHIME_*` environment configuration

pub mod config;
pub mod errors;
pub mod fs;
pub mod installer;
pub mod lock;
pub mod settings;

pub use config::ChimeConfig;
pub use errors::{Artifact, InstallError, SettingsError};
pub use fs::{FileAccess, LocalFs};
pub use installer::{InstallRequest, Installer, Leftover, SettingsCleanup, UninstallReport};
pub use lock::{LockError, LockManager, LockPolicy};
pub use settings::{HookIdentity, SettingsRepository};
