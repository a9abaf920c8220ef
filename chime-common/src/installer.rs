//! Install/uninstall orchestration across the config file, the hook script
//! and the shared settings document.
//!
//! There is no multi-file transaction on a plain filesystem, so write order
//! stands in for one:
//!
//! - **install** writes config, then script, then settings. Settings go last
//!   so a failure there leaves shared state untouched; only chime's own
//!   files need rolling back.
//! - **uninstall** edits settings first, then deletes the files. Once the
//!   document no longer references the script, a leftover script is harmless.
//!
//! Both run inside one coordination lock and never interleave.

use crate::errors::{Artifact, InstallError, SettingsError};
use crate::fs::FileAccess;
use crate::lock::LockManager;
use crate::settings::SettingsRepository;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tracing::{debug, info, warn};

/// Permission bits for the generated hook script.
pub const SCRIPT_MODE: u32 = 0o755;

/// Everything one install writes.
#[derive(Debug, Clone)]
pub struct InstallRequest {
    /// Where the hook script is written.
    pub script_path: PathBuf,
    /// How the settings document refers to the script.
    pub script_document_path: String,
    pub config_path: PathBuf,
    pub config_content: String,
    pub script_content: String,
}

/// What happened to the settings document during uninstall.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SettingsCleanup {
    Removed,
    NothingToRemove,
    /// The document was corrupted and left untouched. The artifact deletions
    /// still ran.
    Corrupted(String),
}

/// An artifact uninstall could not delete.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Leftover {
    pub artifact: Artifact,
    pub path: PathBuf,
    pub error: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UninstallReport {
    pub settings: SettingsCleanup,
    pub leftovers: Vec<Leftover>,
}

impl UninstallReport {
    /// True when the document was handled and every artifact is gone.
    pub fn is_clean(&self) -> bool {
        !matches!(self.settings, SettingsCleanup::Corrupted(_)) && self.leftovers.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum InstallStage {
    Start,
    ConfigWritten,
    ScriptWritten,
    SettingsWritten,
}

/// Progress of a single install attempt.
struct Attempt {
    stage: InstallStage,
    written: Vec<(Artifact, PathBuf)>,
}

impl Attempt {
    fn new() -> Self {
        Self {
            stage: InstallStage::Start,
            written: Vec::with_capacity(2),
        }
    }

    fn advance(&mut self, next: InstallStage) {
        debug!("Install stage {:?} -> {:?}", self.stage, next);
        self.stage = next;
    }
}

/// Sequences writes and deletes under the coordination lock.
pub struct Installer<F> {
    fs: F,
    repository: SettingsRepository<F>,
    locks: LockManager,
    lock_path: PathBuf,
}

impl<F: FileAccess> Installer<F> {
    pub fn new(fs: F, repository: SettingsRepository<F>, lock_path: impl Into<PathBuf>) -> Self {
        Self {
            fs,
            repository,
            locks: LockManager::default(),
            lock_path: lock_path.into(),
        }
    }

    pub fn with_lock_manager(mut self, locks: LockManager) -> Self {
        self.locks = locks;
        self
    }

    pub async fn is_installed(&self) -> Result<bool, SettingsError> {
        self.repository.is_installed().await
    }

    /// Write config, script and settings in that order.
    ///
    /// On failure every file written by this attempt is deleted again before
    /// the error is returned.
    pub async fn install(&self, request: &InstallRequest) -> Result<(), InstallError> {
        self.locks
            .with_lock(&self.lock_path, move || async move {
                let mut attempt = Attempt::new();
                let result = self.run_install(request, &mut attempt).await;
                match &result {
                    Ok(()) => info!("Installed chime ({:?})", request.script_path),
                    Err(e) => {
                        warn!("Install failed at {:?}: {}", attempt.stage, e);
                        self.rollback(&attempt.written).await;
                    }
                }
                result
            })
            .await
    }

    async fn run_install(
        &self,
        request: &InstallRequest,
        attempt: &mut Attempt,
    ) -> Result<(), InstallError> {
        let before = self.settings_mtime().await?;

        self.write_artifact(
            Artifact::Config,
            &request.config_path,
            request.config_content.as_bytes(),
            None,
        )
        .await?;
        attempt
            .written
            .push((Artifact::Config, request.config_path.clone()));
        attempt.advance(InstallStage::ConfigWritten);

        self.write_artifact(
            Artifact::Script,
            &request.script_path,
            request.script_content.as_bytes(),
            Some(SCRIPT_MODE),
        )
        .await?;
        attempt
            .written
            .push((Artifact::Script, request.script_path.clone()));
        attempt.advance(InstallStage::ScriptWritten);

        let current = self.settings_mtime().await?;
        if let (Some(before), Some(current)) = (before, current)
            && before != current
        {
            return Err(InstallError::ExternalConflict {
                path: self.repository.path().to_path_buf(),
            });
        }

        self.repository
            .install(&request.script_document_path)
            .await?;
        attempt.advance(InstallStage::SettingsWritten);
        Ok(())
    }

    /// Remove chime's entries from settings, then delete config and script.
    ///
    /// A corrupted settings document does not stop the deletions; it is
    /// reported in [`UninstallReport::settings`]. Any other settings failure
    /// aborts before files are touched so the document never references a
    /// deleted script.
    pub async fn uninstall(
        &self,
        script_path: &Path,
        config_path: &Path,
    ) -> Result<UninstallReport, InstallError> {
        self.locks
            .with_lock(&self.lock_path, move || async move {
                let settings = match self.repository.uninstall().await {
                    Ok(true) => SettingsCleanup::Removed,
                    Ok(false) => SettingsCleanup::NothingToRemove,
                    Err(SettingsError::Corrupted { reason, .. }) => {
                        warn!("Leaving corrupted settings document untouched: {}", reason);
                        SettingsCleanup::Corrupted(reason)
                    }
                    Err(e) => return Err(InstallError::from(e)),
                };

                let mut leftovers = Vec::new();
                for (artifact, path) in [(Artifact::Config, config_path), (Artifact::Script, script_path)] {
                    if let Err(e) = self.fs.delete(path).await {
                        warn!("Failed to delete {} {:?}: {}", artifact, path, e);
                        leftovers.push(Leftover {
                            artifact,
                            path: path.to_path_buf(),
                            error: e.to_string(),
                        });
                    }
                }

                let report = UninstallReport {
                    settings,
                    leftovers,
                };
                if report.is_clean() {
                    info!("Uninstalled chime");
                }
                Ok::<_, InstallError>(report)
            })
            .await
    }

    async fn write_artifact(
        &self,
        artifact: Artifact,
        path: &Path,
        content: &[u8],
        mode: Option<u32>,
    ) -> Result<(), InstallError> {
        self.fs
            .write_atomic(path, content, mode)
            .await
            .map_err(|source| InstallError::Write {
                artifact,
                path: path.to_path_buf(),
                source,
            })
    }

    async fn settings_mtime(&self) -> Result<Option<SystemTime>, InstallError> {
        let path = self.repository.path();
        self.fs.mtime_or_none(path).await.map_err(|source| {
            SettingsError::Io {
                path: path.to_path_buf(),
                action: "stat",
                source,
            }
            .into()
        })
    }

    /// Best effort: every file is attempted even if an earlier delete failed.
    async fn rollback(&self, written: &[(Artifact, PathBuf)]) {
        for (artifact, path) in written {
            match self.fs.delete(path).await {
                Ok(()) => debug!("Rolled back {} {:?}", artifact, path),
                Err(e) => warn!("Failed to roll back {} {:?}: {}", artifact, path, e),
            }
        }
    }
}
