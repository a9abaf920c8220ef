//! Configuration for chime.
//!
//! Values come from `CHIME_*` environment variables with defaults; file
//! locations are derived from the agent CLI's config directory.

pub mod env;

pub use env::{EnvError, EnvParser, expand_home};

use crate::fs::LocalFs;
use crate::installer::Installer;
use crate::lock::{LockManager, LockPolicy};
use crate::settings::{DEFAULT_TIMEOUT_SECS, HookIdentity, SettingsRepository};
use crate::settings::schema::{MAX_TIMEOUT_SECS, MIN_TIMEOUT_SECS};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

pub const SETTINGS_FILE: &str = "settings.json";
pub const CHIME_DIR: &str = "chime";
pub const SCRIPT_FILE: &str = "chime-hook.sh";
pub const CONFIG_FILE: &str = "config.json";
pub const INSTALL_LOCK_FILE: &str = ".install.lock";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Could not determine home directory; set CHIME_CLAUDE_DIR")]
    NoHomeDir,

    #[error("Invalid environment configuration:\n{}", format_env_errors(.0))]
    Env(Vec<EnvError>),
}

fn format_env_errors(errors: &[EnvError]) -> String {
    errors
        .iter()
        .map(|e| format!("  - {}", e))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Resolved chime configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChimeConfig {
    /// Directory holding the agent CLI's `settings.json`.
    pub claude_dir: PathBuf,
    pub hook_timeout_secs: u32,
    pub lock_policy: LockPolicy,
    pub log_level: String,
}

impl ChimeConfig {
    /// Defaults rooted at `claude_dir`.
    pub fn for_dir(claude_dir: impl Into<PathBuf>) -> Self {
        Self {
            claude_dir: claude_dir.into(),
            hook_timeout_secs: DEFAULT_TIMEOUT_SECS,
            lock_policy: LockPolicy::default(),
            log_level: "info".to_string(),
        }
    }

    /// Load from `CHIME_*` variables, reporting every invalid one.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut parser = EnvParser::new();
        let defaults = LockPolicy::default();

        let claude_dir = match parser.get_optional_path("CLAUDE_DIR") {
            Some(dir) => dir,
            None => dirs::home_dir()
                .map(|h| h.join(".claude"))
                .ok_or(ConfigError::NoHomeDir)?,
        };
        let hook_timeout_secs = parser.get_u32_range(
            "HOOK_TIMEOUT_SECS",
            DEFAULT_TIMEOUT_SECS,
            MIN_TIMEOUT_SECS,
            MAX_TIMEOUT_SECS,
        );
        let retries = parser.get_u32_range("LOCK_RETRIES", defaults.retries, 0, 50);
        let stale_ms = parser.get_u64_range(
            "LOCK_STALE_MS",
            defaults.stale_after.as_millis() as u64,
            100,
            600_000,
        );
        let log_level = parser.get_log_level("LOG_LEVEL", "info");

        if parser.has_errors() {
            return Err(ConfigError::Env(parser.take_errors()));
        }

        Ok(Self {
            claude_dir,
            hook_timeout_secs,
            lock_policy: LockPolicy {
                retries,
                stale_after: Duration::from_millis(stale_ms),
                ..defaults
            },
            log_level,
        })
    }

    pub fn settings_path(&self) -> PathBuf {
        self.claude_dir.join(SETTINGS_FILE)
    }

    pub fn chime_dir(&self) -> PathBuf {
        self.claude_dir.join(CHIME_DIR)
    }

    pub fn script_path(&self) -> PathBuf {
        self.chime_dir().join(SCRIPT_FILE)
    }

    pub fn config_path(&self) -> PathBuf {
        self.chime_dir().join(CONFIG_FILE)
    }

    pub fn install_lock_path(&self) -> PathBuf {
        self.chime_dir().join(INSTALL_LOCK_FILE)
    }

    /// The script path as written into the settings document.
    pub fn script_document_path(&self) -> String {
        document_path(&self.script_path())
    }

    /// Installer over the local filesystem wired to these paths.
    pub fn installer(&self) -> Installer<LocalFs> {
        let locks = LockManager::new(self.lock_policy.clone());
        let repository = SettingsRepository::new(
            LocalFs,
            self.settings_path(),
            HookIdentity::new(self.script_document_path()),
        )
        .with_timeout(self.hook_timeout_secs)
        .with_lock_manager(locks.clone());
        Installer::new(LocalFs, repository, self.install_lock_path()).with_lock_manager(locks)
    }
}

fn document_path(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

#[cfg(test)]
pub(crate) fn env_test_lock() -> std::sync::MutexGuard<'static, ()> {
    use std::sync::{Mutex, OnceLock};

    static ENV_LOCK: OnceLock<Mutex<()>> = OnceLock::new();
    ENV_LOCK
        .get_or_init(|| Mutex::new(()))
        .lock()
        .unwrap_or_else(|e| e.into_inner())
}
