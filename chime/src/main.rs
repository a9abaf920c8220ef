//! Chime - sound notification hooks for agent CLIs
//!
//! Installs a hook script into the agent CLI's `settings.json` so a sound
//! plays when the agent stops or needs attention.

#![forbid(unsafe_code)]

mod script;

use anyhow::{Context, Result, bail};
use chime_common::{ChimeConfig, InstallError, InstallRequest, SettingsCleanup};
use clap::{Parser, Subcommand};
use script::SoundConfig;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Attempts for install/uninstall when the failure is transient.
const MAX_ATTEMPTS: u32 = 3;

#[derive(Parser)]
#[command(name = "chime")]
#[command(author, version, about = "Chime - sound notification hooks for agent CLIs")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Install the hook script and register it in settings.json
    Install {
        /// Sound file to play
        #[arg(short, long)]
        sound: PathBuf,

        /// Playback volume between 0 and 1
        #[arg(long, default_value = "0.8")]
        volume: f32,
    },

    /// Remove chime's hooks and delete its files
    Uninstall,

    /// Report whether chime's hooks are registered
    Status,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = ChimeConfig::from_env().context("Failed to load configuration")?;

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new(&config.log_level)
    };
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();

    match cli.command {
        Commands::Install { sound, volume } => install(&config, sound, volume).await,
        Commands::Uninstall => uninstall(&config).await,
        Commands::Status => status(&config).await,
    }
}

async fn install(config: &ChimeConfig, sound: PathBuf, volume: f32) -> Result<()> {
    let sound = std::path::absolute(&sound)
        .with_context(|| format!("Failed to resolve sound path {:?}", sound))?;
    if !sound.is_file() {
        bail!("Sound file not found: {}", sound.display());
    }
    let sound_config = SoundConfig::new(&sound, volume)?;

    let request = InstallRequest {
        script_path: config.script_path(),
        script_document_path: config.script_document_path(),
        config_path: config.config_path(),
        config_content: sound_config.to_json()?,
        script_content: sound_config.render_script(),
    };

    let installer = config.installer();
    retry_transient(|| installer.install(&request))
        .await
        .with_context(|| format!("Failed to install into {}", config.settings_path().display()))?;

    println!("Installed chime hooks in {}", config.settings_path().display());
    println!("  sound:  {}", sound.display());
    println!("  script: {}", config.script_path().display());
    Ok(())
}

async fn uninstall(config: &ChimeConfig) -> Result<()> {
    let installer = config.installer();
    let script_path = config.script_path();
    let config_path = config.config_path();
    let report = retry_transient(|| installer.uninstall(&script_path, &config_path))
        .await
        .with_context(|| {
            format!("Failed to uninstall from {}", config.settings_path().display())
        })?;

    match &report.settings {
        SettingsCleanup::Removed => {
            println!("Removed chime hooks from {}", config.settings_path().display())
        }
        SettingsCleanup::NothingToRemove => println!("No chime hooks were registered"),
        SettingsCleanup::Corrupted(reason) => eprintln!(
            "Warning: {} is not valid and was left untouched: {}",
            config.settings_path().display(),
            reason
        ),
    }
    for leftover in &report.leftovers {
        eprintln!(
            "Warning: could not delete {} {}: {}",
            leftover.artifact,
            leftover.path.display(),
            leftover.error
        );
    }

    if !report.leftovers.is_empty() {
        bail!("Uninstall left {} file(s) behind", report.leftovers.len());
    }
    Ok(())
}

async fn status(config: &ChimeConfig) -> Result<()> {
    let installed = config
        .installer()
        .is_installed()
        .await
        .with_context(|| format!("Failed to read {}", config.settings_path().display()))?;

    if installed {
        println!("chime: installed ({})", config.settings_path().display());
    } else {
        println!("chime: not installed");
    }
    Ok(())
}

/// Rerun `operation` while it fails with a retryable error.
async fn retry_transient<T, F, Fut>(mut operation: F) -> Result<T, InstallError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, InstallError>>,
{
    let mut attempt = 1;
    loop {
        match operation().await {
            Err(e) if e.is_retryable() && attempt < MAX_ATTEMPTS => {
                warn!("Attempt {} failed ({}), retrying", attempt, e);
                tokio::time::sleep(Duration::from_millis(250 * u64::from(attempt))).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
            Ok(value) => {
                if attempt > 1 {
                    info!("Succeeded after {} attempts", attempt);
                }
                return Ok(value);
            }
        }
    }
}
