use serde_json::Value;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};
use tempfile::TempDir;

/// A throwaway agent config directory plus a sound file to point at.
pub struct Sandbox {
    _root: TempDir,
    pub claude_dir: PathBuf,
    pub sound: PathBuf,
}

impl Sandbox {
    pub fn new() -> Self {
        let root = TempDir::new().expect("Failed to create temp dir");
        let claude_dir = root.path().join(".claude");
        std::fs::create_dir_all(&claude_dir).expect("Failed to create claude dir");
        let sound = root.path().join("ding.wav");
        std::fs::write(&sound, b"RIFF").expect("Failed to write sound file");
        Self {
            _root: root,
            claude_dir,
            sound,
        }
    }

    pub fn settings_path(&self) -> PathBuf {
        self.claude_dir.join("settings.json")
    }

    pub fn script_path(&self) -> PathBuf {
        self.claude_dir.join("chime").join("chime-hook.sh")
    }

    pub fn config_path(&self) -> PathBuf {
        self.claude_dir.join("chime").join("config.json")
    }

    pub fn run(&self, args: &[&str]) -> Output {
        Command::new(env!("CARGO_BIN_EXE_chime"))
            .args(args)
            .env("CHIME_CLAUDE_DIR", &self.claude_dir)
            .env_remove("CHIME_HOOK_TIMEOUT_SECS")
            .env_remove("CHIME_LOCK_RETRIES")
            .env_remove("CHIME_LOCK_STALE_MS")
            .env_remove("CHIME_LOG_LEVEL")
            .output()
            .expect("Failed to run chime")
    }

    pub fn install(&self) -> Output {
        let sound = self.sound.to_str().expect("utf-8 temp path");
        self.run(&["install", "--sound", sound])
    }

    pub fn write_settings(&self, value: &Value) {
        std::fs::write(
            self.settings_path(),
            serde_json::to_string_pretty(value).expect("serialize settings"),
        )
        .expect("Failed to write settings");
    }

    pub fn read_settings(&self) -> Value {
        read_json(&self.settings_path())
    }
}

pub fn read_json(path: &Path) -> Value {
    let text = std::fs::read_to_string(path).expect("Failed to read json file");
    serde_json::from_str(&text).expect("Invalid json")
}
