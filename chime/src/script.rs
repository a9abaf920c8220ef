//! Hook script and config artifact generation.

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use std::path::Path;

const SCRIPT_TEMPLATE: &str = r#"#!/bin/sh
# Generated by chime. Reinstall with `chime install` instead of editing.
SOUND={{SOUND_PATH}}
VOLUME={{VOLUME}}

[ -f "$SOUND" ] || exit 0

if command -v afplay >/dev/null 2>&1; then
    afplay -v "$VOLUME" "$SOUND" >/dev/null 2>&1 &
elif command -v paplay >/dev/null 2>&1; then
    paplay --volume="$(awk "BEGIN { printf \"%d\", $VOLUME * 65536 }")" "$SOUND" >/dev/null 2>&1 &
elif command -v aplay >/dev/null 2>&1; then
    aplay -q "$SOUND" >/dev/null 2>&1 &
fi
exit 0
"#;

/// Persisted choice of sound, written next to the hook script.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SoundConfig {
    pub sound_path: String,
    pub volume: f32,
}

impl SoundConfig {
    pub fn new(sound_path: &Path, volume: f32) -> Result<Self> {
        if !(0.0..=1.0).contains(&volume) {
            bail!("Volume must be between 0 and 1, got {}", volume);
        }
        let sound_path = sound_path
            .to_str()
            .with_context(|| format!("Sound path is not valid UTF-8: {:?}", sound_path))?;
        Ok(Self {
            sound_path: sound_path.to_string(),
            volume,
        })
    }

    pub fn to_json(&self) -> Result<String> {
        let mut json = serde_json::to_string_pretty(self).context("Failed to serialize config")?;
        json.push('\n');
        Ok(json)
    }

    pub fn render_script(&self) -> String {
        SCRIPT_TEMPLATE
            .replace("{{SOUND_PATH}}", &shell_quote(&self.sound_path))
            .replace("{{VOLUME}}", &format!("{:.2}", self.volume))
    }
}

/// Single-quote a value for POSIX sh.
fn shell_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', r"'\''"))
}
