use crate::common::sandbox::read_json;
use crate::common::{Sandbox, init_test_logging};
use serde_json::{Value, json};

fn stdout(output: &std::process::Output) -> String {
    String::from_utf8_lossy(&output.stdout).into_owned()
}

fn stderr(output: &std::process::Output) -> String {
    String::from_utf8_lossy(&output.stderr).into_owned()
}

fn hook_paths(settings: &Value, event: &str) -> Vec<String> {
    settings["hooks"][event]
        .as_array()
        .into_iter()
        .flatten()
        .flat_map(|g| g["commands"].as_array().cloned().unwrap_or_default())
        .map(|c| c["path"].as_str().unwrap_or_default().to_string())
        .collect()
}

#[test]
fn test_help_lists_subcommands() {
    init_test_logging();
    crate::test_log!("TEST START: test_help_lists_subcommands");

    let sandbox = Sandbox::new();
    let output = sandbox.run(&["--help"]);

    assert!(output.status.success());
    let text = stdout(&output);
    for command in ["install", "uninstall", "status"] {
        assert!(text.contains(command), "help missing {command}: {text}");
    }
    crate::test_log!("TEST PASS: test_help_lists_subcommands");
}

#[test]
fn test_install_writes_artifacts_and_settings() {
    init_test_logging();
    crate::test_log!("TEST START: test_install_writes_artifacts_and_settings");

    let sandbox = Sandbox::new();
    let output = sandbox.install();
    assert!(output.status.success(), "install failed: {}", stderr(&output));

    let script = sandbox.script_path();
    let script_str = script.to_str().unwrap();
    let settings = sandbox.read_settings();
    assert_eq!(hook_paths(&settings, "Stop"), vec![script_str]);
    assert_eq!(hook_paths(&settings, "SubagentStop"), vec![script_str]);
    assert_eq!(hook_paths(&settings, "Notification").len(), 2);

    let config = read_json(&sandbox.config_path());
    assert_eq!(config["soundPath"], sandbox.sound.to_str().unwrap());
    assert!(std::fs::read_to_string(&script).unwrap().starts_with("#!/bin/sh"));

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let mode = std::fs::metadata(&script).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o755);
    }
    crate::test_log!("TEST PASS: test_install_writes_artifacts_and_settings");
}

#[test]
fn test_status_reflects_install_state() {
    init_test_logging();
    let sandbox = Sandbox::new();

    let before = sandbox.run(&["status"]);
    assert!(before.status.success());
    assert!(stdout(&before).contains("not installed"));

    assert!(sandbox.install().status.success());
    let after = sandbox.run(&["status"]);
    assert!(after.status.success());
    assert!(stdout(&after).contains("chime: installed"));
}

#[test]
fn test_install_preserves_foreign_settings() {
    init_test_logging();
    let sandbox = Sandbox::new();
    sandbox.write_settings(&json!({
        "theme": "dark",
        "hooks": {
            "Stop": [{"commands": [{"kind": "command", "path": "/usr/bin/notify", "timeoutSeconds": 3}]}],
            "PreToolUse": [{"matcher": "Bash", "commands": []}]
        }
    }));

    assert!(sandbox.install().status.success());
    assert!(sandbox.run(&["uninstall"]).status.success());

    let settings = sandbox.read_settings();
    assert_eq!(settings["theme"], "dark");
    assert_eq!(hook_paths(&settings, "Stop"), vec!["/usr/bin/notify"]);
    assert_eq!(settings["hooks"]["PreToolUse"][0]["matcher"], "Bash");
    assert!(settings["hooks"].get("SubagentStop").is_none());
    assert!(settings["hooks"].get("Notification").is_none());
}

#[test]
fn test_uninstall_removes_everything() {
    init_test_logging();
    let sandbox = Sandbox::new();
    assert!(sandbox.install().status.success());

    let output = sandbox.run(&["uninstall"]);
    assert!(output.status.success(), "uninstall failed: {}", stderr(&output));
    assert!(stdout(&output).contains("Removed chime hooks"));

    assert_eq!(sandbox.read_settings(), json!({}));
    assert!(!sandbox.script_path().exists());
    assert!(!sandbox.config_path().exists());
}

#[test]
fn test_uninstall_when_not_installed() {
    init_test_logging();
    let sandbox = Sandbox::new();

    let output = sandbox.run(&["uninstall"]);
    assert!(output.status.success());
    assert!(stdout(&output).contains("No chime hooks were registered"));
    assert!(!sandbox.settings_path().exists());
}

#[test]
fn test_install_refuses_corrupted_settings() {
    init_test_logging();
    let sandbox = Sandbox::new();
    let corrupted = r#"{"hooks": {"Stop": [], "Stop": []}}"#;
    std::fs::write(sandbox.settings_path(), corrupted).unwrap();

    let output = sandbox.install();
    assert!(!output.status.success());
    assert_eq!(std::fs::read_to_string(sandbox.settings_path()).unwrap(), corrupted);
    assert!(!sandbox.script_path().exists());
    assert!(!sandbox.config_path().exists());
}

#[test]
fn test_uninstall_with_corrupted_settings_warns_and_deletes_files() {
    init_test_logging();
    let sandbox = Sandbox::new();
    assert!(sandbox.install().status.success());
    std::fs::write(sandbox.settings_path(), "{ not json").unwrap();

    let output = sandbox.run(&["uninstall"]);
    assert!(output.status.success(), "uninstall failed: {}", stderr(&output));
    assert!(stderr(&output).contains("left untouched"));
    assert_eq!(std::fs::read_to_string(sandbox.settings_path()).unwrap(), "{ not json");
    assert!(!sandbox.script_path().exists());
    assert!(!sandbox.config_path().exists());
}

#[test]
fn test_install_rejects_missing_sound_and_bad_volume() {
    init_test_logging();
    let sandbox = Sandbox::new();

    let missing = sandbox.run(&["install", "--sound", "/definitely/not/here.wav"]);
    assert!(!missing.status.success());
    assert!(stderr(&missing).contains("Sound file not found"));

    let sound = sandbox.sound.to_str().unwrap();
    let loud = sandbox.run(&["install", "--sound", sound, "--volume", "3"]);
    assert!(!loud.status.success());
    assert!(!sandbox.settings_path().exists());
}

#[test]
fn test_invalid_env_is_reported() {
    init_test_logging();
    let sandbox = Sandbox::new();
    let output = std::process::Command::new(env!("CARGO_BIN_EXE_chime"))
        .arg("status")
        .env("CHIME_CLAUDE_DIR", &sandbox.claude_dir)
        .env("CHIME_HOOK_TIMEOUT_SECS", "0")
        .output()
        .unwrap();

    assert!(!output.status.success());
    assert!(stderr(&output).contains("CHIME_HOOK_TIMEOUT_SECS"));
}
