//! Supported hook catalog and the ownership predicate.

use super::schema::{EventType, HookCommand, HookGroup};

/// Substring present in every script path chime has ever installed.
///
/// Lets a new install recognise entries written by an older version whose
/// script lived somewhere else.
pub const LEGACY_PATH_MARKER: &str = "chime-hook";

/// One hook configuration chime knows how to install.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HookSpec {
    pub event: EventType,
    pub matcher: Option<&'static str>,
}

/// Every (event type, matcher) pair chime installs, in install order.
pub const SUPPORTED_HOOKS: &[HookSpec] = &[
    HookSpec {
        event: EventType::Stop,
        matcher: None,
    },
    HookSpec {
        event: EventType::SubagentStop,
        matcher: None,
    },
    HookSpec {
        event: EventType::Notification,
        matcher: Some("permission_prompt"),
    },
    HookSpec {
        event: EventType::Notification,
        matcher: Some("idle_prompt"),
    },
];

impl HookSpec {
    /// The group chime writes for this entry.
    pub fn group(&self, script_path: &str, timeout_seconds: u32) -> HookGroup {
        HookGroup::new(
            self.matcher,
            vec![HookCommand::new(script_path, timeout_seconds)],
        )
    }
}

/// Decides which commands belong to chime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HookIdentity {
    script_path: String,
}

impl HookIdentity {
    pub fn new(script_path: impl Into<String>) -> Self {
        Self {
            script_path: script_path.into(),
        }
    }

    /// True if `command` points at the current script or at any script path
    /// carrying [`LEGACY_PATH_MARKER`].
    pub fn owns(&self, command: &HookCommand) -> bool {
        command.path == self.script_path || command.path.contains(LEGACY_PATH_MARKER)
    }

    pub fn owns_any(&self, group: &HookGroup) -> bool {
        group.commands.iter().any(|c| self.owns(c))
    }
}
