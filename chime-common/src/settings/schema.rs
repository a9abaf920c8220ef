//! Typed view over the `hooks` section of the settings document.
//!
//! The document itself stays a [`serde_json::Value`] so keys this crate does
//! not know about round-trip untouched. Only the arrays under known event
//! types are decoded into [`HookGroup`]s; unknown event types are carried as
//! raw JSON.
//!
//! ```json
//! {
//!   "hooks": {
//!     "Stop": [
//!       { "commands": [{ "kind": "command", "path": "/x/chime-hook.sh", "timeoutSeconds": 10 }] }
//!     ],
//!     "Notification": [
//!       { "matcher": "idle_prompt", "commands": [ ... ] }
//!     ]
//!   }
//! }
//! ```

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;

/// Top-level key owning the hook table.
pub const HOOKS_KEY: &str = "hooks";
/// The only command kind the document schema allows.
pub const COMMAND_KIND: &str = "command";
pub const MIN_TIMEOUT_SECS: u32 = 1;
pub const MAX_TIMEOUT_SECS: u32 = 300;

/// Event types this crate understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EventType {
    Stop,
    SubagentStop,
    Notification,
}

impl EventType {
    pub const ALL: [EventType; 3] = [
        EventType::Stop,
        EventType::SubagentStop,
        EventType::Notification,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            EventType::Stop => "Stop",
            EventType::SubagentStop => "SubagentStop",
            EventType::Notification => "Notification",
        }
    }

    pub fn from_key(key: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|e| e.as_str() == key)
    }

    /// Matcher values this event type filters on, empty when it fires
    /// unconditionally.
    pub fn matchers(self) -> &'static [&'static str] {
        match self {
            EventType::Stop | EventType::SubagentStop => &[],
            EventType::Notification => &["permission_prompt", "idle_prompt"],
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One command entry inside a hook group.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HookCommand {
    pub kind: String,
    pub path: String,
    #[serde(rename = "timeoutSeconds")]
    pub timeout_seconds: u32,
    /// Fields written by other tools; kept verbatim.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl HookCommand {
    pub fn new(path: impl Into<String>, timeout_seconds: u32) -> Self {
        Self {
            kind: COMMAND_KIND.to_string(),
            path: path.into(),
            timeout_seconds,
            extra: Map::new(),
        }
    }

    fn validate(&self) -> Result<(), String> {
        if self.kind != COMMAND_KIND {
            return Err(format!(
                "command kind must be \"{}\", found \"{}\"",
                COMMAND_KIND, self.kind
            ));
        }
        if self.path.is_empty() {
            return Err("command path must not be empty".to_string());
        }
        if !(MIN_TIMEOUT_SECS..=MAX_TIMEOUT_SECS).contains(&self.timeout_seconds) {
            return Err(format!(
                "timeoutSeconds must be within {}..={}, found {}",
                MIN_TIMEOUT_SECS, MAX_TIMEOUT_SECS, self.timeout_seconds
            ));
        }
        Ok(())
    }
}

/// Commands registered under one (event type, matcher) pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HookGroup {
    /// Raw matcher value. `None` when the key is absent; an explicit `null`
    /// is kept as `Some(Value::Null)` so it is written back as found.
    #[serde(
        default,
        deserialize_with = "present_value",
        skip_serializing_if = "Option::is_none"
    )]
    pub matcher: Option<Value>,
    pub commands: Vec<HookCommand>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

fn present_value<'de, D>(deserializer: D) -> Result<Option<Value>, D::Error>
where
    D: Deserializer<'de>,
{
    Value::deserialize(deserializer).map(Some)
}

impl HookGroup {
    pub fn new(matcher: Option<&str>, commands: Vec<HookCommand>) -> Self {
        Self {
            matcher: matcher.map(|m| Value::String(m.to_string())),
            commands,
            extra: Map::new(),
        }
    }

    /// The matcher string, if the group filters on one.
    pub fn matcher_str(&self) -> Option<&str> {
        self.matcher.as_ref().and_then(Value::as_str)
    }

    /// Structural identity used for deduplication: same matcher, same
    /// commands in the same order.
    pub fn same_shape(&self, other: &HookGroup) -> bool {
        self.matcher == other.matcher && self.commands == other.commands
    }

    fn validate(&self) -> Result<(), String> {
        if let Some(matcher) = &self.matcher
            && !(matcher.is_string() || matcher.is_null())
        {
            return Err(format!("matcher must be a string, found {}", matcher));
        }
        if self.commands.is_empty() {
            return Err("hook group has no commands".to_string());
        }
        for (i, command) in self.commands.iter().enumerate() {
            command.validate().map_err(|e| format!("commands[{}]: {}", i, e))?;
        }
        Ok(())
    }
}

/// Decoded `hooks` section.
///
/// Entry order follows the document; event types missing from the document
/// are appended in the order they are first added.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HookTable {
    order: Vec<Slot>,
    known: BTreeMap<EventType, Vec<HookGroup>>,
}

/// Position of one `hooks` entry. Unknown event types carry their raw JSON.
#[derive(Debug, Clone, PartialEq)]
enum Slot {
    Known(EventType),
    Foreign(String, Value),
}

impl HookTable {
    /// Decode and validate the `hooks` section of `document`.
    ///
    /// Returns a description of the first schema violation found.
    pub fn from_document(document: &Value) -> Result<Self, String> {
        let root = document
            .as_object()
            .ok_or_else(|| "settings document is not a JSON object".to_string())?;

        let Some(hooks) = root.get(HOOKS_KEY) else {
            return Ok(Self::default());
        };
        let hooks = hooks
            .as_object()
            .ok_or_else(|| format!("\"{}\" is not an object", HOOKS_KEY))?;

        let mut table = Self::default();
        for (key, value) in hooks {
            let Some(event) = EventType::from_key(key) else {
                table.order.push(Slot::Foreign(key.clone(), value.clone()));
                continue;
            };
            let groups: Vec<HookGroup> = serde_json::from_value(value.clone())
                .map_err(|e| format!("hooks.{}: {}", key, e))?;
            for (i, group) in groups.iter().enumerate() {
                group
                    .validate()
                    .map_err(|e| format!("hooks.{}[{}]: {}", key, i, e))?;
            }
            table.order.push(Slot::Known(event));
            table.known.insert(event, groups);
        }
        Ok(table)
    }

    /// Groups registered for `event`, empty if the event type is absent.
    pub fn groups(&self, event: EventType) -> &[HookGroup] {
        self.known.get(&event).map_or(&[], Vec::as_slice)
    }

    /// Mutable groups for `event`, creating an empty entry if needed.
    pub fn groups_mut(&mut self, event: EventType) -> &mut Vec<HookGroup> {
        if !self.known.contains_key(&event) {
            self.order.push(Slot::Known(event));
        }
        self.known.entry(event).or_default()
    }

    /// Iterate over every known event type present in the table, in
    /// document order.
    pub fn known(&self) -> impl Iterator<Item = (EventType, &[HookGroup])> {
        self.order.iter().filter_map(|slot| match slot {
            Slot::Known(event) => self.known.get(event).map(|g| (*event, g.as_slice())),
            Slot::Foreign(..) => None,
        })
    }

    pub fn known_mut(&mut self) -> impl Iterator<Item = (EventType, &mut Vec<HookGroup>)> {
        self.known.iter_mut().map(|(event, groups)| (*event, groups))
    }

    /// Drop known event types whose group list is empty.
    ///
    /// Foreign entries are never touched, even if empty.
    pub fn prune(&mut self) {
        self.known.retain(|_, groups| !groups.is_empty());
        let known = &self.known;
        self.order.retain(|slot| match slot {
            Slot::Known(event) => known.contains_key(event),
            Slot::Foreign(..) => true,
        });
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Write the table back into `document`, removing the `hooks` key when
    /// nothing remains. Other top-level keys keep their position.
    pub fn apply_to(&self, document: &mut Value) -> Result<(), String> {
        let root = document
            .as_object_mut()
            .ok_or_else(|| "settings document is not a JSON object".to_string())?;

        if self.is_empty() {
            if root.contains_key(HOOKS_KEY) {
                let kept: Map<String, Value> = std::mem::take(root)
                    .into_iter()
                    .filter(|(key, _)| key != HOOKS_KEY)
                    .collect();
                *root = kept;
            }
            return Ok(());
        }

        let mut hooks = Map::with_capacity(self.order.len());
        for slot in &self.order {
            match slot {
                Slot::Known(event) => {
                    if let Some(groups) = self.known.get(event) {
                        let value = serde_json::to_value(groups).map_err(|e| e.to_string())?;
                        hooks.insert(event.as_str().to_string(), value);
                    }
                }
                Slot::Foreign(key, value) => {
                    hooks.insert(key.clone(), value.clone());
                }
            }
        }
        root.insert(HOOKS_KEY.to_string(), Value::Object(hooks));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn command(path: &str) -> Value {
        json!({"kind": "command", "path": path, "timeoutSeconds": 10})
    }

    #[test]
    fn test_event_type_keys() {
        for event in EventType::ALL {
            assert_eq!(EventType::from_key(event.as_str()), Some(event));
        }
        assert_eq!(EventType::from_key("PreToolUse"), None);
        assert!(EventType::Stop.matchers().is_empty());
        assert_eq!(
            EventType::Notification.matchers(),
            &["permission_prompt", "idle_prompt"]
        );
    }

    #[test]
    fn test_missing_hooks_is_empty_table() {
        let table = HookTable::from_document(&json!({"theme": "dark"})).unwrap();
        assert!(table.is_empty());
        assert!(table.groups(EventType::Stop).is_empty());
    }

    #[test]
    fn test_decodes_known_and_keeps_foreign() {
        let doc = json!({
            "hooks": {
                "PreToolUse": [{"matcher": "Bash", "whatever": true}],
                "Stop": [{"commands": [command("/a.sh")]}],
                "Notification": [{"matcher": "idle_prompt", "commands": [command("/b.sh")]}]
            }
        });
        let table = HookTable::from_document(&doc).unwrap();

        assert_eq!(table.groups(EventType::Stop).len(), 1);
        assert_eq!(
            table.groups(EventType::Notification)[0].matcher_str(),
            Some("idle_prompt")
        );

        let mut out = doc.clone();
        table.apply_to(&mut out).unwrap();
        assert_eq!(out, doc);
        let keys: Vec<&String> = out["hooks"].as_object().unwrap().keys().collect();
        assert_eq!(keys, ["PreToolUse", "Stop", "Notification"]);
    }

    #[test]
    fn test_extra_fields_round_trip() {
        let doc = json!({
            "hooks": {
                "Stop": [{
                    "commands": [{"kind": "command", "path": "/a.sh", "timeoutSeconds": 5, "env": {"X": "1"}}],
                    "description": "from another tool"
                }]
            }
        });
        let table = HookTable::from_document(&doc).unwrap();
        let mut out = json!({});
        table.apply_to(&mut out).unwrap();
        assert_eq!(out, doc);
    }

    #[test]
    fn test_explicit_null_matcher_round_trips() {
        let doc = json!({
            "hooks": {"Stop": [{"matcher": null, "commands": [command("/other.sh")]}]}
        });
        let table = HookTable::from_document(&doc).unwrap();
        let group = &table.groups(EventType::Stop)[0];
        assert_eq!(group.matcher, Some(Value::Null));
        assert_eq!(group.matcher_str(), None);
        assert!(!group.same_shape(&HookGroup::new(None, group.commands.clone())));

        let mut out = json!({});
        table.apply_to(&mut out).unwrap();
        assert_eq!(out, doc);
        assert!(out["hooks"]["Stop"][0].as_object().unwrap().contains_key("matcher"));
    }

    #[test]
    fn test_rejects_schema_violations() {
        let cases = [
            (json!([]), "not a JSON object"),
            (json!({"hooks": []}), "is not an object"),
            (json!({"hooks": {"Stop": {}}}), "hooks.Stop"),
            (json!({"hooks": {"Stop": [{"matcher": "x"}]}}), "commands"),
            (json!({"hooks": {"Stop": [{"commands": []}]}}), "no commands"),
            (
                json!({"hooks": {"Stop": [{"commands": [{"kind": "command", "path": "/a", "timeoutSeconds": 0}]}]}}),
                "timeoutSeconds",
            ),
            (
                json!({"hooks": {"Stop": [{"commands": [{"kind": "command", "path": "/a", "timeoutSeconds": 301}]}]}}),
                "timeoutSeconds",
            ),
            (
                json!({"hooks": {"Stop": [{"commands": [{"kind": "command", "path": "", "timeoutSeconds": 3}]}]}}),
                "path must not be empty",
            ),
            (
                json!({"hooks": {"Stop": [{"commands": [{"kind": "script", "path": "/a", "timeoutSeconds": 3}]}]}}),
                "kind",
            ),
            (
                json!({"hooks": {"Stop": [{"commands": [{"kind": "command", "path": "/a", "timeoutSeconds": -1}]}]}}),
                "hooks.Stop",
            ),
            (
                json!({"hooks": {"Notification": [{"matcher": 3, "commands": [command("/a")]}]}}),
                "hooks.Notification",
            ),
        ];

        for (doc, needle) in cases {
            let err = HookTable::from_document(&doc).unwrap_err();
            assert!(err.contains(needle), "{} should mention {:?}: {}", doc, needle, err);
        }
    }

    #[test]
    fn test_groups_mut_appends_missing_event() {
        let mut table = HookTable::from_document(&json!({
            "hooks": {"Custom": [1, 2, 3]}
        }))
        .unwrap();

        table
            .groups_mut(EventType::Stop)
            .push(HookGroup::new(None, vec![HookCommand::new("/a.sh", 10)]));

        let mut doc = json!({"a": 1, "hooks": {}, "z": 2});
        table.apply_to(&mut doc).unwrap();
        let keys: Vec<&String> = doc["hooks"].as_object().unwrap().keys().collect();
        assert_eq!(keys, ["Custom", "Stop"]);
        assert_eq!(doc["hooks"]["Custom"], json!([1, 2, 3]));
    }

    #[test]
    fn test_prune_removes_empty_known_only() {
        let mut table = HookTable::from_document(&json!({
            "hooks": {"Stop": [{"commands": [command("/a.sh")]}], "Custom": []}
        }))
        .unwrap();
        table.groups_mut(EventType::Stop).clear();
        table.prune();

        assert!(table.groups(EventType::Stop).is_empty());
        assert!(!table.is_empty(), "foreign entry must survive pruning");
    }

    #[test]
    fn test_apply_empty_table_removes_hooks_key() {
        let table = HookTable::default();
        let mut doc = json!({"a": 1, "hooks": {}, "b": 2});
        table.apply_to(&mut doc).unwrap();

        assert_eq!(doc, json!({"a": 1, "b": 2}));
        let keys: Vec<&String> = doc.as_object().unwrap().keys().collect();
        assert_eq!(keys, ["a", "b"]);
    }

    #[test]
    fn test_same_shape_ignores_extra_fields() {
        let a = HookGroup::new(Some("idle_prompt"), vec![HookCommand::new("/a.sh", 10)]);
        let mut b = a.clone();
        b.extra.insert("note".to_string(), json!("x"));
        assert!(a.same_shape(&b));

        let c = HookGroup::new(Some("permission_prompt"), vec![HookCommand::new("/a.sh", 10)]);
        assert!(!a.same_shape(&c));
    }
}
