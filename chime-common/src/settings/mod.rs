//! Settings document repository.
//!
//! The settings file belongs to the agent CLI and is edited by the user and
//! by other tools. chime only manages its own commands under `hooks` and
//! passes everything else through.

pub mod catalog;
pub mod repository;
pub mod schema;
pub mod strict_json;

pub use catalog::{HookIdentity, HookSpec, LEGACY_PATH_MARKER, SUPPORTED_HOOKS};
pub use repository::{DEFAULT_TIMEOUT_SECS, SettingsRepository};
pub use schema::{EventType, HookCommand, HookGroup, HookTable};
pub use strict_json::parse_strict;
