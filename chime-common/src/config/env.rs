//! Environment variable parsing with type safety.
//!
//! Collects every invalid value instead of stopping at the first one, so a
//! misconfigured shell can be reported in one go.

use std::env;
use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur during environment variable parsing.
#[derive(Debug, Error)]
pub enum EnvError {
    /// Invalid value for a variable.
    #[error("Invalid value for {var}: expected {expected}, got '{value}'")]
    InvalidValue {
        var: String,
        expected: String,
        value: String,
    },

    /// Value out of valid range.
    #[error("Value out of range for {var}: {value} (valid: {min}..={max})")]
    OutOfRange {
        var: String,
        value: String,
        min: String,
        max: String,
    },

    /// Invalid log level.
    #[error("Invalid log level for {var}: {value}")]
    InvalidLogLevel { var: String, value: String },
}

/// Type-safe environment variable parser.
pub struct EnvParser {
    prefix: &'static str,
    errors: Vec<EnvError>,
}

impl EnvParser {
    /// Create a new parser with the CHIME_ prefix.
    pub fn new() -> Self {
        Self::with_prefix("CHIME_")
    }

    pub fn with_prefix(prefix: &'static str) -> Self {
        Self {
            prefix,
            errors: Vec::new(),
        }
    }

    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    pub fn take_errors(&mut self) -> Vec<EnvError> {
        std::mem::take(&mut self.errors)
    }

    fn var_name(&self, name: &str) -> String {
        format!("{}{}", self.prefix, name)
    }

    /// Get a u32 value with default and range validation.
    pub fn get_u32_range(&mut self, name: &str, default: u32, min: u32, max: u32) -> u32 {
        let var_name = self.var_name(name);
        match env::var(&var_name) {
            Ok(value) => match value.trim().parse::<u32>() {
                Ok(n) if n >= min && n <= max => n,
                Ok(n) => {
                    self.errors.push(EnvError::OutOfRange {
                        var: var_name,
                        value: n.to_string(),
                        min: min.to_string(),
                        max: max.to_string(),
                    });
                    default
                }
                Err(_) => {
                    self.errors.push(EnvError::InvalidValue {
                        var: var_name,
                        expected: "unsigned 32-bit integer".to_string(),
                        value,
                    });
                    default
                }
            },
            Err(_) => default,
        }
    }

    /// Get a u64 value with default and range validation.
    pub fn get_u64_range(&mut self, name: &str, default: u64, min: u64, max: u64) -> u64 {
        let var_name = self.var_name(name);
        match env::var(&var_name) {
            Ok(value) => match value.trim().parse::<u64>() {
                Ok(n) if n >= min && n <= max => n,
                Ok(n) => {
                    self.errors.push(EnvError::OutOfRange {
                        var: var_name,
                        value: n.to_string(),
                        min: min.to_string(),
                        max: max.to_string(),
                    });
                    default
                }
                Err(_) => {
                    self.errors.push(EnvError::InvalidValue {
                        var: var_name,
                        expected: "unsigned 64-bit integer".to_string(),
                        value,
                    });
                    default
                }
            },
            Err(_) => default,
        }
    }

    /// Get an optional path with ~ expansion. Unset or empty yields `None`.
    pub fn get_optional_path(&mut self, name: &str) -> Option<PathBuf> {
        match env::var(self.var_name(name)) {
            Ok(value) if value.is_empty() => None,
            Ok(value) => Some(expand_home(&value)),
            Err(_) => None,
        }
    }

    /// Get a log level value with validation.
    pub fn get_log_level(&mut self, name: &str, default: &str) -> String {
        let var_name = self.var_name(name);
        match env::var(&var_name) {
            Ok(value) => {
                let lower = value.to_lowercase();
                match lower.as_str() {
                    "trace" | "debug" | "info" | "warn" | "error" | "off" => lower,
                    _ => {
                        self.errors.push(EnvError::InvalidLogLevel {
                            var: var_name,
                            value,
                        });
                        default.to_string()
                    }
                }
            }
            Err(_) => default.to_string(),
        }
    }
}

impl Default for EnvParser {
    fn default() -> Self {
        Self::new()
    }
}

/// Expand a leading `~/` to the home directory.
pub fn expand_home(value: &str) -> PathBuf {
    if let Some(stripped) = value.strip_prefix("~/")
        && let Some(home) = dirs::home_dir()
    {
        return home.join(stripped);
    }
    PathBuf::from(value)
}
