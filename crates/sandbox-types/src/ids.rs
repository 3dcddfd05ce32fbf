//! Plugin identifiers.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;

static PLUGIN_ID_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(?=.*[A-Za-z0-9])[A-Za-z0-9_-]{1,64}$").expect("plugin id pattern is valid")
});

/// Errors produced while constructing a [`PluginId`].
#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum PluginIdError {
    /// The candidate string did not match the plugin id grammar.
    #[error("'{0}' is not a valid plugin id")]
    InvalidFormat(String),
}

/// An opaque, immutable plugin identifier.
///
/// Assigned at install and never reused. Valid ids match
/// `^(?=.*[A-Za-z0-9])[A-Za-z0-9_-]{1,64}$`: 1-64 characters of letters,
/// digits, `_` or `-`, with at least one alphanumeric character.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct PluginId(String);

impl PluginId {
    /// Validate and construct a new plugin id.
    pub fn new(value: impl Into<String>) -> Result<Self, PluginIdError> {
        let value = value.into();
        if PLUGIN_ID_PATTERN.is_match(&value) {
            Ok(Self(value))
        } else {
            Err(PluginIdError::InvalidFormat(value))
        }
    }

    /// Borrow the underlying string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for PluginId {
    type Error = PluginIdError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<PluginId> for String {
    fn from(id: PluginId) -> Self {
        id.0
    }
}

impl fmt::Display for PluginId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl AsRef<str> for PluginId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_valid_ids() {
        assert!(PluginId::new("demo-automation").is_ok());
        assert!(PluginId::new("a").is_ok());
        assert!(PluginId::new("A".repeat(64)).is_ok());
    }

    #[test]
    fn rejects_empty_id() {
        assert_eq!(
            PluginId::new(""),
            Err(PluginIdError::InvalidFormat(String::new()))
        );
    }

    #[test]
    fn rejects_too_long_id() {
        assert!(PluginId::new("a".repeat(65)).is_err());
    }

    #[test]
    fn rejects_path_like_ids() {
        assert!(PluginId::new("../evil").is_err());
        assert!(PluginId::new("a/b").is_err());
    }

    #[test]
    fn rejects_all_punctuation() {
        assert!(PluginId::new("___").is_err());
    }
}
