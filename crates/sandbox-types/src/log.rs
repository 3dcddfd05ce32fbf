//! The shape submitted to the logging broker:
//! `(plugin_id, priority, tag, message, thread_name?, exception_trace?, epoch)`.

use serde::{Deserialize, Serialize};

use crate::ids::PluginId;

/// Severity of a [`LogRecord`], mirroring the platform's familiar
/// verbose-through-fatal log levels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogPriority {
    Verbose,
    Debug,
    Info,
    Warn,
    Error,
    Fatal,
}

/// One submission to the logging broker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogRecord {
    pub plugin_id: PluginId,
    pub priority: LogPriority,
    pub tag: String,
    pub message: String,
    #[serde(default)]
    pub thread_name: Option<String>,
    #[serde(default)]
    pub exception_trace: Option<String>,
    pub epoch: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serializes_priority_lowercase() {
        let json = serde_json::to_string(&LogPriority::Warn).unwrap();
        assert_eq!(json, "\"warn\"");
    }

    #[test]
    fn record_round_trips_without_optional_fields() {
        let record = LogRecord {
            plugin_id: PluginId::new("demo-automation").unwrap(),
            priority: LogPriority::Info,
            tag: "net".to_string(),
            message: "fetched resource".to_string(),
            thread_name: None,
            exception_trace: None,
            epoch: 1_700_000_000,
        };
        let json = serde_json::to_string(&record).unwrap();
        let back: LogRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(back.message, "fetched resource");
    }
}
