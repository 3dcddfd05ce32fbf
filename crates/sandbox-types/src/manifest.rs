//! The plugin manifest: declared identity, capabilities, and flows, plus a
//! small schema format used to validate the manifest's free-form config
//! section before a plugin is installed.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::capability::Capability;
use crate::flow::FlowDefinition;

/// The expected JSON type of a manifest config field, used by
/// [`ConfigSchema::validate`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    String,
    Number,
    Bool,
    Array,
    Object,
}

fn matches_type(value: &serde_json::Value, expected: FieldType) -> bool {
    match expected {
        FieldType::String => value.is_string(),
        FieldType::Number => value.is_number(),
        FieldType::Bool => value.is_boolean(),
        FieldType::Array => value.is_array(),
        FieldType::Object => value.is_object(),
    }
}

/// A schema describing what a plugin's free-form `config` map must contain.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConfigSchema {
    pub required_fields: Vec<String>,
    pub field_types: HashMap<String, FieldType>,
}

/// One violation of a [`ConfigSchema`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SchemaViolation {
    MissingField(String),
    WrongType { field: String, expected: FieldType },
}

impl ConfigSchema {
    /// Validate `config` against this schema, collecting every violation
    /// rather than stopping at the first.
    pub fn validate(&self, config: &HashMap<String, serde_json::Value>) -> Vec<SchemaViolation> {
        let mut violations = Vec::new();

        for field in &self.required_fields {
            if !config.contains_key(field) {
                violations.push(SchemaViolation::MissingField(field.clone()));
            }
        }

        for (key, value) in config {
            if let Some(expected) = self.field_types.get(key) {
                if !matches_type(value, *expected) {
                    violations.push(SchemaViolation::WrongType {
                        field: key.clone(),
                        expected: *expected,
                    });
                }
            }
        }

        violations
    }
}

/// The manifest bundled with every plugin, read at install time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PluginManifest {
    pub id: String,
    pub version: semver::Version,
    pub display_name: String,
    pub developer_id: String,
    pub min_host_version: semver::Version,
    pub declared_capabilities: Vec<Capability>,
    #[serde(default)]
    pub config: HashMap<String, serde_json::Value>,
    #[serde(default)]
    pub config_schema: ConfigSchema,
    #[serde(default)]
    pub flows: Vec<FlowDefinition>,
}

impl PluginManifest {
    /// Validate this manifest's `config` against its own `config_schema`.
    pub fn validate_config(&self) -> Vec<SchemaViolation> {
        self.config_schema.validate(&self.config)
    }
}
