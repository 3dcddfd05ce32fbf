//! Shared data model and error taxonomy for the plugin sandbox core.
//!
//! Nothing in this crate performs IO; it exists so that `sandbox-ipc`,
//! `sandbox-host`, and `sandbox-runtime` agree on the wire and storage
//! shapes without depending on each other.

pub mod audit;
pub mod capability;
pub mod error;
pub mod flow;
pub mod ids;
pub mod log;
pub mod manifest;
pub mod message;
pub mod record;
pub mod resource;
pub mod session;

pub use audit::{AuditEvent, AuditKind, AuditSeverity};
pub use capability::{Capability, CapabilityClass};
pub use error::{SandboxError, SandboxResult};
pub use flow::{FlowDefinition, Node, NodeKind, Trigger};
pub use ids::{PluginId, PluginIdError};
pub use log::{LogPriority, LogRecord};
pub use manifest::{ConfigSchema, FieldType, PluginManifest, SchemaViolation};
pub use message::{MessageKind, PluginMessage};
pub use record::{PluginRecord, SandboxInstance, SandboxState};
pub use resource::{PerformanceRecord, ResourceSample};
pub use session::{PeerCredentials, Session, SessionToken};
