//! Capability names and their trust classification.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A stable capability name, e.g. `FILE_READ`, `NET_HTTP`, `HW_CAMERA`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Capability(String);

impl Capability {
    /// Wrap a capability name as-is (capability names are plugin-manifest
    /// controlled strings, not a closed Rust enum, so the platform can add
    /// new ones without a breaking change).
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// Borrow the capability name.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Classification used by the `CapabilityManager` grant policy.
    pub fn class(&self) -> CapabilityClass {
        if CRITICAL.contains(&self.0.as_str()) {
            CapabilityClass::Critical
        } else if DANGEROUS.contains(&self.0.as_str()) {
            CapabilityClass::Dangerous
        } else {
            CapabilityClass::AutoGrant
        }
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for Capability {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// Stable capability name constants referenced throughout the broker layer.
pub mod names {
    pub const FILE_READ: &str = "FILE_READ";
    pub const FILE_WRITE: &str = "FILE_WRITE";
    pub const NET_HTTP: &str = "NET_HTTP";
    pub const NET_HTTP_INSECURE: &str = "NET_HTTP_INSECURE";
    pub const NET_SOCKET: &str = "NET_SOCKET";
    pub const HW_CAMERA: &str = "HW_CAMERA";
    pub const BT_PAIRED: &str = "BT_PAIRED";
    pub const BT_CONNECT: &str = "BT_CONNECT";
    pub const PRINT: &str = "PRINT";
    pub const MSG_SEND: &str = "MSG_SEND";
    pub const LOG_SUBMIT: &str = "LOG_SUBMIT";
    pub const PERMISSION_REQUEST: &str = "PERMISSION_REQUEST";
    pub const SYSTEM_REBOOT: &str = "SYSTEM_REBOOT";
    pub const SYSTEM_INSTALL: &str = "SYSTEM_INSTALL";
}

/// Capabilities that must never be granted to a plugin, under any policy.
pub const CRITICAL: &[&str] = &[names::SYSTEM_REBOOT, names::SYSTEM_INSTALL];

/// Capabilities that require explicit, interactive user consent.
pub const DANGEROUS: &[&str] = &[
    names::FILE_WRITE,
    names::NET_HTTP_INSECURE,
    names::NET_SOCKET,
    names::HW_CAMERA,
    names::BT_CONNECT,
    names::PRINT,
];

/// Trust classification governing how a capability may be granted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CapabilityClass {
    /// Install/reboot-equivalent; the `CapabilityManager` refuses to grant it.
    Critical,
    /// Requires explicit user consent before it is granted.
    Dangerous,
    /// Granted automatically when declared in the plugin manifest.
    AutoGrant,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn critical_capability_is_classified_critical() {
        assert_eq!(
            Capability::new(names::SYSTEM_REBOOT).class(),
            CapabilityClass::Critical
        );
    }

    #[test]
    fn dangerous_capability_is_classified_dangerous() {
        assert_eq!(
            Capability::new(names::FILE_WRITE).class(),
            CapabilityClass::Dangerous
        );
    }

    #[test]
    fn unknown_capability_auto_grants() {
        assert_eq!(
            Capability::new(names::FILE_READ).class(),
            CapabilityClass::AutoGrant
        );
        assert_eq!(
            Capability::new("CUSTOM_THING").class(),
            CapabilityClass::AutoGrant
        );
    }
}
