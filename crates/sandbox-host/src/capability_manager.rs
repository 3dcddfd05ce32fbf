//! Capability grants per plugin id.

use std::sync::Arc;

use dashmap::DashMap;

use sandbox_types::{Capability, CapabilityClass, PluginId};

use crate::error::{HostError, HostResult};

/// The outcome of a [`CapabilityManager::request`] call for one capability.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GrantOutcome {
    Granted,
    Denied,
    /// Critical-class capabilities are never grantable; the manager
    /// short-circuits before any consent flow would run.
    Forbidden,
}

/// Holds the set of granted capabilities per plugin id.
///
/// Auto-grant capabilities are granted the moment they are declared in a
/// manifest; dangerous ones require a recorded consent decision; critical
/// ones can never be granted.
#[derive(Clone)]
pub struct CapabilityManager {
    grants: Arc<DashMap<PluginId, Vec<Capability>>>,
}

impl CapabilityManager {
    pub fn new() -> Self {
        Self { grants: Arc::new(DashMap::new()) }
    }

    /// Whether `capability` is currently granted to `plugin_id`.
    pub fn is_granted(&self, plugin_id: &PluginId, capability: &Capability) -> bool {
        self.grants
            .get(plugin_id)
            .map(|granted| granted.contains(capability))
            .unwrap_or(false)
    }

    /// Install-time processing of a manifest's declared capabilities:
    /// auto-grant ones are granted immediately; dangerous and critical ones
    /// are left ungranted pending [`CapabilityManager::request`].
    pub fn install_declared(&self, plugin_id: &PluginId, declared: &[Capability]) {
        let mut entry = self.grants.entry(plugin_id.clone()).or_default();
        for capability in declared {
            if capability.class() == CapabilityClass::AutoGrant && !entry.contains(capability) {
                entry.push(capability.clone());
            }
        }
    }

    /// Request a set of capabilities be granted, driven by a caller-supplied
    /// consent decision per capability (the interactive consent prompt
    /// itself lives outside this crate; this call only records the
    /// outcome once a decision has been made).
    pub fn request(
        &self,
        plugin_id: &PluginId,
        capabilities: &[Capability],
        consent: impl Fn(&Capability) -> bool,
    ) -> Vec<(Capability, GrantOutcome)> {
        let mut outcomes = Vec::with_capacity(capabilities.len());
        let mut entry = self.grants.entry(plugin_id.clone()).or_default();

        for capability in capabilities {
            let outcome = match capability.class() {
                CapabilityClass::Critical => GrantOutcome::Forbidden,
                CapabilityClass::AutoGrant => {
                    if !entry.contains(capability) {
                        entry.push(capability.clone());
                    }
                    GrantOutcome::Granted
                }
                CapabilityClass::Dangerous => {
                    if consent(capability) {
                        if !entry.contains(capability) {
                            entry.push(capability.clone());
                        }
                        GrantOutcome::Granted
                    } else {
                        GrantOutcome::Denied
                    }
                }
            };
            outcomes.push((capability.clone(), outcome));
        }

        outcomes
    }

    /// Revoke a previously granted capability.
    pub fn revoke(&self, plugin_id: &PluginId, capability: &Capability) {
        if let Some(mut granted) = self.grants.get_mut(plugin_id) {
            granted.retain(|c| c != capability);
        }
    }

    /// Drop all grants for a plugin, e.g. on uninstall.
    pub fn clear(&self, plugin_id: &PluginId) {
        self.grants.remove(plugin_id);
    }

    /// Enforce that `capability` is granted to `plugin_id`, for use at the
    /// head of a privileged broker call.
    pub fn require(&self, plugin_id: &PluginId, capability: &Capability) -> HostResult<()> {
        if self.is_granted(plugin_id, capability) {
            Ok(())
        } else {
            Err(HostError::CapabilityDenied {
                plugin_id: plugin_id.as_str().to_string(),
                capability: capability.as_str().to_string(),
            })
        }
    }
}

impl Default for CapabilityManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sandbox_types::capability::names;

    fn plugin(id: &str) -> PluginId {
        PluginId::new(id).unwrap()
    }

    #[test]
    fn auto_grant_capability_installs_without_consent() {
        let manager = CapabilityManager::new();
        let id = plugin("demo-automation");
        manager.install_declared(&id, &[Capability::new(names::FILE_READ)]);
        assert!(manager.is_granted(&id, &Capability::new(names::FILE_READ)));
    }

    #[test]
    fn dangerous_capability_requires_consent() {
        let manager = CapabilityManager::new();
        let id = plugin("demo-automation");
        manager.install_declared(&id, &[Capability::new(names::FILE_WRITE)]);
        assert!(!manager.is_granted(&id, &Capability::new(names::FILE_WRITE)));

        let outcomes = manager.request(&id, &[Capability::new(names::FILE_WRITE)], |_| true);
        assert_eq!(outcomes, vec![(Capability::new(names::FILE_WRITE), GrantOutcome::Granted)]);
        assert!(manager.is_granted(&id, &Capability::new(names::FILE_WRITE)));
    }

    #[test]
    fn critical_capability_can_never_be_granted() {
        let manager = CapabilityManager::new();
        let id = plugin("demo-automation");
        let outcomes = manager.request(&id, &[Capability::new(names::SYSTEM_REBOOT)], |_| true);
        assert_eq!(outcomes, vec![(Capability::new(names::SYSTEM_REBOOT), GrantOutcome::Forbidden)]);
        assert!(!manager.is_granted(&id, &Capability::new(names::SYSTEM_REBOOT)));
    }

    #[test]
    fn require_denies_missing_capability() {
        let manager = CapabilityManager::new();
        let id = plugin("demo-automation");
        let result = manager.require(&id, &Capability::new(names::HW_CAMERA));
        assert!(matches!(result, Err(HostError::CapabilityDenied { .. })));
    }
}
