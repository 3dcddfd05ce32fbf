//! Installed plugin records and sandbox instance bookkeeping.

use serde::{Deserialize, Serialize};

use crate::capability::Capability;
use crate::ids::PluginId;

/// An installed plugin's immutable record, created at install and
/// destroyed only by uninstall.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PluginRecord {
    /// The plugin's identifier.
    pub id: PluginId,
    /// The plugin's declared version.
    pub version: semver::Version,
    /// Capabilities declared (and, for auto-grant ones, already granted)
    /// in the plugin manifest.
    pub declared_capabilities: Vec<Capability>,
    /// The developer account that published the plugin.
    pub developer_id: String,
    /// The minimum host platform version this plugin requires.
    pub min_host_version: semver::Version,
    /// SHA-256 content digest of the plugin bundle, hex-encoded.
    pub content_digest: String,
}

/// The lifecycle state of a single sandbox instance.
///
/// Only `Running` serves broker calls. `Draining` accepts no new calls but
/// finishes in-flight ones before a deadline. `Failed` is reachable from
/// any pre-`Running` state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SandboxState {
    /// The child process has been requested but has not yet been observed.
    Spawning,
    /// The child process exists; waiting for its ready handshake.
    Handshaking,
    /// The handshake succeeded; the sandbox serves broker calls.
    Running,
    /// A graceful shutdown was requested; in-flight calls are finishing.
    Draining,
    /// The sandbox process has exited.
    Dead,
    /// Spawn or handshake failed.
    Failed,
}

impl SandboxState {
    /// Whether a transition from `self` to `next` is a valid lifecycle step.
    pub fn can_transition_to(self, next: SandboxState) -> bool {
        use SandboxState::*;
        matches!(
            (self, next),
            (Spawning, Handshaking)
                | (Spawning, Failed)
                | (Handshaking, Running)
                | (Handshaking, Failed)
                | (Running, Draining)
                | (Running, Dead)
                | (Running, Failed)
                | (Draining, Dead)
                | (Draining, Failed)
        )
    }
}

/// A running (or recently running) sandbox child process.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SandboxInstance {
    /// OS process id of the sandbox child.
    pub pid: u32,
    /// Unix epoch seconds at which the process was spawned.
    pub boot_epoch: u64,
    /// The plugin id bound to this instance.
    pub plugin_id: PluginId,
    /// Lifecycle state.
    pub state: SandboxState,
    /// Peak resident memory observed, in MiB.
    pub memory_peak_mib: u64,
    /// Number of active threads last observed inside the sandbox.
    pub active_threads: u32,
}

impl SandboxInstance {
    /// Construct a freshly spawned instance with zeroed usage counters.
    pub fn spawning(plugin_id: PluginId, pid: u32, boot_epoch: u64) -> Self {
        Self {
            pid,
            boot_epoch,
            plugin_id,
            state: SandboxState::Spawning,
            memory_peak_mib: 0,
            active_threads: 0,
        }
    }
}
