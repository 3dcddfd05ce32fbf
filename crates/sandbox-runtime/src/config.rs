//! Sandbox-process configuration: where the plugin bundle lives, the
//! socket path the host told this process to connect to, and the IPC
//! deadline policy. Mirrors `sandbox_host::config::HostConfig`'s chained
//! builder, scaled down to the handful of settings a guest process needs.

use std::path::PathBuf;

use sandbox_ipc::DeadlinePolicy;

#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    pub plugin_id: sandbox_types::PluginId,
    pub bundle_path: PathBuf,
    pub ipc_socket_path: PathBuf,
    pub deadlines: DeadlinePolicy,
}

impl RuntimeConfig {
    pub fn builder(
        plugin_id: sandbox_types::PluginId,
        bundle_path: impl Into<PathBuf>,
        ipc_socket_path: impl Into<PathBuf>,
    ) -> RuntimeConfigBuilder {
        RuntimeConfigBuilder {
            config: RuntimeConfig {
                plugin_id,
                bundle_path: bundle_path.into(),
                ipc_socket_path: ipc_socket_path.into(),
                deadlines: DeadlinePolicy::default(),
            },
        }
    }
}

pub struct RuntimeConfigBuilder {
    config: RuntimeConfig,
}

impl RuntimeConfigBuilder {
    pub fn deadlines(mut self, deadlines: DeadlinePolicy) -> Self {
        self.config.deadlines = deadlines;
        self
    }

    pub fn build(self) -> RuntimeConfig {
        self.config
    }
}
