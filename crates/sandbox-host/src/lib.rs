//! Everything that runs in the trusted host process: identity
//! binding, capability gating, rate limiting, resource metering,
//! append-only analytics, the four privileged brokers, the GDPR export
//! container, and the supervisor that drives sandbox children through
//! their lifecycle.
//!
//! Nothing in this crate trusts a caller's claimed plugin id; every
//! privileged path runs through [`secure_wrapper::SecureWrapper::authorize`],
//! which re-derives identity from the session token before anything else
//! happens.

pub mod analytics;
pub mod brokers;
pub mod capability_manager;
pub mod config;
pub mod error;
pub mod export;
pub mod identity;
pub mod ipc_server;
pub mod rate_limiter;
pub mod resource_meter;
pub mod secure_wrapper;
pub mod supervisor;
pub mod version;

pub use analytics::AnalyticsStore;
pub use brokers::BrokerRouter;
pub use capability_manager::CapabilityManager;
pub use config::HostConfig;
pub use error::{HostError, HostResult};
pub use identity::IdentityRegistry;
pub use ipc_server::IpcServer;
pub use rate_limiter::RateLimiter;
pub use resource_meter::ResourceMeter;
pub use secure_wrapper::SecureWrapper;
pub use supervisor::PluginSupervisor;
pub use version::VersionChecker;

use std::path::PathBuf;

use brokers::filesystem::FilesystemBroker;
use brokers::hardware::HardwareBroker;
use brokers::logging::LoggingBroker;
use brokers::messaging::MessagingBroker;

/// Assembles the full set of host-process singletons from a [`HostConfig`].
/// This is the single place that owns every instance the rest of the
/// crate otherwise receives as a dependency.
pub struct Host {
    pub config: HostConfig,
    pub identity: IdentityRegistry,
    pub capabilities: CapabilityManager,
    pub rate_limiter: RateLimiter,
    pub resource_meter: ResourceMeter,
    pub analytics: AnalyticsStore,
    pub supervisor: PluginSupervisor,
    pub brokers: BrokerRouter,
    pub ipc_server: IpcServer,
}

impl Host {
    /// Build every host singleton, wiring the [`SecureWrapper`] pipeline
    /// into the broker router. `guestd_path` is the path to the
    /// `sandbox-guestd` binary the supervisor spawns for each loaded
    /// plugin, `host_version` is the running platform version checked
    /// against each plugin's `min_host_version`.
    pub fn new(config: HostConfig, guestd_path: impl Into<PathBuf>, host_version: semver::Version) -> Self {
        let identity = IdentityRegistry::new();
        let capabilities = CapabilityManager::new();
        let rate_limiter = RateLimiter::new(config.rate_limit_policies.clone());
        let resource_meter = ResourceMeter::new(config.default_resource_limits);
        let analytics = AnalyticsStore::new(&config.analytics_dir);
        let version_checker = VersionChecker::new(host_version);

        let supervisor = PluginSupervisor::new(
            identity.clone(),
            capabilities.clone(),
            resource_meter.clone(),
            analytics.clone(),
            version_checker,
            guestd_path,
        );

        let wrapper = SecureWrapper::new(identity.clone(), capabilities.clone(), rate_limiter.clone(), analytics.clone());

        let filesystem = FilesystemBroker::new(&config.app_data_dir);
        let hardware = HardwareBroker::new(capabilities.clone());
        let messaging = MessagingBroker::new(config.message_queue_capacity, config.default_call_deadline);
        let logging = LoggingBroker::new(
            config.app_data_dir.join("logs"),
            config.log_channel_capacity,
            config.logging_circuit_breaker.failure_threshold,
            config.logging_circuit_breaker.cooldown,
        );

        let brokers = BrokerRouter::new(wrapper, resource_meter.clone(), filesystem, hardware, messaging, logging);
        let ipc_server = IpcServer::new(supervisor.clone(), brokers.clone(), config.app_data_dir.join("ipc"));

        Self { config, identity, capabilities, rate_limiter, resource_meter, analytics, supervisor, brokers, ipc_server }
    }

    /// Bind the IPC listener for `record.id`, spawn its sandbox child
    /// pointed at that socket, and start serving the connection in its
    /// own task. Returns once the child process has been spawned; the
    /// handshake and call/reply loop run asynchronously until the
    /// sandbox disconnects or crashes.
    pub async fn load_plugin(
        &self,
        record: &sandbox_types::PluginRecord,
        bundle_path: &std::path::Path,
    ) -> HostResult<()> {
        let listener = self.ipc_server.bind(&record.id).await?;
        let socket_path = self.ipc_server.socket_path(&record.id);

        let (child, _instance) = self.supervisor.load(record, bundle_path, &socket_path).await?;

        let ipc_server = self.ipc_server.clone();
        let plugin_id = record.id.clone();
        tokio::spawn(async move {
            // Own the child handle for the lifetime of the connection so
            // `kill_on_drop` reaps it if this task is ever aborted.
            let _child = child;
            ipc_server.serve(plugin_id, listener).await;
        });

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn host_assembles_without_panicking() {
        let dir = tempfile::tempdir().unwrap();
        let config = HostConfig::builder(dir.path()).build();
        let host = Host::new(config, "/bin/true", semver::Version::new(1, 0, 0));

        assert!(host.supervisor.loaded().is_empty());
    }
}
