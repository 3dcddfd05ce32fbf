//! The plugin supervisor: spawns sandbox child processes, drives each
//! through `Spawning -> Handshaking -> Running -> Draining -> Dead/Failed`,
//! and detects crashes. Modeled as a task-per-sandbox owner that drives a
//! plugin through its own state machine at a process boundary rather than
//! an in-process trait object.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::process::{Child, Command};

use sandbox_types::{
    AuditKind, AuditSeverity, PluginId, PluginRecord, SandboxInstance, SandboxState, Session,
};

use crate::analytics::{now_epoch, AnalyticsStore, Stream};
use crate::capability_manager::CapabilityManager;
use crate::error::{HostError, HostResult};
use crate::identity::{ExpectedSpawn, HandshakeClaim, IdentityRegistry};
use crate::resource_meter::ResourceMeter;
use crate::version::VersionChecker;

/// Owns every running sandbox instance and the host-process singletons a
/// load/unload cycle must touch.
#[derive(Clone)]
pub struct PluginSupervisor {
    identity: IdentityRegistry,
    capabilities: CapabilityManager,
    resource_meter: ResourceMeter,
    analytics: AnalyticsStore,
    version_checker: VersionChecker,
    instances: Arc<DashMap<PluginId, Mutex<SandboxInstance>>>,
    expected: Arc<DashMap<PluginId, ExpectedSpawn>>,
    guestd_path: PathBuf,
}

impl PluginSupervisor {
    pub fn new(
        identity: IdentityRegistry,
        capabilities: CapabilityManager,
        resource_meter: ResourceMeter,
        analytics: AnalyticsStore,
        version_checker: VersionChecker,
        guestd_path: impl Into<PathBuf>,
    ) -> Self {
        Self {
            identity,
            capabilities,
            resource_meter,
            analytics,
            version_checker,
            instances: Arc::new(DashMap::new()),
            expected: Arc::new(DashMap::new()),
            guestd_path: guestd_path.into(),
        }
    }

    async fn audit(&self, kind: AuditKind, severity: AuditSeverity, plugin_id: Option<String>, message: String) {
        let mut event = sandbox_types::AuditEvent::new(now_epoch(), kind, severity, "supervisor", message);
        if let Some(plugin_id) = plugin_id {
            event = event.with_plugin(plugin_id);
        }
        if let Err(err) = self.analytics.append(Stream::SecurityEvents, &event).await {
            tracing::error!(error = %err, "failed to persist supervisor audit event");
        }
    }

    /// Launch the sandbox child process for `bundle_path`, telling it to
    /// connect back to `ipc_socket_path` (a listener the caller has
    /// already bound via [`crate::ipc_server::IpcServer::bind`]). This
    /// only starts the OS process; the instance stays in `Spawning` until
    /// [`PluginSupervisor::complete_handshake`] observes the child's
    /// handshake claim over that connection.
    pub async fn load(
        &self,
        record: &PluginRecord,
        bundle_path: &Path,
        ipc_socket_path: &Path,
    ) -> HostResult<(Child, SandboxInstance)> {
        self.version_checker.check(record)?;

        if self.instances.contains_key(&record.id) {
            return Err(HostError::AlreadyLoaded { id: record.id.as_str().to_string() });
        }

        self.capabilities.install_declared(&record.id, &record.declared_capabilities);

        let child = Command::new(&self.guestd_path)
            .arg("--plugin-id")
            .arg(record.id.as_str())
            .arg("--bundle")
            .arg(bundle_path)
            .arg("--ipc-socket")
            .arg(ipc_socket_path)
            .kill_on_drop(true)
            .spawn()
            .map_err(HostError::Io)?;

        let pid = child.id().unwrap_or(0);
        let instance = SandboxInstance::spawning(record.id.clone(), pid, now_epoch());

        self.instances.insert(record.id.clone(), Mutex::new(instance.clone()));
        self.expected.insert(
            record.id.clone(),
            ExpectedSpawn { plugin_id: record.id.clone(), content_digest: record.content_digest.clone() },
        );

        self.transition(&record.id, SandboxState::Handshaking)?;

        Ok((child, instance))
    }

    /// Apply a lifecycle transition, enforcing [`SandboxState::can_transition_to`].
    fn transition(&self, plugin_id: &PluginId, next: SandboxState) -> HostResult<()> {
        let entry = self
            .instances
            .get(plugin_id)
            .ok_or_else(|| HostError::PluginNotFound { id: plugin_id.as_str().to_string() })?;
        let mut instance = entry.lock();

        if !instance.state.can_transition_to(next) {
            return Err(HostError::InvalidTransition { id: plugin_id.as_str().to_string(), from: instance.state, to: next });
        }
        instance.state = next;
        Ok(())
    }

    /// Complete the handshake for a freshly spawned child: attest its
    /// claim against the expected spawn record and, on success, open the
    /// session and transition the instance to `Running`.
    pub async fn complete_handshake(&self, claim: HandshakeClaim) -> HostResult<Session> {
        let plugin_id = claim.plugin_id.clone();
        let expected = self
            .expected
            .get(&plugin_id)
            .ok_or_else(|| HostError::PluginNotFound { id: plugin_id.as_str().to_string() })?
            .clone();

        match self.identity.attest(claim.clone(), &expected, now_epoch()) {
            Ok(session) => {
                self.transition(&plugin_id, SandboxState::Running)?;
                self.resource_meter.start_tracking(&plugin_id);
                self.audit(
                    AuditKind::SessionOpened,
                    AuditSeverity::Info,
                    Some(plugin_id.as_str().to_string()),
                    "sandbox session opened after successful handshake".to_string(),
                )
                .await;
                Ok(session)
            }
            Err(err) => {
                self.audit(
                    AuditKind::SpoofingAttempt,
                    AuditSeverity::High,
                    Some(plugin_id.as_str().to_string()),
                    format!("handshake claim for '{plugin_id}' did not match its expected spawn record"),
                )
                .await;
                let _ = self.transition(&plugin_id, SandboxState::Failed);
                Err(err)
            }
        }
    }

    /// Liveness probe: `true` only while the instance is `Running`.
    pub fn ping(&self, plugin_id: &PluginId) -> bool {
        self.instances
            .get(plugin_id)
            .map(|entry| entry.lock().state == SandboxState::Running)
            .unwrap_or(false)
    }

    /// Begin a graceful shutdown: in-flight calls are allowed to finish,
    /// but no new ones are admitted once the instance is `Draining`.
    pub fn begin_drain(&self, plugin_id: &PluginId) -> HostResult<()> {
        self.transition(plugin_id, SandboxState::Draining)
    }

    /// Tear down a loaded plugin's instance: close its session, stop
    /// resource tracking, and drop the supervisor's bookkeeping. Per
    /// invariant L2, the next `load` for the same plugin id starts with a
    /// fresh instance (`memory_peak = 0`).
    pub async fn unload(&self, plugin_id: &PluginId, session_token: Option<sandbox_types::SessionToken>) -> HostResult<()> {
        let current_state = self
            .instances
            .get(plugin_id)
            .ok_or_else(|| HostError::PluginNotFound { id: plugin_id.as_str().to_string() })?
            .lock()
            .state;

        if matches!(current_state, SandboxState::Running | SandboxState::Draining) {
            self.transition(plugin_id, SandboxState::Dead)?;
        }

        if let Some(token) = session_token {
            self.identity.close(token);
        }
        self.resource_meter.stop_tracking(plugin_id);
        self.capabilities.clear(plugin_id);
        self.instances.remove(plugin_id);
        self.expected.remove(plugin_id);

        self.audit(
            AuditKind::SessionClosed,
            AuditSeverity::Info,
            Some(plugin_id.as_str().to_string()),
            "sandbox instance unloaded".to_string(),
        )
        .await;
        Ok(())
    }

    /// Record an unexpected process exit. Unlike [`PluginSupervisor::unload`],
    /// this transitions into `Dead`/`Failed` from any reachable state and
    /// always emits a `SANDBOX_CRASH` audit event, per §7's "sandbox
    /// crashes are fatal to the plugin instance and never propagate into
    /// the host".
    pub async fn on_crash(&self, plugin_id: &PluginId) {
        if let Some(entry) = self.instances.get(plugin_id) {
            let mut instance = entry.lock();
            instance.state = if instance.state == SandboxState::Running || instance.state == SandboxState::Draining {
                SandboxState::Dead
            } else {
                SandboxState::Failed
            };
        }
        self.resource_meter.stop_tracking(plugin_id);

        self.audit(
            AuditKind::SandboxCrash,
            AuditSeverity::Critical,
            Some(plugin_id.as_str().to_string()),
            format!("sandbox process for '{plugin_id}' exited unexpectedly"),
        )
        .await;
    }

    /// The current lifecycle state of a loaded plugin, if any.
    pub fn state_of(&self, plugin_id: &PluginId) -> Option<SandboxState> {
        self.instances.get(plugin_id).map(|entry| entry.lock().state)
    }

    /// Every currently tracked sandbox instance, for `getLoaded`.
    pub fn loaded(&self) -> Vec<SandboxInstance> {
        self.instances.iter().map(|entry| entry.lock().clone()).collect()
    }

    /// The OS process id of a loaded plugin's sandbox, for `getPid`.
    pub fn pid_of(&self, plugin_id: &PluginId) -> Option<u32> {
        self.instances.get(plugin_id).map(|entry| entry.lock().pid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sandbox_types::PeerCredentials;

    use crate::config::ResourceLimits;

    fn plugin(id: &str) -> PluginId {
        PluginId::new(id).unwrap()
    }

    fn record(id: &str) -> PluginRecord {
        PluginRecord {
            id: plugin(id),
            version: semver::Version::new(1, 0, 0),
            declared_capabilities: vec![],
            developer_id: "dev-1".to_string(),
            min_host_version: semver::Version::new(0, 1, 0),
            content_digest: "digest-abc".to_string(),
        }
    }

    fn supervisor() -> (PluginSupervisor, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let supervisor = PluginSupervisor::new(
            IdentityRegistry::new(),
            CapabilityManager::new(),
            ResourceMeter::new(ResourceLimits::default()),
            AnalyticsStore::new(dir.path()),
            VersionChecker::new(semver::Version::new(1, 0, 0)),
            "/bin/true",
        );
        (supervisor, dir)
    }

    fn credentials() -> PeerCredentials {
        PeerCredentials { pid: 4242, start_epoch: 0 }
    }

    #[tokio::test]
    async fn load_then_handshake_reaches_running() {
        let (supervisor, dir) = supervisor();
        let record = record("demo-automation");
        let bundle = dir.path().join("bundle.zip");

        let (_child, instance) = supervisor.load(&record, &bundle, &dir.path().join("ipc.sock")).await.unwrap();
        assert_eq!(instance.state, SandboxState::Spawning);
        assert_eq!(supervisor.state_of(&record.id), Some(SandboxState::Handshaking));

        let claim = HandshakeClaim {
            plugin_id: record.id.clone(),
            content_digest: record.content_digest.clone(),
            peer_credentials: credentials(),
        };
        let session = supervisor.complete_handshake(claim).await.unwrap();

        assert_eq!(supervisor.state_of(&record.id), Some(SandboxState::Running));
        assert!(supervisor.ping(&record.id));
        assert_eq!(session.plugin_id, record.id);
    }

    #[tokio::test]
    async fn mismatched_handshake_claim_fails_and_marks_failed() {
        let (supervisor, dir) = supervisor();
        let record = record("demo-automation");
        supervisor.load(&record, &dir.path().join("bundle.zip"), &dir.path().join("ipc.sock")).await.unwrap();

        let claim = HandshakeClaim {
            plugin_id: plugin("evil-other"),
            content_digest: record.content_digest.clone(),
            peer_credentials: credentials(),
        };
        let result = supervisor.complete_handshake(claim).await;
        assert!(result.is_err());
        assert_eq!(supervisor.state_of(&plugin("evil-other")), None);
    }

    #[tokio::test]
    async fn version_incompatible_plugin_is_rejected_before_spawn() {
        let (supervisor, dir) = supervisor();
        let mut record = record("demo-automation");
        record.min_host_version = semver::Version::new(9, 0, 0);

        let result = supervisor.load(&record, &dir.path().join("bundle.zip"), &dir.path().join("ipc.sock")).await;
        assert!(matches!(result, Err(HostError::InvalidArgument(_))));
        assert_eq!(supervisor.state_of(&record.id), None);
    }

    #[tokio::test]
    async fn double_load_is_rejected() {
        let (supervisor, dir) = supervisor();
        let record = record("demo-automation");
        supervisor.load(&record, &dir.path().join("bundle.zip"), &dir.path().join("ipc.sock")).await.unwrap();

        let result = supervisor.load(&record, &dir.path().join("bundle.zip"), &dir.path().join("ipc.sock")).await;
        assert!(matches!(result, Err(HostError::AlreadyLoaded { .. })));
    }

    #[tokio::test]
    async fn unload_then_reload_yields_fresh_instance() {
        let (supervisor, dir) = supervisor();
        let record = record("demo-automation");
        supervisor.load(&record, &dir.path().join("bundle.zip"), &dir.path().join("ipc.sock")).await.unwrap();
        let claim = HandshakeClaim {
            plugin_id: record.id.clone(),
            content_digest: record.content_digest.clone(),
            peer_credentials: credentials(),
        };
        let session = supervisor.complete_handshake(claim).await.unwrap();

        supervisor.unload(&record.id, Some(session.token)).await.unwrap();
        assert_eq!(supervisor.state_of(&record.id), None);

        let (_child, fresh) = supervisor.load(&record, &dir.path().join("bundle.zip"), &dir.path().join("ipc.sock")).await.unwrap();
        assert_eq!(fresh.memory_peak_mib, 0);
    }

    #[tokio::test]
    async fn crash_from_running_transitions_to_dead_and_audits() {
        let (supervisor, dir) = supervisor();
        let record = record("demo-automation");
        supervisor.load(&record, &dir.path().join("bundle.zip"), &dir.path().join("ipc.sock")).await.unwrap();
        let claim = HandshakeClaim {
            plugin_id: record.id.clone(),
            content_digest: record.content_digest.clone(),
            peer_credentials: credentials(),
        };
        supervisor.complete_handshake(claim).await.unwrap();

        supervisor.on_crash(&record.id).await;
        assert_eq!(supervisor.state_of(&record.id), Some(SandboxState::Dead));

        let events = supervisor.analytics.read_all(Stream::SecurityEvents).await.unwrap();
        assert!(events.iter().any(|e| e["kind"] == "sandbox_crash"));
    }
}
