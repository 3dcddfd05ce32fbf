//! Binds the per-plugin Unix domain socket that connects a spawned
//! sandbox child back to this host process, and drives the frame
//! transport end to end: handshake, the call/reply loop, then graceful
//! shutdown or crash detection.
//!
//! One [`IpcServer::serve`] call owns exactly one sandbox connection for
//! the lifetime of that plugin instance, the way `PluginSupervisor` owns
//! exactly one `SandboxInstance` per plugin id.

use std::path::PathBuf;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{UnixListener, UnixStream};

use sandbox_ipc::{read_envelope, write_envelope, BrokerReply, Envelope};
use sandbox_types::{PeerCredentials, PluginId, Session};

use crate::analytics::now_epoch;
use crate::brokers::BrokerRouter;
use crate::error::{HostError, HostResult};
use crate::identity::HandshakeClaim;
use crate::supervisor::PluginSupervisor;

/// Owns the directory under which every plugin's `<plugin_id>.sock` is
/// bound, and the logic that serves one sandbox connection end to end.
#[derive(Clone)]
pub struct IpcServer {
    supervisor: PluginSupervisor,
    brokers: BrokerRouter,
    socket_dir: PathBuf,
}

impl IpcServer {
    pub fn new(supervisor: PluginSupervisor, brokers: BrokerRouter, socket_dir: impl Into<PathBuf>) -> Self {
        Self { supervisor, brokers, socket_dir: socket_dir.into() }
    }

    /// The socket path `sandbox-guestd` is told to connect to via
    /// `--ipc-socket`, passed on the child's command line by
    /// [`PluginSupervisor::load`].
    pub fn socket_path(&self, plugin_id: &PluginId) -> PathBuf {
        self.socket_dir.join(format!("{}.sock", plugin_id.as_str()))
    }

    /// Bind the listener for `plugin_id` before the child is spawned. A
    /// stale socket file left behind by a prior crash is removed first;
    /// `bind` itself never blocks waiting for a connection.
    pub async fn bind(&self, plugin_id: &PluginId) -> HostResult<UnixListener> {
        tokio::fs::create_dir_all(&self.socket_dir).await.map_err(|e| HostError::Internal(e.to_string()))?;

        let path = self.socket_path(plugin_id);
        let _ = tokio::fs::remove_file(&path).await;
        UnixListener::bind(&path).map_err(|e| HostError::Internal(e.to_string()))
    }

    /// Accept the child's single connection on `listener` and serve it
    /// until the child disconnects or asks to shut down.
    ///
    /// Never propagates an error to the caller: a handshake failure or a
    /// mid-session transport error both resolve through
    /// [`PluginSupervisor::on_crash`], since a broken sandbox connection is
    /// the sandbox's failure, never the host's. Intended to be spawned as
    /// its own task per loaded plugin.
    pub async fn serve(&self, plugin_id: PluginId, listener: UnixListener) {
        let stream = match listener.accept().await {
            Ok((stream, _addr)) => stream,
            Err(err) => {
                tracing::warn!(plugin = %plugin_id, error = %err, "failed to accept sandbox connection");
                self.supervisor.on_crash(&plugin_id).await;
                return;
            }
        };

        let peer_credentials = peer_credentials_of(&stream);
        let (mut reader, mut writer) = stream.into_split();

        let session = match self.run_handshake(&plugin_id, &mut reader, &mut writer, peer_credentials).await {
            Ok(session) => session,
            Err(err) => {
                tracing::warn!(plugin = %plugin_id, error = %err, "sandbox handshake failed");
                self.supervisor.on_crash(&plugin_id).await;
                return;
            }
        };

        match self.serve_calls(&mut reader, &mut writer, peer_credentials).await {
            Ok(()) => {
                if let Err(err) = self.supervisor.unload(&plugin_id, Some(session.token)).await {
                    tracing::warn!(plugin = %plugin_id, error = %err, "failed to unload after a graceful disconnect");
                }
            }
            Err(err) => {
                tracing::warn!(plugin = %plugin_id, error = %err, "sandbox connection ended abnormally");
                self.supervisor.on_crash(&plugin_id).await;
            }
        }
    }

    async fn run_handshake(
        &self,
        expected_plugin_id: &PluginId,
        reader: &mut (impl AsyncRead + Unpin),
        writer: &mut (impl AsyncWrite + Unpin),
        peer_credentials: PeerCredentials,
    ) -> HostResult<Session> {
        let envelope = read_envelope(reader).await?;
        let Some(Envelope::Handshake { plugin_id, content_digest, .. }) = envelope else {
            return Err(HostError::Internal("expected a handshake as the sandbox's first frame".to_string()));
        };
        if &plugin_id != expected_plugin_id {
            return Err(HostError::IdentityMismatch { claimed: plugin_id.as_str().to_string() });
        }

        let claim = HandshakeClaim { plugin_id, content_digest, peer_credentials };
        let session = self.supervisor.complete_handshake(claim).await?;

        write_envelope(writer, &Envelope::HandshakeAck { session_token: session.token }).await?;
        Ok(session)
    }

    /// Serve calls until the child disconnects cleanly or sends
    /// `Envelope::Shutdown`. A `Message` or `Pong` frame is acknowledged
    /// by simply continuing the loop: plugin-to-plugin messaging is
    /// reached through the `sendMessage`/`receiveMessages` broker calls,
    /// not a bare envelope, so there is nothing further to route here.
    async fn serve_calls(
        &self,
        reader: &mut (impl AsyncRead + Unpin),
        writer: &mut (impl AsyncWrite + Unpin),
        peer_credentials: PeerCredentials,
    ) -> HostResult<()> {
        loop {
            match read_envelope(reader).await? {
                Some(Envelope::Call(call)) => {
                    let reply: BrokerReply = self.brokers.dispatch(call, Some(&peer_credentials)).await;
                    write_envelope(writer, &Envelope::Reply(reply)).await?;
                }
                Some(Envelope::Shutdown) | None => return Ok(()),
                Some(_other) => continue,
            }
        }
    }
}

#[cfg(unix)]
fn peer_credentials_of(stream: &UnixStream) -> PeerCredentials {
    match stream.peer_cred() {
        Ok(cred) => PeerCredentials { pid: cred.pid().unwrap_or(0) as u32, start_epoch: now_epoch() },
        Err(_) => PeerCredentials { pid: 0, start_epoch: now_epoch() },
    }
}

#[cfg(not(unix))]
fn peer_credentials_of(_stream: &UnixStream) -> PeerCredentials {
    PeerCredentials { pid: 0, start_epoch: now_epoch() }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sandbox_types::{Capability, PluginRecord};
    use uuid::Uuid;

    use crate::capability_manager::CapabilityManager;
    use crate::config::MethodPolicies;
    use crate::identity::IdentityRegistry;
    use crate::rate_limiter::RateLimiter;
    use crate::resource_meter::ResourceMeter;
    use crate::secure_wrapper::SecureWrapper;
    use crate::version::VersionChecker;
    use crate::AnalyticsStore;

    fn plugin(id: &str) -> PluginId {
        PluginId::new(id).unwrap()
    }

    fn record(id: &str) -> PluginRecord {
        PluginRecord {
            id: plugin(id),
            version: semver::Version::new(1, 0, 0),
            declared_capabilities: vec![Capability::new(sandbox_types::capability::names::FILE_READ)],
            developer_id: "dev-1".to_string(),
            min_host_version: semver::Version::new(0, 1, 0),
            content_digest: "digest-abc".to_string(),
        }
    }

    fn router(dir: &std::path::Path, analytics: AnalyticsStore, capabilities: CapabilityManager) -> BrokerRouter {
        use crate::brokers::filesystem::FilesystemBroker;
        use crate::brokers::hardware::HardwareBroker;
        use crate::brokers::logging::LoggingBroker;
        use crate::brokers::messaging::MessagingBroker;

        let identity = IdentityRegistry::new();
        let wrapper = SecureWrapper::new(
            identity,
            capabilities.clone(),
            RateLimiter::new(MethodPolicies::platform_defaults()),
            analytics,
        );
        BrokerRouter::new(
            wrapper,
            ResourceMeter::new(crate::config::ResourceLimits::default()),
            FilesystemBroker::new(dir),
            HardwareBroker::new(capabilities),
            MessagingBroker::new(64, std::time::Duration::from_secs(5)),
            LoggingBroker::new(dir.join("logs"), 64, 10, std::time::Duration::from_secs(300)),
        )
    }

    async fn supervisor_and_server() -> (IpcServer, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let identity = IdentityRegistry::new();
        let capabilities = CapabilityManager::new();
        let analytics = AnalyticsStore::new(dir.path());

        let supervisor = PluginSupervisor::new(
            identity,
            capabilities.clone(),
            ResourceMeter::new(crate::config::ResourceLimits::default()),
            analytics.clone(),
            VersionChecker::new(semver::Version::new(1, 0, 0)),
            "/bin/true",
        );
        let brokers = router(dir.path(), analytics, capabilities);
        let server = IpcServer::new(supervisor, brokers, dir.path().join("ipc"));
        (server, dir)
    }

    #[tokio::test]
    async fn handshake_then_call_round_trips_over_the_socket() {
        let (server, dir) = supervisor_and_server().await;
        let record = record("demo-automation");

        let listener = server.bind(&record.id).await.unwrap();
        let socket_path = server.socket_path(&record.id);
        let (_child, _instance) = server
            .supervisor
            .load(&record, &dir.path().join("bundle.zip"), &socket_path)
            .await
            .unwrap();

        let server_task = {
            let server = server.clone();
            let id = record.id.clone();
            tokio::spawn(async move { server.serve(id, listener).await })
        };

        let mut client = UnixStream::connect(&socket_path).await.unwrap();
        write_envelope(
            &mut client,
            &Envelope::Handshake { plugin_id: record.id.clone(), content_digest: record.content_digest.clone(), pid: 1 },
        )
        .await
        .unwrap();

        let ack = read_envelope(&mut client).await.unwrap().unwrap();
        let Envelope::HandshakeAck { session_token } = ack else { panic!("expected handshake ack") };

        let call_id = Uuid::new_v4();
        write_envelope(
            &mut client,
            &Envelope::Call(sandbox_ipc::BrokerCall {
                call_id,
                session_token,
                claimed_plugin_id: record.id.clone(),
                method: "fileExists".to_string(),
                args: serde_json::json!({"path": "nope.txt"}),
            }),
        )
        .await
        .unwrap();

        let reply = read_envelope(&mut client).await.unwrap().unwrap();
        let Envelope::Reply(reply) = reply else { panic!("expected a reply") };
        assert_eq!(reply.call_id, call_id);
        assert_eq!(reply.result.unwrap(), serde_json::json!(false));

        write_envelope(&mut client, &Envelope::Shutdown).await.unwrap();
        server_task.await.unwrap();

        assert_eq!(server.supervisor.state_of(&record.id), None);
    }

    #[tokio::test]
    async fn disconnect_without_handshake_is_treated_as_a_crash() {
        let (server, dir) = supervisor_and_server().await;
        let record = record("demo-automation");

        let listener = server.bind(&record.id).await.unwrap();
        let socket_path = server.socket_path(&record.id);
        server.supervisor.load(&record, &dir.path().join("bundle.zip"), &socket_path).await.unwrap();

        let server_task = {
            let server = server.clone();
            let id = record.id.clone();
            tokio::spawn(async move { server.serve(id, listener).await })
        };

        let client = UnixStream::connect(&socket_path).await.unwrap();
        drop(client);
        server_task.await.unwrap();

        assert_eq!(server.supervisor.state_of(&record.id), Some(sandbox_types::SandboxState::Failed));
    }
}
