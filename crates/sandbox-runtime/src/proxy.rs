//! Opaque broker proxies the sandbox uses to reach the host's privileged
//! services. Every call is framed as a [`sandbox_ipc::BrokerCall`]
//! carrying `(claimed_plugin_id, session_token, method, args)`; the host's
//! `SecureWrapper` re-derives the caller's real identity from the session
//! token, so the values sent here are never trusted on their own — they
//! only let the host detect a spoofing attempt if they disagree.
//!
//! This is the sandbox-side half of the call/reply loop
//! `sandbox_host::ipc_server::IpcServer::serve_calls` drives on the host.
//! One [`BrokerProxy`] owns the connection for the lifetime of the
//! sandbox; calls are serialized one at a time, matching the sandbox
//! process's internally single-threaded cooperative execution of plugin
//! code — a broker call blocks the calling task until the host replies.

use std::sync::atomic::{AtomicBool, Ordering};

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::Mutex;
use uuid::Uuid;

use sandbox_ipc::{read_envelope, write_envelope, BrokerCall, DeadlinePolicy, Envelope};
use sandbox_types::{PluginId, SandboxError, SessionToken};

use crate::error::{RuntimeError, RuntimeResult};

/// A single framed duplex connection to the host, used to proxy every
/// broker call this sandbox instance makes.
pub struct BrokerProxy<S> {
    stream: Mutex<S>,
    plugin_id: PluginId,
    session_token: SessionToken,
    deadlines: DeadlinePolicy,
    closed: AtomicBool,
}

impl<S: AsyncRead + AsyncWrite + Unpin> BrokerProxy<S> {
    pub fn new(stream: S, plugin_id: PluginId, session_token: SessionToken) -> Self {
        Self::with_deadlines(stream, plugin_id, session_token, DeadlinePolicy::default())
    }

    /// Construct a proxy whose calls are bounded by `deadlines` instead of
    /// [`DeadlinePolicy::default`] — used by [`crate::runtime::PluginRuntime::connect`]
    /// so the sandbox honors the same per-method deadline policy enforced
    /// at the host's transport layer.
    pub fn with_deadlines(stream: S, plugin_id: PluginId, session_token: SessionToken, deadlines: DeadlinePolicy) -> Self {
        Self { stream: Mutex::new(stream), plugin_id, session_token, deadlines, closed: AtomicBool::new(false) }
    }

    /// Issue one broker call and wait for its correlated reply, bounded by
    /// this method's configured IPC deadline: every suspendable call
    /// carries an IPC deadline, after which the caller receives `Timeout`.
    ///
    /// `claimed_plugin_id` is always this proxy's own bound identity: a
    /// well-behaved plugin has no way to claim a different one, since
    /// this type is the only path to the host a plugin has. A malicious
    /// host-side test harness exercising identity mismatch constructs the
    /// `BrokerCall` frame directly instead of going through this type.
    pub async fn call(&self, method: &str, args: serde_json::Value) -> Result<serde_json::Value, SandboxError> {
        let deadline = self.deadlines.for_method(method);
        match tokio::time::timeout(deadline, self.call_inner(method, args)).await {
            Ok(result) => result,
            Err(_) => Err(SandboxError::Timeout),
        }
    }

    async fn call_inner(&self, method: &str, args: serde_json::Value) -> Result<serde_json::Value, SandboxError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(SandboxError::SandboxCrash);
        }

        let call_id = Uuid::new_v4();
        let call = BrokerCall {
            call_id,
            session_token: self.session_token,
            claimed_plugin_id: self.plugin_id.clone(),
            method: method.to_string(),
            args,
        };

        let mut stream = self.stream.lock().await;
        if write_envelope(&mut *stream, &Envelope::Call(call)).await.is_err() {
            self.closed.store(true, Ordering::Release);
            return Err(SandboxError::SandboxCrash);
        }

        loop {
            match read_envelope(&mut *stream).await {
                Ok(Some(Envelope::Reply(reply))) if reply.call_id == call_id => return reply.result,
                Ok(Some(Envelope::Reply(_))) => continue, // stale reply from a timed-out prior call
                Ok(Some(_other)) => continue,
                Ok(None) | Err(_) => {
                    self.closed.store(true, Ordering::Release);
                    return Err(SandboxError::SandboxCrash);
                }
            }
        }
    }

    /// Send a graceful shutdown notice to the host, ending the call loop
    /// the host's `IpcServer::serve_calls` is driving.
    pub async fn shutdown(&self) -> RuntimeResult<()> {
        let mut stream = self.stream.lock().await;
        write_envelope(&mut *stream, &Envelope::Shutdown).await.map_err(RuntimeError::from)
    }
}

/// Typed convenience wrappers over the four broker surfaces, all routed
/// through a shared [`BrokerProxy`]. Kept thin
/// deliberately: every method here is a direct `call()` with the wire
/// shape the matching `sandbox_host::brokers` handler expects, nothing
/// more.
pub struct BrokerProxies<'a, S> {
    inner: &'a BrokerProxy<S>,
}

impl<'a, S: AsyncRead + AsyncWrite + Unpin> BrokerProxies<'a, S> {
    pub fn new(inner: &'a BrokerProxy<S>) -> Self {
        Self { inner }
    }

    pub async fn file_exists(&self, path: &str) -> Result<bool, SandboxError> {
        let reply = self.inner.call("fileExists", serde_json::json!({"path": path})).await?;
        Ok(reply.as_bool().unwrap_or(false))
    }

    pub async fn create_file(&self, path: &str) -> Result<(), SandboxError> {
        self.inner.call("createFile", serde_json::json!({"path": path})).await?;
        Ok(())
    }

    pub async fn list_files(&self, path: &str) -> Result<serde_json::Value, SandboxError> {
        self.inner.call("listFiles", serde_json::json!({"path": path})).await
    }

    pub async fn http_get(&self, url: &str) -> Result<(i64, String), SandboxError> {
        match self.inner.call("httpGet", serde_json::json!({"url": url})).await {
            Ok(value) => {
                let status = value.get("status").and_then(|v| v.as_i64()).unwrap_or(-1);
                let body = value.get("body").and_then(|v| v.as_str()).unwrap_or_default().to_string();
                Ok((status, body))
            }
            Err(err) => Err(err),
        }
    }

    pub async fn send_message(&self, receiver: &str, payload: serde_json::Value) -> Result<serde_json::Value, SandboxError> {
        self.inner.call("sendMessage", serde_json::json!({"receiver": receiver, "payload": payload})).await
    }

    pub async fn submit_log(&self, priority: &str, tag: &str, message: &str) -> Result<(), SandboxError> {
        let epoch = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        self.inner
            .call(
                "submitLog",
                serde_json::json!({
                    "plugin_id": self.inner.plugin_id.as_str(),
                    "priority": priority,
                    "tag": tag,
                    "message": message,
                    "epoch": epoch,
                }),
            )
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sandbox_ipc::BrokerReply;

    fn plugin(id: &str) -> PluginId {
        PluginId::new(id).unwrap()
    }

    #[tokio::test]
    async fn call_matches_reply_by_call_id() {
        let (mut client, mut server) = tokio::io::duplex(8192);

        let responder = tokio::spawn(async move {
            let envelope = read_envelope(&mut server).await.unwrap().unwrap();
            let Envelope::Call(call) = envelope else { panic!("expected a call") };
            write_envelope(
                &mut server,
                &Envelope::Reply(BrokerReply { call_id: call.call_id, result: Ok(serde_json::json!(true)) }),
            )
            .await
            .unwrap();
        });

        let proxy = BrokerProxy::new(&mut client, plugin("demo-automation"), SessionToken(1));
        let result = proxy.call("fileExists", serde_json::json!({"path": "a.txt"})).await.unwrap();
        assert_eq!(result, serde_json::json!(true));
        responder.await.unwrap();
    }

    #[tokio::test]
    async fn call_times_out_when_the_host_never_replies() {
        let (client, _server) = tokio::io::duplex(8192);
        let deadlines = DeadlinePolicy { default_call: std::time::Duration::from_millis(20), handshake: std::time::Duration::from_millis(20) };
        let proxy = BrokerProxy::with_deadlines(client, plugin("demo-automation"), SessionToken(1), deadlines);

        let result = proxy.call("httpGet", serde_json::json!({"url": "https://example.com"})).await;
        assert_eq!(result, Err(SandboxError::Timeout));
    }

    #[tokio::test]
    async fn closed_stream_yields_sandbox_crash() {
        let (client, server) = tokio::io::duplex(8192);
        drop(server);

        let proxy = BrokerProxy::new(client, plugin("demo-automation"), SessionToken(1));
        let result = proxy.call("ping", serde_json::json!({})).await;
        assert_eq!(result, Err(SandboxError::SandboxCrash));
    }

    #[tokio::test]
    async fn typed_http_get_extracts_status_and_body() {
        let (mut client, mut server) = tokio::io::duplex(8192);

        let responder = tokio::spawn(async move {
            let envelope = read_envelope(&mut server).await.unwrap().unwrap();
            let Envelope::Call(call) = envelope else { panic!("expected a call") };
            write_envelope(
                &mut server,
                &Envelope::Reply(BrokerReply {
                    call_id: call.call_id,
                    result: Ok(serde_json::json!({"status": 200, "body": "hi"})),
                }),
            )
            .await
            .unwrap();
        });

        let proxy = BrokerProxy::new(&mut client, plugin("demo-automation"), SessionToken(1));
        let proxies = BrokerProxies::new(&proxy);
        let (status, body) = proxies.http_get("https://example.com").await.unwrap();
        assert_eq!(status, 200);
        assert_eq!(body, "hi");
        responder.await.unwrap();
    }
}
