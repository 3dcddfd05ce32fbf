//! The sandbox's cooperative event loop: connects to the host's per-plugin
//! IPC socket, attests identity at handshake, then dispatches triggers
//! (load, timer, inbound message) into the [`crate::interpreter::FlowInterpreter`].
//!
//! The sandbox process is internally single-threaded cooperative for
//! plugin code: [`PluginRuntime::run`] reflects that by running one flow
//! to completion before considering the next trigger, rather than
//! fanning flow runs out concurrently.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use tokio::net::UnixStream;
use tokio::sync::watch;

use sandbox_ipc::{read_envelope, write_envelope, Envelope};
use sandbox_types::flow::{FlowDefinition, Trigger};
use sandbox_types::PluginManifest;

use crate::config::RuntimeConfig;
use crate::error::{RuntimeError, RuntimeResult};
use crate::interpreter::{FlowInterpreter, FlowOutcome, FlowState};
use crate::proxy::BrokerProxy;

/// How often the runtime's scheduling loop wakes up to check whether an
/// `OnInterval` flow is due or the messaging broker has new inbound
/// messages. The broker has no push path to the sandbox: messaging
/// delivery is a pull model via `receiveMessages`, so polling here is
/// the sandbox's own cadence, not anything the host dictates.
const TICK: Duration = Duration::from_millis(250);

/// How often the runtime polls the messaging broker for inbound messages
/// to match against `OnMessage` triggers.
const MESSAGE_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Owns the live connection to the host and the plugin's declared flows.
pub struct PluginRuntime {
    config: RuntimeConfig,
    manifest: PluginManifest,
}

impl PluginRuntime {
    pub fn new(config: RuntimeConfig, manifest: PluginManifest) -> Self {
        Self { config, manifest }
    }

    /// Connect to the host's listener and complete the handshake,
    /// returning a [`BrokerProxy`] bound to the session the host issued.
    pub async fn connect(&self, content_digest: &str) -> RuntimeResult<BrokerProxy<UnixStream>> {
        let mut stream = UnixStream::connect(&self.config.ipc_socket_path)
            .await
            .map_err(|e| RuntimeError::Ipc(sandbox_ipc::IpcError::Io(e)))?;

        write_envelope(
            &mut stream,
            &Envelope::Handshake {
                plugin_id: self.config.plugin_id.clone(),
                content_digest: content_digest.to_string(),
                pid: std::process::id(),
            },
        )
        .await?;

        match read_envelope(&mut stream).await? {
            Some(Envelope::HandshakeAck { session_token }) => Ok(BrokerProxy::with_deadlines(
                stream,
                self.config.plugin_id.clone(),
                session_token,
                self.config.deadlines,
            )),
            _ => Err(RuntimeError::HandshakeRejected),
        }
    }

    /// Run the plugin's declared flows until `shutdown` carries `true`.
    /// `OnLoad` flows run once immediately; `OnInterval` flows are
    /// re-checked against a wall-clock due time every [`TICK`]; inbound
    /// messages are polled every [`MESSAGE_POLL_INTERVAL`] and matched
    /// against `OnMessage` flows.
    pub async fn run(&self, proxy: &BrokerProxy<UnixStream>, mut shutdown: watch::Receiver<bool>) {
        let interpreter = FlowInterpreter::new(proxy);

        for flow in self.manifest.flows.iter().filter(|f| matches!(f.trigger, Trigger::OnLoad)) {
            let outcome = interpreter.run(flow, FlowState::new()).await;
            log_outcome(flow, &outcome);
        }

        let mut due = IntervalSchedule::new(&self.manifest.flows);
        let mut last_message_poll = Instant::now() - MESSAGE_POLL_INTERVAL;

        loop {
            if *shutdown.borrow() {
                return;
            }
            tokio::select! {
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        return;
                    }
                }
                _ = tokio::time::sleep(TICK) => {}
            }

            let now = Instant::now();
            for flow in due.take_due(&self.manifest.flows, now) {
                let outcome = interpreter.run(flow, FlowState::new()).await;
                log_outcome(flow, &outcome);
            }

            if now.duration_since(last_message_poll) >= MESSAGE_POLL_INTERVAL {
                last_message_poll = now;
                self.poll_messages(&interpreter, proxy).await;
            }
        }
    }

    async fn poll_messages(&self, interpreter: &FlowInterpreter<'_, UnixStream>, proxy: &BrokerProxy<UnixStream>) {
        let reply = match proxy.call("receiveMessages", serde_json::json!({})).await {
            Ok(value) => value,
            Err(_) => return,
        };
        let Some(messages) = reply.as_array() else { return };

        for message in messages {
            let Some(kind) = message.get("payload").and_then(|p| p.get("kind")).and_then(|k| k.as_str()) else {
                continue;
            };
            for flow in self.matching_flows(kind) {
                let mut state = FlowState::new();
                if let Some(payload) = message.get("payload").and_then(|p| p.as_object()) {
                    state.extend(payload.clone());
                }
                let outcome = interpreter.run(flow, state).await;
                log_outcome(flow, &outcome);
            }
        }
    }

    /// Flows whose `OnMessage` trigger names `message_kind` — an
    /// application-level tag carried in the message payload's own `kind`
    /// field, distinct from `sandbox_types::MessageKind`'s transport-level
    /// event/request/response distinction.
    fn matching_flows(&self, message_kind: &str) -> Vec<&FlowDefinition> {
        self.manifest
            .flows
            .iter()
            .filter(|f| matches!(&f.trigger, Trigger::OnMessage { message_kind: k } if k == message_kind))
            .collect()
    }
}

/// Tracks the last-run wall-clock time of every `OnInterval` flow so the
/// scheduling loop in [`PluginRuntime::run`] can ask "which flows are due
/// right now" without re-deriving a `tokio::time::Interval` per flow.
struct IntervalSchedule {
    last_run: HashMap<String, Instant>,
}

impl IntervalSchedule {
    fn new(flows: &[FlowDefinition]) -> Self {
        let now = Instant::now();
        let last_run = flows
            .iter()
            .filter(|f| matches!(f.trigger, Trigger::OnInterval { .. }))
            .map(|f| (f.id.clone(), now))
            .collect();
        Self { last_run }
    }

    fn take_due<'a>(&mut self, flows: &'a [FlowDefinition], now: Instant) -> Vec<&'a FlowDefinition> {
        let mut due = Vec::new();
        for flow in flows {
            let Trigger::OnInterval { seconds } = flow.trigger else { continue };
            let last = self.last_run.entry(flow.id.clone()).or_insert(now);
            if now.duration_since(*last) >= Duration::from_secs(seconds.max(1)) {
                *last = now;
                due.push(flow);
            }
        }
        due
    }
}

fn log_outcome(flow: &FlowDefinition, outcome: &FlowOutcome) {
    if outcome.ok {
        tracing::debug!(flow = %flow.id, "flow run completed");
    } else {
        tracing::warn!(flow = %flow.id, error = ?outcome.error, "flow run failed");
    }
}
