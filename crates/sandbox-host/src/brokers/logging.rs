//! The logging broker. Plugin log submissions are buffered and persisted
//! to a per-plugin JSONL sink separate from
//! [`crate::analytics::AnalyticsStore`], which is scoped to exactly the
//! `performance`, `ui_action`, and `security_event` streams — logs are
//! not one of them. A persistence circuit breaker opens after repeated
//! write failures so a wedged disk cannot turn every `submitLog` call
//! into a blocking IO wait; while open, submissions are kept in the
//! in-memory buffer only.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::fs;
use tokio::io::AsyncWriteExt;

use sandbox_types::{AuditKind, AuditSeverity, LogRecord, PluginId, SandboxError};

use crate::secure_wrapper::SecureWrapper;

struct CircuitBreaker {
    consecutive_failures: u32,
    opened_at: Option<Instant>,
    threshold: u32,
    cooldown: Duration,
}

impl CircuitBreaker {
    fn new(threshold: u32, cooldown: Duration) -> Self {
        Self { consecutive_failures: 0, opened_at: None, threshold, cooldown }
    }

    fn is_open(&self, now: Instant) -> bool {
        match self.opened_at {
            Some(opened_at) => now.saturating_duration_since(opened_at) < self.cooldown,
            None => false,
        }
    }

    fn record_success(&mut self) -> bool {
        let was_open = self.opened_at.is_some();
        self.consecutive_failures = 0;
        self.opened_at = None;
        was_open
    }

    /// Returns `true` the moment the breaker transitions from closed to open.
    fn record_failure(&mut self, now: Instant) -> bool {
        self.consecutive_failures += 1;
        if self.consecutive_failures >= self.threshold && self.opened_at.is_none() {
            self.opened_at = Some(now);
            true
        } else {
            false
        }
    }
}

/// Bounded, drop-oldest in-memory buffer plus on-disk JSONL persistence
/// with a per-sink circuit breaker.
#[derive(Clone)]
pub struct LoggingBroker {
    log_dir: PathBuf,
    buffers: Arc<DashMap<PluginId, Mutex<VecDeque<LogRecord>>>>,
    breakers: Arc<DashMap<PluginId, Mutex<CircuitBreaker>>>,
    buffer_capacity: usize,
    failure_threshold: u32,
    cooldown: Duration,
}

impl LoggingBroker {
    pub fn new(log_dir: impl Into<PathBuf>, buffer_capacity: usize, failure_threshold: u32, cooldown: Duration) -> Self {
        Self {
            log_dir: log_dir.into(),
            buffers: Arc::new(DashMap::new()),
            breakers: Arc::new(DashMap::new()),
            buffer_capacity,
            failure_threshold,
            cooldown,
        }
    }

    fn sink_path(&self, plugin_id: &PluginId) -> PathBuf {
        self.log_dir.join(format!("{}.jsonl", plugin_id.as_str()))
    }

    fn buffer(&self, plugin_id: &PluginId) -> dashmap::mapref::one::Ref<'_, PluginId, Mutex<VecDeque<LogRecord>>> {
        self.buffers
            .entry(plugin_id.clone())
            .or_insert_with(|| Mutex::new(VecDeque::with_capacity(self.buffer_capacity)))
            .downgrade()
    }

    fn push_buffered(&self, plugin_id: &PluginId, record: LogRecord) {
        let buffer = self.buffer(plugin_id);
        let mut buffer = buffer.lock();
        if buffer.len() >= self.buffer_capacity {
            buffer.pop_front();
        }
        buffer.push_back(record);
    }

    async fn persist(&self, path: &Path, record: &LogRecord) -> Result<(), SandboxError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await.map_err(|_| SandboxError::Internal)?;
        }
        let mut line = serde_json::to_vec(record).map_err(|_| SandboxError::Internal)?;
        line.push(b'\n');

        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .await
            .map_err(|_| SandboxError::Internal)?;
        file.write_all(&line).await.map_err(|_| SandboxError::Internal)?;
        file.flush().await.map_err(|_| SandboxError::Internal)?;
        Ok(())
    }

    fn parse(args: &serde_json::Value) -> Result<LogRecord, SandboxError> {
        serde_json::from_value(args.clone()).map_err(|e| SandboxError::InvalidArgument(e.to_string()))
    }

    /// Buffer `args` as a [`LogRecord`] and attempt to persist it, honoring
    /// the circuit breaker. Persistence failures never fail the call: a
    /// plugin's `submitLog` succeeds as long as the record made it into
    /// the in-memory buffer.
    pub async fn submit_log(&self, plugin_id: &PluginId, args: &serde_json::Value) -> Result<serde_json::Value, SandboxError> {
        self.submit_log_with(plugin_id, args, None).await
    }

    /// Same as [`LoggingBroker::submit_log`], additionally emitting
    /// circuit-breaker state-change audit events through `wrapper` when one
    /// is supplied.
    pub async fn submit_log_with(
        &self,
        plugin_id: &PluginId,
        args: &serde_json::Value,
        wrapper: Option<&SecureWrapper>,
    ) -> Result<serde_json::Value, SandboxError> {
        let record = Self::parse(args)?;
        self.push_buffered(plugin_id, record.clone());

        let now = Instant::now();
        let breaker_entry = self
            .breakers
            .entry(plugin_id.clone())
            .or_insert_with(|| Mutex::new(CircuitBreaker::new(self.failure_threshold, self.cooldown)));

        let currently_open = breaker_entry.lock().is_open(now);
        if currently_open {
            return Ok(serde_json::json!({"buffered": true, "persisted": false}));
        }

        let path = self.sink_path(plugin_id);
        match self.persist(&path, &record).await {
            Ok(()) => {
                let closed_now = breaker_entry.lock().record_success();
                if closed_now {
                    if let Some(wrapper) = wrapper {
                        wrapper
                            .audit(
                                AuditKind::CircuitBreakerClosed,
                                AuditSeverity::Info,
                                Some(plugin_id.as_str().to_string()),
                                "logging persistence circuit breaker closed".to_string(),
                            )
                            .await;
                    }
                }
                Ok(serde_json::json!({"buffered": true, "persisted": true}))
            }
            Err(_) => {
                let opened_now = breaker_entry.lock().record_failure(now);
                if opened_now {
                    if let Some(wrapper) = wrapper {
                        wrapper
                            .audit(
                                AuditKind::CircuitBreakerOpened,
                                AuditSeverity::Warning,
                                Some(plugin_id.as_str().to_string()),
                                "logging persistence circuit breaker opened after repeated failures".to_string(),
                            )
                            .await;
                    }
                }
                Ok(serde_json::json!({"buffered": true, "persisted": false}))
            }
        }
    }

    /// The in-memory buffer for `plugin_id`, most-recent last. Intended for
    /// diagnostics and tests; the broker's on-disk sink is the durable
    /// record.
    pub fn buffered(&self, plugin_id: &PluginId) -> Vec<LogRecord> {
        self.buffers.get(plugin_id).map(|b| b.lock().iter().cloned().collect()).unwrap_or_default()
    }

    /// Whether the persistence circuit breaker for `plugin_id` is
    /// currently open.
    pub fn is_circuit_open(&self, plugin_id: &PluginId) -> bool {
        self.breakers.get(plugin_id).map(|b| b.lock().is_open(Instant::now())).unwrap_or(false)
    }
}
