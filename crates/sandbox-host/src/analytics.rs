//! Append-only JSONL analytics store.
//!
//! Three streams — `perf_samples`, `ui_actions`, `security_events` — each
//! a newline-delimited JSON file under `<analytics_dir>/<stream>.jsonl`
//! with a leading `timestamp` field. Writes are append-only; periodic
//! compaction drops records older than the retention window by writing a
//! sibling `.tmp` file and atomically renaming it over the original, so a
//! crash mid-compaction never leaves a corrupt or half-written stream.

use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::Serialize;
use tokio::fs;
use tokio::io::AsyncWriteExt;

use crate::error::{HostError, HostResult};

/// One of the three append-only analytics streams.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stream {
    PerfSamples,
    UiActions,
    SecurityEvents,
}

impl Stream {
    fn file_name(self) -> &'static str {
        match self {
            Stream::PerfSamples => "perf_samples.jsonl",
            Stream::UiActions => "ui_actions.jsonl",
            Stream::SecurityEvents => "security_events.jsonl",
        }
    }
}

/// Any analytics record must expose the leading `timestamp` field the
/// on-disk line format requires.
pub trait TimestampedRecord: Serialize {
    fn timestamp(&self) -> u64;
}

impl TimestampedRecord for sandbox_types::AuditEvent {
    fn timestamp(&self) -> u64 {
        self.epoch
    }
}

/// A `ui_action` analytics record: a single UI event surfaced by the host
/// shell (not produced inside the core, but the stream it writes to is
/// owned here alongside the other two).
#[derive(Debug, Clone, Serialize)]
pub struct UiActionRecord {
    pub timestamp: u64,
    pub plugin_id: Option<String>,
    pub action: String,
    #[serde(default)]
    pub details: std::collections::HashMap<String, serde_json::Value>,
}

impl TimestampedRecord for UiActionRecord {
    fn timestamp(&self) -> u64 {
        self.timestamp
    }
}

impl TimestampedRecord for sandbox_types::PerformanceRecord {
    fn timestamp(&self) -> u64 {
        self.timestamp
    }
}

/// Append-only JSONL analytics store with retention compaction.
#[derive(Clone)]
pub struct AnalyticsStore {
    dir: PathBuf,
}

impl AnalyticsStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn path_for(&self, stream: Stream) -> PathBuf {
        self.dir.join(stream.file_name())
    }

    /// Append one record as a single JSON line.
    pub async fn append<T: TimestampedRecord>(&self, stream: Stream, record: &T) -> HostResult<()> {
        fs::create_dir_all(&self.dir).await.map_err(HostError::Io)?;

        let mut line = serde_json::to_vec(record).map_err(|e| HostError::Internal(e.to_string()))?;
        line.push(b'\n');

        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.path_for(stream))
            .await
            .map_err(HostError::Io)?;
        file.write_all(&line).await.map_err(HostError::Io)?;
        file.flush().await.map_err(HostError::Io)?;
        Ok(())
    }

    /// Best-effort linear scan of a stream, tolerating (and skipping) at
    /// most one truncated line at the tail, per invariant P5.
    pub async fn read_all(&self, stream: Stream) -> HostResult<Vec<serde_json::Value>> {
        let path = self.path_for(stream);
        let contents = match fs::read_to_string(&path).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(HostError::Io(e)),
        };

        let mut records = Vec::new();
        let mut lines = contents.lines().peekable();
        while let Some(line) = lines.next() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str(line) {
                Ok(value) => records.push(value),
                Err(_) if lines.peek().is_none() => {
                    // Tolerate a truncated final line (e.g. a crash mid-write).
                }
                Err(e) => return Err(HostError::Internal(e.to_string())),
            }
        }
        Ok(records)
    }

    /// Drop lines whose `timestamp` is older than `cutoff_epoch`, writing a
    /// sibling `.tmp` file and renaming it over the original atomically.
    pub async fn compact(&self, stream: Stream, cutoff_epoch: u64) -> HostResult<usize> {
        let path = self.path_for(stream);
        let records = self.read_all(stream).await?;

        let kept: Vec<&serde_json::Value> = records
            .iter()
            .filter(|record| {
                record
                    .get("timestamp")
                    .and_then(|v| v.as_u64())
                    .map(|ts| ts >= cutoff_epoch)
                    .unwrap_or(true)
            })
            .collect();

        let dropped = records.len() - kept.len();
        if dropped == 0 {
            return Ok(0);
        }

        let tmp_path = tmp_sibling(&path);
        let mut tmp = fs::File::create(&tmp_path).await.map_err(HostError::Io)?;
        for record in &kept {
            let mut line = serde_json::to_vec(record).map_err(|e| HostError::Internal(e.to_string()))?;
            line.push(b'\n');
            tmp.write_all(&line).await.map_err(HostError::Io)?;
        }
        tmp.flush().await.map_err(HostError::Io)?;
        drop(tmp);

        fs::rename(&tmp_path, &path).await.map_err(HostError::Io)?;
        Ok(dropped)
    }
}

fn tmp_sibling(path: &Path) -> PathBuf {
    let mut tmp = path.to_path_buf();
    let file_name = path.file_name().and_then(|n| n.to_str()).unwrap_or("stream");
    tmp.set_file_name(format!("{file_name}.tmp"));
    tmp
}

/// The current Unix epoch in seconds.
pub fn now_epoch() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_secs()
}

#[cfg(test)]
mod tests {
    use super::*;
    use sandbox_types::{PerformanceRecord, PluginId, ResourceSample};

    fn sample(epoch: u64) -> PerformanceRecord {
        PerformanceRecord {
            timestamp: epoch,
            plugin_id: PluginId::new("demo-automation").unwrap(),
            sample: ResourceSample {
                epoch,
                memory_bytes: 1024,
                memory_peak_bytes: 1024,
                cpu_percent: 1.0,
                thread_count: 1,
                disk_bytes: 0,
                net_bytes_in: 0,
                net_bytes_out: 0,
            },
        }
    }

    #[tokio::test]
    async fn append_then_read_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let store = AnalyticsStore::new(dir.path());

        store.append(Stream::PerfSamples, &sample(100)).await.unwrap();
        store.append(Stream::PerfSamples, &sample(200)).await.unwrap();

        let records = store.read_all(Stream::PerfSamples).await.unwrap();
        assert_eq!(records.len(), 2);
    }

    #[tokio::test]
    async fn compaction_drops_only_records_older_than_cutoff() {
        let dir = tempfile::tempdir().unwrap();
        let store = AnalyticsStore::new(dir.path());

        store.append(Stream::PerfSamples, &sample(100)).await.unwrap();
        store.append(Stream::PerfSamples, &sample(9_000)).await.unwrap();

        let dropped = store.compact(Stream::PerfSamples, 5_000).await.unwrap();
        assert_eq!(dropped, 1);

        let records = store.read_all(Stream::PerfSamples).await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0]["timestamp"], 9_000);
    }

    #[tokio::test]
    async fn read_all_tolerates_truncated_final_line() {
        let dir = tempfile::tempdir().unwrap();
        let store = AnalyticsStore::new(dir.path());
        store.append(Stream::PerfSamples, &sample(100)).await.unwrap();

        let path = dir.path().join("perf_samples.jsonl");
        let mut file = tokio::fs::OpenOptions::new().append(true).open(&path).await.unwrap();
        file.write_all(b"{\"timestamp\":200,\"trunca").await.unwrap();

        let records = store.read_all(Stream::PerfSamples).await.unwrap();
        assert_eq!(records.len(), 1);
    }

    #[tokio::test]
    async fn read_all_on_missing_stream_returns_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = AnalyticsStore::new(dir.path());
        assert!(store.read_all(Stream::SecurityEvents).await.unwrap().is_empty());
    }
}
