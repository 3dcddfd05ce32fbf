//! Periodic resource usage samples produced by the host's resource meter.

use serde::{Deserialize, Serialize};

use crate::ids::PluginId;

/// A single periodic observation of one plugin's resource consumption.
///
/// All byte/count fields are deltas since the previous sample, clamped to
/// `>= 0` to tolerate counter resets (e.g. after a sandbox restart).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ResourceSample {
    /// Unix epoch seconds at which the sample was taken.
    pub epoch: u64,
    /// Memory currently resident, in bytes.
    pub memory_bytes: u64,
    /// Peak resident memory observed so far, in bytes.
    pub memory_peak_bytes: u64,
    /// CPU usage percent over the sampling interval (0-100 per core).
    pub cpu_percent: f64,
    /// Active OS thread count.
    pub thread_count: u32,
    /// Disk bytes currently held by the plugin's sandbox root.
    pub disk_bytes: u64,
    /// Network bytes received since the previous sample.
    pub net_bytes_in: u64,
    /// Network bytes sent since the previous sample.
    pub net_bytes_out: u64,
}

impl ResourceSample {
    /// Memory currently resident, in MiB.
    pub fn memory_mib(&self) -> f64 {
        self.memory_bytes as f64 / (1024.0 * 1024.0)
    }

    /// Peak resident memory, in MiB.
    pub fn memory_peak_mib(&self) -> f64 {
        self.memory_peak_bytes as f64 / (1024.0 * 1024.0)
    }

    /// Total network bytes (in + out) transferred since the previous sample.
    pub fn net_bytes_total(&self) -> u64 {
        self.net_bytes_in.saturating_add(self.net_bytes_out)
    }
}

/// An analytics record pairing a sample with the plugin it describes; this
/// is the shape written to the `performance` analytics stream.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PerformanceRecord {
    /// Leading timestamp field, required by the analytics store's schema.
    pub timestamp: u64,
    /// The plugin this sample describes.
    pub plugin_id: PluginId,
    /// The sample itself.
    #[serde(flatten)]
    pub sample: ResourceSample,
}
