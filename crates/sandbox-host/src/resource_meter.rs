//! Periodic per-plugin resource sampling and threshold enforcement.

use std::sync::Arc;

use dashmap::DashMap;

use sandbox_types::{PluginId, ResourceSample};

use crate::config::ResourceLimits;
use crate::error::HostError;

#[derive(Debug, Clone, Copy, Default)]
struct Tracked {
    memory_bytes: u64,
    memory_peak_bytes: u64,
    cpu_percent: f64,
    thread_count: u32,
    disk_bytes: u64,
    net_bytes_in: u64,
    net_bytes_out: u64,
}

/// Tracks resource usage per plugin and enforces [`ResourceLimits`].
///
/// Deltas are clamped to `>= 0` so a counter reset (e.g. after the meter
/// restarts mid-session) never reports a negative usage, per invariant P4.
#[derive(Clone)]
pub struct ResourceMeter {
    usage: Arc<DashMap<PluginId, Tracked>>,
    limits: Arc<DashMap<PluginId, ResourceLimits>>,
    call_bytes: Arc<DashMap<PluginId, u64>>,
    default_limits: ResourceLimits,
}

impl ResourceMeter {
    pub fn new(default_limits: ResourceLimits) -> Self {
        Self {
            usage: Arc::new(DashMap::new()),
            limits: Arc::new(DashMap::new()),
            call_bytes: Arc::new(DashMap::new()),
            default_limits,
        }
    }

    pub fn start_tracking(&self, plugin_id: &PluginId) {
        self.usage.insert(plugin_id.clone(), Tracked::default());
    }

    pub fn stop_tracking(&self, plugin_id: &PluginId) {
        self.usage.remove(plugin_id);
        self.limits.remove(plugin_id);
        self.call_bytes.remove(plugin_id);
    }

    pub fn set_limits(&self, plugin_id: &PluginId, limits: ResourceLimits) {
        self.limits.insert(plugin_id.clone(), limits);
    }

    fn limits_for(&self, plugin_id: &PluginId) -> ResourceLimits {
        self.limits.get(plugin_id).map(|l| *l).unwrap_or(self.default_limits)
    }

    /// Record a fresh absolute observation for `plugin_id` and check it
    /// against that plugin's resource limits.
    ///
    /// `memory_bytes`, `thread_count`, `disk_bytes` are absolute; network
    /// counters are cumulative totals from the OS and are diffed against
    /// the previous observation internally.
    pub fn observe(
        &self,
        plugin_id: &PluginId,
        epoch: u64,
        memory_bytes: u64,
        cpu_percent: f64,
        thread_count: u32,
        disk_bytes: u64,
        cumulative_net_in: u64,
        cumulative_net_out: u64,
    ) -> Result<ResourceSample, HostError> {
        let limits = self.limits_for(plugin_id);
        let mut entry = self.usage.entry(plugin_id.clone()).or_default();

        let net_in_delta = cumulative_net_in.saturating_sub(entry.net_bytes_in);
        let net_out_delta = cumulative_net_out.saturating_sub(entry.net_bytes_out);

        entry.memory_bytes = memory_bytes;
        entry.memory_peak_bytes = entry.memory_peak_bytes.max(memory_bytes);
        entry.cpu_percent = cpu_percent;
        entry.thread_count = thread_count;
        entry.disk_bytes = disk_bytes;
        entry.net_bytes_in = cumulative_net_in;
        entry.net_bytes_out = cumulative_net_out;

        let sample = ResourceSample {
            epoch,
            memory_bytes,
            memory_peak_bytes: entry.memory_peak_bytes,
            cpu_percent,
            thread_count,
            disk_bytes,
            net_bytes_in: net_in_delta,
            net_bytes_out: net_out_delta,
        };

        if limits.max_memory_bytes > 0 && memory_bytes > limits.max_memory_bytes {
            return Err(HostError::ResourceExceeded {
                plugin_id: plugin_id.as_str().to_string(),
                kind: "memory".to_string(),
            });
        }
        if cpu_percent > limits.max_cpu_percent {
            return Err(HostError::ResourceExceeded {
                plugin_id: plugin_id.as_str().to_string(),
                kind: "cpu".to_string(),
            });
        }
        if limits.max_threads > 0 && thread_count > limits.max_threads {
            return Err(HostError::ResourceExceeded {
                plugin_id: plugin_id.as_str().to_string(),
                kind: "threads".to_string(),
            });
        }
        if limits.max_disk_bytes > 0 && disk_bytes > limits.max_disk_bytes {
            return Err(HostError::ResourceExceeded {
                plugin_id: plugin_id.as_str().to_string(),
                kind: "disk".to_string(),
            });
        }

        Ok(sample)
    }

    /// Record bytes moved by a single broker call, for diagnostics
    /// between periodic samples. This is purely additive bookkeeping
    /// independent of [`ResourceMeter::observe`]'s cumulative-counter
    /// diffing, so it never perturbs the next sample's delta.
    pub fn record_call_bytes(&self, plugin_id: &PluginId, bytes: u64) {
        self.call_bytes
            .entry(plugin_id.clone())
            .and_modify(|total| *total = total.saturating_add(bytes))
            .or_insert(bytes);
    }

    /// Bytes recorded via [`ResourceMeter::record_call_bytes`] since
    /// tracking for `plugin_id` started.
    pub fn call_bytes(&self, plugin_id: &PluginId) -> u64 {
        self.call_bytes.get(plugin_id).map(|b| *b).unwrap_or(0)
    }

    /// Current resident memory for `plugin_id`, in MiB, or `None` if not tracked.
    pub fn memory_mib(&self, plugin_id: &PluginId) -> Option<f64> {
        self.usage.get(plugin_id).map(|u| u.memory_bytes as f64 / (1024.0 * 1024.0))
    }

    /// Peak resident memory for `plugin_id`, in MiB, or `None` if not tracked.
    pub fn peak_memory_mib(&self, plugin_id: &PluginId) -> Option<f64> {
        self.usage.get(plugin_id).map(|u| u.memory_peak_bytes as f64 / (1024.0 * 1024.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn plugin(id: &str) -> PluginId {
        PluginId::new(id).unwrap()
    }

    #[test]
    fn peak_memory_is_monotonic_across_observations() {
        let meter = ResourceMeter::new(ResourceLimits::default());
        let id = plugin("demo-automation");
        meter.start_tracking(&id);

        meter.observe(&id, 1, 10 * 1024 * 1024, 5.0, 2, 0, 0, 0).unwrap();
        meter.observe(&id, 2, 4 * 1024 * 1024, 5.0, 2, 0, 0, 0).unwrap();

        assert_eq!(meter.peak_memory_mib(&id), Some(10.0));
        assert_eq!(meter.memory_mib(&id), Some(4.0));
    }

    #[test]
    fn network_delta_never_negative_on_counter_reset() {
        let meter = ResourceMeter::new(ResourceLimits::default());
        let id = plugin("demo-automation");
        meter.start_tracking(&id);

        let sample = meter.observe(&id, 1, 0, 0.0, 1, 0, 1000, 500).unwrap();
        assert_eq!(sample.net_bytes_in, 1000);

        // Counter reset after a restart: cumulative value drops.
        let sample = meter.observe(&id, 2, 0, 0.0, 1, 0, 100, 50).unwrap();
        assert_eq!(sample.net_bytes_in, 0);
        assert_eq!(sample.net_bytes_out, 0);
    }

    #[test]
    fn exceeding_memory_limit_is_reported() {
        let meter = ResourceMeter::new(ResourceLimits { max_memory_bytes: 1024, ..ResourceLimits::default() });
        let id = plugin("demo-automation");
        meter.start_tracking(&id);

        let result = meter.observe(&id, 1, 2048, 0.0, 1, 0, 0, 0);
        assert!(matches!(result, Err(HostError::ResourceExceeded { ref kind, .. }) if kind == "memory"));
    }
}
