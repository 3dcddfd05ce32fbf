//! Host-wide configuration: rate limit policy, resource thresholds,
//! analytics retention, and the logging broker's circuit breaker tuning.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

/// Burst capacity and sustained refill rate for one rate-limit policy.
#[derive(Debug, Clone, Copy)]
pub struct RateLimitPolicy {
    pub burst: u32,
    pub rate_per_sec: f64,
}

/// A method's two independent rate-limit policies: a second-scale burst
/// policy and a minute-scale sustained policy. Both are enforced
/// independently, so a call must acquire a token from each.
#[derive(Debug, Clone, Copy)]
pub struct MethodPolicy {
    pub per_second: RateLimitPolicy,
    pub per_minute: RateLimitPolicy,
}

/// The static per-method rate policy table.
///
/// Methods not listed here fall back to a caller-supplied default,
/// since the platform can add new broker methods without a breaking
/// change to this table.
#[derive(Debug, Clone)]
pub struct MethodPolicies {
    table: HashMap<String, MethodPolicy>,
    default: MethodPolicy,
}

impl MethodPolicies {
    /// The baseline policy table: `enablePlugin` at 2/s burst 3 with a
    /// 20/min soft cap, `ping` at 60/s burst 100, `httpGet`/`httpPost`
    /// at 5/s burst 10, `submitLog` at 50/s burst 150.
    pub fn platform_defaults() -> Self {
        let mut table = HashMap::new();
        table.insert(
            "enablePlugin".to_string(),
            MethodPolicy {
                per_second: RateLimitPolicy { burst: 3, rate_per_sec: 2.0 },
                per_minute: RateLimitPolicy { burst: 20, rate_per_sec: 20.0 / 60.0 },
            },
        );
        table.insert(
            "ping".to_string(),
            MethodPolicy {
                per_second: RateLimitPolicy { burst: 100, rate_per_sec: 60.0 },
                per_minute: RateLimitPolicy { burst: 3600, rate_per_sec: 60.0 },
            },
        );
        table.insert(
            "httpGet".to_string(),
            MethodPolicy {
                per_second: RateLimitPolicy { burst: 10, rate_per_sec: 5.0 },
                per_minute: RateLimitPolicy { burst: 150, rate_per_sec: 150.0 / 60.0 },
            },
        );
        table.insert(
            "httpPost".to_string(),
            MethodPolicy {
                per_second: RateLimitPolicy { burst: 10, rate_per_sec: 5.0 },
                per_minute: RateLimitPolicy { burst: 150, rate_per_sec: 150.0 / 60.0 },
            },
        );
        table.insert(
            "submitLog".to_string(),
            MethodPolicy {
                per_second: RateLimitPolicy { burst: 150, rate_per_sec: 50.0 },
                per_minute: RateLimitPolicy { burst: 1500, rate_per_sec: 1500.0 / 60.0 },
            },
        );

        Self {
            table,
            default: MethodPolicy {
                per_second: RateLimitPolicy { burst: 20, rate_per_sec: 10.0 },
                per_minute: RateLimitPolicy { burst: 300, rate_per_sec: 5.0 },
            },
        }
    }

    /// Override or add a method's policy.
    pub fn with_method(mut self, method: impl Into<String>, policy: MethodPolicy) -> Self {
        self.table.insert(method.into(), policy);
        self
    }

    /// A table with no per-method overrides, applying `per_second`/
    /// `per_minute` to every method. Mainly useful for tests that don't
    /// care about the baseline named method policies.
    pub fn uniform(per_second: RateLimitPolicy, per_minute: RateLimitPolicy) -> Self {
        Self { table: HashMap::new(), default: MethodPolicy { per_second, per_minute } }
    }

    /// The policy for `method`, falling back to the table's default.
    pub fn for_method(&self, method: &str) -> MethodPolicy {
        self.table.get(method).copied().unwrap_or(self.default)
    }
}

impl Default for MethodPolicies {
    fn default() -> Self {
        Self::platform_defaults()
    }
}

/// Resource ceilings enforced by the [`crate::resource_meter::ResourceMeter`].
#[derive(Debug, Clone, Copy)]
pub struct ResourceLimits {
    pub max_memory_bytes: u64,
    pub max_cpu_percent: f64,
    pub max_threads: u32,
    pub max_disk_bytes: u64,
}

impl Default for ResourceLimits {
    fn default() -> Self {
        Self {
            max_memory_bytes: 256 * 1024 * 1024,
            max_cpu_percent: 80.0,
            max_threads: 32,
            max_disk_bytes: 512 * 1024 * 1024,
        }
    }
}

/// Tuning for the logging broker's persistence circuit breaker.
#[derive(Debug, Clone, Copy)]
pub struct CircuitBreakerConfig {
    pub failure_threshold: u32,
    pub cooldown: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 10,
            cooldown: Duration::from_secs(300),
        }
    }
}

/// Top-level host configuration.
#[derive(Debug, Clone)]
pub struct HostConfig {
    /// Root directory under which `plugins/<plugin_id>/` sandbox roots live.
    pub app_data_dir: PathBuf,
    /// Root directory for the append-only analytics JSONL streams.
    pub analytics_dir: PathBuf,
    /// Per-method rate limit policy table (falls back to a default pair
    /// for methods not explicitly listed).
    pub rate_limit_policies: MethodPolicies,
    /// Default per-plugin resource ceilings.
    pub default_resource_limits: ResourceLimits,
    /// How often the resource meter samples running sandboxes.
    pub resource_sample_interval: Duration,
    /// Analytics record retention before compaction drops a line.
    pub analytics_retention: Duration,
    /// How often the analytics store runs retention compaction.
    pub analytics_compaction_interval: Duration,
    /// Logging broker circuit breaker tuning.
    pub logging_circuit_breaker: CircuitBreakerConfig,
    /// Default IPC deadline for broker calls.
    pub default_call_deadline: Duration,
    /// IPC deadline for the load handshake.
    pub handshake_deadline: Duration,
    /// Bounded messaging queue capacity, per receiver.
    pub message_queue_capacity: usize,
    /// Bounded logging submission channel capacity.
    pub log_channel_capacity: usize,
}

impl HostConfig {
    /// Start building a [`HostConfig`] rooted at `app_data_dir`.
    pub fn builder(app_data_dir: impl Into<PathBuf>) -> HostConfigBuilder {
        HostConfigBuilder::new(app_data_dir)
    }

    /// The sandbox root directory for `plugin_id`.
    pub fn plugin_root(&self, plugin_id: &str) -> PathBuf {
        self.app_data_dir.join("plugins").join(plugin_id)
    }
}

/// Builder for [`HostConfig`], following the same chained-setter style used
/// elsewhere in the platform's configuration managers.
pub struct HostConfigBuilder {
    config: HostConfig,
}

impl HostConfigBuilder {
    pub fn new(app_data_dir: impl Into<PathBuf>) -> Self {
        let app_data_dir = app_data_dir.into();
        Self {
            config: HostConfig {
                analytics_dir: app_data_dir.join("analytics"),
                app_data_dir,
                rate_limit_policies: MethodPolicies::platform_defaults(),
                default_resource_limits: ResourceLimits::default(),
                resource_sample_interval: Duration::from_secs(5),
                analytics_retention: Duration::from_secs(30 * 24 * 3600),
                analytics_compaction_interval: Duration::from_secs(3600),
                logging_circuit_breaker: CircuitBreakerConfig::default(),
                default_call_deadline: Duration::from_secs(10),
                handshake_deadline: Duration::from_secs(5),
                message_queue_capacity: 256,
                log_channel_capacity: 1000,
            },
        }
    }

    pub fn rate_limit_policies(mut self, policies: MethodPolicies) -> Self {
        self.config.rate_limit_policies = policies;
        self
    }

    pub fn resource_limits(mut self, limits: ResourceLimits) -> Self {
        self.config.default_resource_limits = limits;
        self
    }

    pub fn resource_sample_interval(mut self, interval: Duration) -> Self {
        self.config.resource_sample_interval = interval;
        self
    }

    pub fn analytics_retention(mut self, retention: Duration) -> Self {
        self.config.analytics_retention = retention;
        self
    }

    pub fn logging_circuit_breaker(mut self, config: CircuitBreakerConfig) -> Self {
        self.config.logging_circuit_breaker = config;
        self
    }

    pub fn build(self) -> HostConfig {
        self.config
    }
}

/// A handful of scalar settings a deployment can override without
/// touching code, read from an optional TOML file and then from
/// environment variables (env wins over file, file wins over the
/// built-in defaults). Anything not present in either source keeps
/// [`HostConfigBuilder::new`]'s default.
#[derive(Debug, Clone, Default, serde::Deserialize)]
#[serde(default)]
struct FileOverrides {
    resource_sample_interval_secs: Option<u64>,
    analytics_retention_days: Option<u64>,
    analytics_compaction_interval_secs: Option<u64>,
    message_queue_capacity: Option<usize>,
    log_channel_capacity: Option<usize>,
}

impl HostConfig {
    /// Build a [`HostConfig`] rooted at `app_data_dir`, applying overrides
    /// read from `config_path` (if it exists) and then from
    /// `CONNECTIAS_*` environment variables, in that precedence order.
    pub fn load(app_data_dir: impl Into<PathBuf>, config_path: Option<&std::path::Path>) -> std::io::Result<Self> {
        let mut overrides = match config_path {
            Some(path) if path.exists() => {
                let text = std::fs::read_to_string(path)?;
                toml::from_str(&text).map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?
            }
            _ => FileOverrides::default(),
        };

        if let Some(v) = env_u64("CONNECTIAS_RESOURCE_SAMPLE_INTERVAL_SECS") {
            overrides.resource_sample_interval_secs = Some(v);
        }
        if let Some(v) = env_u64("CONNECTIAS_ANALYTICS_RETENTION_DAYS") {
            overrides.analytics_retention_days = Some(v);
        }
        if let Some(v) = env_u64("CONNECTIAS_ANALYTICS_COMPACTION_INTERVAL_SECS") {
            overrides.analytics_compaction_interval_secs = Some(v);
        }
        if let Some(v) = env_u64("CONNECTIAS_MESSAGE_QUEUE_CAPACITY") {
            overrides.message_queue_capacity = Some(v as usize);
        }
        if let Some(v) = env_u64("CONNECTIAS_LOG_CHANNEL_CAPACITY") {
            overrides.log_channel_capacity = Some(v as usize);
        }

        let mut builder = HostConfigBuilder::new(app_data_dir);
        if let Some(secs) = overrides.resource_sample_interval_secs {
            builder = builder.resource_sample_interval(Duration::from_secs(secs));
        }
        if let Some(days) = overrides.analytics_retention_days {
            builder = builder.analytics_retention(Duration::from_secs(days * 24 * 3600));
        }
        if let Some(secs) = overrides.analytics_compaction_interval_secs {
            builder.config.analytics_compaction_interval = Duration::from_secs(secs);
        }
        if let Some(capacity) = overrides.message_queue_capacity {
            builder.config.message_queue_capacity = capacity;
        }
        if let Some(capacity) = overrides.log_channel_capacity {
            builder.config.log_channel_capacity = capacity;
        }

        Ok(builder.build())
    }
}

fn env_u64(name: &str) -> Option<u64> {
    std::env::var(name).ok().and_then(|v| v.parse().ok())
}
