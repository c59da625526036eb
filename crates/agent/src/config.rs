//! Agent configuration

use anyhow::{Context, Result};
use netprobe_lib::cycle::{CycleConfig, SchedulerConfig};
use netprobe_lib::geo::GeoResolverConfig;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variable prefix for every setting
pub const ENV_PREFIX: &str = "NETPROBE";

/// Environment variable naming an explicit config file
pub const CONFIG_PATH_ENV: &str = "NETPROBE_CONFIG";

/// File name searched in the working directory (any supported extension)
const DEFAULT_CONFIG_NAME: &str = "netprobe";

/// Agent configuration
#[derive(Debug, Clone, Deserialize)]
pub struct AgentConfig {
    /// Name attached to every structured log event
    #[serde(default = "default_agent_name")]
    pub agent_name: String,

    /// API server port for health, metrics and results
    #[serde(default = "default_api_port")]
    pub api_port: u16,

    /// Seconds between cycle starts
    #[serde(default = "default_test_interval")]
    pub test_interval_secs: u64,

    #[serde(default = "default_worker_pool_size")]
    pub worker_pool_size: usize,

    /// Lifetime of a cached location
    #[serde(default = "default_geo_cache_ttl")]
    pub geo_cache_ttl_secs: u64,

    #[serde(default = "default_ping_count")]
    pub ping_count: u32,

    /// Upper bound for a ping run; 0 disables it
    #[serde(default = "default_ping_timeout")]
    pub ping_timeout_secs: u64,

    #[serde(default = "default_traceroute_timeout")]
    pub traceroute_timeout_secs: u64,

    #[serde(default = "default_geo_api_url")]
    pub geo_api_url: String,

    #[serde(default = "default_geo_timeout")]
    pub geo_timeout_secs: u64,

    /// JSON array of targets, re-read every cycle
    #[serde(default = "default_targets_file")]
    pub targets_file: PathBuf,

    /// Directory holding the outcome log
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Newest outcome rows kept in memory for queries; the log keeps all
    #[serde(default = "default_retained_rows")]
    pub retained_rows: usize,

    /// Run the first cycle immediately instead of after one interval
    #[serde(default = "default_run_on_startup")]
    pub run_on_startup: bool,
}

fn default_agent_name() -> String {
    std::env::var("HOSTNAME").unwrap_or_else(|_| "netprobe".to_string())
}

fn default_api_port() -> u16 {
    8080
}

fn default_test_interval() -> u64 {
    300
}

fn default_worker_pool_size() -> usize {
    10
}

fn default_geo_cache_ttl() -> u64 {
    2_592_000
}

fn default_ping_count() -> u32 {
    4
}

fn default_ping_timeout() -> u64 {
    120
}

fn default_traceroute_timeout() -> u64 {
    60
}

fn default_geo_api_url() -> String {
    netprobe_lib::geo::DEFAULT_GEO_API_URL.to_string()
}

fn default_geo_timeout() -> u64 {
    5
}

fn default_targets_file() -> PathBuf {
    PathBuf::from("targets.json")
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("data")
}

fn default_retained_rows() -> usize {
    netprobe_lib::store::DEFAULT_RETAINED_ROWS
}

fn default_run_on_startup() -> bool {
    true
}

impl AgentConfig {
    /// Load configuration from the optional config file and the environment
    pub fn load() -> Result<Self> {
        let file = std::env::var(CONFIG_PATH_ENV).ok().map(PathBuf::from);
        Self::load_from(file.as_deref(), ENV_PREFIX)
    }

    /// Load from `file` (or `netprobe.*` if present) layered under
    /// environment variables starting with `env_prefix`
    pub fn load_from(file: Option<&Path>, env_prefix: &str) -> Result<Self> {
        let file_source = match file {
            Some(path) => config::File::from(path).required(true),
            None => config::File::with_name(DEFAULT_CONFIG_NAME).required(false),
        };

        let settings = config::Config::builder()
            .add_source(file_source)
            .add_source(config::Environment::with_prefix(env_prefix).try_parsing(true))
            .build()
            .context("Failed to read configuration")?;

        let config: AgentConfig = settings
            .try_deserialize()
            .context("Invalid configuration")?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values the agent cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.test_interval_secs == 0 {
            anyhow::bail!("test_interval_secs must be greater than zero");
        }
        if self.worker_pool_size == 0 {
            anyhow::bail!("worker_pool_size must be at least 1");
        }
        if self.ping_count == 0 {
            anyhow::bail!("ping_count must be at least 1");
        }
        if self.traceroute_timeout_secs == 0 {
            anyhow::bail!("traceroute_timeout_secs must be greater than zero");
        }
        if self.retained_rows == 0 {
            anyhow::bail!("retained_rows must be at least 1");
        }
        Ok(())
    }

    pub fn ping_timeout(&self) -> Option<Duration> {
        (self.ping_timeout_secs > 0).then(|| Duration::from_secs(self.ping_timeout_secs))
    }

    pub fn geo_cache_ttl(&self) -> Duration {
        Duration::from_secs(self.geo_cache_ttl_secs)
    }

    /// Location of the append-only outcome log
    pub fn outcomes_path(&self) -> PathBuf {
        self.data_dir.join("outcomes.jsonl")
    }

    pub fn cycle_config(&self) -> CycleConfig {
        CycleConfig {
            worker_pool_size: self.worker_pool_size,
            ping_count: self.ping_count,
            traceroute_timeout: Duration::from_secs(self.traceroute_timeout_secs),
        }
    }

    pub fn scheduler_config(&self) -> SchedulerConfig {
        SchedulerConfig {
            interval: Duration::from_secs(self.test_interval_secs),
            run_on_startup: self.run_on_startup,
        }
    }

    pub fn geo_resolver_config(&self) -> GeoResolverConfig {
        GeoResolverConfig {
            base_url: self.geo_api_url.clone(),
            timeout: Duration::from_secs(self.geo_timeout_secs),
        }
    }
}
