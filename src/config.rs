//! Dispatch configuration loaded from `polyglot.toml`.
//!
//! [`DispatchConfig`] holds every tunable of the dispatch core. Keys missing
//! from the file fall back to defaults. The `POLYGLOT_WORKER_ADDR`
//! environment variable takes precedence over the file for the worker address.

use std::path::Path;
use std::time::Duration;

use anyhow::{Result, bail};
use serde::Deserialize;

use crate::job::RetryPolicy;

/// Top-level configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct DispatchConfig {
    /// Re-sends allowed per job before it is failed or timed out.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Inactivity budget per job, in milliseconds.
    #[serde(default = "default_per_job_timeout_ms")]
    pub per_job_timeout_ms: u64,

    /// How long terminal jobs stay registered to absorb late duplicates.
    #[serde(default = "default_eviction_grace_ms")]
    pub eviction_grace_ms: u64,

    /// Period of the timeout/retry sweep.
    #[serde(default = "default_supervisor_interval_ms")]
    pub supervisor_interval_ms: u64,

    /// Address of the worker pool for the TCP transport.
    #[serde(default = "default_worker_addr")]
    pub worker_addr: String,

    /// Capacity of the transport's outbound and inbound queues.
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
}

fn default_max_retries() -> u32 {
    2
}

fn default_per_job_timeout_ms() -> u64 {
    30_000
}

fn default_eviction_grace_ms() -> u64 {
    60_000
}

fn default_supervisor_interval_ms() -> u64 {
    2_000
}

fn default_worker_addr() -> String {
    "127.0.0.1:5555".to_string()
}

fn default_channel_capacity() -> usize {
    1024
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            per_job_timeout_ms: default_per_job_timeout_ms(),
            eviction_grace_ms: default_eviction_grace_ms(),
            supervisor_interval_ms: default_supervisor_interval_ms(),
            worker_addr: default_worker_addr(),
            channel_capacity: default_channel_capacity(),
        }
    }
}

impl DispatchConfig {
    /// Load `polyglot.toml` from the current directory.
    pub fn load() -> Result<Self> {
        Self::load_from(Path::new("polyglot.toml"))
    }

    /// Load from `path`, or use defaults if it does not exist.
    pub fn load_from(path: &Path) -> Result<Self> {
        let mut config = if path.exists() {
            let contents = std::fs::read_to_string(path)?;
            toml::from_str::<DispatchConfig>(&contents)?
        } else {
            Self::default()
        };

        if let Ok(addr) = std::env::var("POLYGLOT_WORKER_ADDR")
            && !addr.is_empty()
        {
            config.worker_addr = addr;
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.per_job_timeout_ms == 0 {
            bail!("per_job_timeout_ms must be greater than zero");
        }
        if self.supervisor_interval_ms == 0 {
            bail!("supervisor_interval_ms must be greater than zero");
        }
        if self.channel_capacity == 0 {
            bail!("channel_capacity must be greater than zero");
        }
        Ok(())
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.max_retries,
            timeout: self.per_job_timeout(),
        }
    }

    pub fn per_job_timeout(&self) -> Duration {
        Duration::from_millis(self.per_job_timeout_ms)
    }

    pub fn eviction_grace(&self) -> Duration {
        Duration::from_millis(self.eviction_grace_ms)
    }

    pub fn supervisor_interval(&self) -> Duration {
        Duration::from_millis(self.supervisor_interval_ms)
    }
}
