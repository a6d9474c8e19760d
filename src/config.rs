use std::path::Path;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde::Deserialize;

use crate::load::MAX_PIDS_PER_CALL;

/// What to do when a domain's UUID has no match in the process listing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnresolvedPidPolicy {
    /// Drop only that domain from the batch (default).
    Skip,
    /// Abandon the whole batch; remaining batches still run.
    FailBatch,
}

impl Default for UnresolvedPidPolicy {
    fn default() -> Self {
        Self::Skip
    }
}

/// Top-level configuration for the collector.
///
/// Built once at startup and passed explicitly; nothing reads module-global
/// state. Every field has a default, so the collector runs with no config
/// file at all.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Libvirt connection URI. Default: "qemu:///system".
    #[serde(default = "default_hypervisor_uri")]
    pub hypervisor_uri: String,

    /// Wall-clock pause between cycles. Default: 15s.
    #[serde(default = "default_interval", with = "humantime_serde")]
    pub interval: Duration,

    /// Wait between the two counter snapshots of one domain; also the rate
    /// denominator and the bulk load tool's sampling delay. Default: 300ms.
    #[serde(default = "default_snapshot_wait", with = "humantime_serde")]
    pub snapshot_wait: Duration,

    /// Domains per batch; one process-listing scan and one bulk load call
    /// serve a whole batch. Default and maximum: 20.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Deadline for each external tool invocation. Default: 30s.
    #[serde(default = "default_tool_timeout", with = "humantime_serde")]
    pub tool_timeout: Duration,

    /// Policy for domains whose pid cannot be resolved. Default: skip.
    #[serde(default)]
    pub on_unresolved_pid: UnresolvedPidPolicy,
}

// --- Default value functions ---

fn default_hypervisor_uri() -> String {
    "qemu:///system".to_string()
}

fn default_interval() -> Duration {
    Duration::from_secs(15)
}

fn default_snapshot_wait() -> Duration {
    Duration::from_millis(300)
}

fn default_batch_size() -> usize {
    MAX_PIDS_PER_CALL
}

fn default_tool_timeout() -> Duration {
    Duration::from_secs(30)
}

impl Default for Config {
    fn default() -> Self {
        Self {
            hypervisor_uri: default_hypervisor_uri(),
            interval: default_interval(),
            snapshot_wait: default_snapshot_wait(),
            batch_size: default_batch_size(),
            tool_timeout: default_tool_timeout(),
            on_unresolved_pid: UnresolvedPidPolicy::default(),
        }
    }
}

// --- Validation and loading ---

impl Config {
    /// Load configuration from a YAML file.
    pub fn load(path: &Path) -> Result<Self> {
        let data = std::fs::read_to_string(path)
            .with_context(|| format!("reading config file {}", path.display()))?;

        let cfg: Config = serde_yaml::from_str(&data)
            .with_context(|| format!("parsing config file {}", path.display()))?;

        cfg.validate()?;

        Ok(cfg)
    }

    /// Validate the configuration for required fields and consistency.
    pub fn validate(&self) -> Result<()> {
        if self.hypervisor_uri.is_empty() {
            bail!("hypervisor_uri is required");
        }

        if self.interval.is_zero() {
            bail!("interval must be positive");
        }

        if self.snapshot_wait.is_zero() {
            bail!("snapshot_wait must be positive");
        }

        if self.batch_size == 0 {
            bail!("batch_size must be positive");
        }

        // The bulk load tool rejects longer pid lists.
        if self.batch_size > MAX_PIDS_PER_CALL {
            bail!("batch_size must be at most {MAX_PIDS_PER_CALL}");
        }

        if self.tool_timeout.is_zero() {
            bail!("tool_timeout must be positive");
        }

        if self.tool_timeout <= self.snapshot_wait {
            bail!("tool_timeout must exceed snapshot_wait (the bulk load tool sleeps that long)");
        }

        Ok(())
    }
}
