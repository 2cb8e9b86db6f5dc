// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Agent configuration.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{CompanionError, Result};

/// Runtime settings for one agent instance.
///
/// Durations are stored as plain integers so the struct round-trips through
/// JSON without a custom codec.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// Directory holding `config.json` and the helper tools.
    pub config_dir: PathBuf,
    /// Top-level collection containing one document per agent.
    pub root_collection: String,
    /// Sub-collection receiving print jobs.
    pub print_jobs_collection: String,
    /// Sub-collection receiving scale jobs.
    pub scale_jobs_collection: String,
    /// Sub-collection the remote log sink writes to.
    pub logs_collection: String,
    /// Port for the local status endpoint.
    pub server_port: u16,
    /// Seconds between printer availability scans.
    pub probe_interval_secs: u64,
    /// Seconds between log retention sweeps.
    pub log_sweep_interval_secs: u64,
    /// Age in seconds of the oldest log kept by the startup sweep.
    pub startup_log_cutoff_secs: u64,
    /// Upper bound on documents fetched per retention sweep.
    pub sweep_batch_limit: usize,
    /// Deadline for downloading a print artifact.
    pub fetch_timeout_secs: u64,
    /// Deadline for a print or scale backend invocation.
    pub backend_timeout_secs: u64,
    /// Deadline for a single remote store call.
    pub store_timeout_secs: u64,
    /// First delay after a transient change-feed error.
    pub feed_backoff_base_ms: u64,
    /// Ceiling for the change-feed backoff.
    pub feed_backoff_max_ms: u64,
    /// Print jobs allowed to run against the hardware at once.
    pub print_concurrency: usize,
    /// Scale jobs allowed to run at once.
    pub scale_concurrency: usize,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            config_dir: default_config_dir(),
            root_collection: "CompanionApps".into(),
            print_jobs_collection: "PrintJobs".into(),
            scale_jobs_collection: "ScaleJobs".into(),
            logs_collection: "Logs".into(),
            server_port: 62222,
            probe_interval_secs: 15,
            log_sweep_interval_secs: 60 * 60,
            startup_log_cutoff_secs: 60,
            sweep_batch_limit: 500,
            fetch_timeout_secs: 120,
            backend_timeout_secs: 300,
            store_timeout_secs: 30,
            feed_backoff_base_ms: 500,
            feed_backoff_max_ms: 30_000,
            print_concurrency: 4,
            scale_concurrency: 1,
        }
    }
}

impl AgentConfig {
    /// Path of the device document for `agent_id`.
    pub fn device_path(&self, agent_id: &str) -> String {
        format!("{}/{}", self.root_collection, agent_id)
    }

    /// Path of the print job collection for `agent_id`.
    pub fn print_jobs_path(&self, agent_id: &str) -> String {
        format!("{}/{}", self.device_path(agent_id), self.print_jobs_collection)
    }

    /// Path of the scale job collection for `agent_id`.
    pub fn scale_jobs_path(&self, agent_id: &str) -> String {
        format!("{}/{}", self.device_path(agent_id), self.scale_jobs_collection)
    }

    /// Path of the log collection for `agent_id`.
    pub fn logs_path(&self, agent_id: &str) -> String {
        format!("{}/{}", self.device_path(agent_id), self.logs_collection)
    }

    pub fn probe_interval(&self) -> Duration {
        Duration::from_secs(self.probe_interval_secs)
    }

    pub fn log_sweep_interval(&self) -> Duration {
        Duration::from_secs(self.log_sweep_interval_secs)
    }

    pub fn startup_log_cutoff(&self) -> Duration {
        Duration::from_secs(self.startup_log_cutoff_secs)
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs)
    }

    pub fn backend_timeout(&self) -> Duration {
        Duration::from_secs(self.backend_timeout_secs)
    }

    pub fn store_timeout(&self) -> Duration {
        Duration::from_secs(self.store_timeout_secs)
    }

    pub fn feed_backoff_base(&self) -> Duration {
        Duration::from_millis(self.feed_backoff_base_ms)
    }

    pub fn feed_backoff_max(&self) -> Duration {
        Duration::from_millis(self.feed_backoff_max_ms)
    }

    /// Reject settings the engine cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.print_concurrency == 0 || self.scale_concurrency == 0 {
            return Err(CompanionError::Config(
                "job concurrency must be at least 1".into(),
            ));
        }
        if self.probe_interval_secs == 0 || self.log_sweep_interval_secs == 0 {
            return Err(CompanionError::Config(
                "timer intervals must be non-zero".into(),
            ));
        }
        if self.feed_backoff_base_ms > self.feed_backoff_max_ms {
            return Err(CompanionError::Config(
                "feed backoff base exceeds its ceiling".into(),
            ));
        }
        if self.root_collection.is_empty() {
            return Err(CompanionError::Config("root collection is empty".into()));
        }
        Ok(())
    }
}

/// Platform default for the config directory.
///
/// Windows keeps the agent's files under `%ProgramData%\blade`; everything
/// else uses `/etc/blade`.
pub fn default_config_dir() -> PathBuf {
    if cfg!(windows) {
        let base = std::env::var("ProgramData").unwrap_or_else(|_| r"C:\ProgramData".into());
        PathBuf::from(base).join("blade")
    } else {
        PathBuf::from("/etc/blade")
    }
}
