// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Host metadata reported alongside the device state.

use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::command::ToolCommand;

/// Operating system, host name and Java runtime of this machine.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HostInfo {
    pub operating_system: String,
    pub hostname: String,
    /// First line of `java --version`, empty if Java is unavailable.
    pub java_version: String,
}

/// Source of host metadata.  Never fails: unknown values are left empty.
#[async_trait]
pub trait HostInspector: Send + Sync {
    async fn inspect(&self) -> HostInfo;
}

/// Inspects the machine the agent runs on.
#[derive(Debug, Clone)]
pub struct SystemHost {
    java: ToolCommand,
    timeout: Duration,
}

impl Default for SystemHost {
    fn default() -> Self {
        Self {
            java: ToolCommand::new("java").arg("--version"),
            timeout: Duration::from_secs(10),
        }
    }
}

impl SystemHost {
    pub async fn java_version(&self) -> String {
        match self.java.run("java version", self.timeout).await {
            Ok(output) if output.success => {
                let version = first_line(&output.stdout);
                debug!(version, "detected java runtime");
                version
            }
            Ok(output) => {
                warn!(detail = %output.failure_detail(), "failed to look up java version");
                String::new()
            }
            Err(err) => {
                warn!(error = %err, "failed to look up java version");
                String::new()
            }
        }
    }
}

#[async_trait]
impl HostInspector for SystemHost {
    async fn inspect(&self) -> HostInfo {
        HostInfo {
            operating_system: std::env::consts::OS.to_string(),
            hostname: local_hostname(),
            java_version: self.java_version().await,
        }
    }
}

pub fn local_hostname() -> String {
    hostname::get()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default()
}

fn first_line(text: &str) -> String {
    text.lines().next().unwrap_or_default().trim().to_string()
}
