// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Scale backends.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{info, instrument};

use companion_core::error::{CompanionError, Result};

use crate::command::ToolCommand;

/// Reads the attached scale.
#[async_trait]
pub trait ScaleBackend: Send + Sync {
    /// Current reading in whole grams.
    async fn read_weight(&self) -> Result<u32>;
}

#[derive(Debug, Deserialize)]
struct ScaleToolOutput {
    #[serde(default)]
    weight: i64,
    #[serde(default)]
    error: String,
}

/// Parse the JSON line printed by the scale helper.
pub fn parse_scale_output(stdout: &str) -> Result<u32> {
    let output: ScaleToolOutput = serde_json::from_str(stdout.trim())
        .map_err(|e| CompanionError::ScaleBackend(format!("unreadable scale output: {e}")))?;
    if !output.error.is_empty() {
        return Err(CompanionError::ScaleBackend(format!(
            "Failed to get weight: {}",
            output.error
        )));
    }
    u32::try_from(output.weight).map_err(|_| {
        CompanionError::ScaleBackend(format!("scale reported invalid weight {}", output.weight))
    })
}

/// `ScaleBackend` running `java -jar <config dir>/ScaleTools.jar`.
#[derive(Debug, Clone)]
pub struct JavaScaleTools {
    command: ToolCommand,
    timeout: Duration,
}

impl JavaScaleTools {
    pub fn new(config_dir: &Path, timeout: Duration) -> Self {
        let command = ToolCommand::new("java")
            .arg("-jar")
            .arg(config_dir.join("ScaleTools.jar"));
        Self::with_command(command, timeout)
    }

    pub fn with_command(command: ToolCommand, timeout: Duration) -> Self {
        Self { command, timeout }
    }
}

#[async_trait]
impl ScaleBackend for JavaScaleTools {
    #[instrument(skip(self))]
    async fn read_weight(&self) -> Result<u32> {
        let output = self.command.run("scale read", self.timeout).await?;
        if !output.success {
            return Err(CompanionError::ScaleBackend(output.failure_detail()));
        }
        let weight = parse_scale_output(&output.stdout)?;
        info!(weight, "read the scale");
        Ok(weight)
    }
}
