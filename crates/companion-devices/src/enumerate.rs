// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Local printer enumeration.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, instrument};

use companion_core::error::{CompanionError, Result};
use companion_core::types::DetectedPrinter;

use crate::command::ToolCommand;

/// Lists the printers installed on this host.
#[async_trait]
pub trait PrinterEnumerator: Send + Sync {
    async fn list_printers(&self) -> Result<Vec<DetectedPrinter>>;
}

/// Parse the JSON array printed by the printer helper.
pub fn parse_printer_list(stdout: &str) -> Result<Vec<DetectedPrinter>> {
    serde_json::from_str(stdout.trim())
        .map_err(|e| CompanionError::Enumeration(format!("unreadable printer list: {e}")))
}

/// `PrinterEnumerator` running `java -jar <config dir>/PrinterTools.jar`.
#[derive(Debug, Clone)]
pub struct JavaPrinterTools {
    command: ToolCommand,
    timeout: Duration,
}

impl JavaPrinterTools {
    pub fn new(config_dir: &Path, timeout: Duration) -> Self {
        let command = ToolCommand::new("java")
            .arg("-jar")
            .arg(config_dir.join("PrinterTools.jar"));
        Self::with_command(command, timeout)
    }

    pub fn with_command(command: ToolCommand, timeout: Duration) -> Self {
        Self { command, timeout }
    }
}

#[async_trait]
impl PrinterEnumerator for JavaPrinterTools {
    #[instrument(skip(self))]
    async fn list_printers(&self) -> Result<Vec<DetectedPrinter>> {
        let output = self.command.run("printer enumeration", self.timeout).await?;
        if !output.success {
            return Err(CompanionError::Enumeration(output.failure_detail()));
        }
        let printers = parse_printer_list(&output.stdout)?;
        debug!(count = printers.len(), "enumerated printers");
        Ok(printers)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_printers_and_trays() {
        let printers = parse_printer_list(
            r#"[{"name":"Zebra","trays":[]},{"name":"HP","trays":[{"name":"Tray 1"},{"name":"Tray 2"}]}]"#,
        )
        .unwrap();
        assert_eq!(printers.len(), 2);
        assert_eq!(printers[1].name, "HP");
        assert_eq!(printers[1].trays[1].name, "Tray 2");
    }

    #[test]
    fn empty_output_is_an_error() {
        assert!(matches!(
            parse_printer_list(""),
            Err(CompanionError::Enumeration(_))
        ));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn failing_helper_is_reported() {
        let command = ToolCommand::new("sh").arg("-c").arg("echo 'no jar' >&2; exit 1");
        let tools = JavaPrinterTools::with_command(command, Duration::from_secs(5));
        let err = tools.list_printers().await.unwrap_err();
        assert!(matches!(err, CompanionError::Enumeration(msg) if msg.contains("no jar")));
    }
}
