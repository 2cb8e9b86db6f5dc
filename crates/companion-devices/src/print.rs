// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Print backends.
//
// Unix hosts hand the file to the CUPS `lp` command.  Windows hosts use the
// SumatraPDF command line, which can also select an input tray.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use tracing::{info, instrument};

use companion_core::error::{CompanionError, Result};

use crate::command::ToolCommand;

/// One print invocation.
#[derive(Debug, Clone, Copy)]
pub struct PrintRequest<'a> {
    /// Printer name as known to the host spooler.
    pub printer: &'a str,
    /// Input tray, empty for the printer default.
    pub tray: &'a str,
    pub file: &'a Path,
    pub copies: u32,
}

impl PrintRequest<'_> {
    /// Reject requests that can never succeed before anything is executed.
    pub fn validate(&self) -> Result<()> {
        if self.printer.trim().is_empty() {
            return Err(CompanionError::PrintBackend("printer name is empty".into()));
        }
        if self.copies == 0 {
            return Err(CompanionError::PrintBackend(
                "copy count must be at least 1".into(),
            ));
        }
        if !self.file.is_file() {
            return Err(CompanionError::PrintBackend(format!(
                "file {} does not exist",
                self.file.display()
            )));
        }
        Ok(())
    }
}

/// Sends a local file to a printer.
#[async_trait]
pub trait PrintBackend: Send + Sync {
    async fn print(&self, request: PrintRequest<'_>) -> Result<()>;
}

/// Which host command line is used to print.
#[derive(Debug, Clone, PartialEq)]
pub enum PrintCommand {
    /// `lp -d <printer> -n <copies> <file>`
    Lp,
    /// `SumatraPDF.exe -print-to <printer> -print-settings "<n>x[ bin=<tray>]" <file>`
    Sumatra { executable: PathBuf },
}

impl PrintCommand {
    /// The command native to the current host.
    pub fn for_host(config_dir: &Path) -> Self {
        if cfg!(windows) {
            Self::Sumatra {
                executable: config_dir.join("SumatraPDF.exe"),
            }
        } else {
            Self::Lp
        }
    }

    pub fn build(&self, request: &PrintRequest<'_>) -> ToolCommand {
        match self {
            Self::Lp => ToolCommand::new("lp")
                .arg("-d")
                .arg(request.printer)
                .arg("-n")
                .arg(request.copies.to_string())
                .arg(request.file),
            Self::Sumatra { executable } => {
                let mut settings = format!("{}x", request.copies);
                if !request.tray.is_empty() {
                    settings.push_str(&format!(" bin={}", request.tray));
                }
                ToolCommand::new(executable)
                    .arg("-print-to")
                    .arg(request.printer)
                    .arg("-print-settings")
                    .arg(settings)
                    .arg(request.file)
            }
        }
    }
}

/// `PrintBackend` driving the host print command.
#[derive(Debug, Clone)]
pub struct CommandPrintBackend {
    command: PrintCommand,
    timeout: Duration,
}

impl CommandPrintBackend {
    pub fn new(command: PrintCommand, timeout: Duration) -> Self {
        Self { command, timeout }
    }

    pub fn for_host(config_dir: &Path, timeout: Duration) -> Self {
        Self::new(PrintCommand::for_host(config_dir), timeout)
    }
}

#[async_trait]
impl PrintBackend for CommandPrintBackend {
    #[instrument(skip(self), fields(printer = request.printer, copies = request.copies))]
    async fn print(&self, request: PrintRequest<'_>) -> Result<()> {
        request.validate()?;
        let output = self
            .command
            .build(&request)
            .run("print command", self.timeout)
            .await?;
        if !output.success {
            return Err(CompanionError::PrintBackend(output.failure_detail()));
        }
        info!(printer = request.printer, "file handed to spooler");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::ffi::OsString;

    use super::*;

    fn args(cmd: &ToolCommand) -> Vec<String> {
        cmd.args
            .iter()
            .map(|a| a.to_string_lossy().into_owned())
            .collect()
    }

    #[test]
    fn lp_command_line() {
        let request = PrintRequest {
            printer: "Zebra_ZD420",
            tray: "T2",
            file: Path::new("/tmp/label.pdf"),
            copies: 3,
        };
        let cmd = PrintCommand::Lp.build(&request);
        assert_eq!(cmd.program, OsString::from("lp"));
        assert_eq!(args(&cmd), ["-d", "Zebra_ZD420", "-n", "3", "/tmp/label.pdf"]);
    }

    #[test]
    fn sumatra_command_line_selects_tray() {
        let command = PrintCommand::Sumatra {
            executable: PathBuf::from("C:/ProgramData/blade/SumatraPDF.exe"),
        };
        let mut request = PrintRequest {
            printer: "HP LaserJet",
            tray: "Tray 2",
            file: Path::new("doc.pdf"),
            copies: 2,
        };
        assert_eq!(
            args(&command.build(&request)),
            ["-print-to", "HP LaserJet", "-print-settings", "2x bin=Tray 2", "doc.pdf"]
        );
        request.tray = "";
        assert_eq!(args(&command.build(&request))[3], "2x");
    }

    #[test]
    fn invalid_requests_are_rejected_up_front() {
        let file = tempfile::NamedTempFile::new().unwrap();
        let ok = PrintRequest {
            printer: "P",
            tray: "",
            file: file.path(),
            copies: 1,
        };
        assert!(ok.validate().is_ok());

        assert!(PrintRequest { printer: " ", ..ok }.validate().is_err());
        assert!(PrintRequest { copies: 0, ..ok }.validate().is_err());
        assert!(
            PrintRequest {
                file: Path::new("/nonexistent/companion.pdf"),
                ..ok
            }
            .validate()
            .is_err()
        );
    }

    #[tokio::test]
    async fn backend_validates_before_running() {
        let backend = CommandPrintBackend::new(PrintCommand::Lp, Duration::from_secs(1));
        let err = backend
            .print(PrintRequest {
                printer: "",
                tray: "",
                file: Path::new("x.pdf"),
                copies: 1,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, CompanionError::PrintBackend(_)));
    }
}
