// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Running external tools with a deadline.

use std::ffi::OsString;
use std::process::Stdio;
use std::time::Duration;

use tokio::process::Command;
use tracing::debug;

use companion_core::error::{CompanionError, Result};

/// Captured result of a finished process.
#[derive(Debug, Clone)]
pub struct CommandOutput {
    pub success: bool,
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    /// Short description of a failed run for error messages.
    pub fn failure_detail(&self) -> String {
        let stderr = self.stderr.trim();
        let detail = if stderr.is_empty() {
            self.stdout.trim()
        } else {
            stderr
        };
        match self.code {
            Some(code) => format!("exit status {code}: {detail}"),
            None => format!("terminated by signal: {detail}"),
        }
    }
}

/// A program plus leading arguments, e.g. `java -jar ScaleTools.jar`.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolCommand {
    pub program: OsString,
    pub args: Vec<OsString>,
}

impl ToolCommand {
    pub fn new(program: impl Into<OsString>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl Into<OsString>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Run to completion, killing the process if `limit` elapses first.
    ///
    /// Failing to spawn is an `Io` error; a non-zero exit is reported through
    /// `CommandOutput::success` and left to the caller.
    pub async fn run(&self, operation: &'static str, limit: Duration) -> Result<CommandOutput> {
        debug!(program = ?self.program, args = ?self.args, operation, "running tool");
        let child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        let output = tokio::time::timeout(limit, child.wait_with_output())
            .await
            .map_err(|_| CompanionError::Timeout {
                operation,
                after: limit,
            })??;

        Ok(CommandOutput {
            success: output.status.success(),
            code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}
