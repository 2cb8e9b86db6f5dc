// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Print job execution.
//
// new -> fetching -> printing -> reporting -> done, and any failing step
// ends the job.  The artifact lives in a `NamedTempFile` owned by this
// function, so it is removed on every exit path.  A failed job is left in
// the store untouched for an operator to look at.

use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tempfile::NamedTempFile;
use tracing::{debug, error, info, instrument, warn};

use companion_core::error::{CompanionError, Result};
use companion_core::types::PrintJob;
use companion_devices::{PrintBackend, PrintRequest};
use companion_store::DocumentStore;

/// Step a print job failed in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrintStage {
    Fetching,
    Printing,
    Reporting,
}

/// Terminal state of one print job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PrintOutcome {
    /// Printed and removed from the store.
    Completed,
    Failed { stage: PrintStage, reason: String },
}

impl PrintOutcome {
    fn failed(stage: PrintStage, err: &CompanionError) -> Self {
        Self::Failed {
            stage,
            reason: err.to_string(),
        }
    }
}

pub struct PrintJobExecutor {
    store: Arc<dyn DocumentStore>,
    backend: Arc<dyn PrintBackend>,
    client: reqwest::Client,
    fetch_timeout: Duration,
    backend_timeout: Duration,
    temp_dir: Option<PathBuf>,
}

impl PrintJobExecutor {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        backend: Arc<dyn PrintBackend>,
        fetch_timeout: Duration,
        backend_timeout: Duration,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| CompanionError::Fetch(format!("failed to create HTTP client: {e}")))?;
        Ok(Self {
            store,
            backend,
            client,
            fetch_timeout,
            backend_timeout,
            temp_dir: None,
        })
    }

    /// Download artifacts into `dir` instead of the system temp directory.
    pub fn with_temp_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.temp_dir = Some(dir.into());
        self
    }

    fn temp_file(&self) -> Result<NamedTempFile> {
        let mut builder = tempfile::Builder::new();
        builder.prefix("print_job_").suffix(".pdf");
        let file = match &self.temp_dir {
            Some(dir) => builder.tempfile_in(dir)?,
            None => builder.tempfile()?,
        };
        Ok(file)
    }

    /// Download `url` into a fresh temporary file.
    async fn fetch(&self, url: &str) -> Result<NamedTempFile> {
        let download = async {
            let mut response = self
                .client
                .get(url)
                .send()
                .await
                .and_then(|r| r.error_for_status())
                .map_err(|e| CompanionError::Fetch(e.to_string()))?;

            let mut file = self.temp_file()?;
            while let Some(chunk) = response
                .chunk()
                .await
                .map_err(|e| CompanionError::Fetch(e.to_string()))?
            {
                file.write_all(&chunk)?;
            }
            file.flush()?;
            Ok(file)
        };

        tokio::time::timeout(self.fetch_timeout, download)
            .await
            .map_err(|_| CompanionError::Timeout {
                operation: "artifact fetch",
                after: self.fetch_timeout,
            })?
    }

    async fn print(&self, job: &PrintJob, file: &NamedTempFile) -> Result<()> {
        let request = PrintRequest {
            printer: &job.target.reference,
            tray: &job.target.tray,
            file: file.path(),
            copies: job.quantity,
        };
        tokio::time::timeout(self.backend_timeout, self.backend.print(request))
            .await
            .map_err(|_| CompanionError::Timeout {
                operation: "print backend",
                after: self.backend_timeout,
            })?
    }

    /// Run one job to its terminal state.
    #[instrument(skip(self, job), fields(job = %job.document_path, class = %job.class))]
    pub async fn execute(&self, job: &PrintJob) -> PrintOutcome {
        let started = Instant::now();

        info!(url = %job.url, "downloading file to print");
        let file = match self.fetch(&job.url).await {
            Ok(file) => file,
            Err(err) => {
                error!(error = %err, "failed to download file");
                return PrintOutcome::failed(PrintStage::Fetching, &err);
            }
        };
        let downloaded = started.elapsed();

        info!(printer = %job.target.reference, copies = job.quantity, "sending print command");
        if let Err(err) = self.print(job, &file).await {
            error!(error = %err, "failed to print file");
            release(file);
            return PrintOutcome::failed(PrintStage::Printing, &err);
        }
        debug!(
            download_ms = downloaded.as_millis() as u64,
            total_ms = started.elapsed().as_millis() as u64,
            "completed print request"
        );

        let reported = self.store.delete(&job.document_path).await;
        release(file);
        match reported {
            Ok(()) => {
                info!("print job removed from the store");
                PrintOutcome::Completed
            }
            Err(err) => {
                error!(error = %err, "failed to remove the print job from the store");
                PrintOutcome::failed(PrintStage::Reporting, &err)
            }
        }
    }
}

/// Remove the downloaded artifact; failure is only worth a warning.
fn release(file: NamedTempFile) {
    let path = file.path().to_path_buf();
    if let Err(err) = file.close() {
        warn!(path = %path.display(), error = %err, "failed to remove the job's file");
    }
}
