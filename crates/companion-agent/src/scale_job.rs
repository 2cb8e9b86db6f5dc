// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Scale job execution.  Scale jobs are updated in place and never deleted.

use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info, instrument};

use companion_core::error::CompanionError;
use companion_core::types::ScaleJob;
use companion_devices::ScaleBackend;
use companion_store::{DocumentStore, FieldUpdate};

pub const READ_OK_MESSAGE: &str = "Value read okay.";

/// Terminal state of one scale job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScaleOutcome {
    /// Reading stored with `status = complete`.
    Complete { weight: u32 },
    /// Backend failure stored with `status = error`.
    Error { message: String },
    /// The result could not be written back.
    ReportFailed { reason: String },
}

pub struct ScaleJobExecutor {
    store: Arc<dyn DocumentStore>,
    backend: Arc<dyn ScaleBackend>,
    backend_timeout: Duration,
}

impl ScaleJobExecutor {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        backend: Arc<dyn ScaleBackend>,
        backend_timeout: Duration,
    ) -> Self {
        Self {
            store,
            backend,
            backend_timeout,
        }
    }

    async fn read(&self) -> Result<u32, CompanionError> {
        tokio::time::timeout(self.backend_timeout, self.backend.read_weight())
            .await
            .map_err(|_| CompanionError::Timeout {
                operation: "scale backend",
                after: self.backend_timeout,
            })?
    }

    #[instrument(skip(self, job), fields(job = %job.document_path))]
    pub async fn execute(&self, job: &ScaleJob) -> ScaleOutcome {
        let (updates, outcome) = match self.read().await {
            Ok(weight) => (
                vec![
                    FieldUpdate::new("message", READ_OK_MESSAGE),
                    FieldUpdate::new("error", ""),
                    FieldUpdate::new("status", "complete"),
                    FieldUpdate::new("weight", weight),
                ],
                ScaleOutcome::Complete { weight },
            ),
            Err(err) => {
                error!(error = %err, "failed to read scales");
                let message = match err {
                    CompanionError::ScaleBackend(message) => message,
                    other => other.to_string(),
                };
                (
                    vec![
                        FieldUpdate::new("message", message.clone()),
                        FieldUpdate::new("status", "error"),
                    ],
                    ScaleOutcome::Error { message },
                )
            }
        };

        match self.store.update(&job.document_path, updates).await {
            Ok(()) => {
                info!(?outcome, "scale job reported");
                outcome
            }
            Err(err) => {
                error!(error = %err, "failed to save the scale result");
                ScaleOutcome::ReportFailed {
                    reason: err.to_string(),
                }
            }
        }
    }
}
