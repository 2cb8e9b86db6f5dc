// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Job dispatch.
//
// Only `added` events become jobs.  Each event is decoded on its own: a
// malformed document, an unknown document class or an unconfigured printer
// skips that event and leaves the remote document as it is.  Accepted jobs
// are spawned and wait for a worker permit; dispatch itself never waits for
// a job to finish.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use companion_core::error::{CompanionError, Result};
use companion_core::types::{
    DocumentClass, PrintJob, PrintJobDocument, Printers, ScaleJob, ScaleJobDocument,
    timestamp_from_secs,
};
use companion_store::{ChangeEvent, ChangeKind};

use crate::listener::BatchHandler;
use crate::print_job::{PrintJobExecutor, PrintOutcome};
use crate::resolver::resolve_target;
use crate::scale_job::{ScaleJobExecutor, ScaleOutcome};
use crate::state::StateSync;

/// Decode a print job and resolve its printer.
pub fn decode_print_job(event: &ChangeEvent, printers: &Printers) -> Result<PrintJob> {
    let doc = &event.document;
    let raw: PrintJobDocument = doc.decode()?;
    let class: DocumentClass = raw.printer_type.parse()?;

    let quantity = u32::try_from(raw.quantity)
        .ok()
        .filter(|q| *q > 0)
        .ok_or_else(|| {
            CompanionError::Validation(format!("{}: quantity {} is not positive", doc.path, raw.quantity))
        })?;
    let created = timestamp_from_secs(raw.created).ok_or_else(|| {
        CompanionError::Validation(format!("{}: created {} is out of range", doc.path, raw.created))
    })?;
    if raw.url.trim().is_empty() {
        return Err(CompanionError::Validation(format!("{}: url is empty", doc.path)));
    }

    Ok(PrintJob {
        class,
        quantity,
        created,
        url: raw.url,
        target: resolve_target(printers, class)?,
        document_path: doc.path.clone(),
    })
}

pub fn decode_scale_job(event: &ChangeEvent) -> Result<ScaleJob> {
    let doc = &event.document;
    let raw: ScaleJobDocument = doc.decode()?;
    let created = timestamp_from_secs(raw.created).ok_or_else(|| {
        CompanionError::Validation(format!("{}: created {} is out of range", doc.path, raw.created))
    })?;
    Ok(ScaleJob {
        created,
        document_path: doc.path.clone(),
    })
}

fn added(batch: Vec<ChangeEvent>) -> impl Iterator<Item = ChangeEvent> {
    batch.into_iter().filter(|e| e.kind == ChangeKind::Added)
}

pub struct PrintDispatcher {
    sync: Arc<StateSync>,
    executor: Arc<PrintJobExecutor>,
    permits: Arc<Semaphore>,
}

impl PrintDispatcher {
    pub fn new(sync: Arc<StateSync>, executor: Arc<PrintJobExecutor>, concurrency: usize) -> Self {
        Self {
            sync,
            executor,
            permits: Arc::new(Semaphore::new(concurrency.max(1))),
        }
    }

    /// Launch every acceptable job in `batch`, returning their handles.
    pub async fn dispatch(&self, batch: Vec<ChangeEvent>) -> Vec<JoinHandle<PrintOutcome>> {
        let mut launched = Vec::new();
        for event in added(batch) {
            let state = self.sync.state();
            let job = match state.read(|s| decode_print_job(&event, &s.printers)) {
                Ok(job) => job,
                Err(err) => {
                    warn!(job = event.path(), error = %err, "skipping print job");
                    continue;
                }
            };
            info!(job = %job.document_path, class = %job.class, copies = job.quantity, "new print job");

            state.update(|s| s.last_print_job = Some(job.summary()));
            // The job still runs if the state cannot be saved.
            let _ = self.sync.push().await;

            let executor = self.executor.clone();
            let permits = self.permits.clone();
            launched.push(tokio::spawn(async move {
                let _permit = permits.acquire_owned().await.ok();
                executor.execute(&job).await
            }));
        }
        launched
    }
}

#[async_trait]
impl BatchHandler for PrintDispatcher {
    async fn handle(&self, batch: Vec<ChangeEvent>) {
        self.dispatch(batch).await;
    }
}

pub struct ScaleDispatcher {
    executor: Arc<ScaleJobExecutor>,
    permits: Arc<Semaphore>,
}

impl ScaleDispatcher {
    pub fn new(executor: Arc<ScaleJobExecutor>, concurrency: usize) -> Self {
        Self {
            executor,
            permits: Arc::new(Semaphore::new(concurrency.max(1))),
        }
    }

    pub fn dispatch(&self, batch: Vec<ChangeEvent>) -> Vec<JoinHandle<ScaleOutcome>> {
        let mut launched = Vec::new();
        for event in added(batch) {
            let job = match decode_scale_job(&event) {
                Ok(job) => job,
                Err(err) => {
                    warn!(job = event.path(), error = %err, "skipping scale job");
                    continue;
                }
            };
            info!(job = %job.document_path, "new scale job");

            let executor = self.executor.clone();
            let permits = self.permits.clone();
            launched.push(tokio::spawn(async move {
                let _permit = permits.acquire_owned().await.ok();
                executor.execute(&job).await
            }));
        }
        launched
    }
}

#[async_trait]
impl BatchHandler for ScaleDispatcher {
    async fn handle(&self, batch: Vec<ChangeEvent>) {
        self.dispatch(batch);
    }
}
