// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Change-feed listeners.
//
// A listener owns one `ChangeStream` and hands every batch to its handler,
// in the order the store delivered them.  `FeedClosed` ends the loop.  Any
// other receive error is logged and retried after a backoff delay; the
// delay is cut short when the stream is stopped.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use companion_store::{ChangeEvent, ChangeStream, FeedStopper};

use crate::backoff::Backoff;

/// Consumer of change batches.
#[async_trait]
pub trait BatchHandler: Send + Sync {
    async fn handle(&self, batch: Vec<ChangeEvent>);
}

/// What a listener saw before it exited.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ListenerReport {
    pub batches: usize,
    pub errors: usize,
}

pub struct ChangeFeedListener {
    name: &'static str,
    stream: ChangeStream,
    handler: Arc<dyn BatchHandler>,
    backoff: Backoff,
}

impl ChangeFeedListener {
    pub fn new(
        name: &'static str,
        stream: ChangeStream,
        handler: Arc<dyn BatchHandler>,
        backoff: Backoff,
    ) -> Self {
        Self {
            name,
            stream,
            handler,
            backoff,
        }
    }

    pub fn stopper(&self) -> FeedStopper {
        self.stream.stopper()
    }

    /// Receive until the stream is closed.
    pub async fn run(mut self) -> ListenerReport {
        let mut report = ListenerReport::default();
        info!(listener = self.name, "listening for changes");

        loop {
            match self.stream.next_batch().await {
                Ok(batch) => {
                    self.backoff.reset();
                    report.batches += 1;
                    debug!(listener = self.name, changes = batch.len(), "received changes");
                    self.handler.handle(batch).await;
                }
                Err(err) if err.is_feed_closed() => break,
                Err(err) => {
                    report.errors += 1;
                    let delay = self.backoff.next_delay();
                    warn!(
                        listener = self.name,
                        error = %err,
                        attempt = self.backoff.attempt(),
                        retry_in_ms = delay.as_millis() as u64,
                        "error receiving changes"
                    );
                    tokio::select! {
                        _ = self.stream.stopped() => break,
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
            }
        }

        info!(listener = self.name, batches = report.batches, "stopped listening");
        report
    }
}
