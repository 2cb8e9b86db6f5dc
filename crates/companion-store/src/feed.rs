// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Change-feed plumbing shared by every store binding.
//
// A binding spawns a producer task that pushes batches into a `FeedSender`;
// the consumer pulls them from the paired `ChangeStream`.  Stopping goes
// through a watch channel so that a consumer blocked in `next_batch` wakes
// up with `CompanionError::FeedClosed` instead of waiting for the next
// remote change, and the producer notices and exits.

use std::sync::Arc;

use tokio::sync::{mpsc, watch};

use companion_core::error::{CompanionError, Result};

use crate::document::ChangeEvent;

type FeedItem = Result<Vec<ChangeEvent>>;

/// Cloneable handle that terminates a change stream.
#[derive(Debug, Clone)]
pub struct FeedStopper {
    tx: Arc<watch::Sender<bool>>,
}

impl FeedStopper {
    /// Request the stream to stop.  Idempotent.
    pub fn stop(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_stopped(&self) -> bool {
        *self.tx.borrow()
    }
}

/// Producer half of a change stream.
#[derive(Debug, Clone)]
pub struct FeedSender {
    tx: mpsc::Sender<FeedItem>,
    stop: watch::Receiver<bool>,
}

impl FeedSender {
    /// Deliver a batch.  Returns `false` once the stream is gone or stopped,
    /// at which point the producer should exit.
    pub async fn send(&self, batch: Vec<ChangeEvent>) -> bool {
        if self.is_stopped() {
            return false;
        }
        self.tx.send(Ok(batch)).await.is_ok()
    }

    /// Deliver a receive error the consumer should treat as transient.
    pub async fn send_error(&self, err: CompanionError) -> bool {
        if self.is_stopped() {
            return false;
        }
        self.tx.send(Err(err)).await.is_ok()
    }

    pub fn is_stopped(&self) -> bool {
        *self.stop.borrow() || self.tx.is_closed()
    }

    /// Resolves once the stream is stopped or its consumer dropped.
    pub async fn stopped(&mut self) {
        tokio::select! {
            _ = self.stop.wait_for(|stopped| *stopped) => {}
            _ = self.tx.closed() => {}
        }
    }
}

/// Consumer half: a blocking sequence of change batches.
#[derive(Debug)]
pub struct ChangeStream {
    rx: mpsc::Receiver<FeedItem>,
    stop: watch::Receiver<bool>,
    stopper: FeedStopper,
}

impl ChangeStream {
    /// Create a connected producer/consumer pair.
    pub fn channel(capacity: usize) -> (FeedSender, ChangeStream) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let (stop_tx, stop_rx) = watch::channel(false);
        let sender = FeedSender {
            tx,
            stop: stop_rx.clone(),
        };
        let stream = ChangeStream {
            rx,
            stop: stop_rx,
            stopper: FeedStopper {
                tx: Arc::new(stop_tx),
            },
        };
        (sender, stream)
    }

    /// Handle that can stop this stream from another task.
    pub fn stopper(&self) -> FeedStopper {
        self.stopper.clone()
    }

    /// Stop the stream from its owner.
    pub fn stop(&self) {
        self.stopper.stop();
    }

    pub fn is_stopped(&self) -> bool {
        *self.stop.borrow()
    }

    /// Resolves once the stream has been stopped.
    pub async fn stopped(&mut self) {
        let _ = self.stop.wait_for(|stopped| *stopped).await;
    }

    /// Wait for the next batch.
    ///
    /// `Err(CompanionError::FeedClosed)` is terminal: the stream was stopped
    /// or its producer went away.  Any other error is a transient receive
    /// failure and the stream remains usable.
    pub async fn next_batch(&mut self) -> Result<Vec<ChangeEvent>> {
        if *self.stop.borrow() {
            return Err(CompanionError::FeedClosed);
        }
        tokio::select! {
            biased;
            _ = self.stop.wait_for(|stopped| *stopped) => Err(CompanionError::FeedClosed),
            item = self.rx.recv() => match item {
                Some(item) => item,
                None => Err(CompanionError::FeedClosed),
            },
        }
    }
}
