// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Retention sweeps over remote collections.

use std::sync::Arc;

use tracing::{error, info, instrument};

use companion_core::error::Result;
use companion_store::DocumentStore;

pub struct RetentionSweeper {
    store: Arc<dyn DocumentStore>,
    batch_limit: usize,
}

impl RetentionSweeper {
    pub fn new(store: Arc<dyn DocumentStore>, batch_limit: usize) -> Self {
        Self {
            store,
            batch_limit: batch_limit.max(1),
        }
    }

    /// Delete documents of `collection` whose `field` is strictly before
    /// `cutoff` (unix seconds).  Returns how many were deleted.
    ///
    /// The first failed delete ends the sweep; the rest wait for the next run.
    #[instrument(skip(self))]
    pub async fn sweep(&self, collection: &str, field: &str, cutoff: i64) -> Result<usize> {
        let expired = self
            .store
            .query_before(collection, field, cutoff, self.batch_limit)
            .await
            .inspect_err(|err| error!(error = %err, "failed to list expired documents"))?;

        let mut deleted = 0;
        for doc in &expired {
            self.store
                .delete(&doc.path)
                .await
                .inspect_err(|err| error!(path = %doc.path, error = %err, "failed to delete expired document"))?;
            deleted += 1;
        }
        info!(deleted, "retention sweep finished");
        Ok(deleted)
    }
}
