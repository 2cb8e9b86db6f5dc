// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Printer availability polling.

use std::collections::BTreeSet;
use std::sync::Arc;

use tracing::{error, info};

use companion_core::error::Result;
use companion_devices::PrinterEnumerator;

use crate::state::StateSync;

pub struct AvailabilityProbe {
    sync: Arc<StateSync>,
    enumerator: Arc<dyn PrinterEnumerator>,
}

impl AvailabilityProbe {
    pub fn new(sync: Arc<StateSync>, enumerator: Arc<dyn PrinterEnumerator>) -> Self {
        Self { sync, enumerator }
    }

    /// Scan once.  Returns whether the printer set changed, in which case
    /// the new list has been recorded and pushed.
    pub async fn poll(&self) -> Result<bool> {
        let printers = self
            .enumerator
            .list_printers()
            .await
            .inspect_err(|err| error!(error = %err, "failed to fetch the list of available printers"))?;

        let changed = self.sync.state().update(|state| {
            let detected: BTreeSet<&str> = printers.iter().map(|p| p.name.as_str()).collect();
            if state.available_printers.len() == printers.len()
                && state.available_printer_names() == detected
            {
                return false;
            }
            state.available_printers = printers.clone();
            true
        });

        if changed {
            info!(count = printers.len(), "available printers have changed");
            self.sync.push().await?;
        }
        Ok(changed)
    }
}
