// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Exponential backoff with jitter for change-feed receive errors.
//
// delay = min(base * 2^attempt + jitter, ceiling), jitter in [0, base).
// A successful receive resets the attempt counter.

use std::time::Duration;

/// Backoff state for one listener.
#[derive(Debug, Clone)]
pub struct Backoff {
    base: Duration,
    ceiling: Duration,
    attempt: u32,
}

impl Backoff {
    pub fn new(base: Duration, ceiling: Duration) -> Self {
        Self {
            base,
            ceiling: ceiling.max(base),
            attempt: 0,
        }
    }

    /// Delay before the next retry; advances the attempt counter.
    pub fn next_delay(&mut self) -> Duration {
        let delay = compute_delay(self.attempt, self.base, self.ceiling);
        self.attempt = self.attempt.saturating_add(1);
        delay
    }

    pub fn reset(&mut self) {
        self.attempt = 0;
    }

    pub fn attempt(&self) -> u32 {
        self.attempt
    }
}

fn compute_delay(attempt: u32, base: Duration, ceiling: Duration) -> Duration {
    let base_ms = base.as_millis() as u64;
    let exp_ms = base_ms.saturating_mul(1u64 << attempt.min(16));
    let total_ms = exp_ms.saturating_add(jitter(base_ms, attempt));
    Duration::from_millis(total_ms.min(ceiling.as_millis() as u64))
}

/// Deterministic spread in [0, base) derived from the attempt number.
fn jitter(base_ms: u64, attempt: u32) -> u64 {
    let hash = (attempt as u64).wrapping_mul(6364136223846793005);
    hash % base_ms.max(1)
}
