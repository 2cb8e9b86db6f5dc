// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Companion Agent: the event-to-action synchronization engine.
//
// Three change-feed listeners (print jobs, scale jobs, device config) feed
// the dispatchers and the state merger.  Jobs run on bounded worker permits
// and report back to the store; two timers keep the printer list and the
// remote log collection tidy.  `Agent` owns and wires all of it.

pub mod agent;
pub mod backoff;
pub mod dispatch;
pub mod listener;
pub mod merge;
pub mod print_job;
pub mod probe;
pub mod remote_log;
pub mod resolver;
pub mod scale_job;
pub mod server;
pub mod state;
pub mod sweeper;

#[cfg(test)]
pub(crate) mod testing;

pub use agent::{Agent, AgentDeps};
pub use print_job::{PrintJobExecutor, PrintOutcome};
pub use remote_log::{RemoteLogLayer, RemoteLogSink};
pub use scale_job::{ScaleJobExecutor, ScaleOutcome};
pub use state::{DeviceStateHandle, StateSync};
