// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Companion Devices: the local hardware seen through external tools.
//
// Each capability is a trait so the agent can be exercised against fakes.
// The concrete implementations shell out to the platform print spooler and
// to the bundled Java helper jars in the configuration directory.

pub mod command;
pub mod enumerate;
pub mod host;
pub mod print;
pub mod scale;

pub use command::{CommandOutput, ToolCommand};
pub use enumerate::{JavaPrinterTools, PrinterEnumerator};
pub use host::{HostInfo, HostInspector, SystemHost};
pub use print::{CommandPrintBackend, PrintBackend, PrintCommand, PrintRequest};
pub use scale::{JavaScaleTools, ScaleBackend};
