// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Test doubles for the device backends.

use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::Mutex;

use async_trait::async_trait;

use companion_core::error::{CompanionError, Result};
use companion_core::types::{DetectedPrinter, Tray};
use companion_devices::{HostInfo, HostInspector, PrintBackend, PrintRequest, PrinterEnumerator, ScaleBackend};

pub struct FixedHost(pub HostInfo);

impl Default for FixedHost {
    fn default() -> Self {
        Self(HostInfo {
            operating_system: "linux".into(),
            hostname: "test-host".into(),
            java_version: "openjdk 21".into(),
        })
    }
}

#[async_trait]
impl HostInspector for FixedHost {
    async fn inspect(&self) -> HostInfo {
        self.0.clone()
    }
}

/// One observed print invocation.
#[derive(Debug, Clone, PartialEq)]
pub struct PrintCall {
    pub printer: String,
    pub tray: String,
    pub file: PathBuf,
    pub copies: u32,
    /// Whether the file existed while the backend ran.
    pub file_present: bool,
    pub contents: Vec<u8>,
}

#[derive(Default)]
pub struct FakePrinter {
    calls: Mutex<Vec<PrintCall>>,
    failure: Option<String>,
}

impl FakePrinter {
    pub fn failing(message: &str) -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            failure: Some(message.into()),
        }
    }

    pub fn calls(&self) -> Vec<PrintCall> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl PrintBackend for FakePrinter {
    async fn print(&self, request: PrintRequest<'_>) -> Result<()> {
        let contents = std::fs::read(request.file).unwrap_or_default();
        self.calls.lock().unwrap().push(PrintCall {
            printer: request.printer.into(),
            tray: request.tray.into(),
            file: request.file.to_path_buf(),
            copies: request.copies,
            file_present: request.file.is_file(),
            contents,
        });
        match &self.failure {
            Some(message) => Err(CompanionError::PrintBackend(message.clone())),
            None => Ok(()),
        }
    }
}

pub struct FakeScale {
    reading: std::result::Result<u32, String>,
    reads: Mutex<usize>,
}

impl FakeScale {
    pub fn reading(grams: u32) -> Self {
        Self {
            reading: Ok(grams),
            reads: Mutex::new(0),
        }
    }

    pub fn failing(message: &str) -> Self {
        Self {
            reading: Err(message.into()),
            reads: Mutex::new(0),
        }
    }

    pub fn reads(&self) -> usize {
        *self.reads.lock().unwrap()
    }
}

#[async_trait]
impl ScaleBackend for FakeScale {
    async fn read_weight(&self) -> Result<u32> {
        *self.reads.lock().unwrap() += 1;
        self.reading
            .clone()
            .map_err(CompanionError::ScaleBackend)
    }
}

/// Replays scripted scans; repeats the last one when the script runs out.
pub struct ScriptedPrinters {
    scans: Mutex<VecDeque<Result<Vec<DetectedPrinter>>>>,
    last: Mutex<Vec<DetectedPrinter>>,
}

impl ScriptedPrinters {
    pub fn new(scans: Vec<Result<Vec<DetectedPrinter>>>) -> Self {
        Self {
            scans: Mutex::new(scans.into()),
            last: Mutex::new(Vec::new()),
        }
    }

    pub fn always(printers: Vec<DetectedPrinter>) -> Self {
        Self::new(vec![Ok(printers)])
    }
}

#[async_trait]
impl PrinterEnumerator for ScriptedPrinters {
    async fn list_printers(&self) -> Result<Vec<DetectedPrinter>> {
        let next = self.scans.lock().unwrap().pop_front();
        match next {
            Some(Ok(printers)) => {
                *self.last.lock().unwrap() = printers.clone();
                Ok(printers)
            }
            Some(Err(err)) => Err(err),
            None => Ok(self.last.lock().unwrap().clone()),
        }
    }
}

pub fn printer(name: &str, trays: &[&str]) -> DetectedPrinter {
    DetectedPrinter {
        name: name.into(),
        trays: trays.iter().map(|t| Tray { name: (*t).into() }).collect(),
    }
}
