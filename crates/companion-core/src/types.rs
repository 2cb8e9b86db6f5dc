// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Core domain types for the Companion device agent.
//
// `DeviceState` is serialized verbatim into the agent's remote document, so
// every field name here is part of the wire format shared with the web
// application that configures the device.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

use crate::error::CompanionError;

/// Version string reported in the device document.
pub const AGENT_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Logical class of document a print job carries.
///
/// Each class is routed to its own configured printer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentClass {
    Document,
    LabelSmall,
    LabelLarge,
    GiftNote,
}

impl DocumentClass {
    pub const ALL: [DocumentClass; 4] = [
        Self::Document,
        Self::LabelSmall,
        Self::LabelLarge,
        Self::GiftNote,
    ];

    /// Wire keyword for this class (`printer_type` on print jobs).
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Document => "document",
            Self::LabelSmall => "label_small",
            Self::LabelLarge => "label_large",
            Self::GiftNote => "gift_note",
        }
    }
}

impl fmt::Display for DocumentClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DocumentClass {
    type Err = CompanionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "document" => Ok(Self::Document),
            "label_small" => Ok(Self::LabelSmall),
            "label_large" => Ok(Self::LabelLarge),
            "gift_note" => Ok(Self::GiftNote),
            other => Err(CompanionError::UnknownDocumentClass(other.to_string())),
        }
    }
}

/// A physical printer or forwarding destination for one document class.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PrinterTarget {
    /// Address of another agent that prints on our behalf.
    pub forwarding: String,
    /// Display name chosen by the operator.
    pub name: String,
    /// OS-level printer name handed to the print backend.
    pub reference: String,
    /// Optional tray/bin selector; empty means the printer default.
    pub tray: String,
}

impl PrinterTarget {
    /// A target is usable when it names a device or a forwarding address.
    pub fn is_usable(&self) -> bool {
        !self.reference.is_empty() || !self.forwarding.is_empty()
    }
}

/// One printer target per document class.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Printers {
    pub document: PrinterTarget,
    pub gift_note: PrinterTarget,
    pub label_large: PrinterTarget,
    pub label_small: PrinterTarget,
}

impl Printers {
    pub fn get(&self, class: DocumentClass) -> &PrinterTarget {
        match class {
            DocumentClass::Document => &self.document,
            DocumentClass::LabelSmall => &self.label_small,
            DocumentClass::LabelLarge => &self.label_large,
            DocumentClass::GiftNote => &self.gift_note,
        }
    }

    pub fn get_mut(&mut self, class: DocumentClass) -> &mut PrinterTarget {
        match class {
            DocumentClass::Document => &mut self.document,
            DocumentClass::LabelSmall => &mut self.label_small,
            DocumentClass::LabelLarge => &mut self.label_large,
            DocumentClass::GiftNote => &mut self.gift_note,
        }
    }
}

/// USB scale attached to this device.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScaleDescriptor {
    pub forwarding: String,
    pub name: String,
    pub product_id: i64,
    pub vendor_id: i64,
}

/// The user last logged in through the local endpoint.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct UserSummary {
    // Ids are strings for compatibility with older web clients.
    pub company_id: String,
    pub company_name: String,
    pub id: String,
    /// Milliseconds since the Unix epoch.
    pub last_login: i64,
    pub name: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Bay {
    pub name: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Tray {
    pub name: String,
}

/// A printer reported by the local printer enumeration tool.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectedPrinter {
    pub name: String,
    pub trays: Vec<Tray>,
}

/// Persisted summary of the most recently accepted print job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrintJobSummary {
    pub printer_type: DocumentClass,
    pub quantity: u32,
    /// Unix seconds.
    pub created: i64,
    pub url: String,
}

/// Configuration and status of one agent, mirrored to the remote store.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceState {
    /// Identity of this agent; also the remote document id.
    #[serde(skip)]
    pub reference: String,
    pub version: String,
    pub bay: Bay,
    pub paused: bool,
    pub printers: Printers,
    pub scale: ScaleDescriptor,
    pub user: UserSummary,
    pub java_version: String,
    pub operating_system: String,
    pub hostname: String,
    pub available_printers: Vec<DetectedPrinter>,
    pub last_print_job: Option<PrintJobSummary>,
    pub is_started: bool,
}

impl DeviceState {
    /// Fresh state for a newly installed agent.
    pub fn new(reference: impl Into<String>) -> Self {
        Self {
            reference: reference.into(),
            version: AGENT_VERSION.to_string(),
            ..Default::default()
        }
    }

    /// Names of the printers currently recorded as available.
    pub fn available_printer_names(&self) -> BTreeSet<&str> {
        self.available_printers
            .iter()
            .map(|p| p.name.as_str())
            .collect()
    }
}

/// A print job decoded from its remote document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrintJob {
    pub class: DocumentClass,
    pub quantity: u32,
    pub created: DateTime<Utc>,
    /// Fetchable location of the document to print.
    pub url: String,
    /// Target resolved from the device state at dispatch time.
    pub target: PrinterTarget,
    /// Full path of the remote document, used to delete it afterwards.
    pub document_path: String,
}

impl PrintJob {
    pub fn summary(&self) -> PrintJobSummary {
        PrintJobSummary {
            printer_type: self.class,
            quantity: self.quantity,
            created: self.created.timestamp(),
            url: self.url.clone(),
        }
    }
}

/// Stored shape of a print job document.
#[derive(Debug, Clone, Deserialize)]
pub struct PrintJobDocument {
    pub printer_type: String,
    #[serde(deserialize_with = "quantity_from_wire")]
    pub quantity: i64,
    pub created: i64,
    pub url: String,
}

/// A weighing request decoded from its remote document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScaleJob {
    pub created: DateTime<Utc>,
    pub document_path: String,
}

/// Stored shape of a scale job document.
#[derive(Debug, Clone, Deserialize)]
pub struct ScaleJobDocument {
    pub created: i64,
}

/// Body of a `logged_in` request from the web application.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoginRequest {
    pub company_id: String,
    pub company_name: String,
    pub id: String,
    pub name: String,
}

/// Accepts the copy count as an integer or as a numeric string.
///
/// Older producers write `quantity` as a string.
fn quantity_from_wire<'de, D>(deserializer: D) -> Result<i64, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Wire {
        Int(i64),
        Text(String),
    }

    match Wire::deserialize(deserializer)? {
        Wire::Int(n) => Ok(n),
        Wire::Text(s) => s
            .trim()
            .parse()
            .map_err(|_| serde::de::Error::custom(format!("quantity {s:?} is not a number"))),
    }
}

/// Convert stored unix seconds into a timestamp.
pub fn timestamp_from_secs(secs: i64) -> Option<DateTime<Utc>> {
    DateTime::from_timestamp(secs, 0)
}
