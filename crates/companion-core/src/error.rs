// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Unified error types for Companion.

use std::time::Duration;

use thiserror::Error;

/// Top-level error type for all Companion operations.
#[derive(Debug, Error)]
pub enum CompanionError {
    // -- Remote store --
    #[error("document store error: {0}")]
    Store(String),

    #[error("document not found: {0}")]
    NotFound(String),

    #[error("change feed closed")]
    FeedClosed,

    // -- Job validation --
    #[error("invalid job document: {0}")]
    Validation(String),

    #[error("unknown document class: {0}")]
    UnknownDocumentClass(String),

    #[error("no printer has been configured for {0}")]
    NoPrinterConfigured(String),

    // -- Job execution --
    #[error("artifact fetch failed: {0}")]
    Fetch(String),

    #[error("print backend failed: {0}")]
    PrintBackend(String),

    #[error("scale backend failed: {0}")]
    ScaleBackend(String),

    #[error("printer enumeration failed: {0}")]
    Enumeration(String),

    #[error("{operation} timed out after {}s", .after.as_secs())]
    Timeout {
        operation: &'static str,
        after: Duration,
    },

    // -- Local setup --
    #[error("configuration error: {0}")]
    Config(String),

    #[error("local server error: {0}")]
    Server(String),

    #[error("file I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl CompanionError {
    /// Whether this error means the owning stream was closed on purpose.
    pub fn is_feed_closed(&self) -> bool {
        matches!(self, Self::FeedClosed)
    }
}

/// Alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, CompanionError>;
