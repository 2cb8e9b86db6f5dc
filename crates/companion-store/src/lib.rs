// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Companion Store: the remote document store as seen by the agent.
//
// The agent only ever talks to the `DocumentStore` trait.  Two bindings are
// provided: an in-process `MemoryStore` with full change-feed semantics and
// a `FirestoreStore` speaking the Firestore REST API.  `DeadlineStore` wraps
// either one so that no remote call can block its caller indefinitely.

pub mod deadline;
pub mod document;
pub mod feed;
pub mod firestore;
pub mod memory;
pub mod store;
mod value;

pub use deadline::DeadlineStore;
pub use document::{ChangeEvent, ChangeKind, Document, FieldUpdate};
pub use feed::{ChangeStream, FeedSender, FeedStopper};
pub use firestore::{FirestoreConfig, FirestoreStore};
pub use memory::{MemoryStore, StoreOp};
pub use store::DocumentStore;
