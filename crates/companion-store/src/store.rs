// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// The document store contract the agent is written against.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use companion_core::error::Result;

use crate::document::{Document, FieldUpdate};
use crate::feed::ChangeStream;

/// A hierarchical, remotely hosted document store.
///
/// Paths alternate collection and document segments.  Integer ordering keys
/// (`created`, `timestamp`) are unix seconds.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Short name used in logs.
    fn backend_name(&self) -> &'static str;

    /// Fetch a document, `None` if it does not exist.
    async fn get(&self, path: &str) -> Result<Option<Document>>;

    /// Create or replace a whole document.
    async fn set(&self, path: &str, data: Value) -> Result<()>;

    /// Change individual fields of an existing document.
    ///
    /// Fails with `CompanionError::NotFound` if the document does not exist.
    async fn update(&self, path: &str, updates: Vec<FieldUpdate>) -> Result<()>;

    /// Delete a document.  Deleting a missing document succeeds.
    async fn delete(&self, path: &str) -> Result<()>;

    /// Add a document with a generated id to `collection`, returning its path.
    async fn add(&self, collection: &str, data: Value) -> Result<String>;

    /// Documents of `collection` whose integer `field` is strictly below
    /// `end_before`, ascending by that field, at most `limit` of them.
    async fn query_before(
        &self,
        collection: &str,
        field: &str,
        end_before: i64,
        limit: usize,
    ) -> Result<Vec<Document>>;

    /// Subscribe to documents of `collection` whose integer `order_field` is
    /// strictly greater than `start_after`, ordered by that field.
    ///
    /// The first batch reports every document already matching as added.
    async fn subscribe_collection(
        &self,
        collection: &str,
        order_field: &str,
        start_after: i64,
    ) -> Result<ChangeStream>;

    /// Subscribe to a single document.  The first batch carries the current
    /// snapshot if the document exists.
    async fn subscribe_document(&self, path: &str) -> Result<ChangeStream>;
}

#[async_trait]
impl<T: DocumentStore + ?Sized> DocumentStore for Arc<T> {
    fn backend_name(&self) -> &'static str {
        (**self).backend_name()
    }

    async fn get(&self, path: &str) -> Result<Option<Document>> {
        (**self).get(path).await
    }

    async fn set(&self, path: &str, data: Value) -> Result<()> {
        (**self).set(path, data).await
    }

    async fn update(&self, path: &str, updates: Vec<FieldUpdate>) -> Result<()> {
        (**self).update(path, updates).await
    }

    async fn delete(&self, path: &str) -> Result<()> {
        (**self).delete(path).await
    }

    async fn add(&self, collection: &str, data: Value) -> Result<String> {
        (**self).add(collection, data).await
    }

    async fn query_before(
        &self,
        collection: &str,
        field: &str,
        end_before: i64,
        limit: usize,
    ) -> Result<Vec<Document>> {
        (**self).query_before(collection, field, end_before, limit).await
    }

    async fn subscribe_collection(
        &self,
        collection: &str,
        order_field: &str,
        start_after: i64,
    ) -> Result<ChangeStream> {
        (**self)
            .subscribe_collection(collection, order_field, start_after)
            .await
    }

    async fn subscribe_document(&self, path: &str) -> Result<ChangeStream> {
        (**self).subscribe_document(path).await
    }
}
