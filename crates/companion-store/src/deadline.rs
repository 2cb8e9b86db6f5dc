// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Per-call deadlines for any document store.

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tracing::warn;

use companion_core::error::{CompanionError, Result};

use crate::document::{Document, FieldUpdate};
use crate::feed::ChangeStream;
use crate::store::DocumentStore;

/// Wraps a store so that every call fails with `CompanionError::Timeout`
/// instead of hanging past `limit`.
///
/// Opening a subscription is bounded; waiting on it afterwards is not.
pub struct DeadlineStore<S> {
    inner: S,
    limit: Duration,
}

impl<S: DocumentStore> DeadlineStore<S> {
    pub fn new(inner: S, limit: Duration) -> Self {
        Self { inner, limit }
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }

    async fn bounded<T>(
        &self,
        operation: &'static str,
        fut: impl Future<Output = Result<T>> + Send,
    ) -> Result<T> {
        match tokio::time::timeout(self.limit, fut).await {
            Ok(result) => result,
            Err(_) => {
                warn!(operation, backend = self.inner.backend_name(), "store call timed out");
                Err(CompanionError::Timeout {
                    operation,
                    after: self.limit,
                })
            }
        }
    }
}

#[async_trait]
impl<S: DocumentStore> DocumentStore for DeadlineStore<S> {
    fn backend_name(&self) -> &'static str {
        self.inner.backend_name()
    }

    async fn get(&self, path: &str) -> Result<Option<Document>> {
        self.bounded("store get", self.inner.get(path)).await
    }

    async fn set(&self, path: &str, data: Value) -> Result<()> {
        self.bounded("store set", self.inner.set(path, data)).await
    }

    async fn update(&self, path: &str, updates: Vec<FieldUpdate>) -> Result<()> {
        self.bounded("store update", self.inner.update(path, updates))
            .await
    }

    async fn delete(&self, path: &str) -> Result<()> {
        self.bounded("store delete", self.inner.delete(path)).await
    }

    async fn add(&self, collection: &str, data: Value) -> Result<String> {
        self.bounded("store add", self.inner.add(collection, data))
            .await
    }

    async fn query_before(
        &self,
        collection: &str,
        field: &str,
        end_before: i64,
        limit: usize,
    ) -> Result<Vec<Document>> {
        self.bounded(
            "store query",
            self.inner.query_before(collection, field, end_before, limit),
        )
        .await
    }

    async fn subscribe_collection(
        &self,
        collection: &str,
        order_field: &str,
        start_after: i64,
    ) -> Result<ChangeStream> {
        self.bounded(
            "store subscribe",
            self.inner
                .subscribe_collection(collection, order_field, start_after),
        )
        .await
    }

    async fn subscribe_document(&self, path: &str) -> Result<ChangeStream> {
        self.bounded("store subscribe", self.inner.subscribe_document(path))
            .await
    }
}
