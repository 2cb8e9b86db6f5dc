// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Firestore binding over the REST v1 API.
//
// Reads and writes map one-to-one onto REST calls.  The REST surface has no
// streaming listener, so change feeds are produced by polling: the watched
// query (or document) is re-read every `poll_interval` and the result is
// diffed against the previous poll by `updateTime`.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Method, RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use serde_json::{Map, Value, json};
use tracing::{debug, instrument, warn};

use companion_core::error::{CompanionError, Result};

use crate::document::{ChangeEvent, ChangeKind, Document, FieldUpdate, apply_updates, document_id, parent_path};
use crate::feed::{ChangeStream, FeedSender};
use crate::store::DocumentStore;
use crate::value::{decode_fields, encode_fields, encode_value};

const FEED_CAPACITY: usize = 16;

/// Connection settings for a Firestore database.
#[derive(Debug, Clone)]
pub struct FirestoreConfig {
    pub project_id: String,
    /// Database id, `(default)` unless a named database is used.
    pub database: String,
    /// REST root, e.g. `https://firestore.googleapis.com/v1`.
    pub base_url: String,
    /// OAuth2 bearer token.  Emulators accept requests without one.
    pub token: Option<String>,
    /// How often change feeds re-read their query.
    pub poll_interval: Duration,
    /// Transport-level timeout for a single request.
    pub request_timeout: Duration,
}

impl FirestoreConfig {
    pub fn new(project_id: impl Into<String>) -> Self {
        Self {
            project_id: project_id.into(),
            database: "(default)".to_string(),
            base_url: "https://firestore.googleapis.com/v1".to_string(),
            token: None,
            poll_interval: Duration::from_secs(2),
            request_timeout: Duration::from_secs(30),
        }
    }

    /// Resource name of the documents root.
    fn documents_name(&self) -> String {
        format!(
            "projects/{}/databases/{}/documents",
            self.project_id, self.database
        )
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RestDocument {
    name: String,
    #[serde(default)]
    fields: Option<Value>,
    #[serde(default)]
    update_time: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RunQueryRow {
    #[serde(default)]
    document: Option<RestDocument>,
}

/// A decoded document plus the revision marker used for diffing.
#[derive(Debug, Clone)]
struct Revision {
    document: Document,
    update_time: String,
}

/// `DocumentStore` backed by Firestore.
#[derive(Clone)]
pub struct FirestoreStore {
    config: Arc<FirestoreConfig>,
    client: Client,
}

impl FirestoreStore {
    pub fn new(config: FirestoreConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| CompanionError::Store(format!("failed to create HTTP client: {e}")))?;
        Ok(Self {
            config: Arc::new(config),
            client,
        })
    }

    pub fn config(&self) -> &FirestoreConfig {
        &self.config
    }

    fn url(&self, path: &str) -> String {
        let root = format!(
            "{}/{}",
            self.config.base_url.trim_end_matches('/'),
            self.config.documents_name()
        );
        if path.is_empty() {
            root
        } else {
            format!("{root}/{path}")
        }
    }

    fn request(&self, method: Method, url: String) -> RequestBuilder {
        let builder = self.client.request(method, url);
        match &self.config.token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    async fn send(&self, builder: RequestBuilder, what: &str) -> Result<Response> {
        builder
            .send()
            .await
            .map_err(|e| CompanionError::Store(format!("{what} failed: {e}")))
    }

    /// Turn a non-success response into an error carrying the body.
    async fn check(response: Response, what: &str) -> Result<Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(CompanionError::Store(format!("{what} returned {status}: {body}")))
    }

    fn local_path(&self, name: &str) -> String {
        let prefix = format!("{}/", self.config.documents_name());
        name.strip_prefix(&prefix).unwrap_or(name).to_string()
    }

    fn revision(&self, raw: RestDocument) -> Result<Revision> {
        let data = decode_fields(raw.fields.as_ref())?;
        Ok(Revision {
            document: Document::new(self.local_path(&raw.name), data),
            update_time: raw.update_time.unwrap_or_default(),
        })
    }

    async fn fetch(&self, path: &str) -> Result<Option<Revision>> {
        let response = self
            .send(self.request(Method::GET, self.url(path)), "get")
            .await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let raw: RestDocument = Self::check(response, "get")
            .await?
            .json()
            .await
            .map_err(|e| CompanionError::Store(format!("get {path}: {e}")))?;
        self.revision(raw).map(Some)
    }

    /// Run a single-field range query ordered ascending by that field.
    async fn run_query(
        &self,
        collection: &str,
        field: &str,
        op: &str,
        bound: i64,
        limit: Option<usize>,
    ) -> Result<Vec<Revision>> {
        let mut query = Map::new();
        query.insert(
            "from".into(),
            json!([{ "collectionId": document_id(collection) }]),
        );
        query.insert(
            "where".into(),
            json!({
                "fieldFilter": {
                    "field": { "fieldPath": field },
                    "op": op,
                    "value": encode_value(&json!(bound)),
                }
            }),
        );
        query.insert(
            "orderBy".into(),
            json!([{ "field": { "fieldPath": field }, "direction": "ASCENDING" }]),
        );
        if let Some(limit) = limit {
            query.insert("limit".into(), json!(limit));
        }

        let url = format!("{}:runQuery", self.url(parent_path(collection)));
        let response = self
            .send(
                self.request(Method::POST, url)
                    .json(&json!({ "structuredQuery": query })),
                "query",
            )
            .await?;
        let rows: Vec<RunQueryRow> = Self::check(response, "query")
            .await?
            .json()
            .await
            .map_err(|e| CompanionError::Store(format!("query {collection}: {e}")))?;

        rows.into_iter()
            .filter_map(|row| row.document)
            .map(|raw| self.revision(raw))
            .collect()
    }
}

#[async_trait]
impl DocumentStore for FirestoreStore {
    fn backend_name(&self) -> &'static str {
        "firestore"
    }

    async fn get(&self, path: &str) -> Result<Option<Document>> {
        Ok(self.fetch(path).await?.map(|rev| rev.document))
    }

    #[instrument(skip(self, data))]
    async fn set(&self, path: &str, data: Value) -> Result<()> {
        let body = json!({ "fields": encode_fields(&data) });
        let response = self
            .send(self.request(Method::PATCH, self.url(path)).json(&body), "set")
            .await?;
        Self::check(response, "set").await?;
        Ok(())
    }

    #[instrument(skip(self, updates))]
    async fn update(&self, path: &str, updates: Vec<FieldUpdate>) -> Result<()> {
        let mut data = Value::Object(Map::new());
        apply_updates(&mut data, &updates);

        let mut params: Vec<(&str, &str)> = updates
            .iter()
            .map(|u| ("updateMask.fieldPaths", u.path.as_str()))
            .collect();
        params.push(("currentDocument.exists", "true"));

        let body = json!({ "fields": encode_fields(&data) });
        let response = self
            .send(
                self.request(Method::PATCH, self.url(path))
                    .query(&params)
                    .json(&body),
                "update",
            )
            .await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Err(CompanionError::NotFound(path.to_string()));
        }
        Self::check(response, "update").await?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn delete(&self, path: &str) -> Result<()> {
        let response = self
            .send(self.request(Method::DELETE, self.url(path)), "delete")
            .await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(());
        }
        Self::check(response, "delete").await?;
        Ok(())
    }

    async fn add(&self, collection: &str, data: Value) -> Result<String> {
        let body = json!({ "fields": encode_fields(&data) });
        let response = self
            .send(
                self.request(Method::POST, self.url(collection)).json(&body),
                "add",
            )
            .await?;
        let raw: RestDocument = Self::check(response, "add")
            .await?
            .json()
            .await
            .map_err(|e| CompanionError::Store(format!("add to {collection}: {e}")))?;
        Ok(self.local_path(&raw.name))
    }

    async fn query_before(
        &self,
        collection: &str,
        field: &str,
        end_before: i64,
        limit: usize,
    ) -> Result<Vec<Document>> {
        let revisions = self
            .run_query(collection, field, "LESS_THAN", end_before, Some(limit))
            .await?;
        Ok(revisions.into_iter().map(|rev| rev.document).collect())
    }

    async fn subscribe_collection(
        &self,
        collection: &str,
        order_field: &str,
        start_after: i64,
    ) -> Result<ChangeStream> {
        // The first poll runs here so that an unreachable store fails the
        // subscription instead of surfacing later.
        let initial = self
            .run_query(collection, order_field, "GREATER_THAN", start_after, None)
            .await?;
        let (tx, stream) = ChangeStream::channel(FEED_CAPACITY);
        let store = self.clone();
        let collection = collection.to_string();
        let order_field = order_field.to_string();
        debug!(%collection, start_after, "firestore collection feed opened");

        tokio::spawn(poll_feed(tx, initial, self.config.poll_interval, move || {
            let store = store.clone();
            let collection = collection.clone();
            let order_field = order_field.clone();
            async move {
                store
                    .run_query(&collection, &order_field, "GREATER_THAN", start_after, None)
                    .await
            }
        }));
        Ok(stream)
    }

    async fn subscribe_document(&self, path: &str) -> Result<ChangeStream> {
        let initial: Vec<Revision> = self.fetch(path).await?.into_iter().collect();
        let (tx, stream) = ChangeStream::channel(FEED_CAPACITY);
        let store = self.clone();
        let path = path.to_string();
        debug!(%path, "firestore document feed opened");

        tokio::spawn(poll_feed(tx, initial, self.config.poll_interval, move || {
            let store = store.clone();
            let path = path.clone();
            async move { Ok(store.fetch(&path).await?.into_iter().collect()) }
        }));
        Ok(stream)
    }
}

/// Diff two polls of the same query.
fn diff(previous: &HashMap<String, Revision>, current: &[Revision]) -> Vec<ChangeEvent> {
    let mut events = Vec::new();
    for rev in current {
        match previous.get(&rev.document.path) {
            None => events.push(ChangeEvent::added(rev.document.clone())),
            Some(old) if old.update_time != rev.update_time => events.push(ChangeEvent {
                kind: ChangeKind::Modified,
                document: rev.document.clone(),
            }),
            Some(_) => {}
        }
    }
    let still_there: Vec<&str> = current.iter().map(|r| r.document.path.as_str()).collect();
    let mut removed: Vec<&Revision> = previous
        .values()
        .filter(|old| !still_there.contains(&old.document.path.as_str()))
        .collect();
    removed.sort_by(|a, b| a.document.path.cmp(&b.document.path));
    events.extend(removed.into_iter().map(|old| ChangeEvent {
        kind: ChangeKind::Removed,
        document: old.document.clone(),
    }));
    events
}

async fn poll_feed<F, Fut>(mut tx: FeedSender, initial: Vec<Revision>, interval: Duration, mut poll: F)
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: std::future::Future<Output = Result<Vec<Revision>>> + Send,
{
    let mut known: HashMap<String, Revision> = HashMap::new();
    let first = diff(&known, &initial);
    known.extend(initial.into_iter().map(|r| (r.document.path.clone(), r)));
    if !first.is_empty() && !tx.send(first).await {
        return;
    }

    loop {
        tokio::select! {
            _ = tx.stopped() => return,
            _ = tokio::time::sleep(interval) => {}
        }
        match poll().await {
            Ok(current) => {
                let events = diff(&known, &current);
                known = current
                    .into_iter()
                    .map(|r| (r.document.path.clone(), r))
                    .collect();
                if !events.is_empty() && !tx.send(events).await {
                    return;
                }
            }
            Err(err) => {
                warn!(error = %err, "firestore poll failed");
                if !tx.send_error(err).await {
                    return;
                }
            }
        }
    }
}
