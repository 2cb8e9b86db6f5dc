// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Mirrors log records into the agent's remote `Logs` collection.
//
// `RemoteLogLayer` sits in the tracing subscriber stack and never blocks:
// records go into a bounded queue and are dropped when it is full.
// `RemoteLogSink` drains the queue into the store.  Events raised while the
// sink itself is writing, and events from the HTTP transport crates, are not
// mirrored, so a failing store cannot feed itself.

use std::fmt;
use std::sync::Arc;

use chrono::Utc;
use serde_json::{Map, Value, json};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::field::{Field, Visit};
use tracing::{Event, Level, Subscriber, warn};
use tracing_subscriber::layer::{Context, Layer};

use companion_store::DocumentStore;

tokio::task_local! {
    static IN_SINK: ();
}

const TRANSPORT_TARGETS: [&str; 5] = ["hyper", "h2", "reqwest", "rustls", "tower"];

pub struct RemoteLogLayer {
    tx: mpsc::Sender<Value>,
    max_level: Level,
}

pub struct RemoteLogSink {
    rx: mpsc::Receiver<Value>,
}

impl RemoteLogLayer {
    /// A layer forwarding `INFO` and above, and the sink that drains it.
    pub fn new(capacity: usize) -> (Self, RemoteLogSink) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (
            Self {
                tx,
                max_level: Level::INFO,
            },
            RemoteLogSink { rx },
        )
    }

    pub fn with_max_level(mut self, level: Level) -> Self {
        self.max_level = level;
        self
    }

    fn should_mirror(&self, event: &Event<'_>) -> bool {
        let meta = event.metadata();
        if *meta.level() > self.max_level {
            return false;
        }
        if IN_SINK.try_with(|_| ()).is_ok() {
            return false;
        }
        let target = meta.target();
        !TRANSPORT_TARGETS
            .iter()
            .any(|prefix| target == *prefix || target.starts_with(&format!("{prefix}::")))
    }
}

impl<S: Subscriber> Layer<S> for RemoteLogLayer {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        if !self.should_mirror(event) {
            return;
        }
        let mut fields = FieldCollector::default();
        event.record(&mut fields);

        let meta = event.metadata();
        let record = json!({
            "level": meta.level().as_str(),
            "target": meta.target(),
            "message": fields.message,
            "fields": Value::Object(fields.values),
            "timestamp": Utc::now().timestamp(),
        });
        // Full queue: drop the record rather than stall the caller.
        let _ = self.tx.try_send(record);
    }
}

#[derive(Default)]
struct FieldCollector {
    message: String,
    values: Map<String, Value>,
}

impl Visit for FieldCollector {
    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            self.message = value.to_string();
        } else {
            self.values.insert(field.name().into(), value.into());
        }
    }

    fn record_i64(&mut self, field: &Field, value: i64) {
        self.values.insert(field.name().into(), value.into());
    }

    fn record_u64(&mut self, field: &Field, value: u64) {
        self.values.insert(field.name().into(), value.into());
    }

    fn record_bool(&mut self, field: &Field, value: bool) {
        self.values.insert(field.name().into(), value.into());
    }

    fn record_f64(&mut self, field: &Field, value: f64) {
        self.values.insert(field.name().into(), value.into());
    }

    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        if field.name() == "message" {
            self.message = format!("{value:?}");
        } else {
            self.values
                .insert(field.name().into(), format!("{value:?}").into());
        }
    }
}

impl RemoteLogSink {
    /// Drain queued records into `collection` until every layer is dropped.
    /// The task yields the number of records written.
    pub fn spawn(self, store: Arc<dyn DocumentStore>, collection: String) -> JoinHandle<usize> {
        tokio::spawn(IN_SINK.scope((), self.drain(store, collection)))
    }

    async fn drain(mut self, store: Arc<dyn DocumentStore>, collection: String) -> usize {
        let mut written = 0;
        while let Some(record) = self.rx.recv().await {
            match store.add(&collection, record).await {
                Ok(_) => written += 1,
                Err(err) => warn!(error = %err, "failed to write remote log record"),
            }
        }
        written
    }
}

#[cfg(test)]
mod tests {
    use companion_store::{MemoryStore, StoreOp};
    use tracing::{debug, error, info};
    use tracing_subscriber::layer::SubscriberExt;

    use super::*;

    const LOGS: &str = "CompanionApps/a1/Logs";

    fn emit(layer: RemoteLogLayer, f: impl FnOnce()) {
        let subscriber = tracing_subscriber::registry().with(layer);
        tracing::subscriber::with_default(subscriber, f);
    }

    async fn drained(sink: RemoteLogSink, store: &MemoryStore) -> Vec<Value> {
        let written = sink
            .spawn(Arc::new(store.clone()), LOGS.to_string())
            .await
            .unwrap();
        let mut records: Vec<Value> = store
            .paths_in(LOGS)
            .iter()
            .filter_map(|path| store.document(path))
            .collect();
        assert_eq!(records.len(), written);
        records.sort_by_key(|r| r["message"].as_str().unwrap_or_default().to_string());
        records
    }

    #[tokio::test]
    async fn records_carry_level_message_fields_and_timestamp() {
        let (layer, sink) = RemoteLogLayer::new(16);
        let before = Utc::now().timestamp();
        emit(layer, || {
            info!(job = "p1", copies = 3u64, "print job completed");
            debug!("below the mirrored level");
        });

        let store = MemoryStore::new();
        let records = drained(sink, &store).await;
        assert_eq!(records.len(), 1);
        let record = &records[0];
        assert_eq!(record["level"], "INFO");
        assert_eq!(record["message"], "print job completed");
        assert_eq!(record["fields"]["job"], "p1");
        assert_eq!(record["fields"]["copies"], 3);
        assert!(record["timestamp"].as_i64().unwrap() >= before);
    }

    #[tokio::test]
    async fn transport_targets_are_not_mirrored() {
        let (layer, sink) = RemoteLogLayer::new(16);
        emit(layer, || {
            error!(target: "hyper::proto", "connection reset");
            error!(target: "reqwest", "request failed");
            error!(target: "companion_agent::agent", "kept");
        });

        let store = MemoryStore::new();
        let records = drained(sink, &store).await;
        assert_eq!(records.len(), 1);
        assert_eq!(records[0]["message"], "kept");
    }

    #[tokio::test]
    async fn full_queue_drops_records() {
        let (layer, sink) = RemoteLogLayer::new(2);
        emit(layer, || {
            for n in 0..5 {
                info!(n, "record");
            }
        });

        let store = MemoryStore::new();
        assert_eq!(drained(sink, &store).await.len(), 2);
    }

    #[tokio::test]
    async fn sink_failures_are_counted_out() {
        let (layer, sink) = RemoteLogLayer::new(4);
        let store = MemoryStore::new();
        store.fail_mutations_on(LOGS);
        emit(layer, || info!("lost"));

        let written = sink
            .spawn(Arc::new(store.clone()), LOGS.to_string())
            .await
            .unwrap();
        assert_eq!(written, 0);
        assert!(!store
            .operations()
            .iter()
            .any(|op| matches!(op, StoreOp::Add { .. })));
    }

    #[tokio::test]
    async fn events_inside_the_sink_are_skipped() {
        let (layer, sink) = RemoteLogLayer::new(4);
        let subscriber = tracing_subscriber::registry().with(layer);
        let _guard = tracing::subscriber::set_default(subscriber);

        IN_SINK.scope((), async { info!("from the sink") }).await;
        info!("from the agent");
        drop(_guard);

        let store = MemoryStore::new();
        let records = drained(sink, &store).await;
        assert_eq!(records.len(), 1);
        assert_eq!(records[0]["message"], "from the agent");
    }
}
