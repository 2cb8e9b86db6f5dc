// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Agent lifecycle.
//
// `Agent::initialise` loads (or creates) the remote device document, failing
// when it exists but cannot be read.  It then scans the printers once,
// sweeps stale logs and print jobs, and starts the two timers.  `start`
// opens the three change feeds and the local server; `stop` closes them
// again.  Timers keep running across start/stop but only act while the
// agent is started.

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior, interval_at};
use tracing::{error, info, warn};

use companion_core::config::AgentConfig;
use companion_core::error::{CompanionError, Result};
use companion_core::types::DeviceState;
use companion_devices::{HostInspector, PrintBackend, PrinterEnumerator, ScaleBackend};
use companion_store::{DeadlineStore, DocumentStore, FeedStopper};

use crate::backoff::Backoff;
use crate::dispatch::{PrintDispatcher, ScaleDispatcher};
use crate::listener::{ChangeFeedListener, ListenerReport};
use crate::merge::{ConfigUpdates, merge_remote};
use crate::print_job::PrintJobExecutor;
use crate::probe::AvailabilityProbe;
use crate::scale_job::ScaleJobExecutor;
use crate::server::{self, ServerState};
use crate::state::{DeviceStateHandle, StateSync};
use crate::sweeper::RetentionSweeper;

/// Everything the agent talks to outside its own process.
#[derive(Clone)]
pub struct AgentDeps {
    pub store: Arc<dyn DocumentStore>,
    pub print_backend: Arc<dyn PrintBackend>,
    pub scale_backend: Arc<dyn ScaleBackend>,
    pub enumerator: Arc<dyn PrinterEnumerator>,
    pub host: Arc<dyn HostInspector>,
}

/// Handles owned while the agent is started.
struct Running {
    stoppers: Vec<FeedStopper>,
    listeners: Vec<JoinHandle<ListenerReport>>,
    shutdown: oneshot::Sender<()>,
    server: JoinHandle<Result<()>>,
    local_addr: SocketAddr,
}

pub struct Agent {
    id: String,
    config: AgentConfig,
    store: Arc<dyn DocumentStore>,
    sync: Arc<StateSync>,
    print_dispatcher: Arc<PrintDispatcher>,
    scale_dispatcher: Arc<ScaleDispatcher>,
    config_updates: Arc<ConfigUpdates>,
    running: tokio::sync::Mutex<Option<Running>>,
    timers: Mutex<Vec<JoinHandle<()>>>,
}

impl Agent {
    /// Bring the agent up to the stopped-but-ready state.
    pub async fn initialise(config: AgentConfig, agent_id: &str, deps: AgentDeps) -> Result<Arc<Self>> {
        config.validate()?;
        if agent_id.trim().is_empty() {
            return Err(CompanionError::Config("agent id is empty".into()));
        }
        info!(agent = agent_id, store = deps.store.backend_name(), "initialising agent");

        let store: Arc<dyn DocumentStore> =
            Arc::new(DeadlineStore::new(deps.store.clone(), config.store_timeout()));
        let device_path = config.device_path(agent_id);

        let state = DeviceStateHandle::new(DeviceState::new(agent_id));
        let sync = Arc::new(StateSync::new(
            state.clone(),
            store.clone(),
            deps.host.clone(),
            device_path.clone(),
        ));

        match store.get(&device_path).await? {
            Some(doc) => {
                // Never overwritten here: it carries the operator's configuration.
                let remote: DeviceState = doc.decode().inspect_err(|err| {
                    error!(error = %err, "remote device state is unreadable");
                })?;
                state.update(|local| merge_remote(local, &remote));
                info!("loaded the remote device state");
            }
            None => {
                info!("no remote device state yet, creating it");
                sync.push().await?;
            }
        }

        let probe = Arc::new(AvailabilityProbe::new(sync.clone(), deps.enumerator.clone()));
        if let Err(err) = probe.poll().await {
            warn!(error = %err, "initial printer scan failed");
        }

        let sweeper = Arc::new(RetentionSweeper::new(store.clone(), config.sweep_batch_limit));
        let now = Utc::now().timestamp();
        let logs_path = config.logs_path(agent_id);
        let startup_cutoff = now - config.startup_log_cutoff().as_secs() as i64;
        if let Err(err) = sweeper.sweep(&logs_path, "timestamp", startup_cutoff).await {
            warn!(error = %err, "startup log sweep failed");
        }
        if let Err(err) = sweeper
            .sweep(&config.print_jobs_path(agent_id), "created", now)
            .await
        {
            warn!(error = %err, "startup print job sweep failed");
        }

        let print_executor = PrintJobExecutor::new(
            store.clone(),
            deps.print_backend.clone(),
            config.fetch_timeout(),
            config.backend_timeout(),
        )?;
        let scale_executor =
            ScaleJobExecutor::new(store.clone(), deps.scale_backend.clone(), config.backend_timeout());

        let agent = Arc::new(Self {
            id: agent_id.to_string(),
            print_dispatcher: Arc::new(PrintDispatcher::new(
                sync.clone(),
                Arc::new(print_executor),
                config.print_concurrency,
            )),
            scale_dispatcher: Arc::new(ScaleDispatcher::new(
                Arc::new(scale_executor),
                config.scale_concurrency,
            )),
            config_updates: Arc::new(ConfigUpdates::new(state)),
            store,
            sync,
            running: tokio::sync::Mutex::new(None),
            timers: Mutex::new(Vec::new()),
            config,
        });

        let timers = vec![
            agent.spawn_probe_timer(probe),
            agent.spawn_log_sweep_timer(sweeper, logs_path),
        ];
        if let Ok(mut slot) = agent.timers.lock() {
            *slot = timers;
        }

        info!(agent = agent_id, "agent initialised");
        Ok(agent)
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn state(&self) -> &DeviceStateHandle {
        self.sync.state()
    }

    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    pub async fn is_running(&self) -> bool {
        self.running.lock().await.is_some()
    }

    /// Address of the local server while started.
    pub async fn local_addr(&self) -> Option<SocketAddr> {
        self.running.lock().await.as_ref().map(|r| r.local_addr)
    }

    /// Open the change feeds and the local server.  Starting twice is a no-op.
    pub async fn start(&self) -> Result<()> {
        let mut running = self.running.lock().await;
        if running.is_some() {
            warn!("agent is already started");
            return Ok(());
        }

        let listener = TcpListener::bind(("0.0.0.0", self.config.server_port))
            .await
            .map_err(|e| CompanionError::Server(format!("cannot bind port {}: {e}", self.config.server_port)))?;
        let local_addr = listener.local_addr()?;

        let since = Utc::now().timestamp();
        let print_jobs = self
            .store
            .subscribe_collection(&self.config.print_jobs_path(&self.id), "created", since)
            .await?;
        let scale_jobs = self
            .store
            .subscribe_collection(&self.config.scale_jobs_path(&self.id), "created", since)
            .await?;
        let device = self.store.subscribe_document(self.sync.path()).await?;

        self.sync.state().update(|s| s.is_started = true);
        if let Err(err) = self.sync.push().await {
            warn!(error = %err, "could not record the started state");
        }

        let listeners = [
            ChangeFeedListener::new("print_jobs", print_jobs, self.print_dispatcher.clone(), self.backoff()),
            ChangeFeedListener::new("scale_jobs", scale_jobs, self.scale_dispatcher.clone(), self.backoff()),
            ChangeFeedListener::new("device_config", device, self.config_updates.clone(), self.backoff()),
        ];
        let stoppers = listeners.iter().map(ChangeFeedListener::stopper).collect();
        let listeners = listeners
            .into_iter()
            .map(|listener| tokio::spawn(listener.run()))
            .collect();

        let (shutdown, shutdown_rx) = oneshot::channel();
        let router = server::router(ServerState::new(&self.id, self.sync.clone()));
        let server = tokio::spawn(server::serve(listener, router, async {
            let _ = shutdown_rx.await;
        }));

        *running = Some(Running {
            stoppers,
            listeners,
            shutdown,
            server,
            local_addr,
        });
        info!(agent = %self.id, %local_addr, "agent started");
        Ok(())
    }

    /// Close the feeds and the local server.  Jobs already running finish
    /// on their own.
    pub async fn stop(&self) -> Result<()> {
        let Some(running) = self.running.lock().await.take() else {
            return Ok(());
        };

        self.sync.state().update(|s| s.is_started = false);
        for stopper in &running.stoppers {
            stopper.stop();
        }
        let _ = running.shutdown.send(());

        for listener in running.listeners {
            if let Err(err) = listener.await {
                error!(error = %err, "listener task failed");
            }
        }
        match running.server.await {
            Ok(Ok(())) => {}
            Ok(Err(err)) => error!(error = %err, "local server failed"),
            Err(err) => error!(error = %err, "local server task failed"),
        }

        if let Err(err) = self.sync.push().await {
            warn!(error = %err, "could not record the stopped state");
        }
        info!(agent = %self.id, "agent stopped");
        Ok(())
    }

    fn backoff(&self) -> Backoff {
        Backoff::new(self.config.feed_backoff_base(), self.config.feed_backoff_max())
    }

    fn spawn_probe_timer(&self, probe: Arc<AvailabilityProbe>) -> JoinHandle<()> {
        let state = self.sync.state().clone();
        let period = self.config.probe_interval();
        spawn_timer(period, move || {
            let state = state.clone();
            let probe = probe.clone();
            async move {
                if !state.is_started() {
                    return;
                }
                if let Err(err) = probe.poll().await {
                    warn!(error = %err, "printer scan failed");
                }
            }
        })
    }

    fn spawn_log_sweep_timer(&self, sweeper: Arc<RetentionSweeper>, logs_path: String) -> JoinHandle<()> {
        let state = self.sync.state().clone();
        let period = self.config.log_sweep_interval();
        spawn_timer(period, move || {
            let state = state.clone();
            let sweeper = sweeper.clone();
            let logs_path = logs_path.clone();
            async move {
                if !state.is_started() {
                    return;
                }
                let cutoff = Utc::now().timestamp() - period.as_secs() as i64;
                if let Err(err) = sweeper.sweep(&logs_path, "timestamp", cutoff).await {
                    warn!(error = %err, "log sweep failed");
                }
            }
        })
    }
}

/// Run `tick` every `period`, first after one full period.  Ticks missed
/// while a previous one was running are skipped.
fn spawn_timer<F, Fut>(period: Duration, mut tick: F) -> JoinHandle<()>
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: std::future::Future<Output = ()> + Send + 'static,
{
    tokio::spawn(async move {
        let mut ticks = interval_at(Instant::now() + period, period);
        ticks.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            ticks.tick().await;
            tick().await;
        }
    })
}

impl Drop for Agent {
    fn drop(&mut self) {
        if let Ok(timers) = self.timers.get_mut() {
            for timer in timers.drain(..) {
                timer.abort();
            }
        }
        if let Some(running) = self.running.get_mut().take() {
            for stopper in &running.stoppers {
                stopper.stop();
            }
            let _ = running.shutdown.send(());
        }
    }
}

#[cfg(test)]
mod tests {
    use std::future::Future;

    use companion_core::types::DocumentClass;
    use companion_store::{FieldUpdate, MemoryStore, StoreOp};
    use serde_json::{Value, json};
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;
    use crate::testing::{FakePrinter, FakeScale, FixedHost, ScriptedPrinters, printer};

    const DEVICE: &str = "CompanionApps/a1";
    const PRINT_JOBS: &str = "CompanionApps/a1/PrintJobs";
    const SCALE_JOBS: &str = "CompanionApps/a1/ScaleJobs";
    const LOGS: &str = "CompanionApps/a1/Logs";

    struct Harness {
        store: MemoryStore,
        printer: Arc<FakePrinter>,
        scale: Arc<FakeScale>,
        _config_dir: tempfile::TempDir,
    }

    impl Harness {
        fn new() -> Self {
            Self {
                store: MemoryStore::new(),
                printer: Arc::new(FakePrinter::default()),
                scale: Arc::new(FakeScale::reading(450)),
                _config_dir: tempfile::tempdir().unwrap(),
            }
        }

        fn config(&self) -> AgentConfig {
            AgentConfig {
                config_dir: self._config_dir.path().to_path_buf(),
                server_port: 0,
                ..AgentConfig::default()
            }
        }

        async fn agent(&self) -> Arc<Agent> {
            self.try_agent().await.unwrap()
        }

        async fn try_agent(&self) -> Result<Arc<Agent>> {
            let deps = AgentDeps {
                store: Arc::new(self.store.clone()),
                print_backend: self.printer.clone(),
                scale_backend: self.scale.clone(),
                enumerator: Arc::new(ScriptedPrinters::always(vec![printer("Zebra", &["T1", "T2"])])),
                host: Arc::new(FixedHost::default()),
            };
            Agent::initialise(self.config(), "a1", deps).await
        }

        async fn configure_label_small(&self) {
            let mut remote = DeviceState::new("a1");
            let target = remote.printers.get_mut(DocumentClass::LabelSmall);
            target.name = "Zebra".into();
            target.reference = "Zebra".into();
            target.tray = "T2".into();
            remote.bay.name = "Bay 3".into();
            self.store
                .set(DEVICE, serde_json::to_value(&remote).unwrap())
                .await
                .unwrap();
        }

        fn device(&self) -> Value {
            self.store.document(DEVICE).unwrap()
        }
    }

    async fn eventually<F, Fut>(mut check: F)
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = bool>,
    {
        for _ in 0..500 {
            if check().await {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("condition not reached in time");
    }

    #[tokio::test]
    async fn initialise_creates_missing_device_document() {
        let harness = Harness::new();
        let agent = harness.agent().await;

        assert_eq!(agent.id(), "a1");
        assert!(!agent.state().is_started());
        let doc = harness.device();
        assert_eq!(doc["hostname"], "test-host");
        assert_eq!(doc["is_started"], false);
        assert_eq!(doc["available_printers"][0]["name"], "Zebra");
    }

    #[tokio::test]
    async fn initialise_adopts_existing_configuration() {
        let harness = Harness::new();
        harness.configure_label_small().await;
        let agent = harness.agent().await;

        let state = agent.state().snapshot();
        assert_eq!(state.bay.name, "Bay 3");
        assert_eq!(state.printers.label_small.tray, "T2");
        assert_eq!(state.reference, "a1");
    }

    #[tokio::test]
    async fn unreadable_device_document_fails_without_writing() {
        let harness = Harness::new();
        let seeded = json!({
            "bay": {"name": "Bay 3"},
            "printers": {"label_small": {"name": "Zebra", "reference": "Zebra", "tray": "T2"}},
            "scale": {"name": "Dymo", "vendor_id": "2338"},
        });
        harness.store.set(DEVICE, seeded.clone()).await.unwrap();
        harness.store.clear_operations();

        let err = match harness.try_agent().await {
            Ok(_) => panic!("initialise accepted an unreadable device document"),
            Err(err) => err,
        };
        assert!(matches!(err, CompanionError::Validation(_)));
        assert_eq!(harness.device(), seeded);
        assert!(harness.store.operations_on(DEVICE).is_empty());
    }

    #[tokio::test]
    async fn initialise_sweeps_stale_logs_and_print_jobs() {
        let harness = Harness::new();
        let now = Utc::now().timestamp();
        let store = &harness.store;
        store.set(&format!("{LOGS}/old"), json!({"timestamp": now - 600})).await.unwrap();
        store.set(&format!("{LOGS}/fresh"), json!({"timestamp": now + 60})).await.unwrap();
        store
            .set(&format!("{PRINT_JOBS}/stale"), json!({"created": now - 10, "printer_type": "document"}))
            .await
            .unwrap();

        let _agent = harness.agent().await;

        assert!(store.document(&format!("{LOGS}/old")).is_none());
        assert!(store.document(&format!("{LOGS}/fresh")).is_some());
        assert!(store.document(&format!("{PRINT_JOBS}/stale")).is_none());
        assert!(harness.printer.calls().is_empty());
    }

    #[tokio::test]
    async fn print_job_is_printed_and_deleted() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/label.pdf"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"%PDF-1.4 label".to_vec()))
            .expect(1)
            .mount(&server)
            .await;

        let harness = Harness::new();
        harness.configure_label_small().await;
        let agent = harness.agent().await;
        agent.start().await.unwrap();
        assert_eq!(harness.device()["is_started"], true);

        let job = format!("{PRINT_JOBS}/p1");
        harness
            .store
            .set(
                &job,
                json!({
                    "printer_type": "label_small",
                    "quantity": 3,
                    "created": Utc::now().timestamp() + 5,
                    "url": format!("{}/label.pdf", server.uri()),
                }),
            )
            .await
            .unwrap();

        let store = harness.store.clone();
        eventually(|| {
            let store = store.clone();
            let job = job.clone();
            async move { store.document(&job).is_none() }
        })
        .await;

        let calls = harness.printer.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].printer, "Zebra");
        assert_eq!(calls[0].tray, "T2");
        assert_eq!(calls[0].copies, 3);
        assert_eq!(calls[0].contents, b"%PDF-1.4 label");
        assert_eq!(harness.device()["last_print_job"]["quantity"], 3);
        assert_eq!(store.operations_on(&job).iter().filter(|op| matches!(op, StoreOp::Delete { .. })).count(), 1);

        agent.stop().await.unwrap();
    }

    #[tokio::test]
    async fn scale_job_is_answered_in_place() {
        let harness = Harness::new();
        let agent = harness.agent().await;
        agent.start().await.unwrap();

        let job = format!("{SCALE_JOBS}/s1");
        harness
            .store
            .set(&job, json!({"created": Utc::now().timestamp() + 5}))
            .await
            .unwrap();

        let store = harness.store.clone();
        eventually(|| {
            let store = store.clone();
            let job = job.clone();
            async move { store.document(&job).is_some_and(|doc| doc["status"] == "complete") }
        })
        .await;

        let doc = harness.store.document(&job).unwrap();
        assert_eq!(doc["weight"], 450);
        assert_eq!(harness.scale.reads(), 1);
        assert!(!harness
            .store
            .operations_on(&job)
            .iter()
            .any(|op| matches!(op, StoreOp::Delete { .. })));

        agent.stop().await.unwrap();
    }

    #[tokio::test]
    async fn remote_configuration_changes_reach_local_state() {
        let harness = Harness::new();
        let agent = harness.agent().await;
        agent.start().await.unwrap();

        harness
            .store
            .update(DEVICE, vec![FieldUpdate::new("bay.name", "Bay 9")])
            .await
            .unwrap();

        let state = agent.state().clone();
        eventually(|| {
            let state = state.clone();
            async move { state.read(|s| s.bay.name == "Bay 9") }
        })
        .await;

        agent.stop().await.unwrap();
    }

    #[tokio::test]
    async fn info_endpoint_is_served_while_started() {
        let harness = Harness::new();
        let agent = harness.agent().await;
        assert!(agent.local_addr().await.is_none());

        agent.start().await.unwrap();
        let addr = agent.local_addr().await.unwrap();
        let body: Value = reqwest::get(format!("http://127.0.0.1:{}/info", addr.port()))
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(body, json!({"CompanionAppId": "a1"}));

        agent.stop().await.unwrap();
        assert!(agent.local_addr().await.is_none());
    }

    #[tokio::test]
    async fn stopped_agent_ignores_new_jobs() {
        let harness = Harness::new();
        harness.configure_label_small().await;
        let agent = harness.agent().await;
        agent.start().await.unwrap();
        agent.start().await.unwrap();
        assert!(agent.is_running().await);

        agent.stop().await.unwrap();
        agent.stop().await.unwrap();
        assert!(!agent.state().is_started());
        assert_eq!(harness.device()["is_started"], false);

        let job = format!("{SCALE_JOBS}/late");
        harness
            .store
            .set(&job, json!({"created": Utc::now().timestamp() + 5}))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(harness.scale.reads(), 0);
        assert!(harness.store.document(&job).unwrap().get("status").is_none());
    }
}
