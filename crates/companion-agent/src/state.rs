// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Shared device state and its remote mirror.
//
// All tasks see the same `DeviceState` through a `DeviceStateHandle`.  The
// lock is only ever held for a read-modify-write closure; persisting takes a
// clone under the lock and writes it after the lock is released.

use std::sync::{Arc, Mutex, MutexGuard};

use tracing::{debug, error, instrument};

use companion_core::error::Result;
use companion_core::types::DeviceState;
use companion_devices::HostInspector;
use companion_store::DocumentStore;

/// Cloneable handle to the one `DeviceState` of this agent.
#[derive(Debug, Clone)]
pub struct DeviceStateHandle {
    inner: Arc<Mutex<DeviceState>>,
}

impl DeviceStateHandle {
    pub fn new(state: DeviceState) -> Self {
        Self {
            inner: Arc::new(Mutex::new(state)),
        }
    }

    fn lock(&self) -> MutexGuard<'_, DeviceState> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Read under the lock.
    pub fn read<R>(&self, f: impl FnOnce(&DeviceState) -> R) -> R {
        f(&self.lock())
    }

    /// Mutate under the lock.  `f` must not block.
    pub fn update<R>(&self, f: impl FnOnce(&mut DeviceState) -> R) -> R {
        f(&mut self.lock())
    }

    pub fn snapshot(&self) -> DeviceState {
        self.lock().clone()
    }

    pub fn is_started(&self) -> bool {
        self.read(|state| state.is_started)
    }
}

/// Writes the whole device state to the agent's remote document.
pub struct StateSync {
    state: DeviceStateHandle,
    store: Arc<dyn DocumentStore>,
    host: Arc<dyn HostInspector>,
    path: String,
    /// Orders concurrent pushes so the last write carries the newest state.
    push_lock: tokio::sync::Mutex<()>,
}

impl StateSync {
    pub fn new(
        state: DeviceStateHandle,
        store: Arc<dyn DocumentStore>,
        host: Arc<dyn HostInspector>,
        path: impl Into<String>,
    ) -> Self {
        Self {
            state,
            store,
            host,
            path: path.into(),
            push_lock: tokio::sync::Mutex::new(()),
        }
    }

    pub fn state(&self) -> &DeviceStateHandle {
        &self.state
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// Refresh host metadata and persist a full snapshot.
    #[instrument(skip(self), fields(path = %self.path))]
    pub async fn push(&self) -> Result<()> {
        let host = self.host.inspect().await;
        let _ordered = self.push_lock.lock().await;

        let snapshot = self.state.update(|state| {
            state.operating_system = host.operating_system;
            state.hostname = host.hostname;
            state.java_version = host.java_version;
            state.clone()
        });

        let data = serde_json::to_value(&snapshot)?;
        match self.store.set(&self.path, data).await {
            Ok(()) => {
                debug!("device state pushed");
                Ok(())
            }
            Err(err) => {
                error!(error = %err, "failed to push device state");
                Err(err)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use companion_store::MemoryStore;

    use super::*;
    use crate::testing::FixedHost;

    #[tokio::test]
    async fn push_writes_snapshot_with_host_metadata() {
        let store = MemoryStore::new();
        let state = DeviceStateHandle::new(DeviceState::new("a1"));
        state.update(|s| s.bay.name = "Bay 1".into());
        let sync = StateSync::new(
            state.clone(),
            Arc::new(store.clone()),
            Arc::new(FixedHost::default()),
            "CompanionApps/a1",
        );

        sync.push().await.unwrap();

        let doc = store.document("CompanionApps/a1").unwrap();
        assert_eq!(doc["bay"]["name"], "Bay 1");
        assert_eq!(doc["hostname"], "test-host");
        assert_eq!(doc["java_version"], "openjdk 21");
        assert!(doc.get("reference").is_none());
        assert_eq!(state.read(|s| s.hostname.clone()), "test-host");
    }

    #[tokio::test]
    async fn push_failure_is_reported() {
        let store = MemoryStore::new();
        store.fail_mutations_on("CompanionApps/a1");
        let sync = StateSync::new(
            DeviceStateHandle::new(DeviceState::new("a1")),
            Arc::new(store),
            Arc::new(FixedHost::default()),
            "CompanionApps/a1",
        );
        assert!(sync.push().await.is_err());
    }
}
