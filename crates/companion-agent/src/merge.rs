// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Reconciling local device state with the remote document.
//
// Precedence per field group:
//   user identity: adopted from remote only while no local user is set
//   bay, paused:   remote wins
//   scale:         remote wins, field by field
//   printers:      remote wins, field by field, per document class
//
// Everything else (host metadata, available printers, last job, running
// flag) is owned locally and never taken from the remote copy.

use async_trait::async_trait;
use tracing::{debug, info, warn};

use companion_core::types::{DeviceState, DocumentClass, PrinterTarget};
use companion_store::{ChangeEvent, ChangeKind};

use crate::listener::BatchHandler;
use crate::state::DeviceStateHandle;

/// Overwrite `slot` with `value` if they differ.
fn adopt<T: PartialEq + Clone>(slot: &mut T, value: &T) -> bool {
    if slot != value {
        *slot = value.clone();
        true
    } else {
        false
    }
}

fn merge_target(local: &mut PrinterTarget, remote: &PrinterTarget) -> bool {
    let mut changed = adopt(&mut local.reference, &remote.reference);
    changed |= adopt(&mut local.tray, &remote.tray);
    changed |= adopt(&mut local.forwarding, &remote.forwarding);
    changed |= adopt(&mut local.name, &remote.name);
    changed
}

/// Apply a remote snapshot to the local state.  Returns whether anything
/// changed; applying the same snapshot again always returns `false`.
pub fn merge_remote(local: &mut DeviceState, remote: &DeviceState) -> bool {
    let mut changed = false;

    if local.user.id.is_empty() {
        changed |= adopt(&mut local.user, &remote.user);
    }

    changed |= adopt(&mut local.bay.name, &remote.bay.name);
    changed |= adopt(&mut local.paused, &remote.paused);

    changed |= adopt(&mut local.scale.forwarding, &remote.scale.forwarding);
    changed |= adopt(&mut local.scale.name, &remote.scale.name);
    changed |= adopt(&mut local.scale.vendor_id, &remote.scale.vendor_id);
    changed |= adopt(&mut local.scale.product_id, &remote.scale.product_id);

    for class in DocumentClass::ALL {
        changed |= merge_target(local.printers.get_mut(class), remote.printers.get(class));
    }

    changed
}

/// Handles batches from the device document feed.
pub struct ConfigUpdates {
    state: DeviceStateHandle,
}

impl ConfigUpdates {
    pub fn new(state: DeviceStateHandle) -> Self {
        Self { state }
    }

    /// Merge one delivered snapshot.
    pub fn apply(&self, event: &ChangeEvent) -> bool {
        if event.kind == ChangeKind::Removed {
            debug!(path = event.path(), "device document removed remotely, keeping local state");
            return false;
        }
        let remote: DeviceState = match event.document.decode() {
            Ok(remote) => remote,
            Err(err) => {
                warn!(error = %err, "failed to decode remote device state");
                return false;
            }
        };
        let changed = self.state.update(|local| merge_remote(local, &remote));
        if changed {
            info!("updated the device state with remote configuration");
        }
        changed
    }
}

#[async_trait]
impl BatchHandler for ConfigUpdates {
    async fn handle(&self, batch: Vec<ChangeEvent>) {
        for event in &batch {
            self.apply(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use companion_core::types::{DetectedPrinter, UserSummary};
    use companion_store::Document;
    use serde_json::json;

    use super::*;

    fn remote() -> DeviceState {
        let mut remote = DeviceState::new("");
        remote.bay.name = "Bay 7".into();
        remote.paused = true;
        remote.scale.name = "Dymo".into();
        remote.scale.vendor_id = 2338;
        remote.scale.product_id = 32771;
        remote.printers.label_small.reference = "Zebra".into();
        remote.printers.label_small.tray = "T2".into();
        remote.user = UserSummary {
            id: "remote-user".into(),
            name: "Remote".into(),
            company_id: "c9".into(),
            company_name: "Acme".into(),
            last_login: 1_700_000_000_000,
        };
        remote.hostname = "someone-else".into();
        remote.available_printers = vec![DetectedPrinter {
            name: "Ghost".into(),
            trays: Vec::new(),
        }];
        remote
    }

    #[test]
    fn merge_is_idempotent() {
        let mut local = DeviceState::new("a1");
        assert!(merge_remote(&mut local, &remote()));
        let once = local.clone();
        assert!(!merge_remote(&mut local, &remote()));
        assert_eq!(local, once);
    }

    #[test]
    fn empty_local_identity_adopts_remote_exactly() {
        let mut local = DeviceState::new("a1");
        merge_remote(&mut local, &remote());
        assert_eq!(local.user, remote().user);
    }

    #[test]
    fn existing_local_identity_is_kept() {
        let mut local = DeviceState::new("a1");
        local.user.id = "local-user".into();
        local.user.name = "Local".into();
        let before = local.user.clone();

        merge_remote(&mut local, &remote());
        assert_eq!(local.user, before);
    }

    #[test]
    fn operator_settings_come_from_remote() {
        let mut local = DeviceState::new("a1");
        local.bay.name = "Old bay".into();
        local.printers.label_small.name = "Labels".into();
        merge_remote(&mut local, &remote());

        assert_eq!(local.bay.name, "Bay 7");
        assert!(local.paused);
        assert_eq!(local.scale.vendor_id, 2338);
        assert_eq!(local.printers.label_small.reference, "Zebra");
        assert_eq!(local.printers.label_small.tray, "T2");
        // Field by field: an empty remote value overwrites too.
        assert_eq!(local.printers.label_small.name, "");
    }

    #[test]
    fn locally_owned_fields_are_untouched() {
        let mut local = DeviceState::new("a1");
        local.hostname = "here".into();
        merge_remote(&mut local, &remote());
        assert_eq!(local.hostname, "here");
        assert!(local.available_printers.is_empty());
        assert_eq!(local.reference, "a1");
    }

    #[test]
    fn config_updates_merge_each_snapshot() {
        let state = DeviceStateHandle::new(DeviceState::new("a1"));
        let updates = ConfigUpdates::new(state.clone());

        let event = ChangeEvent::added(Document::new(
            "CompanionApps/a1",
            json!({"paused": true, "bay": {"name": "B"}}),
        ));
        assert!(updates.apply(&event));
        assert!(!updates.apply(&event));
        assert!(state.read(|s| s.paused));

        let garbage = ChangeEvent::added(Document::new("CompanionApps/a1", json!({"paused": "yes"})));
        assert!(!updates.apply(&garbage));
        assert!(state.read(|s| s.paused));
    }

    #[test]
    fn removed_device_document_keeps_local_state() {
        let state = DeviceStateHandle::new(DeviceState::new("a1"));
        let updates = ConfigUpdates::new(state.clone());
        updates.apply(&ChangeEvent::added(Document::new(
            "CompanionApps/a1",
            json!({"paused": true, "bay": {"name": "B"}}),
        )));
        let before = state.snapshot();

        let removed = ChangeEvent {
            kind: ChangeKind::Removed,
            document: Document::new(
                "CompanionApps/a1",
                json!({"paused": false, "bay": {"name": "Other"}}),
            ),
        };
        assert!(!updates.apply(&removed));
        assert_eq!(state.snapshot(), before);
        assert!(state.read(|s| s.paused));
        assert_eq!(state.read(|s| s.bay.name.clone()), "B");
    }
}
