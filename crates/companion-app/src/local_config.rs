// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// The agent's local identity file, `config.json` in the config directory.

use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use companion_core::error::{CompanionError, Result};

const CONFIG_FILE: &str = "config.json";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LocalIdentity {
    app_id: String,
}

/// Read the agent id, generating and persisting a new one on first run.
///
/// An existing file that cannot be read as an identity is an error: the id
/// names the agent's remote documents, so it is never replaced silently.
pub fn load_or_create_app_id(config_dir: &Path) -> Result<String> {
    let path = config_dir.join(CONFIG_FILE);
    if path.exists() {
        let data = std::fs::read_to_string(&path)?;
        let identity: LocalIdentity = serde_json::from_str(&data).map_err(|e| {
            CompanionError::Config(format!("{} is not a valid identity file: {e}", path.display()))
        })?;
        if identity.app_id.trim().is_empty() {
            return Err(CompanionError::Config(format!(
                "{} has an empty appId",
                path.display()
            )));
        }
        return Ok(identity.app_id);
    }

    std::fs::create_dir_all(config_dir)?;
    let identity = LocalIdentity {
        app_id: Uuid::new_v4().to_string(),
    };
    std::fs::write(&path, serde_json::to_string_pretty(&identity)?)?;
    info!(path = %path.display(), app_id = %identity.app_id, "created local identity");
    Ok(identity.app_id)
}
