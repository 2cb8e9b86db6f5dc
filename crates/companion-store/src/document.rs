// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Documents, field updates and change notifications.
//
// Documents are addressed by slash-separated paths alternating collection and
// document ids (`CompanionApps/<id>/PrintJobs/<job>`).  Their payload is kept
// as a `serde_json::Value` object; typed decoding happens at the edges.

use serde::de::DeserializeOwned;
use serde_json::{Map, Value};

use companion_core::error::{CompanionError, Result};

/// A snapshot of one stored document.
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    /// Full path of the document.
    pub path: String,
    /// Last path segment.
    pub id: String,
    /// Document fields.
    pub data: Value,
}

impl Document {
    pub fn new(path: impl Into<String>, data: Value) -> Self {
        let path = path.into();
        let id = document_id(&path).to_string();
        Self { path, id, data }
    }

    /// Decode the payload into a typed value.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_value(self.data.clone()).map_err(|e| {
            CompanionError::Validation(format!("document {}: {e}", self.path))
        })
    }

    /// Integer value of a top-level field, if present.
    pub fn field_i64(&self, field: &str) -> Option<i64> {
        self.data.get(field).and_then(Value::as_i64)
    }
}

/// What happened to a document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    Added,
    Modified,
    Removed,
}

/// One entry of a change-feed batch.
#[derive(Debug, Clone, PartialEq)]
pub struct ChangeEvent {
    pub kind: ChangeKind,
    /// Snapshot after the change (before it, for removals).
    pub document: Document,
}

impl ChangeEvent {
    pub fn added(document: Document) -> Self {
        Self {
            kind: ChangeKind::Added,
            document,
        }
    }

    /// Identity of the document the event concerns.
    pub fn path(&self) -> &str {
        &self.document.path
    }
}

/// A partial update of a single field.
///
/// `path` may be dotted (`user.name`) to reach into nested maps.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldUpdate {
    pub path: String,
    pub value: Value,
}

impl FieldUpdate {
    pub fn new(path: impl Into<String>, value: impl Into<Value>) -> Self {
        Self {
            path: path.into(),
            value: value.into(),
        }
    }
}

/// Apply updates to a document payload in place, creating nested maps on
/// the way as needed.
pub fn apply_updates(data: &mut Value, updates: &[FieldUpdate]) {
    if !data.is_object() {
        *data = Value::Object(Map::new());
    }
    for update in updates {
        let mut cursor = &mut *data;
        let mut segments = update.path.split('.').peekable();
        while let Some(segment) = segments.next() {
            if !cursor.is_object() {
                *cursor = Value::Object(Map::new());
            }
            let Some(map) = cursor.as_object_mut() else {
                break;
            };
            if segments.peek().is_none() {
                map.insert(segment.to_string(), update.value.clone());
                break;
            }
            cursor = map
                .entry(segment.to_string())
                .or_insert_with(|| Value::Object(Map::new()));
        }
    }
}

/// Last segment of a path.
pub fn document_id(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

/// Everything before the last segment; empty for top-level entries.
pub fn parent_path(path: &str) -> &str {
    match path.rfind('/') {
        Some(idx) => &path[..idx],
        None => "",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn path_helpers() {
        let path = "CompanionApps/a1/PrintJobs/j9";
        assert_eq!(document_id(path), "j9");
        assert_eq!(parent_path(path), "CompanionApps/a1/PrintJobs");
        assert_eq!(parent_path("CompanionApps"), "");
    }

    #[test]
    fn dotted_updates_create_nested_maps() {
        let mut data = json!({"status": "pending", "user": {"id": "7"}});
        apply_updates(
            &mut data,
            &[
                FieldUpdate::new("status", "complete"),
                FieldUpdate::new("user.name", "Ada"),
                FieldUpdate::new("meta.source.kind", "scale"),
            ],
        );
        assert_eq!(data["status"], "complete");
        assert_eq!(data["user"]["id"], "7");
        assert_eq!(data["user"]["name"], "Ada");
        assert_eq!(data["meta"]["source"]["kind"], "scale");
    }

    #[test]
    fn decode_failure_is_a_validation_error() {
        #[derive(Debug, serde::Deserialize)]
        #[allow(dead_code)]
        struct Needs {
            created: i64,
        }
        let doc = Document::new("c/d", json!({"created": "yesterday"}));
        assert!(matches!(
            doc.decode::<Needs>(),
            Err(CompanionError::Validation(_))
        ));
    }
}
