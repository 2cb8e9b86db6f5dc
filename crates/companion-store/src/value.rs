// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Firestore typed-value codec.
//
// The REST API wraps every field in a single-key object naming its type
// (`{"integerValue": "42"}`).  These helpers convert between that shape and
// plain JSON.  Timestamps, references and bytes decode to strings.

use serde_json::{Map, Number, Value, json};

use companion_core::error::{CompanionError, Result};

/// Encode a plain JSON value as a Firestore `Value`.
pub(crate) fn encode_value(value: &Value) -> Value {
    match value {
        Value::Null => json!({ "nullValue": null }),
        Value::Bool(b) => json!({ "booleanValue": b }),
        Value::Number(n) => match n.as_i64() {
            Some(i) => json!({ "integerValue": i.to_string() }),
            None => json!({ "doubleValue": n.as_f64().unwrap_or_default() }),
        },
        Value::String(s) => json!({ "stringValue": s }),
        Value::Array(items) => {
            let values: Vec<Value> = items.iter().map(encode_value).collect();
            json!({ "arrayValue": { "values": values } })
        }
        Value::Object(map) => json!({ "mapValue": { "fields": encode_map(map) } }),
    }
}

/// Encode a document payload as a Firestore `fields` map.
pub(crate) fn encode_fields(data: &Value) -> Value {
    match data {
        Value::Object(map) => encode_map(map),
        _ => Value::Object(Map::new()),
    }
}

fn encode_map(map: &Map<String, Value>) -> Value {
    Value::Object(
        map.iter()
            .map(|(key, value)| (key.clone(), encode_value(value)))
            .collect(),
    )
}

/// Decode a Firestore `Value` into plain JSON.
pub(crate) fn decode_value(value: &Value) -> Result<Value> {
    let Some((kind, inner)) = value.as_object().and_then(|m| m.iter().next()) else {
        return Err(CompanionError::Store(format!("malformed field value: {value}")));
    };
    let decoded = match kind.as_str() {
        "nullValue" => Value::Null,
        "booleanValue" => Value::Bool(inner.as_bool().unwrap_or_default()),
        "integerValue" => {
            let parsed = match inner {
                Value::String(s) => s.parse::<i64>().ok(),
                other => other.as_i64(),
            };
            let i = parsed.ok_or_else(|| {
                CompanionError::Store(format!("malformed integerValue: {inner}"))
            })?;
            Value::Number(i.into())
        }
        "doubleValue" => inner
            .as_f64()
            .and_then(Number::from_f64)
            .map(Value::Number)
            .unwrap_or(Value::Null),
        "stringValue" | "timestampValue" | "referenceValue" | "bytesValue" => inner.clone(),
        "geoPointValue" => inner.clone(),
        "arrayValue" => {
            let values = inner
                .get("values")
                .and_then(Value::as_array)
                .map(|items| items.iter().map(decode_value).collect::<Result<Vec<_>>>())
                .transpose()?
                .unwrap_or_default();
            Value::Array(values)
        }
        "mapValue" => decode_fields(inner.get("fields"))?,
        other => {
            return Err(CompanionError::Store(format!(
                "unsupported field type {other}"
            )));
        }
    };
    Ok(decoded)
}

/// Decode a Firestore `fields` map into a JSON object.
pub(crate) fn decode_fields(fields: Option<&Value>) -> Result<Value> {
    let mut out = Map::new();
    if let Some(map) = fields.and_then(Value::as_object) {
        for (key, value) in map {
            out.insert(key.clone(), decode_value(value)?);
        }
    }
    Ok(Value::Object(out))
}
