//! Record ↔ Qdrant payload codec.
//!
//! Qdrant payloads are protobuf `Value` trees. Everything here goes through
//! `serde_json::Value` first, so any JSON-representable metadata round-trips.
//! Point ids are derived from the string id by hashing; the string id is always
//! kept in the payload and is what lookups compare against.

use std::collections::HashMap;

use qdrant_client::qdrant::value::Kind;
use qdrant_client::qdrant::{ListValue, Struct, Value};
use serde_json::{Map, Number, Value as JsonValue};
use sha2::{Digest, Sha256};

use super::parse_timestamp;
use crate::error::{OpContext, Result, StoreError};
use crate::model::{GlobalConfig, Group, Note};

pub type Payload = HashMap<String, Value>;

pub const FIELD_ID: &str = "id";
pub const FIELD_TYPE: &str = "type";
pub const FIELD_PROJECT_ID: &str = "projectId";
pub const FIELD_GROUP_ID: &str = "groupId";
pub const FIELD_GROUP_KEY: &str = "groupKey";
pub const FIELD_KEY: &str = "key";
pub const FIELD_TAGS: &str = "tags";
pub const FIELD_CREATED_AT_TS: &str = "createdAtTimestamp";

pub const TYPE_GLOBAL_CONFIG: &str = "global_config";
pub const TYPE_GROUP: &str = "group";

/// Numeric point id: the first 8 bytes of SHA-256(`id`), big-endian.
pub fn point_id(id: &str) -> u64 {
    let digest = Sha256::digest(id.as_bytes());
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&digest[..8]);
    u64::from_be_bytes(bytes)
}

/// JSON → protobuf value. Qdrant has no unsigned integer kind, so integers
/// above `i64::MAX` are stored as doubles and come back as (possibly rounded)
/// floats. Everything else round-trips exactly.
pub fn json_to_value(json: JsonValue) -> Value {
    let kind = match json {
        JsonValue::Null => Kind::NullValue(0),
        JsonValue::Bool(b) => Kind::BoolValue(b),
        JsonValue::Number(n) => match n.as_i64() {
            Some(i) => Kind::IntegerValue(i),
            None => Kind::DoubleValue(n.as_f64().unwrap_or(f64::NAN)),
        },
        JsonValue::String(s) => Kind::StringValue(s),
        JsonValue::Array(items) => Kind::ListValue(ListValue {
            values: items.into_iter().map(json_to_value).collect(),
        }),
        JsonValue::Object(map) => Kind::StructValue(Struct {
            fields: map.into_iter().map(|(k, v)| (k, json_to_value(v))).collect(),
        }),
    };
    Value { kind: Some(kind) }
}

pub fn value_to_json(value: Value) -> JsonValue {
    match value.kind {
        None | Some(Kind::NullValue(_)) => JsonValue::Null,
        Some(Kind::BoolValue(b)) => JsonValue::Bool(b),
        Some(Kind::IntegerValue(i)) => JsonValue::Number(i.into()),
        Some(Kind::DoubleValue(d)) => Number::from_f64(d).map_or(JsonValue::Null, JsonValue::Number),
        Some(Kind::StringValue(s)) => JsonValue::String(s),
        Some(Kind::ListValue(list)) => {
            JsonValue::Array(list.values.into_iter().map(value_to_json).collect())
        }
        Some(Kind::StructValue(s)) => JsonValue::Object(
            s.fields
                .into_iter()
                .map(|(k, v)| (k, value_to_json(v)))
                .collect(),
        ),
    }
}

/// Serialize `record` to a payload, dropping top-level nulls.
fn to_payload<T: serde::Serialize>(record: &T, op: &'static str) -> Result<Payload> {
    let JsonValue::Object(map) = serde_json::to_value(record).during(op)? else {
        return Err(StoreError::backend(op, "record did not serialize to an object"));
    };
    Ok(map
        .into_iter()
        .filter(|(_, v)| !v.is_null())
        .map(|(k, v)| (k, json_to_value(v)))
        .collect())
}

fn payload_to_map(payload: Payload) -> Map<String, JsonValue> {
    payload
        .into_iter()
        .map(|(k, v)| (k, value_to_json(v)))
        .collect()
}

/// Payload for the primary collection. Adds `createdAtTimestamp` (fractional
/// unix seconds) when `created_at` parses, for server-side range filters.
pub fn note_payload(note: &Note) -> Result<Payload> {
    let mut payload = to_payload(note, "encode_note")?;
    if let Some(ts) = note.created_at.as_deref().and_then(parse_timestamp) {
        let seconds = ts.timestamp() as f64 + f64::from(ts.timestamp_subsec_nanos()) / 1e9;
        payload.insert(
            FIELD_CREATED_AT_TS.into(),
            Value {
                kind: Some(Kind::DoubleValue(seconds)),
            },
        );
    }
    Ok(payload)
}

pub fn note_from_payload(payload: Payload) -> Result<Note> {
    let mut map = payload_to_map(payload);
    map.remove(FIELD_CREATED_AT_TS);
    serde_json::from_value(JsonValue::Object(map)).during("decode_note")
}

pub fn global_payload(config: &GlobalConfig) -> Result<Payload> {
    let mut payload = to_payload(config, "encode_global_config")?;
    payload.insert(FIELD_TYPE.into(), json_to_value(TYPE_GLOBAL_CONFIG.into()));
    // A JSON null value is still a value; keep it.
    payload.insert("value".into(), json_to_value(config.value.clone()));
    Ok(payload)
}

pub fn global_from_payload(payload: Payload) -> Result<GlobalConfig> {
    let mut map = payload_to_map(payload);
    map.remove(FIELD_TYPE);
    map.entry("value").or_insert(JsonValue::Null);
    serde_json::from_value(JsonValue::Object(map)).during("decode_global_config")
}

pub fn group_payload(group: &Group) -> Result<Payload> {
    let mut payload = to_payload(group, "encode_group")?;
    payload.insert(FIELD_TYPE.into(), json_to_value(TYPE_GROUP.into()));
    Ok(payload)
}

pub fn group_from_payload(payload: Payload) -> Result<Group> {
    let mut map = payload_to_map(payload);
    map.remove(FIELD_TYPE);
    serde_json::from_value(JsonValue::Object(map)).during("decode_group")
}

/// The string id stored in a payload, if any.
pub fn payload_id(payload: &Payload) -> Option<&str> {
    match payload.get(FIELD_ID)?.kind.as_ref()? {
        Kind::StringValue(s) => Some(s),
        _ => None,
    }
}
