//! Thin adapters between on-disk documents and [`NamedValueStore`]
//!
//! Checkpoints are read and written as safetensors; config records as JSON
//! (HF `config.json`) or YAML (CS `params.yaml`). Nested objects flatten to
//! dotted keys and unflatten on the way back out; an empty object is kept as
//! [`Value::EmptySection`] so it is written back as `{}`.

use crate::{ConversionError, NamedValueStore, Result, Value};
use candle_core::{Device, Tensor};
use serde_json::{Map, Number, Value as Json};
use std::collections::HashMap;
use std::path::Path;
use tracing::debug;

/// Load every tensor of a safetensors file onto the CPU, keys sorted.
pub fn load_safetensors(path: &Path) -> Result<NamedValueStore> {
    let mut tensors = candle_core::safetensors::load(path, &Device::Cpu)?;
    let mut names: Vec<_> = tensors.keys().cloned().collect();
    names.sort();
    debug!("Loaded {} tensors from {}", names.len(), path.display());

    Ok(names
        .into_iter()
        .filter_map(|name| tensors.remove(&name).map(|t| (name, Value::Tensor(t))))
        .collect())
}

/// Write the tensors of a store to a safetensors file.
///
/// Scalar values have no safetensors representation and are rejected.
pub fn save_safetensors(store: &NamedValueStore, path: &Path) -> Result<()> {
    let mut tensors: HashMap<String, Tensor> = HashMap::with_capacity(store.len());
    for (key, value) in store.iter() {
        let tensor = value.as_tensor().ok_or_else(|| ConversionError::TypeMismatch {
            key: key.to_string(),
            expected: "tensor",
            found: value.kind(),
        })?;
        tensors.insert(key.to_string(), tensor.clone());
    }
    candle_core::safetensors::save(&tensors, path)?;
    debug!("Saved {} tensors to {}", tensors.len(), path.display());
    Ok(())
}

// ---------- JSON / YAML config records ----------

/// Flatten a JSON document into a dotted-key config record.
pub fn config_from_json(doc: &Json) -> Result<NamedValueStore> {
    let mut store = NamedValueStore::new();
    match doc {
        Json::Object(map) => flatten_into(&mut store, "", map),
        other => {
            return Err(ConversionError::config(format!(
                "config document must be an object, got {}",
                json_kind(other)
            )));
        }
    }
    Ok(store)
}

/// Rebuild a nested JSON document from a dotted-key config record.
pub fn config_to_json(store: &NamedValueStore) -> Result<Json> {
    let mut root = Map::new();
    for (key, value) in store.iter() {
        let mut parts = key.split('.').peekable();
        let mut node = &mut root;
        while let Some(part) = parts.next() {
            if parts.peek().is_none() {
                node.insert(part.to_string(), to_json(key, value)?);
                break;
            }
            let child = node.entry(part.to_string()).or_insert_with(|| Json::Object(Map::new()));
            node = match child {
                Json::Object(map) => map,
                _ => {
                    return Err(ConversionError::config(format!(
                        "key '{key}' nests under a scalar field '{part}'"
                    )));
                }
            };
        }
    }
    Ok(Json::Object(root))
}

pub fn read_json_config(path: &Path) -> Result<NamedValueStore> {
    let doc: Json = serde_json::from_slice(&std::fs::read(path)?)?;
    config_from_json(&doc)
}

pub fn write_json_config(store: &NamedValueStore, path: &Path) -> Result<()> {
    let doc = config_to_json(store)?;
    std::fs::write(path, serde_json::to_string_pretty(&doc)?)?;
    Ok(())
}

pub fn read_yaml_config(path: &Path) -> Result<NamedValueStore> {
    let doc: Json = serde_yaml::from_str(&std::fs::read_to_string(path)?)?;
    config_from_json(&doc)
}

pub fn write_yaml_config(store: &NamedValueStore, path: &Path) -> Result<()> {
    let doc = config_to_json(store)?;
    std::fs::write(path, serde_yaml::to_string(&doc)?)?;
    Ok(())
}

fn flatten_into(store: &mut NamedValueStore, prefix: &str, map: &Map<String, Json>) {
    for (k, v) in map {
        let key = if prefix.is_empty() { k.clone() } else { format!("{prefix}.{k}") };
        match v {
            Json::Object(child) if !child.is_empty() => flatten_into(store, &key, child),
            other => {
                store.insert(key, from_json(other));
            }
        }
    }
}

fn from_json(v: &Json) -> Value {
    match v {
        Json::Null => Value::None,
        Json::Bool(b) => Value::Bool(*b),
        Json::Number(n) => match n.as_i64() {
            Some(i) => Value::Int(i),
            None => Value::Float(n.as_f64().unwrap_or(f64::NAN)),
        },
        Json::String(s) => Value::Str(s.clone()),
        Json::Array(items) => Value::List(items.iter().map(from_json).collect()),
        // Only empty objects reach here; non-empty ones are flattened.
        Json::Object(_) => Value::EmptySection,
    }
}

fn to_json(key: &str, v: &Value) -> Result<Json> {
    Ok(match v {
        Value::None => Json::Null,
        Value::EmptySection => Json::Object(Map::new()),
        Value::Bool(b) => Json::Bool(*b),
        Value::Int(i) => Json::Number(Number::from(*i)),
        Value::Float(f) => Number::from_f64(*f).map(Json::Number).unwrap_or(Json::Null),
        Value::Str(s) => Json::String(s.clone()),
        Value::List(items) => {
            Json::Array(items.iter().map(|item| to_json(key, item)).collect::<Result<_>>()?)
        }
        Value::Tensor(_) => {
            return Err(ConversionError::TypeMismatch {
                key: key.to_string(),
                expected: "config scalar",
                found: "tensor",
            });
        }
    })
}

fn json_kind(v: &Json) -> &'static str {
    match v {
        Json::Null => "null",
        Json::Bool(_) => "bool",
        Json::Number(_) => "number",
        Json::String(_) => "string",
        Json::Array(_) => "array",
        Json::Object(_) => "object",
    }
}
