//! Ordered dotted-key store for one side of a checkpoint or config

use crate::{ConversionError, Result, Value};
use candle_core::Tensor;
use std::collections::HashMap;

/// Ordered mapping from dotted key (`h.0.attn.qkv_proj.weight`) to [`Value`].
///
/// Keys are unique. Iteration follows insertion order so conversions are
/// deterministic; re-inserting an existing key keeps its original position.
#[derive(Debug, Clone, Default)]
pub struct NamedValueStore {
    order: Vec<String>,
    values: HashMap<String, Value>,
}

impl NamedValueStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self { order: Vec::with_capacity(capacity), values: HashMap::with_capacity(capacity) }
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    /// Insert a value, returning the previous one if the key existed.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        let key = key.into();
        let value = value.into();
        match self.values.insert(key.clone(), value) {
            Some(previous) => Some(previous),
            None => {
                self.order.push(key);
                None
            }
        }
    }

    pub fn remove(&mut self, key: &str) -> Option<Value> {
        let removed = self.values.remove(key)?;
        self.order.retain(|k| k != key);
        Some(removed)
    }

    /// Keys in insertion order.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.order.iter().map(String::as_str)
    }

    /// `(key, value)` pairs in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.order.iter().map(|k| (k.as_str(), &self.values[k]))
    }

    /// Look up a key that must exist.
    pub fn require(&self, key: &str) -> Result<&Value> {
        self.get(key).ok_or_else(|| ConversionError::missing(key, "expected the key to exist"))
    }

    pub fn tensor(&self, key: &str) -> Result<&Tensor> {
        let value = self.require(key)?;
        value.as_tensor().ok_or_else(|| mismatch(key, "tensor", value))
    }

    // ---------- typed config accessors ----------

    pub fn get_bool(&self, key: &str) -> Result<bool> {
        let value = self.require(key)?;
        value.as_bool().ok_or_else(|| mismatch(key, "bool", value))
    }

    pub fn get_i64(&self, key: &str) -> Result<i64> {
        let value = self.require(key)?;
        value.as_i64().ok_or_else(|| mismatch(key, "int", value))
    }

    pub fn get_usize(&self, key: &str) -> Result<usize> {
        let value = self.require(key)?;
        value
            .as_i64()
            .and_then(|i| usize::try_from(i).ok())
            .ok_or_else(|| mismatch(key, "non-negative int", value))
    }

    pub fn get_f64(&self, key: &str) -> Result<f64> {
        let value = self.require(key)?;
        value.as_f64().ok_or_else(|| mismatch(key, "float", value))
    }

    pub fn get_str(&self, key: &str) -> Result<&str> {
        let value = self.require(key)?;
        value.as_str().ok_or_else(|| mismatch(key, "string", value))
    }

    /// Like [`get_bool`](Self::get_bool), but an absent or `None` field yields `default`.
    pub fn get_bool_or(&self, key: &str, default: bool) -> Result<bool> {
        match self.get(key) {
            None | Some(Value::None) => Ok(default),
            Some(_) => self.get_bool(key),
        }
    }

    pub fn get_f64_or(&self, key: &str, default: f64) -> Result<f64> {
        match self.get(key) {
            None | Some(Value::None) => Ok(default),
            Some(_) => self.get_f64(key),
        }
    }

    // ---------- section helpers ----------

    /// Keys under `section.`, with the section prefix stripped.
    pub fn section(&self, section: &str) -> Self {
        let prefix = format!("{section}.");
        self.iter()
            .filter_map(|(k, v)| k.strip_prefix(&prefix).map(|rest| (rest.to_string(), v.clone())))
            .collect()
    }

    /// Every key re-rooted under `section.`.
    pub fn into_section(self, section: &str) -> Self {
        self.into_iter().map(|(k, v)| (format!("{section}.{k}"), v)).collect()
    }
}

fn mismatch(key: &str, expected: &'static str, found: &Value) -> ConversionError {
    ConversionError::TypeMismatch { key: key.to_string(), expected, found: found.kind() }
}

impl IntoIterator for NamedValueStore {
    type Item = (String, Value);
    type IntoIter = std::vec::IntoIter<(String, Value)>;

    fn into_iter(mut self) -> Self::IntoIter {
        let pairs: Vec<_> = self
            .order
            .into_iter()
            .filter_map(|k| self.values.remove(&k).map(|v| (k, v)))
            .collect();
        pairs.into_iter()
    }
}

impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for NamedValueStore {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut store = Self::new();
        store.extend(iter);
        store
    }
}

impl<K: Into<String>, V: Into<Value>> Extend<(K, V)> for NamedValueStore {
    fn extend<I: IntoIterator<Item = (K, V)>>(&mut self, iter: I) {
        for (k, v) in iter {
            self.insert(k, v);
        }
    }
}
