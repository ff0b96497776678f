//! # Execution Context
//!
//! The accumulating key/value map that flows through one execution. Keys are
//! strings, values are JSON. Successful steps merge their patches in; keys are
//! never removed, only overwritten by later writers.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use thiserror::Error;

/// A step's contribution to the context
pub type Patch = Map<String, Value>;

/// Typed accessor failures
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ContextError {
    #[error("missing context key '{0}'")]
    MissingKey(String),
    #[error("context key '{key}' has unexpected type: {reason}")]
    TypeMismatch { key: String, reason: String },
    #[error("context input must be a JSON object, got {0}")]
    NotAnObject(String),
}

/// Append-only accumulating context owned by a single execution
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Context {
    entries: BTreeMap<String, Value>,
}

impl Context {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a context from a JSON object
    pub fn from_value(value: Value) -> Result<Self, ContextError> {
        match value {
            Value::Object(map) => Ok(Self {
                entries: map.into_iter().collect(),
            }),
            Value::Null => Ok(Self::new()),
            other => Err(ContextError::NotAnObject(json_type_name(&other).to_string())),
        }
    }

    /// Get a typed value, failing on missing or mis-typed keys
    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Result<T, ContextError> {
        let value = self
            .entries
            .get(key)
            .ok_or_else(|| ContextError::MissingKey(key.to_string()))?;
        serde_json::from_value(value.clone()).map_err(|e| ContextError::TypeMismatch {
            key: key.to_string(),
            reason: e.to_string(),
        })
    }

    /// Get a typed value, returning `None` when the key is absent
    pub fn get_opt<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, ContextError> {
        match self.entries.get(key) {
            None => Ok(None),
            Some(_) => self.get(key).map(Some),
        }
    }

    pub fn get_raw(&self, key: &str) -> Option<&Value> {
        self.entries.get(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    /// Insert a single value, overwriting any previous writer
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.entries.insert(key.into(), value.into());
    }

    /// Merge a patch; keys in the patch win
    pub fn merge(&mut self, patch: &Patch) {
        for (key, value) in patch {
            self.entries.insert(key.clone(), value.clone());
        }
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn to_value(&self) -> Value {
        Value::Object(self.entries.clone().into_iter().collect())
    }
}

impl From<Patch> for Context {
    fn from(patch: Patch) -> Self {
        Self {
            entries: patch.into_iter().collect(),
        }
    }
}

/// Build a patch from a JSON value; non-object values yield an empty patch
pub fn patch_from(value: Value) -> Patch {
    match value {
        Value::Object(map) => map,
        _ => Patch::new(),
    }
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
