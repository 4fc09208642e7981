//! Task state: the task-local namespace and the consignment's global context.
//!
//! Both are plain JSON maps in memory. On disk they are wrapped in a
//! versioned [`StateDocument`] so the stored shape can evolve.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::TaskError;

/// Current on-disk version of a state document.
pub const STATE_DOCUMENT_VERSION: u32 = 1;

/// Serialized form of a [`StateManager`].
///
/// ```json
/// {"version": 1, "data": {"awaiting_oga": true}}
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateDocument {
  pub version: u32,
  #[serde(default)]
  pub data: Map<String, Value>,
}

impl StateDocument {
  pub fn new(data: Map<String, Value>) -> Self {
    Self {
      version: STATE_DOCUMENT_VERSION,
      data,
    }
  }

  /// Read a stored document, upgrading older shapes.
  ///
  /// Version 0 is a bare JSON object with no envelope. `null` reads as empty.
  pub fn from_value(value: Value) -> Result<Self, TaskError> {
    match value {
      Value::Null => Ok(Self::new(Map::new())),
      Value::Object(map) if Self::is_envelope(&map) => {
        let doc: StateDocument = serde_json::from_value(Value::Object(map))?;
        if doc.version > STATE_DOCUMENT_VERSION {
          return Err(TaskError::State {
            message: format!(
              "state document version {} is newer than supported version {}",
              doc.version, STATE_DOCUMENT_VERSION
            ),
          });
        }
        Ok(Self::new(doc.data))
      }
      Value::Object(map) => Ok(Self::new(map)),
      other => Err(TaskError::State {
        message: format!("expected a JSON object, got {other}"),
      }),
    }
  }

  fn is_envelope(map: &Map<String, Value>) -> bool {
    map.len() == 2
      && map.get("version").is_some_and(Value::is_u64)
      && map.get("data").is_some_and(Value::is_object)
  }

  pub fn to_value(&self) -> Value {
    serde_json::json!({
      "version": self.version,
      "data": self.data,
    })
  }
}

/// In-memory key/value view over one state namespace.
///
/// Tracks which keys were written since the last [`StateManager::take_changes`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StateManager {
  data: Map<String, Value>,
  changed: BTreeSet<String>,
}

impl StateManager {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn from_map(data: Map<String, Value>) -> Self {
    Self {
      data,
      changed: BTreeSet::new(),
    }
  }

  /// Rebuild from a stored document.
  pub fn from_document(value: Value) -> Result<Self, TaskError> {
    Ok(Self::from_map(StateDocument::from_value(value)?.data))
  }

  pub fn to_document(&self) -> Value {
    StateDocument::new(self.data.clone()).to_value()
  }

  pub fn get(&self, key: &str) -> Option<&Value> {
    self.data.get(key)
  }

  pub fn get_str(&self, key: &str) -> Option<&str> {
    self.data.get(key).and_then(Value::as_str)
  }

  pub fn get_bool(&self, key: &str) -> bool {
    self.data.get(key).and_then(Value::as_bool).unwrap_or(false)
  }

  pub fn set(&mut self, key: impl Into<String>, value: impl Into<Value>) {
    let key = key.into();
    self.changed.insert(key.clone());
    self.data.insert(key, value.into());
  }

  pub fn get_all(&self) -> &Map<String, Value> {
    &self.data
  }

  /// Current values of every key written since the last call.
  pub fn take_changes(&mut self) -> Map<String, Value> {
    std::mem::take(&mut self.changed)
      .into_iter()
      .filter_map(|key| self.data.get(&key).cloned().map(|value| (key, value)))
      .collect()
  }
}
