//! Form definitions looked up by the simple form plugin.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::fs;

use crate::TaskError;

/// A form as stored in a registry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FormDefinition {
  pub id: String,
  pub name: String,
  pub schema: serde_json::Value,
  #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
  pub ui_schema: serde_json::Value,
}

/// Lookup and management of form definitions.
#[async_trait]
pub trait FormRegistry: Send + Sync {
  /// Get a form by ID.
  async fn get(&self, form_id: &str) -> Result<Option<FormDefinition>, TaskError>;

  /// Add a form. Fails if a form with the same ID exists.
  async fn install(&self, form: &FormDefinition) -> Result<(), TaskError>;

  /// List every form.
  async fn list(&self) -> Result<Vec<FormDefinition>, TaskError>;

  /// Remove a form by ID.
  async fn remove(&self, form_id: &str) -> Result<(), TaskError>;
}

/// Filesystem-based form registry.
///
/// Forms are stored in a directory structure:
/// ```text
/// {root}/
/// └── 6f1c2b4e-export-declaration/
///     └── form.json
/// ```
pub struct FsFormRegistry {
  root: PathBuf,
}

impl FsFormRegistry {
  /// Create a new filesystem registry at the given root path.
  pub fn new(root: impl Into<PathBuf>) -> Self {
    Self { root: root.into() }
  }

  /// Get the root directory of the registry.
  pub fn root(&self) -> &Path {
    &self.root
  }

  /// Directory for a form, rejecting IDs that would escape the root.
  fn form_dir(&self, form_id: &str) -> Result<PathBuf, TaskError> {
    let valid = !form_id.is_empty()
      && form_id
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.')
      && form_id != "."
      && form_id != "..";
    if !valid {
      return Err(TaskError::invalid_input("formId", format!("invalid form id: {form_id}")));
    }
    Ok(self.root.join(form_id))
  }

  async fn read_form(&self, form_dir: &Path) -> Result<FormDefinition, TaskError> {
    let content = fs::read_to_string(form_dir.join("form.json")).await?;
    Ok(serde_json::from_str(&content)?)
  }
}

#[async_trait]
impl FormRegistry for FsFormRegistry {
  async fn get(&self, form_id: &str) -> Result<Option<FormDefinition>, TaskError> {
    let dir = self.form_dir(form_id)?;
    if !dir.join("form.json").exists() {
      return Ok(None);
    }
    self.read_form(&dir).await.map(Some)
  }

  async fn install(&self, form: &FormDefinition) -> Result<(), TaskError> {
    let dir = self.form_dir(&form.id)?;
    if dir.exists() {
      return Err(TaskError::Form {
        message: format!("form already exists: {}", form.id),
      });
    }

    fs::create_dir_all(&dir).await?;
    fs::write(dir.join("form.json"), serde_json::to_vec_pretty(form)?).await?;
    Ok(())
  }

  async fn list(&self) -> Result<Vec<FormDefinition>, TaskError> {
    let mut forms = Vec::new();

    if !self.root.exists() {
      return Ok(forms);
    }

    let mut entries = fs::read_dir(&self.root).await?;
    while let Some(entry) = entries.next_entry().await? {
      let path = entry.path();
      if path.is_dir()
        && let Ok(form) = self.read_form(&path).await
      {
        forms.push(form);
      }
    }

    forms.sort_by(|a, b| a.id.cmp(&b.id));
    Ok(forms)
  }

  async fn remove(&self, form_id: &str) -> Result<(), TaskError> {
    let dir = self.form_dir(form_id)?;
    if !dir.exists() {
      return Err(TaskError::Form {
        message: format!("form not found: {form_id}"),
      });
    }
    fs::remove_dir_all(&dir).await?;
    Ok(())
  }
}

/// Form registry held in memory.
#[derive(Default)]
pub struct InMemoryFormRegistry {
  forms: RwLock<HashMap<String, FormDefinition>>,
}

impl InMemoryFormRegistry {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn with_form(self, form: FormDefinition) -> Self {
    self
      .forms
      .write()
      .unwrap_or_else(|e| e.into_inner())
      .insert(form.id.clone(), form);
    self
  }
}

#[async_trait]
impl FormRegistry for InMemoryFormRegistry {
  async fn get(&self, form_id: &str) -> Result<Option<FormDefinition>, TaskError> {
    let forms = self.forms.read().unwrap_or_else(|e| e.into_inner());
    Ok(forms.get(form_id).cloned())
  }

  async fn install(&self, form: &FormDefinition) -> Result<(), TaskError> {
    let mut forms = self.forms.write().unwrap_or_else(|e| e.into_inner());
    if forms.contains_key(&form.id) {
      return Err(TaskError::Form {
        message: format!("form already exists: {}", form.id),
      });
    }
    forms.insert(form.id.clone(), form.clone());
    Ok(())
  }

  async fn list(&self) -> Result<Vec<FormDefinition>, TaskError> {
    let forms = self.forms.read().unwrap_or_else(|e| e.into_inner());
    let mut list: Vec<FormDefinition> = forms.values().cloned().collect();
    list.sort_by(|a, b| a.id.cmp(&b.id));
    Ok(list)
  }

  async fn remove(&self, form_id: &str) -> Result<(), TaskError> {
    let mut forms = self.forms.write().unwrap_or_else(|e| e.into_inner());
    forms.remove(form_id).map(|_| ()).ok_or_else(|| TaskError::Form {
      message: format!("form not found: {form_id}"),
    })
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  fn form(id: &str) -> FormDefinition {
    FormDefinition {
      id: id.to_string(),
      name: "Export declaration".to_string(),
      schema: json!({"type": "object", "properties": {"exporter": {"type": "string"}}}),
      ui_schema: serde_json::Value::Null,
    }
  }

  #[tokio::test]
  async fn test_fs_registry_lifecycle() {
    let dir = tempfile::tempdir().unwrap();
    let registry = FsFormRegistry::new(dir.path());

    assert!(registry.list().await.unwrap().is_empty());
    assert!(registry.get("decl").await.unwrap().is_none());

    registry.install(&form("decl")).await.unwrap();
    assert!(registry.install(&form("decl")).await.is_err());

    let loaded = registry.get("decl").await.unwrap().unwrap();
    assert_eq!(loaded, form("decl"));
    assert_eq!(registry.list().await.unwrap().len(), 1);

    registry.remove("decl").await.unwrap();
    assert!(registry.get("decl").await.unwrap().is_none());
    assert!(registry.remove("decl").await.is_err());
  }

  #[tokio::test]
  async fn test_fs_registry_rejects_path_escape() {
    let dir = tempfile::tempdir().unwrap();
    let registry = FsFormRegistry::new(dir.path());

    assert!(matches!(
      registry.get("../etc").await,
      Err(TaskError::InvalidInput { .. })
    ));
    assert!(registry.get("..").await.is_err());
    assert!(registry.get("").await.is_err());
  }

  #[tokio::test]
  async fn test_missing_root_lists_empty() {
    let registry = FsFormRegistry::new("/nonexistent/tradeflow/forms");
    assert!(registry.list().await.unwrap().is_empty());
  }

  #[tokio::test]
  async fn test_in_memory_registry() {
    let registry = InMemoryFormRegistry::new().with_form(form("a"));
    assert!(registry.get("a").await.unwrap().is_some());
    assert!(registry.install(&form("a")).await.is_err());
    registry.install(&form("b")).await.unwrap();
    assert_eq!(registry.list().await.unwrap().len(), 2);
    registry.remove("a").await.unwrap();
    assert!(registry.get("a").await.unwrap().is_none());
  }
}
