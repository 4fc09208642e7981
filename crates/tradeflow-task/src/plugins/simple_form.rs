//! A form the trader fills in, optionally forwarded to a review service.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use tracing::{debug, warn};

use crate::{
  FormRegistry, PluginResult, ResumePayload, StateManager, TaskContext, TaskError, TaskPlugin,
};

const COMMAND_SET_KEY: &str = "commandSet";
const AWAITING_OGA_KEY: &str = "awaiting_oga";
const SUBMISSION_TIMEOUT: Duration = Duration::from_secs(30);

/// Node template configuration of a simple form.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SimpleFormConfig {
  /// Registry ID, used when `schema` is not given inline.
  #[serde(default)]
  pub form_id: String,
  #[serde(default)]
  pub title: String,
  #[serde(default)]
  pub schema: Value,
  #[serde(default)]
  pub ui_schema: Value,
  /// Default values; wins over values taken from the global context.
  #[serde(default)]
  pub form_data: Value,
  /// Where submitted data is forwarded.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub submission_url: Option<String>,
  /// Wait for a reviewing agency's callback after submission.
  #[serde(default)]
  pub requires_oga_verification: bool,
  /// Global context key that receives the submitted data.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub global_context_key: Option<String>,
}

/// Form task.
///
/// `start` returns the form (schema plus data prepopulated from the global
/// context) and waits for input. The first `resume` is the submission. With
/// `requiresOgaVerification` the task keeps waiting after submission and the
/// following `resume` is the agency's verdict.
pub struct SimpleForm {
  forms: Arc<dyn FormRegistry>,
  client: reqwest::Client,
  service_url: String,
}

impl SimpleForm {
  pub fn new(forms: Arc<dyn FormRegistry>, service_url: impl Into<String>) -> Self {
    Self {
      forms,
      client: reqwest::Client::new(),
      service_url: service_url.into(),
    }
  }

  async fn resolve(&self, config: &Value) -> Result<SimpleFormConfig, TaskError> {
    let mut form: SimpleFormConfig = serde_json::from_value(config.clone())
      .map_err(|e| TaskError::invalid_input("config", e.to_string()))?;

    if form.schema.is_null() {
      if form.form_id.is_empty() {
        return Err(TaskError::MissingInput {
          field: "schema".to_string(),
        });
      }
      let def = self
        .forms
        .get(&form.form_id)
        .await?
        .ok_or_else(|| TaskError::Form {
          message: format!("form not found: {}", form.form_id),
        })?;
      form.title = def.name;
      form.schema = def.schema;
      form.ui_schema = def.ui_schema;
    }

    Ok(form)
  }

  async fn submit(
    &self,
    url: &str,
    ctx: &TaskContext,
    data: &Map<String, Value>,
  ) -> Result<Value, TaskError> {
    let body = json!({
      "data": data,
      "taskId": ctx.task_id,
      "consignmentId": ctx.consignment_id,
      "serviceUrl": format!("{}/api/tasks", self.service_url.trim_end_matches('/')),
    });

    let response = self
      .client
      .post(url)
      .json(&body)
      .timeout(SUBMISSION_TIMEOUT)
      .send()
      .await?;

    let status = response.status();
    if !status.is_success() {
      return Err(TaskError::Rejected {
        url: url.to_string(),
        status: status.as_u16(),
      });
    }

    let text = response.text().await?;
    Ok(serde_json::from_str(&text).unwrap_or(Value::String(text)))
  }
}

#[async_trait]
impl TaskPlugin for SimpleForm {
  async fn start(
    &self,
    _ctx: &TaskContext,
    config: &Value,
    local: &mut StateManager,
    global: &mut StateManager,
  ) -> Result<PluginResult, TaskError> {
    let form = self.resolve(config).await?;

    let prepopulated = build_form_data(&form.schema, global.get_all());
    let form_data = match &form.form_data {
      Value::Object(existing) => Value::Object(merge_form_data(prepopulated, existing)),
      Value::Null if prepopulated.is_empty() => Value::Null,
      Value::Null => Value::Object(prepopulated),
      other => {
        warn!(form_id = %form.form_id, "formData is not an object, skipping prepopulation");
        other.clone()
      }
    };

    local.set(COMMAND_SET_KEY, serde_json::to_value(&form)?);

    Ok(PluginResult::awaiting_input(json!({
      "formId": form.form_id,
      "title": form.title,
      "schema": form.schema,
      "uiSchema": form.ui_schema,
      "formData": form_data,
    })))
  }

  async fn resume(
    &self,
    ctx: &TaskContext,
    local: &mut StateManager,
    global: &mut StateManager,
    input: &ResumePayload,
  ) -> Result<PluginResult, TaskError> {
    let form: SimpleFormConfig = local
      .get(COMMAND_SET_KEY)
      .cloned()
      .map(serde_json::from_value)
      .transpose()?
      .ok_or_else(|| TaskError::State {
        message: "commandSet not found in local state".to_string(),
      })?;

    if local.get_bool(AWAITING_OGA_KEY) {
      local.set(AWAITING_OGA_KEY, false);
      debug!(task_id = %ctx.task_id, "verification received");
      return Ok(PluginResult::completed(input.content.clone()));
    }

    let data = match input.content.get("formData").unwrap_or(&input.content) {
      Value::Object(data) => data.clone(),
      _ => {
        return Err(TaskError::MissingInput {
          field: "formData".to_string(),
        });
      }
    };

    if let Some(key) = &form.global_context_key {
      global.set(key.clone(), Value::Object(data.clone()));
    }

    let Some(url) = &form.submission_url else {
      return Ok(PluginResult::completed(json!({
        "formId": form.form_id,
        "formData": data,
      })));
    };

    let response = self.submit(url, ctx, &data).await?;

    if form.requires_oga_verification {
      local.set(AWAITING_OGA_KEY, true);
      return Ok(PluginResult::awaiting_input(response));
    }

    Ok(PluginResult::completed(json!({
      "formId": form.form_id,
      "formData": response,
    })))
  }
}

/// Collect values for schema properties tagged with `x-globalContext`.
///
/// The tag holds a dotted path into the global context. Nested object
/// properties are walked recursively.
fn build_form_data(schema: &Value, global: &Map<String, Value>) -> Map<String, Value> {
  let mut data = Map::new();
  let Some(properties) = schema.get("properties").and_then(Value::as_object) else {
    return data;
  };

  for (field, def) in properties {
    if let Some(value) = def
      .get("x-globalContext")
      .and_then(Value::as_str)
      .and_then(|path| lookup_path(global, path))
    {
      data.insert(field.clone(), value.clone());
    }

    if def.get("type").and_then(Value::as_str) == Some("object") {
      let nested = build_form_data(def, global);
      if !nested.is_empty() {
        data.insert(field.clone(), Value::Object(nested));
      }
    }
  }

  data
}

fn lookup_path<'a>(data: &'a Map<String, Value>, path: &str) -> Option<&'a Value> {
  let mut keys = path.split('.').filter(|k| !k.is_empty());
  let mut current = data.get(keys.next()?)?;
  for key in keys {
    current = current.as_object()?.get(key)?;
  }
  Some(current)
}

/// Deep merge; `existing` wins on conflicts.
fn merge_form_data(mut base: Map<String, Value>, existing: &Map<String, Value>) -> Map<String, Value> {
  for (key, value) in existing {
    match (base.remove(key), value) {
      (Some(Value::Object(prepopulated)), Value::Object(nested)) => {
        base.insert(key.clone(), Value::Object(merge_form_data(prepopulated, nested)));
      }
      _ => {
        base.insert(key.clone(), value.clone());
      }
    }
  }
  base
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::{FormDefinition, InMemoryFormRegistry};
  use tokio_util::sync::CancellationToken;
  use tradeflow_config::TaskStatus;

  fn ctx() -> TaskContext {
    TaskContext {
      task_id: "t-1".to_string(),
      consignment_id: "c-1".to_string(),
      cancel: CancellationToken::new(),
    }
  }

  fn plugin() -> SimpleForm {
    let registry = InMemoryFormRegistry::new().with_form(FormDefinition {
      id: "decl".to_string(),
      name: "Export declaration".to_string(),
      schema: json!({
        "type": "object",
        "properties": {
          "exporter": {"type": "string", "x-globalContext": "trader.name"},
          "shipment": {
            "type": "object",
            "properties": {"port": {"type": "string", "x-globalContext": "port"}}
          }
        }
      }),
      ui_schema: Value::Null,
    });
    SimpleForm::new(Arc::new(registry), "http://localhost:8080")
  }

  fn global() -> StateManager {
    StateManager::from_map(
      json!({"trader": {"name": "Ceylon Tea Co"}, "port": "Colombo"})
        .as_object()
        .cloned()
        .unwrap(),
    )
  }

  #[test]
  fn test_lookup_path() {
    let data = json!({"a": {"b": {"c": 1}}}).as_object().cloned().unwrap();
    assert_eq!(lookup_path(&data, "a.b.c"), Some(&json!(1)));
    assert_eq!(lookup_path(&data, "a.x"), None);
    assert_eq!(lookup_path(&data, ""), None);
  }

  #[test]
  fn test_merge_prefers_existing() {
    let base = json!({"a": 1, "n": {"x": 1, "y": 2}}).as_object().cloned().unwrap();
    let existing = json!({"a": 9, "n": {"y": 5}}).as_object().cloned().unwrap();
    let merged = merge_form_data(base, &existing);
    assert_eq!(Value::Object(merged), json!({"a": 9, "n": {"x": 1, "y": 5}}));
  }

  #[tokio::test]
  async fn test_start_prepopulates_from_registry_form() {
    let mut local = StateManager::new();
    let mut global = global();

    let result = plugin()
      .start(&ctx(), &json!({"formId": "decl"}), &mut local, &mut global)
      .await
      .unwrap();

    assert_eq!(result.status, TaskStatus::AwaitingInput);
    assert_eq!(result.data["title"], "Export declaration");
    assert_eq!(result.data["formData"]["exporter"], "Ceylon Tea Co");
    assert_eq!(result.data["formData"]["shipment"]["port"], "Colombo");
    assert!(local.get(COMMAND_SET_KEY).is_some());
  }

  #[tokio::test]
  async fn test_start_unknown_form_fails() {
    let result = plugin()
      .start(
        &ctx(),
        &json!({"formId": "nope"}),
        &mut StateManager::new(),
        &mut StateManager::new(),
      )
      .await;
    assert!(matches!(result, Err(TaskError::Form { .. })));
  }

  #[tokio::test]
  async fn test_submit_without_url_completes() {
    let plugin = plugin();
    let mut local = StateManager::new();
    let mut global = global();
    plugin
      .start(
        &ctx(),
        &json!({"formId": "decl", "globalContextKey": "declaration"}),
        &mut local,
        &mut global,
      )
      .await
      .unwrap();
    global.take_changes();

    let input = ResumePayload {
      action: "SUBMIT_FORM".to_string(),
      content: json!({"formData": {"exporter": "Ceylon Tea Co"}}),
    };
    let result = plugin
      .resume(&ctx(), &mut local, &mut global, &input)
      .await
      .unwrap();

    assert_eq!(result.status, TaskStatus::Completed);
    assert_eq!(result.data["formData"]["exporter"], "Ceylon Tea Co");
    let changes = global.take_changes();
    assert_eq!(changes["declaration"]["exporter"], "Ceylon Tea Co");
  }

  #[tokio::test]
  async fn test_resume_requires_form_data() {
    let plugin = plugin();
    let mut local = StateManager::new();
    let mut global = StateManager::new();
    plugin
      .start(&ctx(), &json!({"formId": "decl"}), &mut local, &mut global)
      .await
      .unwrap();

    let input = ResumePayload {
      action: "SUBMIT_FORM".to_string(),
      content: json!("not a form"),
    };
    assert!(matches!(
      plugin.resume(&ctx(), &mut local, &mut global, &input).await,
      Err(TaskError::MissingInput { .. })
    ));
  }

  #[tokio::test]
  async fn test_resume_without_start_fails() {
    let result = plugin()
      .resume(
        &ctx(),
        &mut StateManager::new(),
        &mut StateManager::new(),
        &ResumePayload::default(),
      )
      .await;
    assert!(matches!(result, Err(TaskError::State { .. })));
  }
}
