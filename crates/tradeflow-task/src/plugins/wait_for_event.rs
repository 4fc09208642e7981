use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::info;

use crate::{
  ExternalNotifier, PluginResult, ResumePayload, StateManager, TaskContext, TaskError, TaskPlugin,
};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WaitForEventConfig {
  /// Where to announce the task; the service later resumes it with `action = "complete"`.
  #[serde(default)]
  pub external_service_url: String,
}

/// Hands the task to an external service and waits for its callback.
pub struct WaitForEvent {
  notifier: ExternalNotifier,
}

impl WaitForEvent {
  pub fn new(notifier: ExternalNotifier) -> Self {
    Self { notifier }
  }
}

#[async_trait]
impl TaskPlugin for WaitForEvent {
  async fn start(
    &self,
    ctx: &TaskContext,
    config: &serde_json::Value,
    _local: &mut StateManager,
    global: &mut StateManager,
  ) -> Result<PluginResult, TaskError> {
    let config: WaitForEventConfig = serde_json::from_value(config.clone())
      .map_err(|e| TaskError::invalid_input("config", e.to_string()))?;
    if config.external_service_url.is_empty() {
      return Err(TaskError::MissingInput {
        field: "externalServiceUrl".to_string(),
      });
    }

    let task_id = global.get_str("taskId").unwrap_or(ctx.task_id.as_str()).to_string();
    let consignment_id = global
      .get_str("consignmentId")
      .unwrap_or(ctx.consignment_id.as_str())
      .to_string();

    // Detached: the request that started this task may finish long before
    // the external service answers.
    self.notifier.notify_detached(
      config.external_service_url.clone(),
      json!({"consignmentId": consignment_id, "taskId": task_id}),
      task_id,
      consignment_id,
    );

    Ok(PluginResult::in_progress(json!({
      "message": "Notified external service, waiting for callback",
    })))
  }

  async fn resume(
    &self,
    ctx: &TaskContext,
    _local: &mut StateManager,
    _global: &mut StateManager,
    input: &ResumePayload,
  ) -> Result<PluginResult, TaskError> {
    if input.action == "complete" {
      info!(
        task_id = %ctx.task_id,
        consignment_id = %ctx.consignment_id,
        "task completion received from external service"
      );
      return Ok(PluginResult::completed(input.content.clone()));
    }

    Ok(PluginResult::in_progress(json!({
      "message": format!("ignored action '{}', still waiting for callback", input.action),
    })))
  }
}
