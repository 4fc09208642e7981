use serde::{Deserialize, Serialize};
use tradeflow_config::{TaskStatus, TaskType};
use tradeflow_task::ResumePayload;

use crate::ManagerError;

/// Everything needed to create a task for a ready workflow node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitTaskRequest {
  /// Shared with the workflow node.
  pub task_id: String,
  pub consignment_id: String,
  /// Node template the task comes from.
  pub step_id: String,
  pub task_type: TaskType,
  #[serde(default)]
  pub config: serde_json::Value,
  /// The consignment's global context at activation time.
  #[serde(default)]
  pub global_context: serde_json::Map<String, serde_json::Value>,
}

/// Resume request for a running task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecuteTaskRequest {
  pub task_id: String,
  /// Checked against the task when present.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub consignment_id: Option<String>,
  #[serde(default)]
  pub payload: ResumePayload,
}

/// Result of a task step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskOutcome {
  pub task_id: String,
  pub status: TaskStatus,
  pub data: serde_json::Value,
  /// Global context keys written during the step.
  pub append_global_context: serde_json::Map<String, serde_json::Value>,
}

/// Response body for an execute request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecuteTaskResponse {
  pub success: bool,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub status: Option<TaskStatus>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub result: Option<serde_json::Value>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub error: Option<String>,
}

impl From<Result<TaskOutcome, ManagerError>> for ExecuteTaskResponse {
  fn from(result: Result<TaskOutcome, ManagerError>) -> Self {
    match result {
      Ok(outcome) => Self {
        success: true,
        status: Some(outcome.status),
        result: Some(outcome.data),
        error: None,
      },
      Err(e) => Self {
        success: false,
        status: None,
        result: None,
        error: Some(e.to_string()),
      },
    }
  }
}
