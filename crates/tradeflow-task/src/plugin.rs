use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tradeflow_config::TaskStatus;

use crate::{StateManager, TaskError};

/// Identity and cancellation scope of one plugin invocation.
#[derive(Debug, Clone)]
pub struct TaskContext {
  pub task_id: String,
  pub consignment_id: String,
  /// Cancelled when the invocation returns or times out.
  pub cancel: CancellationToken,
}

/// What a plugin hands back from `start` or `resume`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PluginResult {
  pub status: TaskStatus,
  #[serde(default)]
  pub data: serde_json::Value,
}

impl PluginResult {
  pub fn new(status: TaskStatus, data: serde_json::Value) -> Self {
    Self { status, data }
  }

  pub fn completed(data: serde_json::Value) -> Self {
    Self::new(TaskStatus::Completed, data)
  }

  pub fn awaiting_input(data: serde_json::Value) -> Self {
    Self::new(TaskStatus::AwaitingInput, data)
  }

  pub fn in_progress(data: serde_json::Value) -> Self {
    Self::new(TaskStatus::InProgress, data)
  }
}

/// External input delivered to `resume`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResumePayload {
  #[serde(default)]
  pub action: String,
  #[serde(default)]
  pub content: serde_json::Value,
}

/// A unit of task logic with a two-phase lifecycle.
///
/// `start` runs once when the task is activated; `resume` runs for every
/// later external input. Anything the plugin needs between calls goes into
/// `local`; writes to `global` are merged into the consignment's global
/// context when the task reports back.
#[async_trait]
pub trait TaskPlugin: Send + Sync {
  async fn start(
    &self,
    ctx: &TaskContext,
    config: &serde_json::Value,
    local: &mut StateManager,
    global: &mut StateManager,
  ) -> Result<PluginResult, TaskError>;

  async fn resume(
    &self,
    ctx: &TaskContext,
    local: &mut StateManager,
    global: &mut StateManager,
    input: &ResumePayload,
  ) -> Result<PluginResult, TaskError>;
}
