//! Supervised execution of one task instance.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument, warn};
use tradeflow_config::{TaskPhase, TaskStatus, TaskType};

use crate::{PluginResult, ResumePayload, StateManager, TaskContext, TaskError, TaskPlugin};

/// Default upper bound for a single plugin call.
pub const DEFAULT_EXECUTION_TIMEOUT: Duration = Duration::from_secs(60);

/// Identity and configuration of a task instance.
#[derive(Debug, Clone)]
pub struct TaskIdentity {
  pub task_id: String,
  pub consignment_id: String,
  /// Node template the task was created from.
  pub step_id: String,
  pub task_type: TaskType,
}

/// Runs one task's plugin with panic recovery and a timeout.
///
/// The container is the only caller of [`TaskPlugin`] methods. It owns the
/// task's local state and global context view. A plugin error, panic or
/// timeout leaves the container in [`TaskStatus::Failed`] and is returned as
/// an error; it never unwinds past the container.
///
/// Alongside the status the container tracks a [`TaskPhase`]. It only moves
/// forward on an `Ok` plugin result, so a failed start stays `Pending` and a
/// plugin that errors mid-task stays `Started`.
pub struct TaskContainer {
  identity: TaskIdentity,
  config: serde_json::Value,
  plugin: Arc<dyn TaskPlugin>,
  local_state: StateManager,
  global_state: StateManager,
  status: TaskStatus,
  phase: TaskPhase,
  timeout: Duration,
}

impl std::fmt::Debug for TaskContainer {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("TaskContainer")
      .field("identity", &self.identity)
      .field("config", &self.config)
      .field("local_state", &self.local_state)
      .field("global_state", &self.global_state)
      .field("status", &self.status)
      .field("phase", &self.phase)
      .field("timeout", &self.timeout)
      .finish_non_exhaustive()
  }
}

impl TaskContainer {
  pub fn new(
    identity: TaskIdentity,
    config: serde_json::Value,
    plugin: Arc<dyn TaskPlugin>,
    local_state: StateManager,
    global_state: StateManager,
  ) -> Self {
    Self {
      identity,
      config,
      plugin,
      local_state,
      global_state,
      status: TaskStatus::Initialized,
      phase: TaskPhase::Pending,
      timeout: DEFAULT_EXECUTION_TIMEOUT,
    }
  }

  pub fn with_timeout(mut self, timeout: Duration) -> Self {
    self.timeout = timeout;
    self
  }

  /// Restore the status a rehydrated container had when it was persisted.
  pub fn with_status(mut self, status: TaskStatus) -> Self {
    self.status = status;
    self
  }

  pub fn with_phase(mut self, phase: TaskPhase) -> Self {
    self.phase = phase;
    self
  }

  pub fn identity(&self) -> &TaskIdentity {
    &self.identity
  }

  pub fn task_id(&self) -> &str {
    &self.identity.task_id
  }

  pub fn config(&self) -> &serde_json::Value {
    &self.config
  }

  pub fn status(&self) -> TaskStatus {
    self.status
  }

  pub fn phase(&self) -> TaskPhase {
    self.phase
  }

  pub fn local_state(&self) -> &StateManager {
    &self.local_state
  }

  pub fn global_state(&self) -> &StateManager {
    &self.global_state
  }

  /// Keys the plugin wrote to the global context since the last call.
  pub fn take_global_changes(&mut self) -> serde_json::Map<String, serde_json::Value> {
    self.global_state.take_changes()
  }

  /// First activation: run the plugin's `start` with this task's config.
  #[instrument(
    name = "task_execute",
    skip(self, cancel),
    fields(
      task_id = %self.identity.task_id,
      consignment_id = %self.identity.consignment_id,
      task_type = %self.identity.task_type,
    )
  )]
  pub async fn execute(&mut self, cancel: &CancellationToken) -> Result<PluginResult, TaskError> {
    let ctx = self.context(cancel);
    let outcome = supervise(
      self
        .plugin
        .start(&ctx, &self.config, &mut self.local_state, &mut self.global_state),
      self.timeout,
      &ctx,
    )
    .await;
    self.settle(outcome)
  }

  /// Later activation: run the plugin's `resume` with external input.
  #[instrument(
    name = "task_resume",
    skip(self, cancel, input),
    fields(
      task_id = %self.identity.task_id,
      consignment_id = %self.identity.consignment_id,
      action = %input.action,
    )
  )]
  pub async fn process_resume(
    &mut self,
    cancel: &CancellationToken,
    input: &ResumePayload,
  ) -> Result<PluginResult, TaskError> {
    let ctx = self.context(cancel);
    let outcome = supervise(
      self
        .plugin
        .resume(&ctx, &mut self.local_state, &mut self.global_state, input),
      self.timeout,
      &ctx,
    )
    .await;
    self.settle(outcome)
  }

  fn context(&self, cancel: &CancellationToken) -> TaskContext {
    TaskContext {
      task_id: self.identity.task_id.clone(),
      consignment_id: self.identity.consignment_id.clone(),
      cancel: cancel.child_token(),
    }
  }

  fn settle(
    &mut self,
    outcome: Result<PluginResult, TaskError>,
  ) -> Result<PluginResult, TaskError> {
    match outcome {
      Ok(result) => {
        info!(status = %result.status, "task step finished");
        self.status = result.status;
        self.phase = if result.status.is_terminal() {
          TaskPhase::Finished
        } else {
          TaskPhase::Started
        };
        Ok(result)
      }
      Err(e) => {
        error!(error = %e, "task step failed");
        self.status = TaskStatus::Failed;
        Err(e)
      }
    }
  }
}

/// Await a plugin future under a deadline, converting panics to errors.
///
/// The invocation's cancellation token is cancelled on every exit path.
async fn supervise<F>(fut: F, timeout: Duration, ctx: &TaskContext) -> Result<PluginResult, TaskError>
where
  F: Future<Output = Result<PluginResult, TaskError>>,
{
  let _cancel_on_return = ctx.cancel.clone().drop_guard();

  match tokio::time::timeout(timeout, AssertUnwindSafe(fut).catch_unwind()).await {
    Ok(Ok(result)) => result,
    Ok(Err(panic)) => {
      let message = panic_message(panic.as_ref());
      error!(
        task_id = %ctx.task_id,
        panic = %message,
        "plugin panicked"
      );
      Err(TaskError::Panicked { message })
    }
    Err(_) => {
      let timeout_ms = timeout.as_millis() as u64;
      warn!(task_id = %ctx.task_id, timeout_ms, "plugin timed out");
      Err(TaskError::Timeout { timeout_ms })
    }
  }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
  if let Some(s) = payload.downcast_ref::<&str>() {
    s.to_string()
  } else if let Some(s) = payload.downcast_ref::<String>() {
    s.clone()
  } else {
    "unknown panic payload".to_string()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use async_trait::async_trait;
  use serde_json::json;

  /// Test plugin whose behaviour is chosen by the `mode` config key.
  struct ScriptedPlugin;

  #[async_trait]
  impl TaskPlugin for ScriptedPlugin {
    async fn start(
      &self,
      ctx: &TaskContext,
      config: &serde_json::Value,
      local: &mut StateManager,
      _global: &mut StateManager,
    ) -> Result<PluginResult, TaskError> {
      local.set("started", true);
      match config["mode"].as_str().unwrap_or_default() {
        "panic" => panic!("boom in {}", ctx.task_id),
        "error" => Err(TaskError::plugin("bad config")),
        "hang" => {
          ctx.cancel.cancelled().await;
          Ok(PluginResult::completed(json!("unreachable")))
        }
        _ => Ok(PluginResult::awaiting_input(json!({"form": "f-1"}))),
      }
    }

    async fn resume(
      &self,
      _ctx: &TaskContext,
      _local: &mut StateManager,
      global: &mut StateManager,
      input: &ResumePayload,
    ) -> Result<PluginResult, TaskError> {
      if input.action == "panic" {
        panic!("resume exploded");
      }
      global.set("answer", input.content.clone());
      Ok(PluginResult::completed(input.content.clone()))
    }
  }

  fn container(mode: &str) -> TaskContainer {
    TaskContainer::new(
      TaskIdentity {
        task_id: "t-1".to_string(),
        consignment_id: "c-1".to_string(),
        step_id: "s-1".to_string(),
        task_type: TaskType::SimpleForm,
      },
      json!({"mode": mode}),
      Arc::new(ScriptedPlugin),
      StateManager::new(),
      StateManager::new(),
    )
  }

  #[tokio::test]
  async fn test_execute_stores_status() {
    let mut container = container("ok");
    let result = container.execute(&CancellationToken::new()).await.unwrap();

    assert_eq!(result.status, TaskStatus::AwaitingInput);
    assert_eq!(container.status(), TaskStatus::AwaitingInput);
    assert_eq!(container.phase(), TaskPhase::Started);
    assert!(container.local_state().get_bool("started"));
  }

  #[tokio::test]
  async fn test_plugin_error_forces_failed() {
    let mut container = container("error");
    let err = container.execute(&CancellationToken::new()).await.unwrap_err();

    assert!(matches!(err, TaskError::Plugin { .. }));
    assert_eq!(container.status(), TaskStatus::Failed);
    assert_eq!(container.phase(), TaskPhase::Pending);
  }

  #[tokio::test]
  async fn test_panic_is_contained() {
    let mut container = container("panic");
    let err = container.execute(&CancellationToken::new()).await.unwrap_err();

    match err {
      TaskError::Panicked { message } => assert_eq!(message, "boom in t-1"),
      other => panic!("expected panic error, got {other:?}"),
    }
    assert_eq!(container.status(), TaskStatus::Failed);
  }

  #[tokio::test]
  async fn test_resume_panic_is_contained() {
    let mut container = container("ok");
    container.execute(&CancellationToken::new()).await.unwrap();

    let input = ResumePayload {
      action: "panic".to_string(),
      content: json!(null),
    };
    let err = container
      .process_resume(&CancellationToken::new(), &input)
      .await
      .unwrap_err();

    assert!(matches!(err, TaskError::Panicked { .. }));
    assert_eq!(container.status(), TaskStatus::Failed);
    assert_eq!(container.phase(), TaskPhase::Started);
  }

  #[tokio::test]
  async fn test_timeout_returns_promptly() {
    let mut container = container("hang").with_timeout(Duration::from_millis(50));

    let started = std::time::Instant::now();
    let err = container.execute(&CancellationToken::new()).await.unwrap_err();

    assert!(matches!(err, TaskError::Timeout { timeout_ms: 50 }));
    assert!(started.elapsed() < Duration::from_secs(5));
    assert_eq!(container.status(), TaskStatus::Failed);
  }

  #[tokio::test]
  async fn test_resume_reports_global_changes() {
    let mut container = container("ok");
    container.execute(&CancellationToken::new()).await.unwrap();

    let input = ResumePayload {
      action: "submit".to_string(),
      content: json!({"weight": 12}),
    };
    let result = container
      .process_resume(&CancellationToken::new(), &input)
      .await
      .unwrap();

    assert_eq!(result.status, TaskStatus::Completed);
    assert_eq!(container.phase(), TaskPhase::Finished);
    let changes = container.take_global_changes();
    assert_eq!(changes["answer"], json!({"weight": 12}));
  }

  #[tokio::test]
  async fn test_caller_token_survives_invocation() {
    let cancel = CancellationToken::new();
    let mut container = container("ok");
    container.execute(&cancel).await.unwrap();

    assert!(!cancel.is_cancelled());
  }
}
