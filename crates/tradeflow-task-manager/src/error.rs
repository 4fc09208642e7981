use thiserror::Error;
use tradeflow_config::TaskType;

/// Errors from task lifecycle operations.
#[derive(Debug, Error)]
pub enum ManagerError {
  /// No plugin factory is registered for the task type.
  #[error("unknown task type: {0}")]
  UnknownTaskType(TaskType),

  /// The task has no persisted record.
  #[error("task not found: {0}")]
  NotFound(String),

  /// The request does not match the task it names.
  #[error("invalid request: {message}")]
  InvalidRequest { message: String },

  /// The plugin reported a final status; the task accepts no more input.
  #[error("task {task_id} has already finished")]
  TaskFinished { task_id: String },

  #[error("store error: {0}")]
  Store(#[source] tradeflow_store::Error),

  #[error(transparent)]
  Task(#[from] tradeflow_task::TaskError),
}

impl From<tradeflow_store::Error> for ManagerError {
  fn from(err: tradeflow_store::Error) -> Self {
    match err {
      tradeflow_store::Error::NotFound(what) => Self::NotFound(what),
      other => Self::Store(other),
    }
  }
}
