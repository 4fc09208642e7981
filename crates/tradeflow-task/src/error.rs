use thiserror::Error;

/// Errors that can occur during task execution.
#[derive(Debug, Error)]
pub enum TaskError {
  /// Missing required input field.
  #[error("missing required input: {field}")]
  MissingInput { field: String },

  /// Invalid input value.
  #[error("invalid input '{field}': {message}")]
  InvalidInput { field: String, message: String },

  /// HTTP request failed.
  #[error("http error: {0}")]
  Http(#[from] reqwest::Error),

  /// An external service answered with a non-retryable status.
  #[error("request to {url} rejected with status {status}")]
  Rejected { url: String, status: u16 },

  /// Every attempt of an outbound call failed.
  #[error("gave up after {attempts} attempts: {last_error}")]
  RetriesExhausted { attempts: u32, last_error: String },

  /// Plugin logic failed.
  #[error("plugin error: {message}")]
  Plugin { message: String },

  /// Plugin panicked; the panic was contained.
  #[error("plugin panicked: {message}")]
  Panicked { message: String },

  /// Task timed out.
  #[error("task timed out after {timeout_ms}ms")]
  Timeout { timeout_ms: u64 },

  /// The operation was cancelled.
  #[error("cancelled")]
  Cancelled,

  /// Form registry failure.
  #[error("form error: {message}")]
  Form { message: String },

  /// A stored state document could not be read.
  #[error("state error: {message}")]
  State { message: String },

  #[error("io error: {0}")]
  Io(#[from] std::io::Error),

  #[error("json error: {0}")]
  Json(#[from] serde_json::Error),
}

impl TaskError {
  pub fn plugin(message: impl Into<String>) -> Self {
    Self::Plugin {
      message: message.into(),
    }
  }

  pub fn invalid_input(field: impl Into<String>, message: impl Into<String>) -> Self {
    Self::InvalidInput {
      field: field.into(),
      message: message.into(),
    }
  }
}
