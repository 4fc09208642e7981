use serde::{Deserialize, Serialize};

/// Returned when a stored or user supplied string does not name a variant.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid {kind}: {value}")]
pub struct ParseEnumError {
  pub kind: &'static str,
  pub value: String,
}

/// Implements `as_str`, `Display` and `FromStr` using the wire names.
#[doc(hidden)]
#[macro_export]
macro_rules! wire_names {
  ($ty:ident, $kind:literal, { $($variant:ident => $name:literal),+ $(,)? }) => {
    impl $ty {
      pub fn as_str(&self) -> &'static str {
        match self {
          $(Self::$variant => $name,)+
        }
      }
    }

    impl ::std::fmt::Display for $ty {
      fn fmt(&self, f: &mut ::std::fmt::Formatter<'_>) -> ::std::fmt::Result {
        f.write_str(self.as_str())
      }
    }

    impl ::std::str::FromStr for $ty {
      type Err = $crate::ParseEnumError;

      fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
          $($name => Ok(Self::$variant),)+
          other => Err($crate::ParseEnumError {
            kind: $kind,
            value: other.to_string(),
          }),
        }
      }
    }
  };
}

/// The kind of plugin that runs a workflow node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskType {
  SimpleForm,
  WaitForEvent,
  Payment,
}

wire_names!(TaskType, "task type", {
  SimpleForm => "SIMPLE_FORM",
  WaitForEvent => "WAIT_FOR_EVENT",
  Payment => "PAYMENT",
});

/// Direction of a consignment through customs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TradeFlow {
  Import,
  Export,
}

wire_names!(TradeFlow, "trade flow", {
  Import => "IMPORT",
  Export => "EXPORT",
});

/// Lifecycle status of a task instance as reported by its plugin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
  /// Created and persisted, not yet started.
  Initialized,
  /// Waiting for a human to act (form, payment).
  AwaitingInput,
  /// Waiting on an external system.
  InProgress,
  Completed,
  Failed,
}

wire_names!(TaskStatus, "task status", {
  Initialized => "INITIALIZED",
  AwaitingInput => "AWAITING_INPUT",
  InProgress => "IN_PROGRESS",
  Completed => "COMPLETED",
  Failed => "FAILED",
});

impl TaskStatus {
  /// Whether the status ends the task's lifecycle.
  pub fn is_terminal(&self) -> bool {
    matches!(self, Self::Completed | Self::Failed)
  }
}

/// How far a task has progressed through its plugin's lifecycle.
///
/// Kept next to [`TaskStatus`] because a `FAILED` status alone does not say
/// whether the plugin decided the outcome or errored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskPhase {
  /// No start has succeeded yet.
  #[default]
  Pending,
  /// Started; accepts resumes.
  Started,
  /// The plugin reported a terminal status. No further input is accepted.
  Finished,
}

wire_names!(TaskPhase, "task phase", {
  Pending => "PENDING",
  Started => "STARTED",
  Finished => "FINISHED",
});
