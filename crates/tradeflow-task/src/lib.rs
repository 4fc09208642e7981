//! Tradeflow Task
//!
//! This crate runs task logic for workflow nodes.
//!
//! ```text
//!   TaskManager ──> TaskContainer ──> dyn TaskPlugin (SimpleForm | WaitForEvent | Payment)
//!                    │  timeout              │
//!                    │  panic recovery       ├──> FormRegistry
//!                    │  local StateManager   └──> ExternalNotifier (detached, retried)
//!                    └  global StateManager
//! ```
//!
//! A [`TaskPlugin`] has a two-phase lifecycle: `start` on activation and
//! `resume` for every later external input. Plugins are only ever called
//! through a [`TaskContainer`], which bounds each call with a timeout and
//! turns panics into [`TaskError::Panicked`].

mod container;
mod error;
mod forms;
mod notifier;
mod plugin;
pub mod plugins;
mod state;

pub use container::{DEFAULT_EXECUTION_TIMEOUT, TaskContainer, TaskIdentity};
pub use error::TaskError;
pub use forms::{FormDefinition, FormRegistry, FsFormRegistry, InMemoryFormRegistry};
pub use notifier::{ExternalNotifier, RetryPolicy};
pub use plugin::{PluginResult, ResumePayload, TaskContext, TaskPlugin};
pub use state::{STATE_DOCUMENT_VERSION, StateDocument, StateManager};
pub use tradeflow_config::{TaskStatus, TaskType};
