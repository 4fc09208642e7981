//! Tradeflow Task Manager
//!
//! Turns workflow nodes into running tasks. The [`TaskManager`] builds
//! plugins through an injected [`PluginRegistry`], persists every task step
//! through the store, caches live containers, and reports resumed tasks to
//! the orchestrator over a bounded completion channel.
//!
//! Completion sends never block: when the channel is full the notification
//! is dropped and counted (see [`CompletionSender::dropped`]).

mod error;
mod manager;
mod notification;
mod registry;
mod types;

pub use error::ManagerError;
pub use manager::{CONSIGNMENT_ID_KEY, TASK_ID_KEY, TaskHandle, TaskManager};
pub use notification::{CompletionNotification, CompletionSender, completion_channel};
pub use registry::{PluginFactory, PluginRegistry};
pub use types::{ExecuteTaskRequest, ExecuteTaskResponse, InitTaskRequest, TaskOutcome};
