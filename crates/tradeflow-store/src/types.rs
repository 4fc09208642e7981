use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use sqlx::types::Json;
use tradeflow_config::{TaskPhase, TaskStatus, TaskType};
use tradeflow_workflow::{
  Consignment, ConsignmentItem, WorkflowNode, WorkflowNodeTemplate, WorkflowTemplate,
};

use crate::Error;

/// A task instance as stored in the database.
///
/// The id is shared with the workflow node the task runs for.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskRecord {
  pub id: String,
  /// Node template the task was created from.
  pub step_id: String,
  pub consignment_id: String,
  pub task_type: TaskType,
  pub status: TaskStatus,
  pub phase: TaskPhase,
  pub config: serde_json::Value,
  /// Serialized task-private state document.
  pub local_state: serde_json::Value,
  /// Serialized global context document as last seen by the task.
  pub global_context: serde_json::Value,
  pub created_at: DateTime<Utc>,
  pub updated_at: DateTime<Utc>,
}

#[derive(Debug, FromRow)]
pub(crate) struct TaskRow {
  pub id: String,
  pub step_id: String,
  pub consignment_id: String,
  pub task_type: String,
  pub status: String,
  pub phase: String,
  pub config: Json<serde_json::Value>,
  pub local_state: Json<serde_json::Value>,
  pub global_context: Json<serde_json::Value>,
  pub created_at: DateTime<Utc>,
  pub updated_at: DateTime<Utc>,
}

impl TryFrom<TaskRow> for TaskRecord {
  type Error = Error;

  fn try_from(row: TaskRow) -> Result<Self, Error> {
    Ok(Self {
      id: row.id,
      step_id: row.step_id,
      consignment_id: row.consignment_id,
      task_type: row.task_type.parse()?,
      status: row.status.parse()?,
      phase: row.phase.parse()?,
      config: row.config.0,
      local_state: row.local_state.0,
      global_context: row.global_context.0,
      created_at: row.created_at,
      updated_at: row.updated_at,
    })
  }
}

#[derive(Debug, FromRow)]
pub(crate) struct ConsignmentRow {
  pub id: String,
  pub flow: String,
  pub trader_id: String,
  pub state: String,
  pub items: Json<Vec<ConsignmentItem>>,
  pub global_context: Json<serde_json::Map<String, serde_json::Value>>,
  pub created_at: DateTime<Utc>,
  pub updated_at: DateTime<Utc>,
}

impl TryFrom<ConsignmentRow> for Consignment {
  type Error = Error;

  fn try_from(row: ConsignmentRow) -> Result<Self, Error> {
    Ok(Self {
      id: row.id,
      flow: row.flow.parse()?,
      trader_id: row.trader_id,
      state: row.state.parse()?,
      items: row.items.0,
      global_context: row.global_context.0,
      created_at: row.created_at,
      updated_at: row.updated_at,
    })
  }
}

#[derive(Debug, FromRow)]
pub(crate) struct NodeRow {
  pub id: String,
  pub consignment_id: String,
  pub template_id: String,
  pub state: String,
  pub depends_on: Json<Vec<String>>,
  pub created_at: DateTime<Utc>,
  pub updated_at: DateTime<Utc>,
}

impl TryFrom<NodeRow> for WorkflowNode {
  type Error = Error;

  fn try_from(row: NodeRow) -> Result<Self, Error> {
    Ok(Self {
      id: row.id,
      consignment_id: row.consignment_id,
      template_id: row.template_id,
      state: row.state.parse()?,
      depends_on: row.depends_on.0,
      created_at: row.created_at,
      updated_at: row.updated_at,
    })
  }
}

#[derive(Debug, FromRow)]
pub(crate) struct NodeTemplateRow {
  pub id: String,
  pub task_type: String,
  pub config: Json<serde_json::Value>,
  pub depends_on: Json<Vec<String>>,
}

impl TryFrom<NodeTemplateRow> for WorkflowNodeTemplate {
  type Error = Error;

  fn try_from(row: NodeTemplateRow) -> Result<Self, Error> {
    Ok(Self {
      id: row.id,
      task_type: row.task_type.parse()?,
      config: row.config.0,
      depends_on: row.depends_on.0,
    })
  }
}

#[derive(Debug, FromRow)]
pub(crate) struct WorkflowTemplateRow {
  pub id: String,
  pub name: String,
  pub version: String,
  pub node_template_ids: Json<Vec<String>>,
}

impl From<WorkflowTemplateRow> for WorkflowTemplate {
  fn from(row: WorkflowTemplateRow) -> Self {
    Self {
      id: row.id,
      name: row.name,
      version: row.version,
      node_template_ids: row.node_template_ids.0,
    }
  }
}
