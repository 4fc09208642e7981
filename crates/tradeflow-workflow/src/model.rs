use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tradeflow_config::{TaskType, TradeFlow, wire_names};

/// State of one workflow node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NodeState {
  /// Waiting on at least one dependency.
  Locked,
  /// Every dependency is completed; the task may start.
  Ready,
  InProgress,
  Completed,
  Failed,
}

wire_names!(NodeState, "node state", {
  Locked => "LOCKED",
  Ready => "READY",
  InProgress => "IN_PROGRESS",
  Completed => "COMPLETED",
  Failed => "FAILED",
});

impl NodeState {
  pub fn is_terminal(&self) -> bool {
    matches!(self, Self::Completed | Self::Failed)
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConsignmentState {
  InProgress,
  Finished,
}

wire_names!(ConsignmentState, "consignment state", {
  InProgress => "IN_PROGRESS",
  Finished => "FINISHED",
});

/// A trader's shipment. Owns the workflow nodes created for its items.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Consignment {
  pub id: String,
  pub flow: TradeFlow,
  pub trader_id: String,
  pub state: ConsignmentState,
  pub items: Vec<ConsignmentItem>,
  /// Consignment wide data shared by every task.
  pub global_context: serde_json::Map<String, serde_json::Value>,
  pub created_at: DateTime<Utc>,
  pub updated_at: DateTime<Utc>,
}

impl Consignment {
  /// Merge `append` into the global context, overwriting existing keys.
  pub fn append_global_context(&mut self, append: &serde_json::Map<String, serde_json::Value>) {
    for (key, value) in append {
      self.global_context.insert(key.clone(), value.clone());
    }
  }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsignmentItem {
  pub hs_code_id: String,
  #[serde(default)]
  pub item_metadata: serde_json::Value,
}

/// Static definition a node is instantiated from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowNodeTemplate {
  pub id: String,
  pub task_type: TaskType,
  pub config: serde_json::Value,
  /// Ids of other templates in the same workflow template.
  pub depends_on: Vec<String>,
}

/// A named set of node templates selected by HS code and trade flow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowTemplate {
  pub id: String,
  pub name: String,
  pub version: String,
  pub node_template_ids: Vec<String>,
}

/// One instance of a node template within a consignment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowNode {
  pub id: String,
  pub consignment_id: String,
  pub template_id: String,
  pub state: NodeState,
  /// Ids of nodes in the same consignment.
  pub depends_on: Vec<String>,
  pub created_at: DateTime<Utc>,
  pub updated_at: DateTime<Utc>,
}

impl WorkflowNode {
  pub(crate) fn with_state(&self, state: NodeState) -> Self {
    Self {
      state,
      updated_at: Utc::now(),
      ..self.clone()
    }
  }
}
