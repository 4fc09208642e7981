use serde::{Deserialize, Serialize};
use tradeflow_config::TradeFlow;
use tradeflow_workflow::{Consignment, ConsignmentItem, WorkflowNode};

/// A trader's consignment submission.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateConsignmentRequest {
  pub flow: TradeFlow,
  pub trader_id: String,
  pub items: Vec<ConsignmentItem>,
  /// Initial global context.
  #[serde(default)]
  pub global_context: serde_json::Map<String, serde_json::Value>,
}

/// A consignment together with its workflow nodes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsignmentView {
  pub consignment: Consignment,
  /// Ordered by node ID.
  pub nodes: Vec<WorkflowNode>,
}

impl ConsignmentView {
  /// The node instantiated from a template, if any.
  pub fn node_for_template(&self, template_id: &str) -> Option<&WorkflowNode> {
    self.nodes.iter().find(|n| n.template_id == template_id)
  }
}
