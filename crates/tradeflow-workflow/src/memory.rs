//! In-memory node repository, used by tests and dry runs.

use std::collections::HashMap;

use async_trait::async_trait;

use crate::{NodeRepository, WorkflowError, WorkflowNode};

#[derive(Debug, Default)]
pub struct InMemoryNodeRepository {
  nodes: HashMap<String, WorkflowNode>,
  batches: Vec<Vec<String>>,
}

impl InMemoryNodeRepository {
  pub fn new() -> Self {
    Self::default()
  }

  /// Current copy of a node, if present.
  pub fn node(&self, node_id: &str) -> Option<&WorkflowNode> {
    self.nodes.get(node_id)
  }

  /// Node ids of every `save_nodes` call, in write order.
  pub fn batches(&self) -> &[Vec<String>] {
    &self.batches
  }
}

#[async_trait]
impl NodeRepository for InMemoryNodeRepository {
  async fn get_node(&mut self, node_id: &str) -> Result<WorkflowNode, WorkflowError> {
    self
      .nodes
      .get(node_id)
      .cloned()
      .ok_or_else(|| WorkflowError::NodeNotFound(node_id.to_string()))
  }

  async fn list_nodes(&mut self, consignment_id: &str) -> Result<Vec<WorkflowNode>, WorkflowError> {
    let mut nodes: Vec<WorkflowNode> = self
      .nodes
      .values()
      .filter(|n| n.consignment_id == consignment_id)
      .cloned()
      .collect();
    nodes.sort_by(|a, b| a.id.cmp(&b.id));
    Ok(nodes)
  }

  async fn save_nodes(&mut self, nodes: &[WorkflowNode]) -> Result<(), WorkflowError> {
    self
      .batches
      .push(nodes.iter().map(|n| n.id.clone()).collect());
    for node in nodes {
      self.nodes.insert(node.id.clone(), node.clone());
    }
    Ok(())
  }
}
