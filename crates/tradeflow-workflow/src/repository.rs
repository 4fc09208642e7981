use async_trait::async_trait;

use crate::{WorkflowError, WorkflowNode};

/// Node persistence as seen by the state machine.
///
/// Implementations are expected to be scoped to a single transaction, so
/// methods take `&mut self`.
#[async_trait]
pub trait NodeRepository: Send {
  /// Get a node by ID.
  async fn get_node(&mut self, node_id: &str) -> Result<WorkflowNode, WorkflowError>;

  /// List every node belonging to a consignment.
  async fn list_nodes(&mut self, consignment_id: &str) -> Result<Vec<WorkflowNode>, WorkflowError>;

  /// Insert or update nodes, in the order given.
  async fn save_nodes(&mut self, nodes: &[WorkflowNode]) -> Result<(), WorkflowError>;
}
