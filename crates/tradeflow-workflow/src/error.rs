use thiserror::Error;

use crate::NodeState;

#[derive(Debug, Error)]
pub enum WorkflowError {
  #[error("workflow node not found: {0}")]
  NodeNotFound(String),

  #[error("node template not found: {0}")]
  TemplateNotFound(String),

  #[error("node template {template_id} depends on unknown template {depends_on}")]
  UnknownDependency {
    template_id: String,
    depends_on: String,
  },

  #[error("node template {template_id} is part of a dependency cycle")]
  DependencyCycle { template_id: String },

  #[error("illegal transition for node {node_id}: {from} -> {to}")]
  IllegalTransition {
    node_id: String,
    from: NodeState,
    to: NodeState,
  },

  #[error("repository error: {0}")]
  Repository(#[source] Box<dyn std::error::Error + Send + Sync>),
}
