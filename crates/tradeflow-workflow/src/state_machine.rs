//! Dependency state machine over a consignment's workflow nodes.

use std::collections::{HashMap, HashSet};

use chrono::Utc;
use tracing::{debug, info};

use crate::{NodeRepository, NodeState, TemplateGraph, WorkflowError, WorkflowNode, WorkflowNodeTemplate};

/// Nodes created for a consignment.
#[derive(Debug, Clone, Default)]
pub struct InitializedNodes {
  pub nodes: Vec<WorkflowNode>,
  /// Nodes without dependencies, already `READY`.
  pub newly_ready: Vec<WorkflowNode>,
}

/// Result of applying one transition.
///
/// An empty transition (no updated nodes) means the call was a no-op.
#[derive(Debug, Clone, Default)]
pub struct StateTransition {
  /// Every node written, ordered by id.
  pub updated_nodes: Vec<WorkflowNode>,
  /// Nodes that moved from `LOCKED` to `READY`, ordered by id.
  pub newly_ready: Vec<WorkflowNode>,
  /// Whether every node of the consignment is now `COMPLETED`.
  pub all_completed: bool,
}

impl StateTransition {
  pub fn is_noop(&self) -> bool {
    self.updated_nodes.is_empty()
  }
}

/// Applies node transitions and unlocks dependents.
///
/// Holds no state. All reads and writes go through the repository passed to
/// each call, so a caller wrapping one transaction gets an atomic update.
#[derive(Debug, Clone, Copy, Default)]
pub struct DependencyStateMachine;

impl DependencyStateMachine {
  pub fn new() -> Self {
    Self
  }

  /// Create one node per template for a consignment.
  ///
  /// Template dependencies are resolved to node ids. Nodes without
  /// dependencies start `READY`, the rest `LOCKED`. Duplicate templates are
  /// instantiated once.
  pub async fn initialize_nodes_from_templates<R>(
    &self,
    repo: &mut R,
    consignment_id: &str,
    templates: &[WorkflowNodeTemplate],
  ) -> Result<InitializedNodes, WorkflowError>
  where
    R: NodeRepository + ?Sized,
  {
    let mut seen = HashSet::new();
    let templates: Vec<WorkflowNodeTemplate> = templates
      .iter()
      .filter(|t| seen.insert(t.id.clone()))
      .cloned()
      .collect();

    let graph = TemplateGraph::new(&templates)?;

    let node_ids: HashMap<&str, String> = templates
      .iter()
      .map(|t| (t.id.as_str(), uuid::Uuid::new_v4().to_string()))
      .collect();

    let now = Utc::now();
    let mut nodes = Vec::with_capacity(templates.len());
    for template_id in graph.order() {
      let depends_on: Vec<String> = graph
        .upstream(template_id)
        .iter()
        .filter_map(|dep| node_ids.get(dep.as_str()).cloned())
        .collect();
      let state = if graph.entry_points().contains(template_id) {
        NodeState::Ready
      } else {
        NodeState::Locked
      };
      let id = node_ids
        .get(template_id.as_str())
        .cloned()
        .ok_or_else(|| WorkflowError::TemplateNotFound(template_id.clone()))?;

      nodes.push(WorkflowNode {
        id,
        consignment_id: consignment_id.to_string(),
        template_id: template_id.clone(),
        state,
        depends_on,
        created_at: now,
        updated_at: now,
      });
    }
    nodes.sort_by(|a, b| a.id.cmp(&b.id));

    repo.save_nodes(&nodes).await?;

    let newly_ready: Vec<WorkflowNode> = nodes
      .iter()
      .filter(|n| n.state == NodeState::Ready)
      .cloned()
      .collect();

    info!(
      consignment_id = %consignment_id,
      nodes = nodes.len(),
      ready = newly_ready.len(),
      "workflow nodes initialized"
    );

    Ok(InitializedNodes { nodes, newly_ready })
  }

  /// Mark a node `COMPLETED` and unlock dependents whose dependencies are now
  /// all completed.
  ///
  /// Completing an already completed node is a no-op.
  pub async fn transition_to_completed<R>(
    &self,
    repo: &mut R,
    node: &WorkflowNode,
  ) -> Result<StateTransition, WorkflowError>
  where
    R: NodeRepository + ?Sized,
  {
    match node.state {
      NodeState::Completed => {
        debug!(node_id = %node.id, "node already completed");
        return Ok(StateTransition::default());
      }
      NodeState::Ready | NodeState::InProgress => {}
      from => {
        return Err(WorkflowError::IllegalTransition {
          node_id: node.id.clone(),
          from,
          to: NodeState::Completed,
        });
      }
    }

    let siblings = repo.list_nodes(&node.consignment_id).await?;

    let completed_ids: HashSet<&str> = siblings
      .iter()
      .filter(|n| n.state == NodeState::Completed)
      .map(|n| n.id.as_str())
      .chain(std::iter::once(node.id.as_str()))
      .collect();

    let mut updated_nodes = vec![node.with_state(NodeState::Completed)];
    let mut newly_ready = Vec::new();

    for sibling in &siblings {
      if sibling.id == node.id || sibling.state != NodeState::Locked {
        continue;
      }
      let unlocked = sibling
        .depends_on
        .iter()
        .all(|dep| completed_ids.contains(dep.as_str()));
      if unlocked {
        info!(node_id = %sibling.id, unlocked_by = %node.id, "node unlocked");
        let ready = sibling.with_state(NodeState::Ready);
        updated_nodes.push(ready.clone());
        newly_ready.push(ready);
      }
    }

    // Fixed write order keeps concurrent transactions from deadlocking.
    updated_nodes.sort_by(|a, b| a.id.cmp(&b.id));
    newly_ready.sort_by(|a, b| a.id.cmp(&b.id));

    repo.save_nodes(&updated_nodes).await?;

    let all_completed = siblings
      .iter()
      .all(|n| completed_ids.contains(n.id.as_str()));

    Ok(StateTransition {
      updated_nodes,
      newly_ready,
      all_completed,
    })
  }

  /// Mark a node `FAILED`. Dependents stay locked.
  ///
  /// Failing an already failed node is a no-op.
  pub async fn transition_to_failed<R>(
    &self,
    repo: &mut R,
    node: &WorkflowNode,
  ) -> Result<StateTransition, WorkflowError>
  where
    R: NodeRepository + ?Sized,
  {
    match node.state {
      NodeState::Failed => Ok(StateTransition::default()),
      NodeState::Completed => Err(WorkflowError::IllegalTransition {
        node_id: node.id.clone(),
        from: NodeState::Completed,
        to: NodeState::Failed,
      }),
      _ => {
        let failed = node.with_state(NodeState::Failed);
        repo.save_nodes(std::slice::from_ref(&failed)).await?;
        info!(node_id = %node.id, consignment_id = %node.consignment_id, "node failed");
        Ok(StateTransition {
          updated_nodes: vec![failed],
          newly_ready: Vec::new(),
          all_completed: false,
        })
      }
    }
  }

  /// Mark a `READY` node as started.
  ///
  /// The node is re-read from the repository first, so a caller holding an
  /// older copy cannot move a node that has since finished. A node that is
  /// already in progress, completed or failed is left alone.
  pub async fn transition_to_in_progress<R>(
    &self,
    repo: &mut R,
    node: &WorkflowNode,
  ) -> Result<StateTransition, WorkflowError>
  where
    R: NodeRepository + ?Sized,
  {
    let current = repo.get_node(&node.id).await?;
    match current.state {
      NodeState::InProgress => Ok(StateTransition::default()),
      NodeState::Completed | NodeState::Failed => {
        debug!(node_id = %current.id, state = %current.state, "node already finished, not starting");
        Ok(StateTransition::default())
      }
      NodeState::Ready => {
        let started = current.with_state(NodeState::InProgress);
        repo.save_nodes(std::slice::from_ref(&started)).await?;
        Ok(StateTransition {
          updated_nodes: vec![started],
          newly_ready: Vec::new(),
          all_completed: false,
        })
      }
      NodeState::Locked => Err(WorkflowError::IllegalTransition {
        node_id: current.id.clone(),
        from: NodeState::Locked,
        to: NodeState::InProgress,
      }),
    }
  }
}
