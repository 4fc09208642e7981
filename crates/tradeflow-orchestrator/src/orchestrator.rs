//! Completion loop and consignment lifecycle.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};
use tradeflow_config::{EngineConfig, TaskStatus};
use tradeflow_store::Store;
use tradeflow_task_manager::{
  CompletionNotification, CompletionSender, InitTaskRequest, PluginRegistry, TaskManager,
  completion_channel,
};
use tradeflow_workflow::{
  Consignment, ConsignmentState, DependencyStateMachine, NodeState,
  StateTransition, WorkflowError, WorkflowNode, WorkflowNodeTemplate,
};

use crate::{ConsignmentView, CreateConsignmentRequest, OrchestratorError};

type GlobalContext = serde_json::Map<String, serde_json::Value>;

/// Owns the completion channel and runs its single consumer.
///
/// # Usage
///
/// ```ignore
/// let orchestrator = Orchestrator::new(store, registry, &config);
///
/// // Handle for submissions and task input (HTTP handlers, CLI, ...)
/// let handle = orchestrator.handle();
///
/// // Start the completion loop
/// let cancel = CancellationToken::new();
/// tokio::spawn(orchestrator.start(cancel.clone()));
///
/// handle.create_consignment(request).await?;
/// ```
pub struct Orchestrator {
  receiver: mpsc::Receiver<CompletionNotification>,
  handle: OrchestratorHandle,
}

impl Orchestrator {
  pub fn new(store: Arc<dyn Store>, registry: Arc<PluginRegistry>, config: &EngineConfig) -> Self {
    let (sender, receiver) = completion_channel(config.channel_capacity);
    let manager = TaskManager::new(store.clone(), registry, sender.clone())
      .with_execution_timeout(config.execution_timeout())
      .with_cache_capacity(config.task_cache_capacity);

    Self {
      receiver,
      handle: OrchestratorHandle {
        store,
        manager: Arc::new(manager),
        sender,
        machine: DependencyStateMachine::new(),
      },
    }
  }

  /// Get a cloneable handle to the orchestrator's operations.
  pub fn handle(&self) -> OrchestratorHandle {
    self.handle.clone()
  }

  /// Run the completion loop until cancelled.
  ///
  /// Notifications are processed one at a time, so graph mutations never
  /// race each other. Newly ready nodes are started in the background. On
  /// cancellation the loop processes whatever is already buffered and waits
  /// for in-flight activations before returning.
  pub async fn start(mut self, cancel: CancellationToken) {
    info!(
      capacity = self.handle.sender.capacity(),
      "starting completion loop"
    );
    let mut activations = JoinSet::new();

    loop {
      tokio::select! {
        _ = cancel.cancelled() => {
          info!("completion loop cancelled");
          break;
        }
        Some(joined) = activations.join_next(), if !activations.is_empty() => {
          if let Err(e) = joined {
            error!(error = %e, "node activation aborted");
          }
        }
        notification = self.receiver.recv() => {
          match notification {
            Some(notification) => self.dispatch(notification, &mut activations).await,
            None => {
              info!("completion channel closed");
              break;
            }
          }
        }
      }
    }

    self.drain(&mut activations).await;
    info!(
      dropped = self.handle.sender.dropped(),
      "completion loop stopped"
    );
  }

  async fn dispatch(
    &self,
    notification: CompletionNotification,
    activations: &mut JoinSet<()>,
  ) {
    let task_id = notification.task_id.clone();
    match self.handle.process(notification).await {
      Ok(ready) if !ready.is_empty() => {
        let handle = self.handle.clone();
        activations.spawn(async move { handle.start_ready_nodes(ready).await });
      }
      Ok(_) => {}
      Err(e) => error!(task_id = %task_id, error = %e, "failed to apply completion"),
    }
  }

  async fn drain(&mut self, activations: &mut JoinSet<()>) {
    loop {
      while let Ok(notification) = self.receiver.try_recv() {
        self.dispatch(notification, activations).await;
      }
      match activations.join_next().await {
        Some(Err(e)) => error!(error = %e, "node activation aborted"),
        Some(Ok(())) => {}
        None => break,
      }
    }
  }
}

/// Operations shared by the completion loop and external callers.
#[derive(Clone)]
pub struct OrchestratorHandle {
  store: Arc<dyn Store>,
  manager: Arc<TaskManager>,
  sender: CompletionSender,
  machine: DependencyStateMachine,
}

impl OrchestratorHandle {
  pub fn task_manager(&self) -> &Arc<TaskManager> {
    &self.manager
  }

  /// Notifications dropped because the channel was full.
  pub fn dropped_notifications(&self) -> u64 {
    self.sender.dropped()
  }

  /// Create a consignment, build its workflow graph and start its ready nodes.
  #[instrument(
    name = "create_consignment",
    skip(self, request),
    fields(trader_id = %request.trader_id, flow = %request.flow, items = request.items.len())
  )]
  pub async fn create_consignment(
    &self,
    request: CreateConsignmentRequest,
  ) -> Result<ConsignmentView, OrchestratorError> {
    if request.items.is_empty() {
      return Err(OrchestratorError::InvalidRequest {
        message: "consignment has no items".to_string(),
      });
    }

    let mut template_ids = Vec::new();
    let mut seen = BTreeSet::new();
    for item in &request.items {
      let template = self
        .store
        .find_workflow_template(&item.hs_code_id, request.flow)
        .await
        .map_err(|e| match e {
          tradeflow_store::Error::NotFound(_) => OrchestratorError::NoTemplate {
            hs_code_id: item.hs_code_id.clone(),
            flow: request.flow,
          },
          other => other.into(),
        })?;
      for id in template.node_template_ids {
        if seen.insert(id.clone()) {
          template_ids.push(id);
        }
      }
    }
    let templates = self.store.get_node_templates(&template_ids).await?;

    let now = Utc::now();
    let consignment = Consignment {
      id: uuid::Uuid::new_v4().to_string(),
      flow: request.flow,
      trader_id: request.trader_id,
      state: ConsignmentState::InProgress,
      items: request.items,
      global_context: request.global_context,
      created_at: now,
      updated_at: now,
    };

    let mut tx = self.store.begin().await?;
    tx.insert_consignment(&consignment).await?;
    let init = self
      .machine
      .initialize_nodes_from_templates(tx.as_mut(), &consignment.id, &templates)
      .await?;
    tx.commit().await?;

    info!(
      consignment_id = %consignment.id,
      nodes = init.nodes.len(),
      "consignment created"
    );

    self.start_ready_nodes(init.newly_ready).await;
    self.consignment_view(&consignment.id).await
  }

  /// Get a consignment and its workflow nodes.
  pub async fn consignment_view(
    &self,
    consignment_id: &str,
  ) -> Result<ConsignmentView, OrchestratorError> {
    let consignment = self.store.get_consignment(consignment_id).await?;
    let nodes = self.store.list_nodes(consignment_id).await?;
    Ok(ConsignmentView { consignment, nodes })
  }

  /// Every consignment of a trader with its workflow nodes, newest first.
  #[instrument(name = "consignments_for_trader", skip(self))]
  pub async fn consignments_for_trader(
    &self,
    trader_id: &str,
  ) -> Result<Vec<ConsignmentView>, OrchestratorError> {
    let consignments = self.store.list_consignments_by_trader(trader_id).await?;
    let mut views = Vec::with_capacity(consignments.len());
    for consignment in consignments {
      let nodes = self.store.list_nodes(&consignment.id).await?;
      views.push(ConsignmentView { consignment, nodes });
    }
    debug!(consignments = views.len(), "trader consignments loaded");
    Ok(views)
  }

  /// Apply one completion notification to the graph.
  ///
  /// Runs in a single transaction: the node transition, the global context
  /// merge and the consignment's completion. Returns the nodes it made ready.
  /// Notifications for unknown nodes are discarded.
  #[instrument(
    name = "process_completion",
    skip(self, notification),
    fields(task_id = %notification.task_id, status = %notification.status)
  )]
  pub async fn process(
    &self,
    notification: CompletionNotification,
  ) -> Result<Vec<WorkflowNode>, OrchestratorError> {
    let mut tx = self.store.begin().await?;

    let node = match tx.get_node(&notification.task_id).await {
      Ok(node) => node,
      Err(WorkflowError::NodeNotFound(_)) => {
        warn!("completion for unknown node discarded");
        return Ok(Vec::new());
      }
      Err(e) => return Err(e.into()),
    };

    let transition = match notification.status {
      TaskStatus::Completed => {
        self
          .machine
          .transition_to_completed(tx.as_mut(), &node)
          .await?
      }
      TaskStatus::Failed => self.machine.transition_to_failed(tx.as_mut(), &node).await?,
      TaskStatus::InProgress | TaskStatus::AwaitingInput if node.state == NodeState::Ready => {
        self
          .machine
          .transition_to_in_progress(tx.as_mut(), &node)
          .await?
      }
      _ => StateTransition::default(),
    };

    let append = &notification.append_global_context;
    if !append.is_empty() || transition.all_completed {
      let mut consignment = tx.get_consignment(&node.consignment_id).await?;
      consignment.append_global_context(append);
      if transition.all_completed {
        consignment.state = ConsignmentState::Finished;
      }
      tx.update_consignment(&consignment).await?;
      if transition.all_completed {
        info!(consignment_id = %consignment.id, "consignment finished");
      }
    }

    tx.commit().await?;

    debug!(
      updated = transition.updated_nodes.len(),
      ready = transition.newly_ready.len(),
      "completion applied"
    );
    Ok(transition.newly_ready)
  }

  /// Create and start a task for each ready node.
  ///
  /// Failures are logged per node; one node failing to start never blocks
  /// the others. A node whose task failed to start stays `READY`; the next
  /// input for that task retries the start.
  pub async fn start_ready_nodes(&self, nodes: Vec<WorkflowNode>) {
    let Some(first) = nodes.first() else {
      return;
    };

    let context = match self.activation_context(&first.consignment_id, &nodes).await {
      Ok(context) => context,
      Err(e) => {
        error!(
          consignment_id = %first.consignment_id,
          error = %e,
          "failed to load activation context"
        );
        return;
      }
    };
    let (global_context, templates) = context;

    for node in &nodes {
      let Some(template) = templates.get(&node.template_id) else {
        error!(node_id = %node.id, template_id = %node.template_id, "node template missing");
        continue;
      };
      if let Err(e) = self.activate(node, template, &global_context).await {
        error!(node_id = %node.id, error = %e, "failed to start node, left READY");
      }
    }
  }

  async fn activation_context(
    &self,
    consignment_id: &str,
    nodes: &[WorkflowNode],
  ) -> Result<(GlobalContext, HashMap<String, WorkflowNodeTemplate>), OrchestratorError> {
    let consignment = self.store.get_consignment(consignment_id).await?;
    let ids: Vec<String> = nodes.iter().map(|n| n.template_id.clone()).collect();
    let templates = self
      .store
      .get_node_templates(&ids)
      .await?
      .into_iter()
      .map(|t| (t.id.clone(), t))
      .collect();
    Ok((consignment.global_context, templates))
  }

  #[instrument(
    name = "activate_node",
    skip(self, node, template, global_context),
    fields(node_id = %node.id, task_type = %template.task_type)
  )]
  async fn activate(
    &self,
    node: &WorkflowNode,
    template: &WorkflowNodeTemplate,
    global_context: &GlobalContext,
  ) -> Result<(), OrchestratorError> {
    self
      .manager
      .init(InitTaskRequest {
        task_id: node.id.clone(),
        consignment_id: node.consignment_id.clone(),
        step_id: template.id.clone(),
        task_type: template.task_type,
        config: template.config.clone(),
        global_context: global_context.clone(),
      })
      .await?;

    // Activation is not tied to any caller's lifetime; the container's
    // timeout bounds it.
    let outcome = self
      .manager
      .start(&node.id, &CancellationToken::new())
      .await?;
    info!(status = %outcome.status, "node started");

    // Marked only once started, so the node never shows IN_PROGRESS for a
    // task that cannot take input yet. The task may already have been
    // resumed and its node finished by the loop; the state machine re-reads
    // the node and leaves a finished one alone.
    let mut tx = self.store.begin().await?;
    self
      .machine
      .transition_to_in_progress(tx.as_mut(), node)
      .await?;
    tx.commit().await?;

    if outcome.status.is_terminal() || !outcome.append_global_context.is_empty() {
      self.sender.notify(CompletionNotification {
        task_id: outcome.task_id,
        status: outcome.status,
        append_global_context: outcome.append_global_context,
      });
    }
    Ok(())
  }
}
