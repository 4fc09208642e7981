use thiserror::Error;
use tradeflow_config::TradeFlow;

#[derive(Debug, Error)]
pub enum OrchestratorError {
  #[error(transparent)]
  Workflow(#[from] tradeflow_workflow::WorkflowError),

  #[error("store error: {0}")]
  Store(#[from] tradeflow_store::Error),

  #[error(transparent)]
  Manager(#[from] tradeflow_task_manager::ManagerError),

  /// No workflow template is mapped to the item's HS code and flow.
  #[error("no workflow template for HS code {hs_code_id} ({flow})")]
  NoTemplate { hs_code_id: String, flow: TradeFlow },

  #[error("invalid request: {message}")]
  InvalidRequest { message: String },
}
