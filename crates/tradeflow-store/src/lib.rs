//! Tradeflow Store
//!
//! This crate provides the storage trait and its SQLite implementation for
//! consignments, workflow nodes, the workflow template catalog and task
//! records.
//!
//! The [`Store`] trait covers single-statement reads and writes. Graph
//! mutations go through [`Store::begin`], which returns a [`StoreTx`]: a
//! [`NodeRepository`] scoped to one database transaction that also reads and
//! writes the owning consignment. Dropping a `StoreTx` without calling
//! [`StoreTx::commit`] rolls it back.

mod sqlite;
mod types;

pub use sqlite::SqliteStore;
pub use types::TaskRecord;

use async_trait::async_trait;
use tradeflow_config::{CatalogDef, ParseEnumError, TaskPhase, TaskStatus, TradeFlow};
use tradeflow_workflow::{
  Consignment, NodeRepository, WorkflowNode, WorkflowNodeTemplate, WorkflowTemplate,
};

/// Error type for storage operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
  /// The requested record was not found.
  #[error("not found: {0}")]
  NotFound(String),

  /// A database error occurred.
  #[error("database error: {0}")]
  Database(#[from] sqlx::Error),

  /// Applying migrations failed.
  #[error("migration error: {0}")]
  Migrate(#[from] sqlx::migrate::MigrateError),

  /// A stored value could not be mapped back to its type.
  #[error("corrupt record: {0}")]
  Corrupt(#[from] ParseEnumError),
}

/// Storage trait for the workflow catalog, consignments and task records.
#[async_trait]
pub trait Store: Send + Sync {
  /// Open a transaction for graph mutations.
  async fn begin(&self) -> Result<Box<dyn StoreTx>, Error>;

  /// Insert or replace every template and mapping of a catalog, atomically.
  async fn save_catalog(&self, catalog: &CatalogDef) -> Result<(), Error>;

  /// Find the workflow template mapped to an HS code and trade flow.
  async fn find_workflow_template(
    &self,
    hs_code_id: &str,
    flow: TradeFlow,
  ) -> Result<WorkflowTemplate, Error>;

  /// Get node templates by ID, in the order requested.
  async fn get_node_templates(&self, ids: &[String]) -> Result<Vec<WorkflowNodeTemplate>, Error>;

  /// Get a consignment by ID.
  async fn get_consignment(&self, consignment_id: &str) -> Result<Consignment, Error>;

  /// List a trader's consignments, newest first.
  async fn list_consignments_by_trader(&self, trader_id: &str) -> Result<Vec<Consignment>, Error>;

  /// Get a workflow node by ID.
  async fn get_node(&self, node_id: &str) -> Result<WorkflowNode, Error>;

  /// List the workflow nodes of a consignment, ordered by ID.
  async fn list_nodes(&self, consignment_id: &str) -> Result<Vec<WorkflowNode>, Error>;

  /// Create a new task record.
  async fn create_task(&self, record: &TaskRecord) -> Result<(), Error>;

  /// Get a task record by ID.
  async fn get_task(&self, task_id: &str) -> Result<TaskRecord, Error>;

  /// Update status, phase, local state and global context of a task record.
  async fn update_task_state(
    &self,
    task_id: &str,
    status: TaskStatus,
    phase: TaskPhase,
    local_state: &serde_json::Value,
    global_context: &serde_json::Value,
  ) -> Result<(), Error>;

  /// List task records for a consignment.
  async fn list_tasks(&self, consignment_id: &str) -> Result<Vec<TaskRecord>, Error>;
}

/// A store transaction.
#[async_trait]
pub trait StoreTx: NodeRepository {
  /// Insert a new consignment.
  async fn insert_consignment(&mut self, consignment: &Consignment) -> Result<(), Error>;

  /// Get a consignment by ID.
  async fn get_consignment(&mut self, consignment_id: &str) -> Result<Consignment, Error>;

  /// Update state and global context of a consignment.
  async fn update_consignment(&mut self, consignment: &Consignment) -> Result<(), Error>;

  /// Commit every write made through this transaction.
  async fn commit(self: Box<Self>) -> Result<(), Error>;
}
