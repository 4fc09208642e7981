//! Tradeflow Workflow
//!
//! This crate models a consignment's workflow graph and the state machine that
//! advances it. A consignment is decomposed into workflow nodes, one per node
//! template, each depending on zero or more other nodes of the same consignment.
//!
//! ```text
//!   LOCKED ──(all deps COMPLETED)──> READY ──> IN_PROGRESS ──> COMPLETED
//!      │                               │            │
//!      └───────────────────────────────┴────────────┴────────> FAILED
//! ```
//!
//! The [`DependencyStateMachine`] is pure logic over a [`NodeRepository`]:
//! callers hand it a repository scoped to one database transaction and commit
//! the transaction afterwards. It never activates a node before every node it
//! depends on is `COMPLETED`, and a `FAILED` node never unlocks anything.

mod error;
mod graph;
mod memory;
mod model;
mod repository;
mod state_machine;

pub use error::WorkflowError;
pub use graph::TemplateGraph;
pub use memory::InMemoryNodeRepository;
pub use model::{
  Consignment, ConsignmentItem, ConsignmentState, NodeState, WorkflowNode, WorkflowNodeTemplate,
  WorkflowTemplate,
};
pub use repository::NodeRepository;
pub use state_machine::{DependencyStateMachine, InitializedNodes, StateTransition};
pub use tradeflow_config::{TaskType, TradeFlow};
