//! Tradeflow Orchestrator
//!
//! Drives consignments through their workflow graphs.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                       Orchestrator                          │
//! │  - owns the bounded completion channel (receiver)           │
//! │  - start(cancel) runs the single consumer loop              │
//! └─────────────────────────────────────────────────────────────┘
//!                               │ one transaction per notification
//!                               ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                  DependencyStateMachine                     │
//! │  - node transitions, unlocking, consignment completion      │
//! └─────────────────────────────────────────────────────────────┘
//!                               │ newly ready nodes, after commit
//!                               ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                       TaskManager                           │
//! │  - init + start containers, resume on external input        │
//! │  - try_send completions back to the channel (drop if full)  │
//! └─────────────────────────────────────────────────────────────┘
//! ```

mod error;
mod orchestrator;
mod types;

pub use error::OrchestratorError;
pub use orchestrator::{Orchestrator, OrchestratorHandle};
pub use types::{ConsignmentView, CreateConsignmentRequest};
