//! Tradeflow Config
//!
//! This crate contains the serializable types shared by every tradeflow crate:
//! the enums that cross crate boundaries, the engine settings, and the
//! workflow template catalog.
//!
//! Configuration can be loaded from:
//! - JSON files (via CLI with `--config=engine.json`)
//! - Catalog files (via CLI with `catalog load catalog.json`)
//!
//! The store persists the catalog; the orchestrator resolves consignment
//! items against it to build each consignment's workflow graph.

mod catalog;
mod engine;
mod enums;

pub use catalog::{CatalogDef, NodeTemplateDef, TemplateMappingDef, WorkflowTemplateDef};
pub use engine::{EngineConfig, NotifierConfig};
pub use enums::{ParseEnumError, TaskPhase, TaskStatus, TaskType, TradeFlow};
