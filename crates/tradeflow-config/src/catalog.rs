use serde::{Deserialize, Serialize};

use crate::enums::{TaskType, TradeFlow};

/// A catalog of workflow templates and the HS code mappings that select them.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CatalogDef {
  #[serde(default)]
  pub node_templates: Vec<NodeTemplateDef>,
  #[serde(default)]
  pub workflow_templates: Vec<WorkflowTemplateDef>,
  #[serde(default)]
  pub mappings: Vec<TemplateMappingDef>,
}

/// A reusable step definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeTemplateDef {
  pub id: String,
  pub task_type: TaskType,
  /// Type specific plugin configuration.
  #[serde(default)]
  pub config: serde_json::Value,
  /// Other node template ids that must complete first.
  #[serde(default)]
  pub depends_on: Vec<String>,
}

/// A named, versioned set of node templates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowTemplateDef {
  pub id: String,
  pub name: String,
  #[serde(default)]
  pub version: String,
  /// Node template ids.
  pub nodes: Vec<String>,
}

/// Selects a workflow template for items with this HS code and trade flow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TemplateMappingDef {
  pub hs_code_id: String,
  pub flow: TradeFlow,
  pub workflow_template_id: String,
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_parse_catalog() {
    let catalog: CatalogDef = serde_json::from_str(
      r#"{
        "node_templates": [
          {"id": "declare", "task_type": "SIMPLE_FORM", "config": {"formId": "f-1"}},
          {"id": "pay", "task_type": "PAYMENT", "depends_on": ["declare"]}
        ],
        "workflow_templates": [
          {"id": "wt-1", "name": "Tea export", "version": "1", "nodes": ["declare", "pay"]}
        ],
        "mappings": [
          {"hs_code_id": "0902.10", "flow": "EXPORT", "workflow_template_id": "wt-1"}
        ]
      }"#,
    )
    .unwrap();

    assert_eq!(catalog.node_templates.len(), 2);
    assert_eq!(catalog.node_templates[1].depends_on, vec!["declare"]);
    assert_eq!(catalog.node_templates[1].config, serde_json::Value::Null);
    assert_eq!(catalog.mappings[0].flow, TradeFlow::Export);
  }
}
