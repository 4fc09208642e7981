use std::collections::{HashMap, VecDeque};

use crate::{WorkflowError, WorkflowNodeTemplate};

/// Dependency graph over a set of node templates.
///
/// Construction validates that every dependency names a template in the set
/// and that the dependencies are acyclic.
#[derive(Debug, Clone)]
pub struct TemplateGraph {
  /// Reverse adjacency: template_id -> templates it depends on.
  reverse_adjacency: HashMap<String, Vec<String>>,
  /// Templates with no dependencies.
  entry_points: Vec<String>,
  /// Every template, dependencies before dependents.
  order: Vec<String>,
}

impl TemplateGraph {
  pub fn new(templates: &[WorkflowNodeTemplate]) -> Result<Self, WorkflowError> {
    let mut adjacency: HashMap<String, Vec<String>> = HashMap::new();
    let mut reverse_adjacency: HashMap<String, Vec<String>> = HashMap::new();

    for template in templates {
      adjacency.entry(template.id.clone()).or_default();
      reverse_adjacency.entry(template.id.clone()).or_default();
    }

    for template in templates {
      for dep in &template.depends_on {
        if !adjacency.contains_key(dep) {
          return Err(WorkflowError::UnknownDependency {
            template_id: template.id.clone(),
            depends_on: dep.clone(),
          });
        }
        adjacency
          .entry(dep.clone())
          .or_default()
          .push(template.id.clone());
        reverse_adjacency
          .entry(template.id.clone())
          .or_default()
          .push(dep.clone());
      }
    }

    // Keep input order for entry points so node creation is stable.
    let mut entry_points = Vec::new();
    for template in templates {
      let no_deps = reverse_adjacency
        .get(&template.id)
        .is_none_or(|v| v.is_empty());
      if no_deps && !entry_points.contains(&template.id) {
        entry_points.push(template.id.clone());
      }
    }

    let order = Self::topological_order(&adjacency, &reverse_adjacency, &entry_points)?;

    Ok(Self {
      reverse_adjacency,
      entry_points,
      order,
    })
  }

  /// Kahn's algorithm. Anything left unvisited sits on a cycle.
  fn topological_order(
    adjacency: &HashMap<String, Vec<String>>,
    reverse_adjacency: &HashMap<String, Vec<String>>,
    entry_points: &[String],
  ) -> Result<Vec<String>, WorkflowError> {
    let mut remaining: HashMap<&str, usize> = reverse_adjacency
      .iter()
      .map(|(id, deps)| (id.as_str(), deps.len()))
      .collect();
    let mut queue: VecDeque<&str> = entry_points.iter().map(String::as_str).collect();
    let mut order = Vec::with_capacity(adjacency.len());

    while let Some(id) = queue.pop_front() {
      order.push(id.to_string());
      for next in adjacency.get(id).map(|v| v.as_slice()).unwrap_or(&[]) {
        if let Some(count) = remaining.get_mut(next.as_str()) {
          *count -= 1;
          if *count == 0 {
            queue.push_back(next.as_str());
          }
        }
      }
    }

    if order.len() < adjacency.len() {
      let mut stuck: Vec<&str> = remaining
        .iter()
        .filter(|(_, count)| **count > 0)
        .map(|(id, _)| *id)
        .collect();
      stuck.sort();
      return Err(WorkflowError::DependencyCycle {
        template_id: stuck.first().copied().unwrap_or_default().to_string(),
      });
    }

    Ok(order)
  }

  /// Templates with no dependencies.
  pub fn entry_points(&self) -> &[String] {
    &self.entry_points
  }

  /// Templates, dependencies first.
  pub fn order(&self) -> &[String] {
    &self.order
  }

  /// Templates `template_id` depends on.
  pub fn upstream(&self, template_id: &str) -> &[String] {
    self
      .reverse_adjacency
      .get(template_id)
      .map(|v| v.as_slice())
      .unwrap_or(&[])
  }
}
