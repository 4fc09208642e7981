//! Plugin registry: which plugin runs which task type.

use std::collections::HashMap;
use std::sync::Arc;

use tradeflow_config::TaskType;
use tradeflow_task::plugins::{Payment, SimpleForm, WaitForEvent};
use tradeflow_task::{ExternalNotifier, FormRegistry, TaskPlugin};

use crate::ManagerError;

/// Builds a plugin instance for one task.
pub type PluginFactory = Box<dyn Fn() -> Arc<dyn TaskPlugin> + Send + Sync>;

/// Maps task types to plugin factories.
///
/// Built once at startup and shared with the task manager.
#[derive(Default)]
pub struct PluginRegistry {
  factories: HashMap<TaskType, PluginFactory>,
}

impl PluginRegistry {
  /// An empty registry.
  pub fn new() -> Self {
    Self::default()
  }

  /// A registry with every built-in plugin.
  pub fn standard(
    forms: Arc<dyn FormRegistry>,
    notifier: ExternalNotifier,
    service_url: impl Into<String>,
  ) -> Self {
    let simple_form: Arc<dyn TaskPlugin> = Arc::new(SimpleForm::new(forms, service_url));
    let wait_for_event: Arc<dyn TaskPlugin> = Arc::new(WaitForEvent::new(notifier));

    Self::new()
      .with(TaskType::SimpleForm, move || simple_form.clone())
      .with(TaskType::WaitForEvent, move || wait_for_event.clone())
      .with(TaskType::Payment, || Arc::new(Payment))
  }

  /// Register a factory, replacing any previous one for the type.
  pub fn register<F>(&mut self, task_type: TaskType, factory: F)
  where
    F: Fn() -> Arc<dyn TaskPlugin> + Send + Sync + 'static,
  {
    self.factories.insert(task_type, Box::new(factory));
  }

  pub fn with<F>(mut self, task_type: TaskType, factory: F) -> Self
  where
    F: Fn() -> Arc<dyn TaskPlugin> + Send + Sync + 'static,
  {
    self.register(task_type, factory);
    self
  }

  /// Build a plugin for the task type.
  pub fn build(&self, task_type: TaskType) -> Result<Arc<dyn TaskPlugin>, ManagerError> {
    self
      .factories
      .get(&task_type)
      .map(|factory| factory())
      .ok_or(ManagerError::UnknownTaskType(task_type))
  }

  pub fn contains(&self, task_type: TaskType) -> bool {
    self.factories.contains_key(&task_type)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use tradeflow_config::NotifierConfig;
  use tradeflow_task::InMemoryFormRegistry;

  #[test]
  fn test_standard_registry_has_every_type() {
    let registry = PluginRegistry::standard(
      Arc::new(InMemoryFormRegistry::new()),
      ExternalNotifier::new(&NotifierConfig::default()),
      "http://localhost:8080",
    );

    for task_type in [TaskType::SimpleForm, TaskType::WaitForEvent, TaskType::Payment] {
      assert!(registry.contains(task_type));
      assert!(registry.build(task_type).is_ok());
    }
  }

  #[test]
  fn test_unknown_type() {
    let registry = PluginRegistry::new().with(TaskType::Payment, || Arc::new(Payment));

    assert!(matches!(
      registry.build(TaskType::SimpleForm),
      Err(ManagerError::UnknownTaskType(TaskType::SimpleForm))
    ));
  }
}
