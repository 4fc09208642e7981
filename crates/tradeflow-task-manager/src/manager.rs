use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use chrono::Utc;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};
use tradeflow_config::{TaskPhase, TaskStatus};
use tradeflow_store::{Store, TaskRecord};
use tradeflow_task::{
  DEFAULT_EXECUTION_TIMEOUT, PluginResult, StateManager, TaskContainer, TaskError, TaskIdentity,
};

use crate::{
  CompletionNotification, CompletionSender, ExecuteTaskRequest, InitTaskRequest, ManagerError,
  PluginRegistry, TaskOutcome,
};

/// Global context key holding the owning task's ID.
pub const TASK_ID_KEY: &str = "taskId";
/// Global context key holding the owning consignment's ID.
pub const CONSIGNMENT_ID_KEY: &str = "consignmentId";

/// Default soft limit on cached containers.
const DEFAULT_CACHE_CAPACITY: usize = 1_000;

/// Shared, lockable task container.
///
/// The mutex serializes every operation on one task.
pub type TaskHandle = Arc<Mutex<TaskContainer>>;

/// Creates, runs, persists and caches task containers.
///
/// The cache only speeds up repeated access; every step is persisted before
/// its lock is released, so any container can be rebuilt from the store.
/// Finished tasks are dropped right away. Once the cache reaches its
/// capacity, containers nobody holds a handle to are dropped as well.
pub struct TaskManager {
  store: Arc<dyn Store>,
  registry: Arc<PluginRegistry>,
  notifications: CompletionSender,
  containers: RwLock<HashMap<String, TaskHandle>>,
  cache_capacity: usize,
  execution_timeout: Duration,
}

impl TaskManager {
  pub fn new(
    store: Arc<dyn Store>,
    registry: Arc<PluginRegistry>,
    notifications: CompletionSender,
  ) -> Self {
    Self {
      store,
      registry,
      notifications,
      containers: RwLock::new(HashMap::new()),
      cache_capacity: DEFAULT_CACHE_CAPACITY,
      execution_timeout: DEFAULT_EXECUTION_TIMEOUT,
    }
  }

  pub fn with_cache_capacity(mut self, capacity: usize) -> Self {
    self.cache_capacity = capacity.max(1);
    self
  }

  pub fn with_execution_timeout(mut self, timeout: Duration) -> Self {
    self.execution_timeout = timeout;
    self
  }

  pub fn notifications(&self) -> &CompletionSender {
    &self.notifications
  }

  /// Create and persist a task without running it.
  #[instrument(
    name = "task_init",
    skip(self, request),
    fields(
      task_id = %request.task_id,
      consignment_id = %request.consignment_id,
      task_type = %request.task_type,
    )
  )]
  pub async fn init(&self, request: InitTaskRequest) -> Result<TaskHandle, ManagerError> {
    let plugin = self.registry.build(request.task_type)?;

    let mut global = StateManager::from_map(request.global_context);
    global.set(TASK_ID_KEY, request.task_id.clone());
    global.set(CONSIGNMENT_ID_KEY, request.consignment_id.clone());
    // Injected identifiers are not consignment writes.
    global.take_changes();

    let container = TaskContainer::new(
      TaskIdentity {
        task_id: request.task_id.clone(),
        consignment_id: request.consignment_id.clone(),
        step_id: request.step_id.clone(),
        task_type: request.task_type,
      },
      request.config,
      plugin,
      StateManager::new(),
      global,
    )
    .with_timeout(self.execution_timeout);

    let now = Utc::now();
    let record = TaskRecord {
      id: request.task_id.clone(),
      step_id: request.step_id,
      consignment_id: request.consignment_id,
      task_type: request.task_type,
      status: container.status(),
      phase: container.phase(),
      config: container.config().clone(),
      local_state: container.local_state().to_document(),
      global_context: container.global_state().to_document(),
      created_at: now,
      updated_at: now,
    };
    self.store.create_task(&record).await?;

    let handle = Arc::new(Mutex::new(container));
    {
      let mut containers = self.containers.write().unwrap_or_else(PoisonError::into_inner);
      self.make_room(&mut containers);
      containers.insert(request.task_id, handle.clone());
    }

    info!("task initialized");
    Ok(handle)
  }

  /// Run a task's first activation.
  ///
  /// No completion notification is sent; the caller decides what a start
  /// outcome means for the graph. A start that failed may be run again
  /// until one succeeds.
  #[instrument(name = "task_start", skip(self, cancel))]
  pub async fn start(
    &self,
    task_id: &str,
    cancel: &CancellationToken,
  ) -> Result<TaskOutcome, ManagerError> {
    let handle = self.load(task_id).await?;
    let mut container = handle.lock().await;

    if container.phase() != TaskPhase::Pending {
      return Err(ManagerError::InvalidRequest {
        message: format!("task {task_id} was already started"),
      });
    }

    let result = container.execute(cancel).await;
    let outcome = self.settle(&mut container, result).await?;
    if container.phase() == TaskPhase::Finished {
      self.evict(task_id);
    }
    Ok(outcome)
  }

  /// Resume a task with external input and report the outcome.
  ///
  /// A plugin failure persists the task as failed and returns the error
  /// without notifying; the task can be resumed again. A task whose start
  /// failed has its start retried instead of being resumed. A task whose
  /// plugin reported `COMPLETED` or `FAILED` rejects further input.
  #[instrument(
    name = "task_execute",
    skip(self, request, cancel),
    fields(task_id = %request.task_id, action = %request.payload.action)
  )]
  pub async fn execute_task(
    &self,
    request: ExecuteTaskRequest,
    cancel: &CancellationToken,
  ) -> Result<TaskOutcome, ManagerError> {
    let handle = self.load(&request.task_id).await?;
    let mut container = handle.lock().await;

    if let Some(consignment_id) = &request.consignment_id {
      if *consignment_id != container.identity().consignment_id {
        return Err(ManagerError::InvalidRequest {
          message: format!(
            "task {} does not belong to consignment {}",
            request.task_id, consignment_id
          ),
        });
      }
    }
    let result = match container.phase() {
      TaskPhase::Finished => {
        self.evict(&request.task_id);
        return Err(ManagerError::TaskFinished {
          task_id: request.task_id,
        });
      }
      TaskPhase::Pending if container.status() == TaskStatus::Initialized => {
        return Err(ManagerError::InvalidRequest {
          message: format!("task {} has not started", request.task_id),
        });
      }
      TaskPhase::Pending => {
        warn!("task never started successfully, retrying start");
        container.execute(cancel).await
      }
      TaskPhase::Started => container.process_resume(cancel, &request.payload).await,
    };
    let outcome = self.settle(&mut container, result).await?;

    self.notifications.notify(CompletionNotification {
      task_id: outcome.task_id.clone(),
      status: outcome.status,
      append_global_context: outcome.append_global_context.clone(),
    });

    if container.phase() == TaskPhase::Finished {
      self.evict(&outcome.task_id);
    }
    Ok(outcome)
  }

  /// Get the persisted record of a task.
  pub async fn get_task(&self, task_id: &str) -> Result<TaskRecord, ManagerError> {
    Ok(self.store.get_task(task_id).await?)
  }

  /// Number of containers currently cached.
  pub fn cached(&self) -> usize {
    self
      .containers
      .read()
      .unwrap_or_else(PoisonError::into_inner)
      .len()
  }

  /// Persist the step's result, then turn it into an outcome.
  async fn settle(
    &self,
    container: &mut TaskContainer,
    result: Result<PluginResult, TaskError>,
  ) -> Result<TaskOutcome, ManagerError> {
    self
      .store
      .update_task_state(
        container.task_id(),
        container.status(),
        container.phase(),
        &container.local_state().to_document(),
        &container.global_state().to_document(),
      )
      .await
      .inspect_err(|e| error!(error = %e, "failed to persist task state"))?;

    let result = result?;
    Ok(TaskOutcome {
      task_id: container.task_id().to_string(),
      status: result.status,
      data: result.data,
      append_global_context: container.take_global_changes(),
    })
  }

  /// Get a cached container, rebuilding it from the store on a miss.
  async fn load(&self, task_id: &str) -> Result<TaskHandle, ManagerError> {
    {
      let containers = self.containers.read().unwrap_or_else(PoisonError::into_inner);
      if let Some(handle) = containers.get(task_id) {
        return Ok(handle.clone());
      }
    }

    let record = self.store.get_task(task_id).await?;
    let container = self.rehydrate(record)?;
    debug!(task_id, "task rehydrated from store");

    let mut containers = self.containers.write().unwrap_or_else(PoisonError::into_inner);
    if !containers.contains_key(task_id) {
      self.make_room(&mut containers);
    }
    let handle = containers
      .entry(task_id.to_string())
      .or_insert_with(|| Arc::new(Mutex::new(container)));
    Ok(handle.clone())
  }

  /// Drop idle containers once the cache is at capacity.
  ///
  /// Handles are only cloned under the cache lock, so a container whose sole
  /// owner is the cache has no caller waiting on it.
  fn make_room(&self, containers: &mut HashMap<String, TaskHandle>) {
    if containers.len() < self.cache_capacity {
      return;
    }
    let before = containers.len();
    containers.retain(|_, handle| Arc::strong_count(handle) > 1);
    debug!(
      dropped = before - containers.len(),
      cached = containers.len(),
      "task cache trimmed"
    );
  }

  fn rehydrate(&self, record: TaskRecord) -> Result<TaskContainer, ManagerError> {
    let plugin = self.registry.build(record.task_type)?;
    let local = StateManager::from_document(record.local_state)?;
    let global = StateManager::from_document(record.global_context)?;

    Ok(
      TaskContainer::new(
        TaskIdentity {
          task_id: record.id,
          consignment_id: record.consignment_id,
          step_id: record.step_id,
          task_type: record.task_type,
        },
        record.config,
        plugin,
        local,
        global,
      )
      .with_status(record.status)
      .with_phase(record.phase)
      .with_timeout(self.execution_timeout),
    )
  }

  fn evict(&self, task_id: &str) {
    self
      .containers
      .write()
      .unwrap_or_else(PoisonError::into_inner)
      .remove(task_id);
  }
}
