use chrono::Utc;
use tradeflow_config::{CatalogDef, TaskPhase, TaskStatus, TaskType, TradeFlow};
use tradeflow_store::{Error, SqliteStore, Store, TaskRecord};
use tradeflow_workflow::{
  Consignment, ConsignmentState, DependencyStateMachine, NodeRepository, NodeState,
};

fn catalog() -> CatalogDef {
  serde_json::from_value(serde_json::json!({
    "node_templates": [
      {"id": "declare", "task_type": "SIMPLE_FORM", "config": {"title": "Declaration"}},
      {"id": "pay", "task_type": "PAYMENT", "depends_on": ["declare"]}
    ],
    "workflow_templates": [
      {"id": "wt-tea", "name": "Tea export", "version": "1", "nodes": ["declare", "pay"]}
    ],
    "mappings": [
      {"hs_code_id": "0902.10", "flow": "EXPORT", "workflow_template_id": "wt-tea"}
    ]
  }))
  .unwrap()
}

fn consignment(id: &str) -> Consignment {
  consignment_for(id, "trader-1")
}

fn consignment_for(id: &str, trader_id: &str) -> Consignment {
  let now = Utc::now();
  Consignment {
    id: id.to_string(),
    flow: TradeFlow::Export,
    trader_id: trader_id.to_string(),
    state: ConsignmentState::InProgress,
    items: vec![],
    global_context: serde_json::Map::new(),
    created_at: now,
    updated_at: now,
  }
}

#[tokio::test]
async fn test_catalog_lookup() {
  let store = SqliteStore::in_memory().await.unwrap();
  store.save_catalog(&catalog()).await.unwrap();
  // Saving twice replaces rather than conflicts.
  store.save_catalog(&catalog()).await.unwrap();

  let template = store
    .find_workflow_template("0902.10", TradeFlow::Export)
    .await
    .unwrap();
  assert_eq!(template.name, "Tea export");

  let nodes = store
    .get_node_templates(&template.node_template_ids)
    .await
    .unwrap();
  assert_eq!(nodes.len(), 2);
  assert_eq!(nodes[1].task_type, TaskType::Payment);
  assert_eq!(nodes[1].depends_on, vec!["declare".to_string()]);

  let missing = store
    .find_workflow_template("0902.10", TradeFlow::Import)
    .await;
  assert!(matches!(missing, Err(Error::NotFound(_))));
}

#[tokio::test]
async fn test_transaction_commit_persists_nodes() {
  let store = SqliteStore::in_memory().await.unwrap();
  store.save_catalog(&catalog()).await.unwrap();
  let templates = store
    .get_node_templates(&["declare".to_string(), "pay".to_string()])
    .await
    .unwrap();

  let mut tx = store.begin().await.unwrap();
  tx.insert_consignment(&consignment("c-1")).await.unwrap();
  let init = DependencyStateMachine::new()
    .initialize_nodes_from_templates(tx.as_mut(), "c-1", &templates)
    .await
    .unwrap();
  tx.commit().await.unwrap();

  let nodes = store.list_nodes("c-1").await.unwrap();
  assert_eq!(nodes.len(), 2);
  let ready: Vec<_> = nodes.iter().filter(|n| n.state == NodeState::Ready).collect();
  assert_eq!(ready.len(), 1);
  assert_eq!(ready[0].id, init.newly_ready[0].id);
}

#[tokio::test]
async fn test_transaction_dropped_rolls_back() {
  let store = SqliteStore::in_memory().await.unwrap();

  {
    let mut tx = store.begin().await.unwrap();
    tx.insert_consignment(&consignment("c-1")).await.unwrap();
  }

  assert!(matches!(
    store.get_consignment("c-1").await,
    Err(Error::NotFound(_))
  ));
}

#[tokio::test]
async fn test_update_consignment_in_transaction() {
  let store = SqliteStore::in_memory().await.unwrap();

  let mut tx = store.begin().await.unwrap();
  tx.insert_consignment(&consignment("c-1")).await.unwrap();
  tx.commit().await.unwrap();

  let mut tx = store.begin().await.unwrap();
  let mut loaded = tx.get_consignment("c-1").await.unwrap();
  loaded.append_global_context(serde_json::json!({"invoice": "INV-9"}).as_object().unwrap());
  loaded.state = ConsignmentState::Finished;
  tx.update_consignment(&loaded).await.unwrap();
  tx.commit().await.unwrap();

  let stored = store.get_consignment("c-1").await.unwrap();
  assert_eq!(stored.state, ConsignmentState::Finished);
  assert_eq!(stored.global_context["invoice"], "INV-9");
}

#[tokio::test]
async fn test_missing_node_maps_to_workflow_error() {
  let store = SqliteStore::in_memory().await.unwrap();
  let mut tx = store.begin().await.unwrap();

  let err = tx.get_node("nope").await.unwrap_err();
  assert!(matches!(err, tradeflow_workflow::WorkflowError::NodeNotFound(ref id) if id == "nope"));
}

#[tokio::test]
async fn test_task_record_round_trip() {
  let store = SqliteStore::in_memory().await.unwrap();
  let now = Utc::now();
  let record = TaskRecord {
    id: "t-1".to_string(),
    step_id: "declare".to_string(),
    consignment_id: "c-1".to_string(),
    task_type: TaskType::SimpleForm,
    status: TaskStatus::Initialized,
    phase: TaskPhase::Pending,
    config: serde_json::json!({"title": "Declaration"}),
    local_state: serde_json::json!({"version": 1, "data": {}}),
    global_context: serde_json::json!({"version": 1, "data": {"taskId": "t-1"}}),
    created_at: now,
    updated_at: now,
  };
  store.create_task(&record).await.unwrap();
  assert!(store.create_task(&record).await.is_err());

  store
    .update_task_state(
      "t-1",
      TaskStatus::AwaitingInput,
      TaskPhase::Started,
      &serde_json::json!({"version": 1, "data": {"awaiting_oga": true}}),
      &record.global_context,
    )
    .await
    .unwrap();

  let loaded = store.get_task("t-1").await.unwrap();
  assert_eq!(loaded.status, TaskStatus::AwaitingInput);
  assert_eq!(loaded.phase, TaskPhase::Started);
  assert_eq!(loaded.local_state["data"]["awaiting_oga"], true);
  assert_eq!(store.list_tasks("c-1").await.unwrap().len(), 1);

  assert!(matches!(
    store
      .update_task_state(
        "t-2",
        TaskStatus::Failed,
        TaskPhase::Finished,
        &record.local_state,
        &record.global_context
      )
      .await,
    Err(Error::NotFound(_))
  ));
}

#[tokio::test]
async fn test_list_consignments_by_trader() {
  let store = SqliteStore::in_memory().await.unwrap();

  let mut older = consignment_for("c-1", "trader-1");
  older.created_at -= chrono::Duration::minutes(5);
  let mut tx = store.begin().await.unwrap();
  tx.insert_consignment(&older).await.unwrap();
  tx.insert_consignment(&consignment_for("c-2", "trader-1")).await.unwrap();
  tx.insert_consignment(&consignment_for("c-3", "trader-2")).await.unwrap();
  tx.commit().await.unwrap();

  let listed = store.list_consignments_by_trader("trader-1").await.unwrap();
  let ids: Vec<&str> = listed.iter().map(|c| c.id.as_str()).collect();
  assert_eq!(ids, vec!["c-2", "c-1"]);

  assert!(
    store
      .list_consignments_by_trader("trader-9")
      .await
      .unwrap()
      .is_empty()
  );
}
