use std::str::FromStr;

use async_trait::async_trait;
use chrono::Utc;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::types::Json;
use sqlx::{Sqlite, SqliteConnection, SqlitePool};
use tracing::debug;
use tradeflow_config::{CatalogDef, TaskPhase, TaskStatus, TradeFlow};
use tradeflow_workflow::{
  Consignment, NodeRepository, WorkflowError, WorkflowNode, WorkflowNodeTemplate, WorkflowTemplate,
};

use crate::types::{
  ConsignmentRow, NodeRow, NodeTemplateRow, TaskRecord, TaskRow, WorkflowTemplateRow,
};
use crate::{Error, Store, StoreTx};

const NODE_COLUMNS: &str =
  "id, consignment_id, template_id, state, depends_on, created_at, updated_at";
const TASK_COLUMNS: &str = "id, step_id, consignment_id, task_type, status, phase, config, local_state, global_context, created_at, updated_at";
const CONSIGNMENT_COLUMNS: &str =
  "id, flow, trader_id, state, items, global_context, created_at, updated_at";

/// SQLite-based store implementation.
#[derive(Clone)]
pub struct SqliteStore {
  pool: SqlitePool,
}

impl SqliteStore {
  /// Create a new SQLite store with the given connection pool.
  pub fn new(pool: SqlitePool) -> Self {
    Self { pool }
  }

  /// Connect to a database URL, creating the file if it does not exist.
  pub async fn connect(url: &str) -> Result<Self, Error> {
    let options = SqliteConnectOptions::from_str(url)?
      .create_if_missing(true)
      .foreign_keys(true);
    let pool = SqlitePoolOptions::new().connect_with(options).await?;
    Ok(Self::new(pool))
  }

  /// A migrated store backed by a private in-memory database.
  ///
  /// The pool holds a single connection that is never recycled, since every
  /// new in-memory connection would see an empty database.
  pub async fn in_memory() -> Result<Self, Error> {
    let pool = SqlitePoolOptions::new()
      .max_connections(1)
      .idle_timeout(None)
      .max_lifetime(None)
      .connect("sqlite::memory:")
      .await?;
    let store = Self::new(pool);
    store.migrate().await?;
    Ok(store)
  }

  /// Run database migrations.
  pub async fn migrate(&self) -> Result<(), Error> {
    sqlx::migrate!("../../migrations").run(&self.pool).await?;
    Ok(())
  }

  pub fn pool(&self) -> &SqlitePool {
    &self.pool
  }
}

async fn fetch_node(conn: &mut SqliteConnection, node_id: &str) -> Result<WorkflowNode, Error> {
  let row: Option<NodeRow> = sqlx::query_as(&format!(
    "SELECT {NODE_COLUMNS} FROM workflow_nodes WHERE id = ?"
  ))
  .bind(node_id)
  .fetch_optional(conn)
  .await?;

  row
    .ok_or_else(|| Error::NotFound(format!("workflow node {node_id}")))?
    .try_into()
}

async fn fetch_nodes(
  conn: &mut SqliteConnection,
  consignment_id: &str,
) -> Result<Vec<WorkflowNode>, Error> {
  let rows: Vec<NodeRow> = sqlx::query_as(&format!(
    "SELECT {NODE_COLUMNS} FROM workflow_nodes WHERE consignment_id = ? ORDER BY id"
  ))
  .bind(consignment_id)
  .fetch_all(conn)
  .await?;

  rows.into_iter().map(WorkflowNode::try_from).collect()
}

async fn fetch_consignment(
  conn: &mut SqliteConnection,
  consignment_id: &str,
) -> Result<Consignment, Error> {
  let row: Option<ConsignmentRow> = sqlx::query_as(&format!(
    "SELECT {CONSIGNMENT_COLUMNS} FROM consignments WHERE id = ?"
  ))
  .bind(consignment_id)
  .fetch_optional(conn)
  .await?;

  row
    .ok_or_else(|| Error::NotFound(format!("consignment {consignment_id}")))?
    .try_into()
}

#[async_trait]
impl Store for SqliteStore {
  async fn begin(&self) -> Result<Box<dyn StoreTx>, Error> {
    let tx = self.pool.begin().await?;
    Ok(Box::new(SqliteTx { tx }))
  }

  async fn save_catalog(&self, catalog: &CatalogDef) -> Result<(), Error> {
    let mut tx = self.pool.begin().await?;

    for template in &catalog.node_templates {
      sqlx::query(
        r#"
        INSERT INTO workflow_node_templates (id, task_type, config, depends_on)
        VALUES (?, ?, ?, ?)
        ON CONFLICT(id) DO UPDATE SET
          task_type = excluded.task_type,
          config = excluded.config,
          depends_on = excluded.depends_on
        "#,
      )
      .bind(&template.id)
      .bind(template.task_type.as_str())
      .bind(Json(&template.config))
      .bind(Json(&template.depends_on))
      .execute(&mut *tx)
      .await?;
    }

    for template in &catalog.workflow_templates {
      sqlx::query(
        r#"
        INSERT INTO workflow_templates (id, name, version, node_template_ids)
        VALUES (?, ?, ?, ?)
        ON CONFLICT(id) DO UPDATE SET
          name = excluded.name,
          version = excluded.version,
          node_template_ids = excluded.node_template_ids
        "#,
      )
      .bind(&template.id)
      .bind(&template.name)
      .bind(&template.version)
      .bind(Json(&template.nodes))
      .execute(&mut *tx)
      .await?;
    }

    for mapping in &catalog.mappings {
      sqlx::query(
        r#"
        INSERT INTO workflow_template_maps (hs_code_id, flow, workflow_template_id)
        VALUES (?, ?, ?)
        ON CONFLICT(hs_code_id, flow) DO UPDATE SET
          workflow_template_id = excluded.workflow_template_id
        "#,
      )
      .bind(&mapping.hs_code_id)
      .bind(mapping.flow.as_str())
      .bind(&mapping.workflow_template_id)
      .execute(&mut *tx)
      .await?;
    }

    tx.commit().await?;

    debug!(
      node_templates = catalog.node_templates.len(),
      workflow_templates = catalog.workflow_templates.len(),
      mappings = catalog.mappings.len(),
      "catalog saved"
    );
    Ok(())
  }

  async fn find_workflow_template(
    &self,
    hs_code_id: &str,
    flow: TradeFlow,
  ) -> Result<WorkflowTemplate, Error> {
    let row: Option<WorkflowTemplateRow> = sqlx::query_as(
      r#"
      SELECT t.id, t.name, t.version, t.node_template_ids
      FROM workflow_templates t
      JOIN workflow_template_maps m ON m.workflow_template_id = t.id
      WHERE m.hs_code_id = ? AND m.flow = ?
      "#,
    )
    .bind(hs_code_id)
    .bind(flow.as_str())
    .fetch_optional(&self.pool)
    .await?;

    row.map(WorkflowTemplate::from).ok_or_else(|| {
      Error::NotFound(format!("workflow template for {hs_code_id} ({flow})"))
    })
  }

  async fn get_node_templates(&self, ids: &[String]) -> Result<Vec<WorkflowNodeTemplate>, Error> {
    let mut templates = Vec::with_capacity(ids.len());
    for id in ids {
      let row: Option<NodeTemplateRow> = sqlx::query_as(
        r#"
        SELECT id, task_type, config, depends_on
        FROM workflow_node_templates
        WHERE id = ?
        "#,
      )
      .bind(id)
      .fetch_optional(&self.pool)
      .await?;

      let row = row.ok_or_else(|| Error::NotFound(format!("node template {id}")))?;
      templates.push(row.try_into()?);
    }
    Ok(templates)
  }

  async fn get_consignment(&self, consignment_id: &str) -> Result<Consignment, Error> {
    let mut conn = self.pool.acquire().await?;
    fetch_consignment(&mut conn, consignment_id).await
  }

  async fn list_consignments_by_trader(&self, trader_id: &str) -> Result<Vec<Consignment>, Error> {
    let rows: Vec<ConsignmentRow> = sqlx::query_as(&format!(
      "SELECT {CONSIGNMENT_COLUMNS} FROM consignments WHERE trader_id = ? ORDER BY created_at DESC, id"
    ))
    .bind(trader_id)
    .fetch_all(&self.pool)
    .await?;

    rows.into_iter().map(Consignment::try_from).collect()
  }

  async fn get_node(&self, node_id: &str) -> Result<WorkflowNode, Error> {
    let mut conn = self.pool.acquire().await?;
    fetch_node(&mut conn, node_id).await
  }

  async fn list_nodes(&self, consignment_id: &str) -> Result<Vec<WorkflowNode>, Error> {
    let mut conn = self.pool.acquire().await?;
    fetch_nodes(&mut conn, consignment_id).await
  }

  async fn create_task(&self, record: &TaskRecord) -> Result<(), Error> {
    sqlx::query(&format!(
      "INSERT INTO task_records ({TASK_COLUMNS}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"
    ))
    .bind(&record.id)
    .bind(&record.step_id)
    .bind(&record.consignment_id)
    .bind(record.task_type.as_str())
    .bind(record.status.as_str())
    .bind(record.phase.as_str())
    .bind(Json(&record.config))
    .bind(Json(&record.local_state))
    .bind(Json(&record.global_context))
    .bind(record.created_at)
    .bind(record.updated_at)
    .execute(&self.pool)
    .await?;

    Ok(())
  }

  async fn get_task(&self, task_id: &str) -> Result<TaskRecord, Error> {
    let row: Option<TaskRow> = sqlx::query_as(&format!(
      "SELECT {TASK_COLUMNS} FROM task_records WHERE id = ?"
    ))
    .bind(task_id)
    .fetch_optional(&self.pool)
    .await?;

    row
      .ok_or_else(|| Error::NotFound(format!("task {task_id}")))?
      .try_into()
  }

  async fn update_task_state(
    &self,
    task_id: &str,
    status: TaskStatus,
    phase: TaskPhase,
    local_state: &serde_json::Value,
    global_context: &serde_json::Value,
  ) -> Result<(), Error> {
    let result = sqlx::query(
      r#"
      UPDATE task_records
      SET status = ?, phase = ?, local_state = ?, global_context = ?, updated_at = ?
      WHERE id = ?
      "#,
    )
    .bind(status.as_str())
    .bind(phase.as_str())
    .bind(Json(local_state))
    .bind(Json(global_context))
    .bind(Utc::now())
    .bind(task_id)
    .execute(&self.pool)
    .await?;

    if result.rows_affected() == 0 {
      return Err(Error::NotFound(format!("task {task_id}")));
    }
    Ok(())
  }

  async fn list_tasks(&self, consignment_id: &str) -> Result<Vec<TaskRecord>, Error> {
    let rows: Vec<TaskRow> = sqlx::query_as(&format!(
      "SELECT {TASK_COLUMNS} FROM task_records WHERE consignment_id = ? ORDER BY created_at, id"
    ))
    .bind(consignment_id)
    .fetch_all(&self.pool)
    .await?;

    rows.into_iter().map(TaskRecord::try_from).collect()
  }
}

/// A transaction on a [`SqliteStore`].
pub struct SqliteTx {
  tx: sqlx::Transaction<'static, Sqlite>,
}

fn repository_error(err: Error) -> WorkflowError {
  match err {
    Error::NotFound(what) => WorkflowError::NodeNotFound(what),
    other => WorkflowError::Repository(Box::new(other)),
  }
}

#[async_trait]
impl NodeRepository for SqliteTx {
  async fn get_node(&mut self, node_id: &str) -> Result<WorkflowNode, WorkflowError> {
    fetch_node(&mut self.tx, node_id)
      .await
      .map_err(|err| match err {
        Error::NotFound(_) => WorkflowError::NodeNotFound(node_id.to_string()),
        other => repository_error(other),
      })
  }

  async fn list_nodes(&mut self, consignment_id: &str) -> Result<Vec<WorkflowNode>, WorkflowError> {
    fetch_nodes(&mut self.tx, consignment_id)
      .await
      .map_err(repository_error)
  }

  async fn save_nodes(&mut self, nodes: &[WorkflowNode]) -> Result<(), WorkflowError> {
    for node in nodes {
      sqlx::query(&format!(
        r#"
        INSERT INTO workflow_nodes ({NODE_COLUMNS})
        VALUES (?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(id) DO UPDATE SET
          state = excluded.state,
          depends_on = excluded.depends_on,
          updated_at = excluded.updated_at
        "#
      ))
      .bind(&node.id)
      .bind(&node.consignment_id)
      .bind(&node.template_id)
      .bind(node.state.as_str())
      .bind(Json(&node.depends_on))
      .bind(node.created_at)
      .bind(node.updated_at)
      .execute(&mut *self.tx)
      .await
      .map_err(|e| repository_error(e.into()))?;
    }
    Ok(())
  }
}

#[async_trait]
impl StoreTx for SqliteTx {
  async fn insert_consignment(&mut self, consignment: &Consignment) -> Result<(), Error> {
    sqlx::query(&format!(
      "INSERT INTO consignments ({CONSIGNMENT_COLUMNS}) VALUES (?, ?, ?, ?, ?, ?, ?, ?)"
    ))
    .bind(&consignment.id)
    .bind(consignment.flow.as_str())
    .bind(&consignment.trader_id)
    .bind(consignment.state.as_str())
    .bind(Json(&consignment.items))
    .bind(Json(&consignment.global_context))
    .bind(consignment.created_at)
    .bind(consignment.updated_at)
    .execute(&mut *self.tx)
    .await?;

    Ok(())
  }

  async fn get_consignment(&mut self, consignment_id: &str) -> Result<Consignment, Error> {
    fetch_consignment(&mut self.tx, consignment_id).await
  }

  async fn update_consignment(&mut self, consignment: &Consignment) -> Result<(), Error> {
    let result = sqlx::query(
      r#"
      UPDATE consignments
      SET state = ?, global_context = ?, updated_at = ?
      WHERE id = ?
      "#,
    )
    .bind(consignment.state.as_str())
    .bind(Json(&consignment.global_context))
    .bind(Utc::now())
    .bind(&consignment.id)
    .execute(&mut *self.tx)
    .await?;

    if result.rows_affected() == 0 {
      return Err(Error::NotFound(format!("consignment {}", consignment.id)));
    }
    Ok(())
  }

  async fn commit(self: Box<Self>) -> Result<(), Error> {
    self.tx.commit().await?;
    Ok(())
  }
}
