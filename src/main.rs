use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use tradeflow_config::{CatalogDef, EngineConfig};
use tradeflow_orchestrator::{CreateConsignmentRequest, Orchestrator, OrchestratorHandle};
use tradeflow_store::{SqliteStore, Store};
use tradeflow_task::{ExternalNotifier, FsFormRegistry};
use tradeflow_task_manager::{ExecuteTaskRequest, ExecuteTaskResponse, PluginRegistry};

/// Tradeflow - consignment workflow engine for trade documents
#[derive(Parser)]
#[command(name = "tradeflow")]
#[command(version, about, long_about = None)]
struct Cli {
  /// Path to the data directory (default: ~/.tradeflow)
  #[arg(long, global = true)]
  data_dir: Option<PathBuf>,

  /// Path to an engine config file (JSON)
  #[arg(long, global = true)]
  config: Option<PathBuf>,

  #[command(subcommand)]
  command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
  /// Manage the workflow template catalog
  Catalog {
    #[command(subcommand)]
    action: CatalogAction,
  },

  /// Submit and inspect consignments
  Consignment {
    #[command(subcommand)]
    action: ConsignmentAction,
  },

  /// Drive and inspect tasks
  Task {
    #[command(subcommand)]
    action: TaskAction,
  },
}

#[derive(Subcommand)]
enum CatalogAction {
  /// Load node templates, workflow templates and HS code mappings
  Load {
    /// Path to the catalog file (JSON)
    catalog_file: PathBuf,
  },
}

#[derive(Subcommand)]
enum ConsignmentAction {
  /// Submit a consignment read from stdin
  Submit,

  /// Show a consignment and its workflow nodes
  Show { consignment_id: String },

  /// List a trader's consignments with their workflow nodes
  List {
    /// Trader whose consignments to list
    #[arg(long)]
    trader: String,
  },
}

#[derive(Subcommand)]
enum TaskAction {
  /// Resume a task with input read from stdin
  Execute { task_id: String },

  /// Show a task record
  Show { task_id: String },

  /// List the task records of a consignment
  List {
    /// Consignment whose tasks to list
    #[arg(long)]
    consignment: String,
  },
}

fn main() -> Result<()> {
  let cli = Cli::parse();

  tracing_subscriber::fmt()
    .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
    .with_writer(io::stderr)
    .init();

  let data_dir = match cli.data_dir {
    Some(dir) => dir,
    None => dirs::home_dir()
      .context("could not determine home directory")?
      .join(".tradeflow"),
  };

  tracing::debug!(data_dir = %data_dir.display(), "tradeflow starting");

  let Some(command) = cli.command else {
    println!("tradeflow - use --help to see available commands");
    return Ok(());
  };

  let rt = tokio::runtime::Runtime::new()?;
  rt.block_on(async {
    let config = load_config(cli.config.as_deref()).await?;
    let store = open_store(&config, &data_dir).await?;

    match command {
      Commands::Catalog {
        action: CatalogAction::Load { catalog_file },
      } => load_catalog(&store, &catalog_file).await,
      Commands::Consignment { action } => match action {
        ConsignmentAction::Submit => {
          let request: CreateConsignmentRequest = serde_json::from_value(read_payload_from_stdin()?)
            .context("failed to parse consignment from stdin")?;
          let view = with_orchestrator(store, &config, &data_dir, |handle| async move {
            Ok(handle.create_consignment(request).await?)
          })
          .await?;
          println!("{}", serde_json::to_string_pretty(&view)?);
          Ok(())
        }
        ConsignmentAction::Show { consignment_id } => {
          let view = with_orchestrator(store, &config, &data_dir, |handle| async move {
            Ok(handle.consignment_view(&consignment_id).await?)
          })
          .await?;
          println!("{}", serde_json::to_string_pretty(&view)?);
          Ok(())
        }
        ConsignmentAction::List { trader } => {
          let views = with_orchestrator(store, &config, &data_dir, |handle| async move {
            Ok(handle.consignments_for_trader(&trader).await?)
          })
          .await?;
          println!("{}", serde_json::to_string_pretty(&views)?);
          Ok(())
        }
      },
      Commands::Task { action } => match action {
        TaskAction::Execute { task_id } => {
          let mut payload = read_payload_from_stdin()?;
          if let Some(body) = payload.as_object_mut() {
            body.insert("taskId".to_string(), task_id.into());
          }
          let request: ExecuteTaskRequest =
            serde_json::from_value(payload).context("failed to parse task input from stdin")?;

          let response = with_orchestrator(store, &config, &data_dir, |handle| async move {
            let cancel = CancellationToken::new();
            let result = handle.task_manager().execute_task(request, &cancel).await;
            Ok(ExecuteTaskResponse::from(result))
          })
          .await?;
          println!("{}", serde_json::to_string_pretty(&response)?);
          Ok(())
        }
        TaskAction::Show { task_id } => {
          let record = store
            .get_task(&task_id)
            .await
            .with_context(|| format!("failed to load task {task_id}"))?;
          println!("{}", serde_json::to_string_pretty(&record)?);
          Ok(())
        }
        TaskAction::List { consignment } => {
          let records = store
            .list_tasks(&consignment)
            .await
            .with_context(|| format!("failed to list tasks of consignment {consignment}"))?;
          println!("{}", serde_json::to_string_pretty(&records)?);
          Ok(())
        }
      },
    }
  })
}

async fn load_config(path: Option<&Path>) -> Result<EngineConfig> {
  let Some(path) = path else {
    return Ok(EngineConfig::default());
  };
  let content = tokio::fs::read_to_string(path)
    .await
    .with_context(|| format!("failed to read config file: {}", path.display()))?;
  serde_json::from_str(&content)
    .with_context(|| format!("failed to parse config file: {}", path.display()))
}

async fn open_store(config: &EngineConfig, data_dir: &Path) -> Result<Arc<SqliteStore>> {
  let url = match &config.database_url {
    Some(url) => url.clone(),
    None => {
      tokio::fs::create_dir_all(data_dir)
        .await
        .with_context(|| format!("failed to create data directory: {}", data_dir.display()))?;
      format!("sqlite://{}", data_dir.join("tradeflow.db").display())
    }
  };

  let store = SqliteStore::connect(&url)
    .await
    .with_context(|| format!("failed to open database: {url}"))?;
  store.migrate().await.context("failed to migrate database")?;
  Ok(Arc::new(store))
}

async fn load_catalog(store: &SqliteStore, catalog_file: &Path) -> Result<()> {
  let content = tokio::fs::read_to_string(catalog_file)
    .await
    .with_context(|| format!("failed to read catalog file: {}", catalog_file.display()))?;
  let catalog: CatalogDef = serde_json::from_str(&content)
    .with_context(|| format!("failed to parse catalog file: {}", catalog_file.display()))?;

  store
    .save_catalog(&catalog)
    .await
    .context("failed to save catalog")?;

  eprintln!(
    "Loaded {} node templates, {} workflow templates, {} mappings",
    catalog.node_templates.len(),
    catalog.workflow_templates.len(),
    catalog.mappings.len()
  );
  Ok(())
}

/// Run `f` with the completion loop running, then drain the loop and any
/// outbound notifications.
async fn with_orchestrator<F, Fut, T>(
  store: Arc<SqliteStore>,
  config: &EngineConfig,
  data_dir: &Path,
  f: F,
) -> Result<T>
where
  F: FnOnce(OrchestratorHandle) -> Fut,
  Fut: Future<Output = Result<T>>,
{
  let forms_dir = config
    .forms_dir
    .clone()
    .unwrap_or_else(|| data_dir.join("forms"));
  let notifier = ExternalNotifier::new(&config.notifier);
  let registry = PluginRegistry::standard(
    Arc::new(FsFormRegistry::new(forms_dir)),
    notifier.clone(),
    config.service_url.clone(),
  );

  let orchestrator = Orchestrator::new(store, Arc::new(registry), config);
  let handle = orchestrator.handle();
  let cancel = CancellationToken::new();
  let running = tokio::spawn(orchestrator.start(cancel.clone()));

  let result = f(handle).await;

  cancel.cancel();
  running.await.context("completion loop panicked")?;
  // Outbound notifications carry their own deadline; Ctrl-C abandons them.
  tokio::select! {
    _ = notifier.wait() => {}
    _ = tokio::signal::ctrl_c() => {
      tracing::warn!("interrupted, cancelling outbound notifications");
      notifier.shutdown();
      notifier.wait().await;
    }
  }
  result
}

fn read_payload_from_stdin() -> Result<serde_json::Value> {
  use std::io::IsTerminal;

  if io::stdin().is_terminal() {
    return Ok(serde_json::json!({}));
  }

  let mut input = String::new();
  io::stdin()
    .read_to_string(&mut input)
    .context("failed to read payload from stdin")?;

  if input.trim().is_empty() {
    Ok(serde_json::json!({}))
  } else {
    serde_json::from_str(&input).context("failed to parse payload JSON from stdin")
  }
}
