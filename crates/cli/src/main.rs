//! Inspection and maintenance CLI for a Canopy drive mirror.

use anyhow::{Context, Result};
use canopy_core::config::MetadataConfig;
use canopy_core::{ChangeAction, Node};
use canopy_metadata::{ChangeRepo, DiagnosticsRepo, MetadataError, NodeRepo, TreeStore};
use clap::{Parser, Subcommand};
use figment::Figment;
use figment::providers::{Env, Format, Toml};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use time::OffsetDateTime;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "canopyctl")]
#[command(about = "Inspection and maintenance CLI for a Canopy drive mirror")]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(long, env = "CANOPY_CONFIG")]
    config: Option<PathBuf>,

    /// Database file path (overrides configuration)
    #[arg(long, env = "CANOPY_DB")]
    db: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the database and install an empty root directory if none is set
    Init {
        /// ID of the root node
        #[arg(long)]
        root_id: String,
    },
    /// Print the last applied change-log cursor
    Cursor,
    /// Show the node at an absolute path
    Stat {
        /// Absolute path, e.g. /photos/cat.png
        path: String,
    },
    /// List the children of the directory at an absolute path
    Ls {
        #[arg(default_value = "/")]
        path: String,
    },
    /// Print the absolute path of a node
    Path {
        /// Node ID
        id: String,
    },
    /// List trashed nodes
    Trash,
    /// Find nodes whose name matches a regular expression
    Find {
        pattern: String,
    },
    /// Apply a JSON array of change actions and advance the cursor
    Apply {
        /// File holding the change actions ("-" reads stdin)
        changes: PathBuf,
        /// Cursor to record once the batch is applied
        #[arg(long)]
        cursor: String,
    },
    /// Report stored size, orphaned nodes and nodes shared as parent
    Diagnose,
}

/// Top-level configuration.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
struct AppConfig {
    #[serde(default)]
    metadata: MetadataConfig,
}

#[derive(Serialize)]
struct ApplyReport<'a> {
    applied: usize,
    cursor: &'a str,
}

#[derive(Serialize)]
struct Diagnosis {
    uploaded_size: u64,
    orphans: Vec<Node>,
    shared_parents: Vec<Node>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let Cli {
        config,
        db,
        command,
    } = Cli::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let mut config = load_config(config.as_deref())?;
    if let Some(db) = db {
        config.metadata = config.metadata.with_path(db);
    }

    let store = canopy_metadata::from_config(&config.metadata)
        .await
        .with_context(|| {
            format!(
                "failed to open tree store at {}",
                config.metadata.path().display()
            )
        })?;

    match command {
        Commands::Init { root_id } => handle_init(&store, &root_id).await,
        Commands::Cursor => {
            println!("{}", store.get_current_cursor().await?);
            Ok(())
        }
        Commands::Stat { path } => {
            let node = store
                .get_node_by_path(&path)
                .await
                .with_context(|| format!("failed to look up {path}"))?;
            print_json(&node)
        }
        Commands::Ls { path } => {
            let dir = store
                .get_node_by_path(&path)
                .await
                .with_context(|| format!("failed to look up {path}"))?;
            print_json(&store.get_children_by_id(&dir.id).await?)
        }
        Commands::Path { id } => {
            let path = store
                .resolve_path_by_id(&id)
                .await
                .with_context(|| format!("failed to resolve node {id}"))?;
            println!("{path}");
            Ok(())
        }
        Commands::Trash => print_json(&store.get_trashed_nodes().await?),
        Commands::Find { pattern } => print_json(&store.find_nodes_by_regex(&pattern).await?),
        Commands::Apply { changes, cursor } => handle_apply(&store, &changes, &cursor).await,
        Commands::Diagnose => {
            let diagnosis = Diagnosis {
                uploaded_size: store.get_uploaded_size().await?,
                orphans: store.find_orphan_nodes().await?,
                shared_parents: store.find_multiple_parents_nodes().await?,
            };
            if !diagnosis.orphans.is_empty() {
                tracing::warn!(count = diagnosis.orphans.len(), "orphaned nodes found");
            }
            print_json(&diagnosis)
        }
    }
}

fn load_config(path: Option<&Path>) -> Result<AppConfig> {
    let mut figment = Figment::new();

    match path {
        Some(path) if path.exists() => {
            tracing::debug!(config_path = %path.display(), "loading configuration from file");
            figment = figment.merge(Toml::file(path));
        }
        Some(path) => anyhow::bail!("config file {} does not exist", path.display()),
        None => tracing::debug!("no config file given, using defaults and environment"),
    }

    let config: AppConfig = figment
        .merge(Env::prefixed("CANOPY_").split("__"))
        .extract()
        .context("failed to load configuration")?;
    Ok(config)
}

async fn handle_init(store: &Arc<dyn TreeStore>, root_id: &str) -> Result<()> {
    match store.get_root().await {
        Ok(root) => {
            tracing::info!(root_id = %root.id, "root already set, leaving it in place");
            print_json(&root)
        }
        Err(MetadataError::NotFound(_)) => {
            let root = Node::root(root_id, OffsetDateTime::now_utc());
            store.set_root(&root).await.context("failed to set root")?;
            print_json(&root)
        }
        Err(err) => Err(err).context("failed to read root"),
    }
}

async fn handle_apply(store: &Arc<dyn TreeStore>, file: &Path, cursor: &str) -> Result<()> {
    let contents = if file == Path::new("-") {
        std::io::read_to_string(std::io::stdin()).context("failed to read stdin")?
    } else {
        std::fs::read_to_string(file)
            .with_context(|| format!("failed to read {}", file.display()))?
    };
    let changes: Vec<ChangeAction> =
        serde_json::from_str(&contents).context("failed to parse change actions")?;

    store
        .apply_changes(&changes, cursor)
        .await
        .context("failed to apply changes")?;
    print_json(&ApplyReport {
        applied: changes.len(),
        cursor,
    })
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
