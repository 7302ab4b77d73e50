use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde_json::{json, Value};
use tracing::info;

use ragnar_config::{Config, VectorBackend};
use ragnar_index::embeddings::{EmbeddingSync, OpenRouterEmbeddings};
use ragnar_index::qdrant::{QdrantConfig, QdrantStore};
use ragnar_index::vector_store::{MemoryVectorStore, VectorStore};
use ragnar_index::watcher::{IndexingService, WatcherConfig};
use ragnar_index::{Indexer, IndexerConfig, ToolRouter};

use crate::{Cli, Commands};

pub(crate) async fn execute(cli: &Cli, config: &Config) -> Result<()> {
    let cwd = std::env::current_dir().context("Failed to read the current directory")?;
    let root = match &cli.repo {
        Some(path) => path.clone(),
        None => config.repo_root(&cwd),
    };
    let indexer = open_indexer(config, &root).await?;

    match &cli.command {
        Commands::Index { force } => {
            let stats = if *force {
                indexer.reindex(true).await?
            } else {
                indexer.start().await?
            };
            print_json(&serde_json::to_value(stats)?)
        }
        Commands::Watch => watch(indexer, config).await,
        command => {
            indexer.start().await?;
            let (tool, args) = tool_call(command).context("Command has no tool equivalent")?;
            let result = ToolRouter::new(indexer).call(tool, &args).await;
            print_json(&result)?;
            if result.get("error").is_some() {
                bail!("{} failed", tool);
            }
            Ok(())
        }
    }
}

/// Build an indexer for `root`, with embeddings when they are enabled.
pub async fn open_indexer(config: &Config, root: &Path) -> Result<Indexer> {
    let root = root
        .canonicalize()
        .with_context(|| format!("Repository root does not exist: {}", root.display()))?;
    let mut indexer_config = IndexerConfig::new(&root).with_state_dir(config.state_dir(&root));
    if let Some(name) = &config.repo.name {
        indexer_config = indexer_config.with_repo_name(name.clone());
    }
    indexer_config = indexer_config.with_max_parallel(config.index.max_parallel);
    indexer_config.max_file_size = config.index.max_file_size;
    indexer_config.respect_gitignore = config.index.respect_gitignore;

    let embeddings = if config.embeddings.enabled {
        Some(embedding_sync(config).await?)
    } else {
        None
    };
    Ok(Indexer::new(indexer_config, embeddings))
}

async fn embedding_sync(config: &Config) -> Result<EmbeddingSync> {
    let settings = &config.embeddings;
    let Some(api_key) = config.embeddings_api_key() else {
        bail!("No embedding API key found. Set OPENROUTER_API_KEY or configure [embeddings].api_key");
    };
    let provider = OpenRouterEmbeddings::new(api_key, Some(settings.model.clone()), Some(settings.dimensions))
        .with_base_url(settings.url.clone());

    let store: Arc<dyn VectorStore> = match config.vector_store.backend {
        VectorBackend::Memory => Arc::new(MemoryVectorStore::with_dimensions(settings.dimensions)),
        VectorBackend::Qdrant => Arc::new(QdrantStore::from_config(&QdrantConfig {
            url: config.vector_store.url.clone(),
            api_key: config.vector_store.api_key.clone(),
            collection_name: config.vector_store.collection.clone(),
            dimensions: settings.dimensions,
        })?),
    };
    store.ensure_ready().await.context("Vector store is not ready")?;
    info!(backend = store.backend(), model = %settings.model, "Embeddings enabled");
    Ok(EmbeddingSync::new(Arc::new(provider), store))
}

async fn watch(indexer: Indexer, config: &Config) -> Result<()> {
    let stats = indexer.start().await?;
    info!(
        files = stats.files_scanned,
        indexed = stats.files_indexed,
        "Initial index ready, watching for changes"
    );
    let service = IndexingService::for_indexer(
        indexer.clone(),
        WatcherConfig {
            debounce: Duration::from_millis(config.watcher.debounce_ms),
        },
    );
    tokio::select! {
        result = service.run() => result?,
        _ = tokio::signal::ctrl_c() => info!("Interrupted"),
    }
    indexer.wait_idle().await;
    indexer.persist();
    Ok(())
}

/// Tool name and JSON arguments for a query command.
pub(crate) fn tool_call(command: &Commands) -> Option<(&'static str, Value)> {
    let call = match command {
        Commands::Status => ("get_index_status", json!({})),
        Commands::Calls { id } => ("get_function_calls", json!({ "function_id": id })),
        Commands::Callers { id } => ("get_callers", json!({ "function_id": id })),
        Commands::Chain { id, depth, direction } => (
            "get_call_chain",
            json!({ "function_id": id, "max_depth": depth, "direction": direction }),
        ),
        Commands::Hierarchy { id, direction } => {
            ("get_class_hierarchy", json!({ "class_id": id, "direction": direction }))
        }
        Commands::Deps { file, dependents: true, .. } => ("get_file_dependents", json!({ "file_path": file })),
        Commands::Deps { file, no_external, .. } => (
            "get_file_dependencies",
            json!({ "file_path": file, "include_external": !no_external }),
        ),
        Commands::Paths { from, to, depth } => {
            ("find_paths", json!({ "from_id": from, "to_id": to, "max_depth": depth }))
        }
        Commands::Components => ("get_connected_components", json!({})),
        Commands::Symbol { name, kind, limit } => {
            ("find_symbol", json!({ "name": name, "kind": kind, "limit": limit }))
        }
        Commands::Structure { file } => ("get_file_structure", json!({ "file_path": file })),
        Commands::Search { query, limit, kind, path } => (
            "search_code",
            json!({ "query": query, "limit": limit, "kind": kind, "file_path_prefix": path }),
        ),
        Commands::Index { .. } | Commands::Watch | Commands::InitConfig { .. } => return None,
    };
    Some(call)
}

fn print_json(value: &Value) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
