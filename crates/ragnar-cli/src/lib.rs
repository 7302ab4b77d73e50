//! Command-line front end for the Ragnar code index.
//!
//! Every query command goes through the same [`ToolRouter`] an agent would
//! use, so the CLI prints exactly the JSON the tool surface returns.

mod commands;

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use ragnar_config::Config;

pub use commands::open_indexer;

#[derive(Parser, Debug)]
#[command(name = "ragnar", about = "Code intelligence index: call graphs, hierarchies and dependencies")]
#[command(version, propagate_version = true)]
pub struct Cli {
    /// Repository root (defaults to the configured path or the current directory)
    #[arg(short, long, global = true)]
    pub repo: Option<PathBuf>,

    /// Extra config file, applied over the global and local ones
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Log filter, overriding the configured level
    #[arg(long, global = true)]
    pub log_level: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Commands {
    /// Index the repository (incremental unless --force)
    Index {
        /// Rebuild everything from scratch
        #[arg(long)]
        force: bool,
    },

    /// Show index status
    Status,

    /// Calls made by a function
    Calls {
        /// Function id, e.g. repo:src/app.py:main
        id: String,
    },

    /// Callers of a function
    Callers { id: String },

    /// Call chain from a function
    Chain {
        id: String,
        #[arg(short, long, default_value = "5")]
        depth: usize,
        /// outgoing or incoming
        #[arg(long, default_value = "outgoing")]
        direction: String,
    },

    /// Inheritance around a class
    Hierarchy {
        id: String,
        /// parents, children or both
        #[arg(long, default_value = "both")]
        direction: String,
    },

    /// Imports of a file
    Deps {
        file: String,
        /// Files importing this one instead
        #[arg(long)]
        dependents: bool,
        /// Leave out stdlib and third-party modules
        #[arg(long)]
        no_external: bool,
    },

    /// Paths between two nodes
    Paths {
        from: String,
        to: String,
        #[arg(short, long, default_value = "6")]
        depth: usize,
    },

    /// Weakly connected components
    Components,

    /// Find a symbol by name
    Symbol {
        name: String,
        /// function, class or file
        #[arg(short, long)]
        kind: Option<String>,
        #[arg(short, long, default_value = "20")]
        limit: usize,
    },

    /// Functions and classes of a file
    Structure { file: String },

    /// Natural-language search (needs embeddings)
    Search {
        query: String,
        #[arg(short = 'k', long, default_value = "10")]
        limit: usize,
        #[arg(long)]
        kind: Option<String>,
        /// Only files under this prefix
        #[arg(long)]
        path: Option<String>,
    },

    /// Index, then re-index files as they change
    Watch,

    /// Write a default config file
    InitConfig {
        /// Target file (defaults to ./ragnar.toml)
        #[arg(short, long)]
        output: Option<PathBuf>,
        /// Replace an existing file
        #[arg(long)]
        force: bool,
    },
}

/// Parse arguments, load configuration, set up logging and run the command.
pub async fn run() -> Result<()> {
    let cli = Cli::parse();

    if let Commands::InitConfig { output, force } = &cli.command {
        let path = output.clone().unwrap_or_else(|| PathBuf::from(ragnar_config::LOCAL_CONFIG_FILE));
        Config::write_default(&path, *force).with_context(|| format!("Failed to write {}", path.display()))?;
        println!("Wrote default configuration to {}", path.display());
        return Ok(());
    }

    let config = Config::load(cli.config.as_deref()).context("Failed to load configuration")?;
    init_logging(cli.log_level.as_deref().unwrap_or(&config.log_level));
    commands::execute(&cli, &config).await
}

/// `RUST_LOG` wins over the configured level.
fn init_logging(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let _ = tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(filter)
        .with_target(false)
        .try_init();
}
