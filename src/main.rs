//! semantic-store CLI entry point.

use semantic_store::config::StoreConfig;
use semantic_store::embedding::FastEmbedder;
use semantic_store::logging::init_logging;
use semantic_store::vector::filter::file_path_equals;
use semantic_store::vector::{CollectionKind, LogNotifier, Record, SearchScope, VectorEngine};

use anyhow::Context as _;
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::io::BufRead as _;
use std::path::PathBuf;
use std::sync::Arc;

/// Records embedded and appended per upsert call during ingestion.
const INGEST_BATCH: usize = 256;

#[derive(Parser)]
#[command(name = "semantic-store")]
#[command(about = "Per-workspace semantic vector store")]
#[command(version)]
struct Cli {
    /// Workspace root (defaults to the current directory)
    #[arg(short, long, global = true)]
    workspace: Option<PathBuf>,

    /// Path to a TOML config file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Also write logs to a daily rolling file in this directory
    #[arg(long, global = true)]
    log_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Open the store and provision every configured collection
    Init,
    /// Embed and store records read as JSON lines
    Ingest {
        /// Target collection
        #[arg(short = 'k', long)]
        collection: String,
        /// JSONL file of records; reads stdin when omitted or "-"
        input: Option<PathBuf>,
    },
    /// Semantic search across collections
    Search {
        query: String,
        #[arg(short, long, default_value_t = 10)]
        limit: usize,
        /// Restrict to these collections (repeatable)
        #[arg(short = 'k', long = "collection")]
        collections: Vec<String>,
        /// Filter expression, e.g. "filePath = 'src/main.rs'"
        #[arg(short, long)]
        filter: Option<String>,
    },
    /// Refresh and print collection statistics
    Stats,
    /// List distinct source paths stored in a collection
    Paths {
        #[arg(short = 'k', long)]
        collection: String,
    },
    /// Delete records matching a filter expression or stored for one file
    Delete {
        #[arg(short = 'k', long)]
        collection: String,
        #[arg(short, long, required_unless_present = "file", conflicts_with = "file")]
        filter: Option<String>,
        /// Source file path whose records are removed
        #[arg(long)]
        file: Option<String>,
    },
    /// Drop one collection, or all of them
    Purge {
        #[arg(short = 'k', long)]
        collection: Option<String>,
    },
    /// Compact collections and prune old versions
    Optimize,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let _log_guard = init_logging(cli.log_dir.as_deref());

    let config = StoreConfig::load(cli.config.as_deref()).context("failed to load config")?;
    let workspace = match cli.workspace {
        Some(path) => path,
        None => std::env::current_dir().context("failed to read current directory")?,
    };

    let embedder = FastEmbedder::new(&config.embedding).context("failed to load embedding model")?;
    let engine = VectorEngine::new(config, Arc::new(embedder), Arc::new(LogNotifier));

    match cli.command {
        Command::Init => {
            let state = engine.init(&workspace).await?;
            print_json(&state)?;
        }
        Command::Ingest { collection, input } => {
            let kind = CollectionKind::new(&collection);
            let records = read_records(input.as_ref())?;
            let source = input
                .as_ref()
                .map(|path| path.display().to_string())
                .unwrap_or_else(|| "stdin".to_string());
            let stored = engine
                .ingest(&workspace, &kind, &source, records, INGEST_BATCH)
                .await?;
            tracing::info!(%kind, stored, "ingestion complete");
            print_json(&engine.get_state(&workspace)?)?;
        }
        Command::Search {
            query,
            limit,
            collections,
            filter,
        } => {
            let scope = SearchScope::from(
                collections
                    .iter()
                    .map(CollectionKind::new)
                    .collect::<Vec<_>>(),
            );
            let hits = engine
                .search(&workspace, &query, limit, scope, filter.as_deref())
                .await?;
            print_json(&hits)?;
        }
        Command::Stats => {
            let state = engine.refresh_stats(&workspace).await?;
            print_json(&state)?;
        }
        Command::Paths { collection } => {
            let paths = engine
                .get_indexed_paths(&workspace, &CollectionKind::new(&collection))
                .await?;
            print_json(&paths)?;
        }
        Command::Delete {
            collection,
            filter,
            file,
        } => {
            let predicate = delete_predicate(filter, file.as_deref())?;
            engine
                .delete_items(&workspace, &CollectionKind::new(&collection), &predicate)
                .await;
            print_json(&engine.get_state(&workspace)?)?;
        }
        Command::Purge { collection } => {
            let kind = collection.as_deref().map(CollectionKind::new);
            engine.purge(&workspace, kind.as_ref()).await;
            print_json(&engine.get_state(&workspace)?)?;
        }
        Command::Optimize => {
            engine.optimize(&workspace).await?;
            print_json(&engine.refresh_stats(&workspace).await?)?;
        }
    }

    Ok(())
}

/// Parse JSON-lines records, skipping blank lines.
fn read_records(input: Option<&PathBuf>) -> anyhow::Result<Vec<Record>> {
    let reader: Box<dyn std::io::BufRead> = match input {
        Some(path) if path.as_os_str() != "-" => {
            let file = std::fs::File::open(path)
                .with_context(|| format!("failed to open {}", path.display()))?;
            Box::new(std::io::BufReader::new(file))
        }
        _ => Box::new(std::io::stdin().lock()),
    };

    let mut records = Vec::new();
    for (number, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let record: Record = serde_json::from_str(&line)
            .with_context(|| format!("invalid record on line {}", number + 1))?;
        records.push(record);
    }
    Ok(records)
}

/// Resolve the delete predicate from either a raw filter or a file path.
fn delete_predicate(filter: Option<String>, file: Option<&str>) -> anyhow::Result<String> {
    match (filter, file) {
        (Some(filter), None) => Ok(filter),
        (None, Some(file)) => Ok(file_path_equals(file)),
        _ => anyhow::bail!("pass exactly one of --filter or --file"),
    }
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
