//! Stockroom Admin Binary
//!
//! Inspect and maintain a store from the command line.

use std::fs;
use std::io::{self, Read};
use std::path::PathBuf;
use std::process;
use std::time::Duration;

use clap::{Parser, Subcommand, ValueEnum};
use serde_json::Value;
use stockroom::{export, Config, Engine, Filter, Query, SortSpec, SyncStrategy};
use tracing_subscriber::{fmt, EnvFilter};

/// Stockroom admin CLI
#[derive(Parser, Debug)]
#[command(name = "stockroom")]
#[command(about = "File-based product record store")]
#[command(version)]
struct Args {
    /// Data directory
    #[arg(short, long, default_value = "./stockroom_data")]
    data_dir: PathBuf,

    /// Seconds to wait for the store lock (0 waits forever)
    #[arg(short = 't', long, default_value = "30")]
    lock_timeout: u64,

    /// Skip fsync (faster, not crash safe)
    #[arg(long)]
    no_sync: bool,

    /// Move corrupt records to quarantine/ when rebuilding
    #[arg(long)]
    quarantine: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Print a record
    Get {
        id: String,
    },

    /// Save a new record (JSON from FILE, or stdin when omitted)
    Put {
        file: Option<PathBuf>,
    },

    /// Replace a record (JSON from FILE, or stdin when omitted)
    Update {
        id: String,
        file: Option<PathBuf>,
    },

    /// Delete a record
    Delete {
        id: String,
    },

    /// Query records
    List {
        #[command(flatten)]
        query: QueryArgs,
    },

    /// Write matching records to stdout
    Export {
        #[command(flatten)]
        query: QueryArgs,

        #[arg(long, value_enum, default_value = "json")]
        format: ExportFormat,
    },

    /// Number of records
    Count,

    /// Rebuild the index from the record files
    Rebuild,

    /// Compare the index against the record files
    Check,
}

#[derive(clap::Args, Debug)]
struct QueryArgs {
    /// Filter as JSON, e.g. '{"brand": "Acme", "price.amount": {"lt": 30}}'
    #[arg(short, long)]
    filter: Option<String>,

    /// Sort field, prefix with '-' for descending
    #[arg(short, long, allow_hyphen_values = true)]
    sort: Option<String>,

    #[arg(short, long)]
    limit: Option<usize>,

    #[arg(short, long, default_value = "0")]
    offset: usize,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum ExportFormat {
    Json,
    Jsonl,
}

fn main() {
    // Initialize tracing/logging
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,stockroom=debug"));

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true)
        .with_writer(io::stderr)
        .init();

    let args = Args::parse();

    if let Err(e) = run(args) {
        tracing::error!("{}", e);
        process::exit(1);
    }
}

fn run(args: Args) -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::builder()
        .data_dir(&args.data_dir)
        .lock_timeout(match args.lock_timeout {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        })
        .sync_strategy(if args.no_sync {
            SyncStrategy::OsBuffered
        } else {
            SyncStrategy::EveryWrite
        })
        .quarantine_corrupt(args.quarantine)
        .build();

    tracing::debug!("Stockroom v{}", stockroom::VERSION);
    let engine = Engine::open(config)?;

    match args.command {
        Commands::Get { id } => print_json(&engine.get(&id)?)?,
        Commands::Put { file } => {
            let id = engine.save(read_document(file)?)?;
            println!("{}", id);
        }
        Commands::Update { id, file } => {
            engine.update(&id, read_document(file)?)?;
            println!("{}", id);
        }
        Commands::Delete { id } => {
            engine.delete(&id)?;
            println!("{}", id);
        }
        Commands::List { query } => {
            let result = engine.list(&query.build()?)?;
            for record in &result.records {
                println!("{}", serde_json::to_string(record)?);
            }
            eprintln!("{} of {} records", result.records.len(), result.total_count);
        }
        Commands::Export { query, format } => {
            let query = query.build()?;
            let stdout = io::stdout().lock();
            let written = match format {
                ExportFormat::Json => export::to_json(&engine, &query, stdout)?,
                ExportFormat::Jsonl => export::to_json_lines(&engine, &query, stdout)?,
            };
            tracing::info!(written, "export finished");
        }
        Commands::Count => println!("{}", engine.count()?),
        Commands::Rebuild => {
            let report = engine.rebuild_index()?;
            println!("indexed {} records", report.indexed);
            for id in &report.quarantined {
                println!("quarantined {}", id);
            }
        }
        Commands::Check => {
            let report = engine.check()?;
            println!("indexed: {}, on disk: {}", report.indexed, report.on_disk);
            for id in &report.missing_records {
                println!("missing record file: {}", id);
            }
            for id in &report.unindexed_records {
                println!("not indexed: {}", id);
            }
            if !report.is_consistent() {
                process::exit(2);
            }
        }
    }
    Ok(())
}

impl QueryArgs {
    fn build(&self) -> stockroom::Result<Query> {
        let mut query = Query::new().offset(self.offset);
        if let Some(raw) = &self.filter {
            let value: Value = serde_json::from_str(raw)?;
            query = query.filter(Filter::from_json(&value)?);
        }
        if let Some(sort) = &self.sort {
            query = query.sort(sort.parse::<SortSpec>()?);
        }
        if let Some(limit) = self.limit {
            query = query.limit(limit);
        }
        Ok(query)
    }
}

fn read_document(file: Option<PathBuf>) -> Result<Value, Box<dyn std::error::Error>> {
    let raw = match file {
        Some(path) => fs::read_to_string(path)?,
        None => {
            let mut buf = String::new();
            io::stdin().read_to_string(&mut buf)?;
            buf
        }
    };
    Ok(serde_json::from_str(&raw)?)
}

fn print_json(value: &Value) -> serde_json::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
