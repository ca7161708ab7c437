//! Shelf CLI Binary
//!
//! Inspect and edit a shelf storage root from the command line. Values are handled as untyped
//! JSON documents, whatever the on-disk format.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde_json::Value;
use shelf::config::ConfigLoader;
use shelf::logging::init_logging;
use shelf::{Shelf, ShelfConfig};
use std::io::BufRead;
use std::path::PathBuf;
use std::process;
use tracing::{error, info};

/// Shelf CLI - filesystem-backed object store
#[derive(Parser)]
#[command(name = "shelf")]
#[command(about = "Inspect and edit a shelf storage root")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Storage root directory (overrides config)
    #[arg(long)]
    root: Option<PathBuf>,

    /// Entry format: json, yaml or xml (overrides config)
    #[arg(long)]
    format: Option<String>,

    /// Configuration file path
    #[arg(long)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(long, default_value = "false")]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// List entry ids of a store
    Ids { store: String },
    /// Print one entry
    Get { store: String, id: String },
    /// Create or replace an entry from a JSON document
    Put {
        store: String,
        /// Entry id; a random one is generated when omitted
        #[arg(long)]
        id: Option<String>,
        /// JSON document
        value: String,
    },
    /// Delete an entry
    Rm { store: String, id: String },
    /// Print store events until stdin is closed
    Watch {
        #[arg(required = true)]
        stores: Vec<String>,
    },
}

fn main() {
    let cli = Cli::parse();

    let config = match build_config(&cli) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Invalid configuration: {:#}", e);
            process::exit(1);
        }
    };

    if let Err(e) = init_logging(Some(&config.effective_logging())) {
        eprintln!("Failed to initialize logging: {}", e);
        process::exit(1);
    }

    info!(root = %config.storage_dir.display(), format = %config.format, "Shelf CLI starting");

    match execute(&cli.command, config) {
        Ok(output) => {
            if !output.is_empty() {
                println!("{}", output);
            }
        }
        Err(e) => {
            error!("Command failed: {:#}", e);
            eprintln!("{:#}", e);
            process::exit(1);
        }
    }
}

/// Precedence: CLI flags override config file and environment, which override defaults.
fn build_config(cli: &Cli) -> Result<ShelfConfig> {
    let mut config = ConfigLoader::load(cli.config.as_deref())?;
    if let Some(root) = &cli.root {
        config.storage_dir = root.clone();
    }
    if let Some(format) = &cli.format {
        config.format = format.clone();
    }
    if cli.verbose {
        config.verbose = true;
    }
    config.validate()?;
    Ok(config)
}

fn execute(command: &Commands, mut config: ShelfConfig) -> Result<String> {
    config.watch = matches!(command, Commands::Watch { .. });
    let shelf = Shelf::new(config)?;

    match command {
        Commands::Ids { store } => {
            let store = shelf.register::<Value>(store)?;
            shelf.run()?;
            let mut ids = store.ids();
            ids.sort();
            Ok(ids.join("\n"))
        }
        Commands::Get { store, id } => {
            let store = shelf.register::<Value>(store)?;
            shelf.run()?;
            let value = store.get(id)?;
            Ok(serde_json::to_string_pretty(&value)?)
        }
        Commands::Put { store, id, value } => {
            let store = shelf.register::<Value>(store)?;
            shelf.run()?;
            let value: Value = serde_json::from_str(value).context("Value is not valid JSON")?;
            let id = match id {
                Some(id) => {
                    store.set(id, value)?;
                    id.clone()
                }
                None => store.new_entry(value)?,
            };
            Ok(id)
        }
        Commands::Rm { store, id } => {
            let store = shelf.register::<Value>(store)?;
            shelf.run()?;
            store.delete(id)?;
            Ok(String::new())
        }
        Commands::Watch { stores } => {
            for name in stores {
                shelf.register::<Value>(name)?;
            }
            shelf.set_event_handler(|kind, store, id| println!("{}\t{}\t{}", kind, store, id));
            shelf.run()?;

            let stdin = std::io::stdin();
            let mut line = String::new();
            while stdin.lock().read_line(&mut line)? > 0 {
                line.clear();
            }
            shelf.shutdown();
            Ok(String::new())
        }
    }
}
