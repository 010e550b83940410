//! # rusty-lineage
//!
//! Inspect and maintain lineage stores from the command line.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use log::warn;

use lineage::process::{last_process, list_processes, remove_process, repack};
use lineage::{import, Store};

#[derive(Parser, Debug)]
#[clap(
    name = "rusty-lineage",
    version,
    about = "Inspect and maintain lineage-tracked array stores."
)]
struct Cli {
    /// Store file to operate on.
    store: PathBuf,

    #[clap(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Print the group hierarchy below a path.
    Tree {
        #[clap(default_value = "")]
        root: String,
    },

    /// List the distinct function names of operation folders.
    List {
        #[clap(default_value = "")]
        filter: String,
    },

    /// Print the most recent operation folder.
    Last {
        #[clap(default_value = "")]
        filter: String,
    },

    /// Remove an operation folder, e.g. `003-flatten`.
    Remove { name: String },

    /// Rewrite the store to reclaim space left by removals.
    Repack {
        /// Skip the confirmation prompt.
        #[clap(long)]
        yes: bool,
    },

    /// Import a .parquet, .json or .csv spectral table under `datasets/`.
    Import { table: PathBuf },
}

/// Ask on the terminal; anything but an explicit yes declines.
fn prompt(message: &str) -> bool {
    match dialoguer::Confirm::new()
        .with_prompt(message)
        .default(false)
        .interact()
    {
        Ok(answer) => answer,
        Err(e) => {
            warn!("confirmation prompt failed: {e}");
            false
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    if std::env::var("RUST_LOG").is_err() {
        std::env::set_var("RUST_LOG", "info");
    }
    env_logger::init();

    let store_path = cli.store.as_path();
    match cli.command {
        Commands::Tree { root } => {
            let store = Store::open(store_path)
                .with_context(|| format!("opening {}", store_path.display()))?;
            print!("{}", store.tree(&root)?);
        }
        Commands::List { filter } => {
            for name in list_processes(store_path, &filter)? {
                println!("{name}");
            }
        }
        Commands::Last { filter } => match last_process(store_path, &filter)? {
            Some(name) => println!("{name}"),
            None => println!("no operation folders"),
        },
        Commands::Remove { name } => {
            remove_process(store_path, &name)?;
        }
        Commands::Repack { yes } => {
            if let Some(report) = repack(store_path, yes, &prompt)? {
                println!(
                    "{} bytes -> {} bytes",
                    report.bytes_before, report.bytes_after
                );
            }
        }
        Commands::Import { table } => {
            let mut store = Store::open_or_create(store_path)
                .with_context(|| format!("opening {}", store_path.display()))?;
            let groups = import::import_table(&mut store, &table)?;
            store.close()?;
            println!("imported {} rows", groups.len());
        }
    }
    Ok(())
}
