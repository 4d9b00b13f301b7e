mod cli;
mod db;
mod error;
mod fmt;
mod importer;
mod models;
mod normalize;
mod parser;
mod resolver;
mod review;
mod settings;
mod similarity;
mod store;
mod tui;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use cli::import::ImportArgs;
use cli::{CategoriesCommands, Cli, Commands, PartiesCommands};

/// Logs go to stderr so tables and the review screen stay clean.
/// `TALLY_LOG` wins over `RUST_LOG`; the default is warnings only.
fn init_tracing() {
    let filter = std::env::var("TALLY_LOG")
        .ok()
        .and_then(|v| EnvFilter::try_new(v).ok())
        .or_else(|| EnvFilter::try_from_default_env().ok())
        .unwrap_or_else(|| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn main() {
    init_tracing();
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Init { data_dir, user } => cli::init::run(data_dir, user),
        Commands::Import {
            file,
            paste,
            actor,
            yes,
            reject,
            merge,
            dry_run,
            all_errors,
        } => cli::import::run(ImportArgs {
            file,
            paste,
            actor,
            yes,
            reject,
            merge,
            dry_run,
            all_errors,
        }),
        Commands::Categories { command } => match command {
            CategoriesCommands::Add {
                name,
                category_type,
            } => cli::categories::add(&name, &category_type),
            CategoriesCommands::List => cli::categories::list(),
        },
        Commands::Parties { command } => match command {
            PartiesCommands::Add { name, party_type } => cli::parties::add(&name, &party_type),
            PartiesCommands::List => cli::parties::list(),
        },
        Commands::Imports { limit } => cli::imports::run(limit),
        Commands::Status => cli::status::run(),
    };

    if let Err(e) = result {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}
