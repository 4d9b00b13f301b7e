pub mod categories;
pub mod import;
pub mod import_review;
pub mod imports;
pub mod init;
pub mod parties;
pub mod status;

use clap::{Parser, Subcommand};
use rusqlite::Connection;

use crate::db::get_connection;
use crate::error::{Result, TallyError};
use crate::settings::Settings;

/// Open the ledger, or explain how to create it.
pub(crate) fn open_db(settings: &Settings) -> Result<Connection> {
    let db_path = settings.db_path();
    if !db_path.exists() {
        return Err(TallyError::Settings(format!(
            "No database found at {}\nRun `tally init` to set up.",
            db_path.display()
        )));
    }
    get_connection(&db_path)
}

#[derive(Parser)]
#[command(
    name = "tally",
    version,
    about = "Import expense spreadsheets into a company ledger, with review before commit."
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Set up Tally: choose a data directory and initialize the database.
    Init {
        /// Path for Tally data (default: ~/Documents/tally)
        #[arg(long = "data-dir")]
        data_dir: Option<String>,
        /// Name recorded on imported transactions
        #[arg(long)]
        user: Option<String>,
    },
    /// Import an expense sheet: preview, review, then commit.
    Import {
        /// CSV/TSV file, or '-' to read pasted cells from stdin
        file: String,
        /// Treat the input as tab-separated cells pasted from a spreadsheet
        #[arg(long)]
        paste: bool,
        /// Name recorded as creator (default: user_name from settings)
        #[arg(long)]
        actor: Option<String>,
        /// Commit without the review screen
        #[arg(long, short = 'y')]
        yes: bool,
        /// Reject a new party before committing (repeatable, with --yes)
        #[arg(long = "reject", value_name = "NAME")]
        reject: Vec<String>,
        /// Merge a new party into another: SOURCE=TARGET (repeatable, with --yes)
        #[arg(long = "merge", value_name = "SOURCE=TARGET")]
        merge: Vec<String>,
        /// Show the preview and suggestions, then stop
        #[arg(long = "dry-run")]
        dry_run: bool,
        /// List every validation error of a row, not just the first
        #[arg(long = "all-errors")]
        all_errors: bool,
    },
    /// Manage categories.
    Categories {
        #[command(subcommand)]
        command: CategoriesCommands,
    },
    /// Manage parties (customers, vendors, employees).
    Parties {
        #[command(subcommand)]
        command: PartiesCommands,
    },
    /// Show the import log.
    Imports {
        /// Number of batches to show
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
    /// Show current database and summary statistics.
    Status,
}

#[derive(Subcommand)]
pub enum CategoriesCommands {
    /// Add a category.
    Add {
        name: String,
        /// Category type: income or expense
        #[arg(long = "type", default_value = "expense")]
        category_type: String,
    },
    /// List active categories.
    List,
}

#[derive(Subcommand)]
pub enum PartiesCommands {
    /// Add a party.
    Add {
        name: String,
        /// Party type: customer, vendor, employee, other
        #[arg(long = "type", default_value = "vendor")]
        party_type: String,
    },
    /// List parties.
    List,
}
