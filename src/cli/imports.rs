use comfy_table::{Cell, Table};
use rusqlite::Connection;

use crate::cli::open_db;
use crate::error::Result;
use crate::settings::load_settings;

#[derive(Debug, Clone)]
pub struct ImportLogRow {
    pub id: i64,
    pub imported_at: String,
    pub filename: String,
    pub actor: String,
    pub row_count: i64,
    pub imported_count: i64,
    pub failed_count: i64,
    pub categories_created: i64,
    pub parties_created: i64,
}

pub fn run(limit: usize) -> Result<()> {
    let conn = open_db(&load_settings())?;
    let batches = recent_imports(&conn, limit)?;
    if batches.is_empty() {
        println!("No imports yet.");
        return Ok(());
    }

    let mut table = Table::new();
    table.set_header(vec![
        "ID", "When", "File", "By", "Rows", "Imported", "Failed", "New Cat.", "New Parties",
    ]);
    for b in batches {
        table.add_row(vec![
            Cell::new(b.id),
            Cell::new(b.imported_at),
            Cell::new(b.filename),
            Cell::new(b.actor),
            Cell::new(b.row_count),
            Cell::new(b.imported_count),
            Cell::new(b.failed_count),
            Cell::new(b.categories_created),
            Cell::new(b.parties_created),
        ]);
    }
    println!("Imports\n{table}");
    Ok(())
}

/// Newest first.
pub fn recent_imports(conn: &Connection, limit: usize) -> Result<Vec<ImportLogRow>> {
    let mut stmt = conn.prepare(
        "SELECT id, imported_at, filename, actor, row_count, imported_count, failed_count, \
         categories_created, parties_created FROM imports ORDER BY id DESC LIMIT ?1",
    )?;
    let rows = stmt
        .query_map([limit as i64], |row| {
            Ok(ImportLogRow {
                id: row.get(0)?,
                imported_at: row.get(1)?,
                filename: row.get(2)?,
                actor: row.get(3)?,
                row_count: row.get(4)?,
                imported_count: row.get(5)?,
                failed_count: row.get(6)?,
                categories_created: row.get(7)?,
                parties_created: row.get(8)?,
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}
