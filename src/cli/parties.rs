use comfy_table::{Cell, Table};
use rusqlite::Connection;

use crate::cli::open_db;
use crate::error::{Result, TallyError};
use crate::models::PartyType;
use crate::settings::load_settings;
use crate::store::LedgerStore;

#[derive(Debug, Clone)]
pub struct PartyRow {
    pub id: i64,
    pub name: String,
    pub party_type: String,
    pub transactions: i64,
}

pub fn add(name: &str, party_type: &str) -> Result<()> {
    let conn = open_db(&load_settings())?;
    add_party(&conn, name, party_type)?;
    println!("Added party: {}", name.trim());
    Ok(())
}

pub fn list() -> Result<()> {
    let conn = open_db(&load_settings())?;
    let parties = list_parties(&conn)?;

    let mut table = Table::new();
    table.set_header(vec!["ID", "Name", "Type", "Transactions"]);
    for p in parties {
        table.add_row(vec![
            Cell::new(p.id),
            Cell::new(p.name),
            Cell::new(p.party_type),
            Cell::new(p.transactions),
        ]);
    }
    println!("Parties\n{table}");
    Ok(())
}

pub fn add_party(conn: &Connection, name: &str, party_type: &str) -> Result<i64> {
    let kind = PartyType::parse(party_type).ok_or_else(|| {
        TallyError::Other(format!(
            "Unknown party type '{party_type}' (expected customer, vendor, employee or other)"
        ))
    })?;
    let name = name.trim();
    if name.is_empty() {
        return Err(TallyError::Other("Party name is required".into()));
    }
    conn.insert_party(name, kind)
}

pub fn list_parties(conn: &Connection) -> Result<Vec<PartyRow>> {
    let mut stmt = conn.prepare(
        "SELECT p.id, p.name, p.party_type, count(t.id) \
         FROM parties p LEFT JOIN transactions t ON t.party_id = p.id \
         GROUP BY p.id ORDER BY p.name_key",
    )?;
    let rows = stmt
        .query_map([], |row| {
            Ok(PartyRow {
                id: row.get(0)?,
                name: row.get(1)?,
                party_type: row.get(2)?,
                transactions: row.get(3)?,
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}
