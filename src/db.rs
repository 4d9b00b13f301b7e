use std::path::Path;

use rusqlite::Connection;

use crate::error::Result;
use crate::resolver::name_key;

pub const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS categories (
    id INTEGER PRIMARY KEY,
    name TEXT NOT NULL,
    -- trimmed, Unicode-lowercased name; identity for lookups
    name_key TEXT NOT NULL,
    category_type TEXT NOT NULL,
    description TEXT,
    is_active INTEGER DEFAULT 1
);

CREATE UNIQUE INDEX IF NOT EXISTS idx_categories_name
    ON categories (name_key, category_type);

CREATE TABLE IF NOT EXISTS parties (
    id INTEGER PRIMARY KEY,
    name TEXT NOT NULL,
    name_key TEXT NOT NULL,
    party_type TEXT NOT NULL,
    created_at TEXT DEFAULT (datetime('now'))
);

CREATE UNIQUE INDEX IF NOT EXISTS idx_parties_name
    ON parties (name_key);

CREATE TABLE IF NOT EXISTS projects (
    id INTEGER PRIMARY KEY,
    name TEXT NOT NULL,
    is_active INTEGER DEFAULT 1
);

CREATE TABLE IF NOT EXISTS transactions (
    id INTEGER PRIMARY KEY,
    date TEXT NOT NULL,
    description TEXT NOT NULL,
    amount REAL NOT NULL CHECK (amount > 0),
    quantity REAL,
    unit_price REAL,
    tx_type TEXT NOT NULL DEFAULT 'expense',
    category_id INTEGER NOT NULL,
    party_id INTEGER,
    project_id INTEGER,
    source_row INTEGER,
    created_by TEXT NOT NULL,
    created_at TEXT DEFAULT (datetime('now')),
    FOREIGN KEY (category_id) REFERENCES categories(id),
    FOREIGN KEY (party_id) REFERENCES parties(id),
    FOREIGN KEY (project_id) REFERENCES projects(id)
);

CREATE TABLE IF NOT EXISTS imports (
    id INTEGER PRIMARY KEY,
    filename TEXT NOT NULL,
    checksum TEXT,
    actor TEXT NOT NULL,
    row_count INTEGER NOT NULL,
    imported_count INTEGER NOT NULL,
    failed_count INTEGER NOT NULL,
    categories_created INTEGER NOT NULL,
    parties_created INTEGER NOT NULL,
    imported_at TEXT DEFAULT (datetime('now'))
);
";

// (name, category_type, description)
const DEFAULT_CATEGORIES: &[(&str, &str, &str)] = &[
    // Income
    ("Sales", "income", "Product and service sales"),
    ("Interest Income", "income", "Bank interest"),
    ("Other Income", "income", "Anything else"),
    // Expenses
    ("Rent", "expense", "Office and warehouse rent"),
    ("Utilities", "expense", "Electricity, water, gas, internet"),
    ("Office Supplies", "expense", "Stationery, consumables"),
    ("Fuel", "expense", "Vehicle fuel"),
    ("Meals", "expense", "Business meals"),
    ("Salaries", "expense", "Employee wages"),
    ("Professional Services", "expense", "Accountant, lawyer, consultants"),
    ("Bank Fees", "expense", "Bank charges, wire fees"),
    ("Taxes & Licenses", "expense", "Fees and permits"),
    ("Other Expenses", "expense", "Needs review"),
];

pub fn get_connection(db_path: &Path) -> Result<Connection> {
    let conn = Connection::open(db_path)?;
    conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")?;
    Ok(conn)
}

pub fn init_db(conn: &Connection) -> Result<()> {
    conn.execute_batch(SCHEMA)?;

    let count: i64 = conn.query_row("SELECT count(*) FROM categories", [], |row| row.get(0))?;
    if count == 0 {
        for cat in DEFAULT_CATEGORIES {
            conn.execute(
                "INSERT INTO categories (name, name_key, category_type, description) \
                 VALUES (?1, ?2, ?3, ?4)",
                rusqlite::params![cat.0, name_key(cat.0), cat.1, cat.2],
            )?;
        }
    }
    Ok(())
}

#[cfg(test)]
pub(crate) fn test_db() -> (tempfile::TempDir, Connection) {
    let dir = tempfile::tempdir().unwrap();
    let conn = get_connection(&dir.path().join("test.db")).unwrap();
    init_db(&conn).unwrap();
    (dir, conn)
}
