use rusqlite::{Connection, ErrorCode, OptionalExtension};

use crate::error::{Result, TallyError};
use crate::models::{CategoryType, ImportRecord, NewTransaction, PartyType};
use crate::resolver::name_key;

/// What the import engine needs from the ledger database: lookups,
/// existence checks and inserts. Nothing else.
pub trait LedgerStore {
    /// Cheap round trip; fails when the store cannot be reached.
    fn ping(&self) -> Result<()>;

    fn expense_category_names(&self) -> Result<Vec<String>>;

    fn party_names(&self) -> Result<Vec<String>>;

    fn find_category(&self, name: &str, kind: CategoryType) -> Result<Option<i64>>;

    /// Returns `TallyError::Conflict` when the name already exists.
    fn insert_category(&self, name: &str, kind: CategoryType) -> Result<i64>;

    fn find_party(&self, name: &str) -> Result<Option<i64>>;

    /// Returns `TallyError::Conflict` when the name already exists.
    fn insert_party(&self, name: &str, kind: PartyType) -> Result<i64>;

    fn insert_transaction(&self, txn: &NewTransaction) -> Result<i64>;

    fn record_import(&self, record: &ImportRecord) -> Result<i64>;
}

fn is_unique_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _)
            if e.code == ErrorCode::ConstraintViolation
                && e.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
    )
}

fn column_strings(conn: &Connection, sql: &str) -> Result<Vec<String>> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt
        .query_map([], |row| row.get(0))?
        .collect::<std::result::Result<Vec<String>, _>>()?;
    Ok(rows)
}

impl LedgerStore for Connection {
    fn ping(&self) -> Result<()> {
        self.query_row("SELECT 1", [], |r| r.get::<_, i64>(0))
            .map_err(|e| TallyError::StoreUnavailable(e.to_string()))?;
        Ok(())
    }

    fn expense_category_names(&self) -> Result<Vec<String>> {
        column_strings(
            self,
            "SELECT name FROM categories WHERE category_type = 'expense' AND is_active = 1 ORDER BY id",
        )
    }

    fn party_names(&self) -> Result<Vec<String>> {
        column_strings(self, "SELECT name FROM parties ORDER BY id")
    }

    fn find_category(&self, name: &str, kind: CategoryType) -> Result<Option<i64>> {
        let id = self
            .prepare_cached(
                "SELECT id FROM categories WHERE name_key = ?1 AND category_type = ?2",
            )?
            .query_row(rusqlite::params![name_key(name), kind.as_str()], |r| r.get(0))
            .optional()?;
        Ok(id)
    }

    fn insert_category(&self, name: &str, kind: CategoryType) -> Result<i64> {
        match self.execute(
            "INSERT INTO categories (name, name_key, category_type) VALUES (?1, ?2, ?3)",
            rusqlite::params![name.trim(), name_key(name), kind.as_str()],
        ) {
            Ok(_) => Ok(self.last_insert_rowid()),
            Err(e) if is_unique_violation(&e) => Err(TallyError::Conflict(name.to_string())),
            Err(e) => Err(e.into()),
        }
    }

    fn find_party(&self, name: &str) -> Result<Option<i64>> {
        let id = self
            .prepare_cached("SELECT id FROM parties WHERE name_key = ?1")?
            .query_row([name_key(name)], |r| r.get(0))
            .optional()?;
        Ok(id)
    }

    fn insert_party(&self, name: &str, kind: PartyType) -> Result<i64> {
        match self.execute(
            "INSERT INTO parties (name, name_key, party_type) VALUES (?1, ?2, ?3)",
            rusqlite::params![name.trim(), name_key(name), kind.as_str()],
        ) {
            Ok(_) => Ok(self.last_insert_rowid()),
            Err(e) if is_unique_violation(&e) => Err(TallyError::Conflict(name.to_string())),
            Err(e) => Err(e.into()),
        }
    }

    fn insert_transaction(&self, txn: &NewTransaction) -> Result<i64> {
        self.execute(
            "INSERT INTO transactions (date, description, amount, quantity, unit_price, tx_type, \
             category_id, party_id, source_row, created_by) \
             VALUES (?1, ?2, ?3, ?4, ?5, 'expense', ?6, ?7, ?8, ?9)",
            rusqlite::params![
                txn.date,
                txn.description,
                txn.amount,
                txn.quantity,
                txn.unit_price,
                txn.category_id,
                txn.party_id,
                txn.source_row,
                txn.created_by,
            ],
        )?;
        Ok(self.last_insert_rowid())
    }

    fn record_import(&self, record: &ImportRecord) -> Result<i64> {
        self.execute(
            "INSERT INTO imports (filename, checksum, actor, row_count, imported_count, failed_count, \
             categories_created, parties_created) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            rusqlite::params![
                record.filename,
                record.checksum,
                record.actor,
                record.row_count as i64,
                record.result.imported_count as i64,
                record.result.failed_count as i64,
                record.result.categories_created as i64,
                record.result.parties_created as i64,
            ],
        )?;
        Ok(self.last_insert_rowid())
    }
}

/// Whether a file with this checksum has been imported before.
pub fn checksum_seen(conn: &Connection, checksum: &str) -> Result<bool> {
    let mut stmt = conn.prepare("SELECT 1 FROM imports WHERE checksum = ?1")?;
    Ok(stmt.exists([checksum])?)
}
