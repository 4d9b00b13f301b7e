use std::collections::HashMap;
use std::io::Read;
use std::path::Path;

use sha2::{Digest, Sha256};
use tracing::{info, warn};

use crate::error::{Result, TallyError};
use crate::models::{
    CategoryType, ImportPreview, ImportRecord, ImportResult, ImportRow, NewTransaction, PartyType,
    RowError,
};
use crate::normalize::normalize_row;
use crate::parser::{parse_delimited, parse_pasted_grid, rows_from_sheet};
use crate::resolver::{name_key, resolve, KnownEntities};
use crate::store::LedgerStore;

// ---------------------------------------------------------------------------
// Source input
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SourceKind {
    /// CSV/TSV file with a header line; delimiter detected.
    Delimited,
    /// Tab-separated cells pasted from a spreadsheet.
    Pasted,
}

pub struct SourceContent {
    pub file_name: String,
    pub content: String,
    pub checksum: String,
}

fn compute_checksum(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

/// Read a file, or stdin when `path` is `-`.
pub fn read_source(path: &str) -> Result<SourceContent> {
    let (file_name, data) = if path == "-" {
        let mut buf = Vec::new();
        std::io::stdin().read_to_end(&mut buf)?;
        ("<stdin>".to_string(), buf)
    } else {
        let p = Path::new(path);
        let name = p
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or(path)
            .to_string();
        (name, std::fs::read(p)?)
    };
    let checksum = compute_checksum(&data);
    let content = String::from_utf8(data)
        .map_err(|e| TallyError::Other(format!("{file_name} is not valid UTF-8 text: {e}")))?;
    Ok(SourceContent {
        file_name,
        content,
        checksum,
    })
}

// ---------------------------------------------------------------------------
// Preview
// ---------------------------------------------------------------------------

/// Parse, validate and resolve one batch.
pub fn build_preview(
    file_name: &str,
    content: &str,
    kind: SourceKind,
    known: &KnownEntities,
    header_keywords: &[String],
) -> Result<ImportPreview> {
    let parsed = match kind {
        SourceKind::Delimited => rows_from_sheet(&parse_delimited(content)?),
        SourceKind::Pasted => parse_pasted_grid(content, header_keywords),
    };
    let rows: Vec<ImportRow> = parsed.rows.into_iter().map(normalize_row).collect();
    let resolution = resolve(rows, known);

    let valid_rows = resolution.rows.iter().filter(|r| r.is_valid).count();
    let total_rows = resolution.rows.len();
    Ok(ImportPreview {
        file_name: file_name.to_string(),
        total_rows,
        valid_rows,
        invalid_rows: total_rows - valid_rows,
        skipped_rows: parsed.skipped,
        rows: resolution.rows,
        categories: resolution.categories,
        parties: resolution.parties,
    })
}

// ---------------------------------------------------------------------------
// Commit
// ---------------------------------------------------------------------------

/// Look a name up, create it when missing, and fall back to a second
/// lookup when the insert loses a race with another session.
fn ensure_entity(
    name: &str,
    find: impl Fn() -> Result<Option<i64>>,
    insert: impl Fn() -> Result<i64>,
) -> Result<(i64, bool)> {
    if let Some(id) = find()? {
        return Ok((id, false));
    }
    match insert() {
        Ok(id) => Ok((id, true)),
        Err(TallyError::Conflict(_)) => {
            warn!(entity = name, "created concurrently, using existing row");
            find()?
                .map(|id| (id, false))
                .ok_or_else(|| TallyError::Conflict(name.to_string()))
        }
        Err(e) => Err(e),
    }
}

/// The id of a name the preview saw as existing.
fn existing(name: &str, found: Result<Option<i64>>) -> Result<(i64, bool)> {
    found?
        .map(|id| (id, false))
        .ok_or_else(|| TallyError::Other(format!("'{name}' no longer exists")))
}

/// Names referenced by the rows, first spelling kept, split by whether the
/// preview judged them new.
fn referenced_names<'a>(
    rows: &[&'a ImportRow],
    name: impl Fn(&'a ImportRow) -> &'a str,
    is_new: impl Fn(&ImportRow) -> bool,
) -> Vec<(&'a str, bool)> {
    let mut seen: HashMap<String, usize> = HashMap::new();
    let mut names: Vec<(&'a str, bool)> = Vec::new();
    for row in rows {
        let n = name(*row).trim();
        if n.is_empty() {
            continue;
        }
        let key = name_key(n);
        match seen.get(&key) {
            Some(&idx) => names[idx].1 |= is_new(*row),
            None => {
                seen.insert(key, names.len());
                names.push((n, is_new(*row)));
            }
        }
    }
    names
}

/// Persist the selected rows. New categories and parties still referenced
/// by a selected row are created first; then rows are inserted one by one
/// in source order. A failing row is recorded and the rest continue; rows
/// already written are never rolled back.
pub fn execute_import<S: LedgerStore + ?Sized>(
    store: &S,
    selected_rows: &[ImportRow],
    actor: &str,
    party_type: PartyType,
) -> Result<ImportResult> {
    store.ping()?;

    let mut rows: Vec<&ImportRow> = selected_rows
        .iter()
        .filter(|r| r.selected && r.is_valid)
        .collect();
    if rows.len() < selected_rows.len() {
        warn!(
            dropped = selected_rows.len() - rows.len(),
            "ignoring rows that are not selected or not valid"
        );
    }
    rows.sort_by_key(|r| r.row_number);
    info!(rows = rows.len(), actor, "starting import");

    let mut result = ImportResult::default();
    let mut category_ids: HashMap<String, i64> = HashMap::new();
    let mut party_ids: HashMap<String, i64> = HashMap::new();
    let mut unresolved: HashMap<String, String> = HashMap::new();

    let categories = referenced_names(&rows, |r| r.expense_type.as_str(), |r| r.is_new_category);
    for (name, is_new) in categories {
        let outcome = if is_new {
            ensure_entity(
                name,
                || store.find_category(name, CategoryType::Expense),
                || store.insert_category(name, CategoryType::Expense),
            )
        } else {
            existing(name, store.find_category(name, CategoryType::Expense))
        };
        match outcome {
            Ok((id, created)) => {
                if created {
                    info!(category = name, id, "created category");
                    result.categories_created += 1;
                }
                category_ids.insert(name_key(name), id);
            }
            Err(e) => {
                warn!(category = name, error = %e, "category unavailable");
                unresolved.insert(format!("c:{}", name_key(name)), format!("category '{name}': {e}"));
            }
        }
    }

    let parties = referenced_names(&rows, |r| r.location.as_str(), |r| r.is_new_party);
    for (name, is_new) in parties {
        let outcome = if is_new {
            ensure_entity(
                name,
                || store.find_party(name),
                || store.insert_party(name, party_type),
            )
        } else {
            existing(name, store.find_party(name))
        };
        match outcome {
            Ok((id, created)) => {
                if created {
                    info!(party = name, id, "created party");
                    result.parties_created += 1;
                }
                party_ids.insert(name_key(name), id);
            }
            Err(e) => {
                warn!(party = name, error = %e, "party unavailable");
                unresolved.insert(format!("p:{}", name_key(name)), format!("party '{name}': {e}"));
            }
        }
    }

    for row in rows {
        let failure = |message: String| RowError {
            row: row.row_number,
            message,
        };

        let category_key = name_key(&row.expense_type);
        let Some(&category_id) = category_ids.get(&category_key) else {
            let why = unresolved
                .get(&format!("c:{category_key}"))
                .cloned()
                .unwrap_or_else(|| format!("category '{}'", row.expense_type));
            result.row_errors.push(failure(format!("Unresolved {why}")));
            continue;
        };

        let party_id = if row.has_party() {
            let party_key = name_key(&row.location);
            match party_ids.get(&party_key) {
                Some(&id) => Some(id),
                None => {
                    let why = unresolved
                        .get(&format!("p:{party_key}"))
                        .cloned()
                        .unwrap_or_else(|| format!("party '{}'", row.location));
                    result.row_errors.push(failure(format!("Unresolved {why}")));
                    continue;
                }
            }
        } else {
            None
        };

        let (Some(date), Some(amount)) = (row.date_iso.clone(), row.total) else {
            result.row_errors.push(failure("Row has no date or total".into()));
            continue;
        };
        let description = if row.item_type.trim().is_empty() {
            row.expense_type.trim().to_string()
        } else {
            row.item_type.trim().to_string()
        };

        let txn = NewTransaction {
            date,
            description,
            amount,
            quantity: row.quantity,
            unit_price: row.unit_price,
            category_id,
            party_id,
            source_row: row.row_number,
            created_by: actor.to_string(),
        };
        match store.insert_transaction(&txn) {
            Ok(_) => result.imported_count += 1,
            Err(e) => {
                warn!(row = row.row_number, error = %e, "row failed to import");
                result.row_errors.push(failure(e.to_string()));
            }
        }
    }

    result.failed_count = result.row_errors.len();
    info!(
        imported = result.imported_count,
        failed = result.failed_count,
        categories_created = result.categories_created,
        parties_created = result.parties_created,
        "import finished"
    );
    Ok(result)
}

/// Add the batch to the import log.
pub fn record_batch<S: LedgerStore + ?Sized>(
    store: &S,
    source: &SourceContent,
    actor: &str,
    row_count: usize,
    result: &ImportResult,
) -> Result<i64> {
    store.record_import(&ImportRecord {
        filename: source.file_name.clone(),
        checksum: Some(source.checksum.clone()),
        actor: actor.to_string(),
        row_count,
        result: result.clone(),
    })
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;

    use rusqlite::Connection;

    use super::*;
    use crate::db::test_db;
    use crate::review::ReviewState;

    const ACTOR: &str = "tester";

    fn preview(conn: &Connection, text: &str) -> (ImportPreview, KnownEntities) {
        let known = KnownEntities::load(conn).unwrap();
        let preview = build_preview("paste", text, SourceKind::Pasted, &known, &[]).unwrap();
        (preview, known)
    }

    fn count(conn: &Connection, sql: &str) -> i64 {
        conn.query_row(sql, [], |r| r.get(0)).unwrap()
    }

    #[test]
    fn test_build_preview_counts() {
        let (_dir, conn) = test_db();
        let text = "Expense\tDate\tLocation\tItem\n\
                    Fuel\t15.03.2024\tShell\tDiesel\t\t\t80\n\
                    Fuel\tnope\tShell\tDiesel\t\t\t80\n\
                    too\tshort\n";
        let (p, _) = preview(&conn, text);
        assert_eq!(p.total_rows, 2);
        assert_eq!(p.valid_rows, 1);
        assert_eq!(p.invalid_rows, 1);
        assert_eq!(p.skipped_rows, 1);
        assert_eq!(p.parties.len(), 1);
        assert!(!p.parties[0].exists);
        assert!(p.categories[0].exists);
    }

    #[test]
    fn test_build_preview_delimited() {
        let (_dir, conn) = test_db();
        let known = KnownEntities::load(&conn).unwrap();
        let csv = "Expense,Date,Location,Item,Quantity,Unit price,Total\n\
                   Parking,2024-03-01,City Park,Ticket,2,\"7,50\",\n";
        let p = build_preview("march.csv", csv, SourceKind::Delimited, &known, &[]).unwrap();
        assert_eq!(p.rows[0].row_number, 2);
        assert_eq!(p.rows[0].total, Some(15.0));
        assert!(p.rows[0].is_new_category);
    }

    #[test]
    fn test_selective_commit() {
        let (_dir, conn) = test_db();
        conn.insert_party("Shell", PartyType::Vendor).unwrap();
        let text = "Fuel\t2024-03-01\tShell\tDiesel\t\t\t50\n\
                    Parking\t2024-03-02\tCity Park\tTicket\t\t\t8\n\
                    Fuel\tbad-date\tShell\tDiesel\t\t\t40\n\
                    Snacks\t2024-03-04\tCorner Shop\tWater\t\t\t0\n\
                    Meals\t2024-03-05\tCafe Roma\tLunch\t\t\t20\n";
        let (p, known) = preview(&conn, text);
        assert_eq!(p.invalid_rows, 2);

        let state = ReviewState::new(&p, known).toggle_party("Cafe Roma").unwrap();
        let selected = state.selected_rows();
        assert_eq!(selected.len(), 2);

        let result = execute_import(&conn, &selected, ACTOR, PartyType::Vendor).unwrap();
        assert_eq!(result.imported_count, 2);
        assert_eq!(result.failed_count, 0);
        assert_eq!(result.categories_created, 1);
        assert_eq!(result.parties_created, 1);

        assert_eq!(count(&conn, "SELECT count(*) FROM parties WHERE name = 'Cafe Roma'"), 0);
        assert_eq!(count(&conn, "SELECT count(*) FROM parties WHERE name = 'Corner Shop'"), 0);
        assert_eq!(count(&conn, "SELECT count(*) FROM categories WHERE name = 'Snacks'"), 0);
        assert_eq!(count(&conn, "SELECT count(*) FROM categories WHERE name = 'Parking'"), 1);
        assert_eq!(count(&conn, "SELECT count(*) FROM transactions WHERE created_by = 'tester'"), 2);
    }

    #[test]
    fn test_partial_persistence_failure() {
        let (_dir, conn) = test_db();
        conn.execute_batch(
            "CREATE TRIGGER reject_boom BEFORE INSERT ON transactions \
             WHEN NEW.description = 'boom' \
             BEGIN SELECT RAISE(ABORT, 'constraint failed: boom'); END;",
        )
        .unwrap();
        let text = "Fuel\t2024-03-01\tShell\tDiesel\t\t\t50\n\
                    Fuel\t2024-03-02\tShell\tboom\t\t\t60\n\
                    Fuel\t2024-03-03\tShell\tDiesel\t\t\t70\n";
        let (p, known) = preview(&conn, text);
        let state = ReviewState::new(&p, known);

        let result = execute_import(&conn, &state.selected_rows(), ACTOR, PartyType::Vendor).unwrap();
        assert_eq!(result.imported_count, 2);
        assert_eq!(result.failed_count, 1);
        assert_eq!(result.row_errors.len(), 1);
        assert_eq!(result.row_errors[0].row, 2);
        assert!(result.row_errors[0].message.contains("boom"));

        let rows: Vec<i64> = conn
            .prepare("SELECT source_row FROM transactions ORDER BY source_row")
            .unwrap()
            .query_map([], |r| r.get(0))
            .unwrap()
            .collect::<std::result::Result<Vec<_>, _>>()
            .unwrap();
        assert_eq!(rows, vec![1, 3]);
    }

    #[test]
    fn test_merged_away_party_is_not_created() {
        let (_dir, conn) = test_db();
        conn.insert_party("Shell", PartyType::Vendor).unwrap();
        let text = "Fuel\t2024-03-01\tShell Express\tDiesel\t\t\t50\n";
        let (p, known) = preview(&conn, text);
        let state = ReviewState::new(&p, known).merge("Shell Express", "Shell").unwrap();

        let result = execute_import(&conn, &state.selected_rows(), ACTOR, PartyType::Vendor).unwrap();
        assert_eq!(result.imported_count, 1);
        assert_eq!(result.parties_created, 0);
        assert_eq!(count(&conn, "SELECT count(*) FROM parties"), 1);
        assert_eq!(
            count(&conn, "SELECT count(*) FROM transactions t JOIN parties p ON t.party_id = p.id WHERE p.name = 'Shell'"),
            1
        );
    }

    #[test]
    fn test_unselected_and_invalid_rows_are_ignored() {
        let (_dir, conn) = test_db();
        let text = "Fuel\t2024-03-01\tShell\tDiesel\t\t\t50\nFuel\tbad\tShell\tDiesel\t\t\t50\n";
        let (p, _) = preview(&conn, text);
        let mut rows = p.rows.clone();
        rows[1].selected = true;
        let result = execute_import(&conn, &rows, ACTOR, PartyType::Vendor).unwrap();
        assert_eq!(result.imported_count, 1);
        assert_eq!(result.failed_count, 0);
    }

    /// Hides one party from its first lookup, as if another operator
    /// created it between our check and our insert.
    struct RacingStore<'a> {
        conn: &'a Connection,
        hidden: &'a str,
        lookups: Cell<usize>,
    }

    impl LedgerStore for RacingStore<'_> {
        fn ping(&self) -> Result<()> {
            self.conn.ping()
        }
        fn expense_category_names(&self) -> Result<Vec<String>> {
            self.conn.expense_category_names()
        }
        fn party_names(&self) -> Result<Vec<String>> {
            self.conn.party_names()
        }
        fn find_category(&self, name: &str, kind: CategoryType) -> Result<Option<i64>> {
            self.conn.find_category(name, kind)
        }
        fn insert_category(&self, name: &str, kind: CategoryType) -> Result<i64> {
            self.conn.insert_category(name, kind)
        }
        fn find_party(&self, name: &str) -> Result<Option<i64>> {
            if name == self.hidden && self.lookups.get() == 0 {
                self.lookups.set(1);
                return Ok(None);
            }
            self.conn.find_party(name)
        }
        fn insert_party(&self, name: &str, kind: PartyType) -> Result<i64> {
            self.conn.insert_party(name, kind)
        }
        fn insert_transaction(&self, txn: &NewTransaction) -> Result<i64> {
            self.conn.insert_transaction(txn)
        }
        fn record_import(&self, record: &ImportRecord) -> Result<i64> {
            self.conn.record_import(record)
        }
    }

    #[test]
    fn test_concurrent_party_creation_reuses_existing_row() {
        let (_dir, conn) = test_db();
        let text = "Meals\t2024-03-05\tCafe Roma\tLunch\t\t\t20\n";
        let (p, known) = preview(&conn, text);
        let state = ReviewState::new(&p, known);

        // Another session creates the party after our preview was built.
        let existing = conn.insert_party("Cafe Roma", PartyType::Vendor).unwrap();
        let store = RacingStore {
            conn: &conn,
            hidden: "Cafe Roma",
            lookups: Cell::new(0),
        };

        let result = execute_import(&store, &state.selected_rows(), ACTOR, PartyType::Vendor).unwrap();
        assert_eq!(result.imported_count, 1);
        assert_eq!(result.parties_created, 0);
        assert_eq!(count(&conn, "SELECT count(*) FROM parties"), 1);
        let party_id: i64 = count(&conn, "SELECT party_id FROM transactions");
        assert_eq!(party_id, existing);
    }

    #[test]
    fn test_deleted_category_fails_its_rows_only() {
        let (_dir, conn) = test_db();
        let text = "Fuel\t2024-03-01\tShell\tDiesel\t\t\t50\nMeals\t2024-03-02\tCafe\tLunch\t\t\t20\n";
        let (p, known) = preview(&conn, text);
        let state = ReviewState::new(&p, known);
        conn.execute("DELETE FROM categories WHERE name = 'Fuel'", []).unwrap();

        let result = execute_import(&conn, &state.selected_rows(), ACTOR, PartyType::Vendor).unwrap();
        assert_eq!(result.imported_count, 1);
        assert_eq!(result.failed_count, 1);
        assert_eq!(result.row_errors[0].row, 1);
        assert!(result.row_errors[0].message.starts_with("Unresolved category 'Fuel'"));
    }

    #[test]
    fn test_non_ascii_case_variants_reuse_existing_rows() {
        let (_dir, conn) = test_db();
        let party = conn.insert_party("ŞELL", PartyType::Vendor).unwrap();
        conn.insert_category("ŞEKER", CategoryType::Expense).unwrap();
        let text = "şeker\t2024-03-01\tşell\tBenzin\t\t\t900\n";
        let (p, known) = preview(&conn, text);
        assert!(!p.rows[0].is_new_party);
        assert!(!p.rows[0].is_new_category);

        let state = ReviewState::new(&p, known);
        let result = execute_import(&conn, &state.selected_rows(), ACTOR, PartyType::Vendor).unwrap();
        assert_eq!(result.imported_count, 1);
        assert_eq!(result.failed_count, 0);
        assert_eq!(result.parties_created, 0);
        assert_eq!(result.categories_created, 0);
        assert_eq!(count(&conn, "SELECT count(*) FROM parties"), 1);
        assert_eq!(count(&conn, "SELECT party_id FROM transactions"), party);
    }

    #[test]
    fn test_non_ascii_case_variants_in_one_batch_create_once() {
        let (_dir, conn) = test_db();
        let text = "Fuel\t2024-03-01\tÖZ Market\tSu\t\t\t10\n\
                    Fuel\t2024-03-02\töz market\tSu\t\t\t12\n";
        let (p, known) = preview(&conn, text);
        assert_eq!(p.parties.len(), 1);

        let state = ReviewState::new(&p, known);
        let result = execute_import(&conn, &state.selected_rows(), ACTOR, PartyType::Vendor).unwrap();
        assert_eq!(result.imported_count, 2);
        assert_eq!(result.parties_created, 1);
        assert_eq!(count(&conn, "SELECT count(*) FROM parties WHERE name_key = 'öz market'"), 1);
    }

    struct OfflineStore;

    impl LedgerStore for OfflineStore {
        fn ping(&self) -> Result<()> {
            Err(TallyError::StoreUnavailable("connection refused".into()))
        }
        fn expense_category_names(&self) -> Result<Vec<String>> {
            unreachable!()
        }
        fn party_names(&self) -> Result<Vec<String>> {
            unreachable!()
        }
        fn find_category(&self, _: &str, _: CategoryType) -> Result<Option<i64>> {
            unreachable!()
        }
        fn insert_category(&self, _: &str, _: CategoryType) -> Result<i64> {
            unreachable!()
        }
        fn find_party(&self, _: &str) -> Result<Option<i64>> {
            unreachable!()
        }
        fn insert_party(&self, _: &str, _: PartyType) -> Result<i64> {
            unreachable!()
        }
        fn insert_transaction(&self, _: &NewTransaction) -> Result<i64> {
            unreachable!()
        }
        fn record_import(&self, _: &ImportRecord) -> Result<i64> {
            unreachable!()
        }
    }

    #[test]
    fn test_unreachable_store_fails_whole_batch() {
        let (_dir, conn) = test_db();
        let (p, known) = preview(&conn, "Fuel\t2024-03-01\tShell\tDiesel\t\t\t50\n");
        let state = ReviewState::new(&p, known);
        let err = execute_import(&OfflineStore, &state.selected_rows(), ACTOR, PartyType::Vendor);
        assert!(matches!(err, Err(TallyError::StoreUnavailable(_))));
        assert_eq!(count(&conn, "SELECT count(*) FROM transactions"), 0);
    }

    #[test]
    fn test_record_batch_logs_import() {
        let (_dir, conn) = test_db();
        let source = SourceContent {
            file_name: "march.csv".into(),
            content: String::new(),
            checksum: compute_checksum(b"abc"),
        };
        let result = ImportResult {
            imported_count: 2,
            ..Default::default()
        };
        record_batch(&conn, &source, ACTOR, 3, &result).unwrap();
        let imported: i64 = count(&conn, "SELECT imported_count FROM imports");
        assert_eq!(imported, 2);
        assert!(crate::store::checksum_seen(&conn, &source.checksum).unwrap());
    }
}
