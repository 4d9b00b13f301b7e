use comfy_table::{Cell, Table};
use rusqlite::Connection;

use crate::cli::open_db;
use crate::error::{Result, TallyError};
use crate::models::CategoryType;
use crate::settings::load_settings;
use crate::store::LedgerStore;

#[derive(Debug, Clone)]
pub struct CategoryRow {
    pub id: i64,
    pub name: String,
    pub category_type: String,
    pub description: Option<String>,
}

pub fn add(name: &str, category_type: &str) -> Result<()> {
    let conn = open_db(&load_settings())?;
    add_category(&conn, name, category_type)?;
    println!("Added category: {}", name.trim());
    Ok(())
}

pub fn list() -> Result<()> {
    let conn = open_db(&load_settings())?;
    let categories = list_categories(&conn)?;

    let mut table = Table::new();
    table.set_header(vec!["ID", "Name", "Type", "Description"]);
    for cat in categories {
        table.add_row(vec![
            Cell::new(cat.id),
            Cell::new(cat.name),
            Cell::new(cat.category_type),
            Cell::new(cat.description.unwrap_or_default()),
        ]);
    }
    println!("Categories\n{table}");
    Ok(())
}

pub fn add_category(conn: &Connection, name: &str, category_type: &str) -> Result<i64> {
    let kind = CategoryType::parse(category_type).ok_or_else(|| {
        TallyError::Other(format!(
            "Unknown category type '{category_type}' (expected income or expense)"
        ))
    })?;
    let name = name.trim();
    if name.is_empty() {
        return Err(TallyError::Other("Category name is required".into()));
    }
    conn.insert_category(name, kind)
}

pub fn list_categories(conn: &Connection) -> Result<Vec<CategoryRow>> {
    let mut stmt = conn.prepare(
        "SELECT id, name, category_type, description FROM categories \
         WHERE is_active = 1 ORDER BY category_type, name_key",
    )?;
    let rows = stmt
        .query_map([], |row| {
            Ok(CategoryRow {
                id: row.get(0)?,
                name: row.get(1)?,
                category_type: row.get(2)?,
                description: row.get(3)?,
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}
