use colored::Colorize;
use comfy_table::{Cell, Table};
use tracing::debug;

use crate::cli::{import_review, open_db};
use crate::error::{Result, TallyError};
use crate::fmt::{money, opt_money};
use crate::importer::{build_preview, execute_import, read_source, record_batch, SourceKind};
use crate::models::{ImportPreview, ImportResult, ImportRow};
use crate::resolver::KnownEntities;
use crate::review::ReviewState;
use crate::settings::load_settings;
use crate::store::checksum_seen;

pub struct ImportArgs {
    pub file: String,
    pub paste: bool,
    pub actor: Option<String>,
    pub yes: bool,
    pub reject: Vec<String>,
    pub merge: Vec<String>,
    pub dry_run: bool,
    pub all_errors: bool,
}

pub fn run(args: ImportArgs) -> Result<()> {
    let settings = load_settings();
    let conn = open_db(&settings)?;

    let source = read_source(&args.file)?;
    let kind = if args.paste || args.file == "-" {
        SourceKind::Pasted
    } else {
        SourceKind::Delimited
    };
    debug!(file = %source.file_name, ?kind, checksum = %source.checksum, "read source");

    if checksum_seen(&conn, &source.checksum)? {
        println!(
            "{} this file was imported before (same checksum). Continuing anyway.",
            "Warning:".yellow().bold()
        );
    }

    let known = KnownEntities::load(&conn)?;
    let preview = build_preview(
        &source.file_name,
        &source.content,
        kind,
        &known,
        &settings.header_keywords,
    )?;
    print_summary(&preview);
    if preview.rows.is_empty() {
        println!("Nothing to import.");
        return Ok(());
    }

    let state = ReviewState::new(&preview, known);
    if args.dry_run {
        println!("{}", preview_table(&state, args.all_errors));
        print_suggestions(&state);
        return Ok(());
    }

    let state = if args.yes {
        let state = apply_flags(state, &args.merge, &args.reject)?;
        print_invalid_rows(&state, args.all_errors);
        state
    } else {
        if !args.merge.is_empty() || !args.reject.is_empty() {
            return Err(TallyError::Other("--merge and --reject need --yes".into()));
        }
        match import_review::run(state, &source.file_name)? {
            Some(state) => state,
            None => {
                println!("Import cancelled. Nothing was written.");
                return Ok(());
            }
        }
    };

    let selected = state.selected_rows();
    if selected.is_empty() {
        println!("No rows selected. Nothing was written.");
        return Ok(());
    }

    let actor = args
        .actor
        .map(|a| a.trim().to_string())
        .filter(|a| !a.is_empty())
        .unwrap_or_else(|| settings.actor());
    let result = execute_import(&conn, &selected, &actor, settings.party_type())?;
    record_batch(&conn, &source, &actor, preview.total_rows, &result)?;
    print_result(&result);
    Ok(())
}

/// `SOURCE=TARGET`, both sides trimmed and non-empty.
pub fn parse_merge_arg(raw: &str) -> Result<(String, String)> {
    let (source, target) = raw
        .split_once('=')
        .map(|(s, t)| (s.trim(), t.trim()))
        .filter(|(s, t)| !s.is_empty() && !t.is_empty())
        .ok_or_else(|| TallyError::Other(format!("--merge expects SOURCE=TARGET, got '{raw}'")))?;
    Ok((source.to_string(), target.to_string()))
}

/// Apply command-line merges, then rejections, to the default selection.
pub fn apply_flags(state: ReviewState, merges: &[String], rejects: &[String]) -> Result<ReviewState> {
    let mut state = state;
    for raw in merges {
        let (source, target) = parse_merge_arg(raw)?;
        state = state.merge(&source, &target)?;
        println!("Merged '{source}' into '{target}'");
    }
    for name in rejects {
        match state.approval(name) {
            Some(true) => state = state.toggle_party(name)?,
            Some(false) => {}
            None => {
                return Err(TallyError::Other(format!(
                    "'{}' is not a new party in this batch",
                    name.trim()
                )))
            }
        }
    }
    Ok(state)
}

fn row_errors(row: &ImportRow, all: bool) -> String {
    if all {
        row.errors
            .iter()
            .map(|e| e.to_string())
            .collect::<Vec<_>>()
            .join("; ")
    } else {
        row.first_error().unwrap_or_default()
    }
}

fn print_summary(preview: &ImportPreview) {
    let new_categories = preview.categories.iter().filter(|c| !c.exists).count();
    let new_parties = preview.parties.iter().filter(|p| !p.exists).count();
    println!(
        "{}: {} rows ({} valid, {} invalid, {} skipped), {} new categories, {} new parties",
        preview.file_name,
        preview.total_rows,
        preview.valid_rows,
        preview.invalid_rows,
        preview.skipped_rows,
        new_categories,
        new_parties
    );
}

pub fn preview_table(state: &ReviewState, all_errors: bool) -> Table {
    let mut table = Table::new();
    table.set_header(vec![
        "Row", "Sel", "Expense", "Date", "Party", "Item", "Qty", "Unit", "Total", "New", "Errors",
    ]);
    for row in state.rows() {
        let new = match (row.is_new_category, row.is_new_party) {
            (true, true) => "category, party",
            (true, false) => "category",
            (false, true) => "party",
            (false, false) => "",
        };
        table.add_row(vec![
            Cell::new(row.row_number),
            Cell::new(if row.selected { "x" } else { "" }),
            Cell::new(&row.expense_type),
            Cell::new(row.date_iso.as_deref().unwrap_or(&row.date_raw)),
            Cell::new(&row.location),
            Cell::new(&row.item_type),
            Cell::new(opt_money(row.quantity)),
            Cell::new(opt_money(row.unit_price)),
            Cell::new(row.total.map(money).unwrap_or_else(|| row.total_raw.clone())),
            Cell::new(new),
            Cell::new(row_errors(row, all_errors)),
        ]);
    }
    table
}

fn print_suggestions(state: &ReviewState) {
    let suggestions = state.suggestions();
    if suggestions.is_empty() {
        return;
    }
    println!("\nPossible duplicates:");
    for s in suggestions {
        let mut similar: Vec<String> = s.existing.iter().map(|n| format!("{n} (existing)")).collect();
        similar.extend(s.new.iter().map(|n| format!("{n} (new)")));
        println!("  {} ~ {}", s.name, similar.join(", "));
    }
}

fn print_invalid_rows(state: &ReviewState, all_errors: bool) {
    let invalid: Vec<&ImportRow> = state.rows().iter().filter(|r| !r.is_valid).collect();
    if invalid.is_empty() {
        return;
    }
    let mut table = Table::new();
    table.set_header(vec!["Row", "Error"]);
    for row in invalid {
        table.add_row(vec![Cell::new(row.row_number), Cell::new(row_errors(row, all_errors))]);
    }
    println!("Skipping invalid rows\n{table}");
}

fn print_result(result: &ImportResult) {
    let failed = format!("{} failed", result.failed_count);
    println!(
        "{} imported, {}, {} categories created, {} parties created",
        result.imported_count.to_string().green().bold(),
        if result.failed_count > 0 { failed.red().bold() } else { failed.normal() },
        result.categories_created,
        result.parties_created
    );
    if !result.row_errors.is_empty() {
        let mut table = Table::new();
        table.set_header(vec!["Row", "Error"]);
        for e in &result.row_errors {
            table.add_row(vec![Cell::new(e.row), Cell::new(e.message.as_str().red())]);
        }
        println!("Row errors\n{table}");
    }
}
