//! Turns raw spreadsheet content (delimited files or text pasted from a
//! grid) into positional records. Pure: no I/O beyond the given string.

use tracing::debug;

use crate::error::Result;
use crate::normalize::parse_amount;

/// Words that mark a header line when found in its first cell.
pub const HEADER_KEYWORDS: &[&str] = &[
    "expense", "date", "category", "type", "gider", "tarih", "kategori", "tür",
];

/// Fewer columns than this and the line cannot carry a row.
pub const MIN_COLUMNS: usize = 4;

/// A record as read from the source, before column mapping.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceRecord {
    /// 1-based line/record number in the source, header included.
    pub row_number: u32,
    pub fields: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DelimitedSheet {
    pub delimiter: u8,
    pub header: Vec<String>,
    pub records: Vec<SourceRecord>,
}

/// Fixed-shape fields pulled out of one record.
#[derive(Debug, Clone, PartialEq)]
pub struct RawRow {
    pub row_number: u32,
    pub expense_type: String,
    pub date: String,
    pub location: String,
    pub item_type: String,
    pub quantity: Option<f64>,
    pub unit_price: Option<f64>,
    pub total_raw: String,
    pub total: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParsedRows {
    pub rows: Vec<RawRow>,
    pub skipped: usize,
}

/// Column positions of the fields we read.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ColumnMap {
    pub expense_type: usize,
    pub date: usize,
    pub location: usize,
    pub item_type: usize,
    pub quantity: Option<usize>,
    pub unit_price: Option<usize>,
    pub total: Option<usize>,
}

impl ColumnMap {
    /// `{expenseType, date, location, itemType, quantity?, unitPrice?, total?}`
    pub const FIXED: ColumnMap = ColumnMap {
        expense_type: 0,
        date: 1,
        location: 2,
        item_type: 3,
        quantity: Some(4),
        unit_price: Some(5),
        total: Some(6),
    };

    /// Map columns by header names. `None` when the four required
    /// columns cannot all be found.
    pub fn from_header(header: &[String]) -> Option<ColumnMap> {
        let find = |keys: &[&str]| {
            header.iter().position(|h| {
                let h = h.trim().to_lowercase();
                keys.iter().any(|k| h.contains(k))
            })
        };
        // Short keywords would match inside other words ("Buyer", "Payer").
        let find_word = |keys: &[&str]| {
            header.iter().position(|h| {
                let h = h.trim().to_lowercase();
                h.split(|c: char| !c.is_alphanumeric())
                    .any(|word| keys.contains(&word))
            })
        };
        let unit_price = find(&["unit price", "unit_price", "birim fiyat", "price", "fiyat"]);
        let quantity = find(&["quantity", "qty", "miktar", "adet"]);
        // "Unit price" must not be taken for the total column.
        let total = header.iter().enumerate().position(|(i, h)| {
            let h = h.trim().to_lowercase();
            Some(i) != unit_price && ["total", "amount", "tutar", "toplam"].iter().any(|k| h.contains(k))
        });
        let expense_type = find(&["expense", "category", "gider", "kategori"])
            .or_else(|| find(&["type", "tür"]))?;
        let date = find(&["date", "tarih"])?;
        let location = find(&["location", "party", "vendor", "supplier", "firma"])
            .or_else(|| find_word(&["yer", "cari"]))?;
        let item_type = header.iter().enumerate().position(|(i, h)| {
            let h = h.trim().to_lowercase();
            i != expense_type
                && ["item", "description", "açıklama", "kalem", "ürün"].iter().any(|k| h.contains(k))
        })?;
        Some(ColumnMap {
            expense_type,
            date,
            location,
            item_type,
            quantity,
            unit_price,
            total,
        })
    }
}

/// Pick the delimiter that occurs most often in the first line.
/// Ties go to comma, then semicolon, then tab.
pub fn detect_delimiter(first_line: &str) -> u8 {
    let mut best = (b',', 0usize);
    for candidate in [b',', b';', b'\t'] {
        let count = first_line.bytes().filter(|b| *b == candidate).count();
        if count > best.1 {
            best = (candidate, count);
        }
    }
    best.0
}

fn strip_bom(content: &str) -> &str {
    content.strip_prefix('\u{feff}').unwrap_or(content)
}

/// Read a delimited file. The first record is the header; records that
/// consist of a single empty field are dropped.
pub fn parse_delimited(content: &str) -> Result<DelimitedSheet> {
    let content = strip_bom(content);
    let first_line = content.lines().next().unwrap_or("");
    let delimiter = detect_delimiter(first_line);
    debug!(delimiter = %(delimiter as char).escape_default(), "detected delimiter");

    let mut rdr = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .delimiter(delimiter)
        .from_reader(content.as_bytes());

    let mut header = Vec::new();
    let mut records = Vec::new();
    for (idx, result) in rdr.records().enumerate() {
        let record = result?;
        let fields: Vec<String> = record.iter().map(|f| f.to_string()).collect();
        if idx == 0 {
            header = fields;
            continue;
        }
        if fields.len() == 1 && fields[0].trim().is_empty() {
            continue;
        }
        let row_number = record
            .position()
            .map(|p| p.line() as u32)
            .unwrap_or(idx as u32 + 1);
        records.push(SourceRecord { row_number, fields });
    }

    Ok(DelimitedSheet {
        delimiter,
        header,
        records,
    })
}

fn cell(fields: &[String], idx: Option<usize>) -> &str {
    idx.and_then(|i| fields.get(i)).map(|s| s.trim()).unwrap_or("")
}

fn optional_amount(raw: &str) -> Option<f64> {
    if raw.is_empty() {
        None
    } else {
        parse_amount(raw)
    }
}

/// Pull the fixed-shape fields out of one record. Records with fewer
/// than `MIN_COLUMNS` fields yield `None` and count as skipped.
pub fn extract_row(record: &SourceRecord, map: &ColumnMap) -> Option<RawRow> {
    let fields = &record.fields;
    if fields.len() < MIN_COLUMNS {
        return None;
    }
    let quantity = optional_amount(cell(fields, map.quantity));
    let unit_price = optional_amount(cell(fields, map.unit_price));
    let total_raw = cell(fields, map.total).to_string();
    let total = if total_raw.is_empty() {
        match (quantity, unit_price) {
            (Some(q), Some(p)) => Some(q * p),
            _ => None,
        }
    } else {
        parse_amount(&total_raw)
    };

    Some(RawRow {
        row_number: record.row_number,
        expense_type: cell(fields, Some(map.expense_type)).to_string(),
        date: cell(fields, Some(map.date)).to_string(),
        location: cell(fields, Some(map.location)).to_string(),
        item_type: cell(fields, Some(map.item_type)).to_string(),
        quantity,
        unit_price,
        total_raw,
        total,
    })
}

/// Map a delimited sheet to rows, using its header when recognizable.
pub fn rows_from_sheet(sheet: &DelimitedSheet) -> ParsedRows {
    let map = ColumnMap::from_header(&sheet.header).unwrap_or(ColumnMap::FIXED);
    let mut parsed = ParsedRows::default();
    for record in &sheet.records {
        match extract_row(record, &map) {
            Some(row) => parsed.rows.push(row),
            None => parsed.skipped += 1,
        }
    }
    parsed
}

pub fn is_header_cell(cell: &str, extra_keywords: &[String]) -> bool {
    let cell = cell.trim().to_lowercase();
    if cell.is_empty() {
        return false;
    }
    HEADER_KEYWORDS.iter().any(|k| cell.contains(k))
        || extra_keywords
            .iter()
            .map(|k| k.trim().to_lowercase())
            .any(|k| !k.is_empty() && cell.contains(&k))
}

/// Read text pasted from a spreadsheet: one row per line, tab-separated
/// cells in the fixed column shape.
pub fn parse_pasted_grid(text: &str, extra_keywords: &[String]) -> ParsedRows {
    let text = strip_bom(text);
    let mut parsed = ParsedRows::default();
    let mut first_line = true;

    for (idx, line) in text.lines().enumerate() {
        let line = line.strip_suffix('\r').unwrap_or(line);
        if line.trim().is_empty() {
            continue;
        }
        let fields: Vec<String> = line.split('\t').map(|f| f.to_string()).collect();
        if std::mem::take(&mut first_line) && is_header_cell(&fields[0], extra_keywords) {
            debug!(first_cell = %fields[0], "skipping header line");
            continue;
        }
        let record = SourceRecord {
            row_number: idx as u32 + 1,
            fields,
        };
        match extract_row(&record, &ColumnMap::FIXED) {
            Some(row) => parsed.rows.push(row),
            None => parsed.skipped += 1,
        }
    }
    parsed
}
