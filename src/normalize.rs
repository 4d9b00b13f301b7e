//! Date and amount canonicalization, and row validation.

use std::sync::OnceLock;

use chrono::{Duration, NaiveDate, NaiveDateTime};
use regex::Regex;

use crate::models::{ImportRow, ValidationError};
use crate::parser::RawRow;

#[derive(Clone, Copy)]
enum Order {
    Ymd,
    Dmy,
    DmyShort,
}

// Tried in this order; the first pattern that matches and yields a real
// calendar date wins.
const DATE_PATTERNS: &[(&str, Order)] = &[
    (r"^(\d{4})-(\d{1,2})-(\d{1,2})$", Order::Ymd),
    (r"^(\d{1,2})\.(\d{1,2})\.(\d{4})$", Order::Dmy),
    (r"^(\d{1,2})/(\d{1,2})/(\d{4})$", Order::Dmy),
    (r"^(\d{1,2})-(\d{1,2})-(\d{4})$", Order::Dmy),
    (r"^(\d{4})/(\d{1,2})/(\d{1,2})$", Order::Ymd),
    (r"^(\d{1,2})\.(\d{1,2})\.(\d{2})$", Order::DmyShort),
    (r"^(\d{1,2})/(\d{1,2})/(\d{2})$", Order::DmyShort),
    (r"^(\d{1,2})-(\d{1,2})-(\d{2})$", Order::DmyShort),
];

const FALLBACK_FORMATS: &[&str] = &[
    "%m/%d/%Y",
    "%d %b %Y",
    "%d %B %Y",
    "%b %d, %Y",
    "%B %d, %Y",
    "%b %d %Y",
    "%B %d %Y",
];

const CURRENCY_TOKENS: &[&str] = &["TRY", "USD", "EUR", "TL", "₺", "$", "€", "£"];

fn date_patterns() -> &'static [(Regex, Order)] {
    static PATTERNS: OnceLock<Vec<(Regex, Order)>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        DATE_PATTERNS
            .iter()
            .filter_map(|(p, order)| Regex::new(p).ok().map(|re| (re, *order)))
            .collect()
    })
}

fn expand_short_year(yy: i32) -> i32 {
    if yy < 70 {
        2000 + yy
    } else {
        1900 + yy
    }
}

fn iso(date: NaiveDate) -> String {
    date.format("%Y-%m-%d").to_string()
}

pub fn excel_serial_to_date(serial: i64) -> Option<NaiveDate> {
    // Spreadsheet epoch, shifted for the 1900 leap year bug
    NaiveDate::from_ymd_opt(1899, 12, 30).map(|base| base + Duration::days(serial))
}

fn parse_date_fallback(raw: &str) -> Option<NaiveDate> {
    if let Ok(dt) = NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S") {
        return Some(dt.date());
    }
    if raw.len() > 10 && raw.is_char_boundary(10) {
        let (head, tail) = raw.split_at(10);
        if tail.starts_with('T') || tail.starts_with(' ') {
            if let Ok(d) = NaiveDate::parse_from_str(head, "%Y-%m-%d") {
                return Some(d);
            }
        }
    }
    for fmt in FALLBACK_FORMATS {
        if let Ok(d) = NaiveDate::parse_from_str(raw, fmt) {
            return Some(d);
        }
    }
    if raw.len() == 5 && raw.bytes().all(|b| b.is_ascii_digit()) {
        let serial: i64 = raw.parse().ok()?;
        if (20_000..=80_000).contains(&serial) {
            return excel_serial_to_date(serial);
        }
    }
    None
}

/// Canonicalize a date cell to `YYYY-MM-DD`.
pub fn parse_date(raw: &str) -> Option<String> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    for (re, order) in date_patterns() {
        let Some(caps) = re.captures(raw) else {
            continue;
        };
        let a: i32 = caps[1].parse().ok()?;
        let b: u32 = caps[2].parse().ok()?;
        let c: i32 = caps[3].parse().ok()?;
        let date = match order {
            Order::Ymd => NaiveDate::from_ymd_opt(a, b, c as u32),
            Order::Dmy => NaiveDate::from_ymd_opt(c, b, a as u32),
            Order::DmyShort => NaiveDate::from_ymd_opt(expand_short_year(c), b, a as u32),
        };
        if let Some(d) = date {
            return Some(iso(d));
        }
    }
    parse_date_fallback(raw).map(iso)
}

/// Parse a human-entered amount. With both `,` and `.` present, `.` groups
/// thousands and `,` is the decimal mark. A lone `,` is decimal when at
/// most two digits follow it, otherwise a thousands separator.
pub fn parse_amount(raw: &str) -> Option<f64> {
    let mut s = raw.trim().to_string();
    for token in CURRENCY_TOKENS {
        s = s.replace(token, "");
    }
    s.retain(|c| !c.is_whitespace() && c != '\'' && c != '"');

    let mut negative = false;
    if let Some(inner) = s.strip_prefix('(').and_then(|v| v.strip_suffix(')')) {
        negative = true;
        s = inner.to_string();
    }
    if s.is_empty() {
        return None;
    }

    let has_comma = s.contains(',');
    let has_dot = s.contains('.');
    let normalized = if has_comma && has_dot {
        s.replace('.', "").replace(',', ".")
    } else if has_comma {
        let last = s.rfind(',').unwrap_or(0);
        let digits_after = s.len() - last - 1;
        if digits_after <= 2 {
            let (int_part, frac) = s.split_at(last);
            format!("{}.{}", int_part.replace(',', ""), &frac[1..])
        } else {
            s.replace(',', "")
        }
    } else if s.matches('.').count() > 1 {
        s.replace('.', "")
    } else {
        s
    };

    if !normalized
        .chars()
        .all(|c| c.is_ascii_digit() || c == '.' || c == '-' || c == '+')
        || !normalized.chars().any(|c| c.is_ascii_digit())
    {
        return None;
    }
    let value: f64 = normalized.parse().ok()?;
    if !value.is_finite() {
        return None;
    }
    Some(if negative { -value } else { value })
}

/// Build a validated row from parsed cells. Resolution flags start false;
/// valid rows start selected.
pub fn normalize_row(raw: RawRow) -> ImportRow {
    let date_iso = parse_date(&raw.date);
    let mut errors = Vec::new();

    if raw.expense_type.trim().is_empty() {
        errors.push(ValidationError::MissingExpenseType);
    }
    if date_iso.is_none() {
        errors.push(ValidationError::InvalidDate(raw.date.clone()));
    }
    match raw.total {
        Some(t) if t.is_finite() && t > 0.0 => {}
        Some(t) if raw.total_raw.is_empty() => {
            errors.push(ValidationError::InvalidAmount(format!("{t}")))
        }
        _ => errors.push(ValidationError::InvalidAmount(raw.total_raw.clone())),
    }

    let is_valid = errors.is_empty();
    ImportRow {
        row_number: raw.row_number,
        expense_type: raw.expense_type,
        date_raw: raw.date,
        date_iso,
        location: raw.location,
        original_location: None,
        item_type: raw.item_type,
        quantity: raw.quantity,
        unit_price: raw.unit_price,
        total_raw: raw.total_raw,
        total: raw.total,
        is_valid,
        errors,
        selected: is_valid,
        is_new_category: false,
        is_new_party: false,
    }
}
