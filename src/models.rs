use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CategoryType {
    Income,
    Expense,
}

impl CategoryType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Income => "income",
            Self::Expense => "expense",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_lowercase().as_str() {
            "income" => Some(Self::Income),
            "expense" => Some(Self::Expense),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PartyType {
    Customer,
    Vendor,
    Employee,
    Other,
}

impl PartyType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Customer => "customer",
            Self::Vendor => "vendor",
            Self::Employee => "employee",
            Self::Other => "other",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_lowercase().as_str() {
            "customer" => Some(Self::Customer),
            "vendor" => Some(Self::Vendor),
            "employee" => Some(Self::Employee),
            "other" => Some(Self::Other),
            _ => None,
        }
    }
}

/// Why a row failed validation. Rows keep these in a fixed order:
/// expense type, then date, then amount.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ValidationError {
    #[error("Expense type is required")]
    MissingExpenseType,

    #[error("Invalid date: '{0}'")]
    InvalidDate(String),

    #[error("Total must be a positive number (got '{0}')")]
    InvalidAmount(String),
}

/// One data row of an import batch, keyed by its source row number.
#[derive(Debug, Clone, PartialEq)]
pub struct ImportRow {
    pub row_number: u32,
    pub expense_type: String,
    pub date_raw: String,
    pub date_iso: Option<String>,
    pub location: String,
    pub original_location: Option<String>,
    pub item_type: String,
    pub quantity: Option<f64>,
    pub unit_price: Option<f64>,
    /// Raw total cell; kept for error messages.
    pub total_raw: String,
    pub total: Option<f64>,
    pub is_valid: bool,
    pub errors: Vec<ValidationError>,
    pub selected: bool,
    pub is_new_category: bool,
    pub is_new_party: bool,
}

impl ImportRow {
    /// Message shown in summary views; the full list stays in `errors`.
    pub fn first_error(&self) -> Option<String> {
        self.errors.first().map(|e| e.to_string())
    }

    pub fn has_party(&self) -> bool {
        !self.location.trim().is_empty()
    }
}

/// A category or party name referenced by the batch, deduplicated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntityCandidate {
    pub name: String,
    pub exists: bool,
}

#[derive(Debug, Clone)]
pub struct ImportPreview {
    pub file_name: String,
    pub total_rows: usize,
    pub valid_rows: usize,
    pub invalid_rows: usize,
    pub skipped_rows: usize,
    pub rows: Vec<ImportRow>,
    pub categories: Vec<EntityCandidate>,
    pub parties: Vec<EntityCandidate>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RowError {
    pub row: u32,
    pub message: String,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ImportResult {
    pub imported_count: usize,
    pub failed_count: usize,
    pub categories_created: usize,
    pub parties_created: usize,
    pub row_errors: Vec<RowError>,
}

/// Transaction record handed to the store on commit.
#[derive(Debug, Clone)]
pub struct NewTransaction {
    pub date: String,
    pub description: String,
    pub amount: f64,
    pub quantity: Option<f64>,
    pub unit_price: Option<f64>,
    pub category_id: i64,
    pub party_id: Option<i64>,
    pub source_row: u32,
    pub created_by: String,
}

/// One line in the import log.
#[derive(Debug, Clone)]
pub struct ImportRecord {
    pub filename: String,
    pub checksum: Option<String>,
    pub actor: String,
    pub row_count: usize,
    pub result: ImportResult,
}
