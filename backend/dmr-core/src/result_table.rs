// src/result_table.rs

use chrono::{DateTime, NaiveDateTime};
use rust_decimal::Decimal;
use std::fmt;
use tracing::warn;

// --- Cell values ---

/// One cell of a stored-procedure result set.
#[derive(Debug, Clone, PartialEq)]
pub enum CellValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Decimal(Decimal),
    Text(String),
    Timestamp(NaiveDateTime),
}

impl CellValue {
    pub fn is_null(&self) -> bool {
        matches!(self, CellValue::Null)
    }

    pub fn is_numeric(&self) -> bool {
        matches!(
            self,
            CellValue::Int(_) | CellValue::Float(_) | CellValue::Decimal(_)
        )
    }

    /// Parses a raw CSV field into the narrowest cell type that accepts it.
    /// Zero-padded codes stay text and only finite floats are numbers.
    pub fn infer(raw: &str) -> CellValue {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return CellValue::Null;
        }
        if is_zero_padded(trimmed) {
            return CellValue::Text(raw.to_string());
        }
        if let Ok(i) = trimmed.parse::<i64>() {
            return CellValue::Int(i);
        }
        if let Ok(f) = trimmed.parse::<f64>() {
            if f.is_finite() {
                return CellValue::Float(f);
            }
        }
        if let Some(ts) = parse_timestamp(trimmed) {
            return CellValue::Timestamp(ts);
        }
        CellValue::Text(raw.to_string())
    }

    /// Reads a field verbatim; used for key and title columns.
    pub fn text(raw: &str) -> CellValue {
        if raw.trim().is_empty() {
            CellValue::Null
        } else {
            CellValue::Text(raw.to_string())
        }
    }

    /// Interprets the cell as a punch timestamp. Anything unparseable is `None`.
    pub fn as_timestamp(&self) -> Option<NaiveDateTime> {
        match self {
            CellValue::Timestamp(ts) => Some(*ts),
            CellValue::Text(s) => parse_timestamp(s.trim()),
            _ => None,
        }
    }
}

impl fmt::Display for CellValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CellValue::Null => Ok(()),
            CellValue::Bool(b) => write!(f, "{}", b),
            CellValue::Int(i) => write!(f, "{}", i),
            CellValue::Float(v) => write!(f, "{}", v),
            CellValue::Decimal(d) => write!(f, "{}", d),
            CellValue::Text(s) => write!(f, "{}", s),
            CellValue::Timestamp(ts) => write!(f, "{}", ts.format(TIMESTAMP_FORMAT)),
        }
    }
}

/// "0410" or "-007", but not "0", "0.5" or "01/10/2025".
fn is_zero_padded(raw: &str) -> bool {
    let digits = raw.strip_prefix(&['-', '+'][..]).unwrap_or(raw);
    digits.len() > 1 && digits.starts_with('0') && digits.bytes().all(|b| b.is_ascii_digit())
}

pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

const NAIVE_TIMESTAMP_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M",
    "%m/%d/%Y %H:%M:%S",
    "%m/%d/%Y %H:%M",
];

pub fn parse_timestamp(raw: &str) -> Option<NaiveDateTime> {
    for format in NAIVE_TIMESTAMP_FORMATS {
        if let Ok(ts) = NaiveDateTime::parse_from_str(raw, format) {
            return Some(ts);
        }
    }
    DateTime::parse_from_rfc3339(raw)
        .ok()
        .map(|dt| dt.naive_local())
}

// --- Result table ---

/// Ordered columns plus rows, exactly as a procedure returned them.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResultTable {
    columns: Vec<String>,
    rows: Vec<Vec<CellValue>>,
}

impl ResultTable {
    pub fn new<S: Into<String>>(columns: impl IntoIterator<Item = S>) -> Self {
        ResultTable {
            columns: columns.into_iter().map(Into::into).collect(),
            rows: Vec::new(),
        }
    }

    pub fn empty() -> Self {
        ResultTable::default()
    }

    /// Appends a row, padding short rows with nulls and dropping surplus cells.
    pub fn push_row(&mut self, mut row: Vec<CellValue>) {
        row.resize(self.columns.len(), CellValue::Null);
        self.rows.push(row);
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    pub fn rows(&self) -> impl Iterator<Item = TableRow<'_>> {
        self.rows.iter().map(move |cells| TableRow {
            table: self,
            cells,
        })
    }
}

/// Borrowed view of one row with by-name lookup.
#[derive(Debug, Clone, Copy)]
pub struct TableRow<'a> {
    table: &'a ResultTable,
    cells: &'a [CellValue],
}

static NULL_CELL: CellValue = CellValue::Null;

impl<'a> TableRow<'a> {
    /// Missing columns read as `Null`.
    pub fn get(&self, column: &str) -> &'a CellValue {
        self.table
            .column_index(column)
            .and_then(|idx| self.cells.get(idx))
            .unwrap_or(&NULL_CELL)
    }

    /// Same as `get` but for an optionally resolved column.
    pub fn get_opt(&self, column: Option<&str>) -> &'a CellValue {
        match column {
            Some(name) => self.get(name),
            None => &NULL_CELL,
        }
    }

    pub fn cells(&self) -> &'a [CellValue] {
        self.cells
    }
}

// --- Column resolution ---

/// First candidate present in `table`, in candidate order.
pub fn resolve_column<'a>(table: &'a ResultTable, candidates: &[&str]) -> Option<&'a str> {
    candidates
        .iter()
        .find_map(|candidate| table.columns.iter().find(|c| c == candidate))
        .map(String::as_str)
}

/// Last column whose non-null cells are all numeric (and that has at least one value).
pub fn last_numeric_column(table: &ResultTable) -> Option<&str> {
    (0..table.columns.len())
        .rev()
        .find(|&idx| {
            let mut seen = false;
            for row in &table.rows {
                match &row[idx] {
                    CellValue::Null => {}
                    cell if cell.is_numeric() => seen = true,
                    _ => return false,
                }
            }
            seen
        })
        .map(|idx| table.columns[idx].as_str())
}

/// Candidate lookup that degrades to the last numeric column, logging when it does.
pub fn resolve_amount_column<'a>(
    table: &'a ResultTable,
    candidates: &[&str],
    category: &str,
) -> Option<&'a str> {
    if let Some(col) = resolve_column(table, candidates) {
        return Some(col);
    }
    let fallback = last_numeric_column(table);
    match fallback {
        Some(col) => warn!(
            "{}: none of {:?} present, falling back to last numeric column '{}'",
            category, candidates, col
        ),
        None => warn!(
            "{}: none of {:?} present and no numeric column to fall back on (columns: {:?})",
            category,
            candidates,
            table.columns()
        ),
    }
    fallback
}

/// Known spellings of each logical column across procedure versions.
pub mod candidates {
    pub const SNOW_24HRS: &[&str] = &["snow_24hrs", "Snow24Hrs", "Snow_24hrs"];
    pub const BASE_DEPTH: &[&str] = &["base_depth", "BaseDepth", "Base_Depth"];
    pub const LOCATION: &[&str] = &["Location", "location", "Resort", "resort"];
    pub const VISITS: &[&str] = &["Visits", "visits", "Count", "count"];
    pub const DEPARTMENT: &[&str] = &[
        "Department",
        "department",
        "DepartmentCode",
        "department_code",
        "deptCode",
        "DeptCode",
        "dept_code",
        "deptcode",
        "Dept",
        "dept",
    ];
    pub const DEPARTMENT_TITLE: &[&str] = &[
        "DepartmentTitle",
        "department_title",
        "departmentTitle",
        "DeptTitle",
        "dept_title",
    ];
    pub const REVENUE: &[&str] = &["Revenue", "revenue", "Amount", "amount"];
    pub const PUNCH_START: &[&str] = &["start_punchtime", "StartPunchTime", "StartTime"];
    pub const PUNCH_END: &[&str] = &["end_punchtime", "EndPunchTime", "EndTime"];
    pub const RATE: &[&str] = &["rate", "Rate", "HourlyRate"];
    pub const HOURS: &[&str] = &["hours", "Hours", "total_hours", "TotalHours", "HoursWorked"];
    pub const DOLLAR_AMOUNT: &[&str] = &["dollaramount", "DollarAmount", "dollar_amount", "Dollars"];
    pub const SALARY_TOTAL: &[&str] = &[
        "total",
        "Total",
        "salary_total",
        "SalaryTotal",
        "amount",
        "Amount",
    ];
    pub const HISTORY_TOTAL: &[&str] = &["total", "Total", "amount", "Amount"];
    pub const BUDGET_TYPE: &[&str] = &["type", "Type", "budget_type", "BudgetType"];
    pub const BUDGET_AMOUNT: &[&str] = &["amount", "Amount", "budget", "Budget", "value", "Value"];
}
