// src/aggregators.rs

use crate::result_table::{candidates, resolve_amount_column, resolve_column, ResultTable};
use crate::value_utils::{non_empty_text, normalize_value, trim_code};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use tracing::{debug, warn};

// --- Shared accumulators ---

/// Department code -> display title. The first non-empty title seen for a code wins.
#[derive(Debug, Clone, Default)]
pub struct TitleRegistry {
    titles: HashMap<String, String>,
}

impl TitleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true when the title was stored.
    pub fn register(&mut self, code: &str, title: Option<&str>) -> bool {
        let Some(title) = title.map(str::trim).filter(|t| !t.is_empty()) else {
            return false;
        };
        if code.is_empty() || self.titles.contains_key(code) {
            return false;
        }
        self.titles.insert(code.to_string(), title.to_string());
        true
    }

    /// Registers the code as its own title when nothing better has been seen.
    pub fn ensure_fallback(&mut self, code: &str) {
        if !self.titles.contains_key(code) {
            debug!("No title for department '{}', using the code as its title", code);
            self.titles.insert(code.to_string(), code.to_string());
        }
    }

    pub fn get(&self, code: &str) -> Option<&str> {
        self.titles.get(code).map(String::as_str)
    }

    /// Display title, defaulting to the code itself.
    pub fn title_for<'a>(&'a self, code: &'a str) -> &'a str {
        self.get(code).unwrap_or(code)
    }

    pub fn len(&self) -> usize {
        self.titles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.titles.is_empty()
    }
}

/// Per-run state every aggregator contributes to. Owned by the report engine.
#[derive(Debug, Clone, Default)]
pub struct ReportAccumulators {
    pub departments: BTreeSet<String>,
    pub locations: BTreeSet<String>,
    pub titles: TitleRegistry,
}

impl ReportAccumulators {
    pub fn new() -> Self {
        Self::default()
    }
}

// --- Snow ---

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct SnowTotals {
    pub snow_24hrs: f64,
    pub base_depth: f64,
}

pub fn aggregate_snow(table: &ResultTable) -> SnowTotals {
    let snow_col = resolve_column(table, candidates::SNOW_24HRS);
    let depth_col = resolve_column(table, candidates::BASE_DEPTH);
    if snow_col.is_none() && depth_col.is_none() && !table.is_empty() {
        warn!(
            "Weather result has neither snow nor base depth columns: {:?}",
            table.columns()
        );
    }
    table.rows().fold(SnowTotals::default(), |mut acc, row| {
        acc.snow_24hrs += normalize_value(row.get_opt(snow_col));
        acc.base_depth += normalize_value(row.get_opt(depth_col));
        acc
    })
}

// --- Visits ---

pub fn aggregate_visits(
    table: &ResultTable,
    acc: &mut ReportAccumulators,
) -> BTreeMap<String, f64> {
    let mut visits = BTreeMap::new();
    if table.is_empty() {
        return visits;
    }
    let Some(location_col) = resolve_column(table, candidates::LOCATION) else {
        warn!(
            "Visits result has no location column, skipping (columns: {:?})",
            table.columns()
        );
        return visits;
    };
    let count_col = resolve_column(table, candidates::VISITS).or_else(|| {
        let fallback = crate::result_table::last_numeric_column(table);
        if let Some(col) = fallback {
            warn!("Visits count column missing, falling back to numeric column '{}'", col);
        }
        fallback
    });
    if count_col.is_none() {
        debug!("No visits count column, counting rows per location");
    }

    for row in table.rows() {
        let location = trim_code(row.get(location_col));
        if location.is_empty() {
            continue;
        }
        let amount = match count_col {
            Some(col) => normalize_value(row.get(col)),
            None => 1.0,
        };
        *visits.entry(location.clone()).or_insert(0.0) += amount;
        acc.locations.insert(location);
    }
    visits
}

// --- Revenue ---

/// One revenue row as it was counted, for the debug log.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RevenueRowAudit {
    pub department: String,
    pub title: Option<String>,
    pub amount: f64,
}

#[derive(Debug, Clone, Default)]
pub struct RevenueAggregation {
    pub totals: BTreeMap<String, f64>,
    pub rows: Vec<RevenueRowAudit>,
}

pub fn aggregate_revenue(table: &ResultTable, acc: &mut ReportAccumulators) -> RevenueAggregation {
    let mut result = RevenueAggregation::default();
    if table.is_empty() {
        return result;
    }
    let Some(dept_col) = resolve_column(table, candidates::DEPARTMENT) else {
        warn!(
            "Revenue result has no department column, skipping (columns: {:?})",
            table.columns()
        );
        return result;
    };
    let title_col = resolve_column(table, candidates::DEPARTMENT_TITLE);
    let Some(amount_col) = resolve_amount_column(table, candidates::REVENUE, "revenue") else {
        return result;
    };

    for row in table.rows() {
        let code = trim_code(row.get(dept_col));
        if code.is_empty() {
            continue;
        }
        let title = non_empty_text(row.get_opt(title_col));
        acc.titles.register(&code, title.as_deref());
        let amount = normalize_value(row.get(amount_col));
        *result.totals.entry(code.clone()).or_insert(0.0) += amount;
        result.rows.push(RevenueRowAudit {
            department: code,
            title,
            amount,
        });
    }

    for code in result.totals.keys() {
        acc.departments.insert(code.clone());
        acc.titles.ensure_fallback(code);
    }
    result
}

// --- Budget ---

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BudgetLineKind {
    Visits,
    Payroll,
    Revenue,
    Unrecognized,
}

impl BudgetLineKind {
    pub fn classify(raw_type: &str) -> Self {
        let normalized = raw_type.trim().to_lowercase();
        if normalized.contains("visits") {
            BudgetLineKind::Visits
        } else if normalized.contains("payroll") {
            BudgetLineKind::Payroll
        } else if normalized.contains("revenue") {
            BudgetLineKind::Revenue
        } else {
            BudgetLineKind::Unrecognized
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct BudgetEntry {
    pub payroll: f64,
    pub revenue: f64,
}

#[derive(Debug, Clone, Default)]
pub struct BudgetAggregation {
    pub financial: BTreeMap<String, BudgetEntry>,
    /// Keyed by the lower-cased location name from the resort's visits mapping.
    pub visits: BTreeMap<String, f64>,
}

impl BudgetAggregation {
    pub fn entry(&self, code: &str) -> BudgetEntry {
        self.financial.get(code).copied().unwrap_or_default()
    }

    pub fn visits_for(&self, location_key: &str) -> f64 {
        self.visits.get(location_key).copied().unwrap_or(0.0)
    }

    pub fn total_visits(&self) -> f64 {
        self.visits.values().sum()
    }
}

/// `visits_mapping` maps a budget department code to the visits location it budgets for.
pub fn aggregate_budget(
    table: &ResultTable,
    visits_mapping: &BTreeMap<String, String>,
    acc: &mut ReportAccumulators,
) -> BudgetAggregation {
    let mut result = BudgetAggregation::default();
    if table.is_empty() {
        return result;
    }
    let dept_col = resolve_column(table, candidates::DEPARTMENT);
    let type_col = resolve_column(table, candidates::BUDGET_TYPE);
    let amount_col = resolve_column(table, candidates::BUDGET_AMOUNT);
    let (Some(dept_col), Some(type_col), Some(amount_col)) = (dept_col, type_col, amount_col)
    else {
        warn!(
            "Budget result is missing department/type/amount columns, skipping (columns: {:?})",
            table.columns()
        );
        return result;
    };
    let title_col = resolve_column(table, candidates::DEPARTMENT_TITLE);

    for row in table.rows() {
        let code = trim_code(row.get(dept_col));
        if code.is_empty() {
            continue;
        }
        let raw_type = trim_code(row.get(type_col));
        let amount = normalize_value(row.get(amount_col));

        match BudgetLineKind::classify(&raw_type) {
            BudgetLineKind::Visits => match visits_mapping.get(&code) {
                Some(location) => {
                    *result
                        .visits
                        .entry(location.trim().to_lowercase())
                        .or_insert(0.0) += amount;
                }
                None => debug!("Visits budget for unmapped department '{}' dropped", code),
            },
            kind => {
                let title = non_empty_text(row.get_opt(title_col));
                acc.titles.register(&code, title.as_deref());
                let entry = result.financial.entry(code.clone()).or_default();
                match kind {
                    BudgetLineKind::Payroll => entry.payroll += amount,
                    BudgetLineKind::Revenue => entry.revenue += amount,
                    _ => debug!(
                        "Unrecognized budget type '{}' for department '{}'",
                        raw_type, code
                    ),
                }
            }
        }
    }
    result
}
