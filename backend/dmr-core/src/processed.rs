// src/processed.rs

use crate::aggregators::{BudgetAggregation, ReportAccumulators, SnowTotals};
use crate::date_ranges::{DateRange, RangeId};
use chrono::NaiveDate;
use std::collections::BTreeMap;

/// Everything aggregated for one report range.
#[derive(Debug, Clone)]
pub struct RangeData {
    pub range: DateRange,
    pub snow: SnowTotals,
    pub visits: BTreeMap<String, f64>,
    pub revenue: BTreeMap<String, f64>,
    pub payroll: BTreeMap<String, f64>,
    /// Budget shown in the report column. Only Actual ranges carry one.
    pub budget: Option<BudgetAggregation>,
    /// Window of the budget column (the full week for the week-ending range).
    pub budget_window: Option<DateRange>,
}

impl RangeData {
    pub fn new(range: DateRange) -> Self {
        RangeData {
            range,
            snow: SnowTotals::default(),
            visits: BTreeMap::new(),
            revenue: BTreeMap::new(),
            payroll: BTreeMap::new(),
            budget: None,
            budget_window: None,
        }
    }

    pub fn visits_for(&self, location: &str) -> f64 {
        self.visits.get(location).copied().unwrap_or(0.0)
    }

    pub fn revenue_for(&self, code: &str) -> f64 {
        self.revenue.get(code).copied().unwrap_or(0.0)
    }

    pub fn payroll_for(&self, code: &str) -> f64 {
        self.payroll.get(code).copied().unwrap_or(0.0)
    }
}

/// Aggregated state of one `generate_analysis` run. Built fresh per run.
#[derive(Debug, Clone)]
pub struct ProcessedReport {
    pub resort_name: String,
    pub report_date: NaiveDate,
    pub ranges: Vec<RangeData>,
    /// Budgets that replace the report budget in the insights sheet
    /// (week-to-date instead of full week for the week-ending range).
    pub insights_budget_overrides: BTreeMap<RangeId, BudgetAggregation>,
    pub accumulators: ReportAccumulators,
}

impl ProcessedReport {
    pub fn range(&self, id: RangeId) -> Option<&RangeData> {
        self.ranges.iter().find(|r| r.range.id == id)
    }

    pub fn insights_budget(&self, id: RangeId) -> Option<&BudgetAggregation> {
        self.insights_budget_overrides
            .get(&id)
            .or_else(|| self.range(id).and_then(|r| r.budget.as_ref()))
    }

    pub fn sorted_departments(&self) -> impl Iterator<Item = &String> {
        self.accumulators.departments.iter()
    }

    pub fn sorted_locations(&self) -> impl Iterator<Item = &String> {
        self.accumulators.locations.iter()
    }

    pub fn title_for<'a>(&'a self, code: &'a str) -> &'a str {
        self.accumulators.titles.title_for(code)
    }
}
