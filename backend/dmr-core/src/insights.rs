// src/insights.rs

use crate::aggregators::{BudgetAggregation, TitleRegistry};
use crate::date_ranges::RangeId;
use crate::processed::ProcessedReport;
use crate::value_utils::{comparison_variance_pct, normalize_f64, process_location_name, ratio_pct, variance_pct};
use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;

pub const TOP_BOTTOM_N: usize = 3;

// --- Table model ---

#[derive(Debug, Clone, PartialEq)]
pub enum InsightCell {
    Text(String),
    Number(f64),
    Empty,
}

impl InsightCell {
    pub fn number(&self) -> Option<f64> {
        match self {
            InsightCell::Number(v) if v.is_finite() => Some(*v),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct InsightSection {
    pub name: String,
    pub rows: Vec<Vec<InsightCell>>,
}

/// Column-aligned insights sheet split into named sections.
#[derive(Debug, Clone, PartialEq)]
pub struct InsightTable {
    pub columns: Vec<String>,
    pub sections: Vec<InsightSection>,
    /// Whether sections render a header row of their own (the DMR sheet does).
    pub section_headers: bool,
}

impl InsightTable {
    pub fn is_empty(&self) -> bool {
        self.sections.iter().all(|s| s.rows.is_empty())
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    pub fn variance_columns(&self) -> Vec<usize> {
        self.columns
            .iter()
            .enumerate()
            .filter(|(_, c)| c.contains("Variance %"))
            .map(|(i, _)| i)
            .collect()
    }

    pub fn section(&self, name: &str) -> Option<&InsightSection> {
        self.sections.iter().find(|s| s.name == name)
    }
}

// --- DMR insights ---

pub const SECTION_VISITS: &str = "Visits";
pub const SECTION_PAYROLL: &str = "Payroll";
pub const SECTION_REVENUE: &str = "Revenue";

#[derive(Debug, Clone, Copy)]
enum Metric {
    Visits,
    Payroll,
    Revenue,
}

pub fn dmr_insight_columns() -> Vec<String> {
    let mut columns = vec!["Row Header".to_string(), "Dept Code".to_string()];
    for id in RangeId::ACTUAL_RANGES {
        let short = id.short_name();
        columns.push(format!("Value ({} - Actual)", short));
        columns.push(format!("Budget ({} - Actual)", short));
        columns.push(format!("Value ({} - Prior year)", short));
        columns.push(format!("Value-Budget Variance % ({} Actual)", short));
        columns.push(format!("Actual-Prior value Variance % ({})", short));
    }
    columns
}

fn range_values(report: &ProcessedReport, id: RangeId, metric: Metric, key: &str) -> [f64; 5] {
    let actual_data = report.range(id);
    let prior_data = report.range(id.counterpart());
    let budget = report.insights_budget(id);
    let (actual, budget, prior) = match metric {
        Metric::Visits => {
            let budget_key = process_location_name(key, &report.resort_name);
            (
                actual_data.map(|r| r.visits_for(key)).unwrap_or(0.0),
                budget.map(|b| b.visits_for(&budget_key)).unwrap_or(0.0),
                prior_data.map(|r| r.visits_for(key)).unwrap_or(0.0),
            )
        }
        Metric::Payroll => (
            actual_data.map(|r| r.payroll_for(key)).unwrap_or(0.0),
            budget.map(|b| b.entry(key).payroll).unwrap_or(0.0),
            prior_data.map(|r| r.payroll_for(key)).unwrap_or(0.0),
        ),
        Metric::Revenue => (
            actual_data.map(|r| r.revenue_for(key)).unwrap_or(0.0),
            budget.map(|b| b.entry(key).revenue).unwrap_or(0.0),
            prior_data.map(|r| r.revenue_for(key)).unwrap_or(0.0),
        ),
    };
    let (actual, budget, prior) = (normalize_f64(actual), normalize_f64(budget), normalize_f64(prior));
    [
        actual,
        budget,
        prior,
        variance_pct(budget, actual),
        variance_pct(prior, actual),
    ]
}

fn dmr_row(report: &ProcessedReport, header: &str, code: &str, metric: Metric, key: &str) -> Vec<InsightCell> {
    let mut row = vec![
        InsightCell::Text(header.to_string()),
        if code.is_empty() {
            InsightCell::Empty
        } else {
            InsightCell::Text(code.to_string())
        },
    ];
    for id in RangeId::ACTUAL_RANGES {
        row.extend(
            range_values(report, id, metric, key)
                .into_iter()
                .map(InsightCell::Number),
        );
    }
    row
}

/// Actual vs budget and actual vs prior year for every location and department,
/// across the four Actual ranges.
pub fn build_dmr_insights(report: &ProcessedReport) -> InsightTable {
    let visits_rows: Vec<Vec<InsightCell>> = report
        .sorted_locations()
        .map(|loc| dmr_row(report, loc, "", Metric::Visits, loc))
        .collect();
    let dept_rows = |metric: Metric| -> Vec<Vec<InsightCell>> {
        report
            .sorted_departments()
            .map(|code| dmr_row(report, report.title_for(code), code, metric, code))
            .collect()
    };
    let table = InsightTable {
        columns: dmr_insight_columns(),
        sections: vec![
            InsightSection {
                name: SECTION_VISITS.to_string(),
                rows: visits_rows,
            },
            InsightSection {
                name: SECTION_PAYROLL.to_string(),
                rows: dept_rows(Metric::Payroll),
            },
            InsightSection {
                name: SECTION_REVENUE.to_string(),
                rows: dept_rows(Metric::Revenue),
            },
        ],
        section_headers: true,
    };
    debug!(
        "Built DMR insights: {} locations, {} departments",
        table.sections[0].rows.len(),
        table.sections[1].rows.len()
    );
    table
}

// --- Top / bottom ranking ---

#[derive(Debug, Clone, PartialEq)]
pub struct SectionRanking<'a> {
    pub section: &'a str,
    pub top: Vec<&'a [InsightCell]>,
    pub bottom: Vec<&'a [InsightCell]>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct VarianceRanking<'a> {
    pub column: &'a str,
    pub sections: Vec<SectionRanking<'a>>,
}

/// Missing values sort last in both directions.
fn compare_missing_last(a: Option<f64>, b: Option<f64>, descending: bool) -> Ordering {
    match (a, b) {
        (Some(x), Some(y)) => {
            let ord = x.partial_cmp(&y).unwrap_or(Ordering::Equal);
            if descending {
                ord.reverse()
            } else {
                ord
            }
        }
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

fn ranked<'a>(rows: &'a [Vec<InsightCell>], col: usize, n: usize, descending: bool) -> Vec<&'a [InsightCell]> {
    let mut ordered: Vec<&Vec<InsightCell>> = rows.iter().collect();
    // sort_by is stable, ties keep sheet order
    ordered.sort_by(|a, b| {
        compare_missing_last(
            a.get(col).and_then(InsightCell::number),
            b.get(col).and_then(InsightCell::number),
            descending,
        )
    });
    ordered.into_iter().take(n).map(Vec::as_slice).collect()
}

/// Top and bottom `n` rows per variance column and section. Sections whose
/// variance values are all missing are left out.
pub fn rank_top_bottom(table: &InsightTable, n: usize) -> Vec<VarianceRanking<'_>> {
    table
        .variance_columns()
        .into_iter()
        .map(|col| {
            let sections = table
                .sections
                .iter()
                .filter(|s| s.rows.iter().any(|r| r.get(col).and_then(InsightCell::number).is_some()))
                .map(|s| SectionRanking {
                    section: s.name.as_str(),
                    top: ranked(&s.rows, col, n, true),
                    bottom: ranked(&s.rows, col, n, false),
                })
                .collect();
            VarianceRanking {
                column: table.columns[col].as_str(),
                sections,
            }
        })
        .filter(|r| !r.sections.is_empty())
        .collect()
}

// --- Comparison (date vs date) insights ---

/// One day of figures for a comparison or anchor date.
#[derive(Debug, Clone, Default)]
pub struct DayFigures {
    pub visits: BTreeMap<String, f64>,
    pub revenue: BTreeMap<String, f64>,
    pub payroll: BTreeMap<String, f64>,
    pub budget: BudgetAggregation,
}

pub const SECTION_VISIT_ANALYTICS: &str = "Visit Analytics";
pub const SECTION_DEPARTMENT_ANALYTICS: &str = "Department Analytics";

fn get(map: &BTreeMap<String, f64>, key: &str) -> f64 {
    normalize_f64(map.get(key).copied().unwrap_or(0.0))
}

pub fn build_visit_comparison(comparison: &DayFigures, anchor: &DayFigures) -> InsightTable {
    let categories: BTreeSet<&String> = comparison.visits.keys().chain(anchor.visits.keys()).collect();
    let rows = categories
        .into_iter()
        .map(|category| {
            let comp = get(&comparison.visits, category);
            let anch = get(&anchor.visits, category);
            vec![
                InsightCell::Text(category.clone()),
                InsightCell::Number(comp),
                InsightCell::Number(anch),
                InsightCell::Number(comparison_variance_pct(comp, anch)),
            ]
        })
        .collect();
    InsightTable {
        columns: vec![
            "Visit Category".to_string(),
            "Comparison Visits".to_string(),
            "Anchor Visits".to_string(),
            "Visit Variance %".to_string(),
        ],
        sections: vec![InsightSection {
            name: SECTION_VISIT_ANALYTICS.to_string(),
            rows,
        }],
        section_headers: false,
    }
}

fn budget_variance(actual: f64, budget: f64) -> f64 {
    if budget.abs() < crate::value_utils::VARIANCE_EPSILON {
        0.0
    } else {
        comparison_variance_pct(actual, budget)
    }
}

/// Revenue, payroll and budget movement per department between two days.
pub fn build_department_comparison(
    comparison: &DayFigures,
    anchor: &DayFigures,
    titles: &TitleRegistry,
) -> InsightTable {
    let departments: BTreeSet<&String> = comparison
        .payroll
        .keys()
        .chain(anchor.payroll.keys())
        .chain(comparison.revenue.keys())
        .chain(anchor.revenue.keys())
        .collect();

    let rows = departments
        .into_iter()
        .map(|code| {
            let comp_rev = get(&comparison.revenue, code);
            let anchor_rev = get(&anchor.revenue, code);
            let comp_pay = get(&comparison.payroll, code);
            let anchor_pay = get(&anchor.payroll, code);
            let comp_budget = comparison.budget.entry(code);
            let rev_budget = normalize_f64(comp_budget.revenue);
            let pay_budget = normalize_f64(comp_budget.payroll);
            let anchor_pay_budget = normalize_f64(anchor.budget.entry(code).payroll);

            let rev_to_pay_comp = ratio_pct(comp_rev, comp_pay);
            let rev_to_pay_anchor = ratio_pct(anchor_rev, anchor_pay);
            let bud_to_pay_comp = ratio_pct(pay_budget, comp_pay);
            let bud_to_pay_anchor = ratio_pct(anchor_pay_budget, anchor_pay);

            vec![
                InsightCell::Text(titles.title_for(code).to_string()),
                InsightCell::Text(code.clone()),
                InsightCell::Number(comp_rev),
                InsightCell::Number(anchor_rev),
                InsightCell::Number(rev_budget),
                InsightCell::Number(comparison_variance_pct(comp_rev, anchor_rev)),
                InsightCell::Number(budget_variance(comp_rev, rev_budget)),
                InsightCell::Number(comp_pay),
                InsightCell::Number(anchor_pay),
                InsightCell::Number(pay_budget),
                InsightCell::Number(comparison_variance_pct(comp_pay, anchor_pay)),
                InsightCell::Number(budget_variance(comp_pay, pay_budget)),
                InsightCell::Number(rev_to_pay_comp),
                InsightCell::Number(bud_to_pay_comp),
                InsightCell::Number(comparison_variance_pct(rev_to_pay_comp, rev_to_pay_anchor)),
                InsightCell::Number(comparison_variance_pct(bud_to_pay_comp, bud_to_pay_anchor)),
            ]
        })
        .collect();

    InsightTable {
        columns: [
            "Department Title",
            "Dept Code",
            "Comparison Revenue",
            "Anchor Revenue",
            "Revenue Budget",
            "Revenue Variance %",
            "Revenue Budget Variance %",
            "Comparison Payroll",
            "Anchor Payroll",
            "Payroll Budget",
            "Payroll Variance %",
            "Payroll Budget Variance %",
            "Revenue-to-Payroll %",
            "Budget-to-Payroll %",
            "Revenue-to-Payroll Variance %",
            "Budget-to-Payroll Variance %",
        ]
        .iter()
        .map(|c| c.to_string())
        .collect(),
        sections: vec![InsightSection {
            name: SECTION_DEPARTMENT_ANALYTICS.to_string(),
            rows,
        }],
        section_headers: false,
    }
}
