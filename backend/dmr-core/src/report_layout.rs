// src/report_layout.rs

use crate::date_ranges::{DateRange, RangeId};
use crate::processed::{ProcessedReport, RangeData};
use crate::value_utils::{normalize_f64, process_location_name, VARIANCE_EPSILON};
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::fmt;

// --- PR % ---

/// Direction of the "PR %" rows. Payroll as a share of revenue is the default.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum PrRatio {
    #[default]
    PayrollOverRevenue,
    RevenueOverPayroll,
}

impl PrRatio {
    /// Computed on absolute values; zero when the denominator is ~0.
    pub fn compute(&self, revenue: f64, payroll: f64) -> f64 {
        let (numerator, denominator) = match self {
            PrRatio::PayrollOverRevenue => (payroll.abs(), revenue.abs()),
            PrRatio::RevenueOverPayroll => (revenue.abs(), payroll.abs()),
        };
        if denominator < VARIANCE_EPSILON {
            0.0
        } else {
            normalize_f64(numerator / denominator * 100.0)
        }
    }
}

// --- Columns ---

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportColumn {
    Range(RangeId),
    Budget(RangeId),
}

impl ReportColumn {
    pub fn name(&self) -> String {
        match self {
            ReportColumn::Range(id) => id.label().to_string(),
            ReportColumn::Budget(id) if *id == RangeId::WEEK_ENDING_ACTUAL => {
                format!("{} (Budget)", RangeId::WEEK_TOTAL_ACTUAL.label())
            }
            ReportColumn::Budget(id) => format!("{} (Budget)", id.label()),
        }
    }

    pub fn range_id(&self) -> RangeId {
        match self {
            ReportColumn::Range(id) | ReportColumn::Budget(id) => *id,
        }
    }

    pub fn is_budget(&self) -> bool {
        matches!(self, ReportColumn::Budget(_))
    }
}

impl fmt::Display for ReportColumn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name())
    }
}

/// Report ranges in order, each Actual range followed by its budget column.
pub fn column_structure() -> Vec<ReportColumn> {
    let mut columns = Vec::new();
    for id in RangeId::REPORT_ORDER {
        columns.push(ReportColumn::Range(id));
        if id.is_actual() {
            columns.push(ReportColumn::Budget(id));
        }
    }
    columns
}

// --- Rows ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RowType {
    Title,
    Data,
    SectionHeader,
    Total,
    Empty,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ReportValue {
    Number(f64),
    Text(String),
    Null,
}

/// How numeric cells of a row are rendered in the workbook.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ValueFormat {
    #[default]
    Amount,
    Snow,
    Percent,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReportRow {
    #[serde(rename = "type")]
    pub row_type: RowType,
    pub row_header: String,
    pub values: Vec<ReportValue>,
    #[serde(skip)]
    pub format: ValueFormat,
}

impl ReportRow {
    fn blank(row_type: RowType, header: &str, width: usize) -> Self {
        ReportRow {
            row_type,
            row_header: header.to_string(),
            values: vec![ReportValue::Text(String::new()); width],
            format: ValueFormat::Amount,
        }
    }

    fn numbers(row_type: RowType, header: String, values: Vec<ReportValue>, format: ValueFormat) -> Self {
        ReportRow {
            row_type,
            row_header: header,
            values,
            format,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReportHeader {
    pub name: String,
    pub display: String,
}

/// Full report, serialized as the JSON payload and rendered as the "Report" sheet.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReportDocument {
    pub resort_name: String,
    pub report_date: String,
    pub generated_at: String,
    pub headers: Vec<ReportHeader>,
    pub rows: Vec<ReportRow>,
    /// Title broken into its lines for the workbook's title cell.
    #[serde(skip)]
    pub title_lines: Vec<String>,
}

impl ReportDocument {
    pub fn row(&self, header: &str) -> Option<&ReportRow> {
        self.rows.iter().find(|r| r.row_header == header)
    }
}

// --- Builder ---

fn column_window(data: &RangeData, column: ReportColumn) -> DateRange {
    match column {
        ReportColumn::Budget(_) => data.budget_window.unwrap_or(data.range),
        ReportColumn::Range(_) => data.range,
    }
}

pub fn title_lines(resort_name: &str, report_day: NaiveDateTime) -> Vec<String> {
    vec![
        format!("{} Resort", resort_name),
        "Daily Management Report".to_string(),
        format!(
            "As of {} - {}",
            report_day.format("%A"),
            report_day.format("%-d %B, %Y")
        ),
    ]
}

struct Layout<'a> {
    report: &'a ProcessedReport,
    columns: Vec<(ReportColumn, Option<&'a RangeData>)>,
    pr_ratio: PrRatio,
}

impl<'a> Layout<'a> {
    fn width(&self) -> usize {
        self.columns.len()
    }

    /// One value per column; `range` reads the range maps, `budget` the budget column.
    fn values<R, B>(&self, range: R, budget: B) -> Vec<ReportValue>
    where
        R: Fn(&RangeData) -> f64,
        B: Fn(&RangeData) -> f64,
    {
        self.columns
            .iter()
            .map(|(column, data)| {
                let value = match data {
                    Some(data) if column.is_budget() => budget(data),
                    Some(data) => range(data),
                    None => 0.0,
                };
                ReportValue::Number(normalize_f64(value))
            })
            .collect()
    }

    fn budget_revenue(&self, data: &RangeData, code: &str) -> f64 {
        data.budget.as_ref().map(|b| b.entry(code).revenue).unwrap_or(0.0)
    }

    fn budget_payroll(&self, data: &RangeData, code: &str) -> f64 {
        data.budget.as_ref().map(|b| b.entry(code).payroll).unwrap_or(0.0)
    }

    fn snow_rows(&self) -> Vec<ReportRow> {
        let snow_row = |header: &str, pick: fn(&RangeData) -> f64| {
            let values = self
                .columns
                .iter()
                .map(|(column, data)| match (column.is_budget(), data) {
                    (true, _) => ReportValue::Null,
                    (false, Some(data)) => ReportValue::Number(normalize_f64(pick(data))),
                    (false, None) => ReportValue::Number(0.0),
                })
                .collect();
            ReportRow::numbers(RowType::Data, header.to_string(), values, ValueFormat::Snow)
        };
        vec![
            snow_row("Snow 24hrs", |d| d.snow.snow_24hrs),
            snow_row("Base Depth", |d| d.snow.base_depth),
        ]
    }

    fn visits_rows(&self) -> Vec<ReportRow> {
        let resort = self.report.resort_name.as_str();
        let mut rows = vec![ReportRow::blank(RowType::SectionHeader, "VISITS", self.width())];
        for location in self.report.sorted_locations() {
            let budget_key = process_location_name(location, resort);
            rows.push(ReportRow::numbers(
                RowType::Data,
                location.clone(),
                self.values(
                    |d| d.visits_for(location),
                    |d| d.budget.as_ref().map(|b| b.visits_for(&budget_key)).unwrap_or(0.0),
                ),
                ValueFormat::Amount,
            ));
        }
        rows.push(ReportRow::numbers(
            RowType::Total,
            "Total Tickets".to_string(),
            self.values(
                |d| d.visits.values().sum(),
                |d| d.budget.as_ref().map(|b| b.total_visits()).unwrap_or(0.0),
            ),
            ValueFormat::Amount,
        ));
        rows
    }

    fn financial_rows(&self) -> Vec<ReportRow> {
        let mut rows = vec![ReportRow::blank(RowType::SectionHeader, "FINANCIALS", self.width())];
        for code in self.report.sorted_departments() {
            let title = self.report.title_for(code);
            rows.push(ReportRow::numbers(
                RowType::Data,
                format!("{} - Revenue", title),
                self.values(|d| d.revenue_for(code), |d| self.budget_revenue(d, code)),
                ValueFormat::Amount,
            ));
            rows.push(ReportRow::numbers(
                RowType::Data,
                format!("{} - Payroll", title),
                self.values(|d| d.payroll_for(code), |d| self.budget_payroll(d, code)),
                ValueFormat::Amount,
            ));
            rows.push(ReportRow::numbers(
                RowType::Data,
                format!("PR % of {}", title),
                self.values(
                    |d| self.pr_ratio.compute(d.revenue_for(code), d.payroll_for(code)),
                    |d| {
                        self.pr_ratio
                            .compute(self.budget_revenue(d, code), self.budget_payroll(d, code))
                    },
                ),
                ValueFormat::Percent,
            ));
        }
        rows
    }

    fn totals(&self, data: &RangeData, budget: bool) -> (f64, f64) {
        self.report
            .sorted_departments()
            .fold((0.0, 0.0), |(revenue, payroll), code| {
                if budget {
                    (
                        revenue + self.budget_revenue(data, code),
                        payroll + self.budget_payroll(data, code),
                    )
                } else {
                    (revenue + data.revenue_for(code), payroll + data.payroll_for(code))
                }
            })
    }

    fn total_rows(&self) -> Vec<ReportRow> {
        let row = |header: &str, format: ValueFormat, pick: &dyn Fn(f64, f64) -> f64| {
            ReportRow::numbers(
                RowType::Total,
                header.to_string(),
                self.values(
                    |d| {
                        let (revenue, payroll) = self.totals(d, false);
                        pick(revenue, payroll)
                    },
                    |d| {
                        let (revenue, payroll) = self.totals(d, true);
                        pick(revenue, payroll)
                    },
                ),
                format,
            )
        };
        vec![
            row("Total Revenue", ValueFormat::Amount, &|revenue, _| revenue),
            row("Total Payroll", ValueFormat::Amount, &|_, payroll| payroll),
            row("PR % of Total Revenue", ValueFormat::Percent, &|revenue, payroll| {
                self.pr_ratio.compute(revenue, payroll)
            }),
            row("Net Total Revenue", ValueFormat::Amount, &|revenue, payroll| {
                revenue - payroll
            }),
        ]
    }
}

/// Lays out the aggregated report: title, snow, visits, financials and totals.
pub fn build_report(
    report: &ProcessedReport,
    pr_ratio: PrRatio,
    generated_at: NaiveDateTime,
) -> ReportDocument {
    let columns: Vec<(ReportColumn, Option<&RangeData>)> = column_structure()
        .into_iter()
        .map(|column| (column, report.range(column.range_id())))
        .collect();

    let mut headers = vec![ReportHeader {
        name: "Row Header".to_string(),
        display: String::new(),
    }];
    for (column, data) in &columns {
        let name = column.name();
        let display = match data {
            Some(data) => format!("{}\n{}", name, column_window(data, *column).span_display()),
            None => name.clone(),
        };
        headers.push(ReportHeader { name, display });
    }

    let report_day = report
        .range(RangeId::DAY_ACTUAL)
        .map(|d| d.range.start)
        .unwrap_or_else(|| report.report_date.and_time(chrono::NaiveTime::MIN));
    let title_lines = title_lines(&report.resort_name, report_day);

    let layout = Layout {
        report,
        columns,
        pr_ratio,
    };
    let width = layout.width();

    let mut rows = vec![ReportRow::blank(RowType::Title, &title_lines.join(" - "), width)];
    rows.extend(layout.snow_rows());
    rows.push(ReportRow::blank(RowType::Empty, "", width));
    rows.extend(layout.visits_rows());
    rows.push(ReportRow::blank(RowType::Empty, "", width));
    rows.extend(layout.financial_rows());
    rows.push(ReportRow::blank(RowType::Empty, "", width));
    rows.extend(layout.total_rows());

    ReportDocument {
        resort_name: report.resort_name.clone(),
        report_date: report_day.format("%Y-%m-%d").to_string(),
        generated_at: generated_at.format("%Y-%m-%dT%H:%M:%S%.6f").to_string(),
        headers,
        rows,
        title_lines,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregators::{BudgetAggregation, BudgetEntry, ReportAccumulators, SnowTotals};
    use crate::date_ranges::DateRangeCalculator;
    use chrono::NaiveDate;
    use std::collections::BTreeMap;

    fn dt(s: &str) -> NaiveDateTime {
        NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S").unwrap()
    }

    fn sample_report() -> ProcessedReport {
        let calc = DateRangeCalculator::new(
            NaiveDate::from_ymd_opt(2025, 3, 5).unwrap(),
            false,
            true,
            dt("2025-03-06 07:00:00"),
        );
        let mut ranges: Vec<RangeData> = calc.all_ranges().into_iter().map(RangeData::new).collect();
        for data in ranges.iter_mut() {
            data.snow = SnowTotals {
                snow_24hrs: 2.0,
                base_depth: 40.0,
            };
            data.revenue.insert("4100".into(), 1000.0);
            data.payroll.insert("4100".into(), 250.0);
            data.visits.insert("Purgatory Ticket Office".into(), 300.0);
            if data.range.id.is_actual() {
                let mut budget = BudgetAggregation::default();
                budget.financial.insert(
                    "4100".into(),
                    BudgetEntry {
                        payroll: 100.0,
                        revenue: 800.0,
                    },
                );
                budget.visits.insert("ticket office".into(), 280.0);
                data.budget = Some(budget);
                data.budget_window = Some(if data.range.id == RangeId::WEEK_ENDING_ACTUAL {
                    calc.week_total_actual()
                } else {
                    data.range
                });
            }
        }
        let mut accumulators = ReportAccumulators::new();
        accumulators.departments.insert("4100".into());
        accumulators.titles.register("4100", Some("Lift Tickets"));
        accumulators.locations.insert("Purgatory Ticket Office".into());
        ProcessedReport {
            resort_name: "Purgatory".into(),
            report_date: NaiveDate::from_ymd_opt(2025, 3, 5).unwrap(),
            ranges,
            insights_budget_overrides: BTreeMap::new(),
            accumulators,
        }
    }

    #[test]
    fn column_structure_interleaves_budget_columns() {
        let names: Vec<String> = column_structure().iter().map(|c| c.name()).collect();
        assert_eq!(names.len(), 13);
        assert_eq!(names[0], "For The Day (Actual)");
        assert_eq!(names[1], "For The Day (Actual) (Budget)");
        assert_eq!(names[2], "For The Day (Prior Year)");
        assert_eq!(names[4], "Week Total (Actual) (Budget)");
        assert_eq!(names[6], "Week Total (Prior Year)");
        assert_eq!(names[12], "For Winter Ending (Prior Year)");
    }

    #[test]
    fn pr_ratio_directions() {
        assert_eq!(PrRatio::PayrollOverRevenue.compute(1000.0, -250.0), 25.0);
        assert_eq!(PrRatio::RevenueOverPayroll.compute(1000.0, 250.0), 400.0);
        assert_eq!(PrRatio::PayrollOverRevenue.compute(0.0, 250.0), 0.0);
    }

    #[test]
    fn report_title_headers_and_sections() {
        let doc = build_report(&sample_report(), PrRatio::default(), dt("2025-03-06 07:00:00"));
        assert_eq!(doc.report_date, "2025-03-05");
        assert_eq!(
            doc.rows[0].row_header,
            "Purgatory Resort - Daily Management Report - As of Wednesday - 5 March, 2025"
        );
        assert_eq!(doc.rows[0].row_type, RowType::Title);
        assert_eq!(doc.headers.len(), 14);
        assert_eq!(doc.headers[0].name, "Row Header");
        assert_eq!(doc.headers[5].display, "Week Total (Actual) (Budget)\nMar 03 - Mar 09");
        assert_eq!(doc.headers[4].display, "For The Week Ending (Actual)\nMar 03 - Mar 05");

        let snow = doc.row("Snow 24hrs").unwrap();
        assert_eq!(snow.values[0], ReportValue::Number(2.0));
        assert_eq!(snow.values[1], ReportValue::Null);

        let location = doc.row("Purgatory Ticket Office").unwrap();
        assert_eq!(location.values[0], ReportValue::Number(300.0));
        assert_eq!(location.values[1], ReportValue::Number(280.0));
        assert_eq!(
            doc.row("Total Tickets").unwrap().values[1],
            ReportValue::Number(280.0)
        );

        let pr = doc.row("PR % of Lift Tickets").unwrap();
        assert_eq!(pr.values[0], ReportValue::Number(25.0));
        assert_eq!(pr.values[1], ReportValue::Number(12.5));
        assert_eq!(pr.format, ValueFormat::Percent);

        let net = doc.row("Net Total Revenue").unwrap();
        assert_eq!(net.values[0], ReportValue::Number(750.0));
        assert_eq!(net.values[1], ReportValue::Number(700.0));
        assert_eq!(net.row_type, RowType::Total);
    }

    #[test]
    fn report_serializes_with_row_types() {
        let doc = build_report(&sample_report(), PrRatio::default(), dt("2025-03-06 07:00:00"));
        let json = serde_json::to_value(&doc).unwrap();
        assert_eq!(json["resort_name"], "Purgatory");
        assert_eq!(json["rows"][0]["type"], "title");
        assert_eq!(json["rows"][1]["values"][1], serde_json::Value::Null);
        assert_eq!(json["rows"][4]["type"], "section_header");
        assert_eq!(json["rows"][4]["values"][0], "");
        assert!(json.get("title_lines").is_none());
        assert!(json["rows"][1].get("format").is_none());
    }
}
