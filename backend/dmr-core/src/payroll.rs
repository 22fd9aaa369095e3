// src/payroll.rs

use crate::aggregators::ReportAccumulators;
use crate::audit::DebugLog;
use crate::date_ranges::{DateRange, Period};
use crate::result_table::{candidates, resolve_column, ResultTable, TIMESTAMP_FORMAT};
use crate::value_utils::{non_empty_text, normalize_f64, normalize_value, trim_code};
use chrono::NaiveDateTime;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt::Write as _;
use tracing::{debug, warn};

// --- Contract (hourly) payroll ---

/// Hours between two punches; zero when either punch is missing or they are reversed.
pub fn working_hours(start: Option<NaiveDateTime>, end: Option<NaiveDateTime>) -> f64 {
    match (start, end) {
        (Some(start), Some(end)) => {
            let seconds = (end - start).num_seconds() as f64;
            normalize_f64(seconds / 3600.0).max(0.0)
        }
        _ => 0.0,
    }
}

/// An explicit hours value takes precedence over the punch duration.
pub fn compute_wage(working_hours: f64, hours_column: f64, rate: f64, dollar_amount: f64) -> f64 {
    let hours = if hours_column > 0.0 {
        hours_column
    } else {
        working_hours
    };
    normalize_f64(hours * rate + dollar_amount)
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ContractRowAudit {
    pub start: Option<NaiveDateTime>,
    pub end: Option<NaiveDateTime>,
    pub working_hours: f64,
    pub hours_column: f64,
    pub rate: f64,
    pub dollar_amount: f64,
    pub wage: f64,
}

#[derive(Debug, Clone, Default)]
pub struct ContractPayroll {
    pub totals: BTreeMap<String, f64>,
    pub rows: BTreeMap<String, Vec<ContractRowAudit>>,
}

pub fn contract_payroll(table: &ResultTable, acc: &mut ReportAccumulators) -> ContractPayroll {
    let mut result = ContractPayroll::default();
    if table.is_empty() {
        return result;
    }
    let Some(dept_col) = resolve_column(table, candidates::DEPARTMENT) else {
        warn!(
            "Contract payroll has no department column, skipping (columns: {:?})",
            table.columns()
        );
        return result;
    };
    let rate_col = resolve_column(table, candidates::RATE);
    if rate_col.is_none() {
        warn!(
            "Contract payroll has no rate column, counting dollar amounts only (columns: {:?})",
            table.columns()
        );
    }
    let start_col = resolve_column(table, candidates::PUNCH_START);
    let end_col = resolve_column(table, candidates::PUNCH_END);
    let hours_col = resolve_column(table, candidates::HOURS);
    let dollar_col = resolve_column(table, candidates::DOLLAR_AMOUNT);
    let title_col = resolve_column(table, candidates::DEPARTMENT_TITLE);

    for row in table.rows() {
        let code = trim_code(row.get(dept_col));
        if code.is_empty() {
            continue;
        }
        let title = non_empty_text(row.get_opt(title_col));
        acc.titles.register(&code, title.as_deref());

        let start = row.get_opt(start_col).as_timestamp();
        let end = row.get_opt(end_col).as_timestamp();
        let hours = working_hours(start, end);
        let hours_column = normalize_value(row.get_opt(hours_col));
        let rate = normalize_value(row.get_opt(rate_col));
        let dollar_amount = normalize_value(row.get_opt(dollar_col));
        let wage = compute_wage(hours, hours_column, rate, dollar_amount);

        *result.totals.entry(code.clone()).or_insert(0.0) += wage;
        result.rows.entry(code).or_default().push(ContractRowAudit {
            start,
            end,
            working_hours: hours,
            hours_column,
            rate,
            dollar_amount,
            wage,
        });
    }
    result
}

// --- Salary / history payroll ---

/// Per-department totals from a procedure that already scoped them to the range.
fn department_totals(
    table: &ResultTable,
    total_candidates: &[&str],
    source: &str,
    acc: &mut ReportAccumulators,
) -> BTreeMap<String, f64> {
    let mut totals = BTreeMap::new();
    if table.is_empty() {
        return totals;
    }
    let dept_col = resolve_column(table, candidates::DEPARTMENT);
    let total_col = resolve_column(table, total_candidates);
    let (Some(dept_col), Some(total_col)) = (dept_col, total_col) else {
        warn!(
            "{} payroll is missing department/total columns, skipping (columns: {:?})",
            source,
            table.columns()
        );
        return totals;
    };
    let title_col = resolve_column(table, candidates::DEPARTMENT_TITLE);

    for row in table.rows() {
        let code = trim_code(row.get(dept_col));
        if code.is_empty() {
            continue;
        }
        let title = non_empty_text(row.get_opt(title_col));
        acc.titles.register(&code, title.as_deref());
        let value = normalize_value(row.get(total_col));
        if totals.insert(code.clone(), value).is_some() {
            warn!(
                "{} payroll returned department '{}' more than once, keeping the last total",
                source, code
            );
        }
    }
    totals
}

pub fn salary_payroll(table: &ResultTable, acc: &mut ReportAccumulators) -> BTreeMap<String, f64> {
    department_totals(table, candidates::SALARY_TOTAL, "Salary", acc)
}

pub fn history_payroll(table: &ResultTable, acc: &mut ReportAccumulators) -> BTreeMap<String, f64> {
    department_totals(table, candidates::HISTORY_TOTAL, "History", acc)
}

// --- Reconciliation ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum PayrollMethod {
    ContractPlusSalary,
    HistoryOnly,
    CurrentDateZero,
}

impl PayrollMethod {
    pub fn for_range(range: &DateRange, is_current_date: bool) -> Self {
        if is_current_date {
            PayrollMethod::CurrentDateZero
        } else if range.id.period == Period::Actual {
            PayrollMethod::ContractPlusSalary
        } else {
            PayrollMethod::HistoryOnly
        }
    }

    pub fn describe(&self) -> &'static str {
        match self {
            PayrollMethod::ContractPlusSalary => "contract + salary",
            PayrollMethod::HistoryOnly => "history only",
            PayrollMethod::CurrentDateZero => "current date, payroll not yet available",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DepartmentPayroll {
    pub department: String,
    pub title: String,
    pub contract_total: f64,
    pub salary_total: f64,
    pub history_total: f64,
    pub final_total: f64,
    pub contract_rows: Vec<ContractRowAudit>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RangePayroll {
    pub range: DateRange,
    pub method: PayrollMethod,
    pub departments: Vec<DepartmentPayroll>,
}

impl RangePayroll {
    pub fn totals(&self) -> BTreeMap<String, f64> {
        self.departments
            .iter()
            .map(|d| (d.department.clone(), d.final_total))
            .collect()
    }

    pub fn final_for(&self, department: &str) -> f64 {
        self.departments
            .iter()
            .find(|d| d.department == department)
            .map(|d| d.final_total)
            .unwrap_or(0.0)
    }
}

/// Raw payroll tables fetched for one range. Any of them may be absent.
#[derive(Debug, Clone, Copy, Default)]
pub struct PayrollInputs<'a> {
    pub contract: Option<&'a ResultTable>,
    pub salary: Option<&'a ResultTable>,
    pub history: Option<&'a ResultTable>,
}

pub struct PayrollReconciler {
    is_current_date: bool,
}

impl PayrollReconciler {
    pub fn new(is_current_date: bool) -> Self {
        PayrollReconciler { is_current_date }
    }

    /// Final payroll per department for one range, plus the audit trail.
    ///
    /// Actual ranges pay contract wages plus salaries; prior-year ranges use the
    /// archived history totals only. On a current-date report payroll is not yet
    /// posted, so every department with revenue in the range reports zero.
    pub fn reconcile(
        &self,
        range: &DateRange,
        inputs: PayrollInputs<'_>,
        revenue: &BTreeMap<String, f64>,
        acc: &mut ReportAccumulators,
        log: &mut DebugLog,
    ) -> RangePayroll {
        let method = PayrollMethod::for_range(range, self.is_current_date);

        let departments = if method == PayrollMethod::CurrentDateZero {
            revenue
                .keys()
                .map(|code| DepartmentPayroll {
                    department: code.clone(),
                    title: acc.titles.title_for(code).to_string(),
                    contract_total: 0.0,
                    salary_total: 0.0,
                    history_total: 0.0,
                    final_total: 0.0,
                    contract_rows: Vec::new(),
                })
                .collect::<Vec<_>>()
        } else {
            let mut contract = inputs
                .contract
                .map(|t| contract_payroll(t, acc))
                .unwrap_or_default();
            let salary = inputs
                .salary
                .map(|t| salary_payroll(t, acc))
                .unwrap_or_default();
            let history = inputs
                .history
                .map(|t| history_payroll(t, acc))
                .unwrap_or_default();

            let mut relevant: BTreeSet<&String> =
                contract.totals.keys().chain(salary.keys()).collect();
            if method == PayrollMethod::HistoryOnly {
                relevant.extend(history.keys());
            }

            relevant
                .into_iter()
                .map(|code| {
                    let contract_total = contract.totals.get(code).copied().unwrap_or(0.0);
                    let salary_total = salary.get(code).copied().unwrap_or(0.0);
                    let history_total = history.get(code).copied().unwrap_or(0.0);
                    let final_total = match method {
                        PayrollMethod::ContractPlusSalary => contract_total + salary_total,
                        _ => history_total,
                    };
                    DepartmentPayroll {
                        department: code.clone(),
                        title: acc.titles.title_for(code).to_string(),
                        contract_total,
                        salary_total,
                        history_total,
                        final_total: normalize_f64(final_total),
                        contract_rows: contract.rows.remove(code.as_str()).unwrap_or_default(),
                    }
                })
                .collect::<Vec<_>>()
        };

        for dept in &departments {
            acc.departments.insert(dept.department.clone());
            acc.titles.ensure_fallback(&dept.department);
            debug!(
                range = range.label(),
                department = %dept.department,
                contract = dept.contract_total,
                salary = dept.salary_total,
                history = dept.history_total,
                final_total = dept.final_total,
                "payroll reconciled"
            );
        }

        let payroll = RangePayroll {
            range: *range,
            method,
            departments,
        };
        if log.is_enabled() {
            log.write_section(
                &format!("PAYROLL AUDIT: {}", range.label()),
                &render_audit(&payroll),
            );
        }
        payroll
    }
}

fn fmt_ts(ts: Option<NaiveDateTime>) -> String {
    ts.map(|t| t.format(TIMESTAMP_FORMAT).to_string())
        .unwrap_or_else(|| "-".to_string())
}

/// Human readable breakdown of one range's payroll, as written to DebugLogs.txt.
pub fn render_audit(payroll: &RangePayroll) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "Window: {} -> {}",
        payroll.range.start.format(TIMESTAMP_FORMAT),
        payroll.range.end.format(TIMESTAMP_FORMAT)
    );
    let _ = writeln!(out, "Method: {}", payroll.method.describe());
    if payroll.departments.is_empty() {
        let _ = writeln!(out, "No payroll departments for this range.");
    }
    for dept in &payroll.departments {
        let _ = writeln!(out, "\nDepartment {} ({})", dept.department, dept.title);
        if !dept.contract_rows.is_empty() {
            let _ = writeln!(out, "  Contract rows:");
            for row in &dept.contract_rows {
                let _ = writeln!(
                    out,
                    "    Start={} End={} WHrs={:.2} HCol={:.2} Rate={:.2} Dlr={:.2} Wage={:.2}",
                    fmt_ts(row.start),
                    fmt_ts(row.end),
                    row.working_hours,
                    row.hours_column,
                    row.rate,
                    row.dollar_amount,
                    row.wage
                );
            }
        }
        let history_note = match payroll.method {
            PayrollMethod::HistoryOnly => "",
            _ => " (not used)",
        };
        let contract_note = match payroll.method {
            PayrollMethod::ContractPlusSalary => "",
            _ => " (not used)",
        };
        let _ = writeln!(out, "  Contract total: {:.2}{}", dept.contract_total, contract_note);
        let _ = writeln!(out, "  Salary total: {:.2}{}", dept.salary_total, contract_note);
        let _ = writeln!(out, "  History total: {:.2}{}", dept.history_total, history_note);
        let _ = writeln!(out, "  FINAL PAYROLL TOTAL: {:.2}", dept.final_total);
    }
    out
}
