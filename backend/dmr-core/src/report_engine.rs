// src/report_engine.rs

use crate::aggregators::{
    aggregate_budget, aggregate_revenue, aggregate_snow, aggregate_visits, RevenueAggregation,
    ReportAccumulators,
};
use crate::audit::DebugLog;
use crate::config::{ConfigError, ResortConfig};
use crate::data_source::{
    dump_path, execute_with_retry, write_csv_table, DataSourceError, Procedure, ProcedureRequest,
    ProcedureSource, RetryPolicy,
};
use crate::date_ranges::{Clock, DateRange, DateRangeCalculator, RangeId, SystemClock};
use crate::insights::{
    build_department_comparison, build_dmr_insights, build_visit_comparison, rank_top_bottom,
    DayFigures, InsightTable, TOP_BOTTOM_N,
};
use crate::payroll::{PayrollInputs, PayrollReconciler};
use crate::processed::{ProcessedReport, RangeData};
use crate::report_layout::{build_report, PrRatio, ReportDocument};
use crate::result_table::ResultTable;
use crate::value_utils::sanitize_filename;
use crate::webhook::{ErrorPayload, WebhookClient};
use crate::xlsx_export::{
    write_comparison_workbook, write_insights_workbook, write_report_json, write_report_workbook,
    write_top_bottom_workbook, ExportError,
};
use chrono::{Duration, NaiveDate, NaiveDateTime, NaiveTime};
use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, error, info, warn};

#[derive(Error, Debug)]
pub enum ReportError {
    #[error("Data source error: {0}")]
    DataSource(#[from] DataSourceError),
    #[error("Export error: {0}")]
    Export(#[from] ExportError),
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("I/O error: {context}: {source}")]
    Io {
        #[source]
        source: std::io::Error,
        context: String,
    },
}

fn io_context(source: std::io::Error, context: impl Into<String>) -> ReportError {
    ReportError::Io {
        source,
        context: context.into(),
    }
}

// --- Requests ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum AnalysisType {
    #[value(alias = "rep")]
    Report,
    #[value(alias = "ins")]
    Insights,
    #[default]
    Both,
}

impl AnalysisType {
    pub fn includes_report(&self) -> bool {
        matches!(self, AnalysisType::Report | AnalysisType::Both)
    }

    pub fn includes_insights(&self) -> bool {
        matches!(self, AnalysisType::Insights | AnalysisType::Both)
    }
}

/// Workbook for file runs, JSON (plus webhook delivery) when the resort comes from the environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputMode {
    #[default]
    Workbook,
    Json,
}

#[derive(Debug, Clone)]
pub struct AnalysisRequest {
    pub resort: ResortConfig,
    /// `None` means "now": a current-date report.
    pub run_date: Option<NaiveDateTime>,
    pub analysis_type: AnalysisType,
    pub output: OutputMode,
    pub debug: bool,
    pub file_name_postfix: Option<String>,
}

impl AnalysisRequest {
    pub fn new(resort: ResortConfig) -> Self {
        AnalysisRequest {
            resort,
            run_date: None,
            analysis_type: AnalysisType::default(),
            output: OutputMode::default(),
            debug: false,
            file_name_postfix: None,
        }
    }
}

fn postfix_suffix(postfix: Option<&str>) -> String {
    match postfix.map(str::trim).filter(|p| !p.is_empty()) {
        Some(p) => format!("-{}", p),
        None => String::new(),
    }
}

#[derive(Debug, Default)]
pub struct AnalysisResult {
    pub report: Option<ReportDocument>,
    pub report_path: Option<PathBuf>,
    pub insights_path: Option<PathBuf>,
    pub top_bottom_path: Option<PathBuf>,
    pub webhook_results: BTreeMap<String, bool>,
    pub debug_dir: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct ComparisonRequest {
    pub resort: ResortConfig,
    pub comparison_date: NaiveDate,
    pub anchor_date: NaiveDate,
    pub debug: bool,
}

#[derive(Debug)]
pub struct ComparisonResult {
    pub visits: InsightTable,
    pub departments: InsightTable,
    pub workbook_path: Option<PathBuf>,
    pub top_bottom_paths: Vec<PathBuf>,
}

// --- Raw tables per range ---

#[derive(Debug, Default)]
struct RangeTables {
    revenue: ResultTable,
    visits: ResultTable,
    snow: ResultTable,
    contract: Option<ResultTable>,
    salary: Option<ResultTable>,
    history: Option<ResultTable>,
    /// Report budget; the full week for the week-ending range.
    budget: Option<ResultTable>,
    /// Monday to report date, only for the week-ending range.
    budget_week_to_date: Option<ResultTable>,
}

/// Aggregates fetched tables into the report model. Categories are processed
/// across all ranges in turn (visits and revenue, then payroll, then budget)
/// so revenue titles take precedence over budget titles.
fn process_ranges(
    resort: &ResortConfig,
    report_date: NaiveDate,
    ranges: &[DateRange],
    tables: &[RangeTables],
    week_total: DateRange,
    is_current: bool,
    log: &mut DebugLog,
) -> ProcessedReport {
    let mut acc = ReportAccumulators::new();
    let mut data: Vec<RangeData> = ranges.iter().copied().map(RangeData::new).collect();

    let mut revenues: Vec<RevenueAggregation> = Vec::with_capacity(ranges.len());
    for (slot, raw) in data.iter_mut().zip(tables) {
        slot.snow = aggregate_snow(&raw.snow);
        slot.visits = aggregate_visits(&raw.visits, &mut acc);
        let revenue = aggregate_revenue(&raw.revenue, &mut acc);
        if log.is_enabled() && !revenue.rows.is_empty() {
            log.write_section(
                &format!("REVENUE: {}", slot.range.label()),
                &render_revenue_audit(&revenue),
            );
        }
        slot.revenue = revenue.totals.clone();
        revenues.push(revenue);
    }

    let reconciler = PayrollReconciler::new(is_current);
    for (slot, raw) in data.iter_mut().zip(tables) {
        let payroll = reconciler.reconcile(
            &slot.range,
            PayrollInputs {
                contract: raw.contract.as_ref(),
                salary: raw.salary.as_ref(),
                history: raw.history.as_ref(),
            },
            &slot.revenue,
            &mut acc,
            log,
        );
        slot.payroll = payroll.totals();
    }

    let mut overrides = BTreeMap::new();
    for (slot, raw) in data.iter_mut().zip(tables) {
        let id = slot.range.id;
        if !id.is_actual() {
            continue;
        }
        slot.budget_window = Some(if id == RangeId::WEEK_ENDING_ACTUAL {
            week_total
        } else {
            slot.range
        });
        if let Some(table) = &raw.budget {
            slot.budget = Some(aggregate_budget(table, &resort.visits_budget_mapping, &mut acc));
        }
        if let Some(table) = raw.budget_week_to_date.as_ref().filter(|t| !t.is_empty()) {
            overrides.insert(
                id,
                aggregate_budget(table, &resort.visits_budget_mapping, &mut acc),
            );
        }
    }

    debug!(
        departments = acc.departments.len(),
        locations = acc.locations.len(),
        titles = acc.titles.len(),
        "aggregation finished"
    );

    ProcessedReport {
        resort_name: resort.resort_name.clone(),
        report_date,
        ranges: data,
        insights_budget_overrides: overrides,
        accumulators: acc,
    }
}

fn render_revenue_audit(revenue: &RevenueAggregation) -> String {
    let mut out = String::new();
    for row in &revenue.rows {
        let _ = writeln!(
            out,
            "  {} ({}) {:.2}",
            row.department,
            row.title.as_deref().unwrap_or("-"),
            row.amount
        );
    }
    for (code, total) in &revenue.totals {
        let _ = writeln!(out, "TOTAL {}: {:.2}", code, total);
    }
    out
}

// --- Engine ---

pub struct ReportEngine<S: ProcedureSource> {
    source: S,
    clock: Arc<dyn Clock>,
    retry: RetryPolicy,
    output_dir: PathBuf,
    insights_dir: PathBuf,
    pr_ratio: PrRatio,
    webhook: Option<WebhookClient>,
}

impl<S: ProcedureSource> ReportEngine<S> {
    pub fn new(source: S, output_dir: impl Into<PathBuf>) -> Self {
        ReportEngine {
            source,
            clock: Arc::new(SystemClock),
            retry: RetryPolicy::default(),
            output_dir: output_dir.into(),
            insights_dir: PathBuf::from(crate::config::DEFAULT_INSIGHTS_DIR),
            pr_ratio: PrRatio::default(),
            webhook: None,
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_insights_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.insights_dir = dir.into();
        self
    }

    pub fn with_pr_ratio(mut self, pr_ratio: PrRatio) -> Self {
        self.pr_ratio = pr_ratio;
        self
    }

    pub fn with_webhook(mut self, webhook: Option<WebhookClient>) -> Self {
        self.webhook = webhook;
        self
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    /// Calls one procedure through the retry policy and dumps non-empty results in debug runs.
    async fn fetch(
        &self,
        procedure: Procedure,
        request: &ProcedureRequest,
        what: &str,
        dump_root: Option<&Path>,
    ) -> Result<ResultTable, ReportError> {
        let table =
            execute_with_retry(what, self.retry, || self.source.call(procedure, request)).await?;
        if let Some(root) = dump_root.filter(|_| !table.is_empty()) {
            let path = dump_path(root, procedure, request);
            if let Err(e) = write_csv_table(&path, &table) {
                warn!("Could not dump {} to {}: {}", what, path.display(), e);
            }
        }
        Ok(table)
    }

    fn request_for(resort: &ResortConfig, start: NaiveDateTime, end: NaiveDateTime) -> ProcedureRequest {
        ProcedureRequest {
            resort: resort.resort_name.clone(),
            database: resort.db_name.clone(),
            group_num: resort.group_num,
            start,
            end,
        }
    }

    async fn fetch_range(
        &self,
        resort: &ResortConfig,
        range: &DateRange,
        week_total: &DateRange,
        is_current: bool,
        dump_root: Option<&Path>,
    ) -> Result<RangeTables, ReportError> {
        let name = range.label();
        info!("Fetching data for {} ({} to {})", name, range.start.date(), range.end.date());
        let request = Self::request_for(resort, range.start, range.end);
        let mut tables = RangeTables {
            revenue: self
                .fetch(Procedure::Revenue, &request, &format!("Revenue data for {}", name), dump_root)
                .await?,
            visits: self
                .fetch(Procedure::Visits, &request, &format!("Visits data for {}", name), dump_root)
                .await?,
            snow: self
                .fetch(Procedure::Weather, &request, &format!("Weather data for {}", name), dump_root)
                .await?,
            ..Default::default()
        };
        if is_current {
            return Ok(tables);
        }

        if range.id.is_actual() {
            tables.contract = Some(
                self.fetch(
                    Procedure::PayrollContract,
                    &request,
                    &format!("Payroll data for {}", name),
                    dump_root,
                )
                .await?,
            );
            tables.salary = Some(
                self.fetch(
                    Procedure::PayrollSalary,
                    &request,
                    &format!("Salary payroll data for {}", name),
                    dump_root,
                )
                .await?,
            );
            if range.id == RangeId::WEEK_ENDING_ACTUAL {
                let week_request = Self::request_for(resort, week_total.start, week_total.end);
                tables.budget = Some(
                    self.fetch(
                        Procedure::Budget,
                        &week_request,
                        &format!("Budget week total for {}", name),
                        dump_root,
                    )
                    .await?,
                );
                tables.budget_week_to_date = Some(
                    self.fetch(
                        Procedure::Budget,
                        &request,
                        &format!("Budget week to date for {}", name),
                        dump_root,
                    )
                    .await?,
                );
            } else {
                tables.budget = Some(
                    self.fetch(Procedure::Budget, &request, &format!("Budget data for {}", name), dump_root)
                        .await?,
                );
            }
        } else {
            tables.history = Some(
                self.fetch(
                    Procedure::PayrollHistory,
                    &request,
                    &format!("Payroll history for {}", name),
                    dump_root,
                )
                .await?,
            );
        }
        Ok(tables)
    }

    /// Builds the report and/or insights for one resort.
    ///
    /// A run with no `run_date` reports on "now" (payroll zeroed, no budget fetch).
    /// Any other date reports on that exact day. Fatal errors are logged, forwarded
    /// to the webhooks in JSON mode, appended to the debug log and returned.
    pub async fn generate_analysis(&self, request: &AnalysisRequest) -> Result<AnalysisResult, ReportError> {
        let now = self.clock.now();
        let (report_date, is_current) = match request.run_date {
            None => (now, true),
            Some(date) => (date, date.date() == now.date()),
        };
        let calc = DateRangeCalculator::new(report_date.date(), is_current, !is_current, now);
        let date_string = calc.range(RangeId::DAY_ACTUAL).start.format("%Y%m%d").to_string();
        let resort_name = request.resort.resort_name.as_str();
        let mut result = AnalysisResult::default();

        let mut log = DebugLog::disabled();
        if request.debug {
            let dir = self.output_dir.join(format!(
                "Debug-{}-{}{}",
                sanitize_filename(resort_name).to_lowercase(),
                date_string,
                postfix_suffix(request.file_name_postfix.as_deref())
            ));
            let log_path = dir.join("DebugLogs.txt");
            log = DebugLog::create(&log_path)
                .map_err(|e| io_context(e, format!("Creating {}", log_path.display())))?;
            result.debug_dir = Some(dir);
        }

        info!("Generating report for {} for {}", resort_name, report_date.format("%Y-%m-%d"));
        let outcome = self
            .run_analysis(request, &calc, is_current, now, &date_string, &mut log, &mut result)
            .await;

        match outcome {
            Ok(()) => {
                info!("Report processing completed successfully for {}", resort_name);
                log.flush();
                Ok(result)
            }
            Err(e) => {
                error!("Report generation failed for {}: {}", resort_name, e);
                if request.output == OutputMode::Json {
                    if let Some(webhook) = &self.webhook {
                        let payload = ErrorPayload::new(e.to_string(), resort_name, report_date, now);
                        webhook.send(resort_name, &payload).await;
                    }
                }
                log.write_section("ERROR", &e.to_string());
                log.flush();
                Err(e)
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn run_analysis(
        &self,
        request: &AnalysisRequest,
        calc: &DateRangeCalculator,
        is_current: bool,
        now: NaiveDateTime,
        date_string: &str,
        log: &mut DebugLog,
        result: &mut AnalysisResult,
    ) -> Result<(), ReportError> {
        let resort = &request.resort;
        let ranges = calc.all_ranges();
        let week_total = calc.week_total_actual();
        let dump_root = result.debug_dir.clone();

        let mut tables = Vec::with_capacity(ranges.len());
        for range in &ranges {
            tables.push(
                self.fetch_range(resort, range, &week_total, is_current, dump_root.as_deref())
                    .await?,
            );
        }

        let processed = process_ranges(
            resort,
            calc.report_date(),
            &ranges,
            &tables,
            week_total,
            is_current,
            log,
        );

        let resort_file = sanitize_filename(&resort.resort_name);
        let postfix = postfix_suffix(request.file_name_postfix.as_deref());

        if request.analysis_type.includes_report() {
            let doc = build_report(&processed, self.pr_ratio, now);
            match request.output {
                OutputMode::Json => {
                    let path = self
                        .output_dir
                        .join(format!("{}_Report_{}{}.json", resort_file, date_string, postfix));
                    write_report_json(&doc, &path)?;
                    if let Some(webhook) = &self.webhook {
                        result.webhook_results = webhook.send(&resort.resort_name, &doc).await;
                    }
                    result.report_path = Some(path);
                }
                OutputMode::Workbook => {
                    let path = self
                        .output_dir
                        .join(format!("{}_Report_{}{}.xlsx", resort_file, date_string, postfix));
                    write_report_workbook(&doc, &path)?;
                    result.report_path = Some(path);
                }
            }
            result.report = Some(doc);
        }

        if request.analysis_type.includes_insights() {
            // Insights are best effort: a failure here never fails the report.
            if let Err(e) = self.write_dmr_insights(&processed, &resort_file, date_string, &postfix, result) {
                warn!("Failed to generate DMR insights: {}", e);
            }
        }
        Ok(())
    }

    fn write_dmr_insights(
        &self,
        processed: &ProcessedReport,
        resort_file: &str,
        date_string: &str,
        postfix: &str,
        result: &mut AnalysisResult,
    ) -> Result<(), ExportError> {
        let table = build_dmr_insights(processed);
        if table.is_empty() {
            info!("No insights rows for {}", processed.resort_name);
            return Ok(());
        }
        let path = self
            .output_dir
            .join(format!("{}_dmr_insights_{}{}.xlsx", resort_file, date_string, postfix));
        write_insights_workbook(&table, &path)?;
        result.insights_path = Some(path);

        let top_path = self
            .output_dir
            .join(format!("useful_DMR_Insights_{}_{}{}.xlsx", resort_file, date_string, postfix));
        let rankings = rank_top_bottom(&table, TOP_BOTTOM_N);
        if write_top_bottom_workbook(&table.columns, &rankings, TOP_BOTTOM_N, &top_path)? {
            result.top_bottom_path = Some(top_path);
        }
        Ok(())
    }

    // --- Comparison insights ---

    /// One day of figures for a comparison date. Payroll comes from contract plus
    /// salary when the date is within a year of today, from history otherwise.
    #[allow(clippy::too_many_arguments)]
    async fn fetch_day_figures(
        &self,
        resort: &ResortConfig,
        day: DateRange,
        within_year: bool,
        label: &str,
        acc: &mut ReportAccumulators,
        dump_root: Option<&Path>,
        log: &mut DebugLog,
    ) -> Result<DayFigures, ReportError> {
        let request = Self::request_for(resort, day.start, day.end);
        let dump_root = dump_root.map(|root| root.join(label.to_lowercase()));
        let dump_root = dump_root.as_deref();

        let revenue_table = self
            .fetch(Procedure::Revenue, &request, &format!("{} revenue", label), dump_root)
            .await?;
        let visits_table = self
            .fetch(Procedure::Visits, &request, &format!("{} visits", label), dump_root)
            .await?;
        let budget_table = self
            .fetch(Procedure::Budget, &request, &format!("{} budget", label), dump_root)
            .await?;
        let (contract, salary, history, payroll_range) = if within_year {
            let contract = self
                .fetch(Procedure::PayrollContract, &request, &format!("{} payroll", label), dump_root)
                .await?;
            let salary = self
                .fetch(Procedure::PayrollSalary, &request, &format!("{} salary payroll", label), dump_root)
                .await?;
            (Some(contract), Some(salary), None, day)
        } else {
            let history = self
                .fetch(Procedure::PayrollHistory, &request, &format!("{} payroll history", label), dump_root)
                .await?;
            let archived = DateRange {
                id: RangeId::DAY_PRIOR,
                ..day
            };
            (None, None, Some(history), archived)
        };

        // Locations of a comparison are not report rows.
        let mut scratch = ReportAccumulators::new();
        let visits = aggregate_visits(&visits_table, &mut scratch);
        let revenue = aggregate_revenue(&revenue_table, acc).totals;
        let budget = aggregate_budget(&budget_table, &resort.visits_budget_mapping, acc);
        let payroll = PayrollReconciler::new(false)
            .reconcile(
                &payroll_range,
                PayrollInputs {
                    contract: contract.as_ref(),
                    salary: salary.as_ref(),
                    history: history.as_ref(),
                },
                &revenue,
                acc,
                log,
            )
            .totals();

        Ok(DayFigures {
            visits,
            revenue,
            payroll,
            budget,
        })
    }

    /// Day-vs-day variance tables for a comparison date against an anchor date.
    pub async fn generate_comparison_insights(
        &self,
        request: &ComparisonRequest,
    ) -> Result<ComparisonResult, ReportError> {
        let now = self.clock.now();
        let resort = &request.resort;
        let one_year_ago = now - Duration::days(365);
        let within_year = |date: NaiveDate| date.and_time(NaiveTime::MIN) >= one_year_ago;

        // When the comparison date is today both days are cut at the current time of day.
        let comparison_is_current = request.comparison_date == now.date();
        let day_window = |date: NaiveDate| {
            let calc = if comparison_is_current {
                DateRangeCalculator::new(date, true, false, date.and_time(now.time()))
            } else {
                DateRangeCalculator::new(date, false, true, now)
            };
            calc.range(RangeId::DAY_ACTUAL)
        };
        let comparison_day = day_window(request.comparison_date);
        let anchor_day = day_window(request.anchor_date);
        let comparison_str = request.comparison_date.format("%Y%m%d").to_string();
        let anchor_str = request.anchor_date.format("%Y%m%d").to_string();

        let mut log = DebugLog::disabled();
        let mut debug_dir = None;
        if request.debug {
            let dir = self
                .insights_dir
                .join(format!("{}-{}-insights", comparison_str, anchor_str));
            let log_path = dir.join("debugLog.txt");
            log = DebugLog::create(&log_path)
                .map_err(|e| io_context(e, format!("Creating {}", log_path.display())))?;
            let method = |within: bool| if within { "Actual Ranges" } else { "Prior Year Ranges" };
            log.write_section(
                "INSIGHT GENERATION DEBUG LOG",
                &format!(
                    "Resort: {}\nComparison Date: {} {}\nAnchor Date: {} {}\nComparison Date Payroll Method: {}\nAnchor Date Payroll Method: {}\n",
                    resort.resort_name,
                    request.comparison_date.format("%Y-%m-%d"),
                    if comparison_is_current { "(Current Date - using current time)" } else { "(Past Date - using full day)" },
                    request.anchor_date.format("%Y-%m-%d"),
                    if comparison_is_current { "(Using current time)" } else { "(Using full day)" },
                    method(within_year(request.comparison_date)),
                    method(within_year(request.anchor_date)),
                ),
            );
            debug_dir = Some(dir);
        }

        info!(
            "Generating comparison insights for {}: {} vs {}",
            resort.resort_name, request.comparison_date, request.anchor_date
        );
        let mut acc = ReportAccumulators::new();
        let fetched = async {
            let comparison = self
                .fetch_day_figures(
                    resort,
                    comparison_day,
                    within_year(request.comparison_date),
                    "Comparison",
                    &mut acc,
                    debug_dir.as_deref(),
                    &mut log,
                )
                .await?;
            let anchor = self
                .fetch_day_figures(
                    resort,
                    anchor_day,
                    within_year(request.anchor_date),
                    "Anchor",
                    &mut acc,
                    debug_dir.as_deref(),
                    &mut log,
                )
                .await?;
            Ok::<_, ReportError>((comparison, anchor))
        }
        .await;
        let (comparison, anchor) = match fetched {
            Ok(days) => days,
            Err(e) => {
                error!("Comparison insights failed for {}: {}", resort.resort_name, e);
                log.write_section("ERROR", &e.to_string());
                log.flush();
                return Err(e);
            }
        };

        let visits = build_visit_comparison(&comparison, &anchor);
        let departments = build_department_comparison(&comparison, &anchor, &acc.titles);

        let mut workbook_path = None;
        if let Some(dir) = &debug_dir {
            let path = dir.join("comparison_insights.xlsx");
            write_comparison_workbook(&[&visits, &departments], &path)?;
            workbook_path = Some(path);
            log.write_section("Insight generation complete!", "");
        }
        log.flush();

        let resort_file = sanitize_filename(&resort.resort_name);
        let mut top_bottom_paths = Vec::new();
        for (kind, table) in [("ComparisonVisits", &visits), ("ComparisonDepartments", &departments)] {
            if table.is_empty() {
                continue;
            }
            let path = self.output_dir.join(format!(
                "useful_{}_Insights_{}_{}-{}.xlsx",
                kind, resort_file, comparison_str, anchor_str
            ));
            let rankings = rank_top_bottom(table, TOP_BOTTOM_N);
            match write_top_bottom_workbook(&table.columns, &rankings, TOP_BOTTOM_N, &path) {
                Ok(true) => top_bottom_paths.push(path),
                Ok(false) => {}
                Err(e) => warn!("Failed to write {} top/bottom insights: {}", kind, e),
            }
        }

        Ok(ComparisonResult {
            visits,
            departments,
            workbook_path,
            top_bottom_paths,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::date_ranges::FixedClock;
    use crate::report_layout::ReportValue;
    use crate::result_table::CellValue;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::Mutex;
    use std::time::Duration as StdDuration;
    use tokio::runtime::Runtime;

    type Call = (Procedure, NaiveDateTime, NaiveDateTime);

    // Serves the same table for every window of a procedure and records each call.
    struct FakeSource {
        tables: HashMap<Procedure, ResultTable>,
        fail_on: Option<Procedure>,
        calls: Mutex<Vec<Call>>,
    }

    impl FakeSource {
        fn new() -> Self {
            FakeSource {
                tables: HashMap::new(),
                fail_on: None,
                calls: Mutex::new(Vec::new()),
            }
        }

        fn with(mut self, procedure: Procedure, table: ResultTable) -> Self {
            self.tables.insert(procedure, table);
            self
        }

        fn calls_to(&self, procedure: Procedure) -> Vec<Call> {
            self.calls
                .lock()
                .unwrap()
                .iter()
                .filter(|c| c.0 == procedure)
                .cloned()
                .collect()
        }
    }

    #[async_trait]
    impl ProcedureSource for FakeSource {
        async fn call(
            &self,
            procedure: Procedure,
            request: &ProcedureRequest,
        ) -> Result<ResultTable, DataSourceError> {
            self.calls
                .lock()
                .unwrap()
                .push((procedure, request.start, request.end));
            if self.fail_on == Some(procedure) {
                return Err(DataSourceError::Procedure {
                    procedure,
                    message: "invalid column name".to_string(),
                });
            }
            Ok(self.tables.get(&procedure).cloned().unwrap_or_default())
        }
    }

    fn text(s: &str) -> CellValue {
        CellValue::Text(s.to_string())
    }

    fn table(columns: &[&str], rows: Vec<Vec<CellValue>>) -> ResultTable {
        let mut t = ResultTable::new(columns.iter().copied());
        for row in rows {
            t.push_row(row);
        }
        t
    }

    fn dt(s: &str) -> NaiveDateTime {
        NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S").unwrap()
    }

    fn temp_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("dmr-engine-{}-{}", name, std::process::id()));
        let _ = std::fs::remove_dir_all(&dir);
        dir
    }

    fn full_source() -> FakeSource {
        FakeSource::new()
            .with(
                Procedure::Revenue,
                table(
                    &["Department", "DepartmentTitle", "Revenue"],
                    vec![vec![text("4100"), text("Lift Tickets"), CellValue::Float(1000.0)]],
                ),
            )
            .with(
                Procedure::Visits,
                table(
                    &["Location", "Visits"],
                    vec![vec![text("Purgatory Ticket Office"), CellValue::Int(300)]],
                ),
            )
            .with(
                Procedure::Weather,
                table(
                    &["snow_24hrs", "base_depth"],
                    vec![vec![CellValue::Float(2.5), CellValue::Float(40.0)]],
                ),
            )
            .with(
                Procedure::PayrollContract,
                table(
                    &["Department", "start_punchtime", "end_punchtime", "rate"],
                    vec![vec![
                        text("4100"),
                        text("2025-03-05 08:00:00"),
                        text("2025-03-05 16:00:00"),
                        CellValue::Int(20),
                    ]],
                ),
            )
            .with(
                Procedure::PayrollSalary,
                table(&["DeptCode", "Total"], vec![vec![text("4100"), CellValue::Float(40.0)]]),
            )
            .with(
                Procedure::PayrollHistory,
                table(&["department", "total"], vec![vec![text("4100"), CellValue::Float(500.0)]]),
            )
            .with(
                Procedure::Budget,
                table(
                    &["Department", "Type", "Amount"],
                    vec![
                        vec![text("4100"), text("Revenue"), CellValue::Float(800.0)],
                        vec![text("4100"), text("Payroll"), CellValue::Float(100.0)],
                    ],
                ),
            )
    }

    fn engine(source: FakeSource, name: &str) -> ReportEngine<FakeSource> {
        let dir = temp_dir(name);
        ReportEngine::new(source, dir.join("reports"))
            .with_insights_dir(dir.join("insights"))
            .with_clock(Arc::new(FixedClock::at(dt("2025-03-06 08:00:00"))))
            .with_retry(RetryPolicy {
                max_attempts: 3,
                base_delay: StdDuration::ZERO,
            })
    }

    fn resort() -> ResortConfig {
        ResortConfig::new("Purgatory", "Purgatory", 46)
    }

    #[test]
    fn past_date_report_follows_fetch_plan_and_writes_files() {
        let engine = engine(full_source(), "past");
        let mut request = AnalysisRequest::new(resort());
        request.run_date = Some(dt("2025-03-05 00:00:00"));

        let result = Runtime::new()
            .unwrap()
            .block_on(engine.generate_analysis(&request))
            .unwrap();

        let source = &engine.source;
        assert_eq!(source.calls_to(Procedure::Revenue).len(), 9);
        assert_eq!(source.calls_to(Procedure::PayrollContract).len(), 4);
        assert_eq!(source.calls_to(Procedure::PayrollHistory).len(), 5);
        let budget_calls = source.calls_to(Procedure::Budget);
        assert_eq!(budget_calls.len(), 5);
        // full week for the report column, Monday to date for insights
        assert!(budget_calls
            .iter()
            .any(|c| c.1 == dt("2025-03-03 00:00:00") && c.2 == dt("2025-03-09 23:59:59")));
        assert!(budget_calls
            .iter()
            .any(|c| c.1 == dt("2025-03-03 00:00:00") && c.2 == dt("2025-03-05 23:59:59")));

        let report_path = result.report_path.unwrap();
        assert!(report_path.ends_with("Purgatory_Report_20250305.xlsx"));
        assert!(report_path.exists());
        assert!(result.insights_path.unwrap().exists());
        assert!(result.top_bottom_path.unwrap().exists());

        let doc = result.report.unwrap();
        let payroll = doc.row("Lift Tickets - Payroll").unwrap();
        assert_eq!(payroll.values[0], ReportValue::Number(200.0));
        assert_eq!(payroll.values[1], ReportValue::Number(100.0));
        assert_eq!(payroll.values[2], ReportValue::Number(500.0));
        assert_eq!(doc.row("Snow 24hrs").unwrap().values[0], ReportValue::Number(2.5));
    }

    #[test]
    fn current_date_report_zeroes_payroll_and_skips_budget() {
        let engine = engine(full_source(), "current");
        let mut request = AnalysisRequest::new(resort());
        request.output = OutputMode::Json;
        request.analysis_type = AnalysisType::Report;

        let result = Runtime::new()
            .unwrap()
            .block_on(engine.generate_analysis(&request))
            .unwrap();

        assert!(engine.source.calls_to(Procedure::PayrollContract).is_empty());
        assert!(engine.source.calls_to(Procedure::Budget).is_empty());
        let doc = result.report.unwrap();
        assert_eq!(doc.report_date, "2025-03-06");
        assert!(doc
            .row("Total Payroll")
            .unwrap()
            .values
            .iter()
            .all(|v| *v == ReportValue::Number(0.0)));
        assert_eq!(
            doc.row("Total Revenue").unwrap().values[0],
            ReportValue::Number(1000.0)
        );
        let path = result.report_path.unwrap();
        assert!(path.ends_with("Purgatory_Report_20250306.json"));
        assert!(result.insights_path.is_none());
        assert!(result.webhook_results.is_empty());
    }

    #[test]
    fn fatal_error_is_returned_and_logged() {
        let mut source = full_source();
        source.fail_on = Some(Procedure::Revenue);
        let engine = engine(source, "failing");
        let mut request = AnalysisRequest::new(resort());
        request.run_date = Some(dt("2025-03-05 00:00:00"));
        request.debug = true;
        request.file_name_postfix = Some("rerun".to_string());

        let err = Runtime::new()
            .unwrap()
            .block_on(engine.generate_analysis(&request))
            .unwrap_err();
        assert!(matches!(err, ReportError::DataSource(_)));
        // not transient, so no retries
        assert_eq!(engine.source.calls_to(Procedure::Revenue).len(), 1);

        let log_path = engine
            .output_dir()
            .join("Debug-purgatory-20250305-rerun")
            .join("DebugLogs.txt");
        let log = std::fs::read_to_string(log_path).unwrap();
        assert!(log.contains("ERROR"));
        assert!(log.contains("invalid column name"));
    }

    #[test]
    fn debug_run_dumps_raw_tables_for_replay() {
        let engine = engine(full_source(), "debug");
        let mut request = AnalysisRequest::new(resort());
        request.run_date = Some(dt("2025-03-05 00:00:00"));
        request.analysis_type = AnalysisType::Report;
        request.debug = true;

        let result = Runtime::new()
            .unwrap()
            .block_on(engine.generate_analysis(&request))
            .unwrap();
        let dir = result.debug_dir.unwrap();
        let day_dump = dir.join("revenue").join("20250305000000_20250305235959.csv");
        assert!(day_dump.exists());
        let log = std::fs::read_to_string(dir.join("DebugLogs.txt")).unwrap();
        assert!(log.contains("PAYROLL AUDIT: For The Day (Actual)"));
        assert!(log.contains("REVENUE: For The Day (Actual)"));
    }

    #[test]
    fn comparison_uses_history_for_dates_older_than_a_year() {
        let engine = engine(full_source(), "comparison");
        let request = ComparisonRequest {
            resort: resort(),
            comparison_date: NaiveDate::from_ymd_opt(2025, 3, 1).unwrap(),
            anchor_date: NaiveDate::from_ymd_opt(2023, 3, 1).unwrap(),
            debug: true,
        };

        let result = Runtime::new()
            .unwrap()
            .block_on(engine.generate_comparison_insights(&request))
            .unwrap();

        let contract = engine.source.calls_to(Procedure::PayrollContract);
        assert_eq!(contract.len(), 1);
        assert_eq!(contract[0].1, dt("2025-03-01 00:00:00"));
        let history = engine.source.calls_to(Procedure::PayrollHistory);
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].2, dt("2023-03-01 23:59:59"));

        let section = &result.departments.sections[0];
        assert_eq!(section.rows.len(), 1);
        assert_eq!(section.rows[0][0], crate::insights::InsightCell::Text("Lift Tickets".into()));
        assert_eq!(section.rows[0][7].number(), Some(200.0));
        assert_eq!(section.rows[0][8].number(), Some(500.0));
        assert_eq!(result.visits.sections[0].rows.len(), 1);

        assert!(result.workbook_path.unwrap().ends_with("20250301-20230301-insights/comparison_insights.xlsx"));
        assert_eq!(result.top_bottom_paths.len(), 2);
    }
}
