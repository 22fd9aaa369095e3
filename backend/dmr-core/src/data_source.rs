// src/data_source.rs

use crate::result_table::{candidates, CellValue, ResultTable};
use async_trait::async_trait;
use chrono::NaiveDateTime;
use once_cell::sync::Lazy;
use regex::Regex;
use std::fmt;
use std::fs::{self, File};
use std::future::Future;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

// --- Procedures ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Procedure {
    Revenue,
    PayrollContract,
    PayrollSalary,
    PayrollHistory,
    Visits,
    Weather,
    Budget,
}

impl Procedure {
    /// Name of the stored procedure on the reporting database.
    pub fn procedure_name(&self) -> &'static str {
        match self {
            Procedure::Revenue => "Shakudo_DMRGetRevenue",
            Procedure::PayrollContract => "Shakudo_DMRGetPayroll",
            Procedure::PayrollSalary => "Shakudo_DMRGetPayrollSalary",
            Procedure::PayrollHistory => "Shakudo_DMRGetPayrollHistory",
            Procedure::Visits => "Shakudo_DMRGetVists",
            Procedure::Weather => "Shakudo_GetSnow",
            Procedure::Budget => "Shakudo_DMRGetBudget",
        }
    }

    /// Directory name used by debug dumps and the CSV replay source.
    pub fn dump_dir(&self) -> &'static str {
        match self {
            Procedure::Revenue => "revenue",
            Procedure::PayrollContract => "payroll_contract",
            Procedure::PayrollSalary => "payroll_salary",
            Procedure::PayrollHistory => "payroll_history",
            Procedure::Visits => "visits",
            Procedure::Weather => "weather",
            Procedure::Budget => "budget",
        }
    }
}

impl fmt::Display for Procedure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.procedure_name())
    }
}

/// Parameters every procedure call receives. Each procedure uses the subset it needs
/// (revenue takes database and group, payroll and budget take the resort name).
#[derive(Debug, Clone)]
pub struct ProcedureRequest {
    pub resort: String,
    pub database: String,
    pub group_num: i32,
    pub start: NaiveDateTime,
    pub end: NaiveDateTime,
}

impl ProcedureRequest {
    pub fn dump_file_name(&self) -> String {
        format!(
            "{}_{}.csv",
            self.start.format("%Y%m%d%H%M%S"),
            self.end.format("%Y%m%d%H%M%S")
        )
    }
}

// --- Errors ---

#[derive(Error, Debug)]
pub enum DataSourceError {
    #[error("File I/O error: {context}")]
    Io {
        #[source]
        source: std::io::Error,
        context: String,
    },

    #[error("CSV error in {path}")]
    Csv {
        #[source]
        source: csv::Error,
        path: PathBuf,
    },

    #[error("Procedure {procedure} failed: {message}")]
    Procedure {
        procedure: Procedure,
        message: String,
    },

    #[error("No data source configured: {0}")]
    NotConfigured(String),
}

fn io_context<S: Into<String>>(source: std::io::Error, context: S) -> DataSourceError {
    DataSourceError::Io {
        source,
        context: context.into(),
    }
}

static TRANSIENT_ERROR: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)deadlock|timeout|connection|lock").expect("static regex"));

impl DataSourceError {
    /// Deadlocks, timeouts, dropped connections and lock waits are worth retrying.
    pub fn is_transient(&self) -> bool {
        let mut message = self.to_string();
        let mut source = std::error::Error::source(self);
        while let Some(inner) = source {
            message.push_str(": ");
            message.push_str(&inner.to_string());
            source = std::error::Error::source(inner);
        }
        TRANSIENT_ERROR.is_match(&message)
    }
}

// --- Source trait ---

#[async_trait]
pub trait ProcedureSource: Send + Sync {
    async fn call(
        &self,
        procedure: Procedure,
        request: &ProcedureRequest,
    ) -> Result<ResultTable, DataSourceError>;
}

// --- Retry ---

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_secs(2),
        }
    }
}

/// Runs `operation` up to `policy.max_attempts` times, sleeping `base_delay * attempt`
/// between attempts. Only transient errors are retried.
pub async fn execute_with_retry<T, F, Fut>(
    operation_name: &str,
    policy: RetryPolicy,
    mut operation: F,
) -> Result<T, DataSourceError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, DataSourceError>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 1;
    loop {
        match operation().await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_transient() && attempt < max_attempts => {
                let delay = policy.base_delay * attempt;
                warn!(
                    "{} failed (attempt {}/{}): {}. Retrying in {:?}",
                    operation_name, attempt, max_attempts, e, delay
                );
                sleep(delay).await;
                attempt += 1;
            }
            Err(e) => {
                error!(
                    "{} failed after {} attempt(s): {}",
                    operation_name, attempt, e
                );
                return Err(e);
            }
        }
    }
}

// --- CSV replay / dump ---

/// Replays procedure results from `<root>/<procedure>/<start>_<end>.csv`, the layout
/// written by debug runs. Missing files read as empty results.
#[derive(Debug, Clone)]
pub struct CsvReplaySource {
    root: PathBuf,
}

impl CsvReplaySource {
    pub fn new(root: impl Into<PathBuf>) -> Result<Self, DataSourceError> {
        let root = root.into();
        if !root.is_dir() {
            return Err(DataSourceError::NotConfigured(format!(
                "replay directory {} does not exist",
                root.display()
            )));
        }
        info!("Replaying procedure results from {}", root.display());
        Ok(CsvReplaySource { root })
    }

    pub fn path_for(&self, procedure: Procedure, request: &ProcedureRequest) -> PathBuf {
        dump_path(&self.root, procedure, request)
    }
}

#[async_trait]
impl ProcedureSource for CsvReplaySource {
    async fn call(
        &self,
        procedure: Procedure,
        request: &ProcedureRequest,
    ) -> Result<ResultTable, DataSourceError> {
        let path = self.path_for(procedure, request);
        if !path.exists() {
            debug!("No replay file {}, returning empty result", path.display());
            return Ok(ResultTable::empty());
        }
        read_csv_table(&path)
    }
}

pub fn dump_path(root: &Path, procedure: Procedure, request: &ProcedureRequest) -> PathBuf {
    root.join(procedure.dump_dir()).join(request.dump_file_name())
}

/// Key and title columns keep their raw text so codes like "0410" replay unchanged.
const TEXT_COLUMNS: [&[&str]; 4] = [
    candidates::DEPARTMENT,
    candidates::DEPARTMENT_TITLE,
    candidates::LOCATION,
    candidates::BUDGET_TYPE,
];

pub fn read_csv_table(path: &Path) -> Result<ResultTable, DataSourceError> {
    let csv_err = |source| DataSourceError::Csv {
        source,
        path: path.to_path_buf(),
    };
    let file = File::open(path)
        .map_err(|e| io_context(e, format!("Failed to open {}", path.display())))?;
    let mut reader = csv::Reader::from_reader(file);
    let headers = reader.headers().map_err(csv_err)?.clone();
    let text_columns: Vec<bool> = headers
        .iter()
        .map(|h| TEXT_COLUMNS.iter().any(|names| names.contains(&h)))
        .collect();
    let mut table = ResultTable::new(headers.iter());
    for record in reader.records() {
        let record = record.map_err(csv_err)?;
        table.push_row(
            record
                .iter()
                .zip(&text_columns)
                .map(|(raw, is_text)| {
                    if *is_text {
                        CellValue::text(raw)
                    } else {
                        CellValue::infer(raw)
                    }
                })
                .collect(),
        );
    }
    Ok(table)
}

pub fn write_csv_table(path: &Path, table: &ResultTable) -> Result<(), DataSourceError> {
    let csv_err = |source| DataSourceError::Csv {
        source,
        path: path.to_path_buf(),
    };
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .map_err(|e| io_context(e, format!("Failed to create {}", parent.display())))?;
    }
    let mut writer = csv::Writer::from_path(path).map_err(csv_err)?;
    writer.write_record(table.columns()).map_err(csv_err)?;
    for row in table.rows() {
        writer
            .write_record(row.cells().iter().map(|c| c.to_string()))
            .map_err(csv_err)?;
    }
    writer
        .flush()
        .map_err(|e| io_context(e, format!("Failed to flush {}", path.display())))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value_utils::trim_code;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;
    use tokio::runtime::Runtime;

    fn request() -> ProcedureRequest {
        ProcedureRequest {
            resort: "Purgatory".to_string(),
            database: "PURGATORY".to_string(),
            group_num: 46,
            start: NaiveDateTime::parse_from_str("2025-01-10 00:00:00", "%Y-%m-%d %H:%M:%S").unwrap(),
            end: NaiveDateTime::parse_from_str("2025-01-10 23:59:59", "%Y-%m-%d %H:%M:%S").unwrap(),
        }
    }

    fn failure(message: &str) -> DataSourceError {
        DataSourceError::Procedure {
            procedure: Procedure::Revenue,
            message: message.to_string(),
        }
    }

    fn quick_policy() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_millis(1),
        }
    }

    #[test]
    fn transient_classification() {
        assert!(failure("Transaction was DEADLOCKED on lock resources").is_transient());
        assert!(failure("Login timeout expired").is_transient());
        assert!(failure("Connection reset by peer").is_transient());
        assert!(!failure("Invalid object name 'Shakudo_DMRGetRevenue'").is_transient());
    }

    #[test]
    fn retry_recovers_from_transient_errors() {
        let rt = Runtime::new().unwrap();
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let result = rt.block_on(execute_with_retry("revenue", quick_policy(), || {
            let counter = counter.clone();
            async move {
                let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
                if n < 3 {
                    Err(failure("deadlock victim"))
                } else {
                    Ok(n)
                }
            }
        }));
        assert_eq!(result.unwrap(), 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn retry_gives_up_after_max_attempts() {
        let rt = Runtime::new().unwrap();
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let result: Result<(), _> = rt.block_on(execute_with_retry("visits", quick_policy(), || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(failure("connection timeout"))
            }
        }));
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn retry_does_not_repeat_permanent_errors() {
        let rt = Runtime::new().unwrap();
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let result: Result<(), _> = rt.block_on(execute_with_retry("budget", quick_policy(), || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(failure("permission denied"))
            }
        }));
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn dump_and_replay_round_trip_through_layout() {
        let root = std::env::temp_dir().join(format!("dmr_replay_test_{}", std::process::id()));
        let req = request();
        let mut table = ResultTable::new(["DeptCode", "DeptTitle", "Revenue"]);
        table.push_row(vec![
            CellValue::Text("4100".into()),
            CellValue::Text("Lift Tickets".into()),
            CellValue::Float(1200.5),
        ]);
        write_csv_table(&dump_path(&root, Procedure::Revenue, &req), &table).unwrap();

        let rt = Runtime::new().unwrap();
        let source = CsvReplaySource::new(&root).unwrap();
        let replayed = rt.block_on(source.call(Procedure::Revenue, &req)).unwrap();
        assert_eq!(replayed.columns(), table.columns());
        let row = replayed.rows().next().unwrap();
        assert_eq!(row.get("DeptCode"), &CellValue::Text("4100".into()));
        assert_eq!(row.get("Revenue"), &CellValue::Float(1200.5));

        let missing = rt.block_on(source.call(Procedure::Weather, &req)).unwrap();
        assert!(missing.is_empty());
        fs::remove_dir_all(&root).ok();
    }

    #[test]
    fn replay_keeps_zero_padded_codes_and_text_titles() {
        let path = std::env::temp_dir()
            .join(format!("dmr_replay_codes_{}", std::process::id()))
            .join("revenue.csv");
        let mut table = ResultTable::new(["Department", "Revenue", "DepartmentTitle", "Note"]);
        table.push_row(vec![
            CellValue::Text("0410".into()),
            CellValue::Float(10.0),
            CellValue::Text("NaN".into()),
            CellValue::Text("inf".into()),
        ]);
        write_csv_table(&path, &table).unwrap();

        let replayed = read_csv_table(&path).unwrap();
        let row = replayed.rows().next().unwrap();
        assert_eq!(trim_code(row.get("Department")), "0410");
        assert_eq!(row.get("Revenue"), &CellValue::Int(10));
        assert_eq!(row.get("DepartmentTitle"), &CellValue::Text("NaN".into()));
        assert_eq!(row.get("Note"), &CellValue::Text("inf".into()));
        if let Some(dir) = path.parent() {
            fs::remove_dir_all(dir).ok();
        }
    }

    #[test]
    fn replay_source_requires_existing_directory() {
        let err = CsvReplaySource::new("/definitely/not/here").unwrap_err();
        assert!(matches!(err, DataSourceError::NotConfigured(_)));
    }
}
