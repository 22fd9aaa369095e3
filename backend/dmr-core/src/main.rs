// src/main.rs

use anyhow::{Context, Result};
use chrono::NaiveDate;
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

mod aggregators;
mod audit;
mod config;
mod data_source;
mod date_ranges;
mod insights;
mod payroll;
mod processed;
mod report_engine;
mod report_layout;
mod result_table;
mod value_utils;
mod webhook;
mod xlsx_export;


use config::{find_resort, parse_run_date, resorts, EnvConfig, ResortConfig, RUN_DATE_FORMAT};
use data_source::{CsvReplaySource, DataSourceError};
use date_ranges::{Clock, SystemClock};
use report_engine::{
    AnalysisRequest, AnalysisType, ComparisonRequest, OutputMode, ReportEngine,
};
use report_layout::PrRatio;
use webhook::WebhookClient;

#[derive(Parser)]
#[command(name = "dmr-core")]
#[command(about = "Daily Management Reports and variance insights for resort operations")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,

    #[command(flatten)]
    common: CommonArgs,
}

#[derive(Args)]
struct CommonArgs {
    /// Directory of recorded procedure results (<procedure>/<start>_<end>.csv)
    #[arg(long, global = true, env = "REPLAY_DIR")]
    replay_dir: Option<PathBuf>,

    /// Where reports and insights files are written
    #[arg(long, global = true, env = "OUTPUT_DIR")]
    output_dir: Option<PathBuf>,

    /// Root of the comparison insights debug folders
    #[arg(long, global = true, env = "INSIGHTS_DIR")]
    insights_dir: Option<PathBuf>,

    /// JSON array of resort configurations replacing the built-in list
    #[arg(long, global = true, env = "RESORTS_FILE")]
    resorts_file: Option<PathBuf>,

    #[arg(long, global = true, value_enum, default_value_t = AnalysisType::Both)]
    analysis_type: AnalysisType,

    #[arg(long, global = true, value_enum, default_value_t = PrRatio::PayrollOverRevenue)]
    pr_ratio: PrRatio,

    /// Write DebugLogs.txt and dump every procedure result
    #[arg(long, global = true)]
    debug: bool,

    /// Appended to output file names as "-<postfix>"
    #[arg(long, global = true)]
    postfix: Option<String>,
}

#[derive(Subcommand)]
enum Command {
    /// Report on one resort
    Report {
        resort: String,

        /// Database name when the resort has several
        #[arg(long)]
        db: Option<String>,

        /// MM/DD/YYYY; omitted means a current-date report
        #[arg(long)]
        run_date: Option<String>,
    },

    /// Report on every configured resort
    Batch {
        /// MM/DD/YYYY; omitted means a current-date report
        #[arg(long)]
        run_date: Option<String>,
    },

    /// Day-vs-day insights for one resort
    Compare {
        resort: String,

        #[arg(long)]
        db: Option<String>,

        /// MM/DD/YYYY
        #[arg(long)]
        comparison_date: String,

        /// MM/DD/YYYY
        #[arg(long)]
        anchor_date: String,
    },
}

fn init_tracing() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = FmtSubscriber::builder().with_env_filter(filter).finish();
    tracing::subscriber::set_global_default(subscriber)
        .context("Setting tracing subscriber failed")?;
    Ok(())
}

fn replay_source(dir: Option<PathBuf>) -> Result<CsvReplaySource> {
    let dir = dir.ok_or_else(|| {
        DataSourceError::NotConfigured("set REPLAY_DIR or pass --replay-dir".to_string())
    })?;
    Ok(CsvReplaySource::new(dir)?)
}

fn lookup_resort(known: &[ResortConfig], name: &str, db: Option<&str>) -> Result<ResortConfig> {
    match find_resort(known, name, db) {
        Some(resort) => Ok(resort.clone()),
        None => {
            let db_name = db.unwrap_or(name);
            warn!("{} ({}) is not a configured resort, using defaults", name, db_name);
            Ok(ResortConfig::new(name.trim(), db_name.trim(), -1))
        }
    }
}

fn parse_date(value: &str) -> Result<NaiveDate> {
    Ok(parse_run_date(value)
        .with_context(|| format!("Dates are given as {}", RUN_DATE_FORMAT))?
        .date())
}

fn apply_common(request: &mut AnalysisRequest, common: &CommonArgs) {
    request.analysis_type = common.analysis_type;
    request.debug = common.debug;
    request.file_name_postfix = common.postfix.clone();
}

async fn run(cli: Cli) -> Result<()> {
    let common = cli.common;
    let env = EnvConfig::from_env().context("Reading environment configuration failed")?;
    let known = resorts(common.resorts_file.as_deref().or(env.resorts_file.as_deref()))?;
    let output_dir = common.output_dir.clone().unwrap_or_else(|| env.output_dir());
    let insights_dir = common.insights_dir.clone().unwrap_or_else(|| env.insights_dir());
    let source = replay_source(common.replay_dir.clone().or_else(|| env.replay_dir.clone()))?;

    let engine = ReportEngine::new(source, output_dir)
        .with_insights_dir(insights_dir)
        .with_pr_ratio(common.pr_ratio);

    match cli.command {
        Some(Command::Report { resort, db, run_date }) => {
            let mut request = AnalysisRequest::new(lookup_resort(&known, &resort, db.as_deref())?);
            request.run_date = run_date.as_deref().map(parse_run_date).transpose()?;
            apply_common(&mut request, &common);
            let result = engine.generate_analysis(&request).await?;
            if let Some(path) = &result.report_path {
                info!("Report written to {}", path.display());
            }
            if let Some(path) = &result.insights_path {
                info!("Insights written to {}", path.display());
            }
        }
        Some(Command::Batch { run_date }) => {
            let run_date = run_date.as_deref().map(parse_run_date).transpose()?;
            let (mut reports, mut insights) = (0usize, 0usize);
            for resort in &known {
                let mut request = AnalysisRequest::new(resort.clone());
                request.run_date = run_date;
                apply_common(&mut request, &common);
                match engine.generate_analysis(&request).await {
                    Ok(result) => {
                        reports += usize::from(result.report_path.is_some());
                        insights += usize::from(result.insights_path.is_some());
                    }
                    Err(e) => error!(
                        "Skipping {} ({}): {}",
                        resort.resort_name, resort.db_name, e
                    ),
                }
            }
            info!(
                "Batch finished: {} reports and {} insights files in {}",
                reports,
                insights,
                engine.output_dir().display()
            );
        }
        Some(Command::Compare {
            resort,
            db,
            comparison_date,
            anchor_date,
        }) => {
            let request = ComparisonRequest {
                resort: lookup_resort(&known, &resort, db.as_deref())?,
                comparison_date: parse_date(&comparison_date)?,
                anchor_date: parse_date(&anchor_date)?,
                debug: common.debug,
            };
            let result = engine.generate_comparison_insights(&request).await?;
            for path in &result.top_bottom_paths {
                info!("Comparison insights written to {}", path.display());
            }
        }
        None => {
            let resort = env.resort(&known)?;
            let webhook = WebhookClient::new(env.webhook_base())
                .context("Building webhook client failed")?;
            let engine = engine.with_webhook(Some(webhook));
            let mut request = AnalysisRequest::new(resort);
            request.run_date = Some(env.run_date(SystemClock.now())?);
            request.output = OutputMode::Json;
            apply_common(&mut request, &common);
            let result = engine.generate_analysis(&request).await?;
            let delivered = result.webhook_results.values().filter(|ok| **ok).count();
            info!(
                "JSON report for {} delivered to {}/{} webhooks",
                request.resort.resort_name,
                delivered,
                result.webhook_results.len()
            );
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    dotenv::dotenv().ok();
    if let Err(e) = init_tracing() {
        eprintln!("{:#}", e);
        return ExitCode::FAILURE;
    }
    match run(Cli::parse()).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{:#}", e);
            ExitCode::FAILURE
        }
    }
}
