// src/config.rs

use crate::webhook::DEFAULT_WEBHOOK_BASE;
use chrono::{Duration, NaiveDate, NaiveDateTime, NaiveTime};
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info};

pub const RUN_DATE_FORMAT: &str = "%m/%d/%Y";
pub const DEFAULT_OUTPUT_DIR: &str = "reports";
pub const DEFAULT_INSIGHTS_DIR: &str = "insights";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingEnvVar(String),
    #[error("Invalid run date '{value}' (expected MM/DD/YYYY): {source}")]
    InvalidRunDate {
        value: String,
        #[source]
        source: chrono::ParseError,
    },
    #[error("Environment could not be parsed: {0}")]
    Env(#[from] envy::Error),
    #[error("Failed to read resorts file {path}: {source}")]
    ResortsFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Invalid resorts file {path}: {source}")]
    ResortsJson {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

// --- Resorts ---

fn default_group_num() -> i32 {
    -1
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResortConfig {
    #[serde(alias = "resort_name")]
    pub resort_name: String,
    #[serde(alias = "db_name")]
    pub db_name: String,
    #[serde(alias = "group_num", default = "default_group_num")]
    pub group_num: i32,
    /// Budget department code -> visits location name it budgets for.
    #[serde(alias = "visits_budget_mapping", default)]
    pub visits_budget_mapping: BTreeMap<String, String>,
}

impl ResortConfig {
    pub fn new(resort_name: &str, db_name: &str, group_num: i32) -> Self {
        ResortConfig {
            resort_name: resort_name.to_string(),
            db_name: db_name.to_string(),
            group_num,
            visits_budget_mapping: BTreeMap::new(),
        }
    }
}

/// Resorts the batch run covers when no resorts file is given.
pub static RESORT_MAPPING: Lazy<Vec<ResortConfig>> = Lazy::new(|| {
    [
        ("Purgatory", "PURGATORY", 46),
        ("Purgatory", "HESPERUS", 54),
        ("Purgatory", "SNOWCAT", 59),
        ("Purgatory", "SPIDER MOUNTAIN", 67),
        ("Purgatory", "DMMA", 70),
        ("Purgatory", "WILLAMETTE", 71),
        ("MCP", "PAJARITO", 9),
        ("MCP", "SANDIA", 10),
        ("MCP", "WILLAMETTE", 12),
        ("Snowbowl", "Snowbowl", -1),
        ("Lee Canyon", "Lee Canyon", -1),
        ("Sipapu", "Sipapu", -1),
        ("Nordic", "Nordic", -1),
        ("Brian", "Brian", -1),
    ]
    .iter()
    .map(|(db, resort, group)| ResortConfig::new(resort, db, *group))
    .collect()
});

/// Reads a JSON array of resort configurations.
pub fn load_resorts_file(path: &Path) -> Result<Vec<ResortConfig>, ConfigError> {
    let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::ResortsFile {
        path: path.to_path_buf(),
        source,
    })?;
    let resorts: Vec<ResortConfig> =
        serde_json::from_str(&raw).map_err(|source| ConfigError::ResortsJson {
            path: path.to_path_buf(),
            source,
        })?;
    info!("Loaded {} resorts from {}", resorts.len(), path.display());
    Ok(resorts)
}

/// Resorts file when given, otherwise the built-in mapping.
pub fn resorts(file: Option<&Path>) -> Result<Vec<ResortConfig>, ConfigError> {
    match file {
        Some(path) => load_resorts_file(path),
        None => Ok(RESORT_MAPPING.clone()),
    }
}

/// Case-insensitive lookup by resort name (and database when given).
pub fn find_resort<'a>(resorts: &'a [ResortConfig], name: &str, db_name: Option<&str>) -> Option<&'a ResortConfig> {
    resorts.iter().find(|r| {
        r.resort_name.eq_ignore_ascii_case(name.trim())
            && db_name.map(|db| r.db_name.eq_ignore_ascii_case(db.trim())).unwrap_or(true)
    })
}

// --- Environment ---

pub fn parse_run_date(value: &str) -> Result<NaiveDateTime, ConfigError> {
    NaiveDate::parse_from_str(value.trim(), RUN_DATE_FORMAT)
        .map(|d| d.and_time(NaiveTime::MIN))
        .map_err(|source| ConfigError::InvalidRunDate {
            value: value.to_string(),
            source,
        })
}

/// Variables read from the process environment (after `.env` is loaded).
#[derive(Debug, Clone, Default, Deserialize)]
pub struct EnvConfig {
    pub resort_name: Option<String>,
    pub db_name: Option<String>,
    pub group_num: Option<i32>,
    pub run_date: Option<String>,
    pub n8n_webhook_base: Option<String>,
    pub output_dir: Option<PathBuf>,
    pub insights_dir: Option<PathBuf>,
    pub replay_dir: Option<PathBuf>,
    pub resorts_file: Option<PathBuf>,
}

impl EnvConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenv::dotenv().ok();
        let config = envy::from_env::<EnvConfig>()?;
        debug!("Environment configuration: {:?}", config);
        Ok(config)
    }

    /// RESORT_NAME is required; DB_NAME defaults to it and GROUP_NUM to -1.
    /// A matching entry of `known` contributes its visits-budget mapping.
    pub fn resort(&self, known: &[ResortConfig]) -> Result<ResortConfig, ConfigError> {
        let resort_name = self
            .resort_name
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .ok_or_else(|| ConfigError::MissingEnvVar("RESORT_NAME".to_string()))?;
        let db_name = self
            .db_name
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .unwrap_or(resort_name);
        let mut resort = ResortConfig::new(resort_name, db_name, self.group_num.unwrap_or(-1));
        if let Some(found) = find_resort(known, resort_name, Some(db_name)) {
            resort.visits_budget_mapping = found.visits_budget_mapping.clone();
        }
        Ok(resort)
    }

    /// RUN_DATE when set, otherwise yesterday relative to `now`.
    pub fn run_date(&self, now: NaiveDateTime) -> Result<NaiveDateTime, ConfigError> {
        match self.run_date.as_deref().filter(|s| !s.trim().is_empty()) {
            Some(value) => parse_run_date(value),
            None => Ok(now - Duration::days(1)),
        }
    }

    pub fn webhook_base(&self) -> &str {
        self.n8n_webhook_base.as_deref().unwrap_or(DEFAULT_WEBHOOK_BASE)
    }

    pub fn output_dir(&self) -> PathBuf {
        self.output_dir
            .clone()
            .unwrap_or_else(|| PathBuf::from(DEFAULT_OUTPUT_DIR))
    }

    pub fn insights_dir(&self) -> PathBuf {
        self.insights_dir
            .clone()
            .unwrap_or_else(|| PathBuf::from(DEFAULT_INSIGHTS_DIR))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dt(s: &str) -> NaiveDateTime {
        NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S").unwrap()
    }

    #[test]
    fn run_date_parses_us_format() {
        assert_eq!(parse_run_date("03/05/2025").unwrap(), dt("2025-03-05 00:00:00"));
        assert!(matches!(
            parse_run_date("2025-03-05"),
            Err(ConfigError::InvalidRunDate { .. })
        ));
    }

    #[test]
    fn run_date_defaults_to_yesterday() {
        let env = EnvConfig::default();
        assert_eq!(env.run_date(dt("2025-03-06 08:30:00")).unwrap(), dt("2025-03-05 08:30:00"));
    }

    #[test]
    fn resort_requires_name_and_defaults_the_rest() {
        assert!(matches!(
            EnvConfig::default().resort(&[]),
            Err(ConfigError::MissingEnvVar(_))
        ));
        let env = EnvConfig {
            resort_name: Some(" Sipapu ".into()),
            ..Default::default()
        };
        let resort = env.resort(&RESORT_MAPPING).unwrap();
        assert_eq!(resort.resort_name, "Sipapu");
        assert_eq!(resort.db_name, "Sipapu");
        assert_eq!(resort.group_num, -1);
    }

    #[test]
    fn resorts_file_accepts_camel_case_and_mappings() {
        let raw = r#"[{"resortName":"PURGATORY","dbName":"Purgatory","groupNum":46,
            "visitsBudgetMapping":{"9001":"Ticket Office"}},
            {"resort_name":"Nordic","db_name":"Nordic"}]"#;
        let parsed: Vec<ResortConfig> = serde_json::from_str(raw).unwrap();
        assert_eq!(parsed[0].visits_budget_mapping["9001"], "Ticket Office");
        assert_eq!(parsed[1].group_num, -1);

        let env = EnvConfig {
            resort_name: Some("purgatory".into()),
            db_name: Some("Purgatory".into()),
            group_num: Some(46),
            ..Default::default()
        };
        let resort = env.resort(&parsed).unwrap();
        assert_eq!(resort.visits_budget_mapping.len(), 1);
    }

    #[test]
    fn built_in_mapping_lists_every_resort() {
        assert_eq!(RESORT_MAPPING.len(), 14);
        let willamette = find_resort(&RESORT_MAPPING, "willamette", Some("MCP")).unwrap();
        assert_eq!(willamette.group_num, 12);
    }
}
