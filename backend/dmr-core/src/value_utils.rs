// src/value_utils.rs

use crate::result_table::CellValue;
use once_cell::sync::Lazy;
use regex::Regex;
use rust_decimal::prelude::ToPrimitive;

/// Baselines smaller than this are treated as zero.
pub const VARIANCE_EPSILON: f64 = 1e-10;
/// Variances beyond this magnitude are treated as overflow and reported as zero.
pub const VARIANCE_CAP: f64 = 1e6;

/// Coerces any cell to a finite float. Never fails: anything unusable is 0.0.
pub fn normalize_value(cell: &CellValue) -> f64 {
    let raw = match cell {
        CellValue::Null => 0.0,
        CellValue::Bool(b) => {
            if *b {
                1.0
            } else {
                0.0
            }
        }
        CellValue::Int(i) => *i as f64,
        CellValue::Float(f) => *f,
        CellValue::Decimal(d) => d.to_f64().unwrap_or(0.0),
        CellValue::Text(s) => s.trim().parse::<f64>().unwrap_or(0.0),
        CellValue::Timestamp(_) => 0.0,
    };
    normalize_f64(raw)
}

pub fn normalize_f64(value: f64) -> f64 {
    if value.is_finite() {
        value
    } else {
        0.0
    }
}

/// Trimmed display form of a code cell; null becomes the empty string.
pub fn trim_code(cell: &CellValue) -> String {
    match cell {
        CellValue::Null => String::new(),
        other => other.to_string().trim().to_string(),
    }
}

/// Non-empty trimmed text of a cell, used for titles and budget types.
pub fn non_empty_text(cell: &CellValue) -> Option<String> {
    let text = trim_code(cell);
    if text.is_empty() {
        None
    } else {
        Some(text)
    }
}

/// Percentage change of `actual` relative to `baseline`.
pub fn variance_pct(baseline: f64, actual: f64) -> f64 {
    let result = comparison_variance_pct(actual, baseline);
    if result.abs() > VARIANCE_CAP {
        0.0
    } else {
        result
    }
}

/// Same formula as `variance_pct` without the overflow cap, argument order
/// matching the comparison sheets (comparison first, anchor second).
pub fn comparison_variance_pct(comparison: f64, anchor: f64) -> f64 {
    let baseline = normalize_f64(anchor);
    let actual = normalize_f64(comparison);
    if baseline.abs() < VARIANCE_EPSILON {
        return 0.0;
    }
    normalize_f64((actual - baseline) / baseline * 100.0)
}

/// `numerator / denominator * 100`, zero when the denominator is ~0.
pub fn ratio_pct(numerator: f64, denominator: f64) -> f64 {
    if denominator.abs() < VARIANCE_EPSILON {
        0.0
    } else {
        normalize_f64(numerator / denominator * 100.0)
    }
}

/// Lower-cases a visits location and strips a leading resort-name prefix so it
/// can be matched against visits-budget keys.
pub fn process_location_name(location: &str, resort_name: &str) -> String {
    let location = location.trim().to_lowercase();
    let resort = resort_name.trim().to_lowercase();
    if !resort.is_empty() {
        if let Some(rest) = location.strip_prefix(&resort) {
            return rest.trim().to_string();
        }
    }
    location
}

static INVALID_FILENAME_CHARS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"[<>:"/\\|?*]"#).expect("static regex"));

pub fn sanitize_filename(name: &str) -> String {
    INVALID_FILENAME_CHARS
        .replace_all(name, "_")
        .trim_matches(|c| c == '.' || c == ' ')
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use rust_decimal_macros::dec;

    #[test]
    fn normalize_value_never_returns_non_finite() {
        let cells = vec![
            CellValue::Null,
            CellValue::Float(f64::NAN),
            CellValue::Float(f64::INFINITY),
            CellValue::Float(f64::NEG_INFINITY),
            CellValue::Text("nan".into()),
            CellValue::Text("inf".into()),
            CellValue::Text("not a number".into()),
            CellValue::Timestamp(
                NaiveDate::from_ymd_opt(2025, 1, 1)
                    .unwrap()
                    .and_hms_opt(0, 0, 0)
                    .unwrap(),
            ),
        ];
        for cell in &cells {
            let v = normalize_value(cell);
            assert!(v.is_finite(), "{:?} produced {}", cell, v);
            assert_eq!(v, 0.0, "{:?} should normalize to zero", cell);
        }
    }

    #[test]
    fn normalize_value_coerces_numbers() {
        assert_eq!(normalize_value(&CellValue::Int(12)), 12.0);
        assert_eq!(normalize_value(&CellValue::Decimal(dec!(1234.56))), 1234.56);
        assert_eq!(normalize_value(&CellValue::Text(" 3.25 ".into())), 3.25);
        assert_eq!(normalize_value(&CellValue::Bool(true)), 1.0);
    }

    #[test]
    fn trim_code_handles_null_and_padding() {
        assert_eq!(trim_code(&CellValue::Null), "");
        assert_eq!(trim_code(&CellValue::Text("  4100 ".into())), "4100");
        assert_eq!(trim_code(&CellValue::Int(4100)), "4100");
        assert_eq!(non_empty_text(&CellValue::Text("   ".into())), None);
    }

    #[test]
    fn variance_pct_zero_baseline_and_overflow() {
        assert_eq!(variance_pct(0.0, 500.0), 0.0);
        assert_eq!(variance_pct(1e-12, 500.0), 0.0);
        assert_eq!(variance_pct(100.0, 150.0), 50.0);
        assert_eq!(variance_pct(200.0, 100.0), -50.0);
        assert_eq!(variance_pct(0.001, 5000.0), 0.0);
        assert_eq!(comparison_variance_pct(5000.0, 0.001), (5000.0 - 0.001) / 0.001 * 100.0);
    }

    #[test]
    fn ratio_pct_guards_zero_denominator() {
        assert_eq!(ratio_pct(50.0, 200.0), 25.0);
        assert_eq!(ratio_pct(50.0, 0.0), 0.0);
    }

    #[test]
    fn process_location_name_strips_resort_prefix() {
        assert_eq!(process_location_name("Purgatory Ticket Office", "Purgatory"), "ticket office");
        assert_eq!(process_location_name("  Online Sales ", "Purgatory"), "online sales");
    }

    #[test]
    fn sanitize_filename_replaces_reserved_characters() {
        assert_eq!(sanitize_filename("Lee Canyon: 01/02?"), "Lee Canyon_ 01_02_");
        assert_eq!(sanitize_filename(" report. "), "report");
    }
}
