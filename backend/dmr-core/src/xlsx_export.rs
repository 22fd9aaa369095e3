// src/xlsx_export.rs

use crate::insights::{InsightCell, InsightTable, VarianceRanking};
use crate::report_layout::{ReportDocument, ReportValue, RowType, ValueFormat};
use rust_xlsxwriter::{Format, FormatAlign, FormatBorder, Workbook, Worksheet, XlsxError};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::info;

#[derive(Error, Debug)]
pub enum ExportError {
    #[error("Workbook error for {path}: {source}")]
    Xlsx {
        #[source]
        source: XlsxError,
        path: PathBuf,
    },
    #[error("JSON serialization failed: {0}")]
    Json(#[from] serde_json::Error),
    #[error("I/O error: {context}: {source}")]
    Io {
        #[source]
        source: std::io::Error,
        context: String,
    },
}

pub fn io_context(err: std::io::Error, context: impl Into<String>) -> ExportError {
    ExportError::Io {
        source: err,
        context: context.into(),
    }
}

const COLUMN_WIDTH: f64 = 18.0;
const ROW_HEADER_WIDTH: f64 = 30.0;

// --- Formats ---

struct SheetFormats {
    header: Format,
    row_header: Format,
    data: Format,
    snow: Format,
    percent: Format,
    section: Format,
}

impl SheetFormats {
    fn report() -> Self {
        let header = Format::new()
            .set_bold()
            .set_align(FormatAlign::Center)
            .set_background_color(0xD3D3D3)
            .set_border(FormatBorder::Thin)
            .set_text_wrap();
        SheetFormats {
            section: header.clone(),
            header,
            row_header: Format::new().set_bold().set_border(FormatBorder::Thin),
            data: Format::new()
                .set_border(FormatBorder::Thin)
                .set_num_format("#,##0.00"),
            snow: Format::new().set_border(FormatBorder::Thin).set_num_format("0.0"),
            percent: Format::new()
                .set_border(FormatBorder::Thin)
                .set_num_format("0\"%\""),
        }
    }

    fn insights() -> Self {
        let report = SheetFormats::report();
        SheetFormats {
            section: Format::new()
                .set_bold()
                .set_background_color(0xE6E6E6)
                .set_border(FormatBorder::Thin),
            percent: Format::new()
                .set_border(FormatBorder::Thin)
                .set_num_format("0.00\"%\""),
            ..report
        }
    }

    fn top_bottom() -> Self {
        SheetFormats {
            section: Format::new()
                .set_bold()
                .set_align(FormatAlign::Left)
                .set_background_color(0xB8CCE4)
                .set_font_size(11)
                .set_border(FormatBorder::Thin),
            ..SheetFormats::insights()
        }
    }
}

fn save(workbook: &mut Workbook, path: &Path) -> Result<(), ExportError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .map_err(|e| io_context(e, format!("Creating directory {}", parent.display())))?;
    }
    workbook.save(path).map_err(|e| xlsx(e, path))?;
    info!("Wrote workbook {}", path.display());
    Ok(())
}

fn xlsx(source: XlsxError, path: &Path) -> ExportError {
    ExportError::Xlsx {
        source,
        path: path.to_path_buf(),
    }
}

// --- Report ---

/// Renders the report onto a single "Report" sheet.
pub fn write_report_workbook(doc: &ReportDocument, path: &Path) -> Result<(), ExportError> {
    let mut workbook = Workbook::new();
    let formats = SheetFormats::report();
    let sheet = workbook.add_worksheet();
    fill_report_sheet(sheet, doc, &formats).map_err(|e| xlsx(e, path))?;
    save(&mut workbook, path)
}

fn fill_report_sheet(
    sheet: &mut Worksheet,
    doc: &ReportDocument,
    formats: &SheetFormats,
) -> Result<(), XlsxError> {
    sheet.set_name("Report")?;
    sheet.write_string_with_format(0, 0, doc.title_lines.join("\n"), &formats.header)?;
    for (col, header) in doc.headers.iter().enumerate().skip(1) {
        sheet.write_string_with_format(0, col as u16, &header.display, &formats.header)?;
        sheet.set_column_width(col as u16, COLUMN_WIDTH)?;
    }
    sheet.set_column_width(0, ROW_HEADER_WIDTH)?;
    sheet.set_freeze_panes(1, 1)?;

    // The title row lives in the header cell, so the body starts at row 1.
    let mut row: u32 = 1;
    for report_row in doc.rows.iter().filter(|r| r.row_type != RowType::Title) {
        match report_row.row_type {
            RowType::Empty => {}
            RowType::SectionHeader => {
                sheet.write_string_with_format(row, 0, &report_row.row_header, &formats.header)?;
            }
            _ => {
                sheet.write_string_with_format(row, 0, &report_row.row_header, &formats.row_header)?;
                let value_format = match report_row.format {
                    ValueFormat::Amount => &formats.data,
                    ValueFormat::Snow => &formats.snow,
                    ValueFormat::Percent => &formats.percent,
                };
                for (i, value) in report_row.values.iter().enumerate() {
                    let col = (i + 1) as u16;
                    match value {
                        ReportValue::Number(v) => {
                            sheet.write_number_with_format(row, col, *v, value_format)?;
                        }
                        ReportValue::Text(t) if !t.is_empty() => {
                            sheet.write_string_with_format(row, col, t, value_format)?;
                        }
                        _ => {}
                    }
                }
            }
        }
        row += 1;
    }
    Ok(())
}

/// Pretty-printed copy of the structured report next to the workbooks.
pub fn write_report_json(doc: &ReportDocument, path: &Path) -> Result<(), ExportError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .map_err(|e| io_context(e, format!("Creating directory {}", parent.display())))?;
    }
    let body = serde_json::to_string_pretty(doc)?;
    std::fs::write(path, body).map_err(|e| io_context(e, format!("Writing {}", path.display())))?;
    info!("Wrote report JSON {}", path.display());
    Ok(())
}

// --- Insights ---

fn write_header_row(sheet: &mut Worksheet, columns: &[String], formats: &SheetFormats) -> Result<(), XlsxError> {
    for (col, name) in columns.iter().enumerate() {
        sheet.write_string_with_format(0, col as u16, name, &formats.header)?;
        sheet.set_column_width(col as u16, COLUMN_WIDTH)?;
    }
    Ok(())
}

fn write_cells(
    sheet: &mut Worksheet,
    row: u32,
    columns: &[String],
    cells: &[InsightCell],
    formats: &SheetFormats,
) -> Result<(), XlsxError> {
    for (i, cell) in cells.iter().enumerate() {
        let col = i as u16;
        let number_format = if columns.get(i).map(|c| c.contains('%')).unwrap_or(false) {
            &formats.percent
        } else {
            &formats.data
        };
        match cell {
            InsightCell::Text(t) if i == 0 => {
                sheet.write_string_with_format(row, col, t, &formats.row_header)?;
            }
            InsightCell::Text(t) => {
                sheet.write_string_with_format(row, col, t, &formats.data)?;
            }
            InsightCell::Number(v) => {
                sheet.write_number_with_format(row, col, *v, number_format)?;
            }
            InsightCell::Empty => {
                sheet.write_blank(row, col, &formats.data)?;
            }
        }
    }
    Ok(())
}

fn fill_insight_sheet(
    sheet: &mut Worksheet,
    name: &str,
    table: &InsightTable,
    formats: &SheetFormats,
) -> Result<(), XlsxError> {
    sheet.set_name(name)?;
    write_header_row(sheet, &table.columns, formats)?;
    sheet.set_column_width(0, ROW_HEADER_WIDTH)?;
    sheet.set_freeze_panes(1, 1)?;

    let mut row: u32 = 1;
    for section in &table.sections {
        if table.section_headers {
            sheet.write_string_with_format(row, 0, &section.name, &formats.section)?;
            row += 1;
        }
        for cells in &section.rows {
            write_cells(sheet, row, &table.columns, cells, formats)?;
            row += 1;
        }
        if table.section_headers {
            row += 1;
        }
    }
    Ok(())
}

/// DMR insights workbook with a single "Insights" sheet.
pub fn write_insights_workbook(table: &InsightTable, path: &Path) -> Result<(), ExportError> {
    let mut workbook = Workbook::new();
    let formats = SheetFormats::insights();
    let sheet = workbook.add_worksheet();
    fill_insight_sheet(sheet, "Insights", table, &formats).map_err(|e| xlsx(e, path))?;
    save(&mut workbook, path)
}

/// Comparison workbook: one sheet per table, named after its only section.
pub fn write_comparison_workbook(tables: &[&InsightTable], path: &Path) -> Result<(), ExportError> {
    let mut workbook = Workbook::new();
    let formats = SheetFormats::insights();
    for table in tables {
        let name = table
            .sections
            .first()
            .map(|s| s.name.as_str())
            .unwrap_or("Insights");
        let sheet = workbook.add_worksheet();
        fill_insight_sheet(sheet, name, table, &formats).map_err(|e| xlsx(e, path))?;
    }
    save(&mut workbook, path)
}

// --- Top & bottom ---

/// Writes the "Top & Bottom 3" sheet. Returns false (and writes nothing) when
/// there is no ranking to show.
pub fn write_top_bottom_workbook(
    columns: &[String],
    rankings: &[VarianceRanking<'_>],
    n: usize,
    path: &Path,
) -> Result<bool, ExportError> {
    if rankings.is_empty() {
        return Ok(false);
    }
    let mut workbook = Workbook::new();
    let formats = SheetFormats::top_bottom();
    let sheet = workbook.add_worksheet();
    fill_top_bottom_sheet(sheet, columns, rankings, n, &formats).map_err(|e| xlsx(e, path))?;
    save(&mut workbook, path)?;
    Ok(true)
}

fn fill_top_bottom_sheet(
    sheet: &mut Worksheet,
    columns: &[String],
    rankings: &[VarianceRanking<'_>],
    n: usize,
    formats: &SheetFormats,
) -> Result<(), XlsxError> {
    sheet.set_name("Top & Bottom 3")?;
    write_header_row(sheet, columns, formats)?;
    sheet.set_freeze_panes(1, 0)?;

    let last_col = columns.len().saturating_sub(1) as u16;
    let merged = |sheet: &mut Worksheet, row: u32, text: &str| -> Result<(), XlsxError> {
        if last_col == 0 {
            sheet.write_string_with_format(row, 0, text, &formats.section)?;
        } else {
            sheet.merge_range(row, 0, row, last_col, text, &formats.section)?;
        }
        Ok(())
    };

    let mut row: u32 = 1;
    for ranking in rankings {
        merged(sheet, row, &format!("VARIANCE CATEGORY: {}", ranking.column))?;
        row += 1;
        for section in &ranking.sections {
            for (label, rows) in [("TOP", &section.top), ("BOTTOM", &section.bottom)] {
                merged(sheet, row, &format!("{} - {} {}", section.section, label, n))?;
                row += 1;
                for cells in rows.iter() {
                    write_cells(sheet, row, columns, cells, formats)?;
                    row += 1;
                }
                row += 1;
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::insights::{rank_top_bottom, InsightSection};
    use std::env;
    use std::fs;

    fn temp_path(name: &str) -> PathBuf {
        env::temp_dir()
            .join(format!("dmr-core-xlsx-{}", std::process::id()))
            .join(name)
    }

    fn table() -> InsightTable {
        InsightTable {
            columns: vec![
                "Row Header".to_string(),
                "Value".to_string(),
                "Value Variance %".to_string(),
            ],
            sections: vec![InsightSection {
                name: "Visits".to_string(),
                rows: vec![
                    vec![
                        InsightCell::Text("North".into()),
                        InsightCell::Number(10.0),
                        InsightCell::Number(5.0),
                    ],
                    vec![
                        InsightCell::Text("South".into()),
                        InsightCell::Number(20.0),
                        InsightCell::Empty,
                    ],
                ],
            }],
            section_headers: true,
        }
    }

    #[test]
    fn insights_and_top_bottom_workbooks_are_written() {
        let table = table();
        let insights = temp_path("insights.xlsx");
        write_insights_workbook(&table, &insights).unwrap();
        assert!(fs::metadata(&insights).unwrap().len() > 0);

        let rankings = rank_top_bottom(&table, 3);
        let top = temp_path("top.xlsx");
        assert!(write_top_bottom_workbook(&table.columns, &rankings, 3, &top).unwrap());
        assert!(top.exists());
    }

    #[test]
    fn empty_ranking_writes_no_file() {
        let path = temp_path("never.xlsx");
        assert!(!write_top_bottom_workbook(&[], &[], 3, &path).unwrap());
        assert!(!path.exists());
    }
}
