//! Workbook rendering of query results
//!
//! One sheet per result. Failed results get a placeholder sheet carrying the
//! error instead of data, so a partial federated run still exports every
//! requested datasource.

use rust_xlsxwriter::{Color, Format, FormatBorder, Workbook, Worksheet, XlsxError};
use std::collections::HashSet;
use tracing::debug;

use crate::domain::{DatasourceQueryResult, FederationError, SqlValue};

pub const XLSX_CONTENT_TYPE: &str =
    "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet";

const MAX_SHEET_NAME_CHARS: usize = 31;
const MAX_CELL_CHARS: usize = 32_767;
const JSON_PREVIEW_CHARS: usize = 200;
const HEX_BYTES_LIMIT: usize = 100;
/// Largest magnitude an f64 cell holds without losing integer precision.
const MAX_EXACT_INT: u64 = 1 << 53;

impl From<XlsxError> for FederationError {
    fn from(err: XlsxError) -> Self {
        Self::Export(err.to_string())
    }
}

struct Styles {
    header: Format,
    integer: Format,
    decimal: Format,
    title: Format,
    error: Format,
}

impl Styles {
    fn new() -> Self {
        Self {
            header: Format::new()
                .set_bold()
                .set_font_size(12)
                .set_background_color(Color::Silver)
                .set_border(FormatBorder::Thin),
            integer: Format::new().set_num_format("#,##0"),
            decimal: Format::new().set_num_format("#,##0.00"),
            title: Format::new().set_bold().set_font_size(12),
            error: Format::new().set_font_color(Color::Red),
        }
    }
}

/// One workbook holding a sheet per result, in the order given.
pub fn report_workbook(results: &[DatasourceQueryResult]) -> Result<Vec<u8>, FederationError> {
    let styles = Styles::new();
    let mut workbook = Workbook::new();
    let mut names = SheetNames::default();

    for result in results {
        let name = names.claim(&result.datasource_code);
        write_result(workbook.add_worksheet(), &name, result, &styles)?;
    }
    if results.is_empty() {
        let sheet = workbook.add_worksheet();
        sheet.set_name("Results")?;
        sheet.write_string(0, 0, "No data")?;
    }

    let bytes = workbook.save_to_buffer()?;
    debug!(sheets = results.len().max(1), bytes = bytes.len(), "rendered workbook");
    Ok(bytes)
}

/// A workbook with a single `Results` sheet.
pub fn result_workbook(result: &DatasourceQueryResult) -> Result<Vec<u8>, FederationError> {
    let styles = Styles::new();
    let mut workbook = Workbook::new();
    write_result(workbook.add_worksheet(), "Results", result, &styles)?;
    Ok(workbook.save_to_buffer()?)
}

/// Reduce a caller-supplied file stem to a header-safe ASCII name.
pub fn safe_filename(stem: &str, default: &str) -> String {
    let cleaned: String = stem
        .trim()
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') {
                c
            } else {
                '_'
            }
        })
        .collect();
    if cleaned.trim_matches(|c| c == '_' || c == '.').is_empty() {
        default.to_string()
    } else {
        cleaned
    }
}

fn write_result(
    sheet: &mut Worksheet,
    name: &str,
    result: &DatasourceQueryResult,
    styles: &Styles,
) -> Result<(), FederationError> {
    sheet.set_name(name)?;
    if !result.success {
        return write_failure(sheet, result, styles);
    }

    let columns: Vec<&str> = match result.data.first() {
        Some(first) => first.labels().collect(),
        None => Vec::new(),
    };
    if columns.is_empty() {
        sheet.write_string(0, 0, "No data")?;
        if result.rows_affected > 0 {
            let affected = format!("rows affected: {}", result.rows_affected);
            sheet.write_string(1, 0, affected.as_str())?;
        }
        return Ok(());
    }

    for (index, label) in columns.iter().enumerate() {
        sheet.write_string_with_format(0, column(index)?, *label, &styles.header)?;
    }
    for (index, record) in result.data.iter().enumerate() {
        let row = row(index + 1)?;
        for (col, label) in columns.iter().enumerate() {
            if let Some(value) = record.get(label) {
                write_value(sheet, row, column(col)?, value, styles)?;
            }
        }
    }
    sheet.autofit();
    Ok(())
}

fn write_failure(
    sheet: &mut Worksheet,
    result: &DatasourceQueryResult,
    styles: &Styles,
) -> Result<(), FederationError> {
    let error = result.error.as_deref().unwrap_or("unknown error");

    sheet.write_string_with_format(0, 0, "Query failed", &styles.title)?;
    sheet.write_string(2, 0, "Datasource:")?;
    sheet.write_string(2, 1, result.datasource_name.as_str())?;
    sheet.write_string(4, 0, "Error:")?;
    sheet.write_string_with_format(4, 1, error, &styles.error)?;
    if !result.message.is_empty() && result.message != error {
        sheet.write_string(6, 0, "Details:")?;
        sheet.write_string(6, 1, result.message.as_str())?;
    }
    sheet.set_column_width(0, 14.0)?;
    sheet.set_column_width(1, 60.0)?;
    Ok(())
}

fn write_value(
    sheet: &mut Worksheet,
    row: u32,
    col: u16,
    value: &SqlValue,
    styles: &Styles,
) -> Result<(), FederationError> {
    match value {
        SqlValue::Null => {}
        SqlValue::Bool(b) => {
            sheet.write_boolean(row, col, *b)?;
        }
        SqlValue::Int(i) if i.unsigned_abs() <= MAX_EXACT_INT => {
            sheet.write_number_with_format(row, col, *i as f64, &styles.integer)?;
        }
        SqlValue::Float(f) if f.is_finite() => {
            sheet.write_number_with_format(row, col, *f, &styles.decimal)?;
        }
        other => {
            sheet.write_string(row, col, cell_text(other).as_str())?;
        }
    }
    Ok(())
}

/// Text rendering for values that do not get a native cell type.
fn cell_text(value: &SqlValue) -> String {
    let text = match value {
        SqlValue::Null => String::new(),
        SqlValue::Bool(b) => b.to_string(),
        SqlValue::Int(i) => i.to_string(),
        SqlValue::Float(f) => f.to_string(),
        SqlValue::Text(s) => s.clone(),
        SqlValue::Date(d) => d.format("%Y-%m-%d").to_string(),
        SqlValue::Time(t) => t.format("%H:%M:%S").to_string(),
        SqlValue::DateTime(dt) => dt.format("%Y-%m-%d %H:%M:%S").to_string(),
        SqlValue::Timestamp(ts) => ts.format("%Y-%m-%d %H:%M:%S").to_string(),
        SqlValue::Bytes(bytes) if bytes.len() <= HEX_BYTES_LIMIT => {
            let hex: String = bytes.iter().map(|b| format!("{:02x}", b)).collect();
            format!("0x{}", hex)
        }
        SqlValue::Bytes(bytes) => format!("[BINARY DATA: {} bytes]", bytes.len()),
        SqlValue::Json(json) => {
            let compact = json.to_string();
            if compact.chars().count() > JSON_PREVIEW_CHARS {
                let cut: String = compact.chars().take(JSON_PREVIEW_CHARS - 3).collect();
                format!("{}...", cut)
            } else {
                compact
            }
        }
    };
    if text.chars().count() > MAX_CELL_CHARS {
        text.chars().take(MAX_CELL_CHARS).collect()
    } else {
        text
    }
}

fn row(index: usize) -> Result<u32, FederationError> {
    u32::try_from(index).map_err(|_| FederationError::Export(format!("row {} out of range", index)))
}

fn column(index: usize) -> Result<u16, FederationError> {
    u16::try_from(index)
        .map_err(|_| FederationError::Export(format!("column {} out of range", index)))
}

/// Sheet names unique within a workbook, compared case-insensitively as Excel does.
#[derive(Default)]
struct SheetNames {
    used: HashSet<String>,
}

impl SheetNames {
    fn claim(&mut self, code: &str) -> String {
        let base = sheet_name(code);
        let mut candidate = base.clone();
        let mut n = 2;
        while !self.used.insert(candidate.to_lowercase()) {
            let suffix = format!("_{}", n);
            let keep = MAX_SHEET_NAME_CHARS - suffix.len();
            candidate = format!("{}{}", base.chars().take(keep).collect::<String>(), suffix);
            n += 1;
        }
        candidate
    }
}

fn sheet_name(code: &str) -> String {
    let cleaned: String = code
        .chars()
        .filter(|c| !matches!(c, '[' | ']' | ':' | '*' | '?' | '/' | '\\'))
        .collect();
    let name: String = cleaned
        .trim_matches('\'')
        .chars()
        .take(MAX_SHEET_NAME_CHARS)
        .collect();
    if name.trim().is_empty() {
        "Sheet".to_string()
    } else if name.eq_ignore_ascii_case("history") {
        format!("{}_", name)
    } else {
        name
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{DatasourceConfig, RowRecord};
    use chrono::NaiveDate;
    use std::time::Duration;

    fn config(code: &str) -> DatasourceConfig {
        DatasourceConfig::new(code, format!("{} ledger", code), "sqlite::memory:")
    }

    fn rows() -> Vec<RowRecord> {
        let mut row = RowRecord::default();
        row.push("id", SqlValue::Int(7));
        row.push("amount", SqlValue::Float(12.5));
        row.push("paid", SqlValue::Bool(true));
        row.push("note", SqlValue::Null);
        row.push("payload", SqlValue::Json(serde_json::json!({"k": [1, 2]})));
        vec![row]
    }

    fn is_zip(bytes: &[u8]) -> bool {
        bytes.starts_with(b"PK\x03\x04")
    }

    #[test]
    fn test_report_workbook_covers_every_result() {
        let results = vec![
            DatasourceQueryResult::succeeded(&config("EAST"), rows(), 0, Duration::ZERO),
            DatasourceQueryResult::failed(
                &config("WEST"),
                &FederationError::ConnectionFailure("refused".into()),
                Duration::ZERO,
            ),
            DatasourceQueryResult::succeeded(&config("EAST"), vec![], 3, Duration::ZERO),
        ];

        let bytes = report_workbook(&results).unwrap();
        assert!(is_zip(&bytes));
    }

    #[test]
    fn test_empty_report_still_renders() {
        assert!(is_zip(&report_workbook(&[]).unwrap()));
        let empty = DatasourceQueryResult::succeeded(&config("A"), vec![], 0, Duration::ZERO);
        assert!(is_zip(&result_workbook(&empty).unwrap()));
    }

    #[test]
    fn test_sheet_names_are_valid_and_unique() {
        let mut names = SheetNames::default();
        assert_eq!(names.claim("SALES"), "SALES");
        assert_eq!(names.claim("sales"), "sales_2");
        assert_eq!(names.claim("SALES"), "SALES_3");
        assert_eq!(names.claim("a/b:[c]"), "abc");
        assert_eq!(names.claim("???"), "Sheet");

        let long = "X".repeat(40);
        let first = names.claim(&long);
        let second = names.claim(&long);
        assert_eq!(first.chars().count(), 31);
        assert_eq!(second.chars().count(), 31);
        assert!(second.ends_with("_2"));
    }

    #[test]
    fn test_cell_text() {
        let date = NaiveDate::from_ymd_opt(2024, 3, 9).unwrap();
        assert_eq!(cell_text(&SqlValue::Date(date)), "2024-03-09");
        assert_eq!(
            cell_text(&SqlValue::DateTime(date.and_hms_opt(8, 5, 0).unwrap())),
            "2024-03-09 08:05:00"
        );
        assert_eq!(cell_text(&SqlValue::Bytes(vec![0xCA, 0xFE])), "0xcafe");
        assert_eq!(
            cell_text(&SqlValue::Bytes(vec![0; 101])),
            "[BINARY DATA: 101 bytes]"
        );

        let long = SqlValue::Json(serde_json::json!({ "text": "y".repeat(500) }));
        let text = cell_text(&long);
        assert_eq!(text.chars().count(), JSON_PREVIEW_CHARS);
        assert!(text.ends_with("..."));
    }

    #[test]
    fn test_safe_filename() {
        assert_eq!(safe_filename("q1 report", "export"), "q1_report");
        assert_eq!(safe_filename("../etc", "export"), ".._etc");
        assert_eq!(safe_filename("  ", "export"), "export");
        assert_eq!(safe_filename("報表", "export"), "export");
    }
}
