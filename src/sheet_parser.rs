//! Workbook reading for the bulletin's `.xlsx` files.
//!
//! Cells keep their absolute column position: blank header cells become
//! positional keys (`Unnamed: <col>`), which is how the fixed-mapping layout
//! addresses its columns.

use anyhow::{Context, Result};
use calamine::{open_workbook_from_rs, Data, Range, Reader, Xlsx};
use chrono::{Duration, NaiveDate, NaiveDateTime};
use std::io::Cursor;
use std::path::Path;
use tracing::{debug, warn};

/// Text form of a missing cell, as it shows up in header and period labels.
pub const MISSING_TEXT: &str = "nan";

/// A single spreadsheet cell.
#[derive(Debug, Clone, PartialEq)]
pub enum Cell {
    Empty,
    Text(String),
    Integer(i64),
    Number(f64),
    DateTime(NaiveDateTime),
}

impl Cell {
    pub fn text(s: impl Into<String>) -> Self {
        Cell::Text(s.into())
    }

    pub fn is_missing(&self) -> bool {
        match self {
            Cell::Empty => true,
            Cell::Number(f) => f.is_nan(),
            _ => false,
        }
    }

    /// Render the cell the way the bulletin's labels are compared and split:
    /// missing → `nan`, whole floats keep `.0`, timestamps at second precision.
    pub fn render(&self) -> String {
        match self {
            Cell::Empty => MISSING_TEXT.to_string(),
            Cell::Text(s) => s.clone(),
            Cell::Integer(i) => i.to_string(),
            Cell::Number(f) => render_float(*f),
            Cell::DateTime(dt) => dt.format("%Y-%m-%d %H:%M:%S").to_string(),
        }
    }

    fn from_data(data: &Data) -> Self {
        match data {
            Data::Empty => Cell::Empty,
            Data::String(s) if s.is_empty() => Cell::Empty,
            Data::String(s) => Cell::Text(s.clone()),
            Data::Int(i) => Cell::Integer(*i),
            Data::Float(f) => Cell::Number(*f),
            Data::Bool(b) => Cell::Text(if *b { "True" } else { "False" }.to_string()),
            Data::DateTime(dt) => excel_serial_to_datetime(dt.as_f64())
                .map(Cell::DateTime)
                .unwrap_or(Cell::Number(dt.as_f64())),
            Data::DateTimeIso(s) => NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S")
                .map(Cell::DateTime)
                .unwrap_or_else(|_| Cell::Text(s.clone())),
            Data::DurationIso(s) => Cell::Text(s.clone()),
            Data::Error(_) => Cell::Empty,
        }
    }
}

fn render_float(f: f64) -> String {
    if f.is_nan() {
        MISSING_TEXT.to_string()
    } else if f.fract() == 0.0 && f.abs() < 1e16 {
        format!("{:.1}", f)
    } else {
        format!("{}", f)
    }
}

/// One worksheet below its header row.
#[derive(Debug, Clone)]
pub struct RawSheet {
    pub name: String,
    /// Column keys taken from the header row.
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Cell>>,
}

/// Read the requested sheets from a workbook on disk, in the requested order.
/// Sheets that are absent or unreadable are skipped with a warning.
pub fn read_workbook(path: &Path, sheet_names: &[String], header_row: usize) -> Result<Vec<RawSheet>> {
    let data = std::fs::read(path).with_context(|| format!("Failed to read workbook {:?}", path))?;
    let mut workbook: Xlsx<_> = open_workbook_from_rs(Cursor::new(data))
        .with_context(|| format!("Failed to open Excel workbook {:?}", path))?;

    let mut sheets = Vec::new();
    for name in sheet_names {
        let range = match workbook.worksheet_range(name) {
            Ok(r) => r,
            Err(e) => {
                warn!("Skipping sheet '{}': {}", name, e);
                continue;
            }
        };

        match range_to_raw_sheet(name, &range, header_row) {
            Some(sheet) => sheets.push(sheet),
            None => warn!("Skipping sheet '{}': nothing below header row {}", name, header_row),
        }
    }

    if sheets.is_empty() {
        anyhow::bail!("None of the sheets {:?} found in {:?}", sheet_names, path);
    }

    Ok(sheets)
}

/// Convert a calamine Range into a RawSheet whose header sits at the absolute
/// row `header_row`. Rows that are entirely empty are skipped.
fn range_to_raw_sheet(name: &str, range: &Range<Data>, header_row: usize) -> Option<RawSheet> {
    let (end_row, end_col) = range.end()?;
    let (end_row, end_col) = (end_row as usize, end_col as usize);
    if end_row <= header_row {
        return None;
    }

    let cell_at = |row: usize, col: usize| -> Cell {
        range
            .get_value((row as u32, col as u32))
            .map(Cell::from_data)
            .unwrap_or(Cell::Empty)
    };

    let mut columns: Vec<String> = Vec::with_capacity(end_col + 1);
    for col in 0..=end_col {
        let label = match cell_at(header_row, col) {
            Cell::Empty => format!("Unnamed: {}", col),
            other => other.render().trim().to_string(),
        };
        columns.push(dedup_label(&columns, label));
    }

    let rows: Vec<Vec<Cell>> = (header_row + 1..=end_row)
        .map(|row| (0..=end_col).map(|col| cell_at(row, col)).collect::<Vec<_>>())
        .filter(|row| !row.iter().all(Cell::is_missing))
        .collect();

    debug!("Sheet '{}': {} columns, {} rows", name, columns.len(), rows.len());

    Some(RawSheet {
        name: name.to_string(),
        columns,
        rows,
    })
}

/// Repeated header labels get a `.N` suffix so every column key is unique.
fn dedup_label(existing: &[String], label: String) -> String {
    if !existing.contains(&label) {
        return label;
    }
    (1..)
        .map(|n| format!("{}.{}", label, n))
        .find(|candidate| !existing.contains(candidate))
        .unwrap_or(label)
}

/// Convert an Excel serial date (1900 date system) to a timestamp.
/// Serials below 61 sit before the fictitious 1900-02-29 and need a one-day shift.
fn excel_serial_to_datetime(serial: f64) -> Option<NaiveDateTime> {
    if !serial.is_finite() || serial < 0.0 {
        return None;
    }
    let epoch = NaiveDate::from_ymd_opt(1899, 12, 30)?.and_hms_opt(0, 0, 0)?;
    let adjusted = if serial < 61.0 { serial + 1.0 } else { serial };
    let millis = (adjusted * 86_400_000.0).round() as i64;
    epoch.checked_add_signed(Duration::milliseconds(millis))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_matches_label_conventions() {
        assert_eq!(Cell::Empty.render(), "nan");
        assert_eq!(Cell::Number(2019.0).render(), "2019.0");
        assert_eq!(Cell::Number(12.75).render(), "12.75");
        assert_eq!(Cell::Integer(7).render(), "7");
        let dt = NaiveDate::from_ymd_opt(2023, 1, 31)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap();
        assert_eq!(Cell::DateTime(dt).render(), "2023-01-31 00:00:00");
    }

    #[test]
    fn test_excel_serial_conversion() {
        let dt = excel_serial_to_datetime(44957.0).unwrap();
        assert_eq!(dt.format("%Y-%m-%d %H:%M:%S").to_string(), "2023-01-31 00:00:00");

        let dt = excel_serial_to_datetime(59.0).unwrap();
        assert_eq!(dt.format("%Y-%m-%d").to_string(), "1900-02-28");

        let dt = excel_serial_to_datetime(61.5).unwrap();
        assert_eq!(dt.format("%Y-%m-%d %H:%M").to_string(), "1900-03-01 12:00");
    }

    #[test]
    fn test_range_keeps_absolute_columns() {
        // Used range starts at B3; header row is the fourth sheet row.
        let mut range: Range<Data> = Range::new((2, 1), (6, 3));
        range.set_value((2, 1), Data::String("Title".to_string()));
        range.set_value((3, 3), Data::String("Total".to_string()));
        range.set_value((4, 1), Data::String("الفترة".to_string()));
        range.set_value((5, 1), Data::Float(2019.0));
        range.set_value((5, 3), Data::Float(10.5));
        range.set_value((6, 1), Data::DateTimeIso("2023-01-31T00:00:00".to_string()));

        let sheet = range_to_raw_sheet("30c", &range, 3).unwrap();
        assert_eq!(sheet.columns, vec!["Unnamed: 0", "Unnamed: 1", "Unnamed: 2", "Total"]);
        assert_eq!(sheet.rows.len(), 3);
        assert_eq!(sheet.rows[0][1], Cell::text("الفترة"));
        assert_eq!(sheet.rows[1][1].render(), "2019.0");
        assert_eq!(sheet.rows[1][3], Cell::Number(10.5));
        assert_eq!(sheet.rows[2][1].render(), "2023-01-31 00:00:00");
    }

    #[test]
    fn test_header_beyond_range_is_skipped() {
        let mut range: Range<Data> = Range::new((0, 0), (1, 1));
        range.set_value((0, 0), Data::String("only".to_string()));
        assert!(range_to_raw_sheet("30d", &range, 5).is_none());
    }

    #[test]
    fn test_duplicate_headers_are_suffixed() {
        let existing = vec!["Sales".to_string(), "Sales.1".to_string()];
        assert_eq!(dedup_label(&existing, "Sales".to_string()), "Sales.2");
        assert_eq!(dedup_label(&existing, "Count".to_string()), "Count");
    }
}
