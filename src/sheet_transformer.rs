//! Reshape one bulletin sheet into its yearly, quarterly and monthly tables.
//!
//! The sheets carry a title block, bilingual merged headers and all three
//! granularities stacked in one column. The transformer finds the row holding
//! the period sentinel, rebuilds the header from the title row that follows,
//! and splits the observations into three typed tables.

use chrono::NaiveDateTime;
use tracing::debug;

use crate::coerce::{coerce_float, split_and_keep_integer};
use crate::columns::{
    self, ColumnRole, ColumnSpec, SheetVariant, CREATED_AT_COLUMN, QUARTER_NUM_COLUMN,
    YEAR_NUM_COLUMN,
};
use crate::error::{SourceFault, SourceResult};
use crate::period::{decompose_quarter, PeriodClassifier};
use crate::sheet_parser::{Cell, RawSheet, MISSING_TEXT};
use crate::table::{DestinationTable, Granularity, Value};

/// Label marking the header row of the data block ("period").
pub const SENTINEL_LABEL: &str = "الفترة";
/// Column holding the period sentinel and the first half of each period label.
pub const MARKER_COLUMN: &str = "Unnamed: 1";
/// Column holding the second half of split period labels (the year of `Q1 2019`).
pub const PARTNER_COLUMN: &str = "Unnamed: 2";
/// Placeholder the totals sheet uses for "not available".
pub const PLACEHOLDER_VALUE: &str = "---";
/// Text written into every remaining empty cell before coercion.
const FILL_VALUE: &str = "0.0";

/// Transforms sheets with a given period classification strategy.
pub struct SheetTransformer<'a> {
    classifier: &'a dyn PeriodClassifier,
}

impl<'a> SheetTransformer<'a> {
    pub fn new(classifier: &'a dyn PeriodClassifier) -> Self {
        Self { classifier }
    }

    /// Produce the Year, Quarter and Month tables (in that order) for one sheet.
    pub fn transform(
        &self,
        sheet: &RawSheet,
        variant: SheetVariant,
        table_prefix: &str,
        created_at: NaiveDateTime,
    ) -> SourceResult<Vec<DestinationTable>> {
        let mut keys = sheet.columns.clone();
        let mut rows = sheet.rows.clone();

        // Everything above the sentinel row is title and legend noise.
        let marker = column_position(&keys, MARKER_COLUMN)?;
        let start = rows
            .iter()
            .position(|row| matches!(row.get(marker), Some(Cell::Text(s)) if s.trim() == SENTINEL_LABEL))
            .ok_or_else(|| SourceFault::MissingSentinel(SENTINEL_LABEL.to_string()))?;
        rows.drain(..start);

        drop_empty_columns(&mut keys, &mut rows);
        merge_period_columns(&mut keys, &mut rows)?;

        let fragments: Vec<String> = rows[0].iter().skip(1).map(Cell::render).collect();
        debug!(
            "Sheet '{}': {} rows from sentinel, {} columns, title fragments {:?}",
            sheet.name,
            rows.len(),
            keys.len(),
            fragments
        );

        let mut specs = match variant {
            SheetVariant::FixedMapping => {
                blank_placeholders(&mut rows);
                let mapped: Vec<Option<ColumnSpec>> =
                    keys.iter().map(|k| columns::fixed_column(k)).collect();
                let keep: Vec<bool> = mapped.iter().map(Option::is_some).collect();
                retain_columns(&mut rows, &keep);
                mapped.into_iter().flatten().collect::<Vec<_>>()
            }
            SheetVariant::SectorBreakdown | SheetVariant::CityBreakdown => {
                let specs = columns::synthesize(variant, &fragments, SENTINEL_LABEL);
                if specs.len() != keys.len() {
                    return Err(SourceFault::ColumnCountMismatch {
                        synthesized: specs.len(),
                        actual: keys.len(),
                    });
                }
                specs
            }
        };

        let artifact = format!("_{}", SENTINEL_LABEL);
        let keep: Vec<bool> = specs.iter().map(|s| !s.name.contains(&artifact)).collect();
        retain_columns(&mut rows, &keep);
        specs.retain(|s| !s.name.contains(&artifact));

        for cell in rows.iter_mut().flat_map(|row| row.iter_mut()) {
            if cell.is_missing() {
                *cell = Cell::text(FILL_VALUE);
            }
        }

        let period_idx = specs
            .iter()
            .position(|s| s.role == ColumnRole::Period)
            .ok_or_else(|| SourceFault::MissingColumn(columns::PERIOD_COLUMN.to_string()))?;
        let periods: Vec<String> = rows.iter().map(|row| row[period_idx].render()).collect();
        let buckets = self.classifier.classify(&periods)?;

        Granularity::ALL
            .iter()
            .map(|&granularity| {
                build_table(
                    granularity,
                    granularity.table_name(table_prefix),
                    &specs,
                    &rows,
                    buckets.rows(granularity),
                    period_idx,
                    created_at,
                )
            })
            .collect()
    }
}

fn column_position(keys: &[String], key: &str) -> SourceResult<usize> {
    keys.iter()
        .position(|k| k == key)
        .ok_or_else(|| SourceFault::MissingColumn(key.to_string()))
}

/// Keep only the columns whose `keep` flag is set.
fn retain_columns(rows: &mut [Vec<Cell>], keep: &[bool]) {
    for row in rows.iter_mut() {
        let mut flags = keep.iter();
        row.retain(|_| *flags.next().unwrap_or(&false));
    }
}

fn drop_empty_columns(keys: &mut Vec<String>, rows: &mut [Vec<Cell>]) {
    let keep: Vec<bool> = (0..keys.len())
        .map(|col| rows.iter().any(|row| row.get(col).is_some_and(|c| !c.is_missing())))
        .collect();
    let mut flags = keep.iter();
    keys.retain(|_| *flags.next().unwrap_or(&false));
    retain_columns(rows, &keep);
}

/// Period labels are split across the marker column and its partner
/// (`Q1` | `2019.0`). Join them into the marker column and drop the partner.
fn merge_period_columns(keys: &mut Vec<String>, rows: &mut [Vec<Cell>]) -> SourceResult<()> {
    let marker = column_position(keys, MARKER_COLUMN)?;
    let partner = column_position(keys, PARTNER_COLUMN)?;

    for row in rows.iter_mut() {
        let merged = format!("{} {}", row[marker].render(), row[partner].render())
            .replace(MISSING_TEXT, "");
        row[marker] = Cell::text(merged.trim());
        row.remove(partner);
    }
    keys.remove(partner);
    Ok(())
}

fn blank_placeholders(rows: &mut [Vec<Cell>]) {
    for cell in rows.iter_mut().flat_map(|row| row.iter_mut()) {
        if matches!(cell, Cell::Text(s) if s.trim() == PLACEHOLDER_VALUE) {
            *cell = Cell::Empty;
        }
    }
}

fn coerce_cell(role: ColumnRole, cell: &Cell) -> Value {
    match role {
        ColumnRole::Count => Value::Int(split_and_keep_integer(cell)),
        ColumnRole::Amount => Value::Float(coerce_float(cell)),
        _ => Value::Text(cell.render()),
    }
}

/// Type the selected rows. The quarter table swaps `Period` for `YearNum` and
/// `QuarterNum` at the same position.
fn build_table(
    granularity: Granularity,
    name: String,
    specs: &[ColumnSpec],
    rows: &[Vec<Cell>],
    selected: &[usize],
    period_idx: usize,
    created_at: NaiveDateTime,
) -> SourceResult<DestinationTable> {
    let split_period = granularity == Granularity::Quarter;

    let mut columns = Vec::with_capacity(specs.len() + 2);
    for (i, spec) in specs.iter().enumerate() {
        if split_period && i == period_idx {
            columns.push(ColumnSpec::new(YEAR_NUM_COLUMN, ColumnRole::YearNum));
            columns.push(ColumnSpec::new(QUARTER_NUM_COLUMN, ColumnRole::QuarterNum));
        } else {
            columns.push(spec.clone());
        }
    }
    columns.push(ColumnSpec::new(CREATED_AT_COLUMN, ColumnRole::CreatedAt));

    let mut typed_rows = Vec::with_capacity(selected.len());
    for &r in selected {
        let mut values = Vec::with_capacity(columns.len());
        for (i, (spec, cell)) in specs.iter().zip(&rows[r]).enumerate() {
            if split_period && i == period_idx {
                let (year, quarter) = decompose_quarter(&cell.render())?;
                values.push(Value::Int(Some(year)));
                values.push(Value::Text(quarter));
            } else {
                values.push(coerce_cell(spec.role, cell));
            }
        }
        values.push(Value::Timestamp(created_at));
        typed_rows.push(values);
    }

    Ok(DestinationTable {
        name,
        granularity,
        columns,
        rows: typed_rows,
    })
}

#[cfg(test)]
pub(crate) mod fixtures {
    //! Hand-built sheets mirroring the three bulletin layouts.

    use super::*;
    use chrono::NaiveDate;

    const E: Cell = Cell::Empty;

    fn t(s: &str) -> Cell {
        Cell::text(s)
    }

    fn n(f: f64) -> Cell {
        Cell::Number(f)
    }

    fn day(y: i32, m: u32, d: u32) -> Cell {
        Cell::DateTime(NaiveDate::from_ymd_opt(y, m, d).unwrap().and_hms_opt(0, 0, 0).unwrap())
    }

    fn keys(count: usize) -> Vec<String> {
        (0..count).map(|i| format!("Unnamed: {}", i)).collect()
    }

    pub fn created_at() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 5, 1).unwrap().and_hms_opt(8, 30, 0).unwrap()
    }

    /// Totals sheet: positional columns, `---` placeholders, an unmapped notes column.
    pub fn totals_sheet() -> RawSheet {
        RawSheet {
            name: "30c".to_string(),
            columns: keys(7),
            rows: vec![
                vec![E, t("Points of Sale Transactions"), E, E, E, E, E],
                vec![E, t("الفترة"), E, t("Sales"), t("Transactions"), t("Terminals"), E],
                vec![E, n(2019.0), E, n(1500.5), n(2000.0), n(300.0), t("revised")],
                vec![E, t("Q1"), n(2019.0), t("---"), n(500.0), n(80.0), E],
                vec![E, t("Q1"), n(2020.0), n(410.25), n(520.0), n(82.0), E],
                vec![E, day(2020, 1, 31), E, n(140.0), n(170.9), E, E],
            ],
        }
    }

    /// Sector sheet: two columns per sector, titles on the sentinel row.
    pub fn sector_sheet() -> RawSheet {
        RawSheet {
            name: "30d".to_string(),
            columns: keys(7),
            rows: vec![
                vec![E, t("Points of Sale Transactions by Sector"), E, E, E, E, E],
                vec![E, t("الفترة"), E, t("Retail"), E, t("Restaurants & Café"), E],
                vec![E, E, E, t("Number"), t("Value"), t("Number"), t("Value")],
                vec![E, n(2018.0), E, n(100.0), n(1000.5), n(50.0), n(500.25)],
                vec![E, n(2019.0), E, n(120.0), n(1200.0), E, t("---")],
                vec![E, t("Q1"), n(2019.0), n(30.0), n(300.0), n(12.0), n(120.0)],
                vec![E, t("Q2"), n(2019.0), n(31.7), n(310.0), n(13.0), n(130.0)],
                vec![E, t("Q1"), n(2020.0), n(32.0), n(320.0), n(14.0), n(140.0)],
                vec![E, day(2020, 1, 31), E, n(10.0), n(100.0), n(5.0), n(50.0)],
                vec![E, day(2020, 2, 29), E, n(11.0), n(110.0), n(6.0), n(60.0)],
            ],
        }
    }

    /// City sheet: three columns per city plus a trailing Arabic period block.
    pub fn city_sheet() -> RawSheet {
        RawSheet {
            name: "30e".to_string(),
            columns: keys(11),
            rows: vec![
                vec![E, t("الفترة"), E, t("Riyadh "), E, E, t("Jeddah-"), E, E, t("الفترة"), E],
                vec![E, n(2019.0), E, n(10.0), n(100.0), n(5.0), n(20.0), n(200.0), n(7.0), t("2019"), t("م")],
                vec![E, t("Q1"), n(2019.0), n(1.0), n(10.0), n(5.0), n(2.0), n(20.0), n(7.0), t("ر1 2019"), t("م")],
                vec![E, day(2019, 1, 31), E, n(0.4), n(3.5), n(5.0), E, n(6.5), n(7.0), t("يناير"), t("م")],
            ],
        }
    }

    /// A sheet whose period column never shows the sentinel.
    pub fn headerless_sheet(name: &str) -> RawSheet {
        let mut sheet = city_sheet();
        sheet.name = name.to_string();
        sheet.rows[0][1] = t("Period");
        sheet
    }
}
