//! Typed destination tables produced by the transform.
//!
//! Separate from `sheet_parser` since the data model is fundamentally different:
//! loosely typed spreadsheet cells vs typed, role-tagged warehouse columns.

use chrono::NaiveDateTime;

use crate::columns::{ColumnSpec, PERIOD_COLUMN, QUARTER_NUM_COLUMN, YEAR_NUM_COLUMN};

/// Time granularity of a destination table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Granularity {
    Year,
    Quarter,
    Month,
}

impl Granularity {
    pub const ALL: [Granularity; 3] = [Granularity::Year, Granularity::Quarter, Granularity::Month];

    /// Suffix appended to a sheet's table prefix.
    pub fn suffix(self) -> &'static str {
        match self {
            Granularity::Year => "Year",
            Granularity::Quarter => "Quarter",
            Granularity::Month => "Month",
        }
    }

    /// Columns identifying a period row when merging into the warehouse.
    pub fn natural_key(self) -> &'static [&'static str] {
        match self {
            Granularity::Quarter => &[YEAR_NUM_COLUMN, QUARTER_NUM_COLUMN],
            Granularity::Year | Granularity::Month => &[PERIOD_COLUMN],
        }
    }

    pub fn table_name(self, prefix: &str) -> String {
        format!("{}_{}", prefix, self.suffix())
    }
}

/// A typed cell value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Text(String),
    Int(Option<i64>),
    Float(Option<f64>),
    Timestamp(NaiveDateTime),
}

/// One destination table ready to be merged into the warehouse.
#[derive(Debug, Clone)]
pub struct DestinationTable {
    pub name: String,
    pub granularity: Granularity,
    pub columns: Vec<ColumnSpec>,
    pub rows: Vec<Vec<Value>>,
}

impl DestinationTable {
    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    pub fn column_count(&self) -> usize {
        self.columns.len()
    }

    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name.as_str()).collect()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name == name)
    }

    /// Value of `column` in row `row`, if both exist.
    pub fn value(&self, row: usize, column: &str) -> Option<&Value> {
        let idx = self.column_index(column)?;
        self.rows.get(row)?.get(idx)
    }
}
