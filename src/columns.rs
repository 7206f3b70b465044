//! Destination column names for each sheet layout.
//!
//! Every synthesized column carries a [`ColumnRole`], so type coercion later on
//! works from the role instead of matching substrings of the name.

use serde::{Deserialize, Serialize};

use crate::sheet_parser::MISSING_TEXT;

pub const PERIOD_COLUMN: &str = "Period";
pub const YEAR_NUM_COLUMN: &str = "YearNum";
pub const QUARTER_NUM_COLUMN: &str = "QuarterNum";
pub const CREATED_AT_COLUMN: &str = "STG_CreatedDate";

const TRANSACTIONS_PREFIX: &str = "Number_of_Transactions";
const SALES_PREFIX: &str = "Sales";
const TERMINALS_PREFIX: &str = "Number_of_Terminals";

/// What a destination column holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ColumnRole {
    Period,
    YearNum,
    QuarterNum,
    /// Transaction or terminal counts, stored as integers.
    Count,
    /// Sales amounts, stored as floats.
    Amount,
    CreatedAt,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnSpec {
    pub name: String,
    pub role: ColumnRole,
}

impl ColumnSpec {
    pub fn new(name: impl Into<String>, role: ColumnRole) -> Self {
        Self {
            name: name.into(),
            role,
        }
    }

    pub fn period() -> Self {
        Self::new(PERIOD_COLUMN, ColumnRole::Period)
    }
}

/// The three known sheet layouts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SheetVariant {
    /// Totals sheet: positional columns looked up in a fixed table.
    FixedMapping,
    /// Breakdown by merchant sector: count + sales per sector.
    SectorBreakdown,
    /// Breakdown by city: count + sales + terminals per city.
    CityBreakdown,
}

/// Positional key → destination column for the totals sheet.
const FIXED_MAPPING: &[(&str, &str, ColumnRole)] = &[
    ("Unnamed: 1", PERIOD_COLUMN, ColumnRole::Period),
    ("Unnamed: 3", "Sales_Total_Points_Of_Sale_Transactions", ColumnRole::Amount),
    ("Unnamed: 4", "Number_of_Transactions_Total_Points_Of_Sale_Transactions", ColumnRole::Count),
    ("Unnamed: 5", "Number_of_Points_of_Sale_Terminals", ColumnRole::Count),
    (
        "Unnamed: 7",
        "Number_of_Mobile_Transactions_Points_of_Sale_Transactions_Using_Near_Field_Communication_Technology",
        ColumnRole::Count,
    ),
    (
        "Unnamed: 8",
        "Number_of_Cards_Transactions_Points_of_Sale_Transactions_Using_Near_Field_Communication_Technology",
        ColumnRole::Count,
    ),
    (
        "Unnamed: 10",
        "Sales_Using_Mobile_Points_of_Sale_Transactions_Using_Near_Field_Communication_Technology",
        ColumnRole::Amount,
    ),
    (
        "Unnamed: 11",
        "Sales_Using_Cards_Points_of_Sale_Transactions_Using_Near_Field_Communication_Technology",
        ColumnRole::Amount,
    ),
    ("Unnamed: 13", "Sales_ECommerce_Transactions_Using_Mada_Cards", ColumnRole::Amount),
    ("Unnamed: 14", "Number_of_Transactions_Transactions_Using_Mada_Cards", ColumnRole::Count),
];

/// Look up a positional key of the totals sheet. `None` means the column is dropped.
pub fn fixed_column(key: &str) -> Option<ColumnSpec> {
    FIXED_MAPPING
        .iter()
        .find(|(raw, _, _)| *raw == key)
        .map(|(_, name, role)| ColumnSpec::new(*name, *role))
}

/// Build the full column list for a breakdown sheet from its title fragments.
/// Fragments rendered as the missing-cell text are ignored.
pub fn synthesize(variant: SheetVariant, fragments: &[String], sentinel: &str) -> Vec<ColumnSpec> {
    let titles: Vec<&str> = fragments
        .iter()
        .map(String::as_str)
        .filter(|f| *f != MISSING_TEXT)
        .collect();

    match variant {
        SheetVariant::FixedMapping => vec![ColumnSpec::period()],
        SheetVariant::SectorBreakdown => sector_columns(&titles),
        SheetVariant::CityBreakdown => city_columns(&titles, sentinel),
    }
}

fn sector_columns(titles: &[&str]) -> Vec<ColumnSpec> {
    let mut columns = vec![ColumnSpec::period()];
    for title in titles {
        let title = title.trim().replace('*', "").replace('&', "and").replace(' ', "_");
        columns.push(ColumnSpec::new(
            format!("{}_{}", TRANSACTIONS_PREFIX, title),
            ColumnRole::Count,
        ));
        columns.push(ColumnSpec::new(format!("{}_{}", SALES_PREFIX, title), ColumnRole::Amount));
    }
    columns
}

fn city_columns(titles: &[&str], sentinel: &str) -> Vec<ColumnSpec> {
    let mut columns = vec![ColumnSpec::period()];
    for title in titles {
        let title = title.trim().replace('-', "");
        columns.push(ColumnSpec::new(
            format!("{}_{}", TRANSACTIONS_PREFIX, title),
            ColumnRole::Count,
        ));
        columns.push(ColumnSpec::new(format!("{}_{}", SALES_PREFIX, title), ColumnRole::Amount));
        columns.push(ColumnSpec::new(
            format!("{}_{}", TERMINALS_PREFIX, title),
            ColumnRole::Count,
        ));
    }

    // The title row repeats the period label; it only spans two columns.
    let artifact = format!("{}_{}", TERMINALS_PREFIX, sentinel);
    columns.retain(|c| c.name != artifact);
    columns
}
