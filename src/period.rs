//! Period label classification: which rows of a sheet are yearly, quarterly or
//! monthly observations.
//!
//! The bulletin lists all yearly rows first, then the quarterly block, then the
//! monthly rows. [`BoundaryClassifier`] exploits that ordering by locating the
//! quarterly block through its first and last `Q1` label; [`PerRowClassifier`]
//! looks at each label on its own.

use regex::Regex;
use serde::Deserialize;
use std::sync::OnceLock;

use crate::error::{SourceFault, SourceResult};
use crate::table::Granularity;

pub const QUARTER_BOUNDARY: &str = "Q1";
pub const QUARTER_MARKER: &str = "Q";

fn year_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^\d{4}|^\d{4}-12-31 00:00:00").expect("valid year pattern"))
}

fn month_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^\d{4}-\d{2}-\d{2} 00:00:00").expect("valid month pattern"))
}

fn four_digits() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\d{4}").expect("valid year digits pattern"))
}

pub fn is_year_label(label: &str) -> bool {
    year_pattern().is_match(label)
}

pub fn is_month_label(label: &str) -> bool {
    month_pattern().is_match(label)
}

pub fn is_quarter_label(label: &str) -> bool {
    label.contains(QUARTER_MARKER)
}

/// Row indices per granularity, each in sheet order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Buckets {
    pub year: Vec<usize>,
    pub quarter: Vec<usize>,
    pub month: Vec<usize>,
}

impl Buckets {
    pub fn rows(&self, granularity: Granularity) -> &[usize] {
        match granularity {
            Granularity::Year => &self.year,
            Granularity::Quarter => &self.quarter,
            Granularity::Month => &self.month,
        }
    }
}

/// Splits a sheet's period labels into granularity buckets.
/// Labels that fit no bucket are dropped.
pub trait PeriodClassifier: Send + Sync {
    fn name(&self) -> &str;
    fn classify(&self, periods: &[String]) -> SourceResult<Buckets>;
}

/// Positional strategy: rows before the first `Q1` label are year candidates,
/// rows between the first and last `Q1` (inclusive) are quarter candidates,
/// rows after the last `Q1` are month candidates. Each range is then filtered
/// by its own pattern.
#[derive(Debug, Clone, Copy, Default)]
pub struct BoundaryClassifier;

impl PeriodClassifier for BoundaryClassifier {
    fn name(&self) -> &str {
        "boundary"
    }

    fn classify(&self, periods: &[String]) -> SourceResult<Buckets> {
        let first_q = periods
            .iter()
            .position(|p| p.contains(QUARTER_BOUNDARY))
            .ok_or_else(|| SourceFault::NoQuarterBoundary(QUARTER_BOUNDARY.to_string()))?;
        let last_q = periods
            .iter()
            .rposition(|p| p.contains(QUARTER_BOUNDARY))
            .unwrap_or(first_q);

        let pick = |range: std::ops::Range<usize>, keep: fn(&str) -> bool| -> Vec<usize> {
            range.filter(|&i| keep(&periods[i])).collect()
        };

        Ok(Buckets {
            year: pick(0..first_q, is_year_label),
            quarter: pick(first_q..last_q + 1, is_quarter_label),
            month: pick(last_q + 1..periods.len(), is_month_label),
        })
    }
}

/// Label-only strategy. A year-end date stamp is indistinguishable from a
/// December month stamp here and lands in the month bucket.
#[derive(Debug, Clone, Copy, Default)]
pub struct PerRowClassifier;

impl PerRowClassifier {
    pub fn classify_label(label: &str) -> Option<Granularity> {
        if is_quarter_label(label) {
            Some(Granularity::Quarter)
        } else if is_month_label(label) {
            Some(Granularity::Month)
        } else if is_year_label(label) {
            Some(Granularity::Year)
        } else {
            None
        }
    }
}

impl PeriodClassifier for PerRowClassifier {
    fn name(&self) -> &str {
        "per_row"
    }

    fn classify(&self, periods: &[String]) -> SourceResult<Buckets> {
        let mut buckets = Buckets::default();
        for (i, label) in periods.iter().enumerate() {
            match Self::classify_label(label) {
                Some(Granularity::Year) => buckets.year.push(i),
                Some(Granularity::Quarter) => buckets.quarter.push(i),
                Some(Granularity::Month) => buckets.month.push(i),
                None => {}
            }
        }
        Ok(buckets)
    }
}

/// Which classification strategy a run uses.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClassifierKind {
    #[default]
    Boundary,
    PerRow,
}

impl ClassifierKind {
    pub fn build(self) -> Box<dyn PeriodClassifier> {
        match self {
            ClassifierKind::Boundary => Box::new(BoundaryClassifier),
            ClassifierKind::PerRow => Box::new(PerRowClassifier),
        }
    }
}

/// Split a quarter label such as `"Q3 2019.0"` into `(2019, "Q3")`.
pub fn decompose_quarter(label: &str) -> SourceResult<(i64, String)> {
    let bad = || SourceFault::BadQuarterLabel(label.to_string());
    let mut tokens = label.split_whitespace();
    let quarter = tokens.next().ok_or_else(bad)?;
    let year_token = tokens.next().ok_or_else(bad)?;
    let year = four_digits()
        .find(year_token)
        .and_then(|m| m.as_str().parse::<i64>().ok())
        .ok_or_else(bad)?;
    Ok((year, quarter.to_string()))
}
