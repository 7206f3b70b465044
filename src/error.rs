//! Faults raised while reshaping a bulletin sheet.
//!
//! Persistence and configuration failures travel as `anyhow::Error` with context;
//! only layout problems in the source workbook get a dedicated type, because the
//! transform driver has to tell them apart and skip the offending sheet.

use thiserror::Error;

/// A sheet whose layout does not match one of the known variants.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SourceFault {
    #[error("sentinel label '{0}' not found in the period column")]
    MissingSentinel(String),

    #[error("expected column '{0}' is missing")]
    MissingColumn(String),

    #[error("no period contains the quarter boundary marker '{0}'")]
    NoQuarterBoundary(String),

    #[error("synthesized {synthesized} column names for {actual} sheet columns")]
    ColumnCountMismatch { synthesized: usize, actual: usize },

    #[error("cannot split quarter label '{0}' into quarter and year")]
    BadQuarterLabel(String),

    #[error("no sheet layout configured for '{0}'")]
    UnknownSheet(String),
}

pub type SourceResult<T> = std::result::Result<T, SourceFault>;
