//! Cell → number conversions used on the count and amount columns.

use crate::sheet_parser::Cell;

/// Integer-part truncation: missing cells count as zero, everything else is
/// rendered, cut at the first decimal point and parsed. `"12.75"` → 12.
/// Text that still doesn't parse yields `None`.
pub fn split_and_keep_integer(cell: &Cell) -> Option<i64> {
    if cell.is_missing() {
        return Some(0);
    }
    let text = cell.render();
    let integer_part = text.split('.').next().unwrap_or_default().trim();
    integer_part.parse().ok()
}

/// Best-effort float parse; unparseable values become `None` instead of failing.
pub fn coerce_float(cell: &Cell) -> Option<f64> {
    let value = match cell {
        Cell::Empty | Cell::DateTime(_) => return None,
        Cell::Integer(i) => *i as f64,
        Cell::Number(f) => *f,
        Cell::Text(s) => s.trim().parse::<f64>().ok()?,
    };
    (!value.is_nan()).then_some(value)
}
