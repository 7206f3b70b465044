//! Transform driver: every configured sheet of a workbook → destination tables.

use chrono::{Local, NaiveDateTime};
use tracing::{error, info};

use crate::config::SheetSpec;
use crate::error::{SourceFault, SourceResult};
use crate::period::PeriodClassifier;
use crate::sheet_parser::RawSheet;
use crate::sheet_transformer::SheetTransformer;
use crate::table::DestinationTable;

/// Transform all sheets, stamping each with the local time it was processed.
pub fn transform_workbook(
    sheets: &[RawSheet],
    specs: &[SheetSpec],
    classifier: &dyn PeriodClassifier,
) -> Vec<DestinationTable> {
    transform_workbook_at(sheets, specs, classifier, || Local::now().naive_local())
}

/// Like [`transform_workbook`] with an explicit clock.
///
/// A sheet that fails is logged and skipped; the returned tables keep sheet
/// order, then Year, Quarter, Month within a sheet.
pub fn transform_workbook_at(
    sheets: &[RawSheet],
    specs: &[SheetSpec],
    classifier: &dyn PeriodClassifier,
    clock: impl Fn() -> NaiveDateTime,
) -> Vec<DestinationTable> {
    let transformer = SheetTransformer::new(classifier);
    let mut tables = Vec::new();

    for sheet in sheets {
        info!("Processing sheet '{}' with {} classifier", sheet.name, classifier.name());
        match transform_one(&transformer, sheet, specs, clock()) {
            Ok(sheet_tables) => {
                for table in &sheet_tables {
                    info!(
                        "Sheet '{}' -> {} ({} rows, {} columns)",
                        sheet.name,
                        table.name,
                        table.row_count(),
                        table.column_count()
                    );
                }
                tables.extend(sheet_tables);
            }
            Err(e) => error!("An error occurred while transforming {}: {}", sheet.name, e),
        }
    }

    tables
}

fn transform_one(
    transformer: &SheetTransformer<'_>,
    sheet: &RawSheet,
    specs: &[SheetSpec],
    created_at: NaiveDateTime,
) -> SourceResult<Vec<DestinationTable>> {
    let spec = specs
        .iter()
        .find(|s| s.name == sheet.name)
        .ok_or_else(|| SourceFault::UnknownSheet(sheet.name.clone()))?;
    transformer.transform(sheet, spec.variant, &spec.table_prefix, created_at)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::columns::SheetVariant;
    use crate::period::BoundaryClassifier;
    use crate::sheet_transformer::fixtures::*;

    fn specs() -> Vec<SheetSpec> {
        vec![
            SheetSpec::new("30c", SheetVariant::FixedMapping, "Totals_by"),
            SheetSpec::new("30d", SheetVariant::SectorBreakdown, "Sectors_by"),
            SheetSpec::new("30e", SheetVariant::CityBreakdown, "Cities_by"),
        ]
    }

    #[test]
    fn test_malformed_sheet_is_skipped() {
        let sheets = vec![totals_sheet(), sector_sheet(), headerless_sheet("30e")];
        let tables = transform_workbook_at(&sheets, &specs(), &BoundaryClassifier, created_at);
        let names: Vec<&str> = tables.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(
            names,
            vec![
                "Totals_by_Year",
                "Totals_by_Quarter",
                "Totals_by_Month",
                "Sectors_by_Year",
                "Sectors_by_Quarter",
                "Sectors_by_Month",
            ]
        );
    }

    #[test]
    fn test_unconfigured_sheet_is_skipped() {
        let mut stray = sector_sheet();
        stray.name = "31a".to_string();
        let tables = transform_workbook_at(&[stray, city_sheet()], &specs(), &BoundaryClassifier, created_at);
        assert_eq!(tables.len(), 3);
        assert!(tables.iter().all(|t| t.name.starts_with("Cities_by_")));
    }
}
