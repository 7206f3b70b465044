//! One ETL run: read → transform → merge → audit → archive, per intake file.

use anyhow::Result;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{error, info, info_span, warn};
use uuid::Uuid;

use crate::archive;
use crate::audit::{self, AuditSource, SqliteAuditLog};
use crate::config::{EtlConfig, SheetSpec};
use crate::loader::MergeLoader;
use crate::period::PeriodClassifier;
use crate::sheet_parser::{self, RawSheet};
use crate::transform;
use crate::warehouse::Warehouse;

/// Everything a run needs, built once from the config and only read afterwards.
pub struct RunContext {
    destination: Warehouse,
    audit: SqliteAuditLog,
    sheets: Vec<SheetSpec>,
    header_row: usize,
    classifier: Box<dyn PeriodClassifier>,
    source_descriptor: String,
    source_type: String,
    archive_dir: PathBuf,
}

/// What happened to one workbook.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunSummary {
    pub tables: usize,
    pub loaded: usize,
    pub inserted: usize,
    pub audited: usize,
    pub failed: Vec<String>,
    pub elapsed_seconds: f64,
}

impl RunContext {
    /// Open the destination and audit warehouses named in the config.
    pub fn connect(config: &EtlConfig) -> Result<Self> {
        let destination = Warehouse::connect(config.destination_server()?)?;
        let audit = SqliteAuditLog::new(Warehouse::connect(config.audit_server()?)?)?;
        Ok(Self::new(config, destination, audit))
    }

    pub fn new(config: &EtlConfig, destination: Warehouse, audit: SqliteAuditLog) -> Self {
        Self {
            destination,
            audit,
            sheets: config.sheets.clone(),
            header_row: config.header_row,
            classifier: config.classifier.build(),
            source_descriptor: config.source_descriptor.clone(),
            source_type: config.source_type.clone(),
            archive_dir: config.archive_dir.clone(),
        }
    }

    #[cfg(test)]
    pub fn destination(&self) -> &Warehouse {
        &self.destination
    }

    #[cfg(test)]
    pub fn audit(&self) -> &SqliteAuditLog {
        &self.audit
    }

    /// Transform, load and audit already-parsed sheets.
    pub fn process_sheets(&self, sheets: &[RawSheet]) -> RunSummary {
        let tables = transform::transform_workbook(sheets, &self.sheets, self.classifier.as_ref());
        let report = MergeLoader::new(&self.destination).load_all(&tables);

        let source = AuditSource {
            db_name: self.destination.database_name(),
            db_schema: self.destination.schema(),
            src_table: &self.source_descriptor,
            src_type: &self.source_type,
        };
        let audited = audit::log_batch(&self.audit, &source, &tables, &report);

        RunSummary {
            tables: tables.len(),
            loaded: report.loaded.len(),
            inserted: report.loaded.iter().map(|o| o.inserted).sum(),
            audited,
            failed: report.failed.clone(),
            elapsed_seconds: report.total_seconds(),
        }
    }

    /// Process one workbook and archive it. An unreadable workbook is an error
    /// and stays in the intake directory.
    pub fn run_file(&self, path: &Path) -> Result<RunSummary> {
        let sheet_names: Vec<String> = self.sheets.iter().map(|s| s.name.clone()).collect();
        let sheets = sheet_parser::read_workbook(path, &sheet_names, self.header_row)?;
        let summary = self.process_sheets(&sheets);
        archive::archive_file(path, &self.archive_dir)?;
        Ok(summary)
    }
}

/// Run every intake file in order. Returns the summaries of the files that completed.
pub fn run(ctx: &RunContext, files: &[PathBuf]) -> Vec<RunSummary> {
    let mut summaries = Vec::new();
    for path in files {
        let run_id = Uuid::new_v4();
        let span = info_span!("etl_run", %run_id, file = %path.display());
        let _guard = span.enter();

        info!("Starting ETL process...");
        let started = Instant::now();
        match ctx.run_file(path) {
            Ok(summary) => {
                info!(
                    "ETL process completed successfully in {} seconds ({} tables loaded, {} rows inserted, {:.2}s wall)",
                    summary.elapsed_seconds,
                    summary.loaded,
                    summary.inserted,
                    started.elapsed().as_secs_f64()
                );
                if !summary.failed.is_empty() {
                    warn!("{} of {} tables failed to load: {:?}", summary.failed.len(), summary.tables, summary.failed);
                }
                summaries.push(summary);
            }
            Err(e) => error!("An error occurred in the ETL process: {:#}", e),
        }
    }
    summaries
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sheet_transformer::fixtures::*;

    const CONFIG: &str = r#"{
        "servers": {},
        "sheets": [
            { "name": "30c", "variant": "fixed_mapping", "table_prefix": "Totals_by" },
            { "name": "30d", "variant": "sector_breakdown", "table_prefix": "Sectors_by" },
            { "name": "30e", "variant": "city_breakdown", "table_prefix": "Cities_by" }
        ]
    }"#;

    fn context() -> RunContext {
        let config = EtlConfig::from_json(CONFIG).unwrap();
        let destination = Warehouse::open_in_memory("External", "dbo").unwrap();
        let audit = SqliteAuditLog::new(Warehouse::open_in_memory("General", "General").unwrap()).unwrap();
        RunContext::new(&config, destination, audit)
    }

    fn frequency(ctx: &RunContext, table: &str) -> i64 {
        ctx.audit()
            .warehouse()
            .conn()
            .query_row(
                "SELECT Max_Load_Count FROM \"General\".\"Frequency_of_load_count\" WHERE DB_Table = ?1",
                [table],
                |row| row.get(0),
            )
            .unwrap()
    }

    #[test]
    fn test_bulletin_loads_twice_without_duplicates() {
        let ctx = context();
        let sheets = vec![totals_sheet(), sector_sheet(), headerless_sheet("30e")];

        let first = ctx.process_sheets(&sheets);
        assert_eq!(first.tables, 6);
        assert_eq!(first.loaded, 6);
        assert_eq!(first.audited, 6);
        assert!(first.failed.is_empty());
        // totals: 1 year + 2 quarters + 1 month; sectors: 2 + 3 + 2
        assert_eq!(first.inserted, 11);

        let dest = ctx.destination();
        assert!(dest.table_exists("Totals_by_Year").unwrap());
        assert!(!dest.table_exists("Cities_by_Year").unwrap());
        assert_eq!(dest.count_rows("Sectors_by_Quarter").unwrap(), 3);

        let second = ctx.process_sheets(&sheets);
        assert_eq!(second.loaded, 6);
        assert_eq!(second.inserted, 0);
        assert_eq!(dest.count_rows("Sectors_by_Quarter").unwrap(), 3);

        assert_eq!(frequency(&ctx, "Sectors_by_Month"), 2);
        let audit_rows: i64 = ctx
            .audit()
            .warehouse()
            .conn()
            .query_row("SELECT COUNT(*) FROM \"General\".\"DM_Quality\"", [], |row| row.get(0))
            .unwrap();
        assert_eq!(audit_rows, 12);
    }

    #[test]
    fn test_quarter_rows_land_with_split_key() {
        let ctx = context();
        ctx.process_sheets(&[sector_sheet()]);

        let (year, quarter): (i64, String) = ctx
            .destination()
            .conn()
            .query_row(
                "SELECT YearNum, QuarterNum FROM \"dbo\".\"Sectors_by_Quarter\" ORDER BY YearNum DESC LIMIT 1",
                [],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .unwrap();
        assert_eq!((year, quarter.as_str()), (2020, "Q1"));
    }

    #[test]
    fn test_unreadable_workbook_stays_in_intake() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("Monthly_Bulletin_Bad.xlsx");
        std::fs::write(&file, b"not a workbook").unwrap();

        let ctx = context();
        let summaries = run(&ctx, &[file.clone()]);
        assert!(summaries.is_empty());
        assert!(file.exists());
    }
}
