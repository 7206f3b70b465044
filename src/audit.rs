//! Data-quality audit trail for loaded tables.
//!
//! Two tables in the audit warehouse: `Frequency_of_load_count` keeps a
//! per-table load counter, `DM_Quality` gets one row per table per run.

use anyhow::{Context, Result};
use chrono::{Local, NaiveDateTime};
use rusqlite::{params, OptionalExtension};
use tracing::{error, info};

use crate::loader::BatchReport;
use crate::table::DestinationTable;
use crate::warehouse::Warehouse;

pub const FREQUENCY_TABLE: &str = "Frequency_of_load_count";
pub const QUALITY_TABLE: &str = "DM_Quality";

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.f";

/// One `DM_Quality` row.
#[derive(Debug, Clone, PartialEq)]
pub struct LoadAuditRecord {
    pub db_name: String,
    pub db_schema: String,
    pub db_table: String,
    pub time_of_execution: f64,
    pub number_of_columns: usize,
    pub number_of_rows: usize,
    pub frequency_of_load: i64,
    pub created_at: NaiveDateTime,
    pub src_table: String,
    pub src_type: String,
    pub number_of_rejected_rows: usize,
}

pub trait AuditLog {
    /// Bump and return the load counter of `table`; 1 on its first load.
    fn next_load_frequency(&self, table: &str) -> Result<i64>;
    fn record(&self, record: &LoadAuditRecord) -> Result<()>;
}

/// Where the loaded data came from and where it went.
#[derive(Debug, Clone)]
pub struct AuditSource<'a> {
    pub db_name: &'a str,
    pub db_schema: &'a str,
    pub src_table: &'a str,
    pub src_type: &'a str,
}

pub struct SqliteAuditLog {
    warehouse: Warehouse,
}

impl SqliteAuditLog {
    /// Wrap a warehouse, creating the audit tables if they don't exist yet.
    pub fn new(warehouse: Warehouse) -> Result<Self> {
        let sql = format!(
            "CREATE TABLE IF NOT EXISTS {} (
                DB_Table TEXT NOT NULL,
                Max_Load_Count INTEGER NOT NULL,
                Insertion_date TEXT
            );
            CREATE TABLE IF NOT EXISTS {} (
                DB_Name TEXT,
                DB_Schema TEXT,
                DB_Table TEXT,
                Time_of_execution REAL,
                Number_of_Columns INTEGER,
                Number_of_Rows INTEGER,
                Frequency_of_load INTEGER,
                STG_CreatedDate TEXT,
                SRC_Table TEXT,
                SRC_Type TEXT,
                Number_of_Rejected_Rows INTEGER
            );",
            warehouse.qualified(FREQUENCY_TABLE),
            warehouse.qualified(QUALITY_TABLE),
        );
        warehouse
            .conn()
            .execute_batch(&sql)
            .context("Failed to create audit tables")?;
        Ok(Self { warehouse })
    }

    #[cfg(test)]
    pub fn warehouse(&self) -> &Warehouse {
        &self.warehouse
    }
}

impl AuditLog for SqliteAuditLog {
    fn next_load_frequency(&self, table: &str) -> Result<i64> {
        let conn = self.warehouse.conn();
        let frequency = self.warehouse.qualified(FREQUENCY_TABLE);

        let current: Option<i64> = conn
            .query_row(
                &format!("SELECT Max_Load_Count FROM {} WHERE DB_Table = ?1", frequency),
                params![table],
                |row| row.get(0),
            )
            .optional()?;

        let next = match current {
            None => {
                conn.execute(
                    &format!(
                        "INSERT INTO {} (DB_Table, Max_Load_Count, Insertion_date) VALUES (?1, 1, ?2)",
                        frequency
                    ),
                    params![table, now_text()],
                )?;
                1
            }
            Some(count) => {
                conn.execute(
                    &format!("UPDATE {} SET Max_Load_Count = ?1 WHERE DB_Table = ?2", frequency),
                    params![count + 1, table],
                )?;
                count + 1
            }
        };
        Ok(next)
    }

    fn record(&self, record: &LoadAuditRecord) -> Result<()> {
        let sql = format!(
            "INSERT INTO {} (DB_Name, DB_Schema, DB_Table, Time_of_execution, Number_of_Columns, \
             Number_of_Rows, Frequency_of_load, STG_CreatedDate, SRC_Table, SRC_Type, Number_of_Rejected_Rows) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            self.warehouse.qualified(QUALITY_TABLE)
        );
        self.warehouse.conn().execute(
            &sql,
            params![
                record.db_name,
                record.db_schema,
                record.db_table,
                record.time_of_execution,
                record.number_of_columns as i64,
                record.number_of_rows as i64,
                record.frequency_of_load,
                record.created_at.format(TIMESTAMP_FORMAT).to_string(),
                record.src_table,
                record.src_type,
                record.number_of_rejected_rows as i64,
            ],
        )?;
        Ok(())
    }
}

fn now_text() -> String {
    Local::now().naive_local().format(TIMESTAMP_FORMAT).to_string()
}

/// Write an audit row for every table the loader reported as loaded, in
/// transform order. Returns how many tables were recorded.
pub fn log_batch(
    audit: &dyn AuditLog,
    source: &AuditSource<'_>,
    tables: &[DestinationTable],
    report: &BatchReport,
) -> usize {
    let elapsed = report.total_seconds();
    let mut recorded = 0;

    for table in tables.iter().filter(|t| report.is_loaded(&t.name)) {
        let result = audit
            .next_load_frequency(&table.name)
            .and_then(|frequency| {
                audit.record(&LoadAuditRecord {
                    db_name: source.db_name.to_string(),
                    db_schema: source.db_schema.to_string(),
                    db_table: table.name.clone(),
                    time_of_execution: elapsed,
                    number_of_columns: table.column_count(),
                    number_of_rows: table.row_count(),
                    frequency_of_load: frequency,
                    created_at: Local::now().naive_local(),
                    src_table: source.src_table.to_string(),
                    src_type: source.src_type.to_string(),
                    number_of_rejected_rows: 0,
                })
            })
            .with_context(|| format!("Failed to log data load for {}", table.name));

        match result {
            Ok(()) => {
                info!("Data load logged successfully for {}.", table.name);
                recorded += 1;
            }
            Err(e) => error!("Error logging data load: {:#}", e),
        }
    }
    recorded
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::columns::ColumnSpec;
    use crate::loader::LoadOutcome;
    use crate::table::{Granularity, Value};
    use std::cell::RefCell;
    use std::time::Duration;

    fn audit_log() -> SqliteAuditLog {
        SqliteAuditLog::new(Warehouse::open_in_memory("General", "General").unwrap()).unwrap()
    }

    fn table(name: &str, rows: usize) -> DestinationTable {
        DestinationTable {
            name: name.to_string(),
            granularity: Granularity::Year,
            columns: vec![ColumnSpec::period()],
            rows: (0..rows).map(|i| vec![Value::Text(format!("{}", 2000 + i))]).collect(),
        }
    }

    fn source() -> AuditSource<'static> {
        AuditSource {
            db_name: "External",
            db_schema: "dbo",
            src_table: "SAMA",
            src_type: "EXCEL",
        }
    }

    #[test]
    fn test_load_frequency_counts_up_per_table() {
        let audit = audit_log();
        assert_eq!(audit.next_load_frequency("A_Year").unwrap(), 1);
        assert_eq!(audit.next_load_frequency("A_Year").unwrap(), 2);
        assert_eq!(audit.next_load_frequency("A_Month").unwrap(), 1);
        assert_eq!(audit.next_load_frequency("A_Year").unwrap(), 3);
    }

    #[test]
    fn test_log_batch_skips_failed_tables() {
        let audit = audit_log();
        let tables = vec![table("A_Year", 3), table("A_Quarter", 2), table("A_Month", 5)];
        let report = BatchReport {
            loaded: vec![
                LoadOutcome { table: "A_Year".to_string(), inserted: 3, elapsed: Duration::from_millis(1234) },
                LoadOutcome { table: "A_Month".to_string(), inserted: 0, elapsed: Duration::from_millis(10) },
            ],
            failed: vec!["A_Quarter".to_string()],
        };

        assert_eq!(log_batch(&audit, &source(), &tables, &report), 2);

        let conn = audit.warehouse().conn();
        let mut stmt = conn
            .prepare(
                "SELECT DB_Table, Number_of_Rows, Number_of_Columns, Time_of_execution, \
                 Frequency_of_load, SRC_Table, SRC_Type, Number_of_Rejected_Rows, DB_Schema \
                 FROM \"General\".\"DM_Quality\" ORDER BY rowid",
            )
            .unwrap();
        let rows: Vec<(String, i64, i64, f64, i64, String, String, i64, String)> = stmt
            .query_map([], |r| {
                Ok((r.get(0)?, r.get(1)?, r.get(2)?, r.get(3)?, r.get(4)?, r.get(5)?, r.get(6)?, r.get(7)?, r.get(8)?))
            })
            .unwrap()
            .collect::<rusqlite::Result<_>>()
            .unwrap();

        assert_eq!(rows.len(), 2);
        assert_eq!(
            rows[0],
            ("A_Year".to_string(), 3, 1, 1.24, 1, "SAMA".to_string(), "EXCEL".to_string(), 0, "dbo".to_string())
        );
        assert_eq!(rows[1].0, "A_Month");
        assert_eq!(rows[1].1, 5);
    }

    /// Fails every write for one table.
    struct FlakyAudit {
        broken: &'static str,
        recorded: RefCell<Vec<String>>,
    }

    impl AuditLog for FlakyAudit {
        fn next_load_frequency(&self, table: &str) -> Result<i64> {
            if table == self.broken {
                anyhow::bail!("audit database unavailable");
            }
            Ok(1)
        }

        fn record(&self, record: &LoadAuditRecord) -> Result<()> {
            self.recorded.borrow_mut().push(record.db_table.clone());
            Ok(())
        }
    }

    #[test]
    fn test_audit_failure_is_per_table() {
        let audit = FlakyAudit { broken: "A_Year", recorded: RefCell::new(Vec::new()) };
        let tables = vec![table("A_Year", 1), table("A_Month", 1)];
        let report = BatchReport {
            loaded: vec![
                LoadOutcome { table: "A_Year".to_string(), inserted: 1, elapsed: Duration::ZERO },
                LoadOutcome { table: "A_Month".to_string(), inserted: 1, elapsed: Duration::ZERO },
            ],
            failed: vec![],
        };
        assert_eq!(log_batch(&audit, &source(), &tables, &report), 1);
        assert_eq!(*audit.recorded.borrow(), vec!["A_Month".to_string()]);
    }
}
