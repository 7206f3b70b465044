//! Append-only merge of destination tables into the warehouse.
//!
//! Each table is bulk-inserted into a staging table, then only rows whose
//! natural key is not already present are copied over. Existing rows are never
//! updated or deleted, so loading the same bulletin twice inserts nothing the
//! second time.

use anyhow::{Context, Result};
use rusqlite::params_from_iter;
use std::time::{Duration, Instant};
use tracing::{debug, error, info};

use crate::table::DestinationTable;
use crate::warehouse::{quote_ident, to_sql_value, Warehouse};

const STAGING_PREFIX: &str = "temp_";

/// Result of one successful table load.
#[derive(Debug, Clone)]
pub struct LoadOutcome {
    pub table: String,
    pub inserted: usize,
    pub elapsed: Duration,
}

/// Result of loading every table of a run.
#[derive(Debug, Clone, Default)]
pub struct BatchReport {
    pub loaded: Vec<LoadOutcome>,
    pub failed: Vec<String>,
}

impl BatchReport {
    /// Sum of the successful loads' durations in seconds, rounded to two decimals.
    pub fn total_seconds(&self) -> f64 {
        let total: f64 = self.loaded.iter().map(|o| o.elapsed.as_secs_f64()).sum();
        (total * 100.0).round() / 100.0
    }

    pub fn is_loaded(&self, table: &str) -> bool {
        self.loaded.iter().any(|o| o.table == table)
    }
}

pub struct MergeLoader<'a> {
    warehouse: &'a Warehouse,
}

impl<'a> MergeLoader<'a> {
    pub fn new(warehouse: &'a Warehouse) -> Self {
        Self { warehouse }
    }

    /// Load every table in order. A failing table is logged and the rest still load.
    pub fn load_all(&self, tables: &[DestinationTable]) -> BatchReport {
        let mut report = BatchReport::default();
        for table in tables {
            match self.load_table(table) {
                Ok(outcome) => {
                    info!(
                        "{} rows inserted into {} in {:.2}s",
                        outcome.inserted,
                        outcome.table,
                        outcome.elapsed.as_secs_f64()
                    );
                    report.loaded.push(outcome);
                }
                Err(e) => {
                    error!("An error occurred while loading {}: {:#}", table.name, e);
                    report.failed.push(table.name.clone());
                }
            }
        }
        info!(
            "Loaded {} tables ({} failed) in {:.2}s",
            report.loaded.len(),
            report.failed.len(),
            report.total_seconds()
        );
        report
    }

    pub fn load_table(&self, table: &DestinationTable) -> Result<LoadOutcome> {
        let started = Instant::now();
        let staging = format!("{}{}", STAGING_PREFIX, table.name);

        self.warehouse
            .create_table(&table.name, &table.columns, true)
            .with_context(|| format!("Failed to prepare destination {}", table.name))?;
        self.stage(table, &staging)
            .with_context(|| format!("Failed to stage {}", table.name))?;

        let inserted = self
            .merge(table, &staging)
            .with_context(|| format!("Failed to merge {} into {}", staging, table.name));
        // Staging is dropped whether or not the merge went through.
        let dropped = self.warehouse.drop_table(&staging);
        let inserted = inserted?;
        dropped?;
        debug!(
            "{} now holds {} rows",
            table.name,
            self.warehouse.count_rows(&table.name)?
        );

        Ok(LoadOutcome {
            table: table.name.clone(),
            inserted,
            elapsed: started.elapsed(),
        })
    }

    /// Replace the staging table and bulk insert all rows in one transaction.
    fn stage(&self, table: &DestinationTable, staging: &str) -> Result<()> {
        let conn = self.warehouse.conn();
        let tx = conn.unchecked_transaction()?;

        self.warehouse.drop_table(staging)?;
        self.warehouse.create_table(staging, &table.columns, false)?;

        let placeholders: Vec<String> = (1..=table.column_count()).map(|i| format!("?{}", i)).collect();
        let sql = format!(
            "INSERT INTO {} ({}) VALUES ({})",
            self.warehouse.qualified(staging),
            column_list(table),
            placeholders.join(", ")
        );
        {
            let mut stmt = tx.prepare(&sql)?;
            for row in &table.rows {
                stmt.execute(params_from_iter(row.iter().map(to_sql_value)))?;
            }
        }
        tx.commit()?;
        debug!("Staged {} rows into {}", table.row_count(), staging);
        Ok(())
    }

    fn merge(&self, table: &DestinationTable, staging: &str) -> Result<usize> {
        let columns = column_list(table);
        let key_match: Vec<String> = table
            .granularity
            .natural_key()
            .iter()
            .map(|k| format!("existing.{0} = staged.{0}", quote_ident(k)))
            .collect();

        let sql = format!(
            "INSERT INTO {dest} ({columns}) SELECT {columns} FROM {staging} AS staged \
             WHERE NOT EXISTS (SELECT 1 FROM {dest} AS existing WHERE {keys})",
            dest = self.warehouse.qualified(&table.name),
            staging = self.warehouse.qualified(staging),
            columns = columns,
            keys = key_match.join(" AND "),
        );
        debug!("{}", sql);
        Ok(self.warehouse.conn().execute(&sql, [])?)
    }
}

fn column_list(table: &DestinationTable) -> String {
    table
        .columns
        .iter()
        .map(|c| quote_ident(&c.name))
        .collect::<Vec<_>>()
        .join(", ")
}
