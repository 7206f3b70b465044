//! Warehouse connection: a SQLite database with tables in a named schema.
//!
//! A server whose schema is `main` is the database file itself. Any other
//! schema name is attached to the connection, so every statement can address
//! `"schema"."table"` the same way.

use anyhow::{Context, Result};
use rusqlite::types::Value as SqlValue;
use rusqlite::{params, Connection, OptionalExtension};
use tracing::{debug, info};

use crate::columns::{ColumnRole, ColumnSpec};
use crate::config::ServerConfig;
use crate::table::Value;

const MAIN_SCHEMA: &str = "main";
const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.f";

pub struct Warehouse {
    conn: Connection,
    database_name: String,
    schema: String,
}

impl Warehouse {
    pub fn connect(server: &ServerConfig) -> Result<Self> {
        if let Some(parent) = server.database.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create database directory {:?}", parent))?;
        }

        let conn = if server.schema == MAIN_SCHEMA {
            Connection::open(&server.database)
        } else {
            Connection::open_in_memory()
        }
        .with_context(|| format!("Failed to open database {:?}", server.database))?;

        let warehouse = Self {
            conn,
            database_name: server.database_name(),
            schema: server.schema.clone(),
        };
        if server.schema != MAIN_SCHEMA {
            warehouse.attach(&server.database.to_string_lossy())?;
        }

        info!(
            "Connected to {} ({:?}), schema {}",
            warehouse.database_name, server.database, warehouse.schema
        );
        Ok(warehouse)
    }

    #[cfg(test)]
    pub fn open_in_memory(database_name: &str, schema: &str) -> Result<Self> {
        let warehouse = Self {
            conn: Connection::open_in_memory()?,
            database_name: database_name.to_string(),
            schema: schema.to_string(),
        };
        if schema != MAIN_SCHEMA {
            warehouse.attach(":memory:")?;
        }
        Ok(warehouse)
    }

    fn attach(&self, location: &str) -> Result<()> {
        let sql = format!("ATTACH DATABASE ?1 AS {}", quote_ident(&self.schema));
        self.conn
            .execute(&sql, params![location])
            .with_context(|| format!("Failed to attach {} as schema {}", location, self.schema))?;
        Ok(())
    }

    pub fn conn(&self) -> &Connection {
        &self.conn
    }

    pub fn database_name(&self) -> &str {
        &self.database_name
    }

    pub fn schema(&self) -> &str {
        &self.schema
    }

    /// `"schema"."table"`.
    pub fn qualified(&self, table: &str) -> String {
        format!("{}.{}", quote_ident(&self.schema), quote_ident(table))
    }

    pub fn table_exists(&self, table: &str) -> Result<bool> {
        let sql = format!(
            "SELECT 1 FROM {}.sqlite_master WHERE type = 'table' AND name = ?1",
            quote_ident(&self.schema)
        );
        let found = self
            .conn
            .query_row(&sql, params![table], |_| Ok(()))
            .optional()?;
        Ok(found.is_some())
    }

    pub fn create_table(&self, table: &str, columns: &[ColumnSpec], if_not_exists: bool) -> Result<()> {
        let definitions: Vec<String> = columns
            .iter()
            .map(|c| format!("{} {}", quote_ident(&c.name), sql_type(c.role)))
            .collect();
        let sql = format!(
            "CREATE TABLE {}{} ({})",
            if if_not_exists { "IF NOT EXISTS " } else { "" },
            self.qualified(table),
            definitions.join(", ")
        );
        debug!("{}", sql);
        self.conn
            .execute(&sql, [])
            .with_context(|| format!("Failed to create table {}", table))?;
        Ok(())
    }

    pub fn drop_table(&self, table: &str) -> Result<()> {
        let sql = format!("DROP TABLE IF EXISTS {}", self.qualified(table));
        debug!("{}", sql);
        self.conn
            .execute(&sql, [])
            .with_context(|| format!("Failed to drop table {}", table))?;
        Ok(())
    }

    pub fn count_rows(&self, table: &str) -> Result<i64> {
        let sql = format!("SELECT COUNT(*) FROM {}", self.qualified(table));
        Ok(self.conn.query_row(&sql, [], |row| row.get(0))?)
    }
}

/// Double-quote an identifier, doubling embedded quotes.
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

fn sql_type(role: ColumnRole) -> &'static str {
    match role {
        ColumnRole::Count | ColumnRole::YearNum => "INTEGER",
        ColumnRole::Amount => "REAL",
        ColumnRole::Period | ColumnRole::QuarterNum | ColumnRole::CreatedAt => "TEXT",
    }
}

pub fn to_sql_value(value: &Value) -> SqlValue {
    match value {
        Value::Text(s) => SqlValue::Text(s.clone()),
        Value::Int(Some(i)) => SqlValue::Integer(*i),
        Value::Float(Some(f)) => SqlValue::Real(*f),
        Value::Int(None) | Value::Float(None) => SqlValue::Null,
        Value::Timestamp(ts) => SqlValue::Text(ts.format(TIMESTAMP_FORMAT).to_string()),
    }
}
