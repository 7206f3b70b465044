//! ETL run configuration.
//!
//! Loaded from `configs/etl.json` (or the file named by `BULLETIN_ETL_CONFIG`).
//! Everything except the server map has a default matching the production
//! deployment, so a config file only needs to say where the databases live.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::info;

use crate::columns::SheetVariant;
use crate::period::ClassifierKind;

pub const CONFIG_PATH_ENV: &str = "BULLETIN_ETL_CONFIG";
pub const DEFAULT_CONFIG_PATH: &str = "configs/etl.json";
pub const DEST_DB_ENV: &str = "BULLETIN_DEST_DB";
pub const AUDIT_DB_ENV: &str = "BULLETIN_AUDIT_DB";

/// One warehouse server entry.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Path of the database file.
    pub database: PathBuf,
    /// Schema the tables live in. `main` uses the database file itself;
    /// anything else is attached under that name.
    #[serde(default = "default_schema")]
    pub schema: String,
    /// Name reported in audit rows. Defaults to the database file stem.
    #[serde(default)]
    pub name: Option<String>,
}

impl ServerConfig {
    pub fn database_name(&self) -> String {
        self.name.clone().unwrap_or_else(|| {
            self.database
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_else(|| self.database.display().to_string())
        })
    }
}

/// One workbook sheet and how to reshape it.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SheetSpec {
    pub name: String,
    pub variant: SheetVariant,
    pub table_prefix: String,
}

impl SheetSpec {
    pub fn new(name: &str, variant: SheetVariant, table_prefix: &str) -> Self {
        Self {
            name: name.to_string(),
            variant,
            table_prefix: table_prefix.to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct FetchConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_source_url")]
    pub url: String,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    #[serde(default = "default_retries")]
    pub retries: u32,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            url: default_source_url(),
            user_agent: default_user_agent(),
            retries: default_retries(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct EtlConfig {
    pub servers: HashMap<String, ServerConfig>,
    /// Server key of the warehouse receiving the bulletin tables.
    #[serde(default = "default_destination")]
    pub destination: String,
    /// Server key of the warehouse holding the audit tables.
    #[serde(default = "default_audit")]
    pub audit: String,
    #[serde(default = "default_intake_dir")]
    pub intake_dir: PathBuf,
    #[serde(default = "default_archive_dir")]
    pub archive_dir: PathBuf,
    #[serde(default = "default_file_pattern")]
    pub file_pattern: String,
    #[serde(default)]
    pub fetch: FetchConfig,
    /// 0-based row holding the column headers.
    #[serde(default = "default_header_row")]
    pub header_row: usize,
    #[serde(default = "default_source_descriptor")]
    pub source_descriptor: String,
    #[serde(default = "default_source_type")]
    pub source_type: String,
    #[serde(default = "default_sheets")]
    pub sheets: Vec<SheetSpec>,
    #[serde(default)]
    pub classifier: ClassifierKind,
}

impl EtlConfig {
    /// Load from `BULLETIN_ETL_CONFIG` or the default path, then apply env overrides.
    pub fn load() -> Result<Self> {
        let path = std::env::var(CONFIG_PATH_ENV)
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(DEFAULT_CONFIG_PATH));
        let mut config = Self::load_from_file(&path)?;
        config.apply_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    pub fn load_from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config: {:?}", path))?;
        let config = Self::from_json(&content)
            .with_context(|| format!("Failed to parse config: {:?}", path))?;
        info!(
            "Loaded config from {:?}: {} servers, {} sheets",
            path,
            config.servers.len(),
            config.sheets.len()
        );
        Ok(config)
    }

    pub fn from_json(content: &str) -> Result<Self> {
        Ok(serde_json::from_str(content)?)
    }

    /// Replace database paths from `BULLETIN_DEST_DB` / `BULLETIN_AUDIT_DB`.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        for (env_key, server_key) in [
            (DEST_DB_ENV, self.destination.clone()),
            (AUDIT_DB_ENV, self.audit.clone()),
        ] {
            if let (Some(path), Some(server)) = (lookup(env_key), self.servers.get_mut(&server_key)) {
                info!("{} overrides database of '{}'", env_key, server_key);
                server.database = PathBuf::from(path);
            }
        }
    }

    /// Look up a server entry by key.
    pub fn server(&self, key: &str) -> Result<&ServerConfig> {
        self.servers
            .get(key)
            .with_context(|| format!("Configuration key {} not found", key))
    }

    pub fn destination_server(&self) -> Result<&ServerConfig> {
        self.server(&self.destination)
    }

    pub fn audit_server(&self) -> Result<&ServerConfig> {
        self.server(&self.audit)
    }
}

fn default_true() -> bool {
    true
}

fn default_schema() -> String {
    "main".to_string()
}

fn default_destination() -> String {
    "ByFileDB_Extrenal_Prod".to_string()
}

fn default_audit() -> String {
    "ByDB_General_Prod".to_string()
}

fn default_intake_dir() -> PathBuf {
    PathBuf::from(".")
}

fn default_archive_dir() -> PathBuf {
    PathBuf::from("Archive")
}

fn default_file_pattern() -> String {
    "Monthly_Bulletin_*.xlsx".to_string()
}

fn default_source_url() -> String {
    "https://www.sama.gov.sa/ar-sa/EconomicReports/Pages/MonthlyStatistics.aspx".to_string()
}

fn default_user_agent() -> String {
    "Mozilla/5.0 (compatible; Googlebot/2.1; +http://www.google.com/bot.html)".to_string()
}

fn default_retries() -> u32 {
    3
}

fn default_header_row() -> usize {
    12
}

fn default_source_descriptor() -> String {
    "SAMA".to_string()
}

fn default_source_type() -> String {
    "EXCEL".to_string()
}

fn default_sheets() -> Vec<SheetSpec> {
    vec![
        SheetSpec::new(
            "30c",
            SheetVariant::FixedMapping,
            "SAMA_POINTS_OF_SALE_AND_TRANSACTIONS_by",
        ),
        SheetSpec::new(
            "30d",
            SheetVariant::SectorBreakdown,
            "SAMA_Points_of_Sale_Transactions_by_Sectors_by",
        ),
        SheetSpec::new(
            "30e",
            SheetVariant::CityBreakdown,
            "SAMA_Points_of_Sale_Transactions_by_Main_Cities_by",
        ),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"{
        "servers": {
            "ByFileDB_Extrenal_Prod": { "database": "data/external.db", "schema": "dbo" },
            "ByDB_General_Prod": { "database": "data/general.db", "name": "General" }
        }
    }"#;

    #[test]
    fn test_defaults_match_bulletin_layout() {
        let config = EtlConfig::from_json(MINIMAL).unwrap();
        assert_eq!(config.header_row, 12);
        assert_eq!(config.file_pattern, "Monthly_Bulletin_*.xlsx");
        assert_eq!(config.source_descriptor, "SAMA");
        assert_eq!(config.classifier, ClassifierKind::Boundary);
        assert!(config.fetch.enabled);

        let names: Vec<&str> = config.sheets.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["30c", "30d", "30e"]);
        assert_eq!(config.sheets[2].variant, SheetVariant::CityBreakdown);
    }

    #[test]
    fn test_server_lookup() {
        let config = EtlConfig::from_json(MINIMAL).unwrap();
        let dest = config.destination_server().unwrap();
        assert_eq!(dest.schema, "dbo");
        assert_eq!(dest.database_name(), "external");

        let audit = config.audit_server().unwrap();
        assert_eq!(audit.schema, "main");
        assert_eq!(audit.database_name(), "General");

        let err = config.server("Missing").unwrap_err();
        assert_eq!(err.to_string(), "Configuration key Missing not found");
    }

    #[test]
    fn test_env_overrides_database_paths() {
        let mut config = EtlConfig::from_json(MINIMAL).unwrap();
        config.apply_overrides(|key| (key == DEST_DB_ENV).then(|| "/tmp/override.db".to_string()));
        assert_eq!(
            config.destination_server().unwrap().database,
            PathBuf::from("/tmp/override.db")
        );
        assert_eq!(
            config.audit_server().unwrap().database,
            PathBuf::from("data/general.db")
        );
    }

    #[test]
    fn test_explicit_sheets_and_classifier() {
        let json = r#"{
            "servers": {},
            "classifier": "per_row",
            "sheets": [
                { "name": "30d", "variant": "sector_breakdown", "table_prefix": "Sectors_by" }
            ]
        }"#;
        let config = EtlConfig::from_json(json).unwrap();
        assert_eq!(config.classifier, ClassifierKind::PerRow);
        assert_eq!(
            config.sheets,
            vec![SheetSpec::new("30d", SheetVariant::SectorBreakdown, "Sectors_by")]
        );
    }
}
