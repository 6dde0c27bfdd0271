use serde::Serialize;

use super::schema::TABLES;
use super::{usize_from_sql, Store};
use crate::error::Result;

/// Row counts per table
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HealthReport {
    pub schema_version: i64,
    pub tables: Vec<(String, usize)>,
}

impl HealthReport {
    pub fn count(&self, table: &str) -> Option<usize> {
        self.tables
            .iter()
            .find(|(name, _)| name == table)
            .map(|(_, n)| *n)
    }
}

impl Store {
    /// Check the database answers and count rows in every table
    pub fn health(&self) -> Result<HealthReport> {
        let schema_version: i64 = self
            .conn
            .query_row("PRAGMA user_version", [], |row| row.get(0))?;

        let mut tables = Vec::with_capacity(TABLES.len());
        for table in TABLES {
            let count = self.conn.query_row(
                &format!("SELECT COUNT(*) FROM {table}"),
                [],
                |row| usize_from_sql(row.get(0)?, 0),
            )?;
            tables.push((table.to_string(), count));
        }

        Ok(HealthReport {
            schema_version,
            tables,
        })
    }
}
