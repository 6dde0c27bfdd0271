use std::path::{Path, PathBuf};

use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension, Row};
use sda_algorithms::imagery::ValueRange;

use super::{path_to_sql, usize_from_sql, Store};
use crate::error::Result;
use crate::model::{Index, IndexFeature};

const INDEX_COLUMNS: &str =
    "id, run_id, formula, path, sha256, value_min, value_max, nodata, grid_rows, grid_cols, created_at";

/// Index row about to be written
pub(crate) struct NewIndex<'a> {
    pub run_id: i64,
    pub formula: &'a str,
    pub path: &'a Path,
    pub sha256: &'a str,
    pub range: ValueRange,
    pub rows: usize,
    pub cols: usize,
}

// SQLite stores NaN as NULL, so a NULL nodata reads back as NaN.
fn index_from_row(row: &Row<'_>) -> rusqlite::Result<Index> {
    let nodata: Option<f64> = row.get(7)?;
    Ok(Index {
        id: row.get(0)?,
        run_id: row.get(1)?,
        formula: row.get(2)?,
        path: PathBuf::from(row.get::<_, String>(3)?),
        sha256: row.get(4)?,
        range: ValueRange {
            min: row.get(5)?,
            max: row.get(6)?,
            nodata: nodata.unwrap_or(f64::NAN),
        },
        rows: usize_from_sql(row.get(8)?, 8)?,
        cols: usize_from_sql(row.get(9)?, 9)?,
        created_at: row.get(10)?,
    })
}

fn feature_from_row(row: &Row<'_>) -> rusqlite::Result<IndexFeature> {
    Ok(IndexFeature {
        id: row.get(0)?,
        index_id: row.get(1)?,
        key: row.get(2)?,
        value: row.get(3)?,
        units: row.get(4)?,
    })
}

pub(crate) fn insert_index(conn: &Connection, index: &NewIndex<'_>) -> Result<Index> {
    let created_at = Utc::now();
    let nodata = Some(index.range.nodata).filter(|v| !v.is_nan());
    conn.execute(
        "INSERT INTO indices (run_id, formula, path, sha256, value_min, value_max, nodata,
                              grid_rows, grid_cols, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
        params![
            index.run_id,
            index.formula,
            path_to_sql(index.path),
            index.sha256,
            index.range.min,
            index.range.max,
            nodata,
            index.rows as i64,
            index.cols as i64,
            created_at,
        ],
    )?;

    Ok(Index {
        id: conn.last_insert_rowid(),
        run_id: index.run_id,
        formula: index.formula.to_string(),
        path: index.path.to_path_buf(),
        sha256: index.sha256.to_string(),
        range: index.range,
        rows: index.rows,
        cols: index.cols,
        created_at,
    })
}

pub(crate) fn insert_index_feature(
    conn: &Connection,
    index_id: i64,
    key: &str,
    value: f64,
    units: Option<&str>,
) -> Result<IndexFeature> {
    conn.execute(
        "INSERT INTO index_features (index_id, key, value, units) VALUES (?1, ?2, ?3, ?4)",
        params![index_id, key, value, units],
    )?;
    Ok(IndexFeature {
        id: conn.last_insert_rowid(),
        index_id,
        key: key.to_string(),
        value,
        units: units.map(str::to_string),
    })
}

pub(crate) fn index_for_run(conn: &Connection, run_id: i64, formula: &str) -> Result<Option<Index>> {
    let sql = format!("SELECT {INDEX_COLUMNS} FROM indices WHERE run_id = ?1 AND formula = ?2");
    Ok(conn
        .query_row(&sql, params![run_id, formula], index_from_row)
        .optional()?)
}

impl Store {
    pub fn index(&self, id: i64) -> Result<Option<Index>> {
        let sql = format!("SELECT {INDEX_COLUMNS} FROM indices WHERE id = ?1");
        Ok(self.conn.query_row(&sql, [id], index_from_row).optional()?)
    }

    pub fn indices_for_run(&self, run_id: i64) -> Result<Vec<Index>> {
        let sql = format!("SELECT {INDEX_COLUMNS} FROM indices WHERE run_id = ?1 ORDER BY id");
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map([run_id], index_from_row)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    pub fn index_for_run(&self, run_id: i64, formula: &str) -> Result<Option<Index>> {
        index_for_run(&self.conn, run_id, formula)
    }

    pub fn features_for_index(&self, index_id: i64) -> Result<Vec<IndexFeature>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, index_id, key, value, units FROM index_features WHERE index_id = ?1 ORDER BY id",
        )?;
        let rows = stmt.query_map([index_id], feature_from_row)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }
}
