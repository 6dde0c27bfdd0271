use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};

use super::Store;
use crate::error::{Error, Result};
use crate::model::{Run, RunStatus, Scene};

const RUN_COLUMNS: &str = "id, scene_id, processing_version, acquired_at, created_at, active, \
     superseded_by, status, finished_at, error";

fn run_from_row(row: &Row<'_>) -> rusqlite::Result<Run> {
    let status: String = row.get(7)?;
    let status = status.parse::<RunStatus>().map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(7, rusqlite::types::Type::Text, e.into())
    })?;
    Ok(Run {
        id: row.get(0)?,
        scene_id: row.get(1)?,
        processing_version: row.get(2)?,
        acquired_at: row.get(3)?,
        created_at: row.get(4)?,
        active: row.get(5)?,
        superseded_by: row.get(6)?,
        status,
        finished_at: row.get(8)?,
        error: row.get(9)?,
    })
}

pub(crate) fn insert_run(conn: &Connection, scene: &Scene, processing_version: &str) -> Result<Run> {
    let created_at = Utc::now();
    conn.execute(
        "INSERT INTO runs (scene_id, processing_version, acquired_at, created_at, active)
         VALUES (?1, ?2, ?3, ?4, 1)",
        params![scene.id, processing_version, scene.acquired_at, created_at],
    )?;

    Ok(Run {
        id: conn.last_insert_rowid(),
        scene_id: scene.id,
        processing_version: processing_version.to_string(),
        acquired_at: scene.acquired_at,
        created_at,
        active: true,
        superseded_by: None,
        status: RunStatus::Running,
        finished_at: None,
        error: None,
    })
}

pub(crate) fn run(conn: &Connection, id: i64) -> Result<Option<Run>> {
    let sql = format!("SELECT {RUN_COLUMNS} FROM runs WHERE id = ?1");
    Ok(conn.query_row(&sql, [id], run_from_row).optional()?)
}

/// Record the outcome of a running run and return the updated row
pub(crate) fn finish_run(
    conn: &Connection,
    run_id: i64,
    status: RunStatus,
    error: Option<&str>,
) -> Result<Run> {
    let current = run(conn, run_id)?.ok_or_else(|| Error::not_found("run", run_id))?;
    if current.status != RunStatus::Running {
        return Err(Error::UnexpectedRunStatus {
            run_id,
            status: current.status,
            expected: RunStatus::Running,
        });
    }
    conn.execute(
        "UPDATE runs SET status = ?2, finished_at = ?3, error = ?4 WHERE id = ?1",
        params![run_id, status.as_str(), Utc::now(), error],
    )?;
    run(conn, run_id)?.ok_or_else(|| Error::not_found("run", run_id))
}

/// Clear the active flag so a replacement can take the slot
pub(crate) fn deactivate_run(conn: &Connection, run_id: i64) -> Result<()> {
    conn.execute("UPDATE runs SET active = 0 WHERE id = ?1", [run_id])?;
    Ok(())
}

/// Point an inactive run at the run that replaced it
pub(crate) fn mark_superseded(conn: &Connection, run_id: i64, replacement: i64) -> Result<()> {
    conn.execute(
        "UPDATE runs SET superseded_by = ?2 WHERE id = ?1 AND active = 0",
        params![run_id, replacement],
    )?;
    Ok(())
}

pub(crate) fn active_run(
    conn: &Connection,
    scene_id: i64,
    processing_version: &str,
) -> Result<Option<Run>> {
    let sql = format!(
        "SELECT {RUN_COLUMNS} FROM runs WHERE scene_id = ?1 AND processing_version = ?2 AND active = 1"
    );
    Ok(conn
        .query_row(&sql, params![scene_id, processing_version], run_from_row)
        .optional()?)
}

impl Store {
    pub fn run(&self, id: i64) -> Result<Option<Run>> {
        run(&self.conn, id)
    }

    /// All runs of a scene, oldest first, superseded ones included
    pub fn runs_for_scene(&self, scene_id: i64) -> Result<Vec<Run>> {
        let sql = format!("SELECT {RUN_COLUMNS} FROM runs WHERE scene_id = ?1 ORDER BY created_at, id");
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map([scene_id], run_from_row)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    pub fn active_run(&self, scene_id: i64, processing_version: &str) -> Result<Option<Run>> {
        active_run(&self.conn, scene_id, processing_version)
    }

    /// Runs whose scene was acquired within `[from, to]`, in time order
    pub fn runs_in_range(&self, from: DateTime<Utc>, to: DateTime<Utc>) -> Result<Vec<Run>> {
        let sql = format!(
            "SELECT {RUN_COLUMNS} FROM runs WHERE acquired_at >= ?1 AND acquired_at <= ?2
             ORDER BY acquired_at, created_at, id"
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(params![from, to], run_from_row)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }
}
