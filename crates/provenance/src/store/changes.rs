use std::str::FromStr;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, Row};
use sda_algorithms::imagery::{ChangeClass, Connectivity, PixelBounds};

use super::{usize_from_sql, Store};
use crate::error::Result;
use crate::model::ChangeEvent;

const EVENT_COLUMNS: &str = "id, baseline_run_id, comparison_run_id, baseline_scene_id, \
     comparison_scene_id, formula, threshold, min_pixels, connectivity, geometry, \
     row_min, col_min, row_max, col_max, pixel_count, magnitude, classification, created_at";

/// Change event row about to be written
pub(crate) struct NewChangeEvent<'a> {
    pub baseline_run_id: i64,
    pub comparison_run_id: i64,
    pub baseline_scene_id: i64,
    pub comparison_scene_id: i64,
    pub formula: &'a str,
    pub threshold: f64,
    pub min_pixels: usize,
    pub connectivity: Connectivity,
    pub geometry: String,
    pub pixel_bounds: PixelBounds,
    pub pixel_count: usize,
    pub magnitude: f64,
    pub classification: ChangeClass,
}

fn event_from_row(row: &Row<'_>) -> rusqlite::Result<ChangeEvent> {
    let neighbours: u8 = row.get(8)?;
    let connectivity = Connectivity::from_neighbours(neighbours)
        .ok_or(rusqlite::Error::IntegralValueOutOfRange(8, i64::from(neighbours)))?;
    let classification: String = row.get(16)?;
    let classification = ChangeClass::from_str(&classification).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(16, rusqlite::types::Type::Text, Box::new(e))
    })?;
    Ok(ChangeEvent {
        id: row.get(0)?,
        baseline_run_id: row.get(1)?,
        comparison_run_id: row.get(2)?,
        baseline_scene_id: row.get(3)?,
        comparison_scene_id: row.get(4)?,
        formula: row.get(5)?,
        threshold: row.get(6)?,
        min_pixels: usize_from_sql(row.get(7)?, 7)?,
        connectivity,
        geometry: row.get(9)?,
        pixel_bounds: PixelBounds {
            row_min: usize_from_sql(row.get(10)?, 10)?,
            col_min: usize_from_sql(row.get(11)?, 11)?,
            row_max: usize_from_sql(row.get(12)?, 12)?,
            col_max: usize_from_sql(row.get(13)?, 13)?,
        },
        pixel_count: usize_from_sql(row.get(14)?, 14)?,
        magnitude: row.get(15)?,
        classification,
        created_at: row.get(17)?,
    })
}

pub(crate) fn insert_change_event(
    conn: &Connection,
    event: &NewChangeEvent<'_>,
    created_at: DateTime<Utc>,
) -> Result<ChangeEvent> {
    conn.execute(
        "INSERT INTO change_events (baseline_run_id, comparison_run_id, baseline_scene_id,
                                    comparison_scene_id, formula, threshold, min_pixels,
                                    connectivity, geometry, row_min, col_min, row_max,
                                    col_max, pixel_count, magnitude, classification, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17)",
        params![
            event.baseline_run_id,
            event.comparison_run_id,
            event.baseline_scene_id,
            event.comparison_scene_id,
            event.formula,
            event.threshold,
            event.min_pixels as i64,
            event.connectivity.neighbours(),
            event.geometry,
            event.pixel_bounds.row_min as i64,
            event.pixel_bounds.col_min as i64,
            event.pixel_bounds.row_max as i64,
            event.pixel_bounds.col_max as i64,
            event.pixel_count as i64,
            event.magnitude,
            event.classification.as_str(),
            created_at,
        ],
    )?;

    Ok(ChangeEvent {
        id: conn.last_insert_rowid(),
        baseline_run_id: event.baseline_run_id,
        comparison_run_id: event.comparison_run_id,
        baseline_scene_id: event.baseline_scene_id,
        comparison_scene_id: event.comparison_scene_id,
        formula: event.formula.to_string(),
        threshold: event.threshold,
        min_pixels: event.min_pixels,
        connectivity: event.connectivity,
        geometry: event.geometry.clone(),
        pixel_bounds: event.pixel_bounds,
        pixel_count: event.pixel_count,
        magnitude: event.magnitude,
        classification: event.classification,
        created_at,
    })
}

impl Store {
    /// Events detected between two runs, in insertion order
    pub fn change_events_for_run_pair(
        &self,
        baseline_run_id: i64,
        comparison_run_id: i64,
    ) -> Result<Vec<ChangeEvent>> {
        let sql = format!(
            "SELECT {EVENT_COLUMNS} FROM change_events
             WHERE baseline_run_id = ?1 AND comparison_run_id = ?2 ORDER BY id"
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(params![baseline_run_id, comparison_run_id], event_from_row)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    /// Events where the scene is either side of the comparison
    pub fn change_events_for_scene(&self, scene_id: i64) -> Result<Vec<ChangeEvent>> {
        let sql = format!(
            "SELECT {EVENT_COLUMNS} FROM change_events
             WHERE baseline_scene_id = ?1 OR comparison_scene_id = ?1 ORDER BY id"
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map([scene_id], event_from_row)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    /// Events detected within `[from, to]`
    pub fn change_events_in_range(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<ChangeEvent>> {
        let sql = format!(
            "SELECT {EVENT_COLUMNS} FROM change_events
             WHERE created_at >= ?1 AND created_at <= ?2 ORDER BY created_at, id"
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(params![from, to], event_from_row)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }
}
