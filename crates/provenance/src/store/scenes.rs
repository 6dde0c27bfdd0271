use std::path::PathBuf;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row, ToSql};

use super::{path_to_sql, Store};
use crate::error::Result;
use crate::model::{Footprint, NewScene, Scene};

const SCENE_COLUMNS: &str = "id, product_id, satellite, tile, acquired_at, cloud_cover, crs, \
     lon_min, lat_min, lon_max, lat_max, processing_level, folder, created_at";

/// Filter for [`Store::list_scenes`]; unset fields match everything
#[derive(Debug, Clone, Default)]
pub struct SceneFilter {
    pub tile: Option<String>,
    pub satellite: Option<String>,
    pub product_id: Option<String>,
    /// Inclusive lower bound on acquisition time
    pub from: Option<DateTime<Utc>>,
    /// Inclusive upper bound on acquisition time
    pub to: Option<DateTime<Utc>>,
}

fn scene_from_row(row: &Row<'_>) -> rusqlite::Result<Scene> {
    Ok(Scene {
        id: row.get(0)?,
        product_id: row.get(1)?,
        satellite: row.get(2)?,
        tile: row.get(3)?,
        acquired_at: row.get(4)?,
        cloud_cover: row.get(5)?,
        crs: row.get(6)?,
        footprint: Footprint {
            lon_min: row.get(7)?,
            lat_min: row.get(8)?,
            lon_max: row.get(9)?,
            lat_max: row.get(10)?,
        },
        processing_level: row.get(11)?,
        folder: PathBuf::from(row.get::<_, String>(12)?),
        created_at: row.get(13)?,
    })
}

pub(crate) fn insert_scene(conn: &Connection, scene: &NewScene) -> Result<Scene> {
    let created_at = Utc::now();
    conn.execute(
        "INSERT INTO scenes (product_id, satellite, tile, acquired_at, cloud_cover, crs,
                             lon_min, lat_min, lon_max, lat_max, processing_level, folder, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
        params![
            scene.product_id,
            scene.satellite,
            scene.tile,
            scene.acquired_at,
            scene.cloud_cover,
            scene.crs,
            scene.footprint.lon_min,
            scene.footprint.lat_min,
            scene.footprint.lon_max,
            scene.footprint.lat_max,
            scene.processing_level,
            path_to_sql(&scene.folder),
            created_at,
        ],
    )?;

    Ok(Scene {
        id: conn.last_insert_rowid(),
        product_id: scene.product_id.clone(),
        satellite: scene.satellite.clone(),
        tile: scene.tile.clone(),
        acquired_at: scene.acquired_at,
        cloud_cover: scene.cloud_cover,
        crs: scene.crs.clone(),
        footprint: scene.footprint,
        processing_level: scene.processing_level.clone(),
        folder: scene.folder.clone(),
        created_at,
    })
}

pub(crate) fn scene(conn: &Connection, id: i64) -> Result<Option<Scene>> {
    let sql = format!("SELECT {SCENE_COLUMNS} FROM scenes WHERE id = ?1");
    Ok(conn.query_row(&sql, [id], scene_from_row).optional()?)
}

impl Store {
    /// Insert a scene row on its own. Ingestion normally goes through
    /// [`crate::ingest::ingest_scene`], which adds the assets atomically.
    pub fn insert_scene(&self, scene: &NewScene) -> Result<Scene> {
        insert_scene(&self.conn, scene)
    }

    pub fn scene(&self, id: i64) -> Result<Option<Scene>> {
        scene(&self.conn, id)
    }

    pub fn scene_by_product_id(&self, product_id: &str) -> Result<Option<Scene>> {
        let sql = format!("SELECT {SCENE_COLUMNS} FROM scenes WHERE product_id = ?1");
        Ok(self
            .conn
            .query_row(&sql, [product_id], scene_from_row)
            .optional()?)
    }

    /// Scenes matching `filter`, ordered by acquisition time
    pub fn list_scenes(&self, filter: &SceneFilter) -> Result<Vec<Scene>> {
        let mut clauses = Vec::new();
        let mut args: Vec<&dyn ToSql> = Vec::new();

        if let Some(tile) = &filter.tile {
            args.push(tile);
            clauses.push(format!("tile = ?{}", args.len()));
        }
        if let Some(satellite) = &filter.satellite {
            args.push(satellite);
            clauses.push(format!("satellite = ?{}", args.len()));
        }
        if let Some(product_id) = &filter.product_id {
            args.push(product_id);
            clauses.push(format!("product_id = ?{}", args.len()));
        }
        if let Some(from) = &filter.from {
            args.push(from);
            clauses.push(format!("acquired_at >= ?{}", args.len()));
        }
        if let Some(to) = &filter.to {
            args.push(to);
            clauses.push(format!("acquired_at <= ?{}", args.len()));
        }

        let mut sql = format!("SELECT {SCENE_COLUMNS} FROM scenes");
        if !clauses.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&clauses.join(" AND "));
        }
        sql.push_str(" ORDER BY acquired_at, id");

        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(args.as_slice(), scene_from_row)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }
}
