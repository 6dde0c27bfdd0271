use std::path::PathBuf;

use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension, Row};

use super::{path_to_sql, Store};
use crate::error::Result;
use crate::model::{Asset, NewAsset};

const ASSET_COLUMNS: &str = "id, scene_id, kind, path, sha256, size, created_at";

fn asset_from_row(row: &Row<'_>) -> rusqlite::Result<Asset> {
    let size: Option<i64> = row.get(5)?;
    Ok(Asset {
        id: row.get(0)?,
        scene_id: row.get(1)?,
        kind: row.get(2)?,
        path: PathBuf::from(row.get::<_, String>(3)?),
        sha256: row.get(4)?,
        size: size.map(|s| s as u64),
        created_at: row.get(6)?,
    })
}

pub(crate) fn insert_asset(conn: &Connection, scene_id: i64, asset: &NewAsset) -> Result<Asset> {
    let created_at = Utc::now();
    conn.execute(
        "INSERT INTO assets (scene_id, kind, path, sha256, size, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            scene_id,
            asset.kind,
            path_to_sql(&asset.path),
            asset.sha256,
            asset.size.map(|s| s as i64),
            created_at,
        ],
    )?;

    Ok(Asset {
        id: conn.last_insert_rowid(),
        scene_id,
        kind: asset.kind.clone(),
        path: asset.path.clone(),
        sha256: asset.sha256.clone(),
        size: asset.size,
        created_at,
    })
}

impl Store {
    pub fn assets_for_scene(&self, scene_id: i64) -> Result<Vec<Asset>> {
        let sql = format!("SELECT {ASSET_COLUMNS} FROM assets WHERE scene_id = ?1 ORDER BY id");
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map([scene_id], asset_from_row)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    /// First asset of the given kind, when the scene declares several
    pub fn asset_by_kind(&self, scene_id: i64, kind: &str) -> Result<Option<Asset>> {
        let sql = format!(
            "SELECT {ASSET_COLUMNS} FROM assets WHERE scene_id = ?1 AND kind = ?2 ORDER BY id LIMIT 1"
        );
        Ok(self
            .conn
            .query_row(&sql, params![scene_id, kind], asset_from_row)
            .optional()?)
    }
}
