//! Relational schema
//!
//! Every table is append-only. Triggers reject deletes and updates, except
//! for the `active`/`superseded_by` columns of `runs` and a run's outcome
//! columns, which can be written once while it is still running. The
//! partial unique index on `runs` is what keeps a single active run per
//! (scene, processing version).

use rusqlite::Connection;

use crate::error::Result;

pub const SCHEMA_VERSION: i64 = 1;

const SCHEMA_V1: &str = "
CREATE TABLE IF NOT EXISTS scenes (
    id               INTEGER PRIMARY KEY AUTOINCREMENT,
    product_id       TEXT NOT NULL UNIQUE,
    satellite        TEXT NOT NULL,
    tile             TEXT NOT NULL,
    acquired_at      TEXT NOT NULL,
    cloud_cover      REAL,
    crs              TEXT,
    lon_min          REAL NOT NULL,
    lat_min          REAL NOT NULL,
    lon_max          REAL NOT NULL,
    lat_max          REAL NOT NULL,
    processing_level TEXT NOT NULL,
    folder           TEXT NOT NULL,
    created_at       TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_scenes_tile ON scenes(tile);
CREATE INDEX IF NOT EXISTS idx_scenes_acquired_at ON scenes(acquired_at);

CREATE TABLE IF NOT EXISTS assets (
    id         INTEGER PRIMARY KEY AUTOINCREMENT,
    scene_id   INTEGER NOT NULL REFERENCES scenes(id),
    kind       TEXT NOT NULL,
    path       TEXT NOT NULL,
    sha256     TEXT NOT NULL,
    size       INTEGER,
    created_at TEXT NOT NULL,
    UNIQUE (scene_id, path)
);
CREATE INDEX IF NOT EXISTS idx_assets_scene_kind ON assets(scene_id, kind);

CREATE TABLE IF NOT EXISTS runs (
    id                 INTEGER PRIMARY KEY AUTOINCREMENT,
    scene_id           INTEGER NOT NULL REFERENCES scenes(id),
    processing_version TEXT NOT NULL,
    acquired_at        TEXT NOT NULL,
    created_at         TEXT NOT NULL,
    active             INTEGER NOT NULL DEFAULT 1 CHECK (active IN (0, 1)),
    superseded_by      INTEGER REFERENCES runs(id),
    status             TEXT NOT NULL DEFAULT 'running'
                       CHECK (status IN ('running', 'succeeded', 'failed')),
    finished_at        TEXT,
    error              TEXT
);
CREATE UNIQUE INDEX IF NOT EXISTS idx_runs_one_active
    ON runs(scene_id, processing_version) WHERE active = 1;
CREATE INDEX IF NOT EXISTS idx_runs_acquired_at ON runs(acquired_at);

CREATE TABLE IF NOT EXISTS indices (
    id         INTEGER PRIMARY KEY AUTOINCREMENT,
    run_id     INTEGER NOT NULL REFERENCES runs(id),
    formula    TEXT NOT NULL,
    path       TEXT NOT NULL,
    sha256     TEXT NOT NULL,
    value_min  REAL,
    value_max  REAL,
    nodata     REAL,
    grid_rows  INTEGER NOT NULL,
    grid_cols  INTEGER NOT NULL,
    created_at TEXT NOT NULL,
    UNIQUE (run_id, formula)
);

CREATE TABLE IF NOT EXISTS index_features (
    id       INTEGER PRIMARY KEY AUTOINCREMENT,
    index_id INTEGER NOT NULL REFERENCES indices(id),
    key      TEXT NOT NULL,
    value    REAL NOT NULL,
    units    TEXT,
    UNIQUE (index_id, key)
);

CREATE TABLE IF NOT EXISTS change_events (
    id                  INTEGER PRIMARY KEY AUTOINCREMENT,
    baseline_run_id     INTEGER NOT NULL REFERENCES runs(id),
    comparison_run_id   INTEGER NOT NULL REFERENCES runs(id),
    baseline_scene_id   INTEGER NOT NULL REFERENCES scenes(id),
    comparison_scene_id INTEGER NOT NULL REFERENCES scenes(id),
    formula             TEXT NOT NULL,
    threshold           REAL NOT NULL,
    min_pixels          INTEGER NOT NULL,
    connectivity        INTEGER NOT NULL CHECK (connectivity IN (4, 8)),
    geometry            TEXT NOT NULL,
    row_min             INTEGER NOT NULL,
    col_min             INTEGER NOT NULL,
    row_max             INTEGER NOT NULL,
    col_max             INTEGER NOT NULL,
    pixel_count         INTEGER NOT NULL,
    magnitude           REAL NOT NULL,
    classification      TEXT NOT NULL CHECK (classification IN ('loss', 'gain')),
    created_at          TEXT NOT NULL,
    CHECK (baseline_run_id <> comparison_run_id)
);
CREATE INDEX IF NOT EXISTS idx_change_events_runs
    ON change_events(baseline_run_id, comparison_run_id);
CREATE INDEX IF NOT EXISTS idx_change_events_created_at ON change_events(created_at);

CREATE TRIGGER IF NOT EXISTS scenes_append_only_update BEFORE UPDATE ON scenes
BEGIN SELECT RAISE(ABORT, 'scenes are append-only'); END;
CREATE TRIGGER IF NOT EXISTS scenes_append_only_delete BEFORE DELETE ON scenes
BEGIN SELECT RAISE(ABORT, 'scenes are append-only'); END;

CREATE TRIGGER IF NOT EXISTS assets_append_only_update BEFORE UPDATE ON assets
BEGIN SELECT RAISE(ABORT, 'assets are append-only'); END;
CREATE TRIGGER IF NOT EXISTS assets_append_only_delete BEFORE DELETE ON assets
BEGIN SELECT RAISE(ABORT, 'assets are append-only'); END;

CREATE TRIGGER IF NOT EXISTS runs_identity_update
BEFORE UPDATE OF id, scene_id, processing_version, acquired_at, created_at ON runs
BEGIN SELECT RAISE(ABORT, 'run identity is immutable'); END;
CREATE TRIGGER IF NOT EXISTS runs_outcome_once
BEFORE UPDATE OF status, finished_at, error ON runs
WHEN OLD.status <> 'running'
BEGIN SELECT RAISE(ABORT, 'run outcome is already recorded'); END;
CREATE TRIGGER IF NOT EXISTS runs_append_only_delete BEFORE DELETE ON runs
BEGIN SELECT RAISE(ABORT, 'runs are append-only'); END;

CREATE TRIGGER IF NOT EXISTS indices_append_only_update BEFORE UPDATE ON indices
BEGIN SELECT RAISE(ABORT, 'indices are append-only'); END;
CREATE TRIGGER IF NOT EXISTS indices_append_only_delete BEFORE DELETE ON indices
BEGIN SELECT RAISE(ABORT, 'indices are append-only'); END;

CREATE TRIGGER IF NOT EXISTS index_features_append_only_update BEFORE UPDATE ON index_features
BEGIN SELECT RAISE(ABORT, 'index features are append-only'); END;
CREATE TRIGGER IF NOT EXISTS index_features_append_only_delete BEFORE DELETE ON index_features
BEGIN SELECT RAISE(ABORT, 'index features are append-only'); END;

CREATE TRIGGER IF NOT EXISTS change_events_append_only_update BEFORE UPDATE ON change_events
BEGIN SELECT RAISE(ABORT, 'change events are append-only'); END;
CREATE TRIGGER IF NOT EXISTS change_events_append_only_delete BEFORE DELETE ON change_events
BEGIN SELECT RAISE(ABORT, 'change events are append-only'); END;
";

/// Tables reported by the health check, in creation order
pub const TABLES: [&str; 6] = [
    "scenes",
    "assets",
    "runs",
    "indices",
    "index_features",
    "change_events",
];

fn schema_version(conn: &Connection) -> Result<i64> {
    Ok(conn.query_row("PRAGMA user_version", [], |row| row.get(0))?)
}

/// Bring the database up to [`SCHEMA_VERSION`]
pub fn migrate(conn: &Connection) -> Result<()> {
    let current = schema_version(conn)?;
    if current < 1 {
        conn.execute_batch(SCHEMA_V1)?;
        conn.pragma_update(None, "user_version", SCHEMA_VERSION)?;
    }
    Ok(())
}
