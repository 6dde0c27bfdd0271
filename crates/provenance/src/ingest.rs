//! Scene ingestion
//!
//! A scene folder is verified against its manifest first; only a fully
//! verified folder is recorded, and the scene row and its asset rows are
//! written in one transaction.

use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{Error, Result};
use crate::manifest::{resolve_entry, verify_manifest, Manifest};
use crate::model::{Asset, Footprint, NewAsset, NewScene, Scene};
use crate::store::{insert_asset, insert_scene_row, is_constraint_violation, Store};

/// Scene attributes supplied by the caller
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SceneMetadata {
    pub product_id: String,
    pub satellite: String,
    pub tile: String,
    pub acquired_at: DateTime<Utc>,
    pub cloud_cover: Option<f64>,
    pub crs: Option<String>,
    pub footprint: Footprint,
    pub processing_level: String,
}

/// A scene recorded together with its assets
#[derive(Debug, Clone)]
pub struct IngestedScene {
    pub scene: Scene,
    pub assets: Vec<Asset>,
}

/// Verify `folder` and record the scene with one asset per manifest entry.
///
/// Fails with [`Error::Integrity`] (nothing written) if any declared file
/// is missing or does not match its hash or size. Asset sizes are the ones
/// measured while hashing.
pub fn ingest_scene(store: &mut Store, folder: &Path, metadata: SceneMetadata) -> Result<IngestedScene> {
    let folder = folder.canonicalize().map_err(Error::io(folder))?;
    let manifest = Manifest::load(&folder)?;
    let verified = verify_manifest(&folder, &manifest)?.into_integrity_result()?;

    let duplicate = |product_id: String| Error::DuplicateScene { product_id };
    if store.scene_by_product_id(&metadata.product_id)?.is_some() {
        return Err(duplicate(metadata.product_id));
    }

    let new_scene = NewScene {
        product_id: metadata.product_id,
        satellite: metadata.satellite,
        tile: metadata.tile,
        acquired_at: metadata.acquired_at,
        cloud_cover: metadata.cloud_cover,
        crs: metadata.crs,
        footprint: metadata.footprint,
        processing_level: metadata.processing_level,
        folder: folder.clone(),
    };

    let tx = store.immediate_transaction()?;
    // A concurrent ingest may have won since the check above.
    let scene = match insert_scene_row(&tx, &new_scene) {
        Err(Error::Database(e)) if is_constraint_violation(&e) => {
            return Err(duplicate(new_scene.product_id))
        }
        other => other?,
    };

    let mut assets = Vec::with_capacity(manifest.files.len());
    for (entry, check) in manifest.files.iter().zip(&verified.checks) {
        // Verification already rejected paths outside the folder.
        let Some(path) = resolve_entry(&folder, &entry.path) else {
            continue;
        };
        let kind = entry.kind().unwrap_or_else(|| fallback_kind(&entry.path));
        let asset = NewAsset {
            kind,
            path,
            sha256: entry.sha256.trim().to_ascii_lowercase(),
            size: check.size.or(entry.size),
        };
        assets.push(insert_asset(&tx, scene.id, &asset)?);
    }
    tx.commit()?;

    info!(
        scene_id = scene.id,
        product_id = %scene.product_id,
        assets = assets.len(),
        "ingested scene"
    );
    Ok(IngestedScene { scene, assets })
}

fn fallback_kind(path: &str) -> String {
    Path::new(path)
        .file_stem()
        .map(|s| s.to_string_lossy().to_ascii_uppercase())
        .unwrap_or_else(|| path.to_ascii_uppercase())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fallback_kind_uses_stem() {
        assert_eq!(fallback_kind("MTD_MSIL2A.xml"), "MTD_MSIL2A");
        assert_eq!(fallback_kind("qi/cloud_mask.gml"), "CLOUD_MASK");
    }

    #[test]
    fn test_missing_folder_is_io_error() {
        let mut store = Store::open_in_memory().unwrap();
        let meta = SceneMetadata {
            product_id: "S2A_NOWHERE".to_string(),
            satellite: "S2A".to_string(),
            tile: "T21LXH".to_string(),
            acquired_at: Utc::now(),
            cloud_cover: None,
            crs: None,
            footprint: Footprint::new(-55.0, -10.0, -54.0, -9.0),
            processing_level: "L2A".to_string(),
        };
        let err = ingest_scene(&mut store, Path::new("/nonexistent/sda/scene"), meta).unwrap_err();
        assert!(matches!(err, Error::Io { .. }));
        assert_eq!(store.health().unwrap().count("scenes"), Some(0));
    }
}
