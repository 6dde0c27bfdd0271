//! Change detection between two runs
//!
//! [`ChangeDetector::detect`] checks that the runs are comparable, loads
//! both index artifacts after re-hashing them, and prepares the change
//! regions. Nothing is written until [`ChangeDetector::persist`], which
//! stores the full grouping parameters with every event.

use chrono::Utc;
use sda_algorithms::imagery::{ChangeParams, ChangeRegion, ChangeRegions, Formula};
use sda_core::Raster;
use tracing::info;

use crate::artifacts::read_verified;
use crate::error::{Error, Result};
use crate::model::{ChangeEvent, Index, Run, RunStatus, Scene, FOOTPRINT_TOLERANCE_DEG};
use crate::store::{insert_change_event, NewChangeEvent, Store};

/// Change regions between a baseline and a comparison run
#[derive(Debug, Clone)]
pub struct ChangeSet {
    baseline: Run,
    comparison: Run,
    formula: Formula,
    regions: ChangeRegions,
}

impl ChangeSet {
    pub fn baseline(&self) -> &Run {
        &self.baseline
    }

    pub fn comparison(&self) -> &Run {
        &self.comparison
    }

    pub fn formula(&self) -> Formula {
        self.formula
    }

    pub fn params(&self) -> &ChangeParams {
        self.regions.params()
    }

    /// `comparison - baseline`, NaN where either side is nodata
    pub fn difference(&self) -> &Raster<f64> {
        self.regions.difference()
    }

    /// Lazily scan for change regions.
    ///
    /// Each call starts a new scan.
    pub fn events(&self) -> impl Iterator<Item = ChangeRegion> + '_ {
        self.regions.iter()
    }
}

/// Compares index outputs of two runs
pub struct ChangeDetector;

impl ChangeDetector {
    /// Prepare the change set for `formula` between two runs.
    ///
    /// Checks run in this order:
    /// [`Error::InvalidRunOrder`] unless the baseline is strictly older than
    /// the comparison, [`Error::UnexpectedRunStatus`] unless both runs
    /// succeeded, [`Error::FootprintMismatch`] when the scenes differ in
    /// tile or bounding box, and [`Error::MissingIndex`] when either run
    /// lacks the index.
    pub fn detect(
        store: &Store,
        baseline: &Run,
        comparison: &Run,
        formula: Formula,
        params: ChangeParams,
    ) -> Result<ChangeSet> {
        if baseline.timestamp() >= comparison.timestamp() {
            return Err(Error::InvalidRunOrder {
                baseline: baseline.id,
                comparison: comparison.id,
                reason: format!(
                    "baseline acquired {} (created {}), comparison acquired {} (created {})",
                    baseline.acquired_at,
                    baseline.created_at,
                    comparison.acquired_at,
                    comparison.created_at
                ),
            });
        }

        // Callers may hold a copy taken before the run finished.
        let baseline = load_finished_run(store, baseline.id)?;
        let comparison = load_finished_run(store, comparison.id)?;

        let baseline_scene = load_scene(store, baseline.scene_id)?;
        let comparison_scene = load_scene(store, comparison.scene_id)?;
        check_footprint(&baseline_scene, &comparison_scene)?;

        let find_index = |run: &Run| -> Result<Index> {
            store
                .index_for_run(run.id, formula.id())?
                .ok_or_else(|| Error::MissingIndex {
                    run_id: run.id,
                    formula: formula.id().to_string(),
                })
        };
        let baseline_index = find_index(&baseline)?;
        let comparison_index = find_index(&comparison)?;

        let before = read_verified(&baseline_index.path, &baseline_index.sha256)?;
        let after = read_verified(&comparison_index.path, &comparison_index.sha256)?;
        let regions = ChangeRegions::new(&before, &after, params)?;

        Ok(ChangeSet {
            baseline,
            comparison,
            formula,
            regions,
        })
    }

    /// Write every region of `change_set` as a change event, atomically.
    pub fn persist(store: &mut Store, change_set: &ChangeSet) -> Result<Vec<ChangeEvent>> {
        let formula = change_set.formula.id();
        let params = change_set.params();
        let created_at = Utc::now();

        let tx = store.immediate_transaction()?;
        let mut events = Vec::new();
        for region in change_set.events() {
            let event = NewChangeEvent {
                baseline_run_id: change_set.baseline.id,
                comparison_run_id: change_set.comparison.id,
                baseline_scene_id: change_set.baseline.scene_id,
                comparison_scene_id: change_set.comparison.scene_id,
                formula,
                threshold: params.threshold,
                min_pixels: params.min_pixels,
                connectivity: params.connectivity,
                geometry: region.wkt(),
                pixel_bounds: region.pixel_bounds,
                pixel_count: region.pixel_count(),
                magnitude: region.magnitude,
                classification: region.class,
            };
            events.push(insert_change_event(&tx, &event, created_at)?);
        }
        tx.commit()?;

        info!(
            baseline = change_set.baseline.id,
            comparison = change_set.comparison.id,
            formula,
            events = events.len(),
            "persisted change events"
        );
        Ok(events)
    }
}

fn load_finished_run(store: &Store, run_id: i64) -> Result<Run> {
    let run = store
        .run(run_id)?
        .ok_or_else(|| Error::not_found("run", run_id))?;
    if run.status != RunStatus::Succeeded {
        return Err(Error::UnexpectedRunStatus {
            run_id,
            status: run.status,
            expected: RunStatus::Succeeded,
        });
    }
    Ok(run)
}

fn load_scene(store: &Store, scene_id: i64) -> Result<Scene> {
    store
        .scene(scene_id)?
        .ok_or_else(|| Error::not_found("scene", scene_id))
}

fn check_footprint(baseline: &Scene, comparison: &Scene) -> Result<()> {
    let mismatch = |reason: String| Error::FootprintMismatch {
        baseline_scene: baseline.id,
        comparison_scene: comparison.id,
        reason,
    };

    if baseline.tile != comparison.tile {
        return Err(mismatch(format!(
            "tile {} vs {}",
            baseline.tile, comparison.tile
        )));
    }
    if !baseline
        .footprint
        .matches(&comparison.footprint, FOOTPRINT_TOLERANCE_DEG)
    {
        return Err(mismatch(format!(
            "bbox {} vs {}",
            baseline.footprint.wkt(),
            comparison.footprint.wkt()
        )));
    }
    Ok(())
}
