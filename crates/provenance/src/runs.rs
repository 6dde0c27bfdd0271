//! Run versioning and index registration
//!
//! A run is one processing pass over a scene under a processing version.
//! At most one run per (scene, version) is active; older runs stay in the
//! store, flagged inactive and linked to their replacement. A run starts
//! out `running` and is finished exactly once, as `succeeded` or `failed`.

use std::path::PathBuf;

use sda_algorithms::imagery::{compute, Formula, IndexOutput};
use tracing::{debug, info, warn};

use crate::artifacts::{run_dir, write_artifact};
use crate::band_reader::BandReader;
use crate::config::Config;
use crate::error::{Error, Result};
use crate::model::{Index, Run, RunStatus, Scene};
use crate::store::{
    active_run_in, deactivate_run, finish_run, index_for_run_in, insert_index,
    insert_index_feature, insert_run, is_constraint_violation, mark_superseded, run_in, NewIndex,
    Store,
};

/// What `start_run` does when the scene already has an active run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StartMode {
    /// Fail with [`Error::DuplicateRun`]
    #[default]
    Exclusive,
    /// Deactivate the current run and link it to the new one
    Supersede,
}

/// Result of computing several formulas for a run
#[derive(Debug)]
pub struct ComputeOutcome {
    /// The run as finished
    pub run: Run,
    pub recorded: Vec<Index>,
    /// Formulas skipped because their bands were not on one grid
    pub skipped: Vec<(Formula, String)>,
}

/// Creates runs and registers their index artifacts
#[derive(Debug, Clone)]
pub struct RunManager {
    artifacts_dir: PathBuf,
}

impl RunManager {
    pub fn new(artifacts_dir: impl Into<PathBuf>) -> Self {
        Self {
            artifacts_dir: artifacts_dir.into(),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(config.artifacts_dir())
    }

    pub fn artifacts_dir(&self) -> &PathBuf {
        &self.artifacts_dir
    }

    /// Create the active run for `(scene, processing_version)`.
    ///
    /// The check and the insert share one IMMEDIATE transaction, and the
    /// partial unique index on active runs rejects any insert that slips
    /// past the check, so concurrent callers see exactly one winner.
    pub fn start_run(
        &self,
        store: &mut Store,
        scene: &Scene,
        processing_version: &str,
        mode: StartMode,
    ) -> Result<Run> {
        let duplicate = || Error::DuplicateRun {
            scene_id: scene.id,
            processing_version: processing_version.to_string(),
        };

        let tx = store.immediate_transaction()?;
        let prior = active_run_in(&tx, scene.id, processing_version)?;

        if let Some(prior) = &prior {
            match mode {
                StartMode::Exclusive => return Err(duplicate()),
                StartMode::Supersede => deactivate_run(&tx, prior.id)?,
            }
        }

        let run = match insert_run(&tx, scene, processing_version) {
            Ok(run) => run,
            Err(Error::Database(e)) if is_constraint_violation(&e) => return Err(duplicate()),
            Err(e) => return Err(e),
        };
        if let Some(prior) = &prior {
            mark_superseded(&tx, prior.id, run.id)?;
        }
        tx.commit()?;

        match prior {
            Some(prior) => info!(
                run_id = run.id,
                scene_id = scene.id,
                version = processing_version,
                superseded = prior.id,
                "started run"
            ),
            None => info!(
                run_id = run.id,
                scene_id = scene.id,
                version = processing_version,
                "started run"
            ),
        }
        Ok(run)
    }

    /// Record the outcome of a running run.
    ///
    /// Fails with [`Error::UnexpectedRunStatus`] if the run already finished.
    pub fn finish_run(
        &self,
        store: &mut Store,
        run: &Run,
        status: RunStatus,
        error: Option<&str>,
    ) -> Result<Run> {
        let tx = store.immediate_transaction()?;
        let finished = finish_run(&tx, run.id, status, error)?;
        tx.commit()?;
        info!(run_id = run.id, status = %status, "finished run");
        Ok(finished)
    }

    /// Write the index artifact and register it with its features.
    ///
    /// The write lock is taken before the duplicate check, so the artifact
    /// name is free or only held by a file no row points at. The artifact
    /// is removed again if the transaction does not commit.
    pub fn record_index(&self, store: &mut Store, run: &Run, output: &IndexOutput) -> Result<Index> {
        let formula = output.formula;
        let tx = store.immediate_transaction()?;
        if index_for_run_in(&tx, run.id, formula.id())?.is_some() {
            return Err(Error::DuplicateIndex {
                run_id: run.id,
                formula: formula.id().to_string(),
            });
        }

        let dir = run_dir(&self.artifacts_dir, run.id);
        let (guard, sha256) = write_artifact(&dir, &format!("{}.tif", formula.id()), &output.raster)?;
        let (rows, cols) = output.raster.shape();

        let index = insert_index(
            &tx,
            &NewIndex {
                run_id: run.id,
                formula: formula.id(),
                path: guard.path(),
                sha256: &sha256,
                range: output.range,
                rows,
                cols,
            },
        )?;
        for (key, value, units) in index_features(output) {
            insert_index_feature(&tx, index.id, key, value, units)?;
        }
        tx.commit()?;
        guard.commit();

        debug!(run_id = run.id, formula = %formula, index_id = index.id, "recorded index");
        Ok(index)
    }

    /// Compute and record each formula from the run's scene bands, then
    /// finish the run.
    ///
    /// A formula whose bands are not aligned is skipped and reported; any
    /// other failure aborts and leaves the run `failed` with the error text.
    /// Only a `running` run can be computed.
    pub fn compute_indices(
        &self,
        store: &mut Store,
        reader: &BandReader,
        run: &Run,
        formulas: &[Formula],
    ) -> Result<ComputeOutcome> {
        let stored = run_in(store.connection(), run.id)?
            .ok_or_else(|| Error::not_found("run", run.id))?;
        if stored.status != RunStatus::Running {
            return Err(Error::UnexpectedRunStatus {
                run_id: run.id,
                status: stored.status,
                expected: RunStatus::Running,
            });
        }

        let mut recorded = Vec::new();
        let mut skipped = Vec::new();
        let result = self.compute_each(store, reader, run, formulas, &mut recorded, &mut skipped);

        if let Err(err) = result {
            let reason = err.to_string();
            if let Err(finish_err) = self.finish_run(store, run, RunStatus::Failed, Some(&reason)) {
                warn!(run_id = run.id, error = %finish_err, "could not mark run failed");
            }
            return Err(err);
        }
        let run = self.finish_run(store, run, RunStatus::Succeeded, None)?;

        info!(
            run_id = run.id,
            recorded = recorded.len(),
            skipped = skipped.len(),
            "computed indices"
        );
        Ok(ComputeOutcome {
            run,
            recorded,
            skipped,
        })
    }

    fn compute_each(
        &self,
        store: &mut Store,
        reader: &BandReader,
        run: &Run,
        formulas: &[Formula],
        recorded: &mut Vec<Index>,
        skipped: &mut Vec<(Formula, String)>,
    ) -> Result<()> {
        for &formula in formulas {
            let bands = match reader.read_for_formula(store, run.scene_id, formula) {
                Ok(bands) => bands,
                Err(err @ Error::GridMismatch { .. }) => {
                    warn!(run_id = run.id, formula = %formula, error = %err, "skipping formula");
                    skipped.push((formula, err.to_string()));
                    continue;
                }
                Err(err) => return Err(err),
            };

            let output = compute(formula, &bands)?;
            recorded.push(self.record_index(store, run, &output)?);
        }
        Ok(())
    }
}

/// Scalar summaries stored next to an index
fn index_features(output: &IndexOutput) -> Vec<(&'static str, f64, Option<&'static str>)> {
    let stats = output.raster.statistics();
    let total = output.raster.len();
    let mut features = vec![("valid_count", stats.valid_count as f64, Some("cells"))];
    if total > 0 {
        features.push(("valid_ratio", stats.valid_count as f64 / total as f64, None));
    }
    if let Some(mean) = stats.mean {
        features.push(("mean", mean, None));
    }
    if let Some(std_dev) = stats.std_dev {
        features.push(("std", std_dev, None));
    }
    features
}
