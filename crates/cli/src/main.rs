//! sda CLI - Sentinel-2 deforestation pipeline

mod settings;

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use std::path::PathBuf;
use std::time::Instant;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use sda_algorithms::imagery::{ChangeParams, Connectivity, Formula};
use sda_provenance::{
    ingest_scene, verify, BandReader, ChangeDetector, ChangeEvent, Config, Footprint, RunManager,
    Scene, SceneMetadata, StartMode, Store,
};

// ─── CLI structure ──────────────────────────────────────────────────────

#[derive(Parser)]
#[command(name = "sda")]
#[command(author, version, about = "Sentinel-2 deforestation analysis", long_about = None)]
struct Cli {
    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Configuration file (defaults to ./sda.toml when present)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Override the data directory
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// Print results as JSON
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check a scene folder against its manifest without recording anything
    Verify {
        /// Scene folder containing manifest.json
        folder: PathBuf,
    },
    /// Verify a scene folder and record the scene and its assets
    Ingest {
        /// Scene folder containing manifest.json
        folder: PathBuf,
        /// Product identifier, unique per scene
        #[arg(long)]
        product_id: String,
        /// MGRS tile, e.g. T21LXH
        #[arg(long)]
        tile: String,
        /// Acquisition time (RFC 3339)
        #[arg(long)]
        acquired_at: DateTime<Utc>,
        /// Footprint as lon_min,lat_min,lon_max,lat_max
        #[arg(long)]
        bbox: String,
        #[arg(long, default_value = "S2A")]
        satellite: String,
        /// Cloud cover percentage
        #[arg(long)]
        cloud_cover: Option<f64>,
        /// e.g. EPSG:32721
        #[arg(long)]
        crs: Option<String>,
        #[arg(long, default_value = "L2A")]
        level: String,
    },
    /// Start a run for a scene and compute spectral indices
    Compute {
        /// Product identifier of an ingested scene
        product_id: String,
        /// Index to compute (repeatable); defaults to the configured list
        #[arg(short, long = "index")]
        indices: Vec<String>,
        /// Processing version (defaults to the configured one)
        #[arg(long)]
        processing_version: Option<String>,
        /// Replace the scene's active run instead of failing
        #[arg(long)]
        supersede: bool,
    },
    /// Compare an index between two runs and record change events
    Detect {
        /// Baseline run id
        baseline: i64,
        /// Comparison run id
        comparison: i64,
        /// Index to compare
        #[arg(short, long, default_value = "ndvi")]
        index: String,
        /// Minimum absolute difference
        #[arg(short, long)]
        threshold: Option<f64>,
        /// Smallest region kept, in cells
        #[arg(long)]
        min_pixels: Option<usize>,
        /// Region connectivity: 4 or 8
        #[arg(long)]
        connectivity: Option<Connectivity>,
        /// Report regions without recording them
        #[arg(long)]
        dry_run: bool,
    },
    /// List a scene's runs
    Runs {
        /// Product identifier of an ingested scene
        product_id: String,
    },
    /// List recorded change events
    Changes {
        /// Only events involving this product
        #[arg(long)]
        scene: Option<String>,
        /// Earliest detection time (RFC 3339)
        #[arg(long)]
        from: Option<DateTime<Utc>>,
        /// Latest detection time (RFC 3339)
        #[arg(long)]
        to: Option<DateTime<Utc>>,
    },
    /// Show schema version and row counts
    Health,
}

// ─── Helpers ────────────────────────────────────────────────────────────

fn setup_logging(level: Level) -> Result<()> {
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber).context("Failed to set up logging")
}

fn spinner(msg: &str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::default_spinner()
            .template("{spinner:.green} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );
    pb.set_message(msg.to_string());
    pb.enable_steady_tick(std::time::Duration::from_millis(100));
    pb
}

fn done(what: &str, elapsed: std::time::Duration) {
    eprintln!("{}", what);
    eprintln!("  Processing time: {:.2?}", elapsed);
}

fn resolve_config(cli: &Cli) -> Result<Config> {
    let mut config = settings::load(cli.config.as_deref())?;
    settings::apply_env(&mut config, |key| std::env::var(key).ok())?;
    if let Some(dir) = &cli.data_dir {
        config.data_dir = dir.clone();
    }
    if cli.verbose {
        config.log_level = "debug".to_string();
    }
    config.validate().context("Invalid configuration")?;
    Ok(config)
}

fn open_store(config: &Config) -> Result<Store> {
    let path = config.database_path();
    Store::open(&path).with_context(|| format!("Failed to open store {}", path.display()))
}

fn scene_by_product(store: &Store, product_id: &str) -> Result<Scene> {
    store
        .scene_by_product_id(product_id)?
        .with_context(|| format!("Scene not found: {}", product_id))
}

fn parse_bbox(s: &str) -> Result<Footprint> {
    let parts: Vec<f64> = s
        .split(',')
        .map(|p| p.trim().parse::<f64>())
        .collect::<std::result::Result<_, _>>()
        .with_context(|| format!("Invalid bbox: {}", s))?;
    let [lon_min, lat_min, lon_max, lat_max] = parts[..] else {
        bail!("Bbox must be 'lon_min,lat_min,lon_max,lat_max', got: {}", s);
    };
    if lon_min >= lon_max || lat_min >= lat_max {
        bail!("Bbox minimum must be below maximum, got: {}", s);
    }
    Ok(Footprint::new(lon_min, lat_min, lon_max, lat_max))
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn print_events(events: &[ChangeEvent]) {
    for e in events {
        println!(
            "#{} {} {} runs {}->{} threshold={} min_pixels={} connectivity={} cells={} magnitude={:.4} {}",
            e.id,
            e.formula,
            e.classification,
            e.baseline_run_id,
            e.comparison_run_id,
            e.threshold,
            e.min_pixels,
            e.connectivity.neighbours(),
            e.pixel_count,
            e.magnitude,
            e.geometry
        );
    }
}

// ─── Main ───────────────────────────────────────────────────────────────

fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = resolve_config(&cli)?;
    setup_logging(settings::parse_level(&config.log_level)?)?;

    match cli.command {
        // ── Verify ───────────────────────────────────────────────────
        Commands::Verify { folder } => {
            let start = Instant::now();
            let pb = spinner("Hashing scene files...");
            let result = verify(&folder).context("Failed to verify scene folder")?;
            pb.finish_and_clear();

            if cli.json {
                print_json(&result)?;
            } else {
                for check in &result.checks {
                    println!("{}", check);
                }
            }
            if !result.ok {
                bail!(
                    "{} of {} files failed verification",
                    result.failures().count(),
                    result.checks.len()
                );
            }
            done(&format!("Verified {} files", result.checks.len()), start.elapsed());
        }

        // ── Ingest ───────────────────────────────────────────────────
        Commands::Ingest {
            folder,
            product_id,
            tile,
            acquired_at,
            bbox,
            satellite,
            cloud_cover,
            crs,
            level,
        } => {
            let metadata = SceneMetadata {
                product_id,
                satellite,
                tile,
                acquired_at,
                cloud_cover,
                crs,
                footprint: parse_bbox(&bbox)?,
                processing_level: level,
            };
            let mut store = open_store(&config)?;

            let start = Instant::now();
            let pb = spinner("Verifying and ingesting scene...");
            let ingested = ingest_scene(&mut store, &folder, metadata);
            pb.finish_and_clear();
            let ingested = ingested.context("Failed to ingest scene")?;

            if cli.json {
                print_json(&ingested.scene)?;
            } else {
                println!("Scene {} ({})", ingested.scene.id, ingested.scene.product_id);
                for asset in &ingested.assets {
                    println!("  {:<4} {}", asset.kind, asset.path.display());
                }
            }
            done(
                &format!("Ingested {} assets", ingested.assets.len()),
                start.elapsed(),
            );
        }

        // ── Compute ──────────────────────────────────────────────────
        Commands::Compute {
            product_id,
            indices,
            processing_version,
            supersede,
        } => {
            let formulas = if indices.is_empty() {
                config.formulas()?
            } else {
                Formula::parse_all(&indices).context("Invalid index")?
            };
            let version = processing_version.unwrap_or_else(|| config.processing.version.clone());
            let mode = if supersede {
                StartMode::Supersede
            } else {
                StartMode::Exclusive
            };

            let mut store = open_store(&config)?;
            let scene = scene_by_product(&store, &product_id)?;
            let manager = RunManager::from_config(&config);
            let reader = BandReader::from_config(&config.processing);

            let start = Instant::now();
            let run = manager
                .start_run(&mut store, &scene, &version, mode)
                .context("Failed to start run")?;
            info!("Run {} for scene {} ({})", run.id, scene.product_id, version);

            let pb = spinner("Computing indices...");
            let outcome = manager.compute_indices(&mut store, &reader, &run, &formulas);
            pb.finish_and_clear();
            let outcome = outcome.context("Failed to compute indices")?;

            if cli.json {
                print_json(&outcome.recorded)?;
            } else {
                for index in &outcome.recorded {
                    println!(
                        "  {:<5} {} [{:?}, {:?}]",
                        index.formula,
                        index.path.display(),
                        index.range.min,
                        index.range.max
                    );
                }
            }
            for (formula, reason) in &outcome.skipped {
                eprintln!("  skipped {}: {}", formula, reason);
            }
            done(
                &format!(
                    "Run {} {}: {} indices recorded",
                    outcome.run.id,
                    outcome.run.status,
                    outcome.recorded.len()
                ),
                start.elapsed(),
            );
        }

        // ── Detect ───────────────────────────────────────────────────
        Commands::Detect {
            baseline,
            comparison,
            index,
            threshold,
            min_pixels,
            connectivity,
            dry_run,
        } => {
            let formula: Formula = index.parse().context("Invalid index")?;
            let defaults = config.change_params()?;
            let params = ChangeParams {
                threshold: threshold.unwrap_or(defaults.threshold),
                min_pixels: min_pixels.unwrap_or(defaults.min_pixels),
                connectivity: connectivity.unwrap_or(defaults.connectivity),
            };
            params
                .validate()
                .map_err(|e| anyhow::anyhow!("Invalid change parameters: {}", e))?;

            let mut store = open_store(&config)?;
            let baseline_run = store
                .run(baseline)?
                .with_context(|| format!("Run not found: {}", baseline))?;
            let comparison_run = store
                .run(comparison)?
                .with_context(|| format!("Run not found: {}", comparison))?;

            let start = Instant::now();
            let pb = spinner("Detecting changes...");
            let change_set =
                ChangeDetector::detect(&store, &baseline_run, &comparison_run, formula, params);
            pb.finish_and_clear();
            let change_set = change_set.context("Change detection failed")?;

            if dry_run {
                let mut count = 0;
                for region in change_set.events() {
                    count += 1;
                    println!(
                        "  {} cells={} magnitude={:.4} {}",
                        region.class,
                        region.pixel_count(),
                        region.magnitude,
                        region.wkt()
                    );
                }
                done(&format!("{} regions (not recorded)", count), start.elapsed());
            } else {
                let events = ChangeDetector::persist(&mut store, &change_set)
                    .context("Failed to record change events")?;
                if cli.json {
                    print_json(&events)?;
                } else {
                    print_events(&events);
                }
                done(
                    &format!("{} change events recorded", events.len()),
                    start.elapsed(),
                );
            }
        }

        // ── Runs ─────────────────────────────────────────────────────
        Commands::Runs { product_id } => {
            let store = open_store(&config)?;
            let scene = scene_by_product(&store, &product_id)?;
            let runs = store.runs_for_scene(scene.id)?;
            if cli.json {
                print_json(&runs)?;
            } else {
                for run in &runs {
                    let state = match (run.active, run.superseded_by) {
                        (true, _) => "active".to_string(),
                        (false, Some(next)) => format!("superseded by {}", next),
                        (false, None) => "inactive".to_string(),
                    };
                    println!(
                        "#{} {} created {} {} {}",
                        run.id, run.processing_version, run.created_at, run.status, state
                    );
                    if let Some(error) = &run.error {
                        println!("    error: {}", error);
                    }
                    for index in store.indices_for_run(run.id)? {
                        println!("    {} {}", index.formula, index.path.display());
                    }
                }
            }
        }

        // ── Changes ──────────────────────────────────────────────────
        Commands::Changes { scene, from, to } => {
            let store = open_store(&config)?;
            let from = from.unwrap_or(DateTime::<Utc>::MIN_UTC);
            let to = to.unwrap_or_else(Utc::now);
            if from > to {
                bail!("--from must not be later than --to");
            }

            let events = match scene {
                Some(product_id) => {
                    let scene = scene_by_product(&store, &product_id)?;
                    let mut events = store.change_events_for_scene(scene.id)?;
                    events.retain(|e| e.created_at >= from && e.created_at <= to);
                    events
                }
                None => store.change_events_in_range(from, to)?,
            };
            if cli.json {
                print_json(&events)?;
            } else {
                print_events(&events);
                println!("{} events", events.len());
            }
        }

        // ── Health ───────────────────────────────────────────────────
        Commands::Health => {
            let store = open_store(&config)?;
            let report = store.health().context("Health check failed")?;
            if cli.json {
                print_json(&report)?;
            } else {
                println!("Database: {}", config.database_path().display());
                println!("Schema version: {}", report.schema_version);
                for (table, count) in &report.tables {
                    println!("  {:<15} {}", table, count);
                }
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_bbox() {
        let fp = parse_bbox("-55, -10, -54, -9").unwrap();
        assert_eq!(fp, Footprint::new(-55.0, -10.0, -54.0, -9.0));
        assert!(parse_bbox("-55,-10,-54").is_err());
        assert!(parse_bbox("-54,-10,-55,-9").is_err());
        assert!(parse_bbox("a,b,c,d").is_err());
    }

    #[test]
    fn test_detect_arguments() {
        let cli = Cli::try_parse_from([
            "sda", "detect", "3", "7", "--index", "nbr", "--threshold", "0.3", "--connectivity", "8",
        ])
        .unwrap();
        match cli.command {
            Commands::Detect {
                baseline,
                comparison,
                index,
                threshold,
                connectivity,
                ..
            } => {
                assert_eq!((baseline, comparison), (3, 7));
                assert_eq!(index, "nbr");
                assert_eq!(threshold, Some(0.3));
                assert_eq!(connectivity, Some(Connectivity::Eight));
            }
            _ => panic!("expected detect"),
        }
    }

    #[test]
    fn test_ingest_requires_acquisition_time() {
        let parsed = Cli::try_parse_from([
            "sda", "ingest", "scene", "--product-id", "S2B_X", "--tile", "T21LXH", "--bbox",
            "0,0,1,1",
        ]);
        assert!(parsed.is_err());

        let cli = Cli::try_parse_from([
            "sda",
            "ingest",
            "scene",
            "--product-id",
            "S2B_X",
            "--tile",
            "T21LXH",
            "--bbox",
            "0,0,1,1",
            "--acquired-at",
            "2023-07-04T14:00:51Z",
        ])
        .unwrap();
        assert!(matches!(cli.command, Commands::Ingest { .. }));
    }
}
