//! Several connections racing to ingest the same scene or start the same run.

mod common;

use std::sync::{Arc, Barrier};
use std::thread;

use common::*;
use sda_provenance::{ingest_scene, Error, RunManager, StartMode, Store};
use tempfile::TempDir;

const WORKERS: usize = 8;

#[test]
fn exactly_one_ingest_of_a_product_wins() {
    let root = TempDir::new().unwrap();
    let db_path = root.path().join("sda.sqlite");
    Store::open(&db_path).unwrap();
    let folder = write_scene(root.path(), "S2B_TWICE", flat_bands());

    let barrier = Arc::new(Barrier::new(WORKERS));
    let handles: Vec<_> = (0..WORKERS)
        .map(|_| {
            let db_path = db_path.clone();
            let folder = folder.clone();
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                let mut store = Store::open(&db_path).unwrap();
                barrier.wait();
                ingest_scene(&mut store, &folder, metadata("S2B_TWICE", date(2023, 7, 4)))
            })
        })
        .collect();

    let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    let winners = results.iter().filter(|r| r.is_ok()).count();
    assert_eq!(winners, 1, "results: {results:?}");
    assert!(results
        .iter()
        .filter_map(|r| r.as_ref().err())
        .all(|e| matches!(e, Error::DuplicateScene { .. })));

    let store = Store::open(&db_path).unwrap();
    let health = store.health().unwrap();
    assert_eq!(health.count("scenes"), Some(1));
    assert_eq!(health.count("assets"), Some(flat_bands().len()));
}

#[test]
fn exactly_one_exclusive_start_wins() {
    let root = TempDir::new().unwrap();
    let db_path = root.path().join("sda.sqlite");

    let scene = {
        let mut store = Store::open(&db_path).unwrap();
        let folder = write_scene(root.path(), "S2B_RACE", flat_bands());
        ingest_scene(&mut store, &folder, metadata("S2B_RACE", date(2023, 7, 4)))
            .unwrap()
            .scene
    };

    let manager = RunManager::new(root.path().join("artifacts"));
    let barrier = Arc::new(Barrier::new(WORKERS));
    let handles: Vec<_> = (0..WORKERS)
        .map(|_| {
            let db_path = db_path.clone();
            let scene = scene.clone();
            let manager = manager.clone();
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                let mut store = Store::open(&db_path).unwrap();
                barrier.wait();
                manager.start_run(&mut store, &scene, "v1", StartMode::Exclusive)
            })
        })
        .collect();

    let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    let winners = results.iter().filter(|r| r.is_ok()).count();
    assert_eq!(winners, 1, "results: {results:?}");
    assert!(results
        .iter()
        .filter_map(|r| r.as_ref().err())
        .all(|e| matches!(e, Error::DuplicateRun { .. })));

    let store = Store::open(&db_path).unwrap();
    let runs = store.runs_for_scene(scene.id).unwrap();
    assert_eq!(runs.len(), 1);
    assert!(runs[0].active);
}

#[test]
fn concurrent_supersedes_leave_one_active_run() {
    let root = TempDir::new().unwrap();
    let db_path = root.path().join("sda.sqlite");

    let scene = {
        let mut store = Store::open(&db_path).unwrap();
        let folder = write_scene(root.path(), "S2B_CHAIN", flat_bands());
        ingest_scene(&mut store, &folder, metadata("S2B_CHAIN", date(2023, 7, 4)))
            .unwrap()
            .scene
    };

    let manager = RunManager::new(root.path().join("artifacts"));
    let handles: Vec<_> = (0..WORKERS)
        .map(|_| {
            let db_path = db_path.clone();
            let scene = scene.clone();
            let manager = manager.clone();
            thread::spawn(move || {
                let mut store = Store::open(&db_path).unwrap();
                manager.start_run(&mut store, &scene, "v1", StartMode::Supersede)
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap().unwrap();
    }

    let store = Store::open(&db_path).unwrap();
    let runs = store.runs_for_scene(scene.id).unwrap();
    assert_eq!(runs.len(), WORKERS);
    assert_eq!(runs.iter().filter(|r| r.active).count(), 1);
    // Every inactive run points at a later run
    for run in runs.iter().filter(|r| !r.active) {
        let next = run.superseded_by.unwrap();
        assert!(runs.iter().any(|r| r.id == next));
    }
}
