//! Directory persistence: save/load round trips and compaction

use centrodb::path::TrackKind;
use centrodb::pipeline::PipelineConfig;
use centrodb::selection::Group;
use centrodb::storage::NexusDir;
use centrodb::store::{BoundaryRow, RawFrame};
use centrodb::track::Sample;
use centrodb::{Error, ExperimentStore, RunId};

fn populated_store() -> (ExperimentStore, RunId) {
    let mut store = ExperimentStore::new();
    let id = store.add_experiment("pc", "run_001", 2.5).unwrap();
    store
        .put_raw_frame(
            &id,
            0,
            RawFrame {
                channels: vec![vec![1, 2, 3], vec![4, 5, 6]],
                resolution: Some(4.5),
            },
        )
        .unwrap();
    let samples = |x0: f64| vec![Sample::new(0, x0, 0.0), Sample::new(1, x0 + 1.0, 0.5)];
    store.put_track(&id, TrackKind::Nucleus, 2, samples(0.0)).unwrap();
    store.put_track(&id, TrackKind::Centrosome, 10, samples(-2.0)).unwrap();
    store.put_track(&id, TrackKind::Centrosome, 11, samples(2.0)).unwrap();
    store
        .put_boundary(
            &id,
            vec![BoundaryRow {
                frame: 0,
                nucleus: 2,
                cell_x: 0.5,
                cell_y: 0.5,
                dist_cell: None,
            }],
        )
        .unwrap();
    store.associate(&id, 10, 2, Group::A).unwrap();
    store.associate(&id, 11, 2, Group::B).unwrap();
    store.process_selection_for_run(&id, &PipelineConfig::default()).unwrap();
    (store, id)
}

fn assert_entries_equal(a: &ExperimentStore, b: &ExperimentStore, id: &RunId) {
    let left = a.run_entry(id).unwrap();
    let right = b.run_entry(id).unwrap();
    assert_eq!(left.created_at(), right.created_at());
    assert!((left.frame_interval() - right.frame_interval()).abs() < f64::EPSILON);
    assert_eq!(left.raw_frames(), right.raw_frames());
    assert_eq!(left.nuclei(), right.nuclei());
    assert_eq!(left.centrosomes(), right.centrosomes());
    assert_eq!(left.boundary(), right.boundary());
    assert_eq!(left.selection(), right.selection());
    assert_eq!(left.processed(), right.processed());
}

#[test]
fn save_load_round_trip_preserves_all_layers() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let nexus = NexusDir::new(dir.path().join("store"));
    let (store, id) = populated_store();

    nexus.save(&store)?;
    let loaded = nexus.load()?;

    assert_eq!(loaded.run_count(), 1);
    assert_entries_equal(&store, &loaded, &id);
    Ok(())
}

#[test]
fn layout_follows_the_addressing_scheme() {
    let dir = tempfile::tempdir().unwrap();
    let nexus = NexusDir::new(dir.path().join("store"));
    let (store, _) = populated_store();
    nexus.save(&store).unwrap();

    let run = nexus.root().join("pc").join("run_001");
    assert!(run.join("meta.json").is_file());
    assert!(run.join("raw").join("frame-000").join("channel-1.bin").is_file());
    assert!(run.join("measurements").join("nuclei").join("N02.json").is_file());
    assert!(run.join("measurements").join("centrosomes").join("C010.json").is_file());
    assert!(run.join("selection").join("associations.json").is_file());
    assert!(run.join("processed").join("table.parquet").is_file());
    assert!(run.join("processed").join("mask.parquet").is_file());
}

#[test]
fn load_without_manifest_is_not_found() {
    let dir = tempfile::tempdir().unwrap();
    let nexus = NexusDir::new(dir.path().join("absent"));
    assert!(matches!(nexus.load(), Err(Error::NotFound(_))));
}

#[test]
fn unprocessed_run_round_trips_without_parquet() {
    let dir = tempfile::tempdir().unwrap();
    let nexus = NexusDir::new(dir.path().join("store"));
    let mut store = ExperimentStore::new();
    let id = store.add_experiment("pc", "run_009", 1.0).unwrap();
    store
        .put_track(&id, TrackKind::Nucleus, 1, vec![Sample::new(0, 0.0, 0.0)])
        .unwrap();
    nexus.save(&store).unwrap();

    let processed_dir = nexus.root().join("pc").join("run_009").join("processed");
    assert!(!processed_dir.join("table.parquet").exists());

    let loaded = nexus.load().unwrap();
    assert!(loaded.processed(&id).unwrap().is_none());
}

#[test]
fn partial_processed_pair_is_rejected_on_load() {
    let dir = tempfile::tempdir().unwrap();
    let nexus = NexusDir::new(dir.path().join("store"));
    let (store, _) = populated_store();
    nexus.save(&store).unwrap();

    let mask = nexus.root().join("pc").join("run_001").join("processed").join("mask.parquet");
    std::fs::remove_file(mask).unwrap();
    assert!(matches!(nexus.load(), Err(Error::Storage(_))));
}

#[test]
fn replaced_run_does_not_resurrect_stale_entities() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let nexus = NexusDir::new(dir.path().join("store"));
    let (mut store, _) = populated_store();
    nexus.save(&store)?;

    // whole-subtree replacement drops the old tracks, selection, and
    // processed output; the next save must not leave them reloadable
    let id = store.add_experiment("pc", "run_001", 1.0)?;
    store.put_track(&id, TrackKind::Nucleus, 7, vec![Sample::new(0, 0.0, 0.0)])?;
    nexus.save(&store)?;

    let loaded = nexus.load()?;
    let entry = loaded.run_entry(&id)?;
    assert_eq!(entry.nuclei().keys().copied().collect::<Vec<_>>(), vec![7]);
    assert!(entry.centrosomes().is_empty());
    assert!(entry.raw_frames().is_empty());
    assert!(entry.selection().is_empty());
    assert!(entry.processed().is_none());
    Ok(())
}

#[test]
fn deleted_run_bytes_stay_until_compact() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let nexus = NexusDir::new(dir.path().join("store"));
    let (mut store, id) = populated_store();
    let doomed = store.add_experiment("pc", "run_002", 1.0)?;
    nexus.save(&store)?;

    store.delete_run(&doomed)?;
    nexus.save(&store)?;

    // the manifest no longer lists the run but its bytes are still there
    let stale = nexus.root().join("pc").join("run_002");
    assert!(stale.is_dir());
    assert_eq!(nexus.load()?.run_count(), 1);

    nexus.compact()?;
    assert!(!stale.exists());

    let compacted = nexus.load()?;
    assert_eq!(compacted.run_count(), 1);
    assert_entries_equal(&store, &compacted, &id);
    Ok(())
}

#[test]
fn save_is_idempotent() {
    let dir = tempfile::tempdir().unwrap();
    let nexus = NexusDir::new(dir.path().join("store"));
    let (store, id) = populated_store();
    nexus.save(&store).unwrap();
    nexus.save(&store).unwrap();
    let loaded = nexus.load().unwrap();
    assert_entries_equal(&store, &loaded, &id);
}
