//! Cross-run aggregation into analysis-ready Arrow batches

use arrow::array::{BooleanArray, Float64Array, Int32Array, StringArray};
use arrow::datatypes::DataType;
use centrodb::aggregate;
use centrodb::path::TrackKind;
use centrodb::pipeline::PipelineConfig;
use centrodb::selection::Group;
use centrodb::track::Sample;
use centrodb::ExperimentStore;

fn processed_store() -> ExperimentStore {
    let mut store = ExperimentStore::new();
    // run_001 at 1 min/frame, run_002 at 5 min/frame
    for (condition, run, interval) in [("pc", "run_001", 1.0), ("dyn_kd", "run_002", 5.0)] {
        let id = store.add_experiment(condition, run, interval).unwrap();
        let samples = |x0: f64| vec![Sample::new(0, x0, 0.0), Sample::new(1, x0, 0.0)];
        store.put_track(&id, TrackKind::Nucleus, 1, samples(0.0)).unwrap();
        store.put_track(&id, TrackKind::Centrosome, 4, samples(-1.0)).unwrap();
        store.put_track(&id, TrackKind::Centrosome, 5, samples(1.0)).unwrap();
        store.associate(&id, 4, 1, Group::A).unwrap();
        store.associate(&id, 5, 1, Group::B).unwrap();
    }
    assert!(store.reprocess_all(&PipelineConfig::default()).is_empty());
    store
}

fn str_col<'a>(batch: &'a arrow::array::RecordBatch, name: &str) -> &'a StringArray {
    batch
        .column_by_name(name)
        .unwrap()
        .as_any()
        .downcast_ref()
        .unwrap()
}

#[test]
fn aggregated_table_tags_rows_with_condition_and_run() {
    let store = processed_store();
    let batch = aggregate::collect_all(&store).unwrap();
    // 2 centrosomes x 2 frames per run
    assert_eq!(batch.num_rows(), 8);

    let condition = str_col(&batch, "condition");
    let run = str_col(&batch, "run");
    let conditions: Vec<&str> = (0..batch.num_rows()).map(|i| condition.value(i)).collect();
    assert_eq!(conditions.iter().filter(|c| **c == "pc").count(), 4);
    assert_eq!(conditions.iter().filter(|c| **c == "dyn_kd").count(), 4);
    for i in 0..batch.num_rows() {
        let expected = if condition.value(i) == "pc" { "run_001" } else { "run_002" };
        assert_eq!(run.value(i), expected);
    }
}

#[test]
fn time_axis_uses_each_runs_frame_interval() {
    let store = processed_store();
    let batch = aggregate::collect_all(&store).unwrap();
    let condition = str_col(&batch, "condition");
    let frame: &Int32Array =
        batch.column_by_name("frame").unwrap().as_any().downcast_ref().unwrap();
    let time: &Float64Array =
        batch.column_by_name("time").unwrap().as_any().downcast_ref().unwrap();
    for i in 0..batch.num_rows() {
        let interval = if condition.value(i) == "pc" { 1.0 } else { 5.0 };
        let expected = f64::from(frame.value(i)) * interval;
        assert!((time.value(i) - expected).abs() < 1e-12, "row {i}");
    }
}

#[test]
fn aggregated_column_types_are_canonical() {
    let store = processed_store();
    let batch = aggregate::collect_all(&store).unwrap();
    let schema = batch.schema();
    assert_eq!(schema.field_with_name("frame").unwrap().data_type(), &DataType::Int32);
    assert_eq!(schema.field_with_name("nucleus").unwrap().data_type(), &DataType::Int32);
    assert_eq!(schema.field_with_name("centrosome").unwrap().data_type(), &DataType::Int32);
    assert_eq!(schema.field_with_name("time").unwrap().data_type(), &DataType::Float64);
    assert_eq!(schema.field_with_name("dist").unwrap().data_type(), &DataType::Float64);
    assert_eq!(schema.field_with_name("group").unwrap().data_type(), &DataType::Utf8);
    assert!(schema.field_with_name("dist").unwrap().is_nullable());
    assert!(!schema.field_with_name("centr_x").unwrap().is_nullable());
}

#[test]
fn mask_batch_parallels_the_table() {
    let store = processed_store();
    let table = aggregate::collect_all(&store).unwrap();
    let mask = aggregate::collect_masks(&store).unwrap();
    assert_eq!(mask.num_rows(), table.num_rows());
    let valid: &BooleanArray =
        mask.column_by_name("centr_x").unwrap().as_any().downcast_ref().unwrap();
    // fully observed synthetic tracks: every coordinate is provenance-true
    assert_eq!(valid.true_count(), mask.num_rows());
}

#[test]
fn empty_store_aggregates_to_empty_batches_with_schema() {
    let store = ExperimentStore::new();
    let table = aggregate::collect_all(&store).unwrap();
    assert_eq!(table.num_rows(), 0);
    assert!(table.schema().field_with_name("dist_centr").is_ok());
    let mask = aggregate::collect_masks(&store).unwrap();
    assert_eq!(mask.num_rows(), 0);
    assert!(mask.schema().field_with_name("dist_centr").is_ok());
}

#[test]
fn runs_without_output_are_skipped_not_failed() {
    let mut store = processed_store();
    store.add_experiment("wt", "run_003", 1.0).unwrap();
    let batch = aggregate::collect_all(&store).unwrap();
    assert_eq!(batch.num_rows(), 8);
    let condition = str_col(&batch, "condition");
    assert!((0..batch.num_rows()).all(|i| condition.value(i) != "wt"));
}
