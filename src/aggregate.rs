//! Aggregator - one analysis-ready table across all experiments and runs
//!
//! Concatenates every run's committed processed output into a single Arrow
//! `RecordBatch`, tagging rows with (condition, run), reconstructing the
//! time axis from frame indices and the run's frame interval, and pinning
//! canonical column types (Int32 ids and frames, Float64 time and
//! kinematics, Utf8 tags). Runs without committed output, and runs whose
//! output is empty, are skipped rather than failing the aggregation.

use std::sync::Arc;

use arrow::array::{
    Array, ArrayRef, BooleanArray, Float64Array, Int32Array, RecordBatch, StringArray,
};
use arrow::compute::concat_batches;
use arrow::datatypes::{DataType, Field, Schema, SchemaRef};

use crate::pipeline::{MaskRow, ProcessedOutput, ProcessedRow};
use crate::store::{ExperimentStore, RunId};
use crate::{Error, Result};

/// Schema of the aggregated processed table.
pub(crate) fn table_schema() -> SchemaRef {
    Arc::new(Schema::new(vec![
        Field::new("condition", DataType::Utf8, false),
        Field::new("run", DataType::Utf8, false),
        Field::new("frame", DataType::Int32, false),
        Field::new("time", DataType::Float64, false),
        Field::new("nucleus", DataType::Int32, false),
        Field::new("centrosome", DataType::Int32, false),
        Field::new("group", DataType::Utf8, false),
        Field::new("centr_x", DataType::Float64, false),
        Field::new("centr_y", DataType::Float64, false),
        Field::new("nucl_x", DataType::Float64, true),
        Field::new("nucl_y", DataType::Float64, true),
        Field::new("dist", DataType::Float64, true),
        Field::new("speed", DataType::Float64, true),
        Field::new("acc", DataType::Float64, true),
        Field::new("dist_centr", DataType::Float64, true),
        Field::new("speed_centr", DataType::Float64, true),
        Field::new("acc_centr", DataType::Float64, true),
        Field::new("cell_x", DataType::Float64, true),
        Field::new("cell_y", DataType::Float64, true),
        Field::new("dist_cell", DataType::Float64, true),
    ]))
}

/// Schema of the aggregated mask table.
pub(crate) fn mask_schema() -> SchemaRef {
    Arc::new(Schema::new(vec![
        Field::new("condition", DataType::Utf8, false),
        Field::new("run", DataType::Utf8, false),
        Field::new("frame", DataType::Int32, false),
        Field::new("time", DataType::Float64, false),
        Field::new("nucleus", DataType::Int32, false),
        Field::new("centrosome", DataType::Int32, false),
        Field::new("group", DataType::Utf8, false),
        Field::new("centr_x", DataType::Boolean, false),
        Field::new("centr_y", DataType::Boolean, false),
        Field::new("dist", DataType::Boolean, false),
        Field::new("speed", DataType::Boolean, false),
        Field::new("acc", DataType::Boolean, false),
        Field::new("dist_centr", DataType::Boolean, false),
        Field::new("speed_centr", DataType::Boolean, false),
        Field::new("acc_centr", DataType::Boolean, false),
    ]))
}

fn canonical_id(id: u32) -> Result<i32> {
    i32::try_from(id).map_err(|_| Error::Storage(format!("id {id} exceeds the Int32 id range")))
}

/// Build the tagged per-run batch for a processed table.
pub(crate) fn table_batch(
    id: &RunId,
    frame_interval: f64,
    out: &ProcessedOutput,
) -> Result<RecordBatch> {
    let rows = out.rows();
    let nuclei = rows.iter().map(|r| canonical_id(r.nucleus)).collect::<Result<Vec<_>>>()?;
    let centrosomes = rows
        .iter()
        .map(|r| canonical_id(r.centrosome))
        .collect::<Result<Vec<_>>>()?;

    let columns: Vec<ArrayRef> = vec![
        Arc::new(StringArray::from_iter_values(rows.iter().map(|_| id.condition.as_str()))),
        Arc::new(StringArray::from_iter_values(rows.iter().map(|_| id.run.as_str()))),
        Arc::new(Int32Array::from_iter_values(rows.iter().map(|r| r.frame))),
        Arc::new(Float64Array::from_iter_values(
            rows.iter().map(|r| f64::from(r.frame) * frame_interval),
        )),
        Arc::new(Int32Array::from_iter_values(nuclei)),
        Arc::new(Int32Array::from_iter_values(centrosomes)),
        Arc::new(StringArray::from_iter_values(rows.iter().map(|r| r.group.to_string()))),
        Arc::new(Float64Array::from_iter_values(rows.iter().map(|r| r.centr_x))),
        Arc::new(Float64Array::from_iter_values(rows.iter().map(|r| r.centr_y))),
        Arc::new(Float64Array::from_iter(rows.iter().map(|r| r.nucl_x))),
        Arc::new(Float64Array::from_iter(rows.iter().map(|r| r.nucl_y))),
        Arc::new(Float64Array::from_iter(rows.iter().map(|r| r.dist))),
        Arc::new(Float64Array::from_iter(rows.iter().map(|r| r.speed))),
        Arc::new(Float64Array::from_iter(rows.iter().map(|r| r.acc))),
        Arc::new(Float64Array::from_iter(rows.iter().map(|r| r.dist_centr))),
        Arc::new(Float64Array::from_iter(rows.iter().map(|r| r.speed_centr))),
        Arc::new(Float64Array::from_iter(rows.iter().map(|r| r.acc_centr))),
        Arc::new(Float64Array::from_iter(rows.iter().map(|r| r.cell_x))),
        Arc::new(Float64Array::from_iter(rows.iter().map(|r| r.cell_y))),
        Arc::new(Float64Array::from_iter(rows.iter().map(|r| r.dist_cell))),
    ];
    Ok(RecordBatch::try_new(table_schema(), columns)?)
}

/// Build the tagged per-run batch for a mask table.
pub(crate) fn mask_batch(
    id: &RunId,
    frame_interval: f64,
    out: &ProcessedOutput,
) -> Result<RecordBatch> {
    let mask = out.mask();
    let nuclei = mask.iter().map(|m| canonical_id(m.nucleus)).collect::<Result<Vec<_>>>()?;
    let centrosomes = mask
        .iter()
        .map(|m| canonical_id(m.centrosome))
        .collect::<Result<Vec<_>>>()?;

    let columns: Vec<ArrayRef> = vec![
        Arc::new(StringArray::from_iter_values(mask.iter().map(|_| id.condition.as_str()))),
        Arc::new(StringArray::from_iter_values(mask.iter().map(|_| id.run.as_str()))),
        Arc::new(Int32Array::from_iter_values(mask.iter().map(|m| m.frame))),
        Arc::new(Float64Array::from_iter_values(
            mask.iter().map(|m| f64::from(m.frame) * frame_interval),
        )),
        Arc::new(Int32Array::from_iter_values(nuclei)),
        Arc::new(Int32Array::from_iter_values(centrosomes)),
        Arc::new(StringArray::from_iter_values(mask.iter().map(|m| m.group.to_string()))),
        Arc::new(BooleanArray::from_iter(mask.iter().map(|m| Some(m.centr_x)))),
        Arc::new(BooleanArray::from_iter(mask.iter().map(|m| Some(m.centr_y)))),
        Arc::new(BooleanArray::from_iter(mask.iter().map(|m| Some(m.dist)))),
        Arc::new(BooleanArray::from_iter(mask.iter().map(|m| Some(m.speed)))),
        Arc::new(BooleanArray::from_iter(mask.iter().map(|m| Some(m.acc)))),
        Arc::new(BooleanArray::from_iter(mask.iter().map(|m| Some(m.dist_centr)))),
        Arc::new(BooleanArray::from_iter(mask.iter().map(|m| Some(m.speed_centr)))),
        Arc::new(BooleanArray::from_iter(mask.iter().map(|m| Some(m.acc_centr)))),
    ];
    Ok(RecordBatch::try_new(mask_schema(), columns)?)
}

/// Concatenate every run's committed processed table into one batch.
///
/// # Errors
///
/// Returns an error only for Arrow-level construction failures; zero runs
/// or empty outputs yield an empty batch with the full schema.
pub fn collect_all(store: &ExperimentStore) -> Result<RecordBatch> {
    let mut batches = Vec::new();
    for (id, entry) in store.runs() {
        if let Some(out) = entry.processed() {
            if !out.is_empty() {
                batches.push(table_batch(id, entry.frame_interval(), out)?);
            }
        }
    }
    if batches.is_empty() {
        return Ok(RecordBatch::new_empty(table_schema()));
    }
    Ok(concat_batches(&table_schema(), batches.iter())?)
}

/// Concatenate every run's committed mask table into one batch.
///
/// # Errors
///
/// Returns an error only for Arrow-level construction failures.
pub fn collect_masks(store: &ExperimentStore) -> Result<RecordBatch> {
    let mut batches = Vec::new();
    for (id, entry) in store.runs() {
        if let Some(out) = entry.processed() {
            if !out.is_empty() {
                batches.push(mask_batch(id, entry.frame_interval(), out)?);
            }
        }
    }
    if batches.is_empty() {
        return Ok(RecordBatch::new_empty(mask_schema()));
    }
    Ok(concat_batches(&mask_schema(), batches.iter())?)
}

fn column<'a, T: 'static>(batch: &'a RecordBatch, name: &str) -> Result<&'a T> {
    batch
        .column_by_name(name)
        .and_then(|c| c.as_any().downcast_ref::<T>())
        .ok_or_else(|| Error::Storage(format!("processed table misses column {name:?}")))
}

fn opt_f64(array: &Float64Array, i: usize) -> Option<f64> {
    if array.is_null(i) {
        None
    } else {
        Some(array.value(i))
    }
}

/// Reassemble a run's processed output from its persisted table and mask
/// batches (the inverse of [`table_batch`] / [`mask_batch`]).
pub(crate) fn output_from_batches(
    table: &RecordBatch,
    mask: &RecordBatch,
) -> Result<ProcessedOutput> {
    let frame = column::<Int32Array>(table, "frame")?;
    let time = column::<Float64Array>(table, "time")?;
    let nucleus = column::<Int32Array>(table, "nucleus")?;
    let centrosome = column::<Int32Array>(table, "centrosome")?;
    let group = column::<StringArray>(table, "group")?;
    let centr_x = column::<Float64Array>(table, "centr_x")?;
    let centr_y = column::<Float64Array>(table, "centr_y")?;
    let nucl_x = column::<Float64Array>(table, "nucl_x")?;
    let nucl_y = column::<Float64Array>(table, "nucl_y")?;
    let dist = column::<Float64Array>(table, "dist")?;
    let speed = column::<Float64Array>(table, "speed")?;
    let acc = column::<Float64Array>(table, "acc")?;
    let dist_centr = column::<Float64Array>(table, "dist_centr")?;
    let speed_centr = column::<Float64Array>(table, "speed_centr")?;
    let acc_centr = column::<Float64Array>(table, "acc_centr")?;
    let cell_x = column::<Float64Array>(table, "cell_x")?;
    let cell_y = column::<Float64Array>(table, "cell_y")?;
    let dist_cell = column::<Float64Array>(table, "dist_cell")?;

    let to_u32 = |v: i32, what: &str| {
        u32::try_from(v).map_err(|_| Error::Storage(format!("negative {what} id {v}")))
    };

    let mut rows = Vec::with_capacity(table.num_rows());
    for i in 0..table.num_rows() {
        rows.push(ProcessedRow {
            frame: frame.value(i),
            time: time.value(i),
            nucleus: to_u32(nucleus.value(i), "nucleus")?,
            centrosome: to_u32(centrosome.value(i), "centrosome")?,
            group: group.value(i).parse()?,
            centr_x: centr_x.value(i),
            centr_y: centr_y.value(i),
            nucl_x: opt_f64(nucl_x, i),
            nucl_y: opt_f64(nucl_y, i),
            dist: opt_f64(dist, i),
            speed: opt_f64(speed, i),
            acc: opt_f64(acc, i),
            dist_centr: opt_f64(dist_centr, i),
            speed_centr: opt_f64(speed_centr, i),
            acc_centr: opt_f64(acc_centr, i),
            cell_x: opt_f64(cell_x, i),
            cell_y: opt_f64(cell_y, i),
            dist_cell: opt_f64(dist_cell, i),
        });
    }

    let m_frame = column::<Int32Array>(mask, "frame")?;
    let m_nucleus = column::<Int32Array>(mask, "nucleus")?;
    let m_centrosome = column::<Int32Array>(mask, "centrosome")?;
    let m_group = column::<StringArray>(mask, "group")?;
    let m_centr_x = column::<BooleanArray>(mask, "centr_x")?;
    let m_centr_y = column::<BooleanArray>(mask, "centr_y")?;
    let m_dist = column::<BooleanArray>(mask, "dist")?;
    let m_speed = column::<BooleanArray>(mask, "speed")?;
    let m_acc = column::<BooleanArray>(mask, "acc")?;
    let m_dist_centr = column::<BooleanArray>(mask, "dist_centr")?;
    let m_speed_centr = column::<BooleanArray>(mask, "speed_centr")?;
    let m_acc_centr = column::<BooleanArray>(mask, "acc_centr")?;

    let mut mask_rows = Vec::with_capacity(mask.num_rows());
    for i in 0..mask.num_rows() {
        mask_rows.push(MaskRow {
            frame: m_frame.value(i),
            nucleus: to_u32(m_nucleus.value(i), "nucleus")?,
            centrosome: to_u32(m_centrosome.value(i), "centrosome")?,
            group: m_group.value(i).parse()?,
            centr_x: m_centr_x.value(i),
            centr_y: m_centr_y.value(i),
            dist: m_dist.value(i),
            speed: m_speed.value(i),
            acc: m_acc.value(i),
            dist_centr: m_dist_centr.value(i),
            speed_centr: m_speed_centr.value(i),
            acc_centr: m_acc_centr.value(i),
        });
    }

    Ok(ProcessedOutput::new(rows, mask_rows))
}
