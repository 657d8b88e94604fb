//! Masking step: collapse per-field validity into the parallel mask table
//!
//! Per-group fields inherit the row's coordinate provenance; between-group
//! fields are valid only when both contributing members were directly
//! observed on the frame, and the collapsed boolean is recorded on both
//! member rows.

use super::kinematics::DerivedRow;
use super::table::{MaskRow, ProcessedRow};

/// Split derived rows into the processed table and its mask table.
pub(crate) fn split(derived: Vec<DerivedRow>) -> (Vec<ProcessedRow>, Vec<MaskRow>) {
    let mut rows = Vec::with_capacity(derived.len());
    let mut mask = Vec::with_capacity(derived.len());
    for d in derived {
        mask.push(MaskRow {
            frame: d.row.frame,
            nucleus: d.row.nucleus,
            centrosome: d.row.centrosome,
            group: d.row.group,
            centr_x: d.observed,
            centr_y: d.observed,
            dist: d.observed,
            speed: d.observed,
            acc: d.observed,
            dist_centr: d.pair_observed,
            speed_centr: d.pair_observed,
            acc_centr: d.pair_observed,
        });
        rows.push(d.row);
    }
    (rows, mask)
}
