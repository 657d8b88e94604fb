//! Processed-layer row model
//!
//! One [`ProcessedRow`] per (frame, centrosome), plus a [`MaskRow`] of
//! identical shape telling the analysis side which values were directly
//! observed (`true`) versus supplied by interpolation (`false`). Undefined
//! kinematic values (first diff, zero time-delta, absent group partner) are
//! `None`, never an error.

use crate::selection::Group;

/// One derived row of the processed table.
#[derive(Debug, Clone, PartialEq)]
pub struct ProcessedRow {
    /// Acquisition frame index
    pub frame: i32,
    /// Reconstructed time in minutes (`frame * frame_interval`)
    pub time: f64,
    /// Owning nucleus id
    pub nucleus: u32,
    /// Centrosome id
    pub centrosome: u32,
    /// Curated group label of the centrosome
    pub group: Group,
    /// Centrosome X, observed or interpolated
    pub centr_x: f64,
    /// Centrosome Y, observed or interpolated
    pub centr_y: f64,
    /// Nucleus center X at this frame, when inside the nucleus' span
    pub nucl_x: Option<f64>,
    /// Nucleus center Y at this frame, when inside the nucleus' span
    pub nucl_y: Option<f64>,
    /// Distance from centrosome to nucleus center
    pub dist: Option<f64>,
    /// Finite-difference speed of `dist` over the time axis
    pub speed: Option<f64>,
    /// Finite-difference acceleration of `dist` over the time axis
    pub acc: Option<f64>,
    /// Distance between the two group members, when both are present
    pub dist_centr: Option<f64>,
    /// Finite-difference speed of `dist_centr` (sign-corrected for group A)
    pub speed_centr: Option<f64>,
    /// Finite-difference acceleration of `dist_centr` (sign-corrected)
    pub acc_centr: Option<f64>,
    /// Cell boundary centroid X, when boundary data was joined
    pub cell_x: Option<f64>,
    /// Cell boundary centroid Y, when boundary data was joined
    pub cell_y: Option<f64>,
    /// Distance from centrosome to the cell boundary centroid
    pub dist_cell: Option<f64>,
}

/// Validity row parallel to one [`ProcessedRow`]; `true` means the field
/// was derived from directly observed coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MaskRow {
    /// Acquisition frame index
    pub frame: i32,
    /// Owning nucleus id
    pub nucleus: u32,
    /// Centrosome id
    pub centrosome: u32,
    /// Curated group label
    pub group: Group,
    /// Centrosome X directly observed
    pub centr_x: bool,
    /// Centrosome Y directly observed
    pub centr_y: bool,
    /// `dist` derived from observed coordinates
    pub dist: bool,
    /// `speed` derived from observed coordinates
    pub speed: bool,
    /// `acc` derived from observed coordinates
    pub acc: bool,
    /// `dist_centr` valid: both group members observed this frame
    pub dist_centr: bool,
    /// `speed_centr` valid: both group members observed this frame
    pub speed_centr: bool,
    /// `acc_centr` valid: both group members observed this frame
    pub acc_centr: bool,
}

/// Committed output of one reprocessing run: the derived table and its
/// parallel validity mask, in one deterministic order.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ProcessedOutput {
    rows: Vec<ProcessedRow>,
    mask: Vec<MaskRow>,
}

impl ProcessedOutput {
    /// Assemble an output, sorting both tables into the canonical
    /// (nucleus, group, frame, centrosome) order.
    #[must_use]
    pub fn new(mut rows: Vec<ProcessedRow>, mut mask: Vec<MaskRow>) -> Self {
        rows.sort_by_key(|r| (r.nucleus, r.group, r.frame, r.centrosome));
        mask.sort_by_key(|m| (m.nucleus, m.group, m.frame, m.centrosome));
        Self { rows, mask }
    }

    /// Derived rows in canonical order.
    #[must_use]
    pub fn rows(&self) -> &[ProcessedRow] {
        &self.rows
    }

    /// Mask rows in canonical order, parallel to [`Self::rows`].
    #[must_use]
    pub fn mask(&self) -> &[MaskRow] {
        &self.mask
    }

    /// Number of derived rows.
    #[must_use]
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Whether the output holds no rows.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Drop every row and mask row referencing the (centrosome, nucleus)
    /// pair. Used to purge stale derived numbers the moment an association
    /// is deleted, before any reprocessing runs.
    pub fn purge_pair(&mut self, centrosome: u32, nucleus: u32) {
        self.rows
            .retain(|r| !(r.centrosome == centrosome && r.nucleus == nucleus));
        self.mask
            .retain(|m| !(m.centrosome == centrosome && m.nucleus == nucleus));
    }
}
