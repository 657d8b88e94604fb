//! Hierarchical experiment store
//!
//! One [`RunEntry`] per experiment-run, owning the four layers: raw image
//! frames, track measurements, the curated selection, and the committed
//! processed output. Single-writer model: all mutations are sequential
//! within one process and there is no internal locking; callers serialize
//! access externally. Reprocessing may fan out across independent runs
//! (see [`ExperimentStore::reprocess_all`]) but never within one run.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::path::{validate_segment, TrackKind};
use crate::pipeline::{self, PipelineConfig, ProcessedOutput};
use crate::selection::{AssociationIndex, Group};
use crate::track::{Sample, Track};
use crate::{Error, Result};

/// Identity of one imaging acquisition within an experimental condition.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RunId {
    /// Condition tag of the owning experiment
    pub condition: String,
    /// Run id within the condition
    pub run: String,
}

impl RunId {
    /// Create a run identity.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Validation`] for empty or slash-containing segments.
    pub fn new(condition: impl Into<String>, run: impl Into<String>) -> Result<Self> {
        let condition = condition.into();
        let run = run.into();
        validate_segment("condition", &condition)?;
        validate_segment("run", &run)?;
        Ok(Self { condition, run })
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.condition, self.run)
    }
}

/// One raw acquisition frame: opaque per-channel pixel payloads plus the
/// resolution ingestion reported. Decoding stays with the ingestion side;
/// the store only addresses and persists the bytes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawFrame {
    /// Channel payloads in acquisition order
    pub channels: Vec<Vec<u8>>,
    /// Pixels per micrometer, when known
    pub resolution: Option<f64>,
}

/// Cell boundary fields supplied by the external segmentation collaborator,
/// joined by (frame, nucleus) during reprocessing.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundaryRow {
    /// Acquisition frame index
    pub frame: i32,
    /// Nucleus/cell key
    pub nucleus: u32,
    /// Boundary centroid X
    pub cell_x: f64,
    /// Boundary centroid Y
    pub cell_y: f64,
    /// Distance from the centrosome to the boundary, when precomputed
    pub dist_cell: Option<f64>,
}

/// The four layers of one experiment-run.
#[derive(Debug, Clone)]
pub struct RunEntry {
    pub(crate) created_at: DateTime<Utc>,
    pub(crate) frame_interval: f64,
    pub(crate) raw: BTreeMap<i32, RawFrame>,
    pub(crate) nuclei: BTreeMap<u32, Track>,
    pub(crate) centrosomes: BTreeMap<u32, Track>,
    pub(crate) boundary: Vec<BoundaryRow>,
    pub(crate) selection: AssociationIndex,
    pub(crate) processed: Option<ProcessedOutput>,
}

impl RunEntry {
    fn new(frame_interval: f64) -> Self {
        Self {
            created_at: Utc::now(),
            frame_interval,
            raw: BTreeMap::new(),
            nuclei: BTreeMap::new(),
            centrosomes: BTreeMap::new(),
            boundary: Vec::new(),
            selection: AssociationIndex::new(),
            processed: None,
        }
    }

    /// When the run subtree was created.
    #[must_use]
    pub const fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Minutes between consecutive acquisition frames.
    #[must_use]
    pub const fn frame_interval(&self) -> f64 {
        self.frame_interval
    }

    /// Nucleus tracks of the measurements layer.
    #[must_use]
    pub const fn nuclei(&self) -> &BTreeMap<u32, Track> {
        &self.nuclei
    }

    /// Centrosome tracks of the measurements layer.
    #[must_use]
    pub const fn centrosomes(&self) -> &BTreeMap<u32, Track> {
        &self.centrosomes
    }

    /// Current cell boundary rows.
    #[must_use]
    pub fn boundary(&self) -> &[BoundaryRow] {
        &self.boundary
    }

    /// The curated selection layer.
    #[must_use]
    pub const fn selection(&self) -> &AssociationIndex {
        &self.selection
    }

    /// Committed processed output, if any reprocessing has run.
    #[must_use]
    pub const fn processed(&self) -> Option<&ProcessedOutput> {
        self.processed.as_ref()
    }

    /// Raw frames of this run.
    #[must_use]
    pub const fn raw_frames(&self) -> &BTreeMap<i32, RawFrame> {
        &self.raw
    }

    fn tracks(&self, kind: TrackKind) -> &BTreeMap<u32, Track> {
        match kind {
            TrackKind::Nucleus => &self.nuclei,
            TrackKind::Centrosome => &self.centrosomes,
        }
    }

    fn tracks_mut(&mut self, kind: TrackKind) -> &mut BTreeMap<u32, Track> {
        match kind {
            TrackKind::Nucleus => &mut self.nuclei,
            TrackKind::Centrosome => &mut self.centrosomes,
        }
    }
}

/// In-memory hierarchical store for all experiment-runs.
#[derive(Debug, Clone, Default)]
pub struct ExperimentStore {
    runs: BTreeMap<RunId, RunEntry>,
}

impl ExperimentStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn no_run(id: &RunId) -> Error {
        Error::NotFound(format!("run {id}"))
    }

    fn entry(&self, id: &RunId) -> Result<&RunEntry> {
        self.runs.get(id).ok_or_else(|| Self::no_run(id))
    }

    fn entry_mut(&mut self, id: &RunId) -> Result<&mut RunEntry> {
        self.runs.get_mut(id).ok_or_else(|| Self::no_run(id))
    }

    /// Create (or wholly replace) an experiment-run subtree.
    ///
    /// The subtree starts with all four layers empty. Replacement is
    /// whole-subtree: there is no partial deletion.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Validation`] for malformed segments or a
    /// non-positive frame interval.
    pub fn add_experiment(
        &mut self,
        condition: &str,
        run: &str,
        frame_interval: f64,
    ) -> Result<RunId> {
        let id = RunId::new(condition, run)?;
        if !(frame_interval.is_finite() && frame_interval > 0.0) {
            return Err(Error::Validation(format!(
                "frame interval must be a positive finite number of minutes, got {frame_interval}"
            )));
        }
        self.runs.insert(id.clone(), RunEntry::new(frame_interval));
        Ok(id)
    }

    /// Whether the run subtree exists.
    #[must_use]
    pub fn contains_run(&self, id: &RunId) -> bool {
        self.runs.contains_key(id)
    }

    /// Number of runs in the store.
    #[must_use]
    pub fn run_count(&self) -> usize {
        self.runs.len()
    }

    /// Whether the store holds no runs.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.runs.is_empty()
    }

    /// Runs in deterministic (condition, run) order.
    pub fn runs(&self) -> impl Iterator<Item = (&RunId, &RunEntry)> {
        self.runs.iter()
    }

    /// Read access to one run subtree.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] when the run is absent.
    pub fn run_entry(&self, id: &RunId) -> Result<&RunEntry> {
        self.entry(id)
    }

    /// Remove a whole run subtree.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] when the run is absent.
    pub fn delete_run(&mut self, id: &RunId) -> Result<()> {
        self.runs.remove(id).map(|_| ()).ok_or_else(|| Self::no_run(id))
    }

    // --- measurements layer -------------------------------------------------

    /// Write a track into the measurements layer, fully overwriting any
    /// previous track with the same id (idempotent). Never touches the
    /// selection layer.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] for an absent run and
    /// [`Error::Validation`] for malformed samples.
    pub fn put_track(
        &mut self,
        id: &RunId,
        kind: TrackKind,
        track_id: u32,
        samples: Vec<Sample>,
    ) -> Result<()> {
        let track = Track::new(samples)?;
        let entry = self.entry_mut(id)?;
        entry.tracks_mut(kind).insert(track_id, track);
        Ok(())
    }

    /// Read a track; samples come back sorted by frame ascending.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] for an absent run or track.
    pub fn get_track(&self, id: &RunId, kind: TrackKind, track_id: u32) -> Result<&Track> {
        self.entry(id)?.tracks(kind).get(&track_id).ok_or_else(|| {
            Error::NotFound(format!("track {id}/{}/{}", kind, kind.format_id(track_id)))
        })
    }

    /// Track ids of one kind, sorted ascending.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] for an absent run.
    pub fn list_ids(&self, id: &RunId, kind: TrackKind) -> Result<Vec<u32>> {
        Ok(self.entry(id)?.tracks(kind).keys().copied().collect())
    }

    // --- raw layer ----------------------------------------------------------

    /// Store a raw frame supplied by ingestion. Overwrites any previous
    /// payload for the frame.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] for an absent run and
    /// [`Error::Validation`] for a negative frame index.
    pub fn put_raw_frame(&mut self, id: &RunId, frame: i32, payload: RawFrame) -> Result<()> {
        if frame < 0 {
            return Err(Error::Validation(format!("negative frame index {frame}")));
        }
        self.entry_mut(id)?.raw.insert(frame, payload);
        Ok(())
    }

    /// Read a raw frame.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] for an absent run or frame.
    pub fn raw_frame(&self, id: &RunId, frame: i32) -> Result<&RawFrame> {
        self.entry(id)?
            .raw
            .get(&frame)
            .ok_or_else(|| Error::NotFound(format!("raw frame {id}/raw/{frame:03}")))
    }

    /// Number of raw frames stored for a run.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] for an absent run.
    pub fn raw_frame_count(&self, id: &RunId) -> Result<usize> {
        Ok(self.entry(id)?.raw.len())
    }

    /// Replace the run's cell boundary rows. Stale boundary data is
    /// dropped first so the pipeline never merges duplicate columns.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] for an absent run.
    pub fn put_boundary(&mut self, id: &RunId, rows: Vec<BoundaryRow>) -> Result<()> {
        let entry = self.entry_mut(id)?;
        if !entry.boundary.is_empty() && !rows.is_empty() {
            tracing::info!(run = %id, "clearing stale cell boundary data");
        }
        entry.boundary = rows;
        Ok(())
    }

    // --- selection layer ----------------------------------------------------

    /// Link a centrosome to a nucleus group. Both tracks must already be
    /// measured; requiring the nucleus track is what guarantees the
    /// selection entry has a position reference from its first association.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] for an absent run or track, and
    /// [`Error::Conflict`] when the centrosome is already linked elsewhere
    /// (idempotent when identical); on conflict the state is unchanged.
    pub fn associate(
        &mut self,
        id: &RunId,
        centrosome: u32,
        nucleus: u32,
        group: Group,
    ) -> Result<()> {
        self.get_track(id, TrackKind::Centrosome, centrosome)?;
        self.get_track(id, TrackKind::Nucleus, nucleus)?;
        self.entry_mut(id)?.selection.associate(centrosome, nucleus, group)
    }

    /// Unlink a centrosome from a nucleus, whichever group holds it.
    /// No-op when the pair is not linked. Any committed processed rows
    /// referencing the pair are purged immediately, before any
    /// reprocessing, so stale derived numbers never remain queryable.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] for an absent run.
    pub fn delete_association(&mut self, id: &RunId, centrosome: u32, nucleus: u32) -> Result<()> {
        let entry = self.entry_mut(id)?;
        entry.selection.remove(centrosome, nucleus);
        if let Some(processed) = &mut entry.processed {
            processed.purge_pair(centrosome, nucleus);
        }
        Ok(())
    }

    /// Re-link a centrosome from one nucleus to another, as delete followed
    /// by associate. Known limitation: when the associate half fails (e.g.
    /// the target nucleus has no measurement track) the deleted link is NOT
    /// restored and the caller observes the centrosome unlinked.
    ///
    /// # Errors
    ///
    /// Returns any error of [`Self::delete_association`] or
    /// [`Self::associate`].
    pub fn move_association(
        &mut self,
        id: &RunId,
        centrosome: u32,
        from_nucleus: u32,
        to_nucleus: u32,
        group: Group,
    ) -> Result<()> {
        self.delete_association(id, centrosome, from_nucleus)?;
        self.associate(id, centrosome, to_nucleus, group)
    }

    /// Whether the centrosome is currently linked to any nucleus.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] for an absent run.
    pub fn is_associated(&self, id: &RunId, centrosome: u32) -> Result<bool> {
        Ok(self.entry(id)?.selection.is_associated(centrosome))
    }

    /// Drop every association of the run, and with them the committed
    /// processed output: after the clear no current association backs any
    /// processed row, so the whole output is discarded rather than left
    /// queryable. Reprocessing the emptied selection stays a no-op.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] for an absent run.
    pub fn clear_associations(&mut self, id: &RunId) -> Result<()> {
        let entry = self.entry_mut(id)?;
        entry.selection.clear();
        entry.processed = None;
        Ok(())
    }

    /// Default A/B pairing for freshly ingested runs: for every nucleus
    /// that two or more measured centrosomes point at, alternate its
    /// centrosomes (sorted by id) between groups A and B. Conflicts with
    /// existing curation are skipped, not overwritten.
    ///
    /// Returns the number of associations created.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] for an absent run or a hint referencing
    /// an unmeasured track.
    pub fn auto_pair_defaults(&mut self, id: &RunId, hints: &[(u32, u32)]) -> Result<usize> {
        let mut per_nucleus: BTreeMap<u32, Vec<u32>> = BTreeMap::new();
        for &(centrosome, nucleus) in hints {
            let slot = per_nucleus.entry(nucleus).or_default();
            if !slot.contains(&centrosome) {
                slot.push(centrosome);
            }
        }
        let mut created = 0;
        for (nucleus, mut centrosomes) in per_nucleus {
            if centrosomes.len() < 2 {
                continue;
            }
            centrosomes.sort_unstable();
            for (i, centrosome) in centrosomes.into_iter().enumerate() {
                let group = if i % 2 == 0 { Group::A } else { Group::B };
                match self.associate(id, centrosome, nucleus, group) {
                    Ok(()) => created += 1,
                    Err(Error::Conflict { .. }) => {}
                    Err(e) => return Err(e),
                }
            }
        }
        Ok(created)
    }

    // --- processed layer ----------------------------------------------------

    /// Committed processed output of a run, `None` before any reprocessing.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] for an absent run.
    pub fn processed(&self, id: &RunId) -> Result<Option<&ProcessedOutput>> {
        Ok(self.entry(id)?.processed.as_ref())
    }

    /// Reprocess one run against its current selection.
    ///
    /// The candidate output is computed fully in memory and then swapped in
    /// all-or-nothing; on failure the previous output stays committed. An
    /// empty selection is a no-op.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] for an absent run and
    /// [`Error::Pipeline`] naming the failing step.
    pub fn process_selection_for_run(
        &mut self,
        id: &RunId,
        config: &PipelineConfig,
    ) -> Result<()> {
        let entry = self.entry(id)?;
        let candidate = pipeline::compute(id, entry, config).map_err(|e| {
            tracing::warn!(run = %id, error = %e, "reprocessing failed, previous output kept");
            e
        })?;
        if let Some(output) = candidate {
            if let Some(entry) = self.runs.get_mut(id) {
                entry.processed = Some(output);
            }
        }
        Ok(())
    }

    /// Reprocess every run. Candidates are computed in parallel across
    /// independent runs (steps within a run stay strictly sequential);
    /// commits are applied sequentially afterwards. Per-run failures are
    /// collected and returned, never aborting the remaining runs.
    pub fn reprocess_all(&mut self, config: &PipelineConfig) -> Vec<(RunId, Error)> {
        let candidates: Vec<(RunId, Result<Option<ProcessedOutput>>)> = self
            .runs
            .par_iter()
            .map(|(id, entry)| (id.clone(), pipeline::compute(id, entry, config)))
            .collect();

        let mut failures = Vec::new();
        for (id, candidate) in candidates {
            match candidate {
                Ok(Some(output)) => {
                    if let Some(entry) = self.runs.get_mut(&id) {
                        entry.processed = Some(output);
                    }
                }
                Ok(None) => {}
                Err(e) => {
                    tracing::warn!(run = %id, error = %e, "reprocessing failed, previous output kept");
                    failures.push((id, e));
                }
            }
        }
        failures
    }

    pub(crate) fn insert_entry(&mut self, id: RunId, entry: RunEntry) {
        self.runs.insert(id, entry);
    }
}
