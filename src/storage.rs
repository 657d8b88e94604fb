//! Directory-backed persistence for the hierarchical store
//!
//! The on-disk layout mirrors the canonical addressing scheme: every node
//! lives under `root/<condition>/<run>/<layer>/...` exactly as
//! [`crate::path::NodeKey`] spells it. Tracks, selection, boundary rows and
//! run metadata are JSON; raw frame channels are opaque binary blobs; the
//! processed layer is exactly one `table.parquet` plus one `mask.parquet`
//! per run, never multiple versions.
//!
//! `save` rewrites every listed run subtree from scratch and updates the
//! manifest; runs deleted from the store stop being listed but their bytes
//! stay behind (like the in-place file mutation this replaces). `compact`
//! rewrites the whole tree and swaps it in, reclaiming that space while
//! preserving every addressable path.

use std::collections::BTreeMap;
use std::fs::{self, File};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use parquet::arrow::ArrowWriter;
use serde::{Deserialize, Serialize};

use arrow::record_batch::RecordBatch;

use crate::aggregate::{mask_batch, output_from_batches, table_batch};
use crate::path::{Layer, NodeKey, TrackKind};
use crate::selection::AssociationIndex;
use crate::store::{BoundaryRow, ExperimentStore, RawFrame, RunEntry, RunId};
use crate::track::Track;
use crate::{Error, Result};

const MANIFEST: &str = "manifest.json";
const RUN_META: &str = "meta.json";
const BOUNDARY: &str = "boundary.json";
const ASSOCIATIONS: &str = "associations.json";
const TABLE_PARQUET: &str = "table.parquet";
const MASK_PARQUET: &str = "mask.parquet";

#[derive(Debug, Serialize, Deserialize)]
struct Manifest {
    runs: Vec<RunId>,
}

#[derive(Debug, Serialize, Deserialize)]
struct RunMeta {
    created_at: DateTime<Utc>,
    frame_interval: f64,
}

#[derive(Debug, Serialize, Deserialize)]
struct FrameMeta {
    resolution: Option<f64>,
    channel_count: usize,
}

/// A directory holding one persisted [`ExperimentStore`].
#[derive(Debug, Clone)]
pub struct NexusDir {
    root: PathBuf,
}

impl NexusDir {
    /// Address a store directory (which need not exist yet).
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// The store's root directory.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn layer_dir(&self, id: &RunId, layer: Layer) -> Result<PathBuf> {
        let key = NodeKey::layer(&id.condition, &id.run, layer)?;
        Ok(self.root.join(key.to_string()))
    }

    /// Persist the whole store.
    ///
    /// Nodes are written at their addressable paths; runs dropped from the
    /// store stop being listed in the manifest but their bytes stay on
    /// disk until [`Self::compact`] runs.
    ///
    /// # Errors
    ///
    /// Returns IO, JSON, or Parquet errors from the underlying writes.
    pub fn save(&self, store: &ExperimentStore) -> Result<()> {
        fs::create_dir_all(&self.root)?;
        let mut manifest = Manifest { runs: Vec::new() };
        for (id, entry) in store.runs() {
            self.save_run(id, entry)?;
            manifest.runs.push(id.clone());
        }
        write_json(&self.root.join(MANIFEST), &manifest)
    }

    fn save_run(&self, id: &RunId, entry: &RunEntry) -> Result<()> {
        let run_dir = self.root.join(&id.condition).join(&id.run);
        // rewrite the subtree from scratch: entities dropped from a
        // still-listed run must not resurface on the next load
        if run_dir.exists() {
            fs::remove_dir_all(&run_dir)?;
        }
        fs::create_dir_all(&run_dir)?;
        write_json(
            &run_dir.join(RUN_META),
            &RunMeta {
                created_at: entry.created_at(),
                frame_interval: entry.frame_interval(),
            },
        )?;

        let raw_dir = self.layer_dir(id, Layer::Raw)?;
        for (&frame, payload) in entry.raw_frames() {
            let frame_dir = raw_dir.join(format!("frame-{frame:03}"));
            fs::create_dir_all(&frame_dir)?;
            write_json(
                &frame_dir.join(RUN_META),
                &FrameMeta {
                    resolution: payload.resolution,
                    channel_count: payload.channels.len(),
                },
            )?;
            for (i, channel) in payload.channels.iter().enumerate() {
                fs::write(frame_dir.join(format!("channel-{i}.bin")), channel)?;
            }
        }

        let meas_dir = self.layer_dir(id, Layer::Measurements)?;
        for kind in [TrackKind::Nucleus, TrackKind::Centrosome] {
            let kind_dir = meas_dir.join(kind.as_str());
            fs::create_dir_all(&kind_dir)?;
            let tracks = match kind {
                TrackKind::Nucleus => entry.nuclei(),
                TrackKind::Centrosome => entry.centrosomes(),
            };
            for (&track_id, track) in tracks {
                let file = kind_dir.join(format!("{}.json", kind.format_id(track_id)));
                write_json(&file, track)?;
            }
        }
        if !entry.boundary().is_empty() {
            write_json(&meas_dir.join(BOUNDARY), &entry.boundary().to_vec())?;
        }

        let sel_dir = self.layer_dir(id, Layer::Selection)?;
        fs::create_dir_all(&sel_dir)?;
        write_json(&sel_dir.join(ASSOCIATIONS), entry.selection())?;

        let proc_dir = self.layer_dir(id, Layer::Processed)?;
        fs::create_dir_all(&proc_dir)?;
        if let Some(out) = entry.processed() {
            write_parquet(
                &proc_dir.join(TABLE_PARQUET),
                &table_batch(id, entry.frame_interval(), out)?,
            )?;
            write_parquet(
                &proc_dir.join(MASK_PARQUET),
                &mask_batch(id, entry.frame_interval(), out)?,
            )?;
        }
        Ok(())
    }

    /// Load the persisted store.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] when no manifest exists, and IO/JSON/
    /// Parquet errors for a corrupt layout.
    pub fn load(&self) -> Result<ExperimentStore> {
        let manifest_path = self.root.join(MANIFEST);
        if !manifest_path.exists() {
            return Err(Error::NotFound(format!(
                "store manifest {}",
                manifest_path.display()
            )));
        }
        let manifest: Manifest = read_json(&manifest_path)?;
        let mut store = ExperimentStore::new();
        for id in manifest.runs {
            let entry = self.load_run(&id)?;
            store.insert_entry(id, entry);
        }
        Ok(store)
    }

    fn load_run(&self, id: &RunId) -> Result<RunEntry> {
        let run_dir = self.root.join(&id.condition).join(&id.run);
        let meta: RunMeta = read_json(&run_dir.join(RUN_META))?;

        let mut raw = BTreeMap::new();
        let raw_dir = self.layer_dir(id, Layer::Raw)?;
        if raw_dir.is_dir() {
            for dir in fs::read_dir(&raw_dir)? {
                let frame_dir = dir?.path();
                let name = frame_dir
                    .file_name()
                    .and_then(|n| n.to_str())
                    .unwrap_or_default()
                    .to_string();
                let Some(digits) = name.strip_prefix("frame-") else {
                    continue;
                };
                let frame: i32 = digits.parse().map_err(|_| {
                    Error::Storage(format!("malformed raw frame directory {name:?}"))
                })?;
                let frame_meta: FrameMeta = read_json(&frame_dir.join(RUN_META))?;
                let mut channels = Vec::with_capacity(frame_meta.channel_count);
                for i in 0..frame_meta.channel_count {
                    channels.push(fs::read(frame_dir.join(format!("channel-{i}.bin")))?);
                }
                raw.insert(
                    frame,
                    RawFrame {
                        channels,
                        resolution: frame_meta.resolution,
                    },
                );
            }
        }

        let meas_dir = self.layer_dir(id, Layer::Measurements)?;
        let mut nuclei = BTreeMap::new();
        let mut centrosomes = BTreeMap::new();
        for kind in [TrackKind::Nucleus, TrackKind::Centrosome] {
            let kind_dir = meas_dir.join(kind.as_str());
            if !kind_dir.is_dir() {
                continue;
            }
            for file in fs::read_dir(&kind_dir)? {
                let path = file?.path();
                let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
                    continue;
                };
                let track_id = kind.parse_id(stem)?;
                let track: Track = read_json(&path)?;
                match kind {
                    TrackKind::Nucleus => nuclei.insert(track_id, track),
                    TrackKind::Centrosome => centrosomes.insert(track_id, track),
                };
            }
        }
        let boundary_path = meas_dir.join(BOUNDARY);
        let boundary: Vec<BoundaryRow> = if boundary_path.exists() {
            read_json(&boundary_path)?
        } else {
            Vec::new()
        };

        let sel_path = self.layer_dir(id, Layer::Selection)?.join(ASSOCIATIONS);
        let selection: AssociationIndex = if sel_path.exists() {
            read_json(&sel_path)?
        } else {
            AssociationIndex::new()
        };

        let proc_dir = self.layer_dir(id, Layer::Processed)?;
        let table_path = proc_dir.join(TABLE_PARQUET);
        let mask_path = proc_dir.join(MASK_PARQUET);
        let processed = match (table_path.exists(), mask_path.exists()) {
            (true, true) => Some(output_from_batches(
                &read_parquet(&table_path)?,
                &read_parquet(&mask_path)?,
            )?),
            (false, false) => None,
            _ => {
                return Err(Error::Storage(format!(
                    "processed layer of {id} holds a table/mask pair only partially"
                )))
            }
        };

        Ok(RunEntry {
            created_at: meta.created_at,
            frame_interval: meta.frame_interval,
            raw,
            nuclei,
            centrosomes,
            boundary,
            selection,
            processed,
        })
    }

    /// Rewrite the store directory to reclaim space left by deletions.
    ///
    /// Loads the current state, writes it into a fresh sibling directory,
    /// and swaps the directories via rename, so every addressable path
    /// survives. Must only run while no pipeline run is in flight (the
    /// store is single-writer; this operation replaces the whole tree).
    ///
    /// # Errors
    ///
    /// Returns IO errors from the rewrite or the swap.
    pub fn compact(&self) -> Result<()> {
        let store = self.load()?;
        let scratch = self.root.with_extension("compact-tmp");
        if scratch.exists() {
            fs::remove_dir_all(&scratch)?;
        }
        NexusDir::new(&scratch).save(&store)?;
        fs::remove_dir_all(&self.root)?;
        fs::rename(&scratch, &self.root)?;
        tracing::info!(root = %self.root.display(), runs = store.run_count(), "store compacted");
        Ok(())
    }
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let file = File::create(path)?;
    serde_json::to_writer(file, value)?;
    Ok(())
}

fn read_json<T: for<'de> Deserialize<'de>>(path: &Path) -> Result<T> {
    let file = File::open(path)?;
    Ok(serde_json::from_reader(file)?)
}

fn write_parquet(path: &Path, batch: &RecordBatch) -> Result<()> {
    let file = File::create(path)?;
    let mut writer = ArrowWriter::try_new(file, batch.schema(), None)?;
    writer.write(batch)?;
    writer.close()?;
    Ok(())
}

fn read_parquet(path: &Path) -> Result<RecordBatch> {
    let file = File::open(path)?;
    let builder = ParquetRecordBatchReaderBuilder::try_new(file)?;
    let schema = builder.schema().clone();
    let reader = builder.build()?;
    let mut batches = Vec::new();
    for batch in reader {
        batches.push(batch?);
    }
    if batches.is_empty() {
        return Ok(RecordBatch::new_empty(schema));
    }
    Ok(arrow::compute::concat_batches(&schema, batches.iter())?)
}
