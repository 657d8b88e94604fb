//! # centrodb: Hierarchical Store for Centrosome Tracking Experiments
//!
//! centrodb persists multi-modal microscopy experiment data - raw image
//! frames, per-frame track measurements, user-curated centrosome-to-nucleus
//! associations, and derived kinematic results - in one addressable
//! hierarchical store, and re-derives the kinematics whenever the curation
//! changes.
//!
//! Every experiment-run owns four layers:
//!
//! ```text
//! condition/run/raw           frames from ingestion (opaque pixel payloads)
//! condition/run/measurements  nucleus + centrosome tracks, boundary rows
//! condition/run/selection     curated A/B associations
//! condition/run/processed     one derived table + one validity mask
//! ```
//!
//! Data flows raw -> measurements -> selection (curation) -> processed
//! (reprocessing) -> aggregated analysis table. Reprocessing is
//! deterministic and idempotent: running it twice without a curation change
//! commits identical output.
//!
//! ## Example
//!
//! ```rust
//! use centrodb::path::TrackKind;
//! use centrodb::pipeline::PipelineConfig;
//! use centrodb::selection::Group;
//! use centrodb::track::Sample;
//! use centrodb::ExperimentStore;
//!
//! # fn main() -> centrodb::Result<()> {
//! let mut store = ExperimentStore::new();
//! let run = store.add_experiment("pc", "run_001", 1.0)?;
//!
//! store.put_track(&run, TrackKind::Nucleus, 1, vec![
//!     Sample::new(0, 0.0, 0.0),
//!     Sample::new(1, 0.1, 0.0),
//! ])?;
//! store.put_track(&run, TrackKind::Centrosome, 4, vec![
//!     Sample::new(0, 1.0, 0.0),
//!     Sample::new(1, 1.5, 0.0),
//! ])?;
//!
//! store.associate(&run, 4, 1, Group::A)?;
//! store.process_selection_for_run(&run, &PipelineConfig::default())?;
//!
//! let table = centrodb::aggregate::collect_all(&store)?;
//! assert_eq!(table.num_rows(), 2);
//! # Ok(())
//! # }
//! ```
//!
//! ## Concurrency model
//!
//! Single writer, no internal locking: callers serialize mutations
//! externally. [`ExperimentStore::reprocess_all`] parallelizes across
//! independent runs only; the steps within one run are strictly sequential.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

pub mod aggregate;
pub mod error;
pub mod path;
pub mod pipeline;
pub mod selection;
pub mod storage;
pub mod store;
pub mod track;

pub use error::{Error, Result};
pub use store::{ExperimentStore, RunId};
