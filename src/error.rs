//! Error types for centrodb
//!
//! Every store mutation surfaces its failure to the caller; nothing is
//! downgraded to a default value. The only designed "missing" outcomes are
//! the interpolation mask and the undefined kinematic values, and those are
//! `Option`s in the data model, not errors.

use thiserror::Error;

use crate::pipeline::Step;
use crate::selection::Group;

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

/// centrodb error types
#[derive(Error, Debug)]
pub enum Error {
    /// Referenced run, track, or frame is absent from the store
    #[error("not found: {0}")]
    NotFound(String),

    /// Association invariant violated; store state is unchanged
    #[error("association conflict: centrosome C{centrosome:03} is already linked to nucleus N{nucleus:02} group {group}")]
    Conflict {
        /// Centrosome id the caller tried to (re-)associate
        centrosome: u32,
        /// Nucleus currently holding the centrosome
        nucleus: u32,
        /// Group currently holding the centrosome
        group: Group,
    },

    /// Failure inside reprocessing steps; the run's previous processed
    /// output is left at its last good state and other runs are unaffected
    #[error("pipeline failure for {condition}/{run} during {step}: {message}")]
    Pipeline {
        /// Condition tag of the failing run
        condition: String,
        /// Run id of the failing run
        run: String,
        /// Pipeline step that raised the failure
        step: Step,
        /// Underlying diagnostic
        message: String,
    },

    /// Malformed path, id, or input, rejected before any store mutation
    #[error("validation error: {0}")]
    Validation(String),

    /// Persistence layout error
    #[error("storage error: {0}")]
    Storage(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Arrow error
    #[error("Arrow error: {0}")]
    Arrow(#[from] arrow::error::ArrowError),

    /// Parquet error
    #[error("Parquet error: {0}")]
    Parquet(#[from] parquet::errors::ParquetError),

    /// JSON (de)serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
