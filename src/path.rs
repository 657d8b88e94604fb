//! Canonical addressing for the hierarchical store
//!
//! Every node in the store is reachable through a key of the form
//! `condition/run/layer` or `condition/run/layer/kind/entity`, e.g.
//! `pc/run_001/measurements/centrosomes/C003`. Formatting is deterministic
//! (no timestamps, no randomness) and parsing recovers the exact tuple, so
//! keys are stable across process restarts and usable as on-disk paths.

use std::fmt;
use std::str::FromStr;

use crate::{Error, Result};

/// One of the four layers owned by every experiment-run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Layer {
    /// Raw per-frame pixel data, written once by ingestion
    Raw,
    /// Per-object track measurements, written once by ingestion
    Measurements,
    /// User-curated centrosome-to-nucleus associations
    Selection,
    /// Committed output of the reprocessing pipeline
    Processed,
}

impl Layer {
    /// Canonical key segment for this layer.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Raw => "raw",
            Self::Measurements => "measurements",
            Self::Selection => "selection",
            Self::Processed => "processed",
        }
    }

    /// All layers in their canonical order.
    #[must_use]
    pub const fn all() -> [Self; 4] {
        [Self::Raw, Self::Measurements, Self::Selection, Self::Processed]
    }
}

impl fmt::Display for Layer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Layer {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "raw" => Ok(Self::Raw),
            "measurements" => Ok(Self::Measurements),
            "selection" => Ok(Self::Selection),
            "processed" => Ok(Self::Processed),
            other => Err(Error::Validation(format!("unknown layer segment: {other:?}"))),
        }
    }
}

/// Category of a tracked object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum TrackKind {
    /// Nucleus track, `N%02d` entity segments
    Nucleus,
    /// Centrosome track, `C%03d` entity segments
    Centrosome,
}

impl TrackKind {
    /// Canonical key segment for this kind (the plural group name).
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Nucleus => "nuclei",
            Self::Centrosome => "centrosomes",
        }
    }

    const fn prefix(self) -> char {
        match self {
            Self::Nucleus => 'N',
            Self::Centrosome => 'C',
        }
    }

    /// Format a numeric id as its canonical entity segment (`N02`, `C003`).
    #[must_use]
    pub fn format_id(self, id: u32) -> String {
        match self {
            Self::Nucleus => format!("N{id:02}"),
            Self::Centrosome => format!("C{id:03}"),
        }
    }

    /// Parse an entity segment back into a numeric id.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Validation`] when the prefix does not match this
    /// kind or the remainder is not an unsigned decimal number (signs and
    /// empty ids are rejected).
    pub fn parse_id(self, segment: &str) -> Result<u32> {
        let digits = segment.strip_prefix(self.prefix()).ok_or_else(|| {
            Error::Validation(format!(
                "entity segment {segment:?} does not carry the {:?} prefix",
                self.prefix()
            ))
        })?;
        if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
            return Err(Error::Validation(format!(
                "entity segment {segment:?} is not a non-negative decimal id"
            )));
        }
        digits
            .parse::<u32>()
            .map_err(|e| Error::Validation(format!("entity segment {segment:?}: {e}")))
    }
}

impl fmt::Display for TrackKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TrackKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "nuclei" => Ok(Self::Nucleus),
            "centrosomes" => Ok(Self::Centrosome),
            other => Err(Error::Validation(format!("unknown track kind segment: {other:?}"))),
        }
    }
}

/// Reject condition/run segments that would break key parsing.
pub(crate) fn validate_segment(label: &str, segment: &str) -> Result<()> {
    if segment.is_empty() {
        return Err(Error::Validation(format!("{label} segment must not be empty")));
    }
    if segment.contains('/') {
        return Err(Error::Validation(format!(
            "{label} segment {segment:?} must not contain '/'"
        )));
    }
    Ok(())
}

/// Fully-qualified address of a node in the hierarchical store.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeKey {
    /// Condition tag of the owning experiment
    pub condition: String,
    /// Run id within the condition
    pub run: String,
    /// Layer the node lives in
    pub layer: Layer,
    /// Entity address within the layer, `None` for the layer root
    pub entity: Option<(TrackKind, u32)>,
}

impl NodeKey {
    /// Address a layer root for an experiment-run.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Validation`] for empty or slash-containing segments.
    pub fn layer(condition: &str, run: &str, layer: Layer) -> Result<Self> {
        validate_segment("condition", condition)?;
        validate_segment("run", run)?;
        Ok(Self {
            condition: condition.to_string(),
            run: run.to_string(),
            layer,
            entity: None,
        })
    }

    /// Address a track node under the measurements layer.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Validation`] for malformed condition/run segments.
    pub fn track(condition: &str, run: &str, kind: TrackKind, id: u32) -> Result<Self> {
        let mut key = Self::layer(condition, run, Layer::Measurements)?;
        key.entity = Some((kind, id));
        Ok(key)
    }

    /// Parse a canonical key string back into its address tuple.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Validation`] for any malformed segment; no store
    /// access happens on the error path.
    pub fn parse(key: &str) -> Result<Self> {
        let segments: Vec<&str> = key.split('/').collect();
        match segments.as_slice() {
            [condition, run, layer] => {
                let mut parsed = Self::layer(condition, run, layer.parse()?)?;
                parsed.entity = None;
                Ok(parsed)
            }
            [condition, run, layer, kind, entity] => {
                let kind: TrackKind = kind.parse()?;
                let id = kind.parse_id(entity)?;
                let mut parsed = Self::layer(condition, run, layer.parse()?)?;
                parsed.entity = Some((kind, id));
                Ok(parsed)
            }
            _ => Err(Error::Validation(format!(
                "key {key:?} must have 3 or 5 segments, found {}",
                segments.len()
            ))),
        }
    }
}

impl fmt::Display for NodeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.condition, self.run, self.layer)?;
        if let Some((kind, id)) = &self.entity {
            write!(f, "/{}/{}", kind, kind.format_id(*id))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_track_key_round_trip() {
        let key = NodeKey::track("pc", "run_001", TrackKind::Centrosome, 3).unwrap();
        let s = key.to_string();
        assert_eq!(s, "pc/run_001/measurements/centrosomes/C003");
        assert_eq!(NodeKey::parse(&s).unwrap(), key);
    }

    #[test]
    fn test_layer_key_round_trip() {
        let key = NodeKey::layer("pc", "run_001", Layer::Processed).unwrap();
        assert_eq!(key.to_string(), "pc/run_001/processed");
        assert_eq!(NodeKey::parse("pc/run_001/processed").unwrap(), key);
    }

    #[test]
    fn test_distinct_tuples_never_collide() {
        let a = NodeKey::track("pc", "run_001", TrackKind::Nucleus, 2).unwrap();
        let b = NodeKey::track("pc", "run_001", TrackKind::Centrosome, 2).unwrap();
        assert_ne!(a.to_string(), b.to_string());
    }

    #[test]
    fn test_malformed_ids_rejected() {
        assert!(TrackKind::Centrosome.parse_id("C-01").is_err());
        assert!(TrackKind::Centrosome.parse_id("Cxyz").is_err());
        assert!(TrackKind::Centrosome.parse_id("C").is_err());
        assert!(TrackKind::Nucleus.parse_id("C003").is_err());
        assert!(TrackKind::Nucleus.parse_id("N+2").is_err());
    }

    #[test]
    fn test_malformed_segments_rejected() {
        assert!(NodeKey::layer("", "run_001", Layer::Raw).is_err());
        assert!(NodeKey::layer("pc/x", "run_001", Layer::Raw).is_err());
        assert!(NodeKey::parse("pc/run_001/plots").is_err());
        assert!(NodeKey::parse("pc/run_001").is_err());
    }

    #[test]
    fn test_wide_ids_still_round_trip() {
        let key = NodeKey::track("pc", "run_001", TrackKind::Centrosome, 1234).unwrap();
        assert_eq!(key.to_string(), "pc/run_001/measurements/centrosomes/C1234");
        assert_eq!(NodeKey::parse(&key.to_string()).unwrap(), key);
    }
}
