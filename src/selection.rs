//! Association index - the user-curated selection layer
//!
//! Curation tags each centrosome as belonging to group A or B of one
//! nucleus. The index is keyed by centrosome id so the uniqueness invariant
//! (a centrosome belongs to at most one group of at most one nucleus) is an
//! O(log n) lookup. Structural consistency here never depends on whether
//! the reprocessing pipeline has been re-run since the last edit.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Curation group of a centrosome within its nucleus.
///
/// The label encodes a physical convention: group A is the object moving
/// against the canonical direction, which is why the pipeline flips the
/// sign of its between-group speed and acceleration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Group {
    /// Leading object, sign-flipped convention
    A,
    /// Trailing object
    B,
}

impl fmt::Display for Group {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::A => "A",
            Self::B => "B",
        })
    }
}

impl FromStr for Group {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "A" => Ok(Self::A),
            "B" => Ok(Self::B),
            other => Err(Error::Validation(format!("unknown group label: {other:?}"))),
        }
    }
}

/// One curated link: a centrosome tagged as group A or B of a nucleus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Association {
    /// Nucleus owning the centrosome
    pub nucleus: u32,
    /// Group the centrosome was tagged with
    pub group: Group,
    /// The associated centrosome
    pub centrosome: u32,
}

/// Mutable mapping from nucleus to its A/B centrosome groups.
///
/// All iteration orders are deterministic (sorted by id), which keeps the
/// downstream pipeline byte-reproducible.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssociationIndex {
    by_centrosome: BTreeMap<u32, Association>,
    // Nuclei that own a selection entry. An entry survives the removal of
    // its last centrosome, matching the position reference the curation
    // layer keeps per nucleus.
    nuclei: BTreeSet<u32>,
}

impl AssociationIndex {
    /// Create an empty index.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Link a centrosome to a nucleus group.
    ///
    /// Idempotent when the identical association already exists. Creates
    /// the nucleus selection entry on first use.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Conflict`] when the centrosome is already linked to
    /// a different nucleus or group; the index is left unchanged.
    pub fn associate(&mut self, centrosome: u32, nucleus: u32, group: Group) -> Result<()> {
        if let Some(existing) = self.by_centrosome.get(&centrosome) {
            if existing.nucleus == nucleus && existing.group == group {
                return Ok(());
            }
            return Err(Error::Conflict {
                centrosome,
                nucleus: existing.nucleus,
                group: existing.group,
            });
        }
        self.nuclei.insert(nucleus);
        self.by_centrosome.insert(
            centrosome,
            Association {
                nucleus,
                group,
                centrosome,
            },
        );
        Ok(())
    }

    /// Unlink a centrosome from a nucleus, whichever group holds it.
    ///
    /// No-op (returns `false`) when the pair is not currently linked. The
    /// nucleus keeps its selection entry.
    pub fn remove(&mut self, centrosome: u32, nucleus: u32) -> bool {
        match self.by_centrosome.get(&centrosome) {
            Some(a) if a.nucleus == nucleus => {
                self.by_centrosome.remove(&centrosome);
                true
            }
            _ => false,
        }
    }

    /// Re-link a centrosome from one nucleus to another.
    ///
    /// Implemented as remove-then-associate. Known limitation carried over
    /// from the curation layer this replaces: when the associate half fails
    /// the removed link is NOT restored, so the caller observes the
    /// centrosome unlinked.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Conflict`] from the associate half.
    pub fn move_to(
        &mut self,
        centrosome: u32,
        from_nucleus: u32,
        to_nucleus: u32,
        group: Group,
    ) -> Result<()> {
        self.remove(centrosome, from_nucleus);
        self.associate(centrosome, to_nucleus, group)
    }

    /// Whether the centrosome is currently linked to any nucleus.
    #[must_use]
    pub fn is_associated(&self, centrosome: u32) -> bool {
        self.by_centrosome.contains_key(&centrosome)
    }

    /// Current association of a centrosome, if any.
    #[must_use]
    pub fn get(&self, centrosome: u32) -> Option<&Association> {
        self.by_centrosome.get(&centrosome)
    }

    /// Associations of one nucleus, sorted by (group, centrosome).
    #[must_use]
    pub fn associations_for(&self, nucleus: u32) -> Vec<Association> {
        let mut out: Vec<Association> = self
            .by_centrosome
            .values()
            .filter(|a| a.nucleus == nucleus)
            .copied()
            .collect();
        out.sort_by_key(|a| (a.group, a.centrosome));
        out
    }

    /// Nuclei with a selection entry, sorted ascending.
    #[must_use]
    pub fn nuclei(&self) -> Vec<u32> {
        self.nuclei.iter().copied().collect()
    }

    /// All associations, sorted by (nucleus, group, centrosome).
    pub fn iter(&self) -> impl Iterator<Item = &Association> {
        let mut all: Vec<&Association> = self.by_centrosome.values().collect();
        all.sort_by_key(|a| (a.nucleus, a.group, a.centrosome));
        all.into_iter()
    }

    /// Number of current associations.
    #[must_use]
    pub fn len(&self) -> usize {
        self.by_centrosome.len()
    }

    /// Whether no associations exist.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.by_centrosome.is_empty()
    }

    /// Drop every association and every nucleus selection entry.
    pub fn clear(&mut self) {
        self.by_centrosome.clear();
        self.nuclei.clear();
    }
}
