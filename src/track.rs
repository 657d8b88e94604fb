//! Track model - time-ordered position samples for one tracked object
//!
//! Tracks are written once by ingestion and are immutable afterwards; the
//! pipeline only reads them. Samples are kept sorted by frame ascending, so
//! reads never pay a sort.

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// One observed position of a tracked object.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    /// Acquisition frame index
    pub frame: i32,
    /// X position in micrometers
    pub x: f64,
    /// Y position in micrometers
    pub y: f64,
}

impl Sample {
    /// Create a sample.
    #[must_use]
    pub const fn new(frame: i32, x: f64, y: f64) -> Self {
        Self { frame, x, y }
    }
}

/// Frame-ordered sequence of samples for one nucleus or centrosome.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Track {
    samples: Vec<Sample>,
}

impl Track {
    /// Build a track from samples, sorting them by frame ascending.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Validation`] when the track is empty, a frame index
    /// is negative, a coordinate is not finite, or two samples share a
    /// frame.
    pub fn new(mut samples: Vec<Sample>) -> Result<Self> {
        if samples.is_empty() {
            return Err(Error::Validation("track must hold at least one sample".into()));
        }
        for s in &samples {
            if s.frame < 0 {
                return Err(Error::Validation(format!("negative frame index {}", s.frame)));
            }
            if !s.x.is_finite() || !s.y.is_finite() {
                return Err(Error::Validation(format!(
                    "non-finite position at frame {}",
                    s.frame
                )));
            }
        }
        samples.sort_by_key(|s| s.frame);
        if samples.windows(2).any(|w| w[0].frame == w[1].frame) {
            return Err(Error::Validation("duplicate frame index in track".into()));
        }
        Ok(Self { samples })
    }

    /// Samples sorted by frame ascending.
    #[must_use]
    pub fn samples(&self) -> &[Sample] {
        &self.samples
    }

    /// Frame indices in ascending order.
    #[must_use]
    pub fn frames(&self) -> Vec<i32> {
        self.samples.iter().map(|s| s.frame).collect()
    }

    /// Position at an exact frame, `None` when the frame was not observed.
    #[must_use]
    pub fn position_at(&self, frame: i32) -> Option<(f64, f64)> {
        self.samples
            .binary_search_by_key(&frame, |s| s.frame)
            .ok()
            .map(|i| (self.samples[i].x, self.samples[i].y))
    }

    /// First observed frame.
    #[must_use]
    pub fn min_frame(&self) -> i32 {
        self.samples[0].frame
    }

    /// Last observed frame.
    #[must_use]
    pub fn max_frame(&self) -> i32 {
        self.samples[self.samples.len() - 1].frame
    }

    /// Number of observed samples.
    #[must_use]
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    /// Whether the track holds no samples (never true for a built track).
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Position at a frame, linearly interpolated from the bracketing
    /// observed samples when the frame falls inside the observed span.
    /// No extrapolation: frames before the first or after the last sample
    /// return `None`.
    #[must_use]
    pub fn interpolated_at(&self, frame: i32) -> Option<(f64, f64)> {
        if let Some(pos) = self.position_at(frame) {
            return Some(pos);
        }
        if frame < self.min_frame() || frame > self.max_frame() {
            return None;
        }
        let next = self.samples.iter().position(|s| s.frame > frame)?;
        let (lo, hi) = (&self.samples[next - 1], &self.samples[next]);
        let t = f64::from(frame - lo.frame) / f64::from(hi.frame - lo.frame);
        Some((lo.x + (hi.x - lo.x) * t, lo.y + (hi.y - lo.y) * t))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_track_sorts_by_frame() {
        let track = Track::new(vec![
            Sample::new(2, 2.0, 2.0),
            Sample::new(0, 0.0, 0.0),
            Sample::new(1, 1.0, 1.0),
        ])
        .unwrap();
        assert_eq!(track.frames(), vec![0, 1, 2]);
        assert_eq!(track.min_frame(), 0);
        assert_eq!(track.max_frame(), 2);
    }

    #[test]
    fn test_track_rejects_bad_input() {
        assert!(Track::new(vec![]).is_err());
        assert!(Track::new(vec![Sample::new(-1, 0.0, 0.0)]).is_err());
        assert!(Track::new(vec![Sample::new(0, f64::NAN, 0.0)]).is_err());
        assert!(Track::new(vec![Sample::new(1, 0.0, 0.0), Sample::new(1, 1.0, 1.0)]).is_err());
    }

    #[test]
    fn test_interpolated_at_fills_internal_gaps_only() {
        let track = Track::new(vec![
            Sample::new(0, 0.0, 0.0),
            Sample::new(1, 1.0, 2.0),
            Sample::new(3, 3.0, 6.0),
        ])
        .unwrap();
        // observed frames pass through untouched
        assert_eq!(track.interpolated_at(1), Some((1.0, 2.0)));
        // internal gap is linear in frame index
        assert_eq!(track.interpolated_at(2), Some((2.0, 4.0)));
        // no extrapolation at either end
        assert_eq!(track.interpolated_at(-1), None);
        assert_eq!(track.interpolated_at(4), None);
    }
}
