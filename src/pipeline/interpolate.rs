//! Interpolating step: fill internal frame gaps, never extrapolate
//!
//! Gaps inside a series' observed span get linearly interpolated centrosome
//! coordinates (in frame index) with the observed flag cleared, so the mask
//! can tell them apart downstream. Frames before the first or after the
//! last observation stay absent. Nucleus positions are completed the same
//! way from the nucleus' own track; cell boundary values are not invented
//! for inserted frames.

use super::merge::{MergedPoint, MergedSeries};

/// Fill internal gaps in every series, in place.
pub(crate) fn fill_gaps(series: &mut [MergedSeries<'_>]) {
    for s in series {
        let Some(first) = s.points.first().map(|p| p.frame) else {
            continue;
        };
        let last = s.points[s.points.len() - 1].frame;

        let mut filled = Vec::with_capacity(usize::try_from(last - first).unwrap_or(0) + 1);
        let mut existing = s.points.iter().peekable();
        for frame in first..=last {
            if let Some(p) = existing.peek() {
                if p.frame == frame {
                    filled.push(**p);
                    existing.next();
                    continue;
                }
            }
            // gap frames lie inside the observed span, so this never skips
            let Some((centr_x, centr_y)) = s.centr_track.interpolated_at(frame) else {
                continue;
            };
            filled.push(MergedPoint {
                frame,
                centr_x,
                centr_y,
                observed: false,
                nucl: None,
                cell: None,
            });
        }

        // complete nucleus positions from the nucleus' own span
        for p in &mut filled {
            if p.nucl.is_none() {
                p.nucl = s.nucl_track.interpolated_at(p.frame);
            }
        }
        s.points = filled;
    }
}
