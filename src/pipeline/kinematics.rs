//! Deriving step: distances, speeds, accelerations
//!
//! All finite differences run over the reconstructed time axis
//! (`frame * frame_interval`), not the raw frame count, so variable frame
//! intervals come out right. A zero time-delta yields `None`, never an
//! error, as does the first frame of any differenced quantity.

use std::collections::BTreeMap;

use super::merge::MergedSeries;
use super::table::ProcessedRow;
use crate::selection::Group;

/// One derived row plus the observation provenance the masking step needs.
#[derive(Debug, Clone)]
pub(crate) struct DerivedRow {
    pub row: ProcessedRow,
    /// Centrosome coordinates directly observed on this frame
    pub observed: bool,
    /// Both group members' coordinates directly observed on this frame
    pub pair_observed: bool,
}

fn diff(curr: Option<f64>, prev: Option<f64>, dt: f64) -> Option<f64> {
    match (curr, prev) {
        (Some(c), Some(p)) if dt > 0.0 => Some((c - p) / dt),
        _ => None,
    }
}

/// Derive per-frame kinematics for every series, then between-group
/// kinematics per nucleus on the frames where exactly one member of each
/// group is present.
pub(crate) fn derive(series: &[MergedSeries<'_>], frame_interval: f64) -> Vec<DerivedRow> {
    let mut rows: Vec<DerivedRow> = Vec::new();

    for s in series {
        let start = rows.len();
        for p in &s.points {
            let dist = p
                .nucl
                .map(|(nx, ny)| (p.centr_x - nx).hypot(p.centr_y - ny));
            rows.push(DerivedRow {
                row: ProcessedRow {
                    frame: p.frame,
                    time: f64::from(p.frame) * frame_interval,
                    nucleus: s.nucleus,
                    centrosome: s.centrosome,
                    group: s.group,
                    centr_x: p.centr_x,
                    centr_y: p.centr_y,
                    nucl_x: p.nucl.map(|(nx, _)| nx),
                    nucl_y: p.nucl.map(|(_, ny)| ny),
                    dist,
                    speed: None,
                    acc: None,
                    dist_centr: None,
                    speed_centr: None,
                    acc_centr: None,
                    cell_x: p.cell.map(|c| c.cell_x),
                    cell_y: p.cell.map(|c| c.cell_y),
                    dist_cell: p.cell.and_then(|c| c.dist_cell),
                },
                observed: p.observed,
                pair_observed: false,
            });
        }
        // finite differences along this series' time axis
        for i in (start + 1)..rows.len() {
            let dt = rows[i].row.time - rows[i - 1].row.time;
            rows[i].row.speed = diff(rows[i].row.dist, rows[i - 1].row.dist, dt);
        }
        for i in (start + 1)..rows.len() {
            let dt = rows[i].row.time - rows[i - 1].row.time;
            rows[i].row.acc = diff(rows[i].row.speed, rows[i - 1].row.speed, dt);
        }
    }

    derive_between_groups(&mut rows);
    rows
}

/// Between-group distance/speed/acceleration per nucleus.
///
/// A frame contributes only when each group holds exactly one member row on
/// it; the derived values land on both member rows so the sign correction
/// can later flip one side's convention.
fn derive_between_groups(rows: &mut [DerivedRow]) {
    // (nucleus, frame) -> member row indices per group
    let mut members: BTreeMap<(u32, i32), (Vec<usize>, Vec<usize>)> = BTreeMap::new();
    for (i, r) in rows.iter().enumerate() {
        let slot = members.entry((r.row.nucleus, r.row.frame)).or_default();
        match r.row.group {
            Group::A => slot.0.push(i),
            Group::B => slot.1.push(i),
        }
    }

    // per nucleus, frames with a well-defined pair, in frame order
    let mut paired: BTreeMap<u32, Vec<(i32, usize, usize)>> = BTreeMap::new();
    for (&(nucleus, frame), (a, b)) in &members {
        if let ([ia], [ib]) = (a.as_slice(), b.as_slice()) {
            paired.entry(nucleus).or_default().push((frame, *ia, *ib));
        }
    }

    for frames in paired.values() {
        for &(_, ia, ib) in frames {
            let (ax, ay) = (rows[ia].row.centr_x, rows[ia].row.centr_y);
            let (bx, by) = (rows[ib].row.centr_x, rows[ib].row.centr_y);
            let d = (ax - bx).hypot(ay - by);
            rows[ia].row.dist_centr = Some(d);
            rows[ib].row.dist_centr = Some(d);
            let both = rows[ia].observed && rows[ib].observed;
            rows[ia].pair_observed = both;
            rows[ib].pair_observed = both;
        }
        // speed/acc over consecutive paired frames
        for w in 1..frames.len() {
            let (_, ia, ib) = frames[w];
            let (_, pa, _) = frames[w - 1];
            let dt = rows[ia].row.time - rows[pa].row.time;
            let v = diff(rows[ia].row.dist_centr, rows[pa].row.dist_centr, dt);
            rows[ia].row.speed_centr = v;
            rows[ib].row.speed_centr = v;
        }
        for w in 1..frames.len() {
            let (_, ia, ib) = frames[w];
            let (_, pa, _) = frames[w - 1];
            let dt = rows[ia].row.time - rows[pa].row.time;
            let a = diff(rows[ia].row.speed_centr, rows[pa].row.speed_centr, dt);
            rows[ia].row.acc_centr = a;
            rows[ib].row.acc_centr = a;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::super::interpolate::fill_gaps;
    use super::super::merge::merge;
    use super::*;
    use crate::selection::AssociationIndex;
    use crate::track::{Sample, Track};

    fn track(samples: &[(i32, f64, f64)]) -> Track {
        Track::new(samples.iter().map(|&(f, x, y)| Sample::new(f, x, y)).collect()).unwrap()
    }

    fn one_series() -> Vec<DerivedRow> {
        let mut nuclei = BTreeMap::new();
        nuclei.insert(1, track(&[(0, 0.0, 0.0), (1, 0.0, 0.0), (2, 0.0, 0.0)]));
        let mut centrosomes = BTreeMap::new();
        centrosomes.insert(4, track(&[(0, 1.0, 0.0), (1, 3.0, 0.0), (2, 6.0, 0.0)]));
        let mut selection = AssociationIndex::new();
        selection.associate(4, 1, Group::A).unwrap();
        let mut series = merge(&nuclei, &centrosomes, &selection, &[]).unwrap();
        fill_gaps(&mut series);
        derive(&series, 2.0)
    }

    #[test]
    fn test_speed_uses_time_axis_not_frame_count() {
        let rows = one_series();
        // dist goes 1 -> 3 -> 6 over dt = 2 minutes per frame
        assert_eq!(rows[0].row.speed, None);
        assert!((rows[1].row.speed.unwrap() - 1.0).abs() < 1e-12);
        assert!((rows[2].row.speed.unwrap() - 1.5).abs() < 1e-12);
        // acc from speeds 1.0 -> 1.5 over dt = 2
        assert_eq!(rows[1].row.acc, None);
        assert!((rows[2].row.acc.unwrap() - 0.25).abs() < 1e-12);
    }

    #[test]
    fn test_zero_time_delta_yields_undefined() {
        assert_eq!(diff(Some(2.0), Some(1.0), 0.0), None);
        assert_eq!(diff(Some(2.0), None, 1.0), None);
    }

    #[test]
    fn test_between_group_needs_both_members() {
        let mut nuclei = BTreeMap::new();
        nuclei.insert(1, track(&[(0, 0.0, 0.0), (1, 0.0, 0.0)]));
        let mut centrosomes = BTreeMap::new();
        centrosomes.insert(4, track(&[(0, 3.0, 0.0), (1, 3.0, 0.0)]));
        centrosomes.insert(5, track(&[(0, 0.0, 4.0)])); // absent on frame 1
        let mut selection = AssociationIndex::new();
        selection.associate(4, 1, Group::A).unwrap();
        selection.associate(5, 1, Group::B).unwrap();

        let mut series = merge(&nuclei, &centrosomes, &selection, &[]).unwrap();
        fill_gaps(&mut series);
        let rows = derive(&series, 1.0);

        let a0 = rows.iter().find(|r| r.row.centrosome == 4 && r.row.frame == 0).unwrap();
        let b0 = rows.iter().find(|r| r.row.centrosome == 5 && r.row.frame == 0).unwrap();
        let a1 = rows.iter().find(|r| r.row.centrosome == 4 && r.row.frame == 1).unwrap();
        assert!((a0.row.dist_centr.unwrap() - 5.0).abs() < 1e-12);
        assert_eq!(a0.row.dist_centr, b0.row.dist_centr);
        assert!(a0.pair_observed);
        assert_eq!(a1.row.dist_centr, None);
        assert!(!a1.pair_observed);
    }
}
