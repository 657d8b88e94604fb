//! Merging step: join measurement tracks with the current curation
//!
//! Produces one series per association, carrying only directly observed
//! centrosome frames. Centrosomes without an association are dropped here
//! (they stay untouched in the measurements layer); cell boundary rows are
//! left-joined by (frame, nucleus).

use std::collections::BTreeMap;

use crate::selection::{AssociationIndex, Group};
use crate::store::BoundaryRow;
use crate::track::Track;

/// Boundary fields joined onto one row.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct CellJoin {
    pub cell_x: f64,
    pub cell_y: f64,
    pub dist_cell: Option<f64>,
}

/// One frame of a merged series.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct MergedPoint {
    pub frame: i32,
    pub centr_x: f64,
    pub centr_y: f64,
    /// Directly observed coordinates; interpolation clears this flag on
    /// the frames it inserts.
    pub observed: bool,
    pub nucl: Option<(f64, f64)>,
    pub cell: Option<CellJoin>,
}

/// All frames of one (nucleus, group, centrosome) association.
#[derive(Debug)]
pub(crate) struct MergedSeries<'a> {
    pub nucleus: u32,
    pub group: Group,
    pub centrosome: u32,
    pub centr_track: &'a Track,
    pub nucl_track: &'a Track,
    pub points: Vec<MergedPoint>,
}

/// Join centrosome tracks with the association index and boundary data.
///
/// Series come out sorted by (nucleus, group, centrosome), keeping the
/// whole pipeline deterministic.
pub(crate) fn merge<'a>(
    nuclei: &'a BTreeMap<u32, Track>,
    centrosomes: &'a BTreeMap<u32, Track>,
    selection: &AssociationIndex,
    boundary: &[BoundaryRow],
) -> Result<Vec<MergedSeries<'a>>, String> {
    let cells: BTreeMap<(i32, u32), CellJoin> = boundary
        .iter()
        .map(|b| {
            (
                (b.frame, b.nucleus),
                CellJoin {
                    cell_x: b.cell_x,
                    cell_y: b.cell_y,
                    dist_cell: b.dist_cell,
                },
            )
        })
        .collect();

    let mut series = Vec::with_capacity(selection.len());
    for assoc in selection.iter() {
        let centr_track = centrosomes.get(&assoc.centrosome).ok_or_else(|| {
            format!(
                "association references centrosome C{:03} with no measurement track",
                assoc.centrosome
            )
        })?;
        let nucl_track = nuclei.get(&assoc.nucleus).ok_or_else(|| {
            format!(
                "association references nucleus N{:02} with no measurement track",
                assoc.nucleus
            )
        })?;

        let points = centr_track
            .samples()
            .iter()
            .map(|s| MergedPoint {
                frame: s.frame,
                centr_x: s.x,
                centr_y: s.y,
                observed: true,
                nucl: nucl_track.position_at(s.frame),
                cell: cells.get(&(s.frame, assoc.nucleus)).copied(),
            })
            .collect();

        series.push(MergedSeries {
            nucleus: assoc.nucleus,
            group: assoc.group,
            centrosome: assoc.centrosome,
            centr_track,
            nucl_track,
            points,
        });
    }
    Ok(series)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::track::Sample;

    fn track(samples: &[(i32, f64, f64)]) -> Track {
        Track::new(samples.iter().map(|&(f, x, y)| Sample::new(f, x, y)).collect()).unwrap()
    }

    #[test]
    fn test_orphans_are_dropped() {
        let mut nuclei = BTreeMap::new();
        nuclei.insert(1, track(&[(0, 0.0, 0.0), (1, 0.0, 0.0)]));
        let mut centrosomes = BTreeMap::new();
        centrosomes.insert(4, track(&[(0, 1.0, 0.0)]));
        centrosomes.insert(9, track(&[(0, 5.0, 5.0)])); // never curated

        let mut selection = AssociationIndex::new();
        selection.associate(4, 1, Group::A).unwrap();

        let series = merge(&nuclei, &centrosomes, &selection, &[]).unwrap();
        assert_eq!(series.len(), 1);
        assert_eq!(series[0].centrosome, 4);
    }

    #[test]
    fn test_boundary_left_join() {
        let mut nuclei = BTreeMap::new();
        nuclei.insert(1, track(&[(0, 0.0, 0.0), (1, 0.0, 0.0)]));
        let mut centrosomes = BTreeMap::new();
        centrosomes.insert(4, track(&[(0, 1.0, 0.0), (1, 2.0, 0.0)]));
        let mut selection = AssociationIndex::new();
        selection.associate(4, 1, Group::A).unwrap();

        let boundary = vec![BoundaryRow {
            frame: 1,
            nucleus: 1,
            cell_x: 3.0,
            cell_y: 4.0,
            dist_cell: Some(5.0),
        }];
        let series = merge(&nuclei, &centrosomes, &selection, &boundary).unwrap();
        assert!(series[0].points[0].cell.is_none());
        let cell = series[0].points[1].cell.unwrap();
        assert_eq!((cell.cell_x, cell.cell_y), (3.0, 4.0));
    }

    #[test]
    fn test_missing_track_is_an_error() {
        let nuclei = BTreeMap::new();
        let mut centrosomes = BTreeMap::new();
        centrosomes.insert(4, track(&[(0, 1.0, 0.0)]));
        let mut selection = AssociationIndex::new();
        selection.associate(4, 1, Group::A).unwrap();
        assert!(merge(&nuclei, &centrosomes, &selection, &[]).is_err());
    }
}
