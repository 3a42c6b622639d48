//! Conversion of grid-labeled detections into raster-ordered corner sets.
//!
//! Detectors label corners with integer grid coordinates whose origin,
//! orientation and axis assignment are arbitrary. The canonical layout is
//! `cols` corners per row, `rows` rows, origin at the corner closest to the
//! image origin, with `+i` and `+j` forming a right-handed frame in image
//! coordinates (board normal pointing away from the camera). Square grids
//! additionally take the quarter turn whose rows run closest to image `+x`.

use handeye_core::{GridGeometry, Pt2, Real};

#[derive(Debug, thiserror::Error, Clone, PartialEq)]
pub enum OrderingError {
    #[error("detected grid spans {found_cols}x{found_rows}, expected {cols}x{rows}")]
    WrongExtent {
        found_cols: usize,
        found_rows: usize,
        cols: usize,
        rows: usize,
    },
    #[error("{found} of {expected} grid cells detected")]
    Incomplete { found: usize, expected: usize },
    #[error("grid cell ({i}, {j}) labeled twice")]
    Duplicate { i: i32, j: i32 },
}

/// One detected corner with its grid label.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LabeledPoint {
    pub i: i32,
    pub j: i32,
    pub position: Pt2,
}

/// Arrange labeled corners into raster order `j * cols + i`.
///
/// Fails unless every grid cell is present exactly once.
pub fn raster_order(labeled: &[LabeledPoint], grid: &GridGeometry) -> Result<Vec<Pt2>, OrderingError> {
    let (cols, rows) = (grid.cols(), grid.rows());
    let expected = grid.corner_count();
    if labeled.len() < expected {
        return Err(OrderingError::Incomplete {
            found: labeled.len(),
            expected,
        });
    }

    let (min_i, max_i) = min_max(labeled.iter().map(|p| p.i));
    let (min_j, max_j) = min_max(labeled.iter().map(|p| p.j));
    let span_i = (max_i - min_i + 1) as usize;
    let span_j = (max_j - min_j + 1) as usize;

    let transpose = if (span_i, span_j) == (cols, rows) {
        false
    } else if (span_j, span_i) == (cols, rows) {
        true
    } else {
        return Err(OrderingError::WrongExtent {
            found_cols: span_i,
            found_rows: span_j,
            cols,
            rows,
        });
    };

    let mut slots: Vec<Option<Pt2>> = vec![None; expected];
    for p in labeled {
        let (di, dj) = ((p.i - min_i) as usize, (p.j - min_j) as usize);
        let (ci, cj) = if transpose { (dj, di) } else { (di, dj) };
        let slot = &mut slots[grid.index(ci, cj)];
        if slot.is_some() {
            return Err(OrderingError::Duplicate { i: p.i, j: p.j });
        }
        *slot = Some(p.position);
    }

    let mut points = slots
        .iter()
        .copied()
        .collect::<Option<Vec<Pt2>>>()
        .ok_or(OrderingError::Incomplete {
            found: slots.iter().filter(|s| s.is_some()).count(),
            expected,
        })?;

    canonicalize(&mut points, cols, rows);
    Ok(points)
}

fn min_max(values: impl Iterator<Item = i32>) -> (i32, i32) {
    values.fold((i32::MAX, i32::MIN), |(lo, hi), v| (lo.min(v), hi.max(v)))
}

/// Fix handedness, then pick the in-plane rotation.
///
/// Rectangular grids only admit a half turn, resolved by putting the origin at
/// the corner nearest the image origin. Square grids admit quarter turns too;
/// the one whose `+i` axis points furthest along image `+x` wins.
fn canonicalize(points: &mut [Pt2], cols: usize, rows: usize) {
    let at = |pts: &[Pt2], i: usize, j: usize| pts[j * cols + i];

    let du = at(points, cols - 1, 0) - at(points, 0, 0);
    let dv = at(points, 0, rows - 1) - at(points, 0, 0);
    if du.x * dv.y - du.y * dv.x < 0.0 {
        for j in 0..rows / 2 {
            for i in 0..cols {
                points.swap(j * cols + i, (rows - 1 - j) * cols + i);
            }
        }
    }

    if cols == rows {
        let n = cols;
        let mut best = points.to_vec();
        let mut candidate = best.clone();
        for _ in 0..3 {
            candidate = quarter_turn(&candidate, n);
            if square_rank(&candidate, n) > square_rank(&best, n) {
                best.clone_from(&candidate);
            }
        }
        points.copy_from_slice(&best);
        return;
    }

    let first = at(points, 0, 0);
    let last = at(points, cols - 1, rows - 1);
    let diagonal: Real = (last.x - first.x) + (last.y - first.y);
    if diagonal < 0.0 {
        points.reverse();
    }
}

/// Relabel an `n x n` raster with `(i, j) -> (n - 1 - j, i)`, keeping handedness.
fn quarter_turn(points: &[Pt2], n: usize) -> Vec<Pt2> {
    (0..n)
        .flat_map(|j| (0..n).map(move |i| points[i * n + (n - 1 - j)]))
        .collect()
}

/// `+i` axis along image `+x`, ties going to the origin nearest the image origin.
fn square_rank(points: &[Pt2], n: usize) -> (Real, Real) {
    let origin = points[0];
    let du = points[n - 1] - origin;
    (du.x / du.norm().max(Real::EPSILON), -(origin.x + origin.y))
}
