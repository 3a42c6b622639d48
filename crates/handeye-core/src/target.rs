//! Planar checkerboard geometry and detected corner sets.
//!
//! Corners and object points share one raster order: index `j * cols + i`,
//! where `i` runs along a row (`0..cols`) and `j` across rows (`0..rows`).

use serde::{Deserialize, Serialize};

use crate::{Pt2, Pt3, Real};

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum TargetError {
    #[error("grid needs at least 2x2 internal corners, got {cols}x{rows}")]
    GridTooSmall { cols: usize, rows: usize },
    #[error("square size must be positive and finite, got {0}")]
    InvalidSquareSize(Real),
    #[error("expected {expected} corners, got {actual}")]
    CornerCount { expected: usize, actual: usize },
    #[error("corner {0} is not finite")]
    NonFiniteCorner(usize),
}

/// Internal-corner layout of a planar checkerboard.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "GridGeometryFields")]
pub struct GridGeometry {
    cols: usize,
    rows: usize,
    square_size: Real,
}

#[derive(Deserialize)]
struct GridGeometryFields {
    cols: usize,
    rows: usize,
    square_size: Real,
}

impl TryFrom<GridGeometryFields> for GridGeometry {
    type Error = TargetError;

    fn try_from(f: GridGeometryFields) -> Result<Self, Self::Error> {
        Self::new(f.cols, f.rows, f.square_size)
    }
}

impl GridGeometry {
    /// `cols` and `rows` count internal intersections; `square_size` is the cell edge (mm).
    pub fn new(cols: usize, rows: usize, square_size: Real) -> Result<Self, TargetError> {
        if cols < 2 || rows < 2 {
            return Err(TargetError::GridTooSmall { cols, rows });
        }
        if !(square_size.is_finite() && square_size > 0.0) {
            return Err(TargetError::InvalidSquareSize(square_size));
        }
        Ok(Self {
            cols,
            rows,
            square_size,
        })
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn square_size(&self) -> Real {
        self.square_size
    }

    pub fn corner_count(&self) -> usize {
        self.cols * self.rows
    }

    /// Raster index of the corner at column `i`, row `j`.
    pub fn index(&self, i: usize, j: usize) -> usize {
        j * self.cols + i
    }

    /// Target-frame coordinates of every corner on the `z = 0` plane, in raster order.
    pub fn object_points(&self) -> Vec<Pt3> {
        let mut points = Vec::with_capacity(self.corner_count());
        for j in 0..self.rows {
            for i in 0..self.cols {
                points.push(Pt3::new(
                    i as Real * self.square_size,
                    j as Real * self.square_size,
                    0.0,
                ));
            }
        }
        points
    }

    /// Centre of the board in the target frame.
    pub fn center(&self) -> Pt3 {
        Pt3::new(
            (self.cols - 1) as Real * self.square_size * 0.5,
            (self.rows - 1) as Real * self.square_size * 0.5,
            0.0,
        )
    }
}

/// Complete sub-pixel corner detections of one image, in raster order.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CornerSet {
    pub image_index: usize,
    pub points: Vec<Pt2>,
}

impl CornerSet {
    pub fn new(
        image_index: usize,
        points: Vec<Pt2>,
        grid: &GridGeometry,
    ) -> Result<Self, TargetError> {
        if points.len() != grid.corner_count() {
            return Err(TargetError::CornerCount {
                expected: grid.corner_count(),
                actual: points.len(),
            });
        }
        if let Some(idx) = points
            .iter()
            .position(|p| !(p.x.is_finite() && p.y.is_finite()))
        {
            return Err(TargetError::NonFiniteCorner(idx));
        }
        Ok(Self {
            image_index,
            points,
        })
    }
}
