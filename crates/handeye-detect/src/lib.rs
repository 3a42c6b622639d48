//! Planar checkerboard detection producing raster-ordered corner sets.
//!
//! [`CornerDetector`] is the seam between the pipeline and a concrete detector;
//! [`ChessboardCornerDetector`] is the production implementation on top of
//! `calib-targets`. [`detect_all`] maps a detector over an image batch.

mod chessboard;
pub mod ordering;

pub use chessboard::ChessboardCornerDetector;
pub use ordering::{raster_order, LabeledPoint, OrderingError};

use handeye_core::{CornerSet, GridGeometry, Pt2};
use image::GrayImage;
use rayon::prelude::*;
use serde::Serialize;

/// Finds the complete set of inner corners of a planar grid target.
///
/// Implementations return `cols * rows` pixel coordinates in raster order
/// (`j * cols + i`), or `None` when the board is not fully visible.
pub trait CornerDetector: Send + Sync {
    fn detect(&self, image: &GrayImage, grid: &GridGeometry) -> Option<Vec<Pt2>>;
}

/// Per-batch detection outcome.
#[derive(Debug, Clone, Serialize)]
pub struct DetectionSummary {
    /// Complete corner sets, ascending by image index.
    pub corner_sets: Vec<CornerSet>,
    /// Indices of images without a usable detection.
    pub missed: Vec<usize>,
    pub total: usize,
}

impl DetectionSummary {
    pub fn found(&self) -> usize {
        self.corner_sets.len()
    }

    /// Indices of the images that produced a corner set.
    pub fn found_indices(&self) -> Vec<usize> {
        self.corner_sets.iter().map(|c| c.image_index).collect()
    }

    pub fn describe(&self) -> String {
        format!("Found chessboard in {} of {} images", self.found(), self.total)
    }
}

/// Run `detector` over every image in parallel and collect results in index order.
///
/// `on_image` observes each image outcome after the parallel map, in index order.
pub fn detect_all<D, F>(
    images: &[GrayImage],
    grid: &GridGeometry,
    detector: &D,
    mut on_image: F,
) -> DetectionSummary
where
    D: CornerDetector + ?Sized,
    F: FnMut(usize, bool),
{
    let results: Vec<Option<CornerSet>> = images
        .par_iter()
        .enumerate()
        .map(|(idx, img)| {
            let points = detector.detect(img, grid)?;
            CornerSet::new(idx, points, grid).ok()
        })
        .collect();

    let mut corner_sets = Vec::with_capacity(results.len());
    let mut missed = Vec::new();
    for (idx, res) in results.into_iter().enumerate() {
        on_image(idx, res.is_some());
        match res {
            Some(set) => corner_sets.push(set),
            None => missed.push(idx),
        }
    }

    DetectionSummary {
        corner_sets,
        missed,
        total: images.len(),
    }
}
