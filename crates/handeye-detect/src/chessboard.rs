use calib_targets::chessboard::ChessboardDetectionResult;
use calib_targets::{detect, ChessboardParams};
use chess_corners::ChessConfig;
use handeye_core::{GridGeometry, Pt2, Real};
use image::GrayImage;
use log::debug;

use crate::ordering::{raster_order, LabeledPoint};
use crate::CornerDetector;

/// ChESS corner response followed by chessboard grid fitting.
pub struct ChessboardCornerDetector {
    pub chess_config: ChessConfig,
}

impl Default for ChessboardCornerDetector {
    fn default() -> Self {
        Self {
            chess_config: detect::default_chess_config(),
        }
    }
}

impl ChessboardCornerDetector {
    pub fn new(chess_config: ChessConfig) -> Self {
        Self { chess_config }
    }

    fn board_params(grid: &GridGeometry) -> ChessboardParams {
        ChessboardParams {
            expected_rows: Some(grid.rows() as u32),
            expected_cols: Some(grid.cols() as u32),
            ..ChessboardParams::default()
        }
    }
}

fn labeled_points(detection: &ChessboardDetectionResult) -> Vec<LabeledPoint> {
    detection
        .detection
        .corners
        .iter()
        .filter_map(|c| {
            let g = c.grid?;
            Some(LabeledPoint {
                i: g.i,
                j: g.j,
                position: Pt2::new(c.position.x as Real, c.position.y as Real),
            })
        })
        .collect()
}

impl CornerDetector for ChessboardCornerDetector {
    fn detect(&self, image: &GrayImage, grid: &GridGeometry) -> Option<Vec<Pt2>> {
        let detection =
            detect::detect_chessboard(image, &self.chess_config, Self::board_params(grid))?;
        match raster_order(&labeled_points(&detection), grid) {
            Ok(points) => Some(points),
            Err(e) => {
                debug!("chessboard rejected: {e}");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blank_image_has_no_board() {
        let img = GrayImage::from_pixel(160, 120, image::Luma([128]));
        let grid = GridGeometry::new(5, 4, 10.0).unwrap();
        assert!(ChessboardCornerDetector::default().detect(&img, &grid).is_none());
    }
}
