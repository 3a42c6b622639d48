//! Calibration image discovery and loading.

use std::path::{Path, PathBuf};

use image::GrayImage;
use log::debug;
use rayon::prelude::*;

/// File extensions recognised as calibration images (case-insensitive).
pub const IMAGE_EXTENSIONS: [&str; 6] = ["bmp", "png", "jpg", "jpeg", "tif", "tiff"];

#[derive(Debug, thiserror::Error)]
pub enum ImageError {
    #[error("failed to list image directory {path}: {source}")]
    ListDir {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to decode image {path}: {source}")]
    Decode {
        path: String,
        #[source]
        source: image::ImageError,
    },
}

fn has_image_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| IMAGE_EXTENSIONS.iter().any(|x| x.eq_ignore_ascii_case(e)))
        .unwrap_or(false)
}

/// Image files in `dir`, sorted by file name. Acquisition order is file-name order.
pub fn list_images(dir: &Path) -> Result<Vec<PathBuf>, ImageError> {
    let list_err = |source| ImageError::ListDir {
        path: dir.display().to_string(),
        source,
    };
    let mut files = Vec::new();
    for entry in std::fs::read_dir(dir).map_err(list_err)? {
        let path = entry.map_err(list_err)?.path();
        if path.is_file() && has_image_extension(&path) {
            files.push(path);
        }
    }
    files.sort_by(|a, b| a.file_name().cmp(&b.file_name()));
    Ok(files)
}

/// Decode every file to 8-bit grayscale, preserving order.
pub fn load_images(paths: &[PathBuf]) -> Result<Vec<GrayImage>, ImageError> {
    paths
        .par_iter()
        .map(|path| {
            debug!("loading {}", path.display());
            image::open(path)
                .map(|img| img.to_luma8())
                .map_err(|source| ImageError::Decode {
                    path: path.display().to_string(),
                    source,
                })
        })
        .collect()
}
