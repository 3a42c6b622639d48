//! Run configuration, loaded from JSON with every field defaulted.

use std::path::Path;

use handeye_core::{GridGeometry, Real, TargetError};
use handeye_linear::HandEyeMethod;
use serde::{Deserialize, Serialize};

use crate::poses::WristInversion;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("invalid grid: {0}")]
    Grid(#[from] TargetError),
    #[error("config lists no hand-eye methods")]
    NoMethods,
}

/// Internal corner counts and square size (mm) of the checkerboard.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GridConfig {
    pub cols: usize,
    pub rows: usize,
    pub square_size: Real,
}

impl Default for GridConfig {
    fn default() -> Self {
        Self {
            cols: 17,
            rows: 24,
            square_size: 15.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IntrinsicsConfig {
    /// Iteration cap of the joint refinement.
    pub max_iters: usize,
    /// Fewer usable views than this produce a quality warning.
    pub min_views_warn: usize,
    /// Views whose board normals all lie within this angle produce a quality warning.
    pub min_view_angle_deg: Real,
    /// Abort when the mean reprojection error exceeds this many pixels.
    pub max_reprojection_error_px: Option<Real>,
}

impl Default for IntrinsicsConfig {
    fn default() -> Self {
        Self {
            max_iters: 200,
            min_views_warn: 3,
            min_view_angle_deg: 5.0,
            max_reprojection_error_px: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtrinsicsConfig {
    pub max_iters: usize,
}

impl Default for ExtrinsicsConfig {
    fn default() -> Self {
        Self { max_iters: 100 }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HandEyeConfig {
    pub methods: Vec<HandEyeMethod>,
    /// Motion pairs rotating less than this are ignored.
    pub min_angle_deg: Real,
}

impl Default for HandEyeConfig {
    fn default() -> Self {
        Self {
            methods: HandEyeMethod::ALL.to_vec(),
            min_angle_deg: 1.0,
        }
    }
}

/// Output file names, relative to the output directory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    pub intrinsics_file: String,
    pub transforms_dir: String,
    pub report_file: String,
    pub log_file: String,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            intrinsics_file: "IntrinsicMatrix.npz".to_string(),
            transforms_dir: "FinalTransforms".to_string(),
            report_file: "calibration_report.json".to_string(),
            log_file: "handeyecal.log".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CalibrationConfig {
    pub grid: GridConfig,
    pub intrinsics: IntrinsicsConfig,
    pub extrinsics: ExtrinsicsConfig,
    pub handeye: HandEyeConfig,
    pub wrist_inversion: WristInversion,
    /// Abort when the number of images and logged poses differ.
    pub strict_pose_count: bool,
    pub output: OutputConfig,
}

impl Default for CalibrationConfig {
    fn default() -> Self {
        Self {
            grid: GridConfig::default(),
            intrinsics: IntrinsicsConfig::default(),
            extrinsics: ExtrinsicsConfig::default(),
            handeye: HandEyeConfig::default(),
            wrist_inversion: WristInversion::default(),
            strict_pose_count: true,
            output: OutputConfig::default(),
        }
    }
}

impl CalibrationConfig {
    pub fn from_json(text: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_json(&text)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.grid()?;
        if self.handeye.methods.is_empty() {
            return Err(ConfigError::NoMethods);
        }
        Ok(())
    }

    pub fn grid(&self) -> Result<GridGeometry, TargetError> {
        GridGeometry::new(self.grid.cols, self.grid.rows, self.grid.square_size)
    }
}
