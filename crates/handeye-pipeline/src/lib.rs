//! Eye-in-hand calibration pipeline.
//!
//! Given checkerboard images taken from a wrist-mounted camera and the robot
//! wrist pose logged for each image, [`run_calibration`] chains
//!
//! 1. corner detection ([`stages::detect_corners`]),
//! 2. intrinsic calibration with reprojection validation ([`stages::calibrate_intrinsics`]),
//! 3. per-image target poses ([`stages::solve_target_poses`]),
//! 4. every configured hand-eye method ([`stages::solve_handeye`]),
//!
//! reporting progress and per-image failures through a [`DiagnosticSink`].
//! [`run_from_paths`] adds file loading and persistence around it.
//!
//! The [`cloud`] module holds batch utilities for point clouds captured with
//! the calibrated camera.

pub mod cloud;
pub mod config;
pub mod diagnostics;
pub mod images;
pub mod logger;
pub mod persist;
pub mod poses;
pub mod run;
pub mod stages;

pub use config::{CalibrationConfig, ConfigError};
pub use diagnostics::{DiagnosticSink, LogSink, PipelineEvent, RecordingSink, Severity, Stage};
pub use logger::{init_logging, LoggingError};
pub use poses::{load_wrist_poses, parse_wrist_poses, PoseLogError, WristInversion};
pub use run::{run_calibration, run_from_paths, save_outputs, CalibrationOutput, PipelineError};
