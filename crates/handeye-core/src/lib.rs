//! Core math and geometry primitives for hand-eye calibration.
//!
//! This crate contains:
//! - linear algebra type aliases (`Real`, `Vec2`, `Pt3`, `Iso3`, ...) and rigid-transform helpers,
//! - the pinhole + Brown–Conrady camera model ([`IntrinsicModel`]),
//! - planar checkerboard geometry ([`GridGeometry`], [`CornerSet`]),
//! - the reprojection-error validator,
//! - seeded RANSAC consensus ([`best_consensus`], [`Estimator`]),
//! - synthetic scene helpers used by tests across the workspace.

/// Linear algebra type aliases and rigid-transform helpers.
pub mod math;
/// Camera model and distortion.
pub mod models;
/// Seeded consensus sampling.
pub mod ransac;
/// Reprojection error of calibrated views.
pub mod reprojection;
/// Synthetic planar scenes.
pub mod synthetic;
/// Checkerboard geometry and corner sets.
pub mod target;

pub use math::*;
pub use models::*;
pub use ransac::*;
pub use reprojection::*;
pub use target::*;
