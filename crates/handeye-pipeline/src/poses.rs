//! Robot wrist pose log.
//!
//! One row per captured image: `x y z qx qy qz qw`, position in metres and
//! orientation as a unit quaternion with the scalar last. Fields may be
//! separated by commas, semicolons or whitespace.

use std::path::Path;

use handeye_core::{iso_from_translation_quaternion, Iso3, Real, Vec3};
use nalgebra::Translation3;
use serde::{Deserialize, Serialize};

/// Logged positions are in metres, the rest of the pipeline works in millimetres.
pub const METRES_TO_MM: Real = 1000.0;

#[derive(Debug, thiserror::Error)]
pub enum PoseLogError {
    #[error("failed to read pose log {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("line {line}: expected 7 fields, found {found}")]
    FieldCount { line: usize, found: usize },
    #[error("line {line}: field {field} is not a number: {value:?}")]
    NotANumber {
        line: usize,
        field: usize,
        value: String,
    },
    #[error("line {line}: quaternion has zero or non-finite norm")]
    BadQuaternion { line: usize },
}

/// Parse a pose log into `wrist_to_base` transforms (translation in mm).
pub fn parse_wrist_poses(text: &str) -> Result<Vec<Iso3>, PoseLogError> {
    let mut poses = Vec::new();
    for (idx, raw) in text.lines().enumerate() {
        let line = idx + 1;
        let fields: Vec<&str> = raw
            .split(|c: char| c == ',' || c == ';' || c.is_whitespace())
            .filter(|f| !f.is_empty())
            .collect();
        if fields.is_empty() {
            continue;
        }
        if fields.len() != 7 {
            return Err(PoseLogError::FieldCount {
                line,
                found: fields.len(),
            });
        }

        let mut v = [0.0; 7];
        for (field, (slot, text)) in v.iter_mut().zip(&fields).enumerate() {
            *slot = text
                .parse::<Real>()
                .ok()
                .filter(|x| x.is_finite())
                .ok_or_else(|| PoseLogError::NotANumber {
                    line,
                    field: field + 1,
                    value: text.to_string(),
                })?;
        }

        let t = Vec3::new(v[0], v[1], v[2]) * METRES_TO_MM;
        let pose = iso_from_translation_quaternion(t, v[3], v[4], v[5], v[6])
            .ok_or(PoseLogError::BadQuaternion { line })?;
        poses.push(pose);
    }
    Ok(poses)
}

pub fn load_wrist_poses(path: &Path) -> Result<Vec<Iso3>, PoseLogError> {
    let text = std::fs::read_to_string(path).map_err(|source| PoseLogError::Io {
        path: path.display().to_string(),
        source,
    })?;
    parse_wrist_poses(&text)
}

/// How logged wrist poses are turned into the transform fed to the hand-eye solver.
///
/// The solver expects `wrist_to_base`. Some controllers log the inverse
/// (`base_to_wrist`); `Rigid` takes the proper inverse `[Rᵀ | -Rᵀt]` of each logged
/// pose.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WristInversion {
    /// Proper rigid inverse of the logged pose.
    #[default]
    Rigid,
    /// Keep the rotation and negate the translation. Not a rigid inverse; only
    /// for reproducing results computed that way.
    NegateTranslation,
    /// Use the logged pose as `wrist_to_base` directly.
    AsLogged,
}

impl WristInversion {
    pub fn apply(self, logged: &Iso3) -> Iso3 {
        match self {
            WristInversion::Rigid => logged.inverse(),
            WristInversion::NegateTranslation => {
                Iso3::from_parts(Translation3::from(-logged.translation.vector), logged.rotation)
            }
            WristInversion::AsLogged => *logged,
        }
    }

    pub fn apply_all(self, logged: &[Iso3]) -> Vec<Iso3> {
        logged.iter().map(|p| self.apply(p)).collect()
    }
}
