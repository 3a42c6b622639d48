//! Point clouds captured by the wrist camera: realignment into the robot base
//! frame and removal of the dominant plane.
//!
//! Clouds are ASCII files with one point per line; the first three
//! whitespace-separated columns are `x y z` in millimetres, further columns are
//! ignored. Written clouds have exactly three columns with six decimals.

use std::fmt::Write as _;
use std::path::{Path, PathBuf};

use handeye_core::{best_consensus, ConsensusOptions, Estimator, Iso3, Pt3, Real, Vec3};
use log::{debug, info};
use nalgebra::{Matrix3, SymmetricEigen};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::poses::WristInversion;

/// File extension of ASCII point clouds.
pub const CLOUD_EXTENSION: &str = "asc";

#[derive(Debug, thiserror::Error)]
pub enum CloudError {
    #[error("{path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("{path}:{line}: {reason}")]
    Parse {
        path: String,
        line: usize,
        reason: String,
    },
    #[error("{files} cloud files but {poses} logged poses")]
    CountMismatch { files: usize, poses: usize },
}

fn io_err(path: &Path) -> impl FnOnce(std::io::Error) -> CloudError + '_ {
    move |source| CloudError::Io {
        path: path.display().to_string(),
        source,
    }
}

// ---------- ascii io ----------

pub fn parse_asc(text: &str, path: &Path) -> Result<Vec<Pt3>, CloudError> {
    let mut points = Vec::new();
    for (idx, raw) in text.lines().enumerate() {
        let fields: Vec<&str> = raw
            .split(|c: char| c == ',' || c.is_whitespace())
            .filter(|f| !f.is_empty())
            .collect();
        if fields.is_empty() || fields[0].starts_with('#') {
            continue;
        }
        let parse_err = |reason: String| CloudError::Parse {
            path: path.display().to_string(),
            line: idx + 1,
            reason,
        };
        if fields.len() < 3 {
            return Err(parse_err(format!("expected at least 3 columns, found {}", fields.len())));
        }
        let mut xyz = [0.0; 3];
        for (slot, f) in xyz.iter_mut().zip(&fields) {
            *slot = f
                .parse::<Real>()
                .map_err(|_| parse_err(format!("not a number: {f:?}")))?;
        }
        points.push(Pt3::new(xyz[0], xyz[1], xyz[2]));
    }
    Ok(points)
}

pub fn read_asc(path: &Path) -> Result<Vec<Pt3>, CloudError> {
    let text = std::fs::read_to_string(path).map_err(io_err(path))?;
    parse_asc(&text, path)
}

pub fn write_asc(path: &Path, points: &[Pt3]) -> Result<(), CloudError> {
    let mut text = String::with_capacity(points.len() * 40);
    for p in points {
        // Writing into a String cannot fail.
        let _ = writeln!(text, "{:.6} {:.6} {:.6}", p.x, p.y, p.z);
    }
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(io_err(parent))?;
    }
    std::fs::write(path, text).map_err(io_err(path))
}

/// `.asc` files of `dir`, sorted by file name.
pub fn list_clouds(dir: &Path) -> Result<Vec<PathBuf>, CloudError> {
    let mut files = Vec::new();
    for entry in std::fs::read_dir(dir).map_err(io_err(dir))? {
        let path = entry.map_err(io_err(dir))?.path();
        let is_cloud = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e.eq_ignore_ascii_case(CLOUD_EXTENSION));
        if path.is_file() && is_cloud {
            files.push(path);
        }
    }
    files.sort_by(|a, b| a.file_name().cmp(&b.file_name()));
    Ok(files)
}

// ---------- realignment ----------

/// Map camera-frame points into the robot base frame.
pub fn realign_points(points: &[Pt3], cam_to_wrist: &Iso3, wrist_to_base: &Iso3) -> Vec<Pt3> {
    let cam_to_base = wrist_to_base * cam_to_wrist;
    points.iter().map(|p| cam_to_base.transform_point(p)).collect()
}

/// Realign every cloud of `input_dir` with the logged pose of the same index.
///
/// Cloud `k` (file-name order) pairs with logged pose `k`. Outputs keep their
/// file names and land in `output_dir`.
pub fn realign_dir(
    input_dir: &Path,
    output_dir: &Path,
    logged_poses: &[Iso3],
    inversion: WristInversion,
    cam_to_wrist: &Iso3,
) -> Result<Vec<PathBuf>, CloudError> {
    let files = list_clouds(input_dir)?;
    if files.len() != logged_poses.len() {
        return Err(CloudError::CountMismatch {
            files: files.len(),
            poses: logged_poses.len(),
        });
    }
    let wrist_to_base = inversion.apply_all(logged_poses);

    let written = files
        .par_iter()
        .zip(wrist_to_base.par_iter())
        .map(|(src, pose)| {
            let points = read_asc(src)?;
            let aligned = realign_points(&points, cam_to_wrist, pose);
            let dst = output_dir.join(src.file_name().unwrap_or_default());
            write_asc(&dst, &aligned)?;
            debug!("realigned {} points: {}", aligned.len(), dst.display());
            Ok(dst)
        })
        .collect::<Result<Vec<_>, CloudError>>()?;
    info!("realigned {} clouds into {}", written.len(), output_dir.display());
    Ok(written)
}

// ---------- plane removal ----------

/// Plane `n·p + d = 0` with unit normal `n`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Plane {
    pub normal: Vec3,
    pub offset: Real,
}

impl Plane {
    pub fn distance(&self, p: &Pt3) -> Real {
        (self.normal.dot(&p.coords) + self.offset).abs()
    }
}

/// Least-squares plane of a point subset via the smallest principal axis.
fn fit_plane_lsq(points: &[Pt3], indices: &[usize]) -> Option<Plane> {
    if indices.len() < 3 {
        return None;
    }
    let n = indices.len() as Real;
    let centroid = indices.iter().map(|&i| points[i].coords).sum::<Vec3>() / n;
    let mut cov = Matrix3::zeros();
    for &i in indices {
        let d = points[i].coords - centroid;
        cov += d * d.transpose();
    }
    let eig = SymmetricEigen::new(cov);
    let (min_idx, _) = eig
        .eigenvalues
        .iter()
        .enumerate()
        .min_by(|a, b| a.1.total_cmp(b.1))?;
    let normal = eig.eigenvectors.column(min_idx).normalize();
    if !normal.iter().all(|v| v.is_finite()) {
        return None;
    }
    Some(Plane {
        normal,
        offset: -normal.dot(&centroid),
    })
}

pub struct PlaneEstimator;

impl Estimator for PlaneEstimator {
    type Datum = Pt3;
    type Model = Plane;

    const MIN_SAMPLES: usize = 3;

    fn fit(data: &[Pt3], sample: &[usize]) -> Option<Plane> {
        let (a, b, c) = (data[sample[0]], data[sample[1]], data[sample[2]]);
        let normal = (b - a).cross(&(c - a));
        let norm = normal.norm();
        if norm < 1e-12 {
            return None;
        }
        let normal = normal / norm;
        Some(Plane {
            normal,
            offset: -normal.dot(&a.coords),
        })
    }

    fn residual(model: &Plane, datum: &Pt3) -> Real {
        model.distance(datum)
    }

    fn refit(data: &[Pt3], inliers: &[usize]) -> Option<Plane> {
        fit_plane_lsq(data, inliers)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlaneRemovalOptions {
    /// Inlier distance in millimetres.
    pub thresh: Real,
    pub max_iters: usize,
    pub min_inliers: usize,
    pub seed: u64,
}

impl Default for PlaneRemovalOptions {
    fn default() -> Self {
        Self {
            thresh: 3.0,
            max_iters: 1000,
            min_inliers: 3,
            seed: 0x5eed,
        }
    }
}

#[derive(Debug, Clone)]
pub struct PlaneRemoval {
    /// `None` when no plane with enough support was found.
    pub plane: Option<Plane>,
    /// Points not on the plane, in input order.
    pub kept: Vec<Pt3>,
    pub removed: usize,
}

/// Fit the dominant plane with RANSAC and drop its inliers.
pub fn remove_plane(points: &[Pt3], opts: &PlaneRemovalOptions) -> PlaneRemoval {
    let consensus = ConsensusOptions {
        iterations: opts.max_iters,
        thresh: opts.thresh,
        min_inliers: opts.min_inliers,
        seed: opts.seed,
    };
    let Some(plane) = best_consensus::<PlaneEstimator>(points, &consensus).map(|c| c.model) else {
        return PlaneRemoval {
            plane: None,
            kept: points.to_vec(),
            removed: 0,
        };
    };

    let kept: Vec<Pt3> = points
        .iter()
        .filter(|p| plane.distance(p) > opts.thresh)
        .copied()
        .collect();
    PlaneRemoval {
        plane: Some(plane),
        removed: points.len() - kept.len(),
        kept,
    }
}

/// Remove the dominant plane from every cloud of `input_dir`.
pub fn remove_plane_dir(
    input_dir: &Path,
    output_dir: &Path,
    opts: &PlaneRemovalOptions,
) -> Result<Vec<PathBuf>, CloudError> {
    let files = list_clouds(input_dir)?;
    let written = files
        .par_iter()
        .map(|src| {
            let points = read_asc(src)?;
            let res = remove_plane(&points, opts);
            let dst = output_dir.join(src.file_name().unwrap_or_default());
            write_asc(&dst, &res.kept)?;
            debug!(
                "{}: removed {} of {} points",
                src.display(),
                res.removed,
                points.len()
            );
            Ok(dst)
        })
        .collect::<Result<Vec<_>, CloudError>>()?;
    info!("processed {} clouds into {}", written.len(), output_dir.display());
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::{Translation3, UnitQuaternion};

    #[test]
    fn parses_extra_columns_and_reports_bad_lines() {
        let p = Path::new("a.asc");
        let pts = parse_asc("1 2 3 255 0 0\n\n4.5,5,6\n", p).unwrap();
        assert_eq!(pts, vec![Pt3::new(1.0, 2.0, 3.0), Pt3::new(4.5, 5.0, 6.0)]);

        let err = parse_asc("1 2 3\n1 2\n", p).unwrap_err();
        assert!(matches!(err, CloudError::Parse { line: 2, .. }));
        assert!(matches!(
            parse_asc("1 2 z\n", p),
            Err(CloudError::Parse { line: 1, .. })
        ));
    }

    #[test]
    fn asc_files_use_six_decimals() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out/c.asc");
        write_asc(&path, &[Pt3::new(1.0, -2.5, 1.0 / 3.0)]).unwrap();
        let text = std::fs::read_to_string(&path).unwrap();
        assert_eq!(text, "1.000000 -2.500000 0.333333\n");
    }

    #[test]
    fn realignment_applies_camera_then_wrist() {
        let cam_to_wrist = Iso3::from_parts(
            Translation3::new(0.0, 0.0, 100.0),
            UnitQuaternion::from_euler_angles(0.0, 0.0, std::f64::consts::FRAC_PI_2),
        );
        let wrist_to_base = Iso3::translation(500.0, 0.0, 0.0);
        let out = realign_points(&[Pt3::new(10.0, 0.0, 0.0)], &cam_to_wrist, &wrist_to_base);
        assert!((out[0] - Pt3::new(500.0, 10.0, 100.0)).norm() < 1e-9);
    }

    #[test]
    fn realign_dir_pairs_files_with_poses_in_name_order() {
        let input = tempfile::tempdir().unwrap();
        let output = tempfile::tempdir().unwrap();
        write_asc(&input.path().join("1.asc"), &[Pt3::origin()]).unwrap();
        write_asc(&input.path().join("0.asc"), &[Pt3::origin()]).unwrap();
        let logged = [
            Iso3::translation(1.0, 0.0, 0.0),
            Iso3::translation(2.0, 0.0, 0.0),
        ];

        realign_dir(
            input.path(),
            output.path(),
            &logged,
            WristInversion::AsLogged,
            &Iso3::identity(),
        )
        .unwrap();
        let first = read_asc(&output.path().join("0.asc")).unwrap();
        let second = read_asc(&output.path().join("1.asc")).unwrap();
        assert_eq!(first, vec![Pt3::new(1.0, 0.0, 0.0)]);
        assert_eq!(second, vec![Pt3::new(2.0, 0.0, 0.0)]);

        assert!(matches!(
            realign_dir(
                input.path(),
                output.path(),
                &logged[..1],
                WristInversion::Rigid,
                &Iso3::identity()
            ),
            Err(CloudError::CountMismatch { files: 2, poses: 1 })
        ));
    }

    #[test]
    fn removes_dominant_plane_and_keeps_object() {
        let mut points = Vec::new();
        for i in 0..30 {
            for j in 0..30 {
                let (x, y) = (i as Real * 10.0, j as Real * 10.0);
                // Slightly tilted table with sub-millimetre noise.
                let noise = 0.3 * ((i * 7 + j * 13) % 5) as Real / 5.0;
                points.push(Pt3::new(x, y, 0.05 * x + noise));
            }
        }
        let object: Vec<Pt3> = (0..40)
            .map(|k| Pt3::new(100.0 + k as Real, 120.0, 80.0 + k as Real))
            .collect();
        points.extend(&object);

        let res = remove_plane(&points, &PlaneRemovalOptions::default());
        let plane = res.plane.unwrap();
        let expected = Vec3::new(-0.05, 0.0, 1.0).normalize();
        assert!(plane.normal.dot(&expected).abs() > 0.999);
        assert_eq!(res.removed, 900);
        assert_eq!(res.kept, object);
    }

    #[test]
    fn too_few_points_keep_everything() {
        let pts = vec![Pt3::origin(), Pt3::new(1.0, 0.0, 0.0)];
        let res = remove_plane(&pts, &PlaneRemovalOptions::default());
        assert!(res.plane.is_none());
        assert_eq!(res.kept, pts);
    }

    #[test]
    fn lsq_refit_recovers_plane() {
        let pts: Vec<Pt3> = (0..25)
            .map(|k| Pt3::new((k % 5) as Real, (k / 5) as Real, 2.0))
            .collect();
        let idx: Vec<usize> = (0..pts.len()).collect();
        let plane = PlaneEstimator::refit(&pts, &idx).unwrap();
        assert!(plane.normal.z.abs() > 1.0 - 1e-9);
        assert!(plane.distance(&Pt3::new(7.0, -3.0, 2.0)) < 1e-9);
    }
}
