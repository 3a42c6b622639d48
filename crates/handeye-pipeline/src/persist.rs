//! Result files: NumPy `.npz` archives of `f64` matrices and the JSON run report.
//!
//! Archives hold uncompressed `.npy` v1.0 members, little-endian `<f8`, C order,
//! so they load directly with `numpy.load`.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use handeye_core::{IntrinsicModel, Iso3, Real, ReprojectionReport};
use handeye_linear::{HandEyeMethod, HandEyeOutcome};
use log::info;
use nalgebra::DMatrix;
use serde::Serialize;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

const NPY_MAGIC: &[u8] = b"\x93NUMPY";
/// Array name used for single-transform archives.
pub const TRANSFORM_ARRAY: &str = "transform";

#[derive(Debug, thiserror::Error)]
pub enum PersistError {
    #[error("{path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("{path}: {source}")]
    Zip {
        path: String,
        #[source]
        source: zip::result::ZipError,
    },
    #[error("{path}: array {name:?}: {reason}")]
    Npy {
        path: String,
        name: String,
        reason: String,
    },
    #[error("{path}: no array named {name:?}")]
    MissingArray { path: String, name: String },
    #[error("{path}: expected a 4x4 transform, found {rows}x{cols}")]
    NotATransform {
        path: String,
        rows: usize,
        cols: usize,
    },
    #[error("failed to serialize report: {0}")]
    Json(#[from] serde_json::Error),
}

fn io_err(path: &Path) -> impl FnOnce(std::io::Error) -> PersistError + '_ {
    move |source| PersistError::Io {
        path: path.display().to_string(),
        source,
    }
}

fn zip_err(path: &Path) -> impl FnOnce(zip::result::ZipError) -> PersistError + '_ {
    move |source| PersistError::Zip {
        path: path.display().to_string(),
        source,
    }
}

// ---------- npy ----------

/// Serialize one matrix as a `.npy` v1.0 payload.
pub fn encode_npy(m: &DMatrix<Real>) -> Vec<u8> {
    let mut header = format!(
        "{{'descr': '<f8', 'fortran_order': False, 'shape': ({}, {}), }}",
        m.nrows(),
        m.ncols()
    );
    // magic(6) + version(2) + len(2) + header must be a multiple of 64.
    let unpadded = NPY_MAGIC.len() + 4 + header.len() + 1;
    header.push_str(&" ".repeat((64 - unpadded % 64) % 64));
    header.push('\n');

    let mut out = Vec::with_capacity(10 + header.len() + 8 * m.len());
    out.extend_from_slice(NPY_MAGIC);
    out.extend_from_slice(&[1, 0]);
    out.extend_from_slice(&(header.len() as u16).to_le_bytes());
    out.extend_from_slice(header.as_bytes());
    for r in 0..m.nrows() {
        for c in 0..m.ncols() {
            out.extend_from_slice(&m[(r, c)].to_le_bytes());
        }
    }
    out
}

fn header_value<'a>(header: &'a str, key: &str) -> Option<&'a str> {
    let start = header.find(&format!("'{key}':"))? + key.len() + 3;
    Some(header[start..].trim_start())
}

fn parse_shape(header: &str) -> Option<Vec<usize>> {
    let rest = header_value(header, "shape")?.strip_prefix('(')?;
    let inner = &rest[..rest.find(')')?];
    inner
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| s.parse().ok())
        .collect()
}

/// Parse a `.npy` payload of little-endian `f64` values in C order.
///
/// One-dimensional arrays become a single row.
pub fn decode_npy(bytes: &[u8]) -> Result<DMatrix<Real>, String> {
    if bytes.len() < 10 || &bytes[..6] != NPY_MAGIC {
        return Err("not an npy payload".into());
    }
    let (header_len, header_start) = match bytes[6] {
        1 => (u16::from_le_bytes([bytes[8], bytes[9]]) as usize, 10),
        2 | 3 if bytes.len() >= 12 => (
            u32::from_le_bytes([bytes[8], bytes[9], bytes[10], bytes[11]]) as usize,
            12,
        ),
        v => return Err(format!("unsupported npy version {v}")),
    };
    let data_start = header_start + header_len;
    let header = bytes
        .get(header_start..data_start)
        .and_then(|h| std::str::from_utf8(h).ok())
        .ok_or("truncated header")?;

    if !header_value(header, "descr").is_some_and(|v| v.starts_with("'<f8'")) {
        return Err("only little-endian float64 arrays are supported".into());
    }
    if !header_value(header, "fortran_order").is_some_and(|v| v.starts_with("False")) {
        return Err("only C-order arrays are supported".into());
    }
    let (rows, cols) = match parse_shape(header).as_deref() {
        Some([n]) => (1, *n),
        Some([r, c]) => (*r, *c),
        _ => return Err("only 1-D and 2-D shapes are supported".into()),
    };

    let expected = rows
        .checked_mul(cols)
        .and_then(|n| n.checked_mul(8))
        .ok_or_else(|| format!("shape ({rows}, {cols}) is too large"))?;
    let data = &bytes[data_start..];
    if data.len() != expected {
        return Err(format!(
            "expected {expected} bytes of data, found {}",
            data.len()
        ));
    }
    let values: Vec<Real> = data
        .chunks_exact(8)
        .map(|c| Real::from_le_bytes([c[0], c[1], c[2], c[3], c[4], c[5], c[6], c[7]]))
        .collect();
    Ok(DMatrix::from_row_slice(rows, cols, &values))
}

// ---------- npz ----------

/// Write named matrices into an uncompressed `.npz` archive.
pub fn write_npz(path: &Path, arrays: &[(&str, DMatrix<Real>)]) -> Result<(), PersistError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(io_err(parent))?;
    }
    let file = File::create(path).map_err(io_err(path))?;
    let mut zip = ZipWriter::new(file);
    let opts = SimpleFileOptions::default().compression_method(CompressionMethod::Stored);
    for (name, m) in arrays {
        zip.start_file(format!("{name}.npy"), opts)
            .map_err(zip_err(path))?;
        zip.write_all(&encode_npy(m)).map_err(io_err(path))?;
    }
    zip.finish().map_err(zip_err(path))?;
    Ok(())
}

/// Read every array of an `.npz` archive, keyed by name without the `.npy` suffix.
pub fn read_npz(path: &Path) -> Result<BTreeMap<String, DMatrix<Real>>, PersistError> {
    let file = File::open(path).map_err(io_err(path))?;
    let mut archive = ZipArchive::new(file).map_err(zip_err(path))?;
    let mut arrays = BTreeMap::new();
    for idx in 0..archive.len() {
        let mut member = archive.by_index(idx).map_err(zip_err(path))?;
        let name = member.name().trim_end_matches(".npy").to_string();
        let mut bytes = Vec::new();
        member.read_to_end(&mut bytes).map_err(io_err(path))?;
        let m = decode_npy(&bytes).map_err(|reason| PersistError::Npy {
            path: path.display().to_string(),
            name: name.clone(),
            reason,
        })?;
        arrays.insert(name, m);
    }
    Ok(arrays)
}

// ---------- calibration artefacts ----------

pub fn intrinsics_arrays(model: &IntrinsicModel) -> [(&'static str, DMatrix<Real>); 2] {
    let k = model.k_matrix();
    [
        ("camera_matrix", DMatrix::from_iterator(3, 3, k.iter().copied())),
        ("dist_coeffs", DMatrix::from_row_slice(1, 5, &model.dist_coeffs())),
    ]
}

/// Camera matrix and `[k1, k2, p1, p2, k3]` distortion coefficients.
pub fn save_intrinsics(path: &Path, model: &IntrinsicModel) -> Result<(), PersistError> {
    write_npz(path, &intrinsics_arrays(model))?;
    info!("saved intrinsics to {}", path.display());
    Ok(())
}

fn transform_matrix(t: &Iso3) -> DMatrix<Real> {
    let m = t.to_homogeneous();
    DMatrix::from_iterator(4, 4, m.iter().copied())
}

/// Write one 4x4 homogeneous transform under the `transform` array name.
pub fn save_transform(path: &Path, t: &Iso3) -> Result<(), PersistError> {
    write_npz(path, &[(TRANSFORM_ARRAY, transform_matrix(t))])
}

pub fn cam_to_wrist_file(method: HandEyeMethod) -> String {
    format!("Tcam2wrist_method_{}.npz", method.name())
}

pub fn wrist_to_cam_file(method: HandEyeMethod) -> String {
    format!("Twrist2cam_method_{}.npz", method.name())
}

/// Write both directions of every successful method into `dir`.
///
/// Returns the written paths. Failed methods produce no files.
pub fn save_handeye(
    dir: &Path,
    outcomes: &BTreeMap<HandEyeMethod, HandEyeOutcome>,
) -> Result<Vec<PathBuf>, PersistError> {
    std::fs::create_dir_all(dir).map_err(io_err(dir))?;
    let mut written = Vec::new();
    for (method, outcome) in outcomes {
        let HandEyeOutcome::Success {
            cam_to_wrist,
            wrist_to_cam,
        } = outcome
        else {
            continue;
        };
        for (file, t) in [
            (cam_to_wrist_file(*method), cam_to_wrist),
            (wrist_to_cam_file(*method), wrist_to_cam),
        ] {
            let path = dir.join(file);
            save_transform(&path, t)?;
            written.push(path);
        }
    }
    info!("saved {} transform files to {}", written.len(), dir.display());
    Ok(written)
}

/// Load a 4x4 transform from an archive holding a `transform` array, or a
/// single array under any name.
pub fn load_transform(path: &Path) -> Result<Iso3, PersistError> {
    let mut arrays = read_npz(path)?;
    let m = match arrays.remove(TRANSFORM_ARRAY) {
        Some(m) => m,
        None if arrays.len() == 1 => arrays.into_values().next().ok_or_else(|| {
            PersistError::MissingArray {
                path: path.display().to_string(),
                name: TRANSFORM_ARRAY.into(),
            }
        })?,
        None => {
            return Err(PersistError::MissingArray {
                path: path.display().to_string(),
                name: TRANSFORM_ARRAY.into(),
            })
        }
    };
    if m.shape() != (4, 4) {
        return Err(PersistError::NotATransform {
            path: path.display().to_string(),
            rows: m.nrows(),
            cols: m.ncols(),
        });
    }
    let m4 = handeye_core::Mat4::from_iterator(m.iter().copied());
    handeye_core::iso_from_matrix(&m4).map_err(|e| PersistError::Npy {
        path: path.display().to_string(),
        name: TRANSFORM_ARRAY.into(),
        reason: e.to_string(),
    })
}

// ---------- report ----------

/// Machine-readable summary of one calibration run.
#[derive(Debug, Clone, Serialize)]
pub struct CalibrationReport {
    pub image_count: usize,
    pub detected_images: Vec<usize>,
    pub missed_images: Vec<usize>,
    pub intrinsics: IntrinsicModel,
    pub reprojection: ReprojectionReport,
    pub warnings: Vec<String>,
    /// Images whose target pose was solved, in hand-eye input order.
    pub pose_images: Vec<usize>,
    pub handeye: BTreeMap<HandEyeMethod, HandEyeOutcome>,
}

pub fn save_report(path: &Path, report: &CalibrationReport) -> Result<(), PersistError> {
    let text = serde_json::to_string_pretty(report)?;
    std::fs::write(path, text).map_err(io_err(path))?;
    info!("saved report to {}", path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use handeye_core::{pose_error, BrownConrady5, FxFyCxCySkew};
    use handeye_linear::HandEyeError;
    use nalgebra::{Translation3, UnitQuaternion};

    fn sample_pose() -> Iso3 {
        Iso3::from_parts(
            Translation3::new(12.5, -40.0, 88.0),
            UnitQuaternion::from_euler_angles(0.1, -0.3, 1.2),
        )
    }

    #[test]
    fn npy_header_is_aligned_and_parsable() {
        let m = DMatrix::from_row_slice(2, 3, &[1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
        let bytes = encode_npy(&m);
        let header_len = u16::from_le_bytes([bytes[8], bytes[9]]) as usize;
        assert_eq!((10 + header_len) % 64, 0);
        assert_eq!(bytes[10 + header_len - 1], b'\n');
        assert_eq!(bytes.len(), 10 + header_len + 48);
        // Row-major payload.
        let first = Real::from_le_bytes(bytes[10 + header_len + 8..10 + header_len + 16].try_into().unwrap());
        assert_eq!(first, 2.0);
        assert_eq!(decode_npy(&bytes).unwrap(), m);
    }

    #[test]
    fn rejects_unsupported_dtypes() {
        let m = DMatrix::from_element(1, 1, 0.0);
        let mut bytes = encode_npy(&m);
        let pos = bytes.windows(3).position(|w| w == b"<f8").unwrap();
        bytes[pos + 2] = b'4';
        assert!(decode_npy(&bytes).unwrap_err().contains("float64"));
    }

    #[test]
    fn oversized_shape_is_an_error() {
        let header = format!(
            "{{'descr': '<f8', 'fortran_order': False, 'shape': ({}, 3), }}\n",
            usize::MAX / 2
        );
        let mut bytes = NPY_MAGIC.to_vec();
        bytes.extend_from_slice(&[1, 0]);
        bytes.extend_from_slice(&(header.len() as u16).to_le_bytes());
        bytes.extend_from_slice(header.as_bytes());
        bytes.extend_from_slice(&[0; 8]);
        assert!(decode_npy(&bytes).unwrap_err().contains("too large"));
    }

    #[test]
    fn intrinsics_archive_has_expected_arrays() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("IntrinsicMatrix.npz");
        let model = IntrinsicModel::new(
            FxFyCxCySkew {
                fx: 800.0,
                fy: 810.0,
                cx: 320.0,
                cy: 240.0,
                skew: 0.0,
            },
            BrownConrady5 {
                k1: -0.1,
                k2: 0.02,
                k3: 0.001,
                p1: 0.0005,
                p2: -0.0003,
                iters: 8,
            },
        );
        save_intrinsics(&path, &model).unwrap();

        let arrays = read_npz(&path).unwrap();
        let k = &arrays["camera_matrix"];
        assert_eq!(k.shape(), (3, 3));
        assert_eq!(k[(0, 0)], 800.0);
        assert_eq!(k[(0, 2)], 320.0);
        assert_eq!(k[(1, 2)], 240.0);
        assert_eq!(k[(2, 2)], 1.0);
        let d = &arrays["dist_coeffs"];
        assert_eq!(d.shape(), (1, 5));
        assert_eq!(d[(0, 0)], -0.1);
        assert_eq!(d[(0, 2)], 0.0005);
        assert_eq!(d[(0, 4)], 0.001);
    }

    #[test]
    fn handeye_files_only_for_successful_methods() {
        let dir = tempfile::tempdir().unwrap();
        let x = sample_pose();
        let mut outcomes = BTreeMap::new();
        outcomes.insert(HandEyeMethod::Park, HandEyeOutcome::from(Ok::<_, HandEyeError>(x)));
        outcomes.insert(
            HandEyeMethod::Andreff,
            HandEyeOutcome::Failure {
                reason: "degenerate".into(),
            },
        );

        let written = save_handeye(dir.path(), &outcomes).unwrap();
        assert_eq!(written.len(), 2);
        assert!(dir.path().join("Tcam2wrist_method_park.npz").exists());
        assert!(!dir.path().join("Tcam2wrist_method_andreff.npz").exists());

        let loaded = load_transform(&dir.path().join("Tcam2wrist_method_park.npz")).unwrap();
        let (dt, ang) = pose_error(&loaded, &x);
        assert!(dt < 1e-12 && ang < 1e-7);
        let inv = load_transform(&dir.path().join("Twrist2cam_method_park.npz")).unwrap();
        let (dt, ang) = pose_error(&(loaded * inv), &Iso3::identity());
        assert!(dt < 1e-9 && ang < 1e-7);
    }

    #[test]
    fn loads_transform_stored_under_another_name() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("legacy.npz");
        write_npz(&path, &[("arr_0", transform_matrix(&sample_pose()))]).unwrap();
        let loaded = load_transform(&path).unwrap();
        let (dt, _) = pose_error(&loaded, &sample_pose());
        assert!(dt < 1e-12);

        write_npz(&path, &[("a", DMatrix::zeros(3, 3))]).unwrap();
        assert!(matches!(
            load_transform(&path),
            Err(PersistError::NotATransform { rows: 3, cols: 3, .. })
        ));
    }
}
