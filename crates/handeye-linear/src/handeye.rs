//! Hand-eye calibration (AX = XB) for an eye-in-hand camera.
//!
//! Inputs are the wrist poses in the robot base frame (`wrist_to_base`, maps
//! wrist coordinates to base coordinates) and the target poses in the camera
//! frame (`target_to_cam`). The unknown is `X = cam_to_wrist`; the target is
//! fixed in the base frame, so `G_i X C_i` is the same for every sample.
//!
//! For every pair `(i, j)` the relative motions
//! `A = G_i⁻¹ G_j` and `B = C_i C_j⁻¹` satisfy `A X = X B`.
//! Five classic closed-form solvers are provided; each one is independent
//! and may fail on its own without affecting the others.

use std::collections::BTreeMap;
use std::fmt;

use handeye_core::{iso_from_parts, log_so3, project_to_so3, skew, Iso3, Mat3, Real, Vec3};
use log::debug;
use nalgebra::{DMatrix, DVector, Matrix4, Quaternion, Rotation3, UnitQuaternion, Vector4};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

/// Minimum number of pose samples any method accepts.
pub const MIN_POSES: usize = 3;

#[derive(Debug, thiserror::Error, Clone, PartialEq)]
pub enum HandEyeError {
    #[error("need at least {MIN_POSES} poses, got {0}")]
    NotEnoughPoses(usize),
    #[error("inconsistent hand-eye input sizes: {wrist} wrist poses vs {target} target poses")]
    LengthMismatch { wrist: usize, target: usize },
    #[error("need at least 2 usable motion pairs, got {0}")]
    NotEnoughMotion(usize),
    #[error("degenerate motion: {0}")]
    Degenerate(&'static str),
    #[error("solver produced a non-finite transform")]
    NonFinite,
}

/// Closed-form hand-eye solver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HandEyeMethod {
    /// Tsai & Lenz (1989): modified Rodrigues parameters, separable rotation then translation.
    TsaiLenz,
    /// Park & Martin (1994): rotation from matched log-map axes.
    Park,
    /// Horaud & Dornaika (1995): unit quaternion null space.
    Horaud,
    /// Andreff et al. (1999): linear Kronecker formulation, rotation and translation jointly.
    Andreff,
    /// Daniilidis (1999): dual quaternions, rotation and translation jointly.
    Daniilidis,
}

impl HandEyeMethod {
    pub const ALL: [HandEyeMethod; 5] = [
        HandEyeMethod::TsaiLenz,
        HandEyeMethod::Park,
        HandEyeMethod::Horaud,
        HandEyeMethod::Andreff,
        HandEyeMethod::Daniilidis,
    ];

    /// Short lowercase identifier used in file names and reports.
    pub fn name(self) -> &'static str {
        match self {
            HandEyeMethod::TsaiLenz => "tsai_lenz",
            HandEyeMethod::Park => "park",
            HandEyeMethod::Horaud => "horaud",
            HandEyeMethod::Andreff => "andreff",
            HandEyeMethod::Daniilidis => "daniilidis",
        }
    }
}

impl fmt::Display for HandEyeMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, Copy)]
pub struct HandEyeOptions {
    /// Motion pairs whose rotation (in either chain) is smaller than this are discarded.
    pub min_angle_deg: Real,
}

impl Default for HandEyeOptions {
    fn default() -> Self {
        Self { min_angle_deg: 1.0 }
    }
}

/// Result of one method.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum HandEyeOutcome {
    Success {
        cam_to_wrist: Iso3,
        wrist_to_cam: Iso3,
    },
    Failure {
        reason: String,
    },
}

impl HandEyeOutcome {
    pub fn cam_to_wrist(&self) -> Option<&Iso3> {
        match self {
            HandEyeOutcome::Success { cam_to_wrist, .. } => Some(cam_to_wrist),
            HandEyeOutcome::Failure { .. } => None,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, HandEyeOutcome::Success { .. })
    }
}

impl From<Result<Iso3, HandEyeError>> for HandEyeOutcome {
    fn from(res: Result<Iso3, HandEyeError>) -> Self {
        match res {
            Ok(x) => HandEyeOutcome::Success {
                cam_to_wrist: x,
                wrist_to_cam: x.inverse(),
            },
            Err(e) => HandEyeOutcome::Failure {
                reason: e.to_string(),
            },
        }
    }
}

/// Relative motion of both chains between two samples, `A X = X B`.
#[derive(Debug, Clone, Copy)]
pub struct MotionPair {
    pub rot_a: Mat3,
    pub rot_b: Mat3,
    pub tra_a: Vec3,
    pub tra_b: Vec3,
}

fn make_motion_pair(g_i: &Iso3, c_i: &Iso3, g_j: &Iso3, c_j: &Iso3) -> Option<MotionPair> {
    let a = g_i.inverse() * g_j;
    let b = c_i * c_j.inverse();

    let rot_a = project_to_so3(a.rotation.to_rotation_matrix().matrix()).ok()?;
    let rot_b = project_to_so3(b.rotation.to_rotation_matrix().matrix()).ok()?;
    Some(MotionPair {
        rot_a,
        rot_b,
        tra_a: a.translation.vector,
        tra_b: b.translation.vector,
    })
}

/// Build all motion pairs `(i, j), i < j` whose rotation exceeds `min_angle_deg` in both chains.
pub fn build_all_pairs(
    wrist_to_base: &[Iso3],
    target_to_cam: &[Iso3],
    min_angle_deg: Real,
) -> Result<Vec<MotionPair>, HandEyeError> {
    if wrist_to_base.len() != target_to_cam.len() {
        return Err(HandEyeError::LengthMismatch {
            wrist: wrist_to_base.len(),
            target: target_to_cam.len(),
        });
    }
    let n = wrist_to_base.len();
    if n < MIN_POSES {
        return Err(HandEyeError::NotEnoughPoses(n));
    }

    let min_angle = min_angle_deg.to_radians();
    let mut pairs = Vec::with_capacity(n * (n - 1) / 2);
    for i in 0..(n - 1) {
        for j in (i + 1)..n {
            let Some(pair) = make_motion_pair(
                &wrist_to_base[i],
                &target_to_cam[i],
                &wrist_to_base[j],
                &target_to_cam[j],
            ) else {
                debug!("skipping pair ({i},{j}): rotation projection failed");
                continue;
            };
            let rot = log_so3(&pair.rot_a).norm().min(log_so3(&pair.rot_b).norm());
            if rot < min_angle {
                debug!("skipping pair ({i},{j}): small rotation {:.3} deg", rot.to_degrees());
                continue;
            }
            pairs.push(pair);
        }
    }

    if pairs.len() < 2 {
        return Err(HandEyeError::NotEnoughMotion(pairs.len()));
    }
    Ok(pairs)
}

/// Solve `cam_to_wrist` with one method.
pub fn solve(
    method: HandEyeMethod,
    wrist_to_base: &[Iso3],
    target_to_cam: &[Iso3],
    opts: &HandEyeOptions,
) -> Result<Iso3, HandEyeError> {
    let pairs = build_all_pairs(wrist_to_base, target_to_cam, opts.min_angle_deg)?;
    debug!("{method}: {} motion pairs", pairs.len());

    let (rot, t) = match method {
        HandEyeMethod::TsaiLenz => {
            let r = rotation_tsai_lenz(&pairs)?;
            (r, translation_llsq(&pairs, &r)?)
        }
        HandEyeMethod::Park => {
            let r = rotation_park(&pairs)?;
            (r, translation_llsq(&pairs, &r)?)
        }
        HandEyeMethod::Horaud => {
            let r = rotation_horaud(&pairs)?;
            (r, translation_llsq(&pairs, &r)?)
        }
        HandEyeMethod::Andreff => solve_andreff(&pairs)?,
        HandEyeMethod::Daniilidis => solve_daniilidis(&pairs)?,
    };

    if rot.iter().chain(t.iter()).any(|v| !v.is_finite()) {
        return Err(HandEyeError::NonFinite);
    }
    iso_from_parts(&rot, &t).map_err(|_| HandEyeError::NonFinite)
}

/// Run every requested method independently and collect the outcomes by method.
pub fn solve_all_methods(
    methods: &[HandEyeMethod],
    wrist_to_base: &[Iso3],
    target_to_cam: &[Iso3],
    opts: &HandEyeOptions,
) -> BTreeMap<HandEyeMethod, HandEyeOutcome> {
    methods
        .par_iter()
        .map(|&m| {
            let outcome = solve(m, wrist_to_base, target_to_cam, opts).into();
            (m, outcome)
        })
        .collect()
}

// ---------- shared linear algebra ----------

/// Least squares `min ||A x - b||` that refuses rank-deficient systems.
fn solve_llsq(a: &DMatrix<Real>, b: &DVector<Real>, what: &'static str) -> Result<DVector<Real>, HandEyeError> {
    let svd = a.clone().svd(true, true);
    let max_sv = svd.singular_values.max();
    let min_sv = svd.singular_values.min();
    if !(max_sv > 0.0) || min_sv / max_sv < 1e-10 {
        return Err(HandEyeError::Degenerate(what));
    }
    svd.solve(b, 0.0).map_err(|_| HandEyeError::Degenerate(what))
}

/// Unit quaternion of a rotation matrix with non-negative scalar part.
fn quat_wpos(r: &Mat3) -> Quaternion<Real> {
    let q = UnitQuaternion::from_rotation_matrix(&Rotation3::from_matrix_unchecked(*r)).into_inner();
    if q.w < 0.0 {
        -q
    } else {
        q
    }
}

fn rotation_from_quat(q: Quaternion<Real>) -> Result<Mat3, HandEyeError> {
    let norm = q.norm();
    if !(norm.is_finite() && norm > 1e-12) {
        return Err(HandEyeError::NonFinite);
    }
    Ok(UnitQuaternion::from_quaternion(q)
        .to_rotation_matrix()
        .into_inner())
}

/// `(R_A - I) t_X = R_X t_B - t_A` stacked over all pairs.
fn translation_llsq(pairs: &[MotionPair], rot_x: &Mat3) -> Result<Vec3, HandEyeError> {
    let n = pairs.len();
    let mut c = DMatrix::<Real>::zeros(3 * n, 3);
    let mut w = DVector::<Real>::zeros(3 * n);

    for (idx, p) in pairs.iter().enumerate() {
        c.view_mut((3 * idx, 0), (3, 3))
            .copy_from(&(p.rot_a - Mat3::identity()));
        w.rows_mut(3 * idx, 3)
            .copy_from(&(rot_x * p.tra_b - p.tra_a));
    }

    let x = solve_llsq(&c, &w, "translation is unobservable (parallel rotation axes)")?;
    Ok(Vec3::new(x[0], x[1], x[2]))
}

// ---------- Tsai–Lenz ----------

fn rotation_tsai_lenz(pairs: &[MotionPair]) -> Result<Mat3, HandEyeError> {
    let n = pairs.len();
    let mut a = DMatrix::<Real>::zeros(3 * n, 3);
    let mut b = DVector::<Real>::zeros(3 * n);

    for (idx, p) in pairs.iter().enumerate() {
        // Modified Rodrigues vectors 2 sin(θ/2) n.
        let pa = 2.0 * quat_wpos(&p.rot_a).imag();
        let pb = 2.0 * quat_wpos(&p.rot_b).imag();
        a.view_mut((3 * idx, 0), (3, 3)).copy_from(&skew(&(pa + pb)));
        b.rows_mut(3 * idx, 3).copy_from(&(pb - pa));
    }

    let x = solve_llsq(&a, &b, "rotation axes are parallel")?;
    let gibbs = Vec3::new(x[0], x[1], x[2]);
    let pcg = 2.0 * gibbs / (1.0 + gibbs.norm_squared()).sqrt();
    let pcg_sq = pcg.norm_squared();

    let rot = (1.0 - 0.5 * pcg_sq) * Mat3::identity()
        + 0.5 * (pcg * pcg.transpose() + (4.0 - pcg_sq).max(0.0).sqrt() * skew(&pcg));
    project_to_so3(&rot).map_err(|_| HandEyeError::NonFinite)
}

// ---------- Park–Martin ----------

fn rotation_park(pairs: &[MotionPair]) -> Result<Mat3, HandEyeError> {
    let mut m = Mat3::zeros();
    for p in pairs {
        let alpha = log_so3(&p.rot_a);
        let beta = log_so3(&p.rot_b);
        m += beta * alpha.transpose();
    }

    // R_X = (MᵀM)^(-1/2) Mᵀ
    let mtm = m.transpose() * m;
    let eig = mtm.symmetric_eigen();
    let max_ev = eig.eigenvalues.max();
    if !(max_ev > 0.0) || eig.eigenvalues.min() / max_ev < 1e-12 {
        return Err(HandEyeError::Degenerate("rotation axes are parallel"));
    }
    let inv_sqrt = Mat3::from_diagonal(&eig.eigenvalues.map(|v| 1.0 / v.sqrt()));
    let rot = eig.eigenvectors * inv_sqrt * eig.eigenvectors.transpose() * m.transpose();
    project_to_so3(&rot).map_err(|_| HandEyeError::NonFinite)
}

// ---------- Horaud–Dornaika ----------

fn quat_left(q: &Quaternion<Real>) -> Matrix4<Real> {
    let (w, x, y, z) = (q.w, q.i, q.j, q.k);
    Matrix4::new(w, -x, -y, -z, x, w, -z, y, y, z, w, -x, z, -y, x, w)
}

fn quat_right(q: &Quaternion<Real>) -> Matrix4<Real> {
    let (w, x, y, z) = (q.w, q.i, q.j, q.k);
    Matrix4::new(w, -x, -y, -z, x, w, z, -y, y, -z, w, x, z, y, -x, w)
}

fn rotation_horaud(pairs: &[MotionPair]) -> Result<Mat3, HandEyeError> {
    let mut m = DMatrix::<Real>::zeros(4 * pairs.len(), 4);
    for (idx, p) in pairs.iter().enumerate() {
        let qa = quat_wpos(&p.rot_a);
        let qb = quat_wpos(&p.rot_b);
        m.view_mut((4 * idx, 0), (4, 4))
            .copy_from(&(quat_left(&qa) - quat_right(&qb)));
    }

    let svd = m.svd(false, true);
    let v_t = svd.v_t.ok_or(HandEyeError::Degenerate("svd failed"))?;
    let order = ascending(&svd.singular_values);
    // A unique solution needs a one-dimensional null space.
    if svd.singular_values[order[1]] < 1e-9 * svd.singular_values.max().max(1.0) {
        return Err(HandEyeError::Degenerate("rotation axes are parallel"));
    }
    let q = v_t.row(order[0]);
    rotation_from_quat(Quaternion::new(q[0], q[1], q[2], q[3]))
}

fn ascending(values: &DVector<Real>) -> Vec<usize> {
    let mut idx: Vec<usize> = (0..values.len()).collect();
    idx.sort_by(|&a, &b| values[a].total_cmp(&values[b]));
    idx
}

// ---------- Andreff ----------

/// Joint linear system in `[vec(R_X); t_X]`, column-major `vec`.
fn solve_andreff(pairs: &[MotionPair]) -> Result<(Mat3, Vec3), HandEyeError> {
    let n = pairs.len();
    let mut a = DMatrix::<Real>::zeros(12 * n, 12);
    let mut b = DVector::<Real>::zeros(12 * n);

    for (idx, p) in pairs.iter().enumerate() {
        let r0 = 12 * idx;
        // (I ⊗ R_A - R_Bᵀ ⊗ I) vec(R_X) = 0
        for c in 0..3 {
            for i in 0..3 {
                for k in 0..3 {
                    a[(r0 + 3 * c + i, 3 * c + k)] += p.rot_a[(i, k)];
                }
                for d in 0..3 {
                    a[(r0 + 3 * c + i, 3 * d + i)] -= p.rot_b[(d, c)];
                }
            }
        }
        // (tᵦᵀ ⊗ I) vec(R_X) + (I - R_A) t_X = t_A
        let rt = r0 + 9;
        for i in 0..3 {
            for d in 0..3 {
                a[(rt + i, 3 * d + i)] = p.tra_b[d];
            }
            for k in 0..3 {
                let ident = if i == k { 1.0 } else { 0.0 };
                a[(rt + i, 9 + k)] = ident - p.rot_a[(i, k)];
            }
            b[rt + i] = p.tra_a[i];
        }
    }

    let x = solve_llsq(&a, &b, "rotation axes are parallel")?;
    let raw = Mat3::from_column_slice(&x.as_slice()[..9]);
    let det = raw.determinant();
    if !(det.is_finite() && det.abs() > 1e-12) {
        return Err(HandEyeError::Degenerate("singular rotation estimate"));
    }
    let rot = project_to_so3(&(raw / det.cbrt())).map_err(|_| HandEyeError::NonFinite)?;
    // Re-solve translation against the orthonormal rotation.
    let t = translation_llsq(pairs, &rot)?;
    Ok((rot, t))
}

// ---------- Daniilidis ----------

fn quat_mul(a: &Quaternion<Real>, b: &Quaternion<Real>) -> Quaternion<Real> {
    a * b
}

fn solve_daniilidis(pairs: &[MotionPair]) -> Result<(Mat3, Vec3), HandEyeError> {
    let n = pairs.len();
    let mut s = DMatrix::<Real>::zeros(6 * n, 8);

    for (idx, p) in pairs.iter().enumerate() {
        let qa = quat_wpos(&p.rot_a);
        let qb = quat_wpos(&p.rot_b);
        let qa_d = quat_mul(&Quaternion::from_imag(p.tra_a), &qa) * 0.5;
        let qb_d = quat_mul(&Quaternion::from_imag(p.tra_b), &qb) * 0.5;

        let (a, b) = (qa.imag(), qb.imag());
        let (ad, bd) = (qa_d.imag(), qb_d.imag());
        let r0 = 6 * idx;

        s.view_mut((r0, 0), (3, 1)).copy_from(&(a - b));
        s.view_mut((r0, 1), (3, 3)).copy_from(&skew(&(a + b)));
        s.view_mut((r0 + 3, 0), (3, 1)).copy_from(&(ad - bd));
        s.view_mut((r0 + 3, 1), (3, 3)).copy_from(&skew(&(ad + bd)));
        s.view_mut((r0 + 3, 4), (3, 1)).copy_from(&(a - b));
        s.view_mut((r0 + 3, 5), (3, 3)).copy_from(&skew(&(a + b)));
    }

    let svd = s.svd(false, true);
    let v_t = svd.v_t.ok_or(HandEyeError::Degenerate("svd failed"))?;
    let order = ascending(&svd.singular_values);
    if svd.singular_values[order[2]] < 1e-9 * svd.singular_values.max().max(1.0) {
        return Err(HandEyeError::Degenerate("rotation axes are parallel"));
    }

    let v1 = v_t.row(order[0]).transpose();
    let v2 = v_t.row(order[1]).transpose();
    let (u1, w1) = (Vector4::from_iterator(v1.rows(0, 4).iter().copied()), Vector4::from_iterator(v1.rows(4, 4).iter().copied()));
    let (u2, w2) = (Vector4::from_iterator(v2.rows(0, 4).iter().copied()), Vector4::from_iterator(v2.rows(4, 4).iter().copied()));

    // q = l1 u1 + l2 u2, q' = l1 w1 + l2 w2 with |q| = 1 and q·q' = 0.
    let qa = u1.dot(&w1);
    let qb = u1.dot(&w2) + u2.dot(&w1);
    let qc = u2.dot(&w2);
    let norm_sq = |l1: Real, l2: Real| {
        l1 * l1 * u1.dot(&u1) + 2.0 * l1 * l2 * u1.dot(&u2) + l2 * l2 * u2.dot(&u2)
    };

    let mut candidates: Vec<(Real, Real)> = crate::math::solve_quadratic_real(qa, qb, qc)
        .into_iter()
        .map(|s| (s, 1.0))
        .collect();
    if qa.abs() < 1e-12 {
        // The root at infinity corresponds to l2 = 0.
        candidates.push((1.0, 0.0));
    }
    let (l1, l2) = candidates
        .into_iter()
        .map(|(l1, l2)| {
            let v = norm_sq(l1, l2);
            (l1, l2, v)
        })
        .filter(|&(_, _, v)| v.is_finite() && v > 0.0)
        .max_by(|a, b| a.2.total_cmp(&b.2))
        .map(|(l1, l2, v)| (l1 / v.sqrt(), l2 / v.sqrt()))
        .ok_or(HandEyeError::Degenerate("no real dual quaternion solution"))?;

    let q_vec = u1 * l1 + u2 * l2;
    let qd_vec = w1 * l1 + w2 * l2;
    let q = Quaternion::new(q_vec[0], q_vec[1], q_vec[2], q_vec[3]);
    let qd = Quaternion::new(qd_vec[0], qd_vec[1], qd_vec[2], qd_vec[3]);

    let rot = rotation_from_quat(q)?;
    let t = (quat_mul(&qd, &q.conjugate()) * 2.0).imag();
    Ok((rot, t))
}
