//! End-to-end runs on a synthetic eye-in-hand scene.
//!
//! Images are tiny placeholders whose first pixel encodes the view number; the
//! detector looks the projected corners up by that number.

use handeye_core::{pose_error, synthetic, BrownConrady5, FxFyCxCySkew, GridGeometry, IntrinsicModel, Iso3, Pt2};
use handeye_detect::CornerDetector;
use handeye_linear::HandEyeMethod;
use handeye_pipeline::config::GridConfig;
use handeye_pipeline::persist::{load_transform, read_npz};
use handeye_pipeline::{
    run_calibration, run_from_paths, CalibrationConfig, PipelineError, RecordingSink, Severity,
    Stage,
};
use image::GrayImage;
use std::path::{Path, PathBuf};

const NO_BOARD: u8 = 255;

struct LookupDetector {
    views: Vec<Vec<Pt2>>,
}

impl CornerDetector for LookupDetector {
    fn detect(&self, image: &GrayImage, _grid: &GridGeometry) -> Option<Vec<Pt2>> {
        let idx = image.get_pixel(0, 0)[0];
        self.views.get(idx as usize).cloned()
    }
}

struct Scene {
    scene: synthetic::HandEyeScene,
    detector: LookupDetector,
    images: Vec<GrayImage>,
    /// Poses as a controller would log them (`base_to_wrist`).
    logged: Vec<Iso3>,
    config: CalibrationConfig,
}

fn camera() -> IntrinsicModel {
    IntrinsicModel::new(
        FxFyCxCySkew {
            fx: 1100.0,
            fy: 1095.0,
            cx: 960.0,
            cy: 600.0,
            skew: 0.0,
        },
        BrownConrady5 {
            k1: -0.08,
            k2: 0.02,
            k3: 0.0,
            p1: 0.0005,
            p2: -0.0003,
            iters: 12,
        },
    )
}

fn scene(n_views: usize, without_board: &[usize]) -> Scene {
    let config = CalibrationConfig {
        grid: GridConfig {
            cols: 9,
            rows: 7,
            square_size: 20.0,
        },
        ..CalibrationConfig::default()
    };
    let grid = config.grid().unwrap();
    let model = camera();
    let scene = synthetic::HandEyeScene::from_views(
        synthetic::sample_cam_to_wrist(),
        synthetic::sample_target_to_base(),
        synthetic::board_views(&grid, n_views, 550.0, 0.5),
    );
    let views = scene
        .target_to_cam
        .iter()
        .map(|p| synthetic::project_view(&model, p, &grid.object_points()).unwrap())
        .collect();
    let images = (0..n_views)
        .map(|k| {
            let v = if without_board.contains(&k) { NO_BOARD } else { k as u8 };
            GrayImage::from_pixel(16, 12, image::Luma([v]))
        })
        .collect();
    let logged = scene.wrist_to_base.iter().map(|p| p.inverse()).collect();
    Scene {
        scene,
        detector: LookupDetector { views },
        images,
        logged,
        config,
    }
}

#[test]
fn recovers_camera_to_wrist_with_a_target_less_image() {
    let s = scene(8, &[3]);
    let sink = RecordingSink::new();
    let out = run_calibration(&s.images, &s.logged, &s.config, &s.detector, &sink).unwrap();

    assert_eq!(out.detection.describe(), "Found chessboard in 7 of 8 images");
    assert_eq!(out.detection.missed, vec![3]);
    let pose_images: Vec<usize> = out.target_poses.iter().map(|(i, _)| *i).collect();
    assert_eq!(pose_images, vec![0, 1, 2, 4, 5, 6, 7]);
    assert_eq!(out.wrist_to_base.len(), out.target_poses.len());

    assert!(out.intrinsics.report.mean < 1e-3, "{:?}", out.intrinsics.report);
    assert!((out.intrinsics.model.intrinsics.fx - 1100.0).abs() < 0.5);

    assert_eq!(out.handeye.len(), HandEyeMethod::ALL.len());
    for (method, x) in out.successful_methods() {
        let (dt, ang) = pose_error(x, &s.scene.cam_to_wrist);
        assert!(dt < 0.1 && ang.to_degrees() < 0.01, "{method}: dt={dt} ang={ang}");
    }
    assert!(out.successful_methods().count() >= 1);

    let missed: Vec<_> = sink
        .of_stage(Stage::Detection)
        .into_iter()
        .filter(|e| e.severity == Severity::Error)
        .collect();
    assert_eq!(missed.len(), 1);
    assert_eq!(missed[0].image_index, Some(3));
    assert!(sink
        .events()
        .iter()
        .any(|e| e.message.starts_with("average error")));
}

#[test]
fn count_mismatch_aborts_when_strict() {
    let s = scene(6, &[]);
    let sink = RecordingSink::new();
    let err = run_calibration(&s.images, &s.logged[..5], &s.config, &s.detector, &sink).unwrap_err();
    assert!(matches!(err, PipelineError::CountMismatch { images: 6, poses: 5 }));
    let input = sink.of_stage(Stage::Input);
    assert_eq!(input.len(), 1);
    assert_eq!(input[0].severity, Severity::Error);
}

#[test]
fn count_mismatch_uses_common_prefix_when_lenient() {
    let mut s = scene(7, &[]);
    s.config.strict_pose_count = false;
    let sink = RecordingSink::new();
    let out = run_calibration(&s.images, &s.logged[..6], &s.config, &s.detector, &sink).unwrap();
    assert_eq!(out.image_count, 6);
    assert_eq!(out.detection.total, 6);
    assert!(sink
        .of_stage(Stage::Input)
        .iter()
        .any(|e| e.severity == Severity::Error));
}

#[test]
fn no_detections_is_fatal() {
    let s = scene(4, &[0, 1, 2, 3]);
    let err = run_calibration(&s.images, &s.logged, &s.config, &s.detector, &RecordingSink::new())
        .unwrap_err();
    assert!(matches!(err, PipelineError::NoDetections { total: 4 }));
}

#[test]
fn reprojection_limit_is_enforced_when_configured() {
    let mut s = scene(6, &[]);
    s.config.intrinsics.max_reprojection_error_px = Some(-1.0);
    let err = run_calibration(&s.images, &s.logged, &s.config, &s.detector, &RecordingSink::new())
        .unwrap_err();
    assert!(matches!(err, PipelineError::ReprojectionTooHigh { .. }));
}

/// Save `images` under `dir/images` and the poses as a metre-based log; returns the log path.
fn write_inputs(dir: &Path, images: &[GrayImage], logged: &[Iso3]) -> PathBuf {
    let image_dir = dir.join("images");
    std::fs::create_dir(&image_dir).unwrap();
    for (k, img) in images.iter().enumerate() {
        img.save(image_dir.join(format!("img_{k:02}.png"))).unwrap();
    }
    let pose_file = dir.join("poses.txt");
    let log: String = logged
        .iter()
        .map(|p| {
            let t = p.translation.vector / 1000.0;
            let q = p.rotation.quaternion();
            format!(
                "{:.15},{:.15},{:.15},{:.15},{:.15},{:.15},{:.15}\n",
                t.x, t.y, t.z, q.i, q.j, q.k, q.w
            )
        })
        .collect();
    std::fs::write(&pose_file, log).unwrap();
    pose_file
}

#[test]
fn intrinsics_and_report_are_saved_when_every_method_fails() {
    let s = scene(6, &[]);
    // A wrist that never moves gives no usable motion pairs.
    let frozen = vec![s.logged[0]; s.logged.len()];
    let work = tempfile::tempdir().unwrap();
    let pose_file = write_inputs(work.path(), &s.images, &frozen);
    let out_dir = work.path().join("out");

    let err = run_from_paths(
        &work.path().join("images"),
        &pose_file,
        &out_dir,
        &s.config,
        &s.detector,
        &RecordingSink::new(),
    )
    .unwrap_err();
    let output = match err {
        PipelineError::NoHandEyeSolution(output) => output,
        other => panic!("expected every method to fail, got {other}"),
    };
    assert_eq!(output.successful_methods().count(), 0);

    let intr = read_npz(&out_dir.join("IntrinsicMatrix.npz")).unwrap();
    assert_eq!(intr["camera_matrix"].shape(), (3, 3));
    let report: serde_json::Value = serde_json::from_str(
        &std::fs::read_to_string(out_dir.join("calibration_report.json")).unwrap(),
    )
    .unwrap();
    assert_eq!(report["handeye"]["park"]["status"], "failure");
    assert!(!out_dir
        .join("FinalTransforms")
        .join("Tcam2wrist_method_park.npz")
        .exists());
}

#[test]
fn run_from_paths_writes_all_outputs() {
    let s = scene(6, &[]);
    let work = tempfile::tempdir().unwrap();
    let image_dir = work.path().join("images");
    let pose_file = write_inputs(work.path(), &s.images, &s.logged);
    let out_dir = work.path().join("out");

    let out = run_from_paths(
        &image_dir,
        &pose_file,
        &out_dir,
        &s.config,
        &s.detector,
        &RecordingSink::new(),
    )
    .unwrap();

    let intr = read_npz(&out_dir.join("IntrinsicMatrix.npz")).unwrap();
    assert_eq!(intr["camera_matrix"].shape(), (3, 3));
    assert_eq!(intr["dist_coeffs"].shape(), (1, 5));

    for (method, x) in out.successful_methods() {
        let path = out_dir
            .join("FinalTransforms")
            .join(format!("Tcam2wrist_method_{}.npz", method.name()));
        let loaded = load_transform(&path).unwrap();
        let (dt, ang) = pose_error(&loaded, x);
        assert!(dt < 1e-9 && ang < 1e-7);
        assert!(out_dir
            .join("FinalTransforms")
            .join(format!("Twrist2cam_method_{}.npz", method.name()))
            .exists());
    }

    let report: serde_json::Value = serde_json::from_str(
        &std::fs::read_to_string(out_dir.join("calibration_report.json")).unwrap(),
    )
    .unwrap();
    assert_eq!(report["image_count"], 6);
    assert_eq!(report["handeye"]["park"]["status"], "success");
}
