//! Three views of a 4x4 inner-corner board with 10 mm squares.

use handeye_core::{pose_error, synthetic, FxFyCxCySkew, GridGeometry, IntrinsicModel, Iso3, Pt2};
use handeye_linear::{estimate_intrinsics_iterative, pose_from_homography, dlt_homography, PlanarView};
use handeye_optim::{
    refine_planar_intrinsics, LmBackend, PlanarIntrinsicsProblem, PlanarViewObservations,
    SolveOptions,
};

#[test]
fn small_board_recovers_camera_and_view_poses() {
    let gt = IntrinsicModel::pinhole(FxFyCxCySkew {
        fx: 820.0,
        fy: 815.0,
        cx: 640.0,
        cy: 480.0,
        skew: 0.0,
    });
    let grid = GridGeometry::new(4, 4, 10.0).unwrap();
    let object = grid.object_points();
    let board: Vec<Pt2> = object.iter().map(|p| Pt2::new(p.x, p.y)).collect();
    let poses = synthetic::board_views(&grid, 3, 120.0, 0.5);

    let pixels: Vec<Vec<Pt2>> = poses
        .iter()
        .map(|p| synthetic::project_view(&gt, p, &object).unwrap())
        .collect();

    let planar: Vec<PlanarView> = pixels
        .iter()
        .map(|px| PlanarView::new(board.clone(), px.clone()))
        .collect();
    let init = estimate_intrinsics_iterative(&planar, Default::default()).unwrap();
    let init_poses: Vec<Iso3> = pixels
        .iter()
        .map(|px| {
            let h = dlt_homography(&board, px).unwrap();
            pose_from_homography(&init.k_matrix(), &h).unwrap()
        })
        .collect();

    let views = pixels
        .into_iter()
        .map(|px| PlanarViewObservations::new(object.clone(), px).unwrap())
        .collect();
    let problem = PlanarIntrinsicsProblem::new(views).unwrap();
    let est = refine_planar_intrinsics(&LmBackend, problem, &init, &init_poses, &SolveOptions::default())
        .unwrap();

    let fx_err = (est.model.intrinsics.fx - 820.0).abs() / 820.0;
    let fy_err = (est.model.intrinsics.fy - 815.0).abs() / 815.0;
    assert!(fx_err < 0.01, "fx relative error {fx_err}");
    assert!(fy_err < 0.01, "fy relative error {fy_err}");
    assert!((est.model.intrinsics.cx - 640.0).abs() < 6.4, "{:?}", est.model);
    assert!((est.model.intrinsics.cy - 480.0).abs() < 4.8, "{:?}", est.model);

    assert_eq!(est.poses.len(), poses.len());
    for (k, (got, truth)) in est.poses.iter().zip(&poses).enumerate() {
        let (dt, ang) = pose_error(got, truth);
        assert!(dt < 1.2, "view {k}: translation error {dt} mm");
        assert!(ang.to_degrees() < 0.2, "view {k}: rotation error {} deg", ang.to_degrees());
    }
}
