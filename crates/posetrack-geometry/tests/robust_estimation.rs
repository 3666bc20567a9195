use glam::{DVec2, DVec3};
use posetrack_geometry::{
    classify, estimate, refine, total_squared_error, CameraIntrinsics, CorrespondenceSet,
    EstimateError, EstimationMethod, EstimatorParams, Homography, Pose, RefineParams,
    ReferencePoint, ScenePoint, Transform,
};
use rand::{rngs::StdRng, Rng, RngCore, SeedableRng};

fn ground_truth() -> Homography {
    Homography::from_rows([[0.9, 0.05, 20.0], [-0.03, 1.1, 15.0], [1e-5, 2e-5, 1.0]]).unwrap()
}

/// Pairs generated from `h` with `num_outliers` scene points relocated at least 20 px away.
fn contaminated_set(
    h: &Homography,
    n: usize,
    num_outliers: usize,
    noise: f64,
    rng: &mut StdRng,
) -> (CorrespondenceSet, Vec<bool>) {
    let mut set = CorrespondenceSet::with_capacity(n);
    let mut relocated = vec![false; n];
    for (i, flag) in relocated.iter_mut().enumerate() {
        let world = DVec3::new(rng.random_range(0.0..640.0), rng.random_range(0.0..480.0), 0.0);
        let truth = h.apply(world.truncate()).unwrap();
        let mut image = truth;
        if noise > 0.0 {
            image += DVec2::new(rng.random_range(-noise..noise), rng.random_range(-noise..noise));
        }
        if i < num_outliers {
            *flag = true;
            loop {
                image = DVec2::new(rng.random_range(0.0..700.0), rng.random_range(0.0..560.0));
                if image.distance(truth) >= 20.0 {
                    break;
                }
            }
        }
        // outliers also tend to have worse descriptor distances
        let distance = if i < num_outliers {
            rng.random_range(0.3..1.0)
        } else {
            rng.random_range(0.0..0.7)
        };
        set.push(ReferencePoint::new(world, i), ScenePoint::new(image, distance));
    }
    (set, relocated)
}

#[test]
fn ransac_concrete_scenario() -> Result<(), EstimateError> {
    let h = ground_truth();
    let mut rng = StdRng::seed_from_u64(2024);
    let (mut set, relocated) = contaminated_set(&h, 100, 10, 0.0, &mut rng);

    let params = EstimatorParams {
        reprojection_error: 2.0,
        max_iterations: 300,
        confidence: 0.99,
    };
    let summary = estimate(
        &mut set,
        EstimationMethod::Ransac,
        &CameraIntrinsics::default(),
        &params,
        &mut rng,
    )?;

    let est = summary.model.as_homography().unwrap();
    for (a, b) in est.to_rows().iter().flatten().zip(h.to_rows().iter().flatten()) {
        assert!((a - b).abs() < 0.05, "{a} vs {b}");
    }

    let mismatched = (0..set.len())
        .filter(|&i| set.is_outlier(i) != relocated[i])
        .count();
    assert!(mismatched <= 1, "{mismatched} flags differ from the relocated set");
    assert!((89..=91).contains(&summary.inliers));
    Ok(())
}

#[test]
fn recovery_under_noise() -> Result<(), EstimateError> {
    let h = ground_truth();
    let norm = h
        .matrix()
        .to_cols_array()
        .iter()
        .map(|v| v * v)
        .sum::<f64>()
        .sqrt();

    for (seed, method) in [(1, EstimationMethod::Ransac), (2, EstimationMethod::Prosac)] {
        let mut rng = StdRng::seed_from_u64(seed);
        let (mut set, relocated) = contaminated_set(&h, 50, 10, 0.3, &mut rng);

        let summary = estimate(
            &mut set,
            method,
            &CameraIntrinsics::default(),
            &EstimatorParams::default(),
            &mut rng,
        )?;
        let est = summary.model.as_homography().unwrap();
        assert!(
            est.frobenius_distance(&h) / norm < 5e-2,
            "{method}: {:?}",
            est.to_rows()
        );
        for &(x, y) in &[(100.0, 100.0), (320.0, 240.0), (540.0, 380.0)] {
            let p = DVec2::new(x, y);
            let transfer = est.apply(p).unwrap().distance(h.apply(p).unwrap());
            assert!(transfer < 1.0, "{method}: transfer error {transfer}");
        }

        let correct = (0..set.len())
            .filter(|&i| set.is_outlier(i) == relocated[i])
            .count();
        assert!(correct as f64 / set.len() as f64 >= 0.95, "{method}: {correct} correct");
    }
    Ok(())
}

#[test]
fn lmeds_recovers_homography() -> Result<(), EstimateError> {
    let h = ground_truth();
    let mut rng = StdRng::seed_from_u64(5);
    let (mut set, relocated) = contaminated_set(&h, 60, 12, 0.0, &mut rng);

    let summary = estimate(
        &mut set,
        EstimationMethod::Lmeds,
        &CameraIntrinsics::default(),
        &EstimatorParams::default(),
        &mut rng,
    )?;
    assert_eq!(summary.inliers, 48);
    for (i, &r) in relocated.iter().enumerate() {
        assert_eq!(set.is_outlier(i), r);
    }
    Ok(())
}

#[test]
fn minimal_sample_boundary() {
    let h = ground_truth();
    for method in EstimationMethod::ALL {
        let required = method.min_samples();
        let mut rng = StdRng::seed_from_u64(9);
        let (mut set, _) = contaminated_set(&h, required - 1, 0, 0.0, &mut rng);
        set.set_outlier(0, true);
        let before = set.clone();

        let mut rng = StdRng::seed_from_u64(10);
        let mut untouched = rng.clone();
        let res = estimate(
            &mut set,
            method,
            &CameraIntrinsics::new(500.0, 500.0, 320.0, 240.0),
            &EstimatorParams::default(),
            &mut rng,
        );

        assert_eq!(
            res,
            Err(EstimateError::InsufficientCorrespondences {
                required,
                actual: required - 1
            })
        );
        assert_eq!(set, before);
        // no random number was drawn
        assert_eq!(rng.next_u64(), untouched.next_u64());
    }
}

#[test]
fn same_seed_same_result() -> Result<(), EstimateError> {
    let h = ground_truth();
    let mut data_rng = StdRng::seed_from_u64(77);
    let (set, _) = contaminated_set(&h, 40, 8, 0.5, &mut data_rng);

    let run = |seed: u64| {
        let mut set = set.clone();
        let mut rng = StdRng::seed_from_u64(seed);
        estimate(
            &mut set,
            EstimationMethod::Ransac,
            &CameraIntrinsics::default(),
            &EstimatorParams::default(),
            &mut rng,
        )
        .map(|s| (s, set))
    };
    let (a, set_a) = run(3)?;
    let (b, set_b) = run(3)?;
    assert_eq!(a, b);
    assert_eq!(set_a, set_b);
    Ok(())
}

fn pose_set(pose: &Pose, k: &CameraIntrinsics, planar: bool, rng: &mut StdRng) -> CorrespondenceSet {
    let mut set = CorrespondenceSet::new();
    for i in 0..60 {
        let z = if planar { 0.0 } else { rng.random_range(-0.2..0.2) };
        let world = DVec3::new(rng.random_range(-0.5..0.5), rng.random_range(-0.4..0.4), z);
        let truth = pose.project(world, k).unwrap();
        let image = if i % 6 == 0 {
            truth + DVec2::new(rng.random_range(30.0..80.0), rng.random_range(-80.0..-30.0))
        } else {
            truth + DVec2::new(rng.random_range(-0.3..0.3), rng.random_range(-0.3..0.3))
        };
        set.push(ReferencePoint::new(world, i), ScenePoint::new(image, 0.0));
    }
    set
}

#[test]
fn epnp_ransac_pose() -> Result<(), EstimateError> {
    let k = CameraIntrinsics::new(800.0, 800.0, 640.0, 480.0);
    let truth = Pose::from_rvec(DVec3::new(0.1, -0.25, 0.05), DVec3::new(0.1, -0.05, 2.0));

    for planar in [false, true] {
        let mut rng = StdRng::seed_from_u64(if planar { 21 } else { 22 });
        let mut set = pose_set(&truth, &k, planar, &mut rng);
        let summary = estimate(
            &mut set,
            EstimationMethod::EpnpRansac,
            &k,
            &EstimatorParams::default(),
            &mut rng,
        )?;

        let pose = summary.model.as_pose().unwrap();
        assert!(pose.translation.distance(truth.translation) < 0.05, "planar: {planar}");
        for i in 0..set.len() {
            assert_eq!(set.is_outlier(i), i % 6 == 0, "planar: {planar}, pair {i}");
        }
    }
    Ok(())
}

#[test]
fn estimate_classify_refine_pipeline() -> Result<(), Box<dyn std::error::Error>> {
    let k = CameraIntrinsics::new(800.0, 800.0, 640.0, 480.0);
    let truth = Pose::from_rvec(DVec3::new(-0.2, 0.1, 0.0), DVec3::new(0.0, 0.1, 1.8));
    let mut rng = StdRng::seed_from_u64(31);
    let mut set = pose_set(&truth, &k, true, &mut rng);

    let params = EstimatorParams::default();
    let summary = estimate(&mut set, EstimationMethod::EpnpRansac, &k, &params, &mut rng)?;
    let mut transform: Transform = summary.model;

    let inliers = classify(&transform, &mut set, &k, params.reprojection_error);
    assert_eq!(inliers, summary.inliers);

    let inlier_set = set.inliers();
    let before = total_squared_error(&transform, &inlier_set, &k);
    let refined = refine(&mut transform, &inlier_set, &k, &RefineParams::default())?;
    let after = total_squared_error(&transform, &inlier_set, &k);

    assert!(after <= before);
    assert!(refined.final_rmse <= refined.initial_rmse);
    Ok(())
}
