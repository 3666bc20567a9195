use std::sync::Arc;

use argh::FromArgs;
use glam::{DVec2, DVec3};
use posetrack::{
    geometry::{CameraIntrinsics, EstimationMethod, Pose},
    image::GrayImage,
    tracking::{
        synthetic::{SceneConfig, SyntheticScene},
        MultiTargetTracker, TrackerConfig,
    },
};

/// Track synthetic planar targets seen by a moving camera
#[derive(Debug, FromArgs)]
struct Args {
    /// estimation method: ransac, prosac, lmeds or epnp_ransac
    #[argh(option, short = 'm', default = "EstimationMethod::Ransac", from_str_fn(to_method))]
    method: EstimationMethod,

    /// number of frames to process
    #[argh(option, short = 'n', default = "60")]
    frames: usize,

    /// number of targets
    #[argh(option, short = 't', default = "2")]
    targets: usize,

    /// fraction of detections relocated to random positions
    #[argh(option, short = 'o', default = "0.2")]
    outlier_ratio: f64,

    /// frames between full detections
    #[argh(option, short = 'd', default = "5")]
    detection_interval: usize,

    /// seed of the scene and of the estimators
    #[argh(option, short = 's', default = "42")]
    seed: u64,

    /// optional JSON tracker configuration, overridden by the options above
    #[argh(option, short = 'c')]
    config: Option<String>,
}

fn to_method(value: &str) -> Result<EstimationMethod, String> {
    value.parse().map_err(|e| format!("{e}"))
}

/// Pose of target `i` at frame `f`: targets side by side, camera orbiting slowly.
fn target_pose(i: usize, count: usize, f: usize) -> Pose {
    let spread = 0.35;
    let x = (i as f64 - (count as f64 - 1.0) / 2.0) * spread;
    let t = f as f64 * 0.05;
    Pose::from_rvec(
        DVec3::new(0.1 * t.sin(), 0.15 * (0.7 * t).cos(), 0.05 * t.sin()),
        DVec3::new(x + 0.03 * t.cos(), 0.02 * t.sin(), 1.4 + 0.2 * (0.5 * t).sin()),
    )
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();
    let args: Args = argh::from_env();

    let mut config = match &args.config {
        Some(path) => TrackerConfig::from_file(path)?,
        None => TrackerConfig {
            intrinsics: CameraIntrinsics::new(600.0, 600.0, 320.0, 240.0),
            ..Default::default()
        },
    };
    config.session.method = args.method;
    config.session.detection_interval = args.detection_interval;
    config.session.seed = Some(args.seed);
    config.validate()?;

    let scene = Arc::new(SyntheticScene::new(
        SceneConfig {
            outlier_ratio: args.outlier_ratio,
            seed: args.seed,
            ..Default::default()
        },
        config.intrinsics,
    ));

    let mut tracker = MultiTargetTracker::new(
        config.clone(),
        Box::new(scene.clone()),
        Box::new(scene.clone()),
    )?;
    for _ in 0..args.targets {
        let target = scene.add_target(DVec2::new(0.3, 0.2), 150)?;
        tracker.add_target(target);
    }

    let frame = GrayImage::from_size_val([640, 480].into(), 0)?;
    log::info!(
        "tracking {} targets over {} frames with {}",
        tracker.get_tracker_count(),
        args.frames,
        args.method
    );

    for f in 0..args.frames {
        let poses: Vec<Pose> = (0..args.targets)
            .map(|i| target_pose(i, args.targets, f))
            .collect();
        scene.advance(&poses);

        let total = tracker.update_camera_pose(&frame.view());
        let mut line = format!("frame {f:3}: {total:4} inliers, threshold {:5.1}", tracker.threshold());
        for (i, truth) in poses.iter().enumerate() {
            let camera = tracker.get_camera_parameter(i)?;
            let error = camera.pose.translation.distance(truth.translation);
            line.push_str(&format!(
                " | t{i}: {:3} ({:?}) err {:.4}",
                tracker.get_matched_count(i)?,
                tracker.session(i)?.state(),
                error
            ));
        }
        println!("{line}");
    }

    Ok(())
}
