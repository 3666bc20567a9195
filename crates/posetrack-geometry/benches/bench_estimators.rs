use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

use glam::{DVec2, DVec3};
use posetrack_geometry::{
    estimate, refine, CameraIntrinsics, CorrespondenceSet, EstimationMethod, EstimatorParams,
    Pose, RefineParams, ReferencePoint, ScenePoint, Transform,
};
use rand::seq::SliceRandom;
use rand::{rngs::StdRng, Rng, SeedableRng};

fn camera() -> CameraIntrinsics {
    CameraIntrinsics::new(800.0, 800.0, 640.0, 480.0)
}

/// Planar target seen by a tilted camera, with a fraction of relocated scene points.
fn generate_planar_dataset(num_points: usize, noise_px: f64, outliers: f64, seed: u64) -> CorrespondenceSet {
    let k = camera();
    let pose = Pose::from_rvec(DVec3::new(0.15, -0.2, 0.05), DVec3::new(0.05, -0.02, 1.5));
    let mut rng = StdRng::seed_from_u64(seed);

    let mut set = CorrespondenceSet::with_capacity(num_points);
    while set.len() < num_points {
        let world = DVec3::new(rng.random_range(-0.4..0.4), rng.random_range(-0.3..0.3), 0.0);
        let Some(px) = pose.project(world, &k) else {
            continue;
        };
        let noise = DVec2::new(
            rng.random_range(-noise_px..noise_px),
            rng.random_range(-noise_px..noise_px),
        );
        let distance = rng.random_range(0.0..1.0);
        set.push(ReferencePoint::new(world, set.len()), ScenePoint::new(px + noise, distance));
    }

    let mut idxs: Vec<usize> = (0..set.len()).collect();
    idxs.shuffle(&mut rng);
    let num_out = (outliers.clamp(0.0, 1.0) * set.len() as f64) as usize;
    set
        .iter()
        .enumerate()
        .map(|(i, (r, s, _))| {
            let mut s = *s;
            if idxs[..num_out].contains(&i) {
                s.image = DVec2::new(rng.random_range(0.0..1280.0), rng.random_range(0.0..960.0));
                s.distance += 1.0;
            }
            (*r, s)
        })
        .collect()
}

fn bench_estimators(c: &mut Criterion) {
    let mut group = c.benchmark_group("robust_estimators");
    let params = EstimatorParams::default();
    let k = camera();

    for method in EstimationMethod::ALL {
        for &n in &[32usize, 128, 512] {
            let set = generate_planar_dataset(n, 0.5, 0.2, 42);
            group.throughput(Throughput::Elements(n as u64));
            group.bench_with_input(BenchmarkId::new(method.to_string(), n), &n, |b, _| {
                b.iter(|| {
                    let mut set = set.clone();
                    let mut rng = StdRng::seed_from_u64(7);
                    let res = estimate(&mut set, method, &k, &params, &mut rng);
                    std::hint::black_box(res.ok());
                });
            });
        }
    }
    group.finish();
}

fn bench_refine(c: &mut Criterion) {
    let mut group = c.benchmark_group("refine_lm");
    let k = camera();
    let initial = Transform::from(Pose::from_rvec(
        DVec3::new(0.16, -0.19, 0.06),
        DVec3::new(0.06, -0.03, 1.52),
    ));

    for &n in &[32usize, 128, 512] {
        let set = generate_planar_dataset(n, 0.5, 0.0, 11);
        group.throughput(Throughput::Elements(n as u64));
        group.bench_with_input(BenchmarkId::from_parameter(n), &n, |b, _| {
            b.iter(|| {
                let mut transform = initial;
                let res = refine(&mut transform, &set, &k, &RefineParams::default());
                std::hint::black_box(res.ok());
            });
        });
    }
    group.finish();
}

criterion_group!(benches, bench_estimators, bench_refine);
criterion_main!(benches);
