use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use glam::Vec3;
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};

use brush_carve::prelude::*;

// Reproducible stack of cutting planes through the unit-ish cube.
fn random_planes(count: usize, seed: u64) -> Vec<Plane> {
    let mut rng = SmallRng::seed_from_u64(seed);
    let mut planes = Vec::with_capacity(count);
    while planes.len() < count {
        let n = Vec3::new(
            rng.r#gen::<f32>() * 2.0 - 1.0,
            rng.r#gen::<f32>() * 2.0 - 1.0,
            rng.r#gen::<f32>() * 2.0 - 1.0,
        );
        if n.length() < 0.1 {
            continue;
        }
        // Offsets near the surface so most planes actually cut.
        planes.push(Plane::new(n.normalize(), rng.r#gen::<f32>() * 1.6 - 0.8));
    }
    planes
}

fn cube() -> BrushMesh {
    BrushMesh::cube(1.0, Surface::with_material(1)).unwrap()
}

fn bench_cut(c: &mut Criterion) {
    let mut group = c.benchmark_group("cut");

    for &plane_count in &[1usize, 4, 16] {
        let base = cube();
        let planes = random_planes(plane_count, 42);
        let engine = CutEngine::new();

        group.bench_with_input(
            BenchmarkId::new("planes", plane_count),
            &(base, planes),
            |b, (base, planes)| {
                b.iter(|| {
                    let mut mesh = base.clone();
                    let _ = engine.cut(&mut mesh, planes, Surface::with_material(2));
                });
            },
        );
    }

    group.finish();
}

fn bench_blob(c: &mut Criterion) {
    let mut group = c.benchmark_group("blob");

    // A carved mesh with a realistic mix of polygon sizes.
    let mut mesh = cube();
    cut(&mut mesh, &random_planes(6, 7), Surface::with_material(2)).unwrap();
    let blob = mesh.to_blob().unwrap();

    group.bench_with_input(BenchmarkId::new("encode", ""), &mesh, |b, mesh| {
        b.iter(|| {
            let _ = mesh.to_blob().unwrap();
        });
    });
    group.bench_with_input(BenchmarkId::new("decode", ""), &blob, |b, blob| {
        b.iter(|| {
            let _ = BrushMesh::from_blob(blob).unwrap();
        });
    });

    group.finish();
}

criterion_group!(benches, bench_cut, bench_blob);
criterion_main!(benches);
