use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use brush_carve::prelude::*;
use glam::Vec3;
use proptest::prelude::*;
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};

const FULL_VOLUME: f64 = 8.0;
// Interpolated vertices are stored in f32, so volume and bounds carry a
// little slop.
const SLOP: f64 = 1e-4;

fn cube() -> BrushMesh {
    BrushMesh::cube(1.0, Surface::with_material(1)).expect("cube builds")
}

fn random_plane(rng: &mut SmallRng) -> Plane {
    loop {
        let n = Vec3::new(
            rng.gen_range(-1.0f32..1.0),
            rng.gen_range(-1.0f32..1.0),
            rng.gen_range(-1.0f32..1.0),
        );
        if n.length() > 0.1 {
            return Plane::new(n.normalize(), rng.gen_range(-0.9f32..0.9));
        }
    }
}

#[test]
fn e2e_a_fixed_gauntlet_of_random_cuts_stays_valid() {
    let mut rng = SmallRng::seed_from_u64(0x5EED);
    for round in 0..64 {
        let mut mesh = cube();
        let planes: Vec<Plane> = (0..3).map(|_| random_plane(&mut rng)).collect();
        let survived =
            cut(&mut mesh, &planes, Surface::with_material(2)).expect("cut succeeds");
        if survived {
            mesh.validate(true)
                .unwrap_or_else(|e| panic!("round {round}: invalid mesh after cut: {e}"));
            let volume = mesh.signed_volume();
            assert!(
                volume >= -SLOP && volume <= FULL_VOLUME + SLOP,
                "round {round}: volume {volume} out of range"
            );
        } else {
            assert!(mesh.is_empty(), "round {round}: emptied mesh not cleared");
        }
    }
}

proptest! {
    #[test]
    fn prop_random_cuts_keep_the_mesh_valid(
        plane_count in 1usize..5,
        raw_seed in 0u64..1 << 16,
    ) {
        // Seed the RNG from the test parameters so every case is
        // reproducible from its shrunken input.
        let seed = {
            let mut h = DefaultHasher::new();
            plane_count.hash(&mut h);
            raw_seed.hash(&mut h);
            h.finish()
        };
        let mut rng = SmallRng::seed_from_u64(seed);
        let planes: Vec<Plane> = (0..plane_count).map(|_| random_plane(&mut rng)).collect();

        let mut mesh = cube();
        let survived = cut(&mut mesh, &planes, Surface::with_material(2))
            .expect("cut succeeds");
        prop_assert_eq!(survived, !mesh.is_empty());

        if survived {
            prop_assert!(mesh.validate(true).is_ok());
            let volume = mesh.signed_volume();
            prop_assert!(
                volume >= -SLOP && volume <= FULL_VOLUME + SLOP,
                "volume {} out of range", volume
            );
            let (min, max) = mesh.bounds().expect("bounds exist");
            prop_assert!(
                min.cmpge(Vec3::splat(-1.0 - SLOP as f32)).all(),
                "min {:?} escapes the cube", min
            );
            prop_assert!(
                max.cmple(Vec3::splat(1.0 + SLOP as f32)).all(),
                "max {:?} escapes the cube", max
            );
        }
    }

    #[test]
    fn prop_identical_cuts_are_deterministic(raw_seed in 0u64..1 << 16) {
        let mut rng = SmallRng::seed_from_u64(raw_seed);
        let planes: Vec<Plane> = (0..3).map(|_| random_plane(&mut rng)).collect();

        let mut a = cube();
        let mut b = cube();
        cut(&mut a, &planes, Surface::with_material(2)).expect("cut a");
        cut(&mut b, &planes, Surface::with_material(2)).expect("cut b");
        prop_assert_eq!(a.content_hash(), b.content_hash());
    }

    #[test]
    fn prop_each_extra_plane_only_removes_volume(raw_seed in 0u64..1 << 16) {
        let mut rng = SmallRng::seed_from_u64(raw_seed);
        let planes: Vec<Plane> = (0..4).map(|_| random_plane(&mut rng)).collect();

        let mut previous = FULL_VOLUME;
        for k in 1..=planes.len() {
            let mut mesh = cube();
            let survived = cut(&mut mesh, &planes[..k], Surface::with_material(2))
                .expect("cut succeeds");
            let volume = if survived { mesh.signed_volume() } else { 0.0 };
            prop_assert!(
                volume <= previous + SLOP,
                "plane {} grew the volume: {} after {}", k, volume, previous
            );
            previous = volume;
        }
    }
}
