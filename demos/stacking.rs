//! Builds a small tower of cubes and lets it settle.
//!
//! Run with `cargo run --example stacking`.

use glam::Vec3;
use impulse_dynamics::{Collider, ColliderShape, PhysicsWorld, RigidBodyBuilder};

const TOWER_HEIGHT: usize = 8;

fn main() {
    let mut world = PhysicsWorld::builder()
        .solver_iterations(8)
        .substeps(2)
        .build()
        .expect("valid configuration");

    let floor = world
        .create_body(
            RigidBodyBuilder::new()
                .is_static(true)
                .position(Vec3::new(0.0, -0.5, 0.0)),
        )
        .expect("world has capacity");
    world
        .attach_shape(
            floor,
            Collider::new(ColliderShape::Box {
                half_extents: Vec3::new(40.0, 0.5, 40.0),
            }),
        )
        .expect("floor shape attaches");

    let mut cubes = Vec::new();
    for level in 0..TOWER_HEIGHT {
        let body = world
            .create_body(
                RigidBodyBuilder::new().position(Vec3::new(0.0, 0.5 + level as f32 * 0.999, 0.0)),
            )
            .expect("world has capacity");
        world
            .attach_shape(
                body,
                Collider::new(ColliderShape::Box {
                    half_extents: Vec3::splat(0.5),
                }),
            )
            .expect("cube shape attaches");
        cubes.push(body);
    }

    let dt = 1.0 / 60.0;
    for second in 0..10 {
        for _ in 0..60 {
            world.step(dt, true);
        }
        let top = world.body(*cubes.last().unwrap()).unwrap();
        println!(
            "t = {:>2}s  top y = {:>6.3}  active islands = {}  contacts = {}",
            second + 1,
            top.position.y,
            world.active_island_count(),
            world.contact_count()
        );
    }

    for (level, &cube) in cubes.iter().enumerate() {
        let data = world.body(cube).unwrap();
        println!(
            "cube {level}: y = {:>6.3}  asleep = {}",
            data.position.y,
            !world.is_body_active(cube)
        );
    }
}
