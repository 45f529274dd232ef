//! Drops a cube onto a static floor and reports when its island deactivates.
//!
//! Run with `cargo run --example settling`.

use glam::Vec3;
use impulse_dynamics::{Collider, ColliderShape, PhysicsWorld, RigidBodyBuilder};

fn main() {
    let mut world = PhysicsWorld::new();

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

    let cube = world
        .create_body(RigidBodyBuilder::new().position(Vec3::new(0.0, 5.0, 0.0)))
        .expect("world has capacity");
    world
        .attach_shape(
            cube,
            Collider::new(ColliderShape::Box {
                half_extents: Vec3::splat(0.5),
            }),
        )
        .expect("cube shape attaches");

    let dt = 1.0 / 60.0;
    for frame in 0..600 {
        world.step(dt, false);

        if frame % 30 == 0 {
            let data = world.body(cube).unwrap();
            println!(
                "t = {:>5.2}s  y = {:>6.3}  |v| = {:>6.3}  active = {}",
                frame as f32 * dt,
                data.position.y,
                data.linear_velocity.length(),
                world.is_body_active(cube)
            );
        }

        if !world.is_body_active(cube) {
            println!(
                "cube deactivated after {:.2}s at y = {:.3}",
                frame as f32 * dt,
                world.body(cube).unwrap().position.y
            );
            break;
        }
    }

    world.profiler.report();
}
