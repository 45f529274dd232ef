use glam::Vec3;
use impulse_dynamics::{Collider, ColliderShape, Material, PhysicsWorld, RigidBodyBuilder};

const DT: f32 = 1.0 / 60.0;

#[test]
fn resting_contact_keeps_its_accumulated_impulse_warm() {
    let mut world = PhysicsWorld::builder().allow_deactivation(false).build().unwrap();

    let floor = world
        .create_body(
            RigidBodyBuilder::new()
                .is_static(true)
                .position(Vec3::new(0.0, -0.5, 0.0)),
        )
        .unwrap();
    let floor_shape = world
        .attach_shape(
            floor,
            Collider::new(ColliderShape::Box {
                half_extents: Vec3::new(20.0, 0.5, 20.0),
            }),
        )
        .unwrap();

    let cube = world
        .create_body(RigidBodyBuilder::new().position(Vec3::new(0.0, 0.501, 0.0)))
        .unwrap();
    let cube_shape = world
        .attach_shape(
            cube,
            Collider::new(ColliderShape::Box {
                half_extents: Vec3::splat(0.5),
            }),
        )
        .unwrap();

    // Settle into a persistent resting contact.
    for _ in 0..60 {
        world.step(DT, false);
    }

    // While the manifold stays valid, the accumulated normal impulse must
    // stay nonzero across consecutive steps: that is the warm start.
    for _ in 0..30 {
        world.step(DT, false);
        let arbiter = world
            .arbiter_between(floor_shape, cube_shape)
            .expect("resting contact must persist");
        let total: f32 = arbiter
            .live_slots()
            .map(|slot| arbiter.contacts[slot].normal_impulse)
            .sum();
        assert!(total > 0.0, "warm-start impulse was lost");
    }

    // The stored impulse should carry roughly the cube's weight per step.
    let arbiter = world.arbiter_between(floor_shape, cube_shape).unwrap();
    let total: f32 = arbiter
        .live_slots()
        .map(|slot| arbiter.contacts[slot].normal_impulse)
        .sum();
    let weight_per_step = 9.81 * DT;
    assert!(
        total > weight_per_step * 0.3 && total < weight_per_step * 3.0,
        "impulse {total} far from the expected weight {weight_per_step}"
    );
}

#[test]
fn closed_system_does_not_gain_energy() {
    let mut world = PhysicsWorld::builder()
        .gravity(Vec3::ZERO)
        .allow_deactivation(false)
        .build()
        .unwrap();

    let bouncy = Material {
        restitution: 1.0,
        friction: 0.0,
        ..Material::default()
    };

    let mut spheres = Vec::new();
    for (x, vx) in [(-1.0, 1.0), (1.0, -1.0)] {
        let body = world
            .create_body(
                RigidBodyBuilder::new()
                    .position(Vec3::new(x, 0.0, 0.0))
                    .velocity(Vec3::new(vx, 0.0, 0.0), Vec3::ZERO)
                    .damping(0.0, 0.0),
            )
            .unwrap();
        world
            .attach_shape(
                body,
                Collider::new(ColliderShape::Sphere { radius: 0.5 }).with_material(bouncy),
            )
            .unwrap();
        spheres.push(body);
    }

    let kinetic = |world: &PhysicsWorld| -> f32 {
        spheres
            .iter()
            .map(|&body| {
                let data = world.body(body).unwrap();
                let mass = 1.0 / data.inverse_mass;
                0.5 * mass * data.linear_velocity.length_squared()
            })
            .sum()
    };

    let initial = kinetic(&world);
    for _ in 0..120 {
        world.step(DT, false);
        let current = kinetic(&world);
        assert!(
            current <= initial * 1.05,
            "energy grew from {initial} to {current}"
        );
    }

    // The pair must actually have collided and separated again.
    let a = world.body(spheres[0]).unwrap();
    let b = world.body(spheres[1]).unwrap();
    assert!(a.linear_velocity.x < 0.0 && b.linear_velocity.x > 0.0, "spheres did not bounce");
}

#[test]
fn substepping_keeps_the_simulation_consistent() {
    let run = |substeps: u32| -> f32 {
        let mut world = PhysicsWorld::builder()
            .substeps(substeps)
            .allow_deactivation(false)
            .build()
            .unwrap();
        let floor = world
            .create_body(
                RigidBodyBuilder::new()
                    .is_static(true)
                    .position(Vec3::new(0.0, -0.5, 0.0)),
            )
            .unwrap();
        world
            .attach_shape(
                floor,
                Collider::new(ColliderShape::Box {
                    half_extents: Vec3::new(20.0, 0.5, 20.0),
                }),
            )
            .unwrap();
        let cube = world
            .create_body(RigidBodyBuilder::new().position(Vec3::new(0.0, 1.5, 0.0)))
            .unwrap();
        world
            .attach_shape(
                cube,
                Collider::new(ColliderShape::Box {
                    half_extents: Vec3::splat(0.5),
                }),
            )
            .unwrap();

        for _ in 0..240 {
            world.step(DT, false);
        }
        world.body(cube).unwrap().position.y
    };

    let single = run(1);
    let triple = run(3);
    println!("rest height: substeps=1 -> {single:.4}, substeps=3 -> {triple:.4}");
    for rest in [single, triple] {
        assert!(rest > 0.4 && rest < 0.6, "cube rests at y = {rest}");
    }
}

#[test]
fn solver_totals_are_populated_for_active_contacts() {
    let mut world = PhysicsWorld::builder().allow_deactivation(false).build().unwrap();
    let floor = world
        .create_body(
            RigidBodyBuilder::new()
                .is_static(true)
                .position(Vec3::new(0.0, -0.5, 0.0)),
        )
        .unwrap();
    world
        .attach_shape(
            floor,
            Collider::new(ColliderShape::Box {
                half_extents: Vec3::new(20.0, 0.5, 20.0),
            }),
        )
        .unwrap();
    let cube = world
        .create_body(RigidBodyBuilder::new().position(Vec3::new(0.0, 0.6, 0.0)))
        .unwrap();
    world
        .attach_shape(
            cube,
            Collider::new(ColliderShape::Box {
                half_extents: Vec3::splat(0.5),
            }),
        )
        .unwrap();

    for _ in 0..30 {
        world.step(DT, false);
    }

    let totals = world.last_solver_totals();
    assert!(totals.islands_solved > 0);
    assert!(totals.contacts_solved > 0);
    assert!(totals.normal_impulse_sum > 0.0);
}
