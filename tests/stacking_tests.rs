use glam::Vec3;
use impulse_dynamics::{BodyHandle, Collider, ColliderShape, PhysicsWorld, RigidBodyBuilder};

const DT: f32 = 1.0 / 60.0;

fn build_stack(count: usize) -> (PhysicsWorld, Vec<BodyHandle>) {
    let mut world = PhysicsWorld::builder()
        .solver_iterations(8)
        .substeps(2)
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
                half_extents: Vec3::new(40.0, 0.5, 40.0),
            }),
        )
        .unwrap();

    let mut cubes = Vec::new();
    for level in 0..count {
        let body = world
            .create_body(
                RigidBodyBuilder::new().position(Vec3::new(0.0, 0.5 + level as f32 * 0.999, 0.0)),
            )
            .unwrap();
        world
            .attach_shape(
                body,
                Collider::new(ColliderShape::Box {
                    half_extents: Vec3::splat(0.5),
                }),
            )
            .unwrap();
        cubes.push(body);
    }
    (world, cubes)
}

#[test]
fn small_stack_settles_without_penetration() {
    let (mut world, cubes) = build_stack(4);

    for _ in 0..600 {
        world.step(DT, false);
    }

    for (level, &cube) in cubes.iter().enumerate() {
        let data = world.body(cube).unwrap();
        println!("cube {level}: y = {:.3}", data.position.y);
        assert!(data.position.is_finite());
        // No cube may sink through the ground plane.
        assert!(
            data.position.y > 0.35,
            "cube {level} sank to y = {}",
            data.position.y
        );
        assert!(
            data.linear_velocity.length() < 0.5,
            "cube {level} still moving at {:?}",
            data.linear_velocity
        );
    }

    // Stacking order is preserved.
    for pair in cubes.windows(2) {
        let below = world.body(pair[0]).unwrap().position.y;
        let above = world.body(pair[1]).unwrap().position.y;
        assert!(above > below + 0.5, "stack order lost: {below} vs {above}");
    }
}

#[test]
fn small_pyramid_keeps_its_silhouette() {
    let mut world = PhysicsWorld::builder()
        .solver_iterations(8)
        .substeps(2)
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
                half_extents: Vec3::new(40.0, 0.5, 40.0),
            }),
        )
        .unwrap();

    // Three-row pyramid: 3 + 2 + 1 cubes.
    let rows: [&[f32]; 3] = [&[-1.05, 0.0, 1.05], &[-0.525, 0.525], &[0.0]];
    let mut cubes = Vec::new();
    for (level, xs) in rows.iter().enumerate() {
        for &x in xs.iter() {
            let body = world
                .create_body(
                    RigidBodyBuilder::new().position(Vec3::new(x, 0.5 + level as f32 * 1.0, 0.0)),
                )
                .unwrap();
            world
                .attach_shape(
                    body,
                    Collider::new(ColliderShape::Box {
                        half_extents: Vec3::splat(0.5),
                    }),
                )
                .unwrap();
            cubes.push(body);
        }
    }

    for _ in 0..900 {
        world.step(DT, false);
    }

    for &cube in &cubes {
        let data = world.body(cube).unwrap();
        assert!(data.position.is_finite());
        assert!(data.position.y > 0.35, "cube fell through at {:?}", data.position);
        assert!(data.linear_velocity.length() < 0.5);
    }
    // The cap stays on top of the pile.
    let cap = world.body(*cubes.last().unwrap()).unwrap();
    assert!(cap.position.y > 1.8, "pyramid collapsed, cap at {:?}", cap.position);
}

#[test]
fn stack_forms_a_single_island() {
    let (mut world, cubes) = build_stack(3);

    for _ in 0..120 {
        world.step(DT, false);
    }

    // All cubes are coupled through contacts, so waking the bottom one after
    // a sleep must activate every cube.
    for _ in 0..600 {
        world.step(DT, false);
    }
    if !world.is_body_active(cubes[0]) {
        world.activate_body(cubes[0]);
        for &cube in &cubes {
            assert!(world.is_body_active(cube));
        }
    }
}

#[test]
fn persistent_thread_model_runs_the_same_pipeline() {
    let mut world = impulse_dynamics::PhysicsWorld::builder()
        .thread_model(impulse_dynamics::ThreadModel::Persistent)
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
                half_extents: Vec3::new(40.0, 0.5, 40.0),
            }),
        )
        .unwrap();
    let cube = world
        .create_body(RigidBodyBuilder::new().position(Vec3::new(0.0, 1.0, 0.0)))
        .unwrap();
    world
        .attach_shape(
            cube,
            Collider::new(ColliderShape::Box {
                half_extents: Vec3::splat(0.5),
            }),
        )
        .unwrap();

    for _ in 0..120 {
        world.step(DT, true);
    }
    let data = world.body(cube).unwrap();
    assert!(data.position.y > 0.35 && data.position.y < 1.1);
}

#[test]
fn multithreaded_step_matches_the_basic_contract() {
    let (mut world, cubes) = build_stack(3);

    for _ in 0..240 {
        world.step(DT, true);
    }
    for &cube in &cubes {
        let data = world.body(cube).unwrap();
        assert!(data.position.is_finite());
        assert!(data.position.y > 0.3);
    }
}
