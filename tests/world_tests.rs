use glam::Vec3;
use impulse_dynamics::{
    Collider, ColliderShape, DistanceConstraint, MassProperties, PhysicsError, PhysicsWorld,
    RigidBodyBuilder,
};

fn unit_box() -> Collider {
    Collider::new(ColliderShape::Box {
        half_extents: Vec3::splat(0.5),
    })
}

#[test]
fn builder_rejects_bad_tunables() {
    assert_eq!(
        PhysicsWorld::builder().solver_iterations(0).build().err(),
        Some(PhysicsError::InvalidArgument("solver_iterations must be >= 1"))
    );
    assert_eq!(
        PhysicsWorld::builder().substeps(0).build().err(),
        Some(PhysicsError::InvalidArgument("substeps must be >= 1"))
    );
    assert!(PhysicsWorld::builder()
        .gravity(Vec3::new(f32::NAN, 0.0, 0.0))
        .build()
        .is_err());
}

#[test]
fn body_capacity_is_enforced_without_side_effects() {
    // One slot is taken by the null body.
    let mut world = PhysicsWorld::builder().capacities(2, 16, 4).build().unwrap();
    world.create_body(RigidBodyBuilder::new()).unwrap();

    let before = world.body_count();
    let err = world.create_body(RigidBodyBuilder::new()).unwrap_err();
    assert!(matches!(err, PhysicsError::CapacityExceeded { .. }));
    assert_eq!(world.body_count(), before);
}

#[test]
fn new_bodies_have_unit_mass_and_a_singleton_island() {
    let mut world = PhysicsWorld::new();
    let islands_before = world.island_count();
    let body = world.create_body(RigidBodyBuilder::new()).unwrap();

    let data = world.body(body).unwrap();
    assert!((data.inverse_mass - 1.0).abs() < 1e-6);
    assert!(world.is_body_active(body));
    assert_eq!(world.island_count(), islands_before + 1);
}

#[test]
fn shape_attachment_errors() {
    let mut world = PhysicsWorld::new();
    let a = world.create_body(RigidBodyBuilder::new()).unwrap();
    let b = world.create_body(RigidBodyBuilder::new().position(Vec3::X * 5.0)).unwrap();

    let shape = world.attach_shape(a, unit_box()).unwrap();

    // Reattaching the same shape instance elsewhere is refused.
    let stolen = world.shape(shape).unwrap().clone();
    assert_eq!(
        world.attach_shape(b, stolen).unwrap_err(),
        PhysicsError::ShapeAlreadyAttached
    );

    // Detaching a shape the body does not own is refused.
    assert_eq!(
        world.detach_shape(b, shape).unwrap_err(),
        PhysicsError::ShapeNotPresent
    );

    // Zero-mass shapes need a static body or an explicit override.
    let triangle = Collider::new(ColliderShape::Triangle {
        a: Vec3::ZERO,
        b: Vec3::X,
        c: Vec3::Z,
    });
    assert_eq!(
        world.attach_shape(b, triangle.clone()).unwrap_err(),
        PhysicsError::ZeroMassShape
    );
    assert!(world
        .attach_shape_with_mass(
            b,
            triangle,
            MassProperties {
                mass: 2.0,
                inertia: glam::Mat3::IDENTITY,
            }
        )
        .is_ok());
}

#[test]
fn attaching_shapes_accumulates_mass() {
    let mut world = PhysicsWorld::new();
    let body = world.create_body(RigidBodyBuilder::new()).unwrap();

    world.attach_shape(body, unit_box()).unwrap();
    let single = 1.0 / world.body(body).unwrap().inverse_mass;

    let offset = Collider::new(ColliderShape::Box {
        half_extents: Vec3::splat(0.5),
    })
    .with_offset(impulse_dynamics::Transform::from_position(Vec3::Y));
    world.attach_shape(body, offset).unwrap();
    let double = 1.0 / world.body(body).unwrap().inverse_mass;

    assert!((double - 2.0 * single).abs() < 1e-4);
}

#[test]
fn uninitialized_constraints_are_refused() {
    struct Uninitialized;
    impl impulse_dynamics::ConstraintBehavior for Uninitialized {
        fn bodies(&self) -> (impulse_dynamics::BodyHandle, impulse_dynamics::BodyHandle) {
            (Default::default(), Default::default())
        }
        fn is_initialized(&self) -> bool {
            false
        }
        fn prepare(
            &mut self,
            _: &impulse_dynamics::core::BodyData,
            _: &impulse_dynamics::core::BodyData,
            _: &mut impulse_dynamics::ConstraintData,
            _: f32,
        ) {
        }
    }

    let mut world = PhysicsWorld::new();
    assert_eq!(
        world.add_constraint(Box::new(Uninitialized)).unwrap_err(),
        PhysicsError::MissingConstraintInitialization
    );
}

#[test]
fn removing_a_body_detaches_everything() {
    let mut world = PhysicsWorld::new();
    let floor = world
        .create_body(RigidBodyBuilder::new().is_static(true).position(Vec3::new(0.0, -0.5, 0.0)))
        .unwrap();
    world
        .attach_shape(
            floor,
            Collider::new(ColliderShape::Box {
                half_extents: Vec3::new(20.0, 0.5, 20.0),
            }),
        )
        .unwrap();

    let doomed = world
        .create_body(RigidBodyBuilder::new().position(Vec3::new(0.0, 0.5, 0.0)))
        .unwrap();
    world.attach_shape(doomed, unit_box()).unwrap();
    world
        .attach_shape(
            doomed,
            unit_box().with_offset(impulse_dynamics::Transform::from_position(Vec3::Y * 0.25)),
        )
        .unwrap();

    let peer = world
        .create_body(RigidBodyBuilder::new().position(Vec3::new(3.0, 0.5, 0.0)))
        .unwrap();
    world.attach_shape(peer, unit_box()).unwrap();
    let constraint = DistanceConstraint::new(doomed, peer, Vec3::ZERO, Vec3::ZERO, 3.0);
    world.add_constraint(Box::new(constraint)).unwrap();

    // Let contacts with the floor form.
    for _ in 0..10 {
        world.step(1.0 / 60.0, false);
    }
    assert!(world.arbiter_count() > 0);
    assert_eq!(world.constraint_count(), 1);

    world.remove_body(doomed).unwrap();

    assert_eq!(world.constraint_count(), 0);
    assert!(world.body(doomed).is_none());
    assert!(world.is_body_active(peer));

    // The world keeps stepping cleanly without the removed body.
    for _ in 0..10 {
        world.step(1.0 / 60.0, false);
    }
    assert!(world.body(peer).unwrap().position.is_finite());
}

#[test]
fn null_body_anchors_one_body_constraints() {
    let mut world = PhysicsWorld::builder().gravity(Vec3::ZERO).build().unwrap();
    let anchor = world.null_body();
    let swinger = world
        .create_body(RigidBodyBuilder::new().position(Vec3::new(2.0, 0.0, 0.0)))
        .unwrap();

    let constraint = DistanceConstraint::new(anchor, swinger, Vec3::ZERO, Vec3::ZERO, 2.0);
    world.add_constraint(Box::new(constraint)).unwrap();

    // Push the body outward; the constraint should keep it near radius 2.
    world
        .set_body_velocity(swinger, Vec3::new(5.0, 0.0, 0.0), Vec3::ZERO)
        .unwrap();
    for _ in 0..120 {
        world.step(1.0 / 60.0, false);
    }

    let distance = world.body(swinger).unwrap().position.length();
    assert!((distance - 2.0).abs() < 0.25, "distance {distance}");
}
