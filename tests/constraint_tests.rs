use glam::Vec3;
use impulse_dynamics::{
    core::BodyData, BodyHandle, ConstraintBehavior, ConstraintData, DistanceConstraint,
    PhysicsWorld, RigidBodyBuilder,
};

const DT: f32 = 1.0 / 60.0;

#[test]
fn distance_constraint_holds_under_gravity() {
    let mut world = PhysicsWorld::builder().allow_deactivation(false).build().unwrap();
    let anchor = world
        .create_body(
            RigidBodyBuilder::new()
                .is_static(true)
                .position(Vec3::new(0.0, 5.0, 0.0)),
        )
        .unwrap();
    let bob = world
        .create_body(
            RigidBodyBuilder::new()
                .position(Vec3::new(0.0, 3.0, 0.0))
                .damping(0.1, 0.1),
        )
        .unwrap();

    let constraint = DistanceConstraint::new(anchor, bob, Vec3::ZERO, Vec3::ZERO, 2.0);
    world.add_constraint(Box::new(constraint)).unwrap();

    for _ in 0..300 {
        world.step(DT, false);
        let distance = world
            .body(bob)
            .unwrap()
            .position
            .distance(Vec3::new(0.0, 5.0, 0.0));
        assert!(
            (distance - 2.0).abs() < 0.3,
            "constraint drifted to {distance}"
        );
    }
}

#[test]
fn constraints_couple_bodies_into_one_island() {
    let mut world = PhysicsWorld::builder().gravity(Vec3::ZERO).build().unwrap();
    let islands_before = world.island_count();

    let a = world.create_body(RigidBodyBuilder::new()).unwrap();
    let b = world
        .create_body(RigidBodyBuilder::new().position(Vec3::new(0.0, 0.0, 3.0)))
        .unwrap();
    assert_eq!(world.island_count(), islands_before + 2);

    let id = world
        .add_constraint(Box::new(DistanceConstraint::new(
            a,
            b,
            Vec3::ZERO,
            Vec3::ZERO,
            3.0,
        )))
        .unwrap();
    assert_eq!(world.island_count(), islands_before + 1);

    // Removing the edge splits the island again on the next step.
    world.remove_constraint(id).unwrap();
    world.step(DT, false);
    assert_eq!(world.island_count(), islands_before + 2);
}

/// A one-row motor that drives the relative velocity of two bodies along an
/// axis, exercising the consumer-facing constraint contract.
struct VelocityMotor {
    body_a: BodyHandle,
    body_b: BodyHandle,
    axis: Vec3,
    target_speed: f32,
    enabled: bool,
}

impl ConstraintBehavior for VelocityMotor {
    fn bodies(&self) -> (BodyHandle, BodyHandle) {
        (self.body_a, self.body_b)
    }

    fn is_enabled(&self) -> bool {
        self.enabled
    }

    fn prepare(&mut self, _a: &BodyData, _b: &BodyData, data: &mut ConstraintData, _dt: f32) {
        data.begin(1);
        data.set_row(
            0,
            -self.axis,
            Vec3::ZERO,
            self.axis,
            Vec3::ZERO,
            -self.target_speed,
            f32::NEG_INFINITY,
            f32::INFINITY,
        );
    }
}

#[test]
fn custom_constraints_drive_the_solver_rows() {
    let mut world = PhysicsWorld::builder()
        .gravity(Vec3::ZERO)
        .allow_deactivation(false)
        .build()
        .unwrap();
    let anchor = world.null_body();
    let driven = world.create_body(RigidBodyBuilder::new().damping(0.0, 0.0)).unwrap();

    world
        .add_constraint(Box::new(VelocityMotor {
            body_a: anchor,
            body_b: driven,
            axis: Vec3::X,
            target_speed: 2.0,
            enabled: true,
        }))
        .unwrap();

    for _ in 0..30 {
        world.step(DT, false);
    }
    let velocity = world.body(driven).unwrap().linear_velocity;
    assert!(
        (velocity.x - 2.0).abs() < 0.1,
        "motor failed to reach target: {velocity:?}"
    );
}

#[test]
fn disabled_constraints_are_skipped_but_not_removed() {
    let mut world = PhysicsWorld::builder()
        .gravity(Vec3::ZERO)
        .allow_deactivation(false)
        .build()
        .unwrap();
    let anchor = world.null_body();
    let driven = world.create_body(RigidBodyBuilder::new().damping(0.0, 0.0)).unwrap();

    world
        .add_constraint(Box::new(VelocityMotor {
            body_a: anchor,
            body_b: driven,
            axis: Vec3::X,
            target_speed: 2.0,
            enabled: false,
        }))
        .unwrap();

    for _ in 0..30 {
        world.step(DT, false);
    }
    assert_eq!(world.constraint_count(), 1);
    let velocity = world.body(driven).unwrap().linear_velocity;
    assert!(velocity.length() < 1e-5, "disabled constraint acted: {velocity:?}");
}
