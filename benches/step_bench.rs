use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use glam::Vec3;
use impulse_dynamics::{Collider, ColliderShape, PhysicsWorld, RigidBodyBuilder};

fn world_with_grid(side: usize) -> PhysicsWorld {
    let mut world = PhysicsWorld::builder()
        .allow_deactivation(false)
        .build()
        .expect("valid configuration");

    let floor = world
        .create_body(
            RigidBodyBuilder::new()
                .is_static(true)
                .position(Vec3::new(0.0, -0.5, 0.0)),
        )
        .expect("capacity");
    world
        .attach_shape(
            floor,
            Collider::new(ColliderShape::Box {
                half_extents: Vec3::new(100.0, 0.5, 100.0),
            }),
        )
        .expect("floor shape");

    for x in 0..side {
        for z in 0..side {
            let body = world
                .create_body(RigidBodyBuilder::new().position(Vec3::new(
                    x as f32 * 1.5,
                    1.0,
                    z as f32 * 1.5,
                )))
                .expect("capacity");
            world
                .attach_shape(
                    body,
                    Collider::new(ColliderShape::Box {
                        half_extents: Vec3::splat(0.5),
                    }),
                )
                .expect("shape");
        }
    }
    world
}

fn bench_step(c: &mut Criterion) {
    let mut group = c.benchmark_group("world_step");
    for side in [4usize, 8, 12] {
        group.bench_with_input(BenchmarkId::new("single_thread", side * side), &side, |b, &side| {
            let mut world = world_with_grid(side);
            b.iter(|| world.step(1.0 / 60.0, false));
        });
        #[cfg(feature = "parallel")]
        group.bench_with_input(BenchmarkId::new("multi_thread", side * side), &side, |b, &side| {
            let mut world = world_with_grid(side);
            b.iter(|| world.step(1.0 / 60.0, true));
        });
    }
    group.finish();
}

criterion_group!(benches, bench_step);
criterion_main!(benches);
