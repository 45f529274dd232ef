//! Global configuration constants for the Impulse Dynamics engine.

/// Default gravity vector applied to gravity-affected bodies (Y-up).
pub const DEFAULT_GRAVITY: [f32; 3] = [0.0, -9.81, 0.0];

/// Number of sequential-impulse passes performed per substep.
pub const DEFAULT_SOLVER_ITERATIONS: u32 = 6;

/// Number of inner integration subdivisions per step.
pub const DEFAULT_SUBSTEPS: u32 = 1;

/// Baumgarte positional-correction factor used by contact bias terms.
pub const DEFAULT_BIAS_FACTOR: f32 = 0.2;

/// Penetration depth tolerated before positional correction kicks in.
pub const DEFAULT_PENETRATION_SLOP: f32 = 0.01;

/// Closing speeds below this produce no restitution bounce.
pub const DEFAULT_RESTITUTION_THRESHOLD: f32 = 1.0;

/// Default damping applied to linear velocity, per second.
pub const DEFAULT_LINEAR_DAMPING: f32 = 0.02;

/// Default damping applied to angular velocity, per second.
pub const DEFAULT_ANGULAR_DAMPING: f32 = 0.02;

/// Margin added to broadphase leaf AABBs so small movements skip reinsertion.
pub const DEFAULT_AABB_MARGIN: f32 = 0.1;

/// Distance ahead of a fast body within which speculative contacts appear.
pub const DEFAULT_SPECULATIVE_MARGIN: f32 = 0.05;

/// Tangential drift beyond which a persisted contact point is dropped.
pub const CONTACT_BREAK_THRESHOLD: f32 = 0.02;

/// Normal separation beyond which a persisted contact point is dropped.
pub const CONTACT_SEPARATION_TOLERANCE: f32 = 0.01;

/// Linear speed below which a body accumulates sleep time.
pub const DEFAULT_SLEEP_LINEAR_VELOCITY: f32 = 0.05;

/// Angular speed below which a body accumulates sleep time.
pub const DEFAULT_SLEEP_ANGULAR_VELOCITY: f32 = 0.1;

/// Seconds of quiescence before an island may deactivate.
pub const DEFAULT_DEACTIVATION_TIME: f32 = 0.5;

/// Default capacity of the rigid body pool (includes the null body).
pub const DEFAULT_BODY_CAPACITY: usize = 4096;

/// Default capacity of the arbiter pool.
pub const DEFAULT_CONTACT_CAPACITY: usize = 16384;

/// Default capacity of the constraint pool.
pub const DEFAULT_CONSTRAINT_CAPACITY: usize = 1024;
