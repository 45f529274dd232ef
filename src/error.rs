use thiserror::Error;

/// Failures surfaced by world mutation operations.
///
/// All variants are reported before any partial state change becomes visible;
/// a failed operation leaves the world exactly as it was. Numerical anomalies
/// encountered inside `step` are clamped and logged, never returned.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PhysicsError {
    /// A pre-sized pool is full; the operation was refused.
    #[error("{pool} pool capacity of {capacity} exceeded")]
    CapacityExceeded {
        pool: &'static str,
        capacity: usize,
    },

    /// A tunable or argument is outside its valid range.
    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),

    /// The shape is already attached to another rigid body.
    #[error("shape is already attached to a rigid body")]
    ShapeAlreadyAttached,

    /// The shape is not attached to the given rigid body.
    #[error("shape is not attached to this rigid body")]
    ShapeNotPresent,

    /// Attaching a zero-mass shape to a dynamic body without an explicit
    /// mass override.
    #[error("shape contributes zero mass; attach with a mass override or to a static body")]
    ZeroMassShape,

    /// A constraint was added before its anchors/geometry were initialized.
    #[error("constraint was added without being initialized")]
    MissingConstraintInitialization,
}

pub type PhysicsResult<T> = Result<T, PhysicsError>;
