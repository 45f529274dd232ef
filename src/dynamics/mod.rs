//! Simulation dynamics: islands, the sequential-impulse solver, constraints,
//! and integration.

pub mod constraint;
pub mod integrator;
pub mod island;
pub mod solver;

pub use constraint::{
    ConstraintBehavior, ConstraintData, ConstraintRow, DistanceConstraint, MAX_CONSTRAINT_ROWS,
};
pub use island::{Island, IslandId, IslandManager};
pub use solver::{SolverSettings, SolverStepTotals};
