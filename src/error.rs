//! Engine error taxonomy.
//!
//! Every fallible public operation returns `Result<_, EngineError>`.
//! Variants carry enough context (offending sum, entity, state-space
//! size) to diagnose without re-running the computation. Two variants
//! are recoverable by the caller:
//!
//! - [`EngineError::StateExplosion`] — retry with a smaller wishlist or
//!   switch the calculator to its approximate mode.
//! - everything else is a caller or modeling bug and is fatal.

use thiserror::Error;

use crate::types::EntityId;

#[derive(Debug, Error)]
pub enum EngineError {
    /// Probabilities do not sum to 1 within tolerance, or the catalog is
    /// structurally inconsistent (dangling ids, negative weights).
    #[error("probability model inconsistent: {detail}")]
    ModelInconsistency { detail: String },

    /// A resource budget is negative. `budget` names which one.
    #[error("invalid {budget} budget: {value} (must be non-negative)")]
    InvalidBudget { budget: &'static str, value: i64 },

    /// The exact DP state space exceeds the configured memoization
    /// ceiling. Recoverable: shrink the wishlist or use
    /// [`crate::value_dp::FallbackMode::Approximate`].
    #[error(
        "exact state space for wishlist of {wishlist_len} needs {required} \
         table entries, ceiling is {ceiling}"
    )]
    StateExplosion {
        wishlist_len: usize,
        required: u128,
        ceiling: usize,
    },

    /// A value curve decreases. The greedy allocator's optimality proof
    /// requires non-decreasing curves, so this is rejected up front.
    #[error(
        "value curve for entity {entity} decreases at unit {index}: \
         {prev} -> {next}"
    )]
    NonMonotonicValueCurve {
        entity: EntityId,
        index: usize,
        prev: f64,
        next: f64,
    },

    /// Malformed allocation problem: negative budget or cap, duplicate
    /// curve entities, overlapping groups.
    #[error("infeasible allocation problem: {reason}")]
    Infeasible { reason: String },
}
