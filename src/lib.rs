//! # gacha-solver — expected-value optimization for roll/claim processes
//!
//! Estimates and optimizes the value of a resource-constrained rolling
//! process: repeated samples from a known distribution over a character
//! catalog, with finite roll and claim budgets, and a claim-power budget
//! to allocate across a wishlist before rolling begins.
//!
//! ## Pipeline
//!
//! | Stage | Module | Description |
//! |-------|--------|-------------|
//! | 1 | [`probability`] | Catalog + bias → per-draw entity/tier probabilities (two-level sampling, multiplicative tier bias, renormalized) |
//! | 2 | [`value_dp`] | Backward induction over (rolls, claims, pending wishlist) → expected value and the implicit roll/claim/stop policy |
//! | 3 | [`optimizer`] | Per-target value curves → integer claim-power allocation (exact knapsack DP, or greedy for concave curves) |
//! | — | [`simulation`] | Monte Carlo and brute-force cross-checks; verification only, never on the decision path |
//!
//! The engine is single-threaded-deterministic by contract: every solve
//! is a pure function of its inputs. Rayon parallelism (DP level
//! wavefront, simulation chunks) is an internal optimization that does
//! not change results.
//!
//! ## Quick start
//!
//! ```no_run
//! use gacha_solver::probability::ProbabilityModel;
//! use gacha_solver::types::{BiasConfig, Catalog};
//! use gacha_solver::value_dp::{compute_value, DpConfig};
//!
//! let catalog: Catalog = serde_json::from_str("...").unwrap();
//! let model = ProbabilityModel::new(&catalog, &BiasConfig::none()).unwrap();
//! let estimate =
//!     compute_value(&model, &catalog.wishlist(), 10, 2, &DpConfig::default()).unwrap();
//! println!("expected value: {:.3}", estimate.expected_value);
//! ```

pub mod constants;
pub mod error;
pub mod optimizer;
pub mod probability;
pub mod simulation;
pub mod types;
pub mod value_dp;

pub use error::EngineError;
