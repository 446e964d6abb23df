//! Validator/simulator — independent verification of the DP engine.
//!
//! Two cross-check paths, used by the test suite and for model sanity
//! checks, never by the production decision path:
//!
//! - [`simulate`] — Monte Carlo rollout of the DP's implicit policy.
//!   Trials run in fixed-size rayon chunks, each chunk with its own
//!   `SmallRng` derived from the caller's seed, so results are
//!   deterministic for a given (seed, trials) pair regardless of thread
//!   scheduling.
//! - [`brute_force`] — naive expectimax recursion with no memoization
//!   and no shared code with the DP hot path; exponential, for small
//!   inputs only.

pub mod statistics;

use rand::rngs::SmallRng;
use rand::SeedableRng;
use rayon::prelude::*;

use crate::constants::SIM_CHUNK_SIZE;
use crate::error::EngineError;
use crate::probability::ProbabilityModel;
use crate::value_dp::{Action, ValueTable};

pub use statistics::SimulationReport;

/// Play one full roll sequence under the table's optimal policy.
fn run_trial(model: &ProbabilityModel, table: &ValueTable, rng: &mut SmallRng) -> f64 {
    let mut mask = table.full_mask();
    let mut claims_left = table.claims();
    let mut total = 0.0;
    for rolls_left in (1..=table.rolls()).rev() {
        if claims_left == 0 {
            break;
        }
        let outcome = model.sample(rng);
        if table.optimal_action(rolls_left, claims_left, mask, outcome.entity) == Action::Claim {
            total += model.entity_value(outcome.entity);
            // optimal_action only claims pending wishlist entities, so
            // the bit is present.
            mask &= !table.pending_bit(outcome.entity).unwrap_or(0);
            claims_left -= 1;
        }
    }
    total
}

/// Monte Carlo estimate of the policy's expected value.
///
/// Returns the sampled mean with a 95% confidence interval; the report
/// flags (and logs) insufficient trials when the interval is too wide
/// to be informative.
pub fn simulate(
    model: &ProbabilityModel,
    table: &ValueTable,
    trials: u64,
    seed: u64,
) -> SimulationReport {
    let num_chunks = trials.div_ceil(SIM_CHUNK_SIZE);
    let scores: Vec<f64> = (0..num_chunks)
        .into_par_iter()
        .flat_map_iter(|chunk| {
            let mut rng =
                SmallRng::seed_from_u64(seed ^ chunk.wrapping_mul(0x9E37_79B9_7F4A_7C15));
            let count = SIM_CHUNK_SIZE.min(trials - chunk * SIM_CHUNK_SIZE);
            (0..count)
                .map(|_| run_trial(model, table, &mut rng))
                .collect::<Vec<f64>>()
        })
        .collect();
    statistics::aggregate(&scores, seed)
}

/// Exact expected value by exhaustive enumeration.
///
/// Independent of the DP code path: plain recursion over
/// (rolls, claims, pending set), trying both actions at every wishlist
/// hit. State space is `O((|W|+1)^rolls)` — keep inputs small.
pub fn brute_force(
    model: &ProbabilityModel,
    wishlist: &[crate::types::EntityId],
    rolls: i64,
    claims: i64,
) -> Result<f64, EngineError> {
    if rolls < 0 {
        return Err(EngineError::InvalidBudget {
            budget: "roll",
            value: rolls,
        });
    }
    if claims < 0 {
        return Err(EngineError::InvalidBudget {
            budget: "claim",
            value: claims,
        });
    }
    let mut wl = wishlist.to_vec();
    wl.sort_unstable();
    wl.dedup();
    for &e in &wl {
        if e as usize >= model.num_entities() {
            return Err(EngineError::ModelInconsistency {
                detail: format!("wishlist references unknown entity {}", e),
            });
        }
    }
    let probs: Vec<f64> = wl.iter().map(|&e| model.entity_probability(e)).collect();
    let values: Vec<f64> = wl.iter().map(|&e| model.entity_value(e)).collect();
    let full_mask = if wl.is_empty() { 0 } else { (1u32 << wl.len()) - 1 };
    Ok(enumerate(&probs, &values, rolls as u32, claims as u32, full_mask))
}

fn enumerate(probs: &[f64], values: &[f64], rolls: u32, claims: u32, mask: u32) -> f64 {
    if rolls == 0 || claims == 0 {
        return 0.0;
    }
    let mut p_other = 1.0;
    let mut pending = mask;
    while pending != 0 {
        let slot = pending.trailing_zeros() as usize;
        pending &= pending - 1;
        p_other -= probs[slot];
    }
    let mut acc = p_other * enumerate(probs, values, rolls - 1, claims, mask);
    pending = mask;
    while pending != 0 {
        let slot = pending.trailing_zeros() as usize;
        pending &= pending - 1;
        let p = probs[slot];
        if p == 0.0 {
            continue;
        }
        let claim = values[slot]
            + enumerate(probs, values, rolls - 1, claims - 1, mask & !(1 << slot));
        let skip = enumerate(probs, values, rolls - 1, claims, mask);
        acc += p * claim.max(skip);
    }
    acc
}
