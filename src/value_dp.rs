//! Expected-value calculator — backward induction over roll/claim states.
//!
//! Computes the value of an optimal roll/claim/stop policy for a state
//! (rolls left `r`, claims left `c`, pending wishlist set `W`):
//!
//! ```text
//! V(0, ·, ·) = V(·, 0, ·) = 0
//! V(r, c, W) = p_other · V(r−1, c, W)
//!            + Σ_{e ∈ W} p(e) · max( value(e) + V(r−1, c−1, W∖{e}),
//!                                    V(r−1, c, W) )
//! ```
//!
//! where `p_other` covers non-wishlist draws and already-satisfied
//! entities (forced skip). The optimal action after drawing `e` is
//! whichever branch attains the max; ties claim.
//!
//! ## State space and memoization
//!
//! The pending set is a bitmask over the (sorted, deduplicated)
//! wishlist, so the exact table has `2^|W| × (r+1) × (c+1)` entries. The
//! table is a flat arena indexed by
//! `(r × num_masks + mask) × (claims+1) + c` — r-major, so each roll
//! level is contiguous and levels can be filled as a rayon wavefront
//! (level r reads only level r−1). The arena lives for one invocation
//! and is dropped with the returned [`ValueTable`].
//!
//! ## Exact/approximate switch
//!
//! When `|W|` exceeds [`DpConfig::max_exact_wishlist`] or the table would
//! exceed [`DpConfig::memo_ceiling`], the calculator either fails with
//! [`EngineError::StateExplosion`] (recoverable: shrink the wishlist) or,
//! under [`FallbackMode::Approximate`], logs a warning and switches to an
//! independence approximation: each wishlist entity's appearance
//! probability `q_e = 1 − (1−p_e)^r` is treated independently and the
//! claim budget is charged in expectation, highest-value entities first,
//! with partial credit for the entity that straddles the budget boundary.
//! The approximation ignores claim contention between entities within a
//! single sequence of rolls, so it overestimates slightly when the claim
//! budget is tight; the mode in use is reported on the result, never
//! switched silently.

use log::warn;
use rayon::prelude::*;
use rustc_hash::FxHashMap;

use crate::constants::{DEFAULT_MAX_EXACT_WISHLIST, DEFAULT_MEMO_CEILING, MAX_WISHLIST_BITS};
use crate::error::EngineError;
use crate::optimizer::ValueCurve;
use crate::probability::ProbabilityModel;
use crate::types::EntityId;

/// What to do when the exact state space exceeds its ceiling.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FallbackMode {
    /// Surface [`EngineError::StateExplosion`] to the caller.
    Error,
    /// Log a warning and return the independence approximation.
    Approximate,
}

/// Calculator configuration: the documented exact/approximate boundary.
#[derive(Clone, Copy, Debug)]
pub struct DpConfig {
    /// Largest wishlist solved exactly (hard cap [`MAX_WISHLIST_BITS`]).
    pub max_exact_wishlist: usize,
    /// Largest exact table, in entries.
    pub memo_ceiling: usize,
    pub fallback: FallbackMode,
}

impl Default for DpConfig {
    fn default() -> Self {
        Self {
            max_exact_wishlist: DEFAULT_MAX_EXACT_WISHLIST,
            memo_ceiling: DEFAULT_MEMO_CEILING,
            fallback: FallbackMode::Error,
        }
    }
}

/// Roll/claim decision after observing a draw.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Action {
    Claim,
    Skip,
}

/// Which computation produced a [`ValueEstimate`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ValueMode {
    Exact,
    Approximate,
}

/// Result of one calculator invocation.
#[derive(Debug)]
pub struct ValueEstimate {
    pub expected_value: f64,
    pub mode: ValueMode,
    /// Present in exact mode; carries the full table and implicit policy.
    pub table: Option<ValueTable>,
}

/// The solved DP table for one (model, wishlist, budgets) query.
///
/// Owns the memo arena; dropped after use. The optimal policy is defined
/// implicitly by [`ValueTable::optimal_action`].
#[derive(Debug)]
pub struct ValueTable {
    /// Sorted, deduplicated wishlist; bit i of a mask refers to slot i.
    wishlist: Vec<EntityId>,
    slot_of: FxHashMap<EntityId, usize>,
    values: Vec<f64>,
    rolls: usize,
    claims: usize,
    num_masks: usize,
    /// Flat arena: `(r * num_masks + mask) * (claims+1) + c`.
    table: Vec<f64>,
}

impl ValueTable {
    #[inline(always)]
    fn idx(&self, r: usize, mask: u32, c: usize) -> usize {
        (r * self.num_masks + mask as usize) * (self.claims + 1) + c
    }

    /// V(r, c, mask).
    pub fn value(&self, rolls_left: usize, claims_left: usize, mask: u32) -> f64 {
        self.table[self.idx(rolls_left, mask, claims_left)]
    }

    /// Value of the root state: full budgets, nothing satisfied yet.
    pub fn root_value(&self) -> f64 {
        self.value(self.rolls, self.claims, self.full_mask())
    }

    pub fn rolls(&self) -> usize {
        self.rolls
    }

    pub fn claims(&self) -> usize {
        self.claims
    }

    /// Mask with every wishlist entity still pending.
    pub fn full_mask(&self) -> u32 {
        if self.wishlist.is_empty() {
            0
        } else {
            (1u32 << self.wishlist.len()) - 1
        }
    }

    pub fn wishlist(&self) -> &[EntityId] {
        &self.wishlist
    }

    /// Bit for an entity still representable in masks, if wishlisted.
    pub fn pending_bit(&self, entity: EntityId) -> Option<u32> {
        self.slot_of.get(&entity).map(|&slot| 1u32 << slot)
    }

    /// The implicit policy: optimal action at (rolls_left, claims_left,
    /// mask) after drawing `drawn`. Non-wishlist, already-satisfied, and
    /// zero-budget situations are forced skips. Ties claim, which makes
    /// the policy reproducible.
    pub fn optimal_action(
        &self,
        rolls_left: usize,
        claims_left: usize,
        mask: u32,
        drawn: EntityId,
    ) -> Action {
        if rolls_left == 0 || claims_left == 0 {
            return Action::Skip;
        }
        let Some(&slot) = self.slot_of.get(&drawn) else {
            return Action::Skip;
        };
        let bit = 1u32 << slot;
        if mask & bit == 0 {
            return Action::Skip;
        }
        let claim = self.values[slot] + self.value(rolls_left - 1, claims_left - 1, mask & !bit);
        let skip = self.value(rolls_left - 1, claims_left, mask);
        if claim >= skip {
            Action::Claim
        } else {
            Action::Skip
        }
    }
}

/// Sorted, deduplicated wishlist restricted to catalog entities.
fn prepare_wishlist(
    model: &ProbabilityModel,
    wishlist: &[EntityId],
) -> Result<Vec<EntityId>, EngineError> {
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
    Ok(wl)
}

/// Compute the expected value of an optimal policy.
///
/// Fails with [`EngineError::InvalidBudget`] on negative budgets and
/// [`EngineError::StateExplosion`] when the exact table would exceed the
/// configured ceiling under [`FallbackMode::Error`]. Zero budgets are
/// valid and yield 0 (base cases, not errors).
pub fn compute_value(
    model: &ProbabilityModel,
    wishlist: &[EntityId],
    rolls: i64,
    claims: i64,
    cfg: &DpConfig,
) -> Result<ValueEstimate, EngineError> {
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
    let wl = prepare_wishlist(model, wishlist)?;
    let (rolls, claims) = (rolls as usize, claims as usize);

    let n = wl.len();
    // Saturate rather than overflow: 2^n alone passes any sane ceiling
    // long before u128 runs out of bits.
    let required: u128 = if n >= 128 {
        u128::MAX
    } else {
        (1u128 << n)
            .saturating_mul(rolls as u128 + 1)
            .saturating_mul(claims as u128 + 1)
    };
    let exact_cap = cfg.max_exact_wishlist.min(MAX_WISHLIST_BITS);
    if n > exact_cap || required > cfg.memo_ceiling as u128 {
        match cfg.fallback {
            FallbackMode::Error => {
                return Err(EngineError::StateExplosion {
                    wishlist_len: n,
                    required,
                    ceiling: cfg.memo_ceiling,
                })
            }
            FallbackMode::Approximate => {
                warn!(
                    "exact state space ({} entries for wishlist of {}) over ceiling {}; \
                     using independence approximation",
                    required, n, cfg.memo_ceiling
                );
                return Ok(ValueEstimate {
                    expected_value: approximate_value(model, &wl, rolls, claims),
                    mode: ValueMode::Approximate,
                    table: None,
                });
            }
        }
    }

    let table = solve_exact(model, wl, rolls, claims);
    Ok(ValueEstimate {
        expected_value: table.root_value(),
        mode: ValueMode::Exact,
        table: Some(table),
    })
}

/// Exact backward induction, level-parallel over masks.
fn solve_exact(
    model: &ProbabilityModel,
    wishlist: Vec<EntityId>,
    rolls: usize,
    claims: usize,
) -> ValueTable {
    let n = wishlist.len();
    let num_masks = 1usize << n;
    let probs: Vec<f64> = wishlist
        .iter()
        .map(|&e| model.entity_probability(e))
        .collect();
    let values: Vec<f64> = wishlist.iter().map(|&e| model.entity_value(e)).collect();
    let slot_of: FxHashMap<EntityId, usize> = wishlist
        .iter()
        .enumerate()
        .map(|(i, &e)| (e, i))
        .collect();

    // Σ p(e) over pending entities, per mask, via subset recursion.
    let mut mask_prob = vec![0.0f64; num_masks];
    for mask in 1..num_masks {
        let low = mask.trailing_zeros() as usize;
        mask_prob[mask] = mask_prob[mask & (mask - 1)] + probs[low];
    }

    let row_len = claims + 1;
    let layer_len = num_masks * row_len;
    let mut table = vec![0.0f64; (rolls + 1) * layer_len];

    // Level r reads only level r−1, so each level fills in parallel.
    for r in 1..=rolls {
        let (done, rest) = table.split_at_mut(r * layer_len);
        let prev = &done[(r - 1) * layer_len..];
        rest[..layer_len]
            .par_chunks_mut(row_len)
            .enumerate()
            .for_each(|(mask, row)| {
                let p_other = 1.0 - mask_prob[mask];
                for c in 1..=claims {
                    let skip = prev[mask * row_len + c];
                    let mut acc = p_other * skip;
                    let mut pending = mask;
                    while pending != 0 {
                        let slot = pending.trailing_zeros() as usize;
                        pending &= pending - 1;
                        let p = probs[slot];
                        if p == 0.0 {
                            continue;
                        }
                        let claimed =
                            values[slot] + prev[(mask & !(1 << slot)) * row_len + c - 1];
                        acc += p * claimed.max(skip);
                    }
                    row[c] = acc;
                }
                // row[0] stays 0: no claims left extracts no further value.
            });
    }

    ValueTable {
        wishlist,
        slot_of,
        values,
        rolls,
        claims,
        num_masks,
        table,
    }
}

/// Independence approximation for oversized wishlists.
///
/// Charges the claim budget in expectation: entities are visited in
/// descending value order (entity id ascending on ties) and each
/// consumes `min(q_e, budget remaining)` expected claims, contributing
/// `value · consumed`.
fn approximate_value(
    model: &ProbabilityModel,
    wishlist: &[EntityId],
    rolls: usize,
    claims: usize,
) -> f64 {
    let mut items: Vec<(f64, EntityId)> = wishlist
        .iter()
        .map(|&e| (model.entity_value(e), e))
        .collect();
    items.sort_by(|a, b| b.0.total_cmp(&a.0).then(a.1.cmp(&b.1)));

    let mut remaining = claims as f64;
    let mut ev = 0.0;
    for (value, entity) in items {
        if remaining <= 0.0 {
            break;
        }
        let p = model.entity_probability(entity);
        let q = 1.0 - (1.0 - p).powf(rolls as f64);
        let consumed = q.min(remaining);
        ev += value * consumed;
        remaining -= consumed;
    }
    ev
}

/// Marginal expected-value curve for pre-committing claim-power to one
/// target.
///
/// Allocation semantics (pre-commitment): each unit of claim-power funds
/// one independent rolling session of `rolls_per_session` rolls with a
/// single claim reserved for `entity`. The calculator prices one session
/// exactly; sessions compose as independent Bernoulli attempts, so
/// `curve[x] = value · (1 − (1−q)^x)` with `q` the per-session success
/// probability. The curve is non-decreasing and concave, which is what
/// the greedy allocator's optimality argument needs.
pub fn derive_value_curve(
    model: &ProbabilityModel,
    entity: EntityId,
    rolls_per_session: i64,
    units: usize,
    cfg: &DpConfig,
) -> Result<ValueCurve, EngineError> {
    let session = compute_value(model, &[entity], rolls_per_session, 1, cfg)?;
    let value = model.entity_value(entity);
    let q = if value > 0.0 {
        (session.expected_value / value).clamp(0.0, 1.0)
    } else {
        0.0
    };
    let values = (0..=units)
        .map(|x| value * (1.0 - (1.0 - q).powi(x as i32)))
        .collect();
    Ok(ValueCurve { entity, values })
}
