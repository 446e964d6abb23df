//! Probability model — per-draw hit probabilities under a bias.
//!
//! Two-level sampling: a draw first selects a rarity tier (base weights
//! reweighted by the active bias), apportions the tier's mass across
//! series in proportion to how many of the tier's entities each series
//! holds, then picks uniformly within the (series, tier) cell. The net
//! per-entity probability is the explicit product
//!
//! ```text
//! P(e) = P(tier) × P(series | tier) × P(e | series, tier)
//! ```
//!
//! kept as a product in code so bias reweighting (which only touches the
//! tier layer) never re-derives per-entity shares.
//!
//! Bias reweighting is the pure function [`reweight`] — there is no
//! process-wide mutable probability table. Construction validates that
//! entity probabilities sum to 1 within [`PROB_TOLERANCE`] and fails with
//! [`EngineError::ModelInconsistency`] otherwise.
//!
//! Beyond per-draw probabilities, the model exposes the induced draw
//! value as a discrete distribution ([`ValueDistribution`]) that can be
//! convolved across independent rolls, giving the full pmf of total
//! value over a rolling session rather than just its mean.

use rand::Rng;
use rustc_hash::FxHashMap;

use crate::constants::{PROB_TOLERANCE, VALUE_MERGE_TOLERANCE};
use crate::error::EngineError;
use crate::types::{BiasConfig, Catalog, DrawOutcome, EntityId, SeriesId, TierId};

/// Apply a bias to base tier weights and renormalize.
///
/// Pure: multiplies each tier's weight by the composed bias multiplier,
/// then divides by the new total. Weights that are exactly zero stay
/// zero and never cause a division. Every reweighted component must be
/// finite and non-negative — a negative or NaN multiplier would
/// otherwise slip through the sum-to-1 check and surface as a negative
/// per-entity probability. Fails if the reweighted total is zero or
/// non-finite.
pub fn reweight(base_weights: &[f64], bias: &BiasConfig) -> Result<Vec<f64>, EngineError> {
    let multiplied: Vec<f64> = base_weights
        .iter()
        .enumerate()
        .map(|(tier, &w)| w * bias.multiplier_for(tier as TierId))
        .collect();
    for (tier, &w) in multiplied.iter().enumerate() {
        if !w.is_finite() || w < 0.0 {
            return Err(EngineError::ModelInconsistency {
                detail: format!(
                    "tier {} reweights to {} (expected finite >= 0)",
                    tier, w
                ),
            });
        }
    }
    let total: f64 = multiplied.iter().sum();
    if !total.is_finite() || total <= 0.0 {
        return Err(EngineError::ModelInconsistency {
            detail: format!("reweighted tier mass is {} (expected finite > 0)", total),
        });
    }
    Ok(multiplied.iter().map(|w| w / total).collect())
}

/// Immutable per-draw distribution for one (catalog, bias) pair.
///
/// Sole authority for all probability figures. Holds the tier layer,
/// the series-within-tier layer, the flat per-entity probabilities, and
/// a prefix-sum CDF for inverse-transform sampling.
pub struct ProbabilityModel {
    tier_probs: Vec<f64>,
    /// Entities per tier (over the whole catalog).
    tier_counts: Vec<usize>,
    /// Entities per (tier, series) cell.
    cell_counts: FxHashMap<(TierId, SeriesId), usize>,
    entity_probs: Vec<f64>,
    entity_values: Vec<f64>,
    /// cdf[i] = sum of entity_probs[..i]; len = entities + 1.
    cdf: Vec<f64>,
}

impl ProbabilityModel {
    /// Build and validate the distribution for one bias configuration.
    pub fn new(catalog: &Catalog, bias: &BiasConfig) -> Result<Self, EngineError> {
        catalog.validate()?;
        if catalog.entities.is_empty() {
            return Err(EngineError::ModelInconsistency {
                detail: "catalog has no entities".into(),
            });
        }

        let mut tier_counts = vec![0usize; catalog.tiers.len()];
        let mut cell_counts: FxHashMap<(TierId, SeriesId), usize> = FxHashMap::default();
        for entity in &catalog.entities {
            tier_counts[entity.tier as usize] += 1;
            *cell_counts.entry((entity.tier, entity.series)).or_insert(0) += 1;
        }

        // A tier with no members carries no mass regardless of its weight;
        // normalization runs over populated tiers only.
        let base_weights: Vec<f64> = catalog
            .tiers
            .iter()
            .enumerate()
            .map(|(t, tier)| if tier_counts[t] > 0 { tier.base_weight } else { 0.0 })
            .collect();
        let tier_probs = reweight(&base_weights, bias)?;

        let mut entity_probs = vec![0.0; catalog.entities.len()];
        let mut entity_values = vec![0.0; catalog.entities.len()];
        for entity in &catalog.entities {
            let tier = entity.tier as usize;
            let cell = cell_counts[&(entity.tier, entity.series)] as f64;
            // P(series | tier) × P(e | series, tier); the tier_counts
            // denominator makes the product collapse to uniform-in-tier.
            let series_share = cell / tier_counts[tier] as f64;
            let within_share = 1.0 / cell;
            entity_probs[entity.id as usize] = tier_probs[tier] * series_share * within_share;
            entity_values[entity.id as usize] = entity.value;
        }

        let sum: f64 = entity_probs.iter().sum();
        if (sum - 1.0).abs() > PROB_TOLERANCE {
            return Err(EngineError::ModelInconsistency {
                detail: format!(
                    "entity probabilities sum to {} under bias {:?} (tolerance {})",
                    sum, bias.multipliers, PROB_TOLERANCE
                ),
            });
        }

        let mut cdf = vec![0.0; entity_probs.len() + 1];
        for (i, p) in entity_probs.iter().enumerate() {
            cdf[i + 1] = cdf[i] + p;
        }

        Ok(Self {
            tier_probs,
            tier_counts,
            cell_counts,
            entity_probs,
            entity_values,
            cdf,
        })
    }

    pub fn num_entities(&self) -> usize {
        self.entity_probs.len()
    }

    /// Per-draw probability of hitting one entity.
    pub fn entity_probability(&self, entity: EntityId) -> f64 {
        self.entity_probs[entity as usize]
    }

    /// Aggregate per-draw probability over a tier's members.
    pub fn tier_probability(&self, tier: TierId) -> f64 {
        self.tier_probs[tier as usize]
    }

    /// Aggregate per-draw probability over a series' members.
    pub fn series_probability(&self, series: SeriesId) -> f64 {
        self.cell_counts
            .iter()
            .filter(|((_, s), _)| *s == series)
            .map(|(&(tier, _), &cell)| {
                self.tier_probs[tier as usize] * cell as f64
                    / self.tier_counts[tier as usize] as f64
            })
            .sum()
    }

    /// Intrinsic claim value of one entity.
    pub fn entity_value(&self, entity: EntityId) -> f64 {
        self.entity_values[entity as usize]
    }

    /// All per-entity probabilities, indexed by entity id.
    pub fn probabilities(&self) -> &[f64] {
        &self.entity_probs
    }

    /// Draw one entity by inverse-transform sampling on the CDF.
    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> DrawOutcome {
        let u: f64 = rng.random();
        // First index where cdf exceeds u, minus one for the entity slot.
        // Zero-probability entities produce flat CDF steps and are never
        // selected.
        let idx = self
            .cdf
            .partition_point(|&c| c <= u)
            .saturating_sub(1)
            .min(self.entity_probs.len() - 1);
        DrawOutcome {
            entity: idx as EntityId,
        }
    }

    // ── Value-distribution statistics ───────────────────────────────

    /// E[value of one draw] — the mean intrinsic value per sample.
    pub fn expected_claim_value(&self) -> f64 {
        self.entity_probs
            .iter()
            .zip(&self.entity_values)
            .map(|(p, v)| p * v)
            .sum()
    }

    /// Var[value of one draw] = E[V²] − E[V]².
    pub fn variance(&self) -> f64 {
        let mean = self.expected_claim_value();
        let sq: f64 = self
            .entity_probs
            .iter()
            .zip(&self.entity_values)
            .map(|(p, v)| p * v * v)
            .sum();
        (sq - mean * mean).max(0.0)
    }

    pub fn std_dev(&self) -> f64 {
        self.variance().sqrt()
    }

    /// Probability mass function of one draw's intrinsic value.
    pub fn draw_value_distribution(&self) -> ValueDistribution {
        ValueDistribution::from_pairs(
            self.entity_values
                .iter()
                .zip(&self.entity_probs)
                .map(|(&v, &p)| (v, p))
                .collect(),
        )
    }

    /// Distribution of the total intrinsic value of `rolls` independent
    /// draws: the per-draw pmf convolved with itself `rolls` times.
    pub fn total_value_distribution(&self, rolls: u32) -> ValueDistribution {
        self.draw_value_distribution().power(rolls)
    }
}

/// Discrete distribution over draw values: sorted support plus
/// probabilities, duplicates merged.
///
/// Convolution composes independent draws into the distribution of
/// their sum; [`ValueDistribution::power`] uses square-and-multiply so
/// an n-roll total needs O(log n) convolutions.
#[derive(Clone, Debug)]
pub struct ValueDistribution {
    /// (value, probability), sorted by value ascending.
    outcomes: Vec<(f64, f64)>,
}

impl ValueDistribution {
    /// Point mass at 0 — the convolution identity (zero rolls).
    pub fn zero() -> Self {
        Self {
            outcomes: vec![(0.0, 1.0)],
        }
    }

    /// Sort, drop zero-probability outcomes, merge values closer than
    /// [`VALUE_MERGE_TOLERANCE`].
    fn from_pairs(mut pairs: Vec<(f64, f64)>) -> Self {
        pairs.sort_by(|a, b| a.0.total_cmp(&b.0));
        let mut outcomes: Vec<(f64, f64)> = Vec::new();
        for (value, p) in pairs {
            if p == 0.0 {
                continue;
            }
            match outcomes.last_mut() {
                Some(last) if (value - last.0).abs() <= VALUE_MERGE_TOLERANCE => last.1 += p,
                _ => outcomes.push((value, p)),
            }
        }
        if outcomes.is_empty() {
            // All mass pruned (every outcome had p = 0); degenerate but
            // keep the pmf well-formed.
            outcomes.push((0.0, 1.0));
        }
        Self { outcomes }
    }

    /// (value, probability) pairs, sorted by value.
    pub fn outcomes(&self) -> &[(f64, f64)] {
        &self.outcomes
    }

    /// P(total value >= threshold).
    pub fn probability_at_least(&self, threshold: f64) -> f64 {
        let start = self.outcomes.partition_point(|&(v, _)| v < threshold);
        self.outcomes[start..].iter().map(|&(_, p)| p).sum()
    }

    pub fn mean(&self) -> f64 {
        self.outcomes.iter().map(|&(v, p)| v * p).sum()
    }

    pub fn variance(&self) -> f64 {
        let mean = self.mean();
        let sq: f64 = self.outcomes.iter().map(|&(v, p)| p * v * v).sum();
        (sq - mean * mean).max(0.0)
    }

    pub fn std_dev(&self) -> f64 {
        self.variance().sqrt()
    }

    /// Distribution of X + Y for independent X ~ self, Y ~ other.
    pub fn convolve(&self, other: &ValueDistribution) -> ValueDistribution {
        let mut pairs = Vec::with_capacity(self.outcomes.len() * other.outcomes.len());
        for &(v1, p1) in &self.outcomes {
            for &(v2, p2) in &other.outcomes {
                pairs.push((v1 + v2, p1 * p2));
            }
        }
        ValueDistribution::from_pairs(pairs)
    }

    /// n-fold convolution by binary exponentiation.
    pub fn power(&self, n: u32) -> ValueDistribution {
        let mut result = ValueDistribution::zero();
        let mut base = self.clone();
        let mut k = n;
        while k > 0 {
            if k & 1 == 1 {
                result = result.convolve(&base);
            }
            k >>= 1;
            if k > 0 {
                base = base.convolve(&base);
            }
        }
        result
    }
}
