//! Core data model: the catalog (entities, series, rarity tiers), bias
//! configuration, draw outcomes, and budget allocations.
//!
//! The catalog is immutable once loaded and validated. All probability
//! figures are owned by [`crate::probability::ProbabilityModel`]; the
//! structs here only carry identity, structure, and intrinsic values.
//! Ids are indices into the catalog's flat vectors, which keeps every
//! cross-reference an O(1) array lookup.

use serde::{Deserialize, Serialize};

use crate::error::EngineError;

/// Index into [`Catalog::entities`].
pub type EntityId = u32;
/// Index into [`Catalog::series`].
pub type SeriesId = u32;
/// Index into [`Catalog::tiers`].
pub type TierId = u32;

/// One claimable character. Immutable once loaded.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Entity {
    /// Must equal this entity's index in [`Catalog::entities`].
    pub id: EntityId,
    pub name: String,
    pub series: SeriesId,
    pub tier: TierId,
    /// Intrinsic value obtained on claim (e.g. currency yield). Finite, >= 0.
    pub value: f64,
    /// Whether the user has pre-declared interest in this entity.
    pub wishlisted: bool,
}

/// A group of entities sharing a source work. Probability mass is
/// apportioned across series before entities within a series.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Series {
    pub name: String,
    pub members: Vec<EntityId>,
}

/// A rarity label carrying a base selection weight. Bias configurations
/// reweight tiers multiplicatively; see [`crate::probability::reweight`].
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RarityTier {
    pub name: String,
    /// Relative (unnormalized) selection weight. Finite, >= 0.
    pub base_weight: f64,
}

/// The full catalog: tiers, series, and entities, each indexed by id.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Catalog {
    pub tiers: Vec<RarityTier>,
    pub series: Vec<Series>,
    pub entities: Vec<Entity>,
}

impl Catalog {
    /// Check structural consistency: ids in range, membership lists
    /// matching entity back-references, weights and values finite and
    /// non-negative. Every violation is a [`EngineError::ModelInconsistency`].
    pub fn validate(&self) -> Result<(), EngineError> {
        let inconsistent = |detail: String| EngineError::ModelInconsistency { detail };

        for tier in &self.tiers {
            if !tier.base_weight.is_finite() || tier.base_weight < 0.0 {
                return Err(inconsistent(format!(
                    "tier {:?} has invalid base weight {}",
                    tier.name, tier.base_weight
                )));
            }
        }
        for (eid, entity) in self.entities.iter().enumerate() {
            if entity.id as usize != eid {
                return Err(inconsistent(format!(
                    "entity at index {} carries id {}",
                    eid, entity.id
                )));
            }
            if entity.series as usize >= self.series.len() {
                return Err(inconsistent(format!(
                    "entity {} references unknown series {}",
                    entity.id, entity.series
                )));
            }
            if entity.tier as usize >= self.tiers.len() {
                return Err(inconsistent(format!(
                    "entity {} references unknown tier {}",
                    entity.id, entity.tier
                )));
            }
            if !entity.value.is_finite() || entity.value < 0.0 {
                return Err(inconsistent(format!(
                    "entity {} has invalid value {}",
                    entity.id, entity.value
                )));
            }
            if !self.series[entity.series as usize]
                .members
                .contains(&entity.id)
            {
                return Err(inconsistent(format!(
                    "entity {} missing from member list of series {}",
                    entity.id, entity.series
                )));
            }
        }
        for (sid, series) in self.series.iter().enumerate() {
            for &member in &series.members {
                let entity = self
                    .entities
                    .get(member as usize)
                    .ok_or_else(|| inconsistent(format!(
                        "series {} lists unknown entity {}",
                        sid, member
                    )))?;
                if entity.series as usize != sid {
                    return Err(inconsistent(format!(
                        "series {} lists entity {} which belongs to series {}",
                        sid, member, entity.series
                    )));
                }
            }
        }
        Ok(())
    }

    /// Entity ids carrying the wishlist flag, ascending.
    pub fn wishlist(&self) -> Vec<EntityId> {
        self.entities
            .iter()
            .filter(|e| e.wishlisted)
            .map(|e| e.id)
            .collect()
    }
}

/// Multiplicative tier reweights from currently-active biases.
///
/// Repeated entries for the same tier compose multiplicatively (two
/// stacked 2x boosts yield 4x). An empty config is the unbiased base
/// distribution.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct BiasConfig {
    pub multipliers: Vec<(TierId, f64)>,
}

impl BiasConfig {
    /// The unbiased configuration.
    pub fn none() -> Self {
        Self::default()
    }

    /// Composed multiplier for one tier.
    pub fn multiplier_for(&self, tier: TierId) -> f64 {
        self.multipliers
            .iter()
            .filter(|(t, _)| *t == tier)
            .map(|(_, m)| *m)
            .product()
    }
}

/// The entity produced by one sample. Ephemeral, never persisted.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DrawOutcome {
    pub entity: EntityId,
}

/// Result of a budget-allocation solve: integer claim-power units per
/// wishlist entity, plus the objective value attained.
///
/// `units` is sorted by entity id and covers every entity the problem
/// named (zero allocations included), so output order is reproducible.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct BudgetAllocation {
    pub units: Vec<(EntityId, u32)>,
    pub objective: f64,
}

impl BudgetAllocation {
    /// Total claim-power assigned.
    pub fn total_units(&self) -> u64 {
        self.units.iter().map(|(_, u)| *u as u64).sum()
    }

    /// Units assigned to one entity (0 if the entity was not allocated).
    pub fn units_for(&self, entity: EntityId) -> u32 {
        self.units
            .iter()
            .find(|(e, _)| *e == entity)
            .map(|(_, u)| *u)
            .unwrap_or(0)
    }
}
