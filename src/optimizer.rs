//! Policy optimizer — claim-power allocation across wishlist targets.
//!
//! Given one marginal expected-value curve per target (from
//! [`crate::value_dp::derive_value_curve`] or supplied directly), solve
//!
//! ```text
//! maximize   Σ_e value_e(allocation_e)
//! subject to Σ_e allocation_e ≤ total_budget
//!            allocation_e ∈ {0, 1, …, cap_e}
//!            Σ_{e ∈ g} allocation_e ≤ cap_g   for each group g
//! ```
//!
//! Two backends behind the solver-agnostic [`AllocationSolver`] trait:
//!
//! - [`ExactDpSolver`] — the integer program solved exactly by a
//!   unit-increment bounded-knapsack DP. Group caps are handled
//!   hierarchically: an inner DP per group collapses its members into
//!   one group curve, an outer DP combines groups. Exact for any
//!   non-decreasing curves; requires groups to be disjoint.
//! - [`GreedySolver`] — repeated allocation of the single best marginal
//!   unit. Provably optimal when every curve is concave (diminishing
//!   returns); logs a warning when handed a non-concave curve.
//!
//! Both are deterministic: ties on marginal value break by entity id
//! ascending, DP ties keep the smallest allocation for the later curve.
//! Curves must be non-decreasing ([`EngineError::NonMonotonicValueCurve`]
//! otherwise); malformed constraints are [`EngineError::Infeasible`]. A
//! well-formed problem always yields a feasible (possibly all-zero)
//! allocation.

use log::warn;
use rustc_hash::{FxHashMap, FxHashSet};

use crate::constants::CURVE_SLACK;
use crate::error::EngineError;
use crate::types::{BudgetAllocation, EntityId};

/// Value as a function of allocated claim-power units.
///
/// `values[x]` is the expected value of committing `x` units; the cap is
/// `values.len() − 1`. Must be non-decreasing and anchored at
/// `values[0] = 0` (zero units yield zero value).
#[derive(Clone, Debug)]
pub struct ValueCurve {
    pub entity: EntityId,
    pub values: Vec<f64>,
}

impl ValueCurve {
    /// Maximum units this curve accepts.
    pub fn cap(&self) -> usize {
        self.values.len().saturating_sub(1)
    }

    /// Marginal value of unit `x+1` given `x` already allocated.
    pub fn marginal(&self, x: usize) -> f64 {
        self.values[x + 1] - self.values[x]
    }

    /// Whether marginals are non-increasing (diminishing returns).
    pub fn is_concave(&self) -> bool {
        (1..self.cap()).all(|x| self.marginal(x) <= self.marginal(x - 1) + CURVE_SLACK)
    }

    /// Reject empty, unanchored, non-finite, or decreasing curves.
    pub fn validate(&self) -> Result<(), EngineError> {
        if self.values.is_empty() {
            return Err(EngineError::Infeasible {
                reason: format!("value curve for entity {} is empty", self.entity),
            });
        }
        if self.values[0].abs() > CURVE_SLACK {
            return Err(EngineError::Infeasible {
                reason: format!(
                    "value curve for entity {} starts at {} instead of 0",
                    self.entity, self.values[0]
                ),
            });
        }
        for (i, &v) in self.values.iter().enumerate() {
            if !v.is_finite() {
                return Err(EngineError::Infeasible {
                    reason: format!(
                        "value curve for entity {} has non-finite value at unit {}",
                        self.entity, i
                    ),
                });
            }
        }
        for x in 0..self.cap() {
            if self.values[x + 1] < self.values[x] - CURVE_SLACK {
                return Err(EngineError::NonMonotonicValueCurve {
                    entity: self.entity,
                    index: x + 1,
                    prev: self.values[x],
                    next: self.values[x + 1],
                });
            }
        }
        Ok(())
    }
}

/// Aggregate cap over a set of entities (per-series or per-rarity).
#[derive(Clone, Debug)]
pub struct GroupCap {
    pub label: String,
    pub members: Vec<EntityId>,
    pub cap: i64,
}

/// One allocation solve: curves, the shared budget, optional group caps.
#[derive(Clone, Debug)]
pub struct AllocationProblem {
    pub curves: Vec<ValueCurve>,
    pub total_budget: i64,
    pub group_caps: Vec<GroupCap>,
}

impl AllocationProblem {
    pub fn new(curves: Vec<ValueCurve>, total_budget: i64) -> Self {
        Self {
            curves,
            total_budget,
            group_caps: Vec::new(),
        }
    }
}

/// Solver-agnostic seam: any conforming backend may be substituted.
pub trait AllocationSolver {
    fn name(&self) -> &'static str;
    fn solve(&self, problem: &AllocationProblem) -> Result<BudgetAllocation, EngineError>;
}

/// Backend selection for [`solve_allocation`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SolveMode {
    Exact,
    Greedy,
}

/// Solve with the chosen backend.
pub fn solve_allocation(
    problem: &AllocationProblem,
    mode: SolveMode,
) -> Result<BudgetAllocation, EngineError> {
    match mode {
        SolveMode::Exact => ExactDpSolver.solve(problem),
        SolveMode::Greedy => GreedySolver.solve(problem),
    }
}

/// Shared precondition checks for both backends.
fn validate_problem(problem: &AllocationProblem) -> Result<(), EngineError> {
    if problem.total_budget < 0 {
        return Err(EngineError::Infeasible {
            reason: format!("total budget is {}", problem.total_budget),
        });
    }
    let mut seen = FxHashSet::default();
    for curve in &problem.curves {
        curve.validate()?;
        if !seen.insert(curve.entity) {
            return Err(EngineError::Infeasible {
                reason: format!("duplicate value curve for entity {}", curve.entity),
            });
        }
    }
    let mut grouped = FxHashSet::default();
    for group in &problem.group_caps {
        if group.cap < 0 {
            return Err(EngineError::Infeasible {
                reason: format!("group {:?} has negative cap {}", group.label, group.cap),
            });
        }
        for &member in &group.members {
            if !seen.contains(&member) {
                return Err(EngineError::Infeasible {
                    reason: format!(
                        "group {:?} references entity {} with no value curve",
                        group.label, member
                    ),
                });
            }
            if !grouped.insert(member) {
                return Err(EngineError::Infeasible {
                    reason: format!(
                        "entity {} appears in more than one group cap",
                        member
                    ),
                });
            }
        }
    }
    Ok(())
}

/// Curve indices in entity-id order (the fixed tie-break order).
fn ordered_indices(curves: &[ValueCurve]) -> Vec<usize> {
    let mut order: Vec<usize> = (0..curves.len()).collect();
    order.sort_by_key(|&i| curves[i].entity);
    order
}

fn assemble(curves: &[ValueCurve], alloc: &[usize]) -> BudgetAllocation {
    let mut units: Vec<(EntityId, u32)> = curves
        .iter()
        .zip(alloc)
        .map(|(curve, &x)| (curve.entity, x as u32))
        .collect();
    units.sort_by_key(|&(e, _)| e);
    let objective = curves
        .iter()
        .zip(alloc)
        .map(|(curve, &x)| curve.values[x])
        .sum();
    BudgetAllocation { units, objective }
}

// ── Exact backend ───────────────────────────────────────────────────

/// Unit-increment bounded-knapsack DP, exact for monotone curves.
pub struct ExactDpSolver;

/// One group's solved sub-problem: value per total units, plus the
/// per-curve choice tables needed for reconstruction.
struct GroupDp {
    member_idx: Vec<usize>,
    /// dp value for u units spent inside the group.
    values: Vec<f64>,
    /// choices[k][u] = units given to member k when u total reach it.
    choices: Vec<Vec<u32>>,
}

/// Fold one curve into a running dp vector, recording choices.
fn knapsack_step(dp: &[f64], values: &[f64], limit: usize) -> (Vec<f64>, Vec<u32>) {
    let cap = values.len() - 1;
    let new_len = (dp.len() - 1 + cap).min(limit) + 1;
    let mut next = vec![f64::NEG_INFINITY; new_len];
    let mut choice = vec![0u32; new_len];
    for (u, slot) in next.iter_mut().enumerate() {
        for x in 0..=cap.min(u) {
            if u - x >= dp.len() {
                continue;
            }
            let candidate = dp[u - x] + values[x];
            if candidate > *slot {
                *slot = candidate;
                choice[u] = x as u32;
            }
        }
    }
    (next, choice)
}

fn solve_group(curves: &[ValueCurve], member_idx: Vec<usize>, limit: usize) -> GroupDp {
    let mut dp = vec![0.0f64];
    let mut choices = Vec::with_capacity(member_idx.len());
    for &idx in &member_idx {
        let (next, choice) = knapsack_step(&dp, &curves[idx].values, limit);
        dp = next;
        choices.push(choice);
    }
    GroupDp {
        member_idx,
        values: dp,
        choices,
    }
}

/// Walk a choice-table stack backwards, writing units into `alloc`.
fn reconstruct_group(group: &GroupDp, mut spent: usize, alloc: &mut [usize]) {
    for (k, &idx) in group.member_idx.iter().enumerate().rev() {
        let x = group.choices[k][spent] as usize;
        alloc[idx] = x;
        spent -= x;
    }
}

impl AllocationSolver for ExactDpSolver {
    fn name(&self) -> &'static str {
        "exact-dp"
    }

    fn solve(&self, problem: &AllocationProblem) -> Result<BudgetAllocation, EngineError> {
        validate_problem(problem)?;
        let curves = &problem.curves;
        let mut alloc = vec![0usize; curves.len()];
        if curves.is_empty() || problem.total_budget == 0 {
            return Ok(assemble(curves, &alloc));
        }

        let by_entity: FxHashMap<EntityId, usize> = curves
            .iter()
            .enumerate()
            .map(|(i, c)| (c.entity, i))
            .collect();

        // Budget never needs to exceed the total units any curve accepts.
        let total_cap: usize = curves.iter().map(|c| c.cap()).sum();
        let budget = (problem.total_budget as u128).min(total_cap as u128) as usize;

        // Capped groups first (members in entity-id order), then each
        // ungrouped curve as its own unbounded group — fixed order keeps
        // the solve reproducible.
        let mut grouped: FxHashSet<usize> = FxHashSet::default();
        let mut groups: Vec<GroupDp> = Vec::new();
        for group_cap in &problem.group_caps {
            let mut member_idx: Vec<usize> =
                group_cap.members.iter().map(|e| by_entity[e]).collect();
            member_idx.sort_by_key(|&i| curves[i].entity);
            grouped.extend(member_idx.iter().copied());
            let limit = (group_cap.cap as u128).min(budget as u128) as usize;
            groups.push(solve_group(curves, member_idx, limit));
        }
        for &idx in &ordered_indices(curves) {
            if !grouped.contains(&idx) {
                groups.push(solve_group(curves, vec![idx], budget));
            }
        }

        // Outer DP over group curves.
        let mut dp = vec![0.0f64];
        let mut outer_choices: Vec<Vec<u32>> = Vec::with_capacity(groups.len());
        for group in &groups {
            let (next, choice) = knapsack_step(&dp, &group.values, budget);
            dp = next;
            outer_choices.push(choice);
        }

        // Curves are monotone, so spending the full (capped) budget is
        // never worse than any prefix.
        let mut spent = dp.len() - 1;
        for (g, group) in groups.iter().enumerate().rev() {
            let x = outer_choices[g][spent] as usize;
            reconstruct_group(group, x, &mut alloc);
            spent -= x;
        }

        Ok(assemble(curves, &alloc))
    }
}

// ── Greedy backend ──────────────────────────────────────────────────

/// Marginal-unit greedy allocation, optimal for concave curves.
pub struct GreedySolver;

impl AllocationSolver for GreedySolver {
    fn name(&self) -> &'static str {
        "greedy-marginal"
    }

    fn solve(&self, problem: &AllocationProblem) -> Result<BudgetAllocation, EngineError> {
        validate_problem(problem)?;
        let curves = &problem.curves;
        for curve in curves {
            if !curve.is_concave() {
                warn!(
                    "value curve for entity {} is not concave; greedy allocation \
                     may be suboptimal",
                    curve.entity
                );
            }
        }

        let by_entity: FxHashMap<EntityId, usize> = curves
            .iter()
            .enumerate()
            .map(|(i, c)| (c.entity, i))
            .collect();
        let mut group_of = vec![usize::MAX; curves.len()];
        let mut group_used = vec![0i64; problem.group_caps.len()];
        for (g, group) in problem.group_caps.iter().enumerate() {
            for member in &group.members {
                group_of[by_entity[member]] = g;
            }
        }

        let order = ordered_indices(curves);
        let mut alloc = vec![0usize; curves.len()];
        let mut remaining = problem.total_budget;
        while remaining > 0 {
            // Scan in entity-id order; strict improvement keeps the
            // lowest id on marginal-value ties.
            let mut best: Option<(usize, f64)> = None;
            for &idx in &order {
                let curve = &curves[idx];
                if alloc[idx] >= curve.cap() {
                    continue;
                }
                let g = group_of[idx];
                if g != usize::MAX && group_used[g] >= problem.group_caps[g].cap {
                    continue;
                }
                let marginal = curve.marginal(alloc[idx]);
                if best.map_or(true, |(_, m)| marginal > m) {
                    best = Some((idx, marginal));
                }
            }
            match best {
                Some((idx, marginal)) if marginal > 0.0 => {
                    alloc[idx] += 1;
                    let g = group_of[idx];
                    if g != usize::MAX {
                        group_used[g] += 1;
                    }
                    remaining -= 1;
                }
                // No positive marginal left: more units add nothing.
                _ => break,
            }
        }

        Ok(assemble(curves, &alloc))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn curve(entity: EntityId, values: &[f64]) -> ValueCurve {
        ValueCurve {
            entity,
            values: values.to_vec(),
        }
    }

    #[test]
    fn marginals_and_concavity() {
        let c = curve(0, &[0.0, 10.0, 15.0, 17.0]);
        assert_eq!(c.cap(), 3);
        assert_eq!(c.marginal(0), 10.0);
        assert_eq!(c.marginal(2), 2.0);
        assert!(c.is_concave());
        assert!(!curve(1, &[0.0, 1.0, 5.0]).is_concave());
    }

    #[test]
    fn decreasing_curve_rejected() {
        let problem = AllocationProblem::new(vec![curve(3, &[0.0, 5.0, 4.0])], 2);
        match solve_allocation(&problem, SolveMode::Exact) {
            Err(EngineError::NonMonotonicValueCurve { entity: 3, index: 2, .. }) => {}
            other => panic!("expected NonMonotonicValueCurve, got {:?}", other),
        }
    }

    #[test]
    fn unanchored_curve_rejected() {
        // A curve paying out before any unit is committed is malformed.
        let problem = AllocationProblem::new(vec![curve(1, &[3.0, 5.0, 6.0])], 2);
        match solve_allocation(&problem, SolveMode::Exact) {
            Err(EngineError::Infeasible { reason }) => {
                assert!(reason.contains("starts at 3"), "got: {}", reason);
            }
            other => panic!("expected Infeasible, got {:?}", other),
        }
    }

    #[test]
    fn negative_budget_infeasible() {
        let problem = AllocationProblem::new(vec![curve(0, &[0.0, 1.0])], -1);
        assert!(matches!(
            solve_allocation(&problem, SolveMode::Greedy),
            Err(EngineError::Infeasible { .. })
        ));
    }

    #[test]
    fn empty_problem_yields_zero_allocation() {
        let problem = AllocationProblem::new(vec![], 5);
        let solution = solve_allocation(&problem, SolveMode::Exact).unwrap();
        assert!(solution.units.is_empty());
        assert_eq!(solution.objective, 0.0);
    }

    #[test]
    fn exact_beats_greedy_on_non_concave() {
        // All-or-nothing curve: greedy sees marginal 0 first and stalls.
        let problem = AllocationProblem::new(
            vec![curve(0, &[0.0, 0.0, 100.0]), curve(1, &[0.0, 1.0, 2.0])],
            2,
        );
        let exact = solve_allocation(&problem, SolveMode::Exact).unwrap();
        let greedy = solve_allocation(&problem, SolveMode::Greedy).unwrap();
        assert_eq!(exact.objective, 100.0);
        assert!(greedy.objective <= exact.objective);
    }

    #[test]
    fn group_cap_respected() {
        let mut problem = AllocationProblem::new(
            vec![curve(0, &[0.0, 10.0, 20.0]), curve(1, &[0.0, 9.0, 18.0])],
            4,
        );
        problem.group_caps.push(GroupCap {
            label: "same-series".into(),
            members: vec![0, 1],
            cap: 2,
        });
        for mode in [SolveMode::Exact, SolveMode::Greedy] {
            let solution = solve_allocation(&problem, mode).unwrap();
            assert_eq!(solution.total_units(), 2, "{:?}", mode);
            assert_eq!(solution.objective, 20.0, "{:?}", mode);
        }
    }

    #[test]
    fn overlapping_groups_infeasible() {
        let mut problem = AllocationProblem::new(
            vec![curve(0, &[0.0, 1.0]), curve(1, &[0.0, 1.0])],
            2,
        );
        problem.group_caps.push(GroupCap {
            label: "a".into(),
            members: vec![0, 1],
            cap: 1,
        });
        problem.group_caps.push(GroupCap {
            label: "b".into(),
            members: vec![1],
            cap: 1,
        });
        assert!(matches!(
            solve_allocation(&problem, SolveMode::Exact),
            Err(EngineError::Infeasible { .. })
        ));
    }

    #[test]
    fn greedy_tie_breaks_by_entity_id() {
        // Identical linear curves: the lower id gets the units.
        let problem = AllocationProblem::new(
            vec![curve(7, &[0.0, 5.0, 10.0]), curve(2, &[0.0, 5.0, 10.0])],
            2,
        );
        let solution = solve_allocation(&problem, SolveMode::Greedy).unwrap();
        assert_eq!(solution.units_for(2), 2);
        assert_eq!(solution.units_for(7), 0);
    }
}
