//! Concrete end-to-end scenarios: the worked examples with known-good
//! figures, error paths for the full taxonomy, and determinism checks.

use rand::rngs::SmallRng;
use rand::SeedableRng;

use gacha_solver::error::EngineError;
use gacha_solver::optimizer::{
    solve_allocation, AllocationProblem, GroupCap, SolveMode, ValueCurve,
};
use gacha_solver::probability::ProbabilityModel;
use gacha_solver::simulation::{brute_force, simulate};
use gacha_solver::types::{BiasConfig, Catalog, Entity, RarityTier, Series};
use gacha_solver::value_dp::{
    compute_value, derive_value_curve, Action, DpConfig, FallbackMode, ValueMode,
};

/// One tier per entity so tier weights become entity probabilities.
fn catalog_from(entries: &[(f64, f64)]) -> Catalog {
    Catalog {
        tiers: entries
            .iter()
            .enumerate()
            .map(|(i, (w, _))| RarityTier {
                name: format!("tier{}", i),
                base_weight: *w,
            })
            .collect(),
        series: vec![Series {
            name: "all".into(),
            members: (0..entries.len() as u32).collect(),
        }],
        entities: entries
            .iter()
            .enumerate()
            .map(|(i, (_, v))| Entity {
                id: i as u32,
                name: format!("e{}", i),
                series: 0,
                tier: i as u32,
                value: *v,
                wishlisted: i < 2,
            })
            .collect(),
    }
}

/// A = (p 0.5, value 10), B = (p 0.3, value 20), C = (p 0.2, value 5).
fn abc_model() -> ProbabilityModel {
    let catalog = catalog_from(&[(0.5, 10.0), (0.3, 20.0), (0.2, 5.0)]);
    ProbabilityModel::new(&catalog, &BiasConfig::none()).unwrap()
}

// ── Worked scenario: wishlist {A, B}, rolls 2, claims 1 ─────────────
//
// V(1,1,{A,B}) = 0.5·10 + 0.3·20 = 11
// First roll draws A: claim = 10 + V(1,0,{B}) = 10, skip = 11 → skip.
// First roll draws B: claim = 20 + V(1,0,{A}) = 20, skip = 11 → claim.
// First roll draws C: forced skip → 11.
// V(2,1,{A,B}) = 0.5·11 + 0.3·20 + 0.2·11 = 13.7

#[test]
fn scenario_abc_expected_value() {
    let model = abc_model();
    let estimate = compute_value(&model, &[0, 1], 2, 1, &DpConfig::default()).unwrap();
    assert_eq!(estimate.mode, ValueMode::Exact);
    assert!(
        (estimate.expected_value - 13.7).abs() < 1e-9,
        "dp={}",
        estimate.expected_value
    );
    let exact = brute_force(&model, &[0, 1], 2, 1).unwrap();
    assert!((exact - 13.7).abs() < 1e-9, "brute={}", exact);
}

#[test]
fn scenario_abc_policy() {
    let model = abc_model();
    let table = compute_value(&model, &[0, 1], 2, 1, &DpConfig::default())
        .unwrap()
        .table
        .unwrap();
    let full = table.full_mask();
    // First roll: hold out for B if A comes up, claim B on sight.
    assert_eq!(table.optimal_action(2, 1, full, 0), Action::Skip);
    assert_eq!(table.optimal_action(2, 1, full, 1), Action::Claim);
    // Last roll: claim whatever wanted entity appears.
    assert_eq!(table.optimal_action(1, 1, full, 0), Action::Claim);
    assert_eq!(table.optimal_action(1, 1, full, 1), Action::Claim);
    // C is never claimable.
    assert_eq!(table.optimal_action(2, 1, full, 2), Action::Skip);
}

#[test]
fn scenario_abc_monte_carlo_agrees() {
    let model = abc_model();
    let table = compute_value(&model, &[0, 1], 2, 1, &DpConfig::default())
        .unwrap()
        .table
        .unwrap();
    let report = simulate(&model, &table, 400_000, 42);
    let tolerance = 5.0 * report.ci95_half_width + 0.01;
    assert!(
        (report.mean - 13.7).abs() < tolerance,
        "mean={} ci={}",
        report.mean,
        report.ci95_half_width
    );
    assert!(report.min >= 0.0);
    assert!(report.max <= 30.0 + 1e-9);
}

#[test]
fn simulation_is_deterministic() {
    let model = abc_model();
    let table = compute_value(&model, &[0, 1], 2, 1, &DpConfig::default())
        .unwrap()
        .table
        .unwrap();
    let a = simulate(&model, &table, 50_000, 7);
    let b = simulate(&model, &table, 50_000, 7);
    assert_eq!(a.mean, b.mean);
    assert_eq!(a.std_dev, b.std_dev);
}

// ── Worked optimizer scenario ───────────────────────────────────────
//
// budget 3, v1(x) = min(x, 2)·10, v2(x) = 5x. Marginal order: 10, 10,
// then 5 — objective 25 whichever tied split is chosen, so only the
// objective is asserted.

#[test]
fn scenario_two_curve_allocation() {
    let problem = AllocationProblem::new(
        vec![
            ValueCurve {
                entity: 1,
                values: vec![0.0, 10.0, 20.0, 20.0],
            },
            ValueCurve {
                entity: 2,
                values: vec![0.0, 5.0, 10.0, 15.0],
            },
        ],
        3,
    );
    for mode in [SolveMode::Exact, SolveMode::Greedy] {
        let solution = solve_allocation(&problem, mode).unwrap();
        assert!(
            (solution.objective - 25.0).abs() < 1e-9,
            "{:?}: objective={}",
            mode,
            solution.objective
        );
        assert!(solution.total_units() <= 3);
    }
}

#[test]
fn solver_is_deterministic() {
    let problem = AllocationProblem::new(
        vec![
            ValueCurve {
                entity: 0,
                values: vec![0.0, 8.0, 16.0],
            },
            ValueCurve {
                entity: 1,
                values: vec![0.0, 8.0, 16.0],
            },
        ],
        2,
    );
    for mode in [SolveMode::Exact, SolveMode::Greedy] {
        let a = solve_allocation(&problem, mode).unwrap();
        let b = solve_allocation(&problem, mode).unwrap();
        assert_eq!(a, b);
    }
}

// ── Bias reweighting through the full model ─────────────────────────

#[test]
fn bias_shifts_entity_probabilities() {
    let catalog = catalog_from(&[(5.0, 10.0), (3.0, 20.0), (2.0, 5.0)]);
    let bias = BiasConfig {
        multipliers: vec![(1, 2.0)],
    };
    let model = ProbabilityModel::new(&catalog, &bias).unwrap();
    // Weights 5:3:2 become 5:6:2 after the 2x boost on tier 1.
    assert!((model.entity_probability(1) - 6.0 / 13.0).abs() < 1e-12);
    let sum: f64 = (0..3).map(|e| model.entity_probability(e)).sum();
    assert!((sum - 1.0).abs() < 1e-9);
}

#[test]
fn bias_changes_expected_value() {
    let catalog = catalog_from(&[(0.5, 10.0), (0.3, 20.0), (0.2, 5.0)]);
    let cfg = DpConfig::default();
    let base_model = ProbabilityModel::new(&catalog, &BiasConfig::none()).unwrap();
    let boosted_model = ProbabilityModel::new(
        &catalog,
        &BiasConfig {
            multipliers: vec![(1, 3.0)],
        },
    )
    .unwrap();
    let base = compute_value(&base_model, &[1], 3, 1, &cfg).unwrap();
    let boosted = compute_value(&boosted_model, &[1], 3, 1, &cfg).unwrap();
    // Boosting the target's tier can only raise its appearance odds.
    assert!(boosted.expected_value > base.expected_value);
}

// ── Curve derivation feeding the optimizer ──────────────────────────

#[test]
fn derived_curves_allocate_toward_higher_value() {
    let model = abc_model();
    let cfg = DpConfig::default();
    let curve_a = derive_value_curve(&model, 0, 3, 4, &cfg).unwrap();
    let curve_b = derive_value_curve(&model, 1, 3, 4, &cfg).unwrap();
    let problem = AllocationProblem::new(vec![curve_a, curve_b], 4);
    let exact = solve_allocation(&problem, SolveMode::Exact).unwrap();
    let greedy = solve_allocation(&problem, SolveMode::Greedy).unwrap();
    // Derived curves are concave, so greedy is optimal too.
    assert!((exact.objective - greedy.objective).abs() < 1e-9);
    assert!(exact.total_units() <= 4);
    // B is rarer but worth double; the first unit goes its way.
    assert!(exact.units_for(1) >= 1);
}

// ── Error taxonomy ──────────────────────────────────────────────────

#[test]
fn negative_budgets_rejected() {
    let model = abc_model();
    let cfg = DpConfig::default();
    assert!(matches!(
        compute_value(&model, &[0], -1, 1, &cfg),
        Err(EngineError::InvalidBudget { budget: "roll", value: -1 })
    ));
    assert!(matches!(
        brute_force(&model, &[0], 1, -2),
        Err(EngineError::InvalidBudget { budget: "claim", value: -2 })
    ));
}

#[test]
fn oversized_wishlist_explodes_or_approximates() {
    let entries: Vec<(f64, f64)> = (0..20).map(|i| (1.0, i as f64)).collect();
    let catalog = catalog_from(&entries);
    let model = ProbabilityModel::new(&catalog, &BiasConfig::none()).unwrap();
    let wishlist: Vec<u32> = (0..20).collect();

    let strict = DpConfig {
        max_exact_wishlist: 8,
        fallback: FallbackMode::Error,
        ..DpConfig::default()
    };
    assert!(matches!(
        compute_value(&model, &wishlist, 5, 2, &strict),
        Err(EngineError::StateExplosion { wishlist_len: 20, .. })
    ));

    let lenient = DpConfig {
        max_exact_wishlist: 8,
        fallback: FallbackMode::Approximate,
        ..DpConfig::default()
    };
    let estimate = compute_value(&model, &wishlist, 5, 2, &lenient).unwrap();
    assert_eq!(estimate.mode, ValueMode::Approximate);
    assert!(estimate.expected_value >= 0.0);
}

#[test]
fn inconsistent_model_rejected() {
    // All weight on tiers with no members.
    let catalog = Catalog {
        tiers: vec![
            RarityTier { name: "empty".into(), base_weight: 5.0 },
            RarityTier { name: "zero".into(), base_weight: 0.0 },
        ],
        series: vec![Series { name: "s".into(), members: vec![0] }],
        entities: vec![Entity {
            id: 0,
            name: "a".into(),
            series: 0,
            tier: 1,
            value: 1.0,
            wishlisted: false,
        }],
    };
    assert!(matches!(
        ProbabilityModel::new(&catalog, &BiasConfig::none()),
        Err(EngineError::ModelInconsistency { .. })
    ));
}

#[test]
fn unknown_wishlist_entity_rejected() {
    let model = abc_model();
    assert!(matches!(
        compute_value(&model, &[99], 2, 1, &DpConfig::default()),
        Err(EngineError::ModelInconsistency { .. })
    ));
}

#[test]
fn group_caps_flow_through_scenario() {
    // Both derived targets share a series; cap the pair at 1 unit.
    let model = abc_model();
    let cfg = DpConfig::default();
    let mut problem = AllocationProblem::new(
        vec![
            derive_value_curve(&model, 0, 3, 3, &cfg).unwrap(),
            derive_value_curve(&model, 1, 3, 3, &cfg).unwrap(),
        ],
        3,
    );
    problem.group_caps.push(GroupCap {
        label: "series:all".into(),
        members: vec![0, 1],
        cap: 1,
    });
    let solution = solve_allocation(&problem, SolveMode::Exact).unwrap();
    assert_eq!(solution.total_units(), 1);
    // The single unit goes to the higher-payoff target: B's session is
    // worth 20·(1−0.7³) ≈ 13.14 vs A's 10·(1−0.5³) = 8.75.
    assert_eq!(solution.units_for(1), 1);
}

#[test]
fn wishlist_helper_collects_flags() {
    let catalog = catalog_from(&[(0.5, 10.0), (0.3, 20.0), (0.2, 5.0)]);
    assert_eq!(catalog.wishlist(), vec![0, 1]);
}

#[test]
fn negative_bias_multiplier_rejected() {
    // A −1x reweight can leave the weights summing to 1 while a tier
    // carries negative mass; the model must refuse it outright.
    let catalog = catalog_from(&[(0.5, 10.0), (0.3, 20.0), (0.2, 5.0)]);
    let bias = BiasConfig { multipliers: vec![(0, -1.0)] };
    assert!(matches!(
        ProbabilityModel::new(&catalog, &bias),
        Err(EngineError::ModelInconsistency { .. })
    ));
}

#[test]
fn value_distribution_matches_sampled_totals() {
    // The convolved total-value distribution against raw sampling.
    let model = abc_model();
    let rolls = 3u32;
    let dist = model.total_value_distribution(rolls);

    let mut rng = SmallRng::seed_from_u64(7);
    let trials = 200_000u32;
    let (mut sum, mut at_least_30) = (0.0f64, 0u32);
    for _ in 0..trials {
        let total: f64 = (0..rolls)
            .map(|_| model.entity_value(model.sample(&mut rng).entity))
            .sum();
        sum += total;
        if total >= 30.0 {
            at_least_30 += 1;
        }
    }
    let empirical_mean = sum / trials as f64;
    let empirical_tail = at_least_30 as f64 / trials as f64;

    assert!((dist.mean() - rolls as f64 * 12.0).abs() < 1e-9);
    assert!(
        (empirical_mean - dist.mean()).abs() < 0.15,
        "sampled {} vs convolved {}",
        empirical_mean,
        dist.mean()
    );
    assert!(
        (empirical_tail - dist.probability_at_least(30.0)).abs() < 0.01,
        "sampled {} vs convolved {}",
        empirical_tail,
        dist.probability_at_least(30.0)
    );
}
