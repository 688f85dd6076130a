//! Integration tests for cluster graph construction and inference.

use approx::assert_abs_diff_eq;
use scirs2_core::ndarray::array;
use std::collections::BTreeSet;
use tensorlogic_cluster_graph::{
    ClusterGraph, ClusterGraphConfig, Evidence, Factor, GaussianFactor, PgmError, ProcessState,
    Result, TableFactor,
};

// ============================================================================
// Helper Functions
// ============================================================================

fn vars(names: &[&str]) -> Vec<String> {
    names.iter().map(|n| n.to_string()).collect()
}

fn binary(name: &str, scope: &[&str], values: Vec<f64>) -> TableFactor {
    let shape = vec![2; scope.len()];
    TableFactor::from_vec(name, scope, &shape, values).unwrap()
}

/// Product of all factors, marginalised to `keep` and normalised.
fn brute_force_marginal(factors: &[TableFactor], keep: &[&str]) -> TableFactor {
    let mut joint = factors[0].clone();
    for factor in &factors[1..] {
        joint = joint.product(factor).unwrap();
    }
    let mut marginal = joint.marginalize_out_all_except(&vars(keep)).unwrap();
    marginal.normalize();
    marginal
}

fn assert_tables_close(actual: &TableFactor, expected: &TableFactor, epsilon: f64) {
    let mut actual = actual.permuted(&expected.variables).unwrap();
    actual.normalize();
    assert_eq!(actual.values.shape(), expected.values.shape());
    for (x, y) in actual.values.iter().zip(expected.values.iter()) {
        assert_abs_diff_eq!(*x, *y, epsilon = epsilon);
    }
}

/// {A,B}, {B,C}, {C,A} where the third factor is rank one.
fn triangle() -> Vec<TableFactor> {
    vec![
        binary("ab", &["A", "B"], vec![1.0, 2.0, 3.0, 1.0]),
        binary("bc", &["B", "C"], vec![2.0, 1.0, 1.0, 4.0]),
        binary("ca", &["C", "A"], vec![3.0, 1.0, 6.0, 2.0]),
    ]
}

fn chain(length: usize) -> Vec<TableFactor> {
    (0..length - 1)
        .map(|i| {
            let a = format!("X{}", i);
            let b = format!("X{}", i + 1);
            let values = vec![1.0 + i as f64, 2.0, 0.5, 1.5 + 0.1 * i as f64];
            binary(&format!("psi{}", i), &[a.as_str(), b.as_str()], values)
        })
        .collect()
}

// ============================================================================
// Loopy graph scenarios
// ============================================================================

#[test]
fn test_loop_marginal_matches_brute_force() {
    let factors = triangle();
    let mut graph = ClusterGraph::new(factors.clone()).unwrap();

    assert_eq!(graph.num_clusters(), 3);
    assert_eq!(graph.edges().len(), 3);
    assert!(graph.verify_running_intersection_property());

    let stats = graph.process_graph(1e-6, 100, true).unwrap();
    assert!(stats.converged);

    let marginal = graph.get_marginal(&vars(&["B"])).unwrap();
    let expected = brute_force_marginal(&factors, &["B"]);
    assert_tables_close(&marginal, &expected, 1e-6);

    // P(B) ∝ [24, 63]
    assert_abs_diff_eq!(expected.values[[0]], 24.0 / 87.0, epsilon = 1e-12);
}

#[test]
fn test_loop_async_matches_brute_force() {
    let factors = triangle();
    let mut graph = ClusterGraph::new(factors.clone()).unwrap();

    let stats = graph.process_graph(1e-6, 100, false).unwrap();
    assert!(stats.converged);

    for var in ["A", "B", "C"] {
        let marginal = graph.get_marginal(&vars(&[var])).unwrap();
        assert_tables_close(&marginal, &brute_force_marginal(&factors, &[var]), 1e-6);
    }
}

#[test]
fn test_weakly_coupled_loop_is_close_to_exact() {
    let factors = vec![
        binary("ab", &["A", "B"], vec![1.0, 1.2, 1.1, 1.0]),
        binary("bc", &["B", "C"], vec![1.0, 0.9, 1.1, 1.0]),
        binary("ca", &["C", "A"], vec![1.2, 1.0, 1.0, 1.1]),
    ];
    let mut graph = ClusterGraph::new(factors.clone()).unwrap();
    let stats = graph.process_graph(1e-8, 200, false).unwrap();
    assert!(stats.converged);

    let marginal = graph.get_marginal(&vars(&["A"])).unwrap();
    assert_tables_close(&marginal, &brute_force_marginal(&factors, &["A"]), 1e-2);
}

// ============================================================================
// Trees
// ============================================================================

#[test]
fn test_tree_async_converges_within_diameter_sweeps() {
    let factors = chain(4);
    let mut graph = ClusterGraph::new(factors.clone()).unwrap();
    assert_eq!(graph.edges().len(), 2);

    let stats = graph.process_graph(1e-9, 50, false).unwrap();
    assert!(stats.converged);
    // diameter 2, plus the round that observes convergence
    assert!(stats.iterations <= 3, "took {} rounds", stats.iterations);

    let joint = graph.get_posterior_joint().unwrap();
    let mut product = factors[0].clone();
    for factor in &factors[1..] {
        product = product.product(factor).unwrap();
    }
    let joint = joint.permuted(&product.variables).unwrap();
    for (x, y) in joint.values.iter().zip(product.values.iter()) {
        assert_abs_diff_eq!(*x, *y, epsilon = 1e-9);
    }

    for var in ["X0", "X1", "X2", "X3"] {
        let marginal = graph.get_marginal(&vars(&[var])).unwrap();
        assert_tables_close(&marginal, &brute_force_marginal(&factors, &[var]), 1e-9);
    }
}

#[test]
fn test_tree_separators_are_marginal_consistent() {
    let factors = chain(5);
    let mut graph = ClusterGraph::new(factors).unwrap();
    graph.process_graph(1e-10, 100, true).unwrap();

    for (&(a, b), separator) in graph.edges() {
        let sep: Vec<String> = separator.iter().cloned().collect();
        let mut left = graph.cluster(a).unwrap().factor().marginalize(&sep, true).unwrap();
        let mut right = graph.cluster(b).unwrap().factor().marginalize(&sep, true).unwrap();
        left.normalize();
        right.normalize();
        assert_tables_close(&left, &right, 1e-9);
    }
}

#[test]
fn test_process_again_is_a_no_op() {
    let mut graph = ClusterGraph::new(chain(4)).unwrap();
    graph.process_graph(1e-9, 50, true).unwrap();
    let passed = graph.num_messages_passed();

    let stats = graph.process_graph(1e-9, 50, true).unwrap();
    assert!(stats.converged);
    assert_eq!(stats.iterations, 1);
    assert_eq!(stats.messages_passed, 0);
    assert_eq!(graph.num_messages_passed(), passed);
}

#[test]
fn test_sync_trace_has_one_entry_per_round() {
    let mut graph = ClusterGraph::new(chain(4)).unwrap();
    let stats = graph.process_graph(1e-9, 50, true).unwrap();

    let trace = graph.trace();
    assert_eq!(trace.sync_max_distances.len(), stats.iterations);
    assert_eq!(trace.max_distance_per_round().len(), stats.iterations);
    assert!(trace.sync_max_distances.last().copied().unwrap() < 1e-9);
    assert!(trace.to_json().unwrap().contains("sync_max_distances"));
}

#[test]
fn test_trace_covers_only_the_latest_call() {
    let mut graph = ClusterGraph::new(chain(4)).unwrap();
    graph.process_graph(1e-9, 50, true).unwrap();
    assert!(!graph.trace().sync_max_distances.is_empty());

    let stats = graph.process_graph(1e-9, 50, false).unwrap();
    let trace = graph.trace();
    assert!(trace.sync_max_distances.is_empty());
    assert_eq!(trace.async_rounds.len(), stats.iterations);
    assert_eq!(trace.max_distance_per_round().len(), stats.iterations);
}

#[test]
fn test_async_trace_records_every_candidate() {
    let mut graph = ClusterGraph::new(chain(4)).unwrap();
    let stats = graph.process_graph(1e-9, 50, false).unwrap();

    let rounds = &graph.trace().async_rounds;
    assert_eq!(rounds.len(), stats.iterations);
    for round in rounds {
        // 2 edges, 2 directions
        assert_eq!(round.len(), 4);
        for pair in round.windows(2) {
            assert!(pair[0].distance >= pair[1].distance);
        }
    }
    assert!(rounds.last().unwrap().iter().all(|m| !m.passed));
}

// ============================================================================
// Construction scenarios
// ============================================================================

#[test]
fn test_evidence_reduction_scenario() {
    let ab = binary("ab", &["A", "B"], vec![1.0, 2.0, 3.0, 4.0]);
    let mut evidence = Evidence::new();
    evidence.insert("A".to_string(), 0usize);
    evidence.insert("Z".to_string(), 1usize);

    let graph = ClusterGraph::builder()
        .evidence(evidence)
        .build(vec![ab.clone()])
        .unwrap();

    let factors = graph.get_factors();
    assert_eq!(factors.len(), 1);
    assert_eq!(factors[0].variables, vars(&["B"]));
    assert_eq!(factors[0], ab.reduce(&vars(&["A"]), &[0]).unwrap());
}

#[test]
fn test_subset_absorption_scenario() {
    let ab = binary("ab", &["A", "B"], vec![1.0, 2.0, 3.0, 4.0]);
    let a = TableFactor::from_vec("a", &["A"], &[2], vec![0.5, 2.0]).unwrap();

    let graph = ClusterGraph::new(vec![ab, a]).unwrap();
    let factors = graph.get_factors();

    assert_eq!(factors.len(), 1);
    assert_eq!(
        factors[0].scope(),
        vars(&["A", "B"]).into_iter().collect::<BTreeSet<_>>()
    );
    assert_abs_diff_eq!(factors[0].values[[1, 0]], 6.0, epsilon = 1e-12);
    assert_eq!(graph.absorption_records()[0].absorbed, vec![1]);
}

#[test]
fn test_single_cluster_short_circuit() {
    let ab = binary("ab", &["A", "B"], vec![1.0, 2.0, 3.0, 4.0]);
    let mut graph = ClusterGraph::new(vec![ab.clone()]).unwrap();

    let stats = graph.process_graph(1e-6, 100, true).unwrap();
    assert_eq!(stats.iterations, 0);
    assert_eq!(graph.state(), ProcessState::Converged);
    assert_eq!(graph.get_posterior_joint().unwrap(), ab);
}

#[test]
fn test_special_evidence_never_on_separators() {
    let factors = chain(4);
    let mut special = Evidence::new();
    special.insert("X1".to_string(), 1usize);

    let mut graph = ClusterGraph::builder()
        .special_evidence(special.clone())
        .build(factors.clone())
        .unwrap();

    // X1 links clusters 0 and 1 only, so they lose their edge
    assert!(graph.edges().values().all(|s| !s.contains("X1")));
    assert_eq!(graph.edges().len(), 1);
    assert!(graph.verify_running_intersection_property());

    graph.process_graph(1e-9, 50, true).unwrap();

    // X3 given X1 = 1 only depends on the last two factors
    let conditioned: Vec<TableFactor> = factors
        .iter()
        .map(|f| tensorlogic_cluster_graph::reduce_by_evidence(f, &special).unwrap())
        .collect();
    let marginal = graph.get_marginal(&vars(&["X3"])).unwrap();
    assert_tables_close(&marginal, &brute_force_marginal(&conditioned[1..], &["X3"]), 1e-9);
}

#[test]
fn test_special_evidence_on_chain_middle_message() {
    // special evidence inside a cluster shared by a tree edge
    let factors = vec![
        binary("ab", &["A", "B"], vec![1.0, 2.0, 3.0, 4.0]),
        binary("bc", &["B", "C"], vec![2.0, 1.0, 1.0, 3.0]),
    ];
    let mut special = Evidence::new();
    special.insert("A".to_string(), 1usize);

    let mut graph = ClusterGraph::builder()
        .special_evidence(special.clone())
        .build(factors.clone())
        .unwrap();
    graph.process_graph(1e-9, 50, false).unwrap();

    let conditioned: Vec<TableFactor> = factors
        .iter()
        .map(|f| tensorlogic_cluster_graph::reduce_by_evidence(f, &special).unwrap())
        .collect();
    let marginal = graph.get_marginal(&vars(&["C"])).unwrap();
    assert_tables_close(&marginal, &brute_force_marginal(&conditioned, &["C"]), 1e-9);
}

#[test]
fn test_parallel_async_matches_sequential() {
    let factors = triangle();
    let mut sequential = ClusterGraph::new(factors.clone()).unwrap();
    let mut parallel = ClusterGraph::builder()
        .config(ClusterGraphConfig::default().with_parallel_async(true))
        .build(factors)
        .unwrap();

    let a = sequential.process_graph(1e-8, 100, false).unwrap();
    let b = parallel.process_graph(1e-8, 100, false).unwrap();

    assert_eq!(a.iterations, b.iterations);
    assert_eq!(a.messages_passed, b.messages_passed);
    for (x, y) in sequential.get_factors().iter().zip(parallel.get_factors().iter()) {
        for (u, v) in x.values.iter().zip(y.values.iter()) {
            assert_abs_diff_eq!(*u, *v, epsilon = 1e-12);
        }
    }
}

#[test]
fn test_config_driven_processing() {
    let config = ClusterGraphConfig::from_json_str(r#"{"tol": 1e-9, "sync": false}"#).unwrap();
    let mut graph = ClusterGraph::builder()
        .config(config)
        .build(chain(3))
        .unwrap();
    let stats = graph.process().unwrap();
    assert!(stats.converged);
    assert!(!graph.trace().async_rounds.is_empty());
    assert!(graph.trace().sync_max_distances.is_empty());
}

// ============================================================================
// Gaussian graphs
// ============================================================================

#[test]
fn test_gaussian_chain_matches_joint() {
    let xy = GaussianFactor::from_moments(
        vars(&["x", "y"]),
        array![0.0, 1.0],
        array![[1.0, 0.3], [0.3, 2.0]],
        0.0,
    )
    .unwrap();
    let yz = GaussianFactor::from_moments(
        vars(&["y", "z"]),
        array![0.5, -1.0],
        array![[1.5, -0.4], [-0.4, 1.0]],
        0.0,
    )
    .unwrap();

    let mut graph = ClusterGraph::new(vec![xy.clone(), yz.clone()]).unwrap();
    let stats = graph.process_graph(1e-9, 20, true).unwrap();
    assert!(stats.converged);

    let expected = xy
        .multiply(&yz)
        .unwrap()
        .marginalize(&vars(&["y"]), true)
        .unwrap();
    let marginal = graph.get_marginal(&vars(&["y"])).unwrap();

    assert_abs_diff_eq!(
        marginal.mean().unwrap()[0],
        expected.mean().unwrap()[0],
        epsilon = 1e-9
    );
    assert_abs_diff_eq!(
        marginal.covariance().unwrap()[[0, 0]],
        expected.covariance().unwrap()[[0, 0]],
        epsilon = 1e-9
    );
}

/// Linear-Gaussian `y ~ N(x1 + x2, 1)` with `y` observed as special evidence,
/// joined to an isotropic prior over `x1, x2, z`.
#[test]
fn test_conditional_gaussian_with_special_evidence_converges() {
    let likelihood = GaussianFactor::canonical(
        vars(&["x1", "x2", "y"]),
        array![[1.0, 1.0, -1.0], [1.0, 1.0, -1.0], [-1.0, -1.0, 1.0]],
        array![0.0, 0.0, 0.0],
        0.0,
    )
    .unwrap();
    let prior = GaussianFactor::from_moments(
        vars(&["x1", "x2", "z"]),
        array![0.0, 0.0, 0.0],
        scirs2_core::ndarray::Array2::eye(3),
        0.0,
    )
    .unwrap();

    let expected = likelihood
        .multiply(&prior)
        .unwrap()
        .reduce(&vars(&["y"]), &[2.0])
        .unwrap()
        .marginalize(&vars(&["x1"]), true)
        .unwrap();

    for sync in [true, false] {
        let mut special = Evidence::new();
        special.insert("y".to_string(), 2.0);
        let mut graph = ClusterGraph::builder()
            .special_evidence(special)
            .build(vec![likelihood.clone(), prior.clone()])
            .unwrap();

        let stats = graph.process_graph(1e-6, 20, sync).unwrap();
        assert!(stats.converged, "sync = {}: {:?}", sync, stats);
        assert!(stats.iterations < 20);
        assert_eq!(graph.last_passed_message_factors().len(), 2);

        let marginal = graph.get_marginal(&vars(&["x1"])).unwrap();
        assert_abs_diff_eq!(
            marginal.mean().unwrap()[0],
            expected.mean().unwrap()[0],
            epsilon = 1e-9
        );
        assert_abs_diff_eq!(marginal.mean().unwrap()[0], 2.0 / 3.0, epsilon = 1e-9);
        assert_abs_diff_eq!(
            marginal.covariance().unwrap()[[0, 0]],
            expected.covariance().unwrap()[[0, 0]],
            epsilon = 1e-9
        );
    }
}

// ============================================================================
// Contract violations
// ============================================================================

/// A factor whose divergence is always negative.
#[derive(Clone, Debug)]
struct NegativeKl(TableFactor);

impl Factor for NegativeKl {
    type Value = usize;

    fn var_names(&self) -> &[String] {
        self.0.var_names()
    }

    fn multiply(&self, other: &Self) -> Result<Self> {
        self.0.multiply(&other.0).map(NegativeKl)
    }

    fn marginalize(&self, vars: &[String], keep: bool) -> Result<Self> {
        self.0.marginalize(vars, keep).map(NegativeKl)
    }

    fn reduce(&self, vars: &[String], values: &[usize]) -> Result<Self> {
        self.0.reduce(vars, values).map(NegativeKl)
    }

    fn cancel(&self, other: &Self) -> Result<Self> {
        self.0.cancel(&other.0).map(NegativeKl)
    }

    fn kl_divergence(&self, _other: &Self) -> Result<f64> {
        Ok(-0.5)
    }

    fn distance_from_vacuous(&self) -> Result<f64> {
        Ok(-0.5)
    }

    fn is_vacuous(&self) -> bool {
        false
    }
}

#[test]
fn test_negative_divergence_is_fatal() {
    let factors = vec![
        NegativeKl(binary("ab", &["A", "B"], vec![1.0, 2.0, 3.0, 4.0])),
        NegativeKl(binary("bc", &["B", "C"], vec![2.0, 1.0, 1.0, 3.0])),
    ];

    for sync in [true, false] {
        let mut graph = ClusterGraph::new(factors.clone()).unwrap();
        let err = graph.process_graph(1e-3, 10, sync).unwrap_err();
        assert!(
            matches!(err, PgmError::NegativeDivergence { value, .. } if value == -0.5),
            "unexpected error {:?}",
            err
        );
    }
}

#[test]
fn test_marginal_outside_every_cluster() {
    let graph = ClusterGraph::new(triangle()).unwrap();
    assert!(matches!(
        graph.get_marginal(&vars(&["A", "B", "C"])),
        Err(PgmError::NoClusterContains(_))
    ));
}
