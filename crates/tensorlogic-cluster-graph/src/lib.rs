//! Cluster graph belief propagation.
//!
//! This crate runs approximate inference on probabilistic graphical models by
//! passing messages over a **cluster graph**: a generalisation of the junction
//! tree whose clusters may form loops. Separators are chosen so that the
//! running intersection property holds, which keeps beliefs about each
//! variable consistent along the graph.
//!
//! # Core Concepts
//!
//! - **Factor**: anything implementing the [`Factor`] trait (product,
//!   marginalisation, conditioning, division and a divergence). Discrete
//!   tables, Gaussians in canonical form and a mixture of both are provided.
//! - **Cluster**: one factor (the belief) plus its neighbours and separators.
//! - **Message**: a cluster's belief summed down to a separator.
//! - **ClusterGraph**: builds the topology, schedules messages and answers
//!   marginal and joint queries.
//!
//! # Architecture
//!
//! ```text
//! factors → evidence reduction → subset absorption → clusters
//!         → per-variable spanning trees → separators
//!         → sync / async message passing → marginals, joint
//! ```
//!
//! # Example
//!
//! ```
//! use tensorlogic_cluster_graph::{ClusterGraph, Factor, TableFactor};
//!
//! let ab = TableFactor::from_vec("ab", &["a", "b"], &[2, 2], vec![1.0, 2.0, 3.0, 1.0]).unwrap();
//! let bc = TableFactor::from_vec("bc", &["b", "c"], &[2, 2], vec![2.0, 1.0, 1.0, 4.0]).unwrap();
//!
//! let mut graph = ClusterGraph::new(vec![ab, bc]).unwrap();
//! let stats = graph.process_graph(1e-6, 100, true).unwrap();
//! assert!(stats.converged);
//!
//! let marginal = graph.get_marginal(&["b".to_string()]).unwrap();
//! assert_eq!(marginal.var_names(), &["b".to_string()]);
//! ```

mod cluster;
mod cluster_graph;
mod config;
mod diagnostics;
mod error;
mod factor;
mod gaussian;
#[cfg(feature = "structured-logging")]
pub mod logging;
mod message;
mod mixed;
mod parallel;
mod preprocess;
mod table;
mod topology;

pub use cluster::{Cluster, Separator};
pub use cluster_graph::{ClusterGraph, ClusterGraphBuilder};
pub use config::ClusterGraphConfig;
pub use diagnostics::{ConvergenceStats, ConvergenceTrace, MessageDistance, ProcessState};
pub use error::{PgmError, Result};
pub use factor::{reduce_by_evidence, subset_evidence, Evidence, Factor};
pub use gaussian::GaussianFactor;
pub use message::Message;
pub use mixed::{EvidenceValue, MixedFactor};
pub use preprocess::{absorb_subset_factors, evidence_reduce_factors, AbsorptionRecord};
pub use table::TableFactor;
pub use topology::{
    edge_key, raw_sepsets, running_intersection_sepsets, verify_running_intersection, SepsetMap,
};
