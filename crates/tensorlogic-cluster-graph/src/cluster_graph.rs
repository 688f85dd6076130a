//! Cluster graphs and loopy belief-update message passing.
//!
//! A cluster graph is built from a list of factors in four steps:
//!
//! ```text
//! factors → evidence reduction → subset absorption → clusters → RIP separators
//! ```
//!
//! Inference then passes messages along the separators until the largest
//! divergence between consecutive messages on an edge falls below `tol`, or
//! the round budget runs out.
//!
//! # Scheduling
//!
//! - **Synchronous**: one message per round, the one that changed most since
//!   it was last sent. Only the receiver's outgoing messages are recomputed.
//! - **Asynchronous**: every message is recomputed each round and all of those
//!   whose divergence is at least `tol` are sent, most informative first.
//!
//! On a tree both policies reproduce exact sum-product; on a loopy graph they
//! give the usual loopy belief propagation approximation.
//!
//! # References
//!
//! - Koller & Friedman, "Probabilistic Graphical Models", Sections 10.3 and 11.3

use std::collections::{BTreeMap, BTreeSet, HashMap};

use crate::cluster::{Cluster, Separator};
use crate::config::{validate_tol, ClusterGraphConfig};
use crate::diagnostics::{ConvergenceStats, ConvergenceTrace, MessageDistance, ProcessState};
use crate::error::{PgmError, Result};
use crate::factor::{reduce_by_evidence, Evidence, Factor};
use crate::message::Message;
use crate::parallel;
use crate::preprocess::{absorb_subset_factors, evidence_reduce_factors, AbsorptionRecord};
use crate::topology::{
    edge_key, raw_sepsets, running_intersection_sepsets, verify_running_intersection, SepsetMap,
};

/// Builder for [`ClusterGraph`].
#[derive(Clone, Debug)]
pub struct ClusterGraphBuilder<F: Factor> {
    evidence: Evidence<F::Value>,
    special_evidence: Evidence<F::Value>,
    config: ClusterGraphConfig,
}

impl<F: Factor> Default for ClusterGraphBuilder<F> {
    fn default() -> Self {
        Self {
            evidence: Evidence::new(),
            special_evidence: Evidence::new(),
            config: ClusterGraphConfig::default(),
        }
    }
}

impl<F: Factor> ClusterGraphBuilder<F> {
    /// Observations baked into the factors before clusters are formed.
    pub fn evidence(mut self, evidence: Evidence<F::Value>) -> Self {
        self.evidence = evidence;
        self
    }

    /// Observations applied to each outgoing message instead of the beliefs.
    ///
    /// Special-evidence variables never appear on separators.
    pub fn special_evidence(mut self, special_evidence: Evidence<F::Value>) -> Self {
        self.special_evidence = special_evidence;
        self
    }

    pub fn config(mut self, config: ClusterGraphConfig) -> Self {
        self.config = config;
        self
    }

    /// Build the graph from `factors`.
    pub fn build(self, factors: Vec<F>) -> Result<ClusterGraph<F>> {
        if factors.is_empty() {
            return Err(PgmError::InvalidGraph(
                "A cluster graph needs at least one factor".to_string(),
            ));
        }
        self.config.validate()?;

        let num_inputs = factors.len();
        let reduced = evidence_reduce_factors(&factors, &self.evidence)?;
        let (absorbed, absorption_records) = absorb_subset_factors(reduced)?;

        let clusters: Vec<Cluster<F>> = absorbed
            .into_iter()
            .enumerate()
            .map(|(index, factor)| Cluster::new(index, factor))
            .collect();

        let mut id_to_index = HashMap::new();
        for cluster in &clusters {
            if id_to_index
                .insert(cluster.id().to_string(), cluster.index())
                .is_some()
            {
                return Err(PgmError::InvalidGraph(format!(
                    "Duplicate cluster id {}",
                    cluster.id()
                )));
            }
        }

        let excluded_vars: BTreeSet<String> = self
            .evidence
            .keys()
            .chain(self.special_evidence.keys())
            .cloned()
            .collect();

        let scopes: Vec<BTreeSet<String>> = clusters.iter().map(|c| c.scope()).collect();
        let raw = raw_sepsets(&scopes, &excluded_vars);
        let sepsets = running_intersection_sepsets(&raw);

        let mut graph = ClusterGraph {
            clusters,
            id_to_index,
            special_evidence: self.special_evidence,
            excluded_vars,
            raw_sepsets: raw,
            sepsets: SepsetMap::new(),
            absorption_records,
            config: self.config,
            state: ProcessState::Unprocessed,
            last_passed: BTreeMap::new(),
            passed_messages: Vec::new(),
            num_messages_passed: 0,
            trace: ConvergenceTrace::default(),
        };
        graph.apply_sepsets(sepsets)?;

        tracing::info!(
            factors = num_inputs,
            clusters = graph.clusters.len(),
            edges = graph.sepsets.len(),
            "Built cluster graph"
        );

        Ok(graph)
    }
}

/// A cluster graph over factors of one family.
#[derive(Clone, Debug)]
pub struct ClusterGraph<F: Factor> {
    clusters: Vec<Cluster<F>>,
    id_to_index: HashMap<String, usize>,
    special_evidence: Evidence<F::Value>,
    /// Evidence and special-evidence variables, never used as separators
    excluded_vars: BTreeSet<String>,
    raw_sepsets: SepsetMap,
    sepsets: SepsetMap,
    absorption_records: Vec<AbsorptionRecord>,
    config: ClusterGraphConfig,
    state: ProcessState,
    /// Last message factor passed on each directed edge (sender, receiver)
    last_passed: BTreeMap<(usize, usize), F>,
    /// Every passed message, only kept in debug mode
    passed_messages: Vec<Message<F>>,
    num_messages_passed: usize,
    trace: ConvergenceTrace,
}

impl<F: Factor> ClusterGraph<F> {
    /// Build a graph with no evidence and the default configuration.
    pub fn new(factors: Vec<F>) -> Result<Self> {
        Self::builder().build(factors)
    }

    pub fn builder() -> ClusterGraphBuilder<F> {
        ClusterGraphBuilder::default()
    }

    /// Validate `sepsets` and install them as the graph's edges.
    fn apply_sepsets(&mut self, sepsets: SepsetMap) -> Result<()> {
        let n = self.clusters.len();
        let mut normalised = SepsetMap::new();

        for ((a, b), separator) in sepsets {
            if a >= n || b >= n {
                return Err(PgmError::InvalidGraph(format!(
                    "Edge ({}, {}) refers to a cluster outside 0..{}",
                    a, b, n
                )));
            }
            if a == b {
                return Err(PgmError::InvalidGraph(format!(
                    "Edge ({}, {}) is a self loop",
                    a, b
                )));
            }
            if separator.is_empty() {
                return Err(PgmError::InvalidGraph(format!(
                    "Empty separator between {} and {}",
                    self.clusters[a].id(),
                    self.clusters[b].id()
                )));
            }
            if let Some(var) = separator.iter().find(|v| self.excluded_vars.contains(*v)) {
                return Err(PgmError::InvalidGraph(format!(
                    "Evidence variable {} cannot be a separator variable",
                    var
                )));
            }
            for &end in &[a, b] {
                let scope = self.clusters[end].scope();
                if !separator.is_subset(&scope) {
                    return Err(PgmError::InvalidGraph(format!(
                        "Separator {:?} is not in the scope of cluster {}",
                        separator,
                        self.clusters[end].id()
                    )));
                }
            }
            if normalised.insert(edge_key(a, b), separator).is_some() {
                return Err(PgmError::InvalidGraph(format!(
                    "Edge between {} and {} given twice",
                    self.clusters[a].id(),
                    self.clusters[b].id()
                )));
            }
        }

        for cluster in &mut self.clusters {
            cluster.clear_neighbours();
        }
        for (&(a, b), separator) in &normalised {
            self.clusters[a].add_neighbour(b, separator.clone())?;
            self.clusters[b].add_neighbour(a, separator.clone())?;
        }
        self.sepsets = normalised;
        Ok(())
    }

    /// Replace the graph's edges with caller-supplied separators.
    ///
    /// Only allowed before any message has been passed.
    pub fn rebuild_graph(&mut self, sepsets: SepsetMap) -> Result<()> {
        if !self.last_passed.is_empty() {
            return Err(PgmError::InvalidGraph(
                "Cannot rebuild a graph after messages have been passed".to_string(),
            ));
        }
        self.apply_sepsets(sepsets)
    }

    /// Check the running intersection property on the current edges.
    pub fn verify_running_intersection_property(&self) -> bool {
        let scopes: Vec<BTreeSet<String>> = self.clusters.iter().map(|c| c.scope()).collect();
        verify_running_intersection(&scopes, &self.sepsets, &self.excluded_vars)
    }

    /// Run message passing with the configured defaults.
    pub fn process(&mut self) -> Result<ConvergenceStats> {
        let ClusterGraphConfig {
            tol, max_iter, sync, ..
        } = self.config;
        self.process_graph(tol, max_iter, sync)
    }

    /// Pass messages until convergence or `max_iter` rounds.
    ///
    /// Calling again continues from the current beliefs and starts a fresh
    /// [`trace`](Self::trace). Running out of rounds is reported in the
    /// returned stats, not as an error.
    pub fn process_graph(
        &mut self,
        tol: f64,
        max_iter: usize,
        sync: bool,
    ) -> Result<ConvergenceStats> {
        validate_tol(tol)?;
        self.state = ProcessState::Iterating;
        self.trace = ConvergenceTrace::default();

        if self.clusters.len() == 1 {
            self.clusters[0].reduce_belief(&self.special_evidence)?;
            self.state = ProcessState::Converged;
            return Ok(ConvergenceStats {
                iterations: 0,
                messages_passed: 0,
                max_distance: 0.0,
                converged: true,
            });
        }

        if self.sepsets.is_empty() {
            tracing::info!(
                clusters = self.clusters.len(),
                "Cluster graph has no edges, nothing to pass"
            );
            self.state = ProcessState::Converged;
            return Ok(ConvergenceStats {
                iterations: 0,
                messages_passed: 0,
                max_distance: 0.0,
                converged: true,
            });
        }

        tracing::info!(
            clusters = self.clusters.len(),
            edges = self.sepsets.len(),
            tol,
            max_iter,
            sync,
            "Starting message passing"
        );

        let stats = if sync {
            self.process_sync(tol, max_iter)?
        } else {
            self.process_async(tol, max_iter)?
        };

        self.state = if stats.converged {
            ProcessState::Converged
        } else {
            ProcessState::MaxIterReached
        };

        if stats.converged {
            tracing::info!(
                iterations = stats.iterations,
                messages = stats.messages_passed,
                max_distance = stats.max_distance,
                "Message passing converged"
            );
        } else {
            tracing::warn!(
                iterations = stats.iterations,
                max_distance = stats.max_distance,
                tol,
                "Message passing stopped at max_iter without converging"
            );
        }

        Ok(stats)
    }

    /// Outgoing messages of `sender`, keyed by receiver.
    fn cluster_messages(&self, sender: usize) -> Result<BTreeMap<usize, Message<F>>> {
        let cluster = &self.clusters[sender];
        cluster
            .neighbours()
            .keys()
            .map(|&receiver| {
                cluster
                    .make_message(receiver, &self.special_evidence)
                    .map(|message| (receiver, message))
            })
            .collect()
    }

    /// Every outgoing message in arena order, neighbours ascending.
    fn make_all_messages(&self) -> Result<Vec<Message<F>>> {
        if self.config.parallel_async {
            return parallel::make_all_messages(&self.clusters, &self.special_evidence);
        }
        let mut messages = Vec::new();
        for sender in 0..self.clusters.len() {
            messages.extend(self.cluster_messages(sender)?.into_values());
        }
        Ok(messages)
    }

    /// Divergence of `message` from `previous`, checked for sign.
    fn checked_distance(&self, message: &Message<F>, previous: Option<&F>) -> Result<f64> {
        let distance = message.distance_from(previous)?;
        if distance.is_nan() || distance < 0.0 {
            return Err(PgmError::NegativeDivergence {
                sender: self.clusters[message.sender].id().to_string(),
                receiver: self.clusters[message.receiver].id().to_string(),
                value: distance,
            });
        }
        Ok(distance)
    }

    /// Bookkeeping after `message` has been absorbed by its receiver.
    fn record_passed(&mut self, message: Message<F>) {
        tracing::debug!(
            sender = self.clusters[message.sender].id(),
            receiver = self.clusters[message.receiver].id(),
            "Passed message"
        );
        self.last_passed
            .insert((message.sender, message.receiver), message.factor.clone());
        self.num_messages_passed += 1;
        if self.config.debug {
            self.passed_messages.push(message);
        }
    }

    fn warn_if_all_vacuous<'a>(mut messages: impl Iterator<Item = &'a Message<F>>)
    where
        F: 'a,
    {
        if messages.all(|message| message.factor.is_vacuous()) {
            tracing::warn!("All candidate messages are vacuous");
        }
    }

    fn pass_message(&mut self, message: Message<F>) -> Result<()> {
        self.clusters[message.receiver].receive_message(&message)?;
        self.record_passed(message);
        Ok(())
    }

    fn process_sync(&mut self, tol: f64, max_iter: usize) -> Result<ConvergenceStats> {
        let mut cache: Vec<BTreeMap<usize, Message<F>>> = (0..self.clusters.len())
            .map(|sender| self.cluster_messages(sender))
            .collect::<Result<_>>()?;
        Self::warn_if_all_vacuous(cache.iter().flat_map(|outgoing| outgoing.values()));

        let mut messages_passed = 0;
        let mut max_distance = f64::INFINITY;

        for iteration in 0..max_iter {
            let mut best: Option<(usize, usize)> = None;
            let mut best_distance = f64::NEG_INFINITY;
            for (sender, outgoing) in cache.iter().enumerate() {
                for (&receiver, message) in outgoing {
                    let previous = self.last_passed.get(&(sender, receiver));
                    let distance = self.checked_distance(message, previous)?;
                    if distance > best_distance {
                        best_distance = distance;
                        best = Some((sender, receiver));
                    }
                }
            }

            self.trace.sync_max_distances.push(best_distance);
            max_distance = best_distance;
            tracing::debug!(iteration, max_distance, "Synchronous round");

            let Some((sender, receiver)) = best.filter(|_| best_distance >= tol) else {
                return Ok(ConvergenceStats {
                    iterations: iteration + 1,
                    messages_passed,
                    max_distance: max_distance.max(0.0),
                    converged: true,
                });
            };

            let message = cache[sender].get(&receiver).cloned().ok_or_else(|| {
                PgmError::InvalidGraph(format!(
                    "No cached message from {} to {}",
                    self.clusters[sender].id(),
                    self.clusters[receiver].id()
                ))
            })?;
            self.pass_message(message)?;
            messages_passed += 1;

            cache[receiver] = self.cluster_messages(receiver)?;
        }

        Ok(ConvergenceStats {
            iterations: max_iter,
            messages_passed,
            max_distance,
            converged: false,
        })
    }

    fn process_async(&mut self, tol: f64, max_iter: usize) -> Result<ConvergenceStats> {
        let mut previous_round: BTreeMap<(usize, usize), F> = BTreeMap::new();
        let mut messages_passed = 0;
        let mut max_distance = f64::INFINITY;

        for iteration in 0..max_iter {
            let messages = self.make_all_messages()?;
            if iteration == 0 {
                Self::warn_if_all_vacuous(messages.iter());
            }

            let mut ranked: Vec<(Message<F>, f64)> = Vec::with_capacity(messages.len());
            for message in messages {
                let key = (message.sender, message.receiver);
                let previous = previous_round
                    .get(&key)
                    .or_else(|| self.last_passed.get(&key));
                let distance = self.checked_distance(&message, previous)?;
                ranked.push((message, distance));
            }
            ranked.sort_by(|a, b| b.1.total_cmp(&a.1));

            max_distance = ranked.first().map_or(0.0, |(_, distance)| *distance);
            let converged = max_distance < tol;

            self.trace.async_rounds.push(
                ranked
                    .iter()
                    .map(|(message, distance)| MessageDistance {
                        sender_id: self.clusters[message.sender].id().to_string(),
                        receiver_id: self.clusters[message.receiver].id().to_string(),
                        distance: *distance,
                        passed: !converged && *distance >= tol,
                    })
                    .collect(),
            );
            tracing::debug!(
                iteration,
                max_distance,
                candidates = ranked.len(),
                "Asynchronous round"
            );

            if converged {
                return Ok(ConvergenceStats {
                    iterations: iteration + 1,
                    messages_passed,
                    max_distance,
                    converged: true,
                });
            }

            previous_round = ranked
                .iter()
                .map(|(message, _)| ((message.sender, message.receiver), message.factor.clone()))
                .collect();

            let to_send: Vec<Message<F>> = ranked
                .into_iter()
                .filter(|(_, distance)| *distance >= tol)
                .map(|(message, _)| message)
                .collect();
            messages_passed += to_send.len();

            if self.config.parallel_async {
                let inbox = parallel::group_by_receiver(&to_send, self.clusters.len());
                parallel::absorb_grouped(&mut self.clusters, &inbox)?;
                for message in to_send {
                    self.record_passed(message);
                }
            } else {
                for message in to_send {
                    self.pass_message(message)?;
                }
            }
        }

        Ok(ConvergenceStats {
            iterations: max_iter,
            messages_passed,
            max_distance,
            converged: false,
        })
    }

    /// Marginal over `vars` from the smallest cluster containing them all.
    ///
    /// Special evidence on the cluster's other variables is applied first.
    pub fn get_marginal(&self, vars: &[String]) -> Result<F> {
        let cluster = self
            .clusters
            .iter()
            .filter(|cluster| cluster.factor().contains_all(vars))
            .min_by_key(|cluster| cluster.var_names().len())
            .ok_or_else(|| PgmError::NoClusterContains(vars.to_vec()))?;

        let conditioning: Evidence<F::Value> = self
            .special_evidence
            .iter()
            .filter(|(var, _)| !vars.contains(*var))
            .map(|(var, value)| (var.clone(), value.clone()))
            .collect();

        let reduced = reduce_by_evidence(cluster.factor(), &conditioning)?;
        reduced.marginalize(vars, true)
    }

    /// Product of all beliefs with every last passed message divided out.
    ///
    /// Exact on trees; an approximation on loopy graphs.
    pub fn get_posterior_joint(&self) -> Result<F> {
        let (first, rest) = self.clusters.split_first().ok_or_else(|| {
            PgmError::InvalidGraph("Cluster graph has no clusters".to_string())
        })?;

        let mut joint = first.factor().clone();
        for cluster in rest {
            joint = joint.multiply(cluster.factor())?;
        }
        for message in self.last_passed.values() {
            joint = joint.cancel(message)?;
        }
        Ok(joint)
    }

    /// Copies of the current beliefs, in cluster order.
    pub fn get_factors(&self) -> Vec<F> {
        self.clusters.iter().map(|c| c.factor().clone()).collect()
    }

    pub fn cluster_ids(&self) -> Vec<&str> {
        self.clusters.iter().map(|c| c.id()).collect()
    }

    pub fn num_clusters(&self) -> usize {
        self.clusters.len()
    }

    pub fn cluster(&self, index: usize) -> Option<&Cluster<F>> {
        self.clusters.get(index)
    }

    pub fn cluster_by_id(&self, id: &str) -> Option<&Cluster<F>> {
        self.id_to_index.get(id).map(|&index| &self.clusters[index])
    }

    /// Edges as `(lower, higher)` index pairs with their separators.
    pub fn edges(&self) -> &SepsetMap {
        &self.sepsets
    }

    /// Candidate separators for every cluster pair, before spanning trees.
    pub fn raw_sepsets(&self) -> &SepsetMap {
        &self.raw_sepsets
    }

    pub fn separator(&self, a: usize, b: usize) -> Option<&Separator> {
        self.sepsets.get(&edge_key(a, b))
    }

    pub fn absorption_records(&self) -> &[AbsorptionRecord] {
        &self.absorption_records
    }

    pub fn config(&self) -> &ClusterGraphConfig {
        &self.config
    }

    pub fn state(&self) -> ProcessState {
        self.state
    }

    /// Messages passed over the graph's lifetime.
    pub fn num_messages_passed(&self) -> usize {
        self.num_messages_passed
    }

    /// Last message factor passed on each directed edge.
    pub fn last_passed_message_factors(&self) -> &BTreeMap<(usize, usize), F> {
        &self.last_passed
    }

    /// Every passed message; empty unless `debug` is set.
    pub fn passed_messages(&self) -> &[Message<F>] {
        &self.passed_messages
    }

    pub fn trace(&self) -> &ConvergenceTrace {
        &self.trace
    }
}
