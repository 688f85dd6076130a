//! Clusters: the nodes of a cluster graph.

use std::collections::{BTreeMap, BTreeSet};

use crate::error::{PgmError, Result};
use crate::factor::{reduce_by_evidence, Evidence, Factor};
use crate::message::Message;

/// Variables shared by two adjacent clusters.
pub type Separator = BTreeSet<String>;

/// A node of the cluster graph holding one belief.
#[derive(Clone, Debug)]
pub struct Cluster<F: Factor> {
    id: String,
    index: usize,
    factor: F,
    neighbours: BTreeMap<usize, Separator>,
    /// Last message factor absorbed from each neighbour
    received: BTreeMap<usize, F>,
}

impl<F: Factor> Cluster<F> {
    /// Wrap `factor` as the cluster at arena position `index`.
    pub fn new(index: usize, factor: F) -> Self {
        let id = format!("c{}#{}", index, factor.var_names().join(","));
        Self {
            id,
            index,
            factor,
            neighbours: BTreeMap::new(),
            received: BTreeMap::new(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn index(&self) -> usize {
        self.index
    }

    /// Current belief.
    pub fn factor(&self) -> &F {
        &self.factor
    }

    pub fn var_names(&self) -> &[String] {
        self.factor.var_names()
    }

    pub fn scope(&self) -> BTreeSet<String> {
        self.factor.scope()
    }

    /// Neighbour indices (ascending) with their separators.
    pub fn neighbours(&self) -> &BTreeMap<usize, Separator> {
        &self.neighbours
    }

    pub fn separator(&self, neighbour: usize) -> Option<&Separator> {
        self.neighbours.get(&neighbour)
    }

    /// Last message factor absorbed from `neighbour`.
    pub fn received_from(&self, neighbour: usize) -> Option<&F> {
        self.received.get(&neighbour)
    }

    /// Register `neighbour` with the shared `separator`.
    pub fn add_neighbour(&mut self, neighbour: usize, separator: Separator) -> Result<()> {
        if neighbour == self.index {
            return Err(PgmError::InvalidGraph(format!(
                "Cluster {} cannot neighbour itself",
                self.id
            )));
        }
        if separator.is_empty() {
            return Err(PgmError::InvalidGraph(format!(
                "Empty separator between cluster {} and cluster index {}",
                self.id, neighbour
            )));
        }
        if let Some(var) = separator.iter().find(|v| !self.var_names().contains(v)) {
            return Err(PgmError::InvalidGraph(format!(
                "Separator variable {} is not in the scope of cluster {}",
                var, self.id
            )));
        }
        self.neighbours.insert(neighbour, separator);
        Ok(())
    }

    pub(crate) fn clear_neighbours(&mut self) {
        self.neighbours.clear();
    }

    /// Permanently condition the belief on `evidence`.
    pub(crate) fn reduce_belief(&mut self, evidence: &Evidence<F::Value>) -> Result<()> {
        self.factor = reduce_by_evidence(&self.factor, evidence)?;
        Ok(())
    }

    /// Message to `neighbour` under the given special evidence.
    ///
    /// The belief is conditioned on the special evidence in scope, summed down
    /// to the separator, and the last message received from `neighbour` is
    /// divided out so the neighbour never gets its own information back.
    pub fn make_message(
        &self,
        neighbour: usize,
        special_evidence: &Evidence<F::Value>,
    ) -> Result<Message<F>> {
        let separator = self.neighbours.get(&neighbour).ok_or_else(|| {
            PgmError::InvalidGraph(format!(
                "Cluster index {} is not a neighbour of {}",
                neighbour, self.id
            ))
        })?;
        let separator: Vec<String> = separator.iter().cloned().collect();

        let conditioned = reduce_by_evidence(&self.factor, special_evidence)?;
        let mut factor = conditioned.marginalize(&separator, true)?;
        if let Some(incoming) = self.received.get(&neighbour) {
            factor = factor.cancel(incoming)?;
        }

        Ok(Message::new(self.index, neighbour, factor))
    }

    /// Absorb `message`, replacing whatever its sender sent before.
    pub fn receive_message(&mut self, message: &Message<F>) -> Result<()> {
        if !self.factor.contains_all(message.var_names()) {
            return Err(PgmError::ScopeViolation {
                cluster_id: self.id.clone(),
                message_vars: message.var_names().to_vec(),
                cluster_vars: self.var_names().to_vec(),
            });
        }

        let mut belief = match self.received.get(&message.sender) {
            Some(previous) => self.factor.cancel(previous)?,
            None => self.factor.clone(),
        };
        belief = belief.multiply(&message.factor)?;

        self.factor = belief;
        self.received.insert(message.sender, message.factor.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::table::TableFactor;
    use approx::assert_abs_diff_eq;

    fn ab_cluster() -> Cluster<TableFactor> {
        let factor =
            TableFactor::from_vec("ab", &["a", "b"], &[2, 2], vec![1.0, 2.0, 3.0, 4.0]).unwrap();
        Cluster::new(0, factor)
    }

    fn sep(vars: &[&str]) -> Separator {
        vars.iter().map(|v| v.to_string()).collect()
    }

    #[test]
    fn test_cluster_id() {
        assert_eq!(ab_cluster().id(), "c0#a,b");
    }

    #[test]
    fn test_add_neighbour_validation() {
        let mut cluster = ab_cluster();
        assert!(cluster.add_neighbour(1, sep(&["b"])).is_ok());
        assert!(matches!(
            cluster.add_neighbour(2, Separator::new()),
            Err(PgmError::InvalidGraph(_))
        ));
        assert!(matches!(
            cluster.add_neighbour(2, sep(&["z"])),
            Err(PgmError::InvalidGraph(_))
        ));
        assert!(matches!(
            cluster.add_neighbour(0, sep(&["a"])),
            Err(PgmError::InvalidGraph(_))
        ));
    }

    #[test]
    fn test_message_scope_is_separator() {
        let mut cluster = ab_cluster();
        cluster.add_neighbour(1, sep(&["b"])).unwrap();

        let message = cluster.make_message(1, &Evidence::new()).unwrap();
        assert_eq!(message.var_names(), &["b".to_string()]);
        assert_eq!(message.sender, 0);
        assert_eq!(message.receiver, 1);

        let table: &TableFactor = &message.factor;
        assert_abs_diff_eq!(table.values[[0]], 4.0, epsilon = 1e-12);
        assert_abs_diff_eq!(table.values[[1]], 6.0, epsilon = 1e-12);
    }

    #[test]
    fn test_message_applies_special_evidence() {
        let mut cluster = ab_cluster();
        cluster.add_neighbour(1, sep(&["b"])).unwrap();

        let mut special = Evidence::new();
        special.insert("a".to_string(), 1usize);
        let message = cluster.make_message(1, &special).unwrap();

        assert_abs_diff_eq!(message.factor.values[[0]], 3.0, epsilon = 1e-12);
        assert_abs_diff_eq!(message.factor.values[[1]], 4.0, epsilon = 1e-12);
        // the belief itself stays unconditioned
        assert_eq!(cluster.var_names().len(), 2);
    }

    #[test]
    fn test_message_to_unknown_neighbour() {
        assert!(matches!(
            ab_cluster().make_message(3, &Evidence::new()),
            Err(PgmError::InvalidGraph(_))
        ));
    }

    #[test]
    fn test_receive_is_idempotent() {
        let mut cluster = ab_cluster();
        let incoming = TableFactor::from_vec("m", &["b"], &[2], vec![0.25, 0.75]).unwrap();
        let message = Message::new(1, 0, incoming);

        cluster.receive_message(&message).unwrap();
        let once = cluster.factor().clone();
        cluster.receive_message(&message).unwrap();

        for (x, y) in cluster.factor().values.iter().zip(once.values.iter()) {
            assert_abs_diff_eq!(*x, *y, epsilon = 1e-12);
        }
        assert_eq!(cluster.received_from(1), Some(&message.factor));
    }

    #[test]
    fn test_receive_replaces_previous_message() {
        let mut cluster = ab_cluster();
        let first = TableFactor::from_vec("m1", &["b"], &[2], vec![2.0, 1.0]).unwrap();
        let second = TableFactor::from_vec("m2", &["b"], &[2], vec![1.0, 3.0]).unwrap();

        cluster.receive_message(&Message::new(1, 0, first)).unwrap();
        cluster.receive_message(&Message::new(1, 0, second)).unwrap();

        // equivalent to having received only the second message
        let expected = [1.0, 6.0, 3.0, 12.0];
        for (x, y) in cluster.factor().values.iter().zip(expected) {
            assert_abs_diff_eq!(*x, y, epsilon = 1e-12);
        }
    }

    #[test]
    fn test_receive_scope_violation() {
        let mut cluster = ab_cluster();
        let foreign = TableFactor::from_vec("m", &["z"], &[2], vec![1.0, 1.0]).unwrap();
        let err = cluster
            .receive_message(&Message::new(1, 0, foreign))
            .unwrap_err();
        assert!(matches!(err, PgmError::ScopeViolation { .. }));
    }

    #[test]
    fn test_message_cancels_incoming_from_target() {
        let mut cluster = ab_cluster();
        cluster.add_neighbour(1, sep(&["b"])).unwrap();

        let incoming = TableFactor::from_vec("m", &["b"], &[2], vec![2.0, 5.0]).unwrap();
        cluster
            .receive_message(&Message::new(1, 0, incoming))
            .unwrap();

        // the reply equals the message sent before anything was received
        let reply = cluster.make_message(1, &Evidence::new()).unwrap();
        assert_abs_diff_eq!(reply.factor.values[[0]], 4.0, epsilon = 1e-12);
        assert_abs_diff_eq!(reply.factor.values[[1]], 6.0, epsilon = 1e-12);
    }
}
