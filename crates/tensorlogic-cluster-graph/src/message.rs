//! Messages exchanged between neighbouring clusters.

use crate::error::Result;
use crate::factor::Factor;

/// A factor sent from one cluster to a neighbour.
///
/// `sender` and `receiver` are arena indices into the owning
/// [`ClusterGraph`](crate::ClusterGraph). The factor's scope is exactly the
/// separator between the two clusters.
#[derive(Clone, Debug, PartialEq)]
pub struct Message<F> {
    pub sender: usize,
    pub receiver: usize,
    pub factor: F,
}

impl<F: Factor> Message<F> {
    pub fn new(sender: usize, receiver: usize, factor: F) -> Self {
        Self {
            sender,
            receiver,
            factor,
        }
    }

    /// Variables carried by this message.
    pub fn var_names(&self) -> &[String] {
        self.factor.var_names()
    }

    /// Divergence of this message from the previous one on the same edge.
    ///
    /// `KL(previous || self)`, or the distance from the vacuous factor when
    /// nothing was sent before.
    pub fn distance_from(&self, previous: Option<&F>) -> Result<f64> {
        match previous {
            Some(previous) => previous.kl_divergence(&self.factor),
            None => self.factor.distance_from_vacuous(),
        }
    }
}
