//! The factor capability set consumed by cluster graphs.
//!
//! A cluster graph never looks inside a factor. Everything it needs (products,
//! marginals, conditioning, division and a divergence between two factors of
//! the same scope) is expressed through the [`Factor`] trait, so discrete
//! tables, Gaussians and user-defined families all plug into the same
//! message-passing engine.

use std::collections::{BTreeSet, HashMap};
use std::fmt::Debug;

use crate::error::Result;

/// Observed variable values, keyed by variable name.
pub type Evidence<V> = HashMap<String, V>;

/// A factor φ(X₁, ..., Xₖ) over a set of named variables.
///
/// Factors are values: every operation returns a new factor and leaves the
/// receiver untouched.
pub trait Factor: Clone + Debug + Send + Sync {
    /// Type of an observed value for one variable of this factor family.
    type Value: Clone + Debug + Send + Sync;

    /// Variables in the scope of this factor, in storage order.
    fn var_names(&self) -> &[String];

    /// Product of two factors over the union of their scopes.
    ///
    /// Returns [`PgmError::UnsupportedOperation`](crate::PgmError::UnsupportedOperation)
    /// when the two factors belong to families that cannot be combined.
    fn multiply(&self, other: &Self) -> Result<Self>;

    /// Sum (or integrate) variables out.
    ///
    /// With `keep == true` only `vars` survive; otherwise `vars` are removed.
    fn marginalize(&self, vars: &[String], keep: bool) -> Result<Self>;

    /// Condition on observed values, removing `vars` from the scope.
    fn reduce(&self, vars: &[String], values: &[Self::Value]) -> Result<Self>;

    /// Divide `other` out of this factor.
    fn cancel(&self, other: &Self) -> Result<Self>;

    /// KL divergence `KL(self || other)` between the normalised factors.
    ///
    /// Both factors must have the same scope. Implementations must return a
    /// non-negative value that is zero iff the factors are equal up to scale.
    fn kl_divergence(&self, other: &Self) -> Result<f64>;

    /// Divergence of this factor from the vacuous (uninformative) factor.
    fn distance_from_vacuous(&self) -> Result<f64>;

    /// Whether this factor carries no information.
    fn is_vacuous(&self) -> bool;

    /// Scope as an ordered set.
    fn scope(&self) -> BTreeSet<String> {
        self.var_names().iter().cloned().collect()
    }

    /// Whether every variable in `vars` is in the scope of this factor.
    fn contains_all(&self, vars: &[String]) -> bool {
        vars.iter().all(|v| self.var_names().contains(v))
    }
}

/// Pick the evidence entries that belong to `vars`.
///
/// The result follows the order of `vars`, so reductions are deterministic.
/// Evidence on variables outside `vars` is ignored.
pub fn subset_evidence<V: Clone>(evidence: &Evidence<V>, vars: &[String]) -> (Vec<String>, Vec<V>) {
    vars.iter()
        .filter_map(|var| evidence.get(var).map(|value| (var.clone(), value.clone())))
        .unzip()
}

/// Reduce `factor` by the evidence entries that fall inside its scope.
///
/// The factor is cloned unchanged when no evidence applies.
pub fn reduce_by_evidence<F: Factor>(factor: &F, evidence: &Evidence<F::Value>) -> Result<F> {
    let (vars, values) = subset_evidence(evidence, factor.var_names());
    if vars.is_empty() {
        Ok(factor.clone())
    } else {
        factor.reduce(&vars, &values)
    }
}
