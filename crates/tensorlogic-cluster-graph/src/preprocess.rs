//! Factor pre-processing before clusters are formed.
//!
//! Evidence is baked into the factors once, and factors whose scope is a
//! strict subset of another factor's scope are multiplied into it so every
//! cluster is maximal.

use std::collections::{BTreeSet, HashSet};

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::factor::{reduce_by_evidence, Evidence, Factor};

/// Which input factors ended up inside one output factor.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AbsorptionRecord {
    /// Input index of the factor that hosts the output
    pub factor_index: usize,
    /// Input indices multiplied into it, in absorption order
    pub absorbed: Vec<usize>,
}

/// Reduce every factor by the evidence inside its scope.
///
/// Factors are always copied; evidence on unknown variables is ignored.
pub fn evidence_reduce_factors<F: Factor>(
    factors: &[F],
    evidence: &Evidence<F::Value>,
) -> Result<Vec<F>> {
    factors
        .iter()
        .map(|factor| reduce_by_evidence(factor, evidence))
        .collect()
}

struct Pending<F> {
    index: usize,
    scope: BTreeSet<String>,
    factor: F,
    absorbed: Vec<usize>,
}

fn is_strict_subset(small: &BTreeSet<String>, large: &BTreeSet<String>) -> bool {
    small.len() < large.len() && small.is_subset(large)
}

/// Multiply every strict-subset factor into a factor that covers it.
///
/// Passes repeat until no more absorption happens, so no output scope is a
/// strict subset of another unless the product was refused with
/// [`PgmError::UnsupportedOperation`](crate::PgmError::UnsupportedOperation).
/// Refused pairs are logged and left apart. Every input ends up in exactly
/// one output. Outputs keep input order; the records are sorted by the
/// number of absorbed factors, largest first.
pub fn absorb_subset_factors<F: Factor>(
    factors: Vec<F>,
) -> Result<(Vec<F>, Vec<AbsorptionRecord>)> {
    let mut pending: Vec<Pending<F>> = factors
        .into_iter()
        .enumerate()
        .map(|(index, factor)| Pending {
            index,
            scope: factor.scope(),
            factor,
            absorbed: Vec::new(),
        })
        .collect();
    let mut refused: HashSet<(usize, usize)> = HashSet::new();

    loop {
        let mut merged = false;
        let mut i = 0;
        while i < pending.len() {
            let mut j = 0;
            while j < pending.len() {
                if i == j
                    || refused.contains(&(pending[i].index, pending[j].index))
                    || !is_strict_subset(&pending[j].scope, &pending[i].scope)
                {
                    j += 1;
                    continue;
                }

                match pending[i].factor.multiply(&pending[j].factor) {
                    Ok(product) => {
                        let small = pending.remove(j);
                        if j < i {
                            i -= 1;
                        }
                        let host = &mut pending[i];
                        host.factor = product;
                        host.absorbed.push(small.index);
                        host.absorbed.extend(small.absorbed);
                        merged = true;
                    }
                    Err(err) if err.is_recoverable() => {
                        tracing::warn!(
                            host = pending[i].index,
                            subset = pending[j].index,
                            error = %err,
                            "Could not absorb subset factor, keeping it as a separate cluster"
                        );
                        refused.insert((pending[i].index, pending[j].index));
                        j += 1;
                    }
                    Err(err) => return Err(err),
                }
            }
            i += 1;
        }
        if !merged {
            break;
        }
    }

    let mut records: Vec<AbsorptionRecord> = pending
        .iter()
        .map(|p| AbsorptionRecord {
            factor_index: p.index,
            absorbed: p.absorbed.clone(),
        })
        .collect();
    records.sort_by(|a, b| b.absorbed.len().cmp(&a.absorbed.len()));

    let outputs = pending.into_iter().map(|p| p.factor).collect();
    Ok((outputs, records))
}
