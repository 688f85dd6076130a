//! Graphs that mix discrete and Gaussian factors.
//!
//! Products between a table and a Gaussian are not representable in either
//! family, so they are refused with [`PgmError::UnsupportedOperation`]. Graph
//! construction treats that refusal as "do not absorb" rather than a failure.

use serde::{Deserialize, Serialize};

use crate::error::{PgmError, Result};
use crate::factor::Factor;
use crate::gaussian::GaussianFactor;
use crate::table::TableFactor;

/// An observed value for a variable of a [`MixedFactor`].
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub enum EvidenceValue {
    Discrete(usize),
    Continuous(f64),
}

/// Either a discrete table or a Gaussian.
#[derive(Clone, Debug, PartialEq)]
pub enum MixedFactor {
    Table(TableFactor),
    Gaussian(GaussianFactor),
}

impl MixedFactor {
    fn kind(&self) -> &'static str {
        match self {
            Self::Table(_) => "table",
            Self::Gaussian(_) => "gaussian",
        }
    }

    fn unsupported(operation: &'static str, lhs: &Self, rhs: &Self) -> PgmError {
        PgmError::UnsupportedOperation {
            operation,
            lhs: lhs.kind(),
            rhs: rhs.kind(),
        }
    }

    pub fn as_table(&self) -> Option<&TableFactor> {
        match self {
            Self::Table(table) => Some(table),
            Self::Gaussian(_) => None,
        }
    }

    pub fn as_gaussian(&self) -> Option<&GaussianFactor> {
        match self {
            Self::Gaussian(gaussian) => Some(gaussian),
            Self::Table(_) => None,
        }
    }
}

impl From<TableFactor> for MixedFactor {
    fn from(table: TableFactor) -> Self {
        Self::Table(table)
    }
}

impl From<GaussianFactor> for MixedFactor {
    fn from(gaussian: GaussianFactor) -> Self {
        Self::Gaussian(gaussian)
    }
}

impl Factor for MixedFactor {
    type Value = EvidenceValue;

    fn var_names(&self) -> &[String] {
        match self {
            Self::Table(t) => t.var_names(),
            Self::Gaussian(g) => g.var_names(),
        }
    }

    fn multiply(&self, other: &Self) -> Result<Self> {
        match (self, other) {
            (Self::Table(a), Self::Table(b)) => a.multiply(b).map(Self::Table),
            (Self::Gaussian(a), Self::Gaussian(b)) => a.multiply(b).map(Self::Gaussian),
            _ => Err(Self::unsupported("multiply", self, other)),
        }
    }

    fn marginalize(&self, vars: &[String], keep: bool) -> Result<Self> {
        match self {
            Self::Table(t) => t.marginalize(vars, keep).map(Self::Table),
            Self::Gaussian(g) => g.marginalize(vars, keep).map(Self::Gaussian),
        }
    }

    fn reduce(&self, vars: &[String], values: &[EvidenceValue]) -> Result<Self> {
        match self {
            Self::Table(t) => {
                let discrete = values
                    .iter()
                    .zip(vars)
                    .map(|(value, var)| match value {
                        EvidenceValue::Discrete(v) => Ok(*v),
                        EvidenceValue::Continuous(_) => Err(PgmError::InvalidDistribution(
                            format!("Continuous evidence for discrete variable {}", var),
                        )),
                    })
                    .collect::<Result<Vec<usize>>>()?;
                t.reduce(vars, &discrete).map(Self::Table)
            }
            Self::Gaussian(g) => {
                let continuous = values
                    .iter()
                    .zip(vars)
                    .map(|(value, var)| match value {
                        EvidenceValue::Continuous(v) => Ok(*v),
                        EvidenceValue::Discrete(_) => Err(PgmError::InvalidDistribution(
                            format!("Discrete evidence for continuous variable {}", var),
                        )),
                    })
                    .collect::<Result<Vec<f64>>>()?;
                g.reduce(vars, &continuous).map(Self::Gaussian)
            }
        }
    }

    fn cancel(&self, other: &Self) -> Result<Self> {
        match (self, other) {
            (Self::Table(a), Self::Table(b)) => a.cancel(b).map(Self::Table),
            (Self::Gaussian(a), Self::Gaussian(b)) => a.cancel(b).map(Self::Gaussian),
            _ => Err(Self::unsupported("cancel", self, other)),
        }
    }

    fn kl_divergence(&self, other: &Self) -> Result<f64> {
        match (self, other) {
            (Self::Table(a), Self::Table(b)) => a.kl_divergence(b),
            (Self::Gaussian(a), Self::Gaussian(b)) => a.kl_divergence(b),
            _ => Err(Self::unsupported("kl_divergence", self, other)),
        }
    }

    fn distance_from_vacuous(&self) -> Result<f64> {
        match self {
            Self::Table(t) => t.distance_from_vacuous(),
            Self::Gaussian(g) => g.distance_from_vacuous(),
        }
    }

    fn is_vacuous(&self) -> bool {
        match self {
            Self::Table(t) => t.is_vacuous(),
            Self::Gaussian(g) => g.is_vacuous(),
        }
    }
}
