//! Dense discrete factors.

use scirs2_core::ndarray::{ArrayD, Axis, IxDyn};

use crate::error::{PgmError, Result};
use crate::factor::Factor;

/// Relative tolerance used to decide whether a table is constant.
const VACUOUS_TOLERANCE: f64 = 1e-12;

/// A discrete factor stored as a dense table.
///
/// Represents a function over a subset of discrete variables: φ(X₁, X₂, ..., Xₖ) → ℝ⁺,
/// with one array axis per variable.
#[derive(Clone, Debug, PartialEq)]
pub struct TableFactor {
    /// Variables this factor depends on
    pub variables: Vec<String>,
    /// Potential values
    pub values: ArrayD<f64>,
    /// Factor name for debugging
    pub name: String,
}

impl TableFactor {
    /// Create a new table factor.
    pub fn new(name: String, variables: Vec<String>, values: ArrayD<f64>) -> Result<Self> {
        if values.ndim() != variables.len() {
            return Err(PgmError::DimensionMismatch {
                expected: vec![variables.len()],
                got: vec![values.ndim()],
            });
        }

        for (i, var) in variables.iter().enumerate() {
            if variables[..i].contains(var) {
                return Err(PgmError::InvalidDistribution(format!(
                    "Variable {} appears twice in factor {}",
                    var, name
                )));
            }
        }

        Ok(Self {
            name,
            variables,
            values,
        })
    }

    /// Create a table factor from a flat row-major vector of values.
    pub fn from_vec(
        name: &str,
        variables: &[&str],
        shape: &[usize],
        values: Vec<f64>,
    ) -> Result<Self> {
        let array = ArrayD::from_shape_vec(IxDyn(shape), values).map_err(|e| {
            PgmError::InvalidDistribution(format!("Array creation failed for {}: {}", name, e))
        })?;
        Self::new(
            name.to_string(),
            variables.iter().map(|v| v.to_string()).collect(),
            array,
        )
    }

    /// Create a normalised uniform factor with the given cardinalities.
    pub fn uniform(name: String, variables: Vec<String>, cardinalities: &[usize]) -> Result<Self> {
        let size: usize = cardinalities.iter().product();
        let values = ArrayD::from_elem(IxDyn(cardinalities), 1.0 / size.max(1) as f64);
        Self::new(name, variables, values)
    }

    /// Normalize factor to sum to 1.
    pub fn normalize(&mut self) {
        let sum: f64 = self.values.iter().sum();
        if sum > 0.0 {
            self.values /= sum;
        }
    }

    /// Get cardinality of a variable.
    pub fn get_cardinality(&self, var: &str) -> Option<usize> {
        self.var_index(var).map(|idx| self.values.shape()[idx])
    }

    fn var_index(&self, var: &str) -> Option<usize> {
        self.variables.iter().position(|v| v == var)
    }

    /// Return the same factor with its axes reordered to `order`.
    ///
    /// `order` must be a permutation of the factor's variables.
    pub fn permuted(&self, order: &[String]) -> Result<TableFactor> {
        if order.len() != self.variables.len() {
            return Err(PgmError::InvalidDistribution(format!(
                "Cannot align {:?} to {:?}",
                self.variables, order
            )));
        }
        let axes = order
            .iter()
            .map(|var| {
                self.var_index(var)
                    .ok_or_else(|| PgmError::VariableNotFound(var.clone()))
            })
            .collect::<Result<Vec<usize>>>()?;

        let values = self
            .values
            .clone()
            .permuted_axes(IxDyn(&axes))
            .as_standard_layout()
            .into_owned();

        Ok(TableFactor {
            name: self.name.clone(),
            variables: order.to_vec(),
            values,
        })
    }

    /// Union of the two scopes and the shape of a table over it.
    fn union_scope(&self, other: &TableFactor) -> Result<(Vec<String>, Vec<usize>)> {
        let mut all_vars = self.variables.clone();
        let mut shape = self.values.shape().to_vec();

        for (idx, var) in other.variables.iter().enumerate() {
            let card = other.values.shape()[idx];
            match self.get_cardinality(var) {
                Some(own) if own != card => {
                    return Err(PgmError::DimensionMismatch {
                        expected: vec![own],
                        got: vec![card],
                    });
                }
                Some(_) => {}
                None => {
                    all_vars.push(var.clone());
                    shape.push(card);
                }
            }
        }

        Ok((all_vars, shape))
    }

    /// Lay this table out over `union` (a superset of its scope), inserting
    /// unit axes for missing variables.
    fn expand_to(&self, union: &[String]) -> ArrayD<f64> {
        let order: Vec<usize> = union.iter().filter_map(|v| self.var_index(v)).collect();
        let mut expanded = self.values.clone().permuted_axes(IxDyn(&order));

        for (axis, var) in union.iter().enumerate() {
            if self.var_index(var).is_none() {
                expanded = expanded.insert_axis(Axis(axis));
            }
        }

        expanded
    }

    /// Combine two tables elementwise over the union of their scopes.
    fn combine<Op>(&self, other: &TableFactor, name: String, op: Op) -> Result<TableFactor>
    where
        Op: Fn(&mut f64, f64),
    {
        let (all_vars, shape) = self.union_scope(other)?;

        let lhs = self.expand_to(&all_vars);
        let mut result = lhs
            .broadcast(IxDyn(&shape))
            .ok_or_else(|| PgmError::DimensionMismatch {
                expected: shape.clone(),
                got: self.values.shape().to_vec(),
            })?
            .to_owned();

        let rhs = other.expand_to(&all_vars);
        let rhs = rhs
            .broadcast(IxDyn(&shape))
            .ok_or_else(|| PgmError::DimensionMismatch {
                expected: shape.clone(),
                got: other.values.shape().to_vec(),
            })?;

        result.zip_mut_with(&rhs, |x, &y| op(x, y));

        Ok(TableFactor {
            name,
            variables: all_vars,
            values: result,
        })
    }

    /// Compute the product of two factors.
    ///
    /// φ₁(X₁) * φ₂(X₂) = φ(X₁ ∪ X₂)
    pub fn product(&self, other: &TableFactor) -> Result<TableFactor> {
        self.combine(other, format!("{}*{}", self.name, other.name), |x, y| {
            *x *= y
        })
    }

    /// Divide this factor by another factor.
    ///
    /// φ₁(X) / φ₂(Y) with Y ⊆ X broadcast over X. Division by zero yields
    /// zero, the usual convention for belief-update message passing.
    pub fn divide(&self, other: &TableFactor) -> Result<TableFactor> {
        self.combine(other, format!("{}/{}", self.name, other.name), |x, y| {
            *x = if y == 0.0 { 0.0 } else { *x / y }
        })
    }

    /// Marginalize out a variable by summing over it.
    ///
    /// ∑ₓ φ(X, Y) = φ(Y)
    pub fn marginalize_out(&self, var: &str) -> Result<TableFactor> {
        let var_idx = self
            .var_index(var)
            .ok_or_else(|| PgmError::VariableNotFound(var.to_string()))?;

        let new_values = self.values.sum_axis(Axis(var_idx));

        let new_vars: Vec<String> = self
            .variables
            .iter()
            .filter(|v| *v != var)
            .cloned()
            .collect();

        Ok(TableFactor {
            name: format!("{}_marg", self.name),
            variables: new_vars,
            values: new_values,
        })
    }

    /// Marginalize out multiple variables.
    pub fn marginalize_out_vars(&self, vars: &[String]) -> Result<TableFactor> {
        let mut result = self.clone();
        for var in vars {
            result = result.marginalize_out(var)?;
        }
        Ok(result)
    }

    /// Marginalize out all variables except the specified ones.
    pub fn marginalize_out_all_except(&self, keep_vars: &[String]) -> Result<TableFactor> {
        if let Some(missing) = keep_vars.iter().find(|v| self.var_index(v).is_none()) {
            return Err(PgmError::VariableNotFound(missing.clone()));
        }

        let vars_to_remove: Vec<String> = self
            .variables
            .iter()
            .filter(|v| !keep_vars.contains(v))
            .cloned()
            .collect();

        self.marginalize_out_vars(&vars_to_remove)
    }

    /// Reduce factor to a specific variable assignment (evidence).
    pub fn reduce_var(&self, var: &str, value: usize) -> Result<TableFactor> {
        let var_idx = self
            .var_index(var)
            .ok_or_else(|| PgmError::VariableNotFound(var.to_string()))?;

        if value >= self.values.shape()[var_idx] {
            return Err(PgmError::InvalidDistribution(format!(
                "Value {} out of bounds for variable {} with cardinality {}",
                value,
                var,
                self.values.shape()[var_idx]
            )));
        }

        let new_values = self.values.index_axis(Axis(var_idx), value).to_owned();

        let new_vars: Vec<String> = self
            .variables
            .iter()
            .filter(|v| *v != var)
            .cloned()
            .collect();

        Ok(TableFactor {
            name: format!("{}_reduced", self.name),
            variables: new_vars,
            values: new_values,
        })
    }

    /// Sum of all entries.
    pub fn total(&self) -> f64 {
        self.values.iter().sum()
    }

    /// Normalised probabilities in storage order.
    fn probabilities(&self) -> Result<Vec<f64>> {
        let total = self.total();
        if total <= 0.0 || !total.is_finite() {
            return Err(PgmError::InvalidDistribution(format!(
                "Factor {} cannot be normalised (total mass {})",
                self.name, total
            )));
        }
        Ok(self.values.iter().map(|v| v / total).collect())
    }
}

impl Factor for TableFactor {
    type Value = usize;

    fn var_names(&self) -> &[String] {
        &self.variables
    }

    fn multiply(&self, other: &Self) -> Result<Self> {
        self.product(other)
    }

    fn marginalize(&self, vars: &[String], keep: bool) -> Result<Self> {
        if keep {
            self.marginalize_out_all_except(vars)
        } else {
            self.marginalize_out_vars(vars)
        }
    }

    fn reduce(&self, vars: &[String], values: &[usize]) -> Result<Self> {
        if vars.len() != values.len() {
            return Err(PgmError::DimensionMismatch {
                expected: vec![vars.len()],
                got: vec![values.len()],
            });
        }

        let mut result = self.clone();
        for (var, &value) in vars.iter().zip(values) {
            result = result.reduce_var(var, value)?;
        }
        Ok(result)
    }

    fn cancel(&self, other: &Self) -> Result<Self> {
        self.divide(other)
    }

    fn kl_divergence(&self, other: &Self) -> Result<f64> {
        let other = other.permuted(&self.variables)?;
        if other.values.shape() != self.values.shape() {
            return Err(PgmError::DimensionMismatch {
                expected: self.values.shape().to_vec(),
                got: other.values.shape().to_vec(),
            });
        }

        let p = self.probabilities()?;
        let q = other.probabilities()?;

        // Generalised KL terms p·ln(p/q) - p + q are each non-negative, so
        // rounding cannot push the sum below zero.
        let kl = p
            .iter()
            .zip(&q)
            .map(|(&pi, &qi)| {
                if pi == 0.0 {
                    qi
                } else if qi == 0.0 {
                    f64::INFINITY
                } else {
                    (pi * (pi / qi).ln() - pi + qi).max(0.0)
                }
            })
            .sum();

        Ok(kl)
    }

    fn distance_from_vacuous(&self) -> Result<f64> {
        let uniform = TableFactor::uniform(
            "vacuous".to_string(),
            self.variables.clone(),
            self.values.shape(),
        )?;
        self.kl_divergence(&uniform)
    }

    fn is_vacuous(&self) -> bool {
        let Some(&first) = self.values.iter().next() else {
            return true;
        };
        let scale = first.abs().max(f64::MIN_POSITIVE);
        self.values
            .iter()
            .all(|&v| ((v - first) / scale).abs() <= VACUOUS_TOLERANCE)
    }
}
