//! Gaussian factors in canonical (information) form.
//!
//! A canonical factor over X is
//!
//! ```text
//! φ(x) = exp(-½ xᵀKx + hᵀx + g)
//! ```
//!
//! Products and quotients are additions and subtractions of `(K, h, g)`,
//! which is what makes the form convenient for belief-update message passing.
//!
//! # References
//!
//! - Koller & Friedman, "Probabilistic Graphical Models", Section 14.2

use scirs2_core::ndarray::{Array1, Array2, Axis};
use std::f64::consts::PI;

use crate::error::{PgmError, Result};
use crate::factor::Factor;

/// Entries below this magnitude are treated as zero when testing vacuity.
const VACUOUS_TOLERANCE: f64 = 1e-12;

/// Relative tolerance for treating two canonical parameters as equal.
const EQUALITY_TOLERANCE: f64 = 1e-10;

/// A (possibly unnormalised, possibly improper) Gaussian factor.
#[derive(Clone, Debug, PartialEq)]
pub struct GaussianFactor {
    /// Variables this factor depends on
    pub variables: Vec<String>,
    /// Precision matrix K
    pub precision: Array2<f64>,
    /// Information vector h
    pub h: Array1<f64>,
    /// Log normaliser g
    pub g: f64,
}

impl GaussianFactor {
    /// Create a factor from canonical parameters.
    pub fn canonical(
        variables: Vec<String>,
        precision: Array2<f64>,
        h: Array1<f64>,
        g: f64,
    ) -> Result<Self> {
        for (i, var) in variables.iter().enumerate() {
            if variables[..i].contains(var) {
                return Err(PgmError::InvalidDistribution(format!(
                    "Variable {} appears twice in a Gaussian factor",
                    var
                )));
            }
        }

        let n = variables.len();
        if precision.shape() != [n, n] {
            return Err(PgmError::DimensionMismatch {
                expected: vec![n, n],
                got: precision.shape().to_vec(),
            });
        }
        if h.len() != n {
            return Err(PgmError::DimensionMismatch {
                expected: vec![n],
                got: vec![h.len()],
            });
        }
        Ok(Self {
            variables,
            precision,
            h,
            g,
        })
    }

    /// Create a factor from a mean and covariance, scaled by `exp(log_weight)`.
    pub fn from_moments(
        variables: Vec<String>,
        mean: Array1<f64>,
        covariance: Array2<f64>,
        log_weight: f64,
    ) -> Result<Self> {
        let n = variables.len();
        if mean.len() != n {
            return Err(PgmError::DimensionMismatch {
                expected: vec![n],
                got: vec![mean.len()],
            });
        }
        let chol = cholesky(&covariance).ok_or_else(|| {
            PgmError::InvalidDistribution(format!(
                "Covariance over {:?} is not positive definite",
                variables
            ))
        })?;
        let precision = cholesky_inverse(&chol);
        let h = precision.dot(&mean);
        let g = log_weight
            - 0.5 * mean.dot(&h)
            - 0.5 * n as f64 * (2.0 * PI).ln()
            - 0.5 * cholesky_log_det(&chol);

        Self::canonical(variables, precision, h, g)
    }

    /// The vacuous factor (constant one) over `variables`.
    pub fn vacuous(variables: Vec<String>) -> Self {
        let n = variables.len();
        Self {
            variables,
            precision: Array2::zeros((n, n)),
            h: Array1::zeros(n),
            g: 0.0,
        }
    }

    /// Mean vector; requires a positive definite precision.
    pub fn mean(&self) -> Result<Array1<f64>> {
        Ok(self.covariance()?.dot(&self.h))
    }

    /// Covariance matrix; requires a positive definite precision.
    pub fn covariance(&self) -> Result<Array2<f64>> {
        let chol = self.precision_cholesky()?;
        Ok(cholesky_inverse(&chol))
    }

    /// Evaluate the log of the factor at `x`.
    pub fn log_value(&self, x: &Array1<f64>) -> Result<f64> {
        if x.len() != self.variables.len() {
            return Err(PgmError::DimensionMismatch {
                expected: vec![self.variables.len()],
                got: vec![x.len()],
            });
        }
        Ok(-0.5 * x.dot(&self.precision.dot(x)) + self.h.dot(x) + self.g)
    }

    /// Return the same factor with its variables reordered to `order`.
    pub fn permuted(&self, order: &[String]) -> Result<GaussianFactor> {
        if order.len() != self.variables.len() {
            return Err(PgmError::InvalidDistribution(format!(
                "Cannot align {:?} to {:?}",
                self.variables, order
            )));
        }
        let idx = self.indices_of(order)?;
        Ok(GaussianFactor {
            variables: order.to_vec(),
            precision: self.precision.select(Axis(0), &idx).select(Axis(1), &idx),
            h: self.h.select(Axis(0), &idx),
            g: self.g,
        })
    }

    /// Whether `(K, h)` match entrywise, which makes the normalised factors
    /// equal whatever `g` is. `other` must share this variable order.
    fn same_distribution(&self, other: &GaussianFactor) -> bool {
        let close = |a: f64, b: f64| {
            (a - b).abs() <= EQUALITY_TOLERANCE * a.abs().max(b.abs()).max(1.0)
        };
        self.precision
            .iter()
            .zip(other.precision.iter())
            .all(|(&a, &b)| close(a, b))
            && self.h.iter().zip(other.h.iter()).all(|(&a, &b)| close(a, b))
    }

    /// Euclidean distance between the stacked `(K, h)` parameters.
    ///
    /// Used for improper factors, where KL is undefined.
    fn parameter_distance(&self, other: &GaussianFactor) -> f64 {
        let dk: f64 = (&self.precision - &other.precision)
            .iter()
            .map(|d| d * d)
            .sum();
        let dh: f64 = (&self.h - &other.h).iter().map(|d| d * d).sum();
        (dk + dh).sqrt()
    }

    fn var_index(&self, var: &str) -> Option<usize> {
        self.variables.iter().position(|v| v == var)
    }

    fn indices_of(&self, vars: &[String]) -> Result<Vec<usize>> {
        vars.iter()
            .map(|var| {
                self.var_index(var)
                    .ok_or_else(|| PgmError::VariableNotFound(var.clone()))
            })
            .collect()
    }

    fn precision_cholesky(&self) -> Result<Array2<f64>> {
        cholesky(&self.precision).ok_or_else(|| {
            PgmError::InvalidDistribution(format!(
                "Precision over {:?} is not positive definite",
                self.variables
            ))
        })
    }

    /// Embed `(K, h)` into the scope `union`, a superset of this scope.
    fn expand_to(&self, union: &[String]) -> (Array2<f64>, Array1<f64>) {
        let n = union.len();
        let positions: Vec<usize> = self
            .variables
            .iter()
            .map(|var| union.iter().position(|u| u == var).unwrap_or(0))
            .collect();

        let mut precision = Array2::zeros((n, n));
        let mut h = Array1::zeros(n);
        for (i, &pi) in positions.iter().enumerate() {
            h[pi] = self.h[i];
            for (j, &pj) in positions.iter().enumerate() {
                precision[[pi, pj]] = self.precision[[i, j]];
            }
        }
        (precision, h)
    }

    fn union_scope(&self, other: &GaussianFactor) -> Vec<String> {
        let mut all_vars = self.variables.clone();
        for var in &other.variables {
            if !all_vars.contains(var) {
                all_vars.push(var.clone());
            }
        }
        all_vars
    }

    /// Split the scope into `(kept, removed)` index lists.
    fn partition(&self, keep: &[String]) -> (Vec<usize>, Vec<usize>) {
        (0..self.variables.len()).partition(|&i| keep.contains(&self.variables[i]))
    }
}

impl Factor for GaussianFactor {
    type Value = f64;

    fn var_names(&self) -> &[String] {
        &self.variables
    }

    fn multiply(&self, other: &Self) -> Result<Self> {
        let union = self.union_scope(other);
        let (k1, h1) = self.expand_to(&union);
        let (k2, h2) = other.expand_to(&union);
        Self::canonical(union, k1 + k2, h1 + h2, self.g + other.g)
    }

    fn marginalize(&self, vars: &[String], keep: bool) -> Result<Self> {
        if let Some(missing) = vars.iter().find(|v| self.var_index(v).is_none()) {
            return Err(PgmError::VariableNotFound(missing.clone()));
        }

        let keep_vars: Vec<String> = if keep {
            self.variables
                .iter()
                .filter(|v| vars.contains(v))
                .cloned()
                .collect()
        } else {
            self.variables
                .iter()
                .filter(|v| !vars.contains(v))
                .cloned()
                .collect()
        };

        let (x, y) = self.partition(&keep_vars);
        if y.is_empty() {
            return Ok(self.clone());
        }

        let kxx = self.precision.select(Axis(0), &x).select(Axis(1), &x);
        let kxy = self.precision.select(Axis(0), &x).select(Axis(1), &y);
        let kyy = self.precision.select(Axis(0), &y).select(Axis(1), &y);
        let hx = self.h.select(Axis(0), &x);
        let hy = self.h.select(Axis(0), &y);

        let chol = cholesky(&kyy).ok_or_else(|| {
            PgmError::InvalidDistribution(
                "Cannot integrate out variables with a non positive definite precision"
                    .to_string(),
            )
        })?;
        let kyy_inv = cholesky_inverse(&chol);
        let kxy_kyy_inv = kxy.dot(&kyy_inv);

        let precision = &kxx - &kxy_kyy_inv.dot(&kxy.t());
        let h = &hx - &kxy_kyy_inv.dot(&hy);
        let g = self.g
            + 0.5
                * (y.len() as f64 * (2.0 * PI).ln() - cholesky_log_det(&chol)
                    + hy.dot(&kyy_inv.dot(&hy)));

        Self::canonical(keep_vars, precision, h, g)
    }

    fn reduce(&self, vars: &[String], values: &[f64]) -> Result<Self> {
        if vars.len() != values.len() {
            return Err(PgmError::DimensionMismatch {
                expected: vec![vars.len()],
                got: vec![values.len()],
            });
        }

        // observed values laid out in scope order
        let y: Vec<usize> = self.indices_of(vars)?;
        let observed = Array1::from_vec(values.to_vec());
        let keep_vars: Vec<String> = self
            .variables
            .iter()
            .filter(|v| !vars.contains(v))
            .cloned()
            .collect();
        let x: Vec<usize> = self.indices_of(&keep_vars)?;

        let kxx = self.precision.select(Axis(0), &x).select(Axis(1), &x);
        let kxy = self.precision.select(Axis(0), &x).select(Axis(1), &y);
        let kyy = self.precision.select(Axis(0), &y).select(Axis(1), &y);
        let hx = self.h.select(Axis(0), &x);
        let hy = self.h.select(Axis(0), &y);

        let h = &hx - &kxy.dot(&observed);
        let g = self.g + hy.dot(&observed) - 0.5 * observed.dot(&kyy.dot(&observed));

        Self::canonical(keep_vars, kxx, h, g)
    }

    fn cancel(&self, other: &Self) -> Result<Self> {
        let union = self.union_scope(other);
        let (k1, h1) = self.expand_to(&union);
        let (k2, h2) = other.expand_to(&union);
        Self::canonical(union, k1 - k2, h1 - h2, self.g - other.g)
    }

    fn kl_divergence(&self, other: &Self) -> Result<f64> {
        let other = other.permuted(&self.variables)?;
        if self.same_distribution(&other) {
            return Ok(0.0);
        }
        if self.is_vacuous() || other.is_vacuous() {
            return Ok(f64::INFINITY);
        }

        let (Some(chol_p), Some(chol_q)) = (cholesky(&self.precision), cholesky(&other.precision))
        else {
            // no density to compare against; fall back to parameter distance
            return Ok(self.parameter_distance(&other));
        };

        let cov_p = cholesky_inverse(&chol_p);
        let cov_q = cholesky_inverse(&chol_q);
        let mean_p = cov_p.dot(&self.h);
        let mean_q = cov_q.dot(&other.h);
        let diff = &mean_q - &mean_p;

        let trace: f64 = other.precision.dot(&cov_p).diag().sum();
        let mahalanobis = diff.dot(&other.precision.dot(&diff));
        let n = self.variables.len() as f64;

        let kl = 0.5
            * (trace + mahalanobis - n + cholesky_log_det(&chol_p) - cholesky_log_det(&chol_q));

        // exact for equal factors; rounding can dip a hair below zero
        Ok(kl.max(0.0))
    }

    fn distance_from_vacuous(&self) -> Result<f64> {
        if self.is_vacuous() {
            Ok(0.0)
        } else {
            Ok(f64::INFINITY)
        }
    }

    fn is_vacuous(&self) -> bool {
        self.precision.iter().all(|v| v.abs() <= VACUOUS_TOLERANCE)
            && self.h.iter().all(|v| v.abs() <= VACUOUS_TOLERANCE)
    }
}

/// Lower Cholesky factor of a symmetric positive definite matrix.
fn cholesky(a: &Array2<f64>) -> Option<Array2<f64>> {
    let n = a.nrows();
    if a.ncols() != n {
        return None;
    }

    let mut l = Array2::<f64>::zeros((n, n));
    for i in 0..n {
        for j in 0..=i {
            let mut sum = a[[i, j]];
            for k in 0..j {
                sum -= l[[i, k]] * l[[j, k]];
            }
            if i == j {
                if sum <= 0.0 || !sum.is_finite() {
                    return None;
                }
                l[[i, i]] = sum.sqrt();
            } else {
                l[[i, j]] = sum / l[[j, j]];
            }
        }
    }
    Some(l)
}

/// Inverse of `L Lᵀ` given its lower Cholesky factor `L`.
fn cholesky_inverse(l: &Array2<f64>) -> Array2<f64> {
    let n = l.nrows();
    let mut inverse = Array2::<f64>::zeros((n, n));

    for col in 0..n {
        // forward substitution: L y = e_col
        let mut y = vec![0.0; n];
        for i in 0..n {
            let mut sum = if i == col { 1.0 } else { 0.0 };
            for k in 0..i {
                sum -= l[[i, k]] * y[k];
            }
            y[i] = sum / l[[i, i]];
        }

        // back substitution: Lᵀ x = y
        let mut x = vec![0.0; n];
        for i in (0..n).rev() {
            let mut sum = y[i];
            for k in (i + 1)..n {
                sum -= l[[k, i]] * x[k];
            }
            x[i] = sum / l[[i, i]];
        }

        for (i, value) in x.into_iter().enumerate() {
            inverse[[i, col]] = value;
        }
    }

    inverse
}

/// `ln |L Lᵀ|` from the lower Cholesky factor.
fn cholesky_log_det(l: &Array2<f64>) -> f64 {
    2.0 * l.diag().iter().map(|d| d.ln()).sum::<f64>()
}
