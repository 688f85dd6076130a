//! Scheduler state and convergence diagnostics.

use serde::{Deserialize, Serialize};

use crate::error::{PgmError, Result};

/// Lifecycle of a cluster graph's message passing.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProcessState {
    Unprocessed,
    Iterating,
    Converged,
    MaxIterReached,
}

/// Summary of one `process_graph` call.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ConvergenceStats {
    /// Number of scheduler rounds performed
    pub iterations: usize,
    /// Messages absorbed during this call
    pub messages_passed: usize,
    /// Largest message divergence in the last round
    #[serde(with = "distance_serde")]
    pub max_distance: f64,
    /// Whether the divergence dropped below the threshold
    pub converged: bool,
}

/// Divergence of one candidate message in an asynchronous round.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MessageDistance {
    pub sender_id: String,
    pub receiver_id: String,
    #[serde(with = "distance_serde")]
    pub distance: f64,
    pub passed: bool,
}

/// Per-round divergence history of the latest `process_graph` call.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ConvergenceTrace {
    /// Largest divergence of each synchronous round
    #[serde(with = "distance_serde::seq")]
    pub sync_max_distances: Vec<f64>,
    /// Every candidate message of each asynchronous round, ranked
    pub async_rounds: Vec<Vec<MessageDistance>>,
}

impl ConvergenceTrace {
    pub fn is_empty(&self) -> bool {
        self.sync_max_distances.is_empty() && self.async_rounds.is_empty()
    }

    /// Largest divergence of every recorded round.
    pub fn max_distance_per_round(&self) -> Vec<f64> {
        let async_max = self.async_rounds.iter().map(|round| {
            round
                .iter()
                .map(|m| m.distance)
                .fold(f64::NEG_INFINITY, f64::max)
        });
        self.sync_max_distances
            .iter()
            .copied()
            .chain(async_max)
            .collect()
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|e| PgmError::Serialization(e.to_string()))
    }
}

// Serde helper for divergences: JSON has no infinity, so non-finite values
// travel as the strings "inf", "-inf" and "NaN"
mod distance_serde {
    use serde::de::Error;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    #[derive(Serialize, Deserialize)]
    #[serde(untagged)]
    enum Repr {
        Number(f64),
        Text(String),
    }

    fn to_repr(value: f64) -> Repr {
        if value.is_finite() {
            Repr::Number(value)
        } else if value.is_nan() {
            Repr::Text("NaN".to_string())
        } else if value > 0.0 {
            Repr::Text("inf".to_string())
        } else {
            Repr::Text("-inf".to_string())
        }
    }

    fn from_repr<E: Error>(repr: Repr) -> Result<f64, E> {
        match repr {
            Repr::Number(value) => Ok(value),
            Repr::Text(text) => match text.as_str() {
                "inf" => Ok(f64::INFINITY),
                "-inf" => Ok(f64::NEG_INFINITY),
                "NaN" => Ok(f64::NAN),
                other => Err(E::custom(format!("invalid distance {:?}", other))),
            },
        }
    }

    pub fn serialize<S>(value: &f64, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        to_repr(*value).serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<f64, D::Error>
    where
        D: Deserializer<'de>,
    {
        from_repr(Repr::deserialize(deserializer)?)
    }

    pub mod seq {
        use super::{from_repr, to_repr, Repr};
        use serde::{Deserialize, Deserializer, Serializer};

        pub fn serialize<S>(values: &[f64], serializer: S) -> Result<S::Ok, S::Error>
        where
            S: Serializer,
        {
            serializer.collect_seq(values.iter().map(|v| to_repr(*v)))
        }

        pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<f64>, D::Error>
        where
            D: Deserializer<'de>,
        {
            Vec::<Repr>::deserialize(deserializer)?
                .into_iter()
                .map(from_repr)
                .collect()
        }
    }
}
