use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::artifact::ArtifactRef;
use crate::errors::{RvError, RvResult};

/// Ordered candidate input to a model under calibration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ParameterVector(Vec<f64>);

impl ParameterVector {
    pub fn new(values: Vec<f64>) -> Self {
        Self(values)
    }

    pub fn values(&self) -> &[f64] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn into_inner(self) -> Vec<f64> {
        self.0
    }

    /// Comma separated rendering, as accepted by model executables.
    pub fn to_csv_line(&self) -> String {
        self.0
            .iter()
            .map(|v| v.to_string())
            .collect::<Vec<_>>()
            .join(",")
    }
}

impl From<Vec<f64>> for ParameterVector {
    fn from(values: Vec<f64>) -> Self {
        Self(values)
    }
}

/// Inclusive per-dimension box constraints. Deserialized bounds pass the
/// same checks as [`Bounds::new`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawBounds")]
pub struct Bounds {
    lower: Vec<f64>,
    upper: Vec<f64>,
}

#[derive(Deserialize)]
struct RawBounds {
    lower: Vec<f64>,
    upper: Vec<f64>,
}

impl TryFrom<RawBounds> for Bounds {
    type Error = RvError;

    fn try_from(raw: RawBounds) -> RvResult<Self> {
        Self::new(raw.lower, raw.upper)
    }
}

impl Bounds {
    /// Build bounds, rejecting mismatched lengths, non-finite values and
    /// `lower[i] > upper[i]`.
    pub fn new(lower: Vec<f64>, upper: Vec<f64>) -> RvResult<Self> {
        if lower.is_empty() {
            return Err(RvError::InvalidInput("bounds must not be empty".to_string()));
        }
        if lower.len() != upper.len() {
            return Err(RvError::InvalidInput(format!(
                "lower bounds have {} values but upper bounds have {}",
                lower.len(),
                upper.len()
            )));
        }
        for (i, (lo, hi)) in lower.iter().zip(&upper).enumerate() {
            if !lo.is_finite() || !hi.is_finite() {
                return Err(RvError::InvalidInput(format!(
                    "bounds for parameter {i} must be finite"
                )));
            }
            if lo > hi {
                return Err(RvError::InvalidInput(format!(
                    "lower bound {lo} exceeds upper bound {hi} for parameter {i}"
                )));
            }
        }
        Ok(Self { lower, upper })
    }

    pub fn dims(&self) -> usize {
        self.lower.len()
    }

    pub fn lower(&self) -> &[f64] {
        &self.lower
    }

    pub fn upper(&self) -> &[f64] {
        &self.upper
    }

    pub fn width(&self, dim: usize) -> f64 {
        self.upper[dim] - self.lower[dim]
    }

    /// True when the vector has the right length and every value lies in
    /// `[lower[i], upper[i]]`.
    pub fn contains(&self, vector: &ParameterVector) -> bool {
        vector.len() == self.dims()
            && vector
                .values()
                .iter()
                .zip(self.lower.iter().zip(&self.upper))
                .all(|(v, (lo, hi))| lo <= v && v <= hi)
    }
}

/// Whether we are maximizing or minimizing the objective.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ObjectiveDirection {
    #[default]
    Maximize,
    Minimize,
}

impl ObjectiveDirection {
    /// Strict improvement test. NaN never improves on a number, and any
    /// number improves on NaN.
    pub fn is_better(&self, candidate: f64, current: f64) -> bool {
        match (candidate.is_nan(), current.is_nan()) {
            (true, _) => false,
            (false, true) => true,
            (false, false) => match self {
                Self::Maximize => candidate > current,
                Self::Minimize => candidate < current,
            },
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_lowercase().as_str() {
            "max" | "maximize" => Some(Self::Maximize),
            "min" | "minimize" => Some(Self::Minimize),
            _ => None,
        }
    }
}

/// Score and artifacts of one model evaluation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObjectiveResult {
    pub score: f64,
    /// Every diagnostic the evaluation reported, keyed by name.
    pub metrics: BTreeMap<String, f64>,
    pub artifacts: Vec<ArtifactRef>,
}

impl ObjectiveResult {
    pub fn new(score: f64) -> Self {
        Self {
            score,
            metrics: BTreeMap::new(),
            artifacts: Vec::new(),
        }
    }
}
