use serde::{Deserialize, Serialize};
use std::fmt;

/// Result classification shared by every solver engine.
///
/// Outcomes are ordinary values: an engine always returns one, and callers
/// branch on it instead of handling an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Outcome {
    Optimal,
    /// Suboptimal but usable point.
    Feasible,
    Unbounded,
    Infeasible,
    /// The backend could not tell infeasible and unbounded apart.
    InfeasibleOrUnbounded,
    Error,
    /// Inconclusive, e.g. an iteration or time limit was hit.
    Unknown,
}

impl Outcome {
    /// All outcomes, in declaration order
    pub fn all() -> &'static [Outcome] {
        &[
            Outcome::Optimal,
            Outcome::Feasible,
            Outcome::Unbounded,
            Outcome::Infeasible,
            Outcome::InfeasibleOrUnbounded,
            Outcome::Error,
            Outcome::Unknown,
        ]
    }

    /// Whether an engine reports a primal vector alongside this outcome
    pub fn has_solution(&self) -> bool {
        matches!(self, Outcome::Optimal | Outcome::Feasible | Outcome::Unbounded)
    }

    pub fn is_optimal(&self) -> bool {
        *self == Outcome::Optimal
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Outcome::Optimal => "Optimal",
            Outcome::Feasible => "Feasible",
            Outcome::Unbounded => "Unbounded",
            Outcome::Infeasible => "Infeasible",
            Outcome::InfeasibleOrUnbounded => "InfeasibleOrUnbounded",
            Outcome::Error => "Error",
            Outcome::Unknown => "Unknown",
        }
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
