use serde::{Deserialize, Serialize};

use qpseq_types::{QpError, Result};

/// Engine configuration shared by every backend
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineSettings {
    /// Constraint violation tolerated by the backend
    pub feasibility_tolerance: f64,

    /// Duality gap / dual residual tolerance
    pub optimality_tolerance: f64,

    /// Largest negative eigenvalue of Q accepted as convex
    pub psd_tolerance: f64,

    /// Iteration limit; `None` keeps the backend's own default
    pub max_iterations: Option<u32>,

    pub verbose: bool,
}

impl Default for EngineSettings {
    fn default() -> Self {
        EngineSettings {
            feasibility_tolerance: 1e-8,
            optimality_tolerance: 1e-8,
            psd_tolerance: 0.0,
            max_iterations: None,
            verbose: false,
        }
    }
}

impl EngineSettings {
    /// Parse settings from JSON. Missing fields take their defaults.
    pub fn from_json(json: &str) -> Result<Self> {
        let settings: EngineSettings =
            serde_json::from_str(json).map_err(|e| QpError::Config(e.to_string()))?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<()> {
        let tolerances = [
            ("feasibility_tolerance", self.feasibility_tolerance),
            ("optimality_tolerance", self.optimality_tolerance),
            ("psd_tolerance", self.psd_tolerance),
        ];
        for (name, value) in tolerances {
            if !value.is_finite() || value < 0.0 {
                return Err(QpError::Config(format!("{} must be finite and non-negative, got {}", name, value)));
            }
        }
        if self.max_iterations == Some(0) {
            return Err(QpError::Config("max_iterations must be positive".to_string()));
        }
        Ok(())
    }

    pub fn iteration_limit(&self, backend_default: u32) -> u32 {
        self.max_iterations.unwrap_or(backend_default)
    }
}
