use thiserror::Error;

/// Default reaction radius in µm.
pub const DEFAULT_REACTION_RADIUS: f64 = 0.01;

/// Default cap on surface interactions per particle per timestep.
pub const DEFAULT_MAX_SURFACE_INTERACTIONS: usize = 64;

#[derive(Debug, Error, PartialEq, Eq, Clone)]
pub enum ConfigError {
    #[error("Missing required parameter: {0}")]
    MissingParameter(&'static str),
    #[error("Invalid value for '{name}': {reason}")]
    InvalidParameter { name: &'static str, reason: String },
}

/// Frozen global settings of a simulation run.
#[derive(Debug, Clone, PartialEq)]
pub struct SimulationConfig {
    /// Fixed timestep in seconds.
    pub time_step: f64,
    pub total_iterations: u64,
    pub seed: u64,
    /// Pairs closer than this (µm) are reaction candidates.
    pub reaction_radius: f64,
    pub max_surface_interactions: usize,
}

#[derive(Default)]
pub struct SimulationConfigBuilder {
    time_step: Option<f64>,
    total_iterations: Option<u64>,
    seed: Option<u64>,
    reaction_radius: Option<f64>,
    max_surface_interactions: Option<usize>,
}

impl SimulationConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn time_step(mut self, seconds: f64) -> Self {
        self.time_step = Some(seconds);
        self
    }
    pub fn total_iterations(mut self, iterations: u64) -> Self {
        self.total_iterations = Some(iterations);
        self
    }
    pub fn seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }
    pub fn reaction_radius(mut self, radius: f64) -> Self {
        self.reaction_radius = Some(radius);
        self
    }
    pub fn max_surface_interactions(mut self, cap: usize) -> Self {
        self.max_surface_interactions = Some(cap);
        self
    }

    pub fn build(self) -> Result<SimulationConfig, ConfigError> {
        let time_step = self
            .time_step
            .ok_or(ConfigError::MissingParameter("time_step"))?;
        if !(time_step.is_finite() && time_step > 0.0) {
            return Err(ConfigError::InvalidParameter {
                name: "time_step",
                reason: format!("must be a positive number of seconds, got {time_step}"),
            });
        }
        let reaction_radius = self.reaction_radius.unwrap_or(DEFAULT_REACTION_RADIUS);
        if !(reaction_radius.is_finite() && reaction_radius > 0.0) {
            return Err(ConfigError::InvalidParameter {
                name: "reaction_radius",
                reason: format!("must be positive, got {reaction_radius}"),
            });
        }
        let max_surface_interactions = self
            .max_surface_interactions
            .unwrap_or(DEFAULT_MAX_SURFACE_INTERACTIONS);
        if max_surface_interactions == 0 {
            return Err(ConfigError::InvalidParameter {
                name: "max_surface_interactions",
                reason: "must be at least 1".to_string(),
            });
        }
        Ok(SimulationConfig {
            time_step,
            total_iterations: self
                .total_iterations
                .ok_or(ConfigError::MissingParameter("total_iterations"))?,
            seed: self.seed.ok_or(ConfigError::MissingParameter("seed"))?,
            reaction_radius,
            max_surface_interactions,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_applies_defaults_for_optional_fields() {
        let config = SimulationConfigBuilder::new()
            .time_step(1e-5)
            .total_iterations(1000)
            .seed(23)
            .build()
            .unwrap();
        assert_eq!(config.reaction_radius, DEFAULT_REACTION_RADIUS);
        assert_eq!(config.max_surface_interactions, DEFAULT_MAX_SURFACE_INTERACTIONS);
    }

    #[test]
    fn build_reports_the_first_missing_parameter() {
        let err = SimulationConfigBuilder::new().seed(1).build().unwrap_err();
        assert_eq!(err, ConfigError::MissingParameter("time_step"));
        let err = SimulationConfigBuilder::new()
            .time_step(1e-5)
            .seed(1)
            .build()
            .unwrap_err();
        assert_eq!(err, ConfigError::MissingParameter("total_iterations"));
    }

    #[test]
    fn build_rejects_non_positive_time_step() {
        let err = SimulationConfigBuilder::new()
            .time_step(0.0)
            .total_iterations(1)
            .seed(1)
            .build()
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidParameter { name: "time_step", .. }));
    }
}
