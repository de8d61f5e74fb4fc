use thiserror::Error;

use super::callbacks::CallbackError;
use super::config::ConfigError;
use super::state::SimulationPhase;
use crate::core::geometry::mesh::GeometryError;
use crate::core::io::OutputError;
use crate::core::registry::RegistryError;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Invalid configuration parameter: {source}")]
    Config {
        #[from]
        source: ConfigError,
    },

    #[error("Model registration failed: {source}")]
    Registry {
        #[from]
        source: RegistryError,
    },

    #[error("Operation '{operation}' is not allowed while the simulation is {phase}")]
    InvalidState {
        operation: &'static str,
        phase: SimulationPhase,
    },

    #[error("Release '{site}' failed: {reason}")]
    InvalidRegion { site: String, reason: String },

    #[error("Vertex move on '{object}' rejected: {source}")]
    OutOfRange {
        object: String,
        #[source]
        source: GeometryError,
    },

    #[error("Unknown {kind} handle")]
    UnknownHandle { kind: &'static str },

    #[error("Reaction callback for rule '{rule}' failed at iteration {iteration}: {source}")]
    Callback {
        rule: String,
        iteration: u64,
        #[source]
        source: CallbackError,
    },

    #[error("Observable output failed: {source}")]
    Output {
        #[from]
        source: OutputError,
    },

    #[error("Internal logic error: {0}")]
    Internal(String),
}
