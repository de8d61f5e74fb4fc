//! # Workflows Module
//!
//! End-to-end drivers over a configured [`Simulation`](crate::engine::simulation::Simulation).
//!
//! - **Run Workflow** ([`run`]) - Initializes a model if needed, advances it for the planned
//!   number of iterations while applying scheduled surface deformations, and closes all
//!   output sinks.

pub mod run;
