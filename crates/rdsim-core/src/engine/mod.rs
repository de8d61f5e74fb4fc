//! # Engine Module
//!
//! The stateful layer of the simulator. A [`simulation::Simulation`] owns the frozen
//! model, the live particle population and the random stream, and advances them in
//! fixed timesteps.
//!
//! ## Architecture
//!
//! - **Configuration** ([`config`]) - Timestep, iteration count, seed and numerical caps
//! - **Scheduler** ([`simulation`]) - Lifecycle state machine and the per-iteration pipeline
//! - **Placement** ([`placement`]) - Uniform sampling inside meshes and balls
//! - **Diffusion** ([`diffusion`]) - Brownian steps with surface reflection, transmission and absorption
//! - **Reactions** ([`reactions`]) - Candidate search and stochastic firing of reaction rules
//! - **Compartments** ([`compartments`]) - Nesting of geometry objects and particle membership
//! - **Deformation** ([`deformation`]) - Keeping membership consistent after vertex moves
//! - **Observables** ([`observables`]) - Count series and visualization frames
//! - **Callbacks** ([`callbacks`]) - Typed reaction listeners
//! - **State Tracking** ([`state`]) - Lifecycle phases and run diagnostics
//! - **Progress Monitoring** ([`progress`]) - Progress reporting for front-ends
//! - **Error Handling** ([`error`]) - Engine-level error type
//!
//! Within one iteration the order is fixed: diffusion, reactions, scheduled releases,
//! observable sampling. Everything that consumes randomness runs sequentially, so a
//! given seed reproduces a run exactly.

pub mod callbacks;
pub mod compartments;
pub mod config;
pub(crate) mod deformation;
pub mod diffusion;
pub mod error;
pub mod observables;
pub mod placement;
pub mod progress;
pub(crate) mod reactions;
pub mod simulation;
pub mod state;
