//! # rdsim
//!
//! A stochastic particle-based reaction-diffusion simulator. Molecules are point
//! particles moving by Brownian motion inside compartments bounded by closed triangle
//! meshes; they react on proximity and interact with surfaces that reflect, transmit
//! or absorb them depending on the surface class.
//!
//! ## Layers
//!
//! - **[`core`]** - Stateless models: meshes and primitives, species, surface classes,
//!   reaction rules, release sites, the model registry, unit conversions and output sinks.
//! - **[`engine`]** - The stateful scheduler: [`engine::simulation::Simulation`] advances
//!   the particle population in fixed timesteps and exposes observables and callbacks.
//! - **[`workflows`]** - End-to-end drivers, such as running a model under a
//!   deformation schedule with progress reporting.

pub mod core;
pub mod engine;
pub mod workflows;
