//! # Core Module
//!
//! Stateless building blocks of the simulator: the model data types, the mesh
//! geometry engine, the registry that validates a model at its registration
//! boundary, the kinetic formulas and the file sinks used by observables.
//!
//! ## Architecture
//!
//! - **Geometry** ([`geometry`]) - Closed triangle meshes, icosphere generation,
//!   containment and segment/face intersection queries, buffered vertex moves
//! - **Models** ([`models`]) - Species, surface classes, reaction rules, release sites, particles
//! - **Registry** ([`registry`]) - Name-indexed storage with duplicate and parameter checks
//! - **Kinetics** ([`kinetics`]) - Unit conversions and rate-to-probability formulas
//! - **File I/O** ([`io`]) - Count time series, ASCII visualization frames, mesh files

pub mod geometry;
pub mod io;
pub mod kinetics;
pub mod models;
pub mod registry;
