//! # Geometry Module
//!
//! Triangulated surfaces that bound compartments, together with the spatial queries the
//! scheduler needs against them.
//!
//! - [`mesh`] - The [`Mesh`](mesh::Mesh) type: structural validation, containment,
//!   segment crossing, closest-point projection and the buffered vertex-move queue.
//! - [`primitives`] - Deterministic generators (icosphere, axis-aligned box).
//! - [`intersect`] - Ray/segment/triangle primitives and bounding boxes.
//! - [`grid`] - A sparse uniform grid used to index faces and particles.

pub mod grid;
pub mod intersect;
pub mod mesh;
pub mod primitives;
