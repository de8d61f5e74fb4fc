//! # Models Module
//!
//! Plain data types describing a reaction-diffusion model: what exists
//! ([`species`], [`geometry_object`]), how it behaves ([`surface`], [`reaction`]),
//! how it is populated ([`release`]) and the runtime [`particle`] entity.
//! Every type is keyed by a `slotmap` handle from [`ids`].

pub mod geometry_object;
pub mod ids;
pub mod particle;
pub mod reaction;
pub mod release;
pub mod species;
pub mod surface;
