use super::ids::{GeometryId, SpeciesId};
use nalgebra::Point3;

/// A live molecule.
#[derive(Debug, Clone, PartialEq)]
pub struct Particle {
    pub species: SpeciesId,
    pub position: Point3<f64>,
    /// Innermost geometry object enclosing the particle; `None` outside every object.
    pub compartment: Option<GeometryId>,
    /// Creation order, unique for the lifetime of a simulation.
    pub serial: u64,
}
