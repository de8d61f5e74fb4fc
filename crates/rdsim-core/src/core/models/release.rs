use super::ids::{GeometryId, SpeciesId};
use nalgebra::Point3;

/// Where a release site places its particles.
#[derive(Debug, Clone, PartialEq)]
pub enum ReleaseTarget {
    /// Uniformly inside the volume enclosed by a geometry object.
    Region(GeometryId),
    /// Uniformly inside a ball; a zero diameter places every particle at `location`.
    Spherical { location: Point3<f64>, diameter: f64 },
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ReleaseQuantity {
    Count(usize),
    /// Molar concentration, converted to a count from the target volume.
    Concentration(f64),
}

/// A placement instruction consumed once, at `iteration` (0 releases at initialization).
#[derive(Debug, Clone, PartialEq)]
pub struct ReleaseSite {
    pub name: String,
    pub species: SpeciesId,
    pub target: ReleaseTarget,
    pub quantity: ReleaseQuantity,
    pub iteration: u64,
}

impl ReleaseSite {
    pub fn new(
        name: impl Into<String>,
        species: SpeciesId,
        target: ReleaseTarget,
        quantity: ReleaseQuantity,
    ) -> Self {
        Self {
            name: name.into(),
            species,
            target,
            quantity,
            iteration: 0,
        }
    }

    pub fn at_iteration(mut self, iteration: u64) -> Self {
        self.iteration = iteration;
        self
    }
}
