use super::ids::SpeciesId;
use super::species::SpeciesPattern;
use std::fmt;

/// What happens to a particle whose trajectory crosses a surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum SurfaceBehavior {
    /// Specular reflection off the face plane. Applies when no class says otherwise.
    #[default]
    Reflective,
    /// The particle passes through unaffected.
    Transparent,
    /// The particle is destroyed at the crossing.
    Absorptive,
}

impl fmt::Display for SurfaceBehavior {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SurfaceBehavior::Reflective => "reflective",
            SurfaceBehavior::Transparent => "transparent",
            SurfaceBehavior::Absorptive => "absorptive",
        };
        f.write_str(name)
    }
}

/// A named boundary behaviour for the species matching `affected`.
#[derive(Debug, Clone, PartialEq)]
pub struct SurfaceClass {
    pub name: String,
    pub behavior: SurfaceBehavior,
    pub affected: SpeciesPattern,
}

impl SurfaceClass {
    pub fn new(name: impl Into<String>, behavior: SurfaceBehavior, affected: SpeciesPattern) -> Self {
        Self {
            name: name.into(),
            behavior,
            affected,
        }
    }

    /// Behaviour experienced by `species`; unaffected species are reflected.
    pub fn behavior_for(&self, species: SpeciesId) -> SurfaceBehavior {
        if self.affected.matches(species) {
            self.behavior
        } else {
            SurfaceBehavior::Reflective
        }
    }
}
