use super::ids::SpeciesId;

/// Immutable physical parameters of one molecular species.
#[derive(Debug, Clone, PartialEq)]
pub struct Species {
    pub name: String,
    /// Volume diffusion constant in cm²/s.
    pub diffusion_constant_3d: f64,
    /// Optional affinity for binding to surfaces; carried as model metadata.
    pub surface_affinity: Option<f64>,
}

impl Species {
    pub fn new(name: impl Into<String>, diffusion_constant_3d: f64) -> Self {
        Self {
            name: name.into(),
            diffusion_constant_3d,
            surface_affinity: None,
        }
    }

    pub fn with_surface_affinity(mut self, affinity: f64) -> Self {
        self.surface_affinity = Some(affinity);
        self
    }

    pub fn is_mobile(&self) -> bool {
        self.diffusion_constant_3d > 0.0
    }
}

/// Selects which species a count, surface class or filter applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SpeciesPattern {
    /// Every species.
    All,
    Species(SpeciesId),
}

impl SpeciesPattern {
    pub fn matches(&self, species: SpeciesId) -> bool {
        match self {
            SpeciesPattern::All => true,
            SpeciesPattern::Species(id) => *id == species,
        }
    }

    pub fn species(&self) -> Option<SpeciesId> {
        match self {
            SpeciesPattern::All => None,
            SpeciesPattern::Species(id) => Some(*id),
        }
    }
}

impl From<SpeciesId> for SpeciesPattern {
    fn from(id: SpeciesId) -> Self {
        SpeciesPattern::Species(id)
    }
}
