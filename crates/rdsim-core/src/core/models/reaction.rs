use super::ids::SpeciesId;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reactants {
    /// First-order decay or conversion; rate in s⁻¹.
    Unimolecular(SpeciesId),
    /// Unordered pair; rate in M⁻¹s⁻¹.
    Bimolecular(SpeciesId, SpeciesId),
}

impl Reactants {
    pub fn species(&self) -> Vec<SpeciesId> {
        match *self {
            Reactants::Unimolecular(a) => vec![a],
            Reactants::Bimolecular(a, b) => vec![a, b],
        }
    }

    pub fn is_bimolecular(&self) -> bool {
        matches!(self, Reactants::Bimolecular(..))
    }

    /// Whether the unordered pair `(a, b)` satisfies this bimolecular rule.
    pub fn matches_pair(&self, a: SpeciesId, b: SpeciesId) -> bool {
        match *self {
            Reactants::Bimolecular(x, y) => (x == a && y == b) || (x == b && y == a),
            Reactants::Unimolecular(_) => false,
        }
    }

    pub fn matches_single(&self, a: SpeciesId) -> bool {
        matches!(*self, Reactants::Unimolecular(x) if x == a)
    }
}

/// An immutable reaction rule: reactants are consumed and `products` created at the
/// reaction site with per-timestep probability derived from `fwd_rate`.
#[derive(Debug, Clone, PartialEq)]
pub struct ReactionRule {
    pub name: String,
    pub reactants: Reactants,
    pub products: Vec<SpeciesId>,
    pub fwd_rate: f64,
}

impl ReactionRule {
    pub fn new(
        name: impl Into<String>,
        reactants: Reactants,
        products: Vec<SpeciesId>,
        fwd_rate: f64,
    ) -> Self {
        Self {
            name: name.into(),
            reactants,
            products,
            fwd_rate,
        }
    }
}
