use super::geometry::mesh::{GeometryError, Mesh};
use super::models::geometry_object::GeometryObject;
use super::models::ids::{GeometryId, ReactionRuleId, SpeciesId, SurfaceClassId};
use super::models::reaction::ReactionRule;
use super::models::species::{Species, SpeciesPattern};
use super::models::surface::{SurfaceBehavior, SurfaceClass};
use slotmap::SlotMap;
use std::collections::HashMap;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum RegistryError {
    #[error("A {kind} named '{name}' is already registered")]
    DuplicateName { kind: &'static str, name: String },

    #[error("Invalid parameter for {kind} '{name}': {reason}")]
    InvalidParameter {
        kind: &'static str,
        name: String,
        reason: String,
    },

    #[error("{owner} references an unregistered {kind}")]
    UnknownReference { owner: String, kind: &'static str },

    #[error("Geometry object '{name}' is malformed: {source}")]
    Geometry {
        name: String,
        #[source]
        source: GeometryError,
    },
}

/// Validated, name-indexed storage for every static model entity.
///
/// Registration checks parameters immediately; cross references between
/// entities are checked once more by [`ModelRegistry::validate`] before a run is frozen.
#[derive(Debug, Clone, Default)]
pub struct ModelRegistry {
    species: SlotMap<SpeciesId, Species>,
    surface_classes: SlotMap<SurfaceClassId, SurfaceClass>,
    objects: SlotMap<GeometryId, GeometryObject>,
    rules: SlotMap<ReactionRuleId, ReactionRule>,

    species_by_name: HashMap<String, SpeciesId>,
    surface_classes_by_name: HashMap<String, SurfaceClassId>,
    objects_by_name: HashMap<String, GeometryId>,
    rules_by_name: HashMap<String, ReactionRuleId>,

    /// Registration order, used wherever iteration order must be reproducible.
    species_order: Vec<SpeciesId>,
    object_order: Vec<GeometryId>,
    rule_order: Vec<ReactionRuleId>,
}

fn check_name(
    kind: &'static str,
    name: &str,
    taken: bool,
) -> Result<(), RegistryError> {
    if name.trim().is_empty() {
        return Err(RegistryError::InvalidParameter {
            kind,
            name: name.to_string(),
            reason: "name must not be empty".to_string(),
        });
    }
    if taken {
        return Err(RegistryError::DuplicateName {
            kind,
            name: name.to_string(),
        });
    }
    Ok(())
}

impl ModelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_species(&mut self, species: Species) -> Result<SpeciesId, RegistryError> {
        check_name(
            "species",
            &species.name,
            self.species_by_name.contains_key(&species.name),
        )?;
        let d = species.diffusion_constant_3d;
        if !d.is_finite() || d < 0.0 {
            return Err(RegistryError::InvalidParameter {
                kind: "species",
                name: species.name,
                reason: format!("diffusion constant must be a non-negative number, got {d}"),
            });
        }
        if let Some(affinity) = species.surface_affinity {
            if !affinity.is_finite() || affinity < 0.0 {
                return Err(RegistryError::InvalidParameter {
                    kind: "species",
                    name: species.name,
                    reason: format!("surface affinity must be non-negative, got {affinity}"),
                });
            }
        }
        let name = species.name.clone();
        let id = self.species.insert(species);
        self.species_by_name.insert(name, id);
        self.species_order.push(id);
        Ok(id)
    }

    pub fn register_surface_class(
        &mut self,
        name: &str,
        behavior: SurfaceBehavior,
        affected: SpeciesPattern,
    ) -> Result<SurfaceClassId, RegistryError> {
        check_name(
            "surface class",
            name,
            self.surface_classes_by_name.contains_key(name),
        )?;
        if let Some(species) = affected.species() {
            if !self.species.contains_key(species) {
                return Err(RegistryError::UnknownReference {
                    owner: format!("surface class '{name}'"),
                    kind: "species",
                });
            }
        }
        let id = self
            .surface_classes
            .insert(SurfaceClass::new(name, behavior, affected));
        self.surface_classes_by_name.insert(name.to_string(), id);
        Ok(id)
    }

    pub fn add_geometry_object(&mut self, name: &str, mesh: Mesh) -> Result<GeometryId, RegistryError> {
        check_name("geometry object", name, self.objects_by_name.contains_key(name))?;
        let id = self.objects.insert(GeometryObject::new(name, mesh));
        self.objects_by_name.insert(name.to_string(), id);
        self.object_order.push(id);
        Ok(id)
    }

    /// Makes `class` the single active surface class of `object`, replacing any previous one.
    pub fn assign_surface_class(
        &mut self,
        object: GeometryId,
        class: SurfaceClassId,
    ) -> Result<Option<SurfaceClassId>, RegistryError> {
        if !self.surface_classes.contains_key(class) {
            return Err(RegistryError::UnknownReference {
                owner: "surface class assignment".to_string(),
                kind: "surface class",
            });
        }
        let obj = self
            .objects
            .get_mut(object)
            .ok_or_else(|| RegistryError::UnknownReference {
                owner: "surface class assignment".to_string(),
                kind: "geometry object",
            })?;
        Ok(obj.surface_class.replace(class))
    }

    pub fn add_reaction_rule(&mut self, rule: ReactionRule) -> Result<ReactionRuleId, RegistryError> {
        check_name("reaction rule", &rule.name, self.rules_by_name.contains_key(&rule.name))?;
        if !rule.fwd_rate.is_finite() || rule.fwd_rate < 0.0 {
            return Err(RegistryError::InvalidParameter {
                kind: "reaction rule",
                name: rule.name.clone(),
                reason: format!("forward rate must be a non-negative number, got {}", rule.fwd_rate),
            });
        }
        self.check_rule_references(&rule)?;
        let name = rule.name.clone();
        let id = self.rules.insert(rule);
        self.rules_by_name.insert(name, id);
        self.rule_order.push(id);
        Ok(id)
    }

    fn check_rule_references(&self, rule: &ReactionRule) -> Result<(), RegistryError> {
        let all_known = rule
            .reactants
            .species()
            .into_iter()
            .chain(rule.products.iter().copied())
            .all(|s| self.species.contains_key(s));
        if all_known {
            Ok(())
        } else {
            Err(RegistryError::UnknownReference {
                owner: format!("reaction rule '{}'", rule.name),
                kind: "species",
            })
        }
    }

    /// Checks every cross reference and every mesh; called when a model is frozen.
    pub fn validate(&self) -> Result<(), RegistryError> {
        for (_, class) in &self.surface_classes {
            if let Some(species) = class.affected.species() {
                if !self.species.contains_key(species) {
                    return Err(RegistryError::UnknownReference {
                        owner: format!("surface class '{}'", class.name),
                        kind: "species",
                    });
                }
            }
        }
        for &id in &self.object_order {
            let obj = &self.objects[id];
            obj.mesh
                .validate_closed_manifold()
                .map_err(|source| RegistryError::Geometry {
                    name: obj.name.clone(),
                    source,
                })?;
            if obj.mesh.signed_volume() <= 0.0 {
                return Err(RegistryError::Geometry {
                    name: obj.name.clone(),
                    source: GeometryError::InvalidParameter(
                        "mesh encloses no positive volume".to_string(),
                    ),
                });
            }
            if let Some(class) = obj.surface_class {
                if !self.surface_classes.contains_key(class) {
                    return Err(RegistryError::UnknownReference {
                        owner: format!("geometry object '{}'", obj.name),
                        kind: "surface class",
                    });
                }
            }
        }
        for &id in &self.rule_order {
            self.check_rule_references(&self.rules[id])?;
        }
        Ok(())
    }

    pub fn species(&self, id: SpeciesId) -> Option<&Species> {
        self.species.get(id)
    }

    pub fn species_id(&self, name: &str) -> Option<SpeciesId> {
        self.species_by_name.get(name).copied()
    }

    pub fn species_iter(&self) -> impl Iterator<Item = (SpeciesId, &Species)> {
        self.species_order.iter().map(|&id| (id, &self.species[id]))
    }

    pub fn contains_species(&self, id: SpeciesId) -> bool {
        self.species.contains_key(id)
    }

    pub fn surface_class(&self, id: SurfaceClassId) -> Option<&SurfaceClass> {
        self.surface_classes.get(id)
    }

    pub fn object(&self, id: GeometryId) -> Option<&GeometryObject> {
        self.objects.get(id)
    }

    pub(crate) fn object_mut(&mut self, id: GeometryId) -> Option<&mut GeometryObject> {
        self.objects.get_mut(id)
    }

    pub fn object_id(&self, name: &str) -> Option<GeometryId> {
        self.objects_by_name.get(name).copied()
    }

    pub fn objects_iter(&self) -> impl Iterator<Item = (GeometryId, &GeometryObject)> {
        self.object_order.iter().map(|&id| (id, &self.objects[id]))
    }

    pub(crate) fn object_ids(&self) -> &[GeometryId] {
        &self.object_order
    }

    pub fn object_count(&self) -> usize {
        self.object_order.len()
    }

    pub fn rule(&self, id: ReactionRuleId) -> Option<&ReactionRule> {
        self.rules.get(id)
    }

    pub fn rules_iter(&self) -> impl Iterator<Item = (ReactionRuleId, &ReactionRule)> {
        self.rule_order.iter().map(|&id| (id, &self.rules[id]))
    }

    /// Behaviour `species` experiences when crossing the surface of `object`.
    pub fn surface_behavior(&self, object: GeometryId, species: SpeciesId) -> SurfaceBehavior {
        self.objects
            .get(object)
            .and_then(|obj| obj.surface_class)
            .and_then(|class| self.surface_classes.get(class))
            .map_or(SurfaceBehavior::Reflective, |class| class.behavior_for(species))
    }

    pub fn rules_for_single(&self, a: SpeciesId) -> impl Iterator<Item = ReactionRuleId> + '_ {
        self.rule_order
            .iter()
            .copied()
            .filter(move |&id| self.rules[id].reactants.matches_single(a))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::geometry::mesh::tests::unit_cube;
    use crate::core::geometry::primitives::create_icosphere;
    use crate::core::models::reaction::Reactants;

    fn registry_with_species() -> (ModelRegistry, SpeciesId, SpeciesId) {
        let mut reg = ModelRegistry::new();
        let a = reg.register_species(Species::new("Actin", 1e-6)).unwrap();
        let c = reg.register_species(Species::new("CaMKII", 1e-6)).unwrap();
        (reg, a, c)
    }

    #[test]
    fn duplicate_species_names_are_rejected() {
        let (mut reg, _, _) = registry_with_species();
        let err = reg.register_species(Species::new("Actin", 0.0)).unwrap_err();
        assert!(matches!(err, RegistryError::DuplicateName { kind: "species", .. }));
    }

    #[test]
    fn negative_or_non_finite_diffusion_is_rejected() {
        let mut reg = ModelRegistry::new();
        for d in [-1e-6, f64::NAN, f64::INFINITY] {
            let err = reg.register_species(Species::new("X", d)).unwrap_err();
            assert!(matches!(err, RegistryError::InvalidParameter { .. }));
        }
        assert!(reg.species_id("X").is_none());
        assert!(reg.register_species(Species::new("X", 0.0)).is_ok());
    }

    #[test]
    fn reassigning_a_surface_class_replaces_the_previous_one() {
        let (mut reg, a, c) = registry_with_species();
        let transp = reg
            .register_surface_class("transp", SurfaceBehavior::Transparent, a.into())
            .unwrap();
        let sink = reg
            .register_surface_class("sink", SurfaceBehavior::Absorptive, SpeciesPattern::All)
            .unwrap();
        let pool = reg.add_geometry_object("pool", unit_cube()).unwrap();

        assert_eq!(reg.surface_behavior(pool, a), SurfaceBehavior::Reflective);
        assert_eq!(reg.assign_surface_class(pool, transp).unwrap(), None);
        assert_eq!(reg.surface_behavior(pool, a), SurfaceBehavior::Transparent);
        assert_eq!(reg.surface_behavior(pool, c), SurfaceBehavior::Reflective);

        assert_eq!(reg.assign_surface_class(pool, sink).unwrap(), Some(transp));
        assert_eq!(reg.surface_behavior(pool, a), SurfaceBehavior::Absorptive);
    }

    #[test]
    fn reaction_rules_require_registered_species() {
        let (mut reg, a, c) = registry_with_species();
        let mut other = ModelRegistry::new();
        let _ = other.register_species(Species::new("p0", 0.0)).unwrap();
        let stray = other.register_species(Species::new("p1", 0.0)).unwrap();

        let bad = ReactionRule::new("bind", Reactants::Bimolecular(a, c), vec![stray], 5e7);
        assert!(matches!(
            reg.add_reaction_rule(bad),
            Err(RegistryError::UnknownReference { kind: "species", .. })
        ));

        let good = ReactionRule::new("bind", Reactants::Bimolecular(a, c), vec![], 5e7);
        reg.add_reaction_rule(good).unwrap();
        let decay = ReactionRule::new("decay", Reactants::Unimolecular(c), vec![a], 10.0);
        let decay = reg.add_reaction_rule(decay).unwrap();
        assert_eq!(reg.rules_for_single(c).collect::<Vec<_>>(), vec![decay]);
        assert_eq!(reg.rules_for_single(a).count(), 0);
    }

    #[test]
    fn validate_rejects_open_meshes() {
        let (mut reg, _, _) = registry_with_species();
        reg.add_geometry_object("CYT", create_icosphere(0.5, 1).unwrap())
            .unwrap();
        assert!(reg.validate().is_ok());

        let cube = unit_cube();
        let open = Mesh::new(cube.vertices().to_vec(), cube.faces()[..10].to_vec()).unwrap();
        reg.add_geometry_object("broken", open).unwrap();
        assert!(matches!(
            reg.validate(),
            Err(RegistryError::Geometry { ref name, .. }) if name == "broken"
        ));
    }
}
