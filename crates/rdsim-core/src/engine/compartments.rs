use crate::core::models::ids::GeometryId;
use crate::core::registry::ModelRegistry;
use nalgebra::Point3;
use slotmap::SecondaryMap;
use tracing::debug;

/// Nesting of geometry objects, derived from containment at initialization.
///
/// An object's parent is the smallest-volume object that encloses its first vertex.
/// Meshes are assumed not to intersect each other, so nesting is fixed for a run;
/// only the volume ordering is refreshed after vertex moves.
#[derive(Debug, Clone, Default)]
pub struct CompartmentTree {
    parents: SecondaryMap<GeometryId, Option<GeometryId>>,
    /// Objects sorted by ascending enclosed volume.
    by_volume: Vec<GeometryId>,
}

impl CompartmentTree {
    pub fn build(registry: &ModelRegistry) -> Self {
        let mut tree = Self::default();
        tree.refresh_volumes(registry);

        for &child in registry.object_ids() {
            let Some(vertex) = registry
                .object(child)
                .and_then(|obj| obj.mesh.vertices().first().copied())
            else {
                continue;
            };
            let parent = tree
                .by_volume
                .iter()
                .copied()
                .filter(|&candidate| candidate != child)
                .find(|&candidate| {
                    registry
                        .object(candidate)
                        .is_some_and(|obj| obj.mesh.contains_point(&vertex))
                });
            if let (Some(parent), Some(obj)) = (parent, registry.object(child)) {
                debug!(
                    child = %obj.name,
                    parent = %registry.object(parent).map_or("", |p| p.name.as_str()),
                    "Resolved compartment nesting."
                );
            }
            tree.parents.insert(child, parent);
        }
        tree
    }

    pub fn refresh_volumes(&mut self, registry: &ModelRegistry) {
        let mut objects: Vec<(GeometryId, f64)> = registry
            .objects_iter()
            .map(|(id, obj)| (id, obj.mesh.volume()))
            .collect();
        objects.sort_by(|a, b| a.1.total_cmp(&b.1));
        self.by_volume = objects.into_iter().map(|(id, _)| id).collect();
    }

    pub fn parent(&self, object: GeometryId) -> Option<GeometryId> {
        self.parents.get(object).copied().flatten()
    }

    /// Innermost object whose mesh contains `p`, or `None` outside every object.
    pub fn innermost(&self, registry: &ModelRegistry, p: &Point3<f64>) -> Option<GeometryId> {
        self.by_volume.iter().copied().find(|&id| {
            registry
                .object(id)
                .is_some_and(|obj| obj.mesh.contains_point(p))
        })
    }

    /// Whether a particle in `compartment` lies inside `region` or anything nested in it.
    pub fn is_within(&self, compartment: Option<GeometryId>, region: GeometryId) -> bool {
        let mut current = compartment;
        while let Some(id) = current {
            if id == region {
                return true;
            }
            current = self.parent(id);
        }
        false
    }

    /// Compartment entered or left when crossing the surface of `object`.
    pub fn across(&self, object: GeometryId, exiting: bool) -> Option<GeometryId> {
        if exiting {
            self.parent(object)
        } else {
            Some(object)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::geometry::primitives::create_icosphere;

    fn nested() -> (ModelRegistry, GeometryId, GeometryId) {
        let mut reg = ModelRegistry::new();
        let cyt = reg
            .add_geometry_object("CYT", create_icosphere(0.35, 3).unwrap())
            .unwrap();
        let pool = reg
            .add_geometry_object("POOL", create_icosphere(0.3, 3).unwrap())
            .unwrap();
        (reg, cyt, pool)
    }

    #[test]
    fn smaller_enclosed_sphere_is_nested_in_the_larger() {
        let (reg, cyt, pool) = nested();
        let tree = CompartmentTree::build(&reg);
        assert_eq!(tree.parent(pool), Some(cyt));
        assert_eq!(tree.parent(cyt), None);
    }

    #[test]
    fn innermost_and_is_within_follow_nesting() {
        let (reg, cyt, pool) = nested();
        let tree = CompartmentTree::build(&reg);

        let centre = tree.innermost(&reg, &Point3::origin());
        assert_eq!(centre, Some(pool));
        assert!(tree.is_within(centre, cyt));
        assert!(tree.is_within(centre, pool));

        let shell = tree.innermost(&reg, &Point3::new(0.0, -0.32, 0.0));
        assert_eq!(shell, Some(cyt));
        assert!(!tree.is_within(shell, pool));

        assert_eq!(tree.innermost(&reg, &Point3::new(1.0, 0.0, 0.0)), None);
        assert!(!tree.is_within(None, cyt));
    }

    #[test]
    fn crossing_a_surface_moves_between_parent_and_child() {
        let (reg, cyt, pool) = nested();
        let tree = CompartmentTree::build(&reg);
        assert_eq!(tree.across(pool, true), Some(cyt));
        assert_eq!(tree.across(pool, false), Some(pool));
        assert_eq!(tree.across(cyt, true), None);
    }
}
