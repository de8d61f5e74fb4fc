use super::compartments::CompartmentTree;
use super::state::{NumericalWarning, RunDiagnostics, WarningKind};
use crate::core::geometry::intersect::reflect;
use crate::core::geometry::mesh::SurfaceHit;
use crate::core::models::ids::{GeometryId, SpeciesId};
use crate::core::models::particle::Particle;
use crate::core::models::surface::SurfaceBehavior;
use crate::core::registry::ModelRegistry;
use nalgebra::{Point3, Vector3};
use rand::Rng;
use rand_distr::StandardNormal;
use slotmap::SecondaryMap;
use tracing::trace;

#[cfg(feature = "parallel")]
use rayon::prelude::*;

/// Distance a reflected particle is moved back off the face it hit, in µm.
pub const REFLECTION_NUDGE: f64 = 1e-10;

/// Result of moving one particle along its displacement for a timestep.
#[derive(Debug, Clone, PartialEq)]
pub enum Propagation {
    Moved {
        position: Point3<f64>,
        compartment: Option<GeometryId>,
    },
    Absorbed {
        position: Point3<f64>,
        object: GeometryId,
    },
    /// The interaction cap was hit; the particle stays at its last valid point.
    Capped {
        position: Point3<f64>,
        compartment: Option<GeometryId>,
    },
}

/// Per-step inputs shared by every particle.
pub(crate) struct DiffusionContext<'a> {
    pub registry: &'a ModelRegistry,
    pub tree: &'a CompartmentTree,
    /// Per-axis step standard deviation in µm for each species.
    pub sigmas: &'a SecondaryMap<SpeciesId, f64>,
    pub max_interactions: usize,
    pub iteration: u64,
}

/// Earliest crossing of `start -> end` over every object, skipping one face.
fn earliest_crossing(
    registry: &ModelRegistry,
    start: &Point3<f64>,
    end: &Point3<f64>,
    skip: Option<(GeometryId, usize)>,
) -> Option<(GeometryId, SurfaceHit)> {
    let mut best: Option<(GeometryId, SurfaceHit)> = None;
    for (id, obj) in registry.objects_iter() {
        let skip_face = skip.and_then(|(skip_id, face)| (skip_id == id).then_some(face));
        if let Some(hit) = obj.mesh.first_crossing(start, end, skip_face) {
            if best.is_none_or(|(_, b)| hit.t < b.t) {
                best = Some((id, hit));
            }
        }
    }
    best
}

/// Moves a particle of `species` from `start` by `displacement`, resolving every
/// surface crossing on the way.
///
/// Reflection is specular off the face plane; the remainder of the segment continues
/// from the hit point within the same timestep.
pub fn propagate(
    registry: &ModelRegistry,
    tree: &CompartmentTree,
    species: SpeciesId,
    start: &Point3<f64>,
    compartment: Option<GeometryId>,
    displacement: &Vector3<f64>,
    max_interactions: usize,
) -> Propagation {
    let mut origin = *start;
    let mut end = start + displacement;
    let mut compartment = compartment;
    let mut skip = None;
    let mut interactions = 0;

    while let Some((object, hit)) = earliest_crossing(registry, &origin, &end, skip) {
        interactions += 1;
        if interactions > max_interactions {
            return Propagation::Capped {
                position: origin,
                compartment,
            };
        }
        let Some(obj) = registry.object(object) else {
            break;
        };
        let normal = *obj.mesh.face_normal(hit.face);
        let exiting = (end - origin).dot(&normal) > 0.0;

        match registry.surface_behavior(object, species) {
            SurfaceBehavior::Absorptive => {
                return Propagation::Absorbed {
                    position: hit.point,
                    object,
                };
            }
            SurfaceBehavior::Transparent => {
                compartment = tree.across(object, exiting);
                origin = hit.point;
            }
            SurfaceBehavior::Reflective => {
                let reflected = reflect(&(end - hit.point), &normal);
                let back = if exiting { -normal } else { normal };
                origin = hit.point + back * REFLECTION_NUDGE;
                end = origin + reflected;
            }
        }
        skip = Some((object, hit.face));
    }

    Propagation::Moved {
        position: end,
        compartment,
    }
}

/// Advances every particle by one Brownian step.
///
/// Displacements are drawn sequentially in particle order so the random stream is
/// independent of how propagation is scheduled. Returns the number of absorbed particles.
pub(crate) fn diffuse(
    ctx: &DiffusionContext<'_>,
    particles: &mut Vec<Particle>,
    rng: &mut impl Rng,
    diagnostics: &mut RunDiagnostics,
) -> usize {
    let displacements: Vec<Option<Vector3<f64>>> = particles
        .iter()
        .map(|particle| {
            let sigma = ctx.sigmas.get(particle.species).copied().unwrap_or(0.0);
            (sigma > 0.0).then(|| {
                Vector3::new(
                    rng.sample::<f64, _>(StandardNormal),
                    rng.sample::<f64, _>(StandardNormal),
                    rng.sample::<f64, _>(StandardNormal),
                ) * sigma
            })
        })
        .collect();

    let step = |(particle, displacement): (&Particle, &Option<Vector3<f64>>)| {
        displacement.map(|d| {
            propagate(
                ctx.registry,
                ctx.tree,
                particle.species,
                &particle.position,
                particle.compartment,
                &d,
                ctx.max_interactions,
            )
        })
    };

    #[cfg(feature = "parallel")]
    let outcomes: Vec<Option<Propagation>> = particles
        .par_iter()
        .zip(displacements.par_iter())
        .map(step)
        .collect();

    #[cfg(not(feature = "parallel"))]
    let outcomes: Vec<Option<Propagation>> = particles.iter().zip(displacements.iter()).map(step).collect();

    let mut absorbed = vec![false; particles.len()];
    for ((particle, outcome), gone) in particles.iter_mut().zip(outcomes).zip(absorbed.iter_mut()) {
        match outcome {
            None => {}
            Some(Propagation::Moved {
                position,
                compartment,
            }) => {
                particle.position = position;
                particle.compartment = compartment;
            }
            Some(Propagation::Capped {
                position,
                compartment,
            }) => {
                particle.position = position;
                particle.compartment = compartment;
                diagnostics.record_warning(NumericalWarning {
                    kind: WarningKind::ReflectionLimit,
                    iteration: ctx.iteration,
                    particle: Some(particle.serial),
                    message: format!(
                        "Particle exceeded {} surface interactions in one timestep; kept at its last valid position",
                        ctx.max_interactions
                    ),
                });
            }
            Some(Propagation::Absorbed { position, object }) => {
                trace!(serial = particle.serial, ?position, ?object, "Particle absorbed.");
                *gone = true;
            }
        }
    }

    let absorbed_count = absorbed.iter().filter(|&&a| a).count();
    if absorbed_count > 0 {
        let mut flags = absorbed.into_iter();
        particles.retain(|_| !flags.next().unwrap_or(false));
        diagnostics.absorbed += absorbed_count as u64;
    }
    absorbed_count
}
