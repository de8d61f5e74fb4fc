use super::compartments::CompartmentTree;
use super::state::{NumericalWarning, RunDiagnostics, WarningKind};
use crate::core::models::ids::GeometryId;
use crate::core::models::particle::Particle;
use crate::core::models::surface::SurfaceBehavior;
use crate::core::registry::ModelRegistry;
use tracing::{debug, instrument};

#[cfg(feature = "parallel")]
use rayon::prelude::*;

/// Distance a particle is placed off a surface that swept over it, in µm.
pub const PUSH_BACK_NUDGE: f64 = 1e-9;

/// Particles found on the wrong side of a moved mesh, with their new side.
fn swept_particles(
    registry: &ModelRegistry,
    tree: &CompartmentTree,
    object: GeometryId,
    max_displacement: f64,
    particles: &[Particle],
) -> Vec<(usize, bool)> {
    let Some(obj) = registry.object(object) else {
        return Vec::new();
    };
    let margin = max_displacement + PUSH_BACK_NUDGE;
    let check = |(index, particle): (usize, &Particle)| {
        if !obj.mesh.is_near_surface(&particle.position, margin) {
            return None;
        }
        let was_inside = tree.is_within(particle.compartment, object);
        let now_inside = obj.mesh.contains_point(&particle.position);
        (was_inside != now_inside).then_some((index, now_inside))
    };

    #[cfg(feature = "parallel")]
    let swept = particles.par_iter().enumerate().filter_map(check).collect();

    #[cfg(not(feature = "parallel"))]
    let swept = particles.iter().enumerate().filter_map(check).collect();

    swept
}

/// Restores membership consistency after `object`'s mesh moved by at most `max_displacement`.
///
/// Particles the surface is transparent to change compartment; all others are pushed back
/// onto their original side, just off the closest point of the surface.
/// Returns the number of particles pushed back.
#[instrument(level = "debug", skip_all)]
pub(crate) fn reconcile_moved_object(
    registry: &ModelRegistry,
    tree: &CompartmentTree,
    object: GeometryId,
    max_displacement: f64,
    particles: &mut [Particle],
    iteration: u64,
    diagnostics: &mut RunDiagnostics,
) -> usize {
    let swept = swept_particles(registry, tree, object, max_displacement, particles);
    if swept.is_empty() {
        return 0;
    }
    let Some(obj) = registry.object(object) else {
        return 0;
    };

    let mut pushed = 0;
    for (index, now_inside) in swept {
        let particle = &mut particles[index];
        if registry.surface_behavior(object, particle.species) == SurfaceBehavior::Transparent {
            particle.compartment = tree.innermost(registry, &particle.position);
            continue;
        }

        let (face, closest) = obj
            .mesh
            .closest_surface_point(&particle.position, max_displacement + PUSH_BACK_NUDGE);
        let normal = *obj.mesh.face_normal(face);
        // Outward normal: a particle that was inside goes against it.
        let side = if now_inside { normal } else { -normal };
        particle.position = closest + side * PUSH_BACK_NUDGE;
        pushed += 1;

        if obj.mesh.contains_point(&particle.position) == now_inside {
            diagnostics.record_warning(NumericalWarning {
                kind: WarningKind::DeformationPushBack,
                iteration,
                particle: Some(particle.serial),
                message: format!("Particle could not be kept on its side of moving surface '{}'", obj.name),
            });
        }
    }
    debug!(object = %obj.name, pushed, "Reconciled particles after vertex moves.");
    pushed
}
