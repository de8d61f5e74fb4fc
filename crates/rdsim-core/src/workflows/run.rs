use crate::core::models::ids::GeometryId;
use crate::engine::error::EngineError;
use crate::engine::progress::{Progress, ProgressReporter};
use crate::engine::simulation::Simulation;
use crate::engine::state::SimulationPhase;
use nalgebra::Point3;
use tracing::{debug, info, instrument};

/// A surface deformation applied in small increments after every iteration.
#[derive(Debug, Clone, PartialEq)]
pub enum Deformation {
    /// Scales `object` about `center` (its vertex centroid when `None`) linearly from
    /// 1 at the start of the run down to `final_scale` after the last iteration.
    RadialScale {
        object: GeometryId,
        final_scale: f64,
        center: Option<Point3<f64>>,
    },
}

/// What a run should do.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunPlan {
    pub iterations: u64,
    pub deformations: Vec<Deformation>,
}

impl RunPlan {
    pub fn new(iterations: u64) -> Self {
        Self {
            iterations,
            deformations: Vec::new(),
        }
    }

    pub fn with_deformation(mut self, deformation: Deformation) -> Self {
        self.deformations.push(deformation);
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RunSummary {
    pub iterations: u64,
    pub final_time: f64,
    pub particles: usize,
    pub reactions: u64,
    pub released: u64,
    pub absorbed: u64,
    pub warnings: u64,
    pub degraded: bool,
}

/// Resolved per-object schedule: the reference shape every step is measured from.
struct ScaleSchedule {
    object: GeometryId,
    final_scale: f64,
    center: Point3<f64>,
    reference: Vec<Point3<f64>>,
}

impl ScaleSchedule {
    fn resolve(sim: &Simulation, deformation: &Deformation) -> Result<Self, EngineError> {
        let Deformation::RadialScale {
            object,
            final_scale,
            center,
        } = deformation;
        if !(final_scale.is_finite() && *final_scale > 0.0) {
            return Err(EngineError::Configuration(format!(
                "radial deformation scale must be a positive number, got {final_scale}"
            )));
        }
        let mesh = sim.mesh(*object).ok_or(EngineError::UnknownHandle {
            kind: "geometry object",
        })?;
        Ok(Self {
            object: *object,
            final_scale: *final_scale,
            center: center.unwrap_or_else(|| mesh.centroid()),
            reference: mesh.vertices().to_vec(),
        })
    }

    fn buffer_step(&self, sim: &mut Simulation, step: u64, total: u64) -> Result<(), EngineError> {
        let fraction = step as f64 / total as f64;
        let scale = 1.0 - (1.0 - self.final_scale) * fraction;
        let current = sim
            .mesh(self.object)
            .ok_or(EngineError::UnknownHandle {
                kind: "geometry object",
            })?
            .vertices()
            .to_vec();
        for (index, (reference, now)) in self.reference.iter().zip(&current).enumerate() {
            let target = self.center + (reference - self.center) * scale;
            sim.buffer_vertex_move(self.object, index, target - now)?;
        }
        Ok(())
    }
}

/// Runs `sim` according to `plan` and ends it.
///
/// An uninitialized simulation is initialized first. Deformations are committed after
/// each iteration: iteration `k` runs on the shape left by `k - 1` increments and the
/// final shape is in place when the run ends.
#[instrument(skip_all, name = "run_workflow")]
pub fn run(
    sim: &mut Simulation,
    plan: &RunPlan,
    reporter: &ProgressReporter,
) -> Result<RunSummary, EngineError> {
    // === Phase 1: Initialization ===
    if sim.phase() == SimulationPhase::Uninitialized {
        reporter.report(Progress::PhaseStart {
            name: "Initialization",
        });
        sim.initialize()?;
        reporter.report(Progress::PhaseFinish);
    }

    let schedules = plan
        .deformations
        .iter()
        .map(|d| ScaleSchedule::resolve(sim, d))
        .collect::<Result<Vec<_>, _>>()?;

    // === Phase 2: Time stepping ===
    info!(
        iterations = plan.iterations,
        deformations = schedules.len(),
        "Starting simulation run."
    );
    reporter.report(Progress::RunStart {
        total_iterations: plan.iterations,
    });
    for step in 1..=plan.iterations {
        sim.run_iterations(1)?;
        if !schedules.is_empty() {
            for schedule in &schedules {
                schedule.buffer_step(sim, step, plan.iterations)?;
            }
            let moved = sim.apply_vertex_moves()?;
            debug!(step, moved, "Applied scheduled deformation.");
        }
        reporter.report(Progress::IterationDone {
            iteration: sim.iteration(),
            particles: sim.particle_count(),
        });
    }
    reporter.report(Progress::RunFinish);

    // === Phase 3: Finalization ===
    sim.end_simulation()?;
    let diagnostics = sim.diagnostics();
    let summary = RunSummary {
        iterations: sim.iteration(),
        final_time: sim.time(),
        particles: sim.particle_count(),
        reactions: diagnostics.total_reactions(),
        released: diagnostics.released,
        absorbed: diagnostics.absorbed,
        warnings: diagnostics.warnings.len() as u64 + diagnostics.suppressed_warnings,
        degraded: diagnostics.degraded,
    };
    info!(
        iterations = summary.iterations,
        particles = summary.particles,
        reactions = summary.reactions,
        degraded = summary.degraded,
        "Run complete."
    );
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::geometry::primitives::create_icosphere;
    use crate::core::models::release::{ReleaseQuantity, ReleaseSite, ReleaseTarget};
    use crate::core::models::species::Species;
    use crate::engine::config::SimulationConfigBuilder;
    use std::sync::Mutex;

    fn shrinking_model() -> (Simulation, GeometryId) {
        let config = SimulationConfigBuilder::new()
            .time_step(1e-5)
            .total_iterations(20)
            .seed(3)
            .build()
            .unwrap();
        let mut sim = Simulation::new(config);
        let a = sim.register_species(Species::new("A", 0.0)).unwrap();
        let pool = sim
            .add_geometry_object("POOL", create_icosphere(0.3, 2).unwrap())
            .unwrap();
        sim.add_release_site(ReleaseSite::new(
            "rel",
            a,
            ReleaseTarget::Region(pool),
            ReleaseQuantity::Count(100),
        ))
        .unwrap();
        (sim, pool)
    }

    #[test]
    fn radial_scale_reaches_the_final_shape() {
        let (mut sim, pool) = shrinking_model();
        let before = sim.mesh(pool).unwrap().vertices().to_vec();
        let center = Point3::origin();
        let plan = RunPlan::new(20).with_deformation(Deformation::RadialScale {
            object: pool,
            final_scale: 0.25,
            center: Some(center),
        });

        let events = Mutex::new(Vec::new());
        let reporter = ProgressReporter::with_callback(Box::new(|p| {
            if let Progress::IterationDone { iteration, .. } = p {
                events.lock().unwrap().push(iteration);
            }
        }));
        let summary = run(&mut sim, &plan, &reporter).unwrap();

        assert_eq!(summary.iterations, 20);
        assert_eq!(*events.lock().unwrap(), (1..=20).collect::<Vec<u64>>());
        assert_eq!(sim.phase(), SimulationPhase::Ended);

        let after = sim.mesh(pool).unwrap().vertices();
        for (b, a) in before.iter().zip(after) {
            assert!((b.coords * 0.25 - a.coords).norm() < 1e-9);
        }
        // Immobile particles stay enclosed by the shrinking reflective surface.
        let mesh = sim.mesh(pool).unwrap();
        assert!(sim.particles().iter().all(|p| mesh.contains_point(&p.position)));
        assert_eq!(summary.particles, 100);
    }

    #[test]
    fn each_iteration_runs_before_its_shrink_increment() {
        use crate::core::models::surface::SurfaceBehavior;
        use crate::engine::observables::CountSpec;

        let config = SimulationConfigBuilder::new()
            .time_step(1e-5)
            .total_iterations(1)
            .seed(5)
            .build()
            .unwrap();
        let mut sim = Simulation::new(config);
        let a = sim.register_species(Species::new("A", 0.0)).unwrap();
        sim.add_geometry_object("CYT", create_icosphere(0.35, 2).unwrap())
            .unwrap();
        let pool = sim
            .add_geometry_object("POOL", create_icosphere(0.3, 2).unwrap())
            .unwrap();
        let transp = sim
            .register_surface_class("transp", SurfaceBehavior::Transparent, a.into())
            .unwrap();
        sim.assign_surface_class(pool, transp).unwrap();
        sim.add_release_site(ReleaseSite::new(
            "rel",
            a,
            ReleaseTarget::Region(pool),
            ReleaseQuantity::Count(50),
        ))
        .unwrap();
        let in_pool = sim
            .add_count(CountSpec::new("in pool", a.into()).in_region(pool))
            .unwrap();

        let plan = RunPlan::new(1).with_deformation(Deformation::RadialScale {
            object: pool,
            final_scale: 0.25,
            center: Some(Point3::origin()),
        });
        run(&mut sim, &plan, &ProgressReporter::new()).unwrap();

        // The sample of iteration 1 still sees the full pool; the shrink lands afterwards.
        let counts = sim.count(in_pool).unwrap().values();
        assert_eq!(counts, vec![50, 50]);
        assert!(sim.count_particles(a.into(), Some(pool)) < 50);
    }

    #[test]
    fn invalid_scale_is_rejected_before_stepping() {
        let (mut sim, pool) = shrinking_model();
        let plan = RunPlan::new(5).with_deformation(Deformation::RadialScale {
            object: pool,
            final_scale: 0.0,
            center: None,
        });
        let err = run(&mut sim, &plan, &ProgressReporter::new()).unwrap_err();
        assert!(matches!(err, EngineError::Configuration(_)));
        assert_eq!(sim.iteration(), 0);
    }
}
