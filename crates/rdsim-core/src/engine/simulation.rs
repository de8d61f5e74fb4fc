use super::callbacks::{CallbackDispatcher, ListenerHandle, ReactionListener, RuleFilter};
use super::compartments::CompartmentTree;
use super::config::SimulationConfig;
use super::deformation::reconcile_moved_object;
use super::diffusion::{self, DiffusionContext};
use super::error::EngineError;
use super::observables::{CountObservable, CountSample, CountSpec, VizOutput, count_matching};
use super::placement::{self, PlacementError};
use super::reactions::{self, ReactionContext};
use super::state::{NumericalWarning, RunDiagnostics, SimulationPhase, WarningKind};
use crate::core::geometry::mesh::Mesh;
use crate::core::io::viz::{VizRecord, VizWriter};
use crate::core::kinetics;
use crate::core::models::ids::{
    GeometryId, ObservableId, ReactionRuleId, ReleaseSiteId, SpeciesId, SurfaceClassId,
};
use crate::core::models::particle::Particle;
use crate::core::models::reaction::{Reactants, ReactionRule};
use crate::core::models::release::{ReleaseQuantity, ReleaseSite, ReleaseTarget};
use crate::core::models::species::{Species, SpeciesPattern};
use crate::core::models::surface::SurfaceBehavior;
use crate::core::registry::{ModelRegistry, RegistryError};
use nalgebra::Vector3;
use rand::SeedableRng;
use rand::rngs::StdRng;
use slotmap::{SecondaryMap, SlotMap};
use std::path::PathBuf;
use tracing::{debug, info, instrument, warn};

/// A species' per-axis step longer than this fraction of the smallest
/// compartment's size is reported as numerically unreliable.
const STEP_TO_COMPARTMENT_RATIO_LIMIT: f64 = 0.5;

/// A fixed-timestep particle reaction-diffusion simulation.
///
/// Configuration (species, surface classes, geometry, rules, release sites and
/// observables) is registered while the simulation is uninitialized and frozen by
/// [`Simulation::initialize`]. Afterwards the only sanctioned mutations are
/// [`Simulation::run_iterations`], vertex moves, explicit releases and listener
/// registration, all of which happen between iterations.
#[derive(Debug)]
pub struct Simulation {
    config: SimulationConfig,
    registry: ModelRegistry,
    release_sites: SlotMap<ReleaseSiteId, ReleaseSite>,
    pending_releases: Vec<ReleaseSiteId>,
    counts: SlotMap<ObservableId, CountObservable>,
    count_order: Vec<ObservableId>,
    viz: Option<VizOutput>,
    listeners: CallbackDispatcher,

    phase: SimulationPhase,
    iteration: u64,
    particles: Vec<Particle>,
    next_serial: u64,
    compartments: CompartmentTree,
    sigmas: SecondaryMap<SpeciesId, f64>,
    probabilities: SecondaryMap<ReactionRuleId, f64>,
    rng: StdRng,
    diagnostics: RunDiagnostics,
}

impl Simulation {
    pub fn new(config: SimulationConfig) -> Self {
        let rng = StdRng::seed_from_u64(config.seed);
        Self {
            config,
            registry: ModelRegistry::new(),
            release_sites: SlotMap::with_key(),
            pending_releases: Vec::new(),
            counts: SlotMap::with_key(),
            count_order: Vec::new(),
            viz: None,
            listeners: CallbackDispatcher::new(),
            phase: SimulationPhase::Uninitialized,
            iteration: 0,
            particles: Vec::new(),
            next_serial: 0,
            compartments: CompartmentTree::default(),
            sigmas: SecondaryMap::new(),
            probabilities: SecondaryMap::new(),
            rng,
            diagnostics: RunDiagnostics::default(),
        }
    }

    fn require_phase(
        &self,
        operation: &'static str,
        allowed: &[SimulationPhase],
    ) -> Result<(), EngineError> {
        if allowed.contains(&self.phase) {
            Ok(())
        } else {
            Err(EngineError::InvalidState {
                operation,
                phase: self.phase,
            })
        }
    }

    fn require_configurable(&self, operation: &'static str) -> Result<(), EngineError> {
        self.require_phase(operation, &[SimulationPhase::Uninitialized])
    }

    fn require_live(&self, operation: &'static str) -> Result<(), EngineError> {
        self.require_phase(
            operation,
            &[SimulationPhase::Initialized, SimulationPhase::Running],
        )
    }

    // --- Configuration ---

    pub fn register_species(&mut self, species: Species) -> Result<SpeciesId, EngineError> {
        self.require_configurable("register_species")?;
        Ok(self.registry.register_species(species)?)
    }

    pub fn register_surface_class(
        &mut self,
        name: &str,
        behavior: SurfaceBehavior,
        affected: SpeciesPattern,
    ) -> Result<SurfaceClassId, EngineError> {
        self.require_configurable("register_surface_class")?;
        Ok(self.registry.register_surface_class(name, behavior, affected)?)
    }

    pub fn add_geometry_object(&mut self, name: &str, mesh: Mesh) -> Result<GeometryId, EngineError> {
        self.require_configurable("add_geometry_object")?;
        Ok(self.registry.add_geometry_object(name, mesh)?)
    }

    pub fn assign_surface_class(
        &mut self,
        object: GeometryId,
        class: SurfaceClassId,
    ) -> Result<(), EngineError> {
        self.require_configurable("assign_surface_class")?;
        self.registry.assign_surface_class(object, class)?;
        Ok(())
    }

    pub fn add_reaction_rule(&mut self, rule: ReactionRule) -> Result<ReactionRuleId, EngineError> {
        self.require_configurable("add_reaction_rule")?;
        Ok(self.registry.add_reaction_rule(rule)?)
    }

    pub fn add_release_site(&mut self, site: ReleaseSite) -> Result<ReleaseSiteId, EngineError> {
        self.require_configurable("add_release_site")?;
        if self.release_sites.values().any(|s| s.name == site.name) {
            return Err(EngineError::Registry {
                source: RegistryError::DuplicateName {
                    kind: "release site",
                    name: site.name,
                },
            });
        }
        let id = self.release_sites.insert(site);
        self.pending_releases.push(id);
        Ok(id)
    }

    pub fn add_count(&mut self, spec: CountSpec) -> Result<ObservableId, EngineError> {
        self.require_configurable("add_count")?;
        if spec.every_n == 0 {
            return Err(EngineError::Configuration(format!(
                "count '{}' must sample at least every iteration",
                spec.name
            )));
        }
        let id = self.counts.insert(CountObservable::new(spec));
        self.count_order.push(id);
        Ok(id)
    }

    pub fn set_viz_output(&mut self, viz: VizOutput) -> Result<(), EngineError> {
        self.require_configurable("set_viz_output")?;
        if viz.every_n == 0 {
            return Err(EngineError::Configuration(
                "visualization output must export at least every iteration".to_string(),
            ));
        }
        self.viz = Some(viz);
        Ok(())
    }

    /// Registers a listener invoked synchronously whenever a rule accepted by `filter` fires.
    pub fn register_reaction_listener<L: ReactionListener>(
        &mut self,
        listener: L,
        filter: RuleFilter,
    ) -> Result<ListenerHandle<L>, EngineError> {
        self.require_phase(
            "register_reaction_listener",
            &[
                SimulationPhase::Uninitialized,
                SimulationPhase::Initialized,
                SimulationPhase::Running,
            ],
        )?;
        if let RuleFilter::Rule(rule) = filter {
            if self.registry.rule(rule).is_none() {
                return Err(EngineError::UnknownHandle {
                    kind: "reaction rule",
                });
            }
        }
        Ok(self.listeners.register(listener, filter))
    }

    pub fn listener<L: ReactionListener>(&self, handle: ListenerHandle<L>) -> Option<&L> {
        self.listeners.get(handle)
    }

    pub fn unregister_reaction_listener<L: ReactionListener>(
        &mut self,
        handle: ListenerHandle<L>,
    ) -> Option<L> {
        self.listeners.unregister(handle)
    }

    // --- Lifecycle ---

    /// Validates and freezes the model, releases the iteration-0 sites and takes the
    /// first observable samples.
    #[instrument(skip_all, name = "simulation_initialize")]
    pub fn initialize(&mut self) -> Result<(), EngineError> {
        self.require_configurable("initialize")?;
        self.validate()?;

        self.compartments = CompartmentTree::build(&self.registry);
        self.sigmas = self
            .registry
            .species_iter()
            .map(|(id, s)| (id, kinetics::step_sigma(s.diffusion_constant_3d, self.config.time_step)))
            .collect();
        self.probabilities = self
            .registry
            .rules_iter()
            .map(|(id, rule)| (id, self.rule_probability(rule)))
            .collect();
        self.check_numerical_limits();

        for id in &self.count_order {
            self.counts[*id].open()?;
        }

        self.phase = SimulationPhase::Initialized;
        info!(
            species = self.registry.species_iter().count(),
            objects = self.registry.object_count(),
            rules = self.registry.rules_iter().count(),
            seed = self.config.seed,
            "Simulation initialized."
        );

        self.process_releases()?;
        self.sample_due()?;
        Ok(())
    }

    fn validate(&self) -> Result<(), EngineError> {
        self.registry
            .validate()
            .map_err(|e| EngineError::Configuration(e.to_string()))?;

        for site in self.release_sites.values() {
            if !self.registry.contains_species(site.species) {
                return Err(EngineError::Configuration(format!(
                    "release site '{}' references an unregistered species",
                    site.name
                )));
            }
            if let ReleaseTarget::Region(object) = site.target {
                if self.registry.object(object).is_none() {
                    return Err(EngineError::Configuration(format!(
                        "release site '{}' references an unregistered geometry object",
                        site.name
                    )));
                }
            }
        }
        for obs in self.counts.values() {
            let spec = obs.spec();
            let species_ok = spec
                .pattern
                .species()
                .is_none_or(|s| self.registry.contains_species(s));
            let region_ok = spec
                .region
                .is_none_or(|r| self.registry.object(r).is_some());
            if !(species_ok && region_ok) {
                return Err(EngineError::Configuration(format!(
                    "count '{}' references an unregistered species or geometry object",
                    spec.name
                )));
            }
        }
        Ok(())
    }

    fn rule_probability(&self, rule: &ReactionRule) -> f64 {
        match rule.reactants {
            Reactants::Bimolecular(..) => kinetics::bimolecular_probability(
                rule.fwd_rate,
                self.config.reaction_radius,
                self.config.time_step,
            ),
            Reactants::Unimolecular(_) => {
                kinetics::unimolecular_probability(rule.fwd_rate, self.config.time_step)
            }
        }
    }

    fn check_numerical_limits(&mut self) {
        let mut warnings = Vec::new();
        for (id, rule) in self.registry.rules_iter() {
            let p = self.probabilities.get(id).copied().unwrap_or(0.0);
            debug!(rule = %rule.name, probability = p, "Per-step reaction probability.");
            if p > kinetics::PROBABILITY_WARNING_THRESHOLD {
                warnings.push((
                    WarningKind::LargeReactionProbability,
                    format!(
                        "Rule '{}' fires with probability {p:.3} per step; reduce the time step for accurate kinetics",
                        rule.name
                    ),
                ));
            }
        }

        let smallest = self
            .registry
            .objects_iter()
            .map(|(_, obj)| obj.mesh.volume().cbrt())
            .fold(f64::INFINITY, f64::min);
        if smallest.is_finite() {
            for (id, species) in self.registry.species_iter() {
                let sigma = self.sigmas.get(id).copied().unwrap_or(0.0);
                if sigma > STEP_TO_COMPARTMENT_RATIO_LIMIT * smallest {
                    warnings.push((
                        WarningKind::LargeDiffusionStep,
                        format!(
                            "Species '{}' moves {sigma:.3e} µm per axis per step, comparable to the smallest compartment ({smallest:.3e} µm)",
                            species.name
                        ),
                    ));
                }
            }
        }

        for (kind, message) in warnings {
            self.diagnostics.record_warning(NumericalWarning {
                kind,
                iteration: 0,
                particle: None,
                message,
            });
        }
    }

    /// Advances the simulation by exactly `n` timesteps.
    ///
    /// If a reaction listener fails, the iteration in progress is completed with the
    /// reactions fired up to that point, sampled, and the listener's error is returned.
    #[instrument(skip_all, name = "run_iterations", fields(iterations = n))]
    pub fn run_iterations(&mut self, n: u64) -> Result<(), EngineError> {
        self.require_live("run_iterations")?;
        self.phase = SimulationPhase::Running;
        for _ in 0..n {
            self.step()?;
        }
        Ok(())
    }

    fn step(&mut self) -> Result<(), EngineError> {
        let next = self.iteration + 1;

        let diffusion_ctx = DiffusionContext {
            registry: &self.registry,
            tree: &self.compartments,
            sigmas: &self.sigmas,
            max_interactions: self.config.max_surface_interactions,
            iteration: next,
        };
        diffusion::diffuse(
            &diffusion_ctx,
            &mut self.particles,
            &mut self.rng,
            &mut self.diagnostics,
        );

        let reaction_ctx = ReactionContext {
            registry: &self.registry,
            tree: &self.compartments,
            probabilities: &self.probabilities,
            reaction_radius: self.config.reaction_radius,
            iteration: next,
            time: next as f64 * self.config.time_step,
        };
        let reacted = reactions::resolve(
            &reaction_ctx,
            &mut self.particles,
            &mut self.next_serial,
            &mut self.rng,
            &mut self.listeners,
            &mut self.diagnostics,
        );

        // Diffusion and the reactions fired before a listener error stand as this iteration.
        self.iteration = next;
        self.process_releases()?;
        self.sample_due()?;
        if let Err(e) = &reacted {
            warn!(iteration = next, error = %e, "Reaction listener aborted the step.");
        }
        reacted.map(|_| ())
    }

    /// Transitions to `Ended` and flushes every file sink; later calls fail with `InvalidState`.
    pub fn end_simulation(&mut self) -> Result<(), EngineError> {
        self.require_phase(
            "end_simulation",
            &[
                SimulationPhase::Uninitialized,
                SimulationPhase::Initialized,
                SimulationPhase::Running,
            ],
        )?;
        self.phase = SimulationPhase::Ended;
        for id in &self.count_order {
            self.counts[*id].flush()?;
        }
        info!(
            iterations = self.iteration,
            particles = self.particles.len(),
            reactions = self.diagnostics.total_reactions(),
            degraded = self.diagnostics.degraded,
            "Simulation ended."
        );
        Ok(())
    }

    // --- Releases ---

    fn process_releases(&mut self) -> Result<(), EngineError> {
        let due: Vec<ReleaseSiteId> = self
            .pending_releases
            .iter()
            .copied()
            .filter(|&id| self.release_sites[id].iteration <= self.iteration)
            .collect();
        if due.is_empty() {
            return Ok(());
        }
        self.pending_releases.retain(|id| !due.contains(id));
        for id in due {
            if let Some(site) = self.release_sites.remove(id) {
                let released = self.place(&site.name, site.species, &site.target, site.quantity)?;
                info!(site = %site.name, released, iteration = self.iteration, "Release site fired.");
            }
        }
        Ok(())
    }

    /// Places particles of `species` into `target` right away. Returns the number placed.
    pub fn release(
        &mut self,
        species: SpeciesId,
        target: ReleaseTarget,
        quantity: ReleaseQuantity,
    ) -> Result<usize, EngineError> {
        self.require_live("release")?;
        if !self.registry.contains_species(species) {
            return Err(EngineError::UnknownHandle { kind: "species" });
        }
        self.place("release", species, &target, quantity)
    }

    fn place(
        &mut self,
        site: &str,
        species: SpeciesId,
        target: &ReleaseTarget,
        quantity: ReleaseQuantity,
    ) -> Result<usize, EngineError> {
        let invalid = |reason: String| EngineError::InvalidRegion {
            site: site.to_string(),
            reason,
        };
        let positions = match target {
            ReleaseTarget::Region(object) => {
                let obj = self
                    .registry
                    .object(*object)
                    .ok_or_else(|| invalid("target geometry object is not registered".to_string()))?;
                let count = match quantity {
                    ReleaseQuantity::Count(n) => n,
                    ReleaseQuantity::Concentration(c) => kinetics::concentration_to_count(c, obj.mesh.volume()),
                };
                placement::sample_in_mesh(&obj.mesh, count, &mut self.rng)
            }
            ReleaseTarget::Spherical { location, diameter } => {
                let count = match quantity {
                    ReleaseQuantity::Count(n) => n,
                    ReleaseQuantity::Concentration(c) => {
                        kinetics::concentration_to_count(c, placement::ball_volume(*diameter))
                    }
                };
                placement::sample_in_ball(location, *diameter, count, &mut self.rng)
            }
        }
        .map_err(|e: PlacementError| invalid(e.to_string()))?;

        let released = positions.len();
        self.particles.reserve(released);
        for position in positions {
            let compartment = self.compartments.innermost(&self.registry, &position);
            self.particles.push(Particle {
                species,
                position,
                compartment,
                serial: self.next_serial,
            });
            self.next_serial += 1;
        }
        self.diagnostics.released += released as u64;
        Ok(released)
    }

    // --- Dynamic geometry ---

    /// Buffers a displacement of one vertex; nothing moves until [`Simulation::apply_vertex_moves`].
    pub fn buffer_vertex_move(
        &mut self,
        object: GeometryId,
        vertex: usize,
        displacement: Vector3<f64>,
    ) -> Result<(), EngineError> {
        self.require_phase(
            "buffer_vertex_move",
            &[
                SimulationPhase::Uninitialized,
                SimulationPhase::Initialized,
                SimulationPhase::Running,
            ],
        )?;
        let obj = self
            .registry
            .object_mut(object)
            .ok_or(EngineError::UnknownHandle {
                kind: "geometry object",
            })?;
        obj.mesh
            .buffer_vertex_move(vertex, displacement)
            .map_err(|source| EngineError::OutOfRange {
                object: obj.name.clone(),
                source,
            })
    }

    /// Commits all buffered vertex moves of every object at once.
    ///
    /// Particles swept by a moving surface are reconciled: species the surface is
    /// transparent to change compartment, all others are pushed back to their side.
    /// Returns the number of vertices moved.
    #[instrument(skip_all, name = "apply_vertex_moves")]
    pub fn apply_vertex_moves(&mut self) -> Result<usize, EngineError> {
        self.require_phase(
            "apply_vertex_moves",
            &[
                SimulationPhase::Uninitialized,
                SimulationPhase::Initialized,
                SimulationPhase::Running,
            ],
        )?;
        let mut moved = Vec::new();
        let mut vertices = 0;
        for id in self.registry.object_ids().to_vec() {
            if let Some(obj) = self.registry.object_mut(id) {
                if obj.mesh.has_pending_moves() {
                    vertices += obj.mesh.pending_move_count();
                    moved.push((id, obj.mesh.apply_vertex_moves()));
                }
            }
        }
        if moved.is_empty() || self.phase == SimulationPhase::Uninitialized {
            return Ok(vertices);
        }

        self.compartments.refresh_volumes(&self.registry);
        for (object, max_displacement) in moved {
            reconcile_moved_object(
                &self.registry,
                &self.compartments,
                object,
                max_displacement,
                &mut self.particles,
                self.iteration,
                &mut self.diagnostics,
            );
        }
        Ok(vertices)
    }

    // --- Observables ---

    /// Number of live particles matching `pattern`, optionally inside `region`.
    pub fn count_particles(&self, pattern: SpeciesPattern, region: Option<GeometryId>) -> usize {
        count_matching(&self.particles, pattern, region, &self.compartments)
    }

    /// Samples the count observable now and appends the value to its series and sink.
    pub fn sample_count(&mut self, id: ObservableId) -> Result<usize, EngineError> {
        self.require_live("sample_count")?;
        let time = self.time();
        let obs = self
            .counts
            .get_mut(id)
            .ok_or(EngineError::UnknownHandle { kind: "count" })?;
        let spec = obs.spec();
        let count = count_matching(&self.particles, spec.pattern, spec.region, &self.compartments);
        obs.append(CountSample {
            iteration: self.iteration,
            time,
            count,
        })?;
        Ok(count)
    }

    fn sample_due(&mut self) -> Result<(), EngineError> {
        let time = self.time();
        for id in &self.count_order {
            let obs = &mut self.counts[*id];
            if !obs.is_due(self.iteration) {
                continue;
            }
            let spec = obs.spec();
            let count = count_matching(&self.particles, spec.pattern, spec.region, &self.compartments);
            obs.append(CountSample {
                iteration: self.iteration,
                time,
                count,
            })?;
        }
        if self.viz.as_ref().is_some_and(|v| v.is_due(self.iteration)) {
            self.write_viz_frame()?;
        }
        Ok(())
    }

    /// Writes a visualization frame for the current iteration. Returns the files written.
    pub fn export_viz_frame(&mut self) -> Result<Vec<PathBuf>, EngineError> {
        self.require_live("export_viz_frame")?;
        self.write_viz_frame()
    }

    fn write_viz_frame(&self) -> Result<Vec<PathBuf>, EngineError> {
        let Some(viz) = &self.viz else {
            return Ok(Vec::new());
        };
        let writer = VizWriter::new(&viz.prefix);
        let records = self.particles.iter().map(|p| VizRecord {
            species: self
                .registry
                .species(p.species)
                .map_or("unknown", |s| s.name.as_str()),
            id: p.serial,
            position: p.position,
        });
        let meshes: Vec<(&str, &Mesh)> = if viz.include_meshes {
            self.registry
                .objects_iter()
                .map(|(_, obj)| (obj.name.as_str(), &obj.mesh))
                .collect()
        } else {
            Vec::new()
        };
        Ok(writer.write_frame(self.iteration, records, &meshes)?)
    }

    // --- Accessors ---

    pub fn config(&self) -> &SimulationConfig {
        &self.config
    }

    pub fn registry(&self) -> &ModelRegistry {
        &self.registry
    }

    pub fn phase(&self) -> SimulationPhase {
        self.phase
    }

    /// Number of completed timesteps.
    pub fn iteration(&self) -> u64 {
        self.iteration
    }

    pub fn time(&self) -> f64 {
        self.iteration as f64 * self.config.time_step
    }

    pub fn particles(&self) -> &[Particle] {
        &self.particles
    }

    pub fn particle_count(&self) -> usize {
        self.particles.len()
    }

    pub fn count(&self, id: ObservableId) -> Option<&CountObservable> {
        self.counts.get(id)
    }

    pub fn counts(&self) -> impl Iterator<Item = (ObservableId, &CountObservable)> {
        self.count_order.iter().map(|&id| (id, &self.counts[id]))
    }

    pub fn diagnostics(&self) -> &RunDiagnostics {
        &self.diagnostics
    }

    /// Per-step firing probability of a rule, available after initialization.
    pub fn rule_step_probability(&self, rule: ReactionRuleId) -> Option<f64> {
        self.probabilities.get(rule).copied()
    }

    pub fn species_id(&self, name: &str) -> Option<SpeciesId> {
        self.registry.species_id(name)
    }

    pub fn object_id(&self, name: &str) -> Option<GeometryId> {
        self.registry.object_id(name)
    }

    pub fn mesh(&self, object: GeometryId) -> Option<&Mesh> {
        self.registry.object(object).map(|obj| &obj.mesh)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::geometry::primitives::create_icosphere;
    use crate::engine::config::SimulationConfigBuilder;
    use nalgebra::Point3;

    fn config(seed: u64) -> SimulationConfig {
        SimulationConfigBuilder::new()
            .time_step(1e-5)
            .total_iterations(10)
            .seed(seed)
            .build()
            .unwrap()
    }

    fn sphere_model() -> (Simulation, SpeciesId, GeometryId) {
        let mut sim = Simulation::new(config(1));
        let a = sim.register_species(Species::new("A", 1e-7)).unwrap();
        let cyt = sim
            .add_geometry_object("CYT", create_icosphere(0.35, 2).unwrap())
            .unwrap();
        sim.add_release_site(ReleaseSite::new(
            "rel_a",
            a,
            ReleaseTarget::Region(cyt),
            ReleaseQuantity::Count(50),
        ))
        .unwrap();
        (sim, a, cyt)
    }

    #[test]
    fn lifecycle_moves_forward_only() {
        let (mut sim, a, _) = sphere_model();
        assert!(matches!(
            sim.run_iterations(1),
            Err(EngineError::InvalidState {
                phase: SimulationPhase::Uninitialized,
                ..
            })
        ));

        sim.initialize().unwrap();
        assert_eq!(sim.phase(), SimulationPhase::Initialized);
        assert_eq!(sim.particle_count(), 50);
        assert!(matches!(sim.initialize(), Err(EngineError::InvalidState { .. })));
        assert!(sim.register_species(Species::new("late", 0.0)).is_err());

        sim.run_iterations(3).unwrap();
        assert_eq!(sim.phase(), SimulationPhase::Running);
        assert_eq!(sim.iteration(), 3);

        sim.end_simulation().unwrap();
        let err = sim.run_iterations(1).unwrap_err();
        assert!(matches!(
            err,
            EngineError::InvalidState {
                phase: SimulationPhase::Ended,
                ..
            }
        ));
        assert_eq!(sim.iteration(), 3);
        assert_eq!(sim.count_particles(a.into(), None), 50);
    }

    #[test]
    fn initialize_rejects_unregistered_references() {
        let mut sim = Simulation::new(config(1));
        let cyt = sim
            .add_geometry_object("CYT", create_icosphere(0.35, 1).unwrap())
            .unwrap();
        let mut foreign: SlotMap<SpeciesId, ()> = SlotMap::with_key();
        let stray = foreign.insert(());
        sim.add_release_site(ReleaseSite::new(
            "rel",
            stray,
            ReleaseTarget::Region(cyt),
            ReleaseQuantity::Count(1),
        ))
        .unwrap();
        assert!(matches!(sim.initialize(), Err(EngineError::Configuration(_))));
        assert_eq!(sim.phase(), SimulationPhase::Uninitialized);
    }

    #[test]
    fn vertex_moves_reject_bad_indices_and_keep_the_simulation_usable() {
        let (mut sim, _, cyt) = sphere_model();
        sim.initialize().unwrap();
        let err = sim
            .buffer_vertex_move(cyt, 10_000, Vector3::new(0.0, 0.0, 0.01))
            .unwrap_err();
        assert!(matches!(err, EngineError::OutOfRange { .. }));
        assert_eq!(sim.apply_vertex_moves().unwrap(), 0);
        sim.run_iterations(1).unwrap();
    }

    #[test]
    fn concentration_release_converts_through_volume() {
        let mut sim = Simulation::new(config(4));
        let a = sim.register_species(Species::new("A", 0.0)).unwrap();
        sim.initialize().unwrap();
        let released = sim
            .release(
                a,
                ReleaseTarget::Spherical {
                    location: Point3::origin(),
                    diameter: 1.0,
                },
                ReleaseQuantity::Concentration(1e-3),
            )
            .unwrap();
        let expected = kinetics::concentration_to_count(1e-3, placement::ball_volume(1.0));
        assert!(expected > 100);
        assert_eq!(released, expected);
        assert_eq!(sim.particle_count(), expected);
        assert!(sim.particles().iter().all(|p| p.compartment.is_none()));
    }

    #[test]
    fn counts_are_sampled_at_zero_and_every_period() {
        let (mut sim, a, _) = sphere_model();
        let id = sim
            .add_count(CountSpec::new("A", a.into()).every(2))
            .unwrap();
        sim.initialize().unwrap();
        sim.run_iterations(5).unwrap();
        let iterations: Vec<u64> = sim.count(id).unwrap().series().iter().map(|s| s.iteration).collect();
        assert_eq!(iterations, vec![0, 2, 4]);
        assert_eq!(sim.sample_count(id).unwrap(), 50);
        assert_eq!(sim.count(id).unwrap().values(), vec![50, 50, 50, 50]);
    }

    #[test]
    fn scheduled_releases_fire_at_their_iteration() {
        let (mut sim, a, cyt) = sphere_model();
        sim.add_release_site(
            ReleaseSite::new("late", a, ReleaseTarget::Region(cyt), ReleaseQuantity::Count(7))
                .at_iteration(3),
        )
        .unwrap();
        sim.initialize().unwrap();
        sim.run_iterations(2).unwrap();
        assert_eq!(sim.particle_count(), 50);
        sim.run_iterations(1).unwrap();
        assert_eq!(sim.particle_count(), 57);
        assert_eq!(sim.diagnostics().released, 57);
    }
}
