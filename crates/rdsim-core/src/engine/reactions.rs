use super::callbacks::{CallbackDispatcher, ParticleRef, ReactionEvent};
use super::compartments::CompartmentTree;
use super::error::EngineError;
use super::state::RunDiagnostics;
use crate::core::geometry::grid::UniformGrid;
use crate::core::models::ids::{GeometryId, ReactionRuleId, SpeciesId};
use crate::core::models::particle::Particle;
use crate::core::models::reaction::Reactants;
use crate::core::models::surface::SurfaceBehavior;
use crate::core::registry::ModelRegistry;
use nalgebra::Point3;
use rand::Rng;
use slotmap::SecondaryMap;
use std::collections::HashSet;
use tracing::trace;

/// Per-step inputs of reaction resolution.
pub(crate) struct ReactionContext<'a> {
    pub registry: &'a ModelRegistry,
    pub tree: &'a CompartmentTree,
    /// Per-step firing probability of each rule.
    pub probabilities: &'a SecondaryMap<ReactionRuleId, f64>,
    pub reaction_radius: f64,
    pub iteration: u64,
    pub time: f64,
}

/// A pair of particles within the reaction radius matching a rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub(crate) struct Candidate {
    pub first: usize,
    pub second: usize,
    /// Position of the rule in registration order.
    pub rule_rank: usize,
}

/// Collects bimolecular candidates sorted by (first, second, rule) particle order.
///
/// `particles` must be sorted by serial, so index order is creation order.
pub(crate) fn find_candidates(ctx: &ReactionContext<'_>, particles: &[Particle]) -> Vec<(Candidate, ReactionRuleId)> {
    let rules: Vec<(ReactionRuleId, Reactants)> = ctx
        .registry
        .rules_iter()
        .filter(|(_, rule)| rule.reactants.is_bimolecular())
        .map(|(id, rule)| (id, rule.reactants))
        .collect();
    if rules.is_empty() {
        return Vec::new();
    }
    let reactive: HashSet<SpeciesId> = rules.iter().flat_map(|(_, r)| r.species()).collect();

    let mut grid = UniformGrid::new(ctx.reaction_radius);
    for (index, particle) in particles.iter().enumerate() {
        if reactive.contains(&particle.species) {
            grid.insert_point(index, &particle.position);
        }
    }

    let radius_sq = ctx.reaction_radius * ctx.reaction_radius;
    let mut candidates = Vec::new();
    for (first, p) in particles.iter().enumerate() {
        if !reactive.contains(&p.species) {
            continue;
        }
        grid.for_each_near(&p.position, |second| {
            if second <= first {
                return;
            }
            let q = &particles[second];
            if (q.position - p.position).norm_squared() > radius_sq {
                return;
            }
            for (rank, &(rule, reactants)) in rules.iter().enumerate() {
                if reactants.matches_pair(p.species, q.species) && !is_blocked(ctx, p, q) {
                    candidates.push((
                        Candidate {
                            first,
                            second,
                            rule_rank: rank,
                        },
                        rule,
                    ));
                }
            }
        });
    }
    candidates.sort_by_key(|(c, _)| *c);
    candidates
}

/// Whether a surface between two particles in different compartments separates them.
///
/// Particles only react across surfaces that are transparent to both reactants.
fn is_blocked(ctx: &ReactionContext<'_>, p: &Particle, q: &Particle) -> bool {
    if p.compartment == q.compartment {
        return false;
    }
    ctx.registry.objects_iter().any(|(id, obj)| {
        obj.mesh.first_crossing(&p.position, &q.position, None).is_some()
            && (ctx.registry.surface_behavior(id, p.species) != SurfaceBehavior::Transparent
                || ctx.registry.surface_behavior(id, q.species) != SurfaceBehavior::Transparent)
    })
}

/// Outcome of the reaction phase of one timestep.
#[derive(Debug, Default)]
pub(crate) struct ReactionOutcome {
    pub fired: usize,
    pub consumed: usize,
    pub created: usize,
}

struct Resolver<'c, 'a> {
    ctx: &'c ReactionContext<'a>,
    consumed: Vec<bool>,
    products: Vec<Particle>,
    next_serial: &'c mut u64,
    fired: usize,
}

impl Resolver<'_, '_> {
    fn fire(
        &mut self,
        rule: ReactionRuleId,
        reactants: &[&Particle],
        position: Point3<f64>,
        compartment: Option<GeometryId>,
        dispatcher: &mut CallbackDispatcher,
        diagnostics: &mut RunDiagnostics,
    ) -> Result<(), EngineError> {
        let Some(definition) = self.ctx.registry.rule(rule) else {
            return Err(EngineError::Internal(
                "reaction candidate references a missing rule".to_string(),
            ));
        };
        let mut products = Vec::with_capacity(definition.products.len());
        for &species in &definition.products {
            let serial = *self.next_serial;
            *self.next_serial += 1;
            self.products.push(Particle {
                species,
                position,
                compartment,
                serial,
            });
            products.push(ParticleRef { species, serial });
        }
        self.fired += 1;
        diagnostics.record_reaction(rule);
        trace!(rule = %definition.name, ?position, "Reaction fired.");

        if dispatcher.is_empty() {
            return Ok(());
        }
        let event = ReactionEvent {
            rule,
            rule_name: definition.name.clone(),
            iteration: self.ctx.iteration,
            time: self.ctx.time,
            position,
            reactants: reactants
                .iter()
                .map(|p| ParticleRef {
                    species: p.species,
                    serial: p.serial,
                })
                .collect(),
            products,
        };
        dispatcher.dispatch(&event)
    }

    fn run(
        &mut self,
        particles: &[Particle],
        rng: &mut impl Rng,
        dispatcher: &mut CallbackDispatcher,
        diagnostics: &mut RunDiagnostics,
    ) -> Result<(), EngineError> {
        for (candidate, rule) in find_candidates(self.ctx, particles) {
            let (i, j) = (candidate.first, candidate.second);
            if self.consumed[i] || self.consumed[j] {
                continue;
            }
            let p = self.ctx.probabilities.get(rule).copied().unwrap_or(0.0);
            if rng.r#gen::<f64>() >= p {
                continue;
            }
            self.consumed[i] = true;
            self.consumed[j] = true;
            let (a, b) = (&particles[i], &particles[j]);
            let position = nalgebra::center(&a.position, &b.position);
            let compartment = if a.compartment == b.compartment {
                a.compartment
            } else {
                self.ctx.tree.innermost(self.ctx.registry, &position)
            };
            self.fire(rule, &[a, b], position, compartment, dispatcher, diagnostics)?;
        }

        for (i, particle) in particles.iter().enumerate() {
            if self.consumed[i] {
                continue;
            }
            let rules: Vec<ReactionRuleId> = self.ctx.registry.rules_for_single(particle.species).collect();
            for rule in rules {
                let p = self.ctx.probabilities.get(rule).copied().unwrap_or(0.0);
                if rng.r#gen::<f64>() >= p {
                    continue;
                }
                self.consumed[i] = true;
                self.fire(
                    rule,
                    &[particle],
                    particle.position,
                    particle.compartment,
                    dispatcher,
                    diagnostics,
                )?;
                break;
            }
        }
        Ok(())
    }
}

/// Resolves bimolecular then unimolecular reactions for one timestep.
///
/// Every live candidate gets exactly one uniform draw, in candidate order; a particle
/// consumed earlier in the step is skipped without a draw. Consumed particles are
/// removed and products appended, also when a listener aborts part way: in that case
/// the reactions fired so far are kept and the listener's error is returned.
pub(crate) fn resolve(
    ctx: &ReactionContext<'_>,
    particles: &mut Vec<Particle>,
    next_serial: &mut u64,
    rng: &mut impl Rng,
    dispatcher: &mut CallbackDispatcher,
    diagnostics: &mut RunDiagnostics,
) -> Result<ReactionOutcome, EngineError> {
    let mut resolver = Resolver {
        ctx,
        consumed: vec![false; particles.len()],
        products: Vec::new(),
        next_serial,
        fired: 0,
    };
    let result = resolver.run(particles, rng, dispatcher, diagnostics);

    let consumed = resolver.consumed.iter().filter(|&&c| c).count();
    let created = resolver.products.len();
    if consumed > 0 {
        let mut flags = resolver.consumed.into_iter();
        particles.retain(|_| !flags.next().unwrap_or(false));
    }
    particles.append(&mut resolver.products);

    result.map(|_| ReactionOutcome {
        fired: resolver.fired,
        consumed,
        created,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::kinetics::bimolecular_probability;
    use crate::core::models::reaction::ReactionRule;
    use crate::core::models::species::Species;
    use crate::engine::callbacks::{CallbackError, ReactionListener, RuleFilter};
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    struct Model {
        registry: ModelRegistry,
        tree: CompartmentTree,
        probabilities: SecondaryMap<ReactionRuleId, f64>,
        a: SpeciesId,
        c: SpeciesId,
        m: SpeciesId,
        bind: ReactionRuleId,
    }

    fn model(probability: f64) -> Model {
        let mut registry = ModelRegistry::new();
        let a = registry.register_species(Species::new("Actin", 0.0)).unwrap();
        let c = registry.register_species(Species::new("CaMKII", 0.0)).unwrap();
        let m = registry.register_species(Species::new("Mobile", 0.0)).unwrap();
        let bind = registry
            .add_reaction_rule(ReactionRule::new(
                "actin binding",
                Reactants::Bimolecular(a, c),
                vec![m, c],
                5e7,
            ))
            .unwrap();
        let mut probabilities = SecondaryMap::new();
        probabilities.insert(bind, probability);
        let tree = CompartmentTree::build(&registry);
        Model {
            registry,
            tree,
            probabilities,
            a,
            c,
            m,
            bind,
        }
    }

    fn context(m: &Model) -> ReactionContext<'_> {
        ReactionContext {
            registry: &m.registry,
            tree: &m.tree,
            probabilities: &m.probabilities,
            reaction_radius: 0.01,
            iteration: 1,
            time: 1e-5,
        }
    }

    fn particle(species: SpeciesId, x: f64, serial: u64) -> Particle {
        Particle {
            species,
            position: Point3::new(x, 0.0, 0.0),
            compartment: None,
            serial,
        }
    }

    #[derive(Default)]
    struct Log(Vec<ReactionEvent>);

    impl ReactionListener for Log {
        fn on_reaction(&mut self, event: &ReactionEvent) -> Result<(), CallbackError> {
            self.0.push(event.clone());
            Ok(())
        }
    }

    #[test]
    fn candidates_require_the_reaction_radius_and_matching_species() {
        let m = model(1.0);
        let particles = vec![
            particle(m.a, 0.0, 0),
            particle(m.c, 0.005, 1),
            particle(m.c, 0.5, 2),
            particle(m.a, 0.508, 3),
            particle(m.a, 0.004, 4),
        ];
        let found = find_candidates(&context(&m), &particles);
        let pairs: Vec<(usize, usize)> = found.iter().map(|(c, _)| (c.first, c.second)).collect();
        assert_eq!(pairs, vec![(0, 1), (1, 4), (2, 3)]);
        assert!(found.iter().all(|(_, rule)| *rule == m.bind));
    }

    #[test]
    fn a_particle_reacts_at_most_once_per_step() {
        let m = model(1.0);
        let mut particles = vec![
            particle(m.a, 0.0, 0),
            particle(m.c, 0.005, 1),
            particle(m.a, 0.004, 2),
        ];
        let mut next_serial = 3;
        let mut dispatcher = CallbackDispatcher::new();
        let log = dispatcher.register(Log::default(), RuleFilter::Rule(m.bind));
        let mut diagnostics = RunDiagnostics::default();
        let mut rng = StdRng::seed_from_u64(1);

        let outcome = resolve(
            &context(&m),
            &mut particles,
            &mut next_serial,
            &mut rng,
            &mut dispatcher,
            &mut diagnostics,
        )
        .unwrap();

        assert_eq!(outcome.fired, 1);
        assert_eq!(outcome.consumed, 2);
        let species: Vec<SpeciesId> = particles.iter().map(|p| p.species).collect();
        assert_eq!(species, vec![m.a, m.m, m.c]);
        assert_eq!(particles.iter().map(|p| p.serial).collect::<Vec<_>>(), vec![2, 3, 4]);
        assert!((particles[1].position.x - 0.0025).abs() < 1e-15);

        let events = &dispatcher.get(log).unwrap().0;
        assert_eq!(events.len(), 1);
        let serials: Vec<u64> = events[0].reactants.iter().map(|r| r.serial).collect();
        assert_eq!(serials, vec![0, 1]);
        assert_eq!(diagnostics.reactions_fired(m.bind), 1);
    }

    #[test]
    fn firing_fraction_matches_the_rule_probability() {
        let p = bimolecular_probability(5e7, 0.01, 1e-5);
        let m = model(p);
        let pairs = 4000;
        let mut particles = Vec::with_capacity(pairs * 2);
        for k in 0..pairs {
            let x = k as f64 * 0.1;
            particles.push(particle(m.a, x, 2 * k as u64));
            particles.push(particle(m.c, x, 2 * k as u64 + 1));
        }
        let mut next_serial = particles.len() as u64;
        let mut dispatcher = CallbackDispatcher::new();
        let mut diagnostics = RunDiagnostics::default();
        let mut rng = StdRng::seed_from_u64(99);
        let outcome = resolve(
            &context(&m),
            &mut particles,
            &mut next_serial,
            &mut rng,
            &mut dispatcher,
            &mut diagnostics,
        )
        .unwrap();

        let fraction = outcome.fired as f64 / pairs as f64;
        let sd = (p * (1.0 - p) / pairs as f64).sqrt();
        assert!((fraction - p).abs() < 4.0 * sd, "fraction {fraction} vs p {p}");
    }

    #[test]
    fn listener_errors_abort_but_keep_fired_reactions() {
        struct StopAfterFirst(usize);
        impl ReactionListener for StopAfterFirst {
            fn on_reaction(&mut self, _: &ReactionEvent) -> Result<(), CallbackError> {
                self.0 += 1;
                Err(CallbackError::new("stop"))
            }
        }

        let m = model(1.0);
        let mut particles = vec![
            particle(m.a, 0.0, 0),
            particle(m.c, 0.0, 1),
            particle(m.a, 1.0, 2),
            particle(m.c, 1.0, 3),
        ];
        let mut next_serial = 4;
        let mut dispatcher = CallbackDispatcher::new();
        let stopper = dispatcher.register(StopAfterFirst(0), RuleFilter::All);
        let mut diagnostics = RunDiagnostics::default();
        let mut rng = StdRng::seed_from_u64(3);

        let err = resolve(
            &context(&m),
            &mut particles,
            &mut next_serial,
            &mut rng,
            &mut dispatcher,
            &mut diagnostics,
        )
        .unwrap_err();
        assert!(matches!(err, EngineError::Callback { .. }));
        assert_eq!(dispatcher.get(stopper).unwrap().0, 1);
        // First pair converted, second pair untouched.
        assert_eq!(particles.len(), 4);
        assert_eq!(particles.iter().filter(|p| p.species == m.m).count(), 1);
        assert_eq!(particles.iter().filter(|p| p.species == m.a).count(), 1);
    }
}
