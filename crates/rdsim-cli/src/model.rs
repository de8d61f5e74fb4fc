use crate::config::{ModelConfig, ShapeConfig};
use crate::error::{CliError, Result};
use rdsim::core::geometry::mesh::Mesh;
use rdsim::core::geometry::primitives::{create_box, create_icosphere};
use rdsim::core::io::mesh_file::load_mesh;
use rdsim::core::models::ids::{GeometryId, SpeciesId};
use rdsim::core::models::reaction::{Reactants, ReactionRule};
use rdsim::core::models::release::{ReleaseQuantity, ReleaseSite, ReleaseTarget};
use rdsim::core::models::species::{Species, SpeciesPattern};
use rdsim::engine::observables::{CountSpec, VizOutput};
use rdsim::engine::simulation::Simulation;
use rdsim::workflows::run::{Deformation, RunPlan};
use nalgebra::{Point3, Vector3};
use std::collections::HashMap;
use tracing::{debug, info};

/// A model turned into a configured, not yet initialized simulation plus its run plan.
pub struct BuiltModel {
    pub simulation: Simulation,
    pub plan: RunPlan,
}

struct Names {
    species: HashMap<String, SpeciesId>,
    objects: HashMap<String, GeometryId>,
}

impl Names {
    fn species(&self, name: &str, owner: &str) -> Result<SpeciesId> {
        self.species.get(name).copied().ok_or_else(|| {
            CliError::Config(format!("{owner} references unknown species '{name}'"))
        })
    }

    fn object(&self, name: &str, owner: &str) -> Result<GeometryId> {
        self.objects.get(name).copied().ok_or_else(|| {
            CliError::Config(format!("{owner} references unknown geometry object '{name}'"))
        })
    }

    fn pattern(&self, name: Option<&str>, owner: &str) -> Result<SpeciesPattern> {
        name.map_or(Ok(SpeciesPattern::All), |n| {
            self.species(n, owner).map(SpeciesPattern::Species)
        })
    }
}

fn point(p: [f64; 3]) -> Point3<f64> {
    Point3::new(p[0], p[1], p[2])
}

fn build_mesh(model: &ModelConfig, name: &str, shape: &ShapeConfig) -> Result<Mesh> {
    let mesh = match shape {
        ShapeConfig::Icosphere {
            radius,
            subdivisions,
            center,
        } => create_icosphere(*radius, *subdivisions).map(|mut mesh| {
            if let Some(c) = center {
                mesh.translate(&Vector3::new(c[0], c[1], c[2]));
            }
            mesh
        }),
        ShapeConfig::Box { min, max } => create_box(&point(*min), &point(*max)),
        ShapeConfig::File { path } => {
            let path = model.model_dir.join(path);
            return load_mesh(&path).map_err(|e| CliError::FileParsing {
                path,
                source: e.into(),
            });
        }
    };
    mesh.map_err(|e| CliError::Config(format!("geometry object '{name}': {e}")))
}

/// Registers every entity of `model` on a fresh simulation, in file order.
pub fn build(model: &ModelConfig) -> Result<BuiltModel> {
    let mut sim = Simulation::new(model.simulation.clone());
    let mut names = Names {
        species: HashMap::new(),
        objects: HashMap::new(),
    };

    for s in &model.species {
        let id = sim.register_species(Species::new(&s.name, s.diffusion_constant))?;
        names.species.insert(s.name.clone(), id);
    }

    for g in &model.geometry {
        let mesh = build_mesh(model, &g.name, &g.shape)?;
        debug!(
            object = %g.name,
            vertices = mesh.vertex_count(),
            faces = mesh.face_count(),
            "Built geometry object."
        );
        let id = sim.add_geometry_object(&g.name, mesh)?;
        names.objects.insert(g.name.clone(), id);
    }

    let mut classes = HashMap::new();
    for c in &model.surface_classes {
        let owner = format!("surface class '{}'", c.name);
        let pattern = names.pattern(c.species.as_deref(), &owner)?;
        let id = sim.register_surface_class(&c.name, c.behavior.into(), pattern)?;
        classes.insert(c.name.clone(), id);
    }
    for g in &model.geometry {
        if let Some(class) = &g.surface_class {
            let class_id = classes.get(class).copied().ok_or_else(|| {
                CliError::Config(format!(
                    "geometry object '{}' references unknown surface class '{class}'",
                    g.name
                ))
            })?;
            sim.assign_surface_class(names.object(&g.name, "geometry")?, class_id)?;
        }
    }

    for r in &model.reactions {
        let owner = format!("reaction '{}'", r.name);
        let reactants = match r.reactants.as_slice() {
            [a] => Reactants::Unimolecular(names.species(a, &owner)?),
            [a, b] => Reactants::Bimolecular(names.species(a, &owner)?, names.species(b, &owner)?),
            _ => {
                return Err(CliError::Config(format!(
                    "{owner} must have one or two reactants, found {}",
                    r.reactants.len()
                )));
            }
        };
        let products = r
            .products
            .iter()
            .map(|p| names.species(p, &owner))
            .collect::<Result<Vec<_>>>()?;
        sim.add_reaction_rule(ReactionRule::new(&r.name, reactants, products, r.rate))?;
    }

    for site in &model.release_sites {
        let owner = format!("release site '{}'", site.name);
        let species = names.species(&site.species, &owner)?;
        let target = match (&site.region, site.location) {
            (Some(region), None) => ReleaseTarget::Region(names.object(region, &owner)?),
            (None, Some(location)) => ReleaseTarget::Spherical {
                location: point(location),
                diameter: site.diameter.unwrap_or(0.0),
            },
            _ => {
                return Err(CliError::Config(format!(
                    "{owner} needs exactly one of `region` or `location`"
                )));
            }
        };
        let quantity = match (site.count, site.concentration) {
            (Some(n), None) => ReleaseQuantity::Count(n),
            (None, Some(c)) => ReleaseQuantity::Concentration(c),
            _ => {
                return Err(CliError::Config(format!(
                    "{owner} needs exactly one of `count` or `concentration`"
                )));
            }
        };
        let release = ReleaseSite::new(&site.name, species, target, quantity)
            .at_iteration(site.iteration.unwrap_or(0));
        sim.add_release_site(release)?;
    }

    for c in &model.counts {
        let owner = format!("count '{}'", c.name);
        let mut spec = CountSpec::new(&c.name, names.pattern(c.species.as_deref(), &owner)?)
            .every(c.every.unwrap_or(1));
        if let Some(region) = &c.region {
            spec = spec.in_region(names.object(region, &owner)?);
        }
        if let Some(file) = &c.file {
            spec = spec.to_file(file);
        }
        sim.add_count(spec)?;
    }

    if let Some(viz) = &model.viz {
        let mut output = VizOutput::new(&viz.prefix).every(viz.every);
        output.include_meshes = viz.meshes;
        sim.set_viz_output(output)?;
    }

    let mut plan = RunPlan::new(model.simulation.total_iterations);
    for d in &model.deformations {
        plan = plan.with_deformation(Deformation::RadialScale {
            object: names.object(&d.object, "deformation")?,
            final_scale: d.final_scale,
            center: d.center.map(point),
        });
    }

    info!(
        species = model.species.len(),
        objects = model.geometry.len(),
        reactions = model.reactions.len(),
        release_sites = model.release_sites.len(),
        "Model built."
    );
    Ok(BuiltModel {
        simulation: sim,
        plan,
    })
}
