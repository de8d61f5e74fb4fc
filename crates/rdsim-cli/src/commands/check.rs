use crate::cli::CheckArgs;
use crate::config::{Overrides, PartialModelConfig};
use crate::error::Result;
use crate::model::{self, BuiltModel};
use rdsim::core::kinetics;
use tracing::info;

pub async fn run(args: CheckArgs) -> Result<()> {
    let partial = PartialModelConfig::from_file(&args.config)?;
    let overrides = Overrides {
        set_values: args.set_values,
        ..Default::default()
    };
    let mut model_config = partial.merge_with_cli(&overrides, &args.config)?;
    // Checking must not create output files.
    model_config.viz = None;
    for count in &mut model_config.counts {
        count.file = None;
    }

    let BuiltModel {
        mut simulation,
        plan,
    } = model::build(&model_config)?;
    simulation.initialize()?;
    info!("Model initialized successfully.");

    let config = simulation.config();
    println!(
        "Model '{}': dt = {:e} s, {} iterations, seed {}, reaction radius {} µm",
        args.config.display(),
        config.time_step,
        plan.iterations,
        config.seed,
        config.reaction_radius
    );

    let registry = simulation.registry();
    println!("Species:");
    for (_, species) in registry.species_iter() {
        println!(
            "  {:<16} D = {:e} cm²/s, step σ = {:.3e} µm",
            species.name,
            species.diffusion_constant_3d,
            kinetics::step_sigma(species.diffusion_constant_3d, config.time_step)
        );
    }
    println!("Geometry:");
    for (_, object) in registry.objects_iter() {
        println!(
            "  {:<16} {} vertices, {} faces, volume {:.4} µm³",
            object.name,
            object.mesh.vertex_count(),
            object.mesh.face_count(),
            object.mesh.volume()
        );
    }
    println!("Reactions:");
    for (id, rule) in registry.rules_iter() {
        println!(
            "  {:<16} k = {:e}, p(step) = {:.4}",
            rule.name,
            rule.fwd_rate,
            simulation.rule_step_probability(id).unwrap_or(0.0)
        );
    }
    println!("Initial particles: {}", simulation.particle_count());

    let warnings = &simulation.diagnostics().warnings;
    if !warnings.is_empty() {
        println!("Warnings:");
        for warning in warnings {
            println!("  [{}] {}", warning.kind, warning.message);
        }
    }
    Ok(())
}
