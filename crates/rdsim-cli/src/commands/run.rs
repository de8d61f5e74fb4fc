use crate::cli::RunArgs;
use crate::config::{Overrides, PartialModelConfig};
use crate::error::Result;
use crate::listener::ReactionCounter;
use crate::model::{self, BuiltModel};
use crate::utils::progress::RunProgressBar;
use rdsim::engine::callbacks::RuleFilter;
use rdsim::engine::progress::ProgressReporter;
use rdsim::workflows;
use tracing::{info, warn};

pub async fn run(args: RunArgs) -> Result<()> {
    let partial = PartialModelConfig::from_file(&args.config)?;
    info!("Merging model file and CLI arguments...");
    let overrides = Overrides {
        output_dir: args.output_dir,
        seed: args.seed,
        iterations: args.iterations,
        time_step: args.time_step,
        set_values: args.set_values,
    };
    let model_config = partial.merge_with_cli(&overrides, &args.config)?;

    let BuiltModel {
        mut simulation,
        plan,
    } = model::build(&model_config)?;
    let counter = simulation.register_reaction_listener(ReactionCounter::default(), RuleFilter::All)?;

    let progress = RunProgressBar::new();
    let reporter = ProgressReporter::with_callback(progress.callback());

    println!(
        "Running {} iterations (dt = {:e} s, seed {})...",
        plan.iterations, model_config.simulation.time_step, model_config.simulation.seed
    );
    info!(output_dir = %model_config.output_dir.display(), "Invoking the core run workflow...");

    let summary = tokio::task::block_in_place(|| {
        workflows::run::run(&mut simulation, &plan, &reporter)
    })?;

    println!(
        "Simulated {:.6} s: {} particles, {} released, {} absorbed, {} reactions.",
        summary.final_time, summary.particles, summary.released, summary.absorbed, summary.reactions
    );
    if let Some(counter) = simulation.listener(counter) {
        println!("Reaction events observed: {}", counter.total());
        for (rule, fired) in counter.by_rule() {
            println!("  {rule}: {fired}");
        }
    }
    for (_, count) in simulation.counts() {
        if let (Some(file), Some(last)) = (&count.spec().file, count.series().last()) {
            println!("  {} = {} -> {}", count.spec().name, last.count, file.display());
        }
    }
    if summary.degraded {
        warn!(warnings = summary.warnings, "Run finished with numerical warnings.");
        println!(
            "Warning: {} numerical warning(s) were raised; results may be inaccurate.",
            summary.warnings
        );
    }
    Ok(())
}
