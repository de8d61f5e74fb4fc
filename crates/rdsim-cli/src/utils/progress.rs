use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use rdsim::engine::progress::{Progress, ProgressCallback};
use std::time::Duration;

const SPINNER_TICK_MS: u64 = 80;

/// Renders run progress on stderr: a spinner while the model initializes, then a bar
/// over the iterations showing the live particle count.
#[derive(Clone)]
pub struct RunProgressBar {
    bar: ProgressBar,
}

impl RunProgressBar {
    pub fn new() -> Self {
        Self::with_target(ProgressDrawTarget::stderr())
    }

    fn with_target(target: ProgressDrawTarget) -> Self {
        Self {
            bar: ProgressBar::with_draw_target(None, target),
        }
    }

    pub fn callback(&self) -> ProgressCallback<'static> {
        let bar = self.bar.clone();
        Box::new(move |progress| match progress {
            Progress::PhaseStart { name } => {
                bar.set_style(spinner_style());
                bar.set_message(name);
                bar.enable_steady_tick(Duration::from_millis(SPINNER_TICK_MS));
            }
            Progress::PhaseFinish => bar.disable_steady_tick(),
            Progress::RunStart { total_iterations } => {
                bar.reset();
                bar.set_length(total_iterations);
                bar.set_style(iteration_style());
                bar.set_message("starting");
            }
            Progress::IterationDone { particles, .. } => {
                bar.inc(1);
                bar.set_message(format!("{particles} particles"));
            }
            Progress::RunFinish => bar.finish(),
        })
    }
}

impl Default for RunProgressBar {
    fn default() -> Self {
        Self::new()
    }
}

fn spinner_style() -> ProgressStyle {
    ProgressStyle::with_template("{spinner:.green} {msg}").unwrap_or_else(|_| ProgressStyle::default_spinner())
}

fn iteration_style() -> ProgressStyle {
    ProgressStyle::with_template("[{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} iterations, {msg} ({eta})")
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("##-")
}
