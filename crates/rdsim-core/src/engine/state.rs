use crate::core::models::ids::ReactionRuleId;
use std::collections::HashMap;
use std::fmt;
use tracing::warn;

/// Warnings beyond this many are counted but not stored.
const MAX_STORED_WARNINGS: usize = 1000;

/// Lifecycle of a simulation instance. Transitions only move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub enum SimulationPhase {
    #[default]
    Uninitialized,
    Initialized,
    Running,
    Ended,
}

impl fmt::Display for SimulationPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SimulationPhase::Uninitialized => "uninitialized",
            SimulationPhase::Initialized => "initialized",
            SimulationPhase::Running => "running",
            SimulationPhase::Ended => "ended",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WarningKind {
    /// A particle hit the surface-interaction cap within one timestep.
    ReflectionLimit,
    /// A rule's per-step firing probability is too large for the timestep.
    LargeReactionProbability,
    /// A species' step length is comparable to the geometry it moves in.
    LargeDiffusionStep,
    /// A particle could not be kept on its side of a moving surface.
    DeformationPushBack,
}

impl fmt::Display for WarningKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            WarningKind::ReflectionLimit => "reflection limit",
            WarningKind::LargeReactionProbability => "large reaction probability",
            WarningKind::LargeDiffusionStep => "large diffusion step",
            WarningKind::DeformationPushBack => "deformation push-back",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct NumericalWarning {
    pub kind: WarningKind,
    pub iteration: u64,
    /// Serial of the affected particle, if the warning concerns one.
    pub particle: Option<u64>,
    pub message: String,
}

/// Accumulated statistics and numerical-health record of a run.
#[derive(Debug, Clone, Default)]
pub struct RunDiagnostics {
    pub reactions: HashMap<ReactionRuleId, u64>,
    pub released: u64,
    pub absorbed: u64,
    pub warnings: Vec<NumericalWarning>,
    pub suppressed_warnings: u64,
    /// Set once any numerical warning is raised.
    pub degraded: bool,
}

impl RunDiagnostics {
    pub fn record_reaction(&mut self, rule: ReactionRuleId) {
        *self.reactions.entry(rule).or_insert(0) += 1;
    }

    pub fn reactions_fired(&self, rule: ReactionRuleId) -> u64 {
        self.reactions.get(&rule).copied().unwrap_or(0)
    }

    pub fn total_reactions(&self) -> u64 {
        self.reactions.values().sum()
    }

    pub fn record_warning(&mut self, warning: NumericalWarning) {
        self.degraded = true;
        if self.warnings.len() >= MAX_STORED_WARNINGS {
            self.suppressed_warnings += 1;
            return;
        }
        warn!(
            kind = %warning.kind,
            iteration = warning.iteration,
            particle = ?warning.particle,
            "{}",
            warning.message
        );
        self.warnings.push(warning);
    }

    pub fn warning_count(&self, kind: WarningKind) -> usize {
        self.warnings.iter().filter(|w| w.kind == kind).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn warnings_mark_the_run_degraded_and_are_capped() {
        let mut diag = RunDiagnostics::default();
        assert!(!diag.degraded);
        for i in 0..(MAX_STORED_WARNINGS as u64 + 5) {
            diag.record_warning(NumericalWarning {
                kind: WarningKind::ReflectionLimit,
                iteration: i,
                particle: Some(i),
                message: "cap".to_string(),
            });
        }
        assert!(diag.degraded);
        assert_eq!(diag.warnings.len(), MAX_STORED_WARNINGS);
        assert_eq!(diag.suppressed_warnings, 5);
        assert_eq!(diag.warning_count(WarningKind::ReflectionLimit), MAX_STORED_WARNINGS);
    }

    #[test]
    fn phases_are_ordered_by_lifecycle() {
        assert!(SimulationPhase::Uninitialized < SimulationPhase::Initialized);
        assert!(SimulationPhase::Running < SimulationPhase::Ended);
        assert_eq!(SimulationPhase::Running.to_string(), "running");
    }
}
