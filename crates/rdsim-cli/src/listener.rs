use rdsim::engine::callbacks::{CallbackError, ReactionEvent, ReactionListener};
use std::collections::BTreeMap;
use tracing::debug;

/// Counts fired reactions per rule name and logs each one at debug level.
#[derive(Debug, Default)]
pub struct ReactionCounter {
    total: u64,
    by_rule: BTreeMap<String, u64>,
}

impl ReactionCounter {
    pub fn total(&self) -> u64 {
        self.total
    }

    pub fn by_rule(&self) -> &BTreeMap<String, u64> {
        &self.by_rule
    }
}

impl ReactionListener for ReactionCounter {
    fn on_reaction(&mut self, event: &ReactionEvent) -> Result<(), CallbackError> {
        self.total += 1;
        let count = self.by_rule.entry(event.rule_name.clone()).or_insert(0);
        *count += 1;
        debug!(
            rule = %event.rule_name,
            iteration = event.iteration,
            count = *count,
            "Reaction fired."
        );
        Ok(())
    }
}
