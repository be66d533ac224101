//! The runtime handle shared by every duct of a flow.

use crate::config::FlowConfig;
use crate::metrics::MetricsCollector;

/// Counter group used by the engine itself.
pub const ENGINE_GROUP: &str = "ductflow";

/// Built-in counter names (within [`ENGINE_GROUP`]).
pub mod counters {
    pub const TUPLES_READ: &str = "tuples.read";
    pub const TUPLES_WRITTEN: &str = "tuples.written";
    pub const TUPLES_TRAPPED: &str = "tuples.trapped";
    pub const GROUPS_EMITTED: &str = "groups.emitted";
    pub const KEYS_HIT: &str = "partial.keys_hit";
    pub const KEYS_MISSED: &str = "partial.keys_missed";
    pub const KEYS_EVICTED: &str = "partial.keys_evicted";
    pub const KEYS_FLUSHED: &str = "partial.keys_flushed";
}

/// Per-flow process context: configuration plus the counter-increment interface.
///
/// Operations receive it through
/// [`OperationContext`](crate::operation::OperationContext) and may record their own
/// counters under any group name.
pub struct FlowProcess {
    name: String,
    config: FlowConfig,
    metrics: MetricsCollector,
}

impl FlowProcess {
    pub fn new(name: impl Into<String>, config: FlowConfig) -> Self {
        Self {
            name: name.into(),
            config,
            metrics: MetricsCollector::new(),
        }
    }

    /// Name of the flow this process runs.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &FlowConfig {
        &self.config
    }

    pub fn metrics(&self) -> &MetricsCollector {
        &self.metrics
    }

    /// Adds `amount` to the counter `group.counter`.
    pub fn increment(&self, group: &str, counter: &str, amount: u64) {
        if amount > 0 {
            self.metrics
                .increment_counter(&counter_name(group, counter), amount);
        }
    }

    /// Current value of `group.counter`.
    pub fn counter(&self, group: &str, counter: &str) -> u64 {
        self.metrics.counter(&counter_name(group, counter))
    }

    pub(crate) fn increment_engine(&self, counter: &str, amount: u64) {
        self.increment(ENGINE_GROUP, counter, amount);
    }
}

fn counter_name(group: &str, counter: &str) -> String {
    format!("{group}.{counter}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_are_grouped() {
        let process = FlowProcess::new("test", FlowConfig::default());
        process.increment("app", "rows", 2);
        process.increment("app", "rows", 3);
        process.increment_engine(counters::TUPLES_READ, 1);
        assert_eq!(process.counter("app", "rows"), 5);
        assert_eq!(process.counter(ENGINE_GROUP, counters::TUPLES_READ), 1);
        assert_eq!(process.counter("app", "missing"), 0);
    }
}
