//! Runtime configuration for a [`Flow`](crate::flow::Flow).
//!
//! [`FlowConfig`] is plain data: build it in code with the `with_*` methods or load it
//! from JSON. Every field has a named default, so `{}` is a valid configuration.
//!
//! ```
//! use ductflow::{AssertionLevel, ExecMode, FlowConfig};
//!
//! let config = FlowConfig::from_json(r#"{ "mode": "Sequential", "assertion_level": "Strict" }"#)?;
//! assert_eq!(config.mode, ExecMode::Sequential);
//! assert_eq!(config.assertion_level, AssertionLevel::Strict);
//! assert_eq!(config.aggregate_by_capacity, 10_000);
//! # Ok::<(), ductflow::FlowError>(())
//! ```

use crate::error::{FlowError, Result};
use serde::{Deserialize, Serialize};

/// Default number of keys held by an [`AggregateBy`](crate::partial::AggregateBy) cache.
pub const DEFAULT_AGGREGATE_BY_CAPACITY: usize = 10_000;

/// How sources are driven.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExecMode {
    /// Drive every source on the calling thread, one after another.
    Sequential,
    /// Drive sources concurrently on a dedicated rayon pool.
    ///
    /// `threads: None` sizes the pool from the number of CPUs.
    Parallel { threads: Option<usize> },
}

impl Default for ExecMode {
    fn default() -> Self {
        ExecMode::Parallel { threads: None }
    }
}

impl ExecMode {
    /// Worker threads to use for `sources` independent sources.
    pub fn threads_for(&self, sources: usize) -> usize {
        match self {
            ExecMode::Sequential => 1,
            ExecMode::Parallel { threads } => threads
                .unwrap_or_else(num_cpus::get)
                .clamp(1, sources.max(1)),
        }
    }
}

/// Which assertions survive compilation.
///
/// Assertions are tagged `Strict` or `Valid`. A flow running at `Valid` keeps only
/// `Valid` assertions; `Strict` keeps both; `None` strips them all.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum AssertionLevel {
    None,
    Valid,
    #[default]
    Strict,
}

impl AssertionLevel {
    /// Whether an assertion tagged `tagged` runs under this flow level.
    pub fn permits(self, tagged: AssertionLevel) -> bool {
        tagged != AssertionLevel::None && tagged <= self
    }
}

/// Flow-wide settings.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FlowConfig {
    pub mode: ExecMode,
    pub assertion_level: AssertionLevel,
    pub aggregate_by_capacity: usize,
}

impl Default for FlowConfig {
    fn default() -> Self {
        Self {
            mode: ExecMode::default(),
            assertion_level: AssertionLevel::default(),
            aggregate_by_capacity: DEFAULT_AGGREGATE_BY_CAPACITY,
        }
    }
}

impl FlowConfig {
    /// A sequential configuration, convenient for deterministic tests.
    pub fn sequential() -> Self {
        Self::default().with_mode(ExecMode::Sequential)
    }

    #[must_use]
    pub fn with_mode(mut self, mode: ExecMode) -> Self {
        self.mode = mode;
        self
    }

    #[must_use]
    pub fn with_assertion_level(mut self, level: AssertionLevel) -> Self {
        self.assertion_level = level;
        self
    }

    #[must_use]
    pub fn with_aggregate_by_capacity(mut self, capacity: usize) -> Self {
        self.aggregate_by_capacity = capacity;
        self
    }

    /// Parses and validates a JSON configuration.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: FlowConfig =
            serde_json::from_str(json).map_err(|e| FlowError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.aggregate_by_capacity == 0 {
            return Err(FlowError::Config(
                "aggregate_by_capacity must be at least 1".to_string(),
            ));
        }
        if let ExecMode::Parallel { threads: Some(0) } = self.mode {
            return Err(FlowError::Config(
                "parallel mode needs at least one thread".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strict_permits_valid_but_not_the_reverse() {
        assert!(AssertionLevel::Strict.permits(AssertionLevel::Valid));
        assert!(AssertionLevel::Strict.permits(AssertionLevel::Strict));
        assert!(AssertionLevel::Valid.permits(AssertionLevel::Valid));
        assert!(!AssertionLevel::Valid.permits(AssertionLevel::Strict));
        assert!(!AssertionLevel::None.permits(AssertionLevel::Valid));
    }

    #[test]
    fn empty_json_is_default() {
        assert_eq!(FlowConfig::from_json("{}").unwrap(), FlowConfig::default());
    }

    #[test]
    fn rejects_zero_capacity() {
        let err = FlowConfig::from_json(r#"{ "aggregate_by_capacity": 0 }"#).unwrap_err();
        assert!(matches!(err, FlowError::Config(_)));
    }

    #[test]
    fn parallel_threads_are_bounded_by_sources() {
        let mode = ExecMode::Parallel { threads: Some(8) };
        assert_eq!(mode.threads_for(3), 3);
        assert_eq!(ExecMode::Sequential.threads_for(3), 1);
    }
}
