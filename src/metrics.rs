//! Metrics collection and reporting for flow execution.
//!
//! Every [`Flow`](crate::flow::Flow) owns a [`MetricsCollector`]. Ducts increment named
//! counters through [`FlowProcess`](crate::process::FlowProcess) while records stream
//! through the graph; the collector can then be snapshotted, logged or saved as JSON.
//!
//! - [`Metric`] is the interface for custom metrics.
//! - [`CounterMetric`] is the built-in monotonically increasing counter.
//! - [`GaugeMetric`] holds a single numeric reading.
//!
//! Counter names are `"{group}.{counter}"`, for example `"ductflow.partial.keys_hit"`.
//!
//! # Example
//!
//! ```
//! use ductflow::metrics::{CounterMetric, MetricsCollector};
//! use serde_json::json;
//!
//! let mut metrics = MetricsCollector::new();
//! metrics.register(Box::new(CounterMetric::with_value("tuples.read", 3)));
//! metrics.increment_counter("tuples.read", 2);
//! assert_eq!(metrics.snapshot()["tuples.read"], json!(5));
//! ```

use crate::utils::lock;
use anyhow::Result;
use log::debug;
use serde_json::{Value, json};
use std::any::Any;
use std::collections::HashMap;
use std::fs::File;
use std::io::Write;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// Trait for custom metrics.
pub trait Metric: Send + Sync + Any {
    /// The name of this metric (e.g., `ductflow.tuples.read`).
    fn name(&self) -> &str;

    /// The current value of this metric as a JSON value.
    fn value(&self) -> Value;

    /// Optional description of what this metric measures.
    fn description(&self) -> Option<&str> {
        None
    }

    /// Cast to Any for downcasting.
    fn as_any(&self) -> &dyn Any;
}

/// Thread-safe container for flow execution metrics.
///
/// Cloning a collector yields another handle onto the same metrics.
#[derive(Clone)]
pub struct MetricsCollector {
    inner: Arc<Mutex<MetricsCollectorInner>>,
}

struct MetricsCollectorInner {
    metrics: HashMap<String, Box<dyn Metric>>,
    start_time: Option<Instant>,
    end_time: Option<Instant>,
}

impl MetricsCollector {
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(MetricsCollectorInner {
                metrics: HashMap::new(),
                start_time: None,
                end_time: None,
            })),
        }
    }

    /// Register a custom metric, replacing any metric with the same name.
    pub fn register(&mut self, metric: Box<dyn Metric>) {
        let mut inner = lock(&self.inner);
        inner.metrics.insert(metric.name().to_string(), metric);
    }

    /// Record the start time of a run.
    pub fn record_start(&self) {
        let mut inner = lock(&self.inner);
        inner.start_time = Some(Instant::now());
        inner.end_time = None;
    }

    /// Record the end time of a run.
    pub fn record_end(&self) {
        lock(&self.inner).end_time = Some(Instant::now());
    }

    /// Elapsed time of the last run, if it has finished.
    #[must_use]
    pub fn elapsed(&self) -> Option<Duration> {
        let inner = lock(&self.inner);
        match (inner.start_time, inner.end_time) {
            (Some(start), Some(end)) => Some(end.duration_since(start)),
            _ => None,
        }
    }

    /// Increment a counter metric by name, creating it on first use.
    ///
    /// A non-counter metric registered under `name` is left untouched.
    pub fn increment_counter(&self, name: &str, value: u64) {
        let mut inner = lock(&self.inner);
        match inner.metrics.get(name) {
            Some(metric) => {
                if let Some(counter) = metric.as_any().downcast_ref::<CounterMetric>() {
                    counter.add(value);
                }
            }
            None => {
                inner.metrics.insert(
                    name.to_string(),
                    Box::new(CounterMetric::with_value(name, value)),
                );
            }
        }
    }

    /// Current value of a counter, or `0` if it was never incremented.
    #[must_use]
    pub fn counter(&self, name: &str) -> u64 {
        lock(&self.inner)
            .metrics
            .get(name)
            .and_then(|m| m.as_any().downcast_ref::<CounterMetric>())
            .map_or(0, CounterMetric::get)
    }

    /// Get all metrics as a JSON object.
    #[must_use]
    pub fn to_json(&self) -> Value {
        let inner = lock(&self.inner);
        let mut metrics_json = serde_json::Map::new();

        for (name, metric) in &inner.metrics {
            let mut metric_obj = serde_json::Map::new();
            metric_obj.insert("value".to_string(), metric.value());
            if let Some(desc) = metric.description() {
                metric_obj.insert("description".to_string(), json!(desc));
            }
            metrics_json.insert(name.clone(), Value::Object(metric_obj));
        }

        if let (Some(start), Some(end)) = (inner.start_time, inner.end_time) {
            metrics_json.insert(
                "execution_time_ms".to_string(),
                json!({
                    "value": end.duration_since(start).as_millis(),
                    "description": "Total flow execution time in milliseconds",
                }),
            );
        }
        Value::Object(metrics_json)
    }

    /// Logs every metric at debug level, sorted by name.
    pub fn log_summary(&self) {
        if let Some(elapsed) = self.elapsed() {
            debug!("execution time: {:.3}s", elapsed.as_secs_f64());
        }
        let inner = lock(&self.inner);
        let mut sorted: Vec<_> = inner.metrics.iter().collect();
        sorted.sort_by_key(|(name, _)| *name);
        for (name, metric) in sorted {
            match metric.description() {
                Some(desc) => debug!("{name}: {} ({desc})", metric.value()),
                None => debug!("{name}: {}", metric.value()),
            }
        }
    }

    /// Save all metrics to a JSON file.
    ///
    /// # Errors
    ///
    /// Fails if the file cannot be created or written to.
    pub fn save_to_file(&self, path: impl AsRef<Path>) -> Result<()> {
        let formatted = serde_json::to_string_pretty(&self.to_json())?;
        let mut file = File::create(path)?;
        file.write_all(formatted.as_bytes())?;
        Ok(())
    }

    /// Snapshot of all metric names and values.
    #[must_use]
    pub fn snapshot(&self) -> HashMap<String, Value> {
        lock(&self.inner)
            .metrics
            .iter()
            .map(|(name, metric)| (name.clone(), metric.value()))
            .collect()
    }
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}

/// A monotonically increasing counter.
pub struct CounterMetric {
    name: String,
    count: AtomicU64,
}

impl CounterMetric {
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_value(name, 0)
    }

    pub fn with_value(name: impl Into<String>, count: u64) -> Self {
        Self {
            name: name.into(),
            count: AtomicU64::new(count),
        }
    }

    pub fn add(&self, value: u64) {
        self.count.fetch_add(value, Ordering::Relaxed);
    }

    pub fn get(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }
}

impl Metric for CounterMetric {
    fn name(&self) -> &str {
        &self.name
    }

    fn value(&self) -> Value {
        json!(self.get())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// A gauge metric that holds a single numeric value.
pub struct GaugeMetric {
    name: String,
    value: f64,
    description: Option<String>,
}

impl GaugeMetric {
    pub fn new(name: impl Into<String>, value: f64) -> Self {
        Self {
            name: name.into(),
            value,
            description: None,
        }
    }

    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

impl Metric for GaugeMetric {
    fn name(&self) -> &str {
        &self.name
    }

    fn value(&self) -> Value {
        json!(self.value)
    }

    fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
