//! Running a compiled duct graph.

use crate::config::{ExecMode, FlowConfig};
use crate::duct::StreamGraph;
use crate::duct::compile::compile;
use crate::element::{Edge, ElementGraph};
use crate::error::{FlowError, Result};
use crate::metrics::MetricsCollector;
use crate::process::{ENGINE_GROUP, FlowProcess, counters};
use crate::stage::SourceStage;
use crate::trap::TrapHandler;
use log::{info, warn};
use rayon::prelude::*;
use std::sync::Arc;
use std::time::Duration;

/// Totals of one [`Flow::complete`] run.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FlowStats {
    pub read: u64,
    pub written: u64,
    /// Records dropped by a trap that let the run continue.
    pub trapped: u64,
    pub elapsed: Duration,
}

/// A compiled, runnable flow.
///
/// Compilation happens once in [`Flow::new`]; [`Flow::complete`] can then be called
/// any number of times, each call reading every source again from the start.
pub struct Flow {
    name: String,
    process: Arc<FlowProcess>,
    graph: StreamGraph,
    edges: Vec<Edge>,
    traps: Vec<Arc<dyn TrapHandler>>,
}

impl Flow {
    pub fn new(name: impl Into<String>, elements: ElementGraph, config: FlowConfig) -> Result<Self> {
        let name = name.into();
        config.validate()?;
        let process = Arc::new(FlowProcess::new(name.as_str(), config));
        let compiled = compile(&elements, &process)?;
        compiled.graph.bind()?;
        compiled.graph.initialize()?;
        info!(
            "flow '{name}' planned: {} elements, {} ducts, {} sources",
            elements.len(),
            compiled.graph.len(),
            compiled.graph.sources().len()
        );
        Ok(Self {
            name,
            process,
            graph: compiled.graph,
            edges: compiled.edges,
            traps: elements.traps().values().cloned().collect(),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Runs the flow to completion.
    ///
    /// Cleanup runs and every trap is closed whatever the outcome. The first fatal
    /// error is returned; failures during cleanup that follow it are only logged.
    pub fn complete(&self) -> Result<FlowStats> {
        let metrics = self.process.metrics();
        let before = self.totals();
        metrics.record_start();
        info!("flow '{}' starting", self.name);

        let outcome = self.graph.prepare().and_then(|()| self.drive());

        let mut secondary = self.graph.cleanup();
        secondary.extend(self.traps.iter().filter_map(|t| t.close().err()));
        metrics.record_end();

        let outcome = match outcome {
            Ok(()) if !secondary.is_empty() => Err(secondary.remove(0)),
            other => other,
        };
        for error in &secondary {
            warn!("flow '{}': secondary failure during cleanup: {error}", self.name);
        }

        let after = self.totals();
        let stats = FlowStats {
            read: after.read - before.read,
            written: after.written - before.written,
            trapped: after.trapped - before.trapped,
            elapsed: metrics.elapsed().unwrap_or_default(),
        };
        match outcome {
            Ok(()) => {
                info!(
                    "flow '{}' completed in {:?}: read {}, written {}, trapped {}",
                    self.name, stats.elapsed, stats.read, stats.written, stats.trapped
                );
                metrics.log_summary();
                Ok(stats)
            }
            Err(error) => {
                info!("flow '{}' failed after {:?}: {error}", self.name, stats.elapsed);
                Err(error)
            }
        }
    }

    fn drive(&self) -> Result<()> {
        let sources = self.graph.sources();
        sources.iter().try_for_each(|s| s.start_run())?;
        match self.process.config().mode {
            ExecMode::Sequential => sources.iter().try_for_each(|s| drive_one(s)),
            mode @ ExecMode::Parallel { .. } => {
                let pool = rayon::ThreadPoolBuilder::new()
                    .num_threads(mode.threads_for(sources.len()))
                    .thread_name(|i| format!("ductflow-source-{i}"))
                    .build()
                    .map_err(|e| FlowError::Config(format!("cannot build source pool: {e}")))?;
                let outcomes: Vec<Result<()>> =
                    pool.install(|| sources.par_iter().map(|s| drive_one(s)).collect());
                outcomes.into_iter().collect()
            }
        }
    }

    fn totals(&self) -> FlowStats {
        let counter = |name| self.process.counter(ENGINE_GROUP, name);
        FlowStats {
            read: counter(counters::TUPLES_READ),
            written: counter(counters::TUPLES_WRITTEN),
            trapped: counter(counters::TUPLES_TRAPPED),
            elapsed: Duration::ZERO,
        }
    }

    pub fn metrics(&self) -> &MetricsCollector {
        self.process.metrics()
    }

    pub fn process(&self) -> &Arc<FlowProcess> {
        &self.process
    }

    /// Edges of the compiled element graph, with branch names and field declarations
    /// resolved; assertions stripped at the configured level are gone.
    pub fn edges(&self) -> &[Edge] {
        &self.edges
    }

    /// The duct graph in topological order, one duct per line.
    pub fn explain(&self) -> String {
        self.graph.explain()
    }
}

fn drive_one(source: &SourceStage) -> Result<()> {
    source.run()?;
    source.complete_run()
}
