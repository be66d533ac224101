//! Tests for the metrics module.

use anyhow::Result;
use ductflow::element::{Element, ElementGraph};
use ductflow::metrics::{CounterMetric, GaugeMetric, Metric, MetricsCollector};
use ductflow::operation::{OperationContext, filter_fn};
use ductflow::process::{ENGINE_GROUP, FlowProcess, counters};
use ductflow::tap::{MemorySink, MemorySource};
use ductflow::*;
use serde_json::json;


#[test]
fn test_counter_metric() {
    let mut collector = MetricsCollector::new();
    collector.register(Box::new(CounterMetric::with_value("test_counter", 5)));

    let snapshot = collector.snapshot();
    assert_eq!(snapshot.get("test_counter").unwrap(), &json!(5));
}

#[test]
fn test_gauge_metric() {
    let mut collector = MetricsCollector::new();
    collector.register(Box::new(
        GaugeMetric::new("test_gauge", 42.5).with_description("Test gauge"),
    ));

    let snapshot = collector.snapshot();
    assert_approx_eq!(snapshot["test_gauge"].as_f64().unwrap(), 42.5);
    assert_eq!(
        collector.to_json()["test_gauge"]["description"],
        json!("Test gauge")
    );
}

#[test]
fn test_increment_counter() {
    let collector = MetricsCollector::new();
    collector.increment_counter("requests", 1);
    collector.increment_counter("requests", 5);

    assert_eq!(collector.counter("requests"), 6);
    assert_eq!(collector.counter("never"), 0);
}

#[test]
fn test_increment_leaves_other_metrics_alone() {
    let mut collector = MetricsCollector::new();
    collector.register(Box::new(GaugeMetric::new("load", 0.5)));
    collector.increment_counter("load", 3);

    assert_approx_eq!(collector.snapshot()["load"].as_f64().unwrap(), 0.5);
}

#[test]
fn test_clones_share_metrics() {
    let collector = MetricsCollector::new();
    let handle = collector.clone();
    handle.increment_counter("shared", 2);
    assert_eq!(collector.counter("shared"), 2);
}

#[test]
fn test_custom_metric_downcasts() {
    let metric: Box<dyn Metric> = Box::new(CounterMetric::new("custom"));
    let counter = metric.as_any().downcast_ref::<CounterMetric>().unwrap();
    counter.add(7);
    assert_eq!(counter.get(), 7);
    assert_eq!(metric.value(), json!(7));
}

#[test]
fn test_save_to_file() -> Result<()> {
    let tmp = tempfile::tempdir()?;
    let path = tmp.path().join("metrics.json");
    let collector = MetricsCollector::new();
    collector.record_start();
    collector.increment_counter("tuples.read", 3);
    collector.record_end();
    collector.save_to_file(&path)?;
    collector.log_summary();

    let saved: serde_json::Value = serde_json::from_str(&std::fs::read_to_string(&path)?)?;
    assert_eq!(saved["tuples.read"]["value"], json!(3));
    assert!(saved["execution_time_ms"]["value"].is_u64());
    Ok(())
}

#[test]
fn test_process_groups_counters() {
    let process = FlowProcess::new("job", FlowConfig::default());
    process.increment("app", "seen", 2);
    process.increment("app", "seen", 0);
    assert_eq!(process.counter("app", "seen"), 2);
    assert_eq!(process.metrics().counter("app.seen"), 2);
    assert_eq!(process.name(), "job");
}

#[test]
fn test_flow_records_engine_and_user_counters() -> Result<()> {
    let source = MemorySource::new(
        "rows",
        Fields::names(["n"]),
        (0..10).map(|n| tuple![n]).collect(),
    );
    let sink = MemorySink::new("out");
    let mut graph = ElementGraph::new();
    let rows = graph.add(Element::source("rows", source));
    let even = graph.pipe(
        rows,
        Element::filter("even", CountingEven),
        Scope::new(),
    );
    let grouped = graph.pipe(
        even,
        Element::group_by("by-n"),
        Scope::grouping(0, Fields::names(["n"])),
    );
    graph.pipe(grouped, Element::sink("out", sink.clone()), Scope::new());

    let flow = Flow::new("metrics", graph, FlowConfig::sequential())?;
    let stats = flow.complete()?;
    assert_eq!((stats.read, stats.written), (10, 5));
    assert!(flow.metrics().elapsed().is_some());

    let process = flow.process();
    assert_eq!(process.counter(ENGINE_GROUP, counters::TUPLES_READ), 10);
    assert_eq!(process.counter(ENGINE_GROUP, counters::GROUPS_EMITTED), 5);
    assert_eq!(process.counter("app", "odd"), 5);

    flow.complete()?;
    assert_eq!(process.counter(ENGINE_GROUP, counters::TUPLES_READ), 20);
    Ok(())
}

/// Keeps even numbers and counts the odd ones it drops.
struct CountingEven;

impl ductflow::operation::Filter for CountingEven {
    fn is_remove(&self, ctx: &OperationContext<'_>, arguments: &dyn TupleLike) -> Result<bool> {
        let odd = arguments.get(0).as_i64().is_some_and(|n| n % 2 != 0);
        if odd {
            ctx.process.increment("app", "odd", 1);
        }
        Ok(odd)
    }
}

#[test]
fn test_filter_fn_needs_no_context() -> Result<()> {
    let source = MemorySource::new("rows", Fields::names(["n"]), vec![tuple![1], tuple![2]]);
    let sink = MemorySink::new("out");
    let mut graph = ElementGraph::new();
    let rows = graph.add(Element::source("rows", source));
    let kept = graph.pipe(
        rows,
        Element::filter("big", filter_fn(|t| t.get(0).as_i64() > Some(1))),
        Scope::new(),
    );
    graph.pipe(kept, Element::sink("out", sink.clone()), Scope::new());
    let stats = Flow::new("filter", graph, FlowConfig::sequential())?.complete()?;
    assert_eq!(stats.written, 1);
    Ok(())
}
