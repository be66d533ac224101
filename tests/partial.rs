// tests/partial.rs
use anyhow::Result;
use ductflow::element::{Element, ElementGraph};
use ductflow::operation::Aggregator;
use ductflow::partial::{
    AggregateBy, CacheFactory, CountBy, DirectMappedCacheFactory, FirstBy, Functor,
    LruCacheFactory, MinBy, SumBy,
};
use ductflow::process::{ENGINE_GROUP, counters};
use ductflow::tap::{MemorySink, MemorySource};
use ductflow::testing::assert_tuples_equal;
use ductflow::trap::CollectingTrap;
use ductflow::*;
use proptest::prelude::*;
use std::collections::BTreeMap;
use std::sync::Arc;

fn run_sum_count(
    rows: Vec<Tuple>,
    capacity: usize,
    factory: impl CacheFactory + 'static,
) -> Result<(Vec<Tuple>, Flow)> {
    let sink = MemorySink::new("out");
    let mut graph = ElementGraph::new();
    let source = graph.add(Element::source(
        "rows",
        MemorySource::new("rows", Fields::names(["k", "v"]), rows),
    ));
    let aggregated = AggregateBy::new("agg", Fields::names(["k"]))
        .part(SumBy::new("sum"), Fields::names(["v"]))
        .part(CountBy::new("count"), Fields::names(["v"]))
        .capacity(capacity)
        .cache_factory(factory)
        .expand(&mut graph, source)?;
    graph.pipe(aggregated, Element::sink("out", sink.clone()), Scope::new());
    let flow = Flow::new("partial", graph, FlowConfig::sequential())?;
    flow.complete()?;
    Ok((sink.rows(), flow))
}

fn expected(rows: &[Tuple]) -> Vec<Tuple> {
    let mut totals: BTreeMap<i64, (i64, i64)> = BTreeMap::new();
    for row in rows {
        let entry = totals.entry(row[0].as_i64().unwrap()).or_default();
        entry.0 += row[1].as_i64().unwrap();
        entry.1 += 1;
    }
    totals
        .into_iter()
        .map(|(k, (sum, count))| tuple![k, sum, count])
        .collect()
}

fn keyed_rows() -> impl Strategy<Value = Vec<Tuple>> {
    prop::collection::vec((0i64..12, -50i64..50), 1..80)
        .prop_map(|pairs| pairs.into_iter().map(|(k, v)| tuple![k, v]).collect())
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn lru_cache_completes_every_key_once(rows in keyed_rows(), capacity in 1usize..8) {
        let (out, flow) = run_sum_count(rows.clone(), capacity, LruCacheFactory).unwrap();
        prop_assert_eq!(out, expected(&rows));

        let process = flow.process();
        let missed = process.counter(ENGINE_GROUP, counters::KEYS_MISSED);
        let evicted = process.counter(ENGINE_GROUP, counters::KEYS_EVICTED);
        let flushed = process.counter(ENGINE_GROUP, counters::KEYS_FLUSHED);
        let hit = process.counter(ENGINE_GROUP, counters::KEYS_HIT);
        prop_assert_eq!(missed, evicted + flushed);
        prop_assert_eq!(hit + missed, rows.len() as u64);
        prop_assert!(flushed <= capacity as u64);
    }

    #[test]
    fn direct_mapped_cache_completes_every_key_once(rows in keyed_rows(), capacity in 1usize..8) {
        let (out, _) = run_sum_count(rows.clone(), capacity, DirectMappedCacheFactory).unwrap();
        prop_assert_eq!(out, expected(&rows));
    }
}

#[test]
fn large_cache_never_evicts() -> Result<()> {
    let rows: Vec<Tuple> = (0..100).map(|i| tuple![i % 5, 1]).collect();
    let (out, flow) = run_sum_count(rows.clone(), 1_000, LruCacheFactory)?;
    assert_tuples_equal(&out, &expected(&rows));
    let process = flow.process();
    assert_eq!(process.counter(ENGINE_GROUP, counters::KEYS_EVICTED), 0);
    assert_eq!(process.counter(ENGINE_GROUP, counters::KEYS_FLUSHED), 5);
    assert_eq!(process.counter(ENGINE_GROUP, counters::KEYS_HIT), 95);
    Ok(())
}

#[test]
fn min_and_first_merge_across_evictions() -> Result<()> {
    let rows = vec![
        tuple!["a", 5, "x"],
        tuple!["b", 1, "y"],
        tuple!["a", 2, "z"],
        tuple!["a", Value::Null, "w"],
    ];
    let sink = MemorySink::new("out");
    let mut graph = ElementGraph::new();
    let source = graph.add(Element::source(
        "rows",
        MemorySource::new("rows", Fields::names(["k", "v", "tag"]), rows),
    ));
    let aggregated = AggregateBy::new("agg", Fields::names(["k"]))
        .part(MinBy::new("min"), Fields::names(["v"]))
        .part(FirstBy::new(Fields::names(["first"])), Fields::names(["tag"]))
        .capacity(1)
        .expand(&mut graph, source)?;
    graph.pipe(aggregated, Element::sink("out", sink.clone()), Scope::new());

    Flow::new("min-first", graph, FlowConfig::sequential())?.complete()?;
    assert_tuples_equal(&sink.rows(), &[tuple!["a", 2, "x"], tuple!["b", 1, "y"]]);
    Ok(())
}

#[test]
fn aggregate_by_needs_parts_and_an_explicit_key() {
    let mut graph = ElementGraph::new();
    let source = graph.add(Element::source(
        "rows",
        MemorySource::new("rows", Fields::names(["k", "v"]), vec![]),
    ));
    let no_parts = AggregateBy::new("agg", Fields::names(["k"])).expand(&mut graph, source);
    assert!(matches!(no_parts, Err(FlowError::Config(_))));

    let all_key = AggregateBy::new("agg", Fields::All)
        .part(SumBy::new("s"), Fields::names(["v"]))
        .expand(&mut graph, source);
    assert!(matches!(all_key, Err(FlowError::Config(_))));
}

#[test]
fn unknown_part_argument_fails_at_prepare() -> Result<()> {
    let mut graph = ElementGraph::new();
    let source = graph.add(Element::source(
        "rows",
        MemorySource::new("rows", Fields::names(["k", "v"]), vec![tuple![1, 1]]),
    ));
    let aggregated = AggregateBy::new("agg", Fields::names(["k"]))
        .part(SumBy::new("s"), Fields::names(["missing"]))
        .expand(&mut graph, source)?;
    graph.pipe(aggregated, Element::sink("out", MemorySink::new("out")), Scope::new());

    let err = Flow::new("bad", graph, FlowConfig::sequential())?
        .complete()
        .expect_err("unresolved argument");
    assert_eq!(err.operator(), Some("agg:partial"));
    Ok(())
}

/// Sums like [`SumBy`] but refuses to complete a total of one.
struct RejectsOne(SumBy);

impl Functor for RejectsOne {
    fn declared_fields(&self) -> Fields {
        self.0.declared_fields()
    }

    fn aggregate(&self, arguments: &dyn TupleLike, prior: Option<&Tuple>) -> anyhow::Result<Tuple> {
        self.0.aggregate(arguments, prior)
    }

    fn complete(&self, accumulator: Tuple) -> anyhow::Result<Tuple> {
        if accumulator[0].as_i64() == Some(1) {
            anyhow::bail!("total of one");
        }
        Ok(accumulator)
    }

    fn merger(&self) -> Arc<dyn Aggregator> {
        self.0.merger()
    }
}

#[test]
fn failed_completion_traps_its_key_and_keeps_the_others() -> Result<()> {
    // capacity 1 completes on eviction, capacity 10 while draining
    for capacity in [1, 10] {
        let sink = MemorySink::new("out");
        let trap = CollectingTrap::new();
        let mut graph = ElementGraph::new();
        let source = graph.add(Element::source(
            "rows",
            MemorySource::new(
                "rows",
                Fields::names(["k", "v"]),
                vec![tuple!["a", 1], tuple!["b", 2], tuple!["c", 3]],
            ),
        ));
        let aggregated = AggregateBy::new("agg", Fields::names(["k"]))
            .part(RejectsOne(SumBy::new("sum")), Fields::names(["v"]))
            .capacity(capacity)
            .expand(&mut graph, source)?;
        graph.pipe(aggregated, Element::sink("out", sink.clone()), Scope::new());
        graph.trap("rows", trap.clone());

        let stats = Flow::new("rejects", graph, FlowConfig::sequential())?.complete()?;
        assert_tuples_equal(&sink.rows(), &[tuple!["b", 2], tuple!["c", 3]]);
        assert_eq!(stats.trapped, 1, "capacity {capacity}");
        assert_eq!(trap.tuples(), vec![tuple!["a"]], "capacity {capacity}");
        let errors = trap.take();
        assert_eq!(errors[0].operator(), Some("agg:partial"));
    }
    Ok(())
}

#[test]
fn failed_completion_aborts_under_the_default_trap() -> Result<()> {
    let mut graph = ElementGraph::new();
    let source = graph.add(Element::source(
        "rows",
        MemorySource::new("rows", Fields::names(["k", "v"]), vec![tuple!["a", 1], tuple!["b", 2]]),
    ));
    let aggregated = AggregateBy::new("agg", Fields::names(["k"]))
        .part(RejectsOne(SumBy::new("sum")), Fields::names(["v"]))
        .expand(&mut graph, source)?;
    graph.pipe(aggregated, Element::sink("out", MemorySink::new("out")), Scope::new());

    let err = Flow::new("abort", graph, FlowConfig::sequential())?
        .complete()
        .expect_err("default trap aborts");
    assert!(matches!(
        &err,
        FlowError::Operator { operator, tuple: Some(t), .. } if operator == "agg:partial" && *t == tuple!["a"]
    ));
    Ok(())
}
