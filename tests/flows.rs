// tests/flows.rs
use anyhow::{Result, anyhow};
use ductflow::element::{Element, ElementGraph};
use ductflow::operation::{
    AssertGroupSizeLessThan, AssertNotNull, Average, Collector, Count, FirstN, Sum, buffer_fn,
    filter_fn, function_fn,
};
use ductflow::partial::{AggregateBy, AverageBy, CountBy, MaxBy, SumBy};
use ductflow::process::{ENGINE_GROUP, counters};
use ductflow::tap::{MemorySink, MemorySource};
use ductflow::testing::{TestRows, assert_tuples_equal, assert_tuples_unordered_equal};
use ductflow::trap::CollectingTrap;
use ductflow::*;

fn words() -> MemorySource {
    MemorySource::new(
        "words",
        Fields::names(["word", "n"]),
        vec![tuple!["a", 1], tuple!["b", 2], tuple!["a", 3]],
    )
}

fn sum_by_word(source: MemorySource, sink: &MemorySink) -> ElementGraph {
    let mut graph = ElementGraph::new();
    let words = graph.add(Element::source("words", source));
    let grouped = graph.pipe(
        words,
        Element::group_by("by-word"),
        Scope::grouping(0, Fields::names(["word"])),
    );
    let summed = graph.pipe(
        grouped,
        Element::aggregator("sum", Sum::new("total")),
        Scope::new().with_arguments(Fields::names(["n"])),
    );
    graph.pipe(summed, Element::sink("out", sink.clone()), Scope::new());
    graph
}

#[test]
fn group_by_sums_each_key_once() -> Result<()> {
    let sink = MemorySink::new("out");
    let flow = Flow::new("sum", sum_by_word(words(), &sink), FlowConfig::sequential())?;
    let stats = flow.complete()?;

    assert_tuples_equal(&sink.rows(), &[tuple!["a", 4], tuple!["b", 2]]);
    assert_eq!(stats.read, 3);
    assert_eq!(stats.written, 2);
    assert_eq!(stats.trapped, 0);
    Ok(())
}

#[test]
fn flow_runs_again_from_scratch() -> Result<()> {
    let source = words();
    let sink = MemorySink::new("out");
    let flow = Flow::new("twice", sum_by_word(source.clone(), &sink), FlowConfig::sequential())?;

    let first = flow.complete()?;
    let rows = sink.rows();
    let second = flow.complete()?;

    assert_eq!(sink.rows(), rows);
    assert_eq!(first.read, second.read);
    assert_eq!(first.written, second.written);
    assert_eq!(source.open_count(), 2);
    assert_eq!(source.close_count(), 2);
    assert_eq!(sink.close_count(), 2);
    Ok(())
}

#[test]
fn chained_aggregators_extend_the_group_result() -> Result<()> {
    let sink = MemorySink::new("out");
    let mut graph = ElementGraph::new();
    let words = graph.add(Element::source("words", words()));
    let grouped = graph.pipe(
        words,
        Element::group_by("by-word"),
        Scope::grouping(0, Fields::names(["word"])),
    );
    let count = graph.pipe(grouped, Element::aggregator("count", Count::new("c")), Scope::new());
    let avg = graph.pipe(
        count,
        Element::aggregator("avg", Average::new("mean")),
        Scope::new().with_arguments(Fields::names(["n"])),
    );
    graph.pipe(avg, Element::sink("out", sink.clone()), Scope::new());

    Flow::new("chain", graph, FlowConfig::sequential())?.complete()?;
    assert_tuples_equal(&sink.rows(), &[tuple!["a", 2, 2.0], tuple!["b", 1, 2.0]]);
    Ok(())
}

#[test]
fn aggregate_by_with_one_slot_sums_every_key_once() -> Result<()> {
    let sink = MemorySink::new("out");
    let mut graph = ElementGraph::new();
    let words = graph.add(Element::source("words", words()));
    let summed = AggregateBy::new("sum", Fields::positions([0]))
        .part(SumBy::new("total"), Fields::names(["n"]))
        .capacity(1)
        .expand(&mut graph, words)?;
    graph.pipe(summed, Element::sink("out", sink.clone()), Scope::new());

    let flow = Flow::new("partial", graph, FlowConfig::sequential())?;
    flow.complete()?;

    assert_tuples_unordered_equal(&sink.rows(), &[tuple!["a", 4], tuple!["b", 2]]);
    let process = flow.process();
    assert_eq!(process.counter(ENGINE_GROUP, counters::KEYS_MISSED), 3);
    assert_eq!(process.counter(ENGINE_GROUP, counters::KEYS_EVICTED), 2);
    assert_eq!(process.counter(ENGINE_GROUP, counters::KEYS_FLUSHED), 1);
    Ok(())
}

#[test]
fn aggregate_by_parts_match_plain_aggregation() -> Result<()> {
    let rows = TestRows::new()
        .add_keyed_range("a", 1..=10)
        .add_keyed_range("b", 5..=7)
        .add_keyed_range("c", 3..=3)
        .build();
    let source = MemorySource::new("nums", Fields::names(["k", "v"]), rows);
    let expected = [
        tuple!["a", 55, 10, 10, 5.5],
        tuple!["b", 18, 3, 7, 6.0],
        tuple!["c", 3, 1, 3, 3.0],
    ];

    for capacity in [1, 2, 100] {
        let sink = MemorySink::new("out");
        let mut graph = ElementGraph::new();
        let nums = graph.add(Element::source("nums", source.clone()));
        let aggregated = AggregateBy::new("stats", Fields::names(["k"]))
            .part(SumBy::new("sum"), Fields::names(["v"]))
            .part(CountBy::new("count"), Fields::names(["v"]))
            .part(MaxBy::new("max"), Fields::names(["v"]))
            .part(AverageBy::new("mean"), Fields::names(["v"]))
            .capacity(capacity)
            .expand(&mut graph, nums)?;
        graph.pipe(aggregated, Element::sink("out", sink.clone()), Scope::new());

        Flow::new("stats", graph, FlowConfig::sequential())?.complete()?;
        assert_tuples_equal(&sink.rows(), &expected);
    }
    Ok(())
}

#[test]
fn aggregate_by_capacity_defaults_from_config() -> Result<()> {
    let sink = MemorySink::new("out");
    let mut graph = ElementGraph::new();
    let words = graph.add(Element::source("words", words()));
    let counted = AggregateBy::new("count", Fields::names(["word"]))
        .part(CountBy::new("rows"), Fields::names(["n"]))
        .expand(&mut graph, words)?;
    graph.pipe(counted, Element::sink("out", sink.clone()), Scope::new());

    let config = FlowConfig::sequential().with_aggregate_by_capacity(1);
    let flow = Flow::new("count", graph, config)?;
    flow.complete()?;
    assert_tuples_equal(&sink.rows(), &[tuple!["a", 2], tuple!["b", 1]]);
    assert_eq!(flow.process().counter(ENGINE_GROUP, counters::KEYS_EVICTED), 2);
    Ok(())
}

fn one_row_flow(scope: Scope, sink: &MemorySink) -> Result<Flow> {
    let source = MemorySource::new(
        "row",
        Fields::names(["a", "b", "c", "d"]),
        vec![tuple![1, 2, 3, 4]],
    );
    let mut graph = ElementGraph::new();
    let row = graph.add(Element::source("row", source));
    let f = graph.pipe(
        row,
        Element::function(
            "f",
            function_fn(Fields::names(["x", "y"]), |_args, out| out.emit(&tuple![9, 8])),
        ),
        scope,
    );
    graph.pipe(f, Element::sink("out", sink.clone()), Scope::new());
    Ok(Flow::new("modes", graph, FlowConfig::sequential())?)
}

#[test]
fn output_selectors_compose_incoming_and_results() -> Result<()> {
    let args = Fields::positions([1, 2]);
    let cases = [
        (Scope::new().with_arguments(args.clone()).with_output(Fields::Replace), tuple![1, 9, 8, 4]),
        (Scope::new().with_arguments(args.clone()).with_output(Fields::Swap), tuple![1, 4, 9, 8]),
        (Scope::new().with_arguments(args.clone()), tuple![9, 8]),
        (Scope::new().with_output(Fields::All), tuple![1, 2, 3, 4, 9, 8]),
        (
            Scope::new().with_output(Fields::names(["y", "a"])),
            tuple![8, 1],
        ),
    ];
    for (scope, expected) in cases {
        let sink = MemorySink::new("out");
        one_row_flow(scope.clone(), &sink)?.complete()?;
        assert_eq!(sink.rows(), vec![expected], "{scope:?}");
    }
    Ok(())
}

#[test]
fn replace_with_mismatched_width_fails_to_compile() {
    let sink = MemorySink::new("out");
    let scope = Scope::new()
        .with_arguments(Fields::positions([1]))
        .with_output(Fields::Replace);
    let err = one_row_flow(scope, &sink).err().expect("compile error");
    let err = err.downcast::<FlowError>().expect("flow error");
    assert!(matches!(
        err,
        FlowError::Fields {
            source: FieldsError::WidthMismatch { .. },
            ..
        }
    ));
}

#[test]
fn filters_and_functions_chain() -> Result<()> {
    let sink = MemorySink::new("out");
    let mut graph = ElementGraph::new();
    let words = graph.add(Element::source("words", words()));
    let odd = graph.pipe(
        words,
        Element::filter("odd", filter_fn(|t| t.get(1).as_i64().is_some_and(|n| n % 2 == 1))),
        Scope::new(),
    );
    let doubled = graph.pipe(
        odd,
        Element::function(
            "double",
            function_fn(Fields::names(["twice"]), |args, out| {
                let n = args.get(0).as_i64().ok_or_else(|| anyhow!("not a number"))?;
                out.emit(&tuple![n * 2])
            }),
        ),
        Scope::new()
            .with_arguments(Fields::names(["n"]))
            .with_output(Fields::All),
    );
    graph.pipe(doubled, Element::sink("out", sink.clone()), Scope::new());

    Flow::new("chain", graph, FlowConfig::sequential())?.complete()?;
    assert_tuples_equal(&sink.rows(), &[tuple!["a", 1, 2], tuple!["a", 3, 6]]);
    Ok(())
}

fn emit_tag(out: &mut Collector<'_>, tag: &str) -> Result<()> {
    out.emit(&tuple![tag])
}

fn buffer_flow(retain: bool, sink: &MemorySink) -> Result<Flow> {
    let mut graph = ElementGraph::new();
    let words = graph.add(Element::source("words", words()));
    let grouped = graph.pipe(
        words,
        Element::group_by("by-word"),
        Scope::grouping(0, Fields::names(["word"])),
    );
    let framed = graph.pipe(
        grouped,
        Element::buffer(
            "frame",
            buffer_fn(Fields::names(["tag"]), retain, |_key, values, out| {
                emit_tag(out, "header")?;
                for _ in values {
                    emit_tag(out, "row")?;
                }
                emit_tag(out, "footer")
            }),
        ),
        Scope::new().with_output(Fields::All),
    );
    graph.pipe(framed, Element::sink("out", sink.clone()), Scope::new());
    Ok(Flow::new("frames", graph, FlowConfig::sequential())?)
}

#[test]
fn buffer_header_and_footer_see_only_the_key() -> Result<()> {
    let sink = MemorySink::new("out");
    buffer_flow(false, &sink)?.complete()?;
    assert_tuples_equal(
        &sink.rows(),
        &[
            tuple!["a", Value::Null, "header"],
            tuple!["a", 1, "row"],
            tuple!["a", 3, "row"],
            tuple!["a", Value::Null, "footer"],
            tuple!["b", Value::Null, "header"],
            tuple!["b", 2, "row"],
            tuple!["b", Value::Null, "footer"],
        ],
    );
    Ok(())
}

#[test]
fn buffer_retaining_values_keeps_the_last_row() -> Result<()> {
    let sink = MemorySink::new("out");
    buffer_flow(true, &sink)?.complete()?;
    let footers: Vec<Tuple> = sink
        .rows()
        .into_iter()
        .filter(|t| t[2] == Value::from("footer"))
        .collect();
    assert_tuples_equal(&footers, &[tuple!["a", 3, "footer"], tuple!["b", 2, "footer"]]);
    Ok(())
}

#[test]
fn first_n_keeps_the_head_of_each_group() -> Result<()> {
    let sink = MemorySink::new("out");
    let mut graph = ElementGraph::new();
    let words = graph.add(Element::source("words", words()));
    let grouped = graph.pipe(
        words,
        Element::group_by("by-word"),
        Scope::grouping(0, Fields::names(["word"])),
    );
    let first = graph.pipe(grouped, Element::buffer("first", FirstN(1)), Scope::new());
    graph.pipe(first, Element::sink("out", sink.clone()), Scope::new());

    Flow::new("first", graph, FlowConfig::sequential())?.complete()?;
    assert_tuples_equal(&sink.rows(), &[tuple!["a", 1], tuple!["b", 2]]);
    Ok(())
}

fn asserted_flow(level: AssertionLevel, trap: &CollectingTrap, sink: &MemorySink) -> Result<Flow> {
    let source = MemorySource::new(
        "rows",
        Fields::names(["k", "v"]),
        vec![tuple!["a", 1], tuple!["a", Value::Null], tuple!["b", 2]],
    );
    let mut graph = ElementGraph::new();
    let rows = graph.add(Element::source("rows", source));
    let checked = graph.pipe(
        rows,
        Element::value_assertion("not-null", AssertionLevel::Strict, AssertNotNull),
        Scope::new(),
    );
    graph.pipe(checked, Element::sink("out", sink.clone()), Scope::new());
    graph.trap("rows", trap.clone());
    Ok(Flow::new("asserted", graph, FlowConfig::sequential().with_assertion_level(level))?)
}

#[test]
fn strict_assertions_run_only_at_strict_level() -> Result<()> {
    let trap = CollectingTrap::new();
    let sink = MemorySink::new("out");
    let stats = asserted_flow(AssertionLevel::Strict, &trap, &sink)?.complete()?;
    assert_eq!(sink.len(), 2);
    assert_eq!(stats.trapped, 1);
    assert_eq!(trap.tuples(), vec![tuple!["a", Value::Null]]);

    let trap = CollectingTrap::new();
    let sink = MemorySink::new("out");
    let flow = asserted_flow(AssertionLevel::Valid, &trap, &sink)?;
    assert!(flow.edges().iter().all(|e| e.scope.name != "not-null"));
    flow.complete()?;
    assert_eq!(sink.len(), 3);
    assert!(trap.is_empty());
    Ok(())
}

#[test]
fn failed_group_assertion_drops_the_group() -> Result<()> {
    let trap = CollectingTrap::new();
    let sink = MemorySink::new("out");
    let mut graph = ElementGraph::new();
    let words = graph.add(Element::source("words", words()));
    let grouped = graph.pipe(
        words,
        Element::group_by("by-word"),
        Scope::grouping(0, Fields::names(["word"])),
    );
    let checked = graph.pipe(
        grouped,
        Element::group_assertion("small", AssertionLevel::Valid, AssertGroupSizeLessThan(2)),
        Scope::new(),
    );
    let summed = graph.pipe(
        checked,
        Element::aggregator("sum", Sum::new("total")),
        Scope::new().with_arguments(Fields::names(["n"])),
    );
    graph.pipe(summed, Element::sink("out", sink.clone()), Scope::new());
    graph.trap("by-word", trap.clone());

    Flow::new("sizes", graph, FlowConfig::sequential())?.complete()?;
    assert_tuples_equal(&sink.rows(), &[tuple!["b", 2]]);
    assert_eq!(trap.len(), 1);
    assert!(trap.messages()[0].contains("small"));
    Ok(())
}

#[test]
fn merged_sources_reach_one_function() -> Result<()> {
    let left = MemorySource::new("left", Fields::names(["n"]), vec![tuple![1], tuple![2]]);
    let right = MemorySource::new("right", Fields::names(["n"]), vec![tuple![3]]);
    let sink = MemorySink::new("out");
    let mut graph = ElementGraph::new();
    let l = graph.add(Element::source("left", left));
    let r = graph.add(Element::source("right", right));
    let merged = graph.add(Element::merge("both"));
    graph.connect(l, merged, Scope::new());
    graph.connect(r, merged, Scope::new());
    graph.pipe(merged, Element::sink("out", sink.clone()), Scope::new());

    let stats = Flow::new("merge", graph, FlowConfig::sequential())?.complete()?;
    assert_tuples_unordered_equal(&sink.rows(), &[tuple![1], tuple![2], tuple![3]]);
    assert_eq!(stats.read, 3);
    Ok(())
}

fn two_source_totals(config: FlowConfig) -> Result<Vec<Tuple>> {
    let rows = |offset: i64| {
        TestRows::new()
            .add_keyed_range("x", offset..=offset + 50)
            .add_keyed_range("y", offset..=offset + 20)
            .build()
    };
    let sink = MemorySink::new("out");
    let mut graph = ElementGraph::new();
    let fields = Fields::names(["k", "v"]);
    let a = graph.add(Element::source("a", MemorySource::new("a", fields.clone(), rows(0))));
    let b = graph.add(Element::source("b", MemorySource::new("b", fields, rows(100))));
    let grouped = graph.add(Element::group_by("by-k"));
    graph.connect(a, grouped, Scope::grouping(0, Fields::names(["k"])));
    graph.connect(b, grouped, Scope::grouping(1, Fields::names(["k"])));
    let summed = graph.pipe(
        grouped,
        Element::aggregator("sum", Sum::new("total")),
        Scope::new().with_arguments(Fields::names(["v"])),
    );
    let counted = graph.pipe(summed, Element::aggregator("count", Count::new("n")), Scope::new());
    graph.pipe(counted, Element::sink("out", sink.clone()), Scope::new());

    Flow::new("totals", graph, config)?.complete()?;
    Ok(sink.rows())
}

#[test]
fn parallel_mode_matches_sequential() -> Result<()> {
    let sequential = two_source_totals(FlowConfig::sequential())?;
    assert_eq!(sequential.len(), 2);
    for threads in [Some(1), Some(2), None] {
        let parallel =
            two_source_totals(FlowConfig::default().with_mode(ExecMode::Parallel { threads }))?;
        assert_tuples_equal(&parallel, &sequential);
    }
    Ok(())
}

#[test]
fn explain_lists_the_plumbing() -> Result<()> {
    let sink = MemorySink::new("out");
    let flow = Flow::new("sum", sum_by_word(words(), &sink), FlowConfig::sequential())?;
    let plan = flow.explain();
    for duct in ["words", "by-word", "open-reducing-window:sum", "sum", "out"] {
        assert!(plan.contains(duct), "{duct} missing from:\n{plan}");
    }
    Ok(())
}
