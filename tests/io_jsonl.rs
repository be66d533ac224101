// tests/io_jsonl.rs
#![cfg(feature = "io-jsonl")]

use anyhow::Result;
use ductflow::element::{Element, ElementGraph};
use ductflow::operation::Sum;
use ductflow::tap::{JsonLinesSink, JsonLinesSource, MemorySink, SinkTap, SourceTap};
use ductflow::*;
use std::fs;

#[test]
fn jsonl_roundtrip_through_a_grouping() -> Result<()> {
    let tmp = tempfile::tempdir()?;
    let input = tmp.path().join("in.jsonl");
    let output = tmp.path().join("nested/dir/out.jsonl");
    fs::write(&input, "[\"a\", 1]\n\n[\"b\", 2.5]\n  \n[\"a\", 3]\n")?;

    let mut graph = ElementGraph::new();
    let rows = graph.add(Element::source(
        "rows",
        JsonLinesSource::new("rows", &input, Fields::names(["k", "v"])),
    ));
    let grouped = graph.pipe(
        rows,
        Element::group_by("by-k"),
        Scope::grouping(0, Fields::names(["k"])),
    );
    let summed = graph.pipe(
        grouped,
        Element::aggregator("sum", Sum::new("total")),
        Scope::new().with_arguments(Fields::names(["v"])),
    );
    graph.pipe(summed, Element::sink("out", JsonLinesSink::new("out", &output)), Scope::new());

    let stats = Flow::new("jsonl", graph, FlowConfig::sequential())?.complete()?;
    assert_eq!(stats.read, 3);
    assert_eq!(stats.written, 2);
    assert_eq!(fs::read_to_string(&output)?, "[\"a\",4]\n[\"b\",2.5]\n");
    Ok(())
}

#[test]
fn jsonl_sink_output_reads_back() -> Result<()> {
    let tmp = tempfile::tempdir()?;
    let path = tmp.path().join("rows.jsonl");
    let rows = vec![
        tuple!["x", 1, true],
        tuple![Value::Null, -2, false],
        tuple!["z", 0.5, true],
    ];

    let sink = JsonLinesSink::new("rows", &path);
    let mut out = sink.open_output()?;
    for row in &rows {
        out.write(row)?;
    }
    out.close()?;

    let source = JsonLinesSource::new("rows", &path, Fields::names(["a", "b", "c"]));
    let mut input = source.open_input()?;
    let read: Vec<Tuple> = input.by_ref().collect::<Result<_>>()?;
    input.close()?;
    assert_eq!(read, rows);
    Ok(())
}

#[test]
fn malformed_line_fails_with_its_number() -> Result<()> {
    let tmp = tempfile::tempdir()?;
    let path = tmp.path().join("bad.jsonl");
    fs::write(&path, "[1]\n{\"not\": \"a row\"}\n")?;

    let sink = MemorySink::new("out");
    let mut graph = ElementGraph::new();
    let rows = graph.add(Element::source(
        "rows",
        JsonLinesSource::new("rows", &path, Fields::names(["n"])),
    ));
    graph.pipe(rows, Element::sink("out", sink.clone()), Scope::new());

    let err = Flow::new("bad", graph, FlowConfig::sequential())?
        .complete()
        .expect_err("malformed input");
    assert!(matches!(err, FlowError::Tap { operation: "read", .. }));
    let message = format!("{:#}", anyhow::Error::from(err));
    assert!(message.contains("line 2"), "{message}");
    assert_eq!(sink.rows(), vec![tuple![1]]);
    Ok(())
}

#[test]
fn missing_input_fails_to_open() -> Result<()> {
    let tmp = tempfile::tempdir()?;
    let mut graph = ElementGraph::new();
    let rows = graph.add(Element::source(
        "rows",
        JsonLinesSource::new("rows", tmp.path().join("absent.jsonl"), Fields::names(["n"])),
    ));
    graph.pipe(rows, Element::sink("out", MemorySink::new("out")), Scope::new());

    let err = Flow::new("missing", graph, FlowConfig::sequential())?
        .complete()
        .expect_err("missing input");
    assert!(matches!(err, FlowError::Tap { operation: "open", .. }));
    Ok(())
}
