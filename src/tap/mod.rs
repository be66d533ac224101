//! Sources and sinks of tuples.
//!
//! A flow reads from [`SourceTap`]s and writes to [`SinkTap`]s. Each run opens every
//! tap once and closes what it opened exactly once, including when the run stops
//! early on an error.
//!
//! Provided taps:
//! - [`MemorySource`] / [`MemorySink`]: in-memory, mostly for tests and examples;
//! - [`JsonLinesSource`] / [`JsonLinesSink`] (feature `io-jsonl`): one JSON array per
//!   line.

#[cfg(feature = "io-jsonl")]
mod jsonl;

#[cfg(feature = "io-jsonl")]
pub use jsonl::{JsonLinesSink, JsonLinesSource};

use crate::tuple::{Fields, Tuple, TupleLike};
use crate::utils::lock;
use anyhow::anyhow;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// Where a flow reads tuples from.
pub trait SourceTap: Send + Sync {
    fn identifier(&self) -> &str;

    /// Declaration of the tuples this source yields.
    fn fields(&self) -> Fields;

    fn open_input(&self) -> anyhow::Result<Box<dyn TupleInput>>;
}

/// An open source: an iterator of tuples, closed once when the run ends.
pub trait TupleInput: Iterator<Item = anyhow::Result<Tuple>> + Send {
    fn close(&mut self) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Where a flow writes tuples to.
pub trait SinkTap: Send + Sync {
    fn identifier(&self) -> &str;

    fn open_output(&self) -> anyhow::Result<Box<dyn TupleOutput>>;
}

/// An open sink.
pub trait TupleOutput: Send {
    fn write(&mut self, tuple: &dyn TupleLike) -> anyhow::Result<()>;

    fn close(&mut self) -> anyhow::Result<()> {
        Ok(())
    }
}

/// A source over a fixed set of rows.
///
/// Counts opens and closes so tests can check the tap lifecycle.
#[derive(Clone)]
pub struct MemorySource {
    name: String,
    fields: Fields,
    rows: Arc<Vec<Tuple>>,
    fail_at: Option<usize>,
    opens: Arc<AtomicUsize>,
    closes: Arc<AtomicUsize>,
}

impl MemorySource {
    pub fn new(name: impl Into<String>, fields: Fields, rows: Vec<Tuple>) -> Self {
        Self {
            name: name.into(),
            fields,
            rows: Arc::new(rows),
            fail_at: None,
            opens: Arc::new(AtomicUsize::new(0)),
            closes: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Makes the read of row `index` fail, simulating a broken input.
    #[must_use]
    pub fn failing_at(mut self, index: usize) -> Self {
        self.fail_at = Some(index);
        self
    }

    pub fn open_count(&self) -> usize {
        self.opens.load(Ordering::Acquire)
    }

    pub fn close_count(&self) -> usize {
        self.closes.load(Ordering::Acquire)
    }
}

impl SourceTap for MemorySource {
    fn identifier(&self) -> &str {
        &self.name
    }

    fn fields(&self) -> Fields {
        self.fields.clone()
    }

    fn open_input(&self) -> anyhow::Result<Box<dyn TupleInput>> {
        self.opens.fetch_add(1, Ordering::AcqRel);
        Ok(Box::new(MemoryInput {
            rows: Arc::clone(&self.rows),
            next: 0,
            fail_at: self.fail_at,
            closes: Arc::clone(&self.closes),
        }))
    }
}

struct MemoryInput {
    rows: Arc<Vec<Tuple>>,
    next: usize,
    fail_at: Option<usize>,
    closes: Arc<AtomicUsize>,
}

impl Iterator for MemoryInput {
    type Item = anyhow::Result<Tuple>;

    fn next(&mut self) -> Option<Self::Item> {
        let index = self.next;
        let row = self.rows.get(index)?;
        self.next += 1;
        if self.fail_at == Some(index) {
            return Some(Err(anyhow!("injected read failure at row {index}")));
        }
        Some(Ok(row.clone()))
    }
}

impl TupleInput for MemoryInput {
    fn close(&mut self) -> anyhow::Result<()> {
        self.closes.fetch_add(1, Ordering::AcqRel);
        Ok(())
    }
}

/// A sink collecting rows in memory.
///
/// Clones share the same storage, so a test keeps one handle and gives another to
/// the flow. Opening the sink replaces the rows of the previous run.
#[derive(Clone, Default)]
pub struct MemorySink {
    name: String,
    rows: Arc<Mutex<Vec<Tuple>>>,
    closes: Arc<AtomicUsize>,
}

impl MemorySink {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Rows written so far, in arrival order.
    pub fn rows(&self) -> Vec<Tuple> {
        lock(&self.rows).clone()
    }

    pub fn len(&self) -> usize {
        lock(&self.rows).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn close_count(&self) -> usize {
        self.closes.load(Ordering::Acquire)
    }
}

impl SinkTap for MemorySink {
    fn identifier(&self) -> &str {
        &self.name
    }

    fn open_output(&self) -> anyhow::Result<Box<dyn TupleOutput>> {
        lock(&self.rows).clear();
        Ok(Box::new(MemoryOutput {
            rows: Arc::clone(&self.rows),
            closes: Arc::clone(&self.closes),
        }))
    }
}

struct MemoryOutput {
    rows: Arc<Mutex<Vec<Tuple>>>,
    closes: Arc<AtomicUsize>,
}

impl TupleOutput for MemoryOutput {
    fn write(&mut self, tuple: &dyn TupleLike) -> anyhow::Result<()> {
        lock(&self.rows).push(tuple.to_tuple());
        Ok(())
    }

    fn close(&mut self) -> anyhow::Result<()> {
        self.closes.fetch_add(1, Ordering::AcqRel);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tuple;

    #[test]
    fn memory_source_yields_rows_and_injected_failure() {
        let source = MemorySource::new("in", Fields::names(["n"]), vec![tuple![1], tuple![2]])
            .failing_at(1);
        let mut input = source.open_input().unwrap();
        assert_eq!(input.next().unwrap().unwrap(), tuple![1]);
        assert!(input.next().unwrap().is_err());
        assert!(input.next().is_none());
        input.close().unwrap();
        assert_eq!((source.open_count(), source.close_count()), (1, 1));
    }

    #[test]
    fn memory_sink_replaces_rows_on_open() {
        let sink = MemorySink::new("out");
        let mut output = sink.open_output().unwrap();
        output.write(&tuple!["a"]).unwrap();
        output.close().unwrap();
        assert_eq!(sink.rows(), vec![tuple!["a"]]);

        let _second = sink.open_output().unwrap();
        assert!(sink.is_empty());
        assert_eq!(sink.close_count(), 1);
    }
}
