//! JSON Lines taps: one JSON array per line, one array element per field.

use super::{SinkTap, SourceTap, TupleInput, TupleOutput};
use crate::tuple::{Fields, Tuple, TupleLike, values};
use anyhow::Context;
use std::fs::{File, create_dir_all};
use std::io::{BufRead, BufReader, BufWriter, Lines, Write};
use std::path::{Path, PathBuf};

/// Reads tuples from a JSON Lines file.
///
/// Empty or whitespace-only lines are skipped. A line that is not a JSON array of
/// scalars fails the read with its line number.
pub struct JsonLinesSource {
    name: String,
    path: PathBuf,
    fields: Fields,
}

impl JsonLinesSource {
    pub fn new(name: impl Into<String>, path: impl AsRef<Path>, fields: Fields) -> Self {
        Self {
            name: name.into(),
            path: path.as_ref().to_path_buf(),
            fields,
        }
    }
}

impl SourceTap for JsonLinesSource {
    fn identifier(&self) -> &str {
        &self.name
    }

    fn fields(&self) -> Fields {
        self.fields.clone()
    }

    fn open_input(&self) -> anyhow::Result<Box<dyn TupleInput>> {
        let f = File::open(&self.path).with_context(|| format!("open {}", self.path.display()))?;
        Ok(Box::new(JsonLinesInput {
            path: self.path.clone(),
            lines: BufReader::new(f).lines(),
            line: 0,
        }))
    }
}

struct JsonLinesInput {
    path: PathBuf,
    lines: Lines<BufReader<File>>,
    line: usize,
}

impl Iterator for JsonLinesInput {
    type Item = anyhow::Result<Tuple>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let line = self.lines.next()?;
            self.line += 1;
            let parsed = line
                .with_context(|| format!("read line {} in {}", self.line, self.path.display()))
                .and_then(|line| {
                    if line.trim().is_empty() {
                        return Ok(None);
                    }
                    serde_json::from_str::<Tuple>(&line).map(Some).with_context(|| {
                        format!("parse line {} in {}: {}", self.line, self.path.display(), line)
                    })
                });
            match parsed {
                Ok(None) => continue,
                Ok(Some(tuple)) => return Some(Ok(tuple)),
                Err(e) => return Some(Err(e)),
            }
        }
    }
}

impl TupleInput for JsonLinesInput {}

/// Writes tuples to a JSON Lines file, truncating it on open.
///
/// Parent directories are created as needed.
pub struct JsonLinesSink {
    name: String,
    path: PathBuf,
}

impl JsonLinesSink {
    pub fn new(name: impl Into<String>, path: impl AsRef<Path>) -> Self {
        Self {
            name: name.into(),
            path: path.as_ref().to_path_buf(),
        }
    }
}

impl SinkTap for JsonLinesSink {
    fn identifier(&self) -> &str {
        &self.name
    }

    fn open_output(&self) -> anyhow::Result<Box<dyn TupleOutput>> {
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            create_dir_all(parent).with_context(|| format!("mkdir -p {}", parent.display()))?;
        }
        let f =
            File::create(&self.path).with_context(|| format!("create {}", self.path.display()))?;
        Ok(Box::new(JsonLinesOutput {
            path: self.path.clone(),
            writer: BufWriter::new(f),
        }))
    }
}

struct JsonLinesOutput {
    path: PathBuf,
    writer: BufWriter<File>,
}

impl TupleOutput for JsonLinesOutput {
    fn write(&mut self, tuple: &dyn TupleLike) -> anyhow::Result<()> {
        let row: Vec<_> = values(tuple).collect();
        serde_json::to_writer(&mut self.writer, &row)
            .with_context(|| format!("serialize row to {}", self.path.display()))?;
        self.writer.write_all(b"\n")?;
        Ok(())
    }

    fn close(&mut self) -> anyhow::Result<()> {
        self.writer
            .flush()
            .with_context(|| format!("flush {}", self.path.display()))
    }
}
