//! Sink collaborators: where output batches, error rows, lineage and the
//! run summary go.

use crate::error::SinkError;
use crate::lineage::{LineageEdge, LineageExporter};
use crate::pipeline::RunSummary;
use crate::types::{ErrorRow, OutputBatch, OutputRow};
use serde::Serialize;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

/// Receives everything a run produces.
pub trait RunSink: Send {
    fn write_batch(&mut self, batch: &OutputBatch) -> Result<(), SinkError>;

    fn write_error_rows(&mut self, rows: &[ErrorRow]) -> Result<(), SinkError>;

    fn write_lineage(&mut self, edges: &[LineageEdge]) -> Result<(), SinkError>;

    fn write_summary(&mut self, summary: &RunSummary) -> Result<(), SinkError>;

    fn flush(&mut self) -> Result<(), SinkError> {
        Ok(())
    }
}

/// Routes lineage exports of the store into a sink.
pub struct LineageSink<'a, S: RunSink + ?Sized>(pub &'a mut S);

impl<S: RunSink + ?Sized> LineageExporter for LineageSink<'_, S> {
    fn export(&mut self, edges: &[LineageEdge]) -> Result<(), SinkError> {
        self.0.write_lineage(edges)
    }
}

// ---------------------------------------------------------------------------
// In-memory sink
// ---------------------------------------------------------------------------

/// Keeps everything in memory.
#[derive(Debug, Default)]
pub struct MemorySink {
    pub batches: Vec<OutputBatch>,
    pub error_rows: Vec<ErrorRow>,
    pub lineage: Vec<LineageEdge>,
    pub summary: Option<RunSummary>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Output rows in emission order.
    pub fn rows(&self) -> impl Iterator<Item = &OutputRow> {
        self.batches.iter().flat_map(|b| b.rows.iter())
    }
}

impl RunSink for MemorySink {
    fn write_batch(&mut self, batch: &OutputBatch) -> Result<(), SinkError> {
        self.batches.push(batch.clone());
        Ok(())
    }

    fn write_error_rows(&mut self, rows: &[ErrorRow]) -> Result<(), SinkError> {
        self.error_rows.extend_from_slice(rows);
        Ok(())
    }

    fn write_lineage(&mut self, edges: &[LineageEdge]) -> Result<(), SinkError> {
        self.lineage.extend_from_slice(edges);
        Ok(())
    }

    fn write_summary(&mut self, summary: &RunSummary) -> Result<(), SinkError> {
        self.summary = Some(summary.clone());
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// JSON Lines sink
// ---------------------------------------------------------------------------

pub const OUTPUT_FILE: &str = "output.jsonl";
pub const ERRORS_FILE: &str = "errors.jsonl";
pub const LINEAGE_FILE: &str = "lineage.jsonl";
pub const SUMMARY_FILE: &str = "summary.json";

/// Writes a directory of `output.jsonl`, `errors.jsonl`, `lineage.jsonl`
/// and `summary.json`.
#[derive(Debug)]
pub struct JsonlSink {
    dir: PathBuf,
    output: BufWriter<File>,
    errors: BufWriter<File>,
    lineage: BufWriter<File>,
}

impl JsonlSink {
    /// Create `dir` if needed and truncate the stream files.
    pub fn create(dir: impl AsRef<Path>) -> Result<Self, SinkError> {
        let dir = dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&dir)?;
        let open = |name: &str| -> Result<BufWriter<File>, SinkError> {
            Ok(BufWriter::new(File::create(dir.join(name))?))
        };
        Ok(Self {
            output: open(OUTPUT_FILE)?,
            errors: open(ERRORS_FILE)?,
            lineage: open(LINEAGE_FILE)?,
            dir,
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

fn write_lines<T: Serialize>(writer: &mut BufWriter<File>, items: &[T]) -> Result<(), SinkError> {
    for item in items {
        serde_json::to_writer(&mut *writer, item)?;
        writer.write_all(b"\n")?;
    }
    Ok(())
}

impl RunSink for JsonlSink {
    fn write_batch(&mut self, batch: &OutputBatch) -> Result<(), SinkError> {
        write_lines(&mut self.output, &batch.rows)
    }

    fn write_error_rows(&mut self, rows: &[ErrorRow]) -> Result<(), SinkError> {
        write_lines(&mut self.errors, rows)
    }

    fn write_lineage(&mut self, edges: &[LineageEdge]) -> Result<(), SinkError> {
        write_lines(&mut self.lineage, edges)
    }

    fn write_summary(&mut self, summary: &RunSummary) -> Result<(), SinkError> {
        let file = File::create(self.dir.join(SUMMARY_FILE))?;
        let mut writer = BufWriter::new(file);
        serde_json::to_writer_pretty(&mut writer, summary)?;
        writer.write_all(b"\n")?;
        writer.flush()?;
        Ok(())
    }

    fn flush(&mut self) -> Result<(), SinkError> {
        self.output.flush()?;
        self.errors.flush()?;
        self.lineage.flush()?;
        Ok(())
    }
}
