//! Lazy, bounded chunking of a delimited text source.

use crate::config::{Compression, StreamConfig};
use crate::error::IngestError;
use crate::ingest::cache::{Detection, DetectionCache};
use crate::ingest::compression;
use crate::ingest::delimiter::{DelimiterMethod, detect_delimiter};
use crate::ingest::encoding::detect_encoding;
use crate::ingest::memory::{MemoryAction, MemoryGuard, MemoryProbe, SysinfoProbe};
use crate::ingest::transcode::TranscodingReader;
use crate::types::{Chunk, ErrorKind, ErrorRow, SourceRow};
use serde::Serialize;
use std::io::{Cursor, Read};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

type SourceReader = TranscodingReader<std::io::Chain<Cursor<Vec<u8>>, Box<dyn Read + Send>>>;

/// Counters kept while streaming one source.
#[derive(Debug, Clone, Default, Serialize)]
pub struct StreamStats {
    pub rows_read: u64,
    pub malformed_rows: u64,
    pub chunks: u64,
    pub backoffs: u64,
    pub reclaims: u64,
    pub bytes_sampled: usize,
}

/// A finite, lazy sequence of row chunks read from one source.
pub struct ChunkStream {
    source: String,
    reader: csv::Reader<SourceReader>,
    header: Arc<Vec<String>>,
    detection: Detection,
    compression: Compression,
    chunk_size: usize,
    strict: bool,
    pending: Option<csv::StringRecord>,
    record: csv::StringRecord,
    next_index: u64,
    next_ordinal: u64,
    guard: MemoryGuard,
    cancel: Option<CancellationToken>,
    stats: StreamStats,
    finished: bool,
}

impl ChunkStream {
    /// Open `reader`, detect its format (or reuse the cached detection for
    /// `source`) and read the header row.
    pub fn open(
        source: &str,
        reader: Box<dyn Read + Send>,
        config: &StreamConfig,
        cache: &DetectionCache,
    ) -> Result<Self, IngestError> {
        let (mut reader, compression) =
            compression::decompress(reader, config.compression, source)?;

        let (sample, complete) = read_sample(&mut reader, config.sample_bytes)?;
        let detection = match cache.get(source) {
            Some(hit) => hit,
            None => {
                let detection = detect(source, &sample, complete, config)?;
                cache.insert(source, detection);
                detection
            }
        };
        tracing::debug!(
            source,
            encoding = detection.encoding.name(),
            delimiter = %(detection.delimiter as char).escape_default(),
            degraded = detection.degraded,
            "Resolved source format"
        );

        let bytes_sampled = sample.len();
        let transcoder = TranscodingReader::new(Cursor::new(sample).chain(reader), detection.encoding);
        let mut csv_reader = csv::ReaderBuilder::new()
            .delimiter(detection.delimiter)
            .has_headers(false)
            .flexible(true)
            .from_reader(transcoder);

        let mut first = csv::StringRecord::new();
        let has_first = csv_reader
            .read_record(&mut first)
            .map_err(|e| csv_error(source, e))?;

        let (header, pending) = if !has_first {
            (Vec::new(), None)
        } else if config.has_header {
            (normalize_header(&first), None)
        } else {
            let synthetic = (1..=first.len()).map(|i| format!("column_{i}")).collect();
            (synthetic, Some(first))
        };

        let guard = MemoryGuard::new(
            config.memory_ceiling_bytes,
            config.memory_margin,
            Duration::from_millis(config.backoff_ms),
            Arc::new(SysinfoProbe::new()),
        );

        Ok(Self {
            source: source.to_string(),
            reader: csv_reader,
            header: Arc::new(header),
            detection,
            compression,
            chunk_size: config.chunk_size.max(1),
            strict: config.strict,
            pending,
            record: csv::StringRecord::new(),
            next_index: 0,
            next_ordinal: 0,
            guard,
            cancel: None,
            stats: StreamStats {
                bytes_sampled,
                ..StreamStats::default()
            },
            finished: !has_first,
        })
    }

    /// Stop yielding chunks once `token` is cancelled.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    pub fn with_memory_probe(mut self, probe: Arc<dyn MemoryProbe>) -> Self {
        self.guard = self.guard.with_probe(probe);
        self
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn header(&self) -> &Arc<Vec<String>> {
        &self.header
    }

    pub fn detection(&self) -> &Detection {
        &self.detection
    }

    pub fn compression(&self) -> Compression {
        self.compression
    }

    pub fn stats(&self) -> &StreamStats {
        &self.stats
    }

    fn next_record(&mut self) -> Result<Option<Vec<String>>, IngestError> {
        if let Some(record) = self.pending.take() {
            return Ok(Some(record.iter().map(str::to_string).collect()));
        }
        let more = self
            .reader
            .read_record(&mut self.record)
            .map_err(|e| csv_error(&self.source, e))?;
        if !more {
            return Ok(None);
        }
        Ok(Some(self.record.iter().map(str::to_string).collect()))
    }

    fn fill_chunk(&mut self) -> Result<Option<Chunk>, IngestError> {
        let mut rows = Vec::with_capacity(self.chunk_size.min(4096));
        let mut error_rows = Vec::new();

        while rows.len() < self.chunk_size {
            let Some(fields) = self.next_record()? else {
                self.finished = true;
                break;
            };
            if fields.len() == 1 && fields[0].is_empty() && self.header.len() > 1 {
                continue;
            }
            self.next_ordinal += 1;
            self.stats.rows_read += 1;

            if fields.len() != self.header.len() {
                self.stats.malformed_rows += 1;
                if self.strict {
                    return Err(IngestError::MalformedInput {
                        source_name: self.source.clone(),
                        ordinal: self.next_ordinal,
                        expected: self.header.len(),
                        found: fields.len(),
                    });
                }
                tracing::debug!(
                    source = %self.source,
                    ordinal = self.next_ordinal,
                    expected = self.header.len(),
                    found = fields.len(),
                    "Diverting malformed row"
                );
                error_rows.push(ErrorRow {
                    source: self.source.clone(),
                    ordinal: self.next_ordinal,
                    kind: ErrorKind::MalformedInput,
                    reason: format!(
                        "expected {} columns, found {}",
                        self.header.len(),
                        fields.len()
                    ),
                    raw: fields,
                });
                continue;
            }

            rows.push(SourceRow {
                ordinal: self.next_ordinal,
                fields,
            });
        }

        if rows.is_empty() && error_rows.is_empty() {
            return Ok(None);
        }

        let chunk = Chunk {
            source: self.source.clone(),
            index: self.next_index,
            header: Arc::clone(&self.header),
            rows,
            error_rows,
        };
        self.next_index += 1;
        self.stats.chunks += 1;
        Ok(Some(chunk))
    }

    fn enforce_memory_ceiling(&mut self) {
        let reader = &mut self.reader;
        let record = &mut self.record;
        let action = self.guard.check(|| {
            *record = csv::StringRecord::new();
            reader.get_mut().shrink();
        });
        match action {
            MemoryAction::Within => {}
            MemoryAction::Reclaimed => self.stats.reclaims += 1,
            MemoryAction::BackedOff => {
                self.stats.reclaims += 1;
                self.stats.backoffs += 1;
            }
        }
    }
}

impl Iterator for ChunkStream {
    type Item = Result<Chunk, IngestError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }
        if self.cancel.as_ref().is_some_and(|t| t.is_cancelled()) {
            tracing::info!(source = %self.source, "Cancellation observed at chunk boundary");
            self.finished = true;
            return None;
        }

        match self.fill_chunk() {
            Ok(Some(chunk)) => {
                tracing::debug!(
                    source = %self.source,
                    chunk = chunk.index,
                    rows = chunk.rows.len(),
                    malformed = chunk.error_rows.len(),
                    "Chunk ready"
                );
                self.enforce_memory_ceiling();
                Some(Ok(chunk))
            }
            Ok(None) => None,
            Err(e) => {
                self.finished = true;
                Some(Err(e))
            }
        }
    }
}

fn read_sample(reader: &mut dyn Read, limit: usize) -> Result<(Vec<u8>, bool), IngestError> {
    let mut sample = Vec::with_capacity(limit.min(1 << 20));
    let read = reader.take(limit as u64).read_to_end(&mut sample)?;
    Ok((sample, read < limit))
}

fn detect(
    source: &str,
    sample: &[u8],
    complete: bool,
    config: &StreamConfig,
) -> Result<Detection, IngestError> {
    let guess = detect_encoding(
        sample,
        complete,
        config.declared_encoding(),
        config.strict,
        source,
    )?;

    let declared = config
        .declared_delimiter()
        .map_err(|e| IngestError::Unreadable {
            source_name: source.to_string(),
            message: e.to_string(),
        })?;
    let (delimiter, delimiter_method) = match declared {
        Some(delimiter) => (delimiter, DelimiterMethod::Declared),
        None => {
            let (text, _, _) = guess.encoding.decode(sample);
            let sniffed = detect_delimiter(&text, complete);
            (sniffed.delimiter, sniffed.method)
        }
    };

    Ok(Detection {
        encoding: guess.encoding,
        encoding_method: guess.method,
        delimiter,
        delimiter_method,
        degraded: guess.degraded,
    })
}

fn normalize_header(record: &csv::StringRecord) -> Vec<String> {
    record
        .iter()
        .enumerate()
        .map(|(i, name)| {
            let name = name.trim().trim_start_matches('\u{feff}');
            if name.is_empty() {
                format!("column_{}", i + 1)
            } else {
                name.to_string()
            }
        })
        .collect()
}

fn csv_error(source: &str, error: csv::Error) -> IngestError {
    if error.is_io_error() {
        if let csv::ErrorKind::Io(io) = error.into_kind() {
            return IngestError::Io(io);
        }
        return IngestError::Unreadable {
            source_name: source.to_string(),
            message: "I/O failure".into(),
        };
    }
    IngestError::Csv {
        source_name: source.to_string(),
        message: error.to_string(),
    }
}
