//! Blocking reader that streams every source into the worker channel.

use crate::config::{Compression, StreamConfig};
use crate::error::IngestError;
use crate::ingest::{ChunkStream, Detection, DetectionCache, MemoryProbe, SourceInput, StreamStats};
use crate::types::Chunk;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// What the reader reports, in source order.
#[derive(Debug)]
pub(crate) enum ReaderEvent {
    Opened {
        source_index: usize,
        header: Arc<Vec<String>>,
        detection: Detection,
        compression: Compression,
    },
    Chunk {
        source_index: usize,
        chunk: Chunk,
    },
    Closed {
        source_index: usize,
        stats: StreamStats,
    },
    Failed {
        source_index: usize,
        error: IngestError,
    },
}

/// Everything the reader thread needs.
pub(crate) struct SourceReader {
    pub sources: Vec<SourceInput>,
    pub config: StreamConfig,
    pub cache: Arc<DetectionCache>,
    pub cancel: CancellationToken,
    pub memory_probe: Option<Arc<dyn MemoryProbe>>,
}

impl SourceReader {
    /// Read sources one after another. Stops at the first failure, on
    /// cancellation, or when the receiving side goes away.
    pub fn run(self, tx: mpsc::Sender<ReaderEvent>) {
        let SourceReader {
            sources,
            config,
            cache,
            cancel,
            memory_probe,
        } = self;

        for (source_index, source) in sources.into_iter().enumerate() {
            if cancel.is_cancelled() {
                info!(source = %source.name, "Skipping source after cancellation");
                return;
            }
            let name = source.name;
            let stream = match ChunkStream::open(&name, source.reader, &config, &cache) {
                Ok(stream) => stream.with_cancellation(cancel.clone()),
                Err(error) => {
                    warn!(source = %name, error = %error, "Failed to open source");
                    let _ = tx.blocking_send(ReaderEvent::Failed {
                        source_index,
                        error,
                    });
                    return;
                }
            };
            let mut stream = match &memory_probe {
                Some(probe) => stream.with_memory_probe(Arc::clone(probe)),
                None => stream,
            };

            let opened = ReaderEvent::Opened {
                source_index,
                header: Arc::clone(stream.header()),
                detection: *stream.detection(),
                compression: stream.compression(),
            };
            if tx.blocking_send(opened).is_err() {
                return;
            }

            for next in stream.by_ref() {
                let event = match next {
                    Ok(chunk) => ReaderEvent::Chunk {
                        source_index,
                        chunk,
                    },
                    Err(error) => {
                        warn!(source = %name, error = %error, "Source failed mid-stream");
                        let _ = tx.blocking_send(ReaderEvent::Failed {
                            source_index,
                            error,
                        });
                        return;
                    }
                };
                if tx.blocking_send(event).is_err() {
                    return;
                }
            }

            let closed = ReaderEvent::Closed {
                source_index,
                stats: stream.stats().clone(),
            };
            if tx.blocking_send(closed).is_err() {
                return;
            }
        }
    }
}
