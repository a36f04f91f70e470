//! Ingestion streamer: encoding and delimiter detection, decoding, chunking
//! and memory discipline for delimited text sources of any size.

pub mod cache;
pub mod compression;
pub mod delimiter;
pub mod encoding;
pub mod memory;
pub mod stream;
pub mod transcode;

pub use cache::{Detection, DetectionCache};
pub use delimiter::{DelimiterGuess, DelimiterMethod, detect_delimiter};
pub use encoding::{EncodingGuess, EncodingMethod, detect_encoding, settle_encoding};
pub use memory::{MemoryAction, MemoryGuard, MemoryProbe, SysinfoProbe};
pub use stream::{ChunkStream, StreamStats};
pub use transcode::TranscodingReader;

use std::io::{Cursor, Read};
use std::path::Path;

/// A named byte source handed to the pipeline.
pub struct SourceInput {
    pub name: String,
    pub reader: Box<dyn Read + Send>,
}

impl SourceInput {
    pub fn new(name: impl Into<String>, reader: Box<dyn Read + Send>) -> Self {
        Self {
            name: name.into(),
            reader,
        }
    }

    /// Open a file; the path becomes the source name.
    pub fn open(path: &Path) -> std::io::Result<Self> {
        let file = std::fs::File::open(path)?;
        Ok(Self::new(path.display().to_string(), Box::new(file)))
    }

    /// An in-memory source.
    pub fn from_bytes(name: impl Into<String>, bytes: impl Into<Vec<u8>>) -> Self {
        Self::new(name, Box::new(Cursor::new(bytes.into())))
    }
}

impl std::fmt::Debug for SourceInput {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SourceInput")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}
