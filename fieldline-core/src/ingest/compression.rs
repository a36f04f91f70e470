//! Transparent decompression of source streams.

use crate::config::Compression;
use flate2::read::MultiGzDecoder;
use std::io::{BufRead, BufReader, Read};

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

/// Resolve `Compression::Auto` from the source name and leading bytes.
pub fn resolve(compression: Compression, source_name: &str, head: &[u8]) -> Compression {
    match compression {
        Compression::Auto => {
            let by_suffix = source_name.to_ascii_lowercase().ends_with(".gz");
            if by_suffix || head.starts_with(&GZIP_MAGIC) {
                Compression::Gzip
            } else {
                Compression::None
            }
        }
        explicit => explicit,
    }
}

/// Wrap `reader` so it yields decompressed bytes. Returns the codec in use.
pub fn decompress(
    reader: Box<dyn Read + Send>,
    compression: Compression,
    source_name: &str,
) -> std::io::Result<(Box<dyn Read + Send>, Compression)> {
    let mut buffered = BufReader::new(reader);
    let head = buffered.fill_buf()?;
    let resolved = resolve(compression, source_name, head);
    let stream: Box<dyn Read + Send> = match resolved {
        Compression::Gzip => Box::new(MultiGzDecoder::new(buffered)),
        _ => Box::new(buffered),
    };
    Ok((stream, resolved))
}
