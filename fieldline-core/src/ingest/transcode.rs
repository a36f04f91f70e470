//! Incremental transcoding of an arbitrary-encoding byte stream to UTF-8.

use encoding_rs::{CoderResult, Decoder, Encoding};
use std::io::{self, Read};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

const INPUT_BUFFER: usize = 16 * 1024;
const OUTPUT_BUFFER: usize = 48 * 1024;

/// A `Read` adapter yielding UTF-8 decoded from `encoding`. Malformed input
/// is replaced with U+FFFD and counted.
pub struct TranscodingReader<R> {
    inner: R,
    decoder: Decoder,
    input: Vec<u8>,
    in_pos: usize,
    in_len: usize,
    output: Vec<u8>,
    out_pos: usize,
    out_len: usize,
    eof: bool,
    finished: bool,
    replacements: Arc<AtomicU64>,
}

impl<R: Read> TranscodingReader<R> {
    pub fn new(inner: R, encoding: &'static Encoding) -> Self {
        Self {
            inner,
            decoder: encoding.new_decoder_with_bom_removal(),
            input: vec![0; INPUT_BUFFER],
            in_pos: 0,
            in_len: 0,
            output: vec![0; OUTPUT_BUFFER],
            out_pos: 0,
            out_len: 0,
            eof: false,
            finished: false,
            replacements: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Shared counter of decode calls that had to substitute malformed input.
    pub fn replacements(&self) -> Arc<AtomicU64> {
        Arc::clone(&self.replacements)
    }

    /// Release spare buffer capacity.
    pub fn shrink(&mut self) {
        self.input.shrink_to_fit();
        self.output.shrink_to_fit();
    }
}

impl<R: Read> Read for TranscodingReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        loop {
            if self.out_pos < self.out_len {
                let n = (self.out_len - self.out_pos).min(buf.len());
                buf[..n].copy_from_slice(&self.output[self.out_pos..self.out_pos + n]);
                self.out_pos += n;
                return Ok(n);
            }
            if self.finished {
                return Ok(0);
            }
            if self.in_pos == self.in_len && !self.eof {
                self.in_len = self.inner.read(&mut self.input)?;
                self.in_pos = 0;
                if self.in_len == 0 {
                    self.eof = true;
                }
            }

            let (result, read, written, replaced) = self.decoder.decode_to_utf8(
                &self.input[self.in_pos..self.in_len],
                &mut self.output,
                self.eof,
            );
            self.in_pos += read;
            self.out_pos = 0;
            self.out_len = written;
            if replaced {
                self.replacements.fetch_add(1, Ordering::Relaxed);
            }
            if self.eof && result == CoderResult::InputEmpty && self.in_pos == self.in_len {
                self.finished = true;
            }
        }
    }
}
