//! Resumable zlib decompression streams.
//!
//! Tight keeps four independent zlib streams whose dictionaries persist
//! across rectangles; ZRLE keeps one for the whole connection. Both feed
//! bounded input chunks in and pull bounded output sizes out, possibly
//! several pulls per input chunk (ZRLE reads tile by tile from one
//! compressed block). [`InflateStream`] wraps [`flate2::Decompress`] with
//! exactly that shape.

use anyhow::{bail, Context, Result};
use flate2::{Decompress, FlushDecompress, Status};

/// One persistent zlib stream.
pub struct InflateStream {
    inner: Decompress,
    input: Vec<u8>,
    pos: usize,
}

impl Default for InflateStream {
    fn default() -> Self {
        Self::new()
    }
}

impl InflateStream {
    pub fn new() -> Self {
        Self {
            inner: Decompress::new(true),
            input: Vec::new(),
            pos: 0,
        }
    }

    /// Discard all state: dictionary, pending input, everything. Only the
    /// wire is allowed to command this.
    pub fn reset(&mut self) {
        self.inner = Decompress::new(true);
        self.input.clear();
        self.pos = 0;
    }

    /// Append a compressed chunk to the pending input.
    pub fn set_input(&mut self, data: &[u8]) {
        if self.pos == self.input.len() {
            self.input.clear();
            self.pos = 0;
        }
        self.input.extend_from_slice(data);
    }

    /// Bytes of pending input not yet consumed by the decompressor.
    pub fn pending_input(&self) -> usize {
        self.input.len() - self.pos
    }

    /// Pull exactly `out_len` decompressed bytes from the pending input.
    ///
    /// Fails if the input runs dry or the deflate stream ends before the
    /// requested output is produced.
    pub fn inflate(&mut self, out_len: usize) -> Result<Vec<u8>> {
        let mut out = vec![0u8; out_len];
        let mut filled = 0usize;
        while filled < out_len {
            let before_in = self.inner.total_in();
            let before_out = self.inner.total_out();
            let status = self
                .inner
                .decompress(&self.input[self.pos..], &mut out[filled..], FlushDecompress::Sync)
                .context("zlib decompression failed")?;
            self.pos += (self.inner.total_in() - before_in) as usize;
            let produced = (self.inner.total_out() - before_out) as usize;
            filled += produced;

            if filled >= out_len {
                break;
            }
            match status {
                Status::StreamEnd => {
                    bail!("zlib stream ended with {filled} of {out_len} bytes produced")
                }
                _ if produced == 0 && self.pos == self.input.len() => {
                    bail!("zlib input exhausted with {filled} of {out_len} bytes produced")
                }
                _ => {}
            }
        }
        Ok(out)
    }

    /// Pull a single decompressed byte.
    pub fn read_u8(&mut self) -> Result<u8> {
        Ok(self.inflate(1)?[0])
    }
}
