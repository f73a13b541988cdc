//! Tight and TightPNG encodings - zlib/palette/JPEG compression.
//!
//! Every rectangle starts with a compression-control byte. Its low four
//! bits each command a reset of one of the decoder's four persistent zlib
//! streams (applied before anything else); the high four bits select the
//! mode:
//!
//! - `0x08` Fill: a 3-byte RGB color fills the rectangle.
//! - `0x09` Jpeg: a compact-length-prefixed JPEG blob.
//! - `0x0A` Png: a compact-length-prefixed PNG blob; only legal in
//!   TightPNG, where basic compression is illegal in turn.
//! - bit 3 clear: basic compression. Bit 2 announces an explicit filter
//!   byte (Copy / Palette / Gradient), bits 0-1 select the zlib stream.
//!
//! Basic-mode payloads smaller than 12 bytes are sent raw; anything larger
//! is a compact-length-prefixed zlib block continuing the selected
//! stream's history.
//!
//! The Gradient filter is intentionally not implemented: this client
//! never advertises it, so a server sending it is out of contract.

use crate::{Decoder, InflateStream, TIGHT, TIGHT_PNG};
use anyhow::{bail, Context, Result};
use rfbx_protocol::{RecvStream, UpdateRect};
use rfbx_render::{ImageFormat, Renderer};

const MODE_FILL: u8 = 0x08;
const MODE_JPEG: u8 = 0x09;
const MODE_PNG: u8 = 0x0A;

const EXPLICIT_FILTER: u8 = 0x04;

const FILTER_COPY: u8 = 0;
const FILTER_PALETTE: u8 = 1;
const FILTER_GRADIENT: u8 = 2;

/// Payloads below this size are never compressed.
const MIN_TO_COMPRESS: usize = 12;

/// Read a Tight compact length (1-3 bytes, 7 bits per byte, third byte
/// taken whole).
pub async fn read_compact_length(stream: &mut RecvStream) -> Result<usize> {
    let b0 = stream.read_u8().await?;
    let mut len = (b0 & 0x7F) as usize;
    if b0 & 0x80 == 0 {
        return Ok(len);
    }
    let b1 = stream.read_u8().await?;
    len |= ((b1 & 0x7F) as usize) << 7;
    if b1 & 0x80 == 0 {
        return Ok(len);
    }
    let b2 = stream.read_u8().await?;
    len |= (b2 as usize) << 14;
    Ok(len)
}

/// Encode a compact length. Inverse of [`read_compact_length`] on
/// `[0, 2^21)`.
pub fn encode_compact_length(mut len: usize) -> Vec<u8> {
    debug_assert!(len < 1 << 21);
    let mut out = Vec::with_capacity(3);
    loop {
        let byte = (len & 0x7F) as u8;
        len >>= 7;
        if len == 0 {
            out.push(byte);
            return out;
        }
        out.push(byte | 0x80);
    }
}

/// Which of the two Tight flavors a decoder instance speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flavor {
    Tight,
    TightPng,
}

/// Decoder for Tight (type 7) and TightPNG (type -260).
///
/// Owns four zlib streams that persist across rectangles; they are reset
/// only when the control byte commands it.
pub struct TightDecoder {
    streams: [InflateStream; 4],
    flavor: Flavor,
    /// Reusable RGBA scratch, grown lazily to the largest rectangle seen.
    scratch: Vec<u8>,
}

impl TightDecoder {
    pub fn tight() -> Self {
        Self::with_flavor(Flavor::Tight)
    }

    pub fn tight_png() -> Self {
        Self::with_flavor(Flavor::TightPng)
    }

    fn with_flavor(flavor: Flavor) -> Self {
        Self {
            streams: Default::default(),
            flavor,
            scratch: Vec::new(),
        }
    }

    /// Read a basic-mode payload: raw when small, otherwise a compressed
    /// block inflated through the selected stream.
    async fn read_data(
        &mut self,
        stream: &mut RecvStream,
        stream_id: usize,
        uncompressed: usize,
    ) -> Result<Vec<u8>> {
        if uncompressed < MIN_TO_COMPRESS {
            return Ok(stream.read_bytes(uncompressed).await?);
        }
        let compressed_len = read_compact_length(stream).await?;
        let compressed = stream
            .read_bytes(compressed_len)
            .await
            .with_context(|| format!("Tight: failed to read {compressed_len} compressed bytes"))?;
        let z = &mut self.streams[stream_id];
        z.set_input(&compressed);
        z.inflate(uncompressed)
            .with_context(|| format!("Tight: stream {stream_id} failed to produce {uncompressed} bytes"))
    }

}

impl Decoder for TightDecoder {
    fn encoding(&self) -> i32 {
        match self.flavor {
            Flavor::Tight => TIGHT,
            Flavor::TightPng => TIGHT_PNG,
        }
    }

    async fn decode_rect<R: Renderer>(
        &mut self,
        rect: &UpdateRect,
        stream: &mut RecvStream,
        renderer: &mut R,
        _depth: u8,
    ) -> Result<()> {
        let ctl = stream.read_u8().await.with_context(|| {
            format!("Tight: failed to read control byte at ({}, {})", rect.x, rect.y)
        })?;

        // Stream resets apply before any other action.
        for (i, z) in self.streams.iter_mut().enumerate() {
            if ctl & (1 << i) != 0 {
                tracing::debug!("Tight: resetting zlib stream {i}");
                z.reset();
            }
        }

        let mode = ctl >> 4;
        let width = rect.width as usize;
        let height = rect.height as usize;

        match mode {
            MODE_FILL => {
                let rgb = stream.read_bytes(3).await.context("Tight: fill color")?;
                if width > 0 && height > 0 {
                    renderer.fill_rect(
                        rect.x,
                        rect.y,
                        rect.width,
                        rect.height,
                        [rgb[0], rgb[1], rgb[2], 255],
                    )?;
                }
                Ok(())
            }
            MODE_JPEG => {
                let len = read_compact_length(stream).await?;
                let data = stream
                    .read_bytes(len)
                    .await
                    .with_context(|| format!("Tight: failed to read {len} JPEG bytes"))?;
                renderer.image_rect(rect.x, rect.y, rect.width, rect.height, ImageFormat::Jpeg, &data)
            }
            MODE_PNG => {
                if self.flavor != Flavor::TightPng {
                    bail!("Tight: PNG rectangle outside TightPNG mode");
                }
                let len = read_compact_length(stream).await?;
                let data = stream
                    .read_bytes(len)
                    .await
                    .with_context(|| format!("TightPNG: failed to read {len} PNG bytes"))?;
                renderer.image_rect(rect.x, rect.y, rect.width, rect.height, ImageFormat::Png, &data)
            }
            mode if mode & 0x08 == 0 => {
                if self.flavor == Flavor::TightPng {
                    bail!("TightPNG: basic compression is illegal");
                }
                let stream_id = (mode & 0x03) as usize;
                let filter = if mode & EXPLICIT_FILTER != 0 {
                    stream.read_u8().await.context("Tight: filter byte")?
                } else {
                    FILTER_COPY
                };

                match filter {
                    FILTER_COPY => {
                        let data = self.read_data(stream, stream_id, width * height * 3).await?;
                        if width == 0 || height == 0 {
                            return Ok(());
                        }
                        self.scratch.clear();
                        for px in data.chunks_exact(3) {
                            self.scratch.extend_from_slice(&[px[0], px[1], px[2], 255]);
                        }
                        renderer.blit_image(rect.x, rect.y, rect.width, rect.height, &self.scratch)
                    }
                    FILTER_PALETTE => {
                        let num_colors = stream.read_u8().await? as usize + 1;
                        let palette_rgb = stream
                            .read_bytes(num_colors * 3)
                            .await
                            .context("Tight: palette colors")?;
                        let mut palette = Vec::with_capacity(num_colors);
                        for c in palette_rgb.chunks_exact(3) {
                            palette.push([c[0], c[1], c[2], 255]);
                        }

                        let row_bytes = if num_colors == 2 {
                            width.div_ceil(8)
                        } else {
                            width
                        };
                        let data = self.read_data(stream, stream_id, row_bytes * height).await?;
                        if width == 0 || height == 0 {
                            return Ok(());
                        }

                        self.scratch.clear();
                        if num_colors == 2 {
                            // One bit per pixel, MSB first, rows padded to
                            // byte boundaries.
                            for row in data.chunks_exact(row_bytes) {
                                for x in 0..width {
                                    let bit = (row[x / 8] >> (7 - (x % 8))) & 1;
                                    self.scratch.extend_from_slice(&palette[bit as usize]);
                                }
                            }
                        } else {
                            for &idx in &data {
                                let color = palette.get(idx as usize).ok_or_else(|| {
                                    anyhow::anyhow!(
                                        "Tight: palette index {idx} out of range ({num_colors} colors)"
                                    )
                                })?;
                                self.scratch.extend_from_slice(color);
                            }
                        }
                        renderer.blit_image(rect.x, rect.y, rect.width, rect.height, &self.scratch)
                    }
                    FILTER_GRADIENT => bail!("Tight: gradient filter is not supported"),
                    other => bail!("Tight: invalid filter {other}"),
                }
            }
            other => bail!("Tight: invalid compression control {other:#x}"),
        }
    }
}
