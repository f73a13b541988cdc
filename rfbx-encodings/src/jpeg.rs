//! JPEG encoding - rectangle payloads that are standalone JPEG images.
//!
//! There is no length prefix: the decoder walks the JPEG segment structure
//! to find where the image ends. Markers `0xD0..=0xD9` and `0x01` are
//! standalone two-byte markers; every other marker carries a 16-bit
//! big-endian length covering the length field itself. After a
//! Start-of-Scan header the entropy-coded data runs until the next marker
//! that is neither a stuffed zero (`0xFF 0x00`) nor a restart
//! (`0xFF 0xD0..=0xD7`); the scan never rewinds into the header on a
//! mismatch.
//!
//! Servers routinely omit the Huffman (`0xC4`) and quantization (`0xDB`)
//! tables on frames after the first. The decoder caches the last non-empty
//! table segments and splices them back in immediately after the SOF
//! marker whenever a later frame omits them, so the renderer always
//! receives a self-contained blob.

use crate::{Decoder, JPEG};
use anyhow::{bail, Context, Result};
use rfbx_protocol::{RecvStream, UpdateRect};
use rfbx_render::{ImageFormat, Renderer};

const MARKER_SOI: u8 = 0xD8;
const MARKER_EOI: u8 = 0xD9;
const MARKER_SOF0: u8 = 0xC0;
const MARKER_SOF2: u8 = 0xC2;
const MARKER_DHT: u8 = 0xC4;
const MARKER_DQT: u8 = 0xDB;
const MARKER_SOS: u8 = 0xDA;

/// Decoder for JPEG encoding (type 21).
///
/// Carries the table cache across rectangles for the connection lifetime.
pub struct JpegDecoder {
    cached_huffman: Vec<u8>,
    cached_quant: Vec<u8>,
}

impl Default for JpegDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl JpegDecoder {
    pub fn new() -> Self {
        Self {
            cached_huffman: Vec::new(),
            cached_quant: Vec::new(),
        }
    }
}

impl Decoder for JpegDecoder {
    fn encoding(&self) -> i32 {
        JPEG
    }

    async fn decode_rect<R: Renderer>(
        &mut self,
        rect: &UpdateRect,
        stream: &mut RecvStream,
        renderer: &mut R,
        _depth: u8,
    ) -> Result<()> {
        let soi = stream.read_bytes(2).await.context("JPEG: missing SOI")?;
        if soi != [0xFF, MARKER_SOI] {
            bail!("JPEG: payload does not start with SOI (got {soi:02X?})");
        }

        let mut out = soi;
        let mut sof_end: Option<usize> = None;
        let mut frame_huffman: Vec<u8> = Vec::new();
        let mut frame_quant: Vec<u8> = Vec::new();

        loop {
            let ff = stream.read_u8().await?;
            if ff != 0xFF {
                bail!("JPEG: expected marker, got {ff:#04x}");
            }
            let mut ty = stream.read_u8().await?;
            // 0xFF fill bytes before a marker are legal padding.
            while ty == 0xFF {
                ty = stream.read_u8().await?;
            }

            // Standalone markers carry no length.
            if ty == 0x01 || (0xD0..=0xD9).contains(&ty) {
                out.extend_from_slice(&[0xFF, ty]);
                if ty == MARKER_EOI {
                    break;
                }
                continue;
            }

            let length = stream.read_u16().await?;
            if length < 2 {
                bail!("JPEG: segment {ty:#04x} with impossible length {length}");
            }
            let body = stream
                .read_bytes(length as usize - 2)
                .await
                .with_context(|| format!("JPEG: truncated segment {ty:#04x}"))?;

            let seg_start = out.len();
            out.extend_from_slice(&[0xFF, ty]);
            out.extend_from_slice(&length.to_be_bytes());
            out.extend_from_slice(&body);

            match ty {
                MARKER_DHT => frame_huffman.extend_from_slice(&out[seg_start..]),
                MARKER_DQT => frame_quant.extend_from_slice(&out[seg_start..]),
                MARKER_SOF0 | MARKER_SOF2 => sof_end = Some(out.len()),
                MARKER_SOS => {
                    // The length covered only the scan header; entropy-coded
                    // data follows until the next real marker.
                    loop {
                        let pair = stream.peek_bytes(2).await?;
                        if pair[0] == 0xFF
                            && pair[1] != 0x00
                            && !(0xD0..=0xD7).contains(&pair[1])
                        {
                            break;
                        }
                        if pair[0] == 0xFF {
                            // Stuffed zero or restart marker: both bytes
                            // belong to the scan.
                            out.extend_from_slice(&stream.read_bytes(2).await?);
                        } else {
                            out.push(stream.read_u8().await?);
                        }
                    }
                }
                _ => {}
            }
        }

        let sof_end = sof_end.ok_or_else(|| anyhow::anyhow!("JPEG: frame has no SOF segment"))?;

        // Update the cache from this frame, or splice the cache into a
        // frame that omitted its tables.
        let mut inject: Vec<u8> = Vec::new();
        if frame_huffman.is_empty() {
            inject.extend_from_slice(&self.cached_huffman);
        } else {
            self.cached_huffman = frame_huffman;
        }
        if frame_quant.is_empty() {
            inject.extend_from_slice(&self.cached_quant);
        } else {
            self.cached_quant = frame_quant;
        }
        if !inject.is_empty() {
            out.splice(sof_end..sof_end, inject);
        }

        renderer.image_rect(rect.x, rect.y, rect.width, rect.height, ImageFormat::Jpeg, &out)
    }
}
