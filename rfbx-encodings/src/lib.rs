//! Framebuffer rectangle decoders.
//!
//! One decoder per RFB encoding. Each decoder consumes exactly the bytes of
//! one rectangle from the receive stream and emits pixel regions to the
//! [`Renderer`]; the protocol engine processes one rectangle at a time and
//! a decoder must never read past its rectangle (the test suites feed a
//! sentinel byte after each rectangle and assert it survives).
//!
//! Decoders may suspend on the stream arbitrarily often; the renderer is
//! only borrowed for the duration of the call.
//!
//! # Decoder state
//!
//! - Raw, CopyRect, RRE: stateless across rectangles.
//! - Hextile: foreground/background carry across the tiles of one
//!   rectangle only.
//! - Tight/TightPNG: four zlib streams that persist across rectangles and
//!   reset only when the wire commands it.
//! - ZRLE: a single zlib stream for the whole connection.
//! - JPEG: a cache of the last seen Huffman/quantization table segments.
//!
//! # Pixel layout
//!
//! This client negotiates a fixed format per depth (see
//! `PixelFormat::from_depth`): at depth 24, wire pixels are 4 bytes
//! `R, G, B, X`; at depth 8 a single byte carries 2 bits per channel.
//! Alpha is forced to 255 on everything handed to the renderer.

use anyhow::Result;
use rfbx_protocol::{RecvStream, UpdateRect};
use rfbx_render::Renderer;

pub mod copyrect;
pub mod hextile;
pub mod inflate;
pub mod jpeg;
pub mod raw;
pub mod rre;
pub mod tight;
pub mod zrle;

pub use copyrect::CopyRectDecoder;
pub use hextile::HextileDecoder;
pub use inflate::InflateStream;
pub use jpeg::JpegDecoder;
pub use raw::RawDecoder;
pub use rre::RreDecoder;
pub use tight::TightDecoder;
pub use zrle::ZrleDecoder;

pub use rfbx_protocol::messages::encodings::*;

/// A rectangle decoder.
///
/// `decode_rect` must consume exactly the encoding's bytes for the given
/// rectangle and return when done. Zero-area rectangles still consume any
/// fixed-size header their wire format carries.
#[allow(async_fn_in_trait)]
pub trait Decoder {
    /// The encoding this decoder handles.
    fn encoding(&self) -> i32;

    /// Decode one rectangle, emitting pixels to the renderer.
    async fn decode_rect<R: Renderer>(
        &mut self,
        rect: &UpdateRect,
        stream: &mut RecvStream,
        renderer: &mut R,
        depth: u8,
    ) -> Result<()>;
}

/// Bytes per wire pixel at a given depth.
pub(crate) fn pixel_size(depth: u8) -> usize {
    if depth == 8 {
        1
    } else {
        4
    }
}

/// Expand a depth-8 wire pixel (2 bits per channel, R in the low bits) to
/// RGBA.
pub(crate) fn expand_depth8(b: u8) -> [u8; 4] {
    let scale = |v: u8| (v as u16 * 255 / 3) as u8;
    [scale(b & 3), scale((b >> 2) & 3), scale((b >> 4) & 3), 255]
}

/// Read one wire pixel as RGBA with alpha forced to 255.
pub(crate) async fn read_pixel(stream: &mut RecvStream, depth: u8) -> Result<[u8; 4]> {
    if depth == 8 {
        Ok(expand_depth8(stream.read_u8().await?))
    } else {
        let raw = stream.read_bytes(4).await?;
        Ok([raw[0], raw[1], raw[2], 255])
    }
}

/// Convert a buffer of wire pixels into RGBA with alpha forced to 255.
pub(crate) fn pixels_to_rgba(data: &[u8], depth: u8) -> Vec<u8> {
    if depth == 8 {
        data.iter().flat_map(|&b| expand_depth8(b)).collect()
    } else {
        let mut out = Vec::with_capacity(data.len());
        for px in data.chunks_exact(4) {
            out.extend_from_slice(&[px[0], px[1], px[2], 255]);
        }
        out
    }
}
