//! ZRLE (Zlib Run-Length Encoding) - zlib-wrapped 64x64 tiles.
//!
//! The rectangle payload is `length:u32` followed by that many compressed
//! bytes, which continue a single zlib stream that lives for the whole
//! connection. The decompressed data is a sequence of 64x64 tiles
//! (row-major, smaller at the edges), each starting with a subencoding
//! byte:
//!
//! - `0`: raw, `tw * th` CPIXELs.
//! - `1`: solid, one CPIXEL.
//! - `2..=16`: packed palette of that many CPIXELs; indices are packed
//!   1, 2 or 4 bits per pixel, rows padded to byte boundaries.
//! - `128`: plain RLE: CPIXEL plus a run length encoded as 255-terminated
//!   byte sums.
//! - `130..=255`: palette RLE of `subencoding - 128` CPIXELs; index bytes
//!   with the high bit set are followed by a run length.
//! - `17..=127`, `129`: unused, rejected.
//!
//! A CPIXEL is 3 bytes (R, G, B): with the client's 32-bit little-endian
//! format the zero top byte is elided on the wire.

use crate::{Decoder, InflateStream, ZRLE};
use anyhow::{bail, Context, Result};
use rfbx_protocol::{RecvStream, UpdateRect};
use rfbx_render::Renderer;

const TILE: u16 = 64;

/// Decoder for ZRLE encoding (type 16). Owns the connection-wide zlib
/// stream.
pub struct ZrleDecoder {
    zlib: InflateStream,
}

impl Default for ZrleDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl ZrleDecoder {
    pub fn new() -> Self {
        Self {
            zlib: InflateStream::new(),
        }
    }

    fn read_cpixel(z: &mut InflateStream) -> Result<[u8; 4]> {
        let raw = z.inflate(3)?;
        Ok([raw[0], raw[1], raw[2], 255])
    }

    /// 255-terminated run length: each 255 byte adds 255, the final byte
    /// closes the sum; the encoded value is `sum + 1`.
    fn read_run_length(z: &mut InflateStream) -> Result<usize> {
        let mut run = 1usize;
        loop {
            let b = z.read_u8()?;
            run += b as usize;
            if b != 255 {
                return Ok(run);
            }
        }
    }
}

impl Decoder for ZrleDecoder {
    fn encoding(&self) -> i32 {
        ZRLE
    }

    async fn decode_rect<R: Renderer>(
        &mut self,
        rect: &UpdateRect,
        stream: &mut RecvStream,
        renderer: &mut R,
        _depth: u8,
    ) -> Result<()> {
        let length = stream.read_u32().await? as usize;
        let compressed = stream
            .read_bytes(length)
            .await
            .with_context(|| format!("ZRLE: failed to read {length} compressed bytes"))?;
        self.zlib.set_input(&compressed);

        let z = &mut self.zlib;
        let mut ty = 0u16;
        while ty < rect.height {
            let th = TILE.min(rect.height - ty);
            let mut tx = 0u16;
            while tx < rect.width {
                let tw = TILE.min(rect.width - tx);
                let abs_x = rect.x + tx;
                let abs_y = rect.y + ty;
                let pixels = tw as usize * th as usize;

                let subencoding = z.read_u8().context("ZRLE: tile subencoding")?;
                match subencoding {
                    0 => {
                        let data = z.inflate(pixels * 3)?;
                        let mut rgba = Vec::with_capacity(pixels * 4);
                        for px in data.chunks_exact(3) {
                            rgba.extend_from_slice(&[px[0], px[1], px[2], 255]);
                        }
                        renderer.blit_image(abs_x, abs_y, tw, th, &rgba)?;
                    }
                    1 => {
                        let color = Self::read_cpixel(z)?;
                        renderer.fill_rect(abs_x, abs_y, tw, th, color)?;
                    }
                    2..=16 => {
                        let palette_size = subencoding as usize;
                        let mut palette = Vec::with_capacity(palette_size);
                        for _ in 0..palette_size {
                            palette.push(Self::read_cpixel(z)?);
                        }
                        let bits = match palette_size {
                            2 => 1,
                            3..=4 => 2,
                            _ => 4,
                        };
                        let row_bytes = (tw as usize * bits).div_ceil(8);
                        let data = z.inflate(row_bytes * th as usize)?;

                        let mut rgba = Vec::with_capacity(pixels * 4);
                        let mask = (1u8 << bits) - 1;
                        for row in data.chunks_exact(row_bytes) {
                            for x in 0..tw as usize {
                                let bit_pos = x * bits;
                                let byte = row[bit_pos / 8];
                                let shift = 8 - bits - (bit_pos % 8);
                                let idx = ((byte >> shift) & mask) as usize;
                                let color = palette.get(idx).ok_or_else(|| {
                                    anyhow::anyhow!("ZRLE: palette index {idx} out of range")
                                })?;
                                rgba.extend_from_slice(color);
                            }
                        }
                        renderer.blit_image(abs_x, abs_y, tw, th, &rgba)?;
                    }
                    128 => {
                        let mut rgba = Vec::with_capacity(pixels * 4);
                        let mut remaining = pixels;
                        while remaining > 0 {
                            let color = Self::read_cpixel(z)?;
                            let run = Self::read_run_length(z)?;
                            if run > remaining {
                                bail!("ZRLE: RLE run {run} exceeds tile remainder {remaining}");
                            }
                            for _ in 0..run {
                                rgba.extend_from_slice(&color);
                            }
                            remaining -= run;
                        }
                        renderer.blit_image(abs_x, abs_y, tw, th, &rgba)?;
                    }
                    130..=255 => {
                        let palette_size = (subencoding - 128) as usize;
                        let mut palette = Vec::with_capacity(palette_size);
                        for _ in 0..palette_size {
                            palette.push(Self::read_cpixel(z)?);
                        }
                        let mut rgba = Vec::with_capacity(pixels * 4);
                        let mut remaining = pixels;
                        while remaining > 0 {
                            let idx = z.read_u8()?;
                            let run = if idx & 0x80 != 0 {
                                Self::read_run_length(z)?
                            } else {
                                1
                            };
                            if run > remaining {
                                bail!("ZRLE: palette run {run} exceeds tile remainder {remaining}");
                            }
                            let color = palette.get((idx & 0x7F) as usize).ok_or_else(|| {
                                anyhow::anyhow!("ZRLE: palette index {} out of range", idx & 0x7F)
                            })?;
                            for _ in 0..run {
                                rgba.extend_from_slice(color);
                            }
                            remaining -= run;
                        }
                        renderer.blit_image(abs_x, abs_y, tw, th, &rgba)?;
                    }
                    other => bail!("ZRLE: unused subencoding {other}"),
                }

                tx += TILE;
            }
            ty += TILE;
        }

        // Any input left over is the sync-flush marker closing this block;
        // the next rectangle's pull consumes it as an empty stored block.
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::*;
    use flate2::{Compress, Compression, FlushCompress};
    use rfbx_render::SoftwareRenderer;

    /// Sync-flush compressor reused across rectangles, like a real server.
    struct ServerZlib(Compress);

    impl ServerZlib {
        fn new() -> Self {
            Self(Compress::new(Compression::default(), true))
        }

        fn rect_payload(&mut self, tile_data: &[u8]) -> Vec<u8> {
            let before = self.0.total_out();
            let mut out = vec![0u8; tile_data.len() + 128];
            self.0
                .compress(tile_data, &mut out, FlushCompress::Sync)
                .unwrap();
            out.truncate((self.0.total_out() - before) as usize);
            let mut wire = (out.len() as u32).to_be_bytes().to_vec();
            wire.extend_from_slice(&out);
            wire
        }
    }

    #[tokio::test]
    async fn test_solid_tile() {
        let mut decoder = ZrleDecoder::new();
        let mut renderer = SoftwareRenderer::new(8, 8);
        let mut server = ServerZlib::new();

        let wire = server.rect_payload(&[1, 0xAA, 0xBB, 0xCC]);
        let mut stream = stream_with_sentinel(&wire);
        decoder
            .decode_rect(&rect(0, 0, 8, 8, ZRLE), &mut stream, &mut renderer, 24)
            .await
            .unwrap();
        assert_sentinel(&mut stream).await;
        assert_eq!(renderer.pixel(7, 7), [0xAA, 0xBB, 0xCC, 255]);
    }

    #[tokio::test]
    async fn test_raw_tile() {
        let mut decoder = ZrleDecoder::new();
        let mut renderer = SoftwareRenderer::new(2, 2);
        let mut server = ServerZlib::new();

        let mut tile = vec![0u8]; // raw subencoding
        tile.extend_from_slice(&[255, 0, 0, 0, 255, 0, 0, 0, 255, 9, 9, 9]);
        let wire = server.rect_payload(&tile);

        let mut stream = stream_with_sentinel(&wire);
        decoder
            .decode_rect(&rect(0, 0, 2, 2, ZRLE), &mut stream, &mut renderer, 24)
            .await
            .unwrap();
        assert_sentinel(&mut stream).await;
        assert_eq!(renderer.pixel(0, 0), [255, 0, 0, 255]);
        assert_eq!(renderer.pixel(1, 0), [0, 255, 0, 255]);
        assert_eq!(renderer.pixel(0, 1), [0, 0, 255, 255]);
        assert_eq!(renderer.pixel(1, 1), [9, 9, 9, 255]);
    }

    #[tokio::test]
    async fn test_packed_palette_tile() {
        let mut decoder = ZrleDecoder::new();
        let mut renderer = SoftwareRenderer::new(10, 1);
        let mut server = ServerZlib::new();

        // Two colors, 1 bit per pixel, 10 pixels: 2 row bytes.
        let mut tile = vec![2u8];
        tile.extend_from_slice(&[0, 0, 0]); // palette[0]
        tile.extend_from_slice(&[255, 255, 255]); // palette[1]
        tile.extend_from_slice(&[0b1010_1010, 0b1000_0000]);
        let wire = server.rect_payload(&tile);

        let mut stream = stream_with_sentinel(&wire);
        decoder
            .decode_rect(&rect(0, 0, 10, 1, ZRLE), &mut stream, &mut renderer, 24)
            .await
            .unwrap();
        assert_sentinel(&mut stream).await;
        for x in 0..10u16 {
            let expected = if x % 2 == 0 { 255 } else { 0 };
            assert_eq!(renderer.pixel(x, 0)[0], expected, "pixel {x}");
        }
    }

    #[tokio::test]
    async fn test_plain_rle_tile() {
        let mut decoder = ZrleDecoder::new();
        let mut renderer = SoftwareRenderer::new(4, 2);
        let mut server = ServerZlib::new();

        // 8 pixels: run of 5 red, run of 3 blue.
        let mut tile = vec![128u8];
        tile.extend_from_slice(&[255, 0, 0, 4]); // red, run 5
        tile.extend_from_slice(&[0, 0, 255, 2]); // blue, run 3
        let wire = server.rect_payload(&tile);

        let mut stream = stream_with_sentinel(&wire);
        decoder
            .decode_rect(&rect(0, 0, 4, 2, ZRLE), &mut stream, &mut renderer, 24)
            .await
            .unwrap();
        assert_sentinel(&mut stream).await;
        assert_eq!(renderer.pixel(0, 0), [255, 0, 0, 255]);
        assert_eq!(renderer.pixel(0, 1), [255, 0, 0, 255]);
        assert_eq!(renderer.pixel(1, 1), [0, 0, 255, 255]);
        assert_eq!(renderer.pixel(3, 1), [0, 0, 255, 255]);
    }

    #[tokio::test]
    async fn test_palette_rle_tile() {
        let mut decoder = ZrleDecoder::new();
        let mut renderer = SoftwareRenderer::new(4, 1);
        let mut server = ServerZlib::new();

        // Two-color palette RLE: single index 0, then index 1 with run 3.
        let mut tile = vec![130u8];
        tile.extend_from_slice(&[10, 10, 10]);
        tile.extend_from_slice(&[20, 20, 20]);
        tile.push(0x00); // one pixel of palette[0]
        tile.push(0x81); // palette[1], run follows
        tile.push(2); // run = 3
        let wire = server.rect_payload(&tile);

        let mut stream = stream_with_sentinel(&wire);
        decoder
            .decode_rect(&rect(0, 0, 4, 1, ZRLE), &mut stream, &mut renderer, 24)
            .await
            .unwrap();
        assert_sentinel(&mut stream).await;
        assert_eq!(renderer.pixel(0, 0), [10, 10, 10, 255]);
        assert_eq!(renderer.pixel(1, 0), [20, 20, 20, 255]);
        assert_eq!(renderer.pixel(3, 0), [20, 20, 20, 255]);
    }

    #[tokio::test]
    async fn test_stream_persists_across_rectangles() {
        let mut decoder = ZrleDecoder::new();
        let mut renderer = SoftwareRenderer::new(8, 8);
        let mut server = ServerZlib::new();

        // Two rectangles compressed by one continuing server stream. A
        // decoder that reset its stream between rectangles would fail on
        // the second payload (no zlib header).
        let wire1 = server.rect_payload(&[1, 1, 2, 3]);
        let wire2 = server.rect_payload(&[1, 4, 5, 6]);

        let mut stream = stream_with_sentinel(&wire1);
        decoder
            .decode_rect(&rect(0, 0, 4, 4, ZRLE), &mut stream, &mut renderer, 24)
            .await
            .unwrap();
        assert_sentinel(&mut stream).await;

        let mut stream = stream_with_sentinel(&wire2);
        decoder
            .decode_rect(&rect(4, 0, 4, 4, ZRLE), &mut stream, &mut renderer, 24)
            .await
            .unwrap();
        assert_sentinel(&mut stream).await;
        assert_eq!(renderer.pixel(0, 0), [1, 2, 3, 255]);
        assert_eq!(renderer.pixel(4, 0), [4, 5, 6, 255]);
    }

    #[tokio::test]
    async fn test_unused_subencoding_rejected() {
        let mut decoder = ZrleDecoder::new();
        let mut renderer = SoftwareRenderer::new(4, 4);
        let mut server = ServerZlib::new();
        let wire = server.rect_payload(&[17]);
        let mut stream = stream_with_sentinel(&wire);
        let result = decoder
            .decode_rect(&rect(0, 0, 4, 4, ZRLE), &mut stream, &mut renderer, 24)
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_multi_tile_rect() {
        let mut decoder = ZrleDecoder::new();
        let mut renderer = SoftwareRenderer::new(130, 70);
        let mut server = ServerZlib::new();

        // 130x70 -> tiles 64+64+2 wide, 64+6 tall = 6 tiles, all solid.
        let mut tiles = Vec::new();
        for i in 0..6u8 {
            tiles.extend_from_slice(&[1, i, i, i]);
        }
        let wire = server.rect_payload(&tiles);

        let mut stream = stream_with_sentinel(&wire);
        decoder
            .decode_rect(&rect(0, 0, 130, 70, ZRLE), &mut stream, &mut renderer, 24)
            .await
            .unwrap();
        assert_sentinel(&mut stream).await;
        assert_eq!(renderer.pixel(0, 0), [0, 0, 0, 255]);
        assert_eq!(renderer.pixel(64, 0), [1, 1, 1, 255]);
        assert_eq!(renderer.pixel(128, 0), [2, 2, 2, 255]);
        assert_eq!(renderer.pixel(0, 64), [3, 3, 3, 255]);
        assert_eq!(renderer.pixel(129, 69), [5, 5, 5, 255]);
    }
}
