//! Hextile encoding - 16x16 tiles with per-tile subencodings.
//!
//! The rectangle is walked in 16x16 tiles, row-major (edge tiles are
//! smaller). Each tile starts with a subencoding byte:
//!
//! - `0x01` Raw: `tw * th` wire pixels follow, other bits ignored.
//! - `0x02` BackgroundSpecified: a new background pixel follows.
//! - `0x04` ForegroundSpecified: a new foreground pixel follows.
//! - `0x08` AnySubrects: a count byte and that many subrectangles follow.
//! - `0x10` SubrectsColoured: each subrectangle carries its own pixel.
//!
//! Subrectangles pack position and size into two bytes: `xy` (high nibble
//! x, low nibble y) and `wh` (high nibble width-1, low nibble height-1).
//!
//! Foreground and background persist across the tiles of one rectangle.
//! A subencoding of zero normally means "fill with the current
//! background", with one documented quirk: when the *previous* tile was
//! Raw, a zero subencoding leaves the tile untouched. Peers in the wild
//! depend on this, so it is kept bug-for-bug.

use crate::{pixel_size, pixels_to_rgba, read_pixel, Decoder, HEXTILE};
use anyhow::{bail, Context, Result};
use rfbx_protocol::{RecvStream, UpdateRect};
use rfbx_render::Renderer;

const RAW_BIT: u8 = 0x01;
const BACKGROUND_SPECIFIED: u8 = 0x02;
const FOREGROUND_SPECIFIED: u8 = 0x04;
const ANY_SUBRECTS: u8 = 0x08;
const SUBRECTS_COLOURED: u8 = 0x10;

/// Largest meaningful combination of subencoding bits.
const MAX_SUBENCODING: u8 = 30;

const TILE: u16 = 16;

/// Decoder for Hextile encoding (type 5).
pub struct HextileDecoder;

impl Decoder for HextileDecoder {
    fn encoding(&self) -> i32 {
        HEXTILE
    }

    async fn decode_rect<R: Renderer>(
        &mut self,
        rect: &UpdateRect,
        stream: &mut RecvStream,
        renderer: &mut R,
        depth: u8,
    ) -> Result<()> {
        if rect.width == 0 || rect.height == 0 {
            return Ok(());
        }

        // Foreground/background carry across tiles within this rectangle.
        let mut background: Option<[u8; 4]> = None;
        let mut foreground: Option<[u8; 4]> = None;
        let mut last_subencoding: u8 = 0;

        let mut ty = 0u16;
        while ty < rect.height {
            let th = TILE.min(rect.height - ty);
            let mut tx = 0u16;
            while tx < rect.width {
                let tw = TILE.min(rect.width - tx);
                let abs_x = rect.x + tx;
                let abs_y = rect.y + ty;

                let subencoding = stream.read_u8().await.with_context(|| {
                    format!("Hextile: failed to read subencoding at tile ({tx}, {ty})")
                })?;
                if subencoding > MAX_SUBENCODING {
                    bail!("Hextile: illegal subencoding {subencoding} at tile ({tx}, {ty})");
                }

                if subencoding == 0 {
                    // Blank tile after a Raw tile is ignored; otherwise it
                    // means "fill with current background".
                    if last_subencoding & RAW_BIT == 0 {
                        let bg = background
                            .ok_or_else(|| anyhow::anyhow!("Hextile: blank tile with no background"))?;
                        renderer.fill_rect(abs_x, abs_y, tw, th, bg)?;
                    }
                } else if subencoding & RAW_BIT != 0 {
                    let total = tw as usize * th as usize * pixel_size(depth);
                    let data = stream
                        .read_bytes(total)
                        .await
                        .context("Hextile: failed to read raw tile")?;
                    renderer.blit_image(abs_x, abs_y, tw, th, &pixels_to_rgba(&data, depth))?;
                } else {
                    if subencoding & BACKGROUND_SPECIFIED != 0 {
                        background = Some(read_pixel(stream, depth).await?);
                    }
                    let bg = background
                        .ok_or_else(|| anyhow::anyhow!("Hextile: tile requires background but none set"))?;
                    renderer.fill_rect(abs_x, abs_y, tw, th, bg)?;

                    if subencoding & FOREGROUND_SPECIFIED != 0 {
                        foreground = Some(read_pixel(stream, depth).await?);
                    }

                    if subencoding & ANY_SUBRECTS != 0 {
                        let count = stream.read_u8().await?;
                        let coloured = subencoding & SUBRECTS_COLOURED != 0;
                        for _ in 0..count {
                            let color = if coloured {
                                read_pixel(stream, depth).await?
                            } else {
                                foreground.ok_or_else(|| {
                                    anyhow::anyhow!("Hextile: subrects with no foreground set")
                                })?
                            };
                            let xy = stream.read_u8().await?;
                            let wh = stream.read_u8().await?;
                            let sx = (xy >> 4) as u16;
                            let sy = (xy & 0x0F) as u16;
                            let sw = ((wh >> 4) + 1) as u16;
                            let sh = ((wh & 0x0F) + 1) as u16;
                            renderer.fill_rect(abs_x + sx, abs_y + sy, sw, sh, color)?;
                        }
                    }
                }

                last_subencoding = subencoding;
                tx += TILE;
            }
            ty += TILE;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::*;
    use rfbx_render::SoftwareRenderer;

    #[tokio::test]
    async fn test_background_fill_tile() {
        let mut decoder = HextileDecoder;
        let mut renderer = SoftwareRenderer::new(16, 16);

        let mut wire = vec![BACKGROUND_SPECIFIED];
        wire.extend_from_slice(&[0x11, 0x22, 0x33, 0x00]);

        let mut stream = stream_with_sentinel(&wire);
        decoder
            .decode_rect(&rect(0, 0, 16, 16, HEXTILE), &mut stream, &mut renderer, 24)
            .await
            .unwrap();
        assert_sentinel(&mut stream).await;
        assert_eq!(renderer.pixel(0, 0), [0x11, 0x22, 0x33, 255]);
        assert_eq!(renderer.pixel(15, 15), [0x11, 0x22, 0x33, 255]);
    }

    #[tokio::test]
    async fn test_background_carries_across_tiles() {
        let mut decoder = HextileDecoder;
        let mut renderer = SoftwareRenderer::new(32, 16);

        // First tile sets the background, second is blank (reuses it).
        let mut wire = vec![BACKGROUND_SPECIFIED];
        wire.extend_from_slice(&[0xAA, 0xBB, 0xCC, 0x00]);
        wire.push(0x00);

        let mut stream = stream_with_sentinel(&wire);
        decoder
            .decode_rect(&rect(0, 0, 32, 16, HEXTILE), &mut stream, &mut renderer, 24)
            .await
            .unwrap();
        assert_sentinel(&mut stream).await;
        assert_eq!(renderer.pixel(31, 15), [0xAA, 0xBB, 0xCC, 255]);
    }

    #[tokio::test]
    async fn test_blank_after_raw_is_ignored() {
        let mut decoder = HextileDecoder;
        let mut renderer = SoftwareRenderer::new(32, 16);
        renderer.fill_rect(16, 0, 16, 16, [7, 7, 7, 255]).unwrap();
        renderer.clear_ops();

        // Tile 0: raw, all green. Tile 1: subencoding 0, must leave the
        // pre-seeded pixels alone.
        let mut wire = vec![RAW_BIT];
        for _ in 0..(16 * 16) {
            wire.extend_from_slice(&[0x00, 0xFF, 0x00, 0x00]);
        }
        wire.push(0x00);

        let mut stream = stream_with_sentinel(&wire);
        decoder
            .decode_rect(&rect(0, 0, 32, 16, HEXTILE), &mut stream, &mut renderer, 24)
            .await
            .unwrap();
        assert_sentinel(&mut stream).await;
        assert_eq!(renderer.pixel(0, 0), [0, 255, 0, 255]);
        assert_eq!(renderer.pixel(16, 0), [7, 7, 7, 255], "blank after raw must not paint");
    }

    #[tokio::test]
    async fn test_subrects_with_foreground() {
        let mut decoder = HextileDecoder;
        let mut renderer = SoftwareRenderer::new(16, 16);

        let mut wire = vec![BACKGROUND_SPECIFIED | FOREGROUND_SPECIFIED | ANY_SUBRECTS];
        wire.extend_from_slice(&[0x00, 0x00, 0x00, 0x00]); // background black
        wire.extend_from_slice(&[0xFF, 0xFF, 0xFF, 0x00]); // foreground white
        wire.push(1); // one subrect
        wire.push(0x23); // x=2, y=3
        wire.push(0x10); // w=2, h=1

        let mut stream = stream_with_sentinel(&wire);
        decoder
            .decode_rect(&rect(0, 0, 16, 16, HEXTILE), &mut stream, &mut renderer, 24)
            .await
            .unwrap();
        assert_sentinel(&mut stream).await;
        assert_eq!(renderer.pixel(2, 3), [255, 255, 255, 255]);
        assert_eq!(renderer.pixel(3, 3), [255, 255, 255, 255]);
        assert_eq!(renderer.pixel(4, 3), [0, 0, 0, 255]);
        assert_eq!(renderer.pixel(2, 4), [0, 0, 0, 255]);
    }

    #[tokio::test]
    async fn test_coloured_subrects() {
        let mut decoder = HextileDecoder;
        let mut renderer = SoftwareRenderer::new(8, 8);

        let mut wire = vec![BACKGROUND_SPECIFIED | ANY_SUBRECTS | SUBRECTS_COLOURED];
        wire.extend_from_slice(&[0x00, 0x00, 0x00, 0x00]);
        wire.push(1);
        wire.extend_from_slice(&[0x00, 0x00, 0xFF, 0x00]); // blue subrect
        wire.push(0x00); // x=0, y=0
        wire.push(0x77); // w=8, h=8

        let mut stream = stream_with_sentinel(&wire);
        decoder
            .decode_rect(&rect(0, 0, 8, 8, HEXTILE), &mut stream, &mut renderer, 24)
            .await
            .unwrap();
        assert_sentinel(&mut stream).await;
        assert_eq!(renderer.pixel(7, 7), [0, 0, 255, 255]);
    }

    #[tokio::test]
    async fn test_illegal_subencoding_rejected() {
        let mut decoder = HextileDecoder;
        let mut renderer = SoftwareRenderer::new(16, 16);
        let mut stream = stream_with_sentinel(&[31]);
        let result = decoder
            .decode_rect(&rect(0, 0, 16, 16, HEXTILE), &mut stream, &mut renderer, 24)
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_edge_tiles_are_smaller() {
        let mut decoder = HextileDecoder;
        let mut renderer = SoftwareRenderer::new(20, 20);

        // 20x20 rect: 2x2 tile grid (16+4 per axis), all background-filled.
        let mut wire = vec![BACKGROUND_SPECIFIED];
        wire.extend_from_slice(&[0x44, 0x55, 0x66, 0x00]);
        wire.extend_from_slice(&[0x00, 0x00, 0x00]); // three blank tiles

        let mut stream = stream_with_sentinel(&wire);
        decoder
            .decode_rect(&rect(0, 0, 20, 20, HEXTILE), &mut stream, &mut renderer, 24)
            .await
            .unwrap();
        assert_sentinel(&mut stream).await;
        assert_eq!(renderer.pixel(19, 19), [0x44, 0x55, 0x66, 255]);
    }
}
