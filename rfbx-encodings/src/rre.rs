//! RRE (Rise-and-Run-length Encoding) - background fill plus colored
//! subrectangles.
//!
//! Wire format: `subrects:u32`, background pixel, then per subrectangle a
//! pixel color and `sx:u16, sy:u16, sw:u16, sh:u16` relative to the
//! rectangle origin. Zero-area rectangles still carry the count and
//! background header, and their subrectangle count must be zero.

use crate::{pixel_size, read_pixel, Decoder, RRE};
use anyhow::{bail, Context, Result};
use rfbx_protocol::{RecvStream, UpdateRect};
use rfbx_render::Renderer;

/// Decoder for RRE encoding (type 2). Stateless.
pub struct RreDecoder;

impl Decoder for RreDecoder {
    fn encoding(&self) -> i32 {
        RRE
    }

    async fn decode_rect<R: Renderer>(
        &mut self,
        rect: &UpdateRect,
        stream: &mut RecvStream,
        renderer: &mut R,
        depth: u8,
    ) -> Result<()> {
        let subrects = stream.read_u32().await?;
        let background = read_pixel(stream, depth)
            .await
            .with_context(|| format!("RRE: failed to read {}-byte background", pixel_size(depth)))?;

        if rect.width == 0 || rect.height == 0 {
            if subrects != 0 {
                bail!("RRE: zero-area rectangle announces {subrects} subrectangles");
            }
            return Ok(());
        }

        renderer
            .fill_rect(rect.x, rect.y, rect.width, rect.height, background)
            .context("RRE: background fill failed")?;

        for i in 0..subrects {
            let color = read_pixel(stream, depth).await?;
            let sx = stream.read_u16().await?;
            let sy = stream.read_u16().await?;
            let sw = stream.read_u16().await?;
            let sh = stream.read_u16().await?;
            renderer
                .fill_rect(rect.x + sx, rect.y + sy, sw, sh, color)
                .with_context(|| format!("RRE: subrectangle {i} fill failed"))?;
        }
        Ok(())
    }
}
