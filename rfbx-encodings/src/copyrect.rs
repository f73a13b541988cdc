//! CopyRect encoding - copy a region from elsewhere in the framebuffer.
//!
//! The payload is a fixed 4-byte header (`srcX:u16, srcY:u16`), read even
//! for zero-area rectangles.

use crate::{Decoder, COPY_RECT};
use anyhow::{Context, Result};
use rfbx_protocol::{RecvStream, UpdateRect};
use rfbx_render::Renderer;

/// Decoder for CopyRect encoding (type 1). Stateless.
pub struct CopyRectDecoder;

impl Decoder for CopyRectDecoder {
    fn encoding(&self) -> i32 {
        COPY_RECT
    }

    async fn decode_rect<R: Renderer>(
        &mut self,
        rect: &UpdateRect,
        stream: &mut RecvStream,
        renderer: &mut R,
        _depth: u8,
    ) -> Result<()> {
        let src_x = stream.read_u16().await?;
        let src_y = stream.read_u16().await?;

        if rect.width == 0 || rect.height == 0 {
            return Ok(());
        }

        renderer
            .copy_image(src_x, src_y, rect.x, rect.y, rect.width, rect.height)
            .context("CopyRect: copy failed")
    }
}
