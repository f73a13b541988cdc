//! Raw encoding - uncompressed pixel data.
//!
//! The simplest encoding: `width * height` wire pixels, row-major. At
//! depth 24 each pixel is 4 bytes `R, G, B, X`; at depth 8 a single byte
//! carries 2 bits per channel, expanded to 8 bits by `v * 255 / 3`.

use crate::{pixel_size, pixels_to_rgba, Decoder, RAW};
use anyhow::{Context, Result};
use rfbx_protocol::{RecvStream, UpdateRect};
use rfbx_render::Renderer;

/// Decoder for Raw encoding (type 0). Stateless.
pub struct RawDecoder;

impl Decoder for RawDecoder {
    fn encoding(&self) -> i32 {
        RAW
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

        let total = rect.width as usize * rect.height as usize * pixel_size(depth);
        let data = stream
            .read_bytes(total)
            .await
            .with_context(|| format!("Raw: failed to read {total} pixel bytes"))?;

        let rgba = pixels_to_rgba(&data, depth);
        renderer
            .blit_image(rect.x, rect.y, rect.width, rect.height, &rgba)
            .context("Raw: blit failed")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::*;
    use rfbx_render::{RenderOp, SoftwareRenderer};

    #[tokio::test]
    async fn test_raw_2x2_depth24() {
        let mut decoder = RawDecoder;
        let mut renderer = SoftwareRenderer::new(4, 4);
        // R, G, G, R wire pixels.
        let wire = [
            0xFF, 0x00, 0x00, 0x00, //
            0x00, 0xFF, 0x00, 0x00, //
            0x00, 0xFF, 0x00, 0x00, //
            0xFF, 0x00, 0x00, 0x00,
        ];
        let mut stream = stream_with_sentinel(&wire);
        decoder
            .decode_rect(&rect(0, 0, 2, 2, RAW), &mut stream, &mut renderer, 24)
            .await
            .unwrap();
        assert_sentinel(&mut stream).await;

        let expected = vec![
            0xFF, 0x00, 0x00, 0xFF, //
            0x00, 0xFF, 0x00, 0xFF, //
            0x00, 0xFF, 0x00, 0xFF, //
            0xFF, 0x00, 0x00, 0xFF,
        ];
        assert_eq!(
            renderer.ops()[0],
            RenderOp::Blit {
                x: 0,
                y: 0,
                width: 2,
                height: 2,
                rgba: expected,
            }
        );
    }

    #[tokio::test]
    async fn test_raw_2x2_depth8() {
        let mut decoder = RawDecoder;
        let mut renderer = SoftwareRenderer::new(2, 2);
        // Four 0x30 bytes: B channel = 3 -> four blue pixels.
        let mut stream = stream_with_sentinel(&[0x30, 0x30, 0x30, 0x30]);
        decoder
            .decode_rect(&rect(0, 0, 2, 2, RAW), &mut stream, &mut renderer, 8)
            .await
            .unwrap();
        assert_sentinel(&mut stream).await;

        for x in 0..2 {
            for y in 0..2 {
                assert_eq!(renderer.pixel(x, y), [0, 0, 255, 255]);
            }
        }
    }

    #[tokio::test]
    async fn test_raw_zero_size_consumes_nothing() {
        let mut decoder = RawDecoder;
        let mut renderer = SoftwareRenderer::new(2, 2);
        let mut stream = stream_with_sentinel(&[]);
        decoder
            .decode_rect(&rect(0, 0, 0, 2, RAW), &mut stream, &mut renderer, 24)
            .await
            .unwrap();
        assert_sentinel(&mut stream).await;
        assert!(renderer.ops().is_empty());
    }
}
