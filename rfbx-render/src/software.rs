//! Software renderer: an owned RGBA buffer plus an operation journal.
//!
//! This is the reference implementation of the [`Renderer`] contract. It
//! keeps real pixels (so copy/fill/blit interactions can be asserted) and
//! records every call in order (so tests can assert *what* the decoders
//! asked for, including image blobs it does not decode).

use crate::{ImageFormat, Renderer, Rgba};
use anyhow::{bail, Result};
use rfbx_common::Rect;
use std::sync::{Arc, Mutex};

/// One recorded renderer call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RenderOp {
    Resize {
        width: u16,
        height: u16,
    },
    Fill {
        x: u16,
        y: u16,
        width: u16,
        height: u16,
        color: Rgba,
    },
    Blit {
        x: u16,
        y: u16,
        width: u16,
        height: u16,
        rgba: Vec<u8>,
    },
    Copy {
        src_x: u16,
        src_y: u16,
        dst_x: u16,
        dst_y: u16,
        width: u16,
        height: u16,
    },
    Image {
        x: u16,
        y: u16,
        width: u16,
        height: u16,
        format: ImageFormat,
        data: Vec<u8>,
    },
    Flip,
}

/// RGBA framebuffer with an operation journal.
pub struct SoftwareRenderer {
    width: u16,
    height: u16,
    pixels: Vec<u8>,
    ops: Vec<RenderOp>,
}

impl SoftwareRenderer {
    pub fn new(width: u16, height: u16) -> Self {
        Self {
            width,
            height,
            pixels: vec![0; width as usize * height as usize * 4],
            ops: Vec::new(),
        }
    }

    pub fn dimensions(&self) -> (u16, u16) {
        (self.width, self.height)
    }

    /// The current framebuffer contents, row-major RGBA.
    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }

    /// Read one pixel.
    pub fn pixel(&self, x: u16, y: u16) -> Rgba {
        let i = (y as usize * self.width as usize + x as usize) * 4;
        self.pixels[i..i + 4].try_into().unwrap()
    }

    /// The journal of calls made so far, in order.
    pub fn ops(&self) -> &[RenderOp] {
        &self.ops
    }

    /// Drop the journal (pixels are kept).
    pub fn clear_ops(&mut self) {
        self.ops.clear();
    }

    fn check_bounds(&self, x: u16, y: u16, w: u16, h: u16) -> Result<()> {
        let surface = Rect::new(0, 0, self.width as u32, self.height as u32);
        let target = Rect::new(x as i32, y as i32, w as u32, h as u32);
        if !surface.contains_rect(&target) {
            bail!("draw outside framebuffer: {target:?} on {surface:?}");
        }
        Ok(())
    }

    fn row_range(&self, x: u16, y: u16, w: u16) -> std::ops::Range<usize> {
        let start = (y as usize * self.width as usize + x as usize) * 4;
        start..start + w as usize * 4
    }
}

impl Renderer for SoftwareRenderer {
    fn resize(&mut self, width: u16, height: u16) {
        self.width = width;
        self.height = height;
        self.pixels = vec![0; width as usize * height as usize * 4];
        self.ops.push(RenderOp::Resize { width, height });
    }

    fn fill_rect(&mut self, x: u16, y: u16, width: u16, height: u16, color: Rgba) -> Result<()> {
        self.check_bounds(x, y, width, height)?;
        for row in 0..height {
            let range = self.row_range(x, y + row, width);
            for px in self.pixels[range].chunks_exact_mut(4) {
                px.copy_from_slice(&color);
            }
        }
        self.ops.push(RenderOp::Fill {
            x,
            y,
            width,
            height,
            color,
        });
        Ok(())
    }

    fn blit_image(&mut self, x: u16, y: u16, width: u16, height: u16, rgba: &[u8]) -> Result<()> {
        self.check_bounds(x, y, width, height)?;
        let expected = width as usize * height as usize * 4;
        if rgba.len() != expected {
            bail!("blit size mismatch: got {} bytes, need {}", rgba.len(), expected);
        }
        for row in 0..height {
            let range = self.row_range(x, y + row, width);
            let src = row as usize * width as usize * 4;
            self.pixels[range].copy_from_slice(&rgba[src..src + width as usize * 4]);
        }
        self.ops.push(RenderOp::Blit {
            x,
            y,
            width,
            height,
            rgba: rgba.to_vec(),
        });
        Ok(())
    }

    fn copy_image(
        &mut self,
        src_x: u16,
        src_y: u16,
        dst_x: u16,
        dst_y: u16,
        width: u16,
        height: u16,
    ) -> Result<()> {
        self.check_bounds(src_x, src_y, width, height)?;
        self.check_bounds(dst_x, dst_y, width, height)?;
        // Snapshot the source region so overlapping copies stay correct.
        let mut src = Vec::with_capacity(width as usize * height as usize * 4);
        for row in 0..height {
            let range = self.row_range(src_x, src_y + row, width);
            src.extend_from_slice(&self.pixels[range]);
        }
        for row in 0..height {
            let range = self.row_range(dst_x, dst_y + row, width);
            let from = row as usize * width as usize * 4;
            self.pixels[range].copy_from_slice(&src[from..from + width as usize * 4]);
        }
        self.ops.push(RenderOp::Copy {
            src_x,
            src_y,
            dst_x,
            dst_y,
            width,
            height,
        });
        Ok(())
    }

    fn image_rect(
        &mut self,
        x: u16,
        y: u16,
        width: u16,
        height: u16,
        format: ImageFormat,
        data: &[u8],
    ) -> Result<()> {
        self.check_bounds(x, y, width, height)?;
        // Blob decode belongs to the embedding; the software surface only
        // records the request.
        self.ops.push(RenderOp::Image {
            x,
            y,
            width,
            height,
            format,
            data: data.to_vec(),
        });
        Ok(())
    }

    fn flip(&mut self) {
        self.ops.push(RenderOp::Flip);
    }

    fn pending(&self) -> bool {
        false
    }

    async fn flush(&mut self) -> Result<()> {
        Ok(())
    }
}

/// A cloneable handle around a [`SoftwareRenderer`], so a test can keep
/// inspecting the surface after moving the renderer into the engine.
#[derive(Clone)]
pub struct SharedRenderer(Arc<Mutex<SoftwareRenderer>>);

impl SharedRenderer {
    pub fn new(width: u16, height: u16) -> Self {
        Self(Arc::new(Mutex::new(SoftwareRenderer::new(width, height))))
    }

    /// Inspect the underlying surface.
    pub fn with<T>(&self, f: impl FnOnce(&SoftwareRenderer) -> T) -> T {
        f(&self.0.lock().unwrap())
    }
}

impl Renderer for SharedRenderer {
    fn resize(&mut self, width: u16, height: u16) {
        self.0.lock().unwrap().resize(width, height);
    }

    fn fill_rect(&mut self, x: u16, y: u16, width: u16, height: u16, color: Rgba) -> Result<()> {
        self.0.lock().unwrap().fill_rect(x, y, width, height, color)
    }

    fn blit_image(&mut self, x: u16, y: u16, width: u16, height: u16, rgba: &[u8]) -> Result<()> {
        self.0.lock().unwrap().blit_image(x, y, width, height, rgba)
    }

    fn copy_image(
        &mut self,
        src_x: u16,
        src_y: u16,
        dst_x: u16,
        dst_y: u16,
        width: u16,
        height: u16,
    ) -> Result<()> {
        self.0
            .lock()
            .unwrap()
            .copy_image(src_x, src_y, dst_x, dst_y, width, height)
    }

    fn image_rect(
        &mut self,
        x: u16,
        y: u16,
        width: u16,
        height: u16,
        format: ImageFormat,
        data: &[u8],
    ) -> Result<()> {
        self.0
            .lock()
            .unwrap()
            .image_rect(x, y, width, height, format, data)
    }

    fn flip(&mut self) {
        self.0.lock().unwrap().flip();
    }

    fn pending(&self) -> bool {
        self.0.lock().unwrap().pending()
    }

    async fn flush(&mut self) -> Result<()> {
        // The software surface never accumulates a backlog; do not hold
        // the lock across an await point.
        Ok(())
    }
}
