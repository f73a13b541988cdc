//! The rendering surface contract.
//!
//! Decoders produce pixel regions; how they reach the screen is not this
//! workspace's business. [`Renderer`] is the narrow interface the decoder
//! pipeline and the protocol engine drive. A production embedding backs it
//! with a canvas, a GPU surface, or a window system; the bundled
//! [`SoftwareRenderer`] backs it with a plain RGBA buffer and is what the
//! test suites assert against.
//!
//! # Contract
//!
//! - Draw calls (`fill_rect`, `blit_image`, `copy_image`, `image_rect`)
//!   accumulate; [`Renderer::flip`] commits everything accumulated since
//!   the previous flip atomically. The engine calls `flip` exactly once
//!   per framebuffer update message.
//! - [`Renderer::pending`] / [`Renderer::flush`] implement backpressure:
//!   before starting a new update the engine awaits `flush` whenever
//!   `pending` reports a backlog.
//! - `image_rect` receives complete JPEG/PNG blobs; decoding them is the
//!   renderer's concern (hardware decoders exist; the protocol core does
//!   not compete with them).
//! - Decoders call the renderer synchronously while holding it for a
//!   single rectangle; only the engine awaits `flush`.

use anyhow::Result;

pub mod software;
pub use software::{RenderOp, SharedRenderer, SoftwareRenderer};

/// Blob formats handed to [`Renderer::image_rect`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageFormat {
    Jpeg,
    Png,
}

impl ImageFormat {
    /// The MIME type of the blob.
    pub const fn mime(&self) -> &'static str {
        match self {
            Self::Jpeg => "image/jpeg",
            Self::Png => "image/png",
        }
    }
}

/// An RGBA color, alpha included.
pub type Rgba = [u8; 4];

/// The surface the decoder pipeline draws on.
#[allow(async_fn_in_trait)]
pub trait Renderer {
    /// Resize the surface to the new framebuffer dimensions. Existing
    /// content may be discarded.
    fn resize(&mut self, width: u16, height: u16);

    /// Opaque fill of a rectangle.
    fn fill_rect(&mut self, x: u16, y: u16, width: u16, height: u16, color: Rgba) -> Result<()>;

    /// Blit raw RGBA pixels (`width * height * 4` bytes, row-major).
    fn blit_image(&mut self, x: u16, y: u16, width: u16, height: u16, rgba: &[u8]) -> Result<()>;

    /// Copy a region within the framebuffer (CopyRect).
    fn copy_image(
        &mut self,
        src_x: u16,
        src_y: u16,
        dst_x: u16,
        dst_y: u16,
        width: u16,
        height: u16,
    ) -> Result<()>;

    /// Draw a compressed image blob at the given position.
    fn image_rect(
        &mut self,
        x: u16,
        y: u16,
        width: u16,
        height: u16,
        format: ImageFormat,
        data: &[u8],
    ) -> Result<()>;

    /// Commit all draws accumulated since the previous flip.
    fn flip(&mut self);

    /// True when the renderer has a backlog the engine should wait out
    /// before decoding further updates.
    fn pending(&self) -> bool;

    /// Wait until the backlog is drained.
    fn flush(&mut self) -> impl std::future::Future<Output = Result<()>> + Send;
}
