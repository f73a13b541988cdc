//! RFB wire types: pixel formats, rectangle headers, encoding and security
//! constants, and the byte-exact client-to-server message serializers.
//!
//! Every client message implements `write_to` (production path) and a
//! `read_from` reference parser. The parsers exist so the round-trip laws
//! can be asserted in tests against the exact bytes the serializers emit;
//! the client itself never receives these messages.
//!
//! All multi-byte fields are big-endian per the RFB specification.

use crate::stream::{RecvStream, SendStream, StreamError};

/// Rectangle encodings the client can decode.
pub mod encodings {
    pub const RAW: i32 = 0;
    pub const COPY_RECT: i32 = 1;
    pub const RRE: i32 = 2;
    pub const HEXTILE: i32 = 5;
    pub const TIGHT: i32 = 7;
    pub const ZRLE: i32 = 16;
    pub const JPEG: i32 = 21;
    pub const TIGHT_PNG: i32 = -260;

    // Pseudo-encodings: non-pixel rectangles carrying capabilities or
    // metadata.
    pub const PSEUDO_QUALITY_LEVEL_0: i32 = -32;
    pub const PSEUDO_COMPRESS_LEVEL_0: i32 = -256;
    pub const PSEUDO_DESKTOP_SIZE: i32 = -223;
    pub const PSEUDO_LAST_RECT: i32 = -224;
    pub const PSEUDO_CURSOR: i32 = -239;
    pub const PSEUDO_QEMU_EXTENDED_KEY_EVENT: i32 = -258;
    pub const PSEUDO_DESKTOP_NAME: i32 = -307;
    pub const PSEUDO_EXTENDED_DESKTOP_SIZE: i32 = -308;
    pub const PSEUDO_XVP: i32 = -309;
    pub const PSEUDO_FENCE: i32 = -312;
    pub const PSEUDO_CONTINUOUS_UPDATES: i32 = -313;
    pub const PSEUDO_EXTENDED_CLIPBOARD: i32 = 0xc0a1e5ce_u32 as i32;
    pub const PSEUDO_VMWARE_CURSOR: i32 = 0x574d5664;
}

/// Security types (the u8 values of the 3.7+ security list; VeNCrypt
/// subtypes reuse the same numbering space as u32).
pub mod security {
    pub const NONE: u32 = 1;
    pub const VNC_AUTH: u32 = 2;
    pub const RA2NE: u32 = 6;
    pub const TIGHT: u32 = 16;
    pub const VENCRYPT: u32 = 19;
    pub const XVP: u32 = 22;
    pub const ARD: u32 = 30;
    pub const MSLOGON_II: u32 = 113;
    /// TightVNC Unix login sub-auth (reachable only through Tight).
    pub const TIGHT_UNIX_LOGIN: u32 = 129;
    /// VeNCrypt Plain subtype (reachable only through VeNCrypt).
    pub const PLAIN: u32 = 256;
}

/// Server message type bytes.
pub mod server_msg {
    pub const FRAMEBUFFER_UPDATE: u8 = 0;
    pub const SET_COLOR_MAP_ENTRIES: u8 = 1;
    pub const BELL: u8 = 2;
    pub const SERVER_CUT_TEXT: u8 = 3;
    pub const END_OF_CONTINUOUS_UPDATES: u8 = 150;
    pub const SERVER_FENCE: u8 = 248;
    pub const SERVER_XVP: u8 = 250;
}

/// RFB pixel format (16 bytes on the wire).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PixelFormat {
    pub bits_per_pixel: u8,
    pub depth: u8,
    pub big_endian: u8,
    pub true_color: u8,
    pub red_max: u16,
    pub green_max: u16,
    pub blue_max: u16,
    pub red_shift: u8,
    pub green_shift: u8,
    pub blue_shift: u8,
}

impl PixelFormat {
    /// The format this client requests for a given color depth.
    ///
    /// `bits = depth / 3` bits per channel, channel maxima `(1 << bits) - 1`,
    /// shifts `0 / bits / 2*bits`, little-endian true color.
    pub fn from_depth(depth: u8) -> Self {
        let bits_per_pixel = if depth > 16 {
            32
        } else if depth > 8 {
            16
        } else {
            8
        };
        let bits = depth / 3;
        let max = (1u16 << bits) - 1;
        Self {
            bits_per_pixel,
            depth,
            big_endian: 0,
            true_color: 1,
            red_max: max,
            green_max: max,
            blue_max: max,
            red_shift: 0,
            green_shift: bits,
            blue_shift: 2 * bits,
        }
    }

    pub fn bytes_per_pixel(&self) -> usize {
        (self.bits_per_pixel as usize).div_ceil(8)
    }

    /// Read a 16-byte pixel format (server-supplied formats are accepted
    /// as-is; this client always overrides with its own via SetPixelFormat).
    pub async fn read_from(stream: &mut RecvStream) -> Result<Self, StreamError> {
        let bits_per_pixel = stream.read_u8().await?;
        let depth = stream.read_u8().await?;
        let big_endian = stream.read_u8().await?;
        let true_color = stream.read_u8().await?;
        let red_max = stream.read_u16().await?;
        let green_max = stream.read_u16().await?;
        let blue_max = stream.read_u16().await?;
        let red_shift = stream.read_u8().await?;
        let green_shift = stream.read_u8().await?;
        let blue_shift = stream.read_u8().await?;
        stream.skip(3).await?; // padding
        Ok(Self {
            bits_per_pixel,
            depth,
            big_endian,
            true_color,
            red_max,
            green_max,
            blue_max,
            red_shift,
            green_shift,
            blue_shift,
        })
    }

    pub fn write_to(&self, stream: &mut SendStream) -> Result<(), StreamError> {
        stream.push_u8(self.bits_per_pixel)?;
        stream.push_u8(self.depth)?;
        stream.push_u8(self.big_endian)?;
        stream.push_u8(self.true_color)?;
        stream.push_u16(self.red_max)?;
        stream.push_u16(self.green_max)?;
        stream.push_u16(self.blue_max)?;
        stream.push_u8(self.red_shift)?;
        stream.push_u8(self.green_shift)?;
        stream.push_u8(self.blue_shift)?;
        stream.push_bytes(&[0, 0, 0]) // padding
    }
}

/// Rectangle header of a framebuffer update (12 bytes on the wire).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UpdateRect {
    pub x: u16,
    pub y: u16,
    pub width: u16,
    pub height: u16,
    pub encoding: i32,
}

impl UpdateRect {
    pub async fn read_from(stream: &mut RecvStream) -> Result<Self, StreamError> {
        Ok(Self {
            x: stream.read_u16().await?,
            y: stream.read_u16().await?,
            width: stream.read_u16().await?,
            height: stream.read_u16().await?,
            encoding: stream.read_i32().await?,
        })
    }
}

/// SetPixelFormat (type 0): `u8 0, 3 padding, PixelFormat(16)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SetPixelFormat {
    pub pixel_format: PixelFormat,
}

impl SetPixelFormat {
    pub fn write_to(&self, stream: &mut SendStream) -> Result<(), StreamError> {
        stream.push_u8(0)?;
        stream.push_bytes(&[0, 0, 0])?;
        self.pixel_format.write_to(stream)
    }

    /// Reference parser (message type byte already consumed).
    pub async fn read_from(stream: &mut RecvStream) -> Result<Self, StreamError> {
        stream.skip(3).await?;
        Ok(Self {
            pixel_format: PixelFormat::read_from(stream).await?,
        })
    }
}

/// SetEncodings (type 2): `u8 2, u8 0, u16 count, count * i32`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SetEncodings {
    pub encodings: Vec<i32>,
}

impl SetEncodings {
    pub fn write_to(&self, stream: &mut SendStream) -> Result<(), StreamError> {
        stream.push_u8(2)?;
        stream.push_u8(0)?;
        stream.push_u16(self.encodings.len() as u16)?;
        for enc in &self.encodings {
            stream.push_i32(*enc)?;
        }
        Ok(())
    }

    pub async fn read_from(stream: &mut RecvStream) -> Result<Self, StreamError> {
        stream.skip(1).await?;
        let count = stream.read_u16().await? as usize;
        let mut encodings = Vec::with_capacity(count);
        for _ in 0..count {
            encodings.push(stream.read_i32().await?);
        }
        Ok(Self { encodings })
    }
}

/// FramebufferUpdateRequest (type 3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FramebufferUpdateRequest {
    pub incremental: bool,
    pub x: u16,
    pub y: u16,
    pub width: u16,
    pub height: u16,
}

impl FramebufferUpdateRequest {
    pub fn write_to(&self, stream: &mut SendStream) -> Result<(), StreamError> {
        stream.push_u8(3)?;
        stream.push_u8(self.incremental as u8)?;
        stream.push_u16(self.x)?;
        stream.push_u16(self.y)?;
        stream.push_u16(self.width)?;
        stream.push_u16(self.height)?;
        Ok(())
    }

    pub async fn read_from(stream: &mut RecvStream) -> Result<Self, StreamError> {
        Ok(Self {
            incremental: stream.read_u8().await? != 0,
            x: stream.read_u16().await?,
            y: stream.read_u16().await?,
            width: stream.read_u16().await?,
            height: stream.read_u16().await?,
        })
    }
}

/// KeyEvent (type 4): `u8 4, u8 down, u16 0, u32 keysym`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyEvent {
    pub down: bool,
    pub keysym: u32,
}

impl KeyEvent {
    pub fn write_to(&self, stream: &mut SendStream) -> Result<(), StreamError> {
        stream.push_u8(4)?;
        stream.push_u8(self.down as u8)?;
        stream.push_u16(0)?;
        stream.push_u32(self.keysym)?;
        Ok(())
    }

    pub async fn read_from(stream: &mut RecvStream) -> Result<Self, StreamError> {
        let down = stream.read_u8().await? != 0;
        stream.skip(2).await?;
        Ok(Self {
            down,
            keysym: stream.read_u32().await?,
        })
    }
}

/// PointerEvent (type 5): `u8 5, u8 buttonMask, u16 x, u16 y`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PointerEvent {
    pub button_mask: u8,
    pub x: u16,
    pub y: u16,
}

impl PointerEvent {
    pub fn write_to(&self, stream: &mut SendStream) -> Result<(), StreamError> {
        stream.push_u8(5)?;
        stream.push_u8(self.button_mask)?;
        stream.push_u16(self.x)?;
        stream.push_u16(self.y)?;
        Ok(())
    }

    pub async fn read_from(stream: &mut RecvStream) -> Result<Self, StreamError> {
        Ok(Self {
            button_mask: stream.read_u8().await?,
            x: stream.read_u16().await?,
            y: stream.read_u16().await?,
        })
    }
}

/// ClientCutText (type 6), classic variant: latin-1 text with a
/// non-negative length.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientCutText {
    pub text: String,
}

impl ClientCutText {
    pub fn write_to(&self, stream: &mut SendStream) -> Result<(), StreamError> {
        let len = self.text.chars().count() as i32;
        stream.push_u8(6)?;
        stream.push_bytes(&[0, 0, 0])?;
        stream.push_i32(len)?;
        stream.push_string(&self.text)
    }

    pub async fn read_from(stream: &mut RecvStream) -> Result<Self, StreamError> {
        stream.skip(3).await?;
        let len = stream.read_i32().await?;
        debug_assert!(len >= 0, "extended cut text must use the extended parser");
        Ok(Self {
            text: stream.read_string(len as usize).await?,
        })
    }
}

/// ClientCutText (type 6), extended-clipboard variant: the wire length is
/// the two's-complement negation of the payload length.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientCutTextExtended {
    pub payload: Vec<u8>,
}

impl ClientCutTextExtended {
    pub fn write_to(&self, stream: &mut SendStream) -> Result<(), StreamError> {
        stream.push_u8(6)?;
        stream.push_bytes(&[0, 0, 0])?;
        stream.push_i32(-(self.payload.len() as i32))?;
        stream.push_bytes(&self.payload)
    }

    pub async fn read_from(stream: &mut RecvStream) -> Result<Self, StreamError> {
        stream.skip(3).await?;
        let len = stream.read_i32().await?;
        debug_assert!(len < 0, "classic cut text must use the classic parser");
        Ok(Self {
            payload: stream.read_bytes((-len) as usize).await?,
        })
    }
}

/// EnableContinuousUpdates (type 150).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EnableContinuousUpdates {
    pub enable: bool,
    pub x: u16,
    pub y: u16,
    pub width: u16,
    pub height: u16,
}

impl EnableContinuousUpdates {
    pub fn write_to(&self, stream: &mut SendStream) -> Result<(), StreamError> {
        stream.push_u8(150)?;
        stream.push_u8(self.enable as u8)?;
        stream.push_u16(self.x)?;
        stream.push_u16(self.y)?;
        stream.push_u16(self.width)?;
        stream.push_u16(self.height)?;
        Ok(())
    }

    pub async fn read_from(stream: &mut RecvStream) -> Result<Self, StreamError> {
        Ok(Self {
            enable: stream.read_u8().await? != 0,
            x: stream.read_u16().await?,
            y: stream.read_u16().await?,
            width: stream.read_u16().await?,
            height: stream.read_u16().await?,
        })
    }
}

/// ClientFence (type 248): `u8 248, 3 padding, u32 flags, u8 len, bytes`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientFence {
    pub flags: u32,
    pub payload: Vec<u8>,
}

impl ClientFence {
    pub fn write_to(&self, stream: &mut SendStream) -> Result<(), StreamError> {
        stream.push_u8(248)?;
        stream.push_bytes(&[0, 0, 0])?;
        stream.push_u32(self.flags)?;
        stream.push_u8(self.payload.len() as u8)?;
        stream.push_bytes(&self.payload)
    }

    pub async fn read_from(stream: &mut RecvStream) -> Result<Self, StreamError> {
        stream.skip(3).await?;
        let flags = stream.read_u32().await?;
        let len = stream.read_u8().await? as usize;
        Ok(Self {
            flags,
            payload: stream.read_bytes(len).await?,
        })
    }
}

/// ClientXvp (type 250): `u8 250, u8 0, u8 version, u8 op`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClientXvp {
    pub version: u8,
    pub op: u8,
}

impl ClientXvp {
    pub fn write_to(&self, stream: &mut SendStream) -> Result<(), StreamError> {
        stream.push_u8(250)?;
        stream.push_u8(0)?;
        stream.push_u8(self.version)?;
        stream.push_u8(self.op)
    }

    pub async fn read_from(stream: &mut RecvStream) -> Result<Self, StreamError> {
        stream.skip(1).await?;
        Ok(Self {
            version: stream.read_u8().await?,
            op: stream.read_u8().await?,
        })
    }
}

/// SetDesktopSize (type 251) with a single screen entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SetDesktopSize {
    pub width: u16,
    pub height: u16,
    pub screen_id: u32,
    pub screen_flags: u32,
}

impl SetDesktopSize {
    pub fn write_to(&self, stream: &mut SendStream) -> Result<(), StreamError> {
        stream.push_u8(251)?;
        stream.push_u8(0)?;
        stream.push_u16(self.width)?;
        stream.push_u16(self.height)?;
        stream.push_u8(1)?; // one screen
        stream.push_u8(0)?;
        stream.push_u32(self.screen_id)?;
        stream.push_u16(0)?; // screen x
        stream.push_u16(0)?; // screen y
        stream.push_u16(self.width)?;
        stream.push_u16(self.height)?;
        stream.push_u32(self.screen_flags)
    }

    pub async fn read_from(stream: &mut RecvStream) -> Result<Self, StreamError> {
        stream.skip(1).await?;
        let width = stream.read_u16().await?;
        let height = stream.read_u16().await?;
        stream.skip(2).await?; // screen count + padding
        let screen_id = stream.read_u32().await?;
        stream.skip(8).await?; // screen x/y/w/h
        let screen_flags = stream.read_u32().await?;
        Ok(Self {
            width,
            height,
            screen_id,
            screen_flags,
        })
    }
}

/// QEMU Extended Key Event (type 255, submessage 0).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QemuExtendedKeyEvent {
    pub down: bool,
    pub keysym: u32,
    pub keycode: u32,
}

impl QemuExtendedKeyEvent {
    /// XT scancodes in the `0xE0xx` extended set map to `(code & 0xff) | 0x80`.
    pub fn rfb_keycode(&self) -> u32 {
        if self.keycode >> 8 == 0xe0 {
            (self.keycode & 0xff) | 0x80
        } else {
            self.keycode
        }
    }

    pub fn write_to(&self, stream: &mut SendStream) -> Result<(), StreamError> {
        stream.push_u8(255)?;
        stream.push_u8(0)?;
        stream.push_u16(self.down as u16)?;
        stream.push_u32(self.keysym)?;
        stream.push_u32(self.rfb_keycode())
    }

    /// Reference parser; returns the message with the already-translated
    /// RFB keycode in `keycode`.
    pub async fn read_from(stream: &mut RecvStream) -> Result<Self, StreamError> {
        stream.skip(1).await?; // submessage type
        let down = stream.read_u16().await? != 0;
        Ok(Self {
            down,
            keysym: stream.read_u32().await?,
            keycode: stream.read_u32().await?,
        })
    }
}
