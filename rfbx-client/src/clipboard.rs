//! ServerCutText handling, including the extended clipboard
//! pseudo-encoding.
//!
//! The classic message carries latin-1 text with a non-negative length. A
//! negative length (signed 32-bit) switches to the extended protocol: a
//! u32 of action/format flags followed by `|len| - 4` payload bytes.
//!
//! Actions occupy bits 24-31 of the flags word, formats bits 0-15. A
//! Provide payload is zlib-deflated `(u32 length, utf-8 text, NUL)` per
//! included format; incoming text is CRLF-canonicalized and the trailing
//! NUL stripped before the clipboard event fires. Outgoing text goes
//! through Notify-then-Provide: we announce having text, and serve it
//! when the server requests it.

use crate::engine::Session;
use crate::errors::ClientError;
use crate::events::Event;
use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression;
use rfbx_protocol::messages::{ClientCutText, ClientCutTextExtended};
use rfbx_render::Renderer;
use std::collections::HashMap;
use std::io::{Read, Write};

pub(crate) const FORMAT_TEXT: u32 = 1 << 0;

pub(crate) const ACTION_CAPS: u32 = 1 << 24;
pub(crate) const ACTION_REQUEST: u32 = 1 << 25;
pub(crate) const ACTION_PEEK: u32 = 1 << 26;
pub(crate) const ACTION_NOTIFY: u32 = 1 << 27;
pub(crate) const ACTION_PROVIDE: u32 = 1 << 28;

const ACTION_MASK: u32 = 0xFF00_0000;

/// Maximum text size we advertise in our capability reply.
const TEXT_SIZE_LIMIT: u32 = 20 * 1024 * 1024;

/// Clipboard negotiation state for one connection.
#[derive(Debug, Default)]
pub(crate) struct ClipboardState {
    /// Server-advertised formats, keyed by bit index.
    server_formats: HashMap<u32, bool>,
    /// Server-advertised actions, keyed by action bit.
    server_actions: HashMap<u32, bool>,
    /// Our local clipboard text, offered to the server on request.
    text: Option<String>,
}

impl ClipboardState {
    /// True when both ends can speak the extended Provide/Request flow
    /// for text.
    fn extended_usable(&self) -> bool {
        self.server_actions.get(&ACTION_PROVIDE).copied().unwrap_or(false)
            && self.server_formats.get(&0).copied().unwrap_or(false)
    }
}

/// Normalize line endings to `\n` (CRLF first so lone CRs do not double).
fn canonicalize_newlines(text: &str) -> String {
    text.replace("\r\n", "\n").replace('\r', "\n")
}

fn deflate(data: &[u8]) -> Vec<u8> {
    let mut enc = ZlibEncoder::new(Vec::new(), Compression::default());
    enc.write_all(data).expect("in-memory deflate");
    enc.finish().expect("in-memory deflate")
}

fn inflate(data: &[u8]) -> Result<Vec<u8>, ClientError> {
    let mut out = Vec::new();
    ZlibDecoder::new(data).read_to_end(&mut out).map_err(|e| {
        ClientError::ProtocolViolation(format!("extended clipboard: bad deflate stream: {e}"))
    })?;
    Ok(out)
}

/// Build a Provide payload for text: flags word plus the deflated
/// `(length, text, NUL)` body.
fn encode_provide(text: &str) -> Vec<u8> {
    let crlf = canonicalize_newlines(text).replace('\n', "\r\n");
    let mut body = (crlf.len() as u32).to_be_bytes().to_vec();
    body.extend_from_slice(crlf.as_bytes());
    body.push(0);

    let mut payload = (ACTION_PROVIDE | FORMAT_TEXT).to_be_bytes().to_vec();
    payload.extend_from_slice(&deflate(&body));
    payload
}

/// Extract the text format from a Provide body (already inflated).
fn decode_provide_text(data: &[u8]) -> Result<String, ClientError> {
    if data.len() < 4 {
        return Err(ClientError::ProtocolViolation(
            "extended clipboard: Provide body shorter than its length field".into(),
        ));
    }
    let len = u32::from_be_bytes(data[0..4].try_into().unwrap()) as usize;
    let text = data.get(4..4 + len).ok_or_else(|| {
        ClientError::ProtocolViolation(format!(
            "extended clipboard: text length {len} exceeds body ({})",
            data.len() - 4
        ))
    })?;
    let text = String::from_utf8_lossy(text);
    let text = text.trim_end_matches('\0');
    Ok(canonicalize_newlines(text))
}

impl<R: Renderer> Session<R> {
    pub(crate) async fn handle_server_cut_text(&mut self) -> Result<(), ClientError> {
        self.stream.skip(3).await?; // padding
        let length = self.stream.read_i32().await?;

        if length >= 0 {
            let text = self.stream.read_string(length as usize).await?;
            self.emit(Event::Clipboard { text });
            return Ok(());
        }

        let total = (-(length as i64)) as usize;
        if total < 4 {
            return Err(ClientError::ProtocolViolation(format!(
                "extended clipboard: payload of {total} bytes cannot hold flags"
            )));
        }
        let flags = self.stream.read_u32().await?;
        let rest = self.stream.read_bytes(total - 4).await?;

        match flags & ACTION_MASK {
            ACTION_CAPS => self.handle_clipboard_caps(flags, &rest),
            ACTION_PROVIDE => {
                if flags & FORMAT_TEXT != 0 {
                    let body = inflate(&rest)?;
                    let text = decode_provide_text(&body)?;
                    self.emit(Event::Clipboard { text });
                }
                Ok(())
            }
            ACTION_REQUEST => {
                if flags & FORMAT_TEXT != 0 {
                    if let Some(text) = self.clipboard.text.clone() {
                        self.send_extended(&encode_provide(&text))?;
                    }
                }
                Ok(())
            }
            ACTION_PEEK => {
                let mut reply = ACTION_NOTIFY;
                if self.clipboard.text.is_some() {
                    reply |= FORMAT_TEXT;
                }
                self.send_extended(&reply.to_be_bytes())
            }
            ACTION_NOTIFY => {
                tracing::debug!(
                    has_text = flags & FORMAT_TEXT != 0,
                    "server clipboard notify"
                );
                Ok(())
            }
            other => {
                tracing::debug!("ignoring clipboard action {other:#x}");
                Ok(())
            }
        }
    }

    /// Record the server's capabilities and reply with ours.
    fn handle_clipboard_caps(&mut self, flags: u32, rest: &[u8]) -> Result<(), ClientError> {
        self.clipboard.server_formats.clear();
        self.clipboard.server_actions.clear();

        // One u32 size limit follows per advertised format bit.
        let mut offset = 0;
        for bit in 0..16u32 {
            if flags & (1 << bit) != 0 {
                let limit = rest.get(offset..offset + 4).map(|b| {
                    u32::from_be_bytes(b.try_into().unwrap())
                });
                tracing::debug!(format = bit, ?limit, "server clipboard format");
                self.clipboard.server_formats.insert(bit, true);
                offset += 4;
            }
        }
        for action in [ACTION_CAPS, ACTION_REQUEST, ACTION_PEEK, ACTION_NOTIFY, ACTION_PROVIDE] {
            if flags & action != 0 {
                self.clipboard.server_actions.insert(action, true);
            }
        }

        let our_flags = ACTION_CAPS
            | ACTION_REQUEST
            | ACTION_PEEK
            | ACTION_NOTIFY
            | ACTION_PROVIDE
            | FORMAT_TEXT;
        let mut payload = our_flags.to_be_bytes().to_vec();
        payload.extend_from_slice(&TEXT_SIZE_LIMIT.to_be_bytes());
        self.send_extended(&payload)
    }

    /// Publish local clipboard text: extended Notify when negotiated,
    /// classic latin-1 cut text otherwise.
    pub(crate) fn send_clipboard(&mut self, text: String) -> Result<(), ClientError> {
        if self.clipboard.extended_usable() {
            self.clipboard.text = Some(text);
            self.send_extended(&(ACTION_NOTIFY | FORMAT_TEXT).to_be_bytes())
        } else {
            ClientCutText { text }.write_to(&mut self.send)?;
            self.send.flush()?;
            Ok(())
        }
    }

    fn send_extended(&mut self, payload: &[u8]) -> Result<(), ClientError> {
        ClientCutTextExtended {
            payload: payload.to_vec(),
        }
        .write_to(&mut self.send)?;
        self.send.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_canonicalize_newlines() {
        assert_eq!(canonicalize_newlines("a\r\nb"), "a\nb");
        assert_eq!(canonicalize_newlines("a\rb"), "a\nb");
        assert_eq!(canonicalize_newlines("a\nb"), "a\nb");
        assert_eq!(canonicalize_newlines("a\r\r\nb"), "a\n\nb");
    }

    #[test]
    fn test_provide_round_trip() {
        let payload = encode_provide("AB\n");
        let flags = u32::from_be_bytes(payload[0..4].try_into().unwrap());
        assert_eq!(flags, ACTION_PROVIDE | FORMAT_TEXT);

        let body = inflate(&payload[4..]).unwrap();
        // On the wire the text is CRLF with a trailing NUL after the
        // length-covered bytes.
        assert_eq!(&body[0..4], &4u32.to_be_bytes());
        assert_eq!(&body[4..8], b"AB\r\n");
        assert_eq!(body[8], 0);

        assert_eq!(decode_provide_text(&body).unwrap(), "AB\n");
    }

    #[test]
    fn test_decode_strips_nul_within_length() {
        // Some peers count the NUL inside the length field; both shapes
        // must decode to the same text.
        let mut body = 5u32.to_be_bytes().to_vec();
        body.extend_from_slice(b"AB\r\n\0");
        assert_eq!(decode_provide_text(&body).unwrap(), "AB\n");
    }

    #[test]
    fn test_decode_rejects_overlong_length() {
        let mut body = 100u32.to_be_bytes().to_vec();
        body.extend_from_slice(b"AB");
        assert!(decode_provide_text(&body).is_err());
    }
}
