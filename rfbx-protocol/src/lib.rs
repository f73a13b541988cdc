//! Low-level RFB protocol plumbing for the rfbx client.
//!
//! This crate contains the transport-facing building blocks shared by the
//! decoders and the protocol engine:
//!
//! - [`stream`]: the receive queue / send buffer pair over a
//!   message-oriented transport
//! - [`transport`]: concrete transports (TCP, in-process loopback)
//! - [`messages`]: pixel formats, encoding/security constants, and the
//!   byte-exact client message serializers

pub mod messages;
pub mod stream;
pub mod transport;

pub use messages::{PixelFormat, UpdateRect};
pub use stream::{RecvStream, SendStream, StreamError};
pub use transport::{loopback_pair, TcpTransport, TransportChannels};
