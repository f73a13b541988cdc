//! Error types for the client engine.

use rfbx_protocol::StreamError;
use thiserror::Error;

/// Errors that abort the read driver and close the connection.
#[derive(Debug, Error)]
pub enum ClientError {
    /// The transport closed while bytes were still expected.
    #[error("transport closed")]
    TransportClosed,

    /// A second read demand was issued on the receive stream.
    #[error("concurrent read on receive stream")]
    ConcurrentRead,

    /// The server violated the wire protocol (bad marker, out-of-range
    /// subencoding, unknown message type, impossible length).
    #[error("protocol violation: {0}")]
    ProtocolViolation(String),

    /// The server requires something this client does not implement
    /// (security type, Gradient filter, PNG outside TightPNG).
    #[error("unsupported feature: {0}")]
    UnsupportedFeature(String),

    /// The security handshake failed (bad credentials, bad server hash,
    /// non-zero security result).
    #[error("authentication failed: {0}")]
    AuthenticationFailed(String),

    /// A rectangle decoder failed (inflate error, malformed payload).
    #[error("decoder error: {0}")]
    Decoder(#[source] anyhow::Error),

    /// The renderer rejected an operation.
    #[error("render error: {0}")]
    Render(#[source] anyhow::Error),
}

impl From<StreamError> for ClientError {
    fn from(e: StreamError) -> Self {
        match e {
            StreamError::Closed => Self::TransportClosed,
            StreamError::ConcurrentRead => Self::ConcurrentRead,
        }
    }
}

impl ClientError {
    /// Map a decoder's error, pulling transport-level failures out of the
    /// anyhow chain so they keep their identity.
    pub(crate) fn from_decoder(e: anyhow::Error) -> Self {
        if let Some(stream_err) = e.root_cause().downcast_ref::<StreamError>() {
            return (*stream_err).into();
        }
        Self::Decoder(e)
    }
}
