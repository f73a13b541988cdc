//! The command and event surfaces of the client engine.
//!
//! The embedding application talks to the engine through two channels:
//! [`Command`]s flow in (input events, clipboard, lifecycle requests) and
//! [`Event`]s flow out (connection lifecycle, server-driven state).
//! Commands never block the read driver; events are fire-and-forget.

/// Outbound events emitted by the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// The handshake completed and the normal protocol phase began.
    Connected {
        width: u16,
        height: u16,
        name: String,
    },

    /// The connection ended. `clean` is true only for a client-requested
    /// disconnect that completed in an orderly fashion.
    Disconnected { clean: bool },

    /// The active security handshake needs credentials the configuration
    /// did not carry. Reply with [`Command::Credentials`].
    CredentialsRequired { types: Vec<&'static str> },

    /// The server presented a public key that needs host approval. Reply
    /// with [`Command::ApproveServer`] or [`Command::RejectServer`].
    ServerVerification {
        kind: &'static str,
        public_key: Vec<u8>,
    },

    /// The security handshake failed, with the server-supplied status and
    /// optional reason text.
    SecurityFailure { status: u32, reason: Option<String> },

    /// The server published clipboard text.
    Clipboard { text: String },

    /// Audible bell.
    Bell,

    /// The desktop name changed (or was announced).
    DesktopName { name: String },

    /// The server advertised capabilities (currently: XVP power control).
    Capabilities { power: bool },

    /// Whether the remote framebuffer now exceeds the configured viewport.
    ClippingViewport { clipping: bool },
}

/// XVP power operations (protocol op codes).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PowerOp {
    Shutdown = 2,
    Reboot = 3,
    Reset = 4,
}

/// Inbound commands accepted by the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Pointer state: position plus a button bitmask.
    Pointer { x: u16, y: u16, buttons: u8 },

    /// Keyboard event by X11 keysym.
    Key { keysym: u32, down: bool },

    /// Keyboard event carrying an XT scancode; uses the QEMU extended key
    /// message when the server supports it, else falls back to keysym.
    QemuKey { keysym: u32, keycode: u32, down: bool },

    /// Publish clipboard text to the server.
    Clipboard { text: String },

    /// Request a full (non-incremental) framebuffer update.
    Refresh,

    /// Ask the server to resize the remote desktop.
    RequestDesktopSize { width: u16, height: u16 },

    /// XVP power control (requires the server to have advertised it).
    Power(PowerOp),

    /// Supply credentials requested via [`Event::CredentialsRequired`].
    Credentials {
        username: Option<String>,
        password: Option<String>,
        target: Option<String>,
    },

    /// Accept the server key from [`Event::ServerVerification`].
    ApproveServer,

    /// Reject the server key; aborts the connection.
    RejectServer,

    /// Change the JPEG quality level pseudo-encoding (0-9).
    SetQualityLevel(u8),

    /// Change the compression level pseudo-encoding (0-9).
    SetCompressionLevel(u8),

    /// Toggle view-only mode (suppresses input messages).
    SetViewOnly(bool),

    /// Close the connection cleanly.
    Disconnect,
}
