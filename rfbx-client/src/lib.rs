//! Embeddable async RFB (VNC) client engine.
//!
//! This crate drives the full RFB protocol - handshake, security,
//! framebuffer decoding, input and clipboard relay - against any
//! message-oriented transport, delivering decoded pixel regions to a
//! pluggable [`Renderer`]. It contains no UI: rendering surfaces,
//! keyboard maps, and connection chrome are the embedder's concern.
//!
//! # Quick start
//!
//! ```no_run
//! use rfbx_client::{ClientBuilder, Config, Event};
//! use rfbx_render::SharedRenderer;
//!
//! # async fn example() -> Result<(), rfbx_client::ClientError> {
//! let config = Config::builder().password("secret").build()?;
//! let renderer = SharedRenderer::new(0, 0);
//! let client = ClientBuilder::new(config)
//!     .connect_tcp("localhost", 5900, renderer.clone())
//!     .await?;
//!
//! while let Ok(event) = client.events().recv_async().await {
//!     match event {
//!         Event::Connected { width, height, .. } => {
//!             println!("connected: {width}x{height}");
//!         }
//!         Event::Disconnected { clean } => {
//!             println!("disconnected (clean: {clean})");
//!             break;
//!         }
//!         _ => {}
//!     }
//! }
//! # Ok(())
//! # }
//! ```
//!
//! # Architecture
//!
//! One task per connection runs the read driver: it performs the
//! handshake, then loops pulling server messages off the receive stream,
//! dispatching rectangles to the decoders, and draining application
//! [`Command`]s between messages. Sends are buffered and flushed as
//! single transport messages; they never block the driver.

#![forbid(unsafe_code)]

pub mod config;
pub mod errors;
pub mod events;

mod clipboard;
mod engine;
mod handshake;
mod security;

pub use config::{Config, Credentials};
pub use errors::ClientError;
pub use events::{Command, Event, PowerOp};

use engine::Session;
use rfbx_protocol::{TcpTransport, TransportChannels};
use rfbx_render::Renderer;
use tokio::task::JoinHandle;

/// Builder for a connected [`Client`].
pub struct ClientBuilder {
    config: Config,
}

impl ClientBuilder {
    pub fn new(config: Config) -> Self {
        Self { config }
    }

    /// Connect over TCP and start the engine.
    pub async fn connect_tcp<R>(
        self,
        host: &str,
        port: u16,
        renderer: R,
    ) -> Result<Client, ClientError>
    where
        R: Renderer + Send + 'static,
    {
        let transport = TcpTransport::connect(host, port)
            .await
            .map_err(|_| ClientError::TransportClosed)?;
        self.attach(transport, renderer)
    }

    /// Start the engine over an already-established transport. This is
    /// the entry point for tunnelled sockets and for tests driving the
    /// server side in-process.
    pub fn attach<R>(
        self,
        transport: TransportChannels,
        renderer: R,
    ) -> Result<Client, ClientError>
    where
        R: Renderer + Send + 'static,
    {
        self.config.validate()?;

        let (cmd_tx, cmd_rx) = flume::unbounded();
        let (event_tx, event_rx) = flume::unbounded();

        let session = Session::new(self.config, transport, renderer, cmd_rx, event_tx);
        let join = tokio::spawn(session.run());

        Ok(Client {
            commands: cmd_tx,
            events: event_rx,
            join,
        })
    }
}

/// A running connection. Send [`Command`]s, receive [`Event`]s; dropping
/// the client requests a disconnect.
pub struct Client {
    commands: flume::Sender<Command>,
    events: flume::Receiver<Event>,
    join: JoinHandle<()>,
}

impl Client {
    /// Send a command to the engine.
    pub fn send(&self, command: Command) -> Result<(), ClientError> {
        self.commands
            .send(command)
            .map_err(|_| ClientError::TransportClosed)
    }

    /// The event receiver. Clone it to fan events out.
    pub fn events(&self) -> &flume::Receiver<Event> {
        &self.events
    }

    /// Request a clean disconnect.
    pub fn disconnect(&self) -> Result<(), ClientError> {
        self.send(Command::Disconnect)
    }

    /// Wait for the engine task to finish.
    pub async fn join(self) -> Result<(), ClientError> {
        self.join
            .await
            .map_err(|e| ClientError::ProtocolViolation(format!("engine task panicked: {e}")))
    }
}
