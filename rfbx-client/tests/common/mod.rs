#![allow(dead_code)]

//! In-process RFB server for integration tests.
//!
//! The test side drives the server half of a loopback transport with the
//! same stream primitives and reference parsers the client uses, so every
//! byte the engine emits is checked against the serializers' inverse.

use flate2::write::ZlibEncoder;
use flate2::Compression;
use rfbx_client::{Client, ClientBuilder, Config, Event};
use rfbx_protocol::messages::{
    FramebufferUpdateRequest, PixelFormat, SetEncodings, SetPixelFormat,
};
use rfbx_protocol::{loopback_pair, RecvStream, SendStream};
use rfbx_render::SharedRenderer;
use std::io::Write;
use std::time::Duration;

pub const FB_WIDTH: u16 = 64;
pub const FB_HEIGHT: u16 = 48;

pub struct ServerPeer {
    pub recv: RecvStream,
    pub send: SendStream,
}

/// Spawn a client over a loopback transport; returns the client handle,
/// a shared view of its renderer, and the server side of the wire.
pub fn start_client(config: Config) -> (Client, SharedRenderer, ServerPeer) {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
    let (client_transport, server_transport) = loopback_pair();
    let renderer = SharedRenderer::new(0, 0);
    let client = ClientBuilder::new(config)
        .attach(client_transport, renderer.clone())
        .unwrap();
    let peer = ServerPeer {
        recv: RecvStream::new(server_transport.incoming),
        send: SendStream::new(server_transport.outgoing),
    };
    (client, renderer, peer)
}

/// Wait for the next event, failing the test on timeout.
pub async fn next_event(client: &Client) -> Event {
    tokio::time::timeout(Duration::from_secs(5), client.events().recv_async())
        .await
        .expect("timed out waiting for event")
        .expect("event channel closed")
}

/// Wait until a specific event arrives, skipping others.
pub async fn wait_for_event(client: &Client, mut pred: impl FnMut(&Event) -> bool) -> Event {
    loop {
        let event = next_event(client).await;
        if pred(&event) {
            return event;
        }
    }
}

pub fn zlib_compress(data: &[u8]) -> Vec<u8> {
    let mut enc = ZlibEncoder::new(Vec::new(), Compression::default());
    enc.write_all(data).unwrap();
    enc.finish().unwrap()
}

impl ServerPeer {
    /// Version + security-none phases of the 3.8 handshake.
    pub async fn greet_38_none(&mut self) {
        self.send.push_bytes(b"RFB 003.008\n").unwrap();
        self.send.flush().unwrap();
        assert_eq!(self.recv.read_string(12).await.unwrap(), "RFB 003.008\n");

        self.send.push_u8(1).unwrap(); // one security type
        self.send.push_u8(1).unwrap(); // None
        self.send.flush().unwrap();
        assert_eq!(self.recv.read_u8().await.unwrap(), 1);

        self.send.push_u32(0).unwrap(); // SecurityResult: OK
        self.send.flush().unwrap();
    }

    /// ClientInit/ServerInit plus the client's initial message burst.
    /// Returns the encodings the client advertised.
    pub async fn complete_init(&mut self, name: &str) -> SetEncodings {
        let shared = self.recv.read_u8().await.unwrap();
        assert_eq!(shared, 1, "default config requests a shared session");

        self.send.push_u16(FB_WIDTH).unwrap();
        self.send.push_u16(FB_HEIGHT).unwrap();
        PixelFormat::from_depth(24).write_to(&mut self.send).unwrap();
        self.send.push_u32(name.len() as u32).unwrap();
        self.send.push_bytes(name.as_bytes()).unwrap();
        self.send.flush().unwrap();

        self.read_client_setup().await
    }

    /// The three messages every fresh connection sends: SetPixelFormat,
    /// SetEncodings, and a full FramebufferUpdateRequest.
    pub async fn read_client_setup(&mut self) -> SetEncodings {
        assert_eq!(self.recv.read_u8().await.unwrap(), 0);
        let _pf = SetPixelFormat::read_from(&mut self.recv).await.unwrap();

        assert_eq!(self.recv.read_u8().await.unwrap(), 2);
        let encodings = SetEncodings::read_from(&mut self.recv).await.unwrap();

        assert_eq!(self.recv.read_u8().await.unwrap(), 3);
        let req = FramebufferUpdateRequest::read_from(&mut self.recv).await.unwrap();
        assert!(!req.incremental, "initial update request must be full");
        assert_eq!((req.width, req.height), (FB_WIDTH, FB_HEIGHT));

        encodings
    }

    /// Full handshake with security None against the default test
    /// framebuffer.
    pub async fn handshake_none(&mut self) -> SetEncodings {
        self.greet_38_none().await;
        self.complete_init("test desktop").await
    }

    /// Send one FramebufferUpdate. Each entry is a rectangle header plus
    /// its encoding payload.
    pub fn send_update(&mut self, rects: &[(u16, u16, u16, u16, i32, Vec<u8>)]) {
        self.send.push_u8(0).unwrap(); // FramebufferUpdate
        self.send.push_u8(0).unwrap(); // padding
        self.send.push_u16(rects.len() as u16).unwrap();
        for (x, y, w, h, encoding, payload) in rects {
            self.send.push_u16(*x).unwrap();
            self.send.push_u16(*y).unwrap();
            self.send.push_u16(*w).unwrap();
            self.send.push_u16(*h).unwrap();
            self.send.push_i32(*encoding).unwrap();
            self.send.push_bytes(payload).unwrap();
        }
        self.send.flush().unwrap();
    }

    /// After every update (without continuous updates) the client sends an
    /// incremental request covering the whole framebuffer.
    pub async fn expect_incremental_request(&mut self) {
        assert_eq!(self.recv.read_u8().await.unwrap(), 3);
        let req = FramebufferUpdateRequest::read_from(&mut self.recv).await.unwrap();
        assert!(req.incremental);
        assert_eq!((req.x, req.y), (0, 0));
    }
}
