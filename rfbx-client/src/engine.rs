//! The protocol engine: connection state, the read driver, and the
//! normal-phase message dispatch.
//!
//! The engine is single-threaded and cooperative. One logical task (the
//! read driver) pulls typed values off the receive stream; client commands
//! are drained between server messages. Sends never suspend the driver.
//!
//! Ordering guarantees kept here:
//!
//! - rectangles of one FramebufferUpdate are fully processed in wire order
//!   before the follow-up update request is sent;
//! - the renderer sees draws in rectangle order and one `flip` per update;
//! - before a new update is decoded, a pending renderer backlog is flushed
//!   (backpressure);
//! - decoder zlib streams reset only on wire command, never between
//!   rectangles.

use crate::clipboard::ClipboardState;
use crate::config::Config;
use crate::errors::ClientError;
use crate::events::{Command, Event};
use rfbx_encodings::{
    CopyRectDecoder, Decoder, HextileDecoder, JpegDecoder, RawDecoder, RreDecoder, TightDecoder,
    ZrleDecoder,
};
use rfbx_protocol::messages::{
    encodings, server_msg, ClientFence, ClientXvp, EnableContinuousUpdates,
    FramebufferUpdateRequest, KeyEvent, PointerEvent, QemuExtendedKeyEvent, SetDesktopSize,
    SetEncodings, UpdateRect,
};
use rfbx_protocol::{RecvStream, SendStream, TransportChannels};
use rfbx_render::Renderer;
use std::time::Duration;

/// How often the read driver polls the command channel while the server
/// is quiet.
const COMMAND_POLL: Duration = Duration::from_millis(50);

/// Grace period for a clean disconnect before the state is forced.
const DISCONNECT_TIMEOUT: Duration = Duration::from_secs(3);

/// Negotiated protocol version, capped at 3.8.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub(crate) enum RfbVersion {
    V3_3,
    V3_7,
    V3_8,
}

/// Connection lifecycle. `Disconnected` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ConnectionState {
    Unused,
    Connecting,
    Connected,
    Disconnecting,
    Disconnected,
}

/// The eight rectangle decoders, dispatched by encoding number.
///
/// A closed set of variants, so plain matching beats trait objects here;
/// the decoders keep `&mut self` state (zlib streams, table caches) for
/// the connection lifetime.
struct DecoderSet {
    raw: RawDecoder,
    copy_rect: CopyRectDecoder,
    rre: RreDecoder,
    hextile: HextileDecoder,
    tight: TightDecoder,
    tight_png: TightDecoder,
    zrle: ZrleDecoder,
    jpeg: JpegDecoder,
}

impl DecoderSet {
    fn new() -> Self {
        Self {
            raw: RawDecoder,
            copy_rect: CopyRectDecoder,
            rre: RreDecoder,
            hextile: HextileDecoder,
            tight: TightDecoder::tight(),
            tight_png: TightDecoder::tight_png(),
            zrle: ZrleDecoder::new(),
            jpeg: JpegDecoder::new(),
        }
    }

    async fn decode<R: Renderer>(
        &mut self,
        rect: &UpdateRect,
        stream: &mut RecvStream,
        renderer: &mut R,
        depth: u8,
    ) -> Result<(), ClientError> {
        let result = match rect.encoding {
            encodings::RAW => self.raw.decode_rect(rect, stream, renderer, depth).await,
            encodings::COPY_RECT => self.copy_rect.decode_rect(rect, stream, renderer, depth).await,
            encodings::RRE => self.rre.decode_rect(rect, stream, renderer, depth).await,
            encodings::HEXTILE => self.hextile.decode_rect(rect, stream, renderer, depth).await,
            encodings::TIGHT => self.tight.decode_rect(rect, stream, renderer, depth).await,
            encodings::TIGHT_PNG => self.tight_png.decode_rect(rect, stream, renderer, depth).await,
            encodings::ZRLE => self.zrle.decode_rect(rect, stream, renderer, depth).await,
            encodings::JPEG => self.jpeg.decode_rect(rect, stream, renderer, depth).await,
            other => {
                return Err(ClientError::ProtocolViolation(format!(
                    "unknown encoding {other} for rect at ({}, {})",
                    rect.x, rect.y
                )))
            }
        };
        result.map_err(ClientError::from_decoder)
    }
}

/// One RFB connection: streams, decoders, negotiated state, and the
/// command/event surfaces. Owned by the read-driver task.
pub(crate) struct Session<R: Renderer> {
    pub(crate) stream: RecvStream,
    pub(crate) send: SendStream,
    pub(crate) renderer: R,
    pub(crate) events: flume::Sender<Event>,
    pub(crate) commands: flume::Receiver<Command>,
    pub(crate) config: Config,

    pub(crate) state: ConnectionState,
    pub(crate) version: RfbVersion,
    pub(crate) auth_scheme: u32,
    pub(crate) tight_vnc_mode: bool,

    pub(crate) fb_width: u16,
    pub(crate) fb_height: u16,
    pub(crate) fb_depth: u8,
    pub(crate) fb_name: String,
    pub(crate) screen_id: u32,
    pub(crate) screen_flags: u32,

    pub(crate) supports_fence: bool,
    pub(crate) supports_continuous_updates: bool,
    pub(crate) enabled_continuous_updates: bool,
    pub(crate) supports_set_desktop_size: bool,
    pub(crate) qemu_ext_key_supported: bool,
    pub(crate) xvp_version: u8,

    pub(crate) clipboard: ClipboardState,
    clipping: bool,

    decoders: DecoderSet,
}

impl<R: Renderer> Session<R> {
    pub(crate) fn new(
        config: Config,
        transport: TransportChannels,
        renderer: R,
        commands: flume::Receiver<Command>,
        events: flume::Sender<Event>,
    ) -> Self {
        Self {
            stream: RecvStream::new(transport.incoming),
            send: SendStream::new(transport.outgoing),
            renderer,
            events,
            commands,
            config,
            state: ConnectionState::Unused,
            version: RfbVersion::V3_8,
            auth_scheme: 0,
            tight_vnc_mode: false,
            fb_width: 0,
            fb_height: 0,
            fb_depth: 24,
            fb_name: String::new(),
            screen_id: 0,
            screen_flags: 0,
            supports_fence: false,
            supports_continuous_updates: false,
            enabled_continuous_updates: false,
            supports_set_desktop_size: false,
            qemu_ext_key_supported: false,
            xvp_version: 0,
            clipboard: ClipboardState::default(),
            clipping: false,
            decoders: DecoderSet::new(),
        }
    }

    pub(crate) fn emit(&self, event: Event) {
        let _ = self.events.send(event);
    }

    /// Transition the connection state. Redundant transitions are logged
    /// and ignored; `Disconnected` is terminal.
    pub(crate) fn set_state(&mut self, next: ConnectionState) {
        if self.state == ConnectionState::Disconnected || self.state == next {
            tracing::debug!(state = ?self.state, requested = ?next, "state transition ignored");
            return;
        }
        tracing::debug!(from = ?self.state, to = ?next, "connection state");
        self.state = next;
    }

    /// Run the connection to completion. Consumes the session; emits
    /// `Disconnected` exactly once.
    pub(crate) async fn run(mut self) {
        self.set_state(ConnectionState::Connecting);
        let result = self.run_inner().await;
        self.set_state(ConnectionState::Disconnecting);
        self.set_state(ConnectionState::Disconnected);
        match result {
            Ok(clean) => {
                tracing::info!(clean, "connection closed");
                self.emit(Event::Disconnected { clean });
            }
            Err(err) => {
                tracing::error!("connection failed: {err}");
                self.emit(Event::Disconnected { clean: false });
            }
        }
    }

    async fn run_inner(&mut self) -> Result<bool, ClientError> {
        self.handshake().await?;
        self.normal_loop().await
    }

    /// The read driver's normal phase: interleave server messages with
    /// command draining.
    async fn normal_loop(&mut self) -> Result<bool, ClientError> {
        loop {
            loop {
                match self.commands.try_recv() {
                    Ok(Command::Disconnect) => return self.finish_disconnect().await,
                    Ok(cmd) => self.handle_command(cmd)?,
                    Err(flume::TryRecvError::Empty) => break,
                    // All handles dropped: treat as a disconnect request.
                    Err(flume::TryRecvError::Disconnected) => {
                        return self.finish_disconnect().await
                    }
                }
            }

            match tokio::time::timeout(COMMAND_POLL, self.stream.readable(1)).await {
                Ok(Ok(())) => {
                    let msg_type = self.stream.read_u8().await?;
                    self.dispatch_message(msg_type).await?;
                }
                Ok(Err(e)) => return Err(e.into()),
                Err(_elapsed) => {}
            }
        }
    }

    /// Clean shutdown: stop sending, close the transport, and drain the
    /// incoming side for at most [`DISCONNECT_TIMEOUT`] before forcing
    /// the terminal state.
    async fn finish_disconnect(&mut self) -> Result<bool, ClientError> {
        if self.state == ConnectionState::Disconnecting {
            return Ok(true);
        }
        tracing::info!("disconnecting");
        self.set_state(ConnectionState::Disconnecting);

        // Replacing the send stream drops the transport's outgoing sender,
        // which is how the channel transport signals close.
        let (detached, _) = flume::unbounded();
        self.send = SendStream::new(detached);

        let stream = &mut self.stream;
        let _ = tokio::time::timeout(DISCONNECT_TIMEOUT, async move {
            while stream.readable(1).await.is_ok() {
                let _ = stream.read_u8().await;
            }
        })
        .await;
        Ok(true)
    }

    /// Dispatch one server message by type byte.
    async fn dispatch_message(&mut self, msg_type: u8) -> Result<(), ClientError> {
        match msg_type {
            server_msg::FRAMEBUFFER_UPDATE => self.handle_framebuffer_update().await,
            server_msg::SET_COLOR_MAP_ENTRIES => Err(ClientError::ProtocolViolation(
                "SetColorMapEntries received in true-color mode".into(),
            )),
            server_msg::BELL => {
                self.emit(Event::Bell);
                Ok(())
            }
            server_msg::SERVER_CUT_TEXT => self.handle_server_cut_text().await,
            server_msg::END_OF_CONTINUOUS_UPDATES => {
                if !self.supports_continuous_updates {
                    self.supports_continuous_updates = true;
                    self.enable_continuous_updates()?;
                }
                Ok(())
            }
            server_msg::SERVER_FENCE => self.handle_fence().await,
            server_msg::SERVER_XVP => self.handle_xvp().await,
            other => Err(ClientError::ProtocolViolation(format!(
                "unknown server message type {other}"
            ))),
        }
    }

    async fn handle_framebuffer_update(&mut self) -> Result<(), ClientError> {
        // Backpressure: never start decoding into a backlogged renderer.
        if self.renderer.pending() {
            self.renderer.flush().await.map_err(ClientError::Render)?;
        }

        self.stream.skip(1).await?; // padding
        let num_rects = self.stream.read_u16().await?;
        tracing::debug!(num_rects, "framebuffer update");

        for _ in 0..num_rects {
            let rect = UpdateRect::read_from(&mut self.stream).await?;
            match rect.encoding {
                encodings::PSEUDO_LAST_RECT => break,
                encodings::PSEUDO_DESKTOP_SIZE => {
                    self.resize_framebuffer(rect.width, rect.height);
                }
                encodings::PSEUDO_EXTENDED_DESKTOP_SIZE => {
                    self.handle_extended_desktop_size(&rect).await?;
                }
                encodings::PSEUDO_DESKTOP_NAME => {
                    let len = self.stream.read_u32().await? as usize;
                    let raw = self.stream.read_bytes(len).await?;
                    let name = String::from_utf8_lossy(&raw).into_owned();
                    self.fb_name = name.clone();
                    self.emit(Event::DesktopName { name });
                }
                encodings::PSEUDO_CURSOR => {
                    let pixel_bytes = if self.fb_depth == 8 { 1 } else { 4 };
                    let pixels = rect.width as usize * rect.height as usize * pixel_bytes;
                    let mask = (rect.width as usize).div_ceil(8) * rect.height as usize;
                    // Cursor rendering is the embedding's concern; consume
                    // the payload to stay framed.
                    self.stream.skip(pixels + mask).await?;
                }
                encodings::PSEUDO_VMWARE_CURSOR => {
                    let cursor_type = self.stream.read_u8().await?;
                    self.stream.skip(1).await?; // padding
                    let plane = rect.width as usize * rect.height as usize * 4;
                    match cursor_type {
                        0 => self.stream.skip(2 * plane).await?, // AND + XOR masks
                        1 => self.stream.skip(plane).await?,     // alpha
                        other => {
                            return Err(ClientError::ProtocolViolation(format!(
                                "invalid VMware cursor type {other}"
                            )))
                        }
                    }
                }
                encodings::PSEUDO_QEMU_EXTENDED_KEY_EVENT => {
                    self.qemu_ext_key_supported = true;
                }
                _ => {
                    self.decoders
                        .decode(&rect, &mut self.stream, &mut self.renderer, self.fb_depth)
                        .await?;
                }
            }
        }

        // Commit the whole update atomically.
        self.renderer.flip();

        if !self.enabled_continuous_updates {
            self.request_update(true)?;
        }
        Ok(())
    }

    /// ExtendedDesktopSize pseudo-rectangle. The header's x field carries
    /// the reason, y the status.
    async fn handle_extended_desktop_size(&mut self, rect: &UpdateRect) -> Result<(), ClientError> {
        let num_screens = self.stream.read_u8().await? as usize;
        self.stream.skip(3).await?; // padding

        for i in 0..num_screens {
            let id = self.stream.read_u32().await?;
            self.stream.skip(8).await?; // screen x/y/w/h
            let flags = self.stream.read_u32().await?;
            if i == 0 {
                self.screen_id = id;
                self.screen_flags = flags;
            }
        }

        self.supports_set_desktop_size = true;

        // reason 1 = our own request; a non-zero status there means the
        // server refused and the framebuffer did not change.
        if rect.x == 1 && rect.y != 0 {
            tracing::warn!(status = rect.y, "server refused desktop resize");
            return Ok(());
        }
        self.resize_framebuffer(rect.width, rect.height);
        Ok(())
    }

    async fn handle_fence(&mut self) -> Result<(), ClientError> {
        self.stream.skip(3).await?;
        let flags = self.stream.read_u32().await?;
        let len = self.stream.read_u8().await? as usize;
        let payload = self.stream.read_bytes(len).await?;
        self.supports_fence = true;

        const FENCE_REQUEST: u32 = 1 << 31;
        const FENCE_BLOCK_BEFORE: u32 = 1 << 0;
        const FENCE_BLOCK_AFTER: u32 = 1 << 1;

        if flags & FENCE_REQUEST != 0 {
            // Echo back, keeping only the blocking semantics we honor.
            ClientFence {
                flags: flags & (FENCE_BLOCK_BEFORE | FENCE_BLOCK_AFTER),
                payload,
            }
            .write_to(&mut self.send)?;
            self.send.flush()?;
        }
        Ok(())
    }

    async fn handle_xvp(&mut self) -> Result<(), ClientError> {
        self.stream.skip(1).await?;
        let version = self.stream.read_u8().await?;
        let code = self.stream.read_u8().await?;
        match code {
            0 => {
                tracing::warn!("XVP operation failed");
                Ok(())
            }
            1 => {
                self.xvp_version = version;
                self.emit(Event::Capabilities { power: true });
                Ok(())
            }
            other => Err(ClientError::ProtocolViolation(format!(
                "unknown XVP message {other}"
            ))),
        }
    }

    fn handle_command(&mut self, cmd: Command) -> Result<(), ClientError> {
        match cmd {
            Command::Pointer { x, y, buttons } => {
                if !self.config.view_only {
                    PointerEvent {
                        button_mask: buttons,
                        x,
                        y,
                    }
                    .write_to(&mut self.send)?;
                    self.send.flush()?;
                }
            }
            Command::Key { keysym, down } => {
                if !self.config.view_only {
                    KeyEvent { down, keysym }.write_to(&mut self.send)?;
                    self.send.flush()?;
                }
            }
            Command::QemuKey {
                keysym,
                keycode,
                down,
            } => {
                if !self.config.view_only {
                    if self.qemu_ext_key_supported && keycode != 0 {
                        QemuExtendedKeyEvent {
                            down,
                            keysym,
                            keycode,
                        }
                        .write_to(&mut self.send)?;
                    } else {
                        KeyEvent { down, keysym }.write_to(&mut self.send)?;
                    }
                    self.send.flush()?;
                }
            }
            Command::Clipboard { text } => {
                if !self.config.view_only {
                    self.send_clipboard(text)?;
                }
            }
            Command::Refresh => self.request_update(false)?,
            Command::RequestDesktopSize { width, height } => {
                if self.supports_set_desktop_size {
                    SetDesktopSize {
                        width,
                        height,
                        screen_id: self.screen_id,
                        screen_flags: self.screen_flags,
                    }
                    .write_to(&mut self.send)?;
                    self.send.flush()?;
                } else {
                    tracing::debug!("server does not support SetDesktopSize");
                }
            }
            Command::Power(op) => {
                if self.xvp_version > 0 {
                    ClientXvp {
                        version: self.xvp_version,
                        op: op as u8,
                    }
                    .write_to(&mut self.send)?;
                    self.send.flush()?;
                } else {
                    tracing::debug!("server has not advertised XVP power control");
                }
            }
            Command::Credentials {
                username,
                password,
                target,
            } => self.merge_credentials(username, password, target),
            Command::ApproveServer | Command::RejectServer => {
                // Only meaningful while a handshake waits on them.
            }
            Command::SetQualityLevel(level) => {
                if level <= 9 && level != self.config.quality_level {
                    self.config.quality_level = level;
                    self.send_encodings()?;
                }
            }
            Command::SetCompressionLevel(level) => {
                if level <= 9 && level != self.config.compression_level {
                    self.config.compression_level = level;
                    self.send_encodings()?;
                }
            }
            Command::SetViewOnly(view_only) => self.config.view_only = view_only,
            Command::Disconnect => unreachable!("handled by the caller"),
        }
        Ok(())
    }

    pub(crate) fn merge_credentials(
        &mut self,
        username: Option<String>,
        password: Option<String>,
        target: Option<String>,
    ) {
        let creds = &mut self.config.credentials;
        if username.is_some() {
            creds.username = username;
        }
        if password.is_some() {
            creds.password = password;
        }
        if target.is_some() {
            creds.target = target;
        }
    }

    /// Block the handshake until the configuration carries every listed
    /// credential, asking the embedder as needed.
    pub(crate) async fn require_credentials(
        &mut self,
        need: &[&'static str],
    ) -> Result<(), ClientError> {
        loop {
            let creds = &self.config.credentials;
            let missing: Vec<&'static str> = need
                .iter()
                .copied()
                .filter(|&kind| match kind {
                    "username" => creds.username.is_none(),
                    "password" => creds.password.is_none(),
                    "target" => creds.target.is_none(),
                    _ => false,
                })
                .collect();
            if missing.is_empty() {
                return Ok(());
            }

            self.emit(Event::CredentialsRequired { types: missing });
            match self.commands.recv_async().await {
                Ok(Command::Credentials {
                    username,
                    password,
                    target,
                }) => self.merge_credentials(username, password, target),
                Ok(Command::Disconnect) | Err(_) => {
                    return Err(ClientError::AuthenticationFailed(
                        "credentials not supplied".into(),
                    ))
                }
                Ok(_) => {}
            }
        }
    }

    /// Surface a server public key for host approval and wait for the
    /// verdict.
    pub(crate) async fn verify_server(
        &mut self,
        kind: &'static str,
        public_key: Vec<u8>,
    ) -> Result<(), ClientError> {
        self.emit(Event::ServerVerification { kind, public_key });
        loop {
            match self.commands.recv_async().await {
                Ok(Command::ApproveServer) => return Ok(()),
                Ok(Command::RejectServer) | Ok(Command::Disconnect) | Err(_) => {
                    return Err(ClientError::AuthenticationFailed(
                        "server key rejected".into(),
                    ))
                }
                Ok(Command::Credentials {
                    username,
                    password,
                    target,
                }) => self.merge_credentials(username, password, target),
                Ok(_) => {}
            }
        }
    }

    pub(crate) fn request_update(&mut self, incremental: bool) -> Result<(), ClientError> {
        FramebufferUpdateRequest {
            incremental,
            x: 0,
            y: 0,
            width: self.fb_width,
            height: self.fb_height,
        }
        .write_to(&mut self.send)?;
        self.send.flush()?;
        Ok(())
    }

    fn enable_continuous_updates(&mut self) -> Result<(), ClientError> {
        EnableContinuousUpdates {
            enable: true,
            x: 0,
            y: 0,
            width: self.fb_width,
            height: self.fb_height,
        }
        .write_to(&mut self.send)?;
        self.send.flush()?;
        self.enabled_continuous_updates = true;
        tracing::debug!("continuous updates enabled");
        Ok(())
    }

    /// The encodings this client advertises, in preference order.
    pub(crate) fn encoding_list(&self) -> Vec<i32> {
        let mut encs = vec![encodings::COPY_RECT];
        if self.fb_depth == 24 {
            encs.extend_from_slice(&[
                encodings::TIGHT,
                encodings::TIGHT_PNG,
                encodings::ZRLE,
                encodings::JPEG,
                encodings::HEXTILE,
                encodings::RRE,
            ]);
        }
        encs.push(encodings::RAW);

        encs.push(encodings::PSEUDO_QUALITY_LEVEL_0 + self.config.quality_level as i32);
        encs.push(encodings::PSEUDO_COMPRESS_LEVEL_0 + self.config.compression_level as i32);
        encs.extend_from_slice(&[
            encodings::PSEUDO_DESKTOP_SIZE,
            encodings::PSEUDO_LAST_RECT,
            encodings::PSEUDO_QEMU_EXTENDED_KEY_EVENT,
            encodings::PSEUDO_EXTENDED_DESKTOP_SIZE,
            encodings::PSEUDO_XVP,
            encodings::PSEUDO_FENCE,
            encodings::PSEUDO_CONTINUOUS_UPDATES,
            encodings::PSEUDO_DESKTOP_NAME,
            encodings::PSEUDO_EXTENDED_CLIPBOARD,
        ]);
        if self.fb_depth == 24 {
            encs.push(encodings::PSEUDO_VMWARE_CURSOR);
            encs.push(encodings::PSEUDO_CURSOR);
        }
        encs
    }

    pub(crate) fn send_encodings(&mut self) -> Result<(), ClientError> {
        SetEncodings {
            encodings: self.encoding_list(),
        }
        .write_to(&mut self.send)?;
        self.send.flush()?;
        Ok(())
    }

    pub(crate) fn resize_framebuffer(&mut self, width: u16, height: u16) {
        self.fb_width = width;
        self.fb_height = height;
        self.renderer.resize(width, height);

        let clipping = self
            .config
            .viewport
            .map(|(vw, vh)| width > vw || height > vh)
            .unwrap_or(false);
        if clipping != self.clipping {
            self.clipping = clipping;
            self.emit(Event::ClippingViewport { clipping });
        }
    }
}
