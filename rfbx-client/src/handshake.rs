//! The RFB handshake: ProtocolVersion through ServerInitialisation.
//!
//! Version negotiation understands the UltraVNC repeater convention
//! (version `000.000` means "send a 250-byte `ID:` block and wait for the
//! real server"). The server's version is clamped to 3.8; anything not in
//! the known mapping is rejected.

use crate::engine::{ConnectionState, RfbVersion, Session};
use crate::errors::ClientError;
use crate::events::Event;
use crate::security::AuthOutcome;
use rfbx_protocol::messages::{
    security, FramebufferUpdateRequest, PixelFormat, SetPixelFormat,
};
use rfbx_render::Renderer;

/// Security types acceptable in the 3.7+ server list, in no particular
/// order: selection walks the server's list and takes the first type the
/// client supports.
const SUPPORTED_SECURITY: [u32; 8] = [
    security::NONE,
    security::VNC_AUTH,
    security::RA2NE,
    security::TIGHT,
    security::VENCRYPT,
    security::XVP,
    security::ARD,
    security::MSLOGON_II,
];

/// Servers with this desktop name only ever deliver usable updates at
/// depth 8.
const AMT_KVM_NAME: &str = "Intel(r) AMT KVM";

impl<R: Renderer> Session<R> {
    pub(crate) async fn handshake(&mut self) -> Result<(), ClientError> {
        self.negotiate_protocol_version().await?;
        self.negotiate_security().await?;

        let mut scheme = self.auth_scheme;
        loop {
            match self.authenticate_step(scheme).await? {
                AuthOutcome::Done => break,
                AuthOutcome::Chain(next) => {
                    tracing::debug!(from = scheme, to = next, "chaining security scheme");
                    scheme = next;
                }
            }
        }

        self.check_security_result().await?;
        self.send_client_init()?;
        self.receive_server_init().await?;
        Ok(())
    }

    async fn negotiate_protocol_version(&mut self) -> Result<(), ClientError> {
        let mut repeater_done = false;
        loop {
            let version = self.stream.read_bytes(12).await?;
            if &version[0..4] != b"RFB " || version[7] != b'.' || version[11] != b'\n' {
                return Err(ClientError::ProtocolViolation(format!(
                    "invalid version string {:?}",
                    String::from_utf8_lossy(&version)
                )));
            }

            let number = &version[4..11];
            if number == b"000.000" {
                // UltraVNC repeater: identify ourselves and wait for the
                // real server's version string.
                if repeater_done {
                    return Err(ClientError::ProtocolViolation(
                        "repeater announced itself twice".into(),
                    ));
                }
                let mut id = format!("ID:{}", self.config.repeater_id).into_bytes();
                id.resize(250, 0);
                self.send.push_bytes(&id)?;
                self.send.flush()?;
                repeater_done = true;
                continue;
            }

            self.version = match number {
                b"003.003" | b"003.006" => RfbVersion::V3_3,
                b"003.007" => RfbVersion::V3_7,
                b"003.008" | b"003.889" | b"004.000" | b"004.001" | b"005.000" => RfbVersion::V3_8,
                other => {
                    return Err(ClientError::ProtocolViolation(format!(
                        "unsupported server version {}",
                        String::from_utf8_lossy(other)
                    )))
                }
            };
            break;
        }

        let reply: &[u8; 12] = match self.version {
            RfbVersion::V3_3 => b"RFB 003.003\n",
            RfbVersion::V3_7 => b"RFB 003.007\n",
            RfbVersion::V3_8 => b"RFB 003.008\n",
        };
        tracing::info!(version = ?self.version, "negotiated protocol version");
        self.send.push_bytes(reply)?;
        self.send.flush()?;
        Ok(())
    }

    async fn negotiate_security(&mut self) -> Result<(), ClientError> {
        if self.version >= RfbVersion::V3_7 {
            let num_types = self.stream.read_u8().await?;
            if num_types == 0 {
                return self.fail_security_reason(1).await;
            }
            let types = self.stream.read_bytes(num_types as usize).await?;

            let chosen = types
                .iter()
                .copied()
                .find(|t| SUPPORTED_SECURITY.contains(&(*t as u32)))
                .ok_or_else(|| {
                    ClientError::UnsupportedFeature(format!(
                        "no supported security type in server list {types:?}"
                    ))
                })?;
            self.send.push_u8(chosen)?;
            self.send.flush()?;
            self.auth_scheme = chosen as u32;
        } else {
            let scheme = self.stream.read_u32().await?;
            if scheme == 0 {
                return self.fail_security_reason(1).await;
            }
            self.auth_scheme = scheme;
        }
        tracing::info!(scheme = self.auth_scheme, "negotiated security type");
        Ok(())
    }

    /// Read the failure reason, surface it, and abort.
    pub(crate) async fn fail_security_reason(&mut self, status: u32) -> Result<(), ClientError> {
        let len = self.stream.read_u32().await? as usize;
        let reason = if len > 0 {
            String::from_utf8_lossy(&self.stream.read_bytes(len).await?).into_owned()
        } else {
            String::new()
        };
        self.emit(Event::SecurityFailure {
            status,
            reason: if reason.is_empty() {
                None
            } else {
                Some(reason.clone())
            },
        });
        Err(ClientError::AuthenticationFailed(if reason.is_empty() {
            "security handshake failed".into()
        } else {
            reason
        }))
    }

    async fn check_security_result(&mut self) -> Result<(), ClientError> {
        // 3.3 has no SecurityResult stage.
        if self.version == RfbVersion::V3_3 {
            return Ok(());
        }
        let status = self.stream.read_u32().await?;
        if status == 0 {
            return Ok(());
        }
        match self.version {
            RfbVersion::V3_8 => self.fail_security_reason(status).await,
            _ => {
                // 3.7 carries no reason text.
                self.emit(Event::SecurityFailure {
                    status,
                    reason: None,
                });
                Err(ClientError::AuthenticationFailed(
                    "security handshake failed".into(),
                ))
            }
        }
    }

    fn send_client_init(&mut self) -> Result<(), ClientError> {
        self.send.push_u8(self.config.shared as u8)?;
        self.send.flush()?;
        Ok(())
    }

    async fn receive_server_init(&mut self) -> Result<(), ClientError> {
        let width = self.stream.read_u16().await?;
        let height = self.stream.read_u16().await?;
        let server_format = PixelFormat::read_from(&mut self.stream).await?;
        tracing::debug!(?server_format, "server pixel format (overridden)");

        let name_len = self.stream.read_u32().await? as usize;
        let raw_name = self.stream.read_bytes(name_len).await?;
        self.fb_name = String::from_utf8_lossy(&raw_name).into_owned();

        if self.tight_vnc_mode {
            // TightVNC appends interaction capability lists; we ignore
            // their contents but must consume them.
            let server_msgs = self.stream.read_u16().await? as usize;
            let client_msgs = self.stream.read_u16().await? as usize;
            let enc_caps = self.stream.read_u16().await? as usize;
            self.stream.skip(2).await?; // padding
            self.stream
                .skip(16 * (server_msgs + client_msgs + enc_caps))
                .await?;
        }

        self.fb_depth = if self.fb_name == AMT_KVM_NAME { 8 } else { 24 };
        if self.fb_depth == 8 {
            tracing::info!("Intel AMT KVM detected, using depth 8");
        }
        self.resize_framebuffer(width, height);

        SetPixelFormat {
            pixel_format: PixelFormat::from_depth(self.fb_depth),
        }
        .write_to(&mut self.send)?;
        self.send_encodings()?;
        FramebufferUpdateRequest {
            incremental: false,
            x: 0,
            y: 0,
            width,
            height,
        }
        .write_to(&mut self.send)?;
        self.send.flush()?;

        self.set_state(ConnectionState::Connected);
        tracing::info!(width, height, name = %self.fb_name, "connected");
        self.emit(Event::Connected {
            width,
            height,
            name: self.fb_name.clone(),
        });
        Ok(())
    }
}
