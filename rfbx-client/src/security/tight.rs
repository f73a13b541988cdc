//! Tight security type: tunnel negotiation plus sub-authentication
//! capability selection.
//!
//! Capabilities are `{code:u32, vendor:[u8;4], signature:[u8;8]}` tuples.
//! For tunnels only NOTUNNEL (code 0) is acceptable; one deployed server
//! family advertises vendor `SICR` / signature `SCHANNEL` for what is in
//! fact a no-op tunnel, so that impostor is accepted as NOTUNNEL too.
//! Negotiating Tight also switches ServerInit parsing to the extended
//! TightVNC layout.

use crate::engine::Session;
use crate::errors::ClientError;
use crate::security::AuthOutcome;
use rfbx_protocol::messages::security;
use rfbx_render::Renderer;

const CAP_NO_AUTH: &[u8; 12] = b"STDVNOAUTH__";
const CAP_VNC_AUTH: &[u8; 12] = b"STDVVNCAUTH_";
const CAP_UNIX_LOGIN: &[u8; 12] = b"TGHTULGNAUTH";

impl<R: Renderer> Session<R> {
    pub(super) async fn auth_tight(&mut self) -> Result<AuthOutcome, ClientError> {
        let num_tunnels = self.stream.read_u32().await?;
        if num_tunnels > 0 {
            let mut no_tunnel = false;
            for _ in 0..num_tunnels {
                let code = self.stream.read_u32().await?;
                let vendor = self.stream.read_bytes(4).await?;
                let signature = self.stream.read_bytes(8).await?;
                if code == 0 || (vendor == b"SICR" && signature == b"SCHANNEL") {
                    no_tunnel = true;
                }
            }
            if !no_tunnel {
                return Err(ClientError::UnsupportedFeature(
                    "Tight: server requires a tunnel".into(),
                ));
            }
            self.send.push_u32(0)?; // NOTUNNEL
            self.send.flush()?;
        }

        self.tight_vnc_mode = true;

        let num_sub_auth = self.stream.read_u32().await?;
        if num_sub_auth == 0 {
            // No authentication required.
            return Ok(AuthOutcome::Done);
        }

        let mut chosen: Option<(u32, u32)> = None; // (cap code, chained scheme)
        for _ in 0..num_sub_auth {
            let code = self.stream.read_u32().await?;
            let mut cap = self.stream.read_bytes(4).await?;
            cap.extend(self.stream.read_bytes(8).await?);
            if chosen.is_none() {
                let cap: &[u8] = &cap;
                if cap == CAP_NO_AUTH {
                    chosen = Some((code, security::NONE));
                } else if cap == CAP_VNC_AUTH {
                    chosen = Some((code, security::VNC_AUTH));
                } else if cap == CAP_UNIX_LOGIN {
                    chosen = Some((code, security::TIGHT_UNIX_LOGIN));
                }
            }
        }

        let (code, scheme) = chosen.ok_or_else(|| {
            ClientError::UnsupportedFeature("Tight: no supported sub-authentication".into())
        })?;
        self.send.push_u32(code)?;
        self.send.flush()?;

        match scheme {
            security::NONE => Ok(AuthOutcome::Done),
            other => Ok(AuthOutcome::Chain(other)),
        }
    }
}
