//! Security handshakes.
//!
//! Each scheme is one async step; schemes that wrap another scheme
//! (VeNCrypt subtypes, Tight sub-auth, XVP's VNCAuth fall-through) return
//! [`AuthOutcome::Chain`] and the handshake loop dispatches again. This
//! keeps the dispatch iterative instead of recursive.

mod ard;
mod mslogon;
mod ra2;
mod tight;

use crate::engine::Session;
use crate::errors::ClientError;
use rfbx_protocol::messages::security;
use rfbx_render::Renderer;

/// Result of one authentication step.
pub(crate) enum AuthOutcome {
    /// Authentication is complete; proceed to SecurityResult.
    Done,
    /// Continue with another scheme (VeNCrypt subtype, Tight sub-auth).
    Chain(u32),
}

/// VeNCrypt subtypes this client can chain into (anything dispatchable
/// except VeNCrypt itself).
const SUPPORTED_VENCRYPT_SUBTYPES: [u32; 7] = [
    security::NONE,
    security::VNC_AUTH,
    security::XVP,
    security::ARD,
    security::RA2NE,
    security::MSLOGON_II,
    security::PLAIN,
];

impl<R: Renderer> Session<R> {
    pub(crate) async fn authenticate_step(&mut self, scheme: u32) -> Result<AuthOutcome, ClientError> {
        match scheme {
            security::NONE => Ok(AuthOutcome::Done),
            security::VNC_AUTH => self.auth_vnc().await,
            security::RA2NE => self.auth_ra2().await,
            security::TIGHT => self.auth_tight().await,
            security::VENCRYPT => self.auth_vencrypt().await,
            security::XVP => self.auth_xvp().await,
            security::ARD => self.auth_ard().await,
            security::MSLOGON_II => self.auth_mslogon2().await,
            security::TIGHT_UNIX_LOGIN => self.auth_tight_unix().await,
            security::PLAIN => self.auth_plain().await,
            other => Err(ClientError::UnsupportedFeature(format!(
                "security type {other}"
            ))),
        }
    }

    /// Classic VNC authentication: DES-encrypt the 16-byte challenge with
    /// the password-derived key.
    async fn auth_vnc(&mut self) -> Result<AuthOutcome, ClientError> {
        let challenge: [u8; 16] = self
            .stream
            .read_bytes(16)
            .await?
            .try_into()
            .expect("fixed-size read");
        self.require_credentials(&["password"]).await?;
        let password = self.config.credentials.password.clone().unwrap_or_default();

        let response = rfbx_crypto::des::encrypt_challenge(&password, &challenge);
        self.send.push_bytes(&response)?;
        self.send.flush()?;
        Ok(AuthOutcome::Done)
    }

    /// VeNCrypt: version exchange, then subtype selection. Only version
    /// 0.2 is spoken.
    async fn auth_vencrypt(&mut self) -> Result<AuthOutcome, ClientError> {
        let major = self.stream.read_u8().await?;
        let minor = self.stream.read_u8().await?;
        if (major, minor) != (0, 2) {
            return Err(ClientError::UnsupportedFeature(format!(
                "VeNCrypt version {major}.{minor}"
            )));
        }
        self.send.push_u8(0)?;
        self.send.push_u8(2)?;
        self.send.flush()?;

        let ack = self.stream.read_u8().await?;
        if ack != 0 {
            return Err(ClientError::AuthenticationFailed(
                "server rejected VeNCrypt version".into(),
            ));
        }

        let count = self.stream.read_u8().await? as usize;
        if count == 0 {
            return Err(ClientError::ProtocolViolation(
                "VeNCrypt offered no subtypes".into(),
            ));
        }
        let mut subtypes = Vec::with_capacity(count);
        for _ in 0..count {
            subtypes.push(self.stream.read_u32().await?);
        }

        let chosen = subtypes
            .iter()
            .copied()
            .find(|s| SUPPORTED_VENCRYPT_SUBTYPES.contains(s))
            .ok_or_else(|| {
                ClientError::UnsupportedFeature(format!(
                    "no supported VeNCrypt subtype in {subtypes:?}"
                ))
            })?;
        self.send.push_u32(chosen)?;
        self.send.flush()?;
        Ok(AuthOutcome::Chain(chosen))
    }

    /// VeNCrypt Plain subtype: UTF-8 username and password with u32
    /// length prefixes.
    async fn auth_plain(&mut self) -> Result<AuthOutcome, ClientError> {
        self.require_credentials(&["username", "password"]).await?;
        let username = self.config.credentials.username.clone().unwrap_or_default();
        let password = self.config.credentials.password.clone().unwrap_or_default();

        self.send.push_u32(username.len() as u32)?;
        self.send.push_u32(password.len() as u32)?;
        self.send.push_bytes(username.as_bytes())?;
        self.send.push_bytes(password.as_bytes())?;
        self.send.flush()?;
        Ok(AuthOutcome::Done)
    }

    /// XVP: prepend the username/target block, then run classic VNC
    /// authentication.
    async fn auth_xvp(&mut self) -> Result<AuthOutcome, ClientError> {
        self.require_credentials(&["username", "target"]).await?;
        let username = self.config.credentials.username.clone().unwrap_or_default();
        let target = self.config.credentials.target.clone().unwrap_or_default();

        self.send.push_u8(username.len() as u8)?;
        self.send.push_u8(target.len() as u8)?;
        self.send.push_bytes(username.as_bytes())?;
        self.send.push_bytes(target.as_bytes())?;
        self.send.flush()?;
        Ok(AuthOutcome::Chain(security::VNC_AUTH))
    }

    /// TightVNC Unix login: plain-text credentials with u32 length
    /// prefixes.
    async fn auth_tight_unix(&mut self) -> Result<AuthOutcome, ClientError> {
        self.require_credentials(&["username", "password"]).await?;
        let username = self.config.credentials.username.clone().unwrap_or_default();
        let password = self.config.credentials.password.clone().unwrap_or_default();

        self.send.push_u32(username.len() as u32)?;
        self.send.push_u32(password.len() as u32)?;
        self.send.push_bytes(username.as_bytes())?;
        self.send.push_bytes(password.as_bytes())?;
        self.send.flush()?;
        Ok(AuthOutcome::Done)
    }
}
