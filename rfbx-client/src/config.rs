//! Client configuration.

use crate::errors::ClientError;
use serde::{Deserialize, Serialize};

/// Credentials used during the security handshake. Any field left `None`
/// is requested from the embedder via `Event::CredentialsRequired` when a
/// handshake needs it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    pub username: Option<String>,
    pub password: Option<String>,
    /// XVP target machine name.
    pub target: Option<String>,
}

/// Connection configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Credentials for authenticating security types.
    pub credentials: Credentials,

    /// Request a shared session (other clients stay connected).
    pub shared: bool,

    /// UltraVNC repeater ID, sent when the server announces version
    /// `000.000`.
    pub repeater_id: String,

    /// JPEG quality level pseudo-encoding, 0-9.
    pub quality_level: u8,

    /// Compression level pseudo-encoding, 0-9.
    pub compression_level: u8,

    /// Suppress all input (pointer/key/clipboard) messages.
    pub view_only: bool,

    /// Request a dot cursor when the server hides the local one.
    pub show_dot_cursor: bool,

    /// Local viewport dimensions; when set, `Event::ClippingViewport`
    /// fires whenever the remote framebuffer crosses this size.
    pub viewport: Option<(u16, u16)>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            credentials: Credentials::default(),
            shared: true,
            repeater_id: String::new(),
            quality_level: 6,
            compression_level: 2,
            view_only: false,
            show_dot_cursor: false,
            viewport: None,
        }
    }
}

impl Config {
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::default()
    }

    pub fn validate(&self) -> Result<(), ClientError> {
        if self.quality_level > 9 {
            return Err(ClientError::UnsupportedFeature(format!(
                "quality level {} out of range 0-9",
                self.quality_level
            )));
        }
        if self.compression_level > 9 {
            return Err(ClientError::UnsupportedFeature(format!(
                "compression level {} out of range 0-9",
                self.compression_level
            )));
        }
        Ok(())
    }
}

/// Builder for [`Config`].
#[derive(Debug, Default, Clone)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    pub fn username(mut self, username: impl Into<String>) -> Self {
        self.config.credentials.username = Some(username.into());
        self
    }

    pub fn password(mut self, password: impl Into<String>) -> Self {
        self.config.credentials.password = Some(password.into());
        self
    }

    pub fn target(mut self, target: impl Into<String>) -> Self {
        self.config.credentials.target = Some(target.into());
        self
    }

    pub fn shared(mut self, shared: bool) -> Self {
        self.config.shared = shared;
        self
    }

    pub fn repeater_id(mut self, id: impl Into<String>) -> Self {
        self.config.repeater_id = id.into();
        self
    }

    pub fn quality_level(mut self, level: u8) -> Self {
        self.config.quality_level = level;
        self
    }

    pub fn compression_level(mut self, level: u8) -> Self {
        self.config.compression_level = level;
        self
    }

    pub fn view_only(mut self, view_only: bool) -> Self {
        self.config.view_only = view_only;
        self
    }

    pub fn show_dot_cursor(mut self, show: bool) -> Self {
        self.config.show_dot_cursor = show;
        self
    }

    pub fn viewport(mut self, width: u16, height: u16) -> Self {
        self.config.viewport = Some((width, height));
        self
    }

    pub fn build(self) -> Result<Config, ClientError> {
        self.config.validate()?;
        Ok(self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let c = Config::default();
        assert!(c.shared);
        assert_eq!(c.quality_level, 6);
        assert_eq!(c.compression_level, 2);
        assert!(!c.view_only);
        assert!(c.validate().is_ok());
    }

    #[test]
    fn test_builder() {
        let c = Config::builder()
            .username("operator")
            .password("hunter2")
            .quality_level(9)
            .viewport(1280, 720)
            .build()
            .unwrap();
        assert_eq!(c.credentials.username.as_deref(), Some("operator"));
        assert_eq!(c.viewport, Some((1280, 720)));
    }

    #[test]
    fn test_out_of_range_rejected() {
        assert!(Config::builder().quality_level(10).build().is_err());
        assert!(Config::builder().compression_level(11).build().is_err());
    }
}
