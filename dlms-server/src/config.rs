//! Server configuration
//!
//! Loaded from TOML; every field has a default so a config file only
//! names what it changes:
//!
//! ```toml
//! port = 4059
//! max_clients = 8
//! inactivity_timeout_ms = 120000
//! referencing = "logical"
//! session = "hdlc"
//!
//! [hdlc]
//! max_info_length = 512
//! window_size = 1
//! ```

use dlms_application::ServerAssociationSettings;
use dlms_application::initiate::{DEFAULT_MAX_PDU_SIZE, MIN_PDU_SIZE};
use dlms_core::{DlmsError, DlmsResult};
use dlms_security::{MAX_CHALLENGE_LENGTH, MIN_CHALLENGE_LENGTH};
use dlms_session::hdlc::parameters::{DEFAULT_MAX_INFORMATION_LENGTH, DEFAULT_WINDOW_SIZE};
use dlms_session::{HdlcParameters, SessionKind};
use serde::{Deserialize, Serialize};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::Path;
use std::time::Duration;

/// Default DLMS/COSEM TCP port
pub const DEFAULT_PORT: u16 = 4059;

/// Object referencing method served to clients
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Referencing {
    #[default]
    Logical,
    Short,
}

/// Session layer run on accepted connections
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionProtocol {
    #[default]
    Wrapper,
    Hdlc,
}

impl From<SessionProtocol> for SessionKind {
    fn from(protocol: SessionProtocol) -> Self {
        match protocol {
            SessionProtocol::Wrapper => SessionKind::Wrapper,
            SessionProtocol::Hdlc => SessionKind::Hdlc,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct HdlcConfig {
    /// Physical device address; SNRM frames for other addresses are ignored
    pub server_address: Option<u16>,
    pub max_info_length: u16,
    pub window_size: u8,
}

impl Default for HdlcConfig {
    fn default() -> Self {
        Self {
            server_address: None,
            max_info_length: DEFAULT_MAX_INFORMATION_LENGTH,
            window_size: DEFAULT_WINDOW_SIZE,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServerConfig {
    pub bind_address: IpAddr,
    pub port: u16,
    /// Concurrent connections admitted; 0 is unbounded
    pub max_clients: usize,
    /// Idle time before an association is aborted; 0 disables the timer
    pub inactivity_timeout_ms: u64,
    pub referencing: Referencing,
    pub session: SessionProtocol,
    pub hdlc: HdlcConfig,
    pub max_pdu_size: u16,
    /// StoC challenge length for HLS
    pub challenge_length: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port: DEFAULT_PORT,
            max_clients: 0,
            inactivity_timeout_ms: 0,
            referencing: Referencing::default(),
            session: SessionProtocol::default(),
            hdlc: HdlcConfig::default(),
            max_pdu_size: DEFAULT_MAX_PDU_SIZE,
            challenge_length: 16,
        }
    }
}

impl ServerConfig {
    /// Parse and validate a TOML document
    pub fn from_toml_str(text: &str) -> DlmsResult<Self> {
        let config: ServerConfig =
            toml::from_str(text).map_err(|e| DlmsError::Configuration(format!("Invalid server config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a TOML file
    pub fn load(path: impl AsRef<Path>) -> DlmsResult<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| DlmsError::Configuration(format!("Cannot read {}: {}", path.display(), e)))?;
        Self::from_toml_str(&text)
    }

    pub fn to_toml_string(&self) -> DlmsResult<String> {
        toml::to_string(self).map_err(|e| DlmsError::Configuration(format!("Cannot serialize server config: {}", e)))
    }

    /// # Errors
    /// `Configuration` for a PDU size below the xDLMS minimum, a challenge
    /// length outside 8..=64 or invalid HDLC link parameters.
    pub fn validate(&self) -> DlmsResult<()> {
        if self.max_pdu_size < MIN_PDU_SIZE {
            return Err(DlmsError::Configuration(format!(
                "max_pdu_size {} is below the minimum of {}",
                self.max_pdu_size, MIN_PDU_SIZE
            )));
        }
        if !(MIN_CHALLENGE_LENGTH..=MAX_CHALLENGE_LENGTH).contains(&self.challenge_length) {
            return Err(DlmsError::Configuration(format!(
                "challenge_length must be between {} and {}, got {}",
                MIN_CHALLENGE_LENGTH, MAX_CHALLENGE_LENGTH, self.challenge_length
            )));
        }
        self.hdlc_parameters()?;
        Ok(())
    }

    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind_address, self.port)
    }

    pub fn inactivity_timeout(&self) -> Option<Duration> {
        (self.inactivity_timeout_ms > 0).then(|| Duration::from_millis(self.inactivity_timeout_ms))
    }

    pub fn hdlc_parameters(&self) -> DlmsResult<HdlcParameters> {
        HdlcParameters::symmetric(self.hdlc.max_info_length, self.hdlc.window_size)
    }

    pub fn association_settings(&self) -> ServerAssociationSettings {
        ServerAssociationSettings {
            logical_name: self.referencing == Referencing::Logical,
            challenge_length: self.challenge_length,
            max_pdu_size: self.max_pdu_size,
        }
    }
}
