//! Association module for DLMS/COSEM connections
//!
//! This module provides the application association between a client and
//! a logical device: the AARQ/AARE handshake, HLS pass 3/4, global
//! ciphering of xDLMS APDUs and the RLRQ/RLRE release.
//!
//! # Association Lifecycle
//!
//! ```text
//!   AARQ -> AARE accepted      [reply_to_hls]       RLRQ -> RLRE
//!   ---------------------      --------------       ------------
//! Idle -> AwaitingHandshake -> Associated ---------> Releasing -> Closed
//!                 |                 |
//!                 +-----------------+--> Aborted -> Closed
//! ```
//!
//! # Example
//!
//! ```rust
//! use dlms_application::association::{ClientAssociation, ClientAssociationSettings};
//! use dlms_security::SecuritySuite;
//!
//! let settings = ClientAssociationSettings::new(SecuritySuite::low(b"secret".to_vec()));
//! let mut association = ClientAssociation::new(settings).unwrap();
//! let aarq = association.build_aarq().unwrap();
//! assert_eq!(aarq[0], 0x60);
//! ```

pub mod ciphering;
pub mod client;
pub mod events;
pub mod hls;
pub mod server;
pub mod state;

pub use ciphering::CipherContext;
pub use client::{ClientAssociation, ClientAssociationSettings};
pub use events::{AssociationEvent, AssociationEventListener, CallbackEventListener, EventsEmitter};
pub use server::{ServerAssociation, ServerAssociationSettings, ServerStep};
pub use state::AssociationState;

#[cfg(feature = "tokio")]
pub use events::channel_listener::ChannelEventListener;

use crate::conformance::Conformance;
use dlms_asn1::ApplicationContextName;
use dlms_security::SecuritySuite;
use std::fmt;

/// Transport-level status of a connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ConnectionStatus {
    #[default]
    Open,
    Closed,
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Open => write!(f, "OPEN"),
            Self::Closed => write!(f, "CLOSED"),
        }
    }
}

/// What the server knows about one accepted connection
///
/// Client and logical device ids are only known once the session layer
/// has seen the first frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionInfo {
    pub connection_id: u64,
    pub remote_address: String,
    pub client_id: Option<u16>,
    pub logical_device_id: Option<u16>,
    pub status: ConnectionStatus,
}

impl ConnectionInfo {
    pub fn open(connection_id: u64, remote_address: impl Into<String>) -> Self {
        Self {
            connection_id,
            remote_address: remote_address.into(),
            client_id: None,
            logical_device_id: None,
            status: ConnectionStatus::Open,
        }
    }

    #[must_use]
    pub fn with_addresses(mut self, client_id: u16, logical_device_id: Option<u16>) -> Self {
        self.client_id = Some(client_id);
        self.logical_device_id = logical_device_id.or(self.logical_device_id);
        self
    }

    #[must_use]
    pub fn closed(&self) -> Self {
        Self {
            status: ConnectionStatus::Closed,
            ..self.clone()
        }
    }
}

/// An established association between a client and a logical device
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Association {
    pub connection_id: u64,
    pub client_id: u16,
    pub logical_device_id: u16,
    /// Snapshot of the client's suite taken when the AARQ was accepted
    pub security: SecuritySuite,
    pub application_context: ApplicationContextName,
    pub conformance: Conformance,
    pub max_pdu_size: u16,
    pub state: AssociationState,
    /// False while an HLS pass 3/4 is outstanding
    pub authenticated: bool,
    pub connection: ConnectionInfo,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_info() {
        let info = ConnectionInfo::open(7, "10.0.0.1:4059");
        assert_eq!(info.client_id, None);
        assert_eq!(info.status, ConnectionStatus::Open);

        let info = info.with_addresses(16, Some(1));
        assert_eq!(info.client_id, Some(16));
        assert_eq!(info.logical_device_id, Some(1));
        assert_eq!(info.clone().with_addresses(17, None).logical_device_id, Some(1));

        let closed = info.closed();
        assert_eq!(closed.status, ConnectionStatus::Closed);
        assert_eq!(closed.connection_id, 7);
        assert_eq!(closed.status.to_string(), "CLOSED");
    }
}
