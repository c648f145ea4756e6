//! Transport layer module for DLMS/COSEM protocol
//!
//! This crate provides transport layer implementations for TCP, UDP and
//! serial communication, plus [`IoTransport`] for any tokio byte stream.

pub mod io;
pub mod serial;
pub mod stream;
pub mod tcp;
pub mod udp;

pub use dlms_core::{DlmsError, DlmsResult};
pub use io::IoTransport;
pub use serial::{SerialSettings, SerialTransport};
pub use stream::{StreamAccessor, TransportLayer};
pub use tcp::{TcpSettings, TcpTransport};
pub use udp::{MAX_UDP_PAYLOAD_SIZE, UdpSettings, UdpTransport};
