//! Rust implementation of the DLMS/COSEM session and association layers
//!
//! # Architecture
//!
//! This library is organized as a workspace with multiple crates:
//!
//! - `dlms-core`: Error taxonomy and fragmentation
//! - `dlms-asn1`: AARQ/AARE/RLRQ/RLRE BER codec
//! - `dlms-transport`: Transport layer (TCP, UDP, Serial)
//! - `dlms-session`: Session layer (HDLC, Wrapper, IEC 62056-21 mode E)
//! - `dlms-security`: Security suites, HLS and AES-GCM ciphering
//! - `dlms-application`: xDLMS initiate, logical devices and the association engines
//! - `dlms-client`: Client connections
//! - `dlms-server`: TCP server with admission control
//!
//! # Usage
//!
//! ```no_run
//! use dlms::client::ConnectionBuilder;
//! use dlms::security::SecuritySuite;
//!
//! # async fn run() -> dlms::DlmsResult<()> {
//! let mut conn = ConnectionBuilder::new()
//!     .tcp("192.168.1.100:4059")
//!     .wrapper_ids(0x11, 0x01)
//!     .security(SecuritySuite::low(b"12345678".to_vec()))
//!     .build()?;
//! conn.open().await?;
//! conn.release().await?;
//! # Ok(())
//! # }
//! ```

pub use dlms_core::{DlmsError, DlmsResult, ErrorCategory};

pub mod core {
    pub use dlms_core::*;
}

pub mod asn1 {
    pub use dlms_asn1::*;
}

pub mod transport {
    pub use dlms_transport::*;
}

pub mod session {
    pub use dlms_session::*;
}

pub mod security {
    pub use dlms_security::*;
}

pub mod application {
    pub use dlms_application::*;
}

pub mod client {
    pub use dlms_client::*;
}

pub mod server {
    pub use dlms_server::*;
}
