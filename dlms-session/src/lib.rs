//! Session layer module for DLMS/COSEM protocol
//!
//! This crate provides the two session layers that delimit COSEM PDUs on a
//! transport: the Wrapper protocol used over TCP/UDP and HDLC used over
//! serial lines (and optionally TCP). Both implement [`SessionLayer`].
//!
//! The [`iec21`] module performs the IEC 62056-21 mode E opening sequence
//! that precedes HDLC on optical and RS-485 ports.

pub mod hdlc;
pub mod iec21;
pub mod layer;
pub mod wrapper;

pub use dlms_core::{DlmsError, DlmsResult};
pub use hdlc::{HdlcAddress, HdlcParameters, HdlcSession};
pub use layer::{SessionKind, SessionLayer};
pub use wrapper::{WRAPPER_HEADER_LENGTH, WrapperHeader, WrapperPdu, WrapperSession};
