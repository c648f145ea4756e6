//! DLMS/COSEM client implementation
//!
//! This crate provides client-side functionality for connecting to
//! DLMS/COSEM devices: a [`ConnectionBuilder`] validates transport, session
//! and security settings and yields a [`DlmsConnection`] that opens the
//! association (including HLS), exchanges xDLMS APDUs and releases it.

pub mod connection;

pub use connection::{ConnectionBuilder, ConnectionState, DEFAULT_RESPONSE_TIMEOUT, DlmsConnection};
