//! Connection management module

pub mod builder;
pub mod connection;

pub use builder::{ConnectionBuilder, DEFAULT_RESPONSE_TIMEOUT};
pub use connection::{ConnectionState, DlmsConnection};
