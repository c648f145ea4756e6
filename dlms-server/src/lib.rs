//! DLMS/COSEM server implementation
//!
//! This crate accepts TCP connections, runs the Wrapper or HDLC session
//! layer on each one and drives the server side of the application
//! association for the registered logical devices. Established
//! associations hand their xDLMS requests to a [`RequestHandler`].

pub mod config;
mod connection;
pub mod handler;
pub mod listener;

pub use config::{DEFAULT_PORT, HdlcConfig, Referencing, ServerConfig, SessionProtocol};
pub use handler::{ConnectionListener, RequestHandler, UnsupportedServiceHandler};
pub use listener::ServerListener;
