//! Application layer module for DLMS/COSEM protocol
//!
//! This crate provides the application association: xDLMS initiate
//! negotiation, the ACSE handshake on both sides, HLS and global
//! ciphering, plus the logical devices a server exposes.

pub mod association;
pub mod conformance;
pub mod exception;
pub mod initiate;
pub mod logical_device;

pub use association::{
    Association, AssociationEvent, AssociationEventListener, AssociationState, CallbackEventListener,
    ClientAssociation, ClientAssociationSettings, ConnectionInfo, ConnectionStatus, ServerAssociation,
    ServerAssociationSettings, ServerStep,
};
pub use conformance::Conformance;
pub use exception::{ExceptionResponse, ServiceError, StateError};
pub use initiate::{ConfirmedServiceError, InitiateError, InitiateRequest, InitiateResponse};
pub use logical_device::LogicalDevice;
