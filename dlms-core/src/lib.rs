//! Core types and utilities for DLMS/COSEM protocol
//!
//! This crate provides the error taxonomy shared by every layer of the
//! stack and the [`Fragment`] chunking primitive used for segmented
//! transfer.

pub mod error;
pub mod fragment;

pub use error::{DlmsError, DlmsResult, ErrorCategory};
pub use fragment::Fragment;
