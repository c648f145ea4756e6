//! Security module for DLMS/COSEM protocol
//!
//! This crate provides security functionality including encryption and authentication.

pub mod authentication;
pub mod encryption;
pub mod suite;
pub mod utils;

pub use authentication::{
    authenticate, generate_challenge, hls_response, is_valid_challenge, verify_hls_response, AuthOutcome,
    RejectReason, MAX_CHALLENGE_LENGTH, MIN_CHALLENGE_LENGTH,
};
pub use encryption::{decrypt_apdu, encrypt_apdu, AesGcmEncryption, SecurityControl};
pub use suite::{AuthenticationMechanism, EncryptionMechanism, SecurityPolicy, SecuritySuite, SecuritySuiteBuilder};
pub use utils::SYSTEM_TITLE_LENGTH;
