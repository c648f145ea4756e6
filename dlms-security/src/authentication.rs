//! Authentication functionality for DLMS/COSEM
//!
//! LOW authentication compares the password carried in the AARQ.
//! High level security runs four passes: the client sends a challenge
//! (CtoS) in the AARQ, the server returns its own challenge (StoC) in the
//! AARE, then each side proves knowledge of the secret by returning
//! f(challenge) of the other side.

use crate::encryption::{AesGcmEncryption, SecurityControl, TAG_LENGTH};
use crate::suite::{AuthenticationMechanism, SecuritySuite};
use crate::utils::{constant_time_eq, random_bytes};
use aes::Aes128;
use cipher::{generic_array::GenericArray, BlockEncrypt, KeyInit};
use dlms_core::{DlmsError, DlmsResult};
use log::debug;
use md5::Md5;
use sha1::Sha1;
use sha2::{Digest, Sha256};
use std::fmt;

pub const MIN_CHALLENGE_LENGTH: usize = 8;
pub const MAX_CHALLENGE_LENGTH: usize = 64;
/// Length of an HLS-GMAC response: SC, frame counter, tag
pub const GMAC_RESPONSE_LENGTH: usize = 1 + 4 + TAG_LENGTH;

/// Why a credential was refused
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    /// The client proposed a different mechanism than configured
    MechanismMismatch,
    /// Password or challenge missing from the request
    MissingCredential,
    WrongPassword,
    /// Client challenge outside 8..=64 bytes
    InvalidChallenge,
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            RejectReason::MechanismMismatch => "authentication mechanism not accepted",
            RejectReason::MissingCredential => "authentication value required",
            RejectReason::WrongPassword => "authentication failure",
            RejectReason::InvalidChallenge => "invalid challenge length",
        };
        f.write_str(text)
    }
}

/// Result of checking the credential of an association request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthOutcome {
    Accept,
    Reject(RejectReason),
}

impl AuthOutcome {
    pub fn is_accept(&self) -> bool {
        matches!(self, AuthOutcome::Accept)
    }
}

/// Check the mechanism and credential an AARQ presents against `suite`
///
/// For HLS mechanisms the credential is the client challenge, which only
/// needs a valid length here; the secret is proven later by
/// [`verify_hls_response`].
pub fn authenticate(
    suite: &SecuritySuite,
    mechanism: AuthenticationMechanism,
    credential: Option<&[u8]>,
) -> AuthOutcome {
    let expected = suite.authentication_mechanism();
    if mechanism != expected {
        debug!("Mechanism {:?} proposed, {:?} configured", mechanism, expected);
        return AuthOutcome::Reject(RejectReason::MechanismMismatch);
    }
    match expected {
        AuthenticationMechanism::None => AuthOutcome::Accept,
        AuthenticationMechanism::Low => {
            let (Some(presented), Some(password)) = (credential, suite.password()) else {
                return AuthOutcome::Reject(RejectReason::MissingCredential);
            };
            if constant_time_eq(presented, password) {
                AuthOutcome::Accept
            } else {
                AuthOutcome::Reject(RejectReason::WrongPassword)
            }
        }
        _ => match credential {
            None => AuthOutcome::Reject(RejectReason::MissingCredential),
            Some(challenge) if !is_valid_challenge(challenge) => {
                AuthOutcome::Reject(RejectReason::InvalidChallenge)
            }
            Some(_) => AuthOutcome::Accept,
        },
    }
}

pub fn is_valid_challenge(challenge: &[u8]) -> bool {
    (MIN_CHALLENGE_LENGTH..=MAX_CHALLENGE_LENGTH).contains(&challenge.len())
}

/// Generate a random challenge of `length` bytes
pub fn generate_challenge(length: usize) -> DlmsResult<Vec<u8>> {
    if !(MIN_CHALLENGE_LENGTH..=MAX_CHALLENGE_LENGTH).contains(&length) {
        return Err(DlmsError::Configuration(format!(
            "Challenge length must be between {} and {} bytes, got {}",
            MIN_CHALLENGE_LENGTH, MAX_CHALLENGE_LENGTH, length
        )));
    }
    random_bytes(length)
}

fn secret(suite: &SecuritySuite) -> DlmsResult<&[u8]> {
    suite
        .authentication_key()
        .ok_or_else(|| DlmsError::Configuration("No HLS secret configured".to_string()))
}

fn aes_ecb(key: &[u8], challenge: &[u8]) -> DlmsResult<Vec<u8>> {
    let cipher = Aes128::new_from_slice(key).map_err(|_| DlmsError::InvalidKeyLength {
        expected: 16,
        actual: key.len(),
    })?;
    let mut data = challenge.to_vec();
    let padded = data.len().div_ceil(16).max(1) * 16;
    data.resize(padded, 0);
    for block in data.chunks_exact_mut(16) {
        cipher.encrypt_block(GenericArray::from_mut_slice(block));
    }
    Ok(data)
}

fn digest<D: Digest>(challenge: &[u8], secret: &[u8]) -> Vec<u8> {
    let mut hasher = D::new();
    hasher.update(challenge);
    hasher.update(secret);
    hasher.finalize().to_vec()
}

fn gmac_tag(
    suite: &SecuritySuite,
    system_title: &[u8],
    frame_counter: u32,
    challenge: &[u8],
) -> DlmsResult<[u8; TAG_LENGTH]> {
    let encryption_key = suite.global_unicast_encryption_key().ok_or_else(|| {
        DlmsError::Configuration("HLS-GMAC requires a global unicast encryption key".to_string())
    })?;
    let authentication_key = secret(suite)?;
    let mut aad = Vec::with_capacity(1 + authentication_key.len() + challenge.len());
    aad.push(SecurityControl::AUTHENTICATED.to_byte());
    aad.extend_from_slice(authentication_key);
    aad.extend_from_slice(challenge);
    AesGcmEncryption::new(encryption_key)?.gmac(system_title, frame_counter, &aad)
}

/// Compute f(challenge) for the suite's HLS mechanism
///
/// `system_title` and `frame_counter` belong to the responding side and
/// are only used by HLS-GMAC.
pub fn hls_response(
    suite: &SecuritySuite,
    challenge: &[u8],
    system_title: &[u8],
    frame_counter: u32,
) -> DlmsResult<Vec<u8>> {
    match suite.authentication_mechanism() {
        AuthenticationMechanism::High => aes_ecb(secret(suite)?, challenge),
        AuthenticationMechanism::HlsMd5 => Ok(digest::<Md5>(challenge, secret(suite)?)),
        AuthenticationMechanism::HlsSha1 => Ok(digest::<Sha1>(challenge, secret(suite)?)),
        AuthenticationMechanism::HlsSha256 => Ok(digest::<Sha256>(challenge, secret(suite)?)),
        AuthenticationMechanism::HlsGmac => {
            let tag = gmac_tag(suite, system_title, frame_counter, challenge)?;
            let mut response = Vec::with_capacity(GMAC_RESPONSE_LENGTH);
            response.push(SecurityControl::AUTHENTICATED.to_byte());
            response.extend_from_slice(&frame_counter.to_be_bytes());
            response.extend_from_slice(&tag);
            Ok(response)
        }
        other => Err(DlmsError::Security(format!("{:?} has no challenge response", other))),
    }
}

/// Check the other side's f(challenge)
///
/// `peer_system_title` is needed for HLS-GMAC, where the frame counter is
/// taken from the response itself.
pub fn verify_hls_response(
    suite: &SecuritySuite,
    challenge: &[u8],
    response: &[u8],
    peer_system_title: Option<&[u8]>,
) -> DlmsResult<bool> {
    if suite.authentication_mechanism() != AuthenticationMechanism::HlsGmac {
        let expected = hls_response(suite, challenge, &[], 0)?;
        return Ok(constant_time_eq(&expected, response));
    }

    if response.len() != GMAC_RESPONSE_LENGTH || response[0] != SecurityControl::AUTHENTICATED.to_byte() {
        return Ok(false);
    }
    let system_title = peer_system_title
        .ok_or_else(|| DlmsError::Security("Peer system title unknown for HLS-GMAC".to_string()))?;
    let frame_counter = u32::from_be_bytes([response[1], response[2], response[3], response[4]]);
    let tag = gmac_tag(suite, system_title, frame_counter, challenge)?;
    Ok(constant_time_eq(&tag, &response[5..]))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hls_suite(mechanism: AuthenticationMechanism) -> SecuritySuite {
        SecuritySuite::builder()
            .set_authentication_mechanism(mechanism)
            .set_authentication_key(vec![0x11; 16])
            .set_global_unicast_encryption_key(vec![0x22; 16])
            .build()
            .unwrap()
    }

    #[test]
    fn test_low_password() {
        let suite = SecuritySuite::low(b"12345678".to_vec());
        assert_eq!(
            authenticate(&suite, AuthenticationMechanism::Low, Some(b"12345678")),
            AuthOutcome::Accept
        );
        assert_eq!(
            authenticate(&suite, AuthenticationMechanism::Low, Some(b"00000000")),
            AuthOutcome::Reject(RejectReason::WrongPassword)
        );
        assert_eq!(
            authenticate(&suite, AuthenticationMechanism::Low, None),
            AuthOutcome::Reject(RejectReason::MissingCredential)
        );
    }

    #[test]
    fn test_mechanism_mismatch() {
        let suite = SecuritySuite::low(b"pw".to_vec());
        assert_eq!(
            authenticate(&suite, AuthenticationMechanism::None, None),
            AuthOutcome::Reject(RejectReason::MechanismMismatch)
        );
        assert!(authenticate(&SecuritySuite::none(), AuthenticationMechanism::None, None).is_accept());
    }

    #[test]
    fn test_hls_challenge_length() {
        let suite = hls_suite(AuthenticationMechanism::HlsMd5);
        assert!(authenticate(&suite, AuthenticationMechanism::HlsMd5, Some(&[1u8; 8])).is_accept());
        assert_eq!(
            authenticate(&suite, AuthenticationMechanism::HlsMd5, Some(&[1u8; 7])),
            AuthOutcome::Reject(RejectReason::InvalidChallenge)
        );
        assert!(generate_challenge(4).is_err());
        assert_eq!(generate_challenge(16).unwrap().len(), 16);
    }

    #[test]
    fn test_hash_responses() {
        let challenge = b"ABCDEFGH";
        for (mechanism, length) in [
            (AuthenticationMechanism::HlsMd5, 16),
            (AuthenticationMechanism::HlsSha1, 20),
            (AuthenticationMechanism::HlsSha256, 32),
            (AuthenticationMechanism::High, 16),
        ] {
            let suite = hls_suite(mechanism);
            let response = hls_response(&suite, challenge, &[], 0).unwrap();
            assert_eq!(response.len(), length, "{:?}", mechanism);
            assert!(verify_hls_response(&suite, challenge, &response, None).unwrap());
            assert!(!verify_hls_response(&suite, b"HGFEDCBA", &response, None).unwrap());
        }
    }

    #[test]
    fn test_md5_response_value() {
        let suite = SecuritySuite::builder()
            .set_authentication_mechanism(AuthenticationMechanism::HlsMd5)
            .set_authentication_key(b"secret".to_vec())
            .build()
            .unwrap();
        let response = hls_response(&suite, b"challenge", &[], 0).unwrap();
        assert_eq!(response, Md5::digest(b"challengesecret").to_vec());
    }

    #[test]
    fn test_gmac_response() {
        let suite = hls_suite(AuthenticationMechanism::HlsGmac);
        let title = b"SRV00001";
        let response = hls_response(&suite, b"client-challenge", title, 42).unwrap();
        assert_eq!(response.len(), GMAC_RESPONSE_LENGTH);
        assert_eq!(&response[..5], &[0x10, 0, 0, 0, 42]);

        assert!(verify_hls_response(&suite, b"client-challenge", &response, Some(title)).unwrap());
        assert!(!verify_hls_response(&suite, b"client-challenge", &response, Some(b"SRV00002")).unwrap());
        assert!(verify_hls_response(&suite, b"client-challenge", &response, None).is_err());
    }

    #[test]
    fn test_different_keys_fail() {
        let suite = hls_suite(AuthenticationMechanism::HlsSha256);
        let other = SecuritySuite::builder()
            .set_authentication_mechanism(AuthenticationMechanism::HlsSha256)
            .set_authentication_key(vec![0x33; 16])
            .build()
            .unwrap();
        let response = hls_response(&other, b"12345678", &[], 0).unwrap();
        assert!(!verify_hls_response(&suite, b"12345678", &response, None).unwrap());
    }
}
