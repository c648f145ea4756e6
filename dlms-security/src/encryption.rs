//! Encryption functionality for DLMS/COSEM
//!
//! Security suite 0: AES-128-GCM with a 96 bit IV made of the sender
//! system title and its frame counter, and a 12 byte authentication tag.

use crate::utils::check_system_title;
use aes::Aes128;
use aes_gcm::{
    aead::{consts::U12, Aead, KeyInit, Payload},
    AesGcm, Nonce,
};
use dlms_core::{DlmsError, DlmsResult};

/// Length of the truncated GCM tag
pub const TAG_LENGTH: usize = 12;
/// Security control byte and frame counter
pub const SECURITY_HEADER_LENGTH: usize = 5;

type Aes128Gcm12 = AesGcm<Aes128, U12, U12>;

/// Security control byte for DLMS APDU
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SecurityControl {
    byte: u8,
}

impl SecurityControl {
    /// Authentication only, as used by HLS-GMAC
    pub const AUTHENTICATED: SecurityControl = SecurityControl { byte: 0x10 };
    pub const AUTHENTICATED_AND_ENCRYPTED: SecurityControl = SecurityControl { byte: 0x30 };

    pub fn new(security_suite_id: u8, authenticated: bool, encrypted: bool, key_set: bool) -> Self {
        let mut byte = security_suite_id & 0x0F;
        if authenticated {
            byte |= 0x10;
        }
        if encrypted {
            byte |= 0x20;
        }
        if key_set {
            byte |= 0x40;
        }
        Self { byte }
    }

    pub fn from_byte(byte: u8) -> Self {
        Self { byte }
    }

    pub fn to_byte(&self) -> u8 {
        self.byte
    }

    pub fn security_suite_id(&self) -> u8 {
        self.byte & 0x0F
    }

    pub fn is_authenticated(&self) -> bool {
        (self.byte & 0x10) != 0
    }

    pub fn is_encrypted(&self) -> bool {
        (self.byte & 0x20) != 0
    }

    /// Key set bit: broadcast key when set, unicast otherwise
    pub fn is_key_set(&self) -> bool {
        (self.byte & 0x40) != 0
    }
}

/// AES-GCM encryption context bound to one block cipher key
pub struct AesGcmEncryption {
    cipher: Aes128Gcm12,
}

impl AesGcmEncryption {
    /// Create a new AES-GCM encryption context
    pub fn new(key: &[u8]) -> DlmsResult<Self> {
        let cipher = Aes128Gcm12::new_from_slice(key).map_err(|_| DlmsError::InvalidKeyLength {
            expected: 16,
            actual: key.len(),
        })?;
        Ok(Self { cipher })
    }

    fn initialization_vector(system_title: &[u8], frame_counter: u32) -> DlmsResult<[u8; 12]> {
        check_system_title(system_title)?;
        let mut iv = [0u8; 12];
        iv[..8].copy_from_slice(system_title);
        iv[8..].copy_from_slice(&frame_counter.to_be_bytes());
        Ok(iv)
    }

    /// Encrypt and authenticate `plaintext`, returning ciphertext followed by the tag
    pub fn encrypt(
        &self,
        system_title: &[u8],
        frame_counter: u32,
        aad: &[u8],
        plaintext: &[u8],
    ) -> DlmsResult<Vec<u8>> {
        let iv = Self::initialization_vector(system_title, frame_counter)?;
        self.cipher
            .encrypt(Nonce::<U12>::from_slice(&iv), Payload { msg: plaintext, aad })
            .map_err(|e| DlmsError::Security(format!("Encryption failed: {}", e)))
    }

    /// Verify the tag and decrypt `ciphertext` (tag included)
    pub fn decrypt(
        &self,
        system_title: &[u8],
        frame_counter: u32,
        aad: &[u8],
        ciphertext: &[u8],
    ) -> DlmsResult<Vec<u8>> {
        if ciphertext.len() < TAG_LENGTH {
            return Err(DlmsError::Security("Ciphertext shorter than the tag".to_string()));
        }
        let iv = Self::initialization_vector(system_title, frame_counter)?;
        self.cipher
            .decrypt(Nonce::<U12>::from_slice(&iv), Payload { msg: ciphertext, aad })
            .map_err(|_| DlmsError::AuthenticationFailed("GCM tag mismatch".to_string()))
    }

    /// GMAC: the tag over `aad` with an empty message
    pub fn gmac(&self, system_title: &[u8], frame_counter: u32, aad: &[u8]) -> DlmsResult<[u8; TAG_LENGTH]> {
        let tag = self.encrypt(system_title, frame_counter, aad, &[])?;
        let mut out = [0u8; TAG_LENGTH];
        out.copy_from_slice(&tag);
        Ok(out)
    }
}

/// Cipher a whole APDU: `SC || FC || ciphertext || tag`
///
/// The authentication key is bound into the tag through the AAD
/// `SC || AK`.
pub fn encrypt_apdu(
    encryption_key: &[u8],
    authentication_key: &[u8],
    system_title: &[u8],
    frame_counter: u32,
    apdu: &[u8],
) -> DlmsResult<Vec<u8>> {
    let sc = SecurityControl::AUTHENTICATED_AND_ENCRYPTED;
    let mut aad = Vec::with_capacity(1 + authentication_key.len());
    aad.push(sc.to_byte());
    aad.extend_from_slice(authentication_key);

    let ciphered = AesGcmEncryption::new(encryption_key)?.encrypt(system_title, frame_counter, &aad, apdu)?;
    let mut out = Vec::with_capacity(SECURITY_HEADER_LENGTH + ciphered.len());
    out.push(sc.to_byte());
    out.extend_from_slice(&frame_counter.to_be_bytes());
    out.extend_from_slice(&ciphered);
    Ok(out)
}

/// Reverse [`encrypt_apdu`], returning the sender's frame counter and the APDU
pub fn decrypt_apdu(
    encryption_key: &[u8],
    authentication_key: &[u8],
    system_title: &[u8],
    data: &[u8],
) -> DlmsResult<(u32, Vec<u8>)> {
    if data.len() < SECURITY_HEADER_LENGTH + TAG_LENGTH {
        return Err(DlmsError::InvalidData(format!(
            "Ciphered APDU too short: {} bytes",
            data.len()
        )));
    }
    let sc = SecurityControl::from_byte(data[0]);
    if !sc.is_encrypted() || !sc.is_authenticated() {
        return Err(DlmsError::Security(format!(
            "Unsupported security control byte 0x{:02X}",
            sc.to_byte()
        )));
    }
    let frame_counter = u32::from_be_bytes([data[1], data[2], data[3], data[4]]);
    let mut aad = Vec::with_capacity(1 + authentication_key.len());
    aad.push(sc.to_byte());
    aad.extend_from_slice(authentication_key);

    let apdu = AesGcmEncryption::new(encryption_key)?.decrypt(
        system_title,
        frame_counter,
        &aad,
        &data[SECURITY_HEADER_LENGTH..],
    )?;
    Ok((frame_counter, apdu))
}

#[cfg(test)]
mod tests {
    use super::*;

    const KEY: [u8; 16] = [
        0x00, 0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08, 0x09, 0x0A, 0x0B, 0x0C, 0x0D, 0x0E, 0x0F,
    ];
    const AK: [u8; 16] = [0xD0; 16];
    const TITLE: &[u8; 8] = b"MMM00001";

    #[test]
    fn test_aes_gcm_encrypt_decrypt() {
        let enc = AesGcmEncryption::new(&KEY).unwrap();
        let ciphertext = enc.encrypt(TITLE, 1, b"aad", b"Hello, World!").unwrap();
        assert_eq!(ciphertext.len(), 13 + TAG_LENGTH);
        let plaintext = enc.decrypt(TITLE, 1, b"aad", &ciphertext).unwrap();
        assert_eq!(plaintext, b"Hello, World!");
    }

    #[test]
    fn test_wrong_frame_counter_fails() {
        let enc = AesGcmEncryption::new(&KEY).unwrap();
        let ciphertext = enc.encrypt(TITLE, 1, &[], b"data").unwrap();
        assert!(matches!(
            enc.decrypt(TITLE, 2, &[], &ciphertext),
            Err(DlmsError::AuthenticationFailed(_))
        ));
    }

    #[test]
    fn test_invalid_key_length() {
        assert!(matches!(
            AesGcmEncryption::new(&[0u8; 10]),
            Err(DlmsError::InvalidKeyLength { expected: 16, actual: 10 })
        ));
    }

    #[test]
    fn test_apdu_layout() {
        let ciphered = encrypt_apdu(&KEY, &AK, TITLE, 0x0102_0304, &[0xC0, 0x01, 0x81]).unwrap();
        assert_eq!(&ciphered[..5], &[0x30, 0x01, 0x02, 0x03, 0x04]);
        assert_eq!(ciphered.len(), 5 + 3 + TAG_LENGTH);

        let (fc, apdu) = decrypt_apdu(&KEY, &AK, TITLE, &ciphered).unwrap();
        assert_eq!(fc, 0x0102_0304);
        assert_eq!(apdu, vec![0xC0, 0x01, 0x81]);

        // a different authentication key changes the AAD
        assert!(decrypt_apdu(&KEY, &[0u8; 16], TITLE, &ciphered).is_err());
    }

    #[test]
    fn test_gmac_depends_on_data() {
        let enc = AesGcmEncryption::new(&KEY).unwrap();
        let a = enc.gmac(TITLE, 5, b"challenge-a").unwrap();
        let b = enc.gmac(TITLE, 5, b"challenge-b").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_security_control() {
        let ctrl = SecurityControl::new(0, true, true, false);
        assert_eq!(ctrl, SecurityControl::AUTHENTICATED_AND_ENCRYPTED);
        assert!(ctrl.is_authenticated());
        assert!(ctrl.is_encrypted());
        assert!(!ctrl.is_key_set());
    }
}
