//! Global ciphering of APDUs in ciphered application contexts
//!
//! A glo-ciphered APDU is `glo-tag | length | SC | FC | ciphertext | tag`.
//! The IV is built from the sender's system title, so each side ciphers
//! with its own title and deciphers with the peer's.

use dlms_asn1::{AxdrDecoder, axdr::encode_length};
use dlms_core::{DlmsError, DlmsResult};
use dlms_security::{SYSTEM_TITLE_LENGTH, SecuritySuite, decrypt_apdu, encrypt_apdu};

/// glo tag of a plain APDU tag, `None` for APDUs that are never ciphered
pub fn glo_tag(plain_tag: u8) -> Option<u8> {
    match plain_tag {
        // initiate-request, initiate-response
        0x01 | 0x08 => Some(plain_tag + 0x20),
        // get/set/event-notification/action requests and responses
        0xC0..=0xC7 => Some(plain_tag + 0x08),
        _ => None,
    }
}

/// Plain APDU tag carried by a glo tag
pub fn plain_tag(glo_tag: u8) -> Option<u8> {
    match glo_tag {
        0x21 | 0x28 => Some(glo_tag - 0x20),
        0xC8..=0xCF => Some(glo_tag - 0x08),
        _ => None,
    }
}

pub fn is_glo_tag(tag: u8) -> bool {
    plain_tag(tag).is_some()
}

/// Keys, titles and invocation counters of one ciphered association
#[derive(Clone)]
pub struct CipherContext {
    encryption_key: Vec<u8>,
    authentication_key: Vec<u8>,
    local_system_title: Vec<u8>,
    peer_system_title: Option<Vec<u8>>,
    invocation_counter: u32,
    peer_invocation_counter: Option<u32>,
}

impl CipherContext {
    /// # Errors
    /// `Configuration` if the suite has no encryption key or a system
    /// title is not 8 bytes long.
    pub fn new(suite: &SecuritySuite, local_system_title: &[u8], peer_system_title: Option<&[u8]>) -> DlmsResult<Self> {
        let encryption_key = suite
            .global_unicast_encryption_key()
            .ok_or_else(|| DlmsError::Configuration("Ciphered context without encryption key".to_string()))?
            .to_vec();
        check_title(local_system_title)?;
        if let Some(peer) = peer_system_title {
            check_title(peer)?;
        }
        Ok(Self {
            encryption_key,
            authentication_key: suite.authentication_key().unwrap_or_default().to_vec(),
            local_system_title: local_system_title.to_vec(),
            peer_system_title: peer_system_title.map(<[u8]>::to_vec),
            invocation_counter: 1,
            peer_invocation_counter: None,
        })
    }

    pub fn set_peer_system_title(&mut self, title: &[u8]) -> DlmsResult<()> {
        check_title(title)?;
        self.peer_system_title = Some(title.to_vec());
        Ok(())
    }

    pub fn peer_system_title(&self) -> Option<&[u8]> {
        self.peer_system_title.as_deref()
    }

    /// Switch to the dedicated key negotiated in the InitiateRequest
    pub fn use_dedicated_key(&mut self, key: &[u8]) {
        self.encryption_key = key.to_vec();
    }

    /// Take the next value of the local invocation counter
    pub fn next_invocation_counter(&mut self) -> DlmsResult<u32> {
        let current = self.invocation_counter;
        self.invocation_counter = current
            .checked_add(1)
            .ok_or_else(|| DlmsError::Security("Invocation counter exhausted".to_string()))?;
        Ok(current)
    }

    /// Cipher a plain APDU into its glo form
    pub fn cipher(&mut self, apdu: &[u8]) -> DlmsResult<Vec<u8>> {
        let tag = apdu
            .first()
            .copied()
            .and_then(glo_tag)
            .ok_or_else(|| DlmsError::Security("APDU cannot be ciphered".to_string()))?;
        let frame_counter = self.next_invocation_counter()?;
        let content = encrypt_apdu(
            &self.encryption_key,
            &self.authentication_key,
            &self.local_system_title,
            frame_counter,
            apdu,
        )?;
        let mut out = Vec::with_capacity(content.len() + 4);
        out.push(tag);
        encode_length(content.len(), &mut out);
        out.extend_from_slice(&content);
        Ok(out)
    }

    /// Decipher a glo APDU received from the peer
    ///
    /// # Errors
    /// - `Security` for a plain APDU, an unknown peer title or a frame
    ///   counter that does not increase
    /// - `AuthenticationFailed` if the tag does not verify
    pub fn decipher(&mut self, data: &[u8]) -> DlmsResult<Vec<u8>> {
        let mut decoder = AxdrDecoder::new(data);
        let tag = decoder.decode_u8()?;
        let expected_tag = plain_tag(tag)
            .ok_or_else(|| DlmsError::Security(format!("Expected a ciphered APDU, got tag 0x{:02X}", tag)))?;
        let content = decoder.decode_octet_string()?;
        decoder.finish()?;

        let peer = self
            .peer_system_title
            .as_deref()
            .ok_or_else(|| DlmsError::Security("Peer system title unknown".to_string()))?;
        let (frame_counter, apdu) = decrypt_apdu(&self.encryption_key, &self.authentication_key, peer, content)?;
        if self.peer_invocation_counter.is_some_and(|last| frame_counter <= last) {
            return Err(DlmsError::Security(format!(
                "Replayed invocation counter {}",
                frame_counter
            )));
        }
        if apdu.first() != Some(&expected_tag) {
            return Err(DlmsError::Security(format!(
                "Ciphered APDU does not match glo tag 0x{:02X}",
                tag
            )));
        }
        self.peer_invocation_counter = Some(frame_counter);
        Ok(apdu)
    }
}

impl std::fmt::Debug for CipherContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CipherContext")
            .field("local_system_title", &self.local_system_title)
            .field("peer_system_title", &self.peer_system_title)
            .field("invocation_counter", &self.invocation_counter)
            .finish_non_exhaustive()
    }
}

fn check_title(title: &[u8]) -> DlmsResult<()> {
    if title.len() != SYSTEM_TITLE_LENGTH {
        return Err(DlmsError::Configuration(format!(
            "System title must be {} bytes, got {}",
            SYSTEM_TITLE_LENGTH,
            title.len()
        )));
    }
    Ok(())
}
