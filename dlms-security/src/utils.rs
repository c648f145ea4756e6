//! Security utility functions for DLMS/COSEM

use dlms_core::{DlmsError, DlmsResult};
use ring::rand::{SecureRandom, SystemRandom};
use subtle::ConstantTimeEq;

/// Length of a COSEM system title
pub const SYSTEM_TITLE_LENGTH: usize = 8;

/// Fill a buffer of `len` bytes from the system random source
pub fn random_bytes(len: usize) -> DlmsResult<Vec<u8>> {
    let rng = SystemRandom::new();
    let mut bytes = vec![0u8; len];
    rng.fill(&mut bytes)
        .map_err(|_| DlmsError::Security("System random source failed".to_string()))?;
    Ok(bytes)
}

/// Generate a random AES-128 key
pub fn generate_aes128_key() -> DlmsResult<Vec<u8>> {
    random_bytes(16)
}

/// Compare two byte strings without an early exit on the first difference
pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    a.ct_eq(b).into()
}

pub(crate) fn check_system_title(system_title: &[u8]) -> DlmsResult<()> {
    if system_title.len() != SYSTEM_TITLE_LENGTH {
        return Err(DlmsError::InvalidKeyLength {
            expected: SYSTEM_TITLE_LENGTH,
            actual: system_title.len(),
        });
    }
    Ok(())
}
