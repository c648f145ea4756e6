//! Security suite configuration for DLMS/COSEM

use dlms_core::{DlmsError, DlmsResult};
use std::fmt;

/// AES-128 key length in bytes
pub const AES128_KEY_LENGTH: usize = 16;

/// Security policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SecurityPolicy {
    /// No encryption and authentication
    #[default]
    Nothing = 0,
    /// All messages to be authenticated
    Authenticated = 1,
    /// All messages to be encrypted
    Encrypted = 2,
    /// All messages to be authenticated and encrypted
    AuthenticatedAndEncrypted = 3,
}

impl SecurityPolicy {
    pub fn is_authenticated(&self) -> bool {
        matches!(self, SecurityPolicy::Authenticated | SecurityPolicy::AuthenticatedAndEncrypted)
    }

    pub fn is_encrypted(&self) -> bool {
        matches!(self, SecurityPolicy::Encrypted | SecurityPolicy::AuthenticatedAndEncrypted)
    }
}

/// Encryption mechanism
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EncryptionMechanism {
    /// Do not encrypt transport
    #[default]
    None,
    /// Use AES-128-GCM
    AesGcm128,
}

impl EncryptionMechanism {
    pub fn key_length_bytes(&self) -> Option<usize> {
        match self {
            EncryptionMechanism::None => None,
            EncryptionMechanism::AesGcm128 => Some(AES128_KEY_LENGTH),
        }
    }

    /// Check a key against the algorithm's required size
    pub fn validate_key_length(&self, key: &[u8]) -> DlmsResult<()> {
        match self.key_length_bytes() {
            Some(expected) if key.len() != expected => Err(DlmsError::InvalidKeyLength {
                expected,
                actual: key.len(),
            }),
            _ => Ok(()),
        }
    }
}

/// Authentication mechanism
///
/// The discriminant is the last arc of the mechanism-name object
/// identifier `2.16.756.5.8.2.x`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum AuthenticationMechanism {
    /// Lowest level security, no authentication
    #[default]
    None = 0,
    /// Client presents a shared password
    Low = 1,
    /// High level security, manufacturer specific (AES-128 of the challenge)
    High = 2,
    /// HLS with MD5
    HlsMd5 = 3,
    /// HLS with SHA-1
    HlsSha1 = 4,
    /// HLS with GMAC
    HlsGmac = 5,
    /// HLS with SHA-256
    HlsSha256 = 6,
}

impl AuthenticationMechanism {
    pub fn id(&self) -> u8 {
        *self as u8
    }

    pub fn from_id(id: u8) -> DlmsResult<Self> {
        match id {
            0 => Ok(AuthenticationMechanism::None),
            1 => Ok(AuthenticationMechanism::Low),
            2 => Ok(AuthenticationMechanism::High),
            3 => Ok(AuthenticationMechanism::HlsMd5),
            4 => Ok(AuthenticationMechanism::HlsSha1),
            5 => Ok(AuthenticationMechanism::HlsGmac),
            6 => Ok(AuthenticationMechanism::HlsSha256),
            _ => Err(DlmsError::Security(format!("Invalid authentication mechanism ID: {}", id))),
        }
    }

    /// True for every mechanism that runs the four-pass challenge exchange
    pub fn is_hls(&self) -> bool {
        self.id() >= AuthenticationMechanism::High.id()
    }

    /// Required authentication key length, where the algorithm fixes one
    pub fn key_length_bytes(&self) -> Option<usize> {
        match self {
            AuthenticationMechanism::High | AuthenticationMechanism::HlsGmac => Some(AES128_KEY_LENGTH),
            _ => None,
        }
    }

    fn validate_authentication_key(&self, key: &[u8]) -> DlmsResult<()> {
        match self.key_length_bytes() {
            Some(expected) if key.len() != expected => Err(DlmsError::InvalidKeyLength {
                expected,
                actual: key.len(),
            }),
            None if key.is_empty() => Err(DlmsError::InvalidKeyLength {
                expected: 1,
                actual: 0,
            }),
            _ => Ok(()),
        }
    }
}

/// Security suite builder
#[derive(Debug, Default)]
pub struct SecuritySuiteBuilder {
    encryption_mechanism: EncryptionMechanism,
    authentication_mechanism: AuthenticationMechanism,
    global_unicast_encryption_key: Option<Vec<u8>>,
    authentication_key: Option<Vec<u8>>,
    password: Option<Vec<u8>>,
    use_dedicated_key: bool,
    security_policy: Option<SecurityPolicy>,
}

impl SecuritySuiteBuilder {
    /// Builder with no authentication and no encryption
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_security_policy(mut self, policy: SecurityPolicy) -> Self {
        self.security_policy = Some(policy);
        self
    }

    pub fn set_encryption_mechanism(mut self, mechanism: EncryptionMechanism) -> Self {
        self.encryption_mechanism = mechanism;
        self
    }

    pub fn set_authentication_mechanism(mut self, mechanism: AuthenticationMechanism) -> Self {
        self.authentication_mechanism = mechanism;
        self
    }

    pub fn set_global_unicast_encryption_key(mut self, key: Vec<u8>) -> Self {
        self.global_unicast_encryption_key = Some(key);
        self
    }

    /// Authentication key, or the HLS secret for MD5/SHA mechanisms
    pub fn set_authentication_key(mut self, key: Vec<u8>) -> Self {
        self.authentication_key = Some(key);
        self
    }

    /// Set the password and select LOW authentication
    pub fn set_password(mut self, password: Vec<u8>) -> Self {
        self.password = Some(password);
        self.authentication_mechanism = AuthenticationMechanism::Low;
        self
    }

    /// Use a dedicated (per-association) key instead of the global unicast key
    pub fn set_use_dedicated_key(mut self, dedicated: bool) -> Self {
        self.use_dedicated_key = dedicated;
        self
    }

    /// Build the security suite
    ///
    /// # Errors
    /// - `InvalidKeyLength` when a key does not fit its algorithm
    /// - `Configuration` when a required password or key is missing
    pub fn build(self) -> DlmsResult<SecuritySuite> {
        let security_policy = self.security_policy.unwrap_or(
            match (
                self.authentication_mechanism.is_hls(),
                self.encryption_mechanism != EncryptionMechanism::None,
            ) {
                (true, true) => SecurityPolicy::AuthenticatedAndEncrypted,
                (true, false) => SecurityPolicy::Authenticated,
                (false, true) => SecurityPolicy::Encrypted,
                (false, false) => SecurityPolicy::Nothing,
            },
        );
        self.validate(security_policy)?;

        Ok(SecuritySuite {
            global_unicast_encryption_key: self.global_unicast_encryption_key,
            authentication_key: self.authentication_key,
            password: self.password,
            encryption_mechanism: self.encryption_mechanism,
            authentication_mechanism: self.authentication_mechanism,
            security_policy,
            use_dedicated_key: self.use_dedicated_key,
            staged: StagedKeys::default(),
        })
    }

    fn validate(&self, security_policy: SecurityPolicy) -> DlmsResult<()> {
        if security_policy.is_encrypted() && self.encryption_mechanism == EncryptionMechanism::None {
            return Err(DlmsError::Configuration(
                "Select a cryptographic algorithm to encrypt messages".to_string(),
            ));
        }
        if security_policy.is_authenticated() && !self.authentication_mechanism.is_hls() {
            return Err(DlmsError::Configuration(
                "Select a HLS authentication to authenticate messages".to_string(),
            ));
        }

        match (&self.global_unicast_encryption_key, self.encryption_mechanism) {
            (Some(key), mechanism) => mechanism.validate_key_length(key)?,
            (None, EncryptionMechanism::AesGcm128) => {
                return Err(DlmsError::Configuration(
                    "AES-GCM encryption requires a global unicast encryption key".to_string(),
                ));
            }
            (None, EncryptionMechanism::None) => {}
        }

        let mechanism = self.authentication_mechanism;
        if mechanism == AuthenticationMechanism::Low && self.password.is_none() {
            return Err(DlmsError::Configuration(
                "Password is not set for the security level low".to_string(),
            ));
        }
        if mechanism.is_hls() {
            let key = self.authentication_key.as_deref().ok_or_else(|| {
                DlmsError::Configuration(format!("{:?} requires an authentication key", mechanism))
            })?;
            mechanism.validate_authentication_key(key)?;
        }
        if mechanism == AuthenticationMechanism::HlsGmac {
            let key = self.global_unicast_encryption_key.as_deref().ok_or_else(|| {
                DlmsError::Configuration("HLS-GMAC requires a global unicast encryption key".to_string())
            })?;
            EncryptionMechanism::AesGcm128.validate_key_length(key)?;
        }
        Ok(())
    }
}

/// Replacement keys waiting for confirmation
#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct StagedKeys {
    authentication_key: Option<Vec<u8>>,
    global_unicast_encryption_key: Option<Vec<u8>>,
}

/// Authentication and encryption configuration of one client identity
///
/// Key changes are transactional: a replacement key is staged first and
/// only takes effect on [`SecuritySuite::commit_staged_keys`]. Until then
/// the previous key stays in use.
#[derive(Clone, PartialEq, Eq)]
pub struct SecuritySuite {
    global_unicast_encryption_key: Option<Vec<u8>>,
    authentication_key: Option<Vec<u8>>,
    password: Option<Vec<u8>>,
    encryption_mechanism: EncryptionMechanism,
    authentication_mechanism: AuthenticationMechanism,
    security_policy: SecurityPolicy,
    use_dedicated_key: bool,
    staged: StagedKeys,
}

impl SecuritySuite {
    pub fn builder() -> SecuritySuiteBuilder {
        SecuritySuiteBuilder::new()
    }

    /// Suite for the public client: no authentication, no encryption
    pub fn none() -> Self {
        Self {
            global_unicast_encryption_key: None,
            authentication_key: None,
            password: None,
            encryption_mechanism: EncryptionMechanism::None,
            authentication_mechanism: AuthenticationMechanism::None,
            security_policy: SecurityPolicy::Nothing,
            use_dedicated_key: false,
            staged: StagedKeys::default(),
        }
    }

    /// Suite for LOW authentication with `password`
    pub fn low(password: impl Into<Vec<u8>>) -> Self {
        Self {
            password: Some(password.into()),
            authentication_mechanism: AuthenticationMechanism::Low,
            ..Self::none()
        }
    }

    pub fn global_unicast_encryption_key(&self) -> Option<&[u8]> {
        self.global_unicast_encryption_key.as_deref()
    }

    pub fn authentication_key(&self) -> Option<&[u8]> {
        self.authentication_key.as_deref()
    }

    pub fn password(&self) -> Option<&[u8]> {
        self.password.as_deref()
    }

    pub fn encryption_mechanism(&self) -> EncryptionMechanism {
        self.encryption_mechanism
    }

    pub fn authentication_mechanism(&self) -> AuthenticationMechanism {
        self.authentication_mechanism
    }

    pub fn security_policy(&self) -> SecurityPolicy {
        self.security_policy
    }

    pub fn use_dedicated_key(&self) -> bool {
        self.use_dedicated_key
    }

    /// True when the association must use a ciphered application context
    pub fn is_ciphered(&self) -> bool {
        self.encryption_mechanism != EncryptionMechanism::None
    }

    /// Stage a new authentication key
    ///
    /// # Errors
    /// `InvalidKeyLength` if the key does not fit the mechanism. Nothing
    /// is staged in that case.
    pub fn stage_authentication_key(&mut self, key: Vec<u8>) -> DlmsResult<()> {
        let mechanism = if self.authentication_mechanism.is_hls() {
            self.authentication_mechanism
        } else {
            AuthenticationMechanism::HlsGmac
        };
        mechanism.validate_authentication_key(&key)?;
        self.staged.authentication_key = Some(key);
        Ok(())
    }

    /// Stage a new global unicast encryption key (always AES-128 sized)
    pub fn stage_global_unicast_encryption_key(&mut self, key: Vec<u8>) -> DlmsResult<()> {
        EncryptionMechanism::AesGcm128.validate_key_length(&key)?;
        self.staged.global_unicast_encryption_key = Some(key);
        Ok(())
    }

    pub fn has_staged_keys(&self) -> bool {
        self.staged != StagedKeys::default()
    }

    /// Replace the active keys with the staged ones
    ///
    /// Returns false if nothing was staged.
    pub fn commit_staged_keys(&mut self) -> bool {
        let staged = std::mem::take(&mut self.staged);
        let mut changed = false;
        if let Some(key) = staged.authentication_key {
            self.authentication_key = Some(key);
            changed = true;
        }
        if let Some(key) = staged.global_unicast_encryption_key {
            self.global_unicast_encryption_key = Some(key);
            changed = true;
        }
        changed
    }

    pub fn discard_staged_keys(&mut self) {
        self.staged = StagedKeys::default();
    }

    /// Replace the global unicast encryption key right away
    ///
    /// A staged global key is dropped; a staged authentication key stays staged.
    pub fn update_global_unicast_encryption_key(&mut self, key: Vec<u8>) -> DlmsResult<()> {
        EncryptionMechanism::AesGcm128.validate_key_length(&key)?;
        self.staged.global_unicast_encryption_key = None;
        self.global_unicast_encryption_key = Some(key);
        Ok(())
    }

    /// Replace the authentication key right away
    ///
    /// A staged authentication key is dropped; a staged global key stays staged.
    pub fn update_authentication_key(&mut self, key: Vec<u8>) -> DlmsResult<()> {
        self.stage_authentication_key(key)?;
        if let Some(key) = self.staged.authentication_key.take() {
            self.authentication_key = Some(key);
        }
        Ok(())
    }
}

impl Default for SecuritySuite {
    fn default() -> Self {
        Self::none()
    }
}

// keys and passwords stay out of debug output
impl fmt::Debug for SecuritySuite {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SecuritySuite")
            .field("authentication_mechanism", &self.authentication_mechanism)
            .field("encryption_mechanism", &self.encryption_mechanism)
            .field("security_policy", &self.security_policy)
            .field("use_dedicated_key", &self.use_dedicated_key)
            .field("has_staged_keys", &self.has_staged_keys())
            .finish()
    }
}

impl fmt::Display for SecuritySuite {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "SecuritySuite(encryption={:?}, auth={:?}, policy={:?})",
            self.encryption_mechanism, self.authentication_mechanism, self.security_policy
        )
    }
}
