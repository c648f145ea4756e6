use thiserror::Error;

/// Main error type for DLMS/COSEM operations
#[derive(Error, Debug)]
pub enum DlmsError {
    #[error("Connection error: {0}")]
    Connection(#[from] std::io::Error),

    #[error("Connection closed by peer")]
    ConnectionClosed,

    #[error("Timeout")]
    Timeout,

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Frame invalid: {0}")]
    FrameInvalid(String),

    #[error("Corrupt frame: {0}")]
    CorruptFrame(String),

    #[error("Sequence error: expected N(S)={expected}, received {received}")]
    SequenceError { expected: u8, received: u8 },

    #[error("Unsupported wrapper version {0}, only version 1 is supported")]
    UnsupportedVersion(u16),

    #[error("Payload too large: {size} bytes (maximum {max})")]
    PayloadTooLarge { size: usize, max: usize },

    #[error("Length mismatch: declared {declared} bytes, found {actual}")]
    LengthMismatch { declared: usize, actual: usize },

    #[error("ASN.1 encoding error: {0}")]
    Asn1Encoding(String),

    #[error("ASN.1 decoding error: {0}")]
    Asn1Decoding(String),

    #[error("Invalid data: {0}")]
    InvalidData(String),

    #[error("Security error: {0}")]
    Security(String),

    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("Association rejected: result {result}, diagnostic {diagnostic}")]
    AssociationRejected { result: u8, diagnostic: u8 },

    #[error("Invalid key length: expected {expected} bytes, got {actual}")]
    InvalidKeyLength { expected: usize, actual: usize },

    #[error("Invalid baud rate code '{0}'")]
    InvalidBaudCode(char),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("No such element")]
    NoSuchElement,
}

/// Coarse classification of a [`DlmsError`]
///
/// Transport, framing and authentication faults are caused by (or observed
/// on) the remote side. Local configuration faults mean this system is
/// misconfigured.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Transport,
    Framing,
    Authentication,
    LocalConfiguration,
    Other,
}

impl DlmsError {
    /// Classify this error
    pub fn category(&self) -> ErrorCategory {
        match self {
            DlmsError::Connection(_) | DlmsError::ConnectionClosed | DlmsError::Timeout => {
                ErrorCategory::Transport
            }
            DlmsError::Protocol(_)
            | DlmsError::FrameInvalid(_)
            | DlmsError::CorruptFrame(_)
            | DlmsError::SequenceError { .. }
            | DlmsError::UnsupportedVersion(_)
            | DlmsError::PayloadTooLarge { .. }
            | DlmsError::LengthMismatch { .. }
            | DlmsError::Asn1Decoding(_) => ErrorCategory::Framing,
            DlmsError::AuthenticationFailed(_) | DlmsError::AssociationRejected { .. } => {
                ErrorCategory::Authentication
            }
            DlmsError::InvalidKeyLength { .. }
            | DlmsError::InvalidBaudCode(_)
            | DlmsError::Configuration(_) => ErrorCategory::LocalConfiguration,
            DlmsError::Asn1Encoding(_)
            | DlmsError::InvalidData(_)
            | DlmsError::Security(_)
            | DlmsError::NoSuchElement => ErrorCategory::Other,
        }
    }

    /// True when the fault is attributed to the local system rather than the peer
    pub fn is_local_fault(&self) -> bool {
        self.category() == ErrorCategory::LocalConfiguration
    }
}

/// Result type alias for DLMS/COSEM operations
pub type DlmsResult<T> = Result<T, DlmsError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_local_faults() {
        assert!(DlmsError::InvalidBaudCode('Z').is_local_fault());
        assert!(DlmsError::InvalidKeyLength { expected: 16, actual: 5 }.is_local_fault());
        assert!(!DlmsError::CorruptFrame("fcs".into()).is_local_fault());
        assert!(!DlmsError::Timeout.is_local_fault());
    }

    #[test]
    fn test_categories() {
        assert_eq!(DlmsError::UnsupportedVersion(2).category(), ErrorCategory::Framing);
        assert_eq!(
            DlmsError::SequenceError { expected: 1, received: 3 }.category(),
            ErrorCategory::Framing
        );
        assert_eq!(
            DlmsError::AuthenticationFailed("bad password".into()).category(),
            ErrorCategory::Authentication
        );
        let io = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "gone");
        assert_eq!(DlmsError::from(io).category(), ErrorCategory::Transport);
    }
}
