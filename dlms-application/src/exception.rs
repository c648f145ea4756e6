//! Exception response for requests the server cannot serve

use dlms_core::{DlmsError, DlmsResult};

pub const EXCEPTION_RESPONSE_TAG: u8 = 0xD8;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StateError {
    ServiceNotAllowed = 1,
    ServiceUnknown = 2,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ServiceError {
    OperationNotPossible = 1,
    ServiceNotSupported = 2,
    OtherReason = 3,
    PduTooLong = 4,
    DecipheringError = 5,
    InvocationCounterError = 6,
}

/// `exception-response` APDU: `D8 <state-error> <service-error>`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExceptionResponse {
    pub state_error: StateError,
    pub service_error: ServiceError,
}

impl ExceptionResponse {
    pub fn new(state_error: StateError, service_error: ServiceError) -> Self {
        Self {
            state_error,
            service_error,
        }
    }

    /// Answer to a request no handler serves
    pub fn service_not_supported() -> Self {
        Self::new(StateError::ServiceUnknown, ServiceError::ServiceNotSupported)
    }

    /// Answer to a request arriving before the association allows it
    pub fn service_not_allowed() -> Self {
        Self::new(StateError::ServiceNotAllowed, ServiceError::OperationNotPossible)
    }

    pub fn encode(&self) -> Vec<u8> {
        vec![EXCEPTION_RESPONSE_TAG, self.state_error as u8, self.service_error as u8]
    }

    pub fn decode(data: &[u8]) -> DlmsResult<Self> {
        let [tag, state, service] = data else {
            return Err(DlmsError::InvalidData(format!(
                "Exception response must be 3 bytes, got {}",
                data.len()
            )));
        };
        if *tag != EXCEPTION_RESPONSE_TAG {
            return Err(DlmsError::InvalidData(format!("Not an exception response: 0x{:02X}", tag)));
        }
        let state_error = match state {
            1 => StateError::ServiceNotAllowed,
            2 => StateError::ServiceUnknown,
            other => return Err(DlmsError::InvalidData(format!("Invalid state error {}", other))),
        };
        let service_error = match service {
            1 => ServiceError::OperationNotPossible,
            2 => ServiceError::ServiceNotSupported,
            3 => ServiceError::OtherReason,
            4 => ServiceError::PduTooLong,
            5 => ServiceError::DecipheringError,
            6 => ServiceError::InvocationCounterError,
            other => return Err(DlmsError::InvalidData(format!("Invalid service error {}", other))),
        };
        Ok(Self::new(state_error, service_error))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exception_response_wire_form() {
        assert_eq!(ExceptionResponse::service_not_supported().encode(), vec![0xD8, 0x02, 0x02]);
        assert_eq!(
            ExceptionResponse::decode(&[0xD8, 0x01, 0x06]).unwrap(),
            ExceptionResponse::new(StateError::ServiceNotAllowed, ServiceError::InvocationCounterError)
        );
        assert!(ExceptionResponse::decode(&[0xD8, 0x01]).is_err());
        assert!(ExceptionResponse::decode(&[0xD9, 0x01, 0x01]).is_err());
    }
}
