//! xDLMS initiate PDUs carried in the AARQ/AARE user-information
//!
//! # Encoding
//! Both PDUs are A-XDR encoded. OPTIONAL components are preceded by a
//! presence octet (`00` absent, `01` present); the DEFAULT
//! `response-allowed` component uses the same octet and is sent as `00`
//! when it carries the default value `true`.
//!
//! ```text
//! InitiateRequest  01 | dedicated-key? | response-allowed | qos? | version | conformance | max-pdu
//! InitiateResponse 08 | qos? | version | conformance | max-pdu | vaa-name
//! ```
//!
//! When the initiate exchange fails the server answers the AARQ with a
//! rejected AARE whose user-information carries a
//! [`ConfirmedServiceError`] instead of an InitiateResponse.

use crate::conformance::Conformance;
use dlms_asn1::{AxdrDecoder, AxdrEncoder};
use dlms_core::{DlmsError, DlmsResult};

pub const INITIATE_REQUEST_TAG: u8 = 0x01;
pub const INITIATE_RESPONSE_TAG: u8 = 0x08;
pub const CONFIRMED_SERVICE_ERROR_TAG: u8 = 0x0E;

/// DLMS version number of the current Green Book
pub const DLMS_VERSION: u8 = 6;

/// Smallest max-receive-pdu-size a peer may announce
pub const MIN_PDU_SIZE: u16 = 12;

/// Default max-receive-pdu-size
pub const DEFAULT_MAX_PDU_SIZE: u16 = 0xFFFF;

/// VAA name of logical name referencing associations
pub const VAA_NAME_LOGICAL_NAME: u16 = 0x0007;
/// VAA name of short name referencing associations: base name of the
/// current association object
pub const VAA_NAME_SHORT_NAME: u16 = 0xFA00;

/// Initiate Request PDU sent by the client inside the AARQ
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InitiateRequest {
    /// Key the server must use for ciphering within this association
    pub dedicated_key: Option<Vec<u8>>,
    /// Whether the client expects responses to its confirmed services
    pub response_allowed: bool,
    pub quality_of_service: Option<u8>,
    pub dlms_version: u8,
    pub proposed_conformance: Conformance,
    pub client_max_receive_pdu_size: u16,
}

impl InitiateRequest {
    pub fn new(proposed_conformance: Conformance, client_max_receive_pdu_size: u16) -> Self {
        Self {
            dedicated_key: None,
            response_allowed: true,
            quality_of_service: None,
            dlms_version: DLMS_VERSION,
            proposed_conformance,
            client_max_receive_pdu_size,
        }
    }

    pub fn with_dedicated_key(mut self, key: Vec<u8>) -> Self {
        self.dedicated_key = Some(key);
        self
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut encoder = AxdrEncoder::with_capacity(16);
        encoder.encode_u8(INITIATE_REQUEST_TAG);

        match &self.dedicated_key {
            Some(key) => encoder.encode_presence(true).encode_octet_string(key),
            None => encoder.encode_presence(false),
        };

        // DEFAULT TRUE: only a non-default value is transmitted
        if self.response_allowed {
            encoder.encode_presence(false);
        } else {
            encoder.encode_presence(true).encode_bool(false);
        }

        match self.quality_of_service {
            Some(qos) => encoder.encode_presence(true).encode_u8(qos),
            None => encoder.encode_presence(false),
        };

        encoder
            .encode_u8(self.dlms_version)
            .encode_bytes(&self.proposed_conformance.encode())
            .encode_u16(self.client_max_receive_pdu_size);
        encoder.into_bytes()
    }

    pub fn decode(data: &[u8]) -> DlmsResult<Self> {
        let mut decoder = AxdrDecoder::new(data);
        expect_tag(&mut decoder, INITIATE_REQUEST_TAG, "InitiateRequest")?;

        let dedicated_key = if decoder.decode_presence()? {
            Some(decoder.decode_octet_string()?.to_vec())
        } else {
            None
        };
        let response_allowed = if decoder.decode_presence()? {
            decoder.decode_bool()?
        } else {
            true
        };
        let quality_of_service = if decoder.decode_presence()? {
            Some(decoder.decode_u8()?)
        } else {
            None
        };
        let dlms_version = decoder.decode_u8()?;
        let proposed_conformance = Conformance::decode(&mut decoder)?;
        let client_max_receive_pdu_size = decoder.decode_u16()?;
        decoder.finish()?;

        Ok(Self {
            dedicated_key,
            response_allowed,
            quality_of_service,
            dlms_version,
            proposed_conformance,
            client_max_receive_pdu_size,
        })
    }
}

impl Default for InitiateRequest {
    fn default() -> Self {
        Self::new(Conformance::logical_name_default(), DEFAULT_MAX_PDU_SIZE)
    }
}

/// Initiate Response PDU sent by the server inside an accepted AARE
///
/// The server selects:
/// - conformance: intersection of proposed and supported services
/// - PDU size: minimum of the client's and its own receive size
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InitiateResponse {
    pub negotiated_quality_of_service: Option<u8>,
    pub dlms_version: u8,
    pub negotiated_conformance: Conformance,
    pub server_max_receive_pdu_size: u16,
    /// [`VAA_NAME_LOGICAL_NAME`] or [`VAA_NAME_SHORT_NAME`]
    pub vaa_name: u16,
}

impl InitiateResponse {
    pub fn new(negotiated_conformance: Conformance, server_max_receive_pdu_size: u16, logical_name: bool) -> Self {
        Self {
            negotiated_quality_of_service: None,
            dlms_version: DLMS_VERSION,
            negotiated_conformance,
            server_max_receive_pdu_size,
            vaa_name: if logical_name {
                VAA_NAME_LOGICAL_NAME
            } else {
                VAA_NAME_SHORT_NAME
            },
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut encoder = AxdrEncoder::with_capacity(14);
        encoder.encode_u8(INITIATE_RESPONSE_TAG);
        match self.negotiated_quality_of_service {
            Some(qos) => encoder.encode_presence(true).encode_u8(qos),
            None => encoder.encode_presence(false),
        };
        encoder
            .encode_u8(self.dlms_version)
            .encode_bytes(&self.negotiated_conformance.encode())
            .encode_u16(self.server_max_receive_pdu_size)
            .encode_u16(self.vaa_name);
        encoder.into_bytes()
    }

    pub fn decode(data: &[u8]) -> DlmsResult<Self> {
        let mut decoder = AxdrDecoder::new(data);
        expect_tag(&mut decoder, INITIATE_RESPONSE_TAG, "InitiateResponse")?;
        let negotiated_quality_of_service = if decoder.decode_presence()? {
            Some(decoder.decode_u8()?)
        } else {
            None
        };
        let dlms_version = decoder.decode_u8()?;
        let negotiated_conformance = Conformance::decode(&mut decoder)?;
        let server_max_receive_pdu_size = decoder.decode_u16()?;
        let vaa_name = decoder.decode_u16()?;
        decoder.finish()?;

        Ok(Self {
            negotiated_quality_of_service,
            dlms_version,
            negotiated_conformance,
            server_max_receive_pdu_size,
            vaa_name,
        })
    }
}

/// `initiate` branch of the ServiceError CHOICE
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InitiateError {
    Other = 0,
    DlmsVersionTooLow = 1,
    IncompatibleConformance = 2,
    PduSizeTooShort = 3,
    RefusedByVdeHandler = 4,
}

impl InitiateError {
    pub fn from_value(value: u8) -> DlmsResult<Self> {
        match value {
            0 => Ok(InitiateError::Other),
            1 => Ok(InitiateError::DlmsVersionTooLow),
            2 => Ok(InitiateError::IncompatibleConformance),
            3 => Ok(InitiateError::PduSizeTooShort),
            4 => Ok(InitiateError::RefusedByVdeHandler),
            _ => Err(DlmsError::InvalidData(format!("Invalid initiate error: {}", value))),
        }
    }
}

/// ConfirmedServiceError answering a failed InitiateRequest
///
/// Wire form `0E 01 06 <initiate-error>`: service `initiateError`,
/// ServiceError choice `initiate`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConfirmedServiceError(pub InitiateError);

impl ConfirmedServiceError {
    const INITIATE_ERROR_SERVICE: u8 = 0x01;
    const INITIATE_CHOICE: u8 = 0x06;

    pub fn encode(&self) -> Vec<u8> {
        vec![
            CONFIRMED_SERVICE_ERROR_TAG,
            Self::INITIATE_ERROR_SERVICE,
            Self::INITIATE_CHOICE,
            self.0 as u8,
        ]
    }

    pub fn decode(data: &[u8]) -> DlmsResult<Self> {
        let mut decoder = AxdrDecoder::new(data);
        expect_tag(&mut decoder, CONFIRMED_SERVICE_ERROR_TAG, "ConfirmedServiceError")?;
        let service = decoder.decode_u8()?;
        let choice = decoder.decode_u8()?;
        if service != Self::INITIATE_ERROR_SERVICE || choice != Self::INITIATE_CHOICE {
            return Err(DlmsError::InvalidData(format!(
                "Unsupported confirmed service error {:02X} {:02X}",
                service, choice
            )));
        }
        let error = InitiateError::from_value(decoder.decode_u8()?)?;
        decoder.finish()?;
        Ok(Self(error))
    }
}

fn expect_tag(decoder: &mut AxdrDecoder<'_>, expected: u8, name: &str) -> DlmsResult<()> {
    let tag = decoder.decode_u8()?;
    if tag != expected {
        return Err(DlmsError::InvalidData(format!(
            "Expected {} tag 0x{:02X}, got 0x{:02X}",
            name, expected, tag
        )));
    }
    Ok(())
}
