//! ISO-ACSE PDU structures
//!
//! - AARQ (Association Request), `[APPLICATION 0]`
//! - AARE (Association Response), `[APPLICATION 1]`
//! - RLRQ (Release Request), `[APPLICATION 2]`
//! - RLRE (Release Response), `[APPLICATION 3]`
//!
//! Only the fields DLMS/COSEM uses are modelled. Unknown context-specific
//! fields are skipped on decode.

use super::types::*;
use crate::ber::decoder::integer_from_contents;
use crate::ber::{object_identifier_contents, BerDecoder, BerEncoder, BerTag, BerTagClass};
use dlms_core::{DlmsError, DlmsResult};

const AARQ_TAG: u32 = 0;
const AARE_TAG: u32 = 1;
const RLRQ_TAG: u32 = 2;
const RLRE_TAG: u32 = 3;
const USER_INFORMATION_TAG: u32 = 30;

/// ACSE requirements bit string with only the authentication functional unit
const AUTHENTICATION_REQUIREMENT: [u8; 1] = [0x80];

/// AARQ (Association Request) PDU
///
/// | tag | field |
/// |-----|-------|
/// | A1  | application-context-name |
/// | A6  | calling-AP-title (client system title) |
/// | 8A  | sender-acse-requirements |
/// | 8B  | mechanism-name |
/// | AC  | calling-authentication-value (password or CtoS) |
/// | BE  | user-information (xDLMS InitiateRequest) |
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Aarq {
    pub application_context_name: ObjectIdentifier,
    pub calling_ap_title: Option<Vec<u8>>,
    pub mechanism_name: Option<ObjectIdentifier>,
    pub calling_authentication_value: Option<Vec<u8>>,
    pub user_information: Option<Vec<u8>>,
}

impl Aarq {
    pub fn new(application_context_name: ApplicationContextName) -> Self {
        Self {
            application_context_name: application_context_name.oid(),
            calling_ap_title: None,
            mechanism_name: None,
            calling_authentication_value: None,
            user_information: None,
        }
    }

    pub fn with_mechanism(mut self, mechanism: MechanismName, authentication_value: Option<Vec<u8>>) -> Self {
        self.mechanism_name = Some(mechanism.oid());
        self.calling_authentication_value = authentication_value;
        self
    }

    pub fn with_calling_ap_title(mut self, system_title: Vec<u8>) -> Self {
        self.calling_ap_title = Some(system_title);
        self
    }

    pub fn with_user_information(mut self, apdu: Vec<u8>) -> Self {
        self.user_information = Some(apdu);
        self
    }

    /// DLMS application context, if the OID is one
    pub fn context(&self) -> Option<ApplicationContextName> {
        ApplicationContextName::from_oid(&self.application_context_name)
    }

    /// Mechanism number, if a DLMS mechanism name was sent
    pub fn mechanism(&self) -> Option<MechanismName> {
        self.mechanism_name.as_ref().and_then(MechanismName::from_oid)
    }

    pub fn encode(&self) -> DlmsResult<Vec<u8>> {
        let mut body = BerEncoder::new();
        encode_explicit_oid(&mut body, 1, &self.application_context_name)?;
        if let Some(title) = &self.calling_ap_title {
            encode_explicit_octet_string(&mut body, 6, title);
        }
        if let Some(mechanism) = &self.mechanism_name {
            encode_acse_requirements(&mut body, 10);
            body.encode_context_specific(11, &object_identifier_contents(mechanism.components())?, false);
        }
        if let Some(value) = &self.calling_authentication_value {
            encode_authentication_value(&mut body, 12, value);
        }
        if let Some(apdu) = &self.user_information {
            encode_user_information(&mut body, apdu);
        }
        Ok(wrap_application(AARQ_TAG, &body))
    }

    /// Decode an AARQ that must span all of `data`
    ///
    /// # Errors
    /// - `LengthMismatch` if the declared length disagrees with `data`
    /// - `Asn1Decoding` for malformed content or a missing context name
    pub fn decode(data: &[u8]) -> DlmsResult<Self> {
        let body = unwrap_application(data, AARQ_TAG)?;
        let mut application_context_name = None;
        let mut aarq = Aarq {
            application_context_name: ObjectIdentifier::new(Vec::new()),
            calling_ap_title: None,
            mechanism_name: None,
            calling_authentication_value: None,
            user_information: None,
        };

        let mut decoder = BerDecoder::new(body);
        while decoder.has_remaining() {
            let (tag, value) = decoder.decode_tlv()?;
            if tag.class() != BerTagClass::ContextSpecific {
                return Err(DlmsError::Asn1Decoding(format!("Unexpected AARQ field {:?}", tag)));
            }
            match tag.number() {
                1 => application_context_name = Some(decode_explicit_oid(value)?),
                6 => aarq.calling_ap_title = Some(decode_explicit_octet_string(value)?),
                11 => aarq.mechanism_name = Some(decode_implicit_oid(value)?),
                12 => aarq.calling_authentication_value = Some(decode_authentication_value(value)?),
                USER_INFORMATION_TAG => aarq.user_information = Some(decode_user_information(value)?),
                // protocol-version, acse requirements and called/calling qualifiers
                _ => {}
            }
        }

        aarq.application_context_name = application_context_name
            .ok_or_else(|| DlmsError::Asn1Decoding("AARQ without application-context-name".to_string()))?;
        Ok(aarq)
    }
}

/// AARE (Association Response) PDU
///
/// | tag | field |
/// |-----|-------|
/// | A1  | application-context-name |
/// | A2  | result |
/// | A3  | result-source-diagnostic |
/// | A4  | responding-AP-title (server system title) |
/// | 88  | responder-acse-requirements |
/// | 89  | mechanism-name |
/// | AA  | responding-authentication-value (StoC) |
/// | BE  | user-information (InitiateResponse or exception) |
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Aare {
    pub application_context_name: ObjectIdentifier,
    pub result: AssociationResult,
    pub result_source_diagnostic: AssociateSourceDiagnostic,
    pub responding_ap_title: Option<Vec<u8>>,
    pub mechanism_name: Option<ObjectIdentifier>,
    pub responding_authentication_value: Option<Vec<u8>>,
    pub user_information: Option<Vec<u8>>,
}

impl Aare {
    pub fn accepted(application_context_name: ObjectIdentifier) -> Self {
        Self {
            application_context_name,
            result: AssociationResult::Accepted,
            result_source_diagnostic: AssociateSourceDiagnostic::ServiceUser(AcseServiceUserDiagnostic::Null),
            responding_ap_title: None,
            mechanism_name: None,
            responding_authentication_value: None,
            user_information: None,
        }
    }

    pub fn rejected(
        application_context_name: ObjectIdentifier,
        result: AssociationResult,
        diagnostic: AcseServiceUserDiagnostic,
    ) -> Self {
        Self {
            result,
            result_source_diagnostic: AssociateSourceDiagnostic::ServiceUser(diagnostic),
            ..Self::accepted(application_context_name)
        }
    }

    pub fn with_mechanism(mut self, mechanism: MechanismName, authentication_value: Option<Vec<u8>>) -> Self {
        self.mechanism_name = Some(mechanism.oid());
        self.responding_authentication_value = authentication_value;
        self
    }

    pub fn with_responding_ap_title(mut self, system_title: Vec<u8>) -> Self {
        self.responding_ap_title = Some(system_title);
        self
    }

    pub fn with_user_information(mut self, apdu: Vec<u8>) -> Self {
        self.user_information = Some(apdu);
        self
    }

    pub fn is_accepted(&self) -> bool {
        self.result == AssociationResult::Accepted
    }

    pub fn mechanism(&self) -> Option<MechanismName> {
        self.mechanism_name.as_ref().and_then(MechanismName::from_oid)
    }

    pub fn encode(&self) -> DlmsResult<Vec<u8>> {
        let mut body = BerEncoder::new();
        encode_explicit_oid(&mut body, 1, &self.application_context_name)?;
        encode_explicit_integer(&mut body, 2, self.result.value() as i64);

        let mut diagnostic = BerEncoder::new();
        let choice = match self.result_source_diagnostic {
            AssociateSourceDiagnostic::ServiceUser(_) => 1,
            AssociateSourceDiagnostic::ServiceProvider(_) => 2,
        };
        encode_explicit_integer(&mut diagnostic, choice, self.result_source_diagnostic.value() as i64);
        body.encode_context_specific(3, diagnostic.as_bytes(), true);

        if let Some(title) = &self.responding_ap_title {
            encode_explicit_octet_string(&mut body, 4, title);
        }
        if let Some(mechanism) = &self.mechanism_name {
            encode_acse_requirements(&mut body, 8);
            body.encode_context_specific(9, &object_identifier_contents(mechanism.components())?, false);
        }
        if let Some(value) = &self.responding_authentication_value {
            encode_authentication_value(&mut body, 10, value);
        }
        if let Some(apdu) = &self.user_information {
            encode_user_information(&mut body, apdu);
        }
        Ok(wrap_application(AARE_TAG, &body))
    }

    pub fn decode(data: &[u8]) -> DlmsResult<Self> {
        let body = unwrap_application(data, AARE_TAG)?;
        let mut application_context_name = None;
        let mut result = None;
        let mut diagnostic = None;
        let mut aare = Aare::accepted(ObjectIdentifier::new(Vec::new()));

        let mut decoder = BerDecoder::new(body);
        while decoder.has_remaining() {
            let (tag, value) = decoder.decode_tlv()?;
            if tag.class() != BerTagClass::ContextSpecific {
                return Err(DlmsError::Asn1Decoding(format!("Unexpected AARE field {:?}", tag)));
            }
            match tag.number() {
                1 => application_context_name = Some(decode_explicit_oid(value)?),
                2 => result = Some(AssociationResult::from_value(decode_explicit_integer(value)?)?),
                3 => diagnostic = Some(decode_source_diagnostic(value)?),
                4 => aare.responding_ap_title = Some(decode_explicit_octet_string(value)?),
                9 => aare.mechanism_name = Some(decode_implicit_oid(value)?),
                10 => aare.responding_authentication_value = Some(decode_authentication_value(value)?),
                USER_INFORMATION_TAG => aare.user_information = Some(decode_user_information(value)?),
                _ => {}
            }
        }

        aare.application_context_name = application_context_name
            .ok_or_else(|| DlmsError::Asn1Decoding("AARE without application-context-name".to_string()))?;
        aare.result = result.ok_or_else(|| DlmsError::Asn1Decoding("AARE without result".to_string()))?;
        aare.result_source_diagnostic =
            diagnostic.ok_or_else(|| DlmsError::Asn1Decoding("AARE without diagnostic".to_string()))?;
        Ok(aare)
    }
}

/// RLRQ (Release Request) PDU
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Rlrq {
    pub reason: Option<ReleaseRequestReason>,
    pub user_information: Option<Vec<u8>>,
}

impl Rlrq {
    pub fn new(reason: ReleaseRequestReason) -> Self {
        Self {
            reason: Some(reason),
            user_information: None,
        }
    }

    pub fn encode(&self) -> DlmsResult<Vec<u8>> {
        let mut body = BerEncoder::new();
        if let Some(reason) = self.reason {
            body.encode_context_specific(0, &[reason.value()], false);
        }
        if let Some(apdu) = &self.user_information {
            encode_user_information(&mut body, apdu);
        }
        Ok(wrap_application(RLRQ_TAG, &body))
    }

    pub fn decode(data: &[u8]) -> DlmsResult<Self> {
        let body = unwrap_application(data, RLRQ_TAG)?;
        let mut rlrq = Rlrq::default();
        let mut decoder = BerDecoder::new(body);
        while decoder.has_remaining() {
            let (tag, value) = decoder.decode_tlv()?;
            match (tag.class(), tag.number()) {
                (BerTagClass::ContextSpecific, 0) => {
                    rlrq.reason = Some(ReleaseRequestReason::from_value(integer_from_contents(value)?)?)
                }
                (BerTagClass::ContextSpecific, USER_INFORMATION_TAG) => {
                    rlrq.user_information = Some(decode_user_information(value)?)
                }
                _ => {}
            }
        }
        Ok(rlrq)
    }
}

/// RLRE (Release Response) PDU
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Rlre {
    pub reason: Option<ReleaseResponseReason>,
    pub user_information: Option<Vec<u8>>,
}

impl Rlre {
    pub fn new(reason: ReleaseResponseReason) -> Self {
        Self {
            reason: Some(reason),
            user_information: None,
        }
    }

    pub fn encode(&self) -> DlmsResult<Vec<u8>> {
        let mut body = BerEncoder::new();
        if let Some(reason) = self.reason {
            body.encode_context_specific(0, &[reason.value()], false);
        }
        if let Some(apdu) = &self.user_information {
            encode_user_information(&mut body, apdu);
        }
        Ok(wrap_application(RLRE_TAG, &body))
    }

    pub fn decode(data: &[u8]) -> DlmsResult<Self> {
        let body = unwrap_application(data, RLRE_TAG)?;
        let mut rlre = Rlre::default();
        let mut decoder = BerDecoder::new(body);
        while decoder.has_remaining() {
            let (tag, value) = decoder.decode_tlv()?;
            match (tag.class(), tag.number()) {
                (BerTagClass::ContextSpecific, 0) => {
                    rlre.reason = Some(ReleaseResponseReason::from_value(integer_from_contents(value)?)?)
                }
                (BerTagClass::ContextSpecific, USER_INFORMATION_TAG) => {
                    rlre.user_information = Some(decode_user_information(value)?)
                }
                _ => {}
            }
        }
        Ok(rlre)
    }
}

/// Any of the four ACSE PDUs, selected by the leading tag
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AcsePdu {
    Aarq(Aarq),
    Aare(Aare),
    Rlrq(Rlrq),
    Rlre(Rlre),
}

impl AcsePdu {
    /// True if `tag` is the first octet of an ACSE PDU
    pub fn is_acse_tag(tag: u8) -> bool {
        (0x60..=0x63).contains(&tag)
    }

    pub fn decode(data: &[u8]) -> DlmsResult<Self> {
        match data.first() {
            Some(0x60) => Aarq::decode(data).map(AcsePdu::Aarq),
            Some(0x61) => Aare::decode(data).map(AcsePdu::Aare),
            Some(0x62) => Rlrq::decode(data).map(AcsePdu::Rlrq),
            Some(0x63) => Rlre::decode(data).map(AcsePdu::Rlre),
            Some(other) => Err(DlmsError::Asn1Decoding(format!("Not an ACSE PDU: 0x{:02X}", other))),
            None => Err(DlmsError::Asn1Decoding("Empty ACSE PDU".to_string())),
        }
    }

    pub fn encode(&self) -> DlmsResult<Vec<u8>> {
        match self {
            AcsePdu::Aarq(pdu) => pdu.encode(),
            AcsePdu::Aare(pdu) => pdu.encode(),
            AcsePdu::Rlrq(pdu) => pdu.encode(),
            AcsePdu::Rlre(pdu) => pdu.encode(),
        }
    }
}

fn wrap_application(tag: u32, body: &BerEncoder) -> Vec<u8> {
    let mut encoder = BerEncoder::with_capacity(body.as_bytes().len() + 4);
    encoder.encode_application(tag, body.as_bytes(), true);
    encoder.into_bytes()
}

fn unwrap_application(data: &[u8], tag: u32) -> DlmsResult<&[u8]> {
    let mut decoder = BerDecoder::new(data);
    let body = decoder.decode_application(tag, true)?;
    decoder.finish()?;
    Ok(body)
}

fn encode_explicit_oid(encoder: &mut BerEncoder, tag: u32, oid: &ObjectIdentifier) -> DlmsResult<()> {
    let mut inner = BerEncoder::new();
    inner.encode_object_identifier(oid.components())?;
    encoder.encode_context_specific(tag, inner.as_bytes(), true);
    Ok(())
}

fn encode_explicit_octet_string(encoder: &mut BerEncoder, tag: u32, value: &[u8]) {
    let mut inner = BerEncoder::new();
    inner.encode_octet_string(value);
    encoder.encode_context_specific(tag, inner.as_bytes(), true);
}

fn encode_explicit_integer(encoder: &mut BerEncoder, tag: u32, value: i64) {
    let mut inner = BerEncoder::new();
    inner.encode_integer(value);
    encoder.encode_context_specific(tag, inner.as_bytes(), true);
}

fn encode_acse_requirements(encoder: &mut BerEncoder, tag: u32) {
    // unused bits 7, authentication bit set
    let mut value = vec![0x07];
    value.extend_from_slice(&AUTHENTICATION_REQUIREMENT);
    encoder.encode_context_specific(tag, &value, false);
}

fn encode_authentication_value(encoder: &mut BerEncoder, tag: u32, value: &[u8]) {
    let mut inner = BerEncoder::new();
    // charstring [0] IMPLICIT GraphicString
    inner.encode_context_specific(0, value, false);
    encoder.encode_context_specific(tag, inner.as_bytes(), true);
}

fn encode_user_information(encoder: &mut BerEncoder, apdu: &[u8]) {
    let mut inner = BerEncoder::new();
    inner.encode_octet_string(apdu);
    encoder.encode_context_specific(USER_INFORMATION_TAG, inner.as_bytes(), true);
}

fn decode_single<'a>(value: &'a [u8], expected: BerTag) -> DlmsResult<&'a [u8]> {
    let mut decoder = BerDecoder::new(value);
    let inner = decoder.decode_expected(expected)?;
    decoder.finish()?;
    Ok(inner)
}

fn decode_explicit_oid(value: &[u8]) -> DlmsResult<ObjectIdentifier> {
    let mut decoder = BerDecoder::new(value);
    let oid = decoder.decode_object_identifier()?;
    decoder.finish()?;
    Ok(ObjectIdentifier::new(oid))
}

fn decode_implicit_oid(value: &[u8]) -> DlmsResult<ObjectIdentifier> {
    crate::ber::decoder::object_identifier_from_contents(value).map(ObjectIdentifier::new)
}

fn decode_explicit_octet_string(value: &[u8]) -> DlmsResult<Vec<u8>> {
    decode_single(value, BerTag::OCTET_STRING).map(<[u8]>::to_vec)
}

fn decode_explicit_integer(value: &[u8]) -> DlmsResult<i64> {
    decode_single(value, BerTag::INTEGER).and_then(integer_from_contents)
}

fn decode_authentication_value(value: &[u8]) -> DlmsResult<Vec<u8>> {
    let mut decoder = BerDecoder::new(value);
    let (tag, inner) = decoder.decode_tlv()?;
    decoder.finish()?;
    match (tag.class(), tag.number()) {
        (BerTagClass::ContextSpecific, 0) => Ok(inner.to_vec()),
        // bitstring [1]
        (BerTagClass::ContextSpecific, 1) => Ok(inner.get(1..).unwrap_or_default().to_vec()),
        _ => Err(DlmsError::Asn1Decoding(format!("Unsupported authentication value {:?}", tag))),
    }
}

fn decode_user_information(value: &[u8]) -> DlmsResult<Vec<u8>> {
    decode_single(value, BerTag::OCTET_STRING).map(<[u8]>::to_vec)
}

fn decode_source_diagnostic(value: &[u8]) -> DlmsResult<AssociateSourceDiagnostic> {
    let mut decoder = BerDecoder::new(value);
    let (tag, inner) = decoder.decode_tlv()?;
    decoder.finish()?;
    let code = decode_explicit_integer(inner)?;
    match (tag.class(), tag.number()) {
        (BerTagClass::ContextSpecific, 1) => Ok(AssociateSourceDiagnostic::ServiceUser(
            AcseServiceUserDiagnostic::from_value(code)?,
        )),
        (BerTagClass::ContextSpecific, 2) => u8::try_from(code)
            .map(AssociateSourceDiagnostic::ServiceProvider)
            .map_err(|_| DlmsError::Asn1Decoding(format!("Invalid provider diagnostic {}", code))),
        _ => Err(DlmsError::Asn1Decoding(format!("Unexpected diagnostic choice {:?}", tag))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// AARQ of a LOW association with password "12345678", LN context
    const LOW_AARQ: [u8; 56] = [
        0x60, 0x36, // AARQ
        0xA1, 0x09, 0x06, 0x07, 0x60, 0x85, 0x74, 0x05, 0x08, 0x01, 0x01, // context
        0x8A, 0x02, 0x07, 0x80, // acse requirements
        0x8B, 0x07, 0x60, 0x85, 0x74, 0x05, 0x08, 0x02, 0x01, // mechanism LOW
        0xAC, 0x0A, 0x80, 0x08, b'1', b'2', b'3', b'4', b'5', b'6', b'7', b'8', // password
        0xBE, 0x10, 0x04, 0x0E, // user information
        0x01, 0x00, 0x00, 0x00, 0x06, 0x5F, 0x1F, 0x04, 0x00, 0x00, 0x7E, 0x1F, 0x04, 0xB0,
    ];

    #[test]
    fn test_encode_low_aarq() {
        let aarq = Aarq::new(ApplicationContextName::LogicalName)
            .with_mechanism(MechanismName::LOW, Some(b"12345678".to_vec()))
            .with_user_information(LOW_AARQ[42..].to_vec());
        assert_eq!(aarq.encode().unwrap(), LOW_AARQ.to_vec());
    }

    #[test]
    fn test_decode_low_aarq() {
        let aarq = Aarq::decode(&LOW_AARQ).unwrap();
        assert_eq!(aarq.context(), Some(ApplicationContextName::LogicalName));
        assert_eq!(aarq.mechanism(), Some(MechanismName::LOW));
        assert_eq!(aarq.calling_authentication_value.as_deref(), Some(&b"12345678"[..]));
        assert_eq!(aarq.user_information.as_deref(), Some(&LOW_AARQ[42..]));
        assert!(aarq.calling_ap_title.is_none());
    }

    #[test]
    fn test_aarq_length_mismatch() {
        let mut short = LOW_AARQ.to_vec();
        short.pop();
        assert!(matches!(Aarq::decode(&short), Err(DlmsError::LengthMismatch { .. })));

        let mut long = LOW_AARQ.to_vec();
        long.push(0x00);
        assert!(matches!(Aarq::decode(&long), Err(DlmsError::LengthMismatch { .. })));
    }

    #[test]
    fn test_aarq_requires_context() {
        assert!(matches!(
            Aarq::decode(&[0x60, 0x04, 0x8A, 0x02, 0x07, 0x80]),
            Err(DlmsError::Asn1Decoding(_))
        ));
    }

    #[test]
    fn test_aare_rejected_encoding() {
        let aare = Aare::rejected(
            ApplicationContextName::LogicalName.oid(),
            AssociationResult::RejectedPermanent,
            AcseServiceUserDiagnostic::AuthenticationFailure,
        );
        let bytes = aare.encode().unwrap();
        assert_eq!(
            bytes,
            vec![
                0x61, 0x17, 0xA1, 0x09, 0x06, 0x07, 0x60, 0x85, 0x74, 0x05, 0x08, 0x01, 0x01, 0xA2, 0x03, 0x02,
                0x01, 0x01, 0xA3, 0x05, 0xA1, 0x03, 0x02, 0x01, 0x0D,
            ]
        );
        let decoded = Aare::decode(&bytes).unwrap();
        assert_eq!(decoded, aare);
        assert!(!decoded.is_accepted());
    }

    #[test]
    fn test_aare_hls_fields() {
        let aare = Aare::accepted(ApplicationContextName::LogicalNameCiphered.oid())
            .with_responding_ap_title(b"SRV00001".to_vec())
            .with_mechanism(MechanismName::HIGH_GMAC, Some(vec![0x55; 16]))
            .with_user_information(vec![0x08, 0x00, 0x06]);
        let decoded = Aare::decode(&aare.encode().unwrap()).unwrap();
        assert_eq!(decoded.mechanism(), Some(MechanismName::HIGH_GMAC));
        assert_eq!(decoded.responding_ap_title.as_deref(), Some(&b"SRV00001"[..]));
        assert_eq!(decoded.responding_authentication_value, Some(vec![0x55; 16]));
        assert_eq!(decoded.user_information, Some(vec![0x08, 0x00, 0x06]));
    }

    #[test]
    fn test_release_pdus() {
        let rlrq = Rlrq::new(ReleaseRequestReason::Normal);
        let bytes = rlrq.encode().unwrap();
        assert_eq!(bytes, vec![0x62, 0x03, 0x80, 0x01, 0x00]);
        assert_eq!(AcsePdu::decode(&bytes).unwrap(), AcsePdu::Rlrq(rlrq));

        let rlre = Rlre::new(ReleaseResponseReason::Normal);
        assert_eq!(rlre.encode().unwrap(), vec![0x63, 0x03, 0x80, 0x01, 0x00]);
        assert_eq!(Rlre::decode(&[0x63, 0x00]).unwrap(), Rlre::default());
    }

    #[test]
    fn test_not_acse() {
        assert!(AcsePdu::decode(&[0xC0, 0x01]).is_err());
        assert!(AcsePdu::is_acse_tag(0x61));
        assert!(!AcsePdu::is_acse_tag(0xC3));
    }
}
