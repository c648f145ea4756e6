//! ISO-ACSE value types used by the DLMS association PDUs

use dlms_core::{DlmsError, DlmsResult};
use std::fmt;

/// `{joint-iso-ccitt(2) country(16) country-name(756) identified-organization(5) DLMS-UA(8)}`
const DLMS_UA: [u32; 5] = [2, 16, 756, 5, 8];
const APPLICATION_CONTEXT_ARC: u32 = 1;
const MECHANISM_NAME_ARC: u32 = 2;

/// Object identifier value
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ObjectIdentifier(Vec<u32>);

impl ObjectIdentifier {
    pub fn new(components: Vec<u32>) -> Self {
        Self(components)
    }

    pub fn components(&self) -> &[u32] {
        &self.0
    }

    fn dlms_ua(arc: u32, id: u8) -> Self {
        let mut components = DLMS_UA.to_vec();
        components.push(arc);
        components.push(id as u32);
        Self(components)
    }

    /// Last arc under `2.16.756.5.8.<arc>`
    fn dlms_ua_id(&self, arc: u32) -> Option<u8> {
        match self.0.as_slice() {
            [prefix @ .., a, id] if prefix == &DLMS_UA[..] && *a == arc => u8::try_from(*id).ok(),
            _ => None,
        }
    }
}

impl fmt::Display for ObjectIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self.0.iter().map(|c| c.to_string()).collect();
        f.write_str(&parts.join("."))
    }
}

/// DLMS application context names `2.16.756.5.8.1.x`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ApplicationContextName {
    LogicalName = 1,
    ShortName = 2,
    LogicalNameCiphered = 3,
    ShortNameCiphered = 4,
}

impl ApplicationContextName {
    pub fn new(logical_name: bool, ciphered: bool) -> Self {
        match (logical_name, ciphered) {
            (true, false) => ApplicationContextName::LogicalName,
            (false, false) => ApplicationContextName::ShortName,
            (true, true) => ApplicationContextName::LogicalNameCiphered,
            (false, true) => ApplicationContextName::ShortNameCiphered,
        }
    }

    pub fn id(&self) -> u8 {
        *self as u8
    }

    pub fn oid(&self) -> ObjectIdentifier {
        ObjectIdentifier::dlms_ua(APPLICATION_CONTEXT_ARC, self.id())
    }

    /// `None` for any object identifier outside the DLMS context table
    pub fn from_oid(oid: &ObjectIdentifier) -> Option<Self> {
        match oid.dlms_ua_id(APPLICATION_CONTEXT_ARC)? {
            1 => Some(ApplicationContextName::LogicalName),
            2 => Some(ApplicationContextName::ShortName),
            3 => Some(ApplicationContextName::LogicalNameCiphered),
            4 => Some(ApplicationContextName::ShortNameCiphered),
            _ => None,
        }
    }

    pub fn is_logical_name(&self) -> bool {
        matches!(
            self,
            ApplicationContextName::LogicalName | ApplicationContextName::LogicalNameCiphered
        )
    }

    pub fn is_ciphered(&self) -> bool {
        matches!(
            self,
            ApplicationContextName::LogicalNameCiphered | ApplicationContextName::ShortNameCiphered
        )
    }
}

/// Authentication mechanism names `2.16.756.5.8.2.x`
///
/// The id is the mechanism number; the security crate maps it to an
/// authentication mechanism.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MechanismName(u8);

impl MechanismName {
    pub const LOWEST: MechanismName = MechanismName(0);
    pub const LOW: MechanismName = MechanismName(1);
    pub const HIGH: MechanismName = MechanismName(2);
    pub const HIGH_MD5: MechanismName = MechanismName(3);
    pub const HIGH_SHA1: MechanismName = MechanismName(4);
    pub const HIGH_GMAC: MechanismName = MechanismName(5);
    pub const HIGH_SHA256: MechanismName = MechanismName(6);

    pub fn new(id: u8) -> Self {
        Self(id)
    }

    pub fn id(&self) -> u8 {
        self.0
    }

    pub fn oid(&self) -> ObjectIdentifier {
        ObjectIdentifier::dlms_ua(MECHANISM_NAME_ARC, self.0)
    }

    pub fn from_oid(oid: &ObjectIdentifier) -> Option<Self> {
        oid.dlms_ua_id(MECHANISM_NAME_ARC).map(MechanismName)
    }
}

/// AARE `result` field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AssociationResult {
    Accepted = 0,
    RejectedPermanent = 1,
    RejectedTransient = 2,
}

impl AssociationResult {
    pub fn from_value(value: i64) -> DlmsResult<Self> {
        match value {
            0 => Ok(AssociationResult::Accepted),
            1 => Ok(AssociationResult::RejectedPermanent),
            2 => Ok(AssociationResult::RejectedTransient),
            _ => Err(DlmsError::Asn1Decoding(format!("Invalid association result: {}", value))),
        }
    }

    pub fn value(self) -> u8 {
        self as u8
    }
}

/// `acse-service-user` diagnostic of the AARE result source
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AcseServiceUserDiagnostic {
    Null = 0,
    NoReasonGiven = 1,
    ApplicationContextNameNotSupported = 2,
    CallingApTitleNotRecognized = 3,
    CallingApInvocationIdentifierNotRecognized = 4,
    CallingAeQualifierNotRecognized = 5,
    CallingAeInvocationIdentifierNotRecognized = 6,
    CalledApTitleNotRecognized = 7,
    CalledApInvocationIdentifierNotRecognized = 8,
    CalledAeQualifierNotRecognized = 9,
    CalledAeInvocationIdentifierNotRecognized = 10,
    AuthenticationMechanismNameNotRecognised = 11,
    AuthenticationMechanismNameRequired = 12,
    AuthenticationFailure = 13,
    AuthenticationRequired = 14,
}

impl AcseServiceUserDiagnostic {
    pub fn from_value(value: i64) -> DlmsResult<Self> {
        use AcseServiceUserDiagnostic::*;
        Ok(match value {
            0 => Null,
            1 => NoReasonGiven,
            2 => ApplicationContextNameNotSupported,
            3 => CallingApTitleNotRecognized,
            4 => CallingApInvocationIdentifierNotRecognized,
            5 => CallingAeQualifierNotRecognized,
            6 => CallingAeInvocationIdentifierNotRecognized,
            7 => CalledApTitleNotRecognized,
            8 => CalledApInvocationIdentifierNotRecognized,
            9 => CalledAeQualifierNotRecognized,
            10 => CalledAeInvocationIdentifierNotRecognized,
            11 => AuthenticationMechanismNameNotRecognised,
            12 => AuthenticationMechanismNameRequired,
            13 => AuthenticationFailure,
            14 => AuthenticationRequired,
            _ => return Err(DlmsError::Asn1Decoding(format!("Invalid ACSE user diagnostic: {}", value))),
        })
    }

    pub fn value(self) -> u8 {
        self as u8
    }
}

/// AARE `result-source-diagnostic` CHOICE
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AssociateSourceDiagnostic {
    ServiceUser(AcseServiceUserDiagnostic),
    /// `acse-service-provider`: 0 null, 1 no-reason-given, 2 no-common-acse-version
    ServiceProvider(u8),
}

impl AssociateSourceDiagnostic {
    pub fn value(&self) -> u8 {
        match self {
            AssociateSourceDiagnostic::ServiceUser(d) => d.value(),
            AssociateSourceDiagnostic::ServiceProvider(d) => *d,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ReleaseRequestReason {
    #[default]
    Normal = 0,
    Urgent = 1,
    UserDefined = 30,
}

impl ReleaseRequestReason {
    pub fn from_value(value: i64) -> DlmsResult<Self> {
        match value {
            0 => Ok(ReleaseRequestReason::Normal),
            1 => Ok(ReleaseRequestReason::Urgent),
            30 => Ok(ReleaseRequestReason::UserDefined),
            _ => Err(DlmsError::Asn1Decoding(format!("Invalid release request reason: {}", value))),
        }
    }

    pub fn value(self) -> u8 {
        self as u8
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ReleaseResponseReason {
    #[default]
    Normal = 0,
    NotFinished = 1,
    UserDefined = 30,
}

impl ReleaseResponseReason {
    pub fn from_value(value: i64) -> DlmsResult<Self> {
        match value {
            0 => Ok(ReleaseResponseReason::Normal),
            1 => Ok(ReleaseResponseReason::NotFinished),
            30 => Ok(ReleaseResponseReason::UserDefined),
            _ => Err(DlmsError::Asn1Decoding(format!("Invalid release response reason: {}", value))),
        }
    }

    pub fn value(self) -> u8 {
        self as u8
    }
}
