//! ASN.1 processing module for DLMS/COSEM protocol
//!
//! BER for the ISO-ACSE association PDUs and A-XDR primitives for the
//! xDLMS initiate PDUs they carry.

pub mod axdr;
pub mod ber;
pub mod iso_acse;

pub use axdr::{AxdrDecoder, AxdrEncoder};
pub use ber::{BerDecoder, BerEncoder, BerLength, BerTag, BerTagClass};
pub use dlms_core::{DlmsError, DlmsResult};
pub use iso_acse::{
    AcsePdu, AcseServiceUserDiagnostic, Aare, Aarq, ApplicationContextName, AssociateSourceDiagnostic,
    AssociationResult, MechanismName, ObjectIdentifier, ReleaseRequestReason, ReleaseResponseReason, Rlre, Rlrq,
};
