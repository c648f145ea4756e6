//! ISO-ACSE association control PDUs
//!
//! All ACSE PDUs are BER encoded. The xDLMS InitiateRequest and
//! InitiateResponse travel as opaque octets in the user-information field.

pub mod pdu;
pub mod types;

pub use pdu::{AcsePdu, Aare, Aarq, Rlre, Rlrq};
pub use types::*;
