//! BER (Basic Encoding Rules) for the ACSE association PDUs
//!
//! Every value is a Tag-Length-Value triplet. Only the definite length
//! forms are supported:
//! - short form, one octet for lengths 0-127
//! - long form, `0x80 | n` followed by `n` big-endian length octets

pub mod decoder;
pub mod encoder;
pub mod types;

pub use decoder::BerDecoder;
pub use encoder::{object_identifier_contents, BerEncoder};
pub use types::{BerLength, BerTag, BerTagClass};
