//! A-XDR primitives for the xDLMS APDUs carried in ACSE user-information
//!
//! A-XDR is positional: integers are big-endian with fixed width, OPTIONAL
//! components are preceded by a presence octet (`0x00` absent, `0x01`
//! present) and variable length strings carry an A-XDR length prefix.

pub mod decoder;
pub mod encoder;

pub use decoder::AxdrDecoder;
pub use encoder::AxdrEncoder;

/// Length prefix: one octet below 0x80, else `0x80 | n` and `n` octets
pub fn encode_length(length: usize, out: &mut Vec<u8>) {
    if length < 0x80 {
        out.push(length as u8);
        return;
    }
    let bytes = length.to_be_bytes();
    let skip = bytes.iter().take_while(|b| **b == 0).count();
    out.push(0x80 | (bytes.len() - skip) as u8);
    out.extend_from_slice(&bytes[skip..]);
}
