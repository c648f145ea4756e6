//! HDLC address types
//!
//! Addresses use the extensible encoding of IEC 62056-46: every byte carries
//! seven address bits shifted left by one, and the least significant bit is
//! set only on the final byte. Client addresses are always one byte. Server
//! addresses are one, two or four bytes and split into an upper (logical
//! device) and a lower (physical device) part.

use bytes::BufMut;
use dlms_core::{DlmsError, DlmsResult};
use std::fmt;

/// Reserved HDLC addresses
pub mod reserved {
    pub const NO_STATION: u16 = 0x00;
    pub const CLIENT_MANAGEMENT_PROCESS: u16 = 0x01;
    pub const CLIENT_PUBLIC_CLIENT: u16 = 0x10;
    pub const CLIENT_ALL_STATION: u16 = 0x7F;
    pub const SERVER_MANAGEMENT_LOGICAL_DEVICE: u16 = 0x01;
    pub const SERVER_ALL_STATIONS_1BYTE: u16 = 0x7F;
    pub const SERVER_ALL_STATIONS_2BYTE: u16 = 0x3FFF;
}

const ONE_BYTE_MAX: u16 = 0x7F;
const TWO_BYTE_MAX: u16 = 0x3FFF;

/// HDLC address
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HdlcAddress {
    upper: u16,
    lower: Option<u16>,
    length: usize,
}

impl HdlcAddress {
    /// One-byte address (clients, or servers addressed by logical device only)
    pub fn new(upper: u16) -> DlmsResult<Self> {
        if upper > ONE_BYTE_MAX {
            return Err(DlmsError::Configuration(format!(
                "One byte HDLC address 0x{:X} exceeds 0x{:02X}",
                upper, ONE_BYTE_MAX
            )));
        }
        Ok(Self {
            upper,
            lower: None,
            length: 1,
        })
    }

    /// Server address with upper (logical) and lower (physical) part
    ///
    /// The two-byte form is used when both parts fit in seven bits, the
    /// four-byte form otherwise.
    pub fn with_lower(upper: u16, lower: u16) -> DlmsResult<Self> {
        let length = if upper <= ONE_BYTE_MAX && lower <= ONE_BYTE_MAX {
            2
        } else if upper <= TWO_BYTE_MAX && lower <= TWO_BYTE_MAX {
            4
        } else {
            return Err(DlmsError::Configuration(format!(
                "HDLC address parts 0x{:X}/0x{:X} exceed 0x{:X}",
                upper, lower, TWO_BYTE_MAX
            )));
        };
        Ok(Self {
            upper,
            lower: Some(lower),
            length,
        })
    }

    pub fn upper(&self) -> u16 {
        self.upper
    }

    pub fn lower(&self) -> Option<u16> {
        self.lower
    }

    /// Encoded length in bytes
    pub fn byte_length(&self) -> usize {
        self.length
    }

    pub fn encode_into<B: BufMut>(&self, out: &mut B) {
        match (self.length, self.lower) {
            (1, _) => out.put_u8(((self.upper as u8) << 1) | 1),
            (2, Some(lower)) => {
                out.put_u8((self.upper as u8) << 1);
                out.put_u8(((lower as u8) << 1) | 1);
            }
            (_, lower) => {
                let lower = lower.unwrap_or(0);
                out.put_u8(((self.upper >> 7) as u8 & 0x7F) << 1);
                out.put_u8((self.upper as u8 & 0x7F) << 1);
                out.put_u8(((lower >> 7) as u8 & 0x7F) << 1);
                out.put_u8(((lower as u8 & 0x7F) << 1) | 1);
            }
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.length);
        self.encode_into(&mut out);
        out
    }

    /// Decode an address from the front of `data`
    ///
    /// Returns the address and the number of bytes consumed.
    pub fn decode(data: &[u8]) -> DlmsResult<(Self, usize)> {
        let length = data
            .iter()
            .take(4)
            .position(|b| b & 0x01 == 0x01)
            .map(|i| i + 1)
            .ok_or_else(|| DlmsError::FrameInvalid("HDLC address has no end bit".to_string()))?;

        let part = |b: u8| u16::from(b >> 1);
        let address = match length {
            1 => Self {
                upper: part(data[0]),
                lower: None,
                length,
            },
            2 => Self {
                upper: part(data[0]),
                lower: Some(part(data[1])),
                length,
            },
            4 => Self {
                upper: (part(data[0]) << 7) | part(data[1]),
                lower: Some((part(data[2]) << 7) | part(data[3])),
                length,
            },
            _ => {
                return Err(DlmsError::FrameInvalid(format!(
                    "HDLC address has invalid length {}",
                    length
                )));
            }
        };
        Ok((address, length))
    }

    /// True for the broadcast address of either form
    pub fn is_all_station(&self) -> bool {
        match self.length {
            1 | 2 => self.upper == reserved::SERVER_ALL_STATIONS_1BYTE,
            _ => self.upper == reserved::SERVER_ALL_STATIONS_2BYTE,
        }
    }
}

impl fmt::Display for HdlcAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.lower {
            Some(lower) => write!(f, "{:#x}/{:#x}", self.upper, lower),
            None => write!(f, "{:#x}", self.upper),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_address_one_byte() {
        let addr = HdlcAddress::new(0x10).unwrap();
        assert_eq!(addr.encode(), vec![0x21]);
        assert_eq!(HdlcAddress::decode(&[0x21]).unwrap(), (addr, 1));
        assert!(HdlcAddress::new(0x80).is_err());
    }

    #[test]
    fn test_server_address_two_bytes() {
        let addr = HdlcAddress::with_lower(0x01, 0x11).unwrap();
        assert_eq!(addr.encode(), vec![0x02, 0x23]);
        let (decoded, used) = HdlcAddress::decode(&[0x02, 0x23, 0xFF]).unwrap();
        assert_eq!(used, 2);
        assert_eq!(decoded.upper(), 0x01);
        assert_eq!(decoded.lower(), Some(0x11));
    }

    #[test]
    fn test_server_address_four_bytes() {
        let addr = HdlcAddress::with_lower(0x01, 0x3FF).unwrap();
        assert_eq!(addr.byte_length(), 4);
        let encoded = addr.encode();
        assert_eq!(encoded, vec![0x00, 0x02, 0x0E, 0xFF]);
        assert_eq!(HdlcAddress::decode(&encoded).unwrap(), (addr, 4));
    }

    #[test]
    fn test_invalid_address_lengths() {
        assert!(HdlcAddress::decode(&[0x02, 0x04, 0x07]).is_err());
        assert!(HdlcAddress::decode(&[0x02, 0x04]).is_err());
    }
}
