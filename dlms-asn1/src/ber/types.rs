//! BER encoding types (Tag, Length)

use dlms_core::{DlmsError, DlmsResult};

/// BER Tag Class
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BerTagClass {
    Universal = 0,
    Application = 1,
    ContextSpecific = 2,
    Private = 3,
}

impl BerTagClass {
    /// Tag class from bits 8-7 of the identifier octet
    pub fn from_bits(bits: u8) -> Self {
        match (bits >> 6) & 0x03 {
            0 => BerTagClass::Universal,
            1 => BerTagClass::Application,
            2 => BerTagClass::ContextSpecific,
            _ => BerTagClass::Private,
        }
    }

    pub fn to_bits(self) -> u8 {
        (self as u8) << 6
    }
}

/// BER Tag
///
/// ```text
/// Bits: 8 7 6 5 4 3 2 1
///       C C P T T T T T
/// ```
/// Tag numbers above 30 use the high-tag-number form: `TTTTT = 11111`
/// followed by base-128 continuation octets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BerTag {
    class: BerTagClass,
    constructed: bool,
    number: u32,
}

impl BerTag {
    pub const INTEGER: BerTag = BerTag::universal(false, 2);
    pub const BIT_STRING: BerTag = BerTag::universal(false, 3);
    pub const OCTET_STRING: BerTag = BerTag::universal(false, 4);
    pub const OBJECT_IDENTIFIER: BerTag = BerTag::universal(false, 6);
    pub const GRAPHIC_STRING: BerTag = BerTag::universal(false, 25);

    pub const fn new(class: BerTagClass, constructed: bool, number: u32) -> Self {
        Self {
            class,
            constructed,
            number,
        }
    }

    pub const fn universal(constructed: bool, number: u32) -> Self {
        Self::new(BerTagClass::Universal, constructed, number)
    }

    pub const fn application(constructed: bool, number: u32) -> Self {
        Self::new(BerTagClass::Application, constructed, number)
    }

    pub const fn context_specific(constructed: bool, number: u32) -> Self {
        Self::new(BerTagClass::ContextSpecific, constructed, number)
    }

    pub fn class(&self) -> BerTagClass {
        self.class
    }

    pub fn is_constructed(&self) -> bool {
        self.constructed
    }

    pub fn number(&self) -> u32 {
        self.number
    }

    pub fn encode(&self) -> Vec<u8> {
        let leading = self.class.to_bits() | if self.constructed { 0x20 } else { 0x00 };
        if self.number <= 30 {
            return vec![leading | self.number as u8];
        }

        let mut result = vec![leading | 0x1F];
        let mut groups = Vec::new();
        let mut remaining = self.number;
        while remaining > 0 {
            groups.push((remaining & 0x7F) as u8);
            remaining >>= 7;
        }
        let last = groups.len() - 1;
        for (i, group) in groups.iter().rev().enumerate() {
            result.push(if i < last { group | 0x80 } else { *group });
        }
        result
    }

    /// Decode a tag, returning it with the number of octets used
    pub fn decode(data: &[u8]) -> DlmsResult<(Self, usize)> {
        let first = *data
            .first()
            .ok_or_else(|| DlmsError::Asn1Decoding("Empty buffer for tag decoding".to_string()))?;
        let class = BerTagClass::from_bits(first);
        let constructed = first & 0x20 != 0;
        let low = first & 0x1F;
        if low < 0x1F {
            return Ok((Self::new(class, constructed, low as u32), 1));
        }

        let mut number: u32 = 0;
        for (i, byte) in data.iter().enumerate().skip(1) {
            number = number
                .checked_mul(128)
                .map(|n| n | (byte & 0x7F) as u32)
                .ok_or_else(|| DlmsError::Asn1Decoding("Tag number overflow".to_string()))?;
            if byte & 0x80 == 0 {
                return Ok((Self::new(class, constructed, number), i + 1));
            }
        }
        Err(DlmsError::Asn1Decoding("Truncated high tag number".to_string()))
    }
}

/// BER definite length
///
/// Short form for 0..=127, long form `0x80 | n` followed by `n` big-endian
/// octets otherwise. The indefinite form is not used by ACSE and is
/// rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BerLength(usize);

impl BerLength {
    pub fn new(length: usize) -> Self {
        Self(length)
    }

    pub fn value(&self) -> usize {
        self.0
    }

    pub fn encode(&self) -> Vec<u8> {
        if self.0 < 0x80 {
            return vec![self.0 as u8];
        }
        let bytes = self.0.to_be_bytes();
        let skip = bytes.iter().take_while(|b| **b == 0).count();
        let mut result = vec![0x80 | (bytes.len() - skip) as u8];
        result.extend_from_slice(&bytes[skip..]);
        result
    }

    /// Decode a length, returning it with the number of octets used
    pub fn decode(data: &[u8]) -> DlmsResult<(Self, usize)> {
        let first = *data
            .first()
            .ok_or_else(|| DlmsError::Asn1Decoding("Missing length octet".to_string()))?;
        if first & 0x80 == 0 {
            return Ok((Self(first as usize), 1));
        }

        let count = (first & 0x7F) as usize;
        if count == 0 {
            return Err(DlmsError::Asn1Decoding("Indefinite length is not supported".to_string()));
        }
        if count > 4 {
            return Err(DlmsError::Asn1Decoding(format!("Length of {} octets is too long", count)));
        }
        let octets = data
            .get(1..1 + count)
            .ok_or_else(|| DlmsError::Asn1Decoding("Truncated long form length".to_string()))?;
        let length = octets.iter().fold(0usize, |acc, b| (acc << 8) | *b as usize);
        Ok((Self(length), 1 + count))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ber_tag_short_form() {
        let tag = BerTag::application(true, 0);
        assert_eq!(tag.encode(), vec![0x60]);
        assert_eq!(BerTag::decode(&[0x60]).unwrap(), (tag, 1));

        let tag = BerTag::context_specific(true, 30);
        assert_eq!(tag.encode(), vec![0xBE]);
        assert_eq!(BerTag::decode(&[0x8B]).unwrap().0, BerTag::context_specific(false, 11));
    }

    #[test]
    fn test_ber_tag_high_number() {
        let tag = BerTag::application(false, 31);
        assert_eq!(tag.encode(), vec![0x5F, 0x1F]);
        assert_eq!(BerTag::decode(&[0x5F, 0x1F]).unwrap(), (tag, 2));

        let tag = BerTag::context_specific(false, 200);
        let encoded = tag.encode();
        assert_eq!(encoded, vec![0x9F, 0x81, 0x48]);
        assert_eq!(BerTag::decode(&encoded).unwrap(), (tag, 3));
        assert!(BerTag::decode(&[0x9F, 0x81]).is_err());
    }

    #[test]
    fn test_ber_length_forms() {
        assert_eq!(BerLength::new(5).encode(), vec![0x05]);
        assert_eq!(BerLength::new(127).encode(), vec![0x7F]);
        assert_eq!(BerLength::new(128).encode(), vec![0x81, 0x80]);
        assert_eq!(BerLength::new(0x1234).encode(), vec![0x82, 0x12, 0x34]);

        assert_eq!(BerLength::decode(&[0x82, 0x12, 0x34]).unwrap(), (BerLength::new(0x1234), 3));
        assert!(BerLength::decode(&[0x80]).is_err());
        assert!(BerLength::decode(&[0x82, 0x12]).is_err());
    }
}
