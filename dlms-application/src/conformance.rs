//! Conformance block negotiated in the xDLMS initiate exchange
//!
//! A 24 bit BIT STRING. Bit `n` of the standard numbering is the mask
//! `1 << (23 - n)`, so bit 0 is the most significant bit of the first
//! octet on the wire.

use dlms_asn1::AxdrDecoder;
use dlms_core::{DlmsError, DlmsResult};
use std::fmt;
use std::ops::{BitAnd, BitOr};

/// `[APPLICATION 31] IMPLICIT BIT STRING (SIZE(24))`
const CONFORMANCE_TAG: [u8; 2] = [0x5F, 0x1F];
const CONFORMANCE_MASK: u32 = 0x00FF_FFFF;

const NAMES: [&str; 24] = [
    "reserved-zero",
    "general-protection",
    "general-block-transfer",
    "read",
    "write",
    "unconfirmed-write",
    "delta-value-encoding",
    "reserved-seven",
    "attribute0-supported-with-set",
    "priority-mgmt-supported",
    "attribute0-supported-with-get",
    "block-transfer-with-get-or-read",
    "block-transfer-with-set-or-write",
    "block-transfer-with-action",
    "multiple-references",
    "information-report",
    "data-notification",
    "access",
    "parameterized-access",
    "get",
    "set",
    "selective-access",
    "event-notification",
    "action",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Conformance(u32);

impl Conformance {
    pub const GENERAL_PROTECTION: Conformance = Conformance::bit(1);
    pub const GENERAL_BLOCK_TRANSFER: Conformance = Conformance::bit(2);
    pub const READ: Conformance = Conformance::bit(3);
    pub const WRITE: Conformance = Conformance::bit(4);
    pub const UNCONFIRMED_WRITE: Conformance = Conformance::bit(5);
    pub const DELTA_VALUE_ENCODING: Conformance = Conformance::bit(6);
    pub const ATTRIBUTE0_SUPPORTED_WITH_SET: Conformance = Conformance::bit(8);
    pub const PRIORITY_MGMT_SUPPORTED: Conformance = Conformance::bit(9);
    pub const ATTRIBUTE0_SUPPORTED_WITH_GET: Conformance = Conformance::bit(10);
    pub const BLOCK_TRANSFER_WITH_GET_OR_READ: Conformance = Conformance::bit(11);
    pub const BLOCK_TRANSFER_WITH_SET_OR_WRITE: Conformance = Conformance::bit(12);
    pub const BLOCK_TRANSFER_WITH_ACTION: Conformance = Conformance::bit(13);
    pub const MULTIPLE_REFERENCES: Conformance = Conformance::bit(14);
    pub const INFORMATION_REPORT: Conformance = Conformance::bit(15);
    pub const DATA_NOTIFICATION: Conformance = Conformance::bit(16);
    pub const ACCESS: Conformance = Conformance::bit(17);
    pub const PARAMETERIZED_ACCESS: Conformance = Conformance::bit(18);
    pub const GET: Conformance = Conformance::bit(19);
    pub const SET: Conformance = Conformance::bit(20);
    pub const SELECTIVE_ACCESS: Conformance = Conformance::bit(21);
    pub const EVENT_NOTIFICATION: Conformance = Conformance::bit(22);
    pub const ACTION: Conformance = Conformance::bit(23);

    const fn bit(n: u32) -> Self {
        Self(1 << (23 - n))
    }

    pub const fn empty() -> Self {
        Self(0)
    }

    /// Services of a typical logical name server
    pub fn logical_name_default() -> Self {
        Self::GET
            | Self::SET
            | Self::ACTION
            | Self::SELECTIVE_ACCESS
            | Self::BLOCK_TRANSFER_WITH_GET_OR_READ
            | Self::BLOCK_TRANSFER_WITH_SET_OR_WRITE
            | Self::BLOCK_TRANSFER_WITH_ACTION
            | Self::MULTIPLE_REFERENCES
            | Self::ATTRIBUTE0_SUPPORTED_WITH_GET
            | Self::EVENT_NOTIFICATION
    }

    /// Services of a typical short name server
    pub fn short_name_default() -> Self {
        Self::READ
            | Self::WRITE
            | Self::UNCONFIRMED_WRITE
            | Self::INFORMATION_REPORT
            | Self::MULTIPLE_REFERENCES
            | Self::BLOCK_TRANSFER_WITH_GET_OR_READ
            | Self::BLOCK_TRANSFER_WITH_SET_OR_WRITE
            | Self::PARAMETERIZED_ACCESS
    }

    /// Bits outside the 24 bit block are dropped
    pub const fn from_bits(bits: u32) -> Self {
        Self(bits & CONFORMANCE_MASK)
    }

    pub const fn bits(&self) -> u32 {
        self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }

    pub fn contains(&self, other: Conformance) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn insert(&mut self, other: Conformance) {
        self.0 |= other.0;
    }

    pub fn remove(&mut self, other: Conformance) {
        self.0 &= !other.0;
    }

    pub fn intersection(&self, other: Conformance) -> Conformance {
        Conformance(self.0 & other.0)
    }

    /// Standard names of the set bits, in bit order
    pub fn iter(&self) -> impl Iterator<Item = &'static str> + '_ {
        NAMES
            .iter()
            .enumerate()
            .filter(|(n, _)| self.0 & (1 << (23 - n)) != 0)
            .map(|(_, name)| *name)
    }

    /// `5F 1F 04 00 b0 b1 b2`
    pub fn encode(&self) -> [u8; 7] {
        let [_, b0, b1, b2] = self.0.to_be_bytes();
        [CONFORMANCE_TAG[0], CONFORMANCE_TAG[1], 0x04, 0x00, b0, b1, b2]
    }

    pub fn decode(decoder: &mut AxdrDecoder<'_>) -> DlmsResult<Self> {
        let header = decoder.decode_fixed_bytes(4)?;
        if header[..2] != CONFORMANCE_TAG || header[2] != 0x04 {
            return Err(DlmsError::InvalidData(format!(
                "Invalid conformance header {:02X?}",
                header
            )));
        }
        let bits = decoder.decode_fixed_bytes(3)?;
        Ok(Self(u32::from_be_bytes([0, bits[0], bits[1], bits[2]])))
    }
}

impl BitAnd for Conformance {
    type Output = Conformance;

    fn bitand(self, rhs: Self) -> Self::Output {
        self.intersection(rhs)
    }
}

impl BitOr for Conformance {
    type Output = Conformance;

    fn bitor(self, rhs: Self) -> Self::Output {
        Conformance(self.0 | rhs.0)
    }
}

impl fmt::Display for Conformance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = self.iter().collect();
        write!(f, "[{}]", names.join(", "))
    }
}
