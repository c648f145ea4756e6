//! HDLC link parameter negotiation
//!
//! SNRM and UA frames may carry the parameter negotiation block of
//! IEC 62056-46:
//!
//! ```text
//! 81 80 <group length>
//!   05 <n> <max information field length, transmit>
//!   06 <n> <max information field length, receive>
//!   07 04 <window size, transmit>
//!   08 04 <window size, receive>
//! ```
//!
//! Values are big-endian. Each side states the parameters from its own
//! point of view, so a received block is swapped before comparing it with
//! local limits.

use bytes::BufMut;
use dlms_core::{DlmsError, DlmsResult};

const FORMAT_IDENTIFIER: u8 = 0x81;
const GROUP_IDENTIFIER: u8 = 0x80;
const MAX_INFO_TX: u8 = 0x05;
const MAX_INFO_RX: u8 = 0x06;
const WINDOW_TX: u8 = 0x07;
const WINDOW_RX: u8 = 0x08;

pub const DEFAULT_MAX_INFORMATION_LENGTH: u16 = 128;
pub const DEFAULT_WINDOW_SIZE: u8 = 1;
const MAX_WINDOW_SIZE: u8 = 7;
/// Information field length limited by the 11-bit frame length
pub const MAX_INFORMATION_LENGTH: u16 = 2030;

/// Link parameters from the point of view of one station
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HdlcParameters {
    pub max_information_length_tx: u16,
    pub max_information_length_rx: u16,
    pub window_size_tx: u8,
    pub window_size_rx: u8,
}

impl Default for HdlcParameters {
    fn default() -> Self {
        Self {
            max_information_length_tx: DEFAULT_MAX_INFORMATION_LENGTH,
            max_information_length_rx: DEFAULT_MAX_INFORMATION_LENGTH,
            window_size_tx: DEFAULT_WINDOW_SIZE,
            window_size_rx: DEFAULT_WINDOW_SIZE,
        }
    }
}

impl HdlcParameters {
    /// Local parameters with the same limit in both directions
    pub fn symmetric(max_information_length: u16, window_size: u8) -> DlmsResult<Self> {
        let params = Self {
            max_information_length_tx: max_information_length,
            max_information_length_rx: max_information_length,
            window_size_tx: window_size,
            window_size_rx: window_size,
        };
        params.validate()?;
        Ok(params)
    }

    pub fn validate(&self) -> DlmsResult<()> {
        for len in [self.max_information_length_tx, self.max_information_length_rx] {
            if len == 0 || len > MAX_INFORMATION_LENGTH {
                return Err(DlmsError::Configuration(format!(
                    "HDLC information length {} outside 1..={}",
                    len, MAX_INFORMATION_LENGTH
                )));
            }
        }
        for window in [self.window_size_tx, self.window_size_rx] {
            if window == 0 || window > MAX_WINDOW_SIZE {
                return Err(DlmsError::Configuration(format!(
                    "HDLC window size {} outside 1..={}",
                    window, MAX_WINDOW_SIZE
                )));
            }
        }
        Ok(())
    }

    /// The same parameters seen from the other station
    pub fn swapped(&self) -> Self {
        Self {
            max_information_length_tx: self.max_information_length_rx,
            max_information_length_rx: self.max_information_length_tx,
            window_size_tx: self.window_size_rx,
            window_size_rx: self.window_size_tx,
        }
    }

    /// Combine local limits with the peer's proposal
    ///
    /// `peer` is in the peer's point of view. The result is in ours and
    /// never exceeds either side's limit.
    pub fn negotiate(&self, peer: &HdlcParameters) -> Self {
        let peer = peer.swapped();
        Self {
            max_information_length_tx: self.max_information_length_tx.min(peer.max_information_length_tx),
            max_information_length_rx: self.max_information_length_rx.min(peer.max_information_length_rx),
            window_size_tx: self.window_size_tx.min(peer.window_size_tx),
            window_size_rx: self.window_size_rx.min(peer.window_size_rx),
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut group = Vec::with_capacity(20);
        put_parameter(&mut group, MAX_INFO_TX, u32::from(self.max_information_length_tx), false);
        put_parameter(&mut group, MAX_INFO_RX, u32::from(self.max_information_length_rx), false);
        put_parameter(&mut group, WINDOW_TX, u32::from(self.window_size_tx), true);
        put_parameter(&mut group, WINDOW_RX, u32::from(self.window_size_rx), true);

        let mut out = Vec::with_capacity(group.len() + 3);
        out.put_u8(FORMAT_IDENTIFIER);
        out.put_u8(GROUP_IDENTIFIER);
        out.put_u8(group.len() as u8);
        out.extend_from_slice(&group);
        out
    }

    /// Decode a negotiation block
    ///
    /// An empty information field means "use the defaults". Parameters
    /// missing from the block keep their default value and unknown ones
    /// are skipped.
    pub fn decode(info: &[u8]) -> DlmsResult<Self> {
        let mut params = Self::default();
        if info.is_empty() {
            return Ok(params);
        }
        if info.len() < 3 || info[0] != FORMAT_IDENTIFIER || info[1] != GROUP_IDENTIFIER {
            return Err(DlmsError::FrameInvalid(
                "Invalid HDLC parameter negotiation header".to_string(),
            ));
        }
        let group_len = usize::from(info[2]);
        let group = info.get(3..3 + group_len).ok_or(DlmsError::LengthMismatch {
            declared: group_len,
            actual: info.len() - 3,
        })?;

        let mut pos = 0;
        while pos < group.len() {
            let (id, len) = match group.get(pos..pos + 2) {
                Some(&[id, len]) => (id, usize::from(len)),
                _ => return Err(DlmsError::FrameInvalid("Truncated HDLC parameter".to_string())),
            };
            let raw = group
                .get(pos + 2..pos + 2 + len)
                .ok_or_else(|| DlmsError::FrameInvalid("Truncated HDLC parameter value".to_string()))?;
            if len > 4 {
                return Err(DlmsError::FrameInvalid(format!(
                    "HDLC parameter 0x{:02X} has {} value bytes",
                    id, len
                )));
            }
            let value = raw.iter().fold(0u32, |acc, b| (acc << 8) | u32::from(*b));
            match id {
                MAX_INFO_TX => params.max_information_length_tx = clamp_u16(value),
                MAX_INFO_RX => params.max_information_length_rx = clamp_u16(value),
                WINDOW_TX => params.window_size_tx = value.min(u32::from(MAX_WINDOW_SIZE)) as u8,
                WINDOW_RX => params.window_size_rx = value.min(u32::from(MAX_WINDOW_SIZE)) as u8,
                _ => {}
            }
            pos += 2 + len;
        }

        if params.window_size_tx == 0 || params.window_size_rx == 0 {
            return Err(DlmsError::FrameInvalid("HDLC window size of zero".to_string()));
        }
        if params.max_information_length_tx == 0 || params.max_information_length_rx == 0 {
            return Err(DlmsError::FrameInvalid("HDLC information length of zero".to_string()));
        }
        Ok(params)
    }
}

fn clamp_u16(value: u32) -> u16 {
    value.min(u32::from(MAX_INFORMATION_LENGTH)) as u16
}

fn put_parameter(out: &mut Vec<u8>, id: u8, value: u32, four_bytes: bool) {
    out.put_u8(id);
    if four_bytes {
        out.put_u8(4);
        out.put_u32(value);
    } else if value <= 0xFF {
        out.put_u8(1);
        out.put_u8(value as u8);
    } else {
        out.put_u8(2);
        out.put_u16(value as u16);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_default_block() {
        let encoded = HdlcParameters::default().encode();
        assert_eq!(
            encoded,
            vec![
                0x81, 0x80, 0x12, 0x05, 0x01, 0x80, 0x06, 0x01, 0x80, 0x07, 0x04, 0x00, 0x00, 0x00,
                0x01, 0x08, 0x04, 0x00, 0x00, 0x00, 0x01
            ]
        );
    }

    #[test]
    fn test_decode_empty_is_default() {
        assert_eq!(HdlcParameters::decode(&[]).unwrap(), HdlcParameters::default());
    }

    #[test]
    fn test_decode_two_byte_lengths() {
        let block = [
            0x81, 0x80, 0x14, 0x05, 0x02, 0x04, 0x00, 0x06, 0x02, 0x01, 0x00, 0x07, 0x04, 0x00,
            0x00, 0x00, 0x07, 0x08, 0x04, 0x00, 0x00, 0x00, 0x01,
        ];
        let params = HdlcParameters::decode(&block).unwrap();
        assert_eq!(params.max_information_length_tx, 0x400);
        assert_eq!(params.max_information_length_rx, 0x100);
        assert_eq!(params.window_size_tx, 7);
        assert_eq!(params.window_size_rx, 1);
    }

    #[test]
    fn test_negotiate_takes_minimum() {
        let local = HdlcParameters::symmetric(512, 1).unwrap();
        let client = HdlcParameters {
            max_information_length_tx: 1024,
            max_information_length_rx: 256,
            window_size_tx: 1,
            window_size_rx: 1,
        };
        let agreed = local.negotiate(&client);
        // we may not send more than the client can receive
        assert_eq!(agreed.max_information_length_tx, 256);
        assert_eq!(agreed.max_information_length_rx, 512);
    }

    #[test]
    fn test_truncated_block_rejected() {
        assert!(HdlcParameters::decode(&[0x81, 0x80, 0x06, 0x05, 0x01]).is_err());
        assert!(HdlcParameters::decode(&[0x82, 0x80, 0x00]).is_err());
        assert!(HdlcParameters::symmetric(0, 1).is_err());
    }
}
