//! HDLC frame structure and encoding/decoding
//!
//! ```text
//! 7E | format (2) | destination | source | control | [HCS (2) | information] | FCS (2) | 7E
//! ```
//!
//! The format field is `1010 S LLL LLLL LLLL`: frame format type 3, the
//! segmentation bit and an 11-bit length counting every byte between the
//! flags. HCS covers format through control and is present only when the
//! frame carries information. FCS covers everything between the flags.

use crate::hdlc::address::HdlcAddress;
use crate::hdlc::fcs;
use bytes::{BufMut, BytesMut};
use dlms_core::{DlmsError, DlmsResult};
use dlms_transport::StreamAccessor;
use std::fmt;

/// HDLC frame flag
pub const FLAG: u8 = 0x7E;

/// LLC header of a request (client to server)
pub const LLC_REQUEST: [u8; 3] = [0xE6, 0xE6, 0x00];

/// LLC header of a response (server to client)
pub const LLC_RESPONSE: [u8; 3] = [0xE6, 0xE7, 0x00];

const FORMAT_TYPE: u16 = 0xA000;
const FORMAT_TYPE_MASK: u16 = 0xF000;
const SEGMENTATION_BIT: u16 = 0x0800;
const LENGTH_MASK: u16 = 0x07FF;
const POLL_FINAL: u8 = 0x10;

/// HDLC frame type together with its sequence numbers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameType {
    Information { send_sequence: u8, receive_sequence: u8 },
    ReceiveReady { receive_sequence: u8 },
    ReceiveNotReady { receive_sequence: u8 },
    SetNormalResponseMode,
    Disconnect,
    UnnumberedAcknowledge,
    DisconnectMode,
    FrameReject,
    UnnumberedInformation,
}

impl FrameType {
    /// Control byte with the given poll/final bit
    pub fn control_byte(&self, poll_final: bool) -> u8 {
        let pf = if poll_final { POLL_FINAL } else { 0 };
        match *self {
            FrameType::Information {
                send_sequence,
                receive_sequence,
            } => ((receive_sequence & 0x07) << 5) | pf | ((send_sequence & 0x07) << 1),
            FrameType::ReceiveReady { receive_sequence } => ((receive_sequence & 0x07) << 5) | pf | 0x01,
            FrameType::ReceiveNotReady { receive_sequence } => ((receive_sequence & 0x07) << 5) | pf | 0x05,
            FrameType::SetNormalResponseMode => 0x83 | pf,
            FrameType::Disconnect => 0x43 | pf,
            FrameType::UnnumberedAcknowledge => 0x63 | pf,
            FrameType::DisconnectMode => 0x0F | pf,
            FrameType::FrameReject => 0x87 | pf,
            FrameType::UnnumberedInformation => 0x03 | pf,
        }
    }

    /// Parse a control byte into the frame type and its poll/final bit
    pub fn from_control_byte(control: u8) -> DlmsResult<(Self, bool)> {
        let pf = control & POLL_FINAL != 0;
        let nr = control >> 5;
        let frame_type = if control & 0x01 == 0 {
            FrameType::Information {
                send_sequence: (control >> 1) & 0x07,
                receive_sequence: nr,
            }
        } else {
            match control & 0x0F {
                0x01 => FrameType::ReceiveReady { receive_sequence: nr },
                0x05 => FrameType::ReceiveNotReady { receive_sequence: nr },
                _ => match control & !POLL_FINAL {
                    0x83 => FrameType::SetNormalResponseMode,
                    0x43 => FrameType::Disconnect,
                    0x63 => FrameType::UnnumberedAcknowledge,
                    0x0F => FrameType::DisconnectMode,
                    0x87 => FrameType::FrameReject,
                    0x03 => FrameType::UnnumberedInformation,
                    _ => {
                        return Err(DlmsError::FrameInvalid(format!(
                            "Unknown HDLC control byte 0x{:02X}",
                            control
                        )));
                    }
                },
            }
        };
        Ok((frame_type, pf))
    }
}

/// HDLC frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HdlcFrame {
    pub destination: HdlcAddress,
    pub source: HdlcAddress,
    pub frame_type: FrameType,
    pub poll_final: bool,
    pub segmented: bool,
    pub information: Vec<u8>,
}

impl HdlcFrame {
    /// Frame without information field, with the poll/final bit set
    pub fn control(destination: HdlcAddress, source: HdlcAddress, frame_type: FrameType) -> Self {
        Self {
            destination,
            source,
            frame_type,
            poll_final: true,
            segmented: false,
            information: Vec::new(),
        }
    }

    pub fn with_information(mut self, information: Vec<u8>) -> Self {
        self.information = information;
        self
    }

    pub fn with_segmented(mut self, segmented: bool) -> Self {
        self.segmented = segmented;
        self
    }

    /// Value of the length subfield for this frame
    pub fn frame_length(&self) -> usize {
        let header = 2 + self.destination.byte_length() + self.source.byte_length() + 1;
        let info = if self.information.is_empty() {
            0
        } else {
            2 + self.information.len()
        };
        header + info + 2
    }

    /// Encode including both flags
    pub fn encode(&self) -> DlmsResult<Vec<u8>> {
        let length = self.frame_length();
        if length > usize::from(LENGTH_MASK) {
            return Err(DlmsError::PayloadTooLarge {
                size: self.information.len(),
                max: usize::from(LENGTH_MASK) - (length - self.information.len()),
            });
        }

        let mut format = FORMAT_TYPE | length as u16;
        if self.segmented {
            format |= SEGMENTATION_BIT;
        }

        let mut buf = BytesMut::with_capacity(length + 2);
        buf.put_u8(FLAG);
        buf.put_u16(format);
        self.destination.encode_into(&mut buf);
        self.source.encode_into(&mut buf);
        buf.put_u8(self.frame_type.control_byte(self.poll_final));
        if !self.information.is_empty() {
            let hcs = fcs::fcs(&buf[1..]);
            buf.put_slice(&hcs);
            buf.put_slice(&self.information);
        }
        let frame_fcs = fcs::fcs(&buf[1..]);
        buf.put_slice(&frame_fcs);
        buf.put_u8(FLAG);
        Ok(buf.to_vec())
    }

    /// Decode the bytes between the two flags
    ///
    /// # Errors
    /// - `FrameInvalid` for a wrong format type, length field or address
    /// - `CorruptFrame` when HCS or FCS do not match
    pub fn decode(body: &[u8]) -> DlmsResult<Self> {
        if body.len() < 2 {
            return Err(DlmsError::FrameInvalid("HDLC frame too short".to_string()));
        }
        let format = u16::from_be_bytes([body[0], body[1]]);
        if format & FORMAT_TYPE_MASK != FORMAT_TYPE {
            return Err(DlmsError::FrameInvalid(format!(
                "Unsupported HDLC frame format 0x{:04X}",
                format
            )));
        }
        let length = usize::from(format & LENGTH_MASK);
        if length != body.len() {
            return Err(DlmsError::LengthMismatch {
                declared: length,
                actual: body.len(),
            });
        }
        if !fcs::verify(body) {
            return Err(DlmsError::CorruptFrame("FCS mismatch".to_string()));
        }

        let mut pos = 2;
        let (destination, used) = HdlcAddress::decode(&body[pos..])?;
        pos += used;
        let (source, used) = HdlcAddress::decode(&body[pos..])?;
        pos += used;
        let control = *body
            .get(pos)
            .ok_or_else(|| DlmsError::FrameInvalid("HDLC frame has no control field".to_string()))?;
        let (frame_type, poll_final) = FrameType::from_control_byte(control)?;
        pos += 1;

        let fcs_start = body.len() - 2;
        let information = if fcs_start > pos {
            let info_start = pos + 2;
            if info_start > fcs_start || !fcs::verify(&body[..info_start]) {
                return Err(DlmsError::CorruptFrame("HCS mismatch".to_string()));
            }
            body[info_start..fcs_start].to_vec()
        } else if fcs_start == pos {
            Vec::new()
        } else {
            return Err(DlmsError::FrameInvalid("HDLC frame truncated".to_string()));
        };

        Ok(Self {
            destination,
            source,
            frame_type,
            poll_final,
            segmented: format & SEGMENTATION_BIT != 0,
            information,
        })
    }
}

impl fmt::Display for HdlcFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:?} {} -> {} ({} bytes{})",
            self.frame_type,
            self.source,
            self.destination,
            self.information.len(),
            if self.segmented { ", segmented" } else { "" }
        )
    }
}

/// Reads flag-delimited frames from a byte stream
///
/// Consecutive frames may share a single flag between them.
#[derive(Debug, Default)]
pub struct FrameReader {
    opening_flag_seen: bool,
}

impl FrameReader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Read and decode the next frame
    pub async fn next_frame<S>(&mut self, stream: &mut S) -> DlmsResult<HdlcFrame>
    where
        S: StreamAccessor + ?Sized,
    {
        if !self.opening_flag_seen {
            while stream.read_u8().await? != FLAG {}
        }
        self.opening_flag_seen = false;

        let mut first = stream.read_u8().await?;
        while first == FLAG {
            first = stream.read_u8().await?;
        }
        let second = stream.read_u8().await?;
        let length = usize::from(u16::from_be_bytes([first, second]) & LENGTH_MASK);
        if length < 2 {
            return Err(DlmsError::FrameInvalid(format!("HDLC frame length {}", length)));
        }

        let mut body = vec![0u8; length];
        body[0] = first;
        body[1] = second;
        stream.read_exact(&mut body[2..]).await?;

        let closing = stream.read_u8().await?;
        if closing != FLAG {
            return Err(DlmsError::FrameInvalid(format!(
                "Expected closing flag, found 0x{:02X}",
                closing
            )));
        }
        self.opening_flag_seen = true;
        HdlcFrame::decode(&body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dlms_transport::IoTransport;
    use tokio::io::AsyncWriteExt;

    fn client() -> HdlcAddress {
        HdlcAddress::new(0x10).unwrap()
    }

    fn server() -> HdlcAddress {
        HdlcAddress::new(0x01).unwrap()
    }

    #[test]
    fn test_encode_snrm() {
        let frame = HdlcFrame::control(server(), client(), FrameType::SetNormalResponseMode);
        assert_eq!(
            frame.encode().unwrap(),
            vec![0x7E, 0xA0, 0x07, 0x03, 0x21, 0x93, 0x0F, 0x01, 0x7E]
        );
    }

    #[test]
    fn test_control_bytes() {
        let info = FrameType::Information {
            send_sequence: 3,
            receive_sequence: 5,
        };
        assert_eq!(info.control_byte(true), 0xB6);
        assert_eq!(FrameType::from_control_byte(0xB6).unwrap(), (info, true));
        assert_eq!(FrameType::ReceiveReady { receive_sequence: 1 }.control_byte(true), 0x31);
        assert_eq!(
            FrameType::from_control_byte(0x73).unwrap(),
            (FrameType::UnnumberedAcknowledge, true)
        );
        assert!(FrameType::from_control_byte(0xFF).is_err());
    }

    #[test]
    fn test_information_frame_decodes() {
        let frame = HdlcFrame::control(
            server(),
            client(),
            FrameType::Information {
                send_sequence: 0,
                receive_sequence: 0,
            },
        )
        .with_information(vec![0xE6, 0xE6, 0x00, 0x01, 0x02])
        .with_segmented(true);
        let encoded = frame.encode().unwrap();
        let decoded = HdlcFrame::decode(&encoded[1..encoded.len() - 1]).unwrap();
        assert_eq!(decoded, frame);
        assert!(decoded.segmented);
    }

    #[test]
    fn test_corrupt_fcs_detected() {
        let frame = HdlcFrame::control(server(), client(), FrameType::Disconnect)
            .with_information(vec![1, 2, 3]);
        let mut encoded = frame.encode().unwrap();
        let last = encoded.len() - 3;
        encoded[last] ^= 0xFF;
        let result = HdlcFrame::decode(&encoded[1..encoded.len() - 1]);
        assert!(matches!(result, Err(DlmsError::CorruptFrame(_))));
    }

    #[test]
    fn test_length_field_mismatch() {
        let encoded = HdlcFrame::control(server(), client(), FrameType::Disconnect)
            .encode()
            .unwrap();
        let body = &encoded[1..encoded.len() - 2];
        assert!(matches!(
            HdlcFrame::decode(body),
            Err(DlmsError::LengthMismatch { .. })
        ));
    }

    #[tokio::test]
    async fn test_reader_handles_shared_flags() {
        let a = HdlcFrame::control(server(), client(), FrameType::SetNormalResponseMode)
            .encode()
            .unwrap();
        let b = HdlcFrame::control(server(), client(), FrameType::Disconnect)
            .encode()
            .unwrap();
        let mut wire = vec![0x00, 0x55];
        wire.extend_from_slice(&a);
        // second frame reuses the closing flag of the first
        wire.extend_from_slice(&b[1..]);

        let (mut tx, rx) = tokio::io::duplex(256);
        tx.write_all(&wire).await.unwrap();
        let mut stream = IoTransport::new(rx);
        let mut reader = FrameReader::new();
        let first = reader.next_frame(&mut stream).await.unwrap();
        let second = reader.next_frame(&mut stream).await.unwrap();
        assert_eq!(first.frame_type, FrameType::SetNormalResponseMode);
        assert_eq!(second.frame_type, FrameType::Disconnect);
    }
}
