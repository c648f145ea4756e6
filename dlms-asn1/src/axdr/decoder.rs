//! A-XDR decoder for DLMS/COSEM

use dlms_core::{DlmsError, DlmsResult};

/// A-XDR decoder over a borrowed buffer
#[derive(Debug, Clone)]
pub struct AxdrDecoder<'a> {
    buffer: &'a [u8],
    position: usize,
}

impl<'a> AxdrDecoder<'a> {
    pub fn new(buffer: &'a [u8]) -> Self {
        Self { buffer, position: 0 }
    }

    pub fn position(&self) -> usize {
        self.position
    }

    pub fn remaining(&self) -> usize {
        self.buffer.len() - self.position
    }

    pub fn decode_fixed_bytes(&mut self, len: usize) -> DlmsResult<&'a [u8]> {
        if len > self.remaining() {
            return Err(DlmsError::InvalidData(format!(
                "Not enough bytes: need {}, have {}",
                len,
                self.remaining()
            )));
        }
        let start = self.position;
        self.position += len;
        Ok(&self.buffer[start..self.position])
    }

    pub fn decode_u8(&mut self) -> DlmsResult<u8> {
        Ok(self.decode_fixed_bytes(1)?[0])
    }

    pub fn decode_u16(&mut self) -> DlmsResult<u16> {
        let bytes = self.decode_fixed_bytes(2)?;
        Ok(u16::from_be_bytes([bytes[0], bytes[1]]))
    }

    pub fn decode_u32(&mut self) -> DlmsResult<u32> {
        let bytes = self.decode_fixed_bytes(4)?;
        Ok(u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    pub fn decode_bool(&mut self) -> DlmsResult<bool> {
        Ok(self.decode_u8()? != 0)
    }

    /// Presence octet of an OPTIONAL component
    pub fn decode_presence(&mut self) -> DlmsResult<bool> {
        match self.decode_u8()? {
            0x00 => Ok(false),
            0x01 => Ok(true),
            other => Err(DlmsError::InvalidData(format!("Invalid presence flag 0x{:02X}", other))),
        }
    }

    pub fn decode_length(&mut self) -> DlmsResult<usize> {
        let first = self.decode_u8()?;
        if first < 0x80 {
            return Ok(first as usize);
        }
        let count = (first & 0x7F) as usize;
        if count == 0 || count > 4 {
            return Err(DlmsError::InvalidData(format!("Invalid length prefix 0x{:02X}", first)));
        }
        let bytes = self.decode_fixed_bytes(count)?;
        Ok(bytes.iter().fold(0usize, |acc, b| (acc << 8) | *b as usize))
    }

    pub fn decode_octet_string(&mut self) -> DlmsResult<&'a [u8]> {
        let len = self.decode_length()?;
        self.decode_fixed_bytes(len)
    }

    /// Fail if bytes remain after the last component
    pub fn finish(&self) -> DlmsResult<()> {
        if self.remaining() != 0 {
            return Err(DlmsError::LengthMismatch {
                declared: self.position,
                actual: self.buffer.len(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_primitives() {
        let mut decoder = AxdrDecoder::new(&[0x01, 0x00, 0x04, 0xB0, 0x03, b'a', b'b', b'c']);
        assert!(decoder.decode_presence().unwrap());
        assert!(!decoder.decode_presence().unwrap());
        assert_eq!(decoder.decode_u16().unwrap(), 0x04B0);
        assert_eq!(decoder.decode_octet_string().unwrap(), b"abc");
        assert!(decoder.finish().is_ok());
    }

    #[test]
    fn test_decode_truncated() {
        let mut decoder = AxdrDecoder::new(&[0x05, 0x01]);
        assert!(decoder.decode_octet_string().is_err());
        let mut decoder = AxdrDecoder::new(&[0x02]);
        assert!(decoder.decode_presence().is_err());
    }

    #[test]
    fn test_decode_long_length() {
        let mut data = vec![0x82, 0x01, 0x00];
        data.extend(std::iter::repeat_n(0x11, 256));
        let mut decoder = AxdrDecoder::new(&data);
        assert_eq!(decoder.decode_octet_string().unwrap().len(), 256);
    }
}
