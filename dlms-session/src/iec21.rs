//! IEC 62056-21 opening sequence for serial links
//!
//! An optical or RS-485 port starts at 300 baud. The client sends a sign-on
//! request, the meter identifies itself and offers a baud rate code, the
//! client acknowledges with mode E and both sides switch speed before HDLC
//! takes over.

use dlms_core::{DlmsError, DlmsResult};
use dlms_transport::{SerialTransport, StreamAccessor};
use log::debug;

const ACK: u8 = 0x06;
const MAX_IDENTIFICATION_LENGTH: usize = 64;
/// Protocol control character '2' selects HDLC (mode E)
const MODE_E_HDLC: u8 = b'2';

/// Map a mode C/E baud rate code (`'0'..='6'`) to its line speed
///
/// # Errors
/// `InvalidBaudCode` for any other character. This is a local
/// configuration fault, not a protocol violation.
pub fn baud_rate_for_code(code: char) -> DlmsResult<u32> {
    match code {
        '0' => Ok(300),
        '1' => Ok(600),
        '2' => Ok(1200),
        '3' => Ok(2400),
        '4' => Ok(4800),
        '5' => Ok(9600),
        '6' => Ok(19200),
        other => Err(DlmsError::InvalidBaudCode(other)),
    }
}

/// Mode C/E code for a line speed
pub fn code_for_baud_rate(baud_rate: u32) -> Option<char> {
    match baud_rate {
        300 => Some('0'),
        600 => Some('1'),
        1200 => Some('2'),
        2400 => Some('3'),
        4800 => Some('4'),
        9600 => Some('5'),
        19200 => Some('6'),
        _ => None,
    }
}

/// Line speed control of a serial port
pub trait BaudRateControl {
    fn set_baud_rate(&mut self, baud_rate: u32) -> DlmsResult<()>;

    /// Reconfigure the character format for HDLC (8N1)
    fn enter_hdlc_framing(&mut self) -> DlmsResult<()> {
        Ok(())
    }
}

impl BaudRateControl for SerialTransport {
    fn set_baud_rate(&mut self, baud_rate: u32) -> DlmsResult<()> {
        SerialTransport::set_baud_rate(self, baud_rate)
    }

    fn enter_hdlc_framing(&mut self) -> DlmsResult<()> {
        self.set_eight_data_bits_no_parity()
    }
}

/// Identification message sent by the meter
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identification {
    pub manufacturer: String,
    pub baud_code: char,
    pub baud_rate: u32,
    pub identification: String,
}

impl Identification {
    /// Parse `/XXXZ<identification>` without the trailing CR LF
    pub fn parse(line: &[u8]) -> DlmsResult<Self> {
        let text = std::str::from_utf8(line)
            .map_err(|_| DlmsError::Protocol("Identification is not ASCII".to_string()))?;
        let rest = text
            .strip_prefix('/')
            .ok_or_else(|| DlmsError::Protocol(format!("Bad identification message {:?}", text)))?;
        if rest.len() < 4 || !rest.is_char_boundary(4) {
            return Err(DlmsError::Protocol(format!("Identification too short: {:?}", text)));
        }
        let manufacturer = rest[..3].to_string();
        let baud_code = rest[3..4]
            .chars()
            .next()
            .ok_or_else(|| DlmsError::Protocol("Missing baud rate code".to_string()))?;
        let baud_rate = baud_rate_for_code(baud_code)?;
        Ok(Self {
            manufacturer,
            baud_code,
            baud_rate,
            identification: rest[4..].to_string(),
        })
    }
}

/// Sign-on request for an optional device address
pub fn request_message(device_address: &str) -> Vec<u8> {
    format!("/?{}!\r\n", device_address).into_bytes()
}

/// Mode E acknowledgement selecting `baud_code`
pub fn acknowledgement(baud_code: char) -> [u8; 6] {
    [ACK, MODE_E_HDLC, baud_code as u8, MODE_E_HDLC, b'\r', b'\n']
}

async fn read_line<S: StreamAccessor + ?Sized>(stream: &mut S) -> DlmsResult<Vec<u8>> {
    let mut line = Vec::with_capacity(32);
    loop {
        let byte = stream.read_u8().await?;
        if byte == b'\n' && line.last() == Some(&b'\r') {
            line.pop();
            return Ok(line);
        }
        // some meters echo or send noise before the identification
        if line.is_empty() && byte != b'/' {
            continue;
        }
        line.push(byte);
        if line.len() > MAX_IDENTIFICATION_LENGTH {
            return Err(DlmsError::Protocol("Identification message too long".to_string()));
        }
    }
}

/// Run the mode E opening sequence and switch the port to the offered speed
pub async fn mode_e_handshake<P>(port: &mut P, device_address: &str) -> DlmsResult<Identification>
where
    P: StreamAccessor + BaudRateControl,
{
    port.write_all(&request_message(device_address)).await?;
    port.flush().await?;

    let line = read_line(port).await?;
    let identification = Identification::parse(&line)?;
    debug!(
        "Meter {} identified as {:?}, offering {} baud",
        identification.manufacturer, identification.identification, identification.baud_rate
    );

    port.write_all(&acknowledgement(identification.baud_code)).await?;
    port.flush().await?;
    port.set_baud_rate(identification.baud_rate)?;
    port.enter_hdlc_framing()?;
    Ok(identification)
}
