//! Serial port transport implementation

use crate::io::IoTransport;
use crate::stream::{StreamAccessor, TransportLayer, already_open, not_connected};
use async_trait::async_trait;
use dlms_core::{DlmsError, DlmsResult};
use std::fmt;
use std::time::Duration;
use tokio_serial::{SerialPort, SerialStream};

/// Serial port transport layer settings
#[derive(Debug, Clone)]
pub struct SerialSettings {
    pub port_name: String,
    pub baud_rate: u32,
    pub data_bits: tokio_serial::DataBits,
    pub stop_bits: tokio_serial::StopBits,
    pub parity: tokio_serial::Parity,
    pub flow_control: tokio_serial::FlowControl,
    pub timeout: Option<Duration>,
}

impl SerialSettings {
    /// 8N1 without flow control and a 30 second timeout
    pub fn new(port_name: impl Into<String>, baud_rate: u32) -> Self {
        Self {
            port_name: port_name.into(),
            baud_rate,
            data_bits: tokio_serial::DataBits::Eight,
            stop_bits: tokio_serial::StopBits::One,
            parity: tokio_serial::Parity::None,
            flow_control: tokio_serial::FlowControl::None,
            timeout: Some(Duration::from_secs(30)),
        }
    }

    /// IEC 62056-21 optical probe framing (7E1) used before switching to HDLC
    pub fn iec_62056_21(port_name: impl Into<String>) -> Self {
        Self {
            data_bits: tokio_serial::DataBits::Seven,
            parity: tokio_serial::Parity::Even,
            ..Self::new(port_name, 300)
        }
    }
}

/// Serial port transport layer implementation
pub struct SerialTransport {
    inner: Option<IoTransport<SerialStream>>,
    settings: SerialSettings,
}

impl fmt::Debug for SerialTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SerialTransport")
            .field("settings", &self.settings)
            .field("open", &self.inner.is_some())
            .finish()
    }
}

impl SerialTransport {
    pub fn new(settings: SerialSettings) -> Self {
        Self {
            inner: None,
            settings,
        }
    }

    pub fn settings(&self) -> &SerialSettings {
        &self.settings
    }

    /// Change the line speed of the open port
    pub fn set_baud_rate(&mut self, baud_rate: u32) -> DlmsResult<()> {
        let inner = self.inner.as_mut().ok_or_else(|| not_connected("Serial port"))?;
        inner
            .get_mut()
            .set_baud_rate(baud_rate)
            .map_err(|e| DlmsError::Configuration(format!("Failed to set baud rate {}: {}", baud_rate, e)))?;
        self.settings.baud_rate = baud_rate;
        Ok(())
    }

    /// Switch to 8N1 framing, as required once HDLC takes over the line
    pub fn set_eight_data_bits_no_parity(&mut self) -> DlmsResult<()> {
        let inner = self.inner.as_mut().ok_or_else(|| not_connected("Serial port"))?;
        let port = inner.get_mut();
        port.set_data_bits(tokio_serial::DataBits::Eight)
            .and_then(|_| port.set_parity(tokio_serial::Parity::None))
            .map_err(|e| DlmsError::Configuration(format!("Failed to reconfigure serial port: {}", e)))?;
        self.settings.data_bits = tokio_serial::DataBits::Eight;
        self.settings.parity = tokio_serial::Parity::None;
        Ok(())
    }

    fn stream(&mut self) -> DlmsResult<&mut IoTransport<SerialStream>> {
        self.inner.as_mut().ok_or_else(|| not_connected("Serial port"))
    }
}

#[async_trait]
impl TransportLayer for SerialTransport {
    async fn open(&mut self) -> DlmsResult<()> {
        if self.inner.is_some() {
            return Err(already_open());
        }

        let builder = tokio_serial::new(&self.settings.port_name, self.settings.baud_rate)
            .data_bits(self.settings.data_bits)
            .stop_bits(self.settings.stop_bits)
            .parity(self.settings.parity)
            .flow_control(self.settings.flow_control);

        let stream = SerialStream::open(&builder).map_err(|e| {
            DlmsError::Configuration(format!(
                "Failed to open serial port {}: {}",
                self.settings.port_name, e
            ))
        })?;

        self.inner = Some(IoTransport::with_timeout(stream, self.settings.timeout));
        Ok(())
    }
}

#[async_trait]
impl StreamAccessor for SerialTransport {
    async fn set_timeout(&mut self, timeout: Option<Duration>) -> DlmsResult<()> {
        self.settings.timeout = timeout;
        if let Some(inner) = self.inner.as_mut() {
            inner.set_timeout(timeout).await?;
        }
        Ok(())
    }

    async fn read(&mut self, buf: &mut [u8]) -> DlmsResult<usize> {
        self.stream()?.read(buf).await
    }

    async fn write(&mut self, buf: &[u8]) -> DlmsResult<usize> {
        self.stream()?.write(buf).await
    }

    async fn flush(&mut self) -> DlmsResult<()> {
        self.stream()?.flush().await
    }

    fn is_closed(&self) -> bool {
        self.inner.as_ref().is_none_or(|s| s.is_closed())
    }

    async fn close(&mut self) -> DlmsResult<()> {
        // the port is released when the stream is dropped
        self.inner = None;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_serial_settings() {
        let settings = SerialSettings::new("/dev/ttyUSB0", 9600);
        assert_eq!(settings.port_name, "/dev/ttyUSB0");
        assert_eq!(settings.baud_rate, 9600);
        assert_eq!(settings.data_bits, tokio_serial::DataBits::Eight);
    }

    #[test]
    fn test_iec_settings_start_at_300_baud() {
        let settings = SerialSettings::iec_62056_21("/dev/ttyUSB0");
        assert_eq!(settings.baud_rate, 300);
        assert_eq!(settings.parity, tokio_serial::Parity::Even);
        assert_eq!(settings.data_bits, tokio_serial::DataBits::Seven);
    }

    #[test]
    fn test_baud_change_requires_open_port() {
        let mut transport = SerialTransport::new(SerialSettings::new("/dev/null", 300));
        assert!(transport.is_closed());
        assert!(transport.set_baud_rate(9600).is_err());
    }
}
