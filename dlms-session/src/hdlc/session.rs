//! HDLC session: link setup, sequencing and segmentation

use crate::hdlc::address::HdlcAddress;
use crate::hdlc::frame::{FrameReader, FrameType, HdlcFrame, LLC_REQUEST, LLC_RESPONSE};
use crate::hdlc::parameters::HdlcParameters;
use crate::hdlc::segment::{Reassembler, segments};
use crate::hdlc::sequence::HdlcSequenceNumber;
use crate::hdlc::state::HdlcConnectionState;
use crate::layer::SessionLayer;
use async_trait::async_trait;
use dlms_core::{DlmsError, DlmsResult};
use dlms_transport::StreamAccessor;
use log::{debug, trace, warn};

/// Upper bound of a reassembled PDU including its LLC header
pub const MAX_REASSEMBLED_LENGTH: usize = 0xFFFF + LLC_REQUEST.len();

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HdlcRole {
    Client,
    Server,
}

/// One HDLC connection in normal response mode
///
/// N(S) is the sequence number of the next information frame to send and
/// N(R) the sequence number expected on the next received one. An
/// information frame with any other N(S) is fatal to the session.
#[derive(Debug)]
pub struct HdlcSession<T: StreamAccessor> {
    transport: T,
    role: HdlcRole,
    local_address: HdlcAddress,
    remote_address: HdlcAddress,
    parameters: HdlcParameters,
    send_sequence: HdlcSequenceNumber,
    receive_sequence: HdlcSequenceNumber,
    state: HdlcConnectionState,
    reader: FrameReader,
    reassembler: Reassembler,
    use_llc_header: bool,
}

impl<T: StreamAccessor> HdlcSession<T> {
    fn new(transport: T, role: HdlcRole, local: HdlcAddress, remote: HdlcAddress) -> Self {
        Self {
            transport,
            role,
            local_address: local,
            remote_address: remote,
            parameters: HdlcParameters::default(),
            send_sequence: HdlcSequenceNumber::new(),
            receive_sequence: HdlcSequenceNumber::new(),
            state: HdlcConnectionState::Disconnected,
            reader: FrameReader::new(),
            reassembler: Reassembler::new(MAX_REASSEMBLED_LENGTH),
            use_llc_header: true,
        }
    }

    /// Client side: send SNRM and wait for UA
    pub async fn connect(
        transport: T,
        client: HdlcAddress,
        server: HdlcAddress,
        local: HdlcParameters,
    ) -> DlmsResult<Self> {
        local.validate()?;
        let mut session = Self::new(transport, HdlcRole::Client, client, server);
        session.transition(HdlcConnectionState::Connecting)?;

        let snrm = HdlcFrame::control(server, client, FrameType::SetNormalResponseMode)
            .with_information(local.encode());
        session.write_frame(&snrm).await?;

        loop {
            let frame = session.read_frame().await?;
            match frame.frame_type {
                FrameType::UnnumberedAcknowledge => {
                    let offered = HdlcParameters::decode(&frame.information)?;
                    session.parameters = local.negotiate(&offered);
                    break;
                }
                FrameType::DisconnectMode => {
                    session.state = HdlcConnectionState::Closed;
                    return Err(DlmsError::Protocol(
                        "HDLC server refused the connection (DM)".to_string(),
                    ));
                }
                other => debug!("Ignoring {:?} while waiting for UA", other),
            }
        }

        session.transition(HdlcConnectionState::Connected)?;
        debug!(
            "HDLC connected {} -> {} with {:?}",
            client, server, session.parameters
        );
        Ok(session)
    }

    /// Server side: wait for SNRM and answer with UA
    ///
    /// The logical device is whichever upper address the client chose. When
    /// `physical_address` is set, SNRM frames addressed to another physical
    /// device are ignored.
    pub async fn accept(
        transport: T,
        local: HdlcParameters,
        physical_address: Option<u16>,
    ) -> DlmsResult<Self> {
        local.validate()?;
        let placeholder = HdlcAddress::new(0)?;
        let mut session = Self::new(transport, HdlcRole::Server, placeholder, placeholder);

        loop {
            let frame = session.reader.next_frame(&mut session.transport).await?;
            if let (Some(expected), Some(lower)) = (physical_address, frame.destination.lower()) {
                if expected != lower {
                    trace!("Ignoring frame for physical address {:#x}", lower);
                    continue;
                }
            }
            match frame.frame_type {
                FrameType::SetNormalResponseMode => {
                    session.local_address = frame.destination;
                    session.remote_address = frame.source;
                    session.transition(HdlcConnectionState::Connecting)?;
                    session.answer_snrm(&local, &frame.information).await?;
                    return Ok(session);
                }
                _ => {
                    let dm = HdlcFrame::control(frame.source, frame.destination, FrameType::DisconnectMode);
                    session.write_encoded(&dm).await?;
                }
            }
        }
    }

    async fn answer_snrm(&mut self, local: &HdlcParameters, information: &[u8]) -> DlmsResult<()> {
        let proposed = HdlcParameters::decode(information)?;
        self.parameters = local.negotiate(&proposed);
        self.send_sequence.reset();
        self.receive_sequence.reset();
        self.reassembler.reset();

        let ua = HdlcFrame::control(self.remote_address, self.local_address, FrameType::UnnumberedAcknowledge)
            .with_information(self.parameters.encode());
        self.write_frame(&ua).await?;
        self.transition(HdlcConnectionState::Connected)?;
        debug!(
            "HDLC link to {} established with {:?}",
            self.remote_address, self.parameters
        );
        Ok(())
    }

    pub fn parameters(&self) -> &HdlcParameters {
        &self.parameters
    }

    pub fn state(&self) -> HdlcConnectionState {
        self.state
    }

    pub fn local_address(&self) -> HdlcAddress {
        self.local_address
    }

    pub fn remote_address(&self) -> HdlcAddress {
        self.remote_address
    }

    /// Current N(S) and N(R)
    pub fn sequence_numbers(&self) -> (u8, u8) {
        (self.send_sequence.value(), self.receive_sequence.value())
    }

    pub fn set_use_llc_header(&mut self, use_llc_header: bool) {
        self.use_llc_header = use_llc_header;
    }

    fn transition(&mut self, next: HdlcConnectionState) -> DlmsResult<()> {
        self.state.validate_transition(next)?;
        self.state = next;
        Ok(())
    }

    async fn write_encoded(&mut self, frame: &HdlcFrame) -> DlmsResult<()> {
        let encoded = frame.encode()?;
        self.transport.write_all(&encoded).await?;
        self.transport.flush().await
    }

    async fn write_frame(&mut self, frame: &HdlcFrame) -> DlmsResult<()> {
        trace!("HDLC send {}", frame);
        self.write_encoded(frame).await
    }

    /// Next frame exchanged between our two addresses
    async fn read_frame(&mut self) -> DlmsResult<HdlcFrame> {
        loop {
            let frame = self.reader.next_frame(&mut self.transport).await?;
            if frame.destination != self.local_address || frame.source != self.remote_address {
                trace!("Ignoring frame {}", frame);
                continue;
            }
            trace!("HDLC recv {}", frame);
            return Ok(frame);
        }
    }

    fn llc_headers(&self) -> (&'static [u8; 3], &'static [u8; 3]) {
        match self.role {
            HdlcRole::Client => (&LLC_REQUEST, &LLC_RESPONSE),
            HdlcRole::Server => (&LLC_RESPONSE, &LLC_REQUEST),
        }
    }

    async fn peer_disconnected(&mut self) -> DlmsError {
        let ua = HdlcFrame::control(self.remote_address, self.local_address, FrameType::UnnumberedAcknowledge);
        if let Err(e) = self.write_frame(&ua).await {
            debug!("Failed to acknowledge DISC: {}", e);
        }
        self.state = HdlcConnectionState::Closed;
        DlmsError::ConnectionClosed
    }

    /// Wait for the RR acknowledging every frame sent so far
    async fn await_receive_ready(&mut self) -> DlmsResult<()> {
        loop {
            let frame = self.read_frame().await?;
            match frame.frame_type {
                FrameType::ReceiveReady { receive_sequence } => {
                    let expected = self.send_sequence.value();
                    if receive_sequence != expected {
                        self.state = HdlcConnectionState::Closed;
                        return Err(DlmsError::SequenceError {
                            expected,
                            received: receive_sequence,
                        });
                    }
                    return Ok(());
                }
                FrameType::Disconnect => return Err(self.peer_disconnected().await),
                other => {
                    return Err(DlmsError::Protocol(format!(
                        "Expected RR between segments, received {:?}",
                        other
                    )));
                }
            }
        }
    }

    /// Send one PDU, segmenting it over several information frames if needed
    pub async fn send_pdu(&mut self, pdu: &[u8]) -> DlmsResult<()> {
        if !self.state.can_send_information() {
            return Err(DlmsError::Protocol(format!(
                "Cannot send information in HDLC state {:?}",
                self.state
            )));
        }
        let mut data = Vec::with_capacity(pdu.len() + 3);
        if self.use_llc_header {
            data.extend_from_slice(self.llc_headers().0);
        }
        data.extend_from_slice(pdu);

        let max = usize::from(self.parameters.max_information_length_tx);
        for part in segments(&data, max)? {
            let frame = HdlcFrame::control(
                self.remote_address,
                self.local_address,
                FrameType::Information {
                    send_sequence: self.send_sequence.value(),
                    receive_sequence: self.receive_sequence.value(),
                },
            )
            .with_information(part.data.to_vec())
            .with_segmented(part.segmented);
            self.write_frame(&frame).await?;
            self.send_sequence.increment();
            if part.segmented {
                self.await_receive_ready().await?;
            }
        }
        Ok(())
    }

    /// Receive one PDU, reassembling segmented transfers
    pub async fn receive_pdu(&mut self) -> DlmsResult<Vec<u8>> {
        loop {
            let frame = self.read_frame().await?;
            match frame.frame_type {
                FrameType::Information { send_sequence, .. } => {
                    let max = self.parameters.max_information_length_rx;
                    if frame.information.len() > usize::from(max) {
                        warn!(
                            "HDLC frame from {} carries {} bytes, negotiated maximum is {}",
                            self.remote_address,
                            frame.information.len(),
                            max
                        );
                        self.state = HdlcConnectionState::Closed;
                        return Err(DlmsError::Protocol(format!(
                            "Information field of {} bytes exceeds the negotiated {}",
                            frame.information.len(),
                            max
                        )));
                    }
                    let expected = self.receive_sequence.value();
                    if send_sequence != expected {
                        warn!(
                            "HDLC sequence error from {}: expected {}, received {}",
                            self.remote_address, expected, send_sequence
                        );
                        self.state = HdlcConnectionState::Closed;
                        return Err(DlmsError::SequenceError {
                            expected,
                            received: send_sequence,
                        });
                    }
                    self.receive_sequence.increment();
                    if let Some(message) = self.reassembler.push(&frame.information, frame.segmented)? {
                        return self.strip_llc(message);
                    }
                    let rr = HdlcFrame::control(
                        self.remote_address,
                        self.local_address,
                        FrameType::ReceiveReady {
                            receive_sequence: self.receive_sequence.value(),
                        },
                    );
                    self.write_frame(&rr).await?;
                }
                FrameType::Disconnect => return Err(self.peer_disconnected().await),
                FrameType::SetNormalResponseMode if self.role == HdlcRole::Server => {
                    debug!("Client {} re-established the HDLC link", self.remote_address);
                    let local = self.parameters;
                    self.answer_snrm(&local, &frame.information).await?;
                }
                FrameType::DisconnectMode | FrameType::FrameReject => {
                    self.state = HdlcConnectionState::Closed;
                    return Err(DlmsError::Protocol(format!(
                        "HDLC peer rejected the link ({:?})",
                        frame.frame_type
                    )));
                }
                other => trace!("Ignoring {:?} while waiting for information", other),
            }
        }
    }

    fn strip_llc(&self, message: Vec<u8>) -> DlmsResult<Vec<u8>> {
        if !self.use_llc_header {
            return Ok(message);
        }
        let expected = self.llc_headers().1;
        match message.strip_prefix(&expected[..]) {
            Some(pdu) => Ok(pdu.to_vec()),
            None => Err(DlmsError::FrameInvalid("Missing or wrong LLC header".to_string())),
        }
    }

    /// Release the link (client sends DISC) and close the transport
    pub async fn disconnect(&mut self) -> DlmsResult<()> {
        if self.role == HdlcRole::Client && self.state == HdlcConnectionState::Connected {
            self.transition(HdlcConnectionState::Disconnecting)?;
            let disc = HdlcFrame::control(self.remote_address, self.local_address, FrameType::Disconnect);
            self.write_frame(&disc).await?;
            match self.read_frame().await {
                Ok(frame) => trace!("DISC answered with {:?}", frame.frame_type),
                Err(e) => debug!("No answer to DISC: {}", e),
            }
        }
        self.state = HdlcConnectionState::Closed;
        self.transport.close().await
    }
}

#[async_trait]
impl<T: StreamAccessor> SessionLayer for HdlcSession<T> {
    async fn send(&mut self, pdu: &[u8]) -> DlmsResult<()> {
        self.send_pdu(pdu).await
    }

    async fn receive(&mut self) -> DlmsResult<Vec<u8>> {
        self.receive_pdu().await
    }

    async fn close(&mut self) -> DlmsResult<()> {
        self.disconnect().await
    }

    fn client_id(&self) -> Option<u16> {
        let client = match self.role {
            HdlcRole::Client => self.local_address,
            HdlcRole::Server => self.remote_address,
        };
        (self.state != HdlcConnectionState::Disconnected).then_some(client.upper())
    }

    fn logical_device_id(&self) -> Option<u16> {
        let server = match self.role {
            HdlcRole::Client => self.remote_address,
            HdlcRole::Server => self.local_address,
        };
        (self.state != HdlcConnectionState::Disconnected).then_some(server.upper())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dlms_transport::IoTransport;
    use tokio::io::DuplexStream;

    type Link = HdlcSession<IoTransport<DuplexStream>>;

    async fn link(max_info: u16) -> (Link, Link) {
        let (a, b) = tokio::io::duplex(8192);
        let params = HdlcParameters::symmetric(max_info, 1).unwrap();
        let server = tokio::spawn(async move { HdlcSession::accept(IoTransport::new(b), params, None).await });
        let client = HdlcSession::connect(
            IoTransport::new(a),
            HdlcAddress::new(0x10).unwrap(),
            HdlcAddress::with_lower(0x01, 0x11).unwrap(),
            params,
        )
        .await
        .unwrap();
        (client, server.await.unwrap().unwrap())
    }

    #[tokio::test]
    async fn test_connect_and_exchange() {
        let (mut client, mut server) = link(128).await;
        assert_eq!(client.state(), HdlcConnectionState::Connected);
        assert_eq!(server.client_id(), Some(0x10));
        assert_eq!(server.logical_device_id(), Some(0x01));

        client.send(&[0xC0, 0x01, 0x81]).await.unwrap();
        assert_eq!(server.receive().await.unwrap(), vec![0xC0, 0x01, 0x81]);
        server.send(&[0xC4, 0x01, 0x81, 0x00]).await.unwrap();
        assert_eq!(client.receive().await.unwrap(), vec![0xC4, 0x01, 0x81, 0x00]);

        assert_eq!(client.sequence_numbers(), (1, 1));
        assert_eq!(server.sequence_numbers(), (1, 1));
    }

    #[tokio::test]
    async fn test_segmented_transfer() {
        let (mut client, mut server) = link(32).await;
        let pdu: Vec<u8> = (0..200u8).collect();
        let expected = pdu.clone();

        let receiver = tokio::spawn(async move {
            let received = server.receive().await.unwrap();
            (server, received)
        });
        client.send(&pdu).await.unwrap();
        let (server, received) = receiver.await.unwrap();
        assert_eq!(received, expected);
        // 203 bytes with LLC header in 32-byte frames
        let frames = 203usize.div_ceil(32) as u8;
        assert_eq!(client.sequence_numbers().0, frames % 8);
        assert_eq!(server.sequence_numbers().1, frames % 8);
    }

    #[tokio::test]
    async fn test_out_of_sequence_frame_is_fatal() {
        let (a, b) = tokio::io::duplex(1024);
        let params = HdlcParameters::default();
        let server = tokio::spawn(async move {
            let mut session = HdlcSession::accept(IoTransport::new(b), params, None).await?;
            session.receive().await
        });

        let client_addr = HdlcAddress::new(0x10).unwrap();
        let server_addr = HdlcAddress::new(0x01).unwrap();
        let mut raw = IoTransport::new(a);
        let snrm = HdlcFrame::control(server_addr, client_addr, FrameType::SetNormalResponseMode);
        raw.write_all(&snrm.encode().unwrap()).await.unwrap();
        let mut reader = FrameReader::new();
        let ua = reader.next_frame(&mut raw).await.unwrap();
        assert_eq!(ua.frame_type, FrameType::UnnumberedAcknowledge);

        let bogus = HdlcFrame::control(
            server_addr,
            client_addr,
            FrameType::Information {
                send_sequence: 2,
                receive_sequence: 0,
            },
        )
        .with_information(vec![0xE6, 0xE6, 0x00, 0x01]);
        raw.write_all(&bogus.encode().unwrap()).await.unwrap();

        let result = server.await.unwrap();
        assert!(matches!(
            result,
            Err(DlmsError::SequenceError { expected: 0, received: 2 })
        ));
    }

    #[tokio::test]
    async fn test_oversized_information_field_is_refused() {
        let (a, b) = tokio::io::duplex(1024);
        let server = tokio::spawn(async move {
            let mut session = HdlcSession::accept(IoTransport::new(b), HdlcParameters::default(), None).await?;
            assert_eq!(session.parameters().max_information_length_rx, 32);
            session.receive().await
        });

        let client_addr = HdlcAddress::new(0x10).unwrap();
        let server_addr = HdlcAddress::new(0x01).unwrap();
        let mut raw = IoTransport::new(a);
        let proposal = HdlcParameters::symmetric(32, 1).unwrap();
        let snrm = HdlcFrame::control(server_addr, client_addr, FrameType::SetNormalResponseMode)
            .with_information(proposal.encode());
        raw.write_all(&snrm.encode().unwrap()).await.unwrap();
        let mut reader = FrameReader::new();
        let ua = reader.next_frame(&mut raw).await.unwrap();
        assert_eq!(ua.frame_type, FrameType::UnnumberedAcknowledge);

        let oversized = HdlcFrame::control(
            server_addr,
            client_addr,
            FrameType::Information {
                send_sequence: 0,
                receive_sequence: 0,
            },
        )
        .with_information(vec![0xE6; 40]);
        raw.write_all(&oversized.encode().unwrap()).await.unwrap();

        assert!(matches!(server.await.unwrap(), Err(DlmsError::Protocol(_))));
    }

    #[tokio::test]
    async fn test_disconnect_ends_server_session() {
        let (mut client, mut server) = link(128).await;
        let receiver = tokio::spawn(async move { server.receive().await });
        client.close().await.unwrap();
        assert!(matches!(receiver.await.unwrap(), Err(DlmsError::ConnectionClosed)));
    }
}
