//! Client side of the association handshake
//!
//! Like the server engine, [`ClientAssociation`] only builds and parses
//! APDUs; the connection drives the transport.

use super::ciphering::{CipherContext, glo_tag, is_glo_tag};
use super::events::{AssociationEvent, AssociationEventListener, EventsEmitter};
use super::hls::{DEFAULT_INVOKE_ID_AND_PRIORITY, decode_reply_to_hls_response, encode_reply_to_hls_request};
use super::state::AssociationState;
use crate::conformance::Conformance;
use crate::initiate::{ConfirmedServiceError, DEFAULT_MAX_PDU_SIZE, InitiateRequest, InitiateResponse};
use dlms_asn1::{Aare, Aarq, ApplicationContextName, MechanismName, ReleaseRequestReason, Rlre, Rlrq};
use dlms_core::{DlmsError, DlmsResult};
use dlms_security::utils::generate_aes128_key;
use dlms_security::{
    AuthenticationMechanism, SYSTEM_TITLE_LENGTH, SecuritySuite, generate_challenge, hls_response,
    verify_hls_response,
};
use log::{debug, info, warn};
use std::sync::Arc;

#[derive(Debug, Clone)]
pub struct ClientAssociationSettings {
    pub suite: SecuritySuite,
    pub logical_name: bool,
    /// Client system title, required for ciphered contexts and HLS-GMAC
    pub system_title: Option<Vec<u8>>,
    pub proposed_conformance: Conformance,
    pub max_receive_pdu_size: u16,
    /// Length of the CtoS challenge for HLS mechanisms
    pub challenge_length: usize,
}

impl ClientAssociationSettings {
    pub fn new(suite: SecuritySuite) -> Self {
        Self {
            suite,
            logical_name: true,
            system_title: None,
            proposed_conformance: Conformance::logical_name_default(),
            max_receive_pdu_size: DEFAULT_MAX_PDU_SIZE,
            challenge_length: 16,
        }
    }

    pub fn with_system_title(mut self, system_title: Vec<u8>) -> Self {
        self.system_title = Some(system_title);
        self
    }

    /// Switch to short name referencing
    pub fn with_short_name(mut self) -> Self {
        self.logical_name = false;
        self.proposed_conformance = Conformance::short_name_default();
        self
    }

    pub fn with_conformance(mut self, conformance: Conformance) -> Self {
        self.proposed_conformance = conformance;
        self
    }

    pub fn with_max_receive_pdu_size(mut self, size: u16) -> Self {
        self.max_receive_pdu_size = size;
        self
    }

    pub fn with_challenge_length(mut self, length: usize) -> Self {
        self.challenge_length = length;
        self
    }

    fn needs_system_title(&self) -> bool {
        self.suite.is_ciphered() || self.suite.authentication_mechanism() == AuthenticationMechanism::HlsGmac
    }
}

/// One association on the client side of a connection
#[derive(Debug)]
pub struct ClientAssociation {
    settings: ClientAssociationSettings,
    state: AssociationState,
    events: EventsEmitter,
    cipher: Option<CipherContext>,
    dedicated_key: Option<Vec<u8>>,
    client_challenge: Option<Vec<u8>>,
    server_challenge: Option<Vec<u8>>,
    server_system_title: Option<Vec<u8>>,
    negotiated: Option<InitiateResponse>,
    authenticated: bool,
    invocation_counter: u32,
}

impl ClientAssociation {
    /// # Errors
    /// `Configuration` if the suite needs a system title and none of
    /// 8 bytes is set.
    pub fn new(settings: ClientAssociationSettings) -> DlmsResult<Self> {
        match &settings.system_title {
            Some(title) if title.len() != SYSTEM_TITLE_LENGTH => {
                return Err(DlmsError::Configuration(format!(
                    "System title must be {} bytes, got {}",
                    SYSTEM_TITLE_LENGTH,
                    title.len()
                )));
            }
            None if settings.needs_system_title() => {
                return Err(DlmsError::Configuration(
                    "Ciphered or HLS-GMAC association requires a client system title".to_string(),
                ));
            }
            _ => {}
        }
        Ok(Self {
            settings,
            state: AssociationState::Idle,
            events: EventsEmitter::new(),
            cipher: None,
            dedicated_key: None,
            client_challenge: None,
            server_challenge: None,
            server_system_title: None,
            negotiated: None,
            authenticated: false,
            invocation_counter: 1,
        })
    }

    pub fn add_listener(&mut self, listener: Arc<dyn AssociationEventListener>) {
        self.events.add_listener(listener);
    }

    pub fn state(&self) -> AssociationState {
        self.state
    }

    pub fn is_authenticated(&self) -> bool {
        self.state.is_active() && self.authenticated
    }

    /// Associated, but HLS pass 3/4 still outstanding
    pub fn needs_hls(&self) -> bool {
        self.state.is_active() && !self.authenticated
    }

    pub fn negotiated_conformance(&self) -> Option<Conformance> {
        self.negotiated.as_ref().map(|r| r.negotiated_conformance)
    }

    pub fn negotiated_max_pdu_size(&self) -> Option<u16> {
        self.negotiated.as_ref().map(|r| r.server_max_receive_pdu_size)
    }

    pub fn server_system_title(&self) -> Option<&[u8]> {
        self.server_system_title.as_deref()
    }

    /// Build the AARQ; moves to `AwaitingHandshake`
    pub fn build_aarq(&mut self) -> DlmsResult<Vec<u8>> {
        self.transition(AssociationState::AwaitingHandshake)?;
        let suite = &self.settings.suite;
        let context = ApplicationContextName::new(self.settings.logical_name, suite.is_ciphered());
        let mut aarq = Aarq::new(context);
        if let Some(title) = &self.settings.system_title {
            aarq = aarq.with_calling_ap_title(title.clone());
        }

        let mechanism = suite.authentication_mechanism();
        match mechanism {
            AuthenticationMechanism::None => {}
            AuthenticationMechanism::Low => {
                aarq = aarq.with_mechanism(MechanismName::LOW, suite.password().map(<[u8]>::to_vec));
            }
            _ => {
                let challenge = generate_challenge(self.settings.challenge_length)?;
                aarq = aarq.with_mechanism(MechanismName::new(mechanism.id()), Some(challenge.clone()));
                self.client_challenge = Some(challenge);
            }
        }

        let mut request = InitiateRequest::new(self.settings.proposed_conformance, self.settings.max_receive_pdu_size);
        if suite.is_ciphered() && suite.use_dedicated_key() {
            let key = generate_aes128_key()?;
            request = request.with_dedicated_key(key.clone());
            self.dedicated_key = Some(key);
        }
        let initiate = request.encode();

        let user_information = if suite.is_ciphered() {
            let title = self.settings.system_title.as_deref().unwrap_or_default();
            let mut cipher = CipherContext::new(suite, title, None)?;
            let ciphered = cipher.cipher(&initiate)?;
            self.cipher = Some(cipher);
            ciphered
        } else {
            initiate
        };
        debug!("Built AARQ for {:?} with {:?}", context, mechanism);
        aarq.with_user_information(user_information).encode()
    }

    /// Process the server's AARE
    ///
    /// # Errors
    /// `AssociationRejected` carrying the AARE result and diagnostic. Any
    /// error aborts the association.
    pub fn process_aare(&mut self, pdu: &[u8]) -> DlmsResult<()> {
        let result = self.accept_aare(pdu);
        if let Err(e) = &result {
            self.abort(&e.to_string());
        }
        result
    }

    /// Build the `reply_to_hls` request carrying f(StoC)
    pub fn build_hls_request(&mut self) -> DlmsResult<Vec<u8>> {
        if !self.needs_hls() {
            return Err(DlmsError::Protocol("No HLS exchange pending".to_string()));
        }
        let frame_counter = self.next_invocation_counter()?;
        let server_challenge = self
            .server_challenge
            .as_deref()
            .ok_or_else(|| DlmsError::Protocol("No server challenge received".to_string()))?;
        let title = self.settings.system_title.as_deref().unwrap_or_default();
        let response = hls_response(&self.settings.suite, server_challenge, title, frame_counter)?;
        let request = encode_reply_to_hls_request(DEFAULT_INVOKE_ID_AND_PRIORITY, &response)?;
        self.seal_request(request)
    }

    /// Verify the server's f(CtoS)
    ///
    /// # Errors
    /// `AuthenticationFailed` if the server refused pass 3 or its own
    /// response does not verify. The association is aborted.
    pub fn process_hls_response(&mut self, pdu: &[u8]) -> DlmsResult<()> {
        let result = self.verify_hls(pdu);
        if let Err(e) = &result {
            warn!("HLS authentication failed: {}", e);
            self.events.emit(AssociationEvent::AuthenticationFailed { details: e.to_string() });
            self.abort(&e.to_string());
        }
        result
    }

    pub fn build_rlrq(&mut self) -> DlmsResult<Vec<u8>> {
        self.transition(AssociationState::Releasing)?;
        Rlrq::new(ReleaseRequestReason::Normal).encode()
    }

    pub fn process_rlre(&mut self, pdu: &[u8]) -> DlmsResult<()> {
        if self.state != AssociationState::Releasing {
            return Err(DlmsError::Protocol(format!("RLRE received in state {}", self.state)));
        }
        match Rlre::decode(pdu) {
            Ok(rlre) => {
                debug!("Release confirmed ({:?})", rlre.reason);
                self.transition(AssociationState::Closed)?;
                self.events.emit(AssociationEvent::Released);
                Ok(())
            }
            Err(e) => {
                self.abort(&e.to_string());
                Err(e)
            }
        }
    }

    /// Cipher a request in ciphered contexts
    pub fn seal_request(&mut self, apdu: Vec<u8>) -> DlmsResult<Vec<u8>> {
        match self.cipher.as_mut() {
            Some(cipher) if apdu.first().copied().and_then(glo_tag).is_some() => cipher.cipher(&apdu),
            _ => Ok(apdu),
        }
    }

    /// Decipher a glo response; plain APDUs such as exception responses
    /// pass through
    pub fn open_response(&mut self, pdu: &[u8]) -> DlmsResult<Vec<u8>> {
        match (self.cipher.as_mut(), pdu.first()) {
            (Some(cipher), Some(tag)) if is_glo_tag(*tag) => cipher.decipher(pdu),
            _ => Ok(pdu.to_vec()),
        }
    }

    pub fn abort(&mut self, reason: &str) {
        if !self.state.can_transition_to(AssociationState::Aborted) {
            return;
        }
        debug!("Association aborted: {}", reason);
        self.set_state(AssociationState::Aborted);
        self.events.emit(AssociationEvent::Aborted {
            reason: reason.to_string(),
        });
    }

    pub fn close(&mut self) {
        if matches!(
            self.state,
            AssociationState::AwaitingHandshake | AssociationState::Associated
        ) {
            self.abort("connection closed");
        }
        if self.state.can_transition_to(AssociationState::Closed) {
            self.set_state(AssociationState::Closed);
        }
    }

    fn accept_aare(&mut self, pdu: &[u8]) -> DlmsResult<()> {
        if self.state != AssociationState::AwaitingHandshake {
            return Err(DlmsError::Protocol(format!("AARE received in state {}", self.state)));
        }
        let aare = Aare::decode(pdu)?;
        if !aare.is_accepted() {
            let result = aare.result.value();
            let diagnostic = aare.result_source_diagnostic.value();
            let reason = match aare.user_information.as_deref().map(ConfirmedServiceError::decode) {
                Some(Ok(error)) => format!("initiate refused: {:?}", error.0),
                _ => format!("{:?}", aare.result_source_diagnostic),
            };
            warn!("Association rejected (result {}, diagnostic {}): {}", result, diagnostic, reason);
            self.events.emit(AssociationEvent::Rejected {
                result,
                diagnostic,
                reason,
            });
            return Err(DlmsError::AssociationRejected { result, diagnostic });
        }

        let mechanism = self.settings.suite.authentication_mechanism();
        if let Some(title) = &aare.responding_ap_title {
            self.server_system_title = Some(title.clone());
        }
        if let Some(cipher) = self.cipher.as_mut() {
            let title = self
                .server_system_title
                .as_deref()
                .ok_or_else(|| DlmsError::Security("Ciphered AARE without server system title".to_string()))?;
            cipher.set_peer_system_title(title)?;
        }
        if mechanism == AuthenticationMechanism::HlsGmac && self.server_system_title.is_none() {
            return Err(DlmsError::Security("HLS-GMAC AARE without server system title".to_string()));
        }

        let user_information = aare
            .user_information
            .as_deref()
            .ok_or_else(|| DlmsError::Protocol("AARE without InitiateResponse".to_string()))?;
        let initiate = self.open_response(user_information)?;
        let response = InitiateResponse::decode(&initiate)?;
        if let (Some(cipher), Some(key)) = (self.cipher.as_mut(), &self.dedicated_key) {
            cipher.use_dedicated_key(key);
        }

        if mechanism.is_hls() {
            let challenge = aare
                .responding_authentication_value
                .clone()
                .ok_or_else(|| DlmsError::Protocol("AARE without server challenge".to_string()))?;
            self.server_challenge = Some(challenge);
        }

        self.transition(AssociationState::Associated)?;
        self.authenticated = !mechanism.is_hls();
        info!(
            "Association established ({}, max PDU {})",
            response.negotiated_conformance, response.server_max_receive_pdu_size
        );
        self.events.emit(AssociationEvent::Established {
            conformance: response.negotiated_conformance,
            max_pdu_size: response.server_max_receive_pdu_size,
        });
        if self.authenticated {
            self.events.emit(AssociationEvent::Authenticated);
        }
        self.negotiated = Some(response);
        Ok(())
    }

    fn verify_hls(&mut self, pdu: &[u8]) -> DlmsResult<()> {
        if !self.needs_hls() {
            return Err(DlmsError::Protocol("No HLS exchange pending".to_string()));
        }
        let apdu = self.open_response(pdu)?;
        let server_response = decode_reply_to_hls_response(&apdu)?;
        let client_challenge = self
            .client_challenge
            .as_deref()
            .ok_or_else(|| DlmsError::Protocol("No client challenge sent".to_string()))?;
        let verified = verify_hls_response(
            &self.settings.suite,
            client_challenge,
            &server_response,
            self.server_system_title.as_deref(),
        )?;
        if !verified {
            return Err(DlmsError::AuthenticationFailed("f(CtoS) mismatch".to_string()));
        }
        self.authenticated = true;
        info!("Server authenticated");
        self.events.emit(AssociationEvent::Authenticated);
        Ok(())
    }

    fn next_invocation_counter(&mut self) -> DlmsResult<u32> {
        if let Some(cipher) = self.cipher.as_mut() {
            return cipher.next_invocation_counter();
        }
        let current = self.invocation_counter;
        self.invocation_counter = current
            .checked_add(1)
            .ok_or_else(|| DlmsError::Security("Invocation counter exhausted".to_string()))?;
        Ok(current)
    }

    fn transition(&mut self, next: AssociationState) -> DlmsResult<()> {
        self.state.validate_transition(next)?;
        self.set_state(next);
        Ok(())
    }

    fn set_state(&mut self, next: AssociationState) {
        let from = self.state;
        self.state = next;
        self.events.emit(AssociationEvent::StateChanged { from, to: next });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::association::server::{ServerAssociation, ServerAssociationSettings, ServerStep};
    use crate::association::ConnectionInfo;
    use crate::logical_device::LogicalDevice;
    use dlms_security::EncryptionMechanism;

    const CLIENT_TITLE: [u8; 8] = *b"CLI00001";

    fn hls_suite(mechanism: AuthenticationMechanism, key: u8, ciphered: bool) -> SecuritySuite {
        let mut builder = SecuritySuite::builder()
            .set_authentication_mechanism(mechanism)
            .set_authentication_key(vec![key; 16])
            .set_global_unicast_encryption_key(vec![0x42; 16]);
        if ciphered {
            builder = builder
                .set_encryption_mechanism(EncryptionMechanism::AesGcm128)
                .set_use_dedicated_key(true);
        }
        builder.build().unwrap()
    }

    fn server(client_id: u16, suite: SecuritySuite) -> ServerAssociation {
        let mut device = LogicalDevice::new(1, "meter", "XYZ", 7)
            .unwrap()
            .with_conformance(Conformance::GET | Conformance::SET | Conformance::ACTION);
        device.add_restriction(client_id, suite).unwrap();
        let mut server = ServerAssociation::new(
            ConnectionInfo::open(1, "loopback"),
            client_id,
            Some(Arc::new(device)),
            ServerAssociationSettings::default(),
        );
        server.start().unwrap();
        server
    }

    fn respond(server: &mut ServerAssociation, pdu: &[u8]) -> Vec<u8> {
        match server.handle_pdu(pdu).unwrap() {
            ServerStep::Respond(bytes) | ServerStep::RespondAndClose(bytes) => bytes,
            ServerStep::Dispatch(apdu) => panic!("unexpected dispatch of {:02X?}", apdu),
        }
    }

    fn associate(client: &mut ClientAssociation, server: &mut ServerAssociation) -> DlmsResult<()> {
        let aarq = client.build_aarq()?;
        let aare = respond(server, &aarq);
        client.process_aare(&aare)?;
        if client.needs_hls() {
            let request = client.build_hls_request()?;
            let response = respond(server, &request);
            client.process_hls_response(&response)?;
        }
        Ok(())
    }

    #[test]
    fn test_low_association_and_release() {
        let suite = SecuritySuite::low(b"secret".to_vec());
        let mut server = server(17, suite.clone());
        let mut client = ClientAssociation::new(ClientAssociationSettings::new(suite)).unwrap();
        associate(&mut client, &mut server).unwrap();

        assert!(client.is_authenticated());
        assert_eq!(
            client.negotiated_conformance(),
            Some(Conformance::GET | Conformance::SET | Conformance::ACTION)
        );
        assert_eq!(client.negotiated_max_pdu_size(), Some(DEFAULT_MAX_PDU_SIZE));

        let rlrq = client.build_rlrq().unwrap();
        let rlre = respond(&mut server, &rlrq);
        client.process_rlre(&rlre).unwrap();
        assert_eq!(client.state(), AssociationState::Closed);
        assert_eq!(server.state(), AssociationState::Closed);
    }

    #[test]
    fn test_rejection_surfaces_diagnostic() {
        let mut server = server(17, SecuritySuite::low(b"secret".to_vec()));
        let mut client = ClientAssociation::new(ClientAssociationSettings::new(SecuritySuite::low(b"nope".to_vec()))).unwrap();
        let err = associate(&mut client, &mut server).unwrap_err();
        assert!(matches!(err, DlmsError::AssociationRejected { result: 1, diagnostic: 13 }));
        assert_eq!(client.state(), AssociationState::Aborted);
    }

    #[test]
    fn test_hls_md5_four_pass() {
        let suite = hls_suite(AuthenticationMechanism::HlsMd5, 0x11, false);
        let mut server = server(18, suite.clone());
        let mut client = ClientAssociation::new(ClientAssociationSettings::new(suite)).unwrap();

        let aarq = client.build_aarq().unwrap();
        let aare = respond(&mut server, &aarq);
        client.process_aare(&aare).unwrap();
        assert!(client.needs_hls());
        assert!(!server.is_authenticated());

        // ordinary requests are refused until pass 3/4 completes
        let get = [0xC0, 0x01, 0xC1, 0x00, 0x08, 0x00, 0x00, 0x01, 0x00, 0x00, 0xFF, 0x02, 0x00];
        assert_eq!(respond(&mut server, &get), vec![0xD8, 0x01, 0x01]);

        let request = client.build_hls_request().unwrap();
        let response = respond(&mut server, &request);
        client.process_hls_response(&response).unwrap();
        assert!(client.is_authenticated());
        assert!(server.is_authenticated());
        assert_eq!(server.handle_pdu(&get).unwrap(), ServerStep::Dispatch(get.to_vec()));
    }

    #[test]
    fn test_hls_wrong_secret_is_refused() {
        let mut server = server(18, hls_suite(AuthenticationMechanism::HlsSha256, 0x11, false));
        let mut client =
            ClientAssociation::new(ClientAssociationSettings::new(hls_suite(AuthenticationMechanism::HlsSha256, 0x99, false)))
                .unwrap();
        let err = associate(&mut client, &mut server).unwrap_err();
        assert!(matches!(err, DlmsError::AuthenticationFailed(_)));
        assert_eq!(client.state(), AssociationState::Aborted);
        assert_eq!(server.state(), AssociationState::Aborted);
    }

    #[test]
    fn test_hls_gmac_needs_titles() {
        let suite = hls_suite(AuthenticationMechanism::HlsGmac, 0x11, false);
        assert!(ClientAssociation::new(ClientAssociationSettings::new(suite.clone())).is_err());

        let mut server = server(19, suite.clone());
        let settings = ClientAssociationSettings::new(suite).with_system_title(CLIENT_TITLE.to_vec());
        let mut client = ClientAssociation::new(settings).unwrap();
        associate(&mut client, &mut server).unwrap();
        assert!(client.is_authenticated());
        assert_eq!(client.server_system_title(), Some(&b"XYZ\x00\x00\x00\x00\x07"[..]));
    }

    #[test]
    fn test_ciphered_context_with_dedicated_key() {
        let suite = hls_suite(AuthenticationMechanism::HlsGmac, 0x11, true);
        let mut server = server(20, suite.clone());
        let settings = ClientAssociationSettings::new(suite).with_system_title(CLIENT_TITLE.to_vec());
        let mut client = ClientAssociation::new(settings).unwrap();
        associate(&mut client, &mut server).unwrap();
        assert!(server.is_authenticated());

        let get = vec![0xC0, 0x01, 0xC1, 0x00, 0x08, 0x00, 0x00, 0x01, 0x00, 0x00, 0xFF, 0x02, 0x00];
        let sealed = client.seal_request(get.clone()).unwrap();
        assert_eq!(sealed[0], 0xC8);
        assert_eq!(server.handle_pdu(&sealed).unwrap(), ServerStep::Dispatch(get));

        // replayed request
        assert_eq!(
            server.handle_pdu(&sealed).unwrap(),
            ServerStep::Respond(vec![0xD8, 0x01, 0x05])
        );

        let response = server.seal_response(vec![0xC4, 0x01, 0xC1, 0x00, 0x11, 0x05]).unwrap();
        assert_eq!(response[0], 0xCC);
        assert_eq!(client.open_response(&response).unwrap(), vec![0xC4, 0x01, 0xC1, 0x00, 0x11, 0x05]);
    }

    #[test]
    fn test_plain_request_in_ciphered_context_refused() {
        let suite = hls_suite(AuthenticationMechanism::HlsGmac, 0x11, true);
        let mut server = server(20, suite.clone());
        let settings = ClientAssociationSettings::new(suite).with_system_title(CLIENT_TITLE.to_vec());
        let mut client = ClientAssociation::new(settings).unwrap();
        associate(&mut client, &mut server).unwrap();
        assert_eq!(
            server.handle_pdu(&[0xC0, 0x01, 0xC1]).unwrap(),
            ServerStep::Respond(vec![0xD8, 0x01, 0x01])
        );
    }

    #[test]
    fn test_out_of_order_operations() {
        let mut client = ClientAssociation::new(ClientAssociationSettings::new(SecuritySuite::none())).unwrap();
        assert!(client.build_rlrq().is_err());
        assert!(client.build_hls_request().is_err());
        assert!(client.process_aare(&[0x61, 0x00]).is_err());
        assert_eq!(client.state(), AssociationState::Aborted);
        client.close();
        assert_eq!(client.state(), AssociationState::Closed);
    }
}
