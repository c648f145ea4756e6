//! Server side of the association handshake
//!
//! [`ServerAssociation`] is a pure state machine: the connection worker
//! feeds it every received APDU and performs whatever [`ServerStep`] it
//! returns. It never touches the transport itself.
//!
//! # AARQ evaluation order
//!
//! 1. logical device exists (`no-reason-given`)
//! 2. application context matches the referencing method
//!    (`application-context-name-not-supported`)
//! 3. client id is registered (`authentication-failure`)
//! 4. context ciphering matches the client's suite
//!    (`application-context-name-not-supported`)
//! 5. mechanism name matches the suite
//!    (`authentication-mechanism-name-required` / `-not-recognised`)
//! 6. credential check (`authentication-failure`)
//! 7. calling AP title when ciphering or GMAC needs it
//!    (`calling-AP-title-not-recognized`)
//! 8. InitiateRequest negotiation (`no-reason-given` with a
//!    ConfirmedServiceError in the user-information)

use super::ciphering::{CipherContext, glo_tag, is_glo_tag};
use super::events::{AssociationEvent, AssociationEventListener, EventsEmitter};
use super::hls::{decode_reply_to_hls_request, encode_reply_to_hls_response};
use super::state::AssociationState;
use super::{Association, ConnectionInfo};
use crate::conformance::Conformance;
use crate::exception::{ExceptionResponse, ServiceError, StateError};
use crate::initiate::{
    ConfirmedServiceError, DEFAULT_MAX_PDU_SIZE, DLMS_VERSION, InitiateError, InitiateRequest, InitiateResponse, MIN_PDU_SIZE,
};
use crate::logical_device::LogicalDevice;
use dlms_asn1::{
    AcseServiceUserDiagnostic, Aare, Aarq, ApplicationContextName, AssociationResult, MechanismName,
    ReleaseResponseReason, Rlre, Rlrq,
};
use dlms_core::{DlmsError, DlmsResult};
use dlms_security::{
    AuthOutcome, AuthenticationMechanism, SYSTEM_TITLE_LENGTH, SecuritySuite, authenticate, generate_challenge,
    hls_response, verify_hls_response,
};
use log::{debug, info, warn};
use std::sync::Arc;

const AARQ_TAG: u8 = 0x60;
const RLRQ_TAG: u8 = 0x62;
const DEDICATED_KEY_LENGTH: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServerAssociationSettings {
    /// Logical name referencing; short name otherwise
    pub logical_name: bool,
    /// Length of the StoC challenge for HLS mechanisms
    pub challenge_length: usize,
    /// Server-wide cap on the negotiated max PDU size
    pub max_pdu_size: u16,
}

impl Default for ServerAssociationSettings {
    fn default() -> Self {
        Self {
            logical_name: true,
            challenge_length: 16,
            max_pdu_size: DEFAULT_MAX_PDU_SIZE,
        }
    }
}

/// What the connection worker does with a received APDU
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerStep {
    /// Send the APDU and keep serving
    Respond(Vec<u8>),
    /// Send the APDU, then close the connection
    RespondAndClose(Vec<u8>),
    /// Hand the deciphered request to the application
    Dispatch(Vec<u8>),
}

#[derive(Debug)]
struct Negotiated {
    suite: SecuritySuite,
    context: ApplicationContextName,
    conformance: Conformance,
    max_pdu_size: u16,
    system_title: [u8; SYSTEM_TITLE_LENGTH],
}

#[derive(Debug)]
struct PendingHls {
    server_challenge: Vec<u8>,
    client_challenge: Vec<u8>,
    client_system_title: Option<Vec<u8>>,
}

struct Acceptance {
    negotiated: Negotiated,
    mechanism: AuthenticationMechanism,
    pending_hls: Option<PendingHls>,
    cipher: Option<CipherContext>,
    user_information: Vec<u8>,
}

struct Rejection {
    result: AssociationResult,
    diagnostic: AcseServiceUserDiagnostic,
    user_information: Option<Vec<u8>>,
    reason: String,
}

impl Rejection {
    fn new(diagnostic: AcseServiceUserDiagnostic, reason: impl Into<String>) -> Self {
        Self {
            result: AssociationResult::RejectedPermanent,
            diagnostic,
            user_information: None,
            reason: reason.into(),
        }
    }

    fn initiate(error: InitiateError, reason: impl Into<String>) -> Self {
        Self {
            user_information: Some(ConfirmedServiceError(error).encode()),
            ..Self::new(AcseServiceUserDiagnostic::NoReasonGiven, reason)
        }
    }
}

/// Local faults while evaluating an AARQ reject it transiently
impl From<DlmsError> for Rejection {
    fn from(error: DlmsError) -> Self {
        Self {
            result: AssociationResult::RejectedTransient,
            ..Self::new(AcseServiceUserDiagnostic::NoReasonGiven, error.to_string())
        }
    }
}

/// One association on the server side of a connection
#[derive(Debug)]
pub struct ServerAssociation {
    info: ConnectionInfo,
    client_id: u16,
    device: Option<Arc<LogicalDevice>>,
    settings: ServerAssociationSettings,
    state: AssociationState,
    events: EventsEmitter,
    negotiated: Option<Negotiated>,
    pending_hls: Option<PendingHls>,
    cipher: Option<CipherContext>,
    invocation_counter: u32,
}

impl ServerAssociation {
    /// `device` is `None` when the client addressed an unknown logical
    /// device; the AARQ is then rejected.
    pub fn new(
        info: ConnectionInfo,
        client_id: u16,
        device: Option<Arc<LogicalDevice>>,
        settings: ServerAssociationSettings,
    ) -> Self {
        let info = info.with_addresses(client_id, device.as_ref().map(|d| d.id()));
        Self {
            info,
            client_id,
            device,
            settings,
            state: AssociationState::Idle,
            events: EventsEmitter::new(),
            negotiated: None,
            pending_hls: None,
            cipher: None,
            invocation_counter: 1,
        }
    }

    pub fn add_listener(&mut self, listener: Arc<dyn AssociationEventListener>) {
        self.events.add_listener(listener);
    }

    pub fn state(&self) -> AssociationState {
        self.state
    }

    pub fn connection_id(&self) -> u64 {
        self.info.connection_id
    }

    pub fn client_id(&self) -> u16 {
        self.client_id
    }

    /// Associated and, for HLS, pass 3/4 completed
    pub fn is_authenticated(&self) -> bool {
        self.state.is_active() && self.pending_hls.is_none()
    }

    /// Record of the established association
    pub fn association(&self) -> Option<Association> {
        let negotiated = self.negotiated.as_ref()?;
        Some(Association {
            connection_id: self.info.connection_id,
            client_id: self.client_id,
            logical_device_id: self.device.as_ref().map(|d| d.id())?,
            security: negotiated.suite.clone(),
            application_context: negotiated.context,
            conformance: negotiated.conformance,
            max_pdu_size: negotiated.max_pdu_size,
            state: self.state,
            authenticated: self.pending_hls.is_none(),
            connection: self.info.clone(),
        })
    }

    /// The session is up; wait for the AARQ
    pub fn start(&mut self) -> DlmsResult<()> {
        self.transition(AssociationState::AwaitingHandshake)
    }

    /// Process one APDU received from the client
    ///
    /// # Errors
    /// Malformed APDUs and protocol violations. The association is
    /// aborted before the error is returned.
    pub fn handle_pdu(&mut self, pdu: &[u8]) -> DlmsResult<ServerStep> {
        let result = self.route_pdu(pdu);
        if let Err(e) = &result {
            self.abort(&e.to_string());
        }
        result
    }

    /// Cipher a response in ciphered contexts
    pub fn seal_response(&mut self, apdu: Vec<u8>) -> DlmsResult<Vec<u8>> {
        match self.cipher.as_mut() {
            Some(cipher) if apdu.first().copied().and_then(glo_tag).is_some() => cipher.cipher(&apdu),
            _ => Ok(apdu),
        }
    }

    /// Wind the association down for a server shutdown
    ///
    /// Returns the RLRE to send when the association was established.
    pub fn shutdown(&mut self) -> DlmsResult<Option<Vec<u8>>> {
        if self.state != AssociationState::Associated {
            self.abort("server shutdown");
            return Ok(None);
        }
        self.transition(AssociationState::Releasing)?;
        let rlre = Rlre::new(ReleaseResponseReason::Normal).encode()?;
        self.transition(AssociationState::Closed)?;
        self.events.emit(AssociationEvent::Released);
        Ok(Some(rlre))
    }

    /// Abort on a transport fault, timeout or protocol error
    pub fn abort(&mut self, reason: &str) {
        if !self.state.can_transition_to(AssociationState::Aborted) {
            return;
        }
        debug!("Connection {}: association aborted: {}", self.info.connection_id, reason);
        self.set_state(AssociationState::Aborted);
        self.events.emit(AssociationEvent::Aborted {
            reason: reason.to_string(),
        });
    }

    /// The transport is gone
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

    fn route_pdu(&mut self, pdu: &[u8]) -> DlmsResult<ServerStep> {
        let tag = *pdu
            .first()
            .ok_or_else(|| DlmsError::InvalidData("Empty APDU".to_string()))?;
        match (self.state, tag) {
            (AssociationState::AwaitingHandshake, AARQ_TAG) => self.handle_aarq(pdu),
            (AssociationState::Associated, RLRQ_TAG) => self.handle_rlrq(pdu),
            (AssociationState::AwaitingHandshake | AssociationState::Associated, AARQ_TAG | RLRQ_TAG)
            | (AssociationState::AwaitingHandshake, _) => {
                debug!(
                    "Connection {}: APDU 0x{:02X} not allowed in state {}",
                    self.info.connection_id, tag, self.state
                );
                Ok(ServerStep::Respond(ExceptionResponse::service_not_allowed().encode()))
            }
            (AssociationState::Associated, _) => self.handle_request(pdu),
            (state, _) => Err(DlmsError::Protocol(format!(
                "Unexpected APDU 0x{:02X} in state {}",
                tag, state
            ))),
        }
    }

    fn handle_aarq(&mut self, pdu: &[u8]) -> DlmsResult<ServerStep> {
        let aarq = Aarq::decode(pdu)?;
        match self.evaluate_aarq(&aarq) {
            Ok(acceptance) => self.accept(&aarq, acceptance),
            Err(rejection) => self.reject(&aarq, rejection),
        }
    }

    fn evaluate_aarq(&self, aarq: &Aarq) -> Result<Acceptance, Rejection> {
        use AcseServiceUserDiagnostic::*;

        let device = self
            .device
            .as_ref()
            .ok_or_else(|| Rejection::new(NoReasonGiven, "unknown logical device"))?;

        let context = aarq
            .context()
            .filter(|c| c.is_logical_name() == self.settings.logical_name)
            .ok_or_else(|| {
                Rejection::new(
                    ApplicationContextNameNotSupported,
                    format!("application context {} not supported", aarq.application_context_name),
                )
            })?;

        let suite = device.resolve_client(self.client_id).ok_or_else(|| {
            Rejection::new(
                AuthenticationFailure,
                format!("client {} not registered on logical device {}", self.client_id, device.id()),
            )
        })?;

        if context.is_ciphered() != suite.is_ciphered() {
            return Err(Rejection::new(
                ApplicationContextNameNotSupported,
                format!("{:?} does not match the client's encryption settings", context),
            ));
        }

        let expected = suite.authentication_mechanism();
        let mechanism = match (&aarq.mechanism_name, aarq.mechanism()) {
            (None, _) if expected != AuthenticationMechanism::None => {
                return Err(Rejection::new(
                    AuthenticationMechanismNameRequired,
                    format!("{:?} required but no mechanism name sent", expected),
                ));
            }
            (None, _) => AuthenticationMechanism::None,
            (Some(_), Some(name)) => AuthenticationMechanism::from_id(name.id()).map_err(|_| {
                Rejection::new(
                    AuthenticationMechanismNameNotRecognised,
                    format!("unknown mechanism id {}", name.id()),
                )
            })?,
            (Some(oid), None) => {
                return Err(Rejection::new(
                    AuthenticationMechanismNameNotRecognised,
                    format!("unknown mechanism {}", oid),
                ));
            }
        };
        if mechanism != expected {
            return Err(Rejection::new(
                AuthenticationMechanismNameNotRecognised,
                format!("{:?} proposed, {:?} configured", mechanism, expected),
            ));
        }
        if mechanism.is_hls() && !context.is_logical_name() {
            return Err(Rejection::new(
                AuthenticationMechanismNameNotRecognised,
                "HLS requires logical name referencing",
            ));
        }

        if let AuthOutcome::Reject(reason) =
            authenticate(&suite, mechanism, aarq.calling_authentication_value.as_deref())
        {
            return Err(Rejection::new(AuthenticationFailure, reason.to_string()));
        }

        let needs_title = context.is_ciphered() || mechanism == AuthenticationMechanism::HlsGmac;
        let client_system_title = match &aarq.calling_ap_title {
            Some(title) if title.len() == SYSTEM_TITLE_LENGTH => Some(title.clone()),
            None if !needs_title => None,
            _ => {
                return Err(Rejection::new(
                    CallingApTitleNotRecognized,
                    "missing or malformed client system title",
                ));
            }
        };

        let system_title = device.system_title();
        let mut cipher = if context.is_ciphered() {
            Some(CipherContext::new(&suite, &system_title, client_system_title.as_deref())?)
        } else {
            None
        };

        let user_information = aarq
            .user_information
            .as_deref()
            .ok_or_else(|| Rejection::new(NoReasonGiven, "AARQ without InitiateRequest"))?;
        let initiate = match cipher.as_mut() {
            Some(cipher) => cipher.decipher(user_information).map_err(|e| {
                Rejection::new(NoReasonGiven, format!("cannot decipher InitiateRequest: {}", e))
            })?,
            None => user_information.to_vec(),
        };
        let request = InitiateRequest::decode(&initiate)
            .map_err(|e| Rejection::initiate(InitiateError::Other, format!("malformed InitiateRequest: {}", e)))?;

        if request.dlms_version < DLMS_VERSION {
            return Err(Rejection::initiate(
                InitiateError::DlmsVersionTooLow,
                format!("DLMS version {} proposed", request.dlms_version),
            ));
        }
        let conformance = request.proposed_conformance & device.conformance();
        if conformance.is_empty() {
            return Err(Rejection::initiate(
                InitiateError::IncompatibleConformance,
                format!("no common service in {}", request.proposed_conformance),
            ));
        }
        if request.client_max_receive_pdu_size < MIN_PDU_SIZE {
            return Err(Rejection::initiate(
                InitiateError::PduSizeTooShort,
                format!("client max receive PDU size {}", request.client_max_receive_pdu_size),
            ));
        }
        let max_pdu_size = request
            .client_max_receive_pdu_size
            .min(device.max_pdu_size())
            .min(self.settings.max_pdu_size);

        let dedicated_key = match request.dedicated_key {
            Some(key) if cipher.is_some() => {
                if key.len() != DEDICATED_KEY_LENGTH {
                    return Err(Rejection::initiate(
                        InitiateError::Other,
                        format!("dedicated key of {} bytes", key.len()),
                    ));
                }
                Some(key)
            }
            Some(_) => {
                debug!("Ignoring dedicated key in an unciphered context");
                None
            }
            None => None,
        };

        let response = InitiateResponse::new(conformance, max_pdu_size, context.is_logical_name()).encode();
        let user_information = match cipher.as_mut() {
            Some(cipher) => {
                let ciphered = cipher.cipher(&response)?;
                if let Some(key) = &dedicated_key {
                    cipher.use_dedicated_key(key);
                }
                ciphered
            }
            None => response,
        };

        let pending_hls = if mechanism.is_hls() {
            Some(PendingHls {
                server_challenge: generate_challenge(self.settings.challenge_length)?,
                client_challenge: aarq.calling_authentication_value.clone().unwrap_or_default(),
                client_system_title,
            })
        } else {
            None
        };

        Ok(Acceptance {
            negotiated: Negotiated {
                suite,
                context,
                conformance,
                max_pdu_size,
                system_title,
            },
            mechanism,
            pending_hls,
            cipher,
            user_information,
        })
    }

    fn accept(&mut self, aarq: &Aarq, acceptance: Acceptance) -> DlmsResult<ServerStep> {
        let Acceptance {
            negotiated,
            mechanism,
            pending_hls,
            cipher,
            user_information,
        } = acceptance;

        let mut aare = Aare::accepted(aarq.application_context_name.clone()).with_user_information(user_information);
        if negotiated.context.is_ciphered() || mechanism == AuthenticationMechanism::HlsGmac {
            aare = aare.with_responding_ap_title(negotiated.system_title.to_vec());
        }
        if let Some(hls) = &pending_hls {
            aare = aare.with_mechanism(MechanismName::new(mechanism.id()), Some(hls.server_challenge.clone()));
        }
        let encoded = aare.encode()?;

        self.transition(AssociationState::Associated)?;
        info!(
            "Connection {}: client {} associated ({:?}, {:?}, max PDU {})",
            self.info.connection_id, self.client_id, negotiated.context, mechanism, negotiated.max_pdu_size
        );
        self.events.emit(AssociationEvent::Established {
            conformance: negotiated.conformance,
            max_pdu_size: negotiated.max_pdu_size,
        });
        self.negotiated = Some(negotiated);
        self.pending_hls = pending_hls;
        self.cipher = cipher;
        Ok(ServerStep::Respond(encoded))
    }

    fn reject(&mut self, aarq: &Aarq, rejection: Rejection) -> DlmsResult<ServerStep> {
        warn!(
            "Connection {}: AARQ from client {} rejected: {}",
            self.info.connection_id, self.client_id, rejection.reason
        );
        let mut aare = Aare::rejected(
            aarq.application_context_name.clone(),
            rejection.result,
            rejection.diagnostic,
        );
        if let Some(user_information) = rejection.user_information {
            aare = aare.with_user_information(user_information);
        }
        let encoded = aare.encode()?;
        self.events.emit(AssociationEvent::Rejected {
            result: rejection.result.value(),
            diagnostic: rejection.diagnostic.value(),
            reason: rejection.reason.clone(),
        });
        self.abort(&rejection.reason);
        Ok(ServerStep::RespondAndClose(encoded))
    }

    fn handle_request(&mut self, pdu: &[u8]) -> DlmsResult<ServerStep> {
        let apdu = match self.cipher.as_mut() {
            Some(_) if !is_glo_tag(pdu[0]) => {
                debug!("Connection {}: plain APDU in a ciphered context", self.info.connection_id);
                return Ok(ServerStep::Respond(ExceptionResponse::service_not_allowed().encode()));
            }
            Some(cipher) => match cipher.decipher(pdu) {
                Ok(apdu) => apdu,
                Err(e) => {
                    warn!("Connection {}: cannot decipher request: {}", self.info.connection_id, e);
                    let exception = ExceptionResponse::new(StateError::ServiceNotAllowed, ServiceError::DecipheringError);
                    return Ok(ServerStep::Respond(exception.encode()));
                }
            },
            None => pdu.to_vec(),
        };

        if self.pending_hls.is_some() {
            return self.handle_reply_to_hls(&apdu);
        }
        Ok(ServerStep::Dispatch(apdu))
    }

    fn handle_reply_to_hls(&mut self, apdu: &[u8]) -> DlmsResult<ServerStep> {
        let Some((invoke_id, client_response)) = decode_reply_to_hls_request(apdu)? else {
            debug!(
                "Connection {}: request refused before HLS completed",
                self.info.connection_id
            );
            return Ok(ServerStep::Respond(ExceptionResponse::service_not_allowed().encode()));
        };
        let hls = self
            .pending_hls
            .take()
            .ok_or_else(|| DlmsError::Protocol("No HLS exchange pending".to_string()))?;
        let negotiated = self
            .negotiated
            .as_ref()
            .ok_or_else(|| DlmsError::Protocol("HLS without negotiated association".to_string()))?;

        let verified = verify_hls_response(
            &negotiated.suite,
            &hls.server_challenge,
            &client_response,
            hls.client_system_title.as_deref(),
        )?;
        if !verified {
            warn!(
                "Connection {}: client {} failed HLS pass 3",
                self.info.connection_id, self.client_id
            );
            self.events.emit(AssociationEvent::AuthenticationFailed {
                details: "f(StoC) mismatch".to_string(),
            });
            let refusal = encode_reply_to_hls_response(invoke_id, None)?;
            let refusal = self.seal_response(refusal)?;
            self.abort("HLS authentication failed");
            return Ok(ServerStep::RespondAndClose(refusal));
        }

        let frame_counter = self.next_invocation_counter()?;
        let negotiated = self
            .negotiated
            .as_ref()
            .ok_or_else(|| DlmsError::Protocol("HLS without negotiated association".to_string()))?;
        let server_response = hls_response(
            &negotiated.suite,
            &hls.client_challenge,
            &negotiated.system_title,
            frame_counter,
        )?;
        let response = encode_reply_to_hls_response(invoke_id, Some(&server_response))?;
        info!(
            "Connection {}: client {} authenticated",
            self.info.connection_id, self.client_id
        );
        self.events.emit(AssociationEvent::Authenticated);
        Ok(ServerStep::Respond(self.seal_response(response)?))
    }

    fn handle_rlrq(&mut self, pdu: &[u8]) -> DlmsResult<ServerStep> {
        let rlrq = Rlrq::decode(pdu)?;
        debug!(
            "Connection {}: release requested ({:?})",
            self.info.connection_id, rlrq.reason
        );
        self.transition(AssociationState::Releasing)?;
        let rlre = Rlre::new(ReleaseResponseReason::Normal).encode()?;
        self.transition(AssociationState::Closed)?;
        self.events.emit(AssociationEvent::Released);
        Ok(ServerStep::RespondAndClose(rlre))
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
}
