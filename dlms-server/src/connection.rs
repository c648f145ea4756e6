//! Per-connection worker
//!
//! A worker owns one accepted transport for its whole life: it builds the
//! configured session layer, learns the client and logical device from the
//! first frame, drives a [`ServerAssociation`] and hands every request of an
//! established association to the [`RequestHandler`].

use crate::config::{ServerConfig, SessionProtocol};
use crate::handler::{ConnectionListener, RequestHandler};
use dlms_application::association::AssociationEventListener;
use dlms_application::{
    Association, ConnectionInfo, ExceptionResponse, LogicalDevice, ServerAssociation, ServerStep, ServiceError,
    StateError,
};
use dlms_core::{DlmsError, DlmsResult};
use dlms_session::{HdlcSession, SessionLayer, WrapperSession};
use dlms_transport::StreamAccessor;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::watch;

/// State shared by the listener and all its workers
pub(crate) struct ServerShared {
    pub config: ServerConfig,
    pub devices: HashMap<u16, Arc<LogicalDevice>>,
    pub handler: Arc<dyn RequestHandler>,
    pub connection_listeners: Vec<Arc<dyn ConnectionListener>>,
    pub event_listeners: Vec<Arc<dyn AssociationEventListener>>,
}

/// Holds one slot of the admission count until the worker ends
pub(crate) struct ActiveGuard(Arc<AtomicUsize>);

impl ActiveGuard {
    pub fn acquire(active: &Arc<AtomicUsize>) -> Self {
        active.fetch_add(1, Ordering::SeqCst);
        Self(active.clone())
    }
}

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

enum WorkerEvent {
    Pdu(Vec<u8>),
    Idle,
    Shutdown,
}

pub(crate) struct ConnectionWorker {
    shared: Arc<ServerShared>,
    info: ConnectionInfo,
    shutdown: watch::Receiver<bool>,
    _active: Option<ActiveGuard>,
}

impl ConnectionWorker {
    pub fn new(
        shared: Arc<ServerShared>,
        connection_id: u64,
        remote_address: impl Into<String>,
        shutdown: watch::Receiver<bool>,
        active: Option<ActiveGuard>,
    ) -> Self {
        Self {
            shared,
            info: ConnectionInfo::open(connection_id, remote_address),
            shutdown,
            _active: active,
        }
    }

    /// Serve the connection until it is released, aborted or shut down
    pub async fn run<T>(mut self, transport: T)
    where
        T: StreamAccessor + 'static,
    {
        let connection_id = self.info.connection_id;
        log::info!("Connection {} opened from {}", connection_id, self.info.remote_address);
        self.notify_status();

        let result = match self.shared.config.session {
            SessionProtocol::Wrapper => self.serve(WrapperSession::server(transport)).await,
            SessionProtocol::Hdlc => match self.accept_hdlc(transport).await {
                Ok(Some(session)) => self.serve(session).await,
                Ok(None) => Ok(()),
                Err(e) => Err(e),
            },
        };

        match result {
            Ok(()) => log::info!("Connection {} closed", connection_id),
            Err(e) if e.is_local_fault() => log::error!("Connection {} failed: {}", connection_id, e),
            Err(e) => log::warn!("Connection {} aborted: {}", connection_id, e),
        }
        self.info = self.info.closed();
        self.notify_status();
    }

    async fn accept_hdlc<T>(&mut self, transport: T) -> DlmsResult<Option<HdlcSession<T>>>
    where
        T: StreamAccessor + 'static,
    {
        let config = &self.shared.config;
        let parameters = config.hdlc_parameters()?;
        let accept = HdlcSession::accept(transport, parameters, config.hdlc.server_address);
        let timeout = config.inactivity_timeout();
        tokio::select! {
            _ = wait_for_shutdown(&mut self.shutdown) => Ok(None),
            result = with_optional_timeout(timeout, accept) => match result {
                Some(session) => session.map(Some),
                None => {
                    log::debug!("Connection {}: no SNRM before the inactivity timeout", self.info.connection_id);
                    Ok(None)
                }
            },
        }
    }

    async fn serve<S: SessionLayer>(&mut self, mut session: S) -> DlmsResult<()> {
        let result = self.run_session(&mut session).await;
        if let Err(e) = session.close().await {
            log::debug!("Connection {}: close failed: {}", self.info.connection_id, e);
        }
        result
    }

    async fn run_session<S: SessionLayer>(&mut self, session: &mut S) -> DlmsResult<()> {
        let first = match self.next_event(session).await? {
            WorkerEvent::Pdu(pdu) => pdu,
            WorkerEvent::Idle | WorkerEvent::Shutdown => return Ok(()),
        };

        let client_id = session
            .client_id()
            .ok_or_else(|| DlmsError::Protocol("Client address unknown after first frame".to_string()))?;
        let device_id = session.logical_device_id();
        let device = device_id.and_then(|id| self.shared.devices.get(&id).cloned());
        if device.is_none() {
            log::warn!(
                "Connection {}: client {} addressed unknown logical device {:?}",
                self.info.connection_id,
                client_id,
                device_id
            );
        }
        self.info = self.info.clone().with_addresses(client_id, device_id);
        self.notify_status();

        let mut association = ServerAssociation::new(
            self.info.clone(),
            client_id,
            device,
            self.shared.config.association_settings(),
        );
        for listener in &self.shared.event_listeners {
            association.add_listener(listener.clone());
        }
        association.start()?;

        let result = self.drive(session, &mut association, first).await;
        if let Err(e) = &result {
            association.abort(&e.to_string());
        }
        association.close();
        result
    }

    async fn drive<S: SessionLayer>(
        &mut self,
        session: &mut S,
        association: &mut ServerAssociation,
        first: Vec<u8>,
    ) -> DlmsResult<()> {
        let mut pdu = first;
        let mut record: Option<Association> = None;
        loop {
            match association.handle_pdu(&pdu)? {
                ServerStep::Respond(response) => session.send(&response).await?,
                ServerStep::RespondAndClose(response) => {
                    session.send(&response).await?;
                    return Ok(());
                }
                ServerStep::Dispatch(request) => {
                    for listener in &self.shared.connection_listeners {
                        listener.before_dispatch(self.info.connection_id, &request);
                    }
                    if record.is_none() {
                        record = association.association();
                    }
                    let snapshot = record
                        .as_ref()
                        .ok_or_else(|| DlmsError::Protocol("Request without association".to_string()))?;
                    let response = self.dispatch(snapshot, &request).await;
                    let sealed = association.seal_response(response)?;
                    session.send(&sealed).await?;
                }
            }

            pdu = match self.next_event(session).await? {
                WorkerEvent::Pdu(pdu) => pdu,
                WorkerEvent::Idle => {
                    log::info!("Connection {}: inactivity timeout", self.info.connection_id);
                    association.abort("inactivity timeout");
                    return Ok(());
                }
                WorkerEvent::Shutdown => {
                    if let Some(rlre) = association.shutdown()? {
                        if let Err(e) = session.send(&rlre).await {
                            log::debug!("Connection {}: RLRE not delivered: {}", self.info.connection_id, e);
                        }
                    }
                    return Ok(());
                }
            };
        }
    }

    async fn dispatch(&self, association: &Association, request: &[u8]) -> Vec<u8> {
        match self.shared.handler.handle_request(association, request).await {
            Ok(response) => response,
            Err(e) => {
                log::warn!("Connection {}: request handler failed: {}", self.info.connection_id, e);
                ExceptionResponse::new(StateError::ServiceNotAllowed, ServiceError::OperationNotPossible).encode()
            }
        }
    }

    async fn next_event<S: SessionLayer>(&mut self, session: &mut S) -> DlmsResult<WorkerEvent> {
        let timeout = self.shared.config.inactivity_timeout();
        tokio::select! {
            _ = wait_for_shutdown(&mut self.shutdown) => Ok(WorkerEvent::Shutdown),
            result = with_optional_timeout(timeout, session.receive()) => match result {
                Some(pdu) => pdu.map(WorkerEvent::Pdu),
                None => Ok(WorkerEvent::Idle),
            },
        }
    }

    fn notify_status(&self) {
        for listener in &self.shared.connection_listeners {
            listener.connection_changed(&self.info);
        }
    }
}

/// Resolves once shutdown is signalled or the listener is gone
async fn wait_for_shutdown(shutdown: &mut watch::Receiver<bool>) {
    // an Err means the sender was dropped, which also ends the worker
    let _ = shutdown.wait_for(|stop| *stop).await;
}

/// `None` when the timeout elapsed first
async fn with_optional_timeout<F: std::future::Future>(timeout: Option<Duration>, future: F) -> Option<F::Output> {
    match timeout {
        Some(duration) => tokio::time::timeout(duration, future).await.ok(),
        None => Some(future.await),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::{MockConnectionListener, UnsupportedServiceHandler};
    use dlms_application::{ClientAssociation, ClientAssociationSettings, ConnectionStatus};
    use dlms_security::SecuritySuite;
    use dlms_transport::IoTransport;
    use tokio::io::DuplexStream;

    const PUBLIC_CLIENT: u16 = 16;
    const LOW_CLIENT: u16 = 17;

    fn devices() -> HashMap<u16, Arc<LogicalDevice>> {
        let mut device = LogicalDevice::new(1, "meter", "ABC", 1).unwrap();
        device.add_restriction(PUBLIC_CLIENT, SecuritySuite::none()).unwrap();
        device.add_restriction(LOW_CLIENT, SecuritySuite::low(b"secret".to_vec())).unwrap();
        HashMap::from([(1, Arc::new(device))])
    }

    fn shared(config: ServerConfig, listener: Option<MockConnectionListener>) -> Arc<ServerShared> {
        let connection_listeners = listener
            .into_iter()
            .map(|l| Arc::new(l) as Arc<dyn ConnectionListener>)
            .collect();
        Arc::new(ServerShared {
            config,
            devices: devices(),
            handler: Arc::new(UnsupportedServiceHandler),
            connection_listeners,
            event_listeners: Vec::new(),
        })
    }

    fn spawn_worker(
        shared: Arc<ServerShared>,
    ) -> (
        WrapperSession<IoTransport<DuplexStream>>,
        watch::Sender<bool>,
        tokio::task::JoinHandle<()>,
    ) {
        let (client_io, server_io) = tokio::io::duplex(4096);
        let (stop_tx, stop_rx) = watch::channel(false);
        let worker = ConnectionWorker::new(shared, 1, "duplex", stop_rx, None);
        let handle = tokio::spawn(worker.run(IoTransport::new(server_io)));
        (WrapperSession::client(IoTransport::new(client_io), PUBLIC_CLIENT, 1), stop_tx, handle)
    }

    async fn associate<S: SessionLayer>(session: &mut S) -> ClientAssociation {
        let mut client = ClientAssociation::new(ClientAssociationSettings::new(SecuritySuite::none())).unwrap();
        session.send(&client.build_aarq().unwrap()).await.unwrap();
        let aare = session.receive().await.unwrap();
        client.process_aare(&aare).unwrap();
        client
    }

    #[tokio::test]
    async fn test_associate_dispatch_release() {
        let mut listener = MockConnectionListener::new();
        listener
            .expect_connection_changed()
            .withf(|info| info.status == ConnectionStatus::Open)
            .times(2)
            .return_const(());
        listener
            .expect_connection_changed()
            .withf(|info| info.status == ConnectionStatus::Closed && info.client_id == Some(PUBLIC_CLIENT))
            .times(1)
            .return_const(());
        listener
            .expect_before_dispatch()
            .withf(|id, request| *id == 1 && request[0] == 0xC0)
            .times(1)
            .return_const(());

        let (mut session, _stop, handle) = spawn_worker(shared(ServerConfig::default(), Some(listener)));
        let mut client = associate(&mut session).await;
        assert!(client.is_authenticated());

        session.send(&[0xC0, 0x01, 0xC1, 0x00, 0x08]).await.unwrap();
        assert_eq!(session.receive().await.unwrap(), vec![0xD8, 0x02, 0x02]);

        session.send(&client.build_rlrq().unwrap()).await.unwrap();
        let rlre = session.receive().await.unwrap();
        client.process_rlre(&rlre).unwrap();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_rejected_association_closes_connection() {
        let (client_io, server_io) = tokio::io::duplex(4096);
        let (_stop_tx, stop_rx) = watch::channel(false);
        let worker = ConnectionWorker::new(shared(ServerConfig::default(), None), 2, "duplex", stop_rx, None);
        let handle = tokio::spawn(worker.run(IoTransport::new(server_io)));
        let mut session = WrapperSession::client(IoTransport::new(client_io), LOW_CLIENT, 1);

        let settings = ClientAssociationSettings::new(SecuritySuite::low(b"secret2".to_vec()));
        let mut client = ClientAssociation::new(settings).unwrap();
        session.send(&client.build_aarq().unwrap()).await.unwrap();
        let aare = session.receive().await.unwrap();
        assert!(matches!(
            client.process_aare(&aare),
            Err(DlmsError::AssociationRejected { diagnostic: 13, .. })
        ));
        handle.await.unwrap();
        assert!(session.receive().await.is_err());
    }

    #[tokio::test]
    async fn test_inactivity_timeout_aborts() {
        let config = ServerConfig {
            inactivity_timeout_ms: 50,
            ..ServerConfig::default()
        };
        let (mut session, _stop, handle) = spawn_worker(shared(config, None));
        associate(&mut session).await;
        handle.await.unwrap();
        assert!(session.receive().await.is_err());
    }

    #[tokio::test]
    async fn test_shutdown_releases_association() {
        let (mut session, stop, handle) = spawn_worker(shared(ServerConfig::default(), None));
        let mut client = associate(&mut session).await;
        stop.send_replace(true);
        let rlre = session.receive().await.unwrap();
        assert_eq!(rlre[0], 0x63);
        handle.await.unwrap();
        client.close();
    }

    #[tokio::test]
    async fn test_bad_wrapper_version_ends_worker() {
        let mut listener = MockConnectionListener::new();
        listener.expect_connection_changed().times(2).return_const(());
        listener.expect_before_dispatch().never();

        let stream = tokio_test::io::Builder::new()
            .read(&[0x00, 0x02, 0x00, 0x10, 0x00, 0x01, 0x00, 0x00])
            .build();
        let (_stop_tx, stop_rx) = watch::channel(false);
        let worker = ConnectionWorker::new(shared(ServerConfig::default(), Some(listener)), 3, "mock", stop_rx, None);
        worker.run(IoTransport::new(stream)).await;
    }

    #[test]
    fn test_active_guard() {
        let active = Arc::new(AtomicUsize::new(0));
        let guard = ActiveGuard::acquire(&active);
        let second = ActiveGuard::acquire(&active);
        assert_eq!(active.load(Ordering::SeqCst), 2);
        drop(guard);
        drop(second);
        assert_eq!(active.load(Ordering::SeqCst), 0);
    }
}
