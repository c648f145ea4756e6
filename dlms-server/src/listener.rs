//! DLMS/COSEM server listener implementation
//!
//! This module provides server-side connection listening and acceptance
//! functionality: admission control against `max_clients`, one worker task
//! per accepted connection and a cooperative shutdown.

use crate::config::ServerConfig;
use crate::connection::{ActiveGuard, ConnectionWorker, ServerShared};
use crate::handler::{ConnectionListener, RequestHandler, UnsupportedServiceHandler};
use dlms_application::LogicalDevice;
use dlms_application::association::AssociationEventListener;
use dlms_core::{DlmsError, DlmsResult};
use dlms_transport::TcpTransport;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::JoinSet;

const ACCEPT_BACKOFF_MIN: Duration = Duration::from_millis(10);
const ACCEPT_BACKOFF_MAX: Duration = Duration::from_secs(1);

/// Delay before retrying after `failures` consecutive accept errors
fn accept_backoff(failures: u32) -> Duration {
    ACCEPT_BACKOFF_MIN
        .saturating_mul(1u32 << failures.saturating_sub(1).min(16))
        .min(ACCEPT_BACKOFF_MAX)
}

/// Server listener for accepting client connections
///
/// # Usage Example
/// ```rust,no_run
/// use dlms_application::LogicalDevice;
/// use dlms_security::SecuritySuite;
/// use dlms_server::{ServerConfig, ServerListener};
///
/// # async fn run() -> dlms_core::DlmsResult<()> {
/// let mut device = LogicalDevice::new(1, "meter", "ABC", 1)?;
/// device.add_restriction(16, SecuritySuite::none())?;
/// let listener = ServerListener::bind(ServerConfig::default(), vec![device]).await?;
/// listener.serve().await
/// # }
/// ```
pub struct ServerListener {
    /// Taken by `serve` and closed when it returns
    listener: Mutex<Option<TcpListener>>,
    local_addr: SocketAddr,
    config: ServerConfig,
    devices: HashMap<u16, Arc<LogicalDevice>>,
    handler: Arc<dyn RequestHandler>,
    connection_listeners: Vec<Arc<dyn ConnectionListener>>,
    event_listeners: Vec<Arc<dyn AssociationEventListener>>,
    active: Arc<AtomicUsize>,
    next_connection_id: AtomicU64,
    shutdown: watch::Sender<bool>,
}

impl ServerListener {
    /// Validate the configuration and bind the listening socket
    ///
    /// # Errors
    /// `Configuration` for an invalid config or two devices sharing an id,
    /// `Connection` when the address cannot be bound.
    pub async fn bind(config: ServerConfig, devices: Vec<LogicalDevice>) -> DlmsResult<Self> {
        config.validate()?;
        let mut by_id = HashMap::with_capacity(devices.len());
        for device in devices {
            let id = device.id();
            if by_id.insert(id, Arc::new(device)).is_some() {
                return Err(DlmsError::Configuration(format!(
                    "Logical device {} is registered twice",
                    id
                )));
            }
        }

        let address = config.socket_addr();
        let listener = TcpListener::bind(address).await.map_err(|e| {
            DlmsError::Connection(std::io::Error::new(
                e.kind(),
                format!("Failed to bind to {}: {}", address, e),
            ))
        })?;
        let local_addr = listener.local_addr()?;
        let (shutdown, _) = watch::channel(false);

        Ok(Self {
            listener: Mutex::new(Some(listener)),
            local_addr,
            config,
            devices: by_id,
            handler: Arc::new(UnsupportedServiceHandler),
            connection_listeners: Vec::new(),
            event_listeners: Vec::new(),
            active: Arc::new(AtomicUsize::new(0)),
            next_connection_id: AtomicU64::new(1),
            shutdown,
        })
    }

    pub fn with_handler(mut self, handler: Arc<dyn RequestHandler>) -> Self {
        self.handler = handler;
        self
    }

    pub fn with_connection_listener(mut self, listener: Arc<dyn ConnectionListener>) -> Self {
        self.connection_listeners.push(listener);
        self
    }

    pub fn with_event_listener(mut self, listener: Arc<dyn AssociationEventListener>) -> Self {
        self.event_listeners.push(listener);
        self
    }

    /// Address actually bound; differs from the config when port 0 was asked for
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Connections currently served
    pub fn active_connections(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    pub fn device(&self, id: u16) -> Option<&Arc<LogicalDevice>> {
        self.devices.get(&id)
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Stop accepting and release every association
    ///
    /// `serve` returns once all workers are done.
    pub fn shutdown(&self) {
        log::info!("DLMS server on {} shutting down", self.local_addr);
        self.shutdown.send_replace(true);
    }

    /// Accept connections until [`shutdown`](Self::shutdown) is called
    ///
    /// The listening socket is closed before the remaining workers are
    /// drained, so a listener serves at most once.
    pub async fn serve(&self) -> DlmsResult<()> {
        let listener = self
            .listener
            .lock()
            .map_err(|_| DlmsError::Configuration("Listener lock poisoned".to_string()))?
            .take()
            .ok_or_else(|| DlmsError::Configuration("Listener already served".to_string()))?;
        let shared = Arc::new(ServerShared {
            config: self.config.clone(),
            devices: self.devices.clone(),
            handler: self.handler.clone(),
            connection_listeners: self.connection_listeners.clone(),
            event_listeners: self.event_listeners.clone(),
        });
        let mut stop = self.shutdown.subscribe();
        let mut workers = JoinSet::new();
        let mut accept_failures = 0u32;

        log::info!("DLMS server listening on {}", self.local_addr);
        while !*stop.borrow_and_update() {
            tokio::select! {
                _ = stop.changed() => break,
                Some(joined) = workers.join_next(), if !workers.is_empty() => {
                    if let Err(e) = joined {
                        log::error!("Connection worker failed: {}", e);
                    }
                }
                accepted = listener.accept() => {
                    let (stream, peer_addr) = match accepted {
                        Ok(accepted) => {
                            accept_failures = 0;
                            accepted
                        }
                        Err(e) => {
                            accept_failures = accept_failures.saturating_add(1);
                            let delay = accept_backoff(accept_failures);
                            log::error!("Failed to accept connection: {}, retrying in {:?}", e, delay);
                            tokio::select! {
                                _ = stop.changed() => break,
                                _ = tokio::time::sleep(delay) => {}
                            }
                            continue;
                        }
                    };
                    let max = self.config.max_clients;
                    if max > 0 && self.active_connections() >= max {
                        log::warn!("Refusing connection from {}: {} clients already connected", peer_addr, max);
                        drop(stream);
                        continue;
                    }

                    let connection_id = self.next_connection_id.fetch_add(1, Ordering::SeqCst);
                    let guard = ActiveGuard::acquire(&self.active);
                    let worker = ConnectionWorker::new(
                        shared.clone(),
                        connection_id,
                        peer_addr.to_string(),
                        self.shutdown.subscribe(),
                        Some(guard),
                    );
                    let transport = TcpTransport::from_connected_stream(stream, None);
                    workers.spawn(worker.run(transport));
                }
            }
        }

        drop(listener);
        while let Some(joined) = workers.join_next().await {
            if let Err(e) = joined {
                log::error!("Connection worker failed: {}", e);
            }
        }
        log::info!("DLMS server on {} stopped", self.local_addr);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dlms_application::{ClientAssociation, ClientAssociationSettings};
    use dlms_security::SecuritySuite;
    use dlms_session::{SessionLayer, WrapperSession};
    use std::net::{IpAddr, Ipv4Addr};
    use tokio::io::AsyncReadExt;
    use tokio::net::TcpStream;

    fn config(max_clients: usize) -> ServerConfig {
        ServerConfig {
            bind_address: IpAddr::V4(Ipv4Addr::LOCALHOST),
            port: 0,
            max_clients,
            ..ServerConfig::default()
        }
    }

    fn meter() -> LogicalDevice {
        let mut device = LogicalDevice::new(1, "meter", "ABC", 1).unwrap();
        device.add_restriction(16, SecuritySuite::none()).unwrap();
        device
    }

    async fn wait_for_active(listener: &ServerListener, count: usize) {
        for _ in 0..200 {
            if listener.active_connections() == count {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("expected {} active connections, got {}", count, listener.active_connections());
    }

    #[tokio::test]
    async fn test_duplicate_device_rejected() {
        let result = ServerListener::bind(config(0), vec![meter(), meter()]).await;
        assert!(matches!(result, Err(DlmsError::Configuration(_))));
    }

    #[tokio::test]
    async fn test_invalid_config_rejected() {
        let bad = ServerConfig {
            max_pdu_size: 4,
            ..config(0)
        };
        assert!(ServerListener::bind(bad, vec![meter()]).await.is_err());
    }

    #[tokio::test]
    async fn test_associate_over_tcp() {
        let listener = Arc::new(ServerListener::bind(config(0), vec![meter()]).await.unwrap());
        assert!(listener.device(1).is_some());
        let server = tokio::spawn({
            let listener = listener.clone();
            async move { listener.serve().await }
        });

        let stream = TcpStream::connect(listener.local_addr()).await.unwrap();
        let mut session = WrapperSession::client(TcpTransport::from_connected_stream(stream, None), 16, 1);
        let mut client = ClientAssociation::new(ClientAssociationSettings::new(SecuritySuite::none())).unwrap();
        session.send(&client.build_aarq().unwrap()).await.unwrap();
        client.process_aare(&session.receive().await.unwrap()).unwrap();
        assert_eq!(listener.active_connections(), 1);

        listener.shutdown();
        let rlre = session.receive().await.unwrap();
        assert_eq!(rlre[0], 0x63);
        server.await.unwrap().unwrap();
        assert_eq!(listener.active_connections(), 0);
    }

    #[tokio::test]
    async fn test_socket_closed_after_serve_returns() {
        let listener = Arc::new(ServerListener::bind(config(0), vec![meter()]).await.unwrap());
        let address = listener.local_addr();
        let server = tokio::spawn({
            let listener = listener.clone();
            async move { listener.serve().await }
        });
        TcpStream::connect(address).await.unwrap();

        listener.shutdown();
        server.await.unwrap().unwrap();
        assert!(TcpStream::connect(address).await.is_err());
        assert!(matches!(listener.serve().await, Err(DlmsError::Configuration(_))));
    }

    #[test]
    fn test_accept_backoff_grows_and_caps() {
        assert_eq!(accept_backoff(1), Duration::from_millis(10));
        assert_eq!(accept_backoff(2), Duration::from_millis(20));
        assert_eq!(accept_backoff(4), Duration::from_millis(80));
        assert_eq!(accept_backoff(20), Duration::from_secs(1));
        assert_eq!(accept_backoff(u32::MAX), Duration::from_secs(1));
    }

    #[tokio::test]
    async fn test_max_clients_admission() {
        let listener = Arc::new(ServerListener::bind(config(3), vec![meter()]).await.unwrap());
        let server = tokio::spawn({
            let listener = listener.clone();
            async move { listener.serve().await }
        });

        let mut admitted = Vec::new();
        for _ in 0..3 {
            admitted.push(TcpStream::connect(listener.local_addr()).await.unwrap());
        }
        wait_for_active(&listener, 3).await;

        let mut refused = TcpStream::connect(listener.local_addr()).await.unwrap();
        let mut buf = [0u8; 1];
        let read = tokio::time::timeout(Duration::from_secs(2), refused.read(&mut buf))
            .await
            .unwrap();
        assert!(matches!(read, Ok(0) | Err(_)));
        assert_eq!(listener.active_connections(), 3);

        drop(admitted);
        listener.shutdown();
        server.await.unwrap().unwrap();
        assert_eq!(listener.active_connections(), 0);
    }
}
