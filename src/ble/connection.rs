//! BLE connection management.
//!
//! A [`DeviceSession`] holds the logical connection to one element. The
//! radio link to the elements drops often, so connecting escalates: a
//! round of plain attempts, then an adapter recovery action, then one
//! more round.

use async_trait::async_trait;
use parking_lot::RwLock;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{broadcast, Mutex};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::ble::transport::BleTransport;
use crate::config::Timings;
use crate::error::{Error, Result};
use crate::protocol::DeviceAddress;
use crate::retry::{self, BackoffPolicy, FixedDelay};

/// Connection state for an element.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ConnectionState {
    /// Not connected to the element.
    #[default]
    Disconnected,
    /// Currently attempting to connect.
    Connecting,
    /// Connected to the element.
    Connected,
    /// Currently disconnecting.
    Disconnecting,
}

impl ConnectionState {
    /// Check if connected.
    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Connected)
    }

    /// Check if in a transitional state.
    pub fn is_transitioning(&self) -> bool {
        matches!(self, Self::Connecting | Self::Disconnecting)
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Disconnected => write!(f, "Disconnected"),
            Self::Connecting => write!(f, "Connecting"),
            Self::Connected => write!(f, "Connected"),
            Self::Disconnecting => write!(f, "Disconnecting"),
        }
    }
}

/// Event for connection state changes.
#[derive(Debug, Clone)]
pub struct ConnectionEvent {
    /// The element address.
    pub address: DeviceAddress,
    /// The new connection state.
    pub state: ConnectionState,
}

/// Out-of-band action that brings a wedged local Bluetooth adapter back.
#[async_trait]
pub trait TransportRecovery: Send + Sync {
    /// Run the recovery action.
    async fn recover(&self) -> Result<()>;
}

/// Recovery action that does nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoRecovery;

#[async_trait]
impl TransportRecovery for NoRecovery {
    async fn recover(&self) -> Result<()> {
        Ok(())
    }
}

/// The logical connection to one element.
///
/// `connect` and `disconnect` are serialized by a per-session guard.
/// Reads and writes are not; they rely on the transport handling one
/// command at a time.
pub struct DeviceSession<T: BleTransport> {
    /// Element address.
    address: DeviceAddress,
    /// The transport used for every operation.
    transport: Arc<T>,
    /// Recovery action run between the two connect rounds.
    recovery: Arc<dyn TransportRecovery>,
    /// Current connection state.
    state: RwLock<ConnectionState>,
    /// Established link, if any.
    link: RwLock<Option<T::Link>>,
    /// Serializes connect and disconnect.
    guard: Mutex<()>,
    /// Channel for connection events.
    event_tx: broadcast::Sender<ConnectionEvent>,
    /// Connect attempts per round.
    connect_attempts: u32,
    /// Timeout for a single transport connect.
    connect_timeout: Duration,
    /// Pause policy between failed attempts.
    backoff: Arc<dyn BackoffPolicy>,
    /// Last time the session was used.
    last_used: RwLock<Instant>,
}

impl<T: BleTransport> DeviceSession<T> {
    /// Create a disconnected session.
    pub fn new(
        address: DeviceAddress,
        transport: Arc<T>,
        recovery: Arc<dyn TransportRecovery>,
        timings: &Timings,
    ) -> Self {
        let (event_tx, _) = broadcast::channel(16);

        Self {
            address,
            transport,
            recovery,
            state: RwLock::new(ConnectionState::Disconnected),
            link: RwLock::new(None),
            guard: Mutex::new(()),
            event_tx,
            connect_attempts: timings.connect_attempts,
            connect_timeout: timings.connect_timeout,
            backoff: Arc::new(FixedDelay(timings.connect_delay)),
            last_used: RwLock::new(Instant::now()),
        }
    }

    /// Replace the pause policy between connect attempts.
    pub fn with_backoff(mut self, backoff: Arc<dyn BackoffPolicy>) -> Self {
        self.backoff = backoff;
        self
    }

    /// The element address.
    pub fn address(&self) -> &DeviceAddress {
        &self.address
    }

    /// The transport.
    pub fn transport(&self) -> &Arc<T> {
        &self.transport
    }

    /// Get the current connection state.
    pub fn state(&self) -> ConnectionState {
        *self.state.read()
    }

    /// Check if connected.
    pub fn is_connected(&self) -> bool {
        self.state().is_connected()
    }

    /// The current link, if connected.
    pub fn link(&self) -> Option<T::Link> {
        self.link.read().clone()
    }

    /// Subscribe to connection events.
    pub fn subscribe(&self) -> broadcast::Receiver<ConnectionEvent> {
        self.event_tx.subscribe()
    }

    /// Time since the session was last connected or written through.
    pub fn idle_for(&self) -> Duration {
        self.last_used.read().elapsed()
    }

    /// Make sure the session is connected and return the link.
    ///
    /// Returns at once if the link is up. A link the transport reports as
    /// dropped is discarded and re-established.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConnectionExhausted`] if both connect rounds fail.
    pub async fn connect(&self) -> Result<T::Link> {
        let _guard = self.guard.lock().await;
        self.touch();

        if let Some(link) = self.link() {
            if self.transport.is_connected(&link).await {
                debug!(address = %self.address, "Already connected");
                return Ok(link);
            }
            info!(address = %self.address, "Link lost, reconnecting");
            *self.link.write() = None;
            self.set_state(ConnectionState::Disconnected);
        }

        self.set_state(ConnectionState::Connecting);
        let _reset = ConnectingReset(self);

        if let Some(link) = self.connect_round("initial").await {
            return Ok(self.established(link));
        }

        warn!(
            address = %self.address,
            "Normal connection attempts failed, running adapter recovery"
        );
        if let Err(e) = self.recovery.recover().await {
            warn!(address = %self.address, "Adapter recovery failed: {}", e);
        }

        if let Some(link) = self.connect_round("post-recovery").await {
            return Ok(self.established(link));
        }

        self.set_state(ConnectionState::Disconnected);
        error!(address = %self.address, "Unable to connect after recovery");
        Err(Error::ConnectionExhausted {
            address: self.address.to_string(),
            attempts: self.connect_attempts * 2,
        })
    }

    /// Disconnect from the element. No-op if already disconnected.
    pub async fn disconnect(&self) -> Result<()> {
        let _guard = self.guard.lock().await;

        let link = match self.link.write().take() {
            Some(link) => link,
            None => {
                self.set_state(ConnectionState::Disconnected);
                return Ok(());
            }
        };

        self.set_state(ConnectionState::Disconnecting);

        let result = self.transport.disconnect(&link).await;
        self.set_state(ConnectionState::Disconnected);

        match result {
            Ok(()) => {
                info!(address = %self.address, "Disconnected");
                Ok(())
            }
            Err(e) => {
                error!(address = %self.address, "Failed to disconnect: {}", e);
                Err(e)
            }
        }
    }

    /// Write an attribute over the current link.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotConnected`] if there is no link.
    pub async fn write(&self, uuid: Uuid, data: &[u8], ack: bool) -> Result<()> {
        let link = self.link().ok_or(Error::NotConnected)?;
        self.touch();
        self.transport.write_attribute(&link, uuid, data, ack).await
    }

    /// One round of plain connect attempts.
    async fn connect_round(&self, round: &str) -> Option<T::Link> {
        for attempt in 1..=self.connect_attempts {
            debug!(
                address = %self.address,
                "{} connection attempt {} of {}",
                round, attempt, self.connect_attempts
            );

            match self
                .transport
                .connect(&self.address, self.connect_timeout)
                .await
            {
                Ok(link) => {
                    info!(
                        address = %self.address,
                        "Connected on {} attempt {}",
                        round, attempt
                    );
                    return Some(link);
                }
                Err(e) => {
                    warn!(
                        address = %self.address,
                        "{} connection attempt {} failed: {}",
                        round, attempt, e
                    );
                    retry::pause(self.backoff.as_ref(), attempt).await;
                }
            }
        }

        None
    }

    fn established(&self, link: T::Link) -> T::Link {
        *self.link.write() = Some(link.clone());
        self.set_state(ConnectionState::Connected);
        link
    }

    fn touch(&self) {
        *self.last_used.write() = Instant::now();
    }

    /// Update the connection state and emit an event.
    fn set_state(&self, new_state: ConnectionState) {
        let old_state = {
            let mut state = self.state.write();
            let old = *state;
            *state = new_state;
            old
        };

        if old_state != new_state {
            debug!(
                address = %self.address,
                "Connection state changed: {} -> {}",
                old_state, new_state
            );

            let _ = self.event_tx.send(ConnectionEvent {
                address: self.address.clone(),
                state: new_state,
            });
        }
    }
}

/// Puts a session left in `Connecting` back to `Disconnected` when the
/// connect future is dropped mid-round.
struct ConnectingReset<'a, T: BleTransport>(&'a DeviceSession<T>);

impl<T: BleTransport> Drop for ConnectingReset<'_, T> {
    fn drop(&mut self) {
        if self.0.state() == ConnectionState::Connecting {
            debug!(address = %self.0.address, "Connect cancelled");
            self.0.set_state(ConnectionState::Disconnected);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{CountingRecovery, FakeTransport};

    fn addr() -> DeviceAddress {
        DeviceAddress::parse("CC:22:37:10:43:4B").unwrap()
    }

    fn session(
        transport: &Arc<FakeTransport>,
        recovery: &Arc<CountingRecovery>,
    ) -> DeviceSession<FakeTransport> {
        DeviceSession::new(
            addr(),
            transport.clone(),
            recovery.clone(),
            &Timings::immediate(),
        )
    }

    #[test]
    fn test_connection_state() {
        assert!(!ConnectionState::Disconnected.is_connected());
        assert!(ConnectionState::Connected.is_connected());
        assert!(!ConnectionState::Connecting.is_connected());

        assert!(ConnectionState::Connecting.is_transitioning());
        assert!(ConnectionState::Disconnecting.is_transitioning());
        assert!(!ConnectionState::Connected.is_transitioning());
    }

    #[test]
    fn test_connection_state_display() {
        assert_eq!(format!("{}", ConnectionState::Connected), "Connected");
        assert_eq!(format!("{}", ConnectionState::Disconnected), "Disconnected");
    }

    #[tokio::test]
    async fn test_connect_first_attempt() {
        let transport = Arc::new(FakeTransport::new());
        let recovery = Arc::new(CountingRecovery::default());
        let session = session(&transport, &recovery);
        let mut events = session.subscribe();

        session.connect().await.unwrap();

        assert!(session.is_connected());
        assert_eq!(transport.connect_calls(), 1);
        assert_eq!(recovery.count(), 0);
        assert_eq!(events.recv().await.unwrap().state, ConnectionState::Connecting);
        assert_eq!(events.recv().await.unwrap().state, ConnectionState::Connected);
    }

    #[tokio::test]
    async fn test_connect_is_idempotent() {
        let transport = Arc::new(FakeTransport::new());
        let recovery = Arc::new(CountingRecovery::default());
        let session = session(&transport, &recovery);

        session.connect().await.unwrap();
        session.connect().await.unwrap();

        assert_eq!(transport.connect_calls(), 1);
    }

    #[tokio::test]
    async fn test_recovery_after_three_failures() {
        let transport = Arc::new(FakeTransport::new());
        transport.fail_next_connects(3);
        let recovery = Arc::new(CountingRecovery::default());
        let session = session(&transport, &recovery);

        session.connect().await.unwrap();

        assert_eq!(transport.connect_calls(), 4);
        assert_eq!(recovery.count(), 1);
        assert!(session.is_connected());
    }

    #[tokio::test]
    async fn test_connection_exhausted() {
        let transport = Arc::new(FakeTransport::new());
        transport.fail_next_connects(u32::MAX);
        let recovery = Arc::new(CountingRecovery::default());
        let session = session(&transport, &recovery);

        match session.connect().await {
            Err(Error::ConnectionExhausted { attempts, .. }) => assert_eq!(attempts, 6),
            other => panic!("expected ConnectionExhausted, got {:?}", other.map(|_| ())),
        }

        assert_eq!(transport.connect_calls(), 6);
        assert_eq!(recovery.count(), 1);
        assert_eq!(session.state(), ConnectionState::Disconnected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_pauses_between_attempts() {
        let transport = Arc::new(FakeTransport::new());
        transport.fail_next_connects(2);
        let recovery = Arc::new(CountingRecovery::default());
        let session = DeviceSession::new(addr(), transport.clone(), recovery, &Timings::default());

        let start = tokio::time::Instant::now();
        session.connect().await.unwrap();

        assert!(start.elapsed() >= Duration::from_secs(6));
        assert_eq!(transport.connect_calls(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_custom_backoff_policy() {
        let transport = Arc::new(FakeTransport::new());
        transport.fail_next_connects(2);
        let recovery = Arc::new(CountingRecovery::default());
        let session = session(&transport, &recovery).with_backoff(Arc::new(
            retry::ExponentialBackoff {
                base: Duration::from_secs(1),
                max: Duration::from_secs(10),
            },
        ));

        let start = tokio::time::Instant::now();
        session.connect().await.unwrap();

        assert!(start.elapsed() >= Duration::from_secs(3));
        assert!(start.elapsed() < Duration::from_secs(6));
    }

    #[tokio::test]
    async fn test_reconnects_after_link_loss() {
        let transport = Arc::new(FakeTransport::new());
        let recovery = Arc::new(CountingRecovery::default());
        let session = session(&transport, &recovery);

        session.connect().await.unwrap();
        transport.drop_links();
        session.connect().await.unwrap();

        assert_eq!(transport.connect_calls(), 2);
        assert!(session.is_connected());
    }

    #[tokio::test]
    async fn test_disconnect() {
        let transport = Arc::new(FakeTransport::new());
        let recovery = Arc::new(CountingRecovery::default());
        let session = session(&transport, &recovery);

        session.disconnect().await.unwrap();
        assert_eq!(transport.disconnect_calls(), 0);

        session.connect().await.unwrap();
        session.disconnect().await.unwrap();

        assert_eq!(transport.disconnect_calls(), 1);
        assert_eq!(session.state(), ConnectionState::Disconnected);
        assert!(session.link().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_connect_resets_state() {
        let transport = Arc::new(FakeTransport::new());
        transport.fail_next_connects(u32::MAX);
        let recovery = Arc::new(CountingRecovery::default());
        let session = DeviceSession::new(addr(), transport.clone(), recovery, &Timings::default());

        let result = tokio::time::timeout(Duration::from_secs(1), session.connect()).await;

        assert!(result.is_err());
        assert_eq!(transport.connect_calls(), 1);
        assert_eq!(session.state(), ConnectionState::Disconnected);
        assert!(session.link().is_none());

        transport.fail_next_connects(0);
        session.connect().await.unwrap();
        assert!(session.is_connected());
    }

    #[tokio::test]
    async fn test_write_requires_link() {
        let transport = Arc::new(FakeTransport::new());
        let recovery = Arc::new(CountingRecovery::default());
        let session = session(&transport, &recovery);

        assert!(matches!(
            session.write(Uuid::nil(), &[0], false).await,
            Err(Error::NotConnected)
        ));
    }
}
