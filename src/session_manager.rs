//! Address-keyed session registry.
//!
//! The [`SessionManager`] owns one [`DeviceSession`] per element address.
//! Sessions are created lazily on first use and live until shutdown
//! unless explicitly evicted.

use futures::future::join_all;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::ble::connection::{DeviceSession, TransportRecovery};
use crate::ble::transport::BleTransport;
use crate::config::Timings;
use crate::error::Result;
use crate::protocol::DeviceAddress;

/// Registry of element sessions.
pub struct SessionManager<T: BleTransport> {
    /// Transport shared by every session.
    transport: Arc<T>,
    /// Recovery action shared by every session.
    recovery: Arc<dyn TransportRecovery>,
    /// Timings handed to new sessions.
    timings: Timings,
    /// Sessions by canonical address.
    sessions: RwLock<HashMap<DeviceAddress, Arc<DeviceSession<T>>>>,
}

impl<T: BleTransport> SessionManager<T> {
    /// Create an empty registry.
    pub fn new(transport: Arc<T>, recovery: Arc<dyn TransportRecovery>, timings: Timings) -> Self {
        Self {
            transport,
            recovery,
            timings,
            sessions: RwLock::new(HashMap::new()),
        }
    }

    /// The shared transport.
    pub fn transport(&self) -> &Arc<T> {
        &self.transport
    }

    /// The timings sessions are created with.
    pub fn timings(&self) -> &Timings {
        &self.timings
    }

    /// Return the session for `address`, creating it if needed.
    pub fn acquire(&self, address: &DeviceAddress) -> Arc<DeviceSession<T>> {
        if let Some(session) = self.sessions.read().get(address) {
            return session.clone();
        }

        self.sessions
            .write()
            .entry(address.clone())
            .or_insert_with(|| {
                debug!(%address, "Creating session");
                Arc::new(DeviceSession::new(
                    address.clone(),
                    self.transport.clone(),
                    self.recovery.clone(),
                    &self.timings,
                ))
            })
            .clone()
    }

    /// Get an existing session without creating one.
    pub fn get(&self, address: &DeviceAddress) -> Option<Arc<DeviceSession<T>>> {
        self.sessions.read().get(address).cloned()
    }

    /// Acquire the session for `address` and make sure it is connected.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConnectionExhausted`](crate::Error::ConnectionExhausted)
    /// if the session cannot connect.
    pub async fn connect(
        &self,
        address: &DeviceAddress,
    ) -> Result<(Arc<DeviceSession<T>>, T::Link)> {
        let session = self.acquire(address);
        let link = session.connect().await?;
        Ok((session, link))
    }

    /// Addresses of every known session.
    pub fn addresses(&self) -> Vec<DeviceAddress> {
        self.sessions.read().keys().cloned().collect()
    }

    /// Number of known sessions.
    pub fn session_count(&self) -> usize {
        self.sessions.read().len()
    }

    /// Disconnect and forget sessions unused for at least `max_idle`.
    ///
    /// Returns the number of sessions evicted.
    pub async fn evict_idle(&self, max_idle: Duration) -> usize {
        let idle: Vec<_> = {
            let mut sessions = self.sessions.write();
            let addresses: Vec<_> = sessions
                .iter()
                .filter(|(_, s)| s.idle_for() >= max_idle)
                .map(|(a, _)| a.clone())
                .collect();
            addresses
                .iter()
                .filter_map(|a| sessions.remove(a))
                .collect()
        };

        for session in &idle {
            info!(address = %session.address(), "Evicting idle session");
            if let Err(e) = session.disconnect().await {
                warn!(address = %session.address(), "Error disconnecting: {}", e);
            }
        }

        idle.len()
    }

    /// Disconnect every session and clear the registry.
    pub async fn shutdown(&self) {
        info!("Shutting down session manager");

        let sessions: Vec<_> = self.sessions.write().drain().map(|(_, s)| s).collect();
        let results = join_all(sessions.iter().map(|s| s.disconnect())).await;

        for (session, result) in sessions.iter().zip(results) {
            if let Err(e) = result {
                warn!(address = %session.address(), "Error disconnecting: {}", e);
            }
        }
    }
}
