//! Session pool for authenticated management connections
//!
//! [`ConnectionManager`] owns every live session. At most one session
//! exists per endpoint; reuse is gated on a validity probe rather than a
//! timer, and an expired session is replaced lazily on the next acquire.
//! No retries happen at this layer; retry policy belongs to the callers.

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::credentials::InstanceCredentials;
use crate::transport::{Endpoint, ManagementTransport, SessionToken};
use crate::Result;

/// Handle to a live session, issued and revoked by [`ConnectionManager`]
#[derive(Debug, Clone)]
pub struct SessionHandle {
    endpoint: Endpoint,
    token: SessionToken,
}

impl SessionHandle {
    pub(crate) fn new(endpoint: Endpoint, token: SessionToken) -> Self {
        Self { endpoint, token }
    }

    /// Endpoint this session was authenticated against
    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    /// Token presented on requests made with this session
    pub fn token(&self) -> &SessionToken {
        &self.token
    }
}

/// Pool of authenticated sessions, keyed by endpoint
pub struct ConnectionManager {
    transport: Arc<dyn ManagementTransport>,
    pool: Mutex<HashMap<Endpoint, Arc<Mutex<Option<SessionToken>>>>>,
}

impl ConnectionManager {
    pub fn new(transport: Arc<dyn ManagementTransport>) -> Self {
        Self {
            transport,
            pool: Mutex::new(HashMap::new()),
        }
    }

    /// The transport used for all remote calls
    pub fn transport(&self) -> &Arc<dyn ManagementTransport> {
        &self.transport
    }

    /// Return a live session for the endpoint, authenticating if needed
    ///
    /// A cached session is probed before reuse; a stale one is dropped and
    /// replaced. The per-endpoint lock serializes concurrent acquires for
    /// the same endpoint so only one handshake is ever in flight per key.
    pub async fn acquire(
        &self,
        endpoint: &Endpoint,
        credentials: &InstanceCredentials,
    ) -> Result<SessionHandle> {
        let slot = {
            let mut pool = self.pool.lock().await;
            pool.entry(endpoint.clone())
                .or_insert_with(|| Arc::new(Mutex::new(None)))
                .clone()
        };

        let mut cached = slot.lock().await;

        if let Some(token) = cached.clone() {
            let handle = SessionHandle::new(endpoint.clone(), token);
            match self.transport.probe_session(&handle).await {
                Ok(true) => {
                    debug!("Reusing session for {}", endpoint);
                    return Ok(handle);
                }
                Ok(false) => {
                    debug!("Session for {} expired, re-authenticating", endpoint);
                    *cached = None;
                }
                Err(e) => {
                    warn!("Session probe for {} failed: {}", endpoint, e);
                    *cached = None;
                }
            }
        }

        let token = self.transport.authenticate(endpoint, credentials).await?;
        *cached = Some(token.clone());
        info!("Established session with {}", endpoint);

        Ok(SessionHandle::new(endpoint.clone(), token))
    }

    /// Log out and forget any session cached for the endpoint
    pub async fn invalidate(&self, endpoint: &Endpoint) {
        let slot = {
            let mut pool = self.pool.lock().await;
            pool.remove(endpoint)
        };

        if let Some(slot) = slot {
            let cached = slot.lock().await;
            if let Some(token) = cached.clone() {
                let handle = SessionHandle::new(endpoint.clone(), token);
                if let Err(e) = self.transport.logout(&handle).await {
                    warn!("Logout from {} failed: {}", endpoint, e);
                }
            }
        }
    }
}
