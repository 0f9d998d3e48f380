//! Scripted mock transport for integration tests
//!
//! Stands in for a remote management endpoint without any network. Each
//! operation can be scripted to fail in a specific way on specific
//! attempts, and call counters expose exactly how often the orchestrator
//! touched the remote side.

use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

use hostmarshal::session::SessionHandle;
use hostmarshal::transport::{
    Endpoint, HostConnectSpec, ManagementTransport, NetworkConfig, NetworkConfigUpdate,
    SessionToken,
};
use hostmarshal::{OrchestratorError, Result};

/// Failure modes a scripted step can produce
#[derive(Debug, Clone, Copy)]
pub enum MockFailure {
    Timeout,
    Unavailable,
    Rejected,
    AuthFailed,
    Unreachable,
}

impl MockFailure {
    fn to_error(self, endpoint: &Endpoint) -> OrchestratorError {
        match self {
            MockFailure::Timeout => OrchestratorError::Timeout(endpoint.to_string()),
            MockFailure::Unavailable => OrchestratorError::RemoteUnavailable {
                endpoint: endpoint.to_string(),
                status: 503,
            },
            MockFailure::Rejected => OrchestratorError::RemoteRejected {
                endpoint: endpoint.to_string(),
                reason: "duplicate host".to_string(),
            },
            MockFailure::AuthFailed => {
                OrchestratorError::AuthenticationFailed(endpoint.to_string())
            }
            MockFailure::Unreachable => OrchestratorError::Unreachable(endpoint.to_string()),
        }
    }
}

/// One scripted step: `None` succeeds, `Some` fails that way
pub type Step = Option<MockFailure>;

#[derive(Default)]
struct MockState {
    /// Endpoints whose authentication always fails this way
    auth_failures: HashMap<String, MockFailure>,
    /// Per-call script for add-host; an exhausted script succeeds
    add_host_script: VecDeque<Step>,
    /// Simulated latency of the add-host call
    add_host_delay: Duration,
    /// Current network configuration per endpoint
    network: HashMap<String, NetworkConfig>,
    /// Per-call scripts for configuration pushes
    set_dns_script: VecDeque<Step>,
    set_ntp_script: VecDeque<Step>,
    /// Accepted (cluster, host address) adds
    added: Vec<(String, String)>,
}

/// Scripted [`ManagementTransport`] implementation
pub struct MockTransport {
    state: Arc<RwLock<MockState>>,
    pub auth_calls: Arc<AtomicU32>,
    pub add_host_calls: Arc<AtomicU32>,
    pub get_config_calls: Arc<AtomicU32>,
    pub set_config_calls: Arc<AtomicU32>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self {
            state: Arc::new(RwLock::new(MockState::default())),
            auth_calls: Arc::new(AtomicU32::new(0)),
            add_host_calls: Arc::new(AtomicU32::new(0)),
            get_config_calls: Arc::new(AtomicU32::new(0)),
            set_config_calls: Arc::new(AtomicU32::new(0)),
        }
    }

    /// Make every authentication against this endpoint fail
    pub async fn fail_auth(&self, endpoint: &Endpoint, failure: MockFailure) {
        self.state
            .write()
            .await
            .auth_failures
            .insert(endpoint.to_string(), failure);
    }

    /// Script the next add-host calls; later calls succeed
    pub async fn script_add_host(&self, steps: Vec<Step>) {
        self.state.write().await.add_host_script = steps.into();
    }

    /// Add latency to every add-host call
    pub async fn set_add_host_delay(&self, delay: Duration) {
        self.state.write().await.add_host_delay = delay;
    }

    /// Seed the current network configuration of an endpoint
    pub async fn set_network(&self, endpoint: &Endpoint, config: NetworkConfig) {
        self.state
            .write()
            .await
            .network
            .insert(endpoint.to_string(), config);
    }

    /// Script the next DNS pushes; later pushes succeed
    pub async fn script_set_dns(&self, steps: Vec<Step>) {
        self.state.write().await.set_dns_script = steps.into();
    }

    /// Script the next NTP pushes; later pushes succeed
    pub async fn script_set_ntp(&self, steps: Vec<Step>) {
        self.state.write().await.set_ntp_script = steps.into();
    }

    /// The (cluster, host) pairs the remote side accepted
    pub async fn added(&self) -> Vec<(String, String)> {
        self.state.read().await.added.clone()
    }

    /// Current network configuration of an endpoint
    pub async fn network(&self, endpoint: &Endpoint) -> NetworkConfig {
        self.state
            .read()
            .await
            .network
            .get(&endpoint.to_string())
            .cloned()
            .unwrap_or_default()
    }
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ManagementTransport for MockTransport {
    async fn authenticate(
        &self,
        endpoint: &Endpoint,
        _credentials: &hostmarshal::InstanceCredentials,
    ) -> Result<SessionToken> {
        self.auth_calls.fetch_add(1, Ordering::SeqCst);

        let state = self.state.read().await;
        if let Some(failure) = state.auth_failures.get(&endpoint.to_string()) {
            return Err(failure.to_error(endpoint));
        }

        Ok(SessionToken::new(format!("mock-session-{endpoint}")))
    }

    async fn probe_session(&self, _session: &SessionHandle) -> Result<bool> {
        Ok(true)
    }

    async fn logout(&self, _session: &SessionHandle) -> Result<()> {
        Ok(())
    }

    async fn add_host_to_cluster(
        &self,
        session: &SessionHandle,
        cluster: &str,
        host: &HostConnectSpec,
    ) -> Result<()> {
        self.add_host_calls.fetch_add(1, Ordering::SeqCst);

        let delay = self.state.read().await.add_host_delay;
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let mut state = self.state.write().await;
        match state.add_host_script.pop_front() {
            Some(Some(failure)) => Err(failure.to_error(session.endpoint())),
            _ => {
                state
                    .added
                    .push((cluster.to_string(), host.address.clone()));
                Ok(())
            }
        }
    }

    async fn get_network_config(&self, session: &SessionHandle) -> Result<NetworkConfig> {
        self.get_config_calls.fetch_add(1, Ordering::SeqCst);

        Ok(self
            .state
            .read()
            .await
            .network
            .get(&session.endpoint().to_string())
            .cloned()
            .unwrap_or_default())
    }

    async fn set_network_config(
        &self,
        session: &SessionHandle,
        update: &NetworkConfigUpdate,
    ) -> Result<()> {
        self.set_config_calls.fetch_add(1, Ordering::SeqCst);

        let mut state = self.state.write().await;

        let step = if update.dns_servers.is_some() {
            state.set_dns_script.pop_front()
        } else {
            state.set_ntp_script.pop_front()
        };

        if let Some(Some(failure)) = step {
            return Err(failure.to_error(session.endpoint()));
        }

        let entry = state
            .network
            .entry(session.endpoint().to_string())
            .or_default();
        if let Some(dns) = &update.dns_servers {
            entry.dns_servers = dns.clone();
        }
        if let Some(ntp) = &update.ntp_servers {
            entry.ntp_servers = ntp.clone();
        }

        Ok(())
    }
}
