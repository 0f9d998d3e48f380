//! Transport abstraction over the remote management protocol
//!
//! The orchestrator never speaks a wire format directly; every remote
//! operation goes through [`ManagementTransport`]. The production
//! implementation is [`HttpTransport`], a JSON-over-HTTP client. Tests
//! substitute a scripted mock behind the same trait.
//!
//! A session's endpoint is the management service it was authenticated
//! against: the cluster manager for `add_host_to_cluster`, the host's own
//! management service for the network-config operations.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use tracing::debug;

use crate::credentials::InstanceCredentials;
use crate::session::SessionHandle;
use crate::{OrchestratorError, Result};

/// Network address of a management service
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Endpoint {
    pub address: String,
    pub port: u16,
}

impl Endpoint {
    pub fn new(address: impl Into<String>, port: u16) -> Self {
        Self {
            address: address.into(),
            port,
        }
    }

    /// Endpoint for the management service a credential profile points at
    pub fn from_credentials(credentials: &InstanceCredentials) -> Self {
        Self::new(credentials.address.clone(), credentials.port)
    }

    /// Endpoint for a host's own management service: the caller-supplied
    /// address, the profile's port
    pub fn for_host(address: &str, credentials: &InstanceCredentials) -> Self {
        Self::new(address, credentials.port)
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.address, self.port)
    }
}

/// Opaque per-session authentication token issued by the remote side
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionToken(String);

impl SessionToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Connection details the remote manager needs to take over a host
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HostConnectSpec {
    pub address: String,
    pub port: u16,
    pub username: String,
    pub password: String,
}

impl HostConnectSpec {
    pub fn new(address: &str, credentials: &InstanceCredentials) -> Self {
        Self {
            address: address.to_string(),
            port: credentials.port,
            username: credentials.username.clone(),
            password: credentials.password.clone(),
        }
    }
}

/// A host's current network configuration as reported by its endpoint
///
/// Server order is priority order on both lists.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkConfig {
    pub dns_servers: Vec<String>,
    pub ntp_servers: Vec<String>,
}

/// Partial network configuration write
///
/// Only the populated components are touched; DNS and NTP pushes stay
/// independent of each other.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NetworkConfigUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dns_servers: Option<Vec<String>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub ntp_servers: Option<Vec<String>>,
}

impl NetworkConfigUpdate {
    pub fn dns(servers: Vec<String>) -> Self {
        Self {
            dns_servers: Some(servers),
            ntp_servers: None,
        }
    }

    pub fn ntp(servers: Vec<String>) -> Self {
        Self {
            dns_servers: None,
            ntp_servers: Some(servers),
        }
    }
}

/// Operations the orchestrator needs from a remote management endpoint
#[async_trait]
pub trait ManagementTransport: Send + Sync {
    /// Open an authenticated session with the endpoint
    async fn authenticate(
        &self,
        endpoint: &Endpoint,
        credentials: &InstanceCredentials,
    ) -> Result<SessionToken>;

    /// Check whether a previously issued session is still honored
    async fn probe_session(&self, session: &SessionHandle) -> Result<bool>;

    /// Discard a session on the remote side
    async fn logout(&self, session: &SessionHandle) -> Result<()>;

    /// Ask the cluster manager behind `session` to add a host to a cluster
    async fn add_host_to_cluster(
        &self,
        session: &SessionHandle,
        cluster: &str,
        host: &HostConnectSpec,
    ) -> Result<()>;

    /// Fetch the network configuration of the host behind `session`
    async fn get_network_config(&self, session: &SessionHandle) -> Result<NetworkConfig>;

    /// Write network configuration to the host behind `session`
    async fn set_network_config(
        &self,
        session: &SessionHandle,
        update: &NetworkConfigUpdate,
    ) -> Result<()>;
}

/// JSON-over-HTTP implementation of [`ManagementTransport`]
pub struct HttpTransport {
    client: reqwest::Client,
}

const SESSION_HEADER: &str = "x-session-token";

#[derive(Debug, Deserialize)]
struct AuthResponse {
    token: String,
}

#[derive(Debug, Serialize)]
struct AuthRequest<'a> {
    username: &'a str,
    password: &'a str,
}

impl HttpTransport {
    /// Create a transport with the given per-request timeout
    pub fn new(request_timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .expect("Failed to create HTTP client");

        Self { client }
    }

    fn url(endpoint: &Endpoint, path: &str) -> String {
        format!("http://{endpoint}{path}")
    }

    /// Map a reqwest failure onto the connection-layer taxonomy
    fn map_request_error(endpoint: &Endpoint, e: reqwest::Error) -> OrchestratorError {
        if e.is_timeout() {
            OrchestratorError::Timeout(endpoint.to_string())
        } else if e.is_connect() {
            OrchestratorError::Unreachable(endpoint.to_string())
        } else {
            OrchestratorError::Network(e)
        }
    }

    /// Map a non-success response onto the taxonomy shared by all
    /// state-changing calls
    async fn map_error_status(
        endpoint: &Endpoint,
        response: reqwest::Response,
    ) -> OrchestratorError {
        let status = response.status();
        if status.is_server_error() {
            return OrchestratorError::RemoteUnavailable {
                endpoint: endpoint.to_string(),
                status: status.as_u16(),
            };
        }

        if status == reqwest::StatusCode::UNAUTHORIZED
            || status == reqwest::StatusCode::FORBIDDEN
        {
            return OrchestratorError::AuthenticationFailed(endpoint.to_string());
        }

        if status == reqwest::StatusCode::REQUEST_TIMEOUT {
            return OrchestratorError::Timeout(endpoint.to_string());
        }

        let reason = response.text().await.unwrap_or_default();
        OrchestratorError::RemoteRejected {
            endpoint: endpoint.to_string(),
            reason: if reason.is_empty() {
                format!("HTTP {}", status.as_u16())
            } else {
                reason
            },
        }
    }
}

#[async_trait]
impl ManagementTransport for HttpTransport {
    async fn authenticate(
        &self,
        endpoint: &Endpoint,
        credentials: &InstanceCredentials,
    ) -> Result<SessionToken> {
        debug!("Authenticating with {}", endpoint);

        let response = self
            .client
            .post(Self::url(endpoint, "/api/v1/session"))
            .json(&AuthRequest {
                username: &credentials.username,
                password: &credentials.password,
            })
            .send()
            .await
            .map_err(|e| Self::map_request_error(endpoint, e))?;

        let status = response.status();
        if status == reqwest::StatusCode::UNAUTHORIZED
            || status == reqwest::StatusCode::FORBIDDEN
        {
            return Err(OrchestratorError::AuthenticationFailed(endpoint.to_string()));
        }

        if status.is_server_error() {
            return Err(OrchestratorError::RemoteUnavailable {
                endpoint: endpoint.to_string(),
                status: status.as_u16(),
            });
        }

        if !status.is_success() {
            return Err(OrchestratorError::Protocol(
                endpoint.to_string(),
                format!("unexpected handshake status {}", status.as_u16()),
            ));
        }

        let auth: AuthResponse = response.json().await.map_err(|e| {
            OrchestratorError::Protocol(endpoint.to_string(), format!("invalid handshake body: {e}"))
        })?;

        Ok(SessionToken::new(auth.token))
    }

    async fn probe_session(&self, session: &SessionHandle) -> Result<bool> {
        let endpoint = session.endpoint();
        let response = self
            .client
            .get(Self::url(endpoint, "/api/v1/session"))
            .header(SESSION_HEADER, session.token().as_str())
            .send()
            .await
            .map_err(|e| Self::map_request_error(endpoint, e))?;

        Ok(response.status().is_success())
    }

    async fn logout(&self, session: &SessionHandle) -> Result<()> {
        let endpoint = session.endpoint();
        let response = self
            .client
            .delete(Self::url(endpoint, "/api/v1/session"))
            .header(SESSION_HEADER, session.token().as_str())
            .send()
            .await
            .map_err(|e| Self::map_request_error(endpoint, e))?;

        if !response.status().is_success() {
            return Err(Self::map_error_status(endpoint, response).await);
        }

        Ok(())
    }

    async fn add_host_to_cluster(
        &self,
        session: &SessionHandle,
        cluster: &str,
        host: &HostConnectSpec,
    ) -> Result<()> {
        let endpoint = session.endpoint();
        debug!(
            "Requesting {} add host {} to cluster {}",
            endpoint, host.address, cluster
        );

        let response = self
            .client
            .post(Self::url(
                endpoint,
                &format!("/api/v1/clusters/{cluster}/hosts"),
            ))
            .header(SESSION_HEADER, session.token().as_str())
            .json(host)
            .send()
            .await
            .map_err(|e| Self::map_request_error(endpoint, e))?;

        if !response.status().is_success() {
            return Err(Self::map_error_status(endpoint, response).await);
        }

        Ok(())
    }

    async fn get_network_config(&self, session: &SessionHandle) -> Result<NetworkConfig> {
        let endpoint = session.endpoint();
        let response = self
            .client
            .get(Self::url(endpoint, "/api/v1/network"))
            .header(SESSION_HEADER, session.token().as_str())
            .send()
            .await
            .map_err(|e| Self::map_request_error(endpoint, e))?;

        if !response.status().is_success() {
            return Err(Self::map_error_status(endpoint, response).await);
        }

        response.json().await.map_err(|e| {
            OrchestratorError::Protocol(
                endpoint.to_string(),
                format!("invalid network config body: {e}"),
            )
        })
    }

    async fn set_network_config(
        &self,
        session: &SessionHandle,
        update: &NetworkConfigUpdate,
    ) -> Result<()> {
        let endpoint = session.endpoint();
        let response = self
            .client
            .put(Self::url(endpoint, "/api/v1/network"))
            .header(SESSION_HEADER, session.token().as_str())
            .json(update)
            .send()
            .await
            .map_err(|e| Self::map_request_error(endpoint, e))?;

        if !response.status().is_success() {
            return Err(Self::map_error_status(endpoint, response).await);
        }

        Ok(())
    }
}
