//! Error types for orchestrator operations

use thiserror::Error;

pub type Result<T> = std::result::Result<T, OrchestratorError>;

#[derive(Error, Debug)]
pub enum OrchestratorError {
    #[error("Authentication failed for {0}")]
    AuthenticationFailed(String),

    #[error("Endpoint {0} unreachable")]
    Unreachable(String),

    #[error("Request to {0} timed out")]
    Timeout(String),

    #[error("Protocol error from {0}: {1}")]
    Protocol(String, String),

    #[error("Management endpoint {endpoint} unavailable (status {status})")]
    RemoteUnavailable { endpoint: String, status: u16 },

    #[error("Management endpoint {endpoint} rejected the request: {reason}")]
    RemoteRejected { endpoint: String, reason: String },

    #[error("Cluster {0} not found")]
    ClusterNotFound(String),

    #[error("Cluster {0} is already registered")]
    ClusterAlreadyRegistered(String),

    #[error("Cluster {0} still has member hosts")]
    ClusterNotEmpty(String),

    #[error("Host {0} not found")]
    HostNotFound(String),

    #[error("Host {host} is already a member of cluster {cluster}")]
    AlreadyJoined { host: String, cluster: String },

    #[error("A join is already in progress for host {0}")]
    JoinInProgress(String),

    #[error("Host {host} unreachable: {reason}")]
    HostUnreachable { host: String, reason: String },

    #[error("Host {host} rejected the supplied credentials: {reason}")]
    HostAuthFailed { host: String, reason: String },

    #[error("Reconciliation failed for host {host}: {components}")]
    ReconcileFailed { host: String, components: String },

    #[error("No credential profile named {0}")]
    CredentialNotFound(String),

    #[error("Join cancelled for host {0}")]
    Cancelled(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),
}

impl OrchestratorError {
    /// Whether a retry has any chance of resolving this error.
    ///
    /// Only timeouts and 5xx-equivalent responses qualify. Everything
    /// else is terminal and fails the operation on the first attempt.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            OrchestratorError::Timeout(_)
                | OrchestratorError::Unreachable(_)
                | OrchestratorError::RemoteUnavailable { .. }
        )
    }
}
