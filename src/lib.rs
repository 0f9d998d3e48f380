//! Hostmarshal Library
//!
//! A host-cluster lifecycle orchestrator: drives the join/configure/verify
//! workflow that turns an unmanaged compute host into a cluster member
//! behind a virtualization management endpoint.

pub mod config;
pub mod credentials;
pub mod error;
pub mod inventory;
pub mod join;
pub mod reconcile;
pub mod retry;
pub mod session;
pub mod store;
pub mod transport;

// Re-export main types
pub use config::Config;
pub use credentials::{CredentialProvider, FileCredentialProvider, InstanceCredentials};
pub use error::{OrchestratorError, Result};
pub use inventory::{ClusterRecord, HealthState, HostInventory, HostRecord, InventorySnapshot};
pub use join::{JoinOrchestrator, JoinOutcome, JoinRequest};
pub use reconcile::{ConfigReconciler, DesiredNetworkConfig, ReconcileReport};
pub use retry::RetryPolicy;
pub use session::{ConnectionManager, SessionHandle};
pub use store::{InventoryStore, JsonFileStore};
pub use transport::{Endpoint, HttpTransport, ManagementTransport, NetworkConfig};

/// Hostmarshal version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default configuration values
pub mod defaults {
    /// Default port of a management endpoint
    pub const MANAGEMENT_PORT: u16 = 443;

    /// Default per-request network timeout in seconds
    pub const REQUEST_TIMEOUT_SECS: u64 = 30;

    /// Total add-host attempts against the cluster manager
    pub const JOIN_MAX_ATTEMPTS: u32 = 3;

    /// Total push attempts per configuration component
    pub const RECONCILE_MAX_ATTEMPTS: u32 = 3;

    /// Delay after the first failed attempt, in seconds
    pub const RETRY_BASE_DELAY_SECS: u64 = 2;

    /// Backoff multiplier applied after each further failure
    pub const RETRY_BACKOFF_FACTOR: u32 = 2;

    /// Default configuration file
    pub const CONFIG_FILE: &str = "/etc/hostmarshal/hostmarshal.toml";

    /// Default credential profiles file
    pub const CREDENTIALS_FILE: &str = "/etc/hostmarshal/credentials.toml";

    /// Default inventory snapshot file
    pub const INVENTORY_FILE: &str = "/var/lib/hostmarshal/inventory.json";
}
