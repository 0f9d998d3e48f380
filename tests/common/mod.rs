//! Common test utilities and fixtures for integration tests
#![allow(dead_code)]

pub mod mock_transport;

pub use mock_transport::{MockFailure, MockTransport};

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use hostmarshal::transport::Endpoint;
use hostmarshal::{
    ClusterRecord, ConfigReconciler, ConnectionManager, FileCredentialProvider, HostInventory,
    InstanceCredentials, JoinOrchestrator, ManagementTransport, RetryPolicy,
};

/// Management endpoint instance name used by fixtures
pub const MGMT_INSTANCE: &str = "prod-vcenter";

/// Host credential instance name used by fixtures
pub const HOST_INSTANCE: &str = "esx-lab";

/// Host address used by fixtures
pub const HOST_ADDRESS: &str = "10.0.0.5";

/// Cluster name used by fixtures
pub const CLUSTER: &str = "prod-1";

/// The management endpoint the fixtures resolve to
pub fn mgmt_endpoint() -> Endpoint {
    Endpoint::new("10.0.0.2", 443)
}

/// The host endpoint the fixtures resolve to
pub fn host_endpoint() -> Endpoint {
    Endpoint::new(HOST_ADDRESS, 443)
}

/// Retry policy with real attempt counts but negligible delays
pub fn fast_policy() -> RetryPolicy {
    RetryPolicy {
        max_attempts: 3,
        base_delay: Duration::from_millis(1),
        backoff_factor: 2,
    }
}

/// Fully wired orchestrator over a scripted mock transport
pub struct TestHarness {
    pub transport: Arc<MockTransport>,
    pub inventory: HostInventory,
    pub connections: Arc<ConnectionManager>,
    pub reconciler: ConfigReconciler,
    pub orchestrator: JoinOrchestrator,
}

impl TestHarness {
    pub fn new() -> Self {
        let transport = Arc::new(MockTransport::new());
        let inventory = HostInventory::new();

        let connections = Arc::new(ConnectionManager::new(
            transport.clone() as Arc<dyn ManagementTransport>
        ));

        let mut profiles = HashMap::new();
        profiles.insert(
            MGMT_INSTANCE.to_string(),
            InstanceCredentials {
                address: "10.0.0.2".to_string(),
                port: 443,
                username: "administrator".to_string(),
                password: "secret".to_string(),
            },
        );
        profiles.insert(
            HOST_INSTANCE.to_string(),
            InstanceCredentials {
                address: HOST_ADDRESS.to_string(),
                port: 443,
                username: "root".to_string(),
                password: "lab".to_string(),
            },
        );
        let credentials = Arc::new(FileCredentialProvider::from_profiles(profiles));

        let reconciler =
            ConfigReconciler::new(connections.clone(), inventory.clone(), fast_policy());
        let orchestrator = JoinOrchestrator::new(
            connections.clone(),
            inventory.clone(),
            credentials,
            reconciler.clone(),
            fast_policy(),
        );

        Self {
            transport,
            inventory,
            connections,
            reconciler,
            orchestrator,
        }
    }

    /// Register the fixture cluster in the inventory
    pub async fn register_cluster(&self) {
        self.inventory
            .register_cluster(ClusterRecord::new(CLUSTER, MGMT_INSTANCE))
            .await
            .expect("cluster registration should succeed");
    }

    /// Credentials of the fixture host profile
    pub fn host_credentials(&self) -> InstanceCredentials {
        InstanceCredentials {
            address: HOST_ADDRESS.to_string(),
            port: 443,
            username: "root".to_string(),
            password: "lab".to_string(),
        }
    }
}

impl Default for TestHarness {
    fn default() -> Self {
        Self::new()
    }
}
