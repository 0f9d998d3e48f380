//! In-memory inventory of managed hosts and clusters
//!
//! A single lock serializes every inventory operation. Critical sections
//! do in-memory work only; no method performs network I/O while holding
//! the lock. Membership changes go through the compound join operations
//! so the host/cluster bidirectional invariant is never observable in a
//! broken state: a host's membership is `Some` exactly when the named
//! cluster's member set contains its address.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::{OrchestratorError, Result};

/// Last observed health of a managed host
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HealthState {
    Unknown,
    Reachable,
    Unreachable,
    Joining,
    Joined,
    ConfigFailed,
}

/// One managed compute host
///
/// `credentials_ref` names a credential profile; the record never holds
/// the secret itself. `cluster` is `Some` only in the `Joined` and
/// `ConfigFailed` states.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HostRecord {
    pub id: Uuid,
    pub address: String,
    pub credentials_ref: String,
    pub cluster: Option<String>,
    pub last_dns: Vec<String>,
    pub last_ntp: Vec<String>,
    pub health: HealthState,
    pub updated_at: DateTime<Utc>,
    pub reconciled_at: Option<DateTime<Utc>>,
}

impl HostRecord {
    pub fn new(address: impl Into<String>, credentials_ref: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            address: address.into(),
            credentials_ref: credentials_ref.into(),
            cluster: None,
            last_dns: Vec::new(),
            last_ntp: Vec::new(),
            health: HealthState::Unknown,
            updated_at: Utc::now(),
            reconciled_at: None,
        }
    }
}

/// One cluster the orchestrator can join hosts into
///
/// `instance` names the credential profile of the cluster's management
/// endpoint. HA and DRS flags are local bookkeeping and default to
/// enabled.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterRecord {
    pub id: Uuid,
    pub name: String,
    pub instance: String,
    pub members: BTreeSet<String>,
    pub ha_enabled: bool,
    pub drs_enabled: bool,
    pub registered_at: DateTime<Utc>,
}

impl ClusterRecord {
    pub fn new(name: impl Into<String>, instance: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            instance: instance.into(),
            members: BTreeSet::new(),
            ha_enabled: true,
            drs_enabled: true,
            registered_at: Utc::now(),
        }
    }

    pub fn with_policies(mut self, ha_enabled: bool, drs_enabled: bool) -> Self {
        self.ha_enabled = ha_enabled;
        self.drs_enabled = drs_enabled;
        self
    }
}

/// Serializable snapshot of the whole inventory
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InventorySnapshot {
    pub version: u32,
    pub saved_at: DateTime<Utc>,
    pub hosts: Vec<HostRecord>,
    pub clusters: Vec<ClusterRecord>,
}

impl InventorySnapshot {
    /// Current snapshot format version
    pub const CURRENT_VERSION: u32 = 1;
}

#[derive(Default)]
struct InventoryState {
    hosts: HashMap<String, HostRecord>,
    clusters: HashMap<String, ClusterRecord>,
}

/// Thread-safe host and cluster inventory
#[derive(Clone, Default)]
pub struct HostInventory {
    state: Arc<Mutex<InventoryState>>,
}

impl HostInventory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up one host record
    pub async fn get(&self, address: &str) -> Option<HostRecord> {
        self.state.lock().await.hosts.get(address).cloned()
    }

    /// Insert or replace a host record
    pub async fn upsert(&self, record: HostRecord) {
        let mut state = self.state.lock().await;
        state.hosts.insert(record.address.clone(), record);
    }

    /// Remove a host record; a joined host also leaves its cluster's
    /// member set so the two stay consistent
    pub async fn remove(&self, address: &str) -> Result<HostRecord> {
        let mut state = self.state.lock().await;

        let record = state
            .hosts
            .remove(address)
            .ok_or_else(|| OrchestratorError::HostNotFound(address.to_string()))?;

        if let Some(cluster_name) = &record.cluster {
            if let Some(cluster) = state.clusters.get_mut(cluster_name) {
                cluster.members.remove(address);
            }
        }

        Ok(record)
    }

    /// All host records, ordered by address
    pub async fn list_hosts(&self) -> Vec<HostRecord> {
        let state = self.state.lock().await;
        let mut hosts: Vec<HostRecord> = state.hosts.values().cloned().collect();
        hosts.sort_by(|a, b| a.address.cmp(&b.address));
        hosts
    }

    /// Member hosts of one cluster, ordered by address
    pub async fn list_by_cluster(&self, cluster: &str) -> Vec<HostRecord> {
        let state = self.state.lock().await;
        let mut hosts: Vec<HostRecord> = state
            .hosts
            .values()
            .filter(|h| h.cluster.as_deref() == Some(cluster))
            .cloned()
            .collect();
        hosts.sort_by(|a, b| a.address.cmp(&b.address));
        hosts
    }

    /// Look up one cluster record
    pub async fn get_cluster(&self, name: &str) -> Option<ClusterRecord> {
        self.state.lock().await.clusters.get(name).cloned()
    }

    /// Record a new cluster; refuses to overwrite an existing one
    pub async fn register_cluster(&self, record: ClusterRecord) -> Result<()> {
        let mut state = self.state.lock().await;

        if state.clusters.contains_key(&record.name) {
            return Err(OrchestratorError::ClusterAlreadyRegistered(record.name));
        }

        state.clusters.insert(record.name.clone(), record);
        Ok(())
    }

    /// Remove a cluster record; refused while member hosts remain
    pub async fn remove_cluster(&self, name: &str) -> Result<ClusterRecord> {
        let mut state = self.state.lock().await;

        let cluster = state
            .clusters
            .remove(name)
            .ok_or_else(|| OrchestratorError::ClusterNotFound(name.to_string()))?;

        if !cluster.members.is_empty() {
            state.clusters.insert(name.to_string(), cluster);
            return Err(OrchestratorError::ClusterNotEmpty(name.to_string()));
        }

        Ok(cluster)
    }

    /// All cluster records, ordered by name
    pub async fn list_clusters(&self) -> Vec<ClusterRecord> {
        let state = self.state.lock().await;
        let mut clusters: Vec<ClusterRecord> = state.clusters.values().cloned().collect();
        clusters.sort_by(|a, b| a.name.cmp(&b.name));
        clusters
    }

    /// Validate and claim a host for a join, in one critical section
    ///
    /// Checks the target cluster exists, the host is not a member of any
    /// cluster, and no other join is in flight, then transitions the host
    /// record to `Joining`. A concurrent join for the same host observes
    /// the `Joining` state and fails fast instead of racing.
    pub async fn begin_join(
        &self,
        cluster: &str,
        host: &str,
        credentials_ref: &str,
    ) -> Result<ClusterRecord> {
        let mut state = self.state.lock().await;

        let cluster_record = state
            .clusters
            .get(cluster)
            .cloned()
            .ok_or_else(|| OrchestratorError::ClusterNotFound(cluster.to_string()))?;

        let record = state
            .hosts
            .entry(host.to_string())
            .or_insert_with(|| HostRecord::new(host, credentials_ref));

        if let Some(member_of) = &record.cluster {
            return Err(OrchestratorError::AlreadyJoined {
                host: host.to_string(),
                cluster: member_of.clone(),
            });
        }

        if record.health == HealthState::Joining {
            return Err(OrchestratorError::JoinInProgress(host.to_string()));
        }

        record.health = HealthState::Joining;
        record.credentials_ref = credentials_ref.to_string();
        record.updated_at = Utc::now();

        Ok(cluster_record)
    }

    /// Commit a successful join: membership, health, and the cluster's
    /// member set change together
    pub async fn commit_join(&self, cluster: &str, host: &str) -> Result<()> {
        let mut state = self.state.lock().await;

        if !state.clusters.contains_key(cluster) {
            return Err(OrchestratorError::ClusterNotFound(cluster.to_string()));
        }

        let record = state
            .hosts
            .get_mut(host)
            .ok_or_else(|| OrchestratorError::HostNotFound(host.to_string()))?;

        record.cluster = Some(cluster.to_string());
        record.health = HealthState::Joined;
        record.updated_at = Utc::now();

        if let Some(cluster_record) = state.clusters.get_mut(cluster) {
            cluster_record.members.insert(host.to_string());
        }

        Ok(())
    }

    /// Release a host claimed by `begin_join` after a failed attempt,
    /// leaving membership unset
    pub async fn fail_join(&self, host: &str, health: HealthState) {
        let mut state = self.state.lock().await;
        if let Some(record) = state.hosts.get_mut(host) {
            record.cluster = None;
            record.health = health;
            record.updated_at = Utc::now();
        }
    }

    /// Mark a host's post-join configuration as failed; membership is
    /// untouched
    pub async fn mark_config_failed(&self, host: &str) {
        let mut state = self.state.lock().await;
        if let Some(record) = state.hosts.get_mut(host) {
            record.health = HealthState::ConfigFailed;
            record.updated_at = Utc::now();
        }
    }

    /// Record the configuration a reconcile pass converged on
    pub async fn record_reconciled(
        &self,
        host: &str,
        dns: Option<&[String]>,
        ntp: Option<&[String]>,
    ) {
        let mut state = self.state.lock().await;
        if let Some(record) = state.hosts.get_mut(host) {
            if let Some(dns) = dns {
                record.last_dns = dns.to_vec();
            }
            if let Some(ntp) = ntp {
                record.last_ntp = ntp.to_vec();
            }
            record.reconciled_at = Some(Utc::now());
            record.updated_at = Utc::now();
        }
    }

    /// Snapshot the whole inventory for persistence
    pub async fn snapshot(&self) -> InventorySnapshot {
        let state = self.state.lock().await;

        let mut hosts: Vec<HostRecord> = state.hosts.values().cloned().collect();
        hosts.sort_by(|a, b| a.address.cmp(&b.address));

        let mut clusters: Vec<ClusterRecord> = state.clusters.values().cloned().collect();
        clusters.sort_by(|a, b| a.name.cmp(&b.name));

        InventorySnapshot {
            version: InventorySnapshot::CURRENT_VERSION,
            saved_at: Utc::now(),
            hosts,
            clusters,
        }
    }

    /// Replace the inventory contents from a snapshot
    pub async fn restore(&self, snapshot: InventorySnapshot) {
        let mut state = self.state.lock().await;

        state.hosts = snapshot
            .hosts
            .into_iter()
            .map(|h| (h.address.clone(), h))
            .collect();
        state.clusters = snapshot
            .clusters
            .into_iter()
            .map(|c| (c.name.clone(), c))
            .collect();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_get_and_upsert() {
        let inventory = HostInventory::new();
        assert!(inventory.get("10.0.0.5").await.is_none());

        inventory.upsert(HostRecord::new("10.0.0.5", "esx-lab")).await;

        let record = inventory.get("10.0.0.5").await.unwrap();
        assert_eq!(record.credentials_ref, "esx-lab");
        assert_eq!(record.health, HealthState::Unknown);
        assert!(record.cluster.is_none());
    }

    #[tokio::test]
    async fn test_remove_missing_host() {
        let inventory = HostInventory::new();
        let err = inventory.remove("10.0.0.5").await.unwrap_err();
        assert!(matches!(err, OrchestratorError::HostNotFound(_)));
    }

    #[tokio::test]
    async fn test_list_by_cluster_ordering() {
        let inventory = HostInventory::new();
        inventory
            .register_cluster(ClusterRecord::new("prod-1", "prod-vcenter"))
            .await
            .unwrap();

        for address in ["10.0.0.9", "10.0.0.2", "10.0.0.5"] {
            inventory.begin_join("prod-1", address, "esx-lab").await.unwrap();
            inventory.commit_join("prod-1", address).await.unwrap();
        }

        let members = inventory.list_by_cluster("prod-1").await;
        let addresses: Vec<&str> = members.iter().map(|h| h.address.as_str()).collect();
        assert_eq!(addresses, vec!["10.0.0.2", "10.0.0.5", "10.0.0.9"]);
    }

    #[tokio::test]
    async fn test_begin_join_requires_cluster() {
        let inventory = HostInventory::new();
        let err = inventory
            .begin_join("prod-1", "10.0.0.5", "esx-lab")
            .await
            .unwrap_err();
        assert!(matches!(err, OrchestratorError::ClusterNotFound(_)));
        // No partially-claimed record may survive a failed validation
        assert!(inventory.get("10.0.0.5").await.is_none());
    }

    #[tokio::test]
    async fn test_begin_join_rejects_member() {
        let inventory = HostInventory::new();
        inventory
            .register_cluster(ClusterRecord::new("prod-1", "prod-vcenter"))
            .await
            .unwrap();
        inventory
            .register_cluster(ClusterRecord::new("prod-2", "prod-vcenter"))
            .await
            .unwrap();

        inventory.begin_join("prod-1", "10.0.0.5", "esx-lab").await.unwrap();
        inventory.commit_join("prod-1", "10.0.0.5").await.unwrap();

        // Membership in any cluster blocks a new join
        let err = inventory
            .begin_join("prod-2", "10.0.0.5", "esx-lab")
            .await
            .unwrap_err();
        assert!(
            matches!(err, OrchestratorError::AlreadyJoined { ref cluster, .. } if cluster == "prod-1")
        );
    }

    #[tokio::test]
    async fn test_begin_join_rejects_in_flight_join() {
        let inventory = HostInventory::new();
        inventory
            .register_cluster(ClusterRecord::new("prod-1", "prod-vcenter"))
            .await
            .unwrap();

        inventory.begin_join("prod-1", "10.0.0.5", "esx-lab").await.unwrap();

        let err = inventory
            .begin_join("prod-1", "10.0.0.5", "esx-lab")
            .await
            .unwrap_err();
        assert!(matches!(err, OrchestratorError::JoinInProgress(_)));
    }

    #[tokio::test]
    async fn test_commit_join_updates_both_sides() {
        let inventory = HostInventory::new();
        inventory
            .register_cluster(ClusterRecord::new("prod-1", "prod-vcenter"))
            .await
            .unwrap();

        inventory.begin_join("prod-1", "10.0.0.5", "esx-lab").await.unwrap();
        inventory.commit_join("prod-1", "10.0.0.5").await.unwrap();

        let record = inventory.get("10.0.0.5").await.unwrap();
        assert_eq!(record.cluster.as_deref(), Some("prod-1"));
        assert_eq!(record.health, HealthState::Joined);

        let cluster = inventory.get_cluster("prod-1").await.unwrap();
        assert!(cluster.members.contains("10.0.0.5"));
    }

    #[tokio::test]
    async fn test_fail_join_leaves_no_membership() {
        let inventory = HostInventory::new();
        inventory
            .register_cluster(ClusterRecord::new("prod-1", "prod-vcenter"))
            .await
            .unwrap();

        inventory.begin_join("prod-1", "10.0.0.5", "esx-lab").await.unwrap();
        inventory.fail_join("10.0.0.5", HealthState::Unreachable).await;

        let record = inventory.get("10.0.0.5").await.unwrap();
        assert!(record.cluster.is_none());
        assert_eq!(record.health, HealthState::Unreachable);

        let cluster = inventory.get_cluster("prod-1").await.unwrap();
        assert!(cluster.members.is_empty());

        // The host is free to be claimed again
        inventory.begin_join("prod-1", "10.0.0.5", "esx-lab").await.unwrap();
    }

    #[tokio::test]
    async fn test_remove_joined_host_updates_cluster() {
        let inventory = HostInventory::new();
        inventory
            .register_cluster(ClusterRecord::new("prod-1", "prod-vcenter"))
            .await
            .unwrap();

        inventory.begin_join("prod-1", "10.0.0.5", "esx-lab").await.unwrap();
        inventory.commit_join("prod-1", "10.0.0.5").await.unwrap();

        inventory.remove("10.0.0.5").await.unwrap();
        let cluster = inventory.get_cluster("prod-1").await.unwrap();
        assert!(cluster.members.is_empty());
    }

    #[tokio::test]
    async fn test_remove_cluster_refused_with_members() {
        let inventory = HostInventory::new();
        inventory
            .register_cluster(ClusterRecord::new("prod-1", "prod-vcenter"))
            .await
            .unwrap();

        inventory.begin_join("prod-1", "10.0.0.5", "esx-lab").await.unwrap();
        inventory.commit_join("prod-1", "10.0.0.5").await.unwrap();

        let err = inventory.remove_cluster("prod-1").await.unwrap_err();
        assert!(matches!(err, OrchestratorError::ClusterNotEmpty(_)));

        inventory.remove("10.0.0.5").await.unwrap();
        inventory.remove_cluster("prod-1").await.unwrap();
    }

    #[tokio::test]
    async fn test_register_cluster_rejects_duplicate() {
        let inventory = HostInventory::new();
        inventory
            .register_cluster(ClusterRecord::new("prod-1", "prod-vcenter"))
            .await
            .unwrap();

        let err = inventory
            .register_cluster(ClusterRecord::new("prod-1", "other"))
            .await
            .unwrap_err();
        assert!(matches!(err, OrchestratorError::ClusterAlreadyRegistered(_)));
    }

    #[tokio::test]
    async fn test_record_reconciled() {
        let inventory = HostInventory::new();
        inventory.upsert(HostRecord::new("10.0.0.5", "esx-lab")).await;

        let dns = vec!["10.0.0.53".to_string()];
        inventory.record_reconciled("10.0.0.5", Some(&dns), None).await;

        let record = inventory.get("10.0.0.5").await.unwrap();
        assert_eq!(record.last_dns, dns);
        assert!(record.last_ntp.is_empty());
        assert!(record.reconciled_at.is_some());
    }

    #[tokio::test]
    async fn test_snapshot_restore_roundtrip() {
        let inventory = HostInventory::new();
        inventory
            .register_cluster(ClusterRecord::new("prod-1", "prod-vcenter"))
            .await
            .unwrap();
        inventory.begin_join("prod-1", "10.0.0.5", "esx-lab").await.unwrap();
        inventory.commit_join("prod-1", "10.0.0.5").await.unwrap();

        let snapshot = inventory.snapshot().await;
        assert_eq!(snapshot.version, InventorySnapshot::CURRENT_VERSION);

        let restored = HostInventory::new();
        restored.restore(snapshot).await;

        let record = restored.get("10.0.0.5").await.unwrap();
        assert_eq!(record.cluster.as_deref(), Some("prod-1"));
        assert_eq!(restored.list_by_cluster("prod-1").await.len(), 1);
    }
}
