//! Join workflow: taking a host from unmanaged to cluster member
//!
//! Each join request walks a small state machine: Requested, Validating,
//! Adding, then Joined, with failure terminal from the two middle states.
//! The host probe is never retried; a failed probe must be resubmitted by
//! the caller. Only the add-host call against the cluster manager
//! retries, and only on transient failures.

use std::sync::Arc;
use tokio::sync::watch;
use tokio::time::sleep;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::credentials::CredentialProvider;
use crate::inventory::{HealthState, HostInventory};
use crate::reconcile::{ConfigReconciler, DesiredNetworkConfig};
use crate::retry::RetryPolicy;
use crate::session::ConnectionManager;
use crate::transport::{Endpoint, HostConnectSpec};
use crate::OrchestratorError;

/// A request to join one host into one cluster
#[derive(Debug, Clone)]
pub struct JoinRequest {
    /// Target cluster name (must be registered in the inventory)
    pub cluster: String,

    /// Address of the host to join
    pub host: String,

    /// Credential profile used to reach the host itself
    pub host_instance: String,

    /// Credential profile of the cluster manager; defaults to the one the
    /// cluster was registered with
    pub management_instance: Option<String>,

    /// Post-join desired state hints, applied synchronously after the join
    pub desired: DesiredNetworkConfig,
}

impl JoinRequest {
    pub fn new(
        cluster: impl Into<String>,
        host: impl Into<String>,
        host_instance: impl Into<String>,
    ) -> Self {
        Self {
            cluster: cluster.into(),
            host: host.into(),
            host_instance: host_instance.into(),
            management_instance: None,
            desired: DesiredNetworkConfig::default(),
        }
    }

    pub fn with_desired(mut self, desired: DesiredNetworkConfig) -> Self {
        self.desired = desired;
        self
    }

    pub fn with_management_instance(mut self, instance: impl Into<String>) -> Self {
        self.management_instance = Some(instance.into());
        self
    }
}

/// Structured result of a join request
///
/// `success` is true whenever the host became a cluster member, including
/// the partial case where post-join configuration failed; callers branch
/// on `final_state` to tell the two apart.
#[derive(Debug)]
pub struct JoinOutcome {
    pub request_id: Uuid,
    pub cluster: String,
    pub host: String,
    pub success: bool,
    pub final_state: HealthState,
    pub error: Option<OrchestratorError>,
}

impl JoinOutcome {
    /// Joined, but DNS/NTP reconciliation did not converge
    pub fn is_partial(&self) -> bool {
        self.success && self.final_state == HealthState::ConfigFailed
    }
}

/// Drives the join workflow end to end
#[derive(Clone)]
pub struct JoinOrchestrator {
    connections: Arc<ConnectionManager>,
    inventory: HostInventory,
    credentials: Arc<dyn CredentialProvider>,
    reconciler: ConfigReconciler,
    retry: RetryPolicy,
}

impl JoinOrchestrator {
    pub fn new(
        connections: Arc<ConnectionManager>,
        inventory: HostInventory,
        credentials: Arc<dyn CredentialProvider>,
        reconciler: ConfigReconciler,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            connections,
            inventory,
            credentials,
            reconciler,
            retry,
        }
    }

    /// Join a host into a cluster
    pub async fn join_host(&self, request: JoinRequest) -> JoinOutcome {
        let (_cancel_tx, cancel_rx) = watch::channel(false);
        self.join_host_with_cancel(request, cancel_rx).await
    }

    /// Join a host into a cluster, honoring a cancel signal
    ///
    /// Cancellation is observed between steps and between retry attempts.
    /// Once the remote add has succeeded the signal is ignored: an
    /// external system is never silently rolled back, so a late cancel
    /// reports the completed join instead.
    pub async fn join_host_with_cancel(
        &self,
        request: JoinRequest,
        cancel: watch::Receiver<bool>,
    ) -> JoinOutcome {
        let request_id = Uuid::new_v4();
        info!(
            "Join request {}: host {} into cluster {}",
            request_id, request.host, request.cluster
        );

        // Validation claims the host atomically; a concurrent join for the
        // same host fails fast here instead of racing to the remote side.
        let cluster_record = match self
            .inventory
            .begin_join(&request.cluster, &request.host, &request.host_instance)
            .await
        {
            Ok(record) => record,
            Err(e) => {
                warn!("Join request {} rejected: {}", request_id, e);
                let final_state = self
                    .inventory
                    .get(&request.host)
                    .await
                    .map(|r| r.health)
                    .unwrap_or(HealthState::Unknown);
                return self.outcome(request_id, &request, false, final_state, Some(e));
            }
        };

        let host_creds = match self.credentials.resolve(&request.host_instance).await {
            Ok(creds) => creds,
            Err(e) => {
                self.inventory
                    .fail_join(&request.host, HealthState::Unknown)
                    .await;
                return self.outcome(request_id, &request, false, HealthState::Unknown, Some(e));
            }
        };

        if *cancel.borrow() {
            return self
                .cancelled(request_id, &request, HealthState::Unknown)
                .await;
        }

        // Probe the host itself: reachability and credential validity.
        // Not retried; the caller must resubmit after fixing the cause.
        let host_endpoint = Endpoint::for_host(&request.host, &host_creds);
        if let Err(e) = self.connections.acquire(&host_endpoint, &host_creds).await {
            let (mapped, health) = match &e {
                OrchestratorError::AuthenticationFailed(_) => (
                    OrchestratorError::HostAuthFailed {
                        host: request.host.clone(),
                        reason: e.to_string(),
                    },
                    HealthState::Reachable,
                ),
                _ => (
                    OrchestratorError::HostUnreachable {
                        host: request.host.clone(),
                        reason: e.to_string(),
                    },
                    HealthState::Unreachable,
                ),
            };

            warn!("Join request {} host probe failed: {}", request_id, mapped);
            self.inventory.fail_join(&request.host, health).await;
            return self.outcome(request_id, &request, false, health, Some(mapped));
        }

        // Ask the cluster manager to add the host, retrying transient
        // failures with exponential backoff.
        let management_instance = request
            .management_instance
            .clone()
            .unwrap_or_else(|| cluster_record.instance.clone());

        let mgmt_creds = match self.credentials.resolve(&management_instance).await {
            Ok(creds) => creds,
            Err(e) => {
                self.inventory
                    .fail_join(&request.host, HealthState::Reachable)
                    .await;
                return self.outcome(request_id, &request, false, HealthState::Reachable, Some(e));
            }
        };

        let mgmt_endpoint = Endpoint::from_credentials(&mgmt_creds);
        let connect_spec = HostConnectSpec::new(&request.host, &host_creds);

        let mut attempt = 0u32;
        let add_result = loop {
            if *cancel.borrow() {
                break Err(OrchestratorError::Cancelled(request.host.clone()));
            }

            attempt += 1;

            let result = async {
                let session = self.connections.acquire(&mgmt_endpoint, &mgmt_creds).await?;
                self.connections
                    .transport()
                    .add_host_to_cluster(&session, &request.cluster, &connect_spec)
                    .await
            }
            .await;

            match result {
                Ok(()) => break Ok(()),
                Err(e) if e.is_transient() && !self.retry.exhausted(attempt) => {
                    let delay = self.retry.delay_after(attempt);
                    warn!(
                        "Add-host for {} failed (attempt {}/{}): {}, retrying in {:?}",
                        request.host, attempt, self.retry.max_attempts, e, delay
                    );
                    sleep(delay).await;
                }
                Err(e) => break Err(e),
            }
        };

        if let Err(e) = add_result {
            if matches!(e, OrchestratorError::Cancelled(_)) {
                return self
                    .cancelled(request_id, &request, HealthState::Reachable)
                    .await;
            }

            error!(
                "Join request {} failed after {} attempt(s): {}",
                request_id, attempt, e
            );
            self.inventory
                .fail_join(&request.host, HealthState::Reachable)
                .await;
            return self.outcome(request_id, &request, false, HealthState::Reachable, Some(e));
        }

        // The remote side committed; membership and cluster member set
        // change together from here on.
        if let Err(e) = self
            .inventory
            .commit_join(&request.cluster, &request.host)
            .await
        {
            error!(
                "Join request {} succeeded remotely but the local commit failed: {}",
                request_id, e
            );
            self.inventory
                .fail_join(&request.host, HealthState::Reachable)
                .await;
            return self.outcome(request_id, &request, false, HealthState::Reachable, Some(e));
        }

        info!(
            "Join request {}: host {} is now a member of {}",
            request_id, request.host, request.cluster
        );

        if request.desired.is_empty() {
            return self.outcome(request_id, &request, true, HealthState::Joined, None);
        }

        // Post-join reconciliation. A failure here never rolls the join
        // back; the host stays a member and the outcome is partial.
        let report = self
            .reconciler
            .reconcile(&request.host, &host_creds, &request.desired)
            .await;

        match report.failure() {
            None => self.outcome(request_id, &request, true, HealthState::Joined, None),
            Some(e) => {
                warn!(
                    "Join request {} joined {} but configuration did not converge: {}",
                    request_id, request.host, e
                );
                self.outcome(request_id, &request, true, HealthState::ConfigFailed, Some(e))
            }
        }
    }

    async fn cancelled(
        &self,
        request_id: Uuid,
        request: &JoinRequest,
        health: HealthState,
    ) -> JoinOutcome {
        info!(
            "Join request {} cancelled before remote commit",
            request_id
        );
        self.inventory.fail_join(&request.host, health).await;
        self.outcome(
            request_id,
            request,
            false,
            health,
            Some(OrchestratorError::Cancelled(request.host.clone())),
        )
    }

    fn outcome(
        &self,
        request_id: Uuid,
        request: &JoinRequest,
        success: bool,
        final_state: HealthState,
        error: Option<OrchestratorError>,
    ) -> JoinOutcome {
        JoinOutcome {
            request_id,
            cluster: request.cluster.clone(),
            host: request.host.clone(),
            success,
            final_state,
            error,
        }
    }
}
