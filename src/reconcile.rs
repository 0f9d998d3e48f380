//! Declarative DNS/NTP reconciliation for managed hosts
//!
//! Reconciliation is compare-then-converge: fetch what the host currently
//! has, push only the components that differ. Server lists are ordered;
//! a reordering counts as drift because resolution priority follows list
//! order. DNS and NTP converge independently so a persistent failure on
//! one never blocks the other.

use std::fmt;
use std::sync::Arc;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

use crate::credentials::InstanceCredentials;
use crate::inventory::HostInventory;
use crate::retry::RetryPolicy;
use crate::session::{ConnectionManager, SessionHandle};
use crate::transport::{Endpoint, NetworkConfigUpdate};
use crate::OrchestratorError;

/// Desired host network settings supplied by the caller
///
/// Unpopulated components are left alone entirely.
#[derive(Debug, Clone, Default)]
pub struct DesiredNetworkConfig {
    pub dns_servers: Option<Vec<String>>,
    pub ntp_servers: Option<Vec<String>>,
}

impl DesiredNetworkConfig {
    pub fn is_empty(&self) -> bool {
        self.dns_servers.is_none() && self.ntp_servers.is_none()
    }
}

/// The independently reconciled configuration components
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigComponent {
    Dns,
    Ntp,
}

impl fmt::Display for ConfigComponent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigComponent::Dns => write!(f, "dns"),
            ConfigComponent::Ntp => write!(f, "ntp"),
        }
    }
}

/// Outcome of reconciling one component
#[derive(Debug, Clone)]
pub struct ComponentReport {
    pub component: ConfigComponent,
    /// Whether the host now matches the desired state
    pub converged: bool,
    /// Whether a write was issued (false when already matching)
    pub changed: bool,
    /// Write attempts made (0 when no write was needed)
    pub attempts: u32,
    pub error: Option<String>,
}

/// Outcome of one reconcile pass over a host
#[derive(Debug, Clone)]
pub struct ReconcileReport {
    pub host: String,
    pub components: Vec<ComponentReport>,
}

impl ReconcileReport {
    pub fn all_converged(&self) -> bool {
        self.components.iter().all(|c| c.converged)
    }

    pub fn failed_components(&self) -> Vec<ConfigComponent> {
        self.components
            .iter()
            .filter(|c| !c.converged)
            .map(|c| c.component)
            .collect()
    }

    /// Total writes issued during the pass
    pub fn writes(&self) -> u32 {
        self.components
            .iter()
            .filter(|c| c.changed)
            .map(|c| c.attempts)
            .sum()
    }

    /// Structured error describing the failed components, if any
    pub fn failure(&self) -> Option<OrchestratorError> {
        let failed = self.failed_components();
        if failed.is_empty() {
            return None;
        }

        let components = failed
            .iter()
            .map(|c| c.to_string())
            .collect::<Vec<_>>()
            .join(", ");

        Some(OrchestratorError::ReconcileFailed {
            host: self.host.clone(),
            components,
        })
    }
}

/// Applies desired DNS/NTP state to hosts and verifies convergence
#[derive(Clone)]
pub struct ConfigReconciler {
    connections: Arc<ConnectionManager>,
    inventory: HostInventory,
    retry: RetryPolicy,
}

impl ConfigReconciler {
    pub fn new(
        connections: Arc<ConnectionManager>,
        inventory: HostInventory,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            connections,
            inventory,
            retry,
        }
    }

    /// Reconcile a host's network configuration against desired state
    ///
    /// Always returns a structured report; failures are collected per
    /// component rather than propagated. Calling twice with unchanged
    /// desired state issues zero writes the second time.
    pub async fn reconcile(
        &self,
        host: &str,
        credentials: &InstanceCredentials,
        desired: &DesiredNetworkConfig,
    ) -> ReconcileReport {
        if desired.is_empty() {
            debug!("Nothing to reconcile for {}", host);
            return ReconcileReport {
                host: host.to_string(),
                components: Vec::new(),
            };
        }

        info!("Reconciling network configuration for {}", host);

        let endpoint = Endpoint::for_host(host, credentials);
        let session = match self.connections.acquire(&endpoint, credentials).await {
            Ok(session) => session,
            Err(e) => return self.fail_all(host, desired, &e).await,
        };

        let current = match self
            .connections
            .transport()
            .get_network_config(&session)
            .await
        {
            Ok(current) => current,
            Err(e) => return self.fail_all(host, desired, &e).await,
        };

        let mut components = Vec::new();

        if let Some(want) = &desired.dns_servers {
            components.push(
                self.converge(host, &session, ConfigComponent::Dns, &current.dns_servers, want)
                    .await,
            );
        }

        if let Some(want) = &desired.ntp_servers {
            components.push(
                self.converge(host, &session, ConfigComponent::Ntp, &current.ntp_servers, want)
                    .await,
            );
        }

        let report = ReconcileReport {
            host: host.to_string(),
            components,
        };

        self.record(host, desired, &report).await;
        report
    }

    /// Converge one component, retrying transient push failures
    async fn converge(
        &self,
        host: &str,
        session: &SessionHandle,
        component: ConfigComponent,
        current: &[String],
        want: &[String],
    ) -> ComponentReport {
        if current == want {
            debug!("{} already converged for {}", component, host);
            return ComponentReport {
                component,
                converged: true,
                changed: false,
                attempts: 0,
                error: None,
            };
        }

        let update = match component {
            ConfigComponent::Dns => NetworkConfigUpdate::dns(want.to_vec()),
            ConfigComponent::Ntp => NetworkConfigUpdate::ntp(want.to_vec()),
        };

        let mut attempt = 0u32;
        loop {
            attempt += 1;

            match self
                .connections
                .transport()
                .set_network_config(session, &update)
                .await
            {
                Ok(()) => {
                    info!("Pushed {} configuration to {}", component, host);
                    return ComponentReport {
                        component,
                        converged: true,
                        changed: true,
                        attempts: attempt,
                        error: None,
                    };
                }
                Err(e) if e.is_transient() && !self.retry.exhausted(attempt) => {
                    let delay = self.retry.delay_after(attempt);
                    warn!(
                        "{} push to {} failed (attempt {}/{}): {}, retrying in {:?}",
                        component, host, attempt, self.retry.max_attempts, e, delay
                    );
                    sleep(delay).await;
                }
                Err(e) => {
                    error!(
                        "{} push to {} failed permanently after {} attempt(s): {}",
                        component, host, attempt, e
                    );
                    return ComponentReport {
                        component,
                        converged: false,
                        changed: true,
                        attempts: attempt,
                        error: Some(e.to_string()),
                    };
                }
            }
        }
    }

    /// Report every requested component as failed with the same cause
    async fn fail_all(
        &self,
        host: &str,
        desired: &DesiredNetworkConfig,
        cause: &OrchestratorError,
    ) -> ReconcileReport {
        warn!("Reconciliation for {} could not start: {}", host, cause);

        let mut components = Vec::new();
        if desired.dns_servers.is_some() {
            components.push(ComponentReport {
                component: ConfigComponent::Dns,
                converged: false,
                changed: false,
                attempts: 0,
                error: Some(cause.to_string()),
            });
        }
        if desired.ntp_servers.is_some() {
            components.push(ComponentReport {
                component: ConfigComponent::Ntp,
                converged: false,
                changed: false,
                attempts: 0,
                error: Some(cause.to_string()),
            });
        }

        let report = ReconcileReport {
            host: host.to_string(),
            components,
        };

        self.record(host, desired, &report).await;
        report
    }

    /// Write the pass outcome back into the inventory
    async fn record(&self, host: &str, desired: &DesiredNetworkConfig, report: &ReconcileReport) {
        let converged = |component: ConfigComponent| {
            report
                .components
                .iter()
                .any(|c| c.component == component && c.converged)
        };

        let dns = desired
            .dns_servers
            .as_deref()
            .filter(|_| converged(ConfigComponent::Dns));
        let ntp = desired
            .ntp_servers
            .as_deref()
            .filter(|_| converged(ConfigComponent::Ntp));

        if dns.is_some() || ntp.is_some() {
            self.inventory.record_reconciled(host, dns, ntp).await;
        }

        if !report.all_converged() {
            self.inventory.mark_config_failed(host).await;
        }
    }
}
