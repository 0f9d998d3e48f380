//! Credential profiles for management endpoints and hosts
//!
//! Every connection the orchestrator opens is authenticated with an
//! `InstanceCredentials` resolved by name from a `CredentialProvider`.
//! Records in the inventory only ever store the profile name, never the
//! secret itself.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tokio::fs;
use tracing::debug;

use crate::{defaults, OrchestratorError, Result};

/// Resolved credentials for one named instance profile
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstanceCredentials {
    /// Address of the management service this profile belongs to
    pub address: String,

    /// Management service port
    #[serde(default = "default_port")]
    pub port: u16,

    /// Username with permission to change state
    pub username: String,

    /// Password for the username
    pub password: String,
}

fn default_port() -> u16 {
    defaults::MANAGEMENT_PORT
}

impl InstanceCredentials {
    /// Validate recognized fields; rejected profiles never reach a socket
    pub fn validate(&self) -> Result<()> {
        if self.address.is_empty() {
            return Err(OrchestratorError::Configuration(
                "Credential profile has an empty address".to_string(),
            ));
        }

        if self.port == 0 {
            return Err(OrchestratorError::Configuration(
                "Credential profile has an invalid port".to_string(),
            ));
        }

        if self.username.is_empty() {
            return Err(OrchestratorError::Configuration(
                "Credential profile has an empty username".to_string(),
            ));
        }

        if self.password.is_empty() {
            return Err(OrchestratorError::Configuration(
                "Credential profile has an empty password".to_string(),
            ));
        }

        Ok(())
    }
}

/// Source of named credential profiles
///
/// Passed explicitly into every component that opens connections; there is
/// no ambient global lookup.
#[async_trait]
pub trait CredentialProvider: Send + Sync {
    /// Resolve a profile by instance name
    async fn resolve(&self, instance: &str) -> Result<InstanceCredentials>;
}

/// TOML file backed credential provider
///
/// File format, one table per instance profile:
///
/// ```toml
/// [instances.prod-vcenter]
/// address = "10.0.0.2"
/// port = 443
/// username = "administrator"
/// password = "secret"
/// ```
#[derive(Debug)]
pub struct FileCredentialProvider {
    instances: HashMap<String, InstanceCredentials>,
}

#[derive(Debug, Deserialize)]
struct CredentialFile {
    #[serde(default)]
    instances: HashMap<String, InstanceCredentials>,
}

impl FileCredentialProvider {
    /// Load all profiles from a TOML file
    pub async fn load(path: &str) -> Result<Self> {
        let content = fs::read_to_string(path).await.map_err(|e| {
            OrchestratorError::Configuration(format!(
                "Failed to read credentials file {path}: {e}"
            ))
        })?;

        let file: CredentialFile = toml::from_str(&content)?;
        debug!(
            "Loaded {} credential profile(s) from {}",
            file.instances.len(),
            path
        );

        Ok(Self {
            instances: file.instances,
        })
    }

    /// Build a provider from already-resolved profiles
    pub fn from_profiles(instances: HashMap<String, InstanceCredentials>) -> Self {
        Self { instances }
    }

    /// Names of all loaded profiles
    pub fn instance_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.instances.keys().cloned().collect();
        names.sort();
        names
    }
}

#[async_trait]
impl CredentialProvider for FileCredentialProvider {
    async fn resolve(&self, instance: &str) -> Result<InstanceCredentials> {
        let credentials = self
            .instances
            .get(instance)
            .cloned()
            .ok_or_else(|| OrchestratorError::CredentialNotFound(instance.to_string()))?;

        credentials.validate()?;
        Ok(credentials)
    }
}
