//! Hostmarshal - host-cluster lifecycle orchestration CLI

use clap::{Parser, Subcommand};
use std::sync::Arc;
use tracing::{debug, info};

use hostmarshal::{
    Config, ConfigReconciler, ConnectionManager, DesiredNetworkConfig, Endpoint,
    FileCredentialProvider, HostInventory, HostRecord, HttpTransport, JoinOrchestrator,
    JoinRequest, JsonFileStore, OrchestratorError, CredentialProvider, ClusterRecord,
    InventoryStore,
};

#[derive(Parser)]
#[command(name = "hostmarshal")]
#[command(version, about = "Host-cluster lifecycle orchestrator")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    debug: bool,

    /// Configuration file path
    #[arg(short, long, global = true)]
    config: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Join a host into a registered cluster
    JoinHost {
        /// Target cluster name
        #[arg(long)]
        cluster: String,

        /// Address of the host to join
        #[arg(long)]
        host: String,

        /// Credential profile used to reach the host
        #[arg(long)]
        host_instance: String,

        /// Credential profile of the cluster manager (defaults to the one
        /// the cluster was registered with)
        #[arg(long)]
        instance: Option<String>,

        /// Desired DNS servers, comma separated, in priority order
        #[arg(long)]
        dns: Option<String>,

        /// Desired NTP servers, comma separated, in priority order
        #[arg(long)]
        ntp: Option<String>,
    },

    /// Reconcile a host's DNS/NTP configuration against desired state
    ReconcileConfig {
        /// Address of the host
        #[arg(long)]
        host: String,

        /// Desired DNS servers, comma separated, in priority order
        #[arg(long)]
        dns: Option<String>,

        /// Desired NTP servers, comma separated, in priority order
        #[arg(long)]
        ntp: Option<String>,

        /// Credential profile used to reach the host (defaults to the
        /// host record's stored profile)
        #[arg(long)]
        instance: Option<String>,
    },

    /// Record a cluster in the local inventory
    RegisterCluster {
        /// Cluster name
        #[arg(long)]
        name: String,

        /// Credential profile of the cluster's management endpoint
        #[arg(long)]
        instance: String,

        /// Record the cluster with HA disabled
        #[arg(long)]
        no_ha: bool,

        /// Record the cluster with DRS disabled
        #[arg(long)]
        no_drs: bool,
    },

    /// List hosts in the inventory
    ListHosts {
        /// Only hosts that are members of this cluster
        #[arg(long)]
        cluster: Option<String>,
    },

    /// Remove a host record from the inventory
    RemoveHost {
        /// Address of the host
        #[arg(long)]
        host: String,
    },

    /// Test connectivity and credentials against a management endpoint
    TestConnection {
        /// Credential profile to test
        #[arg(long)]
        instance: String,
    },
}

#[tokio::main]
async fn main() -> Result<(), OrchestratorError> {
    let cli = Cli::parse();

    // Initialize logging
    let log_level = if cli.debug { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(format!("hostmarshal={log_level},warn"))
        .with_target(false)
        .init();

    info!("Starting hostmarshal v{}", env!("CARGO_PKG_VERSION"));

    let config = Config::load_or_default(cli.config.as_deref()).await?;

    let code = match cli.command {
        Commands::JoinHost {
            cluster,
            host,
            host_instance,
            instance,
            dns,
            ntp,
        } => join_host(&config, cluster, host, host_instance, instance, dns, ntp).await?,

        Commands::ReconcileConfig {
            host,
            dns,
            ntp,
            instance,
        } => reconcile_config(&config, host, dns, ntp, instance).await?,

        Commands::RegisterCluster {
            name,
            instance,
            no_ha,
            no_drs,
        } => register_cluster(&config, name, instance, no_ha, no_drs).await?,

        Commands::ListHosts { cluster } => list_hosts(&config, cluster).await?,

        Commands::RemoveHost { host } => remove_host(&config, host).await?,

        Commands::TestConnection { instance } => test_connection(&config, instance).await?,
    };

    if code != 0 {
        std::process::exit(code);
    }

    Ok(())
}

/// Split a comma-separated server list, preserving order
fn parse_server_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

async fn load_inventory(store: &JsonFileStore) -> Result<HostInventory, OrchestratorError> {
    let inventory = HostInventory::new();
    if let Some(snapshot) = store.load().await? {
        inventory.restore(snapshot).await;
    }
    Ok(inventory)
}

async fn save_inventory(
    store: &JsonFileStore,
    inventory: &HostInventory,
) -> Result<(), OrchestratorError> {
    store.save(&inventory.snapshot().await).await
}

async fn load_credentials(
    config: &Config,
) -> Result<Arc<FileCredentialProvider>, OrchestratorError> {
    let path = config.storage.credentials_file.to_string_lossy();
    Ok(Arc::new(FileCredentialProvider::load(&path).await?))
}

fn build_connections(config: &Config) -> Arc<ConnectionManager> {
    let transport = Arc::new(HttpTransport::new(config.request_timeout()));
    Arc::new(ConnectionManager::new(transport))
}

#[allow(clippy::too_many_arguments)]
async fn join_host(
    config: &Config,
    cluster: String,
    host: String,
    host_instance: String,
    instance: Option<String>,
    dns: Option<String>,
    ntp: Option<String>,
) -> Result<i32, OrchestratorError> {
    let store = JsonFileStore::new(&config.storage.inventory_file);
    let inventory = load_inventory(&store).await?;
    let credentials = load_credentials(config).await?;
    let connections = build_connections(config);

    let reconciler = ConfigReconciler::new(
        connections.clone(),
        inventory.clone(),
        config.reconcile_policy(),
    );
    let orchestrator = JoinOrchestrator::new(
        connections,
        inventory.clone(),
        credentials,
        reconciler,
        config.join_policy(),
    );

    let mut request = JoinRequest::new(cluster, host, host_instance);
    if let Some(instance) = instance {
        request = request.with_management_instance(instance);
    }
    request = request.with_desired(DesiredNetworkConfig {
        dns_servers: dns.as_deref().map(parse_server_list),
        ntp_servers: ntp.as_deref().map(parse_server_list),
    });

    let outcome = orchestrator.join_host(request).await;
    save_inventory(&store, &inventory).await?;

    if !outcome.success {
        match outcome.error {
            Some(e) => return Err(e),
            None => {
                return Err(OrchestratorError::Configuration(
                    "Join failed without a reported cause".to_string(),
                ))
            }
        }
    }

    if outcome.is_partial() {
        println!(
            "Host {} joined cluster {} but configuration did not converge",
            outcome.host, outcome.cluster
        );
        if let Some(e) = &outcome.error {
            println!("  {e}");
        }
        return Ok(2);
    }

    println!("✓ Host {} joined cluster {}", outcome.host, outcome.cluster);
    Ok(0)
}

async fn reconcile_config(
    config: &Config,
    host: String,
    dns: Option<String>,
    ntp: Option<String>,
    instance: Option<String>,
) -> Result<i32, OrchestratorError> {
    let desired = DesiredNetworkConfig {
        dns_servers: dns.as_deref().map(parse_server_list),
        ntp_servers: ntp.as_deref().map(parse_server_list),
    };

    if desired.is_empty() {
        return Err(OrchestratorError::Configuration(
            "Nothing to reconcile: supply --dns and/or --ntp".to_string(),
        ));
    }

    let store = JsonFileStore::new(&config.storage.inventory_file);
    let inventory = load_inventory(&store).await?;
    let credentials = load_credentials(config).await?;
    let connections = build_connections(config);
    let reconciler = ConfigReconciler::new(
        connections,
        inventory.clone(),
        config.reconcile_policy(),
    );

    let record = inventory.get(&host).await;
    let instance_name = match instance.or_else(|| record.as_ref().map(|r| r.credentials_ref.clone()))
    {
        Some(name) => name,
        None => {
            return Err(OrchestratorError::Configuration(format!(
                "Host {host} is not in the inventory; supply --instance"
            )))
        }
    };

    let creds = credentials.resolve(&instance_name).await?;

    // Results are recorded on the host record, so make sure one exists
    if record.is_none() {
        inventory.upsert(HostRecord::new(&host, &instance_name)).await;
    }

    let report = reconciler.reconcile(&host, &creds, &desired).await;
    save_inventory(&store, &inventory).await?;

    for component in &report.components {
        if component.converged {
            let action = if component.changed { "updated" } else { "already converged" };
            println!("✓ {}: {}", component.component, action);
        } else {
            println!(
                "✗ {}: failed after {} attempt(s): {}",
                component.component,
                component.attempts,
                component.error.as_deref().unwrap_or("unknown error")
            );
        }
    }

    if report.all_converged() {
        Ok(0)
    } else {
        Ok(1)
    }
}

async fn register_cluster(
    config: &Config,
    name: String,
    instance: String,
    no_ha: bool,
    no_drs: bool,
) -> Result<i32, OrchestratorError> {
    let store = JsonFileStore::new(&config.storage.inventory_file);
    let inventory = load_inventory(&store).await?;

    // Fail fast on an unknown or invalid management profile
    let credentials = load_credentials(config).await?;
    let creds = credentials.resolve(&instance).await?;
    debug!(
        "Cluster {} will use management endpoint {}",
        name,
        Endpoint::from_credentials(&creds)
    );

    let record = ClusterRecord::new(&name, &instance).with_policies(!no_ha, !no_drs);
    inventory.register_cluster(record).await?;
    save_inventory(&store, &inventory).await?;

    println!("✓ Registered cluster {name} (instance: {instance})");
    Ok(0)
}

async fn list_hosts(
    config: &Config,
    cluster: Option<String>,
) -> Result<i32, OrchestratorError> {
    let store = JsonFileStore::new(&config.storage.inventory_file);
    let inventory = load_inventory(&store).await?;

    let hosts = match &cluster {
        Some(name) => inventory.list_by_cluster(name).await,
        None => inventory.list_hosts().await,
    };

    if hosts.is_empty() {
        match cluster {
            Some(name) => println!("No hosts in cluster {name}"),
            None => println!("No hosts in inventory"),
        }
        return Ok(0);
    }

    println!("Found {} host(s):", hosts.len());
    for host in hosts {
        println!(
            "  • {} [{:?}] cluster: {}",
            host.address,
            host.health,
            host.cluster.as_deref().unwrap_or("-")
        );
    }

    Ok(0)
}

async fn remove_host(config: &Config, host: String) -> Result<i32, OrchestratorError> {
    let store = JsonFileStore::new(&config.storage.inventory_file);
    let inventory = load_inventory(&store).await?;

    let record = inventory.remove(&host).await?;
    save_inventory(&store, &inventory).await?;

    match record.cluster {
        Some(cluster) => println!("✓ Removed host {host} (was a member of {cluster})"),
        None => println!("✓ Removed host {host}"),
    }
    Ok(0)
}

async fn test_connection(config: &Config, instance: String) -> Result<i32, OrchestratorError> {
    let credentials = load_credentials(config).await?;
    let creds = credentials.resolve(&instance).await?;
    let connections = build_connections(config);
    let endpoint = Endpoint::from_credentials(&creds);

    info!("Testing connection to {}", endpoint);
    match connections.acquire(&endpoint, &creds).await {
        Ok(_) => {
            println!("✓ Connection to {endpoint} successful");
            connections.invalidate(&endpoint).await;
            Ok(0)
        }
        Err(e) => {
            println!("✗ Connection to {endpoint} failed: {e}");
            Err(e)
        }
    }
}
