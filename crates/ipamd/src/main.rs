// # ipamd - IPAM Record Reconciliation Daemon
//
// This daemon is a THIN integration layer:
// - DO NOT add record logic, attribute merging or retry logic here
// - All reconciliation logic lives in ipam-core
// - Configuration is via environment variables ONLY
//
// The ipamd daemon is responsible for:
// 1. Reading configuration from environment variables
// 2. Loading the declared records
// 3. Registering gateways and creating the state store
// 4. Running reconciliation passes, once or on an interval
//
// ## Configuration
//
// ### Gateway
// - `IPAM_GATEWAY_TYPE`: Gateway type (wapi)
// - `IPAM_WAPI_URL`: Grid master base URL
// - `IPAM_WAPI_USERNAME` / `IPAM_WAPI_PASSWORD`: API credentials
// - `IPAM_WAPI_VERSION`: WAPI version (default 2.12)
// - `IPAM_MODE`: set to `dry-run` to log writes instead of performing them
//
// ### Records
// - `IPAM_RECORDS_FILE`: JSON array of declared records, each with a unique `name`
//
// ### State Store
// - `IPAM_STATE_STORE_TYPE`: Type of state store (file, memory)
// - `IPAM_STATE_STORE_PATH`: Path to state file (for file store)
//
// ### Scheduling
// - `IPAM_INTERVAL_SECS`: Seconds between passes; unset runs one pass and exits
// - `IPAM_LOG_LEVEL`: trace, debug, info, warn, error
//
// ## Example
//
// ```bash
// export IPAM_WAPI_URL=https://gm.example.com
// export IPAM_WAPI_USERNAME=admin
// export IPAM_WAPI_PASSWORD=secret
// export IPAM_RECORDS_FILE=/etc/ipam/records.json
// export IPAM_STATE_STORE_TYPE=file
// export IPAM_STATE_STORE_PATH=/var/lib/ipam/state.json
//
// ipamd
// ```

use anyhow::{Context, Result};
use ipam_core::config::ReconcilerSettings;
use ipam_core::{
    GatewayConfig, GatewayRegistry, IpamConfig, ReconcileEvent, Reconciler,
    RecordConfig, StateStoreConfig,
};
use std::env;
use std::process::ExitCode;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{Level, error, info, warn};
use tracing_subscriber::FmtSubscriber;

#[cfg(unix)]
use tokio::signal::unix::{SignalKind, signal};

/// Exit codes for different termination scenarios
///
/// These codes follow systemd conventions:
/// - 0: Clean shutdown
/// - 1: Configuration or startup error
/// - 2: Runtime error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum IpamExitCode {
    /// Clean shutdown (normal exit)
    CleanShutdown = 0,
    /// Configuration error or startup failure
    ConfigError = 1,
    /// Runtime error, including a one-shot pass with failed records
    RuntimeError = 2,
}

impl From<IpamExitCode> for ExitCode {
    fn from(code: IpamExitCode) -> Self {
        ExitCode::from(code as u8)
    }
}

/// Daemon configuration as read from the environment
#[derive(Debug)]
struct Config {
    gateway_type: String,
    wapi_url: String,
    wapi_username: String,
    wapi_password: String,
    wapi_version: String,
    records_file: String,
    state_store_type: String,
    state_store_path: Option<String>,
    interval_secs: Option<u64>,
    log_level: String,
}

impl Config {
    /// Load configuration from environment variables
    fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup(var: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let interval_secs = match var("IPAM_INTERVAL_SECS") {
            Some(raw) => Some(
                raw.trim()
                    .parse::<u64>()
                    .with_context(|| format!("IPAM_INTERVAL_SECS is not a number: {}", raw))?,
            ),
            None => None,
        };

        Ok(Self {
            gateway_type: var("IPAM_GATEWAY_TYPE").unwrap_or_else(|| "wapi".to_string()),
            wapi_url: var("IPAM_WAPI_URL").unwrap_or_default(),
            wapi_username: var("IPAM_WAPI_USERNAME").unwrap_or_default(),
            wapi_password: var("IPAM_WAPI_PASSWORD").unwrap_or_default(),
            wapi_version: var("IPAM_WAPI_VERSION").unwrap_or_else(|| "2.12".to_string()),
            records_file: var("IPAM_RECORDS_FILE").unwrap_or_default(),
            state_store_type: var("IPAM_STATE_STORE_TYPE").unwrap_or_else(|| "file".to_string()),
            state_store_path: var("IPAM_STATE_STORE_PATH"),
            interval_secs,
            log_level: var("IPAM_LOG_LEVEL").unwrap_or_else(|| "info".to_string()),
        })
    }

    /// Validate the settings that do not depend on other crates
    fn validate(&self) -> Result<()> {
        match self.gateway_type.as_str() {
            "wapi" => {}
            _ => anyhow::bail!(
                "IPAM_GATEWAY_TYPE '{}' is not supported. Supported gateways: wapi",
                self.gateway_type
            ),
        }

        if self.records_file.is_empty() {
            anyhow::bail!(
                "IPAM_RECORDS_FILE is required. \
                Set it via: export IPAM_RECORDS_FILE=/etc/ipam/records.json"
            );
        }

        match self.state_store_type.as_str() {
            "file" => {
                let Some(path) = self.state_store_path.as_deref().filter(|p| !p.is_empty()) else {
                    anyhow::bail!(
                        "IPAM_STATE_STORE_PATH is required when IPAM_STATE_STORE_TYPE=file. \
                        Set it via: export IPAM_STATE_STORE_PATH=/var/lib/ipam/state.json"
                    );
                };

                if let Some(parent) = std::path::Path::new(path).parent()
                    && !parent.as_os_str().is_empty()
                    && !parent.exists()
                {
                    anyhow::bail!(
                        "IPAM_STATE_STORE_PATH parent directory does not exist: {}. \
                        Create it first: sudo mkdir -p {}",
                        parent.display(),
                        parent.display()
                    );
                }
            }
            "memory" => {}
            _ => anyhow::bail!(
                "IPAM_STATE_STORE_TYPE '{}' is not supported. Supported types: file, memory",
                self.state_store_type
            ),
        }

        if let Some(interval) = self.interval_secs
            && interval == 0
        {
            anyhow::bail!("IPAM_INTERVAL_SECS must be at least 1 second");
        }

        parse_level(&self.log_level)?;
        Ok(())
    }

    /// Assemble the library configuration, loading the declared records
    fn into_ipam_config(self) -> Result<IpamConfig> {
        let gateway = GatewayConfig::Wapi {
            url: self.wapi_url,
            username: self.wapi_username,
            password: self.wapi_password,
            wapi_version: self.wapi_version,
            dry_run: false,
        };

        let state_store = match self.state_store_type.as_str() {
            "memory" => StateStoreConfig::Memory,
            _ => StateStoreConfig::File {
                path: self.state_store_path.unwrap_or_default(),
            },
        };

        let config = IpamConfig {
            gateway,
            state_store,
            records: load_records(&self.records_file)?,
            reconciler: ReconcilerSettings::default(),
        };
        config.validate()?;
        Ok(config)
    }
}

fn parse_level(level: &str) -> Result<Level> {
    match level.to_lowercase().as_str() {
        "trace" => Ok(Level::TRACE),
        "debug" => Ok(Level::DEBUG),
        "info" => Ok(Level::INFO),
        "warn" => Ok(Level::WARN),
        "error" => Ok(Level::ERROR),
        _ => anyhow::bail!(
            "IPAM_LOG_LEVEL '{}' is not valid. Valid levels: trace, debug, info, warn, error",
            level
        ),
    }
}

/// Read the declared records file
fn load_records(path: &str) -> Result<Vec<RecordConfig>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read IPAM_RECORDS_FILE {}", path))?;
    let records: Vec<RecordConfig> = serde_json::from_str(&content)
        .with_context(|| format!("Invalid records in {}", path))?;
    Ok(records)
}

fn main() -> ExitCode {
    let config = match Config::from_env() {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Configuration error: {:#}", e);
            return IpamExitCode::ConfigError.into();
        }
    };

    if let Err(e) = config.validate() {
        eprintln!("Configuration validation error: {:#}", e);
        return IpamExitCode::ConfigError.into();
    }

    let log_level = parse_level(&config.log_level).unwrap_or(Level::INFO);
    let subscriber = FmtSubscriber::builder().with_max_level(log_level).finish();
    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Failed to set tracing subscriber: {}", e);
        return IpamExitCode::ConfigError.into();
    }

    let interval = config.interval_secs.map(Duration::from_secs);
    let ipam_config = match config.into_ipam_config() {
        Ok(cfg) => cfg,
        Err(e) => {
            error!("Configuration error: {:#}", e);
            return IpamExitCode::ConfigError.into();
        }
    };

    info!("Starting ipamd daemon");
    info!("Configuration loaded: {} record(s)", ipam_config.records.len());

    let rt = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            error!("Failed to create tokio runtime: {}", e);
            return IpamExitCode::RuntimeError.into();
        }
    };

    rt.block_on(run_daemon(ipam_config, interval)).into()
}

/// Wire components together and run passes until done or signalled
async fn run_daemon(config: IpamConfig, interval: Option<Duration>) -> IpamExitCode {
    let registry = GatewayRegistry::new();

    #[cfg(feature = "wapi")]
    {
        info!("Registering WAPI gateway");
        ipam_gateway_wapi::register(&registry);
    }

    let gateway = match registry.create_gateway(&config.gateway) {
        Ok(gateway) => gateway,
        Err(e) => {
            error!("Failed to create gateway: {}", e);
            return IpamExitCode::ConfigError;
        }
    };

    let state_store = match registry.create_state_store(&config.state_store).await {
        Ok(store) => store,
        Err(e) => {
            error!("Failed to create state store: {}", e);
            return IpamExitCode::ConfigError;
        }
    };

    let (reconciler, events) = match Reconciler::new(gateway, state_store, &config.reconciler) {
        Ok(pair) => pair,
        Err(e) => {
            error!("Failed to create reconciler: {}", e);
            return IpamExitCode::ConfigError;
        }
    };

    let logger = tokio::spawn(log_events(events));

    let code = match interval {
        None => match reconciler.reconcile_all(&config.records).await {
            Ok(summary) if summary.is_clean() => IpamExitCode::CleanShutdown,
            Ok(_) => IpamExitCode::RuntimeError,
            Err(e) => {
                error!("Reconciliation pass failed: {}", e);
                IpamExitCode::RuntimeError
            }
        },
        Some(every) => match run_periodic(&reconciler, &config.records, every).await {
            Ok(signal) => {
                info!("Received shutdown signal: {}", signal);
                IpamExitCode::CleanShutdown
            }
            Err(e) => {
                error!("Daemon error: {:#}", e);
                IpamExitCode::RuntimeError
            }
        },
    };

    // Closing the event channel lets the logger finish
    drop(reconciler);
    if let Err(e) = logger.await {
        warn!("Event logger ended abnormally: {}", e);
    }

    info!("Shutting down daemon");
    code
}

/// Run a pass every `every` until a shutdown signal arrives
///
/// Failed records are retried on the next pass; only state store failures
/// end the loop.
async fn run_periodic(
    reconciler: &Reconciler,
    records: &[RecordConfig],
    every: Duration,
) -> Result<&'static str> {
    let shutdown = wait_for_shutdown();
    tokio::pin!(shutdown);

    let mut ticker = tokio::time::interval(every);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            signal = &mut shutdown => return signal,
            _ = ticker.tick() => {
                reconciler.reconcile_all(records).await?;
            }
        }
    }
}

async fn log_events(mut events: mpsc::Receiver<ReconcileEvent>) {
    while let Some(event) = events.recv().await {
        match event {
            ReconcileEvent::Created { fqdn, ipv6_addr, reference } => {
                info!("Created {} -> {} ({})", fqdn, ipv6_addr, reference)
            }
            ReconcileEvent::Adopted { fqdn, reference } => info!("Adopted {} ({})", fqdn, reference),
            ReconcileEvent::Updated { fqdn, ipv6_addr } => info!("Updated {} -> {}", fqdn, ipv6_addr),
            ReconcileEvent::Recreated { fqdn, previous_addr, ipv6_addr } => {
                info!("Recreated {}: {} -> {}", fqdn, previous_addr, ipv6_addr)
            }
            ReconcileEvent::Deleted { reference } => info!("Deleted {}", reference),
            ReconcileEvent::Drifted { fqdn, keys } => {
                warn!("Attributes of {} changed remotely: {}", fqdn, keys.join(", "))
            }
            ReconcileEvent::ReferenceRecovered { fqdn, previous, current } => {
                warn!("Reference of {} moved: {} -> {}", fqdn, previous, current)
            }
            ReconcileEvent::Failed { key, error, retryable } => {
                error!("Record {} failed (retryable: {}): {}", key, retryable, error)
            }
        }
    }
}

/// Wait for SIGTERM or SIGINT
#[cfg(unix)]
async fn wait_for_shutdown() -> Result<&'static str> {
    let mut sigterm = signal(SignalKind::terminate())
        .map_err(|e| anyhow::anyhow!("Failed to setup SIGTERM handler: {}", e))?;
    let mut sigint = signal(SignalKind::interrupt())
        .map_err(|e| anyhow::anyhow!("Failed to setup SIGINT handler: {}", e))?;

    Ok(tokio::select! {
        _ = sigterm.recv() => "SIGTERM",
        _ = sigint.recv() => "SIGINT",
    })
}

/// Wait for CTRL-C
///
/// Fallback implementation for non-Unix platforms.
#[cfg(not(unix))]
async fn wait_for_shutdown() -> Result<&'static str> {
    tokio::signal::ctrl_c()
        .await
        .map_err(|e| anyhow::anyhow!("Failed to wait for CTRL-C: {}", e))?;
    Ok("SIGINT")
}
