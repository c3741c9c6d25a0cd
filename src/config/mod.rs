use std::fmt;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use config::builder::DefaultState;
use config::{Config, ConfigBuilder, ConfigError, Environment, File, FileFormat};
use serde::Deserialize;

use crate::address::EthAddress;

const ENV_PREFIX: &str = "FAUCET";

#[derive(Debug, Clone, Deserialize)]
pub struct FaucetConfig {
    pub server: ServerConfig,
    pub store: StoreConfig,
    pub chain: ChainConfig,
    pub drip: DripConfig,
    pub auth: AuthConfig,
    #[serde(default)]
    pub claims: ClaimsConfig,
    #[serde(default)]
    pub alerts: AlertsConfig,
}

impl FaucetConfig {
    pub fn load() -> Result<Self> {
        let configured_path =
            std::env::var("FAUCET_CONFIG").unwrap_or_else(|_| "config/faucet.toml".to_string());
        assert!(
            !configured_path.is_empty(),
            "Configuration path must be non-empty"
        );
        assert!(
            configured_path.len() < 4096,
            "Configuration path length exceeds hard limit"
        );

        let mut builder = Config::builder()
            .add_source(File::new(&configured_path, FileFormat::Toml).required(true));

        if let Ok(env_override) = std::env::var("FAUCET_ENV") {
            if !env_override.is_empty() {
                let env_file = format!("config/faucet.{}.toml", env_override);
                if Path::new(&env_file).exists() {
                    builder = builder.add_source(File::new(&env_file, FileFormat::Toml));
                }
            }
        }

        builder = builder.add_source(environment());

        Self::from_builder(builder, &configured_path)
    }

    fn from_builder(builder: ConfigBuilder<DefaultState>, path: &str) -> Result<Self> {
        let settings = builder
            .build()
            .map_err(|err| map_config_error(err, path))?;
        let mut config: Self = settings
            .try_deserialize()
            .context("Failed to deserialize faucet configuration")?;

        config.validate()?;
        Ok(config)
    }

    fn validate(&mut self) -> Result<()> {
        assert!(
            self.server.port > 0,
            "Server port must be greater than zero"
        );
        self.store.ensure_bounds()?;
        assert!(!self.chain.rpc_url.is_empty(), "RPC URL must be specified");
        assert!(self.chain.network_id > 0, "Network id must be positive");
        self.chain.ens_registry()?;
        let amount = self.drip.amount()?;
        assert!(amount > 0, "Drip amount must be positive");
        assert!(
            !self.drip.operator_key.expose().is_empty(),
            "Operator key must be specified"
        );
        assert!(
            !self.auth.session_url.is_empty(),
            "Session URL must be specified"
        );
        for id in &self.claims.allowlist {
            assert!(!id.trim().is_empty(), "Allow-listed ids cannot be empty");
        }
        assert!(
            self.alerts.queue_capacity > 0,
            "Alert queue capacity must be positive"
        );
        assert!(
            self.alerts.queue_capacity <= 10_000,
            "Alert queue capacity exceeds limit"
        );
        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub host: Option<IpAddr>,
    pub port: u16,
}

impl ServerConfig {
    pub fn address(&self) -> SocketAddr {
        let host = self.host.unwrap_or(IpAddr::V4(Ipv4Addr::LOCALHOST));
        assert!(self.port != 0, "HTTP port cannot be zero");
        assert!(self.port < 65535, "HTTP port must be below 65535");
        SocketAddr::new(host, self.port)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    Postgres,
    Memory,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StoreConfig {
    pub backend: StoreBackend,
    pub url: Option<String>,
    #[serde(default = "StoreConfig::default_max_connections")]
    pub max_connections: u32,
    pub min_connections: Option<u32>,
    #[serde(default = "StoreConfig::default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
}

impl StoreConfig {
    pub fn sweep_interval(&self) -> Duration {
        assert!(
            self.sweep_interval_secs >= 1,
            "Sweep interval must be at least one second"
        );
        assert!(
            self.sweep_interval_secs <= 86_400,
            "Sweep interval cannot exceed one day"
        );
        Duration::from_secs(self.sweep_interval_secs)
    }

    fn ensure_bounds(&self) -> Result<()> {
        if self.backend == StoreBackend::Postgres {
            assert!(
                self.url.as_deref().is_some_and(|url| !url.is_empty()),
                "Database URL must be specified for the postgres store"
            );
        }
        assert!(
            self.max_connections >= self.min_connections.unwrap_or(1),
            "Max connections must be >= min connections"
        );
        assert!(self.max_connections <= 128, "Connection pool oversized");
        self.sweep_interval();
        Ok(())
    }

    const fn default_max_connections() -> u32 {
        10
    }

    const fn default_sweep_interval_secs() -> u64 {
        300
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChainConfig {
    pub rpc_url: String,
    pub network_id: u64,
    pub request_timeout_ms: Option<u64>,
    /// Names ending in `.eth` are rejected when unset.
    pub ens_registry: Option<String>,
}

impl ChainConfig {
    pub fn request_timeout(&self) -> Duration {
        let millis = self.request_timeout_ms.unwrap_or(3_000);
        assert!(millis >= 100, "RPC timeout must be at least 100ms");
        assert!(millis <= 60_000, "RPC timeout cannot exceed 60 seconds");
        Duration::from_millis(millis)
    }

    pub fn ens_registry(&self) -> Result<Option<EthAddress>> {
        self.ens_registry
            .as_deref()
            .map(|raw| {
                EthAddress::parse(raw)
                    .with_context(|| format!("Invalid ENS registry address {raw}"))
            })
            .transpose()
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct DripConfig {
    /// Wei, as a decimal string since it exceeds what TOML integers hold.
    pub amount_wei: String,
    pub operator_key: Secret,
}

impl DripConfig {
    pub fn amount(&self) -> Result<u128> {
        self.amount_wei
            .trim()
            .parse::<u128>()
            .with_context(|| format!("Drip amount {} is not a wei integer", self.amount_wei))
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct AuthConfig {
    pub session_url: String,
    pub request_timeout_ms: Option<u64>,
}

impl AuthConfig {
    pub fn request_timeout(&self) -> Duration {
        let millis = self.request_timeout_ms.unwrap_or(5_000);
        assert!(millis >= 100, "Session timeout must be at least 100ms");
        assert!(millis <= 60_000, "Session timeout cannot exceed 60 seconds");
        Duration::from_millis(millis)
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ClaimsConfig {
    #[serde(default)]
    pub allowlist: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AlertsConfig {
    pub slack_token: Option<Secret>,
    pub slack_channel: Option<String>,
    pub mention: Option<String>,
    #[serde(default = "AlertsConfig::default_queue_capacity")]
    pub queue_capacity: usize,
    pub request_timeout_ms: Option<u64>,
}

impl Default for AlertsConfig {
    fn default() -> Self {
        Self {
            slack_token: None,
            slack_channel: None,
            mention: None,
            queue_capacity: Self::default_queue_capacity(),
            request_timeout_ms: None,
        }
    }
}

impl AlertsConfig {
    pub fn request_timeout(&self) -> Duration {
        let millis = self.request_timeout_ms.unwrap_or(5_000);
        assert!(millis >= 100, "Slack timeout must be at least 100ms");
        assert!(millis <= 60_000, "Slack timeout cannot exceed 60 seconds");
        Duration::from_millis(millis)
    }

    const fn default_queue_capacity() -> usize {
        64
    }
}

/// Configuration string that never shows up in logs.
#[derive(Clone, Deserialize)]
#[serde(transparent)]
pub struct Secret(String);

impl Secret {
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("***")
    }
}

/// `FAUCET_DRIP__OPERATOR_KEY` sets `drip.operator_key`: one underscore after
/// the prefix, two between path segments.
fn environment() -> Environment {
    Environment::with_prefix(ENV_PREFIX)
        .prefix_separator("_")
        .separator("__")
}

fn map_config_error(err: ConfigError, path: &str) -> ConfigError {
    match err {
        ConfigError::NotFound(_) => ConfigError::NotFound(path.to_string()),
        other => other,
    }
}
