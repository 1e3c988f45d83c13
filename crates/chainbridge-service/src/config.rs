//! Bridge configuration, loaded from YAML and overridable from the
//! environment.

use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use chainbridge_core::error::ConfigError;
use chainbridge_core::policy::{ReconnectBackoff, RetryConfig};
use chainbridge_core::types::SubscriptionRecord;
use chainbridge_http::{RpcConfig, TriggerConfig};
use chainbridge_ws::WsConfig;

pub const ENV_CHAINLINK_URL: &str = "CHAINBRIDGE_CHAINLINK_URL";
pub const ENV_ACCESS_KEY: &str = "CHAINBRIDGE_ACCESS_KEY";
pub const ENV_SECRET: &str = "CHAINBRIDGE_SECRET";
pub const ENV_DATABASE_PATH: &str = "CHAINBRIDGE_DATABASE_PATH";

/// Job runner endpoint and the two static credential header values.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainlinkConfig {
    #[serde(default = "default_chainlink_url")]
    pub url: String,
    #[serde(default)]
    pub access_key: String,
    #[serde(default)]
    pub secret: String,
    #[serde(default = "default_request_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_chainlink_url() -> String { "http://localhost:6688".into() }
fn default_request_timeout_secs() -> u64 { 30 }

impl Default for ChainlinkConfig {
    fn default() -> Self {
        Self {
            url: default_chainlink_url(),
            access_key: String::new(),
            secret: String::new(),
            timeout_secs: default_request_timeout_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WsSettings {
    /// Largest accepted inbound message in bytes.
    #[serde(default = "default_max_message_size")]
    pub max_message_size: usize,
    #[serde(default = "default_io_timeout_secs")]
    pub write_timeout_secs: u64,
    #[serde(default = "default_io_timeout_secs")]
    pub connect_timeout_secs: u64,
    /// Redial `n` waits `min(n * step, max)`.
    #[serde(default = "default_reconnect_step_secs")]
    pub reconnect_step_secs: u64,
    #[serde(default = "default_reconnect_max_secs")]
    pub reconnect_max_secs: u64,
    #[serde(default = "default_ws_channel_capacity")]
    pub channel_capacity: usize,
}

fn default_max_message_size() -> usize { 15 * 1024 * 1024 }
fn default_io_timeout_secs() -> u64 { 10 }
fn default_reconnect_step_secs() -> u64 { 2 }
fn default_reconnect_max_secs() -> u64 { 10 }
fn default_ws_channel_capacity() -> usize { 256 }

impl Default for WsSettings {
    fn default() -> Self {
        Self {
            max_message_size: default_max_message_size(),
            write_timeout_secs: default_io_timeout_secs(),
            connect_timeout_secs: default_io_timeout_secs(),
            reconnect_step_secs: default_reconnect_step_secs(),
            reconnect_max_secs: default_reconnect_max_secs(),
            channel_capacity: default_ws_channel_capacity(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcSettings {
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    #[serde(default = "default_rpc_channel_capacity")]
    pub channel_capacity: usize,
}

fn default_rpc_channel_capacity() -> usize { 64 }

impl Default for RpcSettings {
    fn default() -> Self {
        Self {
            request_timeout_secs: default_request_timeout_secs(),
            channel_capacity: default_rpc_channel_capacity(),
        }
    }
}

/// Event channel and delivery settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchConfig {
    /// Capacity of the shared event channel; producers wait when it is full.
    #[serde(default = "default_dispatch_capacity")]
    pub channel_capacity: usize,
    /// Upper bound on concurrently running trigger calls.
    #[serde(default = "default_max_in_flight")]
    pub max_in_flight: usize,
    /// Retries after a failed trigger call (transport error or 5xx only).
    #[serde(default)]
    pub max_retries: u32,
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
}

fn default_dispatch_capacity() -> usize { 1_024 }
fn default_max_in_flight() -> usize { 64 }
fn default_retry_delay_ms() -> u64 { 1_000 }

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            channel_capacity: default_dispatch_capacity(),
            max_in_flight: default_max_in_flight(),
            max_retries: 0,
            retry_delay_ms: default_retry_delay_ms(),
        }
    }
}

impl DispatchConfig {
    pub fn retry(&self) -> RetryConfig {
        RetryConfig::fixed(self.max_retries, Duration::from_millis(self.retry_delay_ms))
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    #[default]
    Memory,
    Sqlite,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default)]
    pub backend: StorageBackend,
    /// Database file (SQLite only).
    #[serde(default)]
    pub path: Option<String>,
}

/// Log level per component.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// Global default level: "trace" | "debug" | "info" | "warn" | "error"
    #[serde(default = "default_level")]
    pub level: String,
    /// Override per component: component_name → level
    #[serde(default)]
    pub components: HashMap<String, String>,
    /// Emit JSON structured logs (true) or human-readable text (false)
    #[serde(default)]
    pub json: bool,
}

fn default_level() -> String {
    "info".to_string()
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_level(),
            components: HashMap::new(),
            json: false,
        }
    }
}

impl LogConfig {
    /// `EnvFilter` directive string, e.g. `info,chainbridge_ws=debug`.
    pub fn directives(&self) -> String {
        let mut components: Vec<_> = self.components.iter().collect();
        components.sort();
        let mut directives = self.level.clone();
        for (component, level) in components {
            directives.push_str(&format!(",{}={}", component.replace('-', "_"), level));
        }
        directives
    }
}

/// Top-level bridge configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BridgeConfig {
    #[serde(default)]
    pub chainlink: ChainlinkConfig,
    #[serde(default)]
    pub ws: WsSettings,
    #[serde(default)]
    pub rpc: RpcSettings,
    #[serde(default)]
    pub dispatch: DispatchConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    /// Period of the store reconciler; disabled when absent.
    #[serde(default)]
    pub reconcile_interval_secs: Option<u64>,
    #[serde(default)]
    pub log: LogConfig,
    /// Records saved to the store at boot, before it is loaded.
    #[serde(default)]
    pub subscriptions: Vec<SubscriptionRecord>,
}

impl BridgeConfig {
    pub fn from_yaml_str(yaml: &str) -> Result<Self, ConfigError> {
        serde_yaml::from_str(yaml).map_err(|e| ConfigError::Invalid(e.to_string()))
    }

    /// Read `path`, apply environment overrides and validate.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::Invalid(format!("cannot read {}: {e}", path.display())))?;
        let mut config = Self::from_yaml_str(&text)?;
        config.apply_env_with(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Override credentials, job runner URL and database path from
    /// `lookup` (normally the process environment).
    pub fn apply_env_with(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(url) = lookup(ENV_CHAINLINK_URL) {
            self.chainlink.url = url;
        }
        if let Some(key) = lookup(ENV_ACCESS_KEY) {
            self.chainlink.access_key = key;
        }
        if let Some(secret) = lookup(ENV_SECRET) {
            self.chainlink.secret = secret;
        }
        if let Some(path) = lookup(ENV_DATABASE_PATH) {
            self.storage.path = Some(path);
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let url = url::Url::parse(&self.chainlink.url).map_err(|e| ConfigError::InvalidUrl {
            url: self.chainlink.url.clone(),
            reason: e.to_string(),
        })?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(ConfigError::UnsupportedScheme {
                scheme: url.scheme().to_string(),
                protocol: "job runner".into(),
            });
        }

        let positive = [
            ("dispatch.channel_capacity", self.dispatch.channel_capacity as u64),
            ("dispatch.max_in_flight", self.dispatch.max_in_flight as u64),
            ("ws.channel_capacity", self.ws.channel_capacity as u64),
            ("ws.max_message_size", self.ws.max_message_size as u64),
            ("ws.reconnect_step_secs", self.ws.reconnect_step_secs),
            ("ws.write_timeout_secs", self.ws.write_timeout_secs),
            ("ws.connect_timeout_secs", self.ws.connect_timeout_secs),
            ("rpc.channel_capacity", self.rpc.channel_capacity as u64),
            ("rpc.request_timeout_secs", self.rpc.request_timeout_secs),
            ("chainlink.timeout_secs", self.chainlink.timeout_secs),
        ];
        for (name, value) in positive {
            if value == 0 {
                return Err(ConfigError::Invalid(format!("{name} must be greater than zero")));
            }
        }
        if self.ws.reconnect_max_secs < self.ws.reconnect_step_secs {
            return Err(ConfigError::Invalid(
                "ws.reconnect_max_secs must not be below ws.reconnect_step_secs".into(),
            ));
        }
        if self.reconcile_interval_secs == Some(0) {
            return Err(ConfigError::Invalid(
                "reconcile_interval_secs must be greater than zero".into(),
            ));
        }
        if self.storage.backend == StorageBackend::Sqlite && self.storage.path.is_none() {
            return Err(ConfigError::Invalid("storage.path is required for sqlite".into()));
        }

        // Endpoints are checked when each subscription starts, so one bad
        // record fails alone.
        let mut seen = std::collections::HashSet::new();
        for record in &self.subscriptions {
            if !seen.insert(record.id.as_str()) {
                return Err(ConfigError::Invalid(format!("duplicate subscription id {}", record.id)));
            }
        }
        Ok(())
    }

    pub fn ws_config(&self) -> WsConfig {
        WsConfig {
            max_message_size: self.ws.max_message_size,
            write_timeout: Duration::from_secs(self.ws.write_timeout_secs),
            connect_timeout: Duration::from_secs(self.ws.connect_timeout_secs),
            backoff: ReconnectBackoff::new(
                Duration::from_secs(self.ws.reconnect_step_secs),
                Duration::from_secs(self.ws.reconnect_max_secs),
            ),
            channel_capacity: self.ws.channel_capacity,
        }
    }

    pub fn rpc_config(&self) -> RpcConfig {
        RpcConfig {
            request_timeout: Duration::from_secs(self.rpc.request_timeout_secs),
            channel_capacity: self.rpc.channel_capacity,
        }
    }

    pub fn trigger_config(&self) -> TriggerConfig {
        TriggerConfig {
            base_url: self.chainlink.url.clone(),
            access_key: self.chainlink.access_key.clone(),
            secret: self.chainlink.secret.clone(),
            timeout: Duration::from_secs(self.chainlink.timeout_secs),
        }
    }
}
