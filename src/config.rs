//! Configuration module
//!
//! Handles loading of the relay server configuration from a TOML file plus
//! environment variables, and of the headless client configuration from the
//! environment.

use std::env;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use rand::distributions::Alphanumeric;
use rand::Rng;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::net::session::OverflowPolicy;
use crate::zone::coords::{ZoneLayout, ZONE_DIVISIONS, ZONE_SIZE};

/// Length of generated space ids
pub const SPACE_ID_LEN: usize = 8;

/// Relay server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Path to the configuration file
    #[serde(skip)]
    pub config_path: PathBuf,

    /// Name shown in logs and the status API
    #[serde(default = "default_server_name")]
    pub server_name: String,

    /// Address both listeners bind to
    #[serde(default = "default_bind_address")]
    pub bind_address: String,

    /// WebSocket port for collaboration clients
    #[serde(default = "default_websocket_port")]
    pub websocket_port: u16,

    /// HTTP status API port
    #[serde(default = "default_http_port")]
    pub http_port: u16,

    /// Whether to serve the HTTP status API
    #[serde(default = "default_true")]
    pub http_enabled: bool,

    /// Frames buffered per connection before the overflow policy applies
    #[serde(default = "default_outbound_queue_capacity")]
    pub outbound_queue_capacity: usize,

    /// What to do when a connection's outbound queue is full
    #[serde(default)]
    pub overflow_policy: OverflowPolicy,

    /// Maximum simultaneous connections from one IP
    #[serde(default = "default_max_connections_per_ip")]
    pub max_connections_per_ip: usize,

    /// Largest accepted inbound frame in bytes (snapshots can be big)
    #[serde(default = "default_max_message_bytes")]
    pub max_message_bytes: usize,

    /// Enable debug logging
    #[serde(default)]
    pub debug: bool,
}

fn default_server_name() -> String {
    "Cuberse".to_string()
}

fn default_bind_address() -> String {
    "0.0.0.0".to_string()
}

fn default_websocket_port() -> u16 {
    3001
}

fn default_http_port() -> u16 {
    3000
}

fn default_true() -> bool {
    true
}

fn default_outbound_queue_capacity() -> usize {
    256
}

fn default_max_connections_per_ip() -> usize {
    32
}

fn default_max_message_bytes() -> usize {
    16 * 1024 * 1024
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            config_path: PathBuf::from("config/server.toml"),
            server_name: default_server_name(),
            bind_address: default_bind_address(),
            websocket_port: default_websocket_port(),
            http_port: default_http_port(),
            http_enabled: default_true(),
            outbound_queue_capacity: default_outbound_queue_capacity(),
            overflow_policy: OverflowPolicy::default(),
            max_connections_per_ip: default_max_connections_per_ip(),
            max_message_bytes: default_max_message_bytes(),
            debug: false,
        }
    }
}

impl ServerConfig {
    /// Load configuration from file and environment variables
    ///
    /// A missing file yields the defaults; check `config_path.exists()` to
    /// tell the two apart.
    pub async fn load() -> Result<Self> {
        let config_path = env::var("CUBERSE_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("config/server.toml"));

        let mut config = if config_path.exists() {
            let content = tokio::fs::read_to_string(&config_path)
                .await
                .with_context(|| {
                    format!("Failed to read config file: {}", config_path.display())
                })?;

            toml::from_str(&content).with_context(|| {
                format!("Failed to parse config file: {}", config_path.display())
            })?
        } else {
            Self::default()
        };

        config.config_path = config_path;
        config.apply_overrides(|key| env::var(key).ok())?;
        config.validate()?;

        Ok(config)
    }

    /// Apply `CUBERSE_*` overrides from a variable lookup
    fn apply_overrides<F>(&mut self, var: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(val) = var("CUBERSE_SERVER_NAME") {
            self.server_name = val;
        }
        if let Some(val) = var("CUBERSE_BIND_ADDRESS") {
            self.bind_address = val;
        }
        if let Some(val) = var("CUBERSE_WEBSOCKET_PORT") {
            self.websocket_port = val
                .parse()
                .with_context(|| format!("Invalid CUBERSE_WEBSOCKET_PORT: {}", val))?;
        }
        if let Some(val) = var("CUBERSE_HTTP_PORT") {
            self.http_port = val
                .parse()
                .with_context(|| format!("Invalid CUBERSE_HTTP_PORT: {}", val))?;
        }
        if let Some(val) = var("CUBERSE_HTTP_ENABLED") {
            self.http_enabled = parse_flag(&val);
        }
        if let Some(val) = var("CUBERSE_OUTBOUND_QUEUE_CAPACITY") {
            self.outbound_queue_capacity = val
                .parse()
                .with_context(|| format!("Invalid CUBERSE_OUTBOUND_QUEUE_CAPACITY: {}", val))?;
        }
        if let Some(val) = var("CUBERSE_OVERFLOW_POLICY") {
            self.overflow_policy = val.parse().map_err(anyhow::Error::msg)?;
        }
        if let Some(val) = var("CUBERSE_MAX_CONNECTIONS_PER_IP") {
            self.max_connections_per_ip = val
                .parse()
                .with_context(|| format!("Invalid CUBERSE_MAX_CONNECTIONS_PER_IP: {}", val))?;
        }
        if let Some(val) = var("CUBERSE_MAX_MESSAGE_BYTES") {
            self.max_message_bytes = val
                .parse()
                .with_context(|| format!("Invalid CUBERSE_MAX_MESSAGE_BYTES: {}", val))?;
        }
        if let Some(val) = var("CUBERSE_DEBUG") {
            self.debug = parse_flag(&val);
        }
        Ok(())
    }

    /// Validate the configuration
    fn validate(&self) -> Result<()> {
        if self.http_enabled && self.websocket_port == self.http_port {
            anyhow::bail!("WebSocket port and HTTP port must be different");
        }
        if self.outbound_queue_capacity == 0 {
            anyhow::bail!("Outbound queue capacity must be at least 1");
        }
        if self.max_connections_per_ip == 0 {
            anyhow::bail!("Max connections per IP must be at least 1");
        }
        if self.max_message_bytes < 1024 {
            anyhow::bail!("Max message size must be at least 1 KiB");
        }
        Ok(())
    }

    pub fn websocket_addr(&self) -> String {
        format!("{}:{}", self.bind_address, self.websocket_port)
    }

    pub fn http_addr(&self) -> String {
        format!("{}:{}", self.bind_address, self.http_port)
    }

    /// Default tracing filter when `RUST_LOG` is unset
    pub fn log_filter(&self) -> &'static str {
        if self.debug {
            "debug"
        } else {
            "info,cuberse=debug"
        }
    }
}

/// Headless client configuration
#[derive(Debug, Clone, PartialEq)]
pub struct ClientConfig {
    /// WebSocket URL of the relay
    pub server_url: String,
    pub user_id: String,
    pub space_id: String,
    /// Spaces this user claims ownership of
    pub owned_space_ids: Vec<String>,
    /// Re-request the snapshot after this long in `Syncing`; `None` waits forever
    pub snapshot_retry: Option<Duration>,
    pub layout: ZoneLayout,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server_url: "ws://127.0.0.1:3001".to_string(),
            user_id: generate_user_id(),
            space_id: generate_space_id(),
            owned_space_ids: Vec::new(),
            snapshot_retry: None,
            layout: ZoneLayout::new(ZONE_SIZE, ZONE_DIVISIONS),
        }
    }
}

impl ClientConfig {
    /// Load from `CUBERSE_CLIENT_*` environment variables
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup<F>(var: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(val) = var("CUBERSE_CLIENT_SERVER_URL") {
            config.server_url = val;
        }
        if let Some(val) = var("CUBERSE_CLIENT_USER_ID") {
            config.user_id = val;
        }
        if let Some(val) = var("CUBERSE_CLIENT_OWNED_SPACES") {
            config.owned_space_ids = split_list(&val);
        }
        match var("CUBERSE_CLIENT_SPACE_ID").filter(|s| !s.is_empty()) {
            Some(space_id) => config.space_id = space_id,
            // A freshly created space belongs to its creator
            None => config.owned_space_ids.push(config.space_id.clone()),
        }
        if let Some(val) = var("CUBERSE_CLIENT_SNAPSHOT_RETRY_SECS") {
            let secs: u64 = val
                .parse()
                .with_context(|| format!("Invalid CUBERSE_CLIENT_SNAPSHOT_RETRY_SECS: {}", val))?;
            config.snapshot_retry = (secs > 0).then(|| Duration::from_secs(secs));
        }
        if let Some(val) = var("CUBERSE_CLIENT_ZONE_SIZE") {
            config.layout.zone_size = val
                .parse()
                .with_context(|| format!("Invalid CUBERSE_CLIENT_ZONE_SIZE: {}", val))?;
        }
        if let Some(val) = var("CUBERSE_CLIENT_ZONE_DIVISIONS") {
            config.layout.divisions = val
                .parse()
                .with_context(|| format!("Invalid CUBERSE_CLIENT_ZONE_DIVISIONS: {}", val))?;
        }

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if !self.server_url.starts_with("ws://") {
            anyhow::bail!("Server URL must be a ws:// URL");
        }
        if self.user_id.is_empty() {
            anyhow::bail!("User id must not be empty");
        }
        if !(self.layout.zone_size.is_finite() && self.layout.zone_size > 0.0) {
            anyhow::bail!("Zone size must be a positive number");
        }
        if self.layout.divisions <= 0 {
            anyhow::bail!("Zone divisions must be positive");
        }
        Ok(())
    }
}

/// Random space id: 8 lowercase alphanumerics
pub fn generate_space_id() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(SPACE_ID_LEN)
        .map(|b| (b as char).to_ascii_lowercase())
        .collect()
}

fn generate_user_id() -> String {
    format!("user-{}", Uuid::new_v4().simple())
}

fn parse_flag(val: &str) -> bool {
    val.eq_ignore_ascii_case("true") || val == "1"
}

fn split_list(val: &str) -> Vec<String> {
    val.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}
