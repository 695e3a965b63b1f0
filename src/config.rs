use clap::Parser;
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

/// MindBridge real-time messaging server
#[derive(Parser, Serialize, Deserialize, Clone, Debug)]
#[command(name = "mindbridge-server", version, about = "MindBridge real-time messaging server")]
pub struct Config {
    /// Port to listen on
    #[arg(long, env = "MINDBRIDGE_PORT", default_value = "1990")]
    pub port: u16,

    /// Bind address
    #[arg(long, env = "MINDBRIDGE_BIND_ADDRESS", default_value = "0.0.0.0")]
    pub bind_address: String,

    /// Path to TOML config file
    #[arg(long, default_value = "./mindbridge.toml")]
    pub config: String,

    /// Enable structured JSON logging (for Docker/production)
    #[arg(long, env = "MINDBRIDGE_JSON_LOGS")]
    pub json_logs: bool,

    /// Output a commented TOML config template and exit
    #[arg(long)]
    pub generate_config: bool,

    /// Data directory for persistent state (DB, keys)
    #[arg(long, env = "MINDBRIDGE_DATA_DIR", default_value = "./data")]
    pub data_dir: String,

    /// Print a signed access token for `<user_id>:<role>` and exit
    #[arg(long, value_name = "USER_ID:ROLE")]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub issue_token: Option<String>,

    /// Real-time tuning (loaded from [realtime] section in TOML)
    #[arg(skip)]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub realtime: Option<RealtimeConfig>,
}

/// Connection keep-alive, token lifetime, paging and rate limit knobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RealtimeConfig {
    /// Seconds between server pings on a WebSocket (default: 30)
    #[serde(default = "default_ping_interval")]
    pub ping_interval_secs: u64,

    /// Seconds to wait for a pong before closing (default: 10)
    #[serde(default = "default_pong_timeout")]
    pub pong_timeout_secs: u64,

    /// Lifetime of tokens printed by --issue-token (default: 900)
    #[serde(default = "default_access_token_ttl")]
    pub access_token_ttl_secs: i64,

    /// History page size when the client sends no limit (default: 50)
    #[serde(default = "default_history_limit")]
    pub history_default_limit: u32,

    /// Upper bound on a history page (default: 200)
    #[serde(default = "default_history_max")]
    pub history_max_limit: u32,

    /// Broadcast requests allowed per minute per IP (default: 10)
    #[serde(default = "default_broadcast_burst")]
    pub broadcast_burst: u32,
}

impl Default for RealtimeConfig {
    fn default() -> Self {
        Self {
            ping_interval_secs: default_ping_interval(),
            pong_timeout_secs: default_pong_timeout(),
            access_token_ttl_secs: default_access_token_ttl(),
            history_default_limit: default_history_limit(),
            history_max_limit: default_history_max(),
            broadcast_burst: default_broadcast_burst(),
        }
    }
}

fn default_ping_interval() -> u64 {
    30
}

fn default_pong_timeout() -> u64 {
    10
}

fn default_access_token_ttl() -> i64 {
    900
}

fn default_history_limit() -> u32 {
    50
}

fn default_history_max() -> u32 {
    200
}

fn default_broadcast_burst() -> u32 {
    10
}

impl RealtimeConfig {
    /// Clamp a requested page size into `1..=history_max_limit`.
    pub fn page_size(&self, requested: Option<u32>) -> u32 {
        requested
            .unwrap_or(self.history_default_limit)
            .clamp(1, self.history_max_limit.max(1))
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 1990,
            bind_address: "0.0.0.0".to_string(),
            config: "./mindbridge.toml".to_string(),
            json_logs: false,
            generate_config: false,
            data_dir: "./data".to_string(),
            issue_token: None,
            realtime: Some(RealtimeConfig::default()),
        }
    }
}

impl Config {
    /// The `[realtime]` section, defaults filled in.
    pub fn realtime(&self) -> RealtimeConfig {
        self.realtime.clone().unwrap_or_default()
    }

    /// Load config with layered precedence:
    /// built-in defaults < TOML file < env vars (MINDBRIDGE_*) < CLI args
    pub fn load() -> Result<Self, figment::Error> {
        let cli = Config::parse();
        let config_path = cli.config.clone();

        Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Toml::file(&config_path))
            .merge(Env::prefixed("MINDBRIDGE_").split("__"))
            .merge(Serialized::defaults(cli))
            .extract()
    }
}

/// Generate a commented TOML config template
pub fn generate_config_template() -> String {
    r#"# MindBridge Messaging Server Configuration
# Place this file at ./mindbridge.toml or specify with --config <path>
# All settings can be overridden via environment variables (MINDBRIDGE_PORT,
# MINDBRIDGE_REALTIME__PING_INTERVAL_SECS, etc.) or CLI flags (--port, etc.)

# Server port (default: 1990)
# port = 1990

# Bind address (default: 0.0.0.0, all interfaces)
# bind_address = "0.0.0.0"

# Enable structured JSON logging for Docker/production
# json_logs = false

# Data directory for SQLite database and JWT signing key
# data_dir = "./data"

# ---- Real-time delivery ----
# [realtime]

# WebSocket keep-alive
# ping_interval_secs = 30
# pong_timeout_secs = 10

# Lifetime of tokens printed by --issue-token
# access_token_ttl_secs = 900

# Conversation history paging
# history_default_limit = 50
# history_max_limit = 200

# Admin broadcast requests per minute per IP
# broadcast_burst = 10
"#
    .to_string()
}
