use std::collections::HashMap;
use std::fs::read_to_string;
use std::net::SocketAddr;
use std::time::Duration;

use clap::Parser;
use engine::BanThresholds;
use serde::Deserialize;

#[derive(Deserialize, Debug)]
pub struct Tunnel {
    /// tunnel listen address
    ///
    /// agents dial this address to open their persistent tunnel.
    #[serde(default = "Tunnel::listen")]
    pub listen: SocketAddr,
}

impl Tunnel {
    fn listen() -> SocketAddr {
        "0.0.0.0:7000".parse().unwrap()
    }
}

impl Default for Tunnel {
    fn default() -> Self {
        Self { listen: Self::listen() }
    }
}

#[derive(Deserialize, Debug)]
pub struct Http {
    /// http api listen address
    ///
    /// the source has conflicting historical defaults (8444, 9990, 9999);
    /// this implementation picks its own and treats it purely as a default,
    /// not a spec mandate. Override with the config file.
    #[serde(default = "Http::listen")]
    pub listen: SocketAddr,

    /// Access-Control-Allow-Origin value applied to the api router.
    #[serde(default = "Http::allow_origin")]
    pub allow_origin: String,
}

impl Http {
    fn listen() -> SocketAddr {
        "0.0.0.0:8089".parse().unwrap()
    }

    fn allow_origin() -> String {
        "*".to_string()
    }
}

impl Default for Http {
    fn default() -> Self {
        Self {
            listen: Self::listen(),
            allow_origin: Self::allow_origin(),
        }
    }
}

#[derive(Deserialize, Debug)]
pub struct Auth {
    /// token agents must present as the first handshake frame.
    #[serde(default = "Auth::token")]
    pub token: String,

    /// key admin endpoints compare the Authorization header against.
    #[serde(default = "Auth::admin_key")]
    pub admin_key: String,
}

impl Auth {
    fn token() -> String {
        "change-me".to_string()
    }

    fn admin_key() -> String {
        "change-me-admin".to_string()
    }
}

impl Default for Auth {
    fn default() -> Self {
        Self {
            token: Self::token(),
            admin_key: Self::admin_key(),
        }
    }
}

#[derive(Deserialize, Debug)]
pub struct Limits {
    /// cap enforced agent-side; the gateway does not re-validate it, it
    /// just forwards whatever envelope arrives.
    #[serde(default = "Limits::max_response_size")]
    pub max_response_size: usize,

    #[serde(default = "Limits::max_log_entries")]
    pub max_log_entries: usize,
}

impl Limits {
    fn max_response_size() -> usize {
        50 * 1024 * 1024
    }

    fn max_log_entries() -> usize {
        1000
    }
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            max_response_size: Self::max_response_size(),
            max_log_entries: Self::max_log_entries(),
        }
    }
}

#[derive(Deserialize, Debug)]
pub struct Ban {
    #[serde(default = "Ban::max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "Ban::window_minutes")]
    pub window_minutes: u64,
    #[serde(default = "Ban::permanent")]
    pub permanent: u32,
    #[serde(default = "Ban::auth_tolerance")]
    pub auth_tolerance: u32,
    #[serde(default = "Ban::grace_minutes")]
    pub grace_minutes: u64,
    #[serde(default = "Ban::gc_hours")]
    pub gc_hours: u64,
}

impl Ban {
    fn max_attempts() -> u32 {
        5
    }
    fn window_minutes() -> u64 {
        15
    }
    fn permanent() -> u32 {
        15
    }
    fn auth_tolerance() -> u32 {
        8
    }
    fn grace_minutes() -> u64 {
        30
    }
    fn gc_hours() -> u64 {
        24
    }
}

impl Default for Ban {
    fn default() -> Self {
        Self {
            max_attempts: Self::max_attempts(),
            window_minutes: Self::window_minutes(),
            permanent: Self::permanent(),
            auth_tolerance: Self::auth_tolerance(),
            grace_minutes: Self::grace_minutes(),
            gc_hours: Self::gc_hours(),
        }
    }
}

impl Ban {
    pub fn to_thresholds(&self) -> BanThresholds {
        BanThresholds {
            max_attempts: self.max_attempts,
            window: Duration::from_secs(self.window_minutes * 60),
            permanent: self.permanent,
            auth_tolerance: self.auth_tolerance,
            grace: Duration::from_secs(self.grace_minutes * 60),
            gc: Duration::from_secs(self.gc_hours * 3600),
        }
    }
}

#[derive(Deserialize, Debug)]
pub struct Deadlines {
    #[serde(default = "Deadlines::handshake_secs")]
    pub handshake_secs: u64,
    #[serde(default = "Deadlines::dispatch_secs")]
    pub dispatch_secs: u64,
    #[serde(default = "Deadlines::heartbeat_secs")]
    pub heartbeat_secs: u64,
    #[serde(default = "Deadlines::idle_secs")]
    pub idle_secs: u64,
}

impl Deadlines {
    fn handshake_secs() -> u64 {
        30
    }
    fn dispatch_secs() -> u64 {
        30
    }
    fn heartbeat_secs() -> u64 {
        10
    }
    fn idle_secs() -> u64 {
        60
    }
}

impl Default for Deadlines {
    fn default() -> Self {
        Self {
            handshake_secs: Self::handshake_secs(),
            dispatch_secs: Self::dispatch_secs(),
            heartbeat_secs: Self::heartbeat_secs(),
            idle_secs: Self::idle_secs(),
        }
    }
}

impl Deadlines {
    pub fn to_session_deadlines(&self) -> engine::SessionDeadlines {
        engine::SessionDeadlines {
            handshake: Duration::from_secs(self.handshake_secs),
            dispatch: Duration::from_secs(self.dispatch_secs),
            heartbeat: Duration::from_secs(self.heartbeat_secs),
            idle: Duration::from_secs(self.idle_secs),
        }
    }
}

#[derive(Deserialize, Debug)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl Default for LogLevel {
    fn default() -> Self {
        Self::Info
    }
}

impl LogLevel {
    pub fn as_level(&self) -> log::Level {
        match self {
            LogLevel::Error => log::Level::Error,
            LogLevel::Warn => log::Level::Warn,
            LogLevel::Info => log::Level::Info,
            LogLevel::Debug => log::Level::Debug,
            LogLevel::Trace => log::Level::Trace,
        }
    }
}

#[derive(Deserialize, Debug, Default)]
pub struct Log {
    #[serde(default)]
    pub level: LogLevel,
}

#[derive(Deserialize, Debug, Default)]
pub struct Config {
    #[serde(default)]
    pub tunnel: Tunnel,
    #[serde(default)]
    pub http: Http,
    #[serde(default)]
    pub auth: Auth,
    #[serde(default)]
    pub limits: Limits,
    #[serde(default)]
    pub ban: Ban,
    #[serde(default)]
    pub deadlines: Deadlines,
    #[serde(default)]
    pub log: Log,

    /// reserved for parity with the ambient stack; not read by the core
    /// today but kept so a config file can attach metadata without the
    /// loader rejecting unknown top-level tables.
    #[serde(default)]
    pub extra: HashMap<String, toml::Value>,
}

#[derive(Parser)]
#[command(
    about = env!("CARGO_PKG_DESCRIPTION"),
    version = env!("CARGO_PKG_VERSION"),
)]
struct Cli {
    /// path to an optional TOML config file.
    #[arg(long)]
    config: Option<String>,
}

impl Config {
    /// Layered load: built-in defaults, then an optional file named by
    /// `--config`. A missing file is not an error, it falls back to
    /// defaults with a warning. A present-but-unparsable file is fatal.
    pub fn load() -> anyhow::Result<Self> {
        let cli = Cli::parse();

        let Some(path) = cli.config else {
            return Ok(Config::default());
        };

        match read_to_string(&path) {
            Ok(raw) => toml::from_str(&raw)
                .map_err(|e| anyhow::anyhow!("failed to parse config file {}: {}", path, e)),
            Err(e) => {
                log::warn!(
                    "config file {} not readable ({}), falling back to defaults",
                    path,
                    e
                );
                Ok(Config::default())
            }
        }
    }
}
