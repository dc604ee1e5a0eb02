//! Core configuration structures and loading logic

use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Error type for configuration operations
#[derive(Debug)]
pub enum ConfigError {
    /// IO error reading config file
    Io(std::io::Error),
    /// TOML parsing error
    Parse(toml::de::Error),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(e) => write!(f, "Failed to read config file: {}", e),
            ConfigError::Parse(e) => write!(f, "Failed to parse config: {}", e),
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<std::io::Error> for ConfigError {
    fn from(e: std::io::Error) -> Self {
        ConfigError::Io(e)
    }
}

impl From<toml::de::Error> for ConfigError {
    fn from(e: toml::de::Error) -> Self {
        ConfigError::Parse(e)
    }
}

/// Remote catalog connection settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CatalogConfig {
    /// Base URL of the catalog API (e.g. `http://host:8457/api`)
    #[serde(default = "default_catalog_url")]
    pub url: String,
    /// Token sent as `Authorization: Token <token>`
    #[serde(default)]
    pub token: String,
    /// Per-request timeout in seconds
    #[serde(default = "default_catalog_timeout_secs")]
    pub timeout_secs: u64,
    /// Upper bound on pages fetched in one pass
    #[serde(default = "default_max_pages")]
    pub max_pages: u32,
}

fn default_catalog_url() -> String {
    "http://localhost:8457/api".to_string()
}

fn default_catalog_timeout_secs() -> u64 {
    30
}

fn default_max_pages() -> u32 {
    10_000
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            url: default_catalog_url(),
            token: String::new(),
            timeout_secs: default_catalog_timeout_secs(),
            max_pages: default_max_pages(),
        }
    }
}

/// Background scan scheduling
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScanConfig {
    /// Minutes between scheduled reconciliation passes
    #[serde(default = "default_interval_minutes")]
    pub interval_minutes: u64,
}

fn default_interval_minutes() -> u64 {
    60
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            interval_minutes: default_interval_minutes(),
        }
    }
}

/// Filesystem roots
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PathsConfig {
    /// Raw archive tree as seen by this process
    #[serde(default = "default_source_root")]
    pub source_root: PathBuf,
    /// Root of the symlink mirror
    #[serde(default = "default_target_root")]
    pub target_root: PathBuf,
    /// The same raw archive tree as seen by the host; links are written with this prefix
    #[serde(default = "default_host_source_root")]
    pub host_source_root: PathBuf,
    /// Directory holding the state database
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
}

fn default_source_root() -> PathBuf {
    PathBuf::from("/app/source")
}

fn default_target_root() -> PathBuf {
    PathBuf::from("/app/target")
}

fn default_host_source_root() -> PathBuf {
    PathBuf::from("/mnt/user/tubearchives/bp")
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("/app/data")
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            source_root: default_source_root(),
            target_root: default_target_root(),
            host_source_root: default_host_source_root(),
            data_dir: default_data_dir(),
        }
    }
}

impl PathsConfig {
    /// Location of the SQLite state file
    pub fn database_path(&self) -> PathBuf {
        self.data_dir.join("videos.db")
    }
}

/// Access policy consumed by the HTTP front end
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AccessConfig {
    /// Allowed client IPs or CIDR ranges
    #[serde(default = "default_allowed_ips")]
    pub allowed_ips: Vec<String>,
}

fn default_allowed_ips() -> Vec<String> {
    vec!["127.0.0.1".to_string()]
}

impl Default for AccessConfig {
    fn default() -> Self {
        Self {
            allowed_ips: default_allowed_ips(),
        }
    }
}

/// Ring log sizing
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LogsConfig {
    /// Maximum number of retained lines per buffer
    #[serde(default = "default_log_capacity")]
    pub capacity: usize,
    /// Maximum characters kept per line
    #[serde(default = "default_max_line_len")]
    pub max_line_len: usize,
}

fn default_log_capacity() -> usize {
    1000
}

fn default_max_line_len() -> usize {
    500
}

impl Default for LogsConfig {
    fn default() -> Self {
        Self {
            capacity: default_log_capacity(),
            max_line_len: default_max_line_len(),
        }
    }
}

/// Codec normalization settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TranscodeConfig {
    /// Maximum concurrent transcodes (0 = auto-derive)
    #[serde(default)]
    pub max_concurrent: u32,
    /// ffmpeg executable
    #[serde(default = "default_ffmpeg_bin")]
    pub ffmpeg_bin: PathBuf,
    /// ffprobe executable
    #[serde(default = "default_ffprobe_bin")]
    pub ffprobe_bin: PathBuf,
}

fn default_ffmpeg_bin() -> PathBuf {
    PathBuf::from("ffmpeg")
}

fn default_ffprobe_bin() -> PathBuf {
    PathBuf::from("ffprobe")
}

impl Default for TranscodeConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 0,
            ffmpeg_bin: default_ffmpeg_bin(),
            ffprobe_bin: default_ffprobe_bin(),
        }
    }
}

/// HTTP listener
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

fn default_bind() -> String {
    "0.0.0.0:5000".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct Config {
    #[serde(default)]
    pub catalog: CatalogConfig,
    #[serde(default)]
    pub scan: ScanConfig,
    #[serde(default)]
    pub paths: PathsConfig,
    #[serde(default)]
    pub access: AccessConfig,
    #[serde(default)]
    pub logs: LogsConfig,
    #[serde(default)]
    pub transcode: TranscodeConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

/// Read and parse an environment variable, ignoring unset or malformed values
fn env_parsed<T: FromStr>(name: &str) -> Option<T> {
    env::var(name).ok().and_then(|v| v.trim().parse::<T>().ok())
}

/// Read a non-empty environment variable
fn env_string(name: &str) -> Option<String> {
    env::var(name).ok().filter(|v| !v.trim().is_empty())
}

/// Split a comma separated allowlist, dropping blanks
pub fn parse_ip_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .map(|s| s.to_string())
        .collect()
}

impl Config {
    /// Load configuration from a TOML file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path)?;
        Self::parse_toml(&content)
    }

    /// Parse configuration from a TOML string
    pub fn parse_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(content)?;
        Ok(config)
    }

    /// Apply environment variable overrides to the configuration
    ///
    /// Overrides the following values if environment variables are set:
    /// - API_URL -> catalog.url
    /// - API_TOKEN -> catalog.token
    /// - CATALOG_TIMEOUT_SECS -> catalog.timeout_secs
    /// - SCAN_INTERVAL -> scan.interval_minutes
    /// - ALLOWED_IPS -> access.allowed_ips (comma separated)
    /// - SOURCE_DIR, TARGET_DIR, HOST_SOURCE_ROOT, DATA_DIR -> paths.*
    /// - LOG_CAPACITY, LOG_LINE_MAX -> logs.*
    /// - MAX_CONCURRENT_TRANSCODES, FFMPEG_BIN, FFPROBE_BIN -> transcode.*
    /// - BIND_ADDR -> server.bind
    ///
    /// Unparsable numeric values keep the existing setting.
    pub fn apply_env_overrides(&mut self) {
        if let Some(url) = env_string("API_URL") {
            self.catalog.url = url;
        }
        if let Ok(token) = env::var("API_TOKEN") {
            self.catalog.token = token;
        }
        if let Some(secs) = env_parsed::<u64>("CATALOG_TIMEOUT_SECS") {
            self.catalog.timeout_secs = secs;
        }

        if let Some(minutes) = env_parsed::<u64>("SCAN_INTERVAL") {
            self.scan.interval_minutes = minutes;
        }

        if let Ok(raw) = env::var("ALLOWED_IPS") {
            self.access.allowed_ips = parse_ip_list(&raw);
        }

        if let Some(dir) = env_string("SOURCE_DIR") {
            self.paths.source_root = PathBuf::from(dir);
        }
        if let Some(dir) = env_string("TARGET_DIR") {
            self.paths.target_root = PathBuf::from(dir);
        }
        if let Some(dir) = env_string("HOST_SOURCE_ROOT") {
            self.paths.host_source_root = PathBuf::from(dir);
        }
        if let Some(dir) = env_string("DATA_DIR") {
            self.paths.data_dir = PathBuf::from(dir);
        }

        if let Some(capacity) = env_parsed::<usize>("LOG_CAPACITY") {
            self.logs.capacity = capacity;
        }
        if let Some(len) = env_parsed::<usize>("LOG_LINE_MAX") {
            self.logs.max_line_len = len;
        }

        if let Some(jobs) = env_parsed::<u32>("MAX_CONCURRENT_TRANSCODES") {
            self.transcode.max_concurrent = jobs;
        }
        if let Some(bin) = env_string("FFMPEG_BIN") {
            self.transcode.ffmpeg_bin = PathBuf::from(bin);
        }
        if let Some(bin) = env_string("FFPROBE_BIN") {
            self.transcode.ffprobe_bin = PathBuf::from(bin);
        }

        if let Some(bind) = env_string("BIND_ADDR") {
            self.server.bind = bind;
        }
    }

    /// Load configuration from file and apply environment overrides
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let mut config = Self::load_from_file(path)?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Defaults overlaid with the environment; the usual container setup
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.apply_env_overrides();
        config
    }

    /// Use the file when it exists, otherwise fall back to defaults plus environment
    pub fn load_or_env<P: AsRef<Path>>(path: Option<P>) -> Result<Self, ConfigError> {
        match path {
            Some(p) if p.as_ref().exists() => Self::load(p),
            _ => Ok(Self::from_env()),
        }
    }
}
