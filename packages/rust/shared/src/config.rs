//! Application configuration for feedgraph.
//!
//! User config lives at `~/.feedgraph/feedgraph.toml`.
//! CLI flags override config file values, which override defaults.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{FeedGraphError, Result};

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "feedgraph.toml";

/// Default config directory name under the user's home.
const CONFIG_DIR_NAME: &str = ".feedgraph";

// ---------------------------------------------------------------------------
// Config structs (matching feedgraph.toml schema)
// ---------------------------------------------------------------------------

/// Top-level application config, deserialized from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Global defaults.
    #[serde(default)]
    pub defaults: DefaultsConfig,

    /// Content store connection.
    #[serde(default)]
    pub store: StoreConfig,

    /// Outbound fetch policy.
    #[serde(default)]
    pub fetch: FetchPolicyConfig,
}

/// `[defaults]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DefaultsConfig {
    /// Maximum in-flight enclosure fetches.
    #[serde(default = "default_concurrency")]
    pub concurrency: u32,

    /// Timeout for a single enclosure fetch.
    #[serde(default = "default_fetch_timeout")]
    pub fetch_timeout_secs: u64,

    /// Timeout for fetching and parsing the source feed.
    #[serde(default = "default_feed_timeout")]
    pub feed_timeout_secs: u64,

    /// Deadline for the whole ingestion run.
    #[serde(default = "default_run_deadline")]
    pub run_deadline_secs: u64,

    /// Largest enclosure body accepted, in bytes.
    #[serde(default = "default_max_enclosure_bytes")]
    pub max_enclosure_bytes: u64,
}

impl Default for DefaultsConfig {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
            fetch_timeout_secs: default_fetch_timeout(),
            feed_timeout_secs: default_feed_timeout(),
            run_deadline_secs: default_run_deadline(),
            max_enclosure_bytes: default_max_enclosure_bytes(),
        }
    }
}

fn default_concurrency() -> u32 {
    8
}
fn default_fetch_timeout() -> u64 {
    30
}
fn default_feed_timeout() -> u64 {
    60
}
fn default_run_deadline() -> u64 {
    600
}
fn default_max_enclosure_bytes() -> u64 {
    1024 * 1024 * 1024
}

/// `[store]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Base URL of the IPFS HTTP API.
    #[serde(default = "default_api_url")]
    pub api_url: String,

    /// Pin blobs and nodes on write.
    #[serde(default = "default_true")]
    pub pin: bool,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            api_url: default_api_url(),
            pin: true,
        }
    }
}

fn default_api_url() -> String {
    "http://127.0.0.1:5001".into()
}

/// `[fetch]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetchPolicyConfig {
    /// Allow enclosure URLs that resolve to loopback/private addresses.
    #[serde(default)]
    pub allow_private_hosts: bool,

    /// Maximum redirects followed per fetch.
    #[serde(default = "default_max_redirects")]
    pub max_redirects: usize,
}

impl Default for FetchPolicyConfig {
    fn default() -> Self {
        Self {
            allow_private_hosts: false,
            max_redirects: default_max_redirects(),
        }
    }
}

fn default_true() -> bool {
    true
}
fn default_max_redirects() -> usize {
    5
}

// ---------------------------------------------------------------------------
// Ingest config (runtime, merged from config + CLI flags)
// ---------------------------------------------------------------------------

/// Runtime ingestion configuration, merged from config file and CLI flags.
#[derive(Debug, Clone)]
pub struct IngestConfig {
    /// Worker-pool bound for enclosure fetches.
    pub concurrency: u32,
    /// Per-enclosure fetch timeout.
    pub fetch_timeout: Duration,
    /// Source feed fetch timeout.
    pub feed_timeout: Duration,
    /// Whole-run deadline, measured from the start of the run.
    pub run_deadline: Duration,
    /// Largest enclosure body accepted, in bytes.
    pub max_enclosure_bytes: u64,
    /// Allow loopback/private enclosure hosts.
    pub allow_private_hosts: bool,
    /// Maximum redirects followed per fetch.
    pub max_redirects: usize,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self::from(&AppConfig::default())
    }
}

impl From<&AppConfig> for IngestConfig {
    fn from(config: &AppConfig) -> Self {
        Self {
            concurrency: config.defaults.concurrency.max(1),
            fetch_timeout: Duration::from_secs(config.defaults.fetch_timeout_secs),
            feed_timeout: Duration::from_secs(config.defaults.feed_timeout_secs),
            run_deadline: Duration::from_secs(config.defaults.run_deadline_secs),
            max_enclosure_bytes: config.defaults.max_enclosure_bytes,
            allow_private_hosts: config.fetch.allow_private_hosts,
            max_redirects: config.fetch.max_redirects,
        }
    }
}

// ---------------------------------------------------------------------------
// Config loading
// ---------------------------------------------------------------------------

/// Get the path to the config directory (`~/.feedgraph/`).
pub fn config_dir() -> Result<PathBuf> {
    let home = dirs::home_dir()
        .ok_or_else(|| FeedGraphError::config("could not determine home directory"))?;
    Ok(home.join(CONFIG_DIR_NAME))
}

/// Get the path to the config file (`~/.feedgraph/feedgraph.toml`).
pub fn config_file_path() -> Result<PathBuf> {
    Ok(config_dir()?.join(CONFIG_FILE_NAME))
}

/// Load the application config from disk. Returns defaults if the file does not exist.
pub fn load_config() -> Result<AppConfig> {
    let path = config_file_path()?;

    if !path.exists() {
        tracing::debug!(?path, "config file not found, using defaults");
        return Ok(AppConfig::default());
    }

    load_config_from(&path)
}

/// Load the application config from a specific file path.
pub fn load_config_from(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path).map_err(|e| FeedGraphError::io(path, e))?;

    toml::from_str(&content).map_err(|e| {
        FeedGraphError::config(format!("failed to parse {}: {e}", path.display()))
    })
}

/// Create the config directory and write a default config file.
/// Returns the path to the created file.
pub fn init_config() -> Result<PathBuf> {
    let dir = config_dir()?;
    std::fs::create_dir_all(&dir).map_err(|e| FeedGraphError::io(&dir, e))?;

    let path = dir.join(CONFIG_FILE_NAME);
    let config = AppConfig::default();
    let content =
        toml::to_string_pretty(&config).map_err(|e| FeedGraphError::config(e.to_string()))?;

    std::fs::write(&path, content).map_err(|e| FeedGraphError::io(&path, e))?;
    tracing::info!(?path, "created default config file");

    Ok(path)
}
