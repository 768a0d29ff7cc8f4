//! Application configuration for the compliance data service.
//!
//! User config lives at `~/.cortap/cortap.toml`.
//! CLI flags override config file values, which override defaults.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{CortapError, Result};

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "cortap.toml";

/// Default config directory name under the user's home.
const CONFIG_DIR_NAME: &str = ".cortap";

// ---------------------------------------------------------------------------
// Config structs (matching cortap.toml schema)
// ---------------------------------------------------------------------------

/// Top-level application config, deserialized from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Remote review-management API.
    #[serde(default)]
    pub remote: RemoteSection,

    /// Cache and blob storage.
    #[serde(default)]
    pub cache: CacheSection,

    /// Review-area catalog override.
    #[serde(default)]
    pub catalog: CatalogSection,

    /// Schema validation thresholds.
    #[serde(default)]
    pub validation: ValidationSection,

    /// Header field defaults merged under caller overrides.
    #[serde(default)]
    pub header: BTreeMap<String, toml::Value>,

    /// HTTP surface.
    #[serde(default)]
    pub server: ServerSection,
}

/// Which remote endpoint family produces raw records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RecordSourceKind {
    /// List assessments, then fetch each assessment's detail.
    #[default]
    Assessments,
    /// Page through project controls with embedded assessments.
    ProjectControls,
}

/// `[remote]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteSection {
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Name of the env var holding the bearer token (never store the token itself).
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,

    /// Total attempts per request, including the first.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Detail requests issued per batch.
    #[serde(default = "default_concurrency")]
    pub concurrency: u32,

    /// First backoff delay; doubles on each retry.
    #[serde(default = "default_base_backoff_ms")]
    pub base_backoff_ms: u64,

    #[serde(default = "default_page_size")]
    pub page_size: u32,

    #[serde(default)]
    pub source: RecordSourceKind,
}

impl Default for RemoteSection {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            api_key_env: default_api_key_env(),
            max_attempts: default_max_attempts(),
            timeout_secs: default_timeout_secs(),
            concurrency: default_concurrency(),
            base_backoff_ms: default_base_backoff_ms(),
            page_size: default_page_size(),
            source: RecordSourceKind::default(),
        }
    }
}

fn default_base_url() -> String {
    "https://api.riskuity.com/api/v1".into()
}
fn default_api_key_env() -> String {
    "RISKUITY_API_KEY".into()
}
fn default_max_attempts() -> u32 {
    3
}
fn default_timeout_secs() -> u64 {
    10
}
fn default_concurrency() -> u32 {
    10
}
fn default_base_backoff_ms() -> u64 {
    1000
}
fn default_page_size() -> u32 {
    1000
}

/// Blob backend used for cache entries and generated documents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CacheBackendKind {
    /// Embedded libSQL database on local disk.
    #[default]
    Local,
    /// S3-style HTTP object store.
    Http,
    /// In-process only; lost on exit.
    Memory,
}

/// `[cache]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheSection {
    #[serde(default = "default_ttl_secs")]
    pub ttl_secs: u64,

    /// Key prefix for cache entries.
    #[serde(default = "default_namespace")]
    pub namespace: String,

    #[serde(default)]
    pub backend: CacheBackendKind,

    /// Database path for the local backend.
    #[serde(default = "default_local_path")]
    pub local_path: String,

    /// Object store base URL (bucket endpoint) for the http backend.
    #[serde(default)]
    pub http_base_url: String,

    /// Name of the env var holding the object store bearer token.
    #[serde(default = "default_http_token_env")]
    pub http_token_env: String,

    /// Name of the env var holding the download-URL signing secret.
    #[serde(default = "default_presign_secret_env")]
    pub presign_secret_env: String,

    /// Lifetime of generated download URLs.
    #[serde(default = "default_presign_ttl_secs")]
    pub presign_ttl_secs: u64,
}

impl Default for CacheSection {
    fn default() -> Self {
        Self {
            ttl_secs: default_ttl_secs(),
            namespace: default_namespace(),
            backend: CacheBackendKind::default(),
            local_path: default_local_path(),
            http_base_url: String::new(),
            http_token_env: default_http_token_env(),
            presign_secret_env: default_presign_secret_env(),
            presign_ttl_secs: default_presign_ttl_secs(),
        }
    }
}

fn default_ttl_secs() -> u64 {
    3600
}
fn default_namespace() -> String {
    "data".into()
}
fn default_local_path() -> String {
    "~/.cortap/cache.db".into()
}
fn default_http_token_env() -> String {
    "CORTAP_STORE_TOKEN".into()
}
fn default_presign_secret_env() -> String {
    "CORTAP_PRESIGN_SECRET".into()
}
fn default_presign_ttl_secs() -> u64 {
    86_400
}

/// `[catalog]` section.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CatalogSection {
    /// Path to a TOML area catalog; the built-in catalog is used when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
}

/// `[validation]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationSection {
    #[serde(default = "default_min_review_areas")]
    pub min_review_areas: usize,

    #[serde(default = "default_deficiency_warning_threshold")]
    pub deficiency_warning_threshold: usize,
}

impl Default for ValidationSection {
    fn default() -> Self {
        Self {
            min_review_areas: default_min_review_areas(),
            deficiency_warning_threshold: default_deficiency_warning_threshold(),
        }
    }
}

fn default_min_review_areas() -> usize {
    21
}
fn default_deficiency_warning_threshold() -> usize {
    10
}

/// `[server]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSection {
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:8080".into()
}

// ---------------------------------------------------------------------------
// Runtime configs (merged from config + CLI flags)
// ---------------------------------------------------------------------------

/// Runtime configuration for the remote fetcher.
#[derive(Debug, Clone)]
pub struct RemoteConfig {
    pub base_url: String,
    pub max_attempts: u32,
    pub timeout: Duration,
    pub concurrency: usize,
    pub base_backoff: Duration,
    pub page_size: u32,
    pub source: RecordSourceKind,
}

impl From<&AppConfig> for RemoteConfig {
    fn from(config: &AppConfig) -> Self {
        let remote = &config.remote;
        Self {
            base_url: remote.base_url.trim_end_matches('/').to_string(),
            max_attempts: remote.max_attempts.max(1),
            timeout: Duration::from_secs(remote.timeout_secs),
            concurrency: remote.concurrency.max(1) as usize,
            base_backoff: Duration::from_millis(remote.base_backoff_ms),
            page_size: remote.page_size.max(1),
            source: remote.source,
        }
    }
}

/// Runtime configuration for the cache-aside store.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    pub ttl: Duration,
    pub namespace: String,
    pub presign_ttl: Duration,
}

impl From<&AppConfig> for CacheConfig {
    fn from(config: &AppConfig) -> Self {
        Self {
            ttl: Duration::from_secs(config.cache.ttl_secs),
            namespace: config.cache.namespace.trim_matches('/').to_string(),
            presign_ttl: Duration::from_secs(config.cache.presign_ttl_secs),
        }
    }
}

/// Runtime configuration for schema validation.
#[derive(Debug, Clone)]
pub struct ValidationConfig {
    pub min_review_areas: usize,
    pub deficiency_warning_threshold: usize,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self::from(&AppConfig::default())
    }
}

impl From<&AppConfig> for ValidationConfig {
    fn from(config: &AppConfig) -> Self {
        Self {
            min_review_areas: config.validation.min_review_areas,
            deficiency_warning_threshold: config.validation.deficiency_warning_threshold,
        }
    }
}

impl AppConfig {
    /// Header defaults as a JSON map, ready to merge under caller overrides.
    pub fn header_defaults(&self) -> serde_json::Map<String, serde_json::Value> {
        self.header
            .iter()
            .filter_map(|(k, v)| serde_json::to_value(v).ok().map(|v| (k.clone(), v)))
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Config loading
// ---------------------------------------------------------------------------

/// Get the path to the config directory (`~/.cortap/`).
pub fn config_dir() -> Result<PathBuf> {
    let home =
        dirs::home_dir().ok_or_else(|| CortapError::config("could not determine home directory"))?;
    Ok(home.join(CONFIG_DIR_NAME))
}

/// Get the path to the config file (`~/.cortap/cortap.toml`).
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
    let content = std::fs::read_to_string(path).map_err(|e| CortapError::io(path, e))?;

    toml::from_str(&content)
        .map_err(|e| CortapError::config(format!("failed to parse {}: {e}", path.display())))
}

/// Create the config directory and write a default config file.
/// Returns the path to the created file.
pub fn init_config() -> Result<PathBuf> {
    let dir = config_dir()?;
    std::fs::create_dir_all(&dir).map_err(|e| CortapError::io(&dir, e))?;

    let path = dir.join(CONFIG_FILE_NAME);
    let config = AppConfig::default();
    let content =
        toml::to_string_pretty(&config).map_err(|e| CortapError::config(e.to_string()))?;

    std::fs::write(&path, content).map_err(|e| CortapError::io(&path, e))?;
    tracing::info!(?path, "created default config file");

    Ok(path)
}

/// Read a secret from the env var named in config. Empty values count as unset.
pub fn resolve_secret(var_name: &str, what: &str) -> Result<String> {
    match std::env::var(var_name) {
        Ok(val) if !val.is_empty() => Ok(val),
        _ => Err(CortapError::config(format!(
            "{what} not found. Set the {var_name} environment variable."
        ))),
    }
}

/// Expand a leading `~/` against the user's home directory.
pub fn expand_home(path: &str) -> PathBuf {
    match path.strip_prefix("~/") {
        Some(rest) => dirs::home_dir()
            .map(|home| home.join(rest))
            .unwrap_or_else(|| PathBuf::from(path)),
        None => PathBuf::from(path),
    }
}
