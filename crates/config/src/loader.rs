//! Configuration loader for cryo
//!
//! Precedence, lowest to highest: built-in defaults, the JSON configuration file,
//! `CRYO_*` environment variables, then command-line overrides applied by the
//! binary.

use crate::config::{ConfigSource, ReportsConfig};
use cryo_core::constants::{
    ACTIVE_REPORTS_CACHE_EXPIRY_VAR, ACTIVE_REPORTS_CACHE_REFRESH_VAR, ARCHIVE_PATH_VAR,
    REPORT_CACHE_PATH_VAR, REPORT_GENERATION_MAX_HEAP_VAR, REPORT_GENERATION_TIMEOUT_VAR,
    REPORT_GENERATOR_URL_VAR, TARGET_CACHE_SIZE_VAR, TARGET_CACHE_TTL_VAR, TEMP_PATH_VAR,
};
use cryo_core::{Error, Result};
use cryo_utils::xdg::XdgPaths;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;

/// On-disk configuration; every field is optional and overrides the default
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct FileConfig {
    generation_timeout_seconds: Option<u64>,
    active_cache_expiry_seconds: Option<u64>,
    active_cache_refresh_seconds: Option<u64>,
    worker_max_heap_mb: Option<u64>,
    report_generator_url: Option<String>,
    connection_ttl_seconds: Option<u64>,
    max_connections: Option<i64>,
    archive_dir: Option<PathBuf>,
    report_cache_dir: Option<PathBuf>,
    temp_dir: Option<PathBuf>,
}

/// Configuration loader that handles precedence
#[derive(Debug, Default)]
pub struct ConfigLoader {
    /// Explicit configuration file; defaults to `$XDG_CONFIG_HOME/cryo/config.json`
    config_file: Option<PathBuf>,
}

impl ConfigLoader {
    /// Create a new configuration loader
    pub fn new() -> Self {
        Self::default()
    }

    /// Read this file instead of the XDG default; it must exist
    pub fn config_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.config_file = Some(path.into());
        self
    }

    /// Load configuration from defaults, file and process environment
    pub fn load(&self) -> Result<ReportsConfig> {
        self.load_with_env(|name| std::env::var(name).ok())
    }

    /// Load configuration reading environment variables through `lookup`
    pub fn load_with_env<F>(&self, lookup: F) -> Result<ReportsConfig>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = ReportsConfig::default();

        let (path, required) = match &self.config_file {
            Some(path) => (path.clone(), true),
            None => (XdgPaths::config_file(), false),
        };
        if required || path.exists() {
            config = apply_file(config, &path)?;
        }

        apply_env(config, lookup)
    }
}

fn apply_file(mut config: ReportsConfig, path: &Path) -> Result<ReportsConfig> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| Error::file_system(path, "read config file", e))?;
    let file: FileConfig = serde_json::from_str(&content).map_err(|e| {
        Error::configuration(format!("invalid config file '{}': {e}", path.display()))
    })?;

    if let Some(secs) = file.generation_timeout_seconds {
        config.generation_timeout = positive_seconds("generationTimeoutSeconds", secs)?;
    }
    if let Some(secs) = file.active_cache_expiry_seconds {
        config.active_cache_expiry = positive_seconds("activeCacheExpirySeconds", secs)?;
    }
    if let Some(secs) = file.active_cache_refresh_seconds {
        config.active_cache_refresh = positive_seconds("activeCacheRefreshSeconds", secs)?;
    }
    if let Some(mb) = file.worker_max_heap_mb {
        config.worker_max_heap_mb = mb;
    }
    if let Some(url) = file.report_generator_url {
        config.report_generator_url = parse_url("reportGeneratorUrl", &url)?;
    }
    if let Some(secs) = file.connection_ttl_seconds {
        config.connection_ttl = Duration::from_secs(secs);
    }
    if let Some(max) = file.max_connections {
        config.max_connections = pool_size(max);
    }
    if let Some(dir) = file.archive_dir {
        config.archive_dir = dir;
    }
    if let Some(dir) = file.report_cache_dir {
        config.report_cache_dir = dir;
    }
    if let Some(dir) = file.temp_dir {
        config.temp_dir = dir;
    }

    config.source = ConfigSource::ConfigFile(path.to_path_buf());
    Ok(config)
}

fn apply_env<F>(mut config: ReportsConfig, lookup: F) -> Result<ReportsConfig>
where
    F: Fn(&str) -> Option<String>,
{
    let mut touched: Vec<&'static str> = Vec::new();
    let mut var = |name: &'static str| {
        let value = lookup(name).filter(|v| !v.trim().is_empty());
        if value.is_some() {
            touched.push(name);
        }
        value
    };

    if let Some(value) = var(REPORT_GENERATION_TIMEOUT_VAR) {
        config.generation_timeout = positive_seconds(
            REPORT_GENERATION_TIMEOUT_VAR,
            parse_u64(REPORT_GENERATION_TIMEOUT_VAR, &value)?,
        )?;
    }
    if let Some(value) = var(ACTIVE_REPORTS_CACHE_EXPIRY_VAR) {
        config.active_cache_expiry = positive_seconds(
            ACTIVE_REPORTS_CACHE_EXPIRY_VAR,
            parse_u64(ACTIVE_REPORTS_CACHE_EXPIRY_VAR, &value)?,
        )?;
    }
    if let Some(value) = var(ACTIVE_REPORTS_CACHE_REFRESH_VAR) {
        config.active_cache_refresh = positive_seconds(
            ACTIVE_REPORTS_CACHE_REFRESH_VAR,
            parse_u64(ACTIVE_REPORTS_CACHE_REFRESH_VAR, &value)?,
        )?;
    }
    if let Some(value) = var(REPORT_GENERATION_MAX_HEAP_VAR) {
        config.worker_max_heap_mb = parse_u64(REPORT_GENERATION_MAX_HEAP_VAR, &value)?;
    }
    if let Some(value) = var(REPORT_GENERATOR_URL_VAR) {
        config.report_generator_url = parse_url(REPORT_GENERATOR_URL_VAR, &value)?;
    }
    if let Some(value) = var(TARGET_CACHE_TTL_VAR) {
        config.connection_ttl = Duration::from_secs(parse_u64(TARGET_CACHE_TTL_VAR, &value)?);
    }
    if let Some(value) = var(TARGET_CACHE_SIZE_VAR) {
        let size = value.trim().parse::<i64>().map_err(|e| {
            Error::configuration(format!("{TARGET_CACHE_SIZE_VAR}: invalid size '{value}': {e}"))
        })?;
        config.max_connections = pool_size(size);
    }
    if let Some(value) = var(ARCHIVE_PATH_VAR) {
        config.archive_dir = PathBuf::from(value);
    }
    if let Some(value) = var(REPORT_CACHE_PATH_VAR) {
        config.report_cache_dir = PathBuf::from(value);
    }
    if let Some(value) = var(TEMP_PATH_VAR) {
        config.temp_dir = PathBuf::from(value);
    }

    if !touched.is_empty() {
        config.source = ConfigSource::EnvironmentVariable(touched.join(","));
    }
    Ok(config)
}

fn parse_u64(name: &str, value: &str) -> Result<u64> {
    value
        .trim()
        .parse::<u64>()
        .map_err(|e| Error::configuration(format!("{name}: invalid number '{value}': {e}")))
}

fn positive_seconds(name: &str, secs: u64) -> Result<Duration> {
    if secs == 0 {
        return Err(Error::configuration(format!("{name}: must be at least 1 second")));
    }
    Ok(Duration::from_secs(secs))
}

fn parse_url(name: &str, value: &str) -> Result<Option<Url>> {
    let value = value.trim();
    if value.is_empty() {
        return Ok(None);
    }
    Url::parse(value)
        .map(Some)
        .map_err(|e| Error::configuration(format!("{name}: invalid URL '{value}': {e}")))
}

/// Non-positive sizes mean "unbounded"
fn pool_size(size: i64) -> Option<usize> {
    if size <= 0 {
        None
    } else {
        usize::try_from(size).ok()
    }
}
