//! Centralized configuration for cryo
//!
//! `ReportsConfig` is the single source of truth for the connection pool and the
//! report pipeline. It is immutable after construction and can be safely shared
//! across components.

use cryo_utils::xdg::XdgPaths;
use std::path::PathBuf;
use std::time::Duration;
use url::Url;

/// Immutable configuration for the connection pool and report pipeline
#[derive(Debug, Clone, PartialEq)]
pub struct ReportsConfig {
    /// Hard wall-clock bound on one report generation
    pub generation_timeout: Duration,

    /// Idle time after which an active-recording report is dropped
    pub active_cache_expiry: Duration,

    /// Age after which an active-recording report is regenerated in the background
    pub active_cache_refresh: Duration,

    /// Memory ceiling for a report worker in MB; 0 leaves it unbounded
    pub worker_max_heap_mb: u64,

    /// External report generator; when set, reports are generated remotely
    pub report_generator_url: Option<Url>,

    /// How long an idle pooled connection stays warm
    pub connection_ttl: Duration,

    /// Upper bound on pooled connections; `None` is unbounded
    pub max_connections: Option<usize>,

    /// Root of the recording archive
    pub archive_dir: PathBuf,

    /// Directory where archived reports are materialised
    pub report_cache_dir: PathBuf,

    /// Scratch space for recordings copied off live targets
    pub temp_dir: PathBuf,

    /// Which layer last changed this configuration
    pub source: ConfigSource,
}

/// Source of configuration for debugging and precedence tracking
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigSource {
    /// Default configuration
    Default,
    /// Configuration file
    ConfigFile(PathBuf),
    /// Environment variable
    EnvironmentVariable(String),
    /// Command line argument
    CommandLine,
}

impl ReportsConfig {
    pub const DEFAULT_GENERATION_TIMEOUT: Duration = Duration::from_secs(30);
    pub const DEFAULT_ACTIVE_CACHE_EXPIRY: Duration = Duration::from_secs(30 * 60);
    pub const DEFAULT_ACTIVE_CACHE_REFRESH: Duration = Duration::from_secs(5 * 60);
    pub const DEFAULT_WORKER_MAX_HEAP_MB: u64 = 200;
    pub const DEFAULT_CONNECTION_TTL: Duration = Duration::from_secs(10);
}

impl Default for ReportsConfig {
    fn default() -> Self {
        Self {
            generation_timeout: Self::DEFAULT_GENERATION_TIMEOUT,
            active_cache_expiry: Self::DEFAULT_ACTIVE_CACHE_EXPIRY,
            active_cache_refresh: Self::DEFAULT_ACTIVE_CACHE_REFRESH,
            worker_max_heap_mb: Self::DEFAULT_WORKER_MAX_HEAP_MB,
            report_generator_url: None,
            connection_ttl: Self::DEFAULT_CONNECTION_TTL,
            max_connections: None,
            archive_dir: XdgPaths::archive_dir(),
            report_cache_dir: XdgPaths::report_cache_dir(),
            temp_dir: std::env::temp_dir(),
            source: ConfigSource::Default,
        }
    }
}

/// Builder for creating configurations programmatically
#[derive(Debug, Clone, Default)]
pub struct ReportsConfigBuilder {
    config: ReportsConfig,
}

impl ReportsConfigBuilder {
    /// Create a new builder with default configuration
    pub fn new() -> Self {
        Self::default()
    }

    pub fn generation_timeout(mut self, timeout: Duration) -> Self {
        self.config.generation_timeout = timeout;
        self
    }

    pub fn active_cache_expiry(mut self, expiry: Duration) -> Self {
        self.config.active_cache_expiry = expiry;
        self
    }

    pub fn active_cache_refresh(mut self, refresh: Duration) -> Self {
        self.config.active_cache_refresh = refresh;
        self
    }

    pub fn worker_max_heap_mb(mut self, mb: u64) -> Self {
        self.config.worker_max_heap_mb = mb;
        self
    }

    pub fn report_generator_url(mut self, url: Option<Url>) -> Self {
        self.config.report_generator_url = url;
        self
    }

    pub fn connection_ttl(mut self, ttl: Duration) -> Self {
        self.config.connection_ttl = ttl;
        self
    }

    pub fn max_connections(mut self, max: Option<usize>) -> Self {
        self.config.max_connections = max;
        self
    }

    pub fn archive_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.archive_dir = dir.into();
        self
    }

    pub fn report_cache_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.report_cache_dir = dir.into();
        self
    }

    pub fn temp_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.temp_dir = dir.into();
        self
    }

    /// Build the configuration
    pub fn build(self) -> ReportsConfig {
        self.config
    }
}
