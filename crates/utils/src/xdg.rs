use cryo_core::APP_NAME;
use std::env;
use std::path::PathBuf;

/// XDG Base Directory paths for cryo
pub struct XdgPaths;

impl XdgPaths {
    /// Get XDG_CONFIG_HOME/cryo or fallback
    pub fn config_dir() -> PathBuf {
        Self::base("XDG_CONFIG_HOME", ".config").join(APP_NAME)
    }

    /// Get XDG_DATA_HOME/cryo or fallback
    pub fn data_dir() -> PathBuf {
        Self::base("XDG_DATA_HOME", ".local/share").join(APP_NAME)
    }

    /// Get XDG_CACHE_HOME/cryo or fallback
    pub fn cache_dir() -> PathBuf {
        Self::base("XDG_CACHE_HOME", ".cache").join(APP_NAME)
    }

    /// Default location of the JSON configuration file
    pub fn config_file() -> PathBuf {
        Self::config_dir().join("config.json")
    }

    /// Default root of the recording archive
    pub fn archive_dir() -> PathBuf {
        Self::data_dir().join("archive")
    }

    /// Default directory for materialised archived reports
    pub fn report_cache_dir() -> PathBuf {
        Self::cache_dir().join("reports")
    }

    fn base(var: &str, home_relative: &str) -> PathBuf {
        env::var(var)
            .ok()
            .filter(|value| !value.is_empty())
            .map(PathBuf::from)
            .unwrap_or_else(|| {
                dirs::home_dir()
                    .map(|home| home.join(home_relative))
                    .unwrap_or_else(|| PathBuf::from(home_relative))
            })
    }
}
