//! Unit tests for configuration loading

#[cfg(test)]
mod tests {
    use crate::{ConfigLoader, ConfigSource, ReportsConfig, ReportsConfigBuilder};
    use serial_test::serial;
    use std::collections::HashMap;
    use std::path::PathBuf;
    use std::time::Duration;
    use tempfile::TempDir;

    fn env_of(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    fn loader_without_file(temp: &TempDir) -> ConfigLoader {
        let path = temp.path().join("config.json");
        std::fs::write(&path, "{}").unwrap();
        ConfigLoader::new().config_file(path)
    }

    #[test]
    fn defaults_are_sensible() {
        let config = ReportsConfig::default();
        assert_eq!(config.generation_timeout, Duration::from_secs(30));
        assert_eq!(config.active_cache_expiry, Duration::from_secs(1800));
        assert_eq!(config.active_cache_refresh, Duration::from_secs(300));
        assert_eq!(config.worker_max_heap_mb, 200);
        assert_eq!(config.max_connections, None);
        assert_eq!(config.report_generator_url, None);
        assert_eq!(config.source, ConfigSource::Default);
    }

    #[test]
    fn environment_overrides_defaults() {
        let temp = TempDir::new().unwrap();
        let config = loader_without_file(&temp)
            .load_with_env(env_of(&[
                ("CRYO_REPORT_GENERATION_TIMEOUT", "5"),
                ("CRYO_ACTIVE_REPORTS_CACHE_EXPIRY", "60"),
                ("CRYO_ACTIVE_REPORTS_CACHE_REFRESH", "20"),
                ("CRYO_REPORT_GENERATION_MAX_HEAP", "0"),
                ("CRYO_REPORT_GENERATOR", "http://reports:8080"),
                ("CRYO_TARGET_CACHE_SIZE", "4"),
            ]))
            .unwrap();

        assert_eq!(config.generation_timeout, Duration::from_secs(5));
        assert_eq!(config.active_cache_expiry, Duration::from_secs(60));
        assert_eq!(config.active_cache_refresh, Duration::from_secs(20));
        assert_eq!(config.worker_max_heap_mb, 0);
        assert_eq!(
            config.report_generator_url.as_ref().map(|u| u.as_str()),
            Some("http://reports:8080/")
        );
        assert_eq!(config.max_connections, Some(4));
        assert!(matches!(config.source, ConfigSource::EnvironmentVariable(_)));
    }

    #[test]
    fn non_positive_pool_size_is_unbounded() {
        let temp = TempDir::new().unwrap();
        let config = loader_without_file(&temp)
            .load_with_env(env_of(&[("CRYO_TARGET_CACHE_SIZE", "-1")]))
            .unwrap();
        assert_eq!(config.max_connections, None);
    }

    #[test]
    fn invalid_values_name_the_variable() {
        let temp = TempDir::new().unwrap();
        let err = loader_without_file(&temp)
            .load_with_env(env_of(&[("CRYO_REPORT_GENERATION_TIMEOUT", "soon")]))
            .unwrap_err();
        assert!(err.to_string().contains("CRYO_REPORT_GENERATION_TIMEOUT"));

        let err = loader_without_file(&temp)
            .load_with_env(env_of(&[("CRYO_REPORT_GENERATION_TIMEOUT", "0")]))
            .unwrap_err();
        assert!(err.to_string().contains("at least 1 second"));

        let err = loader_without_file(&temp)
            .load_with_env(env_of(&[("CRYO_REPORT_GENERATOR", "not a url")]))
            .unwrap_err();
        assert!(err.to_string().contains("invalid URL"));
    }

    #[test]
    fn file_values_apply_and_env_wins() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("config.json");
        std::fs::write(
            &path,
            r#"{
                "generationTimeoutSeconds": 12,
                "workerMaxHeapMb": 512,
                "archiveDir": "/srv/archive",
                "maxConnections": 8
            }"#,
        )
        .unwrap();

        let from_file = ConfigLoader::new()
            .config_file(&path)
            .load_with_env(env_of(&[]))
            .unwrap();
        assert_eq!(from_file.generation_timeout, Duration::from_secs(12));
        assert_eq!(from_file.worker_max_heap_mb, 512);
        assert_eq!(from_file.archive_dir, PathBuf::from("/srv/archive"));
        assert_eq!(from_file.max_connections, Some(8));
        assert_eq!(from_file.source, ConfigSource::ConfigFile(path.clone()));

        let with_env = ConfigLoader::new()
            .config_file(&path)
            .load_with_env(env_of(&[("CRYO_REPORT_GENERATION_MAX_HEAP", "64")]))
            .unwrap();
        assert_eq!(with_env.generation_timeout, Duration::from_secs(12));
        assert_eq!(with_env.worker_max_heap_mb, 64);
    }

    #[test]
    fn unknown_file_keys_are_rejected() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("config.json");
        std::fs::write(&path, r#"{ "generationTimeout": 12 }"#).unwrap();

        let err = ConfigLoader::new()
            .config_file(&path)
            .load_with_env(env_of(&[]))
            .unwrap_err();
        assert!(err.to_string().contains("invalid config file"));
    }

    #[test]
    fn explicit_missing_file_is_an_error() {
        let temp = TempDir::new().unwrap();
        let result = ConfigLoader::new()
            .config_file(temp.path().join("missing.json"))
            .load_with_env(env_of(&[]));
        assert!(result.is_err());
    }

    #[test]
    #[serial]
    fn reads_the_process_environment() {
        let temp = TempDir::new().unwrap();
        std::env::set_var("CRYO_TARGET_CACHE_TTL", "42");
        let config = loader_without_file(&temp).load().unwrap();
        std::env::remove_var("CRYO_TARGET_CACHE_TTL");

        assert_eq!(config.connection_ttl, Duration::from_secs(42));
    }

    #[test]
    fn builder_sets_every_field() {
        let config = ReportsConfigBuilder::new()
            .generation_timeout(Duration::from_secs(1))
            .connection_ttl(Duration::from_nanos(1))
            .max_connections(Some(2))
            .report_cache_dir("/tmp/reports")
            .build();
        assert_eq!(config.generation_timeout, Duration::from_secs(1));
        assert_eq!(config.connection_ttl, Duration::from_nanos(1));
        assert_eq!(config.max_connections, Some(2));
        assert_eq!(config.report_cache_dir, PathBuf::from("/tmp/reports"));
    }
}
