use clap::Subcommand;
use cryo_config::ReportsConfig;
use cryo_core::Result;

#[derive(Subcommand)]
pub enum ConfigCommands {
    /// Print the configuration after files and environment are applied
    Show,
}

impl ConfigCommands {
    pub fn execute(self, config: &ReportsConfig) -> Result<()> {
        match self {
            ConfigCommands::Show => {
                println!("{}", render(config));
                Ok(())
            }
        }
    }
}

fn render(config: &ReportsConfig) -> String {
    let optional = |value: Option<String>| value.unwrap_or_else(|| "none".to_string());
    [
        format!("generation_timeout    {:?}", config.generation_timeout),
        format!("active_cache_expiry   {:?}", config.active_cache_expiry),
        format!("active_cache_refresh  {:?}", config.active_cache_refresh),
        format!("worker_max_heap_mb    {}", config.worker_max_heap_mb),
        format!(
            "report_generator_url  {}",
            optional(config.report_generator_url.as_ref().map(|u| u.to_string()))
        ),
        format!("connection_ttl        {:?}", config.connection_ttl),
        format!(
            "max_connections       {}",
            optional(config.max_connections.map(|n| n.to_string()))
        ),
        format!("archive_dir           {}", config.archive_dir.display()),
        format!("report_cache_dir      {}", config.report_cache_dir.display()),
        format!("temp_dir              {}", config.temp_dir.display()),
        format!("source                {:?}", config.source),
    ]
    .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use cryo_config::ReportsConfigBuilder;
    use std::time::Duration;

    #[test]
    fn renders_every_setting() {
        let config = ReportsConfigBuilder::new()
            .generation_timeout(Duration::from_secs(5))
            .max_connections(Some(4))
            .archive_dir("/srv/archive")
            .build();

        let rendered = render(&config);
        assert!(rendered.contains("generation_timeout    5s"));
        assert!(rendered.contains("max_connections       4"));
        assert!(rendered.contains("report_generator_url  none"));
        assert!(rendered.contains("archive_dir           /srv/archive"));
        assert_eq!(rendered.lines().count(), 11);
    }
}
