use crate::commands::Commands;
use cryo_config::ReportsConfig;

impl Commands {
    pub async fn execute(self, config: ReportsConfig) -> eyre::Result<()> {
        tracing::debug!(source = ?config.source, "configuration loaded");
        match self {
            Commands::Report { command } => command.execute(&config).await?,
            Commands::Config { command } => command.execute(&config)?,
        }
        Ok(())
    }
}
