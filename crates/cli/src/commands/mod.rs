use clap::Subcommand;

pub mod config;
pub mod report;

use self::config::ConfigCommands;
use self::report::ReportCommands;

#[derive(Subcommand)]
pub enum Commands {
    /// Generate, list and delete recording reports
    #[command(visible_alias = "r")]
    Report {
        #[command(subcommand)]
        command: ReportCommands,
    },

    /// Inspect the effective configuration
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
}
