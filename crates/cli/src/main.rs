use clap::Parser;
use cryo_config::{ConfigLoader, ConfigSource, ReportsConfig};
use cryo_core::WORKER_SUBCOMMAND;
use cryo_reports::worker;
use std::path::PathBuf;
use std::time::Duration;
use url::Url;

mod commands;
mod execute;

use commands::Commands;

#[derive(Parser)]
#[command(name = "cryo")]
#[command(about = "Automated analysis reports for flight recordings", long_about = None)]
#[command(version)]
struct Cli {
    /// Configuration file (defaults to the user configuration directory)
    #[arg(long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Root of the recording archive
    #[arg(long, global = true, value_name = "DIR")]
    archive_dir: Option<PathBuf>,

    /// Directory where archived reports are materialised
    #[arg(long, global = true, value_name = "DIR")]
    report_cache_dir: Option<PathBuf>,

    /// Hard bound on one report generation, in seconds
    #[arg(long, global = true, value_name = "SECONDS")]
    generation_timeout: Option<u64>,

    /// Generate reports with an external service instead of a worker process
    #[arg(long, global = true, value_name = "URL")]
    report_generator: Option<Url>,

    #[command(subcommand)]
    command: Commands,
}

impl Cli {
    /// Flags take precedence over the file and environment layers
    fn apply_overrides(&self, config: &mut ReportsConfig) {
        let mut overridden = false;
        if let Some(dir) = &self.archive_dir {
            config.archive_dir = dir.clone();
            overridden = true;
        }
        if let Some(dir) = &self.report_cache_dir {
            config.report_cache_dir = dir.clone();
            overridden = true;
        }
        if let Some(seconds) = self.generation_timeout {
            config.generation_timeout = Duration::from_secs(seconds);
            overridden = true;
        }
        if let Some(url) = &self.report_generator {
            config.report_generator_url = Some(url.clone());
            overridden = true;
        }
        if overridden {
            config.source = ConfigSource::CommandLine;
        }
    }
}

fn main() -> eyre::Result<()> {
    let args: Vec<String> = std::env::args().collect();

    // Worker mode runs before any runtime or hooks exist and reports through its exit code
    if args.get(1).map(String::as_str) == Some(WORKER_SUBCOMMAND) {
        let _ = cryo_utils::tracing::init_with_default("warn");
        let status = worker::run(&args[2..]);
        std::process::exit(status.code());
    }

    color_eyre::install()?;
    let cli = Cli::parse();
    if let Err(e) = cryo_utils::tracing::init() {
        eprintln!("failed to initialize logging: {e}");
    }

    let mut loader = ConfigLoader::new();
    if let Some(path) = &cli.config {
        loader = loader.config_file(path);
    }
    let mut config = loader.load()?;
    cli.apply_overrides(&mut config);

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    runtime.block_on(cli.command.execute(config))
}
