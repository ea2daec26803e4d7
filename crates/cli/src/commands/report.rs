use clap::Subcommand;
use cryo_config::ReportsConfig;
use cryo_connections::{DirectoryStrategy, StrategyRouter, TargetConnectionManager};
use cryo_core::{ConnectionDescriptor, Credentials, Result, DEFAULT_ARCHIVE_SOURCE};
use cryo_reports::{FsRecordingStore, RecordingStore, ReportService};
use std::sync::Arc;

#[derive(Subcommand)]
pub enum ReportCommands {
    /// Print the report for an archived recording
    Archived {
        /// Recording name within the archive source
        name: String,

        /// Archive source the recording belongs to
        #[arg(long, default_value = DEFAULT_ARCHIVE_SOURCE)]
        source: String,

        /// Comma-separated rule ids or topics; a filtered report is never cached
        #[arg(long, default_value = "")]
        filter: String,
    },

    /// Print the report for a recording on a live target
    Active {
        /// Target id, such as file:///var/lib/app/recordings
        target: String,

        /// Recording name on the target
        name: String,

        #[arg(long, default_value = "")]
        filter: String,

        #[arg(long, requires = "password")]
        username: Option<String>,

        #[arg(long, requires = "username")]
        password: Option<String>,
    },

    /// Delete the cached report of an archived recording
    Delete {
        name: String,

        #[arg(long, default_value = DEFAULT_ARCHIVE_SOURCE)]
        source: String,
    },

    /// List archived recordings and whether their reports are cached
    List {
        #[arg(long, default_value = DEFAULT_ARCHIVE_SOURCE)]
        source: String,

        /// Print JSON instead of one line per recording
        #[arg(long)]
        json: bool,
    },

    /// List the sources present in the archive
    Sources,
}

impl ReportCommands {
    pub async fn execute(self, config: &ReportsConfig) -> Result<()> {
        let store = Arc::new(FsRecordingStore::new(&config.archive_dir));

        match self {
            ReportCommands::Archived {
                name,
                source,
                filter,
            } => {
                let service = build_service(config, store)?;
                let text = service
                    .archived_report_text_in(&source, &name, &filter)
                    .await?;
                println!("{text}");
                Ok(())
            }
            ReportCommands::Active {
                target,
                name,
                filter,
                username,
                password,
            } => {
                let descriptor = match (username, password) {
                    (Some(username), Some(password)) => ConnectionDescriptor::with_credentials(
                        target,
                        Credentials::new(username, password),
                    ),
                    _ => ConnectionDescriptor::new(target),
                };
                let service = build_service(config, store)?;
                let text = service.active_report(&descriptor, &name, &filter).await?;
                println!("{text}");
                Ok(())
            }
            ReportCommands::Delete { name, source } => {
                let service = build_service(config, store)?;
                if service.delete_archived_report(&source, &name) {
                    tracing::info!(source = %source, recording = %name, "deleted cached report");
                } else {
                    tracing::info!(
                        source = %source,
                        recording = %name,
                        "no cached report to delete"
                    );
                }
                Ok(())
            }
            ReportCommands::List { source, json } => {
                let service = build_service(config, store)?;
                let statuses = service.list_archived(&source)?;
                if json {
                    println!("{}", serde_json::to_string_pretty(&statuses)?);
                } else {
                    for status in statuses {
                        let marker = if status.cached { "cached" } else { "-" };
                        println!("{:<8} {}", marker, status.name);
                    }
                }
                Ok(())
            }
            ReportCommands::Sources => {
                for source in store.sources()? {
                    let count = store.list_names(&source)?.len();
                    println!("{source} ({count} recordings)");
                }
                Ok(())
            }
        }
    }
}

fn build_service(config: &ReportsConfig, store: Arc<FsRecordingStore>) -> Result<ReportService> {
    let router = StrategyRouter::new(Arc::new(DirectoryStrategy));
    let pool = Arc::new(TargetConnectionManager::from_config(config, router));
    ReportService::from_config(config, pool, store)
}
