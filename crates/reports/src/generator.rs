//! Report generation contract and the startup choice of implementation

use async_trait::async_trait;
use cryo_config::ReportsConfig;
use cryo_core::Result;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;

use crate::remote::RemoteReportGenerator;
use crate::subprocess::SubprocessReportGenerator;

/// Turns a recording file into a report file
#[async_trait]
pub trait ReportGenerator: Send + Sync {
    /// Short name used in logs
    fn name(&self) -> &'static str;

    /// Analyse `recording` with the rules selected by `filter` and write the
    /// report to `destination`, returning the path of the written report
    ///
    /// A missing recording yields a not-found error. Any other failure is a
    /// generation error carrying the classified [`ExitStatus`](cryo_core::ExitStatus),
    /// and leaves no file at `destination`.
    async fn exec(&self, recording: &Path, destination: &Path, filter: &str) -> Result<PathBuf>;
}

/// The remote generator when an endpoint is configured, otherwise a local worker process
pub fn generator_from_config(config: &ReportsConfig) -> Result<Arc<dyn ReportGenerator>> {
    match &config.report_generator_url {
        Some(endpoint) => {
            info!(endpoint = %endpoint, "generating reports remotely");
            Ok(Arc::new(RemoteReportGenerator::new(
                endpoint.clone(),
                config.generation_timeout,
            )?))
        }
        None => {
            info!(
                max_heap_mb = config.worker_max_heap_mb,
                "generating reports in worker processes"
            );
            Ok(Arc::new(SubprocessReportGenerator::from_config(config)?))
        }
    }
}
