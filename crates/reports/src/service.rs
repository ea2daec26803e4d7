//! Single entry point for report requests

use cryo_config::ReportsConfig;
use cryo_connections::TargetConnectionManager;
use cryo_core::{ConnectionDescriptor, EventBus, Result, ResultExt, DEFAULT_ARCHIVE_SOURCE};
use std::path::PathBuf;
use std::sync::Arc;

use crate::active::ActiveRecordingReportCache;
use crate::archived::{ArchivedRecordingReportCache, ArchivedReportStatus};
use crate::generator::{generator_from_config, ReportGenerator};
use crate::store::RecordingStore;

/// Routes report requests to the active or archived cache
#[derive(Debug, Clone)]
pub struct ReportService {
    active: Arc<ActiveRecordingReportCache>,
    archived: Arc<ArchivedRecordingReportCache>,
}

impl ReportService {
    pub fn new(
        active: Arc<ActiveRecordingReportCache>,
        archived: Arc<ArchivedRecordingReportCache>,
    ) -> Self {
        Self { active, archived }
    }

    /// Wire both caches from configuration, sharing one generator
    pub fn from_config(
        config: &ReportsConfig,
        pool: Arc<TargetConnectionManager>,
        store: Arc<dyn RecordingStore>,
    ) -> Result<Self> {
        let generator = generator_from_config(config)?;
        Ok(Self::with_generator(config, pool, store, generator))
    }

    pub fn with_generator(
        config: &ReportsConfig,
        pool: Arc<TargetConnectionManager>,
        store: Arc<dyn RecordingStore>,
        generator: Arc<dyn ReportGenerator>,
    ) -> Self {
        let active = ActiveRecordingReportCache::from_config(config, pool, Arc::clone(&generator));
        let archived = ArchivedRecordingReportCache::from_config(config, store, generator);
        Self::new(Arc::new(active), Arc::new(archived))
    }

    pub fn active(&self) -> &Arc<ActiveRecordingReportCache> {
        &self.active
    }

    pub fn archived(&self) -> &Arc<ArchivedRecordingReportCache> {
        &self.archived
    }

    /// Keep active reports consistent with target lifecycle notifications
    pub fn subscribe(&self, bus: &EventBus) {
        self.active.subscribe(bus);
    }

    pub async fn active_report(
        &self,
        descriptor: &ConnectionDescriptor,
        recording_name: &str,
        filter: &str,
    ) -> Result<Arc<str>> {
        self.active.get(descriptor, recording_name, filter).await
    }

    pub fn delete_active_report(
        &self,
        descriptor: &ConnectionDescriptor,
        recording_name: &str,
    ) -> bool {
        self.active.delete(descriptor, recording_name)
    }

    /// Path of the materialised report for an archived recording
    pub async fn archived_report_path(&self, recording_name: &str) -> Result<PathBuf> {
        self.archived.get(recording_name).await
    }

    /// Text of an archived report in the default source
    pub async fn archived_report_text(&self, recording_name: &str, filter: &str) -> Result<String> {
        self.archived_report_text_in(DEFAULT_ARCHIVE_SOURCE, recording_name, filter)
            .await
    }

    /// Text of an archived report; a non-empty filter bypasses the cache
    pub async fn archived_report_text_in(
        &self,
        source: &str,
        recording_name: &str,
        filter: &str,
    ) -> Result<String> {
        if !filter.trim().is_empty() {
            return self
                .archived
                .get_filtered(source, recording_name, filter)
                .await;
        }
        let path = self.archived.get_in(source, recording_name).await?;
        tokio::fs::read_to_string(&path)
            .await
            .fs_context(&path, "read report")
    }

    pub fn delete_archived_report(&self, source: &str, recording_name: &str) -> bool {
        self.archived.delete_in(source, recording_name)
    }

    pub fn list_archived(&self, source: &str) -> Result<Vec<ArchivedReportStatus>> {
        self.archived.list(source)
    }
}
