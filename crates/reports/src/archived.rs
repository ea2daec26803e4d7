//! Reports for archived recordings, materialised as files
//!
//! A report is generated at most once per recording and then served straight
//! from the report cache directory. Generation for the whole archive is
//! serialized behind one lock so a burst of requests never runs more than one
//! worker at a time.

use cryo_config::ReportsConfig;
use cryo_core::{Error, ExitStatus, Result, ResultExt, DEFAULT_ARCHIVE_SOURCE, REPORT_FILE_SUFFIX};
use cryo_utils::tracing::cache_event;
use cryo_utils::{is_readable_file, remove_if_exists};
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::generator::ReportGenerator;
use crate::store::{is_plain_name, RecordingStore};

/// An archived recording and whether its report is already materialised
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ArchivedReportStatus {
    pub name: String,
    pub cached: bool,
}

pub struct ArchivedRecordingReportCache {
    store: Arc<dyn RecordingStore>,
    generator: Arc<dyn ReportGenerator>,
    cache_dir: PathBuf,
    temp_dir: PathBuf,
    timeout: Duration,
    generation_lock: Mutex<()>,
}

impl ArchivedRecordingReportCache {
    pub fn new(
        store: Arc<dyn RecordingStore>,
        generator: Arc<dyn ReportGenerator>,
        cache_dir: impl Into<PathBuf>,
        temp_dir: impl Into<PathBuf>,
        timeout: Duration,
    ) -> Self {
        Self {
            store,
            generator,
            cache_dir: cache_dir.into(),
            temp_dir: temp_dir.into(),
            timeout,
            generation_lock: Mutex::new(()),
        }
    }

    pub fn from_config(
        config: &ReportsConfig,
        store: Arc<dyn RecordingStore>,
        generator: Arc<dyn ReportGenerator>,
    ) -> Self {
        Self::new(
            store,
            generator,
            &config.report_cache_dir,
            &config.temp_dir,
            config.generation_timeout,
        )
    }

    /// Where the report for `name` under `source` is materialised
    ///
    /// The file name is derived from a digest of source and name, so any
    /// recording name maps to a safe, stable path.
    pub fn report_path(&self, source: &str, name: &str) -> Result<PathBuf> {
        if !is_plain_name(source) {
            return Err(Error::archived_not_found(name));
        }
        let mut hasher = Sha256::new();
        hasher.update(source.as_bytes());
        hasher.update([0u8]);
        hasher.update(name.as_bytes());
        let digest = format!("{:x}", hasher.finalize());

        Ok(self
            .cache_dir
            .join(source)
            .join(format!("{digest}{REPORT_FILE_SUFFIX}")))
    }

    /// Report for a recording in the default source
    pub async fn get(&self, name: &str) -> Result<PathBuf> {
        self.get_in(DEFAULT_ARCHIVE_SOURCE, name).await
    }

    pub async fn get_in(&self, source: &str, name: &str) -> Result<PathBuf> {
        let destination = self.report_path(source, name)?;
        let key = format!("{source}/{name}");
        if is_readable_file(&destination) {
            cache_event("archived", &key, true);
            return Ok(destination);
        }

        let _generating = self.generation_lock.lock().await;
        if is_readable_file(&destination) {
            cache_event("archived", &key, true);
            return Ok(destination);
        }
        cache_event("archived", &key, false);

        let recording = self
            .store
            .resolve(source, name)
            .ok_or_else(|| Error::archived_not_found(name))?;
        let parent = destination
            .parent()
            .ok_or_else(|| Error::configuration("report cache directory has no parent"))?;
        tokio::fs::create_dir_all(parent)
            .await
            .fs_context(parent, "create report cache directory")?;

        // Generated beside the cache so the final rename stays on one filesystem;
        // whatever a failed or killed worker leaves behind goes with the scratch dir
        let scratch = tempfile::Builder::new()
            .prefix(".cryo-generating-")
            .tempdir_in(parent)
            .fs_context(parent, "create scratch directory")?;
        let staged = scratch.path().join(format!("report{REPORT_FILE_SUFFIX}"));

        let result = match self.generate(&recording, &staged, "").await {
            Ok(generated) => tokio::fs::rename(&generated, &destination)
                .await
                .fs_context(&destination, "publish report"),
            Err(e) => Err(e),
        };
        if let Err(e) = scratch.close() {
            warn!(error = %e, "failed to remove scratch directory");
        }
        result?;

        info!(source, recording = name, path = %destination.display(), "archived report cached");
        Ok(destination)
    }

    /// Generate a report restricted by `filter` without caching it
    pub async fn get_filtered(&self, source: &str, name: &str, filter: &str) -> Result<String> {
        let _generating = self.generation_lock.lock().await;
        let recording = self
            .store
            .resolve(source, name)
            .ok_or_else(|| Error::archived_not_found(name))?;

        tokio::fs::create_dir_all(&self.temp_dir)
            .await
            .fs_context(&self.temp_dir, "create scratch directory")?;
        let scratch = tempfile::Builder::new()
            .prefix("cryo-report-")
            .tempdir_in(&self.temp_dir)
            .fs_context(&self.temp_dir, "create scratch directory")?;
        let destination = scratch.path().join(format!("report{REPORT_FILE_SUFFIX}"));

        let result = match self.generate(&recording, &destination, filter).await {
            Ok(path) => tokio::fs::read_to_string(&path)
                .await
                .fs_context(&path, "read report"),
            Err(e) => Err(e),
        };
        if let Err(e) = scratch.close() {
            warn!(error = %e, "failed to remove scratch directory");
        }
        result
    }

    /// Remove the materialised report for a recording in the default source
    ///
    /// Returns whether a report was removed; deleting twice returns false.
    pub fn delete(&self, name: &str) -> bool {
        self.delete_in(DEFAULT_ARCHIVE_SOURCE, name)
    }

    pub fn delete_in(&self, source: &str, name: &str) -> bool {
        let Ok(path) = self.report_path(source, name) else {
            return false;
        };
        match remove_if_exists(&path) {
            Ok(removed) => {
                debug!(source, recording = name, removed, "archived report deleted");
                removed
            }
            Err(e) => {
                warn!(source, recording = name, error = %e, "failed to delete archived report");
                false
            }
        }
    }

    /// Recordings in `source` and whether each already has a report
    pub fn list(&self, source: &str) -> Result<Vec<ArchivedReportStatus>> {
        self.store
            .list_names(source)?
            .into_iter()
            .map(|name| {
                let cached = is_readable_file(&self.report_path(source, &name)?);
                Ok(ArchivedReportStatus { name, cached })
            })
            .collect()
    }

    /// Run the generator under the configured timeout; failures leave no file behind
    async fn generate(
        &self,
        recording: &Path,
        destination: &Path,
        filter: &str,
    ) -> Result<PathBuf> {
        let outcome = tokio::time::timeout(
            self.timeout,
            self.generator.exec(recording, destination, filter),
        )
        .await
        .unwrap_or_else(|_| {
            Err(Error::generation(
                ExitStatus::TimedOut,
                format!("no report for '{}' within {:?}", recording.display(), self.timeout),
            ))
        });

        if outcome.is_err() {
            if let Err(e) = remove_if_exists(destination) {
                warn!(path = %destination.display(), error = %e, "failed to remove partial report");
            }
        }
        outcome
    }
}

impl std::fmt::Debug for ArchivedRecordingReportCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ArchivedRecordingReportCache")
            .field("generator", &self.generator.name())
            .field("cache_dir", &self.cache_dir)
            .field("timeout", &self.timeout)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::FsRecordingStore;
    use async_trait::async_trait;

    struct Unused;

    #[async_trait]
    impl ReportGenerator for Unused {
        fn name(&self) -> &'static str {
            "unused"
        }

        async fn exec(&self, _: &Path, _: &Path, _: &str) -> Result<PathBuf> {
            unreachable!("no generation expected")
        }
    }

    fn cache(root: &Path) -> ArchivedRecordingReportCache {
        ArchivedRecordingReportCache::new(
            Arc::new(FsRecordingStore::new(root.join("archive"))),
            Arc::new(Unused),
            root.join("reports"),
            root.join("tmp"),
            Duration::from_secs(5),
        )
    }

    #[test]
    fn report_paths_are_stable_and_distinct() {
        let temp = tempfile::TempDir::new().unwrap();
        let cache = cache(temp.path());

        let foo = cache.report_path("default", "foo.jfr").unwrap();
        assert_eq!(foo, cache.report_path("default", "foo.jfr").unwrap());
        assert_ne!(foo, cache.report_path("default", "bar.jfr").unwrap());
        assert_ne!(foo, cache.report_path("uploads", "foo.jfr").unwrap());
        assert!(foo.starts_with(temp.path().join("reports/default")));
        assert!(foo.to_string_lossy().ends_with(".report.json"));

        // Names are hashed, never used as path components
        let odd = cache.report_path("default", "../../etc/passwd").unwrap();
        assert_eq!(odd.parent(), foo.parent());
        assert!(cache.report_path("..", "foo.jfr").is_err());
    }

    #[tokio::test]
    async fn cached_file_is_served_without_generation() {
        let temp = tempfile::TempDir::new().unwrap();
        let cache = cache(temp.path());
        let path = cache.report_path("default", "foo.jfr").unwrap();
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, "{}").unwrap();

        assert_eq!(cache.get("foo.jfr").await.unwrap(), path);
    }

    #[tokio::test]
    async fn unknown_recording_is_not_found() {
        let temp = tempfile::TempDir::new().unwrap();
        let err = cache(temp.path()).get("foo.jfr").await.unwrap_err();
        assert!(err.is_not_found());
    }
}
