//! Archived-recording report cache and the service built on it

use async_trait::async_trait;
use cryo_connections::{DirectoryStrategy, PoolOptions, StrategyRouter, TargetConnectionManager};
use cryo_core::{Error, ExitStatus, Result};
use cryo_reports::{
    ActiveCacheOptions, ActiveRecordingReportCache, ArchivedRecordingReportCache,
    ArchivedReportStatus, FsRecordingStore, ReportGenerator, ReportService,
};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;

/// Records the order in which generations start and finish
#[derive(Default)]
struct RecordingGenerator {
    calls: AtomicUsize,
    log: Mutex<Vec<String>>,
    delay: Duration,
    failure: Option<ExitStatus>,
    write_before_failing: bool,
}

impl RecordingGenerator {
    fn slow(delay: Duration) -> Self {
        Self {
            delay,
            ..Default::default()
        }
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn log(&self) -> Vec<String> {
        self.log.lock().unwrap().clone()
    }
}

#[async_trait]
impl ReportGenerator for RecordingGenerator {
    fn name(&self) -> &'static str {
        "recording"
    }

    async fn exec(&self, recording: &Path, destination: &Path, filter: &str) -> Result<PathBuf> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let name = recording.file_name().unwrap().to_string_lossy().into_owned();
        self.log.lock().unwrap().push(format!("start {name}"));
        tokio::time::sleep(self.delay).await;
        self.log.lock().unwrap().push(format!("end {name}"));

        if let Some(status) = self.failure {
            if self.write_before_failing {
                tokio::fs::write(destination, "{partial").await.unwrap();
            }
            return Err(Error::generation(status, "simulated failure"));
        }
        let report = serde_json::json!({ "recording": name, "filter": filter });
        tokio::fs::write(destination, report.to_string())
            .await
            .unwrap();
        Ok(destination.to_path_buf())
    }
}

struct Fixture {
    root: TempDir,
    generator: Arc<RecordingGenerator>,
    cache: Arc<ArchivedRecordingReportCache>,
}

impl Fixture {
    fn new(generator: RecordingGenerator) -> Self {
        Self::with_timeout(generator, Duration::from_secs(5))
    }

    fn with_timeout(generator: RecordingGenerator, timeout: Duration) -> Self {
        let root = TempDir::new().unwrap();
        let default = root.path().join("archive/default");
        std::fs::create_dir_all(&default).unwrap();
        std::fs::write(default.join("foo.jfr"), "foo").unwrap();
        std::fs::write(default.join("bar.jfr"), "bar").unwrap();

        let generator = Arc::new(generator);
        let cache = Arc::new(ArchivedRecordingReportCache::new(
            Arc::new(FsRecordingStore::new(root.path().join("archive"))),
            generator.clone(),
            root.path().join("reports"),
            root.path().join("tmp"),
            timeout,
        ));
        Self {
            root,
            generator,
            cache,
        }
    }
}

#[tokio::test]
async fn report_is_generated_once_then_served_from_disk() {
    let fixture = Fixture::new(RecordingGenerator::default());

    let first = fixture.cache.get("foo.jfr").await.unwrap();
    let second = fixture.cache.get("foo.jfr").await.unwrap();

    assert_eq!(first, second);
    assert_eq!(fixture.generator.calls(), 1);
    let report = std::fs::read_to_string(&first).unwrap();
    assert!(report.contains("foo.jfr"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_requests_for_one_recording_generate_once() {
    let fixture = Fixture::new(RecordingGenerator::slow(Duration::from_millis(50)));

    let requests = (0..8).map(|_| fixture.cache.get("foo.jfr"));
    let paths = futures::future::join_all(requests).await;

    assert_eq!(fixture.generator.calls(), 1);
    for path in paths {
        assert!(path.unwrap().is_file());
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn generation_is_serialized_across_recordings() {
    let fixture = Fixture::new(RecordingGenerator::slow(Duration::from_millis(50)));

    let (foo, bar) = tokio::join!(fixture.cache.get("foo.jfr"), fixture.cache.get("bar.jfr"));
    foo.unwrap();
    bar.unwrap();

    let log = fixture.generator.log();
    assert_eq!(log.len(), 4);
    for pair in log.chunks(2) {
        let started = pair[0].strip_prefix("start ").unwrap();
        assert_eq!(pair[1], format!("end {started}"), "overlapping generations: {log:?}");
    }
}

#[tokio::test]
async fn filtered_reports_are_never_cached() {
    let fixture = Fixture::new(RecordingGenerator::default());

    let text = fixture
        .cache
        .get_filtered("default", "foo.jfr", "heap")
        .await
        .unwrap();
    assert!(text.contains("\"filter\":\"heap\""));

    let path = fixture.cache.report_path("default", "foo.jfr").unwrap();
    assert!(!path.exists());
    assert_eq!(
        std::fs::read_dir(fixture.root.path().join("tmp"))
            .unwrap()
            .count(),
        0
    );
}

#[tokio::test]
async fn delete_is_idempotent() {
    let fixture = Fixture::new(RecordingGenerator::default());
    fixture.cache.get("foo.jfr").await.unwrap();

    assert!(fixture.cache.delete("foo.jfr"));
    assert!(!fixture.cache.delete("foo.jfr"));
    assert!(!fixture.cache.delete("never-generated.jfr"));

    fixture.cache.get("foo.jfr").await.unwrap();
    assert_eq!(fixture.generator.calls(), 2);
}

#[tokio::test]
async fn listing_reports_which_recordings_are_cached() {
    let fixture = Fixture::new(RecordingGenerator::default());
    fixture.cache.get("foo.jfr").await.unwrap();

    assert_eq!(
        fixture.cache.list("default").unwrap(),
        vec![
            ArchivedReportStatus {
                name: "bar.jfr".to_string(),
                cached: false,
            },
            ArchivedReportStatus {
                name: "foo.jfr".to_string(),
                cached: true,
            },
        ]
    );
}

#[tokio::test]
async fn unknown_recording_is_not_found() {
    let fixture = Fixture::new(RecordingGenerator::default());

    let err = fixture.cache.get("missing.jfr").await.unwrap_err();
    assert!(err.is_not_found());
    assert_eq!(fixture.generator.calls(), 0);
}

#[tokio::test]
async fn failed_generation_leaves_no_report() {
    let fixture = Fixture::new(RecordingGenerator {
        failure: Some(ExitStatus::RecordingException),
        write_before_failing: true,
        ..Default::default()
    });

    let err = fixture.cache.get("foo.jfr").await.unwrap_err();
    assert_eq!(err.exit_status(), Some(ExitStatus::RecordingException));
    let path = fixture.cache.report_path("default", "foo.jfr").unwrap();
    assert!(!path.exists());

    // Nothing partial survives next to the cached reports either
    let leftovers = std::fs::read_dir(fixture.root.path().join("reports/default"))
        .unwrap()
        .count();
    assert_eq!(leftovers, 0);
}

#[tokio::test]
async fn slow_generation_times_out() {
    let fixture = Fixture::with_timeout(
        RecordingGenerator::slow(Duration::from_secs(5)),
        Duration::from_millis(100),
    );

    let err = fixture.cache.get("foo.jfr").await.unwrap_err();
    assert_eq!(err.exit_status(), Some(ExitStatus::TimedOut));

    // The lock was released with the timed-out generation
    assert!(fixture.cache.get("missing.jfr").await.unwrap_err().is_not_found());
}

#[tokio::test]
async fn service_serves_archived_report_text() {
    let fixture = Fixture::new(RecordingGenerator::default());
    let pool = Arc::new(TargetConnectionManager::new(
        StrategyRouter::new(Arc::new(DirectoryStrategy)),
        PoolOptions::new(Duration::from_secs(60), None),
    ));
    let active = ActiveRecordingReportCache::new(
        pool,
        fixture.generator.clone(),
        ActiveCacheOptions::new(Duration::from_secs(60), Duration::from_secs(60)),
        fixture.root.path().join("tmp"),
    );
    let service = ReportService::new(Arc::new(active), fixture.cache.clone());

    let cached = service.archived_report_text("foo.jfr", "").await.unwrap();
    assert!(cached.contains("\"filter\":\"\""));
    let filtered = service.archived_report_text("foo.jfr", "cpu").await.unwrap();
    assert!(filtered.contains("\"filter\":\"cpu\""));
    assert_eq!(fixture.generator.calls(), 2);

    service.archived_report_text("foo.jfr", "").await.unwrap();
    assert_eq!(fixture.generator.calls(), 2);

    assert!(service.delete_archived_report("default", "foo.jfr"));
    assert!(!service.delete_archived_report("default", "foo.jfr"));
}

#[cfg(unix)]
mod worker_process {
    use super::*;
    use cryo_reports::SubprocessReportGenerator;
    use std::time::Instant;

    fn archive_with(
        generator: SubprocessReportGenerator,
        timeout: Duration,
    ) -> (TempDir, ArchivedRecordingReportCache) {
        let root = TempDir::new().unwrap();
        let default = root.path().join("archive/default");
        std::fs::create_dir_all(&default).unwrap();
        std::fs::write(default.join("foo.jfr"), "{\"type\":\"CPULoad\"}\n").unwrap();

        let cache = ArchivedRecordingReportCache::new(
            Arc::new(FsRecordingStore::new(root.path().join("archive"))),
            Arc::new(generator),
            root.path().join("reports"),
            root.path().join("tmp"),
            timeout,
        );
        (root, cache)
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_requests_spawn_one_worker() {
        let spawns = TempDir::new().unwrap();
        let counter = spawns.path().join("spawns");
        let script = format!(
            "echo spawned >> '{}'; sleep 0.2; printf '{{\"source\":\"%s\"}}' \"$(basename \"$1\")\" > \"$2\"",
            counter.display()
        );
        let generator = SubprocessReportGenerator::with_program(
            "/bin/sh",
            ["-c", script.as_str(), "worker"],
            Duration::from_secs(10),
            64,
        );
        let (_root, cache) = archive_with(generator, Duration::from_secs(10));

        let (first, second) = tokio::join!(cache.get("foo.jfr"), cache.get("foo.jfr"));
        let (first, second) = (first.unwrap(), second.unwrap());

        assert_eq!(first, second);
        assert_eq!(
            std::fs::read_to_string(&first).unwrap(),
            "{\"source\":\"foo.jfr\"}"
        );
        assert_eq!(std::fs::read_to_string(&counter).unwrap().lines().count(), 1);

        cache.get("foo.jfr").await.unwrap();
        assert_eq!(std::fs::read_to_string(&counter).unwrap().lines().count(), 1);
    }

    #[tokio::test]
    async fn hung_worker_is_killed_on_timeout() {
        let pids = TempDir::new().unwrap();
        let pid_file = pids.path().join("worker.pid");
        let script = format!("echo $$ > '{}'; exec sleep 30", pid_file.display());
        let generator = SubprocessReportGenerator::with_program(
            "/bin/sh",
            ["-c", script.as_str(), "worker"],
            Duration::from_millis(300),
            64,
        );
        let (_root, cache) = archive_with(generator, Duration::from_secs(10));

        let started = Instant::now();
        let err = cache.get("foo.jfr").await.unwrap_err();

        assert_eq!(err.exit_status(), Some(ExitStatus::TimedOut));
        assert!(started.elapsed() < Duration::from_secs(10));
        assert!(!cache.report_path("default", "foo.jfr").unwrap().exists());

        let pid = std::fs::read_to_string(&pid_file).unwrap();
        let alive = std::process::Command::new("/bin/sh")
            .args(["-c", &format!("kill -0 {}", pid.trim())])
            .stderr(std::process::Stdio::null())
            .status()
            .unwrap();
        assert!(!alive.success(), "worker {} still running", pid.trim());
    }
}
