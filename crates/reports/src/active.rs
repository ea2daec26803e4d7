//! Reports for recordings on live targets
//!
//! Entries are keyed by [`RecordingDescriptor`]. A miss starts exactly one
//! computation per key; every concurrent caller for that key waits on it and
//! receives the same outcome. Entries are refreshed in the background once they
//! are older than the refresh interval, dropped once idle for longer than the
//! expiry, and invalidated when the target reports the recording stopped or
//! deleted.

use cryo_config::ReportsConfig;
use cryo_connections::TargetConnectionManager;
use cryo_core::{
    ConnectionDescriptor, Error, EventBus, ExitStatus, RecordingDescriptor, Result, ResultExt,
    TargetEvent, CLONE_PREFIX,
};
use cryo_utils::tracing::cache_event;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::{Duration, Instant};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn, Instrument};

use crate::generator::ReportGenerator;

const COPY_BUFFER_SIZE: usize = 64 * 1024;

/// Lifetimes of active-recording reports
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ActiveCacheOptions {
    /// Idle time after which an entry is dropped
    pub expiry: Duration,
    /// Age after which an entry is regenerated in the background
    pub refresh: Duration,
    /// Period of the idle-entry cleanup task; zero disables it
    pub cleanup_interval: Duration,
}

impl ActiveCacheOptions {
    pub fn new(expiry: Duration, refresh: Duration) -> Self {
        Self {
            expiry,
            refresh,
            cleanup_interval: expiry.min(Duration::from_secs(60)),
        }
    }

    pub fn from_config(config: &ReportsConfig) -> Self {
        Self::new(config.active_cache_expiry, config.active_cache_refresh)
    }
}

#[derive(Debug, Clone)]
struct CachedReport {
    text: Arc<str>,
    written_at: Instant,
    last_access: Instant,
}

impl CachedReport {
    fn new(text: Arc<str>) -> Self {
        let now = Instant::now();
        Self {
            text,
            written_at: now,
            last_access: now,
        }
    }
}

/// One computation shared by every caller that missed on the same key
#[derive(Default)]
struct InFlight {
    notify: Notify,
    outcome: OnceLock<Result<Arc<str>>>,
    invalidated: AtomicBool,
}

impl InFlight {
    fn complete(&self, outcome: Result<Arc<str>>) {
        let _ = self.outcome.set(outcome);
        self.notify.notify_waiters();
    }

    async fn wait(&self) -> Result<Arc<str>> {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if let Some(outcome) = self.outcome.get() {
                return outcome.clone();
            }
            notified.await;
        }
    }
}

struct ActiveInner {
    pool: Arc<TargetConnectionManager>,
    generator: Arc<dyn ReportGenerator>,
    options: ActiveCacheOptions,
    temp_dir: PathBuf,
    entries: DashMap<RecordingDescriptor, CachedReport>,
    in_flight: DashMap<RecordingDescriptor, Arc<InFlight>>,
}

enum Lookup {
    Hit(Arc<str>),
    Stale(Arc<str>),
    Miss,
}

impl ActiveInner {
    fn lookup(&self, key: &RecordingDescriptor) -> Lookup {
        let Some(mut entry) = self.entries.get_mut(key) else {
            return Lookup::Miss;
        };
        if entry.last_access.elapsed() > self.options.expiry {
            drop(entry);
            self.entries
                .remove_if(key, |_, e| e.last_access.elapsed() > self.options.expiry);
            return Lookup::Miss;
        }
        entry.last_access = Instant::now();
        if entry.written_at.elapsed() > self.options.refresh {
            Lookup::Stale(Arc::clone(&entry.text))
        } else {
            Lookup::Hit(Arc::clone(&entry.text))
        }
    }

    /// Join the computation in flight for `key`, starting one if there is none
    ///
    /// A fresh entry published after the caller's lookup is served as is.
    fn join_or_start(self: &Arc<Self>, key: &RecordingDescriptor) -> Arc<InFlight> {
        let flight = match self.in_flight.entry(key.clone()) {
            Entry::Occupied(entry) => return Arc::clone(entry.get()),
            Entry::Vacant(entry) => {
                // `settle` publishes while holding this entry, so the check is ordered against it
                if let Some(text) = self.fresh_text(key) {
                    let done = Arc::new(InFlight::default());
                    done.complete(Ok(text));
                    return done;
                }
                let flight = Arc::new(InFlight::default());
                entry.insert(Arc::clone(&flight));
                flight
            }
        };

        let leader = FlightGuard {
            inner: Arc::clone(self),
            key: key.clone(),
            flight: Arc::clone(&flight),
            finished: false,
        };
        tokio::spawn(async move {
            let outcome = leader.inner.compute(&leader.key, "").await;
            leader.finish(outcome);
        });
        flight
    }

    fn fresh_text(&self, key: &RecordingDescriptor) -> Option<Arc<str>> {
        let entry = self.entries.get(key)?;
        let fresh = entry.written_at.elapsed() <= self.options.refresh
            && entry.last_access.elapsed() <= self.options.expiry;
        fresh.then(|| Arc::clone(&entry.text))
    }

    /// Publish a finished computation unless the key was invalidated meanwhile
    fn settle(
        &self,
        key: &RecordingDescriptor,
        flight: &Arc<InFlight>,
        outcome: &Result<Arc<str>>,
    ) {
        // Holding the in-flight entry orders this against `invalidate`
        if let Entry::Occupied(entry) = self.in_flight.entry(key.clone()) {
            if !Arc::ptr_eq(entry.get(), flight) {
                return;
            }
            if let Ok(text) = outcome {
                if !flight.invalidated.load(Ordering::SeqCst) {
                    self.entries
                        .insert(key.clone(), CachedReport::new(Arc::clone(text)));
                }
            }
            entry.remove();
        }
    }

    fn invalidate(&self, key: &RecordingDescriptor) -> bool {
        match self.in_flight.entry(key.clone()) {
            Entry::Occupied(entry) => {
                entry.get().invalidated.store(true, Ordering::SeqCst);
                let removed = self.entries.remove(key).is_some();
                entry.remove();
                removed
            }
            Entry::Vacant(_vacant) => self.entries.remove(key).is_some(),
        }
    }

    /// Invalidate every entry and computation, returning how many reports were dropped
    fn invalidate_all(&self) -> usize {
        self.keys_matching(|_| true)
            .iter()
            .filter(|key| self.invalidate(key))
            .count()
    }

    fn keys_matching(
        &self,
        matches: impl Fn(&RecordingDescriptor) -> bool,
    ) -> Vec<RecordingDescriptor> {
        let mut keys: HashSet<RecordingDescriptor> = self
            .entries
            .iter()
            .map(|entry| entry.key().clone())
            .filter(|key| matches(key))
            .collect();
        keys.extend(
            self.in_flight
                .iter()
                .map(|entry| entry.key().clone())
                .filter(|key| matches(key)),
        );
        keys.into_iter().collect()
    }

    fn remove_idle(&self) -> usize {
        let expiry = self.options.expiry;
        let before = self.entries.len();
        self.entries.retain(|_, entry| entry.last_access.elapsed() <= expiry);
        before.saturating_sub(self.entries.len())
    }

    /// Copy the recording off the target, generate, and return the report text
    async fn compute(&self, key: &RecordingDescriptor, filter: &str) -> Result<Arc<str>> {
        let span = tracing::info_span!(
            "active_report",
            target_id = %key.connection,
            recording = %key.recording_name,
            generator = self.generator.name()
        );
        async move {
            tokio::fs::create_dir_all(&self.temp_dir)
                .await
                .fs_context(&self.temp_dir, "create scratch directory")?;
            let scratch = tempfile::Builder::new()
                .prefix("cryo-active-")
                .tempdir_in(&self.temp_dir)
                .fs_context(&self.temp_dir, "create scratch directory")?;
            let recording = scratch.path().join("recording.jfr");
            let destination = scratch.path().join("report.json");

            let result = self.generate(key, &recording, &destination, filter).await;
            if let Err(e) = scratch.close() {
                warn!(error = %e, "failed to remove scratch directory");
            }
            result
        }
        .instrument(span)
        .await
    }

    async fn generate(
        &self,
        key: &RecordingDescriptor,
        recording: &Path,
        destination: &Path,
        filter: &str,
    ) -> Result<Arc<str>> {
        self.download(key, recording).await?;

        let report = match self.generator.exec(recording, destination, filter).await {
            Ok(report) => report,
            Err(e) => {
                if e.exit_status() == Some(ExitStatus::OutOfMemory) {
                    self.close_clone(key).await;
                }
                if e.is_not_found() {
                    return Err(Error::recording_not_found(
                        key.connection.target_id(),
                        &key.recording_name,
                    ));
                }
                return Err(e);
            }
        };

        let text = tokio::fs::read_to_string(&report)
            .await
            .fs_context(&report, "read report")?;
        info!(bytes = text.len(), "active report generated");
        Ok(Arc::from(text))
    }

    /// Stream the recording into `path`, keeping the connection warm meanwhile
    async fn download(&self, key: &RecordingDescriptor, path: &Path) -> Result<()> {
        let descriptor = &key.connection;
        self.pool
            .execute_connected_task(descriptor, |connection| async move {
                let mut stream = connection
                    .open_recording(&key.recording_name)
                    .await?
                    .ok_or_else(|| {
                        Error::recording_not_found(descriptor.target_id(), &key.recording_name)
                    })?;

                let mut file = tokio::fs::File::create(path)
                    .await
                    .fs_context(path, "create recording copy")?;
                let mut buffer = vec![0u8; COPY_BUFFER_SIZE];
                let mut copied = 0u64;
                loop {
                    let read = stream
                        .read(&mut buffer)
                        .await
                        .fs_context(path, "stream recording")?;
                    if read == 0 {
                        break;
                    }
                    file.write_all(&buffer[..read])
                        .await
                        .fs_context(path, "write recording copy")?;
                    copied += read as u64;
                    if !self.pool.mark_lease_in_use(descriptor, &connection) {
                        return Err(Error::connection(
                            descriptor.target_id(),
                            "connection closed while streaming recording",
                        ));
                    }
                }
                file.sync_all()
                    .await
                    .fs_context(path, "write recording copy")?;
                debug!(bytes = copied, "recording copied");
                Ok(())
            })
            .await
    }

    /// Discard the working copy the target made for an analysis that ran out of memory
    async fn close_clone(&self, key: &RecordingDescriptor) {
        let clone = format!("{CLONE_PREFIX}{}", key.recording_name);
        let result = self
            .pool
            .execute_connected_task(&key.connection, |connection| {
                let clone = clone.clone();
                async move { connection.close_recording(&clone).await }
            })
            .await;

        match result {
            Ok(true) => info!(recording = %clone, "closed clone after out-of-memory failure"),
            Ok(false) => debug!(recording = %clone, "no clone to close"),
            Err(e) => warn!(recording = %clone, error = %e, "failed to close clone"),
        }
    }
}

/// Completes a flight exactly once, even when its computation panics or is aborted
struct FlightGuard {
    inner: Arc<ActiveInner>,
    key: RecordingDescriptor,
    flight: Arc<InFlight>,
    finished: bool,
}

impl FlightGuard {
    fn finish(mut self, outcome: Result<Arc<str>>) {
        self.inner.settle(&self.key, &self.flight, &outcome);
        self.flight.complete(outcome);
        self.finished = true;
    }
}

impl Drop for FlightGuard {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        warn!(key = %self.key, "report generation ended without an outcome");
        let outcome = Err(Error::generation(ExitStatus::Other, "report generation was aborted"));
        self.inner.settle(&self.key, &self.flight, &outcome);
        self.flight.complete(outcome);
    }
}

/// Cache of reports for recordings on live targets
pub struct ActiveRecordingReportCache {
    inner: Arc<ActiveInner>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl ActiveRecordingReportCache {
    /// Create the cache; the cleanup task starts when called inside a Tokio runtime
    pub fn new(
        pool: Arc<TargetConnectionManager>,
        generator: Arc<dyn ReportGenerator>,
        options: ActiveCacheOptions,
        temp_dir: impl Into<PathBuf>,
    ) -> Self {
        let inner = Arc::new(ActiveInner {
            pool,
            generator,
            options,
            temp_dir: temp_dir.into(),
            entries: DashMap::new(),
            in_flight: DashMap::new(),
        });
        let tasks = spawn_cleanup(&inner).into_iter().collect();
        Self {
            inner,
            tasks: Mutex::new(tasks),
        }
    }

    pub fn from_config(
        config: &ReportsConfig,
        pool: Arc<TargetConnectionManager>,
        generator: Arc<dyn ReportGenerator>,
    ) -> Self {
        Self::new(
            pool,
            generator,
            ActiveCacheOptions::from_config(config),
            &config.temp_dir,
        )
    }

    /// Report for `recording_name` on the target behind `descriptor`
    ///
    /// An empty filter serves and populates the cache. A non-empty filter always
    /// generates afresh and never touches the cache.
    pub async fn get(
        &self,
        descriptor: &ConnectionDescriptor,
        recording_name: &str,
        filter: &str,
    ) -> Result<Arc<str>> {
        let key = RecordingDescriptor::new(descriptor.clone(), recording_name);
        if !filter.trim().is_empty() {
            debug!(key = %key, filter, "filtered report bypasses cache");
            return self.inner.compute(&key, filter).await;
        }

        match self.inner.lookup(&key) {
            Lookup::Hit(text) => {
                cache_event("active", &key.to_string(), true);
                Ok(text)
            }
            Lookup::Stale(text) => {
                cache_event("active", &key.to_string(), true);
                debug!(key = %key, "refreshing report in background");
                self.inner.join_or_start(&key);
                Ok(text)
            }
            Lookup::Miss => {
                cache_event("active", &key.to_string(), false);
                self.inner.join_or_start(&key).wait().await
            }
        }
    }

    /// Drop the cached report; a computation in flight will not repopulate it
    ///
    /// Returns whether a cached report was removed.
    pub fn delete(&self, descriptor: &ConnectionDescriptor, recording_name: &str) -> bool {
        let key = RecordingDescriptor::new(descriptor.clone(), recording_name);
        let removed = self.inner.invalidate(&key);
        debug!(key = %key, removed, "active report invalidated");
        removed
    }

    /// Apply a target lifecycle notification
    pub async fn handle_event(&self, event: &TargetEvent) {
        match event {
            TargetEvent::RecordingStopped {
                target_id,
                recording_name,
            }
            | TargetEvent::RecordingDeleted {
                target_id,
                recording_name,
            } => {
                for key in self
                    .inner
                    .keys_matching(|key| key.matches(target_id, recording_name))
                {
                    self.inner.invalidate(&key);
                }
                debug!(%target_id, recording = %recording_name, "recording reports invalidated");
            }
            TargetEvent::TargetLost { target_id } => {
                let keys = self
                    .inner
                    .keys_matching(|key| key.connection.target_id() == target_id);
                for key in &keys {
                    self.inner.invalidate(key);
                }
                let closed = self.inner.pool.invalidate_target(target_id).await;
                info!(%target_id, reports = keys.len(), connections = closed, "target lost");
            }
        }
    }

    /// Follow lifecycle notifications from `bus` for the lifetime of this cache
    pub fn subscribe(self: &Arc<Self>, bus: &EventBus) {
        let mut events = bus.subscribe();
        let cache = Arc::downgrade(self);
        let handle = tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(published) => {
                        let Some(cache) = cache.upgrade() else {
                            break;
                        };
                        cache.handle_event(&published.event).await;
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        let Some(cache) = cache.upgrade() else {
                            break;
                        };
                        // The skipped events are unknown, so nothing cached can be trusted
                        let dropped = cache.inner.invalidate_all();
                        warn!(skipped, dropped, "missed target notifications, cache invalidated");
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        });
        self.tasks.lock().push(handle);
    }

    /// Drop entries idle past the expiry now rather than on the next tick
    pub fn remove_idle(&self) -> usize {
        self.inner.remove_idle()
    }

    pub fn len(&self) -> usize {
        self.inner.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.entries.is_empty()
    }

    pub fn contains(&self, descriptor: &ConnectionDescriptor, recording_name: &str) -> bool {
        self.inner
            .entries
            .contains_key(&RecordingDescriptor::new(descriptor.clone(), recording_name))
    }
}

impl std::fmt::Debug for ActiveRecordingReportCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActiveRecordingReportCache")
            .field("generator", &self.inner.generator.name())
            .field("options", &self.inner.options)
            .field("entries", &self.inner.entries.len())
            .field("in_flight", &self.inner.in_flight.len())
            .finish()
    }
}

impl Drop for ActiveRecordingReportCache {
    fn drop(&mut self) {
        for handle in self.tasks.lock().drain(..) {
            handle.abort();
        }
    }
}

fn spawn_cleanup(inner: &Arc<ActiveInner>) -> Option<JoinHandle<()>> {
    let period = inner.options.cleanup_interval;
    if period.is_zero() {
        return None;
    }
    let runtime = tokio::runtime::Handle::try_current().ok()?;

    let cache = Arc::downgrade(inner);
    Some(runtime.spawn(async move {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        interval.tick().await;

        loop {
            interval.tick().await;
            let Some(cache) = cache.upgrade() else {
                break;
            };
            let removed = cache.remove_idle();
            if removed > 0 {
                debug!(removed, "dropped idle active reports");
            }
        }
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use cryo_connections::{DirectoryStrategy, PoolOptions, StrategyRouter};
    use std::sync::atomic::AtomicUsize;

    #[derive(Default)]
    struct Untouched {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl ReportGenerator for Untouched {
        fn name(&self) -> &'static str {
            "untouched"
        }

        async fn exec(
            &self,
            _recording: &Path,
            destination: &Path,
            _filter: &str,
        ) -> Result<PathBuf> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(destination.to_path_buf())
        }
    }

    fn cache(generator: Arc<Untouched>, refresh: Duration) -> ActiveRecordingReportCache {
        let pool = Arc::new(TargetConnectionManager::new(
            StrategyRouter::new(Arc::new(DirectoryStrategy)),
            PoolOptions::new(Duration::from_secs(60), None),
        ));
        ActiveRecordingReportCache::new(
            pool,
            generator,
            ActiveCacheOptions::new(Duration::from_secs(60), refresh),
            std::env::temp_dir(),
        )
    }

    fn key() -> RecordingDescriptor {
        RecordingDescriptor::new(ConnectionDescriptor::new("file:///targets/a/"), "foo.jfr")
    }

    #[tokio::test]
    async fn late_miss_joins_the_published_report() {
        let generator = Arc::new(Untouched::default());
        let cache = cache(generator.clone(), Duration::from_secs(60));

        // Entry published by a leader between this caller's lookup and its join
        cache
            .inner
            .entries
            .insert(key(), CachedReport::new(Arc::from("published")));

        let text = cache.inner.join_or_start(&key()).wait().await.unwrap();
        assert_eq!(&*text, "published");
        assert!(cache.inner.in_flight.is_empty());
        assert_eq!(generator.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn stale_entry_still_starts_a_refresh() {
        let generator = Arc::new(Untouched::default());
        let cache = cache(generator, Duration::ZERO);
        cache
            .inner
            .entries
            .insert(key(), CachedReport::new(Arc::from("old")));
        tokio::time::sleep(Duration::from_millis(5)).await;

        let flight = cache.inner.join_or_start(&key());
        // The refresh fails on the missing target and leaves the old entry alone
        assert!(flight.wait().await.is_err());
        assert_eq!(&*cache.inner.entries.get(&key()).unwrap().text, "old");
    }
}
