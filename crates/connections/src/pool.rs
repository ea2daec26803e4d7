//! Keyed pool of target connections
//!
//! Each descriptor owns a slot holding at most one pooled connection. Reads of a
//! slot take a short synchronous lock; creating a connection serializes on a
//! per-slot async lock, so unrelated targets never wait on each other and a task
//! may re-enter the pool for its own descriptor without deadlocking.

use cryo_config::ReportsConfig;
use cryo_core::{ConnectionDescriptor, Error, Result};
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::connection::{CloseHandle, Connection};
use crate::routing::StrategyRouter;

/// Sizing and expiry of the pool
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolOptions {
    /// Idle time after which an unused connection is closed
    pub ttl: Duration,
    /// Upper bound on live connections; `None` is unbounded
    pub max_connections: Option<usize>,
    /// Period of the background sweeper; zero disables it
    pub sweep_interval: Duration,
}

impl PoolOptions {
    pub fn new(ttl: Duration, max_connections: Option<usize>) -> Self {
        Self {
            ttl,
            max_connections,
            sweep_interval: ttl.clamp(Duration::from_millis(100), Duration::from_secs(30)),
        }
    }

    pub fn from_config(config: &ReportsConfig) -> Self {
        Self::new(config.connection_ttl, config.max_connections)
    }

    #[must_use]
    pub fn sweep_interval(mut self, interval: Duration) -> Self {
        self.sweep_interval = interval;
        self
    }
}

impl Default for PoolOptions {
    fn default() -> Self {
        Self::new(ReportsConfig::DEFAULT_CONNECTION_TTL, None)
    }
}

/// Point-in-time view of pool activity
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PoolStats {
    /// Connections currently pooled
    pub live: usize,
    /// Connections established since the pool was created
    pub created: u64,
    /// Connections closed by TTL expiry or capacity pressure
    pub evicted: u64,
}

pub(crate) struct PooledConnection {
    id: u64,
    connection: Arc<dyn Connection>,
    created_at: Instant,
    last_touched: Mutex<Instant>,
    ref_count: AtomicUsize,
    invalidated: AtomicBool,
}

impl PooledConnection {
    fn new(id: u64, connection: Arc<dyn Connection>) -> Self {
        let now = Instant::now();
        Self {
            id,
            connection,
            created_at: now,
            last_touched: Mutex::new(now),
            ref_count: AtomicUsize::new(1),
            invalidated: AtomicBool::new(false),
        }
    }

    fn touch(&self) {
        *self.last_touched.lock() = Instant::now();
    }

    fn last_touched(&self) -> Instant {
        *self.last_touched.lock()
    }

    fn in_use(&self) -> bool {
        self.ref_count.load(Ordering::SeqCst) > 0
    }

    fn is_invalidated(&self) -> bool {
        self.invalidated.load(Ordering::SeqCst)
    }

    /// Borrowed connections never expire
    fn is_live(&self, ttl: Duration) -> bool {
        !self.is_invalidated() && (self.in_use() || self.last_touched().elapsed() <= ttl)
    }

    fn is_reclaimable(&self, ttl: Duration) -> bool {
        !self.in_use() && (self.is_invalidated() || self.last_touched().elapsed() > ttl)
    }

    fn lease(self: &Arc<Self>) -> ConnectionLease {
        self.ref_count.fetch_add(1, Ordering::SeqCst);
        self.touch();
        ConnectionLease {
            entry: Arc::clone(self),
        }
    }
}

impl fmt::Debug for PooledConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PooledConnection")
            .field("id", &self.id)
            .field("age", &self.created_at.elapsed())
            .field("ref_count", &self.ref_count.load(Ordering::SeqCst))
            .field("invalidated", &self.is_invalidated())
            .finish()
    }
}

/// Keeps a pooled connection borrowed for as long as it is alive
///
/// Dropping the lease, whether the task finished, failed, panicked or was
/// cancelled, returns the connection to the idle state.
struct ConnectionLease {
    entry: Arc<PooledConnection>,
}

impl ConnectionLease {
    fn connection(&self) -> Arc<dyn Connection> {
        Arc::clone(&self.entry.connection)
    }
}

impl Drop for ConnectionLease {
    fn drop(&mut self) {
        self.entry.touch();
        self.entry.ref_count.fetch_sub(1, Ordering::SeqCst);
    }
}

#[derive(Default)]
struct Slot {
    creation: tokio::sync::Mutex<()>,
    current: RwLock<Option<Arc<PooledConnection>>>,
}

/// A unit of capacity held while a connection is being established
struct Reservation<'a> {
    live: &'a AtomicUsize,
    committed: bool,
}

impl Reservation<'_> {
    fn commit(mut self) {
        self.committed = true;
    }
}

impl Drop for Reservation<'_> {
    fn drop(&mut self) {
        if !self.committed {
            self.live.fetch_sub(1, Ordering::SeqCst);
        }
    }
}

pub(crate) struct PoolInner {
    slots: DashMap<ConnectionDescriptor, Arc<Slot>>,
    router: StrategyRouter,
    options: PoolOptions,
    live: AtomicUsize,
    next_id: AtomicU64,
    created: AtomicU64,
    evicted: AtomicU64,
}

impl PoolInner {
    fn slot(&self, descriptor: &ConnectionDescriptor) -> Arc<Slot> {
        Arc::clone(self.slots.entry(descriptor.clone()).or_default().value())
    }

    fn existing_slot(&self, descriptor: &ConnectionDescriptor) -> Option<Arc<Slot>> {
        self.slots.get(descriptor).map(|slot| Arc::clone(slot.value()))
    }

    fn try_lease(&self, slot: &Slot) -> Option<ConnectionLease> {
        let current = slot.current.read();
        current
            .as_ref()
            .filter(|entry| entry.is_live(self.options.ttl))
            .map(PooledConnection::lease)
    }

    /// Remove the slot's connection if it satisfies `predicate`
    fn take_if(
        &self,
        slot: &Slot,
        predicate: impl FnOnce(&PooledConnection) -> bool,
    ) -> Option<Arc<PooledConnection>> {
        let mut current = slot.current.write();
        if !current.as_deref().is_some_and(predicate) {
            return None;
        }
        let entry = current.take()?;
        entry.invalidated.store(true, Ordering::SeqCst);
        self.live.fetch_sub(1, Ordering::SeqCst);
        Some(entry)
    }

    async fn acquire(
        self: &Arc<Self>,
        descriptor: &ConnectionDescriptor,
    ) -> Result<ConnectionLease> {
        let slot = self.slot(descriptor);
        if let Some(lease) = self.try_lease(&slot) {
            return Ok(lease);
        }

        let _creating = slot.creation.lock().await;

        // Another caller may have connected while we waited
        let stale = {
            let mut current = slot.current.write();
            if let Some(entry) = current.as_ref().filter(|e| e.is_live(self.options.ttl)) {
                return Ok(entry.lease());
            }
            let stale = current.take();
            if let Some(entry) = &stale {
                entry.invalidated.store(true, Ordering::SeqCst);
                self.live.fetch_sub(1, Ordering::SeqCst);
            }
            stale
        };
        if let Some(entry) = stale {
            debug!(target_id = %descriptor, id = entry.id, "replacing expired connection");
            close_quietly(descriptor, &entry).await;
        }

        let reservation = self.reserve().await?;
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let strategy = self.router.route(descriptor);
        let close_handle = CloseHandle::new(self, descriptor.clone(), id);
        let connection = strategy.connect(descriptor, close_handle).await?;
        reservation.commit();

        let entry = Arc::new(PooledConnection::new(id, connection));
        *slot.current.write() = Some(Arc::clone(&entry));
        self.created.fetch_add(1, Ordering::SeqCst);
        info!(
            target_id = %descriptor,
            strategy = strategy.name(),
            id,
            "connection established"
        );

        Ok(ConnectionLease { entry })
    }

    fn reservation(&self) -> Reservation<'_> {
        Reservation {
            live: &self.live,
            committed: false,
        }
    }

    async fn reserve(&self) -> Result<Reservation<'_>> {
        let Some(capacity) = self.options.max_connections else {
            self.live.fetch_add(1, Ordering::SeqCst);
            return Ok(self.reservation());
        };

        loop {
            let live = self.live.load(Ordering::SeqCst);
            if live < capacity {
                if self
                    .live
                    .compare_exchange(live, live + 1, Ordering::SeqCst, Ordering::SeqCst)
                    .is_ok()
                {
                    return Ok(self.reservation());
                }
                continue;
            }

            match self.evict_least_recently_used() {
                Some((descriptor, entry)) => {
                    debug!(
                        target_id = %descriptor,
                        id = entry.id,
                        "evicting idle connection at capacity"
                    );
                    close_quietly(&descriptor, &entry).await;
                }
                None => return Err(Error::PoolExhausted { capacity }),
            }
        }
    }

    fn evict_least_recently_used(&self) -> Option<(ConnectionDescriptor, Arc<PooledConnection>)> {
        let slots: Vec<(ConnectionDescriptor, Arc<Slot>)> = self
            .slots
            .iter()
            .map(|entry| (entry.key().clone(), Arc::clone(entry.value())))
            .collect();

        let mut oldest: Option<(Instant, u64, usize)> = None;
        for (index, (_, slot)) in slots.iter().enumerate() {
            let Some(current) = slot.current.try_read() else {
                continue;
            };
            if let Some(entry) = current.as_ref().filter(|e| !e.in_use()) {
                let touched = entry.last_touched();
                if oldest.map_or(true, |(t, _, _)| touched < t) {
                    oldest = Some((touched, entry.id, index));
                }
            }
        }

        let (_, id, index) = oldest?;
        let (descriptor, slot) = &slots[index];
        let entry = self.take_if(slot, |e| e.id == id && !e.in_use())?;
        self.evicted.fetch_add(1, Ordering::SeqCst);
        Some((descriptor.clone(), entry))
    }

    pub(crate) fn connection_closed(&self, descriptor: &ConnectionDescriptor, id: u64) {
        let Some(slot) = self.existing_slot(descriptor) else {
            return;
        };
        if self.take_if(&slot, |e| e.id == id).is_some() {
            info!(target_id = %descriptor, id, "connection closed by target");
        }
    }

    async fn sweep(&self) -> usize {
        let ttl = self.options.ttl;
        let slots: Vec<(ConnectionDescriptor, Arc<Slot>)> = self
            .slots
            .iter()
            .map(|entry| (entry.key().clone(), Arc::clone(entry.value())))
            .collect();

        let mut reclaimed = Vec::new();
        for (descriptor, slot) in &slots {
            if let Some(entry) = self.take_if(slot, |e| e.is_reclaimable(ttl)) {
                reclaimed.push((descriptor.clone(), entry));
            }
        }
        drop(slots);

        // A slot somebody still holds may be about to receive a connection
        self.slots
            .retain(|_, slot| Arc::strong_count(slot) > 1 || slot.current.read().is_some());

        self.evicted
            .fetch_add(reclaimed.len() as u64, Ordering::SeqCst);
        for (descriptor, entry) in &reclaimed {
            debug!(target_id = %descriptor, id = entry.id, "closing idle connection");
            close_quietly(descriptor, entry).await;
        }
        reclaimed.len()
    }
}

async fn close_quietly(descriptor: &ConnectionDescriptor, entry: &PooledConnection) {
    if let Err(e) = entry.connection.close().await {
        warn!(target_id = %descriptor, id = entry.id, error = %e, "failed to close connection");
    }
}

/// Pool of connections to monitored targets
///
/// Connections are borrowed for the duration of one task and then kept warm
/// until they have been idle for longer than the TTL. At most one connection
/// per distinct descriptor is live at a time.
pub struct TargetConnectionManager {
    inner: Arc<PoolInner>,
    sweeper: Option<JoinHandle<()>>,
}

impl TargetConnectionManager {
    /// Create a pool; the sweeper starts when called inside a Tokio runtime
    pub fn new(router: StrategyRouter, options: PoolOptions) -> Self {
        let inner = Arc::new(PoolInner {
            slots: DashMap::new(),
            router,
            options,
            live: AtomicUsize::new(0),
            next_id: AtomicU64::new(1),
            created: AtomicU64::new(0),
            evicted: AtomicU64::new(0),
        });
        let sweeper = spawn_sweeper(&inner);
        Self { inner, sweeper }
    }

    pub fn from_config(config: &ReportsConfig, router: StrategyRouter) -> Self {
        Self::new(router, PoolOptions::from_config(config))
    }

    /// Run `task` with a connection to `descriptor`
    ///
    /// Reuses the pooled connection when it is live and establishes one
    /// otherwise. Establishment failures are returned as-is and never retried.
    /// The task may itself call back into the pool for the same descriptor and
    /// will receive the same connection.
    pub async fn execute_connected_task<T, F, Fut>(
        &self,
        descriptor: &ConnectionDescriptor,
        task: F,
    ) -> Result<T>
    where
        F: FnOnce(Arc<dyn Connection>) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let lease = self.inner.acquire(descriptor).await?;
        task(lease.connection()).await
    }

    /// Refresh the idle clock of a pooled connection
    ///
    /// Long transfers call this so the connection outlives its TTL. Returns
    /// false when there is no valid pooled connection for `descriptor`.
    pub fn mark_connection_in_use(&self, descriptor: &ConnectionDescriptor) -> bool {
        self.touch_if(descriptor, |_| true)
    }

    /// Refresh the idle clock only while `connection` is still the pooled one
    ///
    /// Returns false once the task's own connection was invalidated, even if
    /// another caller has already replaced it.
    pub fn mark_lease_in_use(
        &self,
        descriptor: &ConnectionDescriptor,
        connection: &Arc<dyn Connection>,
    ) -> bool {
        self.touch_if(descriptor, |entry| {
            std::ptr::addr_eq(Arc::as_ptr(&entry.connection), Arc::as_ptr(connection))
        })
    }

    fn touch_if(
        &self,
        descriptor: &ConnectionDescriptor,
        accept: impl FnOnce(&PooledConnection) -> bool,
    ) -> bool {
        let Some(slot) = self.inner.existing_slot(descriptor) else {
            return false;
        };
        let current = slot.current.read();
        match current.as_deref() {
            Some(entry) if !entry.is_invalidated() && accept(entry) => {
                entry.touch();
                true
            }
            _ => false,
        }
    }

    /// Drop and close the pooled connection for `descriptor`
    ///
    /// Tasks still running keep their handle; the next task connects afresh.
    pub async fn invalidate(&self, descriptor: &ConnectionDescriptor) -> bool {
        let Some(slot) = self.inner.existing_slot(descriptor) else {
            return false;
        };
        match self.inner.take_if(&slot, |_| true) {
            Some(entry) => {
                debug!(target_id = %descriptor, id = entry.id, "connection invalidated");
                close_quietly(descriptor, &entry).await;
                true
            }
            None => false,
        }
    }

    /// Invalidate every pooled connection to `target_id`, whatever the credentials
    pub async fn invalidate_target(&self, target_id: &str) -> usize {
        let descriptors: Vec<ConnectionDescriptor> = self
            .inner
            .slots
            .iter()
            .filter(|entry| entry.key().target_id() == target_id)
            .map(|entry| entry.key().clone())
            .collect();

        let mut closed = 0;
        for descriptor in &descriptors {
            if self.invalidate(descriptor).await {
                closed += 1;
            }
        }
        closed
    }

    /// Close idle connections past their TTL now rather than on the next tick
    pub async fn sweep(&self) -> usize {
        self.inner.sweep().await
    }

    pub fn stats(&self) -> PoolStats {
        PoolStats {
            live: self.inner.live.load(Ordering::SeqCst),
            created: self.inner.created.load(Ordering::SeqCst),
            evicted: self.inner.evicted.load(Ordering::SeqCst),
        }
    }

    pub fn options(&self) -> PoolOptions {
        self.inner.options
    }
}

impl fmt::Debug for TargetConnectionManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TargetConnectionManager")
            .field("router", &self.inner.router)
            .field("options", &self.inner.options)
            .field("stats", &self.stats())
            .finish()
    }
}

impl Drop for TargetConnectionManager {
    fn drop(&mut self) {
        if let Some(handle) = self.sweeper.take() {
            handle.abort();
        }
    }
}

fn spawn_sweeper(inner: &Arc<PoolInner>) -> Option<JoinHandle<()>> {
    let period = inner.options.sweep_interval;

    // Zero disables the sweeper (useful for tests)
    if period.is_zero() {
        return None;
    }
    let Ok(runtime) = tokio::runtime::Handle::try_current() else {
        debug!("no runtime; idle connections are replaced on next use");
        return None;
    };

    let pool = Arc::downgrade(inner);
    Some(runtime.spawn(async move {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        interval.tick().await;

        loop {
            interval.tick().await;
            let Some(pool) = pool.upgrade() else {
                break;
            };
            let closed = pool.sweep().await;
            if closed > 0 {
                debug!(closed, "swept idle connections");
            }
        }
    }))
}
