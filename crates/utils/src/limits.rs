//! Resource limits and OOM-kill preference for disposable worker processes

use cryo_core::{Error, Result};

/// Address-space headroom granted on top of the heap ceiling for code, stacks
/// and allocator metadata
const ADDRESS_SPACE_HEADROOM_MB: u64 = 64;

/// Bound this process's memory so an oversized report fails fast
///
/// `max_heap_mb == 0` leaves the process unbounded. Once the ceiling is hit the
/// allocator fails and the process aborts immediately instead of degrading.
#[cfg(unix)]
pub fn apply_heap_limit(max_heap_mb: u64) -> Result<()> {
    use libc::{rlimit, rlim_t, setrlimit, RLIMIT_AS};

    if max_heap_mb == 0 {
        return Ok(());
    }

    let bytes = max_heap_mb
        .saturating_add(ADDRESS_SPACE_HEADROOM_MB)
        .saturating_mul(1024 * 1024);
    let limit = rlimit {
        rlim_cur: bytes as rlim_t,
        rlim_max: bytes as rlim_t,
    };

    // Safety: setrlimit is safe when called with valid resource and limit values
    unsafe {
        if setrlimit(RLIMIT_AS, &limit) != 0 {
            return Err(Error::configuration(format!(
                "Failed to set address space limit of {max_heap_mb}MB: {}",
                std::io::Error::last_os_error()
            )));
        }
    }

    tracing::debug!(max_heap_mb, "Applied worker memory ceiling");
    Ok(())
}

/// Apply a memory ceiling (non-Unix stub)
#[cfg(not(unix))]
pub fn apply_heap_limit(max_heap_mb: u64) -> Result<()> {
    if max_heap_mb != 0 {
        tracing::debug!("Memory ceilings are not supported on this platform");
    }
    Ok(())
}

/// Best-effort hook that makes this process the preferred victim under memory
/// pressure, so the kernel reclaims a worker before its parent
pub trait OomPriority: Send + Sync {
    /// Raise this process's OOM-kill preference
    fn prefer_oom_kill(&self) -> Result<()>;

    /// Name used in diagnostics
    fn name(&self) -> &'static str;
}

/// Linux implementation writing `/proc/self/oom_score_adj`
pub struct ProcOomScoreAdj {
    path: std::path::PathBuf,
    score: i32,
}

impl ProcOomScoreAdj {
    /// Maximum preference: killed first
    pub const MAX_SCORE: i32 = 1000;

    pub fn new() -> Self {
        Self::with_path("/proc/self/oom_score_adj", Self::MAX_SCORE)
    }

    pub fn with_path(path: impl Into<std::path::PathBuf>, score: i32) -> Self {
        Self {
            path: path.into(),
            score,
        }
    }
}

impl Default for ProcOomScoreAdj {
    fn default() -> Self {
        Self::new()
    }
}

impl OomPriority for ProcOomScoreAdj {
    fn prefer_oom_kill(&self) -> Result<()> {
        std::fs::write(&self.path, self.score.to_string())
            .map_err(|e| Error::file_system(&self.path, "write oom_score_adj", e))
    }

    fn name(&self) -> &'static str {
        "oom_score_adj"
    }
}

/// Fallback for platforms without an OOM-score facility
pub struct NoopOomPriority;

impl OomPriority for NoopOomPriority {
    fn prefer_oom_kill(&self) -> Result<()> {
        Ok(())
    }

    fn name(&self) -> &'static str {
        "noop"
    }
}

/// The OOM-priority hook available on this platform
pub fn platform_oom_priority() -> Box<dyn OomPriority> {
    if cfg!(target_os = "linux") && std::path::Path::new("/proc/self/oom_score_adj").exists() {
        Box::new(ProcOomScoreAdj::new())
    } else {
        Box::new(NoopOomPriority)
    }
}

/// Run an OOM-priority hook, logging instead of failing when it is unsupported
pub fn prefer_oom_kill_best_effort(hook: &dyn OomPriority) {
    match hook.prefer_oom_kill() {
        Ok(()) => tracing::debug!(hook = hook.name(), "Raised OOM-kill preference"),
        Err(e) => {
            tracing::debug!(hook = hook.name(), error = %e, "Could not raise OOM-kill preference")
        }
    }
}
