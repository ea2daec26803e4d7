use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

// Re-export tracing macros for convenience
pub use tracing::{debug, error, info, instrument, span, trace, warn, Level, Span};

/// Initialize the tracing system
///
/// Honours `RUST_LOG` and defaults to `info`. Output always goes to stderr: a
/// report worker's stdout is reserved for its parent, which forwards both streams
/// into its own log.
pub fn init() -> Result<(), Box<dyn std::error::Error + Send + Sync + 'static>> {
    init_with_default("info")
}

/// Initialize the tracing system with a fallback directive when `RUST_LOG` is unset
pub fn init_with_default(
    default_directive: &str,
) -> Result<(), Box<dyn std::error::Error + Send + Sync + 'static>> {
    let filter =
        EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(default_directive))?;

    let fmt_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_ansi(is_tty())
        .compact()
        .with_target(false)
        .with_thread_ids(false)
        .with_level(true);

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt_layer)
        .try_init()?;

    Ok(())
}

/// Check if we're running in a TTY environment
fn is_tty() -> bool {
    std::io::IsTerminal::is_terminal(&std::io::stderr())
}

/// Create a span for one report generation
pub fn generation_span(recording: &str, generator: &'static str) -> Span {
    span!(Level::INFO, "report", recording = %recording, generator = generator)
}

/// Emit a structured event for cache lookups
pub fn cache_event(cache: &'static str, key: &str, hit: bool) {
    if hit {
        debug!(cache = cache, key = %key, "cache_hit");
    } else {
        debug!(cache = cache, key = %key, "cache_miss");
    }
}
