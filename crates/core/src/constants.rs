//! Constants used throughout the cryo codebase

// Application name, used for XDG directories
pub const APP_NAME: &str = "cryo";

// Configuration environment variables
pub const REPORT_GENERATION_TIMEOUT_VAR: &str = "CRYO_REPORT_GENERATION_TIMEOUT";
pub const ACTIVE_REPORTS_CACHE_EXPIRY_VAR: &str = "CRYO_ACTIVE_REPORTS_CACHE_EXPIRY";
pub const ACTIVE_REPORTS_CACHE_REFRESH_VAR: &str = "CRYO_ACTIVE_REPORTS_CACHE_REFRESH";
pub const REPORT_GENERATION_MAX_HEAP_VAR: &str = "CRYO_REPORT_GENERATION_MAX_HEAP";
pub const REPORT_GENERATOR_URL_VAR: &str = "CRYO_REPORT_GENERATOR";
pub const TARGET_CACHE_TTL_VAR: &str = "CRYO_TARGET_CACHE_TTL";
pub const TARGET_CACHE_SIZE_VAR: &str = "CRYO_TARGET_CACHE_SIZE";
pub const ARCHIVE_PATH_VAR: &str = "CRYO_ARCHIVE_PATH";
pub const REPORT_CACHE_PATH_VAR: &str = "CRYO_REPORT_CACHE_PATH";
pub const TEMP_PATH_VAR: &str = "CRYO_TEMP_PATH";

// Passed from the parent to a report worker
pub const WORKER_MAX_HEAP_VAR: &str = "CRYO_WORKER_MAX_HEAP_MB";

// Subcommand that runs the report worker
pub const WORKER_SUBCOMMAND: &str = "worker";

// Name given to the safety copy a worker makes of a live recording
pub const CLONE_PREFIX: &str = "Clone of ";

// Archived recordings without an explicit source live here
pub const DEFAULT_ARCHIVE_SOURCE: &str = "default";

// Suffix of materialised report files
pub const REPORT_FILE_SUFFIX: &str = ".report.json";
