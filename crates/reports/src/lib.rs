//! Automated analysis reports for flight recordings
//!
//! This crate provides:
//! - A rule engine that scores recordings
//! - Report generators running in a worker process or a remote service
//! - A memoizing cache for recordings on live targets
//! - A file-backed cache for archived recordings

pub mod active;
pub mod analysis;
pub mod archived;
pub mod generator;
pub mod remote;
pub mod service;
pub mod store;
pub mod subprocess;
pub mod worker;

pub use active::{ActiveCacheOptions, ActiveRecordingReportCache};
pub use analysis::{RecordedEvent, Rule, RuleEngine, RuleEvaluation};
pub use archived::{ArchivedRecordingReportCache, ArchivedReportStatus};
pub use generator::{generator_from_config, ReportGenerator};
pub use remote::RemoteReportGenerator;
pub use service::ReportService;
pub use store::{FsRecordingStore, RecordingStore};
pub use subprocess::SubprocessReportGenerator;
