//! Entry point of the disposable report worker process
//!
//! The parent runs `cryo worker <recording> <destination> <filter>`. The worker
//! bounds its own memory, volunteers as the first OOM victim, analyses the
//! recording and writes the result durably before exiting with an
//! [`ExitStatus`] code. It runs on the calling thread with no async runtime.

use cryo_core::{ExitStatus, WORKER_MAX_HEAP_VAR};
use cryo_utils::{
    apply_heap_limit, platform_oom_priority, prefer_oom_kill_best_effort, write_atomic,
};
use std::fs::File;
use std::io::{BufReader, ErrorKind};
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use tracing::{error, info, warn};

use crate::analysis::{parse_recording, RecordingError, RuleEngine};

#[derive(Debug, thiserror::Error)]
enum WorkerError {
    #[error("expected <recording> <destination> <filter>, got {0} argument(s)")]
    Usage(usize),
    #[error("no recording at '{0}'")]
    NoSuchRecording(PathBuf),
    #[error(transparent)]
    Recording(#[from] RecordingError),
    #[error("could not read '{path}': {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("could not write report: {0}")]
    Write(cryo_core::Error),
    #[error("could not encode report: {0}")]
    Encode(serde_json::Error),
}

impl WorkerError {
    fn status(&self) -> ExitStatus {
        match self {
            WorkerError::Usage(_) | WorkerError::Encode(_) => ExitStatus::Other,
            WorkerError::NoSuchRecording(_) => ExitStatus::NoSuchRecording,
            WorkerError::Recording(RecordingError::Parse(_) | RecordingError::Encoding { .. }) => {
                ExitStatus::RecordingException
            }
            WorkerError::Recording(RecordingError::Io(_))
            | WorkerError::Read { .. }
            | WorkerError::Write(_) => ExitStatus::IoException,
        }
    }
}

/// Run the worker with the arguments following the `worker` subcommand
///
/// Never panics; every failure maps to the closest status.
pub fn run(args: &[String]) -> ExitStatus {
    let max_heap_mb = std::env::var(WORKER_MAX_HEAP_VAR)
        .ok()
        .and_then(|value| value.trim().parse::<u64>().ok())
        .unwrap_or(0);
    if let Err(e) = apply_heap_limit(max_heap_mb) {
        warn!(error = %e, "running without a memory ceiling");
    }
    prefer_oom_kill_best_effort(platform_oom_priority().as_ref());

    execute(args)
}

/// Generate the report in this process as it is, without adjusting limits
pub fn execute(args: &[String]) -> ExitStatus {
    match panic::catch_unwind(AssertUnwindSafe(|| generate(args))) {
        Ok(Ok(())) => ExitStatus::Ok,
        Ok(Err(e)) => {
            error!(error = %e, "report generation failed");
            e.status()
        }
        Err(_) => {
            error!("report worker panicked");
            ExitStatus::Other
        }
    }
}

fn generate(args: &[String]) -> Result<(), WorkerError> {
    let [recording, destination, filter] = args else {
        return Err(WorkerError::Usage(args.len()));
    };
    let recording = Path::new(recording);
    let destination = Path::new(destination);

    let file = File::open(recording).map_err(|source| match source.kind() {
        ErrorKind::NotFound => WorkerError::NoSuchRecording(recording.to_path_buf()),
        _ => WorkerError::Read {
            path: recording.to_path_buf(),
            source,
        },
    })?;
    let events = parse_recording(BufReader::new(file))?;

    let evaluations = RuleEngine::with_builtin_rules().evaluate(&events, filter);
    let report = serde_json::to_vec_pretty(&evaluations).map_err(WorkerError::Encode)?;
    write_atomic(destination, &report).map_err(WorkerError::Write)?;

    info!(
        events = events.len(),
        rules = evaluations.len(),
        destination = %destination.display(),
        "report written"
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::RuleEvaluation;
    use std::collections::BTreeMap;
    use tempfile::TempDir;

    fn args(recording: &Path, destination: &Path, filter: &str) -> Vec<String> {
        vec![
            recording.display().to_string(),
            destination.display().to_string(),
            filter.to_string(),
        ]
    }

    #[test]
    fn writes_a_report_for_the_selected_rules() {
        let temp = TempDir::new().unwrap();
        let recording = temp.path().join("foo.jfr");
        let destination = temp.path().join("out/foo.report.json");
        std::fs::write(
            &recording,
            "{\"type\":\"CPULoad\",\"machineTotal\":0.5}\n{\"type\":\"GarbageCollection\",\"duration\":3}\n",
        )
        .unwrap();

        let status = execute(&args(&recording, &destination, "cpu"));
        assert_eq!(status, ExitStatus::Ok);

        let report: BTreeMap<String, RuleEvaluation> =
            serde_json::from_slice(&std::fs::read(&destination).unwrap()).unwrap();
        assert_eq!(report.len(), 1);
        assert_eq!(report["CpuLoad"].score, 50.0);
    }

    #[test]
    fn classifies_failures() {
        let temp = TempDir::new().unwrap();
        let destination = temp.path().join("report.json");

        let missing = temp.path().join("missing.jfr");
        assert_eq!(execute(&args(&missing, &destination, "")), ExitStatus::NoSuchRecording);

        let garbage = temp.path().join("garbage.jfr");
        std::fs::write(&garbage, "\u{1}\u{2} not an event").unwrap();
        assert_eq!(execute(&args(&garbage, &destination, "")), ExitStatus::RecordingException);

        let binary = temp.path().join("binary.jfr");
        std::fs::write(&binary, [0xff, 0xfe, 0x00, b'\n']).unwrap();
        assert_eq!(execute(&args(&binary, &destination, "")), ExitStatus::RecordingException);

        assert_eq!(execute(&["only-one".to_string()]), ExitStatus::Other);
        assert!(!destination.exists());
    }

    #[test]
    fn unwritable_destination_is_an_io_failure() {
        let temp = TempDir::new().unwrap();
        let recording = temp.path().join("foo.jfr");
        std::fs::write(&recording, "").unwrap();
        let blocker = temp.path().join("blocker");
        std::fs::write(&blocker, "").unwrap();

        let status = execute(&args(&recording, &blocker.join("report.json"), ""));
        assert_eq!(status, ExitStatus::IoException);
    }
}
