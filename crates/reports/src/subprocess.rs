//! Report generation in a disposable child process
//!
//! Parsing a large recording can exhaust memory. Running each generation in its
//! own short-lived process keeps that failure away from the long-lived service:
//! the worker is capped, killed on timeout, and its death is classified rather
//! than propagated.

use async_trait::async_trait;
use cryo_config::ReportsConfig;
use cryo_core::{Error, ExitStatus, Result, ResultExt, WORKER_MAX_HEAP_VAR, WORKER_SUBCOMMAND};
use cryo_utils::tracing::generation_span;
use cryo_utils::{is_readable_file, remove_if_exists};
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tracing::{debug, info, warn, Instrument};

use crate::generator::ReportGenerator;

/// Generates reports by running the worker subcommand of a program
#[derive(Debug, Clone)]
pub struct SubprocessReportGenerator {
    program: PathBuf,
    leading_args: Vec<OsString>,
    timeout: Duration,
    max_heap_mb: u64,
}

impl SubprocessReportGenerator {
    /// Re-run the current executable in worker mode
    pub fn new(timeout: Duration, max_heap_mb: u64) -> Result<Self> {
        let program = std::env::current_exe().fs_context("", "locate current executable")?;
        Ok(Self::with_program(
            program,
            [WORKER_SUBCOMMAND],
            timeout,
            max_heap_mb,
        ))
    }

    pub fn from_config(config: &ReportsConfig) -> Result<Self> {
        Self::new(config.generation_timeout, config.worker_max_heap_mb)
    }

    /// Run `program leading_args... <recording> <destination> <filter>` instead
    pub fn with_program<I, S>(
        program: impl Into<PathBuf>,
        leading_args: I,
        timeout: Duration,
        max_heap_mb: u64,
    ) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        Self {
            program: program.into(),
            leading_args: leading_args.into_iter().map(Into::into).collect(),
            timeout,
            max_heap_mb,
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    async fn run_worker(
        &self,
        recording: &Path,
        destination: &Path,
        filter: &str,
    ) -> Result<ExitStatus> {
        let mut child = Command::new(&self.program)
            .args(&self.leading_args)
            .arg(recording)
            .arg(destination)
            .arg(filter)
            .env(WORKER_MAX_HEAP_VAR, self.max_heap_mb.to_string())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            // The child dies with this future, including on cancellation
            .kill_on_drop(true)
            .spawn()
            .fs_context(&self.program, "spawn report worker")?;

        let pid = child.id();
        debug!(pid, "report worker started");
        if let Some(stdout) = child.stdout.take() {
            tokio::spawn(forward_output(stdout, pid, false));
        }
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(forward_output(stderr, pid, true));
        }

        match tokio::time::timeout(self.timeout, child.wait()).await {
            Ok(Ok(status)) => Ok(ExitStatus::from_process_status(status)),
            Ok(Err(e)) => {
                let _ = child.start_kill();
                Err(Error::file_system(&self.program, "wait for report worker", e))
            }
            Err(_) => {
                warn!(pid, timeout = ?self.timeout, "report worker timed out; killing it");
                if let Err(e) = child.kill().await {
                    warn!(pid, error = %e, "failed to kill report worker");
                }
                Ok(ExitStatus::TimedOut)
            }
        }
    }
}

#[async_trait]
impl ReportGenerator for SubprocessReportGenerator {
    fn name(&self) -> &'static str {
        "subprocess"
    }

    async fn exec(&self, recording: &Path, destination: &Path, filter: &str) -> Result<PathBuf> {
        let span = generation_span(&recording.display().to_string(), self.name());
        async move {
            let status = match self.run_worker(recording, destination, filter).await {
                Ok(status) => status,
                Err(e) => {
                    discard(destination);
                    return Err(e);
                }
            };

            match status {
                ExitStatus::Ok if is_readable_file(destination) => {
                    info!("report generated");
                    Ok(destination.to_path_buf())
                }
                ExitStatus::Ok => Err(Error::generation(
                    ExitStatus::IoException,
                    format!("worker succeeded but '{}' is unreadable", destination.display()),
                )),
                ExitStatus::NoSuchRecording => {
                    discard(destination);
                    Err(Error::archived_not_found(recording_name(recording)))
                }
                status => {
                    discard(destination);
                    warn!(?status, code = status.code(), "report worker failed");
                    Err(Error::generation(
                        status,
                        format!("worker failed on '{}'", recording.display()),
                    ))
                }
            }
        }
        .instrument(span)
        .await
    }
}

fn recording_name(recording: &Path) -> String {
    recording
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| recording.display().to_string())
}

/// Remove a partial report, logging rather than failing
fn discard(destination: &Path) {
    if let Err(e) = remove_if_exists(destination) {
        warn!(path = %destination.display(), error = %e, "failed to remove partial report");
    }
}

/// Relay a worker stream into this process's log, one line per event
async fn forward_output(stream: impl AsyncRead + Unpin, pid: Option<u32>, is_stderr: bool) {
    let mut lines = BufReader::new(stream).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) if is_stderr => warn!(pid, "worker: {line}"),
            Ok(Some(line)) => debug!(pid, "worker: {line}"),
            Ok(None) => break,
            Err(e) => {
                debug!(pid, error = %e, "stopped reading worker output");
                break;
            }
        }
    }
}
