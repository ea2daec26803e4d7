use serde::{Deserialize, Serialize};
use std::fmt;

/// Credentials presented when opening a session with a target
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Credentials {
    #[must_use]
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Identifies a target and the credentials used to reach it
///
/// Two descriptors are the same pool key when both the target id and the
/// credentials match.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConnectionDescriptor {
    target_id: String,
    credentials: Option<Credentials>,
}

impl ConnectionDescriptor {
    /// Create a descriptor without credentials
    #[must_use]
    pub fn new(target_id: impl Into<String>) -> Self {
        Self {
            target_id: target_id.into(),
            credentials: None,
        }
    }

    /// Create a descriptor that authenticates with the given credentials
    #[must_use]
    pub fn with_credentials(target_id: impl Into<String>, credentials: Credentials) -> Self {
        Self {
            target_id: target_id.into(),
            credentials: Some(credentials),
        }
    }

    #[must_use]
    pub fn target_id(&self) -> &str {
        &self.target_id
    }

    #[must_use]
    pub fn credentials(&self) -> Option<&Credentials> {
        self.credentials.as_ref()
    }

    /// The URI scheme of the target id, used to route to a connection strategy
    ///
    /// `service:jmx:rmi:///jndi/...` yields `service`, `http://host:8080` yields
    /// `http`, and a bare `host:port` yields `None`.
    #[must_use]
    pub fn scheme(&self) -> Option<&str> {
        let (scheme, rest) = self.target_id.split_once(':')?;
        let valid = scheme
            .chars()
            .next()
            .is_some_and(|c| c.is_ascii_alphabetic())
            && scheme
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'));
        // host:port has a purely numeric remainder
        if !valid || rest.chars().all(|c| c.is_ascii_digit()) {
            return None;
        }
        Some(scheme)
    }
}

impl fmt::Display for ConnectionDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.target_id)
    }
}

/// Identifies one recording on one live target; key of the active report cache
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RecordingDescriptor {
    pub connection: ConnectionDescriptor,
    pub recording_name: String,
}

impl RecordingDescriptor {
    #[must_use]
    pub fn new(connection: ConnectionDescriptor, recording_name: impl Into<String>) -> Self {
        Self {
            connection,
            recording_name: recording_name.into(),
        }
    }

    /// Whether this recording lives on `target_id` under `recording_name`
    #[must_use]
    pub fn matches(&self, target_id: &str, recording_name: &str) -> bool {
        self.connection.target_id() == target_id && self.recording_name == recording_name
    }
}

impl fmt::Display for RecordingDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.connection, self.recording_name)
    }
}

/// Classified termination of a report worker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ExitStatus {
    Ok,
    TargetConnectionFailure,
    NoSuchRecording,
    OutOfMemory,
    RecordingException,
    IoException,
    Other,
    Terminated,
    TimedOut,
}

impl ExitStatus {
    pub const ALL: [ExitStatus; 9] = [
        ExitStatus::Ok,
        ExitStatus::TargetConnectionFailure,
        ExitStatus::NoSuchRecording,
        ExitStatus::OutOfMemory,
        ExitStatus::RecordingException,
        ExitStatus::IoException,
        ExitStatus::Other,
        ExitStatus::Terminated,
        ExitStatus::TimedOut,
    ];

    /// Process exit code the worker uses to report this status
    #[must_use]
    pub const fn code(self) -> i32 {
        match self {
            ExitStatus::Ok => 0,
            ExitStatus::TargetConnectionFailure => 1,
            ExitStatus::NoSuchRecording => 2,
            ExitStatus::OutOfMemory => 3,
            ExitStatus::RecordingException => 4,
            ExitStatus::IoException => 5,
            ExitStatus::Other => 6,
            ExitStatus::Terminated => -1,
            ExitStatus::TimedOut => -2,
        }
    }

    #[must_use]
    pub const fn message(self) -> &'static str {
        match self {
            ExitStatus::Ok => "",
            ExitStatus::TargetConnectionFailure => "Connection to the target failed.",
            ExitStatus::NoSuchRecording => "No such recording was found.",
            ExitStatus::OutOfMemory => {
                "The report generation process consumed too much memory and was terminated."
            }
            ExitStatus::RecordingException => "The recording could not be parsed.",
            ExitStatus::IoException => "An I/O failure occurred while generating the report.",
            ExitStatus::Other => "An unspecified failure occurred while generating the report.",
            ExitStatus::Terminated => "The report generation process was terminated.",
            ExitStatus::TimedOut => {
                "The report generation process timed out and was terminated."
            }
        }
    }

    /// Map a process exit code back to a status; unknown codes are `Other`
    #[must_use]
    pub fn from_code(code: i32) -> Self {
        Self::ALL
            .into_iter()
            .find(|status| status.code() == code)
            .unwrap_or(ExitStatus::Other)
    }

    /// Classify a finished worker process
    ///
    /// A worker killed by `SIGKILL` or `SIGABRT` is treated as out of memory: the
    /// kernel OOM killer sends the former and an allocation failure under the heap
    /// ceiling raises the latter. Any other signal is `Terminated`.
    #[must_use]
    pub fn from_process_status(status: std::process::ExitStatus) -> Self {
        if let Some(code) = status.code() {
            return Self::from_code(code);
        }
        #[cfg(unix)]
        {
            use std::os::unix::process::ExitStatusExt;
            match status.signal() {
                Some(9) | Some(6) => ExitStatus::OutOfMemory,
                _ => ExitStatus::Terminated,
            }
        }
        #[cfg(not(unix))]
        {
            ExitStatus::Terminated
        }
    }
}

impl fmt::Display for ExitStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?} ({})", self, self.code())
    }
}
