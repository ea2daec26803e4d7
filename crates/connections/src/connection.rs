//! The capability handed to tasks running against a target

use async_trait::async_trait;
use cryo_core::{ConnectionDescriptor, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::{Arc, Weak};
use tokio::io::AsyncRead;

use crate::pool::PoolInner;

/// Byte stream of one recording as the target serves it
pub type RecordingStream = Box<dyn AsyncRead + Send + Unpin>;

/// Summary of a recording present on a target
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordingInfo {
    pub name: String,
    pub size: Option<u64>,
}

/// One established session with a target
///
/// Instances are created by a [`ConnectionStrategy`](crate::ConnectionStrategy)
/// and owned by the pool; callers only ever see them inside
/// [`TargetConnectionManager::execute_connected_task`](crate::TargetConnectionManager::execute_connected_task).
#[async_trait]
pub trait Connection: Send + Sync + fmt::Debug {
    /// The descriptor this session was opened for
    fn descriptor(&self) -> &ConnectionDescriptor;

    /// Enumerate recordings currently held by the target
    async fn list_recordings(&self) -> Result<Vec<RecordingInfo>>;

    /// Open a recording for streaming; `None` when the target has no such recording
    async fn open_recording(&self, name: &str) -> Result<Option<RecordingStream>>;

    /// Stop and discard a recording; returns whether it existed
    async fn close_recording(&self, name: &str) -> Result<bool>;

    /// Tear down the session
    async fn close(&self) -> Result<()>;
}

/// Lets a connection report that its transport went away
///
/// Notifying removes the pooled entry immediately, so the next task for the
/// same descriptor gets a fresh connection. A handle only ever affects the
/// connection it was issued for; notifying after that connection has already
/// been replaced is a no-op.
#[derive(Clone)]
pub struct CloseHandle {
    pool: Weak<PoolInner>,
    descriptor: ConnectionDescriptor,
    id: u64,
}

impl CloseHandle {
    pub(crate) fn new(pool: &Arc<PoolInner>, descriptor: ConnectionDescriptor, id: u64) -> Self {
        Self {
            pool: Arc::downgrade(pool),
            descriptor,
            id,
        }
    }

    /// A handle not attached to any pool, for strategies exercised standalone
    pub fn detached(descriptor: ConnectionDescriptor) -> Self {
        Self {
            pool: Weak::new(),
            descriptor,
            id: 0,
        }
    }

    /// Report that the connection was closed by the remote side
    pub fn notify(&self) {
        if let Some(pool) = self.pool.upgrade() {
            pool.connection_closed(&self.descriptor, self.id);
        }
    }
}

impl fmt::Debug for CloseHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CloseHandle")
            .field("descriptor", &self.descriptor)
            .field("id", &self.id)
            .finish()
    }
}
