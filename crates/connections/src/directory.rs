//! Targets that publish their recordings into a local directory
//!
//! A `file:///var/lib/app/recordings` target id opens a session over that
//! directory: every regular file in it is a recording. Removing the directory
//! ends the session.

use async_trait::async_trait;
use cryo_core::{ConnectionDescriptor, Error, Result};
use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::debug;
use url::Url;

use crate::connection::{CloseHandle, Connection, RecordingInfo, RecordingStream};
use crate::routing::ConnectionStrategy;

/// Strategy for `file:` targets
#[derive(Debug, Default, Clone, Copy)]
pub struct DirectoryStrategy;

#[async_trait]
impl ConnectionStrategy for DirectoryStrategy {
    fn name(&self) -> &'static str {
        "directory"
    }

    async fn connect(
        &self,
        descriptor: &ConnectionDescriptor,
        close_handle: CloseHandle,
    ) -> Result<Arc<dyn Connection>> {
        let root = Url::parse(descriptor.target_id())
            .ok()
            .filter(|url| url.scheme() == "file")
            .and_then(|url| url.to_file_path().ok())
            .ok_or_else(|| {
                Error::connection(descriptor.target_id(), "expected a file:// target id")
            })?;

        let metadata = tokio::fs::metadata(&root).await.map_err(|e| {
            Error::connection_with_source(descriptor.target_id(), "directory is unreachable", e)
        })?;
        if !metadata.is_dir() {
            return Err(Error::connection(
                descriptor.target_id(),
                format!("'{}' is not a directory", root.display()),
            ));
        }

        Ok(Arc::new(DirectoryConnection {
            descriptor: descriptor.clone(),
            root,
            closed: AtomicBool::new(false),
            close_handle,
        }))
    }
}

/// Session over one recordings directory
#[derive(Debug)]
pub struct DirectoryConnection {
    descriptor: ConnectionDescriptor,
    root: PathBuf,
    closed: AtomicBool,
    close_handle: CloseHandle,
}

impl DirectoryConnection {
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(Error::connection(
                self.descriptor.target_id(),
                "connection is closed",
            ));
        }
        Ok(())
    }

    /// Resolve a recording name, refusing anything that would escape the root
    fn recording_path(&self, name: &str) -> Option<PathBuf> {
        let mut components = Path::new(name).components();
        match (components.next(), components.next()) {
            (Some(Component::Normal(_)), None) => Some(self.root.join(name)),
            _ => None,
        }
    }

    fn lost(&self, error: std::io::Error) -> Error {
        if error.kind() == ErrorKind::NotFound {
            debug!(target_id = %self.descriptor, "recordings directory vanished");
            self.closed.store(true, Ordering::SeqCst);
            self.close_handle.notify();
        }
        Error::connection_with_source(
            self.descriptor.target_id(),
            "directory is unreachable",
            error,
        )
    }
}

#[async_trait]
impl Connection for DirectoryConnection {
    fn descriptor(&self) -> &ConnectionDescriptor {
        &self.descriptor
    }

    async fn list_recordings(&self) -> Result<Vec<RecordingInfo>> {
        self.ensure_open()?;
        let mut entries = tokio::fs::read_dir(&self.root)
            .await
            .map_err(|e| self.lost(e))?;

        let mut recordings = Vec::new();
        while let Some(entry) = entries.next_entry().await.map_err(|e| self.lost(e))? {
            let metadata = match entry.metadata().await {
                Ok(metadata) => metadata,
                // Removed between listing and stat
                Err(_) => continue,
            };
            if metadata.is_file() {
                recordings.push(RecordingInfo {
                    name: entry.file_name().to_string_lossy().into_owned(),
                    size: Some(metadata.len()),
                });
            }
        }
        recordings.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(recordings)
    }

    async fn open_recording(&self, name: &str) -> Result<Option<RecordingStream>> {
        self.ensure_open()?;
        let Some(path) = self.recording_path(name) else {
            return Ok(None);
        };
        match tokio::fs::File::open(&path).await {
            Ok(file) => Ok(Some(Box::new(file))),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                if tokio::fs::metadata(&self.root).await.is_err() {
                    return Err(self.lost(e));
                }
                Ok(None)
            }
            Err(e) => Err(Error::file_system(path, "open recording", e)),
        }
    }

    async fn close_recording(&self, name: &str) -> Result<bool> {
        self.ensure_open()?;
        let Some(path) = self.recording_path(name) else {
            return Ok(false);
        };
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(Error::file_system(path, "close recording", e)),
        }
    }

    async fn close(&self) -> Result<()> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}
