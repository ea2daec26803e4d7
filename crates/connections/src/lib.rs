//! Pooled connections to monitored targets
//!
//! [`TargetConnectionManager`] is the only component that opens or closes
//! [`Connection`]s. Callers hand it a task; the task borrows a pooled
//! connection for its duration and the connection stays warm afterwards until
//! it has been idle for longer than the configured TTL.
//!
//! ```no_run
//! # use std::sync::Arc;
//! # use cryo_connections::{DirectoryStrategy, PoolOptions, StrategyRouter, TargetConnectionManager};
//! # use cryo_core::ConnectionDescriptor;
//! # async fn demo() -> cryo_core::Result<()> {
//! let pool = TargetConnectionManager::new(
//!     StrategyRouter::new(Arc::new(DirectoryStrategy)),
//!     PoolOptions::default(),
//! );
//! let target = ConnectionDescriptor::new("file:///var/lib/app/recordings");
//! let names = pool
//!     .execute_connected_task(&target, |conn| async move { conn.list_recordings().await })
//!     .await?;
//! # Ok(())
//! # }
//! ```

pub mod connection;
pub mod directory;
pub mod pool;
pub mod routing;

pub use connection::{CloseHandle, Connection, RecordingInfo, RecordingStream};
pub use directory::{DirectoryConnection, DirectoryStrategy};
pub use pool::{PoolOptions, PoolStats, TargetConnectionManager};
pub use routing::{ConnectionStrategy, StrategyRouter};
