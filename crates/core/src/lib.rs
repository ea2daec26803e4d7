//! Core domain types, errors, and constants for cryo.
//!
//! This crate establishes the value types shared by the connection pool and the
//! report pipeline, along with the single error type every crate returns.
//!
//! ## Key Components
//!
//! - **`errors`**: the `Error` enum and `Result` alias. Generation failures carry
//!   an explicit [`ExitStatus`] so callers branch on a tag, not on error text.
//! - **`types`**: `ConnectionDescriptor`, `RecordingDescriptor` and `ExitStatus`.
//! - **`events`**: the target lifecycle feed caches subscribe to.
//! - **`constants`**: environment variable names and well-known strings.

pub mod constants;
pub mod errors;
pub mod events;
pub mod types;

pub use self::{
    constants::*,
    errors::{Error, ErrorKind, Result, ResultExt},
    events::{EventBus, PublishedEvent, TargetEvent},
    types::*,
};
