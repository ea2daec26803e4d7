//! Shared utilities for cryo
//!
//! Durable file writes, XDG paths, worker resource limits and tracing setup used
//! across the workspace.

pub mod atomic_file;
pub mod limits;
pub mod tracing;
pub mod xdg;

pub use atomic_file::*;
pub use limits::*;
pub use xdg::*;
