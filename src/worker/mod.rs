//! Worker process adapter.
//!
//! This module runs the external analysis tool for a single chunk and
//! reports the process exit status back to the scheduler.

pub mod binary;
pub mod runner;

pub use binary::resolve_binary;
pub use runner::{ChunkRunner, NextcladeRunner, SummaryCommand, ToolInvocation};
