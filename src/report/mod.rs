//! Run report generation.

pub mod generator;

pub use generator::{print_summary, write_report, BatchReport};
