//! Bounded-concurrency batch scheduling.

pub mod batch;
pub mod gate;

pub use batch::BatchScheduler;
pub use gate::Budget;
