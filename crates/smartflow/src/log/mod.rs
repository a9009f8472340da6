//! Per-episode metric reporting.
//!
//! Provides:
//! - `MetricLogger` trait for logging backends
//! - `EpisodeSummary` with the scalars reported at the end of an episode
//! - `ConsoleLogger` writing through `tracing`
//! - `MemoryLogger` keeping everything for later inspection

mod console;
mod logger;

pub use console::ConsoleLogger;
pub use logger::{EpisodeSummary, MemoryLogger, MetricLogger, NoOpLogger};
