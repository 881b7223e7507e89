//! Job orchestration core.
//!
//! This crate provides:
//! - The in-memory job registry
//! - The status hub fanning snapshots out to live subscribers
//! - The pipeline orchestrator running download, upload, split, convert and
//!   storyboard jobs
//! - Retention sweeping and graceful shutdown

pub mod config;
pub mod error;
pub mod hub;
pub mod logging;
pub mod metadata;
pub mod metrics;
pub mod orchestrator;
mod pipeline;
pub mod registry;
pub mod sweeper;
pub mod writer;

pub use config::WorkerConfig;
pub use error::{WorkerError, WorkerResult};
pub use hub::{StatusHub, Subscription};
pub use logging::JobLogger;
pub use orchestrator::Orchestrator;
pub use registry::JobRegistry;
pub use sweeper::RetentionSweeper;
pub use writer::JobWriter;
