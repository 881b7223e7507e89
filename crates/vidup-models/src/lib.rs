//! Shared data models for the vidup job service.
//!
//! This crate provides Serde-serializable types for:
//! - Job identity, kinds and the stage state machine
//! - Normalized progress updates
//! - Immutable job snapshots served over REST and WebSocket
//! - Job requests and their validation
//! - Encoding constants shared by the media layer

pub mod encoding;
pub mod error;
pub mod job;
pub mod progress;
pub mod request;
pub mod snapshot;
pub mod ws;

// Re-export common types
pub use error::{ModelError, ModelResult};
pub use job::{CancelOutcome, Job, JobId, JobKind, JobResult, Stage};
pub use progress::{Progress, ProgressUpdate};
pub use request::{JobRequest, SplitParams, StoryboardParams};
pub use snapshot::JobSnapshot;
pub use ws::{WsControl, WsMessage};
