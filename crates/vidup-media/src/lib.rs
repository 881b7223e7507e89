//! Supervised media tool invocations.
//!
//! This crate provides:
//! - Progress parsing for yt-dlp and FFmpeg output
//! - A per-job cancellation token
//! - A stage executor that runs one external process with guaranteed cleanup
//! - The `Toolchain` seam used by the orchestrator, with a yt-dlp/FFmpeg implementation
//! - FFprobe inspection and scale/pad planning

pub mod cancel;
pub mod command;
pub mod download;
pub mod error;
pub mod executor;
pub mod filters;
pub mod probe;
pub mod progress;
pub mod reader;
pub mod storyboard;
pub mod thumbnail;
pub mod toolchain;

pub use cancel::CancelToken;
pub use command::{check_tool, FfmpegCommand, ToolCommand};
pub use download::{find_downloaded_file, read_download_info, DownloadInfo};
pub use error::{MediaError, MediaResult};
pub use executor::{discard_artifacts, StageExecutor, StageOutcome, DEFAULT_KILL_GRACE};
pub use filters::FitPlan;
pub use probe::{probe_video, VideoInfo};
pub use progress::ToolProfile;
pub use storyboard::{collect_frames, list_frames, StoryboardFrame};
pub use toolchain::{FfmpegToolchain, ToolPaths, Toolchain, TrimSpec};
