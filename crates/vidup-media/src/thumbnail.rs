//! Thumbnail generation.

use std::path::Path;

use vidup_models::encoding::{THUMBNAIL_SCALE_WIDTH, THUMBNAIL_TIMESTAMP};

use crate::command::{FfmpegCommand, ToolCommand};
use crate::progress::ToolProfile;

/// Build the single-frame thumbnail command for a local video.
pub fn thumbnail_command(ffmpeg: &str, video_path: &Path, output_path: &Path) -> ToolCommand {
    let filter = format!("scale={}:-2", THUMBNAIL_SCALE_WIDTH);

    FfmpegCommand::new(video_path.to_string_lossy(), output_path)
        .input_arg("-ss")
        .input_arg(THUMBNAIL_TIMESTAMP)
        .single_frame()
        .video_filter(filter)
        .output_args(["-q:v", "3"])
        .log_level("error")
        .no_stats()
        .into_tool(ffmpeg, ToolProfile::Silent)
}
