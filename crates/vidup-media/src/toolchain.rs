//! External tool collaborators.
//!
//! The orchestrator never assembles command lines itself; it asks a
//! [`Toolchain`] for a [`ToolCommand`] per step and hands it to the
//! [`crate::StageExecutor`]. Tests substitute scripted toolchains.

use std::path::Path;

use async_trait::async_trait;
use vidup_models::encoding::{
    DEFAULT_AUDIO_BITRATE, DEFAULT_AUDIO_CODEC, DEFAULT_CRF, DEFAULT_PRESET, DEFAULT_VIDEO_CODEC,
    TARGET_HEIGHT, TARGET_WIDTH,
};
use vidup_models::StoryboardParams;

use crate::command::{check_tool, FfmpegCommand, ToolCommand};
use crate::download::{ytdlp_command, DownloadOptions};
use crate::error::MediaResult;
use crate::filters::fit_filter;
use crate::probe::{probe_video, VideoInfo};
use crate::progress::ToolProfile;
use crate::storyboard::storyboard_command;
use crate::thumbnail::thumbnail_command;

/// Time range and encoding choice for a trim.
#[derive(Debug, Clone, PartialEq)]
pub struct TrimSpec {
    pub start: f64,
    /// Length of the cut; `None` runs to the end of the source.
    pub duration: Option<f64>,
    /// Source dimensions when the cut must be re-encoded into the target frame.
    pub reencode_from: Option<(u32, u32)>,
}

#[async_trait]
pub trait Toolchain: Send + Sync {
    /// Remote download into a dedicated directory.
    fn download(&self, url: &str, format: Option<&str>, work_dir: &Path) -> ToolCommand;

    /// Re-encode into the horizontal target frame.
    fn transcode_horizontal(&self, input: &Path, output: &Path, source: &VideoInfo) -> ToolCommand;

    /// Cut a range out of a local path or URL.
    fn trim(&self, source: &str, output: &Path, spec: &TrimSpec) -> ToolCommand;

    /// Scene-change frame extraction into a dedicated directory.
    fn storyboard(
        &self,
        source: &str,
        frames_dir: &Path,
        params: &StoryboardParams,
        total_secs: Option<f64>,
    ) -> ToolCommand;

    fn thumbnail(&self, video: &Path, output: &Path) -> ToolCommand;

    async fn probe(&self, target: &str) -> MediaResult<VideoInfo>;

    /// Verify the tools can be found.
    fn check(&self) -> MediaResult<()> {
        Ok(())
    }
}

/// Tool locations and download options.
#[derive(Debug, Clone)]
pub struct ToolPaths {
    pub ytdlp: String,
    pub ffmpeg: String,
    pub ffprobe: String,
    pub no_check_certificate: bool,
    pub max_filesize_mb: u64,
}

impl Default for ToolPaths {
    fn default() -> Self {
        Self {
            ytdlp: "yt-dlp".to_string(),
            ffmpeg: "ffmpeg".to_string(),
            ffprobe: "ffprobe".to_string(),
            no_check_certificate: false,
            max_filesize_mb: 5000,
        }
    }
}

impl ToolPaths {
    /// Create from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            ytdlp: std::env::var("YTDLP_PATH").unwrap_or(defaults.ytdlp),
            ffmpeg: std::env::var("FFMPEG_PATH").unwrap_or(defaults.ffmpeg),
            ffprobe: std::env::var("FFPROBE_PATH").unwrap_or(defaults.ffprobe),
            no_check_certificate: std::env::var("NO_CHECK_CERTIFICATE")
                .map(|v| v == "true" || v == "1")
                .unwrap_or(false),
            max_filesize_mb: std::env::var("MAX_FILE_SIZE_MB")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.max_filesize_mb),
        }
    }
}

/// yt-dlp + FFmpeg implementation.
#[derive(Debug, Clone)]
pub struct FfmpegToolchain {
    paths: ToolPaths,
    target_width: u32,
    target_height: u32,
}

impl FfmpegToolchain {
    pub fn new(paths: ToolPaths) -> Self {
        Self {
            paths,
            target_width: TARGET_WIDTH,
            target_height: TARGET_HEIGHT,
        }
    }

    pub fn with_target(mut self, width: u32, height: u32) -> Self {
        self.target_width = width;
        self.target_height = height;
        self
    }

    fn encode(&self, cmd: FfmpegCommand, source: Option<(u32, u32)>) -> FfmpegCommand {
        cmd.video_filter(fit_filter(source, self.target_width, self.target_height))
            .video_codec(DEFAULT_VIDEO_CODEC)
            .preset(DEFAULT_PRESET)
            .crf(DEFAULT_CRF)
            .audio_codec(DEFAULT_AUDIO_CODEC)
            .audio_bitrate(DEFAULT_AUDIO_BITRATE)
            .faststart()
    }
}

#[async_trait]
impl Toolchain for FfmpegToolchain {
    fn download(&self, url: &str, format: Option<&str>, work_dir: &Path) -> ToolCommand {
        let opts = DownloadOptions {
            ytdlp: self.paths.ytdlp.clone(),
            ffmpeg: self.paths.ffmpeg.clone(),
            no_check_certificate: self.paths.no_check_certificate,
            max_filesize_mb: self.paths.max_filesize_mb,
        };
        ytdlp_command(&opts, url, format, work_dir)
    }

    fn transcode_horizontal(&self, input: &Path, output: &Path, source: &VideoInfo) -> ToolCommand {
        let dims = (source.width > 0 && source.height > 0).then_some((source.width, source.height));
        let total = (source.duration > 0.0).then_some(source.duration);
        self.encode(FfmpegCommand::new(input.to_string_lossy(), output), dims)
            .into_tool(&self.paths.ffmpeg, ToolProfile::Ffmpeg { total_secs: total })
    }

    fn trim(&self, source: &str, output: &Path, spec: &TrimSpec) -> ToolCommand {
        let mut cmd = FfmpegCommand::new(source, output).seek(spec.start);
        if let Some(d) = spec.duration {
            cmd = cmd.duration(d);
        }
        cmd = match spec.reencode_from {
            Some(dims) => self.encode(cmd, Some(dims)),
            None => cmd
                .stream_copy()
                .output_args(["-avoid_negative_ts", "make_zero"]),
        };
        cmd.into_tool(
            &self.paths.ffmpeg,
            ToolProfile::Ffmpeg {
                total_secs: spec.duration,
            },
        )
    }

    fn storyboard(
        &self,
        source: &str,
        frames_dir: &Path,
        params: &StoryboardParams,
        total_secs: Option<f64>,
    ) -> ToolCommand {
        storyboard_command(
            &self.paths.ffmpeg,
            source,
            frames_dir,
            params.threshold,
            params.thumbnail_width,
            params.thumbnail_height,
            total_secs,
        )
    }

    fn thumbnail(&self, video: &Path, output: &Path) -> ToolCommand {
        thumbnail_command(&self.paths.ffmpeg, video, output)
    }

    async fn probe(&self, target: &str) -> MediaResult<VideoInfo> {
        probe_video(&self.paths.ffprobe, target).await
    }

    fn check(&self) -> MediaResult<()> {
        check_tool(&self.paths.ytdlp)?;
        check_tool(&self.paths.ffmpeg)?;
        check_tool(&self.paths.ffprobe)?;
        Ok(())
    }
}
