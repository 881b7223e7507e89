//! Scene-change storyboard extraction.
//!
//! One FFmpeg pass selects the first frame plus every frame whose scene score
//! exceeds the threshold, logs each through `showinfo` and writes it as a JPEG.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use vidup_models::encoding::MIN_SCENE_GAP_SECS;

use crate::command::{FfmpegCommand, ToolCommand};
use crate::filters::letterbox_filter;
use crate::progress::ToolProfile;

/// File name pattern of extracted frames.
pub const FRAME_PATTERN: &str = "frame_%05d.jpg";

/// Build the scene-detection command writing frames into `frames_dir`.
///
/// `frames_dir` is removed when the run does not succeed.
pub fn storyboard_command(
    ffmpeg: &str,
    source: &str,
    frames_dir: &Path,
    threshold: f64,
    width: u32,
    height: u32,
    total_secs: Option<f64>,
) -> ToolCommand {
    let filter = format!(
        "select='eq(n\\,0)+gt(scene\\,{})',showinfo,{}",
        threshold,
        letterbox_filter(width, height)
    );
    let mut tool = FfmpegCommand::new(source, frames_dir.join(FRAME_PATTERN))
        .log_level("info")
        .video_filter(filter)
        .output_args(["-vsync", "vfr", "-q:v", "2", "-an"])
        .into_tool(ffmpeg, ToolProfile::SceneDetect { total_secs });
    // The registered output is a pattern; clean up the directory instead
    tool.artifacts = vec![frames_dir.to_path_buf()];
    tool
}

/// One storyboard frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoryboardFrame {
    pub index: usize,
    pub timestamp: f64,
    pub time_str: String,
    #[serde(skip)]
    pub path: PathBuf,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

/// Pair extracted frame files with the logged timestamps.
///
/// Frames are matched in order. Timestamps closer than the minimum scene gap
/// to the previously kept one are dropped together with their frame; the
/// first frame is always kept at 0.0.
pub fn collect_frames(mut files: Vec<PathBuf>, markers: &[f64]) -> Vec<StoryboardFrame> {
    files.sort();
    let mut frames: Vec<StoryboardFrame> = Vec::new();
    let mut last: Option<f64> = None;

    for (i, path) in files.into_iter().enumerate() {
        let ts = if i == 0 {
            0.0
        } else {
            match markers.get(i) {
                Some(ts) => *ts,
                None => break,
            }
        };
        if let Some(prev) = last {
            if ts - prev < MIN_SCENE_GAP_SECS {
                continue;
            }
        }
        last = Some(ts);
        frames.push(StoryboardFrame {
            index: frames.len(),
            timestamp: ts,
            time_str: format_timestamp(ts),
            path,
            key: None,
            url: None,
        });
    }
    frames
}

/// List frame files written into `dir`.
pub async fn list_frames(dir: &Path) -> std::io::Result<Vec<PathBuf>> {
    let mut out = Vec::new();
    let mut entries = tokio::fs::read_dir(dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) == Some("jpg") {
            out.push(path);
        }
    }
    out.sort();
    Ok(out)
}

/// `HH:MM:SS.mmm`
pub fn format_timestamp(secs: f64) -> String {
    let total_ms = (secs.max(0.0) * 1000.0).round() as u64;
    let (h, rem) = (total_ms / 3_600_000, total_ms % 3_600_000);
    let (m, rem) = (rem / 60_000, rem % 60_000);
    let (s, ms) = (rem / 1000, rem % 1000);
    format!("{:02}:{:02}:{:02}.{:03}", h, m, s, ms)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn files(n: usize) -> Vec<PathBuf> {
        (1..=n).map(|i| PathBuf::from(format!("frame_{:05}.jpg", i))).collect()
    }

    #[test]
    fn test_collect_frames_dedupes_close_cuts() {
        let frames = collect_frames(files(4), &[0.0, 4.0, 4.05, 9.5]);
        let ts: Vec<f64> = frames.iter().map(|f| f.timestamp).collect();
        assert_eq!(ts, vec![0.0, 4.0, 9.5]);
        assert_eq!(frames[2].index, 2);
        assert_eq!(frames[2].path, PathBuf::from("frame_00004.jpg"));
    }

    #[test]
    fn test_first_frame_is_zero() {
        let frames = collect_frames(files(1), &[0.04]);
        assert_eq!(frames[0].timestamp, 0.0);
        assert_eq!(frames[0].time_str, "00:00:00.000");
    }

    #[test]
    fn test_format_timestamp() {
        assert_eq!(format_timestamp(3723.456), "01:02:03.456");
    }

    #[test]
    fn test_command_shape() {
        let cmd = storyboard_command("ffmpeg", "https://h/v.mp4", Path::new("/w/frames"), 0.3, 320, 180, Some(60.0));
        let vf = cmd.args.iter().position(|a| a == "-vf").unwrap();
        assert!(cmd.args[vf + 1].starts_with("select='eq(n\\,0)+gt(scene\\,0.3)',showinfo,scale=320:180"));
        assert_eq!(cmd.artifacts, vec![PathBuf::from("/w/frames")]);
        assert!(matches!(cmd.profile, ToolProfile::SceneDetect { .. }));
    }
}
