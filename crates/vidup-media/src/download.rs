//! Remote video download with yt-dlp.

use std::path::{Path, PathBuf};

use serde::Deserialize;
use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::command::ToolCommand;
use crate::error::MediaResult;
use crate::progress::ToolProfile;

/// Base name of the downloaded file inside the job workspace.
pub const DOWNLOAD_STEM: &str = "source";

/// Default format selector: best video and audio merged, or best single file.
pub const DEFAULT_FORMAT: &str = "bestvideo+bestaudio/best";

/// Options shared by every yt-dlp invocation.
#[derive(Debug, Clone)]
pub struct DownloadOptions {
    pub ytdlp: String,
    pub ffmpeg: String,
    pub no_check_certificate: bool,
    pub max_filesize_mb: u64,
}

/// Build the yt-dlp invocation for `url`, writing into `work_dir`.
///
/// `work_dir` must be dedicated to this download: it is removed when the run
/// does not succeed.
pub fn ytdlp_command(opts: &DownloadOptions, url: &str, format: Option<&str>, work_dir: &Path) -> ToolCommand {
    let template = work_dir.join(format!("{}.%(ext)s", DOWNLOAD_STEM));

    let mut cmd = ToolCommand::new(&opts.ytdlp, ToolProfile::YtDlp)
        .args(["--newline", "--no-playlist", "--no-part", "--write-info-json"])
        .args(["--format", format.unwrap_or(DEFAULT_FORMAT)])
        .args(["--merge-output-format", "mp4"])
        .args(["--max-filesize", &format!("{}M", opts.max_filesize_mb)])
        .args(["--ffmpeg-location", &opts.ffmpeg])
        .arg("--output")
        .arg(template.to_string_lossy().to_string());

    if opts.no_check_certificate {
        cmd = cmd.arg("--no-check-certificate");
    }

    cmd.arg("--").arg(url).artifact(work_dir)
}

/// Subset of the yt-dlp info JSON kept as job metadata.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DownloadInfo {
    pub title: Option<String>,
    pub duration: Option<f64>,
    pub uploader: Option<String>,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub ext: Option<String>,
    pub webpage_url: Option<String>,
}

impl DownloadInfo {
    /// Metadata entries for the job result.
    pub fn to_metadata(&self) -> Map<String, Value> {
        let mut meta = Map::new();
        meta.insert(
            "title".to_string(),
            Value::from(self.title.clone().unwrap_or_else(|| "Unknown".to_string())),
        );
        if let Some(d) = self.duration {
            meta.insert("duration".to_string(), Value::from(d));
        }
        if let Some(u) = &self.uploader {
            meta.insert("uploader".to_string(), Value::from(u.clone()));
        }
        if let Some(url) = &self.webpage_url {
            meta.insert("source_url".to_string(), Value::from(url.clone()));
        }
        meta
    }
}

/// Read `source.info.json` written by `--write-info-json`. Missing or malformed files yield `None`.
pub async fn read_download_info(work_dir: &Path) -> Option<DownloadInfo> {
    let path = work_dir.join(format!("{}.info.json", DOWNLOAD_STEM));
    let raw = tokio::fs::read(&path).await.ok()?;
    match serde_json::from_slice(&raw) {
        Ok(info) => Some(info),
        Err(e) => {
            warn!(path = %path.display(), "Ignoring malformed info JSON: {}", e);
            None
        }
    }
}

/// Locate the media file yt-dlp produced in `work_dir`.
pub async fn find_downloaded_file(work_dir: &Path) -> MediaResult<Option<PathBuf>> {
    let mut entries = tokio::fs::read_dir(work_dir).await?;
    let mut candidates = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        let is_download = name.starts_with(&format!("{}.", DOWNLOAD_STEM))
            && !name.ends_with(".json")
            && !name.ends_with(".part")
            && !name.ends_with(".ytdl");
        if is_download {
            candidates.push(path);
        }
    }
    // Prefer the merged mp4 when intermediate formats are still around
    candidates.sort_by_key(|p| p.extension().and_then(|e| e.to_str()) != Some("mp4"));
    debug!(?candidates, "Download candidates");
    Ok(candidates.into_iter().next())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn opts() -> DownloadOptions {
        DownloadOptions {
            ytdlp: "yt-dlp".to_string(),
            ffmpeg: "ffmpeg".to_string(),
            no_check_certificate: true,
            max_filesize_mb: 5000,
        }
    }

    #[test]
    fn test_ytdlp_arguments() {
        let cmd = ytdlp_command(&opts(), "https://youtu.be/abc", None, Path::new("/work/job"));
        assert_eq!(cmd.profile, ToolProfile::YtDlp);
        assert!(cmd.args.contains(&"--newline".to_string()));
        assert!(cmd.args.contains(&DEFAULT_FORMAT.to_string()));
        assert!(cmd.args.contains(&"5000M".to_string()));
        assert!(cmd.args.contains(&"--no-check-certificate".to_string()));
        assert_eq!(cmd.args.last().map(String::as_str), Some("https://youtu.be/abc"));
    }

    #[tokio::test]
    async fn test_find_downloaded_prefers_mp4() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["source.info.json", "source.webm", "source.mp4", "other.mp4"] {
            tokio::fs::write(dir.path().join(name), b"x").await.unwrap();
        }
        let found = find_downloaded_file(dir.path()).await.unwrap().unwrap();
        assert_eq!(found.file_name().unwrap(), "source.mp4");
    }

    #[tokio::test]
    async fn test_read_download_info() {
        let dir = tempfile::tempdir().unwrap();
        tokio::fs::write(
            dir.path().join("source.info.json"),
            br#"{"title":"Talk","duration":61.5,"uploader":"chan","width":1080,"height":1920,"extra":[1]}"#,
        )
        .await
        .unwrap();
        let info = read_download_info(dir.path()).await.unwrap();
        assert_eq!(info.title.as_deref(), Some("Talk"));
        assert_eq!(info.height, Some(1920));
        let meta = info.to_metadata();
        assert_eq!(meta["duration"], 61.5);
    }
}
