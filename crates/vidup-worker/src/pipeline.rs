//! Stage sequences per job kind.
//!
//! A [`JobRun`] drives one job through its pipeline. Every external process
//! goes through the [`StageExecutor`]; every object transfer goes through the
//! store with a cancel-aware observer. Sub-steps of a stage are mapped into
//! fixed bands of the stage-local percent.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use serde_json::{json, Map, Value};
use tracing::{debug, warn};
use vidup_media::progress::format_eta;
use vidup_media::{
    collect_frames, find_downloaded_file, list_frames, read_download_info, CancelToken, MediaError, StageExecutor,
    StageOutcome, ToolCommand, Toolchain, TrimSpec, VideoInfo,
};
use vidup_models::{JobRequest, JobResult, ProgressUpdate, SplitParams, Stage, StoryboardParams};
use vidup_storage::keys::{content_type_for, storyboard_frame_key, storyboard_manifest_key, thumbnail_key, video_key};
use vidup_storage::{ObjectStore, StorageError, StoredObject, TransferObserver};

use crate::config::WorkerConfig;
use crate::error::WorkerError;
use crate::metadata::split_metadata;
use crate::metrics;
use crate::writer::JobWriter;

/// Why a pipeline stopped early.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Halt {
    Failed(String),
    Cancelled,
}

pub(crate) type Step<T> = Result<T, Halt>;

impl From<StorageError> for Halt {
    fn from(e: StorageError) -> Self {
        match e {
            StorageError::Cancelled => Halt::Cancelled,
            e => Halt::Failed(e.to_string()),
        }
    }
}

impl From<MediaError> for Halt {
    fn from(e: MediaError) -> Self {
        match e {
            MediaError::Cancelled => Halt::Cancelled,
            e => Halt::Failed(e.to_string()),
        }
    }
}

impl From<WorkerError> for Halt {
    fn from(e: WorkerError) -> Self {
        Halt::Failed(e.to_string())
    }
}

impl From<std::io::Error> for Halt {
    fn from(e: std::io::Error) -> Self {
        Halt::Failed(format!("I/O error: {}", e))
    }
}

/// Collaborators shared by every job.
pub(crate) struct Services {
    pub config: WorkerConfig,
    pub toolchain: Arc<dyn Toolchain>,
    pub store: Arc<dyn ObjectStore>,
    pub executor: StageExecutor,
}

#[derive(Debug, Clone, Copy)]
enum Transcode {
    Always,
    IfVertical,
}

type Band = (f64, f64);

/// Bands of the upload stage.
struct UploadBands {
    thumbnail: Band,
    video: Band,
    thumbnail_upload: Band,
}

const BANDS_WITH_TRANSCODE: UploadBands = UploadBands {
    thumbnail: (40.0, 50.0),
    video: (50.0, 95.0),
    thumbnail_upload: (95.0, 100.0),
};

const BANDS_WITHOUT_TRANSCODE: UploadBands = UploadBands {
    thumbnail: (0.0, 10.0),
    video: (10.0, 95.0),
    thumbnail_upload: (95.0, 100.0),
};

const TRANSCODE_BAND: Band = (0.0, 40.0);

/// Reports transfer progress into the current stage and stops it on cancel.
struct StageTransfer<'a> {
    writer: &'a JobWriter,
    cancel: &'a CancelToken,
    band: Band,
    label: &'a str,
    started: Instant,
}

impl TransferObserver for StageTransfer<'_> {
    fn on_progress(&self, transferred: u64, total: u64) {
        let percent = if total > 0 {
            transferred as f64 * 100.0 / total as f64
        } else {
            0.0
        };
        let mut update = ProgressUpdate::percent(percent)
            .with_message(format!("{}: {:.1}MB / {:.1}MB", self.label, mib(transferred), mib(total)))
            .scaled(self.band.0, self.band.1);

        let secs = self.started.elapsed().as_secs_f64();
        if secs >= 0.5 && transferred > 0 {
            let rate = transferred as f64 / secs;
            update = update.with_speed(format!("{:.2}MB/s", rate / (1024.0 * 1024.0)));
            if total > transferred {
                update = update.with_eta(format_eta((total - transferred) as f64 / rate));
            }
        }
        self.writer.report(&update);
    }

    fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

fn mib(bytes: u64) -> f64 {
    bytes as f64 / (1024.0 * 1024.0)
}

pub(crate) struct JobRun<'a> {
    services: &'a Services,
    writer: &'a JobWriter,
    cancel: &'a CancelToken,
    workspace: &'a Path,
    stage: Stage,
    /// Keys stored by this run, deleted if the job does not complete.
    uploaded: Vec<String>,
}

impl<'a> JobRun<'a> {
    pub fn new(services: &'a Services, writer: &'a JobWriter, cancel: &'a CancelToken, workspace: &'a Path) -> Self {
        Self {
            services,
            writer,
            cancel,
            workspace,
            stage: Stage::Pending,
            uploaded: Vec::new(),
        }
    }

    /// Run the request's pipeline up to, but excluding, completion.
    pub async fn run(&mut self, request: &JobRequest) -> Step<(JobResult, String)> {
        self.checkpoint()?;
        match request {
            JobRequest::UrlDownload { url, format } => self.url_download(url, format.as_deref()).await,
            JobRequest::FileUpload { path, filename } => self.file_upload(path, filename).await,
            JobRequest::Split(params) => self.split(params).await,
            JobRequest::Convert { source } => self.convert(source).await,
            JobRequest::Storyboard(params) => self.storyboard(params).await,
        }
    }

    /// Delete objects stored by an unfinished run.
    pub async fn reclaim(&mut self) {
        for key in self.uploaded.drain(..) {
            match self.services.store.delete(&key).await {
                Ok(()) => debug!(key = %key, "Reclaimed partial output"),
                Err(e) => warn!(key = %key, "Failed to reclaim partial output: {}", e),
            }
        }
    }

    fn checkpoint(&self) -> Step<()> {
        if self.cancel.is_cancelled() {
            return Err(Halt::Cancelled);
        }
        Ok(())
    }

    fn enter(&mut self, stage: Stage, message: &str) -> Step<()> {
        self.checkpoint()?;
        self.writer.enter_stage(stage, message)?;
        self.stage = stage;
        Ok(())
    }

    fn note(&self, message: &str) {
        self.writer.report(&ProgressUpdate::message(message));
    }

    /// Run one supervised tool invocation. Returns the tool's timestamp markers.
    async fn exec(&self, cmd: &ToolCommand, band: Band) -> Step<Vec<f64>> {
        let started = Instant::now();
        let mut markers = Vec::new();
        let writer = self.writer;

        let outcome = self
            .services
            .executor
            .run(cmd, self.cancel, |update| {
                if let Some(marker) = update.marker {
                    markers.push(marker);
                }
                writer.report(&update.scaled(band.0, band.1));
            })
            .await;
        metrics::record_stage_duration(self.stage, cmd.display_name(), started.elapsed().as_secs_f64());

        match outcome {
            StageOutcome::Succeeded => Ok(markers),
            StageOutcome::Cancelled => Err(Halt::Cancelled),
            StageOutcome::Failed {
                message,
                stderr_excerpt,
                ..
            } => {
                debug!(job_id = %writer.id(), stderr = %stderr_excerpt, "Tool failed");
                Err(Halt::Failed(message))
            }
        }
    }

    async fn upload(&mut self, path: &Path, key: &str, band: Band, label: &str) -> Step<StoredObject> {
        let observer = StageTransfer {
            writer: self.writer,
            cancel: self.cancel,
            band,
            label,
            started: Instant::now(),
        };
        let started = Instant::now();
        let stored = self
            .services
            .store
            .upload(path, key, content_type_for(path), &observer)
            .await?;
        metrics::record_stage_duration(self.stage, "store", started.elapsed().as_secs_f64());
        self.uploaded.push(stored.key.clone());
        Ok(stored)
    }

    async fn fetch(&self, location: &str, dest: &Path, band: Band) -> Step<u64> {
        let observer = StageTransfer {
            writer: self.writer,
            cancel: self.cancel,
            band,
            label: "Downloading",
            started: Instant::now(),
        };
        Ok(self.services.store.fetch(location, dest, &observer).await?)
    }

    /// Location a tool can read: a store-issued URL or key, or any http(s) URL.
    async fn resolve_source(&self, source: &str) -> Step<String> {
        match self.services.store.readable_location(source).await {
            Ok(location) => Ok(location),
            Err(_) if source.starts_with("http://") || source.starts_with("https://") => Ok(source.to_string()),
            Err(e) => Err(Halt::Failed(format!("Cannot read source video: {}", e))),
        }
    }

    async fn probe(&self, target: &str) -> Option<VideoInfo> {
        match self.services.toolchain.probe(target).await {
            Ok(info) => Some(info),
            Err(e) => {
                self.writer.logger().log_warning(&format!("probe failed: {}", e));
                None
            }
        }
    }

    /// A failure that should not end the job. Cancellation still does.
    fn tolerate<T>(&self, step: Step<T>, what: &str) -> Step<Option<T>> {
        match step {
            Ok(v) => Ok(Some(v)),
            Err(Halt::Cancelled) => Err(Halt::Cancelled),
            Err(Halt::Failed(msg)) => {
                self.writer.logger().log_warning(&format!("{} skipped: {}", what, msg));
                Ok(None)
            }
        }
    }

    async fn url_download(&mut self, url: &str, format: Option<&str>) -> Step<(JobResult, String)> {
        self.enter(Stage::Download, "Starting download")?;

        let dir = self.workspace.join("download");
        tokio::fs::create_dir_all(&dir).await?;
        let cmd = self.services.toolchain.download(url, format, &dir);
        self.exec(&cmd, (0.0, 100.0)).await?;

        let file = find_downloaded_file(&dir)
            .await?
            .ok_or_else(|| Halt::Failed("Download finished but produced no video file".to_string()))?;
        let info = read_download_info(&dir).await.unwrap_or_default();

        self.enter(Stage::Upload, "Preparing upload")?;
        let mut meta = info.to_metadata();
        meta.entry("source_url").or_insert_with(|| Value::from(url));
        let result = self.publish_video(file, Transcode::IfVertical, meta).await?;
        Ok((result, "Download and upload complete".to_string()))
    }

    async fn file_upload(&mut self, path: &Path, filename: &str) -> Step<(JobResult, String)> {
        self.enter(Stage::Upload, "Processing uploaded file")?;
        if !tokio::fs::try_exists(path).await? {
            return Err(Halt::Failed("Uploaded file is missing".to_string()));
        }

        let mut meta = Map::new();
        let title = Path::new(filename)
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or(filename);
        meta.insert("title".to_string(), Value::from(title));
        meta.insert("original_filename".to_string(), Value::from(filename));
        let result = self.publish_video(path.to_path_buf(), Transcode::Always, meta).await?;
        Ok((result, "Upload complete".to_string()))
    }

    async fn convert(&mut self, source: &str) -> Step<(JobResult, String)> {
        self.enter(Stage::Download, "Fetching stored video")?;

        let key = self.services.store.key_from_location(source);
        let ext = key
            .as_deref()
            .and_then(|k| Path::new(k).extension())
            .and_then(|e| e.to_str())
            .unwrap_or("mp4");
        let dest = self.workspace.join(format!("stored.{}", ext));
        self.fetch(source, &dest, (0.0, 100.0)).await?;

        self.enter(Stage::Upload, "Converting to horizontal")?;
        let mut meta = Map::new();
        meta.insert(
            "converted_from".to_string(),
            Value::from(key.unwrap_or_else(|| source.to_string())),
        );
        let result = self.publish_video(dest, Transcode::Always, meta).await?;
        Ok((result, "Conversion complete".to_string()))
    }

    async fn split(&mut self, params: &SplitParams) -> Step<(JobResult, String)> {
        self.enter(Stage::Split, "Preparing split")?;

        let location = self.resolve_source(&params.source).await?;
        let info = self.probe(&location).await;
        let total = info.as_ref().map(|i| i.duration).filter(|d| *d > 0.0);

        let start = params.start_time;
        if let Some(total) = total {
            if start >= total {
                return Err(Halt::Failed(format!(
                    "start_time {:.1}s is beyond the video duration {:.1}s",
                    start, total
                )));
            }
        }
        let end = match (params.end_time, total) {
            (Some(end), Some(total)) => Some(end.min(total)),
            (end, _) => end,
        };
        let vertical = info.as_ref().filter(|i| i.is_vertical());
        let reencode_from = match (params.convert_to_horizontal, vertical) {
            (true, Some(i)) => Some((i.width, i.height)),
            _ => None,
        };

        let out = self.workspace.join("split.mp4");
        let spec = TrimSpec {
            start,
            duration: end.or(total).map(|e| e - start),
            reencode_from,
        };
        self.note("Cutting clip");
        let cmd = self.services.toolchain.trim(&location, &out, &spec);
        self.exec(&cmd, (0.0, 80.0)).await?;

        let job_id = self.writer.id().to_string();
        let stored = self
            .upload(&out, &video_key(&job_id, "mp4"), (80.0, 100.0), "Uploading clip")
            .await?;

        let mut result = JobResult::new(stored.url).with_key(stored.key);
        let dims = match (reencode_from, &info) {
            (Some(_), _) => Some((self.services.config.target_width, self.services.config.target_height)),
            (None, Some(i)) if i.width > 0 && i.height > 0 => Some((i.width, i.height)),
            _ => None,
        };
        if let Some((w, h)) = dims {
            result = result.with_dimensions(w, h);
        }
        result
            .metadata
            .extend(split_metadata(params.original_metadata.as_ref(), start, end));
        Ok((result, "Split complete".to_string()))
    }

    async fn storyboard(&mut self, params: &StoryboardParams) -> Step<(JobResult, String)> {
        self.enter(Stage::Storyboard, "Detecting scene changes")?;

        let location = self.resolve_source(&params.source).await?;
        let total = self
            .probe(&location)
            .await
            .map(|i| i.duration)
            .filter(|d| *d > 0.0);

        let frames_dir = self.workspace.join("frames");
        tokio::fs::create_dir_all(&frames_dir).await?;
        let cmd = self
            .services
            .toolchain
            .storyboard(&location, &frames_dir, params, total);
        let markers = self.exec(&cmd, (0.0, 70.0)).await?;

        let files = list_frames(&frames_dir).await?;
        let mut frames = collect_frames(files, &markers);
        if frames.is_empty() {
            return Err(Halt::Failed("No frames were extracted".to_string()));
        }

        let job_id = self.writer.id().to_string();
        let count = frames.len();
        for (i, frame) in frames.iter_mut().enumerate() {
            let lo = 70.0 + 25.0 * i as f64 / count as f64;
            let hi = 70.0 + 25.0 * (i + 1) as f64 / count as f64;
            let label = format!("Uploading frame {}/{}", i + 1, count);
            let stored = self
                .upload(&frame.path.clone(), &storyboard_frame_key(&job_id, frame.index), (lo, hi), &label)
                .await?;
            frame.key = Some(stored.key);
            frame.url = Some(stored.url);
        }

        let frames_json =
            serde_json::to_value(&frames).map_err(|e| Halt::Failed(format!("Failed to encode frames: {}", e)))?;
        let manifest = json!({
            "job_id": job_id,
            "source": params.source,
            "threshold": params.threshold,
            "frame_count": count,
            "frames": frames_json,
        });
        let manifest_path = self.workspace.join("storyboard.json");
        let bytes = serde_json::to_vec_pretty(&manifest)
            .map_err(|e| Halt::Failed(format!("Failed to encode storyboard: {}", e)))?;
        tokio::fs::write(&manifest_path, bytes).await?;
        let stored = self
            .upload(
                &manifest_path,
                &storyboard_manifest_key(&job_id),
                (95.0, 100.0),
                "Uploading storyboard",
            )
            .await?;

        let result = JobResult::new(stored.url)
            .with_key(stored.key)
            .with_dimensions(params.thumbnail_width, params.thumbnail_height)
            .with_meta("source", params.source.as_str())
            .with_meta("threshold", params.threshold)
            .with_meta("frame_count", count as u64)
            .with_meta("frames", frames_json);
        Ok((result, format!("Storyboard complete ({} frames)", count)))
    }

    /// Probe, optionally convert to horizontal, thumbnail and upload a local video.
    async fn publish_video(
        &mut self,
        file: PathBuf,
        policy: Transcode,
        mut meta: Map<String, Value>,
    ) -> Step<JobResult> {
        let probe = self.probe(&file.to_string_lossy()).await;
        if let Some(info) = &probe {
            meta.entry("duration").or_insert_with(|| Value::from(info.duration));
            meta.insert("original_width".to_string(), Value::from(info.width));
            meta.insert("original_height".to_string(), Value::from(info.height));
        }

        let transcode = match policy {
            Transcode::Always => true,
            Transcode::IfVertical => probe.as_ref().map(VideoInfo::is_vertical).unwrap_or(false),
        };

        let (video, dims, bands) = if transcode {
            self.note("Converting to horizontal");
            let out = self.workspace.join("horizontal.mp4");
            let info = probe.clone().unwrap_or_default();
            let cmd = self.services.toolchain.transcode_horizontal(&file, &out, &info);
            self.exec(&cmd, TRANSCODE_BAND).await?;
            meta.insert("converted_to_horizontal".to_string(), Value::from(true));
            let target = (self.services.config.target_width, self.services.config.target_height);
            (out, Some(target), BANDS_WITH_TRANSCODE)
        } else {
            let dims = probe
                .as_ref()
                .filter(|i| i.width > 0 && i.height > 0)
                .map(|i| (i.width, i.height));
            (file, dims, BANDS_WITHOUT_TRANSCODE)
        };

        self.note("Generating thumbnail");
        let thumb_path = self.workspace.join("thumbnail.jpg");
        let thumb_cmd = self.services.toolchain.thumbnail(&video, &thumb_path);
        let thumb = self.exec(&thumb_cmd, bands.thumbnail).await;
        let has_thumb = self.tolerate(thumb, "thumbnail")?.is_some() && tokio::fs::try_exists(&thumb_path).await?;

        let job_id = self.writer.id().to_string();
        let ext = video.extension().and_then(|e| e.to_str()).unwrap_or("mp4").to_string();
        let stored = self
            .upload(&video, &video_key(&job_id, &ext), bands.video, "Uploading")
            .await?;

        if has_thumb {
            let thumb = self
                .upload(
                    &thumb_path,
                    &thumbnail_key(&job_id),
                    bands.thumbnail_upload,
                    "Uploading thumbnail",
                )
                .await;
            if let Some(thumb) = self.tolerate(thumb, "thumbnail upload")? {
                meta.insert("thumbnail_url".to_string(), Value::from(thumb.url));
                meta.insert("thumbnail_key".to_string(), Value::from(thumb.key));
            }
        }

        let mut result = JobResult::new(stored.url).with_key(stored.key);
        if let Some((w, h)) = dims {
            result = result.with_dimensions(w, h);
        }
        result.metadata.extend(meta);
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_halt_from_storage_cancel() {
        assert_eq!(Halt::from(StorageError::Cancelled), Halt::Cancelled);
        assert!(matches!(
            Halt::from(StorageError::not_found("k")),
            Halt::Failed(msg) if msg.contains("k")
        ));
    }

    #[test]
    fn test_bands_cover_stage() {
        for bands in [BANDS_WITH_TRANSCODE, BANDS_WITHOUT_TRANSCODE] {
            assert!(bands.thumbnail.1 <= bands.video.0);
            assert!(bands.video.1 <= bands.thumbnail_upload.0);
            assert_eq!(bands.thumbnail_upload.1, 100.0);
        }
        assert_eq!(TRANSCODE_BAND.1, BANDS_WITH_TRANSCODE.thumbnail.0);
    }
}
