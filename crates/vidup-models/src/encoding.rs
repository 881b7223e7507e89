//! Encoding constants for the horizontal output format.

/// Target frame width for re-oriented output.
pub const TARGET_WIDTH: u32 = 1920;
/// Target frame height for re-oriented output.
pub const TARGET_HEIGHT: u32 = 1080;

/// Default video codec (H.264)
pub const DEFAULT_VIDEO_CODEC: &str = "libx264";
/// Default audio codec
pub const DEFAULT_AUDIO_CODEC: &str = "aac";
/// Default encoding preset
pub const DEFAULT_PRESET: &str = "medium";
/// Default CRF (Constant Rate Factor)
pub const DEFAULT_CRF: u8 = 23;
/// Default audio bitrate
pub const DEFAULT_AUDIO_BITRATE: &str = "128k";

/// Thumbnail generation settings
pub const THUMBNAIL_SCALE_WIDTH: u32 = 480;
pub const THUMBNAIL_TIMESTAMP: &str = "00:00:01";

/// Storyboard defaults
pub const DEFAULT_SCENE_THRESHOLD: f64 = 0.3;
pub const DEFAULT_STORYBOARD_WIDTH: u32 = 320;
pub const DEFAULT_STORYBOARD_HEIGHT: u32 = 180;
/// Scene timestamps closer than this are treated as the same cut.
pub const MIN_SCENE_GAP_SECS: f64 = 0.1;
