//! Object key layout.

use std::path::Path;

use crate::error::{StorageError, StorageResult};

/// `videos/{job}/video_{job}.{ext}`
pub fn video_key(job_id: &str, ext: &str) -> String {
    format!("videos/{0}/video_{0}.{1}", job_id, ext.trim_start_matches('.'))
}

/// `thumbnails/{job}/thumbnail_{job}.jpg`
pub fn thumbnail_key(job_id: &str) -> String {
    format!("thumbnails/{0}/thumbnail_{0}.jpg", job_id)
}

/// `storyboards/{job}/frame_00001.jpg`
pub fn storyboard_frame_key(job_id: &str, index: usize) -> String {
    format!("storyboards/{}/frame_{:05}.jpg", job_id, index + 1)
}

pub fn storyboard_manifest_key(job_id: &str) -> String {
    format!("storyboards/{}/storyboard.json", job_id)
}

/// Reject keys that could escape a local root or address nothing.
pub fn validate_key(key: &str) -> StorageResult<()> {
    let bad = key.is_empty()
        || key.starts_with('/')
        || key.contains('\\')
        || key.split('/').any(|seg| seg.is_empty() || seg == "." || seg == "..");
    if bad {
        return Err(StorageError::invalid_key(key));
    }
    Ok(())
}

/// Content type from file extension.
pub fn content_type_for(path: &Path) -> &'static str {
    match path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .as_deref()
    {
        Some("mp4") | Some("m4v") => "video/mp4",
        Some("webm") => "video/webm",
        Some("mkv") => "video/x-matroska",
        Some("mov") => "video/quicktime",
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("png") => "image/png",
        Some("json") => "application/json",
        _ => "application/octet-stream",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::{assert_err, assert_ok};

    #[test]
    fn test_key_layout() {
        assert_eq!(video_key("abc", ".mp4"), "videos/abc/video_abc.mp4");
        assert_eq!(thumbnail_key("abc"), "thumbnails/abc/thumbnail_abc.jpg");
        assert_eq!(storyboard_frame_key("abc", 0), "storyboards/abc/frame_00001.jpg");
    }

    #[test]
    fn test_validate_key() {
        assert_ok!(validate_key("videos/a/b.mp4"));
        assert_err!(validate_key("../etc/passwd"));
        assert_err!(validate_key("/abs"));
        assert_err!(validate_key("a//b"));
        assert_err!(validate_key(""));
    }

    #[test]
    fn test_content_type() {
        assert_eq!(content_type_for(Path::new("x/clip.MP4")), "video/mp4");
        assert_eq!(content_type_for(Path::new("frame.jpg")), "image/jpeg");
        assert_eq!(content_type_for(Path::new("blob")), "application/octet-stream");
    }
}
