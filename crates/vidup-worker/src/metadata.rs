//! Result metadata derivation.

use serde_json::{Map, Value};

/// Keys describing a storyboard of the source; a split gets its own.
const STORYBOARD_KEYS: &[&str] = &[
    "frames",
    "frame_count",
    "frames_dir",
    "storyboard_job_id",
    "storyboard_completed",
    "storyboard_frame_count",
    "storyboard_url",
    "storyboard_key",
];

/// Metadata of a split clip derived from its source's metadata.
pub fn split_metadata(original: Option<&Map<String, Value>>, start: f64, end: Option<f64>) -> Map<String, Value> {
    let range = match end {
        Some(end) => format!("{:.1}s-{:.1}s", start, end),
        None => format!("from {:.1}s", start),
    };

    let mut meta = match original {
        Some(original) => {
            let mut meta = original.clone();
            for key in STORYBOARD_KEYS {
                meta.remove(*key);
            }
            let title = original.get("title").and_then(Value::as_str).unwrap_or("Unknown");
            meta.insert("title".to_string(), Value::from(format!("{} (Split {})", title, range)));
            meta.insert(
                "original_duration".to_string(),
                original.get("duration").cloned().unwrap_or(Value::from(0)),
            );
            meta
        }
        None => {
            let mut meta = Map::new();
            meta.insert("title".to_string(), Value::from(format!("Split Video ({})", range)));
            meta
        }
    };

    meta.insert("is_split".to_string(), Value::from(true));
    meta.insert("split_start".to_string(), Value::from(start));
    meta.insert("split_end".to_string(), end.map(Value::from).unwrap_or(Value::Null));
    meta
}
