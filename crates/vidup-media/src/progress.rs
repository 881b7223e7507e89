//! Progress parsing for external tool output.
//!
//! Each tool has its own line grammar. [`ToolProfile::parse_line`] turns one
//! output record into at most one [`ProgressUpdate`]; lines it does not
//! recognise are ignored rather than treated as errors.

use std::sync::LazyLock;

use regex::Regex;
use vidup_models::progress::clamp_percent;
use vidup_models::ProgressUpdate;

/// `[download]  42.3% of ~ 10.00MiB at  1.20MiB/s ETA 00:07`
static YTDLP_PROGRESS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^\[download\]\s+(?P<pct>\d+(?:\.\d+)?)%(?:\s+of\s+~?\s*(?P<size>\S+))?(?:\s+at\s+(?P<speed>\S+))?(?:\s+ETA\s+(?P<eta>\S+))?",
    )
    .expect("valid regex")
});

/// `[Merger] Merging formats into "x.mp4"` and other post-processing steps.
static YTDLP_POSTPROCESS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\[(?P<step>Merger|FixupM3u8|FixupM4a|VideoConvertor|ExtractAudio|MoveFiles)\]")
        .expect("valid regex")
});

/// Stats line: `frame=  100 fps= 25 ... time=00:00:04.00 bitrate=... speed=1.99x`
static FFMPEG_TIME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"time=\s*(?P<time>\d+:\d{2}:\d{2}(?:\.\d+)?)").expect("valid regex"));

static FFMPEG_SPEED: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"speed=\s*(?P<speed>\d+(?:\.\d+)?)x").expect("valid regex"));

/// `-progress` key/value output.
static FFMPEG_KV_TIME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?:out_time=(?P<clock>\d+:\d{2}:\d{2}(?:\.\d+)?)|out_time_us=(?P<us>\d+))$")
        .expect("valid regex")
});

/// showinfo filter: `[Parsed_showinfo_1 @ 0x..] n:   3 pts: 1234 pts_time:12.34 ...`
static SHOWINFO_PTS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"Parsed_showinfo.*\bpts_time:\s*(?P<ts>\d+(?:\.\d+)?)").expect("valid regex")
});

/// Closed set of tool output grammars.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ToolProfile {
    /// yt-dlp with `--newline`.
    YtDlp,
    /// FFmpeg transcode or trim. Percent needs the expected output duration.
    Ffmpeg { total_secs: Option<f64> },
    /// FFmpeg scene detection through the showinfo filter.
    SceneDetect { total_secs: Option<f64> },
    /// Tools with no progress output (thumbnail extraction).
    Silent,
}

impl ToolProfile {
    pub fn parse_line(&self, line: &str) -> Option<ProgressUpdate> {
        let line = line.trim();
        if line.is_empty() {
            return None;
        }
        match self {
            ToolProfile::YtDlp => parse_ytdlp(line),
            ToolProfile::Ffmpeg { total_secs } => parse_ffmpeg(line, *total_secs, "Processing"),
            ToolProfile::SceneDetect { total_secs } => {
                if let Some(caps) = SHOWINFO_PTS.captures(line) {
                    let ts: f64 = caps["ts"].parse().ok()?;
                    let mut update = ProgressUpdate {
                        message: Some(format!("Scene detected at {:.2}s", ts)),
                        marker: Some(ts),
                        ..Default::default()
                    };
                    if let Some(total) = total_secs.filter(|t| *t > 0.0) {
                        update.percent = Some(clamp_percent(ts / total * 100.0));
                    }
                    return Some(update);
                }
                parse_ffmpeg(line, *total_secs, "Analyzing scenes")
            }
            ToolProfile::Silent => None,
        }
    }
}

fn parse_ytdlp(line: &str) -> Option<ProgressUpdate> {
    if let Some(caps) = YTDLP_PROGRESS.captures(line) {
        let pct: f64 = caps["pct"].parse().ok()?;
        let pct = clamp_percent(pct);
        let mut update = ProgressUpdate::percent(pct).with_message(format!("Downloading: {:.1}%", pct));
        if let Some(speed) = caps.name("speed").map(|m| m.as_str()) {
            if !speed.starts_with("Unknown") {
                update = update.with_speed(speed);
            }
        }
        if let Some(eta) = caps.name("eta").map(|m| m.as_str()) {
            if !eta.starts_with("Unknown") {
                update = update.with_eta(eta);
            }
        }
        return Some(update);
    }

    if let Some(caps) = YTDLP_POSTPROCESS.captures(line) {
        let message = match &caps["step"] {
            "Merger" => "Merging formats",
            "MoveFiles" => "Finalizing download",
            _ => "Post-processing download",
        };
        return Some(ProgressUpdate::message(message));
    }

    None
}

fn parse_ffmpeg(line: &str, total_secs: Option<f64>, label: &str) -> Option<ProgressUpdate> {
    let position = if let Some(caps) = FFMPEG_TIME.captures(line) {
        parse_clock(&caps["time"])
    } else if let Some(caps) = FFMPEG_KV_TIME.captures(line) {
        match (caps.name("clock"), caps.name("us")) {
            (Some(clock), _) => parse_clock(clock.as_str()),
            (None, Some(us)) => us.as_str().parse::<f64>().ok().map(|us| us / 1_000_000.0),
            _ => None,
        }
    } else {
        None
    };
    let speed = FFMPEG_SPEED
        .captures(line)
        .and_then(|caps| caps["speed"].parse::<f64>().ok());

    if position.is_none() && speed.is_none() {
        return None;
    }

    let mut update = ProgressUpdate::default();
    let total = total_secs.filter(|t| *t > 0.0);

    if let (Some(pos), Some(total)) = (position, total) {
        let pct = clamp_percent(pos / total * 100.0);
        update.percent = Some(pct);
        update.message = Some(format!("{}: {:.1}%", label, pct));
    }
    if let Some(speed) = speed {
        update.speed = Some(format!("{:.2}x", speed));
        if let (Some(pos), Some(total)) = (position, total) {
            if speed > 0.0 {
                update.eta = Some(format_eta(((total - pos).max(0.0)) / speed));
            }
        }
    }

    (!update.is_empty()).then_some(update)
}

/// Parse `HH:MM:SS(.fff)` into seconds.
pub fn parse_clock(s: &str) -> Option<f64> {
    let mut parts = s.trim().splitn(3, ':');
    let h: f64 = parts.next()?.parse().ok()?;
    let m: f64 = parts.next()?.parse().ok()?;
    let sec: f64 = parts.next()?.parse().ok()?;
    if h < 0.0 || !(0.0..60.0).contains(&m) || !(0.0..60.0).contains(&sec) {
        return None;
    }
    Some(h * 3600.0 + m * 60.0 + sec)
}

/// Format a duration as `MM:SS`, or `H:MM:SS` past an hour.
pub fn format_eta(secs: f64) -> String {
    let total = secs.max(0.0).round() as u64;
    let (h, m, s) = (total / 3600, (total % 3600) / 60, total % 60);
    if h > 0 {
        format!("{}:{:02}:{:02}", h, m, s)
    } else {
        format!("{:02}:{:02}", m, s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ytdlp_progress_line() {
        let update = ToolProfile::YtDlp
            .parse_line("[download]  42.3% of ~  10.00MiB at    1.20MiB/s ETA 00:07")
            .unwrap();
        assert_eq!(update.percent, Some(42.3));
        assert_eq!(update.speed.as_deref(), Some("1.20MiB/s"));
        assert_eq!(update.eta.as_deref(), Some("00:07"));
    }

    #[test]
    fn test_ytdlp_unknown_speed_is_dropped() {
        let update = ToolProfile::YtDlp
            .parse_line("[download]   0.0% of 10.00MiB at Unknown B/s ETA Unknown")
            .unwrap();
        assert_eq!(update.percent, Some(0.0));
        assert!(update.speed.is_none());
        assert!(update.eta.is_none());
    }

    #[test]
    fn test_ytdlp_merge_is_indeterminate() {
        let update = ToolProfile::YtDlp
            .parse_line("[Merger] Merging formats into \"source.mp4\"")
            .unwrap();
        assert_eq!(update.percent, None);
        assert_eq!(update.message.as_deref(), Some("Merging formats"));
    }

    #[test]
    fn test_ytdlp_ignores_noise() {
        for line in [
            "[youtube] abc: Downloading webpage",
            "[download] Destination: source.f137.mp4",
            "[download] 1x.5% garbage",
            "",
        ] {
            assert!(ToolProfile::YtDlp.parse_line(line).is_none(), "{line}");
        }
    }

    #[test]
    fn test_ffmpeg_stats_line() {
        let profile = ToolProfile::Ffmpeg {
            total_secs: Some(20.0),
        };
        let update = profile
            .parse_line("frame=  100 fps= 25 q=28.0 size=     256kB time=00:00:05.00 bitrate= 524.3kbits/s speed=1.5x")
            .unwrap();
        assert_eq!(update.percent, Some(25.0));
        assert_eq!(update.speed.as_deref(), Some("1.50x"));
        assert_eq!(update.eta.as_deref(), Some("00:10"));
    }

    #[test]
    fn test_ffmpeg_percent_clamped() {
        let profile = ToolProfile::Ffmpeg {
            total_secs: Some(4.0),
        };
        let update = profile.parse_line("out_time=00:00:05.000000").unwrap();
        assert_eq!(update.percent, Some(100.0));
    }

    #[test]
    fn test_ffmpeg_without_duration_reports_speed_only() {
        let profile = ToolProfile::Ffmpeg { total_secs: None };
        let update = profile
            .parse_line("frame=10 time=00:00:01.00 speed=2.0x")
            .unwrap();
        assert_eq!(update.percent, None);
        assert_eq!(update.speed.as_deref(), Some("2.00x"));
    }

    #[test]
    fn test_ffmpeg_ignores_noise() {
        let profile = ToolProfile::Ffmpeg {
            total_secs: Some(10.0),
        };
        assert!(profile.parse_line("Input #0, mov,mp4, from 'a.mp4':").is_none());
        assert!(profile.parse_line("time=garbage").is_none());
        assert!(profile.parse_line("progress=continue").is_none());
    }

    #[test]
    fn test_showinfo_marker() {
        let profile = ToolProfile::SceneDetect {
            total_secs: Some(100.0),
        };
        let update = profile
            .parse_line("[Parsed_showinfo_1 @ 0x5581] n:   3 pts:  157000 pts_time:12.5    duration:512")
            .unwrap();
        assert_eq!(update.marker, Some(12.5));
        assert_eq!(update.percent, Some(12.5));
    }

    #[test]
    fn test_silent_profile() {
        assert!(ToolProfile::Silent.parse_line("time=00:00:01.00 speed=1x").is_none());
    }

    #[test]
    fn test_clock_and_eta_format() {
        assert_eq!(parse_clock("01:02:03.5"), Some(3723.5));
        assert_eq!(parse_clock("00:61:00"), None);
        assert_eq!(format_eta(75.0), "01:15");
        assert_eq!(format_eta(3725.0), "1:02:05");
    }
}
