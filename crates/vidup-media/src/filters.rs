//! Video filter planning.

/// Scale-and-pad plan that fits a source frame into a target frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FitPlan {
    pub scaled_width: u32,
    pub scaled_height: u32,
    pub pad_x: u32,
    pub pad_y: u32,
    pub target_width: u32,
    pub target_height: u32,
}

impl FitPlan {
    /// Fit `width`x`height` inside the target, centered, preserving aspect ratio.
    ///
    /// Scaled dimensions are rounded down to even values for yuv420p encoders.
    /// Returns `None` when the source dimensions are unknown.
    pub fn fit(width: u32, height: u32, target_width: u32, target_height: u32) -> Option<Self> {
        if width == 0 || height == 0 || target_width == 0 || target_height == 0 {
            return None;
        }
        let ratio = f64::min(
            target_width as f64 / width as f64,
            target_height as f64 / height as f64,
        );
        let even = |v: f64| ((v.floor() as u32) & !1).max(2);
        let scaled_width = even(width as f64 * ratio).min(target_width);
        let scaled_height = even(height as f64 * ratio).min(target_height);
        Some(Self {
            scaled_width,
            scaled_height,
            pad_x: (target_width - scaled_width) / 2,
            pad_y: (target_height - scaled_height) / 2,
            target_width,
            target_height,
        })
    }

    pub fn filter(&self) -> String {
        format!(
            "scale={}:{},pad={}:{}:{}:{}:black",
            self.scaled_width,
            self.scaled_height,
            self.target_width,
            self.target_height,
            self.pad_x,
            self.pad_y
        )
    }
}

/// Filter for fitting into the target frame, with or without known source dimensions.
pub fn fit_filter(source: Option<(u32, u32)>, target_width: u32, target_height: u32) -> String {
    source
        .and_then(|(w, h)| FitPlan::fit(w, h, target_width, target_height))
        .map(|plan| plan.filter())
        .unwrap_or_else(|| letterbox_filter(target_width, target_height))
}

/// Dimension-agnostic scale-and-pad, computed by FFmpeg at runtime.
pub fn letterbox_filter(width: u32, height: u32) -> String {
    format!(
        "scale={w}:{h}:force_original_aspect_ratio=decrease,pad={w}:{h}:(ow-iw)/2:(oh-ih)/2:black",
        w = width,
        h = height
    )
}
