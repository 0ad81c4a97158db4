// THEORY:
// The quality module closes the loop between how long detection takes and how
// much work the detector is asked to do. It owns two things:
//
// 1.  **`QualityProfile`**: a plain value object holding every detection parameter
//     that trades accuracy for speed. Profiles are built once from configuration
//     into a level table; the detector reads fields and never branches on the
//     level number.
// 2.  **`QualityController`**: a small closed-loop controller. Its state is the
//     current level plus a rolling window of frame times. Once the window is full,
//     the median frame time is compared against a dead band around the target and
//     the level moves by at most one step. A single stalled frame cannot move the
//     median, so only a sustained slowdown counts. The window is then cleared, so the next
//     decision needs a whole fresh window of evidence. A frame rate oscillating
//     around the target can therefore never flip the level every frame.
//
// A manual override pins the level until it is cleared. While pinned, frame times
// are ignored entirely so that a stale window cannot cause a jump right after the
// override is lifted.

use crate::error::ConfigError;
use serde::Deserialize;
use std::collections::VecDeque;
use std::time::Duration;
use tracing::info;

/// Detection parameters for one quality level.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct QualityProfile {
    /// Position in the level table (0 = fastest).
    #[serde(default)]
    pub level: u8,
    /// Factor applied to both frame dimensions before detection, in (0, 1].
    pub resolution_scale: f64,
    /// Half-size of the adaptive threshold window, in scaled pixels.
    pub threshold_window_radius: u32,
    /// A pixel is dark when it is this much below its local mean.
    pub threshold_offset: f64,
    /// Minimum quad perimeter as a fraction of the larger scaled dimension.
    pub min_perimeter_rate: f64,
    /// Maximum quad perimeter as a fraction of the larger scaled dimension.
    pub max_perimeter_rate: f64,
    /// Allowed mean edge-fit error as a fraction of the mean side length.
    pub polygon_accuracy_rate: f64,
    /// Shortest side as a fraction of the perimeter.
    pub min_corner_distance_rate: f64,
    /// Minimum distance of every corner from the image border, in scaled pixels.
    pub min_border_distance: f64,
    /// Minimum difference between the brightest and darkest cell means.
    pub min_contrast: f64,
    /// Number of border cells allowed to read as white.
    pub max_border_errors: u32,
}

impl QualityProfile {
    pub fn validate(&self, index: usize) -> Result<(), ConfigError> {
        let invalid = |reason: &str| ConfigError::InvalidLevel {
            level: index,
            reason: reason.to_string(),
        };
        if !(self.resolution_scale > 0.0 && self.resolution_scale <= 1.0) {
            return Err(invalid("resolution_scale must be in (0, 1]"));
        }
        if self.threshold_window_radius == 0 {
            return Err(invalid("threshold_window_radius must be positive"));
        }
        if !(self.min_perimeter_rate > 0.0 && self.min_perimeter_rate < self.max_perimeter_rate) {
            return Err(invalid("perimeter rates must satisfy 0 < min < max"));
        }
        if !(self.polygon_accuracy_rate > 0.0) {
            return Err(invalid("polygon_accuracy_rate must be positive"));
        }
        if !(0.0..0.25).contains(&self.min_corner_distance_rate) {
            return Err(invalid("min_corner_distance_rate must be in [0, 0.25)"));
        }
        if self.min_border_distance < 0.0 || self.min_contrast < 0.0 {
            return Err(invalid("distances and contrast must not be negative"));
        }
        Ok(())
    }
}

/// The built-in five-level table, fastest first.
pub fn default_levels() -> Vec<QualityProfile> {
    let scales = [0.4, 0.5, 0.65, 0.8, 1.0];
    let radii = [5, 6, 7, 9, 11];
    let min_perimeter = [0.08, 0.06, 0.05, 0.04, 0.03];
    let accuracy = [0.07, 0.06, 0.05, 0.04, 0.03];
    let border_errors = [2, 2, 1, 1, 0];
    (0..5)
        .map(|i| QualityProfile {
            level: i as u8,
            resolution_scale: scales[i],
            threshold_window_radius: radii[i],
            threshold_offset: 7.0,
            min_perimeter_rate: min_perimeter[i],
            max_perimeter_rate: 4.0,
            polygon_accuracy_rate: accuracy[i],
            min_corner_distance_rate: 0.05,
            min_border_distance: 3.0,
            min_contrast: 40.0,
            max_border_errors: border_errors[i],
        })
        .collect()
}

/// Tuning of the automatic level adjustment.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct ControllerSettings {
    pub initial_level: u8,
    pub min_level: u8,
    pub max_level: u8,
    /// Frame rate the controller tries to hold.
    pub target_fps: f64,
    /// Number of frames per adjustment decision.
    pub window: usize,
    /// Step down when the window's median fps < `lower_ratio * target_fps`.
    pub lower_ratio: f64,
    /// Step up when the window's median fps > `upper_ratio * target_fps`.
    pub upper_ratio: f64,
}

impl Default for ControllerSettings {
    fn default() -> Self {
        Self {
            initial_level: 2,
            min_level: 0,
            max_level: 4,
            target_fps: 20.0,
            window: 30,
            lower_ratio: 0.8,
            upper_ratio: 1.2,
        }
    }
}

/// Which way the controller moved on the last decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Adjustment {
    Hold,
    StepDown,
    StepUp,
}

pub struct QualityController {
    levels: Vec<QualityProfile>,
    settings: ControllerSettings,
    current: u8,
    manual: bool,
    /// Frame times of the current adjustment window.
    frame_times: VecDeque<Duration>,
}

impl QualityController {
    /// Builds a controller over a validated level table.
    pub fn new(
        mut levels: Vec<QualityProfile>,
        settings: ControllerSettings,
    ) -> Result<Self, ConfigError> {
        if levels.is_empty() {
            return Err(ConfigError::EmptyLevelTable);
        }
        for (index, profile) in levels.iter_mut().enumerate() {
            profile.validate(index)?;
            profile.level = index as u8;
        }
        let ControllerSettings {
            initial_level,
            min_level,
            max_level,
            ..
        } = settings;
        if min_level > max_level
            || max_level as usize >= levels.len()
            || initial_level < min_level
            || initial_level > max_level
        {
            return Err(ConfigError::InvalidLevelBounds {
                min: min_level,
                max: max_level,
                initial: initial_level,
                len: levels.len(),
            });
        }
        if !(settings.target_fps > 0.0) {
            return Err(ConfigError::InvalidController(
                "target_fps must be positive".to_string(),
            ));
        }
        if settings.window == 0 {
            return Err(ConfigError::InvalidController(
                "window must hold at least one frame".to_string(),
            ));
        }
        if !(settings.lower_ratio > 0.0 && settings.lower_ratio < settings.upper_ratio) {
            return Err(ConfigError::InvalidController(
                "ratios must satisfy 0 < lower_ratio < upper_ratio".to_string(),
            ));
        }
        Ok(Self {
            frame_times: VecDeque::with_capacity(settings.window),
            current: initial_level,
            manual: false,
            levels,
            settings,
        })
    }

    pub fn level(&self) -> u8 {
        self.current
    }

    pub fn is_manual(&self) -> bool {
        self.manual
    }

    /// Profile to use for the next frame.
    pub fn profile(&self) -> &QualityProfile {
        // `current` is kept inside [min_level, max_level], which fits the table.
        &self.levels[self.current as usize]
    }

    /// Records the frame time of one detection and adjusts the level when a full
    /// window has been collected.
    pub fn record(&mut self, frame_time: Duration) -> Adjustment {
        if self.manual {
            return Adjustment::Hold;
        }
        self.frame_times.push_back(frame_time);
        if self.frame_times.len() < self.settings.window {
            return Adjustment::Hold;
        }

        let median_seconds = median(self.frame_times.drain(..).collect()).as_secs_f64();
        let fps = if median_seconds > 0.0 {
            1.0 / median_seconds
        } else {
            f64::INFINITY
        };

        let target = self.settings.target_fps;
        let adjustment = if fps < target * self.settings.lower_ratio
            && self.current > self.settings.min_level
        {
            self.current -= 1;
            Adjustment::StepDown
        } else if fps > target * self.settings.upper_ratio && self.current < self.settings.max_level
        {
            self.current += 1;
            Adjustment::StepUp
        } else {
            Adjustment::Hold
        };
        if adjustment != Adjustment::Hold {
            info!(level = self.current, fps, ?adjustment, "quality level changed");
        }
        adjustment
    }

    /// Pins the level, clamped to the configured bounds. Returns the level in effect.
    pub fn set_manual_level(&mut self, level: u8) -> u8 {
        self.current = level.clamp(self.settings.min_level, self.settings.max_level);
        self.manual = true;
        self.frame_times.clear();
        info!(level = self.current, requested = level, "manual quality override set");
        self.current
    }

    /// Returns control to the automatic adjustment, starting from the pinned level.
    pub fn clear_manual(&mut self) {
        if self.manual {
            self.manual = false;
            self.frame_times.clear();
            info!(level = self.current, "manual quality override cleared");
        }
    }
}

/// Median of a non-empty window; the mean of the two middle values for even sizes.
fn median(mut times: Vec<Duration>) -> Duration {
    times.sort_unstable();
    let middle = times.len() / 2;
    if times.len() % 2 == 0 {
        (times[middle - 1] + times[middle]) / 2
    } else {
        times[middle]
    }
}
