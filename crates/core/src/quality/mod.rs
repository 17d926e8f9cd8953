use serde::{Deserialize, Serialize};

/// Discrete post-processing switches. Set by the caller, never auto-tuned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EffectToggles {
    pub bloom: bool,
    pub ssao: bool,
    pub dof: bool,
    pub motion_blur: bool,
    pub taa: bool,
}

impl Default for EffectToggles {
    fn default() -> Self {
        Self {
            bloom: true,
            ssao: false,
            dof: false,
            motion_blur: false,
            taa: true,
        }
    }
}

/// Adjustable rendering-fidelity parameters read by the engine on resize.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct QualityState {
    pub resolution_scale: f32,
    pub multisample_level: u8,
    pub toggles: EffectToggles,
}

impl Default for QualityState {
    fn default() -> Self {
        Self {
            resolution_scale: 1.0,
            multisample_level: 4,
            toggles: EffectToggles::default(),
        }
    }
}

/// Partial update merged into [`QualityState`]; `None` leaves a field as is.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QualityPatch {
    pub resolution_scale: Option<f32>,
    pub multisample_level: Option<u8>,
    pub bloom: Option<bool>,
    pub ssao: Option<bool>,
    pub dof: Option<bool>,
    pub motion_blur: Option<bool>,
    pub taa: Option<bool>,
}

/// Tuning for the deadband controller.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QualityConfig {
    pub target_fps: f32,
    pub min_scale: f32,
    pub max_scale: f32,
    pub step_down: f32,
    pub step_up: f32,
    /// Number of frame times averaged into one fps measurement.
    pub sample_window: usize,
    pub initial: QualityState,
}

impl Default for QualityConfig {
    fn default() -> Self {
        Self {
            target_fps: 60.0,
            min_scale: 0.5,
            max_scale: 1.0,
            step_down: 0.1,
            step_up: 0.05,
            sample_window: 30,
            initial: QualityState::default(),
        }
    }
}

/// Below `target - LOWER_BAND` the scale steps down.
const LOWER_BAND: f32 = 5.0;
/// Above `target + UPPER_BAND` the scale steps up.
const UPPER_BAND: f32 = 10.0;

/// Deadband/hysteresis controller for the continuous resolution scale.
#[derive(Debug, Clone)]
pub struct QualityController {
    config: QualityConfig,
    state: QualityState,
    window_ms: f32,
    window_frames: usize,
}

impl QualityController {
    pub fn new(config: QualityConfig) -> Self {
        let (min_scale, max_scale) = ordered_bounds(config.min_scale, config.max_scale);
        let config = QualityConfig {
            min_scale,
            max_scale,
            sample_window: config.sample_window.max(1),
            ..config
        };
        let mut state = config.initial;
        state.resolution_scale = clamp_scale(state.resolution_scale, min_scale, max_scale);

        Self {
            config,
            state,
            window_ms: 0.0,
            window_frames: 0,
        }
    }

    pub fn state(&self) -> &QualityState {
        &self.state
    }

    pub fn resolution_scale(&self) -> f32 {
        self.state.resolution_scale
    }

    pub fn bounds(&self) -> (f32, f32) {
        (self.config.min_scale, self.config.max_scale)
    }

    /// Feeds one frame time and returns the (possibly updated) scale, always
    /// inside `[min_scale, max_scale]`. Non-positive or non-finite frame times
    /// are ignored.
    pub fn sample(&mut self, delta_ms: f32) -> f32 {
        if !delta_ms.is_finite() || delta_ms <= 0.0 {
            return self.state.resolution_scale;
        }

        self.window_ms += delta_ms;
        self.window_frames += 1;
        if self.window_frames < self.config.sample_window {
            return self.state.resolution_scale;
        }

        let fps = 1000.0 * self.window_frames as f32 / self.window_ms;
        self.window_ms = 0.0;
        self.window_frames = 0;

        let target = self.config.target_fps;
        let current = self.state.resolution_scale;
        let next = if fps < target - LOWER_BAND {
            current - self.config.step_down
        } else if fps > target + UPPER_BAND {
            current + self.config.step_up
        } else {
            current
        };
        let next = clamp_scale(next, self.config.min_scale, self.config.max_scale);

        if (next - current).abs() > f32::EPSILON {
            tracing::debug!(fps, from = current, to = next, "adjusting resolution scale");
        }
        self.state.resolution_scale = next;
        next
    }

    /// Merges an explicit caller update. An explicit scale is clamped to the
    /// configured bounds like any controller step.
    pub fn apply(&mut self, patch: &QualityPatch) -> QualityState {
        let state = &mut self.state;
        if let Some(scale) = patch.resolution_scale {
            state.resolution_scale = clamp_scale(scale, self.config.min_scale, self.config.max_scale);
        }
        if let Some(level) = patch.multisample_level {
            state.multisample_level = level;
        }
        let toggles = &mut state.toggles;
        if let Some(bloom) = patch.bloom {
            toggles.bloom = bloom;
        }
        if let Some(ssao) = patch.ssao {
            toggles.ssao = ssao;
        }
        if let Some(dof) = patch.dof {
            toggles.dof = dof;
        }
        if let Some(motion_blur) = patch.motion_blur {
            toggles.motion_blur = motion_blur;
        }
        if let Some(taa) = patch.taa {
            toggles.taa = taa;
        }
        *state
    }
}

fn ordered_bounds(a: f32, b: f32) -> (f32, f32) {
    let a = if a.is_finite() && a > 0.0 { a } else { 0.1 };
    let b = if b.is_finite() && b > 0.0 { b } else { 1.0 };
    if a <= b {
        (a, b)
    } else {
        (b, a)
    }
}

fn clamp_scale(scale: f32, min: f32, max: f32) -> f32 {
    if scale.is_finite() {
        scale.clamp(min, max)
    } else {
        max
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn per_frame(config: QualityConfig) -> QualityController {
        QualityController::new(QualityConfig {
            sample_window: 1,
            ..config
        })
    }

    fn frame_ms(fps: f32) -> f32 {
        1000.0 / fps
    }

    #[test]
    fn slow_then_fast_frames_walk_down_then_up() {
        let mut controller = per_frame(QualityConfig::default());
        let mut history = Vec::new();
        for fps in [30.0, 30.0, 30.0, 65.0, 65.0, 65.0] {
            history.push(controller.sample(frame_ms(fps)));
        }

        assert!(history[0] < 1.0);
        assert!(history[1] < history[0]);
        assert!(history[2] < history[1]);
        // 65 fps sits inside the deadband at target 60.
        assert_eq!(history[3], history[2]);

        for fps in [90.0; 4] {
            history.push(controller.sample(frame_ms(fps)));
        }
        assert!(history[6] > history[5]);
        assert!(history.iter().all(|scale| (0.5..=1.0).contains(scale)));
    }

    #[test]
    fn scale_never_leaves_bounds() {
        let mut controller = per_frame(QualityConfig::default());
        let times = [1.0, 500.0, 0.0, -3.0, f32::NAN, 16.6, 2.0, 1000.0, f32::INFINITY];
        for _ in 0..50 {
            for ms in times {
                let scale = controller.sample(ms);
                assert!((0.5..=1.0).contains(&scale), "scale {scale} escaped");
            }
        }
    }

    #[test]
    fn floor_and_ceiling_hold_under_sustained_pressure() {
        let mut controller = per_frame(QualityConfig::default());
        for _ in 0..100 {
            controller.sample(frame_ms(10.0));
        }
        assert_eq!(controller.resolution_scale(), 0.5);

        for _ in 0..100 {
            controller.sample(frame_ms(240.0));
        }
        assert_eq!(controller.resolution_scale(), 1.0);
    }

    #[test]
    fn averages_over_the_sample_window() {
        let mut controller = QualityController::new(QualityConfig {
            sample_window: 3,
            ..QualityConfig::default()
        });
        assert_eq!(controller.sample(frame_ms(20.0)), 1.0);
        assert_eq!(controller.sample(frame_ms(20.0)), 1.0);
        assert!(controller.sample(frame_ms(20.0)) < 1.0);
    }

    #[test]
    fn explicit_patch_merges_and_clamps() {
        let mut controller = per_frame(QualityConfig::default());
        let state = controller.apply(&QualityPatch {
            resolution_scale: Some(4.0),
            bloom: Some(false),
            ssao: Some(true),
            ..Default::default()
        });

        assert_eq!(state.resolution_scale, 1.0);
        assert!(!state.toggles.bloom);
        assert!(state.toggles.ssao);
        assert!(state.toggles.taa);
        assert_eq!(state.multisample_level, 4);
    }

    #[test]
    fn swapped_bounds_are_reordered() {
        let controller = QualityController::new(QualityConfig {
            min_scale: 1.5,
            max_scale: 0.75,
            ..QualityConfig::default()
        });
        assert_eq!(controller.bounds(), (0.75, 1.5));
        assert_eq!(controller.resolution_scale(), 1.0);
    }
}
