//! Heading and pitch smoothing for the 3D following camera.
//!
//! First-order low-pass filter: each tick closes a fixed fraction of the
//! remaining error, taking the short way round the compass.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::geo_utils::{normalize_degrees, shortest_angle_delta};
use crate::TrackingConfig;

/// Move `prev` towards `target` by `fraction` of the shortest signed difference.
///
/// Result is in [0, 360).
pub fn smooth_heading(prev: f64, target: f64, fraction: f64) -> f64 {
    normalize_degrees(prev + shortest_angle_delta(prev, target) * fraction)
}

/// Per-tick fraction scaled to an arbitrary tick length.
///
/// `base` is the fraction for one `reference` tick; `dt` of two reference
/// ticks closes the same error as two consecutive reference ticks.
pub fn scaled_fraction(base: f64, dt: Duration, reference: Duration) -> f64 {
    if reference.is_zero() {
        return base;
    }
    let ticks = dt.as_secs_f64() / reference.as_secs_f64();
    1.0 - (1.0 - base).powf(ticks)
}

/// Smoothed camera orientation exposed to the renderer.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct CameraOrientation {
    pub heading_deg: f64,
    pub pitch_deg: f64,
}

#[derive(Debug, Clone)]
pub struct CameraOrientationSmoother {
    enabled: bool,
    target_heading: f64,
    smooth_heading: f64,
    target_pitch: f64,
    smooth_pitch: f64,
    factor: f64,
    reference_tick: Duration,
    max_pitch: f64,
}

impl CameraOrientationSmoother {
    pub fn new(config: &TrackingConfig) -> Self {
        Self {
            enabled: false,
            target_heading: 0.0,
            smooth_heading: 0.0,
            target_pitch: 0.0,
            smooth_pitch: 0.0,
            factor: config.camera_smoothing_factor,
            reference_tick: config.camera_reference_tick(),
            max_pitch: config.max_camera_pitch_deg,
        }
    }

    /// One smoothing step from `prev` towards `target` over `dt`.
    pub fn smooth(&self, prev: f64, target: f64, dt: Duration) -> f64 {
        smooth_heading(prev, target, scaled_fraction(self.factor, dt, self.reference_tick))
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Enable or disable 3D following. Disabling zeroes everything so
    /// re-enabling does not swing in from a stale heading.
    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
        if !enabled {
            self.target_heading = 0.0;
            self.smooth_heading = 0.0;
            self.target_pitch = 0.0;
            self.smooth_pitch = 0.0;
        }
    }

    /// Raw device heading in degrees. Ignored while disabled or non-finite.
    pub fn set_target_heading(&mut self, heading_deg: f64) {
        if self.enabled && heading_deg.is_finite() {
            self.target_heading = normalize_degrees(heading_deg);
        }
    }

    pub fn set_target_pitch(&mut self, pitch_deg: f64) {
        if self.enabled && pitch_deg.is_finite() {
            self.target_pitch = pitch_deg.clamp(0.0, self.max_pitch);
        }
    }

    /// Advance by one UI tick of length `dt`.
    pub fn tick(&mut self, dt: Duration) -> CameraOrientation {
        if self.enabled {
            let fraction = scaled_fraction(self.factor, dt, self.reference_tick);
            self.smooth_heading = smooth_heading(self.smooth_heading, self.target_heading, fraction);
            self.smooth_pitch = (self.smooth_pitch
                + (self.target_pitch - self.smooth_pitch) * fraction)
                .clamp(0.0, self.max_pitch);
        }
        self.orientation()
    }

    pub fn orientation(&self) -> CameraOrientation {
        CameraOrientation {
            heading_deg: self.smooth_heading,
            pitch_deg: self.smooth_pitch,
        }
    }

    pub fn target_heading(&self) -> f64 {
        self.target_heading
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TICK: Duration = Duration::from_millis(50);

    fn enabled() -> CameraOrientationSmoother {
        let mut camera = CameraOrientationSmoother::new(&TrackingConfig::default());
        camera.set_enabled(true);
        camera
    }

    #[test]
    fn test_wraps_the_short_way() {
        let next = smooth_heading(350.0, 10.0, 0.15);
        assert!((next - 353.0).abs() < 1e-9);

        let back = smooth_heading(10.0, 350.0, 0.15);
        assert!((back - 7.0).abs() < 1e-9);
    }

    #[test]
    fn test_converges_across_north_without_overshoot() {
        let mut camera = enabled();
        camera.set_target_heading(350.0);
        for _ in 0..200 {
            camera.tick(TICK);
        }
        camera.set_target_heading(10.0);
        let mut previous = camera.orientation().heading_deg;
        for _ in 0..100 {
            let heading = camera.tick(TICK).heading_deg;
            // Distance to the target only shrinks
            assert!(
                shortest_angle_delta(heading, 10.0).abs()
                    <= shortest_angle_delta(previous, 10.0).abs() + 1e-9
            );
            assert!((0.0..360.0).contains(&heading));
            previous = heading;
        }
        assert!(shortest_angle_delta(previous, 10.0).abs() < 0.01);
    }

    #[test]
    fn test_longer_tick_equals_repeated_reference_ticks() {
        let camera = enabled();
        let once = camera.smooth(0.0, 90.0, Duration::from_millis(100));
        let twice = camera.smooth(camera.smooth(0.0, 90.0, TICK), 90.0, TICK);
        assert!((once - twice).abs() < 1e-9);
    }

    #[test]
    fn test_pitch_clamped() {
        let mut camera = enabled();
        camera.set_target_pitch(120.0);
        for _ in 0..500 {
            camera.tick(TICK);
        }
        let pitch = camera.orientation().pitch_deg;
        assert!(pitch <= 85.0);
        assert!(pitch > 84.9);
    }

    #[test]
    fn test_disable_resets_and_freezes() {
        let mut camera = enabled();
        camera.set_target_heading(200.0);
        camera.tick(TICK);
        camera.set_enabled(false);
        assert_eq!(camera.orientation(), CameraOrientation::default());
        assert_eq!(camera.target_heading(), 0.0);

        camera.set_target_heading(90.0);
        assert_eq!(camera.tick(TICK), CameraOrientation::default());
    }
}
