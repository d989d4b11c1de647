//! Tunables for tracking, navigation, proximity and alarms.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{Result, TrackingError, TransportMode};

/// Subscription fidelity requested from the location provider.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LocationRequest {
    /// Minimum time between fixes in milliseconds
    pub interval_ms: u64,
    /// Minimum movement between fixes in meters
    pub distance_interval_m: f64,
}

impl LocationRequest {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}

/// Per-mode alarm radii in meters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AlarmThresholds {
    pub walking: f64,
    pub hiking: f64,
    pub cycling: f64,
    pub driving: f64,
    /// Used for modes the app does not recognise
    pub fallback: f64,
}

impl Default for AlarmThresholds {
    fn default() -> Self {
        Self {
            walking: 50.0,
            hiking: 100.0,
            cycling: 100.0,
            driving: 200.0,
            fallback: 100.0,
        }
    }
}

impl AlarmThresholds {
    /// Alarm radius for a transport mode.
    pub fn for_mode(&self, mode: &TransportMode) -> f64 {
        match mode {
            TransportMode::Walking => self.walking,
            TransportMode::Hiking => self.hiking,
            TransportMode::Cycling => self.cycling,
            TransportMode::Driving => self.driving,
            TransportMode::Unknown => self.fallback,
        }
    }
}

/// Configuration for the tracking engine.
///
/// Every field has a default, so partial JSON objects deserialize cleanly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackingConfig {
    /// Distance to a step's start point under which the step counts as done.
    /// Default: 30.0 meters
    pub completion_radius_m: f64,

    /// Distance under which the user enters "near stop".
    /// Default: 100.0 meters
    pub stop_enter_radius_m: f64,

    /// Distance at or beyond which the user leaves "near stop".
    /// Must be >= the enter radius. Default: 120.0 meters
    pub stop_exit_radius_m: f64,

    /// Alarm radius per transport mode.
    pub alarm_thresholds: AlarmThresholds,

    /// Alarm suppression lifts once the user is this many thresholds away.
    /// Default: 1.5
    pub alarm_release_factor: f64,

    /// On resume, the first sample adds no distance if it is more than this
    /// many seconds newer than the persisted last sample.
    /// Default: 0 (the first resumed sample never adds distance)
    pub resume_staleness_secs: u64,

    /// Samples with a worse accuracy radius are ignored. Default: None
    pub max_sample_accuracy_m: Option<f64>,

    /// Fraction of the remaining heading error closed per reference tick.
    /// Default: 0.15
    pub camera_smoothing_factor: f64,

    /// Tick length the smoothing factor is expressed against. Default: 50 ms
    pub camera_reference_tick_ms: u64,

    /// Upper bound for the smoothed camera pitch. Default: 85 degrees
    pub max_camera_pitch_deg: f64,

    /// Elapsed-time refresh period. Default: 1000 ms
    pub timer_tick_ms: u64,

    /// Foreground subscription. Default: 1 s / 5 m
    pub foreground_request: LocationRequest,

    /// Background subscription. Default: 10 s / 20 m
    pub background_request: LocationRequest,
}

impl Default for TrackingConfig {
    fn default() -> Self {
        Self {
            completion_radius_m: 30.0,
            stop_enter_radius_m: 100.0,
            stop_exit_radius_m: 120.0,
            alarm_thresholds: AlarmThresholds::default(),
            alarm_release_factor: 1.5,
            resume_staleness_secs: 0,
            max_sample_accuracy_m: None,
            camera_smoothing_factor: 0.15,
            camera_reference_tick_ms: 50,
            max_camera_pitch_deg: 85.0,
            timer_tick_ms: 1000,
            foreground_request: LocationRequest {
                interval_ms: 1000,
                distance_interval_m: 5.0,
            },
            background_request: LocationRequest {
                interval_ms: 10_000,
                distance_interval_m: 20.0,
            },
        }
    }
}

impl TrackingConfig {
    /// Parse a (possibly partial) JSON config and validate it.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: TrackingConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Alarm radius for a transport mode.
    pub fn alarm_threshold(&self, mode: &TransportMode) -> f64 {
        self.alarm_thresholds.for_mode(mode)
    }

    pub fn resume_staleness(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.resume_staleness_secs as i64)
    }

    pub fn camera_reference_tick(&self) -> Duration {
        Duration::from_millis(self.camera_reference_tick_ms)
    }

    pub fn timer_tick(&self) -> chrono::Duration {
        chrono::Duration::milliseconds(self.timer_tick_ms as i64)
    }

    /// Reject values that would break the state machines.
    pub fn validate(&self) -> Result<()> {
        let positive = [
            ("completion_radius_m", self.completion_radius_m),
            ("stop_enter_radius_m", self.stop_enter_radius_m),
            ("stop_exit_radius_m", self.stop_exit_radius_m),
            ("alarm_thresholds.walking", self.alarm_thresholds.walking),
            ("alarm_thresholds.hiking", self.alarm_thresholds.hiking),
            ("alarm_thresholds.cycling", self.alarm_thresholds.cycling),
            ("alarm_thresholds.driving", self.alarm_thresholds.driving),
            ("alarm_thresholds.fallback", self.alarm_thresholds.fallback),
        ];
        for (name, value) in positive {
            if !(value.is_finite() && value > 0.0) {
                return Err(TrackingError::Config {
                    message: format!("{} must be a positive distance, got {}", name, value),
                });
            }
        }

        if self.stop_exit_radius_m < self.stop_enter_radius_m {
            return Err(TrackingError::Config {
                message: format!(
                    "stop_exit_radius_m ({}) must not be below stop_enter_radius_m ({})",
                    self.stop_exit_radius_m, self.stop_enter_radius_m
                ),
            });
        }

        if self.alarm_release_factor < 1.0 {
            return Err(TrackingError::Config {
                message: format!(
                    "alarm_release_factor must be >= 1.0, got {}",
                    self.alarm_release_factor
                ),
            });
        }

        if !(self.camera_smoothing_factor > 0.0 && self.camera_smoothing_factor <= 1.0) {
            return Err(TrackingError::Config {
                message: format!(
                    "camera_smoothing_factor must be in (0, 1], got {}",
                    self.camera_smoothing_factor
                ),
            });
        }

        if self.camera_reference_tick_ms == 0 || self.timer_tick_ms == 0 {
            return Err(TrackingError::Config {
                message: "tick periods must be non-zero".to_string(),
            });
        }

        Ok(())
    }
}
