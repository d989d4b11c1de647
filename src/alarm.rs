//! # Stop Alarms
//!
//! Fires once per stop when the user comes within the mode's alarm radius.
//! What the user gets depends on the screen they are looking at:
//! on the live map a system notification is enough, anywhere else an in-app
//! modal is raised that must be dismissed.
//!
//! Suppression is keyed by stop name and lifts only once the user is
//! `alarm_release_factor` thresholds away from that same stop.

use log::{info, warn};
use serde::{Deserialize, Serialize};

use crate::geo_utils::haversine_distance;
use crate::store::{load_json, save_json, ALARM_ENABLED_KEY};
use crate::{ActiveRoute, AlarmThresholds, GeoPoint, KeyValueStore, Result, TrackingConfig};

/// System notification sink. Best effort.
pub trait NotificationService: Send {
    fn notify(&mut self, title: &str, body: &str) -> Result<()>;
}

/// Screen currently shown by the host app.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScreenContext {
    /// Live map with the user's position visible
    LiveMap,
    #[default]
    Other,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlarmKind {
    Modal,
    Notification,
}

/// A dispatched alarm.
#[derive(Debug, Clone, PartialEq)]
pub struct AlarmEvent {
    pub stop_index: usize,
    pub stop_name: String,
    pub kind: AlarmKind,
    pub distance_m: f64,
}

/// Suppression for the most recently alarmed stop.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum Suppression {
    #[default]
    Armed,
    Suppressed { stop_index: usize, stop_name: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlarmState {
    pub enabled: bool,
    pub suppression: Suppression,
    pub pending_modal_visible: bool,
}

impl Default for AlarmState {
    fn default() -> Self {
        Self {
            enabled: true,
            suppression: Suppression::Armed,
            pending_modal_visible: false,
        }
    }
}

impl AlarmState {
    pub fn last_alarmed_stop_name(&self) -> Option<&str> {
        match &self.suppression {
            Suppression::Armed => None,
            Suppression::Suppressed { stop_name, .. } => Some(stop_name.as_str()),
        }
    }
}

#[derive(Debug, Clone)]
pub struct AlarmDispatcher {
    state: AlarmState,
    thresholds: AlarmThresholds,
    release_factor: f64,
    screen: ScreenContext,
}

impl AlarmDispatcher {
    pub fn new(config: &TrackingConfig) -> Self {
        Self {
            state: AlarmState::default(),
            thresholds: config.alarm_thresholds,
            release_factor: config.alarm_release_factor,
            screen: ScreenContext::Other,
        }
    }

    pub fn state(&self) -> &AlarmState {
        &self.state
    }

    pub fn is_enabled(&self) -> bool {
        self.state.enabled
    }

    pub fn screen_context(&self) -> ScreenContext {
        self.screen
    }

    pub fn set_screen_context(&mut self, screen: ScreenContext) {
        self.screen = screen;
    }

    /// Alarm radius for the route's transport mode.
    pub fn threshold_for(&self, route: &ActiveRoute) -> f64 {
        self.thresholds.for_mode(&route.mode)
    }

    /// Read the persisted enabled flag. An absent key keeps the current value.
    pub fn load_enabled(&mut self, store: &dyn KeyValueStore) -> Result<()> {
        if let Some(enabled) = load_json::<bool>(store, ALARM_ENABLED_KEY)? {
            self.state.enabled = enabled;
        }
        Ok(())
    }

    /// Toggle alarms and write the flag through.
    ///
    /// The in-memory flag changes even if the write fails.
    pub fn set_enabled(&mut self, enabled: bool, store: &mut dyn KeyValueStore) -> Result<()> {
        self.state.enabled = enabled;
        info!("[AlarmDispatcher] Alarms {}", if enabled { "enabled" } else { "disabled" });
        save_json(store, ALARM_ENABLED_KEY, &enabled)
    }

    pub fn dismiss_modal(&mut self) {
        self.state.pending_modal_visible = false;
    }

    /// Evaluate a position. Returns the alarm dispatched on this update, if any.
    pub fn update(
        &mut self,
        position: &GeoPoint,
        route: &ActiveRoute,
        notifier: &mut dyn NotificationService,
    ) -> Option<AlarmEvent> {
        if !self.state.enabled {
            return None;
        }
        let threshold = self.threshold_for(route);

        if let Suppression::Suppressed { stop_index, .. } = &self.state.suppression {
            let released = match route.stop_point(*stop_index) {
                Some(stop) => haversine_distance(position, &stop) > threshold * self.release_factor,
                None => true,
            };
            if released {
                info!("[AlarmDispatcher] Stop {} re-armed", stop_index);
                self.state.suppression = Suppression::Armed;
            }
        }

        let last_name = self.state.last_alarmed_stop_name();
        let (stop_index, stop, distance_m) = route
            .stops
            .iter()
            .enumerate()
            .skip(1)
            .map(|(i, stop)| (i, stop, haversine_distance(position, &stop.point())))
            .find(|(_, stop, d)| *d <= threshold && last_name != Some(stop.name.as_str()))?;

        let kind = match self.screen {
            ScreenContext::LiveMap => AlarmKind::Notification,
            ScreenContext::Other => AlarmKind::Modal,
        };

        match kind {
            AlarmKind::Notification => {
                let title = format!("Approaching {}", stop.name);
                let body = format!("You are {:.0} m from {}", distance_m, stop.name);
                if let Err(e) = notifier.notify(&title, &body) {
                    warn!("[AlarmDispatcher] Notification for '{}' failed: {}", stop.name, e);
                }
            }
            AlarmKind::Modal => self.state.pending_modal_visible = true,
        }

        info!(
            "[AlarmDispatcher] {:?} alarm for stop {} '{}' at {:.1}m",
            kind, stop_index, stop.name, distance_m
        );
        self.state.suppression = Suppression::Suppressed {
            stop_index,
            stop_name: stop.name.clone(),
        };

        Some(AlarmEvent {
            stop_index,
            stop_name: stop.name.clone(),
            kind,
            distance_m,
        })
    }

    /// Clear suppression and any pending modal. The enabled flag is kept.
    pub fn reset(&mut self) {
        self.state.suppression = Suppression::Armed;
        self.state.pending_modal_visible = false;
    }
}
