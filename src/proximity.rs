//! Stop geofencing with hysteresis.
//!
//! A stop is entered below the enter radius and only left again at or beyond
//! the (larger) exit radius, so GPS jitter around the boundary does not toggle
//! the state.

use log::debug;
use serde::{Deserialize, Serialize};

use crate::geo_utils::haversine_distance;
use crate::{GeoPoint, RouteStop};

/// Geofence state relative to the route's stops.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ProximityState {
    #[default]
    Outside,
    /// Just entered on the last update
    Entering { stop: usize },
    Inside { stop: usize },
}

impl ProximityState {
    /// The occupied stop, if any.
    pub fn stop(&self) -> Option<usize> {
        match self {
            ProximityState::Outside => None,
            ProximityState::Entering { stop } | ProximityState::Inside { stop } => Some(*stop),
        }
    }

    pub fn is_near(&self) -> bool {
        self.stop().is_some()
    }
}

/// Transition emitted by [`StopProximityDetector::update`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProximityEvent {
    Entered { stop_index: usize },
    Exited { stop_index: usize },
}

#[derive(Debug, Clone)]
pub struct StopProximityDetector {
    state: ProximityState,
    nearest_stop_index: Option<usize>,
    enter_radius_m: f64,
    exit_radius_m: f64,
}

impl StopProximityDetector {
    pub fn new(enter_radius_m: f64, exit_radius_m: f64) -> Self {
        Self {
            state: ProximityState::Outside,
            nearest_stop_index: None,
            enter_radius_m,
            exit_radius_m: exit_radius_m.max(enter_radius_m),
        }
    }

    pub fn state(&self) -> ProximityState {
        self.state
    }

    /// Nearest stop seen on the last update, near or not.
    pub fn nearest_stop_index(&self) -> Option<usize> {
        self.nearest_stop_index
    }

    pub fn is_near_stop(&self) -> bool {
        self.state.is_near()
    }

    /// Evaluate a position against the stops.
    ///
    /// Moving straight from one stop's fence into another's yields an
    /// `Exited` followed by an `Entered`.
    pub fn update(&mut self, position: &GeoPoint, stops: &[RouteStop]) -> Vec<ProximityEvent> {
        let mut events = Vec::new();

        let nearest = stops
            .iter()
            .enumerate()
            .map(|(i, stop)| (i, haversine_distance(position, &stop.point())))
            .min_by(|a, b| a.1.total_cmp(&b.1));
        self.nearest_stop_index = nearest.map(|(i, _)| i);

        if let Some(occupied) = self.state.stop() {
            let switched = matches!(nearest, Some((i, d)) if i != occupied && d < self.enter_radius_m);
            let left = stops
                .get(occupied)
                .map(|stop| haversine_distance(position, &stop.point()) >= self.exit_radius_m)
                .unwrap_or(true);

            if switched || left {
                debug!("[StopProximity] Left stop {}", occupied);
                self.state = ProximityState::Outside;
                events.push(ProximityEvent::Exited {
                    stop_index: occupied,
                });
            } else {
                self.state = ProximityState::Inside { stop: occupied };
                return events;
            }
        }

        if let Some((stop, distance)) = nearest {
            if distance < self.enter_radius_m {
                debug!("[StopProximity] Entered stop {} at {:.1}m", stop, distance);
                self.state = ProximityState::Entering { stop };
                events.push(ProximityEvent::Entered { stop_index: stop });
            }
        }

        events
    }

    pub fn reset(&mut self) {
        self.state = ProximityState::Outside;
        self.nearest_stop_index = None;
    }
}
