//! # Navigation State Machine
//!
//! Maps the current location onto the ordered segment/step structure of the
//! active route and derives what the user sees and hears:
//! - the current instruction and distance to it
//! - a bearing towards the next step (hidden when there is none)
//! - the "next stop" message
//!
//! ## Matching
//!
//! All steps are flattened into one ordered list. Only steps at or after the
//! current progress are candidates, so progress never regresses. The nearest
//! candidate (by its starting geometry point) becomes the target. Coming
//! within the completion radius of the target moves progress past it.

use log::{debug, info};
use serde::{Deserialize, Serialize};

use crate::geo_utils::{haversine_distance, initial_bearing};
use crate::{ActiveRoute, GeoPoint, LocationSample};

/// Text-to-speech output. Fire-and-forget.
pub trait SpeechService: Send {
    fn speak(&mut self, text: &str);
}

/// High-level navigation state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NavigationState {
    NoRoute,
    Navigating,
    Arrived,
}

/// Progress along the active route.
///
/// `current_segment_index` never decreases within a route;
/// `current_step_index` resets to 0 whenever the segment advances.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NavigationProgress {
    pub current_segment_index: usize,
    pub current_step_index: usize,
    pub nearest_stop_index: Option<usize>,
    pub is_near_stop: bool,
    pub last_spoken_instruction: Option<String>,
    pub last_spoken_stop_message: Option<String>,
}

/// Derived values shown to the user.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NavigationDisplay {
    pub instruction: Option<String>,
    pub distance_to_step_m: Option<f64>,
    /// Degrees [0, 360); `None` hides the direction indicator
    pub bearing_deg: Option<f64>,
    pub next_stop_message: Option<String>,
}

/// Result of a single location update.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct NavigationUpdate {
    /// Progress moved past a step
    pub advanced: bool,
    /// Terminal step reached on this update
    pub arrived: bool,
}

/// A step with its position in the route.
#[derive(Debug, Clone, Copy)]
struct FlatStep<'a> {
    segment_index: usize,
    step_index: usize,
    instruction: &'a str,
    start: Option<GeoPoint>,
}

fn flatten_steps(route: &ActiveRoute) -> Vec<FlatStep<'_>> {
    route
        .segments
        .iter()
        .enumerate()
        .flat_map(|(segment_index, segment)| {
            segment
                .steps
                .iter()
                .enumerate()
                .map(move |(step_index, step)| FlatStep {
                    segment_index,
                    step_index,
                    instruction: step.instruction.as_str(),
                    start: route.step_start(step),
                })
        })
        .collect()
}

/// Turn-by-turn progress tracker for one route at a time.
#[derive(Debug, Clone)]
pub struct NavigationStateMachine {
    state: NavigationState,
    route_id: Option<String>,
    progress: NavigationProgress,
    display: NavigationDisplay,
    speech_enabled: bool,
    completion_radius_m: f64,
}

impl NavigationStateMachine {
    pub fn new(completion_radius_m: f64) -> Self {
        Self {
            state: NavigationState::NoRoute,
            route_id: None,
            progress: NavigationProgress::default(),
            display: NavigationDisplay::default(),
            speech_enabled: false,
            completion_radius_m,
        }
    }

    pub fn state(&self) -> NavigationState {
        self.state
    }

    pub fn progress(&self) -> &NavigationProgress {
        &self.progress
    }

    pub fn display(&self) -> &NavigationDisplay {
        &self.display
    }

    pub fn set_speech_enabled(&mut self, enabled: bool) {
        self.speech_enabled = enabled;
    }

    pub fn speech_enabled(&self) -> bool {
        self.speech_enabled
    }

    /// Start navigating `route`.
    ///
    /// A different route identity resets progress and spoken memory; setting
    /// the same route again keeps progress.
    pub fn set_route(&mut self, route: &ActiveRoute) {
        if self.route_id.as_deref() != Some(route.id.as_str()) {
            info!("[Navigation] New route '{}', resetting progress", route.id);
            self.progress = NavigationProgress::default();
            self.display = NavigationDisplay::default();
            self.route_id = Some(route.id.clone());
        }
        self.state = NavigationState::Navigating;
        self.refresh_arrival(route);
        self.display.next_stop_message = Some(self.next_stop_message(route));
    }

    /// Back to `NoRoute`, forgetting all progress.
    pub fn clear(&mut self) {
        self.state = NavigationState::NoRoute;
        self.route_id = None;
        self.progress = NavigationProgress::default();
        self.display = NavigationDisplay::default();
    }

    /// Match a location sample against the route.
    pub fn update(
        &mut self,
        sample: &LocationSample,
        route: &ActiveRoute,
        speech: &mut dyn SpeechService,
    ) -> NavigationUpdate {
        let mut result = NavigationUpdate::default();
        if self.state != NavigationState::Navigating {
            return result;
        }

        let here = sample.point();
        let current = (
            self.progress.current_segment_index,
            self.progress.current_step_index,
        );

        let steps = flatten_steps(route);
        let target = steps
            .iter()
            .filter(|s| (s.segment_index, s.step_index) >= current)
            .filter_map(|s| s.start.map(|start| (s, start, haversine_distance(&here, &start))))
            .min_by(|a, b| a.2.total_cmp(&b.2));

        let Some((target, start, distance)) = target else {
            self.display.instruction = None;
            self.display.distance_to_step_m = None;
            self.display.bearing_deg = None;
            return result;
        };

        self.display.instruction = Some(target.instruction.to_string());
        self.display.distance_to_step_m = Some(distance);
        self.display.bearing_deg = Some(initial_bearing(&here, &start));

        if self.speech_enabled
            && self.progress.last_spoken_instruction.as_deref() != Some(target.instruction)
        {
            speech.speak(target.instruction);
            self.progress.last_spoken_instruction = Some(target.instruction.to_string());
        }

        if distance < self.completion_radius_m {
            let reached = (target.segment_index, target.step_index);
            // Segments without steps are skipped over
            let next = steps
                .iter()
                .map(|s| (s.segment_index, s.step_index))
                .find(|&position| position > reached);

            match next {
                Some((segment_index, step_index)) => {
                    self.set_position(segment_index, step_index);
                    result.advanced = true;
                }
                None => {
                    // Terminal step: hold position
                    self.set_position(reached.0, reached.1);
                    self.state = NavigationState::Arrived;
                    result.arrived = true;
                    info!("[Navigation] Final instruction reached on route {:?}", self.route_id);
                }
            }

            if result.advanced {
                debug!(
                    "[Navigation] Advanced to segment {} step {}",
                    self.progress.current_segment_index, self.progress.current_step_index
                );
                self.display.next_stop_message = Some(self.next_stop_message(route));
            }
        }

        result
    }

    /// Jump to a physically reached stop.
    ///
    /// Arriving at stop `i` starts segment `i`. Only moves forward: re-entering
    /// the stop of the current segment keeps the step, and stops behind are
    /// ignored. Returns true if progress changed.
    pub fn snap_to_stop(&mut self, stop_index: usize, route: &ActiveRoute) -> bool {
        if self.state != NavigationState::Navigating
            || stop_index <= self.progress.current_segment_index
        {
            return false;
        }
        self.set_position(stop_index, 0);
        self.refresh_arrival(route);
        true
    }

    /// Record proximity state and refresh (and possibly speak) the stop message.
    pub fn set_stop_proximity(
        &mut self,
        nearest_stop_index: Option<usize>,
        is_near_stop: bool,
        route: &ActiveRoute,
        speech: &mut dyn SpeechService,
    ) {
        self.progress.nearest_stop_index = nearest_stop_index;
        self.progress.is_near_stop = is_near_stop;

        let message = self.next_stop_message(route);
        if is_near_stop
            && self.speech_enabled
            && self.progress.last_spoken_stop_message.as_deref() != Some(message.as_str())
        {
            speech.speak(&message);
            self.progress.last_spoken_stop_message = Some(message.clone());
        }
        self.display.next_stop_message = Some(message);
    }

    /// Message describing the upcoming (or current) stop.
    pub fn next_stop_message(&self, route: &ActiveRoute) -> String {
        if self.progress.is_near_stop {
            if let Some(stop) = self
                .progress
                .nearest_stop_index
                .and_then(|i| route.stops.get(i))
            {
                return format!("Arrived at {}", stop.name);
            }
        }
        match route.stops.get(self.progress.current_segment_index + 1) {
            Some(stop) => format!("Next stop: {}", stop.name),
            None => "Final destination reached".to_string(),
        }
    }

    fn set_position(&mut self, segment_index: usize, step_index: usize) {
        self.progress.current_segment_index = segment_index;
        self.progress.current_step_index = step_index;
    }

    /// A segment index past the last segment means the destination was reached.
    fn refresh_arrival(&mut self, route: &ActiveRoute) {
        if self.state == NavigationState::Navigating
            && self.progress.current_segment_index >= route.destination_index()
        {
            self.state = NavigationState::Arrived;
            self.display.instruction = None;
            self.display.distance_to_step_m = None;
            self.display.bearing_deg = None;
            info!("[Navigation] Destination stop reached on route {:?}", self.route_id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{RouteSegment, RouteStep, RouteStop, TransportMode};
    use chrono::{Duration, TimeZone, Utc};
    use geo::{Coord, LineString};

    #[derive(Default)]
    struct RecordingSpeech {
        spoken: Vec<String>,
    }

    impl SpeechService for RecordingSpeech {
        fn speak(&mut self, text: &str) {
            self.spoken.push(text.to_string());
        }
    }

    /// Straight north-going route: geometry vertex i at lat 47.0 + i * 0.001
    /// (about 111 m apart). Two stops, one segment, three steps.
    fn route(id: &str) -> ActiveRoute {
        let geometry: LineString<f64> = (0..5)
            .map(|i| Coord {
                x: 8.0,
                y: 47.0 + i as f64 * 0.001,
            })
            .collect::<Vec<_>>()
            .into();
        let step = |text: &str, a: usize, b: usize| RouteStep {
            instruction: text.to_string(),
            distance_m: 111.0 * (b - a) as f64,
            duration_s: 80.0,
            way_points: (a, b),
        };
        ActiveRoute {
            id: id.to_string(),
            owner_user_id: "u".to_string(),
            mode: TransportMode::Walking,
            stops: vec![
                RouteStop::new(47.000, 8.0, "Start"),
                RouteStop::new(47.004, 8.0, "End"),
            ],
            segments: vec![RouteSegment {
                distance_m: 444.0,
                duration_s: 320.0,
                steps: vec![
                    step("Head north", 0, 2),
                    step("Keep left", 2, 4),
                    step("Arrive at End", 4, 4),
                ],
            }],
            geometry,
            created_at: Utc.with_ymd_and_hms(2024, 5, 1, 8, 0, 0).unwrap(),
            instructions_available: true,
        }
    }

    fn at(lat: f64, seconds: i64) -> LocationSample {
        let t0 = Utc.with_ymd_and_hms(2024, 5, 1, 8, 0, 0).unwrap();
        LocationSample::new(lat, 8.0, 5.0, t0 + Duration::seconds(seconds))
    }

    #[test]
    fn test_set_route_enters_navigating() {
        let r = route("r1");
        let mut nav = NavigationStateMachine::new(30.0);
        assert_eq!(nav.state(), NavigationState::NoRoute);
        nav.set_route(&r);
        assert_eq!(nav.state(), NavigationState::Navigating);
        assert_eq!(nav.display().next_stop_message.as_deref(), Some("Next stop: End"));

        nav.clear();
        assert_eq!(nav.state(), NavigationState::NoRoute);
    }

    #[test]
    fn test_publishes_nearest_step_and_bearing() {
        let r = route("r1");
        let mut nav = NavigationStateMachine::new(30.0);
        let mut speech = RecordingSpeech::default();
        nav.set_route(&r);

        // 0.0009 deg south of the start: ~100 m, due north
        let update = nav.update(&at(46.9991, 0), &r, &mut speech);
        assert!(!update.advanced);
        assert_eq!(nav.display().instruction.as_deref(), Some("Head north"));
        let distance = nav.display().distance_to_step_m.unwrap();
        assert!((distance - 100.0).abs() < 1.0);
        assert!(nav.display().bearing_deg.unwrap().abs() < 0.01);
    }

    #[test]
    fn test_advances_within_completion_radius_and_never_regresses() {
        let r = route("r1");
        let mut nav = NavigationStateMachine::new(30.0);
        let mut speech = RecordingSpeech::default();
        nav.set_route(&r);

        assert!(nav.update(&at(47.0, 0), &r, &mut speech).advanced);
        assert_eq!(nav.progress().current_step_index, 1);

        // Back at the start: step 0 is no longer a candidate
        let update = nav.update(&at(47.0, 10), &r, &mut speech);
        assert!(!update.advanced);
        assert_eq!(nav.progress().current_step_index, 1);
        assert_eq!(nav.display().instruction.as_deref(), Some("Keep left"));
    }

    #[test]
    fn test_terminal_step_holds_and_arrives() {
        let r = route("r1");
        let mut nav = NavigationStateMachine::new(30.0);
        let mut speech = RecordingSpeech::default();
        nav.set_route(&r);

        nav.update(&at(47.002, 0), &r, &mut speech);
        assert_eq!(nav.progress().current_step_index, 2);

        let update = nav.update(&at(47.004, 10), &r, &mut speech);
        assert!(update.arrived);
        assert_eq!(nav.state(), NavigationState::Arrived);
        assert_eq!(nav.progress().current_step_index, 2);

        // Further updates are ignored once arrived
        assert_eq!(nav.update(&at(47.0, 20), &r, &mut speech), NavigationUpdate::default());
    }

    #[test]
    fn test_speech_not_repeated_for_same_instruction() {
        let r = route("r1");
        let mut nav = NavigationStateMachine::new(30.0);
        let mut speech = RecordingSpeech::default();
        nav.set_route(&r);
        nav.set_speech_enabled(true);

        for i in 0..5 {
            nav.update(&at(46.9990 + i as f64 * 0.00001, i), &r, &mut speech);
        }
        assert_eq!(speech.spoken, vec!["Head north".to_string()]);
    }

    #[test]
    fn test_route_change_resets_progress() {
        let r1 = route("r1");
        let r2 = route("r2");
        let mut nav = NavigationStateMachine::new(30.0);
        let mut speech = RecordingSpeech::default();
        nav.set_route(&r1);
        nav.set_speech_enabled(true);
        nav.update(&at(47.0, 0), &r1, &mut speech);
        assert_eq!(nav.progress().current_step_index, 1);

        // Same route again keeps progress
        nav.set_route(&r1);
        assert_eq!(nav.progress().current_step_index, 1);

        nav.set_route(&r2);
        assert_eq!(nav.progress(), &NavigationProgress::default());
    }

    #[test]
    fn test_no_valid_target_hides_bearing() {
        let mut r = route("r1");
        for step in &mut r.segments[0].steps {
            step.way_points = (100, 100);
        }
        let mut nav = NavigationStateMachine::new(30.0);
        let mut speech = RecordingSpeech::default();
        nav.set_route(&r);
        nav.update(&at(47.0, 0), &r, &mut speech);
        assert_eq!(nav.display().bearing_deg, None);
        assert_eq!(nav.display().instruction, None);
    }

    #[test]
    fn test_snap_to_destination_stop_arrives() {
        let r = route("r1");
        let mut nav = NavigationStateMachine::new(30.0);
        nav.set_route(&r);
        assert!(nav.snap_to_stop(1, &r));
        assert_eq!(nav.state(), NavigationState::Arrived);
        assert_eq!(nav.progress().current_segment_index, 1);
    }

    #[test]
    fn test_snap_to_current_stop_keeps_step() {
        let r = route("r1");
        let mut nav = NavigationStateMachine::new(30.0);
        let mut speech = RecordingSpeech::default();
        nav.set_route(&r);
        nav.update(&at(47.0, 0), &r, &mut speech);

        assert!(!nav.snap_to_stop(0, &r));
        assert_eq!(nav.progress().current_step_index, 1);
    }

    #[test]
    fn test_empty_last_segment_arrives_on_last_real_step() {
        let mut r = route("r1");
        r.stops.push(RouteStop::new(47.005, 8.0, "Beyond"));
        r.segments.push(RouteSegment {
            distance_m: 111.0,
            duration_s: 80.0,
            steps: Vec::new(),
        });
        let mut nav = NavigationStateMachine::new(30.0);
        let mut speech = RecordingSpeech::default();
        nav.set_route(&r);

        nav.update(&at(47.002, 0), &r, &mut speech);
        let update = nav.update(&at(47.004, 10), &r, &mut speech);
        assert!(update.arrived);
        assert!(!update.advanced);
        assert_eq!(nav.state(), NavigationState::Arrived);
        assert_eq!(nav.progress().current_segment_index, 0);
        assert_eq!(nav.progress().current_step_index, 2);
        assert_eq!(nav.display().instruction.as_deref(), Some("Arrive at End"));
    }

    #[test]
    fn test_stop_message_spoken_once() {
        let r = route("r1");
        let mut nav = NavigationStateMachine::new(30.0);
        let mut speech = RecordingSpeech::default();
        nav.set_route(&r);
        nav.set_speech_enabled(true);

        nav.set_stop_proximity(Some(0), true, &r, &mut speech);
        nav.set_stop_proximity(Some(0), true, &r, &mut speech);
        assert_eq!(speech.spoken, vec!["Arrived at Start".to_string()]);

        nav.set_stop_proximity(Some(0), false, &r, &mut speech);
        assert_eq!(nav.display().next_stop_message.as_deref(), Some("Next stop: End"));
    }
}
