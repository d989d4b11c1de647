//! # Tracking Engine
//!
//! Session object that owns the active route, every tracking subsystem and
//! the platform collaborators. Hosts drive it from two sources:
//! - location samples, drained from the merged queue by [`TrackingEngine::pump`]
//! - a fixed-rate UI tick, [`TrackingEngine::on_tick`]
//!
//! Everything runs on the caller's thread; providers on other threads only
//! touch the `Send` [`LocationFeed`].
//!
//! ## Per-sample pipeline
//!
//! accumulate -> persist -> proximity -> navigation -> alarm
//!
//! Samples the accumulator rejects (duplicates, out-of-order, inaccurate) stop
//! the pipeline, so redelivery never double-counts or re-alarms.
//!
//! ## Failure handling
//!
//! No error is fatal. Location, persistence and notification failures are
//! logged and reflected as degraded flags in the [`NavigationSnapshot`].

use std::time::Duration;

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

use crate::camera::CameraOrientation;
use crate::{
    ActiveRoute, AlarmDispatcher, AlarmEvent, CameraOrientationSmoother, Clock,
    DistanceAccumulator, KeyValueStore, LocationFeed, LocationProvider, LocationSource,
    LocationStatus, LocationStreamManager, NavigationState, NavigationStateMachine,
    NotificationService, ProximityEvent, Result, RouteSessionTimer, SampleOutcome, ScreenContext,
    SourcedSample, SpeechService, StopProximityDetector, TrackingConfig, TrackingError,
    TrackingSession,
};

// ============================================================================
// Core Types
// ============================================================================

/// Platform services the engine talks to.
pub struct Collaborators {
    pub provider: Box<dyn LocationProvider>,
    pub store: Box<dyn KeyValueStore>,
    pub notifier: Box<dyn NotificationService>,
    pub speech: Box<dyn SpeechService>,
    pub clock: Box<dyn Clock>,
}

/// Things that happened while processing input.
#[derive(Debug, Clone, PartialEq)]
pub enum TrackingEvent {
    DistanceUpdated { cumulative_distance_m: f64 },
    StepAdvanced { segment_index: usize, step_index: usize },
    StopEntered { stop_index: usize },
    StopExited { stop_index: usize },
    Arrived,
    Alarm(AlarmEvent),
    LocationUnavailable { reason: String },
    PersistenceFailed { message: String },
}

/// Read-only derived values for the presentation layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NavigationSnapshot {
    pub route_id: Option<String>,
    pub state: NavigationState,
    pub instruction: Option<String>,
    pub next_stop_text: Option<String>,
    pub distance_to_step_m: Option<f64>,
    pub cumulative_distance_m: f64,
    pub elapsed_s: u64,
    /// `None` hides the direction indicator
    pub bearing_deg: Option<f64>,
    pub camera_heading_deg: f64,
    pub camera_pitch_deg: f64,
    pub alarm_modal_visible: bool,
    pub location_available: bool,
    pub instructions_available: bool,
    pub persistence_healthy: bool,
}

impl NavigationSnapshot {
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

// ============================================================================
// Tracking Engine
// ============================================================================

pub struct TrackingEngine {
    config: TrackingConfig,
    route: Option<ActiveRoute>,
    session: Option<TrackingSession>,

    // Subsystems
    stream: LocationStreamManager,
    accumulator: DistanceAccumulator,
    timer: RouteSessionTimer,
    navigation: NavigationStateMachine,
    proximity: StopProximityDetector,
    alarms: AlarmDispatcher,
    camera: CameraOrientationSmoother,

    // Collaborators
    store: Box<dyn KeyValueStore>,
    notifier: Box<dyn NotificationService>,
    speech: Box<dyn SpeechService>,
    clock: Box<dyn Clock>,

    // Degraded-state tracking
    persistence_healthy: bool,
    unavailable_reported: bool,
}

impl TrackingEngine {
    /// Build the engine and load persisted state.
    ///
    /// The stored session and alarm flag are read here, before any sample
    /// can be processed.
    pub fn new(config: TrackingConfig, collaborators: Collaborators) -> Self {
        let Collaborators {
            provider,
            store,
            notifier,
            speech,
            clock,
        } = collaborators;

        let mut engine = Self {
            stream: LocationStreamManager::new(
                provider,
                config.foreground_request,
                config.background_request,
            ),
            accumulator: DistanceAccumulator::new(&config),
            timer: RouteSessionTimer::new(),
            navigation: NavigationStateMachine::new(config.completion_radius_m),
            proximity: StopProximityDetector::new(
                config.stop_enter_radius_m,
                config.stop_exit_radius_m,
            ),
            alarms: AlarmDispatcher::new(&config),
            camera: CameraOrientationSmoother::new(&config),
            config,
            route: None,
            session: None,
            store,
            notifier,
            speech,
            clock,
            persistence_healthy: true,
            unavailable_reported: false,
        };

        match TrackingSession::load(engine.store.as_ref()) {
            Ok(Some(session)) if session.is_active => {
                info!(
                    "[TrackingEngine] Found active session for route {:?} ({:.1}m)",
                    session.route_id, session.cumulative_distance_m
                );
                engine.accumulator.restore(&session);
                engine.session = Some(session);
            }
            Ok(_) => {}
            Err(e) => engine.persistence_failed(&e),
        }

        if let Err(e) = engine.alarms.load_enabled(engine.store.as_ref()) {
            engine.persistence_failed(&e);
        }

        engine
    }

    // ========================================================================
    // Route lifecycle
    // ========================================================================

    /// Begin (or continue) tracking `route`.
    ///
    /// A stored session for the same route id is resumed; anything else
    /// starts from zero. Switching to a different route drops the previous
    /// route's subscriptions first; calling again for the same route keeps
    /// the existing ones. Timer and session state are set up before the
    /// location subscriptions, so a `LocationUnavailable` error leaves time
    /// tracking running.
    pub fn start_route(&mut self, route: ActiveRoute) -> Result<()> {
        let now = self.clock.now();
        let same_route = self
            .route
            .as_ref()
            .map(|r| r.id == route.id)
            .unwrap_or(false);
        if !same_route {
            if let Some(previous) = self.route.as_ref() {
                info!(
                    "[TrackingEngine] Switching from route '{}' to '{}'",
                    previous.id, route.id
                );
                for e in self.stream.stop() {
                    warn!("[TrackingEngine] Location teardown failed: {}", e);
                }
            }
            self.proximity.reset();
            self.alarms.reset();
        }

        let resumable = self
            .session
            .as_ref()
            .filter(|s| s.is_active && s.route_id.as_deref() == Some(route.id.as_str()))
            .cloned();

        match resumable {
            Some(session) => {
                if !self.timer.is_running() {
                    let started_at = session.started_at.unwrap_or(now);
                    self.timer.resume(now, now - started_at);
                }
                info!(
                    "[TrackingEngine] Resuming route '{}' at {:.1}m",
                    route.id, session.cumulative_distance_m
                );
            }
            None => {
                info!("[TrackingEngine] Starting route '{}'", route.id);
                self.accumulator.reset();
                self.timer.stop();
                self.timer.start(now);
                self.session = Some(TrackingSession::start(&route.id, now));
            }
        }

        self.navigation.set_route(&route);
        self.route = Some(route);
        self.persist_session();

        self.unavailable_reported = false;
        self.stream.start().inspect_err(|_| {
            self.unavailable_reported = true;
        })
    }

    /// Tear down tracking.
    ///
    /// Order: stop subscriptions and revoke the background registration,
    /// clear durable storage, then reset every subsystem. Each step runs even
    /// if an earlier one failed; failures are logged only.
    pub fn end_route(&mut self) {
        for e in self.stream.stop() {
            warn!("[TrackingEngine] Location teardown failed: {}", e);
        }

        if let Err(e) = TrackingSession::clear(self.store.as_mut()) {
            warn!("[TrackingEngine] Failed to clear tracking session: {}", e);
            self.persistence_healthy = false;
        }

        self.navigation.clear();
        self.proximity.reset();
        self.alarms.reset();
        self.accumulator.reset();
        self.timer.stop();

        if let Some(route) = self.route.take() {
            info!("[TrackingEngine] Ended route '{}'", route.id);
        }
        self.session = None;
        self.unavailable_reported = false;
    }

    // ========================================================================
    // Input
    // ========================================================================

    /// Drain the location queue and process every accepted sample.
    pub fn pump(&mut self) -> Vec<TrackingEvent> {
        let samples = self.stream.drain();
        let mut events = Vec::new();

        if let LocationStatus::Unavailable { reason } = self.stream.status() {
            if !self.unavailable_reported {
                self.unavailable_reported = true;
                events.push(TrackingEvent::LocationUnavailable {
                    reason: reason.clone(),
                });
            }
        }

        for sample in samples {
            events.extend(self.process_sample(sample));
        }
        events
    }

    /// Run one sample through the pipeline.
    pub fn process_sample(&mut self, sourced: SourcedSample) -> Vec<TrackingEvent> {
        let mut events = Vec::new();
        if self.route.is_none() {
            return events;
        }
        let sample = sourced.sample;

        match self.accumulator.accept(&sample) {
            SampleOutcome::Added { meters } => {
                if meters > 0.0 {
                    events.push(TrackingEvent::DistanceUpdated {
                        cumulative_distance_m: self.accumulator.cumulative_distance_m(),
                    });
                }
            }
            SampleOutcome::Anchored => {}
            outcome => {
                debug!(
                    "[TrackingEngine] {:?} sample from {:?} skipped: {:?}",
                    sourced.source, sample.captured_at, outcome
                );
                return events;
            }
        }

        if let Some(failure) = self.persist_session() {
            events.push(failure);
        }

        let Some(route) = self.route.as_ref() else {
            return events;
        };
        let position = sample.point();
        let was_arrived = self.navigation.state() == NavigationState::Arrived;

        for event in self.proximity.update(&position, &route.stops) {
            match event {
                ProximityEvent::Entered { stop_index } => {
                    self.navigation.snap_to_stop(stop_index, route);
                    events.push(TrackingEvent::StopEntered { stop_index });
                }
                ProximityEvent::Exited { stop_index } => {
                    events.push(TrackingEvent::StopExited { stop_index });
                }
            }
        }
        self.navigation.set_stop_proximity(
            self.proximity.state().stop(),
            self.proximity.is_near_stop(),
            route,
            self.speech.as_mut(),
        );

        let update = self.navigation.update(&sample, route, self.speech.as_mut());
        if update.advanced {
            let progress = self.navigation.progress();
            events.push(TrackingEvent::StepAdvanced {
                segment_index: progress.current_segment_index,
                step_index: progress.current_step_index,
            });
        }
        if !was_arrived && self.navigation.state() == NavigationState::Arrived {
            events.push(TrackingEvent::Arrived);
        }

        if let Some(alarm) = self.alarms.update(&position, route, self.notifier.as_mut()) {
            events.push(TrackingEvent::Alarm(alarm));
        }

        events
    }

    /// UI tick: refresh elapsed time and advance camera smoothing.
    pub fn on_tick(&mut self, dt: Duration) -> CameraOrientation {
        if self.route.is_some() {
            let period = self.config.timer_tick();
            self.timer.tick_if_due(self.clock.now(), period);
        }
        self.camera.tick(dt)
    }

    /// App returned to the foreground.
    ///
    /// Reconciles with storage: whichever session saw the newer sample wins.
    /// A background task may have extended the stored one while suspended.
    pub fn on_resume(&mut self) {
        let Some(route_id) = self.route.as_ref().map(|r| r.id.clone()) else {
            return;
        };
        let now = self.clock.now();

        match TrackingSession::load(self.store.as_ref()) {
            Ok(Some(stored))
                if stored.is_active && stored.route_id.as_deref() == Some(route_id.as_str()) =>
            {
                let stored_wins = match self.session.as_ref() {
                    Some(current) => stored.is_newer_than(current),
                    None => true,
                };
                if stored_wins {
                    info!(
                        "[TrackingEngine] Adopting stored session ({:.1}m, last sample {:?})",
                        stored.cumulative_distance_m,
                        stored.last_sample_at()
                    );
                    self.accumulator.restore(&stored);
                    self.session = Some(stored);
                } else {
                    self.persist_session();
                }
            }
            Ok(_) => {
                debug!("[TrackingEngine] No stored session for '{}', rewriting", route_id);
                self.persist_session();
            }
            Err(e) => self.persistence_failed(&e),
        }

        if let Some(started_at) = self.session.as_ref().and_then(|s| s.started_at) {
            self.timer.resume(now, now - started_at);
        }
    }

    // ========================================================================
    // Setters
    // ========================================================================

    pub fn set_screen_context(&mut self, screen: ScreenContext) {
        self.alarms.set_screen_context(screen);
    }

    pub fn set_speech_enabled(&mut self, enabled: bool) {
        self.navigation.set_speech_enabled(enabled);
    }

    /// Toggle alarms; the flag is written through to storage.
    pub fn set_alarms_enabled(&mut self, enabled: bool) {
        if let Err(e) = self.alarms.set_enabled(enabled, self.store.as_mut()) {
            self.persistence_failed(&e);
        }
    }

    pub fn dismiss_alarm_modal(&mut self) {
        self.alarms.dismiss_modal();
    }

    pub fn set_camera_3d(&mut self, enabled: bool) {
        self.camera.set_enabled(enabled);
    }

    pub fn set_device_heading(&mut self, heading_deg: f64) {
        self.camera.set_target_heading(heading_deg);
    }

    pub fn set_device_pitch(&mut self, pitch_deg: f64) {
        self.camera.set_target_pitch(pitch_deg);
    }

    // ========================================================================
    // Queries
    // ========================================================================

    pub fn config(&self) -> &TrackingConfig {
        &self.config
    }

    pub fn route(&self) -> Option<&ActiveRoute> {
        self.route.as_ref()
    }

    pub fn session(&self) -> Option<&TrackingSession> {
        self.session.as_ref()
    }

    /// Producer handle for hosts that deliver platform callbacks themselves.
    pub fn feed(&self, source: LocationSource) -> LocationFeed {
        self.stream.feed(source)
    }

    pub fn location_status(&self) -> &LocationStatus {
        self.stream.status()
    }

    pub fn navigation(&self) -> &NavigationStateMachine {
        &self.navigation
    }

    pub fn alarms(&self) -> &AlarmDispatcher {
        &self.alarms
    }

    pub fn cumulative_distance_m(&self) -> f64 {
        self.accumulator.cumulative_distance_m()
    }

    pub fn elapsed_seconds(&self) -> u64 {
        self.timer.elapsed_seconds()
    }

    /// Current derived values. While location is unavailable the
    /// position-relative values are absent and everything else stays frozen.
    pub fn snapshot(&self) -> NavigationSnapshot {
        let display = self.navigation.display();
        let camera = self.camera.orientation();
        let location_available = self.stream.status().is_available();
        NavigationSnapshot {
            route_id: self.route.as_ref().map(|r| r.id.clone()),
            state: self.navigation.state(),
            instruction: display.instruction.clone(),
            next_stop_text: display.next_stop_message.clone(),
            distance_to_step_m: display.distance_to_step_m.filter(|_| location_available),
            cumulative_distance_m: self.accumulator.cumulative_distance_m(),
            elapsed_s: self.timer.elapsed_seconds(),
            bearing_deg: display.bearing_deg.filter(|_| location_available),
            camera_heading_deg: camera.heading_deg,
            camera_pitch_deg: camera.pitch_deg,
            alarm_modal_visible: self.alarms.state().pending_modal_visible,
            location_available,
            instructions_available: self
                .route
                .as_ref()
                .map(|r| r.instructions_available)
                .unwrap_or(false),
            persistence_healthy: self.persistence_healthy,
        }
    }

    // ========================================================================
    // Internal
    // ========================================================================

    /// Write the current session through. In-memory state stays authoritative
    /// when the write fails.
    fn persist_session(&mut self) -> Option<TrackingEvent> {
        let now = self.clock.now();
        let elapsed_s = {
            self.timer.tick(now);
            self.timer.elapsed_seconds()
        };
        let session = self.session.as_mut()?;
        session.elapsed_s = elapsed_s;
        self.accumulator.write_into(session);

        match session.save(self.store.as_mut()) {
            Ok(()) => {
                self.persistence_healthy = true;
                None
            }
            Err(e) => {
                self.persistence_failed(&e);
                Some(TrackingEvent::PersistenceFailed {
                    message: e.to_string(),
                })
            }
        }
    }

    fn persistence_failed(&mut self, error: &TrackingError) {
        warn!("[TrackingEngine] Persistence degraded: {}", error);
        self.persistence_healthy = false;
    }
}
