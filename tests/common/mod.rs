//! Shared test doubles for the integration scenarios.

#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use chrono::{DateTime, Duration, TimeZone, Utc};
use route_tracker::geo_utils::destination_point;
use route_tracker::{
    Collaborators, GeoPoint, KeyValueStore, LocationFeed, LocationProvider, LocationRequest,
    LocationSample, ManualClock, MemoryStore, NotificationService, Result, SpeechService,
    TrackingConfig, TrackingEngine, TrackingError,
};

pub fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 6, 1, 8, 0, 0).unwrap()
}

pub fn at_seconds(seconds: i64) -> DateTime<Utc> {
    t0() + Duration::seconds(seconds)
}

/// Point `distance_m` due south of `origin`.
pub fn south_of(origin: &GeoPoint, distance_m: f64) -> GeoPoint {
    destination_point(origin, 180.0, distance_m)
}

pub fn north_of(origin: &GeoPoint, distance_m: f64) -> GeoPoint {
    destination_point(origin, 0.0, distance_m)
}

pub fn fix(point: GeoPoint, seconds: i64) -> LocationSample {
    LocationSample::at(point, 5.0, at_seconds(seconds))
}

// ============================================================================
// Location provider
// ============================================================================

#[derive(Debug, Default)]
pub struct ProviderLog {
    pub calls: Vec<&'static str>,
    pub foreground_feed: Option<LocationFeed>,
    pub background_feed: Option<LocationFeed>,
}

#[derive(Debug, Default, Clone, Copy)]
pub struct ProviderFailures {
    pub start_foreground: bool,
    pub stop: bool,
}

/// Records calls and hands out the feeds it was given.
#[derive(Debug, Clone, Default)]
pub struct FakeProvider {
    pub log: Arc<Mutex<ProviderLog>>,
    pub failures: ProviderFailures,
}

impl FakeProvider {
    pub fn failing(failures: ProviderFailures) -> Self {
        Self {
            failures,
            ..Self::default()
        }
    }

    pub fn calls(&self) -> Vec<&'static str> {
        self.log.lock().unwrap().calls.clone()
    }

    pub fn foreground(&self) -> LocationFeed {
        self.log
            .lock()
            .unwrap()
            .foreground_feed
            .clone()
            .expect("foreground not started")
    }

    pub fn background(&self) -> LocationFeed {
        self.log
            .lock()
            .unwrap()
            .background_feed
            .clone()
            .expect("background not started")
    }

    fn record(&self, call: &'static str, fail: bool) -> Result<()> {
        self.log.lock().unwrap().calls.push(call);
        if fail {
            return Err(TrackingError::location_unavailable(format!("{} failed", call)));
        }
        Ok(())
    }
}

impl LocationProvider for FakeProvider {
    fn start_foreground(&mut self, _request: &LocationRequest, feed: LocationFeed) -> Result<()> {
        self.record("start_foreground", self.failures.start_foreground)?;
        self.log.lock().unwrap().foreground_feed = Some(feed);
        Ok(())
    }

    fn stop_foreground(&mut self) -> Result<()> {
        self.record("stop_foreground", self.failures.stop)
    }

    fn start_background(&mut self, _request: &LocationRequest, feed: LocationFeed) -> Result<()> {
        self.record("start_background", false)?;
        self.log.lock().unwrap().background_feed = Some(feed);
        Ok(())
    }

    fn stop_background(&mut self) -> Result<()> {
        self.record("stop_background", self.failures.stop)
    }

    fn revoke_background_registration(&mut self) -> Result<()> {
        self.record("revoke_background_registration", self.failures.stop)
    }
}

// ============================================================================
// Store, notifications, speech
// ============================================================================

/// Memory store shared between the engine and the test body.
#[derive(Debug, Clone, Default)]
pub struct SharedStore {
    pub inner: Arc<Mutex<MemoryStore>>,
}

impl SharedStore {
    pub fn contains_key(&self, key: &str) -> bool {
        self.inner.lock().unwrap().contains_key(key)
    }
}

impl KeyValueStore for SharedStore {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        self.inner.lock().unwrap().get(key)
    }

    fn set(&mut self, key: &str, value: &[u8]) -> Result<()> {
        self.inner.lock().unwrap().set(key, value)
    }

    fn remove(&mut self, key: &str) -> Result<()> {
        self.inner.lock().unwrap().remove(key)
    }
}

#[derive(Debug, Clone, Default)]
pub struct Recorder {
    pub entries: Arc<Mutex<Vec<String>>>,
}

impl Recorder {
    pub fn entries(&self) -> Vec<String> {
        self.entries.lock().unwrap().clone()
    }
}

impl NotificationService for Recorder {
    fn notify(&mut self, title: &str, body: &str) -> Result<()> {
        self.entries
            .lock()
            .unwrap()
            .push(format!("{}: {}", title, body));
        Ok(())
    }
}

impl SpeechService for Recorder {
    fn speak(&mut self, text: &str) {
        self.entries.lock().unwrap().push(text.to_string());
    }
}

// ============================================================================
// Harness
// ============================================================================

/// An engine plus handles to every double it was built with.
pub struct Harness {
    pub engine: TrackingEngine,
    pub provider: FakeProvider,
    pub store: SharedStore,
    pub clock: ManualClock,
    pub notifications: Recorder,
    pub speech: Recorder,
}

impl Harness {
    pub fn new() -> Self {
        Self::build(FakeProvider::default(), SharedStore::default(), ManualClock::new(t0()))
    }

    pub fn with_provider(provider: FakeProvider) -> Self {
        Self::build(provider, SharedStore::default(), ManualClock::new(t0()))
    }

    /// Fresh engine over an existing store, as after a process restart.
    pub fn restarted(store: SharedStore, clock: ManualClock) -> Self {
        Self::build(FakeProvider::default(), store, clock)
    }

    fn build(provider: FakeProvider, store: SharedStore, clock: ManualClock) -> Self {
        // Shows the engine's logs under `cargo test -- --nocapture`
        let _ = env_logger::builder().is_test(true).try_init();

        let notifications = Recorder::default();
        let speech = Recorder::default();
        let engine = TrackingEngine::new(
            TrackingConfig::default(),
            Collaborators {
                provider: Box::new(provider.clone()),
                store: Box::new(store.clone()),
                notifier: Box::new(notifications.clone()),
                speech: Box::new(speech.clone()),
                clock: Box::new(clock.clone()),
            },
        );
        Self {
            engine,
            provider,
            store,
            clock,
            notifications,
            speech,
        }
    }
}
