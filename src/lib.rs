//! # Route Tracker
//!
//! Active route navigation and tracking for travel-companion mobile apps.
//!
//! This library turns a stream of raw device location fixes into:
//! - Live turn-by-turn navigation state along a backend-generated route
//! - A persisted cumulative-distance/elapsed-time session that survives
//!   process suspension
//! - Proximity alarms (in-app modal or system notification) for upcoming stops
//! - A smoothed heading/pitch for a 3D following camera
//!
//! ## Features
//!
//! - **`persistence`** (default) - SQLite-backed durable key-value store
//! - **`http`** - HTTP client for the backend route-generation API
//! - **`full`** - Enable all features
//!
//! ## Quick Start
//!
//! ```rust
//! use route_tracker::{GeoPoint, TrackingConfig, TransportMode};
//! use route_tracker::geo_utils::haversine_distance;
//!
//! let config = TrackingConfig::default();
//! assert_eq!(config.alarm_threshold(&TransportMode::Walking), 50.0);
//!
//! let a = GeoPoint::new(51.5074, -0.1278);
//! let b = GeoPoint::new(51.5080, -0.1290);
//! assert!(haversine_distance(&a, &b) > 0.0);
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// Unified error handling
pub mod error;
pub use error::{OptionExt, Result, TrackingError};

// Tunables (radii, thresholds, subscription fidelity)
pub mod config;
pub use config::{AlarmThresholds, LocationRequest, TrackingConfig};

// Haversine, bearings and angle helpers
pub mod geo_utils;

// Route data model and backend response validation
pub mod route;
pub use route::{
    ActiveRoute, RouteResponse, RouteSegment, RouteStep, RouteStop, TransportMode,
};

// Durable key-value storage
pub mod store;
#[cfg(feature = "persistence")]
pub use store::SqliteStore;
pub use store::{KeyValueStore, MemoryStore};

// Foreground/background location feeds merged into one queue
pub mod location;
pub use location::{
    LocationEvent, LocationFeed, LocationProvider, LocationStatus, LocationStreamManager,
};

// Cumulative distance with restart safety
pub mod distance;
pub use distance::{record_background_sample, DistanceAccumulator, SampleOutcome, TrackingSession};

// Elapsed session time
pub mod timer;
pub use timer::{Clock, ManualClock, RouteSessionTimer, SystemClock};

// Turn-by-turn progress
pub mod navigation;
pub use navigation::{
    NavigationDisplay, NavigationProgress, NavigationState, NavigationStateMachine,
    NavigationUpdate, SpeechService,
};

// Stop geofencing with hysteresis
pub mod proximity;
pub use proximity::{ProximityEvent, ProximityState, StopProximityDetector};

// Stop alarms
pub mod alarm;
pub use alarm::{
    AlarmDispatcher, AlarmEvent, AlarmKind, AlarmState, NotificationService, ScreenContext,
    Suppression,
};

// 3D camera heading smoothing
pub mod camera;
pub use camera::{CameraOrientation, CameraOrientationSmoother};

// Session/context object that owns all subsystems
pub mod engine;
pub use engine::{Collaborators, NavigationSnapshot, TrackingEngine, TrackingEvent};

// HTTP client for the route-generation backend
#[cfg(feature = "http")]
pub mod http;
#[cfg(feature = "http")]
pub use http::RouteApiClient;

/// Initialize logging for Android.
#[cfg(target_os = "android")]
pub fn init_logging() {
    use android_logger::Config;
    use log::LevelFilter;

    android_logger::init_once(
        Config::default()
            .with_max_level(LevelFilter::Debug)
            .with_tag("RouteTracker"),
    );
}

#[cfg(not(target_os = "android"))]
pub fn init_logging() {
    // No-op on non-Android platforms; hosts install their own `log` backend
}

// ============================================================================
// Core Types
// ============================================================================

/// A latitude/longitude coordinate in degrees.
///
/// # Example
/// ```
/// use route_tracker::GeoPoint;
/// let point = GeoPoint::new(51.5074, -0.1278); // London
/// assert!(point.is_valid());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub latitude: f64,
    pub longitude: f64,
}

impl GeoPoint {
    /// Create a new point.
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }

    /// Check if the point has valid coordinates.
    pub fn is_valid(&self) -> bool {
        self.latitude.is_finite()
            && self.longitude.is_finite()
            && self.latitude >= -90.0
            && self.latitude <= 90.0
            && self.longitude >= -180.0
            && self.longitude <= 180.0
    }
}

/// A single fix from the device location provider.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LocationSample {
    pub latitude: f64,
    pub longitude: f64,
    /// Horizontal accuracy radius in meters
    pub accuracy: f64,
    pub captured_at: DateTime<Utc>,
}

impl LocationSample {
    pub fn new(latitude: f64, longitude: f64, accuracy: f64, captured_at: DateTime<Utc>) -> Self {
        Self {
            latitude,
            longitude,
            accuracy,
            captured_at,
        }
    }

    /// Build a sample located at `point`.
    pub fn at(point: GeoPoint, accuracy: f64, captured_at: DateTime<Utc>) -> Self {
        Self::new(point.latitude, point.longitude, accuracy, captured_at)
    }

    pub fn point(&self) -> GeoPoint {
        GeoPoint::new(self.latitude, self.longitude)
    }

    /// Same instant and same coordinates.
    pub fn is_duplicate_of(&self, other: &LocationSample) -> bool {
        self.captured_at == other.captured_at
            && self.latitude == other.latitude
            && self.longitude == other.longitude
    }
}

/// Which subscription produced a sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LocationSource {
    /// High-fidelity subscription while the app is visible
    Foreground,
    /// OS-scheduled subscription that keeps running while suspended
    Background,
}

/// A sample tagged with the feed it arrived on.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SourcedSample {
    pub source: LocationSource,
    pub sample: LocationSample,
}

impl SourcedSample {
    pub fn new(source: LocationSource, sample: LocationSample) -> Self {
        Self { source, sample }
    }
}

// ============================================================================
// Tests
// ============================================================================
