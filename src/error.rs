//! Unified error handling for the route tracker.
//!
//! None of these errors is fatal to the host app. The engine absorbs them
//! locally and reflects them as degraded-but-running state in the snapshot.

use thiserror::Error;

/// Unified error type for tracking operations.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum TrackingError {
    /// Location permission denied or the provider failed.
    /// Dependents freeze their last good state rather than reset.
    #[error("Location unavailable: {reason}")]
    LocationUnavailable { reason: String },

    /// Backend route response is missing geometry or segments.
    #[error("Route '{route_id}' data incomplete: {message}")]
    RouteDataIncomplete { route_id: String, message: String },

    /// Durable store rejected a write. In-memory state stays authoritative.
    #[error("Persistence write failed for '{key}': {message}")]
    PersistenceWriteFailure { key: String, message: String },

    /// Durable store could not be read.
    #[error("Persistence read failed for '{key}': {message}")]
    PersistenceReadFailure { key: String, message: String },

    /// Notification could not be delivered. Alarm state still updates.
    #[error("Notification dispatch failed: {message}")]
    NotificationDispatchFailure { message: String },

    /// Stored or received payload could not be (de)serialized.
    #[error("Serialization error: {message}")]
    Serialization { message: String },

    /// Configuration error
    #[error("Configuration error: {message}")]
    Config { message: String },

    /// HTTP/API error
    #[error("HTTP error{}: {message}", status_suffix(.status_code))]
    Http {
        message: String,
        status_code: Option<u16>,
    },
}

fn status_suffix<C: std::borrow::Borrow<Option<u16>>>(code: C) -> String {
    match code.borrow() {
        Some(code) => format!(" ({})", code),
        None => String::new(),
    }
}

impl TrackingError {
    /// Shorthand for a location failure.
    pub fn location_unavailable(reason: impl Into<String>) -> Self {
        TrackingError::LocationUnavailable {
            reason: reason.into(),
        }
    }

    /// Whether the error leaves location-derived values absent.
    pub fn is_location_failure(&self) -> bool {
        matches!(self, TrackingError::LocationUnavailable { .. })
    }
}

impl From<serde_json::Error> for TrackingError {
    fn from(e: serde_json::Error) -> Self {
        TrackingError::Serialization {
            message: e.to_string(),
        }
    }
}

/// Result type alias for tracking operations.
pub type Result<T> = std::result::Result<T, TrackingError>;

/// Extension trait for converting Option to TrackingError.
pub trait OptionExt<T> {
    /// Convert Option to Result with a route-data-incomplete error.
    fn ok_or_incomplete(self, route_id: &str, message: &str) -> Result<T>;
}

impl<T> OptionExt<T> for Option<T> {
    fn ok_or_incomplete(self, route_id: &str, message: &str) -> Result<T> {
        self.ok_or_else(|| TrackingError::RouteDataIncomplete {
            route_id: route_id.to_string(),
            message: message.to_string(),
        })
    }
}
