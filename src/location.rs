//! # Location Stream
//!
//! Merges the foreground (high-rate) and background (OS-woken) location feeds
//! into a single queue of tagged samples.
//!
//! Providers push through a [`LocationFeed`], which is `Send` so platform
//! callbacks on other threads can deliver fixes. The consumer drains the queue
//! on its own thread of control; per-source ordering and duplicate filtering
//! happen there.

use std::collections::HashMap;
use std::sync::mpsc;

use log::{debug, info, warn};

use crate::{
    LocationRequest, LocationSample, LocationSource, Result, SourcedSample, TrackingError,
};

/// Event delivered by a provider into the shared queue.
#[derive(Debug, Clone, PartialEq)]
pub enum LocationEvent {
    Sample(SourcedSample),
    /// Permission revoked or provider failure reported after start
    Failed {
        source: LocationSource,
        reason: String,
    },
}

/// Producer handle given to a provider for one subscription.
#[derive(Debug, Clone)]
pub struct LocationFeed {
    source: LocationSource,
    sender: mpsc::Sender<LocationEvent>,
}

impl LocationFeed {
    pub fn source(&self) -> LocationSource {
        self.source
    }

    /// Push a fix. Returns false if the consumer is gone.
    pub fn push(&self, sample: LocationSample) -> bool {
        self.sender
            .send(LocationEvent::Sample(SourcedSample::new(self.source, sample)))
            .is_ok()
    }

    /// Report a terminal provider failure.
    pub fn fail(&self, reason: impl Into<String>) -> bool {
        self.sender
            .send(LocationEvent::Failed {
                source: self.source,
                reason: reason.into(),
            })
            .is_ok()
    }
}

/// Device location provider.
///
/// Implementations wrap the platform APIs. `start_*` should return
/// [`TrackingError::LocationUnavailable`] when permission is denied.
pub trait LocationProvider: Send {
    fn start_foreground(&mut self, request: &LocationRequest, feed: LocationFeed) -> Result<()>;
    fn stop_foreground(&mut self) -> Result<()>;
    fn start_background(&mut self, request: &LocationRequest, feed: LocationFeed) -> Result<()>;
    fn stop_background(&mut self) -> Result<()>;
    /// Drop any OS-level background task registration so no orphaned wake-ups occur.
    fn revoke_background_registration(&mut self) -> Result<()>;
}

/// Current state of the merged stream.
#[derive(Debug, Clone, PartialEq)]
pub enum LocationStatus {
    Idle,
    Streaming { foreground: bool, background: bool },
    /// Terminal until tracking is restarted
    Unavailable { reason: String },
}

impl LocationStatus {
    pub fn is_available(&self) -> bool {
        !matches!(self, LocationStatus::Unavailable { .. })
    }
}

/// Owns the provider subscriptions and the merged sample queue.
pub struct LocationStreamManager {
    provider: Box<dyn LocationProvider>,
    sender: mpsc::Sender<LocationEvent>,
    receiver: mpsc::Receiver<LocationEvent>,
    status: LocationStatus,
    foreground_request: LocationRequest,
    background_request: LocationRequest,
    /// Last accepted sample per source, for ordering and duplicates
    last_accepted: HashMap<LocationSource, LocationSample>,
}

impl LocationStreamManager {
    pub fn new(
        provider: Box<dyn LocationProvider>,
        foreground_request: LocationRequest,
        background_request: LocationRequest,
    ) -> Self {
        let (sender, receiver) = mpsc::channel();
        Self {
            provider,
            sender,
            receiver,
            status: LocationStatus::Idle,
            foreground_request,
            background_request,
            last_accepted: HashMap::new(),
        }
    }

    pub fn status(&self) -> &LocationStatus {
        &self.status
    }

    /// A feed handle for pushing samples directly (used by hosts that own the
    /// platform callbacks themselves).
    pub fn feed(&self, source: LocationSource) -> LocationFeed {
        LocationFeed {
            source,
            sender: self.sender.clone(),
        }
    }

    /// Subscribe both feeds.
    ///
    /// No-op while already streaming. A stream that went unavailable is torn
    /// down before subscribing again. A foreground failure makes the stream
    /// unavailable. A background failure is logged and foreground tracking
    /// continues.
    pub fn start(&mut self) -> Result<()> {
        match self.status {
            LocationStatus::Streaming { .. } => {
                debug!("[LocationStream] Already streaming");
                return Ok(());
            }
            LocationStatus::Unavailable { .. } => {
                for e in self.stop() {
                    warn!("[LocationStream] Teardown before restart failed: {}", e);
                }
            }
            LocationStatus::Idle => {}
        }
        self.last_accepted.clear();

        let foreground_feed = self.feed(LocationSource::Foreground);
        if let Err(e) = self
            .provider
            .start_foreground(&self.foreground_request, foreground_feed)
        {
            warn!("[LocationStream] Foreground subscription failed: {}", e);
            self.status = LocationStatus::Unavailable {
                reason: e.to_string(),
            };
            return Err(TrackingError::location_unavailable(e.to_string()));
        }

        let background_feed = self.feed(LocationSource::Background);
        let background = match self
            .provider
            .start_background(&self.background_request, background_feed)
        {
            Ok(()) => true,
            Err(e) => {
                warn!(
                    "[LocationStream] Background subscription failed, continuing foreground only: {}",
                    e
                );
                false
            }
        };

        info!(
            "[LocationStream] Streaming (foreground every {:?}, background {})",
            self.foreground_request.interval(),
            if background { "on" } else { "off" }
        );
        self.status = LocationStatus::Streaming {
            foreground: true,
            background,
        };
        Ok(())
    }

    /// Unsubscribe both feeds and revoke the background registration.
    ///
    /// Every step is attempted; failures are returned for the caller to log.
    pub fn stop(&mut self) -> Vec<TrackingError> {
        let mut failures = Vec::new();

        if let Err(e) = self.provider.stop_foreground() {
            failures.push(e);
        }
        if let Err(e) = self.provider.stop_background() {
            failures.push(e);
        }
        if let Err(e) = self.provider.revoke_background_registration() {
            failures.push(e);
        }

        // Anything still queued belongs to the stopped session
        while self.receiver.try_recv().is_ok() {}
        self.last_accepted.clear();
        self.status = LocationStatus::Idle;

        debug!("[LocationStream] Stopped ({} failure(s))", failures.len());
        failures
    }

    /// Drain queued events in arrival order.
    ///
    /// Drops samples with invalid coordinates, samples older than the last
    /// accepted one from the same source, and exact duplicates. A failure
    /// event switches the stream to unavailable; later samples are discarded.
    pub fn drain(&mut self) -> Vec<SourcedSample> {
        let mut accepted = Vec::new();

        while let Ok(event) = self.receiver.try_recv() {
            match event {
                LocationEvent::Failed { source, reason } => {
                    warn!("[LocationStream] {:?} feed failed: {}", source, reason);
                    self.status = LocationStatus::Unavailable { reason };
                }
                LocationEvent::Sample(sourced) => {
                    if !self.status.is_available() {
                        continue;
                    }
                    if self.accept(&sourced) {
                        accepted.push(sourced);
                    }
                }
            }
        }

        accepted
    }

    fn accept(&mut self, sourced: &SourcedSample) -> bool {
        let sample = &sourced.sample;
        if !sample.point().is_valid() {
            warn!(
                "[LocationStream] Dropping invalid fix ({}, {})",
                sample.latitude, sample.longitude
            );
            return false;
        }

        if let Some(last) = self.last_accepted.get(&sourced.source) {
            if sample.captured_at < last.captured_at {
                debug!(
                    "[LocationStream] Dropping out-of-order {:?} fix at {}",
                    sourced.source, sample.captured_at
                );
                return false;
            }
            if sample.is_duplicate_of(last) {
                return false;
            }
        }

        self.last_accepted.insert(sourced.source, *sample);
        true
    }
}
