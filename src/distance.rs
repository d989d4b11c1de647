//! # Distance Accumulation
//!
//! Integrates consecutive location samples into a cumulative distance and
//! keeps the persisted [`TrackingSession`] in sync so a restart does not lose
//! progress.
//!
//! The accumulator never talks to storage itself; the engine writes the
//! session after every accepted sample. [`record_background_sample`] is the
//! exception: it is the headless path run by an OS-woken background task.

use chrono::{DateTime, Utc};
use log::{debug, info};
use serde::{Deserialize, Serialize};

use crate::geo_utils::haversine_distance;
use crate::store::{load_json, save_json, SESSION_KEY};
use crate::{KeyValueStore, LocationSample, Result, TrackingConfig};

/// Persisted tracking state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackingSession {
    pub route_id: Option<String>,
    pub cumulative_distance_m: f64,
    pub started_at: Option<DateTime<Utc>>,
    /// Elapsed seconds at the time of the last write
    #[serde(default)]
    pub elapsed_s: u64,
    pub last_sample: Option<LocationSample>,
    pub is_active: bool,
    pub updated_at: Option<DateTime<Utc>>,
}

impl TrackingSession {
    /// A fresh, active session for a route.
    pub fn start(route_id: &str, started_at: DateTime<Utc>) -> Self {
        Self {
            route_id: Some(route_id.to_string()),
            cumulative_distance_m: 0.0,
            started_at: Some(started_at),
            elapsed_s: 0,
            last_sample: None,
            is_active: true,
            updated_at: Some(started_at),
        }
    }

    /// Timestamp of the newest sample this session has seen.
    pub fn last_sample_at(&self) -> Option<DateTime<Utc>> {
        self.last_sample.map(|s| s.captured_at)
    }

    /// Whether `self` was written by a newer sample than `other`.
    pub fn is_newer_than(&self, other: &TrackingSession) -> bool {
        match (self.last_sample_at(), other.last_sample_at()) {
            (Some(a), Some(b)) => a > b,
            (Some(_), None) => true,
            _ => false,
        }
    }

    pub fn load(store: &dyn KeyValueStore) -> Result<Option<Self>> {
        load_json(store, SESSION_KEY)
    }

    pub fn save(&self, store: &mut dyn KeyValueStore) -> Result<()> {
        save_json(store, SESSION_KEY, self)
    }

    pub fn clear(store: &mut dyn KeyValueStore) -> Result<()> {
        store.remove(SESSION_KEY)
    }
}

/// What happened to a sample offered to the accumulator.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SampleOutcome {
    /// Distance was added (possibly zero for the very first sample)
    Added { meters: f64 },
    /// First sample after a resume with a stale gap: anchors without adding
    Anchored,
    /// Older than or identical to the last sample
    Stale,
    /// Accuracy radius worse than the configured limit
    Inaccurate,
}

impl SampleOutcome {
    /// Whether the sample moved `last_sample` forward.
    pub fn is_accepted(&self) -> bool {
        matches!(self, SampleOutcome::Added { .. } | SampleOutcome::Anchored)
    }
}

/// Running haversine total over accepted samples.
#[derive(Debug, Clone)]
pub struct DistanceAccumulator {
    cumulative_distance_m: f64,
    last_sample: Option<LocationSample>,
    /// Set after restoring persisted state, cleared by the next accepted sample
    resumed: bool,
    resume_staleness: chrono::Duration,
    max_accuracy_m: Option<f64>,
}

impl DistanceAccumulator {
    pub fn new(config: &TrackingConfig) -> Self {
        Self {
            cumulative_distance_m: 0.0,
            last_sample: None,
            resumed: false,
            resume_staleness: config.resume_staleness(),
            max_accuracy_m: config.max_sample_accuracy_m,
        }
    }

    /// Restore from persisted state after a process restart or app resume.
    ///
    /// The first sample afterwards only adds distance if it lies within the
    /// configured staleness gap of the restored `last_sample`.
    pub fn restore(&mut self, session: &TrackingSession) {
        self.cumulative_distance_m = session.cumulative_distance_m.max(0.0);
        self.last_sample = session.last_sample;
        self.resumed = session.last_sample.is_some();
        debug!(
            "[DistanceAccumulator] Restored {:.1}m (last sample {:?})",
            self.cumulative_distance_m,
            session.last_sample_at()
        );
    }

    /// Continue from persisted state without the resume rule.
    /// Used by the background task, whose wake-ups form one continuous chain.
    pub fn continue_from(&mut self, session: &TrackingSession) {
        self.restore(session);
        self.resumed = false;
    }

    /// Offer a sample. Distance never decreases.
    pub fn accept(&mut self, sample: &LocationSample) -> SampleOutcome {
        if let Some(limit) = self.max_accuracy_m {
            if sample.accuracy.is_finite() && sample.accuracy > limit {
                return SampleOutcome::Inaccurate;
            }
        }

        let previous = match self.last_sample {
            None => {
                self.last_sample = Some(*sample);
                self.resumed = false;
                return SampleOutcome::Added { meters: 0.0 };
            }
            Some(prev) => prev,
        };

        if sample.captured_at < previous.captured_at || sample.is_duplicate_of(&previous) {
            return SampleOutcome::Stale;
        }

        if self.resumed {
            self.resumed = false;
            let gap = sample.captured_at - previous.captured_at;
            if gap > self.resume_staleness {
                info!(
                    "[DistanceAccumulator] Resume gap {}s exceeds staleness limit, anchoring without distance",
                    gap.num_seconds()
                );
                self.last_sample = Some(*sample);
                return SampleOutcome::Anchored;
            }
        }

        let meters = haversine_distance(&previous.point(), &sample.point());
        self.cumulative_distance_m += meters;
        self.last_sample = Some(*sample);
        SampleOutcome::Added { meters }
    }

    pub fn cumulative_distance_m(&self) -> f64 {
        self.cumulative_distance_m
    }

    pub fn last_sample(&self) -> Option<&LocationSample> {
        self.last_sample.as_ref()
    }

    /// Write distance fields into a session record.
    pub fn write_into(&self, session: &mut TrackingSession) {
        session.cumulative_distance_m = self.cumulative_distance_m;
        session.last_sample = self.last_sample;
        if let Some(sample) = self.last_sample {
            session.updated_at = Some(sample.captured_at);
        }
    }

    /// Back to zero. Only on explicit end/cancel.
    pub fn reset(&mut self) {
        self.cumulative_distance_m = 0.0;
        self.last_sample = None;
        self.resumed = false;
    }
}

/// Headless background path: fold one sample into the durable session.
///
/// Loads the stored session, accumulates without the resume rule, and writes
/// it back. Returns `Ok(None)` when no active session is stored (tracking was
/// ended, so the wake-up is orphaned and ignored).
pub fn record_background_sample(
    store: &mut dyn KeyValueStore,
    sample: &LocationSample,
    config: &TrackingConfig,
) -> Result<Option<TrackingSession>> {
    let mut session = match TrackingSession::load(store)? {
        Some(s) if s.is_active => s,
        _ => {
            debug!("[DistanceAccumulator] Background sample with no active session, ignoring");
            return Ok(None);
        }
    };

    let mut accumulator = DistanceAccumulator::new(config);
    accumulator.continue_from(&session);

    if accumulator.accept(sample).is_accepted() {
        accumulator.write_into(&mut session);
        session.save(store)?;
    }

    Ok(Some(session))
}
