//! Route data model and validation of backend route responses.
//!
//! The backend computes routes; this module only checks that a response has
//! what navigation needs and otherwise degrades to straight stop-to-stop lines.

use chrono::{DateTime, Utc};
use geo::{Coord, LineString};
use log::{debug, warn};
use serde::{Deserialize, Serialize};

use crate::geo_utils::haversine_distance;
use crate::{GeoPoint, OptionExt, Result, TrackingError};

/// How the user is travelling. Drives the alarm radius.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportMode {
    Driving,
    Cycling,
    Walking,
    Hiking,
    #[serde(other)]
    Unknown,
}

impl TransportMode {
    /// Parse a mode name, mapping anything unrecognised to `Unknown`.
    pub fn from_name(name: &str) -> Self {
        match name.trim().to_ascii_lowercase().as_str() {
            "driving" | "driving-car" => TransportMode::Driving,
            "cycling" | "cycling-regular" => TransportMode::Cycling,
            "walking" | "foot-walking" => TransportMode::Walking,
            "hiking" | "foot-hiking" => TransportMode::Hiking,
            _ => TransportMode::Unknown,
        }
    }

    /// Routing profile name sent to the backend.
    pub fn profile(&self) -> &'static str {
        match self {
            TransportMode::Driving => "driving-car",
            TransportMode::Cycling => "cycling-regular",
            TransportMode::Walking => "foot-walking",
            TransportMode::Hiking => "foot-hiking",
            TransportMode::Unknown => "foot-walking",
        }
    }
}

/// A stop on the route. Index 0 is the origin, the last index the destination.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RouteStop {
    pub latitude: f64,
    pub longitude: f64,
    pub name: String,
}

impl RouteStop {
    pub fn new(latitude: f64, longitude: f64, name: impl Into<String>) -> Self {
        Self {
            latitude,
            longitude,
            name: name.into(),
        }
    }

    pub fn point(&self) -> GeoPoint {
        GeoPoint::new(self.latitude, self.longitude)
    }
}

/// One turn-by-turn instruction within a segment.
#[derive(Debug, Clone, PartialEq)]
pub struct RouteStep {
    pub instruction: String,
    pub distance_m: f64,
    pub duration_s: f64,
    /// Inclusive index range into the route geometry
    pub way_points: (usize, usize),
}

/// The part of a route between two consecutive stops.
#[derive(Debug, Clone, PartialEq)]
pub struct RouteSegment {
    pub distance_m: f64,
    pub duration_s: f64,
    pub steps: Vec<RouteStep>,
}

// ============================================================================
// Backend response
// ============================================================================

/// Route response as returned by the route-generation backend.
///
/// Every field is optional so that incomplete responses still parse and can be
/// detected by [`RouteResponse::validate`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RouteResponse {
    pub geometry: Option<ResponseGeometry>,
    pub distance: Option<f64>,
    pub duration: Option<f64>,
    pub segments: Option<Vec<ResponseSegment>>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResponseGeometry {
    /// (lon, lat) pairs
    pub coordinates: Option<Vec<[f64; 2]>>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResponseSegment {
    #[serde(default)]
    pub distance: f64,
    #[serde(default)]
    pub duration: f64,
    #[serde(default)]
    pub steps: Vec<ResponseStep>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResponseStep {
    #[serde(default)]
    pub instruction: String,
    #[serde(default)]
    pub distance: f64,
    #[serde(default)]
    pub duration: f64,
    #[serde(default)]
    pub way_points: Vec<usize>,
}

impl RouteResponse {
    /// Parse a backend JSON body.
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Check that geometry and segments are present and line up with the stops.
    pub fn validate(&self, route_id: &str, stop_count: usize) -> Result<()> {
        let coords = self
            .geometry
            .as_ref()
            .and_then(|g| g.coordinates.as_ref())
            .filter(|c| !c.is_empty())
            .ok_or_incomplete(route_id, "missing geometry.coordinates")?;

        if coords.len() < 2 {
            return Err(TrackingError::RouteDataIncomplete {
                route_id: route_id.to_string(),
                message: format!("geometry has {} coordinate(s)", coords.len()),
            });
        }

        let segments = self
            .segments
            .as_ref()
            .filter(|s| !s.is_empty())
            .ok_or_incomplete(route_id, "missing segments")?;

        let expected = stop_count.saturating_sub(1);
        if segments.len() != expected {
            return Err(TrackingError::RouteDataIncomplete {
                route_id: route_id.to_string(),
                message: format!(
                    "{} segments for {} stops (expected {})",
                    segments.len(),
                    stop_count,
                    expected
                ),
            });
        }

        Ok(())
    }
}

// ============================================================================
// Active Route
// ============================================================================

/// The ordered stops, geometry and turn data for one in-progress trip.
#[derive(Debug, Clone, PartialEq)]
pub struct ActiveRoute {
    pub id: String,
    pub owner_user_id: String,
    pub mode: TransportMode,
    pub stops: Vec<RouteStop>,
    /// `segments[i]` covers `stops[i] -> stops[i + 1]`
    pub segments: Vec<RouteSegment>,
    /// x = longitude, y = latitude
    pub geometry: LineString<f64>,
    pub created_at: DateTime<Utc>,
    /// False when the route fell back to straight-line geometry
    pub instructions_available: bool,
}

impl ActiveRoute {
    /// Build a route from a backend response.
    ///
    /// A missing or incomplete response falls back to straight-line geometry
    /// built from the stops; distance and timer tracking keep working but no
    /// instructions are available. Fails only when fewer than two valid stops
    /// are given.
    pub fn from_response(
        id: &str,
        owner_user_id: &str,
        mode: TransportMode,
        stops: Vec<RouteStop>,
        response: Option<&RouteResponse>,
        created_at: DateTime<Utc>,
    ) -> Result<Self> {
        validate_stops(id, &stops)?;

        let checked = match response {
            Some(r) => r.validate(id, stops.len()).map(|_| r),
            None => Err(TrackingError::RouteDataIncomplete {
                route_id: id.to_string(),
                message: "no route response".to_string(),
            }),
        };

        match checked {
            Ok(response) => {
                let geometry: LineString<f64> = response
                    .geometry
                    .as_ref()
                    .and_then(|g| g.coordinates.as_ref())
                    .map(|coords| {
                        coords
                            .iter()
                            .map(|c| Coord { x: c[0], y: c[1] })
                            .collect::<Vec<_>>()
                    })
                    .unwrap_or_default()
                    .into();

                let segments = response
                    .segments
                    .as_deref()
                    .unwrap_or_default()
                    .iter()
                    .map(convert_segment)
                    .collect::<Vec<_>>();

                debug!(
                    "[ActiveRoute] Route '{}': {} stops, {} segments, {} geometry points",
                    id,
                    stops.len(),
                    segments.len(),
                    geometry.0.len()
                );

                Ok(Self {
                    id: id.to_string(),
                    owner_user_id: owner_user_id.to_string(),
                    mode,
                    stops,
                    segments,
                    geometry,
                    created_at,
                    instructions_available: true,
                })
            }
            Err(e) => {
                warn!("[ActiveRoute] {}; using straight-line fallback", e);
                Self::straight_line(id, owner_user_id, mode, stops, created_at)
            }
        }
    }

    /// Straight stop-to-stop geometry with step-less segments.
    pub fn straight_line(
        id: &str,
        owner_user_id: &str,
        mode: TransportMode,
        stops: Vec<RouteStop>,
        created_at: DateTime<Utc>,
    ) -> Result<Self> {
        validate_stops(id, &stops)?;

        let geometry: LineString<f64> = stops
            .iter()
            .map(|s| Coord {
                x: s.longitude,
                y: s.latitude,
            })
            .collect::<Vec<_>>()
            .into();

        let segments = stops
            .windows(2)
            .map(|pair| RouteSegment {
                distance_m: haversine_distance(&pair[0].point(), &pair[1].point()),
                duration_s: 0.0,
                steps: Vec::new(),
            })
            .collect();

        Ok(Self {
            id: id.to_string(),
            owner_user_id: owner_user_id.to_string(),
            mode,
            stops,
            segments,
            geometry,
            created_at,
            instructions_available: false,
        })
    }

    /// Geometry vertex at `index` as a lat/lon point.
    pub fn geometry_point(&self, index: usize) -> Option<GeoPoint> {
        self.geometry
            .0
            .get(index)
            .map(|c| GeoPoint::new(c.y, c.x))
    }

    /// Where a step begins on the geometry, if its index is in range.
    pub fn step_start(&self, step: &RouteStep) -> Option<GeoPoint> {
        self.geometry_point(step.way_points.0)
    }

    pub fn stop_point(&self, index: usize) -> Option<GeoPoint> {
        self.stops.get(index).map(RouteStop::point)
    }

    pub fn destination_index(&self) -> usize {
        self.stops.len().saturating_sub(1)
    }

    /// Sum of segment distances in meters.
    pub fn total_distance_m(&self) -> f64 {
        self.segments.iter().map(|s| s.distance_m).sum()
    }

    pub fn step_count(&self) -> usize {
        self.segments.iter().map(|s| s.steps.len()).sum()
    }
}

fn validate_stops(route_id: &str, stops: &[RouteStop]) -> Result<()> {
    if stops.len() < 2 {
        return Err(TrackingError::RouteDataIncomplete {
            route_id: route_id.to_string(),
            message: format!("{} stop(s), at least 2 required", stops.len()),
        });
    }
    if let Some(bad) = stops.iter().find(|s| !s.point().is_valid()) {
        return Err(TrackingError::RouteDataIncomplete {
            route_id: route_id.to_string(),
            message: format!("stop '{}' has invalid coordinates", bad.name),
        });
    }
    Ok(())
}

fn convert_segment(segment: &ResponseSegment) -> RouteSegment {
    RouteSegment {
        distance_m: segment.distance,
        duration_s: segment.duration,
        steps: segment
            .steps
            .iter()
            .map(|step| {
                let start = step.way_points.first().copied().unwrap_or(usize::MAX);
                let end = step.way_points.get(1).copied().unwrap_or(start);
                RouteStep {
                    instruction: step.instruction.clone(),
                    distance_m: step.distance,
                    duration_s: step.duration,
                    way_points: (start, end),
                }
            })
            .collect(),
    }
}
