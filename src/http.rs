//! HTTP client for the route-generation backend.
//!
//! Posts the ordered stops and routing profile, and returns the backend's
//! route response. Retries with exponential backoff on 429 and on transient
//! connection errors.

use std::time::Duration;

use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use reqwest::{Client, StatusCode};
use serde::Serialize;

use crate::{ActiveRoute, Result, RouteResponse, RouteStop, TrackingError, TransportMode};

const MAX_RETRIES: u32 = 3;
const REQUEST_TIMEOUT_SECS: u64 = 30;

/// Request body sent to the backend.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RouteRequest {
    /// (lon, lat) pairs in stop order
    pub coordinates: Vec<[f64; 2]>,
    pub profile: &'static str,
}

impl RouteRequest {
    pub fn new(stops: &[RouteStop], mode: TransportMode) -> Self {
        Self {
            coordinates: stops.iter().map(|s| [s.longitude, s.latitude]).collect(),
            profile: mode.profile(),
        }
    }
}

/// Backoff after the n-th consecutive 429: 2s, 4s, 8s, capped at 16s.
fn rate_limit_backoff(attempt: u32) -> Duration {
    Duration::from_millis(1000 * (1 << attempt.min(4)))
}

fn transient_backoff(attempt: u32) -> Duration {
    Duration::from_millis(500 * (1 << attempt.min(4)))
}

fn http_error(message: impl Into<String>, status_code: Option<u16>) -> TrackingError {
    TrackingError::Http {
        message: message.into(),
        status_code,
    }
}

pub struct RouteApiClient {
    client: Client,
    base_url: String,
    api_key: Option<String>,
}

impl RouteApiClient {
    pub fn new(base_url: &str, api_key: Option<String>) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .map_err(|e| http_error(format!("Failed to create HTTP client: {}", e), None))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
        })
    }

    fn routes_url(&self) -> String {
        format!("{}/routes", self.base_url)
    }

    /// Ask the backend for a route through `stops`.
    pub async fn fetch_route(
        &self,
        stops: &[RouteStop],
        mode: TransportMode,
    ) -> Result<RouteResponse> {
        let body = RouteRequest::new(stops, mode);
        let url = self.routes_url();
        let mut retries = 0;

        info!(
            "[RouteApiClient] Requesting {} route through {} stops",
            body.profile,
            stops.len()
        );

        loop {
            let mut request = self.client.post(&url).json(&body);
            if let Some(key) = &self.api_key {
                request = request.bearer_auth(key);
            }

            match request.send().await {
                Ok(resp) => {
                    let status = resp.status();

                    if status == StatusCode::TOO_MANY_REQUESTS {
                        retries += 1;
                        if retries > MAX_RETRIES {
                            return Err(http_error("Max retries exceeded (429)", Some(status.as_u16())));
                        }
                        let backoff = rate_limit_backoff(retries);
                        warn!("[RouteApiClient] 429, retry {} after {:?}", retries, backoff);
                        tokio::time::sleep(backoff).await;
                        continue;
                    }

                    if !status.is_success() {
                        return Err(http_error(format!("HTTP {}", status), Some(status.as_u16())));
                    }

                    let text = resp
                        .text()
                        .await
                        .map_err(|e| http_error(format!("Body read error: {}", e), None))?;
                    debug!("[RouteApiClient] Received {} bytes", text.len());
                    return RouteResponse::from_json(&text);
                }
                Err(e) if e.is_connect() || e.is_timeout() => {
                    retries += 1;
                    if retries > MAX_RETRIES {
                        return Err(http_error(format!("Request error: {}", e), None));
                    }
                    let backoff = transient_backoff(retries);
                    warn!(
                        "[RouteApiClient] Error: {}, retry {} after {:?}",
                        e, retries, backoff
                    );
                    tokio::time::sleep(backoff).await;
                }
                Err(e) => return Err(http_error(format!("Request error: {}", e), None)),
            }
        }
    }

    /// Fetch and build an [`ActiveRoute`], falling back to straight-line
    /// geometry when the request fails or the response is incomplete.
    pub async fn fetch_active_route(
        &self,
        id: &str,
        owner_user_id: &str,
        mode: TransportMode,
        stops: Vec<RouteStop>,
        created_at: DateTime<Utc>,
    ) -> Result<ActiveRoute> {
        let response = match self.fetch_route(&stops, mode).await {
            Ok(response) => Some(response),
            Err(e) => {
                warn!("[RouteApiClient] Route fetch failed for '{}': {}", id, e);
                None
            }
        };
        ActiveRoute::from_response(id, owner_user_id, mode, stops, response.as_ref(), created_at)
    }
}

/// Blocking wrapper for hosts without an async runtime.
pub fn fetch_route_blocking(
    base_url: &str,
    api_key: Option<String>,
    stops: &[RouteStop],
    mode: TransportMode,
) -> Result<RouteResponse> {
    let rt = tokio::runtime::Runtime::new()
        .map_err(|e| http_error(format!("Runtime error: {}", e), None))?;
    let client = RouteApiClient::new(base_url, api_key)?;
    rt.block_on(client.fetch_route(stops, mode))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn stops() -> Vec<RouteStop> {
        vec![
            RouteStop::new(47.37, 8.54, "A"),
            RouteStop::new(47.38, 8.55, "B"),
        ]
    }

    #[test]
    fn test_request_body_is_lon_lat() {
        let body = RouteRequest::new(&stops(), TransportMode::Cycling);
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["profile"], "cycling-regular");
        assert_eq!(json["coordinates"][0][0], 8.54);
        assert_eq!(json["coordinates"][0][1], 47.37);
    }

    #[test]
    fn test_backoff_grows_and_caps() {
        assert_eq!(rate_limit_backoff(1), Duration::from_secs(2));
        assert_eq!(rate_limit_backoff(3), Duration::from_secs(8));
        assert_eq!(rate_limit_backoff(10), Duration::from_secs(16));
        assert!(transient_backoff(2) < rate_limit_backoff(2));
    }

    #[test]
    fn test_base_url_trailing_slash() {
        let client = RouteApiClient::new("https://api.example.com/v1/", None).unwrap();
        assert_eq!(client.routes_url(), "https://api.example.com/v1/routes");
    }

    #[tokio::test]
    async fn test_failed_fetch_falls_back_to_straight_line() {
        // Not a valid URL: fails immediately without retries
        let client = RouteApiClient::new("not a url", None).unwrap();
        let route = client
            .fetch_active_route(
                "r1",
                "u",
                TransportMode::Walking,
                stops(),
                Utc.with_ymd_and_hms(2024, 5, 1, 9, 0, 0).unwrap(),
            )
            .await
            .unwrap();
        assert!(!route.instructions_available);
        assert_eq!(route.segments.len(), 1);
    }
}
