//! HTTP client for the run-session REST API.
//!
//! This module provides the remote [`SessionBackend`] with:
//! - Connection pooling through a shared reqwest client
//! - Bearer-token authentication that can be swapped at runtime
//! - Automatic retry with exponential backoff on 429, 5xx and transport errors

use std::sync::RwLock;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use log::{debug, info, warn};
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::{Deserialize, Serialize};

use crate::backend::SessionBackend;
use crate::error::{Result, TrackingError};
use crate::{RunSession, SessionRef, SessionSummary, TrackPoint};

const MAX_RETRIES: u32 = 3;
const REQUEST_TIMEOUT_SECS: u64 = 30;
const BASE_BACKOFF_MS: u64 = 500;

// ============================================================================
// Wire types
// ============================================================================

/// Identifiers come back as strings or integers depending on the endpoint.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum ApiId {
    Text(String),
    Number(i64),
}

impl ApiId {
    fn into_string(self) -> String {
        match self {
            ApiId::Text(s) => s,
            ApiId::Number(n) => n.to_string(),
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CreateSessionRequest<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    route_id: Option<&'a str>,
    is_public: bool,
}

#[derive(Debug, Deserialize)]
struct CreateSessionResponse {
    id: ApiId,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApiTrackPoint {
    sequence: u32,
    latitude: f64,
    longitude: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    elevation: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    speed: Option<f64>,
    recorded_at: DateTime<Utc>,
}

impl From<&TrackPoint> for ApiTrackPoint {
    fn from(p: &TrackPoint) -> Self {
        Self {
            sequence: p.sequence,
            latitude: p.latitude,
            longitude: p.longitude,
            elevation: p.elevation,
            speed: p.speed,
            recorded_at: p.timestamp,
        }
    }
}

impl From<ApiTrackPoint> for TrackPoint {
    fn from(p: ApiTrackPoint) -> Self {
        Self {
            sequence: p.sequence,
            latitude: p.latitude,
            longitude: p.longitude,
            elevation: p.elevation,
            speed: p.speed,
            timestamp: p.recorded_at,
        }
    }
}

#[derive(Debug, Serialize)]
struct AppendPointsRequest {
    points: Vec<ApiTrackPoint>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct EndSessionRequest {
    moving_time_s: u64,
    total_distance_m: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    elevation_gain_m: Option<f64>,
    avg_pace_sec_per_km: f64,
}

impl From<&SessionSummary> for EndSessionRequest {
    fn from(s: &SessionSummary) -> Self {
        Self {
            moving_time_s: s.moving_time_s,
            total_distance_m: s.total_distance_m,
            elevation_gain_m: s.elevation_gain_m,
            avg_pace_sec_per_km: s.avg_pace_sec_per_km,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApiRunSession {
    id: ApiId,
    #[serde(default)]
    route_id: Option<ApiId>,
    #[serde(default)]
    is_public: bool,
    started_at: DateTime<Utc>,
    #[serde(default)]
    ended_at: Option<DateTime<Utc>>,
    #[serde(default)]
    moving_time_s: u64,
    #[serde(default)]
    total_distance_m: f64,
    #[serde(default)]
    elevation_gain_m: Option<f64>,
    #[serde(default)]
    avg_pace_sec_per_km: Option<f64>,
    #[serde(default)]
    points: Vec<ApiTrackPoint>,
    #[serde(default)]
    created_at: Option<DateTime<Utc>>,
}

impl From<ApiRunSession> for RunSession {
    fn from(s: ApiRunSession) -> Self {
        Self {
            id: s.id.into_string(),
            route_id: s.route_id.map(ApiId::into_string),
            is_public: s.is_public,
            started_at: s.started_at,
            ended_at: s.ended_at,
            moving_time_s: s.moving_time_s,
            total_distance_m: s.total_distance_m,
            elevation_gain_m: s.elevation_gain_m,
            avg_pace_sec_per_km: s.avg_pace_sec_per_km,
            points: s.points.into_iter().map(TrackPoint::from).collect(),
            created_at: s.created_at.unwrap_or(s.started_at),
        }
    }
}

// ============================================================================
// Retry policy
// ============================================================================

fn is_retryable_status(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
}

/// Exponential backoff: 1s, 2s, 4s...
fn backoff_delay(attempt: u32) -> Duration {
    Duration::from_millis(BASE_BACKOFF_MS * (1 << attempt.min(6)))
}

// ============================================================================
// Backend
// ============================================================================

/// REST implementation of [`SessionBackend`].
pub struct HttpSessionBackend {
    client: Client,
    base_url: String,
    access_token: RwLock<Option<String>>,
}

impl HttpSessionBackend {
    /// Create a backend for the given API base URL (e.g. `https://api.example.com/v1`).
    pub fn new(base_url: &str) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .map_err(|e| TrackingError::Http {
                message: format!("Failed to create HTTP client: {}", e),
                status_code: None,
            })?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            access_token: RwLock::new(None),
        })
    }

    /// Create a backend that already holds an access token.
    pub fn with_access_token(base_url: &str, token: impl Into<String>) -> Result<Self> {
        let backend = Self::new(base_url)?;
        backend.set_access_token(token);
        Ok(backend)
    }

    pub fn set_access_token(&self, token: impl Into<String>) {
        if let Ok(mut guard) = self.access_token.write() {
            *guard = Some(token.into());
        }
    }

    pub fn clear_access_token(&self) {
        if let Ok(mut guard) = self.access_token.write() {
            *guard = None;
        }
    }

    fn token(&self) -> Option<String> {
        self.access_token.read().ok().and_then(|t| t.clone())
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    /// Send a request, retrying transient failures.
    ///
    /// `build` is called once per attempt since request builders are consumed.
    async fn send_with_retry<F>(&self, operation: &str, build: F) -> Result<Response>
    where
        F: Fn(&Client) -> RequestBuilder,
    {
        let mut retries = 0;

        loop {
            let mut request = build(&self.client);
            if let Some(token) = self.token() {
                request = request.bearer_auth(token);
            }

            match request.send().await {
                Ok(resp) => {
                    let status = resp.status();

                    if status.is_success() {
                        debug!("[HttpSessionBackend] {} -> {}", operation, status);
                        return Ok(resp);
                    }

                    if is_retryable_status(status) && retries < MAX_RETRIES {
                        retries += 1;
                        let backoff = backoff_delay(retries);
                        warn!(
                            "[HttpSessionBackend] {} for {}, retry {} after {:?}",
                            status, operation, retries, backoff
                        );
                        tokio::time::sleep(backoff).await;
                        continue;
                    }

                    let body = resp.text().await.unwrap_or_default();
                    return Err(TrackingError::Http {
                        message: format!("{} failed: {}", operation, body),
                        status_code: Some(status.as_u16()),
                    });
                }
                Err(e) => {
                    if retries >= MAX_RETRIES {
                        return Err(e.into());
                    }
                    retries += 1;
                    let backoff = backoff_delay(retries);
                    warn!(
                        "[HttpSessionBackend] Error for {}: {}, retry {} after {:?}",
                        operation, e, retries, backoff
                    );
                    tokio::time::sleep(backoff).await;
                }
            }
        }
    }
}

impl SessionBackend for HttpSessionBackend {
    fn has_credential(&self) -> bool {
        self.token().is_some()
    }

    fn create_session<'a>(
        &'a self,
        route_id: Option<&'a str>,
        is_public: bool,
    ) -> BoxFuture<'a, Result<SessionRef>> {
        Box::pin(async move {
            let url = self.url("run-sessions");
            let body = CreateSessionRequest {
                route_id,
                is_public,
            };
            let resp = self
                .send_with_retry("create session", |c| c.post(&url).json(&body))
                .await?;
            let created: CreateSessionResponse = resp.json().await?;
            let id = created.id.into_string();
            info!("[HttpSessionBackend] Created session {}", id);
            Ok(SessionRef { id })
        })
    }

    fn append_points<'a>(
        &'a self,
        session_id: &'a str,
        points: &'a [TrackPoint],
    ) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let url = self.url(&format!("run-sessions/{}/points", session_id));
            let body = AppendPointsRequest {
                points: points.iter().map(ApiTrackPoint::from).collect(),
            };
            self.send_with_retry("append points", |c| c.post(&url).json(&body))
                .await?;
            debug!(
                "[HttpSessionBackend] Appended {} points to {}",
                points.len(),
                session_id
            );
            Ok(())
        })
    }

    fn end_session<'a>(
        &'a self,
        session_id: &'a str,
        summary: &'a SessionSummary,
    ) -> BoxFuture<'a, Result<RunSession>> {
        Box::pin(async move {
            let url = self.url(&format!("run-sessions/{}/end", session_id));
            let body = EndSessionRequest::from(summary);
            let resp = self
                .send_with_retry("end session", |c| c.post(&url).json(&body))
                .await?;
            let session: ApiRunSession = resp.json().await?;
            Ok(session.into())
        })
    }

    fn delete_session<'a>(&'a self, session_id: &'a str) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let url = self.url(&format!("run-sessions/{}", session_id));
            self.send_with_retry("delete session", |c| c.delete(&url))
                .await?;
            info!("[HttpSessionBackend] Deleted session {}", session_id);
            Ok(())
        })
    }
}
