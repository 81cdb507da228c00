//! HTTP API client with bearer-token authentication.

use std::time::Duration;

use captain_shared::{
    ApiError, AuthResponse, Coordinate, DriverProfile, LocationUpdate, LoginRequest,
    RegisterRequest, RideDetails, RideHistoryEntry,
};
use reqwest::{Client, RequestBuilder};
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::config::ClientConfig;

/// HTTP client for the ride-hailing backend.
///
/// Cloning is cheap; clones share the underlying connection pool.
#[derive(Debug, Clone)]
pub struct ApiClient {
    client: Client,
    base_url: String,
    token: Option<String>,
}

fn map_send_error(e: reqwest::Error) -> ApiError {
    if e.is_timeout() {
        ApiError::Timeout
    } else {
        ApiError::Network(e.to_string())
    }
}

impl ApiClient {
    /// Create a new API client with a fixed per-request timeout
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, ApiError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ApiError::Network(e.to_string()))?;
        Ok(Self {
            client,
            base_url: base_url.into(),
            token: None,
        })
    }

    pub fn from_config(config: &ClientConfig) -> Result<Self, ApiError> {
        Self::new(config.api_base_url.clone(), config.http_timeout)
    }

    /// Copy of this client that authenticates with `token`.
    /// Blank tokens are treated as absent.
    pub fn with_token(&self, token: Option<&str>) -> Self {
        Self {
            client: self.client.clone(),
            base_url: self.base_url.clone(),
            token: token
                .map(str::trim)
                .filter(|t| !t.is_empty())
                .map(str::to_string),
        }
    }

    pub fn has_token(&self) -> bool {
        self.token.is_some()
    }

    fn url(&self, path: &str) -> String {
        if path.starts_with("http://") || path.starts_with("https://") {
            return path.to_string();
        }
        let base = self.base_url.trim_end_matches('/');
        let path = path.trim_start_matches('/');
        format!("{base}/{path}")
    }

    fn authorized(&self, rb: RequestBuilder) -> RequestBuilder {
        match &self.token {
            Some(token) => rb.bearer_auth(token),
            None => rb,
        }
    }

    /// Send a request and return the body of a 2xx response.
    async fn execute(&self, rb: RequestBuilder) -> Result<String, ApiError> {
        let resp = self
            .authorized(rb)
            .send()
            .await
            .map_err(map_send_error)?;

        let status = resp.status().as_u16();
        let is_success = resp.status().is_success();
        let text = resp
            .text()
            .await
            .map_err(|e| ApiError::Network(format!("failed to read body: {e}")))?;

        if !is_success {
            return Err(ApiError::Http { status, body: text });
        }
        Ok(text)
    }

    /// Make a GET request
    pub async fn get_json<TRes: DeserializeOwned>(&self, path: &str) -> Result<TRes, ApiError> {
        let text = self.execute(self.client.get(self.url(path))).await?;
        serde_json::from_str(&text).map_err(|e| ApiError::Deserialize(e.to_string()))
    }

    /// Make a POST request with JSON body
    pub async fn post_json<TReq: Serialize, TRes: DeserializeOwned>(
        &self,
        path: &str,
        body: &TReq,
    ) -> Result<TRes, ApiError> {
        let text = self
            .execute(self.client.post(self.url(path)).json(body))
            .await?;

        if text.is_empty() {
            serde_json::from_str("null").map_err(|e| ApiError::Deserialize(e.to_string()))
        } else {
            serde_json::from_str(&text).map_err(|e| ApiError::Deserialize(e.to_string()))
        }
    }

    /// Make a POST request whose response body is irrelevant
    pub async fn post_empty<TReq: Serialize>(
        &self,
        path: &str,
        body: Option<&TReq>,
    ) -> Result<(), ApiError> {
        let mut rb = self.client.post(self.url(path));
        if let Some(body) = body {
            rb = rb.json(body);
        }
        self.execute(rb).await.map(|_| ())
    }

    // --- Auth ---

    pub async fn login(&self, phone: &str, password: &str) -> Result<AuthResponse, ApiError> {
        let body = LoginRequest {
            phone: phone.to_string(),
            password: password.to_string(),
        };
        self.post_json("/api/auth/login", &body).await
    }

    pub async fn register(&self, request: &RegisterRequest) -> Result<AuthResponse, ApiError> {
        self.post_json("/api/auth/register", request).await
    }

    // --- Rides ---

    pub async fn accept_ride(&self, ride_id: &str) -> Result<(), ApiError> {
        let path = format!("/api/rides/{}/accept", urlencoding::encode(ride_id));
        self.post_empty::<()>(&path, None).await
    }

    pub async fn reject_ride(&self, ride_id: &str) -> Result<(), ApiError> {
        let path = format!("/api/rides/{}/reject", urlencoding::encode(ride_id));
        self.post_empty::<()>(&path, None).await
    }

    pub async fn ride_details(&self, ride_id: &str) -> Result<RideDetails, ApiError> {
        self.get_json(&format!("/api/rides/{}", urlencoding::encode(ride_id)))
            .await
    }

    // --- Driver ---

    pub async fn profile(&self) -> Result<DriverProfile, ApiError> {
        self.get_json("/api/driver/profile").await
    }

    pub async fn ride_history(&self) -> Result<Vec<RideHistoryEntry>, ApiError> {
        self.get_json("/api/driver/rides").await
    }

    pub async fn update_location(&self, position: Coordinate) -> Result<(), ApiError> {
        self.post_empty("/api/driver/location", Some(&LocationUpdate::from(position)))
            .await
    }
}
