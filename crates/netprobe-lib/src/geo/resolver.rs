//! HTTP geolocation resolver
//!
//! Talks to an ip-api.com compatible endpoint: `GET <base>/<ip>` answering
//! `{"status": "success", "country": .., "city": .., "lat": .., "lon": ..}`.

use super::{is_lookup_candidate, GeoResolver};
use crate::error::GeoError;
use crate::models::Location;
use crate::observability::ProbeMetrics;
use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

/// Public endpoint used when nothing else is configured
pub const DEFAULT_GEO_API_URL: &str = "http://ip-api.com/json/";

/// Configuration for the HTTP resolver
#[derive(Debug, Clone)]
pub struct GeoResolverConfig {
    /// Base URL; the IP address is appended as the last path segment
    pub base_url: String,
    /// Per-request timeout
    pub timeout: Duration,
}

impl Default for GeoResolverConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_GEO_API_URL.to_string(),
            timeout: Duration::from_secs(5),
        }
    }
}

#[derive(Debug, Deserialize)]
struct LookupResponse {
    status: String,
    #[serde(default)]
    message: Option<String>,
    country: Option<String>,
    city: Option<String>,
    lat: Option<f64>,
    lon: Option<f64>,
}

/// Geolocation resolver backed by a remote HTTP service
pub struct HttpGeoResolver {
    client: Client,
    base_url: String,
    metrics: ProbeMetrics,
}

impl HttpGeoResolver {
    /// Create a resolver; fails only on an invalid base URL or client setup
    pub fn new(config: GeoResolverConfig) -> Result<Self> {
        url::Url::parse(&config.base_url)
            .with_context(|| format!("Invalid geolocation URL: {}", config.base_url))?;

        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            metrics: ProbeMetrics::new(),
        })
    }

    /// Look up a single address, reporting why it failed
    pub async fn lookup(&self, ip: &str) -> std::result::Result<Location, GeoError> {
        let url = format!("{}/{}", self.base_url, ip);

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| GeoError::Transport(e.to_string()))?;

        if !response.status().is_success() {
            return Err(GeoError::BadResponse(format!("HTTP {}", response.status())));
        }

        let body: LookupResponse = response
            .json()
            .await
            .map_err(|e| GeoError::BadResponse(e.to_string()))?;

        if body.status != "success" {
            return Err(GeoError::BadResponse(
                body.message.unwrap_or_else(|| format!("status {}", body.status)),
            ));
        }

        match (body.lat, body.lon) {
            (Some(lat), Some(lon)) => Ok(Location {
                country: body.country.unwrap_or_default(),
                city: body.city.unwrap_or_default(),
                lat,
                lon,
            }),
            _ => Err(GeoError::BadResponse("missing coordinates".to_string())),
        }
    }
}

#[async_trait]
impl GeoResolver for HttpGeoResolver {
    async fn resolve(&self, ip: &str) -> Option<Location> {
        if !is_lookup_candidate(ip) {
            return None;
        }

        match self.lookup(ip).await {
            Ok(location) => Some(location),
            Err(e) => {
                self.metrics.inc_geo_lookup_failures();
                debug!(ip = %ip, error = %e, "Geolocation lookup failed");
                None
            }
        }
    }
}
