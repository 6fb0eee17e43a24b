//! Terrain elevation lookups
//!
//! Elevations come from a Google-style elevation API:
//! `GET <url>?locations=<lat> <lon>&key=<api_key>` returning
//! `{"status": "OK", "results": [{"elevation": 123.4}]}`.
//!
//! Successful lookups are memoized for the life of the [`ElevationService`], keyed by
//! the exact `(lat, lon, api_key)` triple. The cache is guarded by a mutex that is held
//! across the request, so concurrent lookups of the same point issue one network call.

use crate::error::{Error, Result};
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::{Arc, LazyLock, Mutex, OnceLock};
use tracing::{debug, warn};

/// Google elevation endpoint
pub const DEFAULT_ELEVATION_URL: &str = "https://maps.googleapis.com/maps/api/elevation/json";

/// Environment variable consulted when no API key is configured
pub const API_KEY_ENV: &str = "GOOGLE_API_KEY";

static SHARED: LazyLock<Arc<ElevationService>> =
    LazyLock::new(|| Arc::new(ElevationService::new(DEFAULT_ELEVATION_URL, HttpTransport::new())));

/// Blocking HTTP GET returning the response body
pub trait ElevationTransport: Send + Sync {
    fn get(&self, url: &str, query: &[(&str, String)]) -> Result<String>;
}

/// [`ElevationTransport`] over a blocking reqwest client, built on first request
pub struct HttpTransport {
    client: OnceLock<reqwest::blocking::Client>,
}

impl HttpTransport {
    pub fn new() -> Self {
        Self {
            client: OnceLock::new(),
        }
    }
}

impl Default for HttpTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl ElevationTransport for HttpTransport {
    fn get(&self, url: &str, query: &[(&str, String)]) -> Result<String> {
        let response = self
            .client
            .get_or_init(reqwest::blocking::Client::new)
            .get(url)
            .query(query)
            .send()
            .map_err(|e| Error::ExternalService(format!("elevation request failed: {}", e)))?;
        response
            .text()
            .map_err(|e| Error::ExternalService(format!("elevation response unreadable: {}", e)))
    }
}

#[derive(Debug, Deserialize)]
struct ElevationResponse {
    status: String,
    #[serde(default)]
    results: Vec<ElevationResult>,
    #[serde(default)]
    error_message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ElevationResult {
    elevation: f64,
}

type CacheKey = (u64, u64, String);

/// Memoizing elevation client. Safe to share across threads.
pub struct ElevationService {
    url: String,
    transport: Box<dyn ElevationTransport>,
    cache: Mutex<HashMap<CacheKey, f64>>,
}

impl ElevationService {
    pub fn new(url: impl Into<String>, transport: impl ElevationTransport + 'static) -> Self {
        Self {
            url: url.into(),
            transport: Box::new(transport),
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// Process-wide instance against [`DEFAULT_ELEVATION_URL`]
    pub fn shared() -> Arc<ElevationService> {
        Arc::clone(&SHARED)
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Terrain elevation in meters at `(lat, lon)`.
    ///
    /// `api_key` falls back to the `GOOGLE_API_KEY` environment variable. A non-OK
    /// status, transport failure or empty result set is an `ExternalService` error and
    /// is not cached.
    pub fn elevation(&self, lat: f64, lon: f64, api_key: Option<&str>) -> Result<f64> {
        let api_key = match api_key {
            Some(key) => key.to_string(),
            None => std::env::var(API_KEY_ENV).map_err(|_| {
                Error::ExternalService(format!("no elevation API key given and {} is unset", API_KEY_ENV))
            })?,
        };
        let key = (lat.to_bits(), lon.to_bits(), api_key);

        let mut cache = self.cache.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(&elevation) = cache.get(&key) {
            debug!("elevation cache hit for ({}, {})", lat, lon);
            return Ok(elevation);
        }

        let elevation = self.request(lat, lon, &key.2)?;
        cache.insert(key, elevation);
        Ok(elevation)
    }

    fn request(&self, lat: f64, lon: f64, api_key: &str) -> Result<f64> {
        debug!("requesting elevation for ({}, {})", lat, lon);
        let query = [
            ("locations", format!("{} {}", lat, lon)),
            ("key", api_key.to_string()),
        ];
        let body = self.transport.get(&self.url, &query)?;
        let response: ElevationResponse = serde_json::from_str(&body)
            .map_err(|e| Error::ExternalService(format!("unexpected elevation response: {}", e)))?;

        if response.status != "OK" {
            warn!("Couldn't access terrain elevation API: status {}", response.status);
            return Err(Error::ExternalService(match response.error_message {
                Some(message) => format!("elevation API status {}: {}", response.status, message),
                None => format!("elevation API status {}", response.status),
            }));
        }
        response
            .results
            .first()
            .map(|r| r.elevation)
            .ok_or_else(|| Error::ExternalService("elevation API returned no results".into()))
    }

    /// Number of memoized lookups
    pub fn cached_len(&self) -> usize {
        self.cache.lock().map(|c| c.len()).unwrap_or_else(|p| p.into_inner().len())
    }

    pub fn clear(&self) {
        self.cache.lock().unwrap_or_else(|p| p.into_inner()).clear();
    }
}
