//! Best-effort visitor geolocation.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, warn};

/// Coarse location attached to a presence row.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GeoLocation {
    pub country: Option<String>,
    pub region: Option<String>,
    pub city: Option<String>,
}

#[async_trait]
pub trait GeoLocator: Send + Sync {
    /// Locate the current client. `None` on any failure.
    async fn locate(&self) -> Option<GeoLocation>;
}

/// Never locates anything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoGeoLocator;

#[async_trait]
impl GeoLocator for NoGeoLocator {
    async fn locate(&self) -> Option<GeoLocation> {
        None
    }
}

/// Looks up the caller's IP with a public JSON endpoint.
pub struct HttpGeoLocator {
    client: reqwest::Client,
    url: String,
}

impl HttpGeoLocator {
    pub fn new(url: &str) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(5))
            .build()
            .expect("failed to build HTTP client");
        Self {
            client,
            url: url.to_string(),
        }
    }
}

/// Accepts both the ip-api.com and ipapi.co field names.
#[derive(Debug, Deserialize)]
struct RawLocation {
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    country: Option<String>,
    #[serde(default)]
    country_name: Option<String>,
    #[serde(default)]
    region: Option<String>,
    #[serde(default, rename = "regionName")]
    region_name: Option<String>,
    #[serde(default)]
    city: Option<String>,
}

impl RawLocation {
    fn into_location(self) -> Option<GeoLocation> {
        if self.status.as_deref() == Some("fail") {
            return None;
        }
        let non_empty = |v: Option<String>| v.filter(|s| !s.trim().is_empty());
        let location = GeoLocation {
            country: non_empty(self.country_name).or_else(|| non_empty(self.country)),
            region: non_empty(self.region_name).or_else(|| non_empty(self.region)),
            city: non_empty(self.city),
        };
        if location == GeoLocation::default() {
            None
        } else {
            Some(location)
        }
    }
}

#[async_trait]
impl GeoLocator for HttpGeoLocator {
    async fn locate(&self) -> Option<GeoLocation> {
        let response = match self.client.get(&self.url).send().await {
            Ok(r) if r.status().is_success() => r,
            Ok(r) => {
                warn!(status = %r.status(), "Geolocation lookup rejected");
                return None;
            }
            Err(e) => {
                warn!(error = %e, "Geolocation lookup failed");
                return None;
            }
        };
        match response.json::<RawLocation>().await {
            Ok(raw) => {
                let location = raw.into_location();
                debug!(?location, "Geolocation resolved");
                location
            }
            Err(e) => {
                warn!(error = %e, "Geolocation response unreadable");
                None
            }
        }
    }
}
