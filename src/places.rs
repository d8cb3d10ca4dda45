//! Client for the Places geospatial lookup and statistics service.
//!
//! Resolves place-name slugs to geometries and time-series statistics.
//! Reference-data lookups (`find`, `shape`, `prefix`) are memoized through
//! the response cache; everything else hits the backend every call.

use std::env;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;
use serde_json::Value;

use crate::auth::AuthContext;
use crate::cache::{CacheKey, ResponseCache};
use crate::http::Timeout;
use crate::service::Service;

/// Environment variable overriding the default backend URL.
pub const URL_ENV_VAR: &str = "PLACES_URL";

const DEFAULT_URL: &str = "https://platform-services.descarteslabs.com/waldo/dev";

/// Geometry payloads are large; allow a longer read window than the
/// service default.
const TIMEOUT: Timeout = Timeout::new(Duration::from_millis(9500), Duration::from_secs(120));

const DEFAULT_CACHE_MAXSIZE: usize = 10;
const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(600);

/// A candidate place returned by [`Places::find`].
#[derive(Deserialize, Debug, Clone, PartialEq)]
pub struct PlaceMatch {
    pub id: i64,
    pub name: String,
    pub path: String,
    pub placetype: String,
    pub slug: String,
    #[serde(default)]
    pub bbox: Vec<f64>,
}

fn resolve_url(override_url: Option<String>) -> String {
    override_url
        .or_else(|| env::var(URL_ENV_VAR).ok())
        .unwrap_or_else(|| DEFAULT_URL.to_string())
}

/// Places service client.
pub struct Places {
    service: Service,
    cache: ResponseCache,
}

impl Places {
    /// Connect to the default backend (or `PLACES_URL`) with default cache
    /// sizing.
    pub fn new(auth: Arc<AuthContext>) -> Self {
        Self::configured(auth, None, DEFAULT_CACHE_MAXSIZE, DEFAULT_CACHE_TTL)
    }

    /// Connect to a specific backend instance.
    pub fn with_url(auth: Arc<AuthContext>, url: impl Into<String>) -> Self {
        Self::configured(
            auth,
            Some(url.into()),
            DEFAULT_CACHE_MAXSIZE,
            DEFAULT_CACHE_TTL,
        )
    }

    /// Full constructor: explicit URL override and cache sizing.
    pub fn configured(
        auth: Arc<AuthContext>,
        url: Option<String>,
        cache_maxsize: usize,
        cache_ttl: Duration,
    ) -> Self {
        let url = resolve_url(url);
        Self {
            service: Service::new(url, auth).with_timeout(TIMEOUT),
            cache: ResponseCache::new(cache_maxsize, cache_ttl),
        }
    }

    /// Assemble from an already configured service and cache.
    pub fn from_service(service: Service, cache: ResponseCache) -> Self {
        Self { service, cache }
    }

    pub fn base_url(&self) -> &str {
        self.service.base_url()
    }

    /// List the known place types, coarsest first.
    pub async fn placetypes(&self) -> Result<Vec<String>> {
        let value = self.service.get_json("/placetypes", &[]).await?;
        serde_json::from_value(value).context("Unexpected placetypes payload")
    }

    /// A random location as GeoJSON. Never cached: every call is a fresh
    /// draw.
    pub async fn random(&self, geom: Option<&str>, placetype: Option<&str>) -> Result<Value> {
        let mut query = vec![("geom", geom.unwrap_or("low").to_string())];
        if let Some(placetype) = placetype {
            query.push(("placetype", placetype.to_string()));
        }
        self.service.get_json("/random", &query).await
    }

    /// Find candidate slugs for a full or partial underscore-separated
    /// path. `filters` narrows the search (e.g. `placetype=country`) and is
    /// passed through as query parameters.
    pub async fn find(&self, path: &str, filters: &[(&str, &str)]) -> Result<Vec<PlaceMatch>> {
        let mut key = CacheKey::new("find").arg(path);
        for (name, value) in filters {
            key = key.kwarg(*name, *value);
        }

        let url = format!("/find/{}", path);
        let query: Vec<(&str, String)> = filters
            .iter()
            .map(|(name, value)| (*name, value.to_string()))
            .collect();

        let value = self
            .cache
            .get_or_compute(key, || self.service.get_json(&url, &query))
            .await?;
        serde_json::from_value(value).context("Unexpected find payload")
    }

    /// Geometry for a specific slug as a GeoJSON `Feature`.
    ///
    /// `output` defaults to `geojson`, `geom` to `low` resolution.
    pub async fn shape(
        &self,
        slug: &str,
        output: Option<&str>,
        geom: Option<&str>,
    ) -> Result<Value> {
        let output = output.unwrap_or("geojson");
        let geom = geom.unwrap_or("low");

        let key = CacheKey::new("shape")
            .arg(slug)
            .kwarg("output", output)
            .kwarg("geom", geom);
        let url = format!("/shape/{}.{}", slug, output);
        let query = [("geom", geom.to_string())];

        self.cache
            .get_or_compute(key, || self.service.get_json(&url, &query))
            .await
    }

    /// All places under a slug prefix, as a GeoJSON or TopoJSON
    /// `FeatureCollection`. `placetype` restricts the result.
    pub async fn prefix(
        &self,
        slug: &str,
        output: Option<&str>,
        placetype: Option<&str>,
        geom: Option<&str>,
    ) -> Result<Value> {
        let output = output.unwrap_or("geojson");
        let geom = geom.unwrap_or("low");

        let key = CacheKey::new("prefix")
            .arg(slug)
            .kwarg("output", output)
            .kwarg("geom", geom)
            .kwarg_opt("placetype", placetype);
        let url = format!("/prefix/{}.{}", slug, output);
        let mut query = Vec::new();
        if let Some(placetype) = placetype {
            query.push(("placetype", placetype.to_string()));
        }
        query.push(("geom", geom.to_string()));

        self.cache
            .get_or_compute(key, || self.service.get_json(&url, &query))
            .await
    }

    /// List the known data sources.
    pub async fn sources(&self) -> Result<Value> {
        self.service.get_json("/sources", &[]).await
    }

    /// List the known data categories.
    pub async fn categories(&self) -> Result<Value> {
        self.service.get_json("/categories", &[]).await
    }

    /// List the known metrics.
    pub async fn metrics(&self) -> Result<Value> {
        self.service.get_json("/metrics", &[]).await
    }

    /// All values for a prefix search at a point in time. `placetype`
    /// defaults to `county`.
    pub async fn data(
        &self,
        slug: &str,
        source: Option<&str>,
        category: Option<&str>,
        metric: Option<&str>,
        date: Option<&str>,
        placetype: Option<&str>,
    ) -> Result<Value> {
        let mut query = Vec::new();
        if let Some(source) = source {
            query.push(("source", source.to_string()));
        }
        if let Some(category) = category {
            query.push(("category", category.to_string()));
        }
        if let Some(metric) = metric {
            query.push(("metric", metric.to_string()));
        }
        if let Some(date) = date {
            query.push(("date", date.to_string()));
        }
        query.push(("placetype", placetype.unwrap_or("county").to_string()));

        self.service
            .get_json(&format!("/data/{}", slug), &query)
            .await
    }

    /// Time series for a specific place.
    pub async fn statistics(
        &self,
        slug: &str,
        source: Option<&str>,
        category: Option<&str>,
        metric: Option<&str>,
    ) -> Result<Value> {
        let mut query = Vec::new();
        if let Some(source) = source {
            query.push(("source", source.to_string()));
        }
        if let Some(category) = category {
            query.push(("category", category.to_string()));
        }
        if let Some(metric) = metric {
            query.push(("metric", metric.to_string()));
        }

        self.service
            .get_json(&format!("/statistics/{}", slug), &query)
            .await
    }

    /// Point values for a specific place. List-valued filters repeat the
    /// query key once per element.
    pub async fn value(
        &self,
        slug: &str,
        sources: &[&str],
        categories: &[&str],
        metrics: &[&str],
        date: Option<&str>,
    ) -> Result<Value> {
        let mut query = Vec::new();
        for source in sources {
            query.push(("source", source.to_string()));
        }
        for category in categories {
            query.push(("category", category.to_string()));
        }
        for metric in metrics {
            query.push(("metric", metric.to_string()));
        }
        if let Some(date) = date {
            query.push(("date", date.to_string()));
        }

        self.service
            .get_json(&format!("/value/{}", slug), &query)
            .await
    }
}
