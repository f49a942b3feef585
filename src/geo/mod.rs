//! Geocoding providers and great-circle distance.
//!
//! Provider lookups treat "nothing found" as a valid outcome: every method
//! returns `None`/empty on misses and on provider failures, logging the
//! failure instead of propagating it.

use async_trait::async_trait;
use log::{debug, warn};
use serde::Serialize;
use serde_json::Value;
use std::time::Duration;

use crate::config::GeocodeConfig;

const EARTH_RADIUS_KM: f64 = 6371.0;

/// Great-circle distance between two points on a spherical Earth.
pub fn haversine_km(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let dlat = (lat2 - lat1).to_radians();
    let dlon = (lon2 - lon1).to_radians();
    let a = (dlat / 2.0).sin().powi(2)
        + lat1.to_radians().cos() * lat2.to_radians().cos() * (dlon / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_KM * a.sqrt().atan2((1.0 - a).sqrt())
}

#[derive(Debug, Clone, Serialize)]
pub struct AddressSuggestion {
    pub display_name: String,
    pub latitude: f64,
    pub longitude: f64,
}

#[async_trait]
pub trait GeoResolver: Send + Sync {
    async fn geocode(&self, address: &str) -> Option<(f64, f64)>;
    async fn reverse_geocode(&self, lat: f64, lon: f64) -> Option<String>;
    async fn suggest(&self, query: &str, city: Option<&str>) -> Vec<AddressSuggestion>;
}

/// Nominatim-first resolver with an optional catalog-API fallback for
/// addresses Nominatim has weak coverage of.
pub struct HttpGeoResolver {
    client: reqwest::Client,
    config: GeocodeConfig,
}

impl HttpGeoResolver {
    pub fn new(config: GeocodeConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            config,
        }
    }

    async fn nominatim_geocode(&self, address: &str) -> Option<(f64, f64)> {
        let url = format!(
            "{}/search?q={}&format=json&limit=5",
            self.config.nominatim_url,
            urlencoding::encode(address)
        );
        let response = self
            .client
            .get(&url)
            .header("User-Agent", &self.config.user_agent)
            .timeout(Duration::from_secs(4))
            .send()
            .await
            .ok()?;
        if !response.status().is_success() {
            return None;
        }
        let results: Vec<Value> = response.json().await.ok()?;

        // Trust Nominatim when it returns several candidates or one with
        // high importance; otherwise let the fallback provider try.
        let confident = results.len() >= 3
            || results
                .first()
                .and_then(|r| r["importance"].as_f64())
                .map(|i| i > 0.6)
                .unwrap_or(false);
        if !confident {
            return None;
        }
        let first = results.first()?;
        let lat = first["lat"].as_str()?.parse().ok()?;
        let lon = first["lon"].as_str()?.parse().ok()?;
        Some((lat, lon))
    }

    async fn catalog_geocode(&self, address: &str) -> Option<(f64, f64)> {
        let key = self.config.catalog_key.as_deref()?;
        let url = format!(
            "{}/items/geocode?q={}&key={}&fields=items.point",
            self.config.catalog_url,
            urlencoding::encode(address),
            key
        );
        let response = self.client.get(&url).send().await.ok()?;
        if !response.status().is_success() {
            return None;
        }
        let json: Value = response.json().await.ok()?;
        let point = &json["result"]["items"][0]["point"];
        Some((point["lat"].as_f64()?, point["lon"].as_f64()?))
    }

    async fn nominatim_reverse(&self, lat: f64, lon: f64) -> Option<String> {
        let url = format!(
            "{}/reverse?lat={lat}&lon={lon}&format=json",
            self.config.nominatim_url
        );
        let response = self
            .client
            .get(&url)
            .header("User-Agent", &self.config.user_agent)
            .timeout(Duration::from_secs(4))
            .send()
            .await
            .ok()?;
        if !response.status().is_success() {
            return None;
        }
        let json: Value = response.json().await.ok()?;
        json["display_name"].as_str().map(|s| s.to_string())
    }

    async fn catalog_reverse(&self, lat: f64, lon: f64) -> Option<String> {
        let key = self.config.catalog_key.as_deref()?;
        let url = format!(
            "{}/items/geocode?lat={lat}&lon={lon}&key={key}&fields=items.full_name",
            self.config.catalog_url
        );
        let response = self.client.get(&url).send().await.ok()?;
        let json: Value = response.json().await.ok()?;
        let item = &json["result"]["items"][0];
        item["full_name"]
            .as_str()
            .or_else(|| item["name"].as_str())
            .map(|s| s.to_string())
    }
}

#[async_trait]
impl GeoResolver for HttpGeoResolver {
    async fn geocode(&self, address: &str) -> Option<(f64, f64)> {
        if let Some(coords) = self.nominatim_geocode(address).await {
            return Some(coords);
        }
        debug!("nominatim had no confident match for {address:?}, trying catalog fallback");
        self.catalog_geocode(address).await
    }

    async fn reverse_geocode(&self, lat: f64, lon: f64) -> Option<String> {
        if let Some(address) = self.nominatim_reverse(lat, lon).await {
            return Some(address);
        }
        self.catalog_reverse(lat, lon).await
    }

    async fn suggest(&self, query: &str, city: Option<&str>) -> Vec<AddressSuggestion> {
        let Some(key) = self.config.catalog_key.as_deref() else {
            warn!("CATALOG_GEO_KEY not set, address suggestions disabled");
            return Vec::new();
        };
        let q = match city {
            Some(city) => format!("{city} {query}"),
            None => query.to_string(),
        };
        let url = format!(
            "{}/suggests?q={}&key={}&fields=items.point,items.full_name",
            self.config.catalog_url,
            urlencoding::encode(&q),
            key
        );
        let Ok(response) = self.client.get(&url).send().await else {
            return Vec::new();
        };
        let Ok(json) = response.json::<Value>().await else {
            return Vec::new();
        };
        let Some(items) = json["result"]["items"].as_array() else {
            return Vec::new();
        };
        items
            .iter()
            .filter_map(|item| {
                let point = item.get("point")?;
                Some(AddressSuggestion {
                    display_name: item["full_name"]
                        .as_str()
                        .or_else(|| item["name"].as_str())
                        .unwrap_or_default()
                        .to_string(),
                    latitude: point["lat"].as_f64()?,
                    longitude: point["lon"].as_f64()?,
                })
            })
            .take(5)
            .collect()
    }
}
