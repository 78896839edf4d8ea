//! Reverse geocoding: turns a waypoint coordinate into the name of the
//! street it sits on.

use futures::future::BoxFuture;
use serde::Deserialize;
use tracing::debug;

use crate::config::GeocodingConfig;

/// Address component type that marks a street.
const STREET_COMPONENT_TYPE: &str = "route";

#[derive(Debug, thiserror::Error)]
pub enum GeocodeError {
    #[error("geocoding request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("geocoding service returned status {status}: {message}")]
    Status { status: String, message: String },
    #[error("no address found for {0}")]
    NoResults(String),
    #[error("no street found for {0}")]
    NoStreet(String),
}

#[derive(Debug, Clone, Deserialize)]
pub struct AddressComponent {
    #[serde(default)]
    pub long_name: String,
    pub short_name: String,
    #[serde(default)]
    pub types: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GeocodeResult {
    #[serde(default)]
    pub address_components: Vec<AddressComponent>,
    #[serde(default)]
    pub formatted_address: Option<String>,
}

impl GeocodeResult {
    /// Short name of the first component typed as a street.
    pub fn street_name(&self) -> Option<&str> {
        self.address_components
            .iter()
            .find(|c| c.types.iter().any(|t| t == STREET_COMPONENT_TYPE))
            .map(|c| c.short_name.as_str())
    }
}

#[derive(Debug, Deserialize)]
struct GeocodeResponse {
    status: String,
    #[serde(default)]
    results: Vec<GeocodeResult>,
    #[serde(default)]
    error_message: Option<String>,
}

pub fn format_latlng(lat: f64, lng: f64) -> String {
    format!("{lat},{lng}")
}

pub trait ReverseGeocoder: Send + Sync {
    /// Resolves a `"lat,lng"` string to its best matching address.
    fn reverse_geocode<'a>(&'a self, latlng: &'a str)
        -> BoxFuture<'a, Result<GeocodeResult, GeocodeError>>;
}

/// Looks up the street name at a coordinate, failing with `NoStreet` when
/// the best address has no street component.
pub async fn street_at(
    geocoder: &dyn ReverseGeocoder,
    lat: f64,
    lng: f64,
) -> Result<String, GeocodeError> {
    let latlng = format_latlng(lat, lng);
    let result = geocoder.reverse_geocode(&latlng).await?;
    let street = result
        .street_name()
        .map(ToString::to_string)
        .ok_or_else(|| GeocodeError::NoStreet(latlng.clone()))?;
    debug!("Resolved {} to street {}", latlng, street);
    Ok(street)
}

pub struct GoogleGeocoder {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
}

impl GoogleGeocoder {
    pub fn new(client: reqwest::Client, config: &GeocodingConfig) -> Self {
        Self {
            client,
            api_key: config.api_key.clone(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
        }
    }

    async fn lookup(&self, latlng: &str) -> Result<GeocodeResult, GeocodeError> {
        let url = format!(
            "{}/maps/api/geocode/json?latlng={}&key={}",
            self.base_url,
            urlencoding::encode(latlng),
            urlencoding::encode(&self.api_key)
        );

        let response: GeocodeResponse = self
            .client
            .get(&url)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        match response.status.as_str() {
            "OK" => response
                .results
                .into_iter()
                .next()
                .ok_or_else(|| GeocodeError::NoResults(latlng.to_string())),
            "ZERO_RESULTS" => Err(GeocodeError::NoResults(latlng.to_string())),
            _ => Err(GeocodeError::Status {
                status: response.status,
                message: response.error_message.unwrap_or_default(),
            }),
        }
    }
}

impl ReverseGeocoder for GoogleGeocoder {
    fn reverse_geocode<'a>(
        &'a self,
        latlng: &'a str,
    ) -> BoxFuture<'a, Result<GeocodeResult, GeocodeError>> {
        Box::pin(self.lookup(latlng))
    }
}
