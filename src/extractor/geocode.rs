//! `GeocodeProvider` trait plus Google, LocationIQ, and Nominatim
//! implementations, selected once at startup by whichever API key is
//! configured.

use async_trait::async_trait;
use serde::Deserialize;

use crate::config::Config;
use crate::error::{Error, Result};

#[derive(Debug, Clone, PartialEq)]
pub struct GeocodeResult {
    pub formatted_address: String,
    pub lat: f64,
    pub lon: f64,
    pub county: Option<String>,
    pub has_street_number: bool,
    pub is_bare_postcode_row: bool,
}

#[async_trait]
pub trait GeocodeProvider: Send + Sync {
    /// Resolve `address` to coordinates, or `None` if the provider rejects
    /// the match per spec §4.3 (locality-only, out-of-region county, bare
    /// postcode row).
    async fn geocode(&self, address: &str, config: &Config) -> Result<Option<GeocodeResult>>;
}

fn county_in_target_set(county: Option<&str>, config: &Config) -> bool {
    if config.geocoding_target_counties.is_empty() {
        return true;
    }
    match county {
        Some(c) => config
            .geocoding_target_counties
            .iter()
            .any(|target| target.eq_ignore_ascii_case(c)),
        None => false,
    }
}

fn accept(result: GeocodeResult, config: &Config) -> Option<GeocodeResult> {
    if !result.has_street_number {
        return None;
    }
    if result.is_bare_postcode_row {
        return None;
    }
    if !county_in_target_set(result.county.as_deref(), config) {
        return None;
    }
    Some(result)
}

pub struct GoogleGeocoder {
    client: reqwest::Client,
    api_key: String,
}

impl GoogleGeocoder {
    pub fn new(api_key: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key,
        }
    }
}

#[derive(Deserialize)]
struct GoogleResponse {
    results: Vec<GoogleResult>,
    status: String,
}

#[derive(Deserialize)]
struct GoogleResult {
    formatted_address: String,
    geometry: GoogleGeometry,
    address_components: Vec<GoogleAddressComponent>,
    types: Vec<String>,
}

#[derive(Deserialize)]
struct GoogleGeometry {
    location: GoogleLocation,
}

#[derive(Deserialize)]
struct GoogleLocation {
    lat: f64,
    lng: f64,
}

#[derive(Deserialize)]
struct GoogleAddressComponent {
    long_name: String,
    types: Vec<String>,
}

#[async_trait]
impl GeocodeProvider for GoogleGeocoder {
    async fn geocode(&self, address: &str, config: &Config) -> Result<Option<GeocodeResult>> {
        let response: GoogleResponse = self
            .client
            .get("https://maps.googleapis.com/maps/api/geocode/json")
            .query(&[("address", address), ("key", self.api_key.as_str())])
            .send()
            .await?
            .json()
            .await?;

        if response.status != "OK" {
            return Ok(None);
        }
        let Some(top) = response.results.into_iter().next() else {
            return Ok(None);
        };

        let has_street_number = top
            .address_components
            .iter()
            .any(|c| c.types.iter().any(|t| t == "street_number"));
        let is_locality_only = top.types.iter().any(|t| t == "locality")
            && !top.types.iter().any(|t| t == "street_address" || t == "premise");
        let county = top
            .address_components
            .iter()
            .find(|c| c.types.iter().any(|t| t == "administrative_area_level_2"))
            .map(|c| c.long_name.clone());

        let result = GeocodeResult {
            formatted_address: top.formatted_address,
            lat: top.geometry.location.lat,
            lon: top.geometry.location.lng,
            county,
            has_street_number: has_street_number && !is_locality_only,
            is_bare_postcode_row: top.types.iter().any(|t| t == "postal_code"),
        };

        Ok(accept(result, config))
    }
}

pub struct LocationIqGeocoder {
    client: reqwest::Client,
    api_key: String,
}

impl LocationIqGeocoder {
    pub fn new(api_key: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key,
        }
    }
}

#[derive(Deserialize)]
struct LocationIqResult {
    lat: String,
    lon: String,
    display_name: String,
    #[serde(default)]
    address: LocationIqAddress,
    class: String,
}

#[derive(Deserialize, Default)]
struct LocationIqAddress {
    #[serde(default)]
    house_number: Option<String>,
    #[serde(default)]
    county: Option<String>,
}

#[async_trait]
impl GeocodeProvider for LocationIqGeocoder {
    async fn geocode(&self, address: &str, config: &Config) -> Result<Option<GeocodeResult>> {
        let results: Vec<LocationIqResult> = self
            .client
            .get("https://us1.locationiq.com/v1/search")
            .query(&[
                ("key", self.api_key.as_str()),
                ("q", address),
                ("format", "json"),
                ("addressdetails", "1"),
            ])
            .send()
            .await?
            .json()
            .await
            .unwrap_or_default();

        let Some(top) = results.into_iter().next() else {
            return Ok(None);
        };

        let result = GeocodeResult {
            formatted_address: top.display_name,
            lat: top.lat.parse().map_err(|_| Error::Other("invalid lat from LocationIQ".into()))?,
            lon: top.lon.parse().map_err(|_| Error::Other("invalid lon from LocationIQ".into()))?,
            county: top.address.county,
            has_street_number: top.address.house_number.is_some(),
            is_bare_postcode_row: top.class == "place" && top.address.house_number.is_none(),
        };

        Ok(accept(result, config))
    }
}

pub struct NominatimGeocoder {
    client: reqwest::Client,
}

impl NominatimGeocoder {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }
}

impl Default for NominatimGeocoder {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Deserialize)]
struct NominatimResult {
    lat: String,
    lon: String,
    display_name: String,
    #[serde(default)]
    address: NominatimAddress,
    class: String,
}

#[derive(Deserialize, Default)]
struct NominatimAddress {
    #[serde(default)]
    house_number: Option<String>,
    #[serde(default)]
    county: Option<String>,
}

#[async_trait]
impl GeocodeProvider for NominatimGeocoder {
    async fn geocode(&self, address: &str, config: &Config) -> Result<Option<GeocodeResult>> {
        let results: Vec<NominatimResult> = self
            .client
            .get("https://nominatim.openstreetmap.org/search")
            .query(&[
                ("q", address),
                ("format", "jsonv2"),
                ("addressdetails", "1"),
            ])
            .header("User-Agent", "callrelay/0.1")
            .send()
            .await?
            .json()
            .await
            .unwrap_or_default();

        let Some(top) = results.into_iter().next() else {
            return Ok(None);
        };

        let result = GeocodeResult {
            formatted_address: top.display_name,
            lat: top.lat.parse().map_err(|_| Error::Other("invalid lat from Nominatim".into()))?,
            lon: top.lon.parse().map_err(|_| Error::Other("invalid lon from Nominatim".into()))?,
            county: top.address.county,
            has_street_number: top.address.house_number.is_some(),
            is_bare_postcode_row: top.class == "place" && top.address.house_number.is_none(),
        };

        Ok(accept(result, config))
    }
}

/// Build the configured provider from `GOOGLE_MAPS_API_KEY` /
/// `LOCATIONIQ_API_KEY`, falling back to Nominatim (no key required).
pub fn build_provider(config: &Config) -> Box<dyn GeocodeProvider> {
    if let Some(key) = &config.google_maps_api_key {
        Box::new(GoogleGeocoder::new(key.clone()))
    } else if let Some(key) = &config.locationiq_api_key {
        Box::new(LocationIqGeocoder::new(key.clone()))
    } else {
        Box::new(NominatimGeocoder::new())
    }
}
